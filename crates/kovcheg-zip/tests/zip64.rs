use std::io::{self, BufWriter, Read, Write};

use kovcheg_zip::zip::{Eocd64Locator, EocdRecord};
use kovcheg_zip::{CompressionMethod, ReaderConfig, WriterConfig, ZipEntry, ZipReader, ZipWriter};

fn eocd_field_u16(archive: &[u8], offset: usize) -> u16 {
    let eocd = archive.len() - EocdRecord::SIZE;
    u16::from_le_bytes([archive[eocd + offset], archive[eocd + offset + 1]])
}

#[test]
fn forced_zip64_round_trips() {
    let config = WriterConfig::default().with_force_zip64(true);
    let mut writer = ZipWriter::new(Vec::new(), config);
    writer.write_entry(ZipEntry::new("a.txt"), b"first entry").unwrap();
    let mut stored = ZipEntry::new("b.txt");
    stored.set_compression(CompressionMethod::Stored);
    writer.write_entry(stored, b"second entry").unwrap();
    let archive = writer.into_inner().unwrap();

    // Sentinels in the classic record, locator right before it.
    assert_eq!(eocd_field_u16(&archive, 10), u16::MAX);
    let locator = archive.len() - EocdRecord::SIZE - Eocd64Locator::SIZE;
    assert_eq!(&archive[locator..locator + 4], &Eocd64Locator::MAGIC);

    let reader = ZipReader::new(archive, ReaderConfig::default()).unwrap();
    assert!(reader.directory().is_zip64());
    assert_eq!(reader.len(), 2);
    for entry in reader.entries() {
        assert!(entry.extra().zip64().is_some(), "{}", entry.name());
    }
    assert_eq!(reader.read("a.txt").unwrap(), b"first entry");
    assert_eq!(reader.read("b.txt").unwrap(), b"second entry");
}

#[test]
fn zip64_archive_with_preamble() {
    let config = WriterConfig::default().with_force_zip64(true);
    let mut writer = ZipWriter::new(Vec::new(), config);
    writer.write_entry(ZipEntry::new("a.txt"), b"behind a stub").unwrap();
    let archive = writer.into_inner().unwrap();

    let mut padded = vec![0x5Au8; 100];
    padded.extend_from_slice(&archive);
    let reader = ZipReader::new(padded, ReaderConfig::default()).unwrap();
    assert!(reader.directory().is_zip64());
    assert_eq!(reader.preamble_len(), 100);
    assert_eq!(reader.read("a.txt").unwrap(), b"behind a stub");
}

#[test]
fn small_archives_stay_classic() {
    let mut writer = ZipWriter::new(Vec::new(), WriterConfig::default());
    writer.write_entry(ZipEntry::new("a"), b"a").unwrap();
    let archive = writer.into_inner().unwrap();

    assert_eq!(eocd_field_u16(&archive, 10), 1);
    let reader = ZipReader::new(archive, ReaderConfig::default()).unwrap();
    assert!(!reader.directory().is_zip64());
    assert!(reader.entry("a").unwrap().extra().zip64().is_none());
}

#[test]
fn more_than_65535_entries() {
    const COUNT: usize = 65_536;

    let mut writer = ZipWriter::new(Vec::new(), WriterConfig::default());
    for i in 0..COUNT {
        let mut entry = ZipEntry::new(format!("{i:05}"));
        entry.set_compression(CompressionMethod::Stored);
        writer.write_entry(entry, &[(i % 251) as u8]).unwrap();
    }
    let archive = writer.into_inner().unwrap();
    assert_eq!(eocd_field_u16(&archive, 10), u16::MAX);

    let reader = ZipReader::new(archive, ReaderConfig::default()).unwrap();
    assert!(reader.directory().is_zip64());
    assert_eq!(reader.len(), COUNT);
    assert_eq!(reader.read("00000").unwrap(), [0u8]);
    assert_eq!(reader.read("65535").unwrap(), [(65_535 % 251) as u8]);
}

/// Writes a little over 4 GiB to a temporary file.
#[test]
#[ignore]
fn entry_larger_than_4gib() {
    const CHUNK: usize = 1 << 20;
    const SIZE: u64 = (1 << 32) + (1 << 20);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("large.zip");
    let file = std::fs::File::create(&path).unwrap();
    let mut writer = ZipWriter::new(BufWriter::new(file), WriterConfig::default());

    let mut entry = ZipEntry::new("zeros.bin");
    entry.set_compression(CompressionMethod::Stored);
    writer.put_next_entry(entry, true).unwrap();
    let chunk = vec![0u8; CHUNK];
    let mut written = 0;
    while written < SIZE {
        writer.write_all(&chunk).unwrap();
        written += CHUNK as u64;
    }
    writer.write_entry(ZipEntry::new("after"), b"past 4 GiB").unwrap();
    writer.into_inner().unwrap().flush().unwrap();

    let reader = ZipReader::from_path(&path, ReaderConfig::default()).unwrap();
    assert!(reader.directory().is_zip64());
    let entry = reader.entry("zeros.bin").unwrap();
    assert_eq!(entry.size(), Some(SIZE));
    assert!(reader.entry("after").unwrap().offset().unwrap() > u32::MAX as u64);

    let mut stream = reader.open("zeros.bin", true, true).unwrap();
    let copied = io::copy(&mut stream, &mut io::sink()).unwrap();
    assert_eq!(copied, SIZE);
    stream.finish().unwrap();

    let mut after = Vec::new();
    reader
        .open("after", true, true)
        .unwrap()
        .read_to_end(&mut after)
        .unwrap();
    assert_eq!(after, b"past 4 GiB");
}

use std::io::{Read, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use kovcheg_common::crc;
use kovcheg_zip::crypto::AesVendorVersion;
use kovcheg_zip::{
    CompressionMethod, Error, ErrorKind, FnKeyProvider, KeyStrength, ReaderConfig, RetryPolicy,
    StaticKeyProvider, WriterConfig, ZipEntry, ZipReader, ZipWriter,
};

const PASSWORD: &str = "correct horse battery staple";
const SECRET: &[u8] = b"The quick brown fox jumps over the lazy dog, again and again and again.";

fn encrypted(name: &str) -> ZipEntry {
    let mut entry = ZipEntry::new(name);
    entry.set_encrypted(true);
    entry
}

fn encrypted_archive(strength: KeyStrength, method: CompressionMethod, entries: Vec<(ZipEntry, &[u8])>) -> Vec<u8> {
    let config = WriterConfig::default()
        .with_method(method)
        .with_key_provider(StaticKeyProvider::with_strength(PASSWORD, strength));
    let mut writer = ZipWriter::new(Vec::new(), config);
    for (entry, data) in entries {
        writer.write_entry(entry, data).unwrap();
    }
    writer.into_inner().unwrap()
}

fn open_with(archive: Vec<u8>, password: &str) -> ZipReader<Vec<u8>> {
    let config = ReaderConfig::default().with_key_provider(StaticKeyProvider::new(password));
    ZipReader::new(archive, config).unwrap()
}

fn data_start(archive: &[u8], entry: &ZipEntry) -> usize {
    let header = entry.offset().unwrap() as usize;
    let name_len = u16::from_le_bytes([archive[header + 26], archive[header + 27]]) as usize;
    let extra_len = u16::from_le_bytes([archive[header + 28], archive[header + 29]]) as usize;
    header + 30 + name_len + extra_len
}

fn root_cause(err: Error) -> Error {
    match err {
        Error::Entry { source, .. } => *source,
        other => other,
    }
}

#[test]
fn every_strength_and_method_round_trips() {
    for strength in [KeyStrength::Aes128, KeyStrength::Aes192, KeyStrength::Aes256] {
        for method in [
            CompressionMethod::Stored,
            CompressionMethod::Deflated,
            CompressionMethod::Bzip2,
        ] {
            let archive = encrypted_archive(
                strength,
                method,
                vec![(encrypted("secret.txt"), SECRET), (ZipEntry::new("plain.txt"), &b"open"[..])],
            );
            assert!(!archive.windows(SECRET.len()).any(|w| w == SECRET));

            let reader = open_with(archive, PASSWORD);
            let entry = reader.entry("secret.txt").unwrap();
            assert!(entry.is_encrypted());
            assert_eq!(entry.compression(), Some(method));
            let aes = entry.aes_info().unwrap();
            assert_eq!(aes.key_strength, strength);
            assert_eq!(aes.method, method.code());

            assert_eq!(reader.read("secret.txt").unwrap(), SECRET, "{strength:?} {method:?}");
            assert!(!reader.entry("plain.txt").unwrap().is_encrypted());
            assert_eq!(reader.read("plain.txt").unwrap(), b"open");
        }
    }
}

#[test]
fn vendor_version_follows_size_and_method() {
    let mut known = encrypted("known");
    known.set_size(SECRET.len() as u64);
    let mut small = encrypted("small");
    small.set_size(5);
    let mut bzip = encrypted("bzip");
    bzip.set_compression(CompressionMethod::Bzip2);
    bzip.set_size(SECRET.len() as u64);

    let config = WriterConfig::default()
        .with_key_provider(StaticKeyProvider::with_strength(PASSWORD, KeyStrength::Aes256));
    let mut writer = ZipWriter::new(Vec::new(), config);
    writer.write_entry(known, SECRET).unwrap();
    writer.write_entry(small, b"small").unwrap();
    writer.write_entry(bzip, SECRET).unwrap();
    // Streamed, so the size is not known up front.
    writer.put_next_entry(encrypted("unknown"), true).unwrap();
    writer.write_all(SECRET).unwrap();
    writer.close_entry().unwrap();
    let reader = open_with(writer.into_inner().unwrap(), PASSWORD);

    let version = |name: &str| reader.entry(name).unwrap().aes_info().unwrap().vendor_version;
    assert_eq!(version("known"), AesVendorVersion::Ae1);
    assert_eq!(version("small"), AesVendorVersion::Ae2);
    assert_eq!(version("bzip"), AesVendorVersion::Ae2);
    assert_eq!(version("unknown"), AesVendorVersion::Ae2);

    // AE-1 keeps the checksum, AE-2 zeroes it.
    assert_eq!(reader.entry("known").unwrap().crc(), Some(crc::hash_bytes(SECRET)));
    assert_eq!(reader.entry("unknown").unwrap().crc(), Some(0));

    for name in ["known", "small", "bzip", "unknown"] {
        assert!(!reader.read(name).unwrap().is_empty(), "{name}");
    }
}

#[test]
fn whole_entries_use_ae1() {
    let content = [7u8; 1000];
    let ten = [3u8; 10];
    let archive = encrypted_archive(
        KeyStrength::Aes256,
        CompressionMethod::Deflated,
        vec![(encrypted("big"), &content[..]), (encrypted("ten"), &ten[..])],
    );
    let reader = open_with(archive, PASSWORD);

    let big = reader.entry("big").unwrap();
    assert_eq!(big.aes_info().unwrap().vendor_version, AesVendorVersion::Ae1);
    assert_eq!(big.crc(), Some(crc::hash_bytes(&content)));
    assert_eq!(reader.read("big").unwrap(), content);

    let ten_entry = reader.entry("ten").unwrap();
    assert_eq!(ten_entry.aes_info().unwrap().vendor_version, AesVendorVersion::Ae2);
    assert_eq!(ten_entry.crc(), Some(0));
    assert_eq!(reader.read("ten").unwrap(), ten);
}

#[test]
fn tampered_ciphertext_fails_authentication() {
    let mut entry = encrypted("secret.txt");
    entry.set_compression(CompressionMethod::Stored);
    let mut archive = encrypted_archive(
        KeyStrength::Aes256,
        CompressionMethod::Stored,
        vec![(entry, SECRET)],
    );

    let offset = {
        let reader = open_with(archive.clone(), PASSWORD);
        let entry = reader.entry("secret.txt").unwrap();
        // salt and verifier come first
        data_start(&archive, entry) + KeyStrength::Aes256.salt_len() + 2
    };
    archive[offset + 3] ^= 0x01;

    let reader = open_with(archive, PASSWORD);
    let err = reader.read("secret.txt").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(matches!(root_cause(err), Error::AuthenticationFailed { .. }));

    // Without checks the stream opens; authentication is still on demand.
    let mut stream = reader.open("secret.txt", false, true).unwrap();
    assert!(stream.is_authenticated_content());
    let mut data = Vec::new();
    stream.read_to_end(&mut data).unwrap();
    assert_eq!(data.len(), SECRET.len());
    assert_ne!(data, SECRET);
    assert!(matches!(
        stream.authenticate(),
        Err(Error::AuthenticationFailed { .. })
    ));
}

#[test]
fn key_provider_outcomes() {
    let archive = encrypted_archive(
        KeyStrength::Aes128,
        CompressionMethod::Deflated,
        vec![(encrypted("secret.txt"), SECRET)],
    );
    let quick = RetryPolicy {
        initial: Duration::from_millis(1),
        max: Duration::from_millis(1),
    };

    let wrong = ZipReader::new(
        archive.clone(),
        ReaderConfig::default()
            .with_retry(quick)
            .with_key_provider(StaticKeyProvider::new("wrong")),
    )
    .unwrap();
    let err = root_cause(wrong.read("secret.txt").unwrap_err());
    assert!(matches!(err, Error::WrongPassword { .. }));
    assert_eq!(err.kind(), ErrorKind::Key);

    let cancelled = ZipReader::new(
        archive.clone(),
        ReaderConfig::default().with_key_provider(FnKeyProvider::new(|_: &str, _| None)),
    )
    .unwrap();
    let err = root_cause(cancelled.read("secret.txt").unwrap_err());
    assert!(matches!(err, Error::KeyCancelled { .. }));

    let missing = ZipReader::new(archive.clone(), ReaderConfig::default()).unwrap();
    let err = root_cause(missing.read("secret.txt").unwrap_err());
    assert!(matches!(err, Error::MissingKeyProvider { .. }));
    assert_eq!(err.kind(), ErrorKind::Parameter);

    // Raw access needs no password.
    let mut raw = Vec::new();
    missing
        .open("secret.txt", false, false)
        .unwrap()
        .read_to_end(&mut raw)
        .unwrap();
    assert_eq!(raw.len() as u64, missing.entry("secret.txt").unwrap().compressed_size().unwrap());
}

#[test]
fn wrong_passwords_are_penalized() {
    let archive = encrypted_archive(
        KeyStrength::Aes256,
        CompressionMethod::Deflated,
        vec![(encrypted("secret.txt"), SECRET)],
    );
    let policy = RetryPolicy {
        initial: Duration::from_millis(20),
        max: Duration::from_millis(80),
    };

    let attempts = Mutex::new(Vec::<(Instant, bool)>::new());
    let provider = FnKeyProvider::new(move |_: &str, invalid| {
        let mut attempts = attempts.lock().unwrap();
        attempts.push((Instant::now(), invalid));
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1].0 - w[0].0).collect();
        for (i, gap) in gaps.iter().enumerate() {
            assert!(*gap >= policy.delay(i as u32 + 1), "attempt {} came after {gap:?}", i + 2);
        }
        if attempts.len() <= 3 {
            Some(b"guess".to_vec())
        } else {
            assert!(invalid);
            Some(PASSWORD.as_bytes().to_vec())
        }
    });

    let reader = ZipReader::new(
        archive,
        ReaderConfig::default()
            .with_retry(policy)
            .with_key_provider(provider),
    )
    .unwrap();
    let start = Instant::now();
    assert_eq!(reader.read("secret.txt").unwrap(), SECRET);
    assert!(start.elapsed() >= Duration::from_millis(20 + 40 + 80));

    // The schedule never decreases.
    let delays: Vec<_> = (1..8).map(|n| policy.delay(n)).collect();
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn raw_copy_keeps_encryption() {
    let archive = encrypted_archive(
        KeyStrength::Aes192,
        CompressionMethod::Deflated,
        vec![(encrypted("secret.txt"), SECRET)],
    );
    let source = ZipReader::new(archive, ReaderConfig::default()).unwrap();

    let mut writer = ZipWriter::new(Vec::new(), WriterConfig::default());
    writer.copy_from(&source, "secret.txt").unwrap();
    let copy = writer.into_inner().unwrap();

    let reader = open_with(copy, PASSWORD);
    let entry = reader.entry("secret.txt").unwrap();
    assert_eq!(entry.aes_info().unwrap().key_strength, KeyStrength::Aes192);
    assert_eq!(reader.read("secret.txt").unwrap(), SECRET);
}

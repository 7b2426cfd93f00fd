//! Shared archive view for concurrent use.

use parking_lot::Mutex;

use crate::entry::ZipEntry;
use crate::reader::{EntryReader, ZipReader};
use crate::source::ReadAt;
use crate::{Error, Result};

/// A [`ZipReader`] that can be closed through a shared reference.
///
/// Every call holds one lock for its duration. Streams returned by
/// [`open`](SyncZipReader::open) read outside the lock, so threads may stream
/// entries at once. [`close`](SyncZipReader::close) fails with
/// [`Error::Busy`] while any entry stream is still alive. Once closed, every
/// operation fails with [`Error::Closed`].
pub struct SyncZipReader<S> {
    inner: Mutex<Option<ZipReader<S>>>,
}

impl<S: ReadAt + 'static> SyncZipReader<S> {
    pub fn new(reader: ZipReader<S>) -> Self {
        Self {
            inner: Mutex::new(Some(reader)),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&ZipReader<S>) -> Result<T>) -> Result<T> {
        match self.inner.lock().as_ref() {
            Some(reader) => f(reader),
            None => Err(Error::Closed),
        }
    }

    /// A copy of the named entry.
    pub fn entry(&self, name: &str) -> Result<Option<ZipEntry>> {
        self.with(|reader| Ok(reader.entry(name).cloned()))
    }

    pub fn names(&self) -> Result<Vec<String>> {
        self.with(|reader| Ok(reader.entries().map(|e| e.name().to_owned()).collect()))
    }

    pub fn open(&self, name: &str, check_crc: bool, decode: bool) -> Result<EntryReader> {
        self.with(|reader| reader.open(name, check_crc, decode))
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.with(|reader| reader.read(name))
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, ZipReader::open_count)
    }

    pub fn busy(&self) -> bool {
        self.open_count() > 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Release the source. Fails while entry streams are open.
    pub fn close(&self) -> Result<S> {
        let mut guard = self.inner.lock();
        let reader = guard.take().ok_or(Error::Closed)?;
        let open = reader.open_count();
        if open > 0 {
            *guard = Some(reader);
            return Err(Error::Busy { open });
        }
        reader.close()
    }
}

impl<S: ReadAt + 'static> From<ZipReader<S>> for SyncZipReader<S> {
    fn from(reader: ZipReader<S>) -> Self {
        Self::new(reader)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::{ReaderConfig, WriterConfig, ZipWriter};

    fn archive() -> Vec<u8> {
        let mut writer = ZipWriter::new(Vec::new(), WriterConfig::default());
        for i in 0..8 {
            let name = format!("file-{i}.txt");
            writer
                .write_entry(ZipEntry::new(name.as_str()), name.repeat(100).as_bytes())
                .unwrap();
        }
        writer.into_inner().unwrap()
    }

    #[test]
    fn test_concurrent_reads() {
        let reader = ZipReader::new(archive(), ReaderConfig::default()).unwrap();
        let shared = Arc::new(SyncZipReader::new(reader));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    let name = format!("file-{i}.txt");
                    let data = shared.read(&name).unwrap();
                    assert_eq!(data, name.repeat(100).into_bytes());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(shared.names().unwrap().len(), 8);
    }

    #[test]
    fn test_close_while_busy() {
        let reader = ZipReader::new(archive(), ReaderConfig::default()).unwrap();
        let shared = SyncZipReader::new(reader);
        let mut stream = shared.open("file-0.txt", true, true).unwrap();
        assert!(shared.busy());
        assert!(matches!(shared.close(), Err(Error::Busy { open: 1 })));

        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        drop(stream);

        assert!(shared.close().is_ok());
        assert!(shared.is_closed());
        assert!(matches!(shared.read("file-0.txt"), Err(Error::Closed)));
        assert!(matches!(shared.close(), Err(Error::Closed)));
    }
}

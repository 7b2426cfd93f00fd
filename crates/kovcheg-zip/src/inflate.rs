//! Streaming raw DEFLATE decoding with a pooled engine.

use std::io::{self, BufRead, Read};

use flate2::{Decompress, FlushDecompress, Status};

use crate::pool::Pooled;

/// Inflates a raw DEFLATE stream from `inner`.
///
/// Stops at the end-of-stream marker; bytes after it are left unread.
pub(crate) struct InflateReader<R> {
    inner: R,
    engine: Pooled<Decompress>,
    done: bool,
}

impl<R: BufRead> InflateReader<R> {
    pub fn new(inner: R, engine: Pooled<Decompress>) -> Self {
        Self {
            inner,
            engine,
            done: false,
        }
    }
}

impl<R: BufRead> Read for InflateReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }
        loop {
            let input = self.inner.fill_buf()?;
            let eof = input.is_empty();
            let flush = if eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };

            let before_in = self.engine.total_in();
            let before_out = self.engine.total_out();
            let status = self
                .engine
                .decompress(input, buf, flush)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let consumed = (self.engine.total_in() - before_in) as usize;
            let produced = (self.engine.total_out() - before_out) as usize;
            self.inner.consume(consumed);

            match status {
                Status::StreamEnd => {
                    self.done = true;
                    return Ok(produced);
                }
                _ if produced > 0 => return Ok(produced),
                _ if eof || consumed == 0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "deflate stream truncated",
                    ))
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Write};

    use flate2::write::DeflateEncoder;
    use flate2::Compression;

    use super::*;
    use crate::pool::Pool;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_inflate_with_trailing_pad() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let compressed = deflate(&data);
        let pool = Pool::new(1);
        let input = compressed.as_slice().chain(io::repeat(0).take(1));
        let mut reader = InflateReader::new(
            BufReader::with_capacity(64, input),
            pool.take(|| Decompress::new(false)),
        );
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_truncated_stream() {
        let data = vec![7u8; 10_000];
        let compressed = deflate(&data);
        let pool = Pool::new(1);
        let mut reader = InflateReader::new(
            &compressed[..compressed.len() / 2],
            pool.take(|| Decompress::new(false)),
        );
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }
}

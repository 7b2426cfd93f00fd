//! Write pipeline for entry content.
//!
//! Content flows through an ordered list of stages before it reaches the
//! sink: checksum, then compression, then encryption. Every stage gets to
//! adjust the entry in `init` before the local header is written, and
//! reports what it learned in `finish` once the content ends. Finishing runs
//! in data order, and any bytes a stage flushes go through the stages after
//! it.

use std::io::{self, Write};
use std::sync::Arc;

use bzip2::write::BzEncoder;
use flate2::{Compress, Compression, FlushCompress, Status};
use kovcheg_common::crc::Crc32;

use crate::crypto::{AesEncryptor, AesParams, AesVendorVersion};
use crate::entry::ZipEntry;
use crate::extra::WinZipAesInfo;
use crate::pool::{Pool, Pooled};
use crate::zip::CompressionMethod;
use crate::{Error, Result};

/// Spare output room kept while compressing.
const OUTPUT_CHUNK: usize = 32 * 1024;

/// How an entry's content is to be encoded.
pub(crate) struct PipelinePlan {
    /// Checksum and compress the content. Unset for raw copies.
    pub process: bool,
    pub method: CompressionMethod,
    pub level: u32,
    pub encryption: Option<AesParams>,
}

/// The stages for one entry, in data order.
pub(crate) struct Pipeline {
    stages: Vec<Stage>,
    method: CompressionMethod,
    process: bool,
}

impl Pipeline {
    pub fn build(plan: PipelinePlan, deflaters: &Arc<Pool<Compress>>) -> Result<Self> {
        let mut stages = Vec::with_capacity(3);
        if plan.process {
            stages.push(Stage::Crc(CrcStage::default()));
            match plan.method {
                CompressionMethod::Stored => {}
                CompressionMethod::Deflated => {
                    let level = plan.level;
                    stages.push(Stage::Deflate(DeflateStage {
                        engine: deflaters.take(|| Compress::new(Compression::new(level), false)),
                        out: Vec::new(),
                    }));
                }
                CompressionMethod::Bzip2 => {
                    let level = bzip2::Compression::new(plan.level.clamp(1, 9));
                    stages.push(Stage::Bzip2(Bzip2Stage {
                        encoder: BzEncoder::new(Vec::new(), level),
                        out: Vec::new(),
                    }));
                }
            }
            if let Some(params) = &plan.encryption {
                stages.push(Stage::Aes(AesStage {
                    encryptor: AesEncryptor::new(params)?,
                    params: params.clone(),
                    vendor_version: AesVendorVersion::Ae2,
                    out: Vec::new(),
                }));
            }
        }
        Ok(Self {
            stages,
            method: plan.method,
            process: plan.process,
        })
    }

    /// Let every stage adjust the entry before its header is written.
    pub fn init(&mut self, entry: &mut ZipEntry) -> Result<()> {
        if !self.process {
            return Ok(());
        }
        entry.set_compression(self.method);
        if self.method == CompressionMethod::Stored && entry.compressed_size().is_none() {
            entry.set_compressed_size(entry.size());
        }
        for stage in &mut self.stages {
            stage.init(entry)?;
        }
        Ok(())
    }

    /// Push content through all stages into `sink`.
    pub fn write<W: Write>(&mut self, data: &[u8], sink: &mut W) -> Result<()> {
        run(&mut self.stages, data, sink)
    }

    /// Finish every stage in data order.
    pub fn finish<W: Write>(&mut self, entry: &mut ZipEntry, sink: &mut W) -> Result<()> {
        for i in 0..self.stages.len() {
            let (head, rest) = self.stages.split_at_mut(i + 1);
            let tail = head[i].finish(entry)?;
            run(rest, tail, sink)?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn kinds(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::kind).collect()
    }
}

fn run<W: Write>(stages: &mut [Stage], input: &[u8], sink: &mut W) -> Result<()> {
    if input.is_empty() {
        return Ok(());
    }
    match stages.split_first_mut() {
        None => Ok(sink.write_all(input)?),
        Some((stage, rest)) => {
            let output = stage.process(input)?;
            run(rest, output, sink)
        }
    }
}

enum Stage {
    Crc(CrcStage),
    Deflate(DeflateStage),
    Bzip2(Bzip2Stage),
    Aes(AesStage),
}

impl Stage {
    fn init(&mut self, entry: &mut ZipEntry) -> Result<()> {
        match self {
            Self::Crc(stage) => stage.init(entry),
            Self::Deflate(_) | Self::Bzip2(_) => entry.set_compressed_size(None),
            Self::Aes(stage) => stage.init(entry),
        }
        Ok(())
    }

    /// Transform `input`; the result borrows from `input` or the stage.
    fn process<'a>(&'a mut self, input: &'a [u8]) -> Result<&'a [u8]> {
        match self {
            Self::Crc(stage) => {
                stage.crc.update(input);
                Ok(input)
            }
            Self::Deflate(stage) => {
                stage.out.clear();
                deflate(&mut stage.engine, input, &mut stage.out, FlushCompress::None)?;
                Ok(stage.out.as_slice())
            }
            Self::Bzip2(stage) => {
                stage.encoder.write_all(input)?;
                stage.out.clear();
                stage.out.append(stage.encoder.get_mut());
                Ok(stage.out.as_slice())
            }
            Self::Aes(stage) => {
                stage.out.clear();
                stage.encryptor.update(input, &mut stage.out);
                Ok(stage.out.as_slice())
            }
        }
    }

    /// Flush remaining output and record what this stage learned.
    fn finish(&mut self, entry: &mut ZipEntry) -> Result<&[u8]> {
        match self {
            Self::Crc(stage) => {
                stage.finish(entry)?;
                Ok(&[][..])
            }
            Self::Deflate(stage) => {
                stage.out.clear();
                deflate(&mut stage.engine, &[], &mut stage.out, FlushCompress::Finish)?;
                Ok(stage.out.as_slice())
            }
            Self::Bzip2(stage) => {
                stage.encoder.try_finish()?;
                stage.out.clear();
                stage.out.append(stage.encoder.get_mut());
                Ok(stage.out.as_slice())
            }
            Self::Aes(stage) => {
                stage.out.clear();
                stage.encryptor.finish(&mut stage.out);
                if !stage.vendor_version.keeps_crc() {
                    entry.set_crc(0);
                }
                Ok(stage.out.as_slice())
            }
        }
    }

    #[cfg(test)]
    fn kind(&self) -> &'static str {
        match self {
            Self::Crc(_) => "crc",
            Self::Deflate(_) => "deflate",
            Self::Bzip2(_) => "bzip2",
            Self::Aes(_) => "aes",
        }
    }
}

/// Checks a declared CRC-32 and size, or records them if undeclared.
#[derive(Default)]
struct CrcStage {
    crc: Crc32,
    expected_crc: Option<u32>,
    expected_size: Option<u64>,
}

impl CrcStage {
    fn init(&mut self, entry: &ZipEntry) {
        self.expected_crc = entry.crc();
        self.expected_size = entry.size();
    }

    fn finish(&mut self, entry: &mut ZipEntry) -> Result<()> {
        let actual = self.crc.value();
        if let Some(expected) = self.expected_crc {
            if expected != actual {
                return Err(Error::CrcMismatch {
                    name: entry.name().to_owned(),
                    expected,
                    actual,
                });
            }
        }
        let count = self.crc.count();
        if let Some(expected) = self.expected_size {
            if expected != count {
                return Err(Error::SizeMismatch {
                    name: entry.name().to_owned(),
                    expected,
                    actual: count,
                });
            }
        }
        entry.set_crc(actual);
        entry.set_size(count);
        Ok(())
    }
}

struct DeflateStage {
    engine: Pooled<Compress>,
    out: Vec<u8>,
}

fn deflate(
    engine: &mut Compress,
    mut input: &[u8],
    out: &mut Vec<u8>,
    flush: FlushCompress,
) -> Result<()> {
    loop {
        if out.capacity() - out.len() < OUTPUT_CHUNK / 4 {
            out.reserve(OUTPUT_CHUNK);
        }
        let before = engine.total_in();
        let status = engine
            .compress_vec(input, out, flush)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        input = &input[(engine.total_in() - before) as usize..];

        let done = match flush {
            FlushCompress::Finish => status == Status::StreamEnd,
            _ => input.is_empty(),
        };
        if done {
            return Ok(());
        }
    }
}

struct Bzip2Stage {
    encoder: BzEncoder<Vec<u8>>,
    out: Vec<u8>,
}

/// WinZip AES encryption, outermost so ciphertext is what reaches the sink.
struct AesStage {
    encryptor: AesEncryptor,
    params: AesParams,
    vendor_version: AesVendorVersion,
    out: Vec<u8>,
}

impl AesStage {
    /// AE-2 suppresses the CRC for short plaintexts, where it would leak
    /// too much, and for bzip2. An unknown size also selects AE-2, since the
    /// choice is recorded before the size is learned.
    fn init(&mut self, entry: &mut ZipEntry) {
        let method = entry.method().unwrap_or(0);
        let short = entry
            .size()
            .map_or(true, |size| size < AesVendorVersion::AE2_THRESHOLD);
        self.vendor_version = if short || method == CompressionMethod::Bzip2.code() {
            AesVendorVersion::Ae2
        } else {
            AesVendorVersion::Ae1
        };

        entry.set_encrypted(true);
        entry.set_aes_info(WinZipAesInfo {
            vendor_version: self.vendor_version,
            key_strength: self.params.key_strength,
            method,
        });
        if !self.vendor_version.keeps_crc() {
            entry.set_crc(0);
        }
        if let Some(size) = entry.compressed_size() {
            entry.set_compressed_size(size + self.params.key_strength.overhead());
        }
    }
}

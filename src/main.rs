//! Kovcheg CLI - Command-line tool for ZIP archives.
//!
//! This is the main entry point for the Kovcheg command-line application.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Instant, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use kovcheg::prelude::*;
use kovcheg::zip::{dostime, CentralDirectory};

/// Kovcheg - ZIP archive tool
#[derive(Parser)]
#[command(name = "kovcheg")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log codec internals (overridden by KOVCHEG_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List contents of an archive
    List {
        /// Path to the archive
        archive: PathBuf,

        /// Filter pattern (glob-style)
        #[arg(short, long)]
        filter: Option<String>,

        /// Show detailed information
        #[arg(short, long)]
        detailed: bool,
    },

    /// Extract files from an archive
    Extract {
        /// Path to the archive
        archive: PathBuf,

        /// Output directory
        #[arg(short, long, env = "OUTPUT_FOLDER", default_value = ".")]
        output: PathBuf,

        /// Filter pattern (glob-style)
        #[arg(short, long)]
        filter: Option<String>,

        /// Password for encrypted entries
        #[arg(short, long, env = "KOVCHEG_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Create an archive from files and directories
    Create {
        /// Archive to create
        archive: PathBuf,

        /// Files and directories to add
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        options: WriteOptions,
    },

    /// Add files to an existing archive
    Append {
        /// Archive to extend
        archive: PathBuf,

        /// Files and directories to add
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        options: WriteOptions,
    },

    /// Verify checksums and authentication codes of every entry
    Test {
        /// Path to the archive
        archive: PathBuf,

        /// Password for encrypted entries
        #[arg(short, long, env = "KOVCHEG_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

#[derive(clap::Args)]
struct WriteOptions {
    /// Compression method
    #[arg(short, long, value_enum, default_value_t = MethodArg::Deflate)]
    method: MethodArg,

    /// Compression level (0-9)
    #[arg(short, long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    level: u32,

    /// Encrypt entries with WinZip AES using this password
    #[arg(short, long, env = "KOVCHEG_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// AES key size in bits
    #[arg(long, default_value_t = 256, value_parser = clap::value_parser!(u16).range(128..=256))]
    key_strength: u16,

    /// Write ZIP64 records even when they are not needed
    #[arg(long, env = "KOVCHEG_FORCE_ZIP64")]
    force_zip64: bool,

    /// Archive comment
    #[arg(short, long)]
    comment: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    Stored,
    Deflate,
    Bzip2,
}

impl From<MethodArg> for CompressionMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Stored => CompressionMethod::Stored,
            MethodArg::Deflate => CompressionMethod::Deflated,
            MethodArg::Bzip2 => CompressionMethod::Bzip2,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::List { archive, filter, detailed } => {
            cmd_list(&archive, filter.as_deref(), detailed)?;
        }
        Commands::Extract { archive, output, filter, password } => {
            cmd_extract(&archive, &output, filter.as_deref(), password)?;
        }
        Commands::Create { archive, inputs, options } => {
            cmd_create(&archive, &inputs, &options)?;
        }
        Commands::Append { archive, inputs, options } => {
            cmd_append(&archive, &inputs, &options)?;
        }
        Commands::Test { archive, password } => {
            cmd_test(&archive, password)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env("KOVCHEG_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn reader_config(password: Option<String>) -> ReaderConfig {
    let config = ReaderConfig::default();
    match password {
        Some(password) => config.with_key_provider(StaticKeyProvider::new(password)),
        None => config,
    }
}

fn open_archive(path: &Path, password: Option<String>) -> Result<ZipReader<memmap2::Mmap>> {
    ZipReader::map_path(path, reader_config(password))
        .with_context(|| format!("Failed to open archive {}", path.display()))
}

fn compile_filter(filter: Option<&str>) -> Result<Option<glob::Pattern>> {
    filter
        .map(|pattern| glob::Pattern::new(pattern).context("Invalid filter pattern"))
        .transpose()
}

fn cmd_list(path: &Path, filter: Option<&str>, detailed: bool) -> Result<()> {
    let archive = open_archive(path, None)?;
    let filter = compile_filter(filter)?;

    let mut count = 0;
    for entry in archive.entries() {
        if let Some(pattern) = &filter {
            if !pattern.matches(entry.name()) {
                continue;
            }
        }

        if detailed {
            println!(
                "{:>12} {:>12} {:<7} {:08x} {} {} {}",
                entry.compressed_size().unwrap_or(0),
                entry.size().unwrap_or(0),
                method_name(entry),
                entry.crc().unwrap_or(0),
                entry.dos_time().map(format_dos_time).unwrap_or_default(),
                if entry.is_encrypted() { "E" } else { " " },
                entry.name()
            );
        } else {
            println!("{}", entry.name());
        }
        count += 1;
    }

    println!("\nTotal: {} entries", count);
    if !archive.comment().is_empty() {
        println!("Comment: {}", archive.comment());
    }
    if archive.preamble_len() > 0 {
        println!("Leading data: {} bytes", archive.preamble_len());
    }

    Ok(())
}

fn cmd_extract(path: &Path, output: &Path, filter: Option<&str>, password: Option<String>) -> Result<()> {
    println!("Opening archive: {}", path.display());

    let start = Instant::now();
    let archive = open_archive(path, password)?;
    let filter = compile_filter(filter)?;

    println!("Loaded {} entries in {:?}", archive.len(), start.elapsed());

    let names: Vec<String> = archive
        .entries()
        .filter(|e| filter.as_ref().map_or(true, |p| p.matches(e.name())))
        .map(|e| e.name().to_owned())
        .collect();

    println!("Extracting {} entries...", names.len());

    let pb = progress_bar(names.len() as u64)?;
    fs::create_dir_all(output)?;

    let start = Instant::now();
    for name in &names {
        let relative = safe_path(name)
            .with_context(|| format!("Refusing to extract {name} outside the output directory"))?;
        let output_path = output.join(relative);

        if name.ends_with('/') {
            fs::create_dir_all(&output_path)?;
        } else {
            if let Some(parent) = output_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut stream = archive
                .open(name, true, true)
                .with_context(|| format!("Failed to open {name}"))?;
            let mut file = BufWriter::new(File::create(&output_path)?);
            io::copy(&mut stream, &mut file).with_context(|| format!("Failed to extract {name}"))?;
            stream.finish().with_context(|| format!("Failed to verify {name}"))?;
            file.flush()?;
        }

        pb.inc(1);
    }

    pb.finish_with_message("Done");
    println!("Extraction completed in {:?}", start.elapsed());

    Ok(())
}

fn cmd_create(path: &Path, inputs: &[PathBuf], options: &WriteOptions) -> Result<()> {
    println!("Creating archive: {}", path.display());

    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let writer = ZipWriter::new(BufWriter::new(file), writer_config(options, None)?);
    add_and_finish(writer, inputs, options)
}

fn cmd_append(path: &Path, inputs: &[PathBuf], options: &WriteOptions) -> Result<()> {
    println!("Appending to archive: {}", path.display());

    let directory = {
        let archive = open_archive(path, None)?;
        archive.directory().clone()
    };

    // Drop the old central directory; the writer rewrites it after the new entries.
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for writing", path.display()))?;
    file.set_len(directory.start())?;
    file.seek(SeekFrom::Start(directory.start()))?;

    let config = writer_config(options, Some(&directory))?;
    let writer = ZipWriter::append(BufWriter::new(file), &directory, config);
    add_and_finish(writer, inputs, options)
}

fn cmd_test(path: &Path, password: Option<String>) -> Result<()> {
    let archive = open_archive(path, password)?;
    let pb = progress_bar(archive.len() as u64)?;

    let start = Instant::now();
    let mut failures = 0;
    for entry in archive.entries() {
        let result = archive.open(entry.name(), true, true).and_then(|mut stream| {
            io::copy(&mut stream, &mut io::sink())?;
            stream.finish()
        });
        if let Err(e) = result {
            pb.suspend(|| eprintln!("FAILED {}: {}", entry.name(), e));
            failures += 1;
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!(
        "Tested {} entries in {:?} ({} failed)",
        archive.len(),
        start.elapsed(),
        failures
    );
    if failures > 0 {
        anyhow::bail!("{} entries failed verification", failures);
    }

    Ok(())
}

fn writer_config(options: &WriteOptions, existing: Option<&CentralDirectory>) -> Result<WriterConfig> {
    let mut config = WriterConfig::default()
        .with_method(options.method.into())
        .with_level(options.level)
        .with_force_zip64(options.force_zip64 || existing.is_some_and(CentralDirectory::is_zip64));
    if let Some(comment) = &options.comment {
        config = config.with_comment(comment.clone());
    }
    if let Some(password) = &options.password {
        let strength = match options.key_strength {
            128 => KeyStrength::Aes128,
            192 => KeyStrength::Aes192,
            256 => KeyStrength::Aes256,
            other => anyhow::bail!("Unsupported AES key size: {}", other),
        };
        config = config.with_key_provider(StaticKeyProvider::with_strength(password.clone(), strength));
    }
    Ok(config)
}

fn add_and_finish<W: Write>(mut writer: ZipWriter<W>, inputs: &[PathBuf], options: &WriteOptions) -> Result<()> {
    let files = collect_inputs(inputs)?;
    let pb = progress_bar(files.len() as u64)?;

    let start = Instant::now();
    for (source, name) in &files {
        add_path(&mut writer, source, name, options.password.is_some())
            .with_context(|| format!("Failed to add {}", source.display()))?;
        pb.inc(1);
    }
    pb.finish_with_message("Done");

    let entries = writer.len();
    let mut sink = writer.into_inner().context("Failed to write central directory")?;
    sink.flush()?;

    println!("Wrote {} entries in {:?}", entries, start.elapsed());

    Ok(())
}

fn add_path<W: Write>(writer: &mut ZipWriter<W>, source: &Path, name: &str, encrypt: bool) -> Result<()> {
    let metadata = fs::metadata(source)?;
    let mut entry = ZipEntry::new(name);
    if let Ok(modified) = metadata.modified() {
        if let Ok(since) = modified.duration_since(UNIX_EPOCH) {
            entry.set_time(since.as_millis() as i64);
        }
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        entry.set_unix_mode(metadata.permissions().mode());
    }

    if metadata.is_dir() {
        entry.set_compression(CompressionMethod::Stored);
        entry.set_size(0);
        entry.set_crc(0);
        writer.put_next_entry(entry, true)?;
    } else {
        entry.set_encrypted(encrypt);
        writer.put_next_entry(entry, true)?;
        io::copy(&mut File::open(source)?, writer)?;
    }
    writer.close_entry()?;
    Ok(())
}

/// Expand inputs into (path, entry name) pairs.
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    for input in inputs {
        let base = input.parent().unwrap_or_else(|| Path::new(""));
        for item in WalkDir::new(input).sort_by_file_name() {
            let item = item?;
            let relative = item.path().strip_prefix(base).unwrap_or(item.path());
            let mut name = relative
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/");
            if name.is_empty() {
                continue;
            }
            if item.file_type().is_dir() {
                name.push('/');
            }
            files.push((item.into_path(), name));
        }
    }
    Ok(files)
}

/// Entry name as a relative path that stays inside the output directory.
fn safe_path(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

fn method_name(entry: &ZipEntry) -> &'static str {
    match entry.compression() {
        Some(CompressionMethod::Stored) => "stored",
        Some(CompressionMethod::Deflated) => "deflate",
        Some(CompressionMethod::Bzip2) => "bzip2",
        None => "other",
    }
}

fn format_dos_time(datetime: u32) -> String {
    match dostime::dos_to_millis(datetime) {
        Some(_) => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}",
            (datetime >> 25) + 1980,
            (datetime >> 21) & 0x0f,
            (datetime >> 16) & 0x1f,
            (datetime >> 11) & 0x1f,
            (datetime >> 5) & 0x3f
        ),
        None => "????-??-?? ??:??".to_owned(),
    }
}

//! Entry point for the elfin tool.
//!
//! Simple flow per subcommand: map the input → parse into chunks → inspect
//! or instrument → store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use elfin::allocator::{NewSection, SectionAllocator};
use elfin::ElfFile;

/// Structural instrumentation of ELF64 little-endian binaries.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the chunk layout of a binary.
    Layout { file: PathBuf },

    /// Parse and re-serialize, verifying byte-for-byte identity.
    Roundtrip { file: PathBuf },

    /// Inject a new PROGBITS section backed by a new LOAD segment.
    Inject {
        file: PathBuf,

        /// Where to write the instrumented binary.
        #[arg(short, long)]
        output: PathBuf,

        /// Section name.
        #[arg(long, default_value = ".injected")]
        name: String,

        /// Virtual address of the new LOAD segment.
        #[arg(long, value_parser = parse_number)]
        address: u64,

        /// Section size; contents are zero-padded up to it.
        #[arg(long, value_parser = parse_number)]
        size: u64,

        #[arg(long, value_parser = parse_number, default_value = "0x1000")]
        alignment: u64,

        #[arg(long)]
        writable: bool,

        #[arg(long)]
        executable: bool,

        /// File holding the section contents.
        #[arg(long)]
        contents: Option<PathBuf>,
    },
}

fn parse_number(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).map_err(|e| e.to_string()),
        None => s.parse().map_err(|e: std::num::ParseIntError| e.to_string()),
    }
}

fn map_input(path: &Path) -> Result<Mmap> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("failed to map {}", path.display()))?;
    Ok(mmap)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Layout { file } => {
            let mmap = map_input(&file)?;
            let elf = ElfFile::parse(&mmap)?;
            println!("{:>10}  {:>10}  kind", "offset", "size");
            let mut offset = 0u64;
            for chunk in elf.chunks() {
                println!(
                    "{offset:#10x}  {:#10x}  {}",
                    chunk.byte_length(),
                    chunk.kind_name()
                );
                offset += chunk.byte_length() as u64;
            }
        }

        Command::Roundtrip { file } => {
            let mmap = map_input(&file)?;
            let elf = ElfFile::parse(&mmap)?;
            let out = elf.serialize();
            if out.as_slice() != &mmap[..] {
                anyhow::bail!(
                    "round-trip mismatch for {}: {} bytes in, {} bytes out",
                    file.display(),
                    mmap.len(),
                    out.len()
                );
            }
            println!("ok: {} bytes round-trip byte-for-byte", out.len());
        }

        Command::Inject {
            file,
            output,
            name,
            address,
            size,
            alignment,
            writable,
            executable,
            contents,
        } => {
            let mmap = map_input(&file)?;
            let mut elf = ElfFile::parse(&mmap)?;
            let contents = match contents {
                Some(path) => std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => Vec::new(),
            };
            let index = SectionAllocator::new(&mut elf).allocate_prog_bits_section(
                &NewSection {
                    name: &name,
                    address,
                    size,
                    alignment,
                    writable,
                    executable,
                    contents: &contents,
                },
            )?;
            elf.store(&output)?;
            info!(section = index, output = %output.display(), "injection complete");
            println!("injected {name} as section {index} into {}", output.display());
        }
    }

    Ok(())
}

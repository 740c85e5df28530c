use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use diskmap::builder::DEFAULT_BLOCK_SIZE;
use diskmap::{Builder, ReadOptions, Reader, WriteOptions};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(about = "Build and query read only sorted maps")]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a map from a file with one `key<TAB>value` pair per line.
    Build {
        #[clap(short, long)]
        input: PathBuf,

        #[clap(short, long)]
        output: PathBuf,

        #[clap(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: u32,

        #[clap(long)]
        no_compression: bool,
    },

    /// Print values of the given keys.
    Get {
        #[clap(short, long)]
        map: PathBuf,

        #[clap(long)]
        preload_offsets: bool,

        #[clap(long)]
        preload_values: bool,

        keys: Vec<String>,
    },

    /// Print every entry in key order.
    Dump {
        #[clap(short, long)]
        map: PathBuf,
    },

    /// Print header fields of a map.
    Info {
        #[clap(short, long)]
        map: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    match Args::parse().command {
        Command::Build {
            input,
            output,
            block_size,
            no_compression,
        } => build(input, output, block_size, !no_compression),
        Command::Get {
            map,
            preload_offsets,
            preload_values,
            keys,
        } => {
            let mut options = ReadOptions::default();
            if preload_offsets {
                options = options.preload_offsets();
            }
            if preload_values {
                options = options.preload_values();
            }
            get(map, options, keys)
        }
        Command::Dump { map } => dump(map),
        Command::Info { map } => show_info(map),
    }
}

fn build(input: PathBuf, output: PathBuf, block_size: u32, compression: bool) -> Result<()> {
    let source =
        File::open(&input).with_context(|| format!("failed to open {}", input.display()))?;
    let mut builder = Builder::with_options(
        &output,
        WriteOptions {
            block_size,
            compression,
        },
    )
    .with_context(|| format!("failed to create {}", output.display()))?;

    for (n, line) in BufReader::new(source).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", input.display()))?;
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('\t') else {
            bail!("line {} has no tab separated value", n + 1);
        };
        builder.add(key.as_bytes(), value.as_bytes())?;
    }

    let count = builder.len();
    builder
        .build()
        .with_context(|| format!("failed to build {}", output.display()))?;
    info!("wrote {} entries to {}", count, output.display());

    Ok(())
}

fn open(map: &Path, options: ReadOptions) -> Result<Reader> {
    Reader::open(map, options).with_context(|| format!("failed to open {}", map.display()))
}

fn get(map: PathBuf, options: ReadOptions, keys: Vec<String>) -> Result<()> {
    let reader = open(&map, options)?;
    let mut out = io::stdout().lock();

    for key in keys {
        match reader.get(key.as_bytes())? {
            Some(value) => writeln!(out, "{}\t{}", key, String::from_utf8_lossy(&value))?,
            None => writeln!(out, "{}\t(not found)", key)?,
        }
    }

    reader.close();
    Ok(())
}

fn dump(map: PathBuf) -> Result<()> {
    let reader = open(&map, ReadOptions::default())?;
    let mut out = BufWriter::new(io::stdout().lock());

    for entry in &reader {
        let (key, value) = entry?;
        writeln!(
            out,
            "{}\t{}",
            String::from_utf8_lossy(&key),
            String::from_utf8_lossy(&value)
        )?;
    }
    out.flush()?;

    Ok(())
}

fn show_info(map: PathBuf) -> Result<()> {
    let reader = open(&map, ReadOptions::default())?;

    println!("entries:     {}", reader.size());
    println!("blocks:      {}", reader.block_count());
    println!("block size:  {}", reader.block_size());
    println!(
        "compression: {}",
        if reader.is_compressed() { "snappy" } else { "none" }
    );

    Ok(())
}

//! Command-line front end: reads an obfuscated PHP file, decodes it and
//! writes the result.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use log::{debug, info, warn};
use serde_json::json;

use deobfuscator_rs::{DEFAULT_MAX_PASSES, Decoder, DecoderConfig, Environment, Statistics};

/// Same ceiling the upload form enforced.
const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Reverse simple PHP source obfuscation
#[derive(Parser)]
#[command(name = "deobfuscator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Obfuscated source file
    input: PathBuf,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON file with global arrays, e.g. {"globals": {"_x": ["a", 1]}}
    #[arg(short, long)]
    environment: Option<PathBuf>,

    /// Maximum number of decoding passes
    #[arg(long, default_value_t = DEFAULT_MAX_PASSES)]
    max_passes: usize,

    /// Reject inputs larger than this many bytes
    #[arg(long, default_value_t = DEFAULT_MAX_SIZE)]
    max_size: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_secs()
        .init();

    let config = DecoderConfig::new(cli.max_passes)?;
    let environment = match &cli.environment {
        Some(path) => load_environment(path)?,
        None => Environment::default(),
    };
    let source = read_source(&cli.input, cli.max_size)?;

    info!("Decoding {} ({} bytes)", cli.input.display(), source.len());
    let mut decoder = Decoder::with_config(source, &environment, config);
    let decoded = decoder.decode();
    info!(
        "Finished after {} passes in {} ms",
        decoder.statistics().passes,
        decoder.statistics().processing_time_ms
    );

    match cli.format {
        OutputFormat::Text => {
            write_output(&decoded, cli.output.as_deref())?;
            print_statistics(decoder.statistics());
            eprint!("{}", decoder.trace());
        }
        OutputFormat::Json => {
            let report = json!({
                "decoded": decoded,
                "statistics": decoder.statistics(),
                "arrays": decoder.arrays(),
                "functions": decoder.functions(),
                "variables": decoder.variables(),
                "trace": decoder.trace(),
            });
            let rendered = serde_json::to_string_pretty(&report)?;
            write_output(&rendered, cli.output.as_deref())?;
        }
    }

    Ok(())
}

fn load_environment(path: &Path) -> Result<Environment> {
    debug!("Loading environment from {:?}", path);
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read environment {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse environment {}", path.display()))
}

/// Reads the input, replacing byte sequences that are not UTF-8.
fn read_source(path: &Path, max_size: u64) -> Result<String> {
    let metadata =
        fs::metadata(path).with_context(|| format!("Failed to stat {}", path.display()))?;
    if metadata.len() > max_size {
        bail!(
            "{} is {} bytes, larger than the {} byte limit",
            path.display(),
            metadata.len(),
            max_size
        );
    }

    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(match String::from_utf8(bytes) {
        Ok(source) => source,
        Err(err) => {
            warn!("{} is not valid UTF-8, decoding lossily", path.display());
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    })
}

fn write_output(content: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(content.as_bytes())?;
            if !content.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}

fn print_statistics(stats: &Statistics) {
    eprintln!("Original size:     {} bytes", stats.original_size);
    eprintln!("Final size:        {} bytes", stats.final_size);
    eprintln!("Compression ratio: {}%", stats.compression_ratio);
    eprintln!("Arrays found:      {}", stats.arrays_found);
    eprintln!("Functions found:   {}", stats.functions_found);
    eprintln!("Variables found:   {}", stats.variables_found);
    eprintln!("Base64 decoded:    {}", stats.base64_decoded);
    eprintln!("Hex decoded:       {}", stats.hex_decoded);
    eprintln!("Chr decoded:       {}", stats.chr_decoded);
    eprintln!("Rot13 decoded:     {}", stats.rot13_decoded);
    eprintln!("Math expressions:  {}", stats.math_expressions);
    eprintln!("Passes:            {}", stats.passes);
    eprintln!("Processing time:   {} ms", stats.processing_time_ms);
}

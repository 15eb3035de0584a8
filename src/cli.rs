use crate::config::EngineConfig;
use crate::engine::{address, Engine};
use crate::error::{BdfError, Result};
use crate::header::symbols::{is_reserved, split_key};
use crate::header::{KEY_BYTE_ORDER, KEY_COMPRESSION, KEY_DATA_TYPE, KEY_RASTER, KEY_SIZE, KEY_VALUE_OFFSET};
use crate::history::{history_number, History};
use crate::types::{ByteOrder, Compression, DataType, OpenMode};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(author, version, about, long_about = "Block data format reader and writer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the chains and blocks of a file
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Prints block headers
    Dump {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Chain number (0 general, 1 primary, -1 error)
        #[arg(short, long, allow_hyphen_values = true)]
        chain: Option<i64>,

        /// Block number
        #[arg(short, long)]
        block: Option<i64>,
    },
    /// Copies every block into a new file
    Convert {
        /// Input file
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Output file; a .gz suffix compresses the whole file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Output data type [UnsignedShort, FloatValue, ...]
        #[arg(short, long)]
        datatype: Option<DataType>,

        /// Payload compression [None, GzipCompression, ZCompression]
        #[arg(long)]
        compression: Option<Compression>,

        /// Payload byte order [LowByteFirst, HighByteFirst]
        #[arg(long)]
        byte_order: Option<ByteOrder>,
    },
}

/// Keys the writer derives from the payload.
fn is_layout_key(key: &str) -> bool {
    let base = split_key(key).0;
    is_reserved(base)
        || base.starts_with("Dim_")
        || [KEY_DATA_TYPE, KEY_BYTE_ORDER, KEY_RASTER, KEY_COMPRESSION, KEY_VALUE_OFFSET, KEY_SIZE].contains(&base)
}

fn info(engine: &mut Engine, file: &Path) -> Result<()> {
    let stream = engine.open(file, OpenMode::Read)?;
    let bdf = engine.file_mut(stream)?;
    println!("{} ({})", file.display(), bdf.format());
    if let Some(version) = bdf.version() {
        println!("  format version {}, block boundary {}", version, bdf.block_boundary());
    }
    for chain in bdf.chain_keys() {
        let blocks = bdf.block_keys(&chain)?;
        match bdf.minmax_number(&chain) {
            Some((min, max)) => println!("  {}: {} blocks, numbers {}..{}", chain, blocks.len(), min, max),
            None => println!("  {}: {} blocks", chain, blocks.len()),
        }
        for block in blocks {
            match bdf.description(&chain, &block) {
                Ok(d) => println!(
                    "    {:>6}  {:<12} {:<14} {:<13} {}",
                    block,
                    d.dims.to_string(),
                    d.data_type.as_str(),
                    d.byte_order.as_str(),
                    d.compression.as_str()
                ),
                Err(e) if matches!(e, BdfError::MissingArrayDimensions(_)) => println!("    {:>6}  (header only)", block),
                Err(e) => println!("    {:>6}  {}", block, e),
            }
        }
    }
    engine.close(stream)
}

fn dump(engine: &mut Engine, file: &Path, chain: Option<i64>, block: Option<i64>) -> Result<()> {
    let stream = engine.open(file, OpenMode::Read)?;
    let mut out = std::io::stdout().lock();
    match (chain, block) {
        (None, None) => engine.dump(stream, &mut out)?,
        (chain, block) => {
            let chain = chain.unwrap_or(1);
            let numbers: Vec<i64> = match block {
                Some(n) => vec![n],
                None => engine
                    .block_keys(stream, chain)?
                    .iter()
                    .filter_map(|b| b.parse().ok())
                    .collect(),
            };
            for number in numbers {
                let (chain_name, block_name) = address(number, chain);
                writeln!(out, "{}.{}", block_name, chain_name)?;
                for (k, v) in engine.header_entries(stream, number, chain)? {
                    writeln!(out, "  {} = {}", k, v)?;
                }
            }
        }
    }
    engine.close(stream)
}

fn convert(
    input: &Path,
    output: &Path,
    datatype: Option<DataType>,
    compression: Option<Compression>,
    byte_order: Option<ByteOrder>,
) -> Result<()> {
    let config = EngineConfig { default_output_type: datatype, ..EngineConfig::default() };
    let mut engine = Engine::new(config);
    let source = engine.open(input, OpenMode::Read)?;
    let target = engine.open(output, OpenMode::New)?;

    let mut history = History::new();
    for arg in std::env::args() {
        history.argv(&arg);
    }

    let mut blocks = Vec::new();
    for chain in engine.file(source)?.chain_keys() {
        for block in engine.file(source)?.block_keys(&chain)? {
            blocks.push((chain.clone(), block));
        }
    }

    let pb = ProgressBar::new(blocks.len() as u64);
    pb.set_style(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] Blocks {pos}/{len} ({eta})")
        .map_err(|e| BdfError::ConfigError(e.to_string()))?
        .progress_chars("#>-")
    );

    let start = Instant::now();
    for (chain, block) in &blocks {
        let entries = engine.file_mut(source)?.header_entries(chain, block)?;
        let payload = match engine.file_mut(source)?.description(chain, block) {
            Ok(description) => {
                let data = engine.file_mut(source)?.read_data(chain, block, None)?;
                Some((description, data))
            }
            Err(BdfError::MissingArrayDimensions(_)) => None,
            Err(e) => return Err(e),
        };

        let out = engine.file_mut(target)?;
        for (key, value) in entries.iter().filter(|(k, _)| !is_layout_key(k) && history_number(k).is_none()) {
            out.write_symbol(chain, block, key, value)?;
        }
        history.read_entries(entries.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        for (key, value) in history.entries(std::iter::empty()) {
            out.write_symbol(chain, block, &key, &value)?;
        }
        if let Some((description, data)) = payload {
            let order = byte_order.unwrap_or(description.byte_order);
            out.write_symbol(chain, block, KEY_BYTE_ORDER, order.as_str())?;
            let compression = compression.unwrap_or(description.compression);
            out.write_symbol(chain, block, KEY_COMPRESSION, compression.as_str())?;
            out.write_data(chain, block, &description.dims, &data)?;
        }
        pb.inc(1);
    }
    pb.finish_with_message("Conversion finished");

    engine.close(source)?;
    engine.close(target)?;
    println!("Converted {} blocks from {} to {}", blocks.len(), input.display(), output.display());
    println!("  Elapsed Time: {:.2?}", start.elapsed());
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut engine = Engine::default();

    match &cli.command {
        Commands::Info { file } => info(&mut engine, file)?,
        Commands::Dump { file, chain, block } => dump(&mut engine, file, *chain, *block)?,
        Commands::Convert { input, output, datatype, compression, byte_order } => {
            convert(input, output, *datatype, *compression, *byte_order)?
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_keys() {
        assert!(is_layout_key("EDF_BinarySize"));
        assert!(is_layout_key("Dim_3"));
        assert!(is_layout_key("DataType"));
        assert!(!is_layout_key("Title"));
        assert!(!is_layout_key("History-1"));
    }

    #[test]
    fn test_parse_convert_args() {
        let cli = Cli::try_parse_from([
            "bdfio", "convert", "-i", "a.edf", "-o", "b.edf.gz", "--datatype", "UnsignedShort", "--byte-order",
            "HighByteFirst",
        ])
        .unwrap();
        match cli.command {
            Commands::Convert { datatype, byte_order, compression, .. } => {
                assert_eq!(datatype, Some(DataType::U16));
                assert_eq!(byte_order, Some(ByteOrder::HighByteFirst));
                assert_eq!(compression, None);
            }
            _ => panic!("expected convert"),
        }
    }

    #[test]
    fn test_parse_negative_chain() {
        let cli = Cli::try_parse_from(["bdfio", "dump", "f.edf", "--chain", "-1", "--block", "2"]).unwrap();
        assert!(matches!(cli.command, Commands::Dump { chain: Some(-1), block: Some(2), .. }));
    }
}

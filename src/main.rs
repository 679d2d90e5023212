//! Command-line driver for the zipstore storage engine.
//!
//! Six subcommands cover the legacy length-indicated mode and the blocked
//! sequence set, plus an `interactive` mode that hand-parses its trailing
//! arguments the way the original ZIP-search utility did, rather than
//! through `clap`'s usual flag machinery, since its flags (`-LD`, `-PD`)
//! aren't expressible as single-character short options.

mod cli_error;
mod legacy;

use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use clap::{Parser, Subcommand};
use snafu::ResultExt;

use cli_error::{CliError, CliResult, IoSnafu};
use zipstore_buffers::{
    BlockIndex, BlockResolver, Error as EngineError, ExtremesReducer, SequenceSet,
    SequenceSetHeader, TreeHeader, ZipRecord,
};

#[derive(Parser)]
#[command(name = "zipstore", about = "An on-disk ordered key-value store for US ZIP-code records")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a legacy length-indicated file plus its primary-key index from a CSV.
    Convert { csv: PathBuf, zcd: PathBuf },
    /// Build a blocked sequence set plus its flat block index from a CSV.
    ConvertBlocked {
        csv: PathBuf,
        zcb: PathBuf,
        block_size: Option<u32>,
        min_block_size: Option<u16>,
    },
    /// Print up to `count` records from a legacy length-indicated file.
    Read { zcd: PathBuf, count: Option<usize> },
    /// Print the header fields of a sequence-set, tree, or legacy file.
    Header { file: PathBuf },
    /// Compare the extremes signature of a CSV against a legacy file built from it.
    Verify { csv: PathBuf, zcd: PathBuf },
    /// Search a legacy file for one or more zips via its companion index.
    #[command(name = "zcd-search")]
    ZcdSearch {
        zcd: PathBuf,
        idx: PathBuf,
        zips: Vec<u32>,
    },
    /// Single-dash flag interface over a blocked sequence set:
    /// `-F <file> -S <zip> -A <zip> <city> <state> <county> <lat> <lon> -R <zip> -LD <out> -PD <out>`.
    Interactive {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => {}
        Err(CliError::VerifyMismatch) => {
            println!("DIFFER");
            std::process::exit(2);
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

fn run(command: Commands) -> CliResult<()> {
    match command {
        Commands::Convert { csv, zcd } => convert(&csv, &zcd),
        Commands::ConvertBlocked {
            csv,
            zcb,
            block_size,
            min_block_size,
        } => convert_blocked(&csv, &zcb, block_size.unwrap_or(1024), min_block_size.unwrap_or(256)),
        Commands::Read { zcd, count } => read(&zcd, count),
        Commands::Header { file } => header(&file),
        Commands::Verify { csv, zcd } => verify(&csv, &zcd),
        Commands::ZcdSearch { zcd, idx, zips } => zcd_search(&zcd, &idx, &zips),
        Commands::Interactive { args } => interactive(&args),
    }
}

struct TailResolver;
impl BlockResolver for TailResolver {
    fn resolve(&mut self, _key: u32) -> Result<Option<u32>, EngineError> {
        Ok(None)
    }
}

fn convert(csv: &Path, zcd: &Path) -> CliResult<()> {
    let records = legacy::read_csv_sorted(csv)?;
    let count = legacy::write_legacy(zcd, &records)?;
    println!("converted {count} records to {}", zcd.display());
    Ok(())
}

fn convert_blocked(csv: &Path, zcb: &Path, block_size: u32, min_block_size: u16) -> CliResult<()> {
    let records = legacy::read_csv_sorted(csv)?;
    let idx_path = legacy::companion_index_path(zcb);
    let idx_filename = idx_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("zip.idx")
        .to_string();

    let mut seq = SequenceSet::create(zcb, block_size, min_block_size, idx_filename)?;
    let mut resolver = TailResolver;
    for record in &records {
        seq.insert(record.clone(), &mut resolver)?;
    }

    let index = BlockIndex::build_from_sequence_set(&mut seq)?;
    std::fs::write(&idx_path, index.to_ascii()).context(IoSnafu {
        path: idx_path.clone(),
    })?;
    seq.set_stale(false)?;

    println!(
        "converted {} records into {} blocks",
        records.len(),
        seq.block_count()
    );
    Ok(())
}

fn read(zcd: &Path, count: Option<usize>) -> CliResult<()> {
    let records = legacy::read_legacy(zcd, count)?;
    for record in &records {
        println!("{record}");
    }
    Ok(())
}

fn header(file: &Path) -> CliResult<()> {
    let bytes = read_prefix(file, 65536)?;

    if bytes.len() >= 4 && &bytes[0..4] == b"ZIPC" {
        let h = SequenceSetHeader::from_bytes(&bytes)?;
        println!("kind: sequence-set");
        println!("version: {}", h.version);
        println!("block_size: {}", h.block_size);
        println!("min_block_size: {}", h.min_block_size);
        println!("record_count: {}", h.record_count);
        println!("block_count: {}", h.block_count);
        println!("index_filename: {}", h.index_filename);
        println!("stale: {}", h.stale_flag);
        return Ok(());
    }

    if bytes.len() >= 4 && bytes[0..4] == *b"ZCDL" {
        let mut cursor = &bytes[4..];
        let record_count = cursor.read_u32::<LittleEndian>().unwrap_or(0);
        println!("kind: legacy length-indicated");
        println!("record_count: {record_count}");
        return Ok(());
    }

    match TreeHeader::from_bytes(&bytes) {
        Ok(h) => {
            println!("kind: b+ tree");
            println!("data_filename: {}", h.data_filename);
            println!("height: {}", h.height);
            println!("root_index_rbn: {}", h.root_index_rbn);
            println!("index_block_count: {}", h.index_block_count);
            println!("block_size: {}", h.block_size);
            Ok(())
        }
        Err(_) => Err(CliError::Usage {
            message: format!("{} is not a recognized header format", file.display()),
        }),
    }
}

fn read_prefix(path: &Path, max_bytes: usize) -> CliResult<Vec<u8>> {
    use std::io::Read;
    let mut file = std::fs::File::open(path).context(IoSnafu {
        path: path.to_path_buf(),
    })?;
    let mut bytes = Vec::new();
    file.by_ref()
        .take(max_bytes as u64)
        .read_to_end(&mut bytes)
        .context(IoSnafu {
            path: path.to_path_buf(),
        })?;
    Ok(bytes)
}

fn verify(csv: &Path, zcd: &Path) -> CliResult<()> {
    let csv_records = legacy::read_csv_sorted(csv)?;
    let mut from_csv = ExtremesReducer::new();
    from_csv.fold_all(&csv_records);

    let zcd_records = legacy::read_legacy(zcd, None)?;
    let mut from_zcd = ExtremesReducer::new();
    from_zcd.fold_all(&zcd_records);

    if from_csv.signature() == from_zcd.signature() {
        println!("OK");
        Ok(())
    } else {
        Err(CliError::VerifyMismatch)
    }
}

fn zcd_search(zcd: &Path, idx: &Path, zips: &[u32]) -> CliResult<()> {
    if zips.is_empty() {
        return Err(usage("zcd-search requires at least one zip"));
    }
    for &zip in zips {
        match legacy::search_legacy(zcd, idx, zip)? {
            Some(record) => println!("{record}"),
            None => println!("zip {zip} not found"),
        }
    }
    Ok(())
}

fn usage(message: impl Into<String>) -> CliError {
    CliError::Usage {
        message: message.into(),
    }
}

fn parse_zip(token: Option<&String>) -> CliResult<u32> {
    token
        .ok_or_else(|| usage("expected a zip code argument"))?
        .parse()
        .map_err(|_| usage("zip code must be an integer"))
}

fn parse_f64(token: Option<&String>, what: &str) -> CliResult<f64> {
    token
        .ok_or_else(|| usage(format!("expected a {what} argument")))?
        .parse()
        .map_err(|_| usage(format!("{what} must be a number")))
}

fn loaded<'a>(
    seq: &'a mut Option<SequenceSet>,
    index: &'a mut Option<BlockIndex>,
) -> CliResult<(&'a mut SequenceSet, &'a mut BlockIndex)> {
    let s = seq
        .as_mut()
        .ok_or_else(|| usage("no file loaded; use -F <file> first"))?;
    let idx = index
        .as_mut()
        .ok_or_else(|| usage("no file loaded; use -F <file> first"))?;
    Ok((s, idx))
}

/// Hand-parses the `-F/-S/-A/-R/-LD/-PD` argv convention over a blocked
/// sequence set, one argument at a time, exactly as the original
/// interactive utility did.
fn interactive(args: &[String]) -> CliResult<()> {
    let mut seq: Option<SequenceSet> = None;
    let mut index: Option<BlockIndex> = None;
    let mut file_path: Option<PathBuf> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-F" => {
                i += 1;
                let path = PathBuf::from(
                    args.get(i)
                        .ok_or_else(|| usage("-F requires a file path"))?,
                );
                let mut s = SequenceSet::open(&path)?;
                let idx_path = legacy::companion_index_path(&path);
                let idx = if s.stale() || !idx_path.exists() {
                    let built = BlockIndex::build_from_sequence_set(&mut s)?;
                    std::fs::write(&idx_path, built.to_ascii()).context(IoSnafu {
                        path: idx_path.clone(),
                    })?;
                    s.set_stale(false)?;
                    built
                } else {
                    let text = std::fs::read_to_string(&idx_path).context(IoSnafu {
                        path: idx_path.clone(),
                    })?;
                    BlockIndex::from_ascii(&text)?
                };
                println!("Loaded file: {}", path.display());
                file_path = Some(path);
                seq = Some(s);
                index = Some(idx);
            }
            "-S" => {
                i += 1;
                let zip = parse_zip(args.get(i))?;
                let (s, idx) = loaded(&mut seq, &mut index)?;
                match s.search(zip, idx) {
                    Ok(record) => println!("Found: {record}"),
                    Err(EngineError::NotFound { .. }) => {
                        println!("Zip code {zip} not found in block.")
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            "-A" => {
                let zip = parse_zip(args.get(i + 1))?;
                let city = args
                    .get(i + 2)
                    .ok_or_else(|| usage("-A requires a city"))?;
                let state = args
                    .get(i + 3)
                    .ok_or_else(|| usage("-A requires a state"))?;
                let county = args
                    .get(i + 4)
                    .ok_or_else(|| usage("-A requires a county"))?;
                let latitude = parse_f64(args.get(i + 5), "latitude")?;
                let longitude = parse_f64(args.get(i + 6), "longitude")?;
                i += 6;

                let record = ZipRecord::new(zip, city.as_str(), state.as_str(), county.as_str(), latitude, longitude)?;
                let (s, idx) = loaded(&mut seq, &mut index)?;
                match s.insert(record, idx) {
                    Ok(_) => {
                        idx.rebuild(s)?;
                        s.set_stale(false)?;
                        persist_index(&file_path, idx)?;
                        println!("Added zip code: {zip}");
                    }
                    Err(e) => eprintln!("Failed to add zip code {zip}: {e}"),
                }
            }
            "-R" => {
                i += 1;
                let zip = parse_zip(args.get(i))?;
                let (s, idx) = loaded(&mut seq, &mut index)?;
                match s.remove(zip, idx) {
                    Ok(_) => {
                        idx.rebuild(s)?;
                        s.set_stale(false)?;
                        persist_index(&file_path, idx)?;
                        println!("Removed zip code: {zip}");
                    }
                    Err(e) => eprintln!("Failed to remove zip code {zip}: {e}"),
                }
            }
            "-LD" => {
                i += 1;
                let out_path = args
                    .get(i)
                    .ok_or_else(|| usage("-LD requires an output path"))?;
                let (s, _idx) = loaded(&mut seq, &mut index)?;
                let dump = s.dump_logical()?;
                let mut out = String::new();
                for zip in &dump.active_zips {
                    out.push_str(&format!("{zip}\n"));
                }
                out.push_str("--available--\n");
                for rbn in &dump.available_rbns {
                    out.push_str(&format!("{rbn}\n"));
                }
                std::fs::write(out_path, out).context(IoSnafu {
                    path: PathBuf::from(out_path),
                })?;
                println!("Logical dump written to: {out_path}");
            }
            "-PD" => {
                i += 1;
                let out_path = args
                    .get(i)
                    .ok_or_else(|| usage("-PD requires an output path"))?;
                let (s, _idx) = loaded(&mut seq, &mut index)?;
                let entries = s.dump_physical()?;
                let mut out = String::new();
                for entry in &entries {
                    out.push_str(&format!(
                        "{} prev={} next={} zips={:?}\n",
                        entry.rbn, entry.preceding_rbn, entry.succeeding_rbn, entry.zips
                    ));
                }
                std::fs::write(out_path, out).context(IoSnafu {
                    path: PathBuf::from(out_path),
                })?;
                println!("Physical dump written to: {out_path}");
            }
            other => return Err(usage(format!("unknown argument: {other}"))),
        }
        i += 1;
    }
    Ok(())
}

fn persist_index(file_path: &Option<PathBuf>, index: &BlockIndex) -> CliResult<()> {
    let Some(path) = file_path else {
        return Ok(());
    };
    let idx_path = legacy::companion_index_path(path);
    std::fs::write(&idx_path, index.to_ascii()).context(IoSnafu { path: idx_path })
}

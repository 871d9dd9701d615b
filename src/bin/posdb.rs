use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use kmer_posdb::logging::init_logger;
use kmer_posdb::*;

/// Inspect and query saved k-mer position and existence tables.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// More log output (-v progress, -vv table details)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header of a table file
    Info { path: PathBuf },
    /// Look up one mer
    Lookup {
        path: PathBuf,
        /// Bases of the query mer (ACGT)
        mer: String,
        /// Report positions of mers with exactly this many substitutions
        #[arg(short, long, default_value_t = 0)]
        mismatches: u32,
        /// With --mismatches, include every distance up to the given one
        #[arg(long, default_value_t = false)]
        up_to: bool,
        /// Read the file into memory instead of mapping it
        #[arg(long, default_value_t = false)]
        no_mmap: bool,
    },
    /// Print every stored mer with its count
    Dump { path: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    match args.command {
        Command::Info { path } => info(&path),
        Command::Lookup {
            path,
            mer,
            mismatches,
            up_to,
            no_mmap,
        } => lookup(&path, &mer, mismatches, up_to, no_mmap),
        Command::Dump { path } => dump(&path),
    }
}

fn info(path: &Path) -> anyhow::Result<()> {
    let h = read_header(path).with_context(|| format!("reading {}", path.display()))?;
    println!("kind\t{:?}", h.kind);
    println!("mer_size\t{}", h.mer_size);
    println!("table_bits\t{}", h.table_bits);
    println!(
        "widths\thash={} check={} posn={} pointer={} count={}",
        h.hash_width, h.check_width, h.posn_width, h.pptr_width, h.count_width
    );
    println!("total\t{}", h.total);
    println!("distinct\t{}", h.distinct);
    match h.kind {
        TableKind::Positions => {
            println!("unique\t{}", h.unique);
            println!("list_entries\t{}", h.list_entries);
            println!("max_list_len\t{}", h.max_list_len);
            println!("max_mismatch\t{}", h.max_mismatch);
            println!("counts\t{}", h.stores_counts());
        }
        TableKind::Existence => {
            println!("max_count\t{}", h.max_list_len);
            println!("counts\t{}", h.stores_counts());
            println!("canonical\t{}", h.is_canonical());
        }
    }
    println!("bytes\t{}", h.file_len());
    Ok(())
}

fn encode_query(mer: &str, mer_size: u32) -> anyhow::Result<u64> {
    if mer.len() != mer_size as usize {
        bail!("query has {} bases, table holds {mer_size}-mers", mer.len());
    }
    encode_kmer(mer.as_bytes()).with_context(|| format!("{mer} is not an ACGT mer"))
}

fn lookup(
    path: &Path,
    mer: &str,
    mismatches: u32,
    up_to: bool,
    no_mmap: bool,
) -> anyhow::Result<()> {
    let header = read_header(path).with_context(|| format!("reading {}", path.display()))?;
    let code = encode_query(mer, header.mer_size)?;

    match header.kind {
        TableKind::Existence => {
            if mismatches > 0 {
                bail!("mismatch lookups need a position table");
            }
            let db = if no_mmap {
                ExistDb::load(path)
            } else {
                ExistDb::open_mmap(path)
            }
            .with_context(|| format!("opening {}", path.display()))?;
            println!("{mer}\t{}", db.count(code)?);
        }
        TableKind::Positions => {
            let db = if no_mmap {
                PositionDb::load(path)
            } else {
                PositionDb::open_mmap(path)
            }
            .with_context(|| format!("opening {}", path.display()))?;
            let mut buf = PositionBuffer::new();
            // one query only: a fresh plan may go past the table's stored limit
            let plan = db.mismatch_plan(mismatches)?;
            let n = if up_to {
                db.get_up_to_n_mismatches_with(&plan, code, mismatches, &mut buf)?
            } else {
                db.get_mismatch_with(&plan, code, mismatches, &mut buf)?
            };
            log::info!("{n} positions for {mer} within {mismatches} mismatches");
            if db.has_counts() {
                log::info!("external count of {mer}: {}", db.get_count(code)?);
            }
            let mut posns = buf.to_vec();
            posns.sort_unstable();
            for p in posns {
                println!("{p}");
            }
        }
    }
    Ok(())
}

fn dump(path: &Path) -> anyhow::Result<()> {
    let header = read_header(path).with_context(|| format!("reading {}", path.display()))?;
    let k = header.mer_size as usize;
    let print = |mer: u64, count: u64| println!("{}\t{count}", decode_kmer(mer, k));
    match header.kind {
        TableKind::Positions => PositionDb::open_mmap(path)?.for_each_mer(print)?,
        TableKind::Existence => ExistDb::open_mmap(path)?.for_each_mer(print)?,
    }
    Ok(())
}

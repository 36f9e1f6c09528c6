//! `vdb` command-line front end (spec §6 "CLI / embedding surface").
//!
//! Every subcommand opens the database itself rather than holding a
//! REPL session open across commands — matching the spec's "open/close,
//! add, have_seen, sample, get, merge, size, metadata query" surface as
//! eight independent, scriptable invocations rather than an interactive
//! shell.
//!
//! `add`/`have-seen` read values from a *record file*: each record is a
//! `u32` little-endian length prefix followed by that many bytes of the
//! canonical codec encoding ([`vdb_core::codec::encode`]'s output). This
//! keeps the CLI scriptable without inventing a second, ad hoc text
//! encoding for values on top of the one the database already owns.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result as AnyResult};
use byteorder::{LittleEndian, ReadBytesExt};
use clap::{Parser, Subcommand};
use rand::thread_rng;

use vdb_api::{AddOutcome, Database, OpenMode};
use vdb_core::codec;
use vdb_core::error::Error;
use vdb_search::Query;

#[derive(Parser)]
#[command(name = "vdb", about = "Content-addressed, append-only value database")]
struct Cli {
    /// Database directory.
    #[arg(long, global = true)]
    db: PathBuf,

    /// Suppress informational log output (spec §4.1 `quiet`).
    #[arg(long, global = true)]
    quiet: bool,

    /// Emit results as JSON instead of plain text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Opens (or creates) the database and reports its size.
    Open,
    /// Inserts every record in `file`, printing one outcome line per record.
    Add {
        file: PathBuf,
    },
    /// Reports whether each record in `file` is already present, without inserting.
    HaveSeen {
        file: PathBuf,
    },
    /// Samples `n` ids uniformly at random, optionally restricted to a type tag.
    Sample {
        #[arg(long, default_value_t = 1)]
        n: usize,
        #[arg(long)]
        type_tag: Option<u32>,
    },
    /// Prints the record at `id`'s metadata (and, with `--value`, its decoded form).
    Get {
        id: u64,
        #[arg(long)]
        value: bool,
    },
    /// Merges `source` into the database opened by `--db`.
    Merge {
        source: PathBuf,
        /// Number of ids per worker shard; 0 runs the single-threaded path.
        #[arg(long, default_value_t = 0)]
        parallel_chunk: usize,
    },
    /// Prints the number of values currently stored.
    Size,
    /// Runs the integrity checker, optionally repairing what it finds.
    Check {
        #[arg(long)]
        slow: bool,
        #[arg(long)]
        repair: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if !cli.quiet {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("error: {report:#}");
            ExitCode::from(exit_code_for(&report))
        }
    }
}

/// Maps a failure back to the process exit code, using the error
/// taxonomy number from spec §7 where the failure is one of ours.
fn exit_code_for(report: &anyhow::Error) -> u8 {
    match report.downcast_ref::<Error>() {
        Some(Error::VersionMismatch { .. }) => 1,
        Some(Error::ConfigInconsistency { .. }) => 2,
        Some(Error::UncleanShutdown { .. }) => 3,
        Some(Error::Corruption { .. }) => 4,
        Some(Error::IndexOutOfRange { .. }) => 5,
        Some(Error::Io { .. }) => 6,
        Some(Error::Codec(_)) => 7,
        Some(Error::ForkedProcess { .. }) => 8,
        Some(Error::Index(_)) | None => 9,
    }
}

fn run(cli: Cli) -> AnyResult<()> {
    match cli.command {
        Command::Open => cmd_open(&cli.db, cli.quiet),
        Command::Add { file } => cmd_add(&cli.db, cli.quiet, &file, cli.json),
        Command::HaveSeen { file } => cmd_have_seen(&cli.db, cli.quiet, &file, cli.json),
        Command::Sample { n, type_tag } => cmd_sample(&cli.db, cli.quiet, n, type_tag, cli.json),
        Command::Get { id, value } => cmd_get(&cli.db, cli.quiet, id, value, cli.json),
        Command::Merge { source, parallel_chunk } => cmd_merge(&cli.db, cli.quiet, &source, parallel_chunk, cli.json),
        Command::Size => cmd_size(&cli.db, cli.quiet, cli.json),
        Command::Check { slow, repair } => cmd_check(&cli.db, cli.quiet, slow, repair, cli.json),
    }
}

fn cmd_open(db: &PathBuf, quiet: bool) -> AnyResult<()> {
    let database = Database::open(db, OpenMode::Write, quiet)?;
    println!("opened {} ({} values)", db.display(), database.nb_values());
    database.close()?;
    Ok(())
}

/// Reads the record-file format described in this module's doc comment.
fn read_records(file: &PathBuf) -> AnyResult<Vec<Vec<u8>>> {
    let f = File::open(file).with_context(|| format!("opening record file {}", file.display()))?;
    let mut reader = BufReader::new(f);
    let mut records = Vec::new();
    loop {
        let len = match reader.read_u32::<LittleEndian>() {
            Ok(len) => len,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("reading record length prefix"),
        };
        let mut bytes = vec![0u8; len as usize];
        reader.read_exact(&mut bytes).context("reading record body")?;
        records.push(bytes);
    }
    Ok(records)
}

fn cmd_add(db: &PathBuf, quiet: bool, file: &PathBuf, json: bool) -> AnyResult<()> {
    let records = read_records(file)?;
    let mut database = Database::open(db, OpenMode::Write, quiet)?;
    for bytes in records {
        let value = codec::decode(&bytes)?;
        let outcome = database.add(&value)?;
        match outcome {
            AddOutcome::Stored { hash, id, newly_inserted } => {
                if json {
                    println!(
                        r#"{{"id":{id},"hash":"{hash}","newly_inserted":{newly_inserted}}}"#
                    );
                } else {
                    println!("stored id={id} hash={hash} new={newly_inserted}");
                }
            }
            AddOutcome::NotStored => {
                if json {
                    println!(r#"{{"stored":false}}"#);
                } else {
                    println!("not stored (environment/closure)");
                }
            }
        }
    }
    database.close()?;
    Ok(())
}

fn cmd_have_seen(db: &PathBuf, quiet: bool, file: &PathBuf, json: bool) -> AnyResult<()> {
    let records = read_records(file)?;
    let mut database = Database::open(db, OpenMode::Read, quiet)?;
    for bytes in records {
        let value = codec::decode(&bytes)?;
        match database.have_seen(&value)? {
            Some(id) => {
                if json {
                    println!(r#"{{"seen":true,"id":{id}}}"#);
                } else {
                    println!("seen id={id}");
                }
            }
            None => {
                if json {
                    println!(r#"{{"seen":false}}"#);
                } else {
                    println!("not seen");
                }
            }
        }
    }
    Ok(())
}

fn cmd_sample(db: &PathBuf, quiet: bool, n: usize, type_tag: Option<u32>, json: bool) -> AnyResult<()> {
    let mut database = Database::open(db, OpenMode::Read, quiet)?;
    let mut query = Query::new();
    if let Some(tag) = type_tag {
        query = query.with_type(tag);
    }
    database.update_query(&mut query)?;
    let mut rng = thread_rng();
    let ids = query.sample_n(n, &mut rng);
    if json {
        let rendered: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        println!("[{}]", rendered.join(","));
    } else {
        for id in ids {
            println!("{id}");
        }
    }
    Ok(())
}

fn cmd_get(db: &PathBuf, quiet: bool, id: u64, include_value: bool, json: bool) -> AnyResult<()> {
    let mut database = Database::open(db, OpenMode::Read, quiet)?;
    let (static_meta, runtime_meta) = database.get_metadata(id)?;
    if json {
        let value_field = if include_value {
            let value = database.get_value(id)?;
            let debug_string = serde_json::to_string(&format!("{value:?}")).expect("string always serializes");
            format!(r#","value_debug":{debug_string}"#)
        } else {
            String::new()
        };
        println!(
            r#"{{"id":{id},"type_tag":{},"length":{},"n_calls":{}{value_field}}}"#,
            static_meta.type_tag, static_meta.length, runtime_meta.n_calls
        );
    } else {
        println!(
            "id={id} type_tag={} length={} n_attributes={} n_calls={} n_merges={}",
            static_meta.type_tag, static_meta.length, static_meta.n_attributes, runtime_meta.n_calls, runtime_meta.n_merges
        );
        if include_value {
            println!("{:?}", database.get_value(id)?);
        }
    }
    Ok(())
}

fn cmd_merge(db: &PathBuf, quiet: bool, source: &PathBuf, parallel_chunk: usize, json: bool) -> AnyResult<()> {
    let mut target = Database::open(db, OpenMode::Merge, quiet)?;
    let mut source_db = Database::open(source, OpenMode::Read, quiet)?;
    let n_new = if parallel_chunk > 0 {
        target.parallel_merge_in(&mut source_db, parallel_chunk)?
    } else {
        target.merge_in(&mut source_db)?
    };
    if json {
        println!(r#"{{"n_new":{n_new}}}"#);
    } else {
        println!("merged {n_new} new value(s)");
    }
    target.close()?;
    Ok(())
}

fn cmd_size(db: &PathBuf, quiet: bool, json: bool) -> AnyResult<()> {
    let database = Database::open(db, OpenMode::Read, quiet)?;
    if json {
        println!(r#"{{"nb_values":{}}}"#, database.nb_values());
    } else {
        println!("{}", database.nb_values());
    }
    Ok(())
}

fn cmd_check(db: &PathBuf, quiet: bool, slow: bool, repair: bool, json: bool) -> AnyResult<()> {
    let mut database = Database::open(db, OpenMode::Write, quiet)?;
    let offending = database.check(slow)?;
    if repair && !offending.is_empty() {
        database.repair()?;
    }
    if json {
        let rendered: Vec<String> = offending.iter().map(|id| id.to_string()).collect();
        println!(r#"{{"offending_ids":[{}],"repaired":{}}}"#, rendered.join(","), repair && !offending.is_empty());
    } else if offending.is_empty() {
        println!("ok, no inconsistencies found");
    } else {
        println!("{} offending id(s): {:?}", offending.len(), offending);
        if repair {
            println!("repaired");
        }
    }
    database.close()?;
    Ok(())
}

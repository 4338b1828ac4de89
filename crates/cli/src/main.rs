//! # strata - interactive shell for the Strata storage engine
//!
//! Reads commands from stdin, runs them against an [`Engine`] opened on the
//! data directory, and prints results to stdout. Works interactively or with
//! commands piped in. Logs go to stderr (`RUST_LOG`, default `warn`).
//!
//! ## Commands
//!
//! ```text
//! put <key> <value>       Insert or update a key (value is the rest of the line)
//! get <key>               Print the value or "(not found)"
//! delete|del <key>        Write a tombstone
//! scan [prefix] [limit]   Live keys with the prefix, ascending (limit 10)
//! stats                   Level, file and key counts
//! flush                   Flush the memtable to a new L0 table
//! compact                 Merge every table into one sorted run
//! help                    List commands
//! exit|quit               Close the engine and leave
//! ```
//!
//! ## Configuration
//!
//! Engine settings come from `STRATA_*` environment variables, see
//! [`EngineConfig::from_env`].
//!
//! ## Example
//!
//! ```text
//! $ strata --data /tmp/strata
//! strata started (data=/tmp/strata, seq=0, tables=0)
//! > put name Alice
//! OK
//! > get name
//! Alice
//! > scan
//! name -> Alice
//! (1 entries)
//! > exit
//! bye
//! ```

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use config::EngineConfig;
use engine::Engine;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use commands::Outcome;

#[derive(Parser, Debug)]
#[command(name = "strata", version, about = "Interactive shell for the Strata LSM-tree storage engine")]
struct Cli {
    /// Data directory (holds wal/ and sstables/)
    #[arg(long, default_value = "data")]
    data: PathBuf,

    /// Run a scripted demo session instead of the shell
    #[arg(long)]
    demo: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let config = EngineConfig::from_env();
    let engine = Engine::open(&cli.data, config)
        .with_context(|| format!("failed to open data directory {}", cli.data.display()))?;
    info!(data = %cli.data.display(), seq = engine.seq(), "engine opened");

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if cli.demo {
        commands::run_demo(&engine, &mut out)?;
    } else {
        writeln!(
            out,
            "strata started (data={}, seq={}, tables={})",
            cli.data.display(),
            engine.seq(),
            engine.sstable_count()
        )?;
        writeln!(out, "Type 'help' for commands.")?;
        repl(&engine, io::stdin().lock(), &mut out)?;
    }

    engine.close().context("failed to close engine")?;
    info!("engine closed");
    Ok(())
}

/// Runs commands from `input` until `exit` or end of input.
fn repl<R: BufRead, W: Write>(engine: &Engine, input: R, out: &mut W) -> Result<()> {
    write!(out, "> ")?;
    out.flush()?;

    for line in input.lines() {
        let line = line?;
        if commands::execute(engine, &line, out)? == Outcome::Exit {
            return Ok(());
        }
        write!(out, "> ")?;
        out.flush()?;
    }
    Ok(())
}

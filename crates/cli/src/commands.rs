use engine::{Engine, EngineStats};
use std::io::{self, Write};

/// Limit used by `scan` when none is given.
pub const DEFAULT_SCAN_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Exit,
}

/// Runs one shell line. Engine failures are printed as `ERR ...` and the
/// session continues; only a failed write to `out` is returned.
pub fn execute<W: Write>(engine: &Engine, line: &str, out: &mut W) -> io::Result<Outcome> {
    let mut parts = line.split_whitespace();
    let cmd = match parts.next() {
        Some(cmd) => cmd.to_lowercase(),
        None => return Ok(Outcome::Continue),
    };

    match cmd.as_str() {
        "put" => {
            // the value is the rest of the line as typed, inner spacing kept
            let args = split_word(line).map_or("", |(_, rest)| rest);
            match split_word(args) {
                Some((k, value)) if !value.is_empty() => {
                    match engine.put(k.as_bytes().to_vec(), value.as_bytes().to_vec()) {
                        Ok(()) => writeln!(out, "OK")?,
                        Err(e) => writeln!(out, "ERR put failed: {}", e)?,
                    }
                }
                _ => writeln!(out, "ERR usage: put <key> <value>")?,
            }
        }
        "get" => match (parts.next(), parts.next()) {
            (Some(k), None) => match engine.get(k.as_bytes()) {
                Ok(Some(v)) => writeln!(out, "{}", String::from_utf8_lossy(&v))?,
                Ok(None) => writeln!(out, "(not found)")?,
                Err(e) => writeln!(out, "ERR get failed: {}", e)?,
            },
            _ => writeln!(out, "ERR usage: get <key>")?,
        },
        "delete" | "del" => match (parts.next(), parts.next()) {
            (Some(k), None) => match engine.delete(k.as_bytes().to_vec()) {
                Ok(()) => writeln!(out, "OK")?,
                Err(e) => writeln!(out, "ERR delete failed: {}", e)?,
            },
            _ => writeln!(out, "ERR usage: delete <key>")?,
        },
        "scan" => {
            let prefix = parts.next().unwrap_or("");
            let limit = match parts.next().map(str::parse::<usize>) {
                None => DEFAULT_SCAN_LIMIT,
                Some(Ok(n)) if n > 0 => n,
                Some(_) => {
                    writeln!(out, "ERR usage: scan [prefix] [limit > 0]")?;
                    return Ok(Outcome::Continue);
                }
            };
            match engine.scan(prefix.as_bytes(), limit) {
                Ok(rows) if rows.is_empty() => writeln!(out, "(empty)")?,
                Ok(rows) => {
                    for (k, v) in &rows {
                        writeln!(out, "{} -> {}", String::from_utf8_lossy(k), String::from_utf8_lossy(v))?;
                    }
                    writeln!(out, "({} entries)", rows.len())?;
                }
                Err(e) => writeln!(out, "ERR scan failed: {}", e)?,
            }
        }
        "stats" => match engine.stats() {
            Ok(stats) => print_stats(&stats, out)?,
            Err(e) => writeln!(out, "ERR stats failed: {}", e)?,
        },
        "flush" => match engine.flush() {
            Ok(()) => writeln!(out, "OK ({})", level_summary(engine))?,
            Err(e) => writeln!(out, "ERR flush failed: {}", e)?,
        },
        "compact" => match engine.compact() {
            Ok(()) => writeln!(out, "OK ({})", level_summary(engine))?,
            Err(e) => writeln!(out, "ERR compact failed: {}", e)?,
        },
        "help" | "h" => print_help(out)?,
        "exit" | "quit" | "q" => {
            writeln!(out, "bye")?;
            return Ok(Outcome::Exit);
        }
        other => writeln!(out, "ERR unknown command: {} (try 'help')", other)?,
    }
    Ok(Outcome::Continue)
}

/// `L0=2, L1=1` for the non-empty levels, or `no tables`.
fn level_summary(engine: &Engine) -> String {
    let parts: Vec<String> = engine
        .level_file_counts()
        .iter()
        .enumerate()
        .filter(|(_, n)| **n > 0)
        .map(|(level, n)| format!("L{}={}", level, n))
        .collect();
    if parts.is_empty() {
        "no tables".to_string()
    } else {
        parts.join(", ")
    }
}

pub fn print_stats<W: Write>(stats: &EngineStats, out: &mut W) -> io::Result<()> {
    writeln!(out, "memtable:       {} entries, {}", stats.memtable_entries, format_bytes(stats.memtable_bytes as u64))?;
    writeln!(out, "flushing:       {} memtables", stats.frozen_memtables)?;
    writeln!(out, "sstables:       {} files, {}", stats.sstable_count(), format_bytes(stats.sstable_bytes()))?;
    for (level, l) in stats.levels.iter().enumerate().filter(|(_, l)| l.files > 0) {
        writeln!(out, "  L{}:           {} files, {}, {} entries", level, l.files, format_bytes(l.bytes), l.entries)?;
    }
    writeln!(out, "total keys:     {}", stats.total_keys)?;
    writeln!(out, "tombstones:     {}", stats.tombstones)?;
    writeln!(out, "last seq:       {}", stats.last_seq)?;
    writeln!(out, "wal segments:   {}", stats.wal_segments)?;
    Ok(())
}

/// Splits off the first word: `"k  a  b "` -> `("k", "a  b")`.
fn split_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(i) => Some((&s[..i], s[i..].trim_start())),
        None => Some((s, "")),
    }
}

fn print_help<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "Commands:")?;
    writeln!(out, "  put <key> <value>      store a key-value pair")?;
    writeln!(out, "  get <key>              look up a key")?;
    writeln!(out, "  delete <key>           delete a key (alias: del)")?;
    writeln!(out, "  scan [prefix] [limit]  list live keys with a prefix (default limit {})", DEFAULT_SCAN_LIMIT)?;
    writeln!(out, "  stats                  show engine statistics")?;
    writeln!(out, "  flush                  flush the memtable to an SSTable")?;
    writeln!(out, "  compact                merge all SSTables")?;
    writeln!(out, "  help                   show this message")?;
    writeln!(out, "  exit                   close the engine and quit (alias: quit)")
}

/// Human-readable size with binary units: `512 B`, `1.5 KiB`, `3.0 MiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < 5 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}iB", bytes as f64 / div as f64, ['K', 'M', 'G', 'T', 'P', 'E'][exp])
}

const DEMO_DATA: [(&str, &str); 7] = [
    ("user:1001", "Alice Johnson"),
    ("user:1002", "Bob Smith"),
    ("user:1003", "Carol Davis"),
    ("product:2001", "Laptop Computer"),
    ("product:2002", "Wireless Mouse"),
    ("order:3001", "Order for user:1001"),
    ("order:3002", "Order for user:1002"),
];

/// Scripted session: inserts, reads, deletes, updates, flushes, then prints
/// stats. Engine errors abort the demo.
pub fn run_demo<W: Write>(engine: &Engine, out: &mut W) -> anyhow::Result<()> {
    writeln!(out, "1. Inserting demo data")?;
    for (key, value) in DEMO_DATA {
        engine.put(key.as_bytes().to_vec(), value.as_bytes().to_vec())?;
        writeln!(out, "  put {} = {}", key, value)?;
    }

    writeln!(out, "2. Reading")?;
    for key in ["user:1001", "product:2001", "order:3001", "nonexistent"] {
        match engine.get(key.as_bytes())? {
            Some(v) => writeln!(out, "  get {} = {}", key, String::from_utf8_lossy(&v))?,
            None => writeln!(out, "  get {} = (not found)", key)?,
        }
    }

    writeln!(out, "3. Deleting user:1002")?;
    engine.delete(b"user:1002".to_vec())?;
    anyhow::ensure!(engine.get(b"user:1002")?.is_none(), "user:1002 still visible after delete");
    writeln!(out, "  verified: user:1002 is gone")?;

    writeln!(out, "4. Updating user:1001")?;
    engine.put(b"user:1001".to_vec(), b"Alice Johnson (Updated)".to_vec())?;
    if let Some(v) = engine.get(b"user:1001")? {
        writeln!(out, "  verified: user:1001 = {}", String::from_utf8_lossy(&v))?;
    }

    writeln!(out, "5. Flushing and scanning users")?;
    engine.flush()?;
    for (k, v) in engine.scan(b"user:", DEFAULT_SCAN_LIMIT)? {
        writeln!(out, "  {} -> {}", String::from_utf8_lossy(&k), String::from_utf8_lossy(&v))?;
    }

    writeln!(out, "6. Statistics")?;
    print_stats(&engine.stats()?, out)?;
    writeln!(out, "demo complete")?;
    Ok(())
}

use crate::*;
use anyhow::Result;
use memtable::ValueEntry;
use std::sync::Arc;
use tempfile::tempdir;

fn open_numbered(dir: &std::path::Path, n: u64, interval: usize) -> Result<Arc<SSTableReader>> {
    let path = dir.join("iter.sst");
    let options = SSTableOptions {
        index_interval: interval,
        ..SSTableOptions::default()
    };
    let entries = (0..n).map(|i| {
        let value = if i % 5 == 4 { None } else { Some(i.to_string().into_bytes()) };
        (format!("k{:04}", i).into_bytes(), ValueEntry { seq: i + 1, value })
    });
    SSTableWriter::write_from_iterator(&path, n as usize, entries, options)?;
    Ok(Arc::new(SSTableReader::open(&path)?))
}

fn keys_of(iter: SSTableIterator) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for item in iter {
        let (k, _) = item?;
        out.push(String::from_utf8(k)?);
    }
    Ok(out)
}

#[test]
fn full_iteration_yields_all_entries_in_order() -> Result<()> {
    let dir = tempdir()?;
    let table = open_numbered(dir.path(), 250, 7)?;

    let entries: Vec<(Vec<u8>, ValueEntry)> = table.iter()?.collect::<crate::Result<_>>()?;
    assert_eq!(entries.len(), 250);
    assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
    // tombstones are yielded too
    assert_eq!(entries.iter().filter(|(_, e)| e.is_tombstone()).count(), 50);
    Ok(())
}

#[test]
fn iteration_is_restartable() -> Result<()> {
    let dir = tempdir()?;
    let table = open_numbered(dir.path(), 40, 8)?;
    assert_eq!(keys_of(table.iter()?)?, keys_of(table.iter()?)?);
    Ok(())
}

#[test]
fn iter_from_positions_inside_a_block() -> Result<()> {
    let dir = tempdir()?;
    let table = open_numbered(dir.path(), 100, 10)?;

    let keys = keys_of(table.iter_from(b"k0043")?)?;
    assert_eq!(keys.first().map(String::as_str), Some("k0043"));
    assert_eq!(keys.len(), 57);

    // a start key between stored keys lands on the next one
    let keys = keys_of(table.iter_from(b"k0043x")?)?;
    assert_eq!(keys.first().map(String::as_str), Some("k0044"));
    Ok(())
}

#[test]
fn iter_from_outside_range() -> Result<()> {
    let dir = tempdir()?;
    let table = open_numbered(dir.path(), 20, 4)?;

    assert_eq!(keys_of(table.iter_from(b"a")?)?.len(), 20);
    assert_eq!(keys_of(table.iter_from(b"")?)?.len(), 20);
    assert!(keys_of(table.iter_from(b"z")?)?.is_empty());
    Ok(())
}

#[test]
fn corrupt_record_ends_iteration_with_error() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("bad.sst");
    let entries = (0..10u64).map(|i| {
        (
            format!("k{}", i).into_bytes(),
            ValueEntry {
                seq: i + 1,
                value: Some(b"value".to_vec()),
            },
        )
    });
    SSTableWriter::write_from_iterator(&path, 10, entries, SSTableOptions::default())?;

    // first record: crc(4) key_len(4) "k0"(2) seq(8) present(1) val_len(4) -> value at 23
    let mut bytes = std::fs::read(&path)?;
    bytes[23] ^= 0xFF;
    std::fs::write(&path, bytes)?;

    let table = Arc::new(SSTableReader::open(&path)?);
    let mut iter = table.iter()?;
    assert!(matches!(iter.next(), Some(Err(SSTableError::Corrupt { .. }))));
    assert!(iter.next().is_none());
    Ok(())
}

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Append one JSON object per item to `path`, creating the file if needed.
pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> anyhow::Result<usize> {
    let f = OpenOptions::new().append(true).create(true).open(path)?;
    let mut w = BufWriter::new(f);
    for it in items {
        serde_json::to_writer(&mut w, it)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(items.len())
}

//! JSON-lines input and output

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Open `path` for reading, or stdin when `None` or `-`
pub fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match path {
        Some(path) if path != Path::new("-") => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

/// Create `path` for writing, or stdout when `None` or `-`
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) if path != Path::new("-") => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        _ => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

/// Parse every non-blank line of `reader`
pub fn read_lines<T: DeserializeOwned>(reader: impl BufRead) -> Result<Vec<T>> {
    let mut items = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line)
            .with_context(|| format!("Invalid JSON on line {}", index + 1))?;
        items.push(item);
    }
    Ok(items)
}

/// Write one compact JSON document per line
pub fn write_line<T: Serialize>(writer: &mut dyn Write, item: &T) -> Result<()> {
    serde_json::to_writer(&mut *writer, item).context("Failed to serialize output")?;
    writer.write_all(b"\n")?;
    Ok(())
}

use std::io::{self, Read, Write};
use std::path::Path;
use std::fs;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

pub(super) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// Reads JSON from `path`, or from stdin when the path is `-`.
pub(super) fn read_json_input<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    };
    parse_json_input(&raw, path)
}

pub(super) fn parse_json_input<T: DeserializeOwned>(raw: &str, source: &Path) -> Result<T> {
    serde_json::from_str(raw).with_context(|| format!("invalid JSON in {}", source.display()))
}

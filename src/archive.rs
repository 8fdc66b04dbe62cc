//! News archive sources and file loading.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::error::ConfigError;

/// One logical origin of news documents: an archive file plus a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    /// Unique label; also used to derive the source's table name.
    pub label: String,
    /// Path of the JSON archive.
    pub path: PathBuf,
}

impl Source {
    /// Builds a source.
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }

    /// File name recorded as `sourceFile` in document metadata.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.label.clone())
    }
}

impl FromStr for Source {
    type Err = ConfigError;

    /// Parses `LABEL=PATH`, or a bare `PATH` labelled by its file stem.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let spec = spec.trim();
        let invalid = || ConfigError::InvalidSourceSpec(spec.to_string());
        match spec.split_once('=') {
            Some((label, path)) => {
                let (label, path) = (label.trim(), path.trim());
                if label.is_empty() || path.is_empty() {
                    return Err(invalid());
                }
                Ok(Self::new(label, path))
            }
            None => {
                let path = Path::new(spec);
                let label = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .filter(|stem| !stem.is_empty())
                    .ok_or_else(invalid)?;
                Ok(Self::new(label, path))
            }
        }
    }
}

/// Reads and parses an archive file without interpreting its shape.
pub fn read_archive(path: &Path) -> Result<Value> {
    let file = File::open(path).with_context(|| format!("failed to open archive {path:?}"))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("archive {path:?} is not valid JSON"))
}

/// Writes an archive as pretty JSON, keeping non-ASCII text as is.
pub fn write_archive<T: Serialize>(path: &Path, archive: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {parent:?}"))?;
    }
    let file = File::create(path).with_context(|| format!("failed to create {path:?}"))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, archive)
        .with_context(|| format!("failed to serialize archive to {path:?}"))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

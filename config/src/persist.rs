//! In-place config edits that keep the user's comments and layout.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{ConfigError, config_path};

/// Record `interpreter` as `interpreter.default_path` in the user config.
pub fn persist_default_interpreter(interpreter: &Path) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoHome)?;
    persist_default_interpreter_at(&path, interpreter)
}

/// Creates the file and its parent directory if they don't exist.
pub fn persist_default_interpreter_at(path: &Path, interpreter: &Path) -> Result<(), ConfigError> {
    let write_err = |source: io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let content = if path.exists() {
        fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        String::new()
    };

    let mut doc = content
        .parse::<toml_edit::DocumentMut>()
        .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;

    if !doc.contains_key("interpreter") {
        doc["interpreter"] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    if !doc["interpreter"].is_table_like() {
        return Err(write_err(io::Error::new(
            io::ErrorKind::InvalidData,
            "`interpreter` is not a table",
        )));
    }
    doc["interpreter"]["default_path"] =
        toml_edit::value(interpreter.to_string_lossy().into_owned());

    atomic_write(path, doc.to_string().as_bytes()).map_err(write_err)?;
    tracing::debug!(
        path = %path.display(),
        interpreter = %interpreter.display(),
        "Persisted default interpreter"
    );
    Ok(())
}

fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

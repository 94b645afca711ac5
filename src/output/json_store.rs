//! JSON output store
//!
//! The store is a single pretty-printed JSON array of records with no
//! envelope. It is read once at the start of a run and fully rewritten at the
//! end through a temporary file and a rename, so a crash mid-write leaves the
//! previous file intact.

use crate::extract::{canonical_key, Record};
use crate::output::{OutputError, OutputResult};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct JsonOutputStore {
    path: PathBuf,
}

impl JsonOutputStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the existing records
    ///
    /// A missing or blank file is an empty store. Anything else that is not
    /// a JSON array of records is an error; the file is never overwritten
    /// in that case.
    ///
    /// Keys are brought to canonical form, so a store written before keys
    /// were lowercased still matches what the extractor produces.
    pub fn load(&self) -> OutputResult<Vec<Record>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut records: Vec<Record> =
            serde_json::from_str(&text).map_err(|e| OutputError::InvalidStore {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        for (index, record) in records.iter_mut().enumerate() {
            record.upc = canonical_key(&record.upc).ok_or_else(|| OutputError::InvalidStore {
                path: self.path.clone(),
                reason: format!("record {} has invalid upc {:?}", index, record.upc),
            })?;
        }

        Ok(records)
    }

    /// Fails early if the store cannot be written
    ///
    /// Creates the parent directory and probes it with the same temporary
    /// file that [`JsonOutputStore::write`] uses.
    pub fn ensure_writable(&self) -> OutputResult<()> {
        self.create_parent()?;
        let temp = self.temp_path();
        fs::File::create(&temp).map_err(|e| {
            OutputError::Write(format!("{} is not writable: {}", self.path.display(), e))
        })?;
        fs::remove_file(&temp)?;
        Ok(())
    }

    /// Replaces the store's contents with `records`
    pub fn write(&self, records: &[Record]) -> OutputResult<()> {
        self.create_parent()?;

        let mut json = serde_json::to_vec_pretty(records)?;
        json.push(b'\n');

        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path).map_err(|e| {
            OutputError::Write(format!(
                "failed to move {} into place: {}",
                temp.display(),
                e
            ))
        })?;

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "records.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn create_parent(&self) -> OutputResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

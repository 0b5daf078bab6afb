use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::{check_entry, LogStorage};
use crate::error::LedgerError;

/// File-backed log: UTF-8, one entry per line, append only.
///
/// An existing file is reopened and extended.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: File,
    len: u64,
}

impl FileLog {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let len = if path.exists() {
            BufReader::new(File::open(&path)?).lines().count() as u64
        } else {
            0
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(FileLog { path, file, len })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStorage for FileLog {
    fn append(&mut self, entries: &[String]) -> Result<(), LedgerError> {
        let mut buf = String::new();
        for entry in entries {
            check_entry(entry)?;
            buf.push_str(entry);
            buf.push('\n');
        }
        self.file.write_all(buf.as_bytes())?;
        self.file.flush()?;
        self.len += entries.len() as u64;
        Ok(())
    }

    fn read_from(&self, index: u64) -> Result<Vec<String>, LedgerError> {
        let reader = BufReader::new(File::open(&self.path)?);
        reader
            .lines()
            .skip(index as usize)
            .map(|line| line.map_err(LedgerError::from))
            .collect()
    }

    fn len(&self) -> u64 {
        self.len
    }
}

use super::{check_entry, LogStorage};
use crate::error::LedgerError;

/// In-memory log used by tests and ephemeral replicas
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    entries: Vec<String>,
}

impl MemoryLog {
    pub fn new() -> Self {
        MemoryLog {
            entries: Vec::new(),
        }
    }

    /// All entries (for debugging/testing)
    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

impl LogStorage for MemoryLog {
    fn append(&mut self, entries: &[String]) -> Result<(), LedgerError> {
        for entry in entries {
            check_entry(entry)?;
        }
        self.entries.extend_from_slice(entries);
        Ok(())
    }

    fn read_from(&self, index: u64) -> Result<Vec<String>, LedgerError> {
        let start = (index as usize).min(self.entries.len());
        Ok(self.entries[start..].to_vec())
    }

    fn len(&self) -> u64 {
        self.entries.len() as u64
    }
}

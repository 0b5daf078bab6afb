pub mod file;
pub mod memory;

use crate::error::LedgerError;

/// Append-only storage for committed transactions, one entry per line
pub trait LogStorage: Send {
    /// Append entries to the end of the log and make them durable
    fn append(&mut self, entries: &[String]) -> Result<(), LedgerError>;

    /// Entries from `index` to the end of the log
    fn read_from(&self, index: u64) -> Result<Vec<String>, LedgerError>;

    /// Number of entries in the log
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Entries are stored one per line, so they may not contain line breaks.
pub(crate) fn check_entry(entry: &str) -> Result<(), LedgerError> {
    if entry.contains('\n') || entry.contains('\r') {
        return Err(LedgerError::InvalidEntry(format!("line break in {:?}", entry)));
    }
    Ok(())
}

pub use file::FileLog;
pub use memory::MemoryLog;

//! Palisade Mempool - Client request pool
//!
//! Requests move from `pending` to `staging` once they are placed in a block
//! and leave the pool for the result cache when the block commits. A pruned
//! block sends its requests back to `pending`.

pub mod error;
pub mod pool;

pub use error::MempoolError;
pub use pool::{Admission, Mempool, MempoolConfig};

//! # emberkv - An Embeddable LSM-Tree Storage Engine
//!
//! emberkv is a persistent key-value storage engine organized as a
//! log-structured merge tree. It accepts byte-string keys and values,
//! supports point writes, point deletes (via tombstones), and point
//! reads, and recovers from crashes through a write-ahead log.
//!
//! ## Architecture
//!
//! - **WAL (Write-Ahead Log)**: every mutation is logged and fsynced
//!   before it is acknowledged
//! - **MemTable**: an in-memory ordered buffer for recent writes,
//!   bounded by a distinct-key capacity
//! - **SSTable**: immutable sorted files on disk, each with a Bloom
//!   filter and a sparse block index
//! - **Compaction**: a background worker merges tables into deeper
//!   levels, discarding overwritten versions and deleted keys
//!
//! Writes hit the WAL and then the active MemTable; a full MemTable is
//! sealed, queued, and flushed to a level-0 SSTable in the background.
//! Reads walk the layers newest to oldest and stop at the first hit.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use emberkv::{Engine, Options};
//!
//! # fn main() -> Result<(), emberkv::Error> {
//! let engine = Engine::open("./data", Options::default())?;
//! engine.recover()?;
//!
//! engine.put(b"key1", b"value1")?;
//!
//! if let Some(value) = engine.get(b"key1")? {
//!     println!("Found: {:?}", value);
//! }
//!
//! engine.delete(b"key1")?;
//! engine.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod compaction;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod filter;
pub mod memtable;
pub mod sstable;
pub mod wal;

pub use config::{CompactionConfig, CompactionStrategy, Options};
pub use engine::{Engine, EngineStats};
pub use entry::{Entry, EntryKind};
pub use error::{Error, Result};

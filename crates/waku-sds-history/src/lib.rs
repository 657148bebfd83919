//! # Waku SDS History
//!
//! Local message history for Scalable Data Sync. Provides a trait-based
//! interface with in-memory and SQLite-persistent implementations.
//!
//! ## Overview
//!
//! Every channel keeps a log of the content messages it produced or
//! accepted. The log is the source of causal-history entries for new
//! outgoing messages and the ground truth for "have we seen this
//! dependency". The primary implementation is [`MemLocalHistory`], with
//! [`SqliteHistory`] for channels whose history must survive a restart.
//!
//! ## Key Types
//!
//! - [`LocalHistory`] - The trait for all history operations
//! - [`MemLocalHistory`] - In-memory history
//! - [`SqliteHistory`] - SQLite-backed write-through history
//! - [`HistoryConfig`] - Size cap configuration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use waku_sds_core::ChannelId;
//! use waku_sds_history::{HistoryConfig, LocalHistory, SqliteHistory};
//!
//! fn example() {
//!     let history = SqliteHistory::open(
//!         "history.db",
//!         ChannelId::from("my-channel"),
//!         HistoryConfig::default(),
//!     )
//!     .unwrap();
//!     println!("restored {} messages", history.len());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: pushing a known message id is a no-op
//! - **Whole-batch validation**: one invalid message rejects the batch
//! - **Bounded**: oldest messages are evicted past `max_size`

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{HistoryError, Result};
pub use memory::MemLocalHistory;
pub use sqlite::SqliteHistory;
pub use traits::{HistoryConfig, LocalHistory, DEFAULT_MAX_HISTORY_SIZE};

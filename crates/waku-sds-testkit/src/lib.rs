//! # Waku SDS Testkit
//!
//! Testing utilities for Scalable Data Sync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Vectors**: known answers for message ids and repair scheduling, for
//!   cross-implementation verification
//! - **Generators**: proptest strategies for messages and channel histories
//! - **Fixtures**: protocol-level participants over a manual clock, and
//!   running reliable channels over an in-memory network
//!
//! ## Vectors
//!
//! ```rust
//! use waku_sds_testkit::vectors::{all_vectors, to_json, verify};
//!
//! let set = all_vectors();
//! assert!(verify(&set).is_empty());
//! println!("{}", to_json(&set).unwrap());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use waku_sds_testkit::generators::{content_from_params, ContentParams};
//!
//! proptest! {
//!     #[test]
//!     fn id_follows_payload(params: ContentParams) {
//!         let m = content_from_params(&params);
//!         prop_assert_eq!(m.message_id, waku_sds_core::MessageId::from_payload(&m.content));
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use waku_sds_testkit::fixtures::multi_party_fixtures;
//!
//! let mut parties = multi_party_fixtures("room", &["alice", "bob"]);
//! let message = parties[0].send(b"hello");
//! parties[1].channel.receive(message, None).unwrap();
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{fast_config, multi_party_fixtures, ChannelFixture, Participant, TestNetwork};

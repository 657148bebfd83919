//! # Waku SDS Channel
//!
//! The Scalable Data Sync protocol state machine for one channel.
//!
//! ## Overview
//!
//! Participants in a channel publish content messages that carry a
//! Lamport timestamp, the ids of the most recent messages they hold
//! (causal history) and a bloom digest of every id they have seen. From
//! that, each receiver can
//!
//! - deliver messages in causal order, buffering those whose dependencies
//!   have not arrived yet,
//! - tell senders which of their messages were received (acknowledgment),
//! - detect missing messages and, with SDS-R enabled, ask the channel to
//!   repair them.
//!
//! [`MessageChannel`] is synchronous and transport-agnostic: the owner
//! publishes what it builds, feeds received messages in, and drains
//! [`ChannelEvent`]s.
//!
//! ## Message Flow
//!
//! ```text
//! Alice                                Bob
//!   |-- m1 {lamport, history=[], bloom} ->|   delivered
//!   |-- m2 {history=[m1]} ------X         |   lost in transit
//!   |-- m3 {history=[m1,m2]} ------------>|   buffered, m2 missing
//!   |<-- m4 {history=[m1], bloom∋m3} -----|   m1 acked, m3 possibly acked
//!   |                                     |   m2 retrieved, m3 delivered
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use waku_sds_channel::{MessageChannel, MessageChannelConfig, ReceiveOutcome};
//! use waku_sds_core::{ChannelId, Message, SenderId};
//! use waku_sds_history::MemLocalHistory;
//!
//! let mut alice = MessageChannel::new(
//!     ChannelId::from("room"),
//!     SenderId::from("alice"),
//!     MemLocalHistory::new(),
//!     MessageChannelConfig::default(),
//! )
//! .unwrap();
//! let mut bob = MessageChannel::new(
//!     ChannelId::from("room"),
//!     SenderId::from("bob"),
//!     MemLocalHistory::new(),
//!     MessageChannelConfig::default(),
//! )
//! .unwrap();
//!
//! let message = alice.prepare_message(b"hello".to_vec()).unwrap();
//! alice.mark_sent(&message, None).unwrap();
//!
//! let wire = Message::Content(message).encode();
//! let outcome = bob.receive(Message::decode(&wire).unwrap(), None).unwrap();
//! assert_eq!(outcome, ReceiveOutcome::Delivered);
//! ```

pub mod error;
pub mod events;
pub mod message_channel;
pub mod repair;

pub use error::{ChannelError, Result};
pub use events::ChannelEvent;
pub use message_channel::{
    IncomingSweep, MessageChannel, MessageChannelConfig, OutgoingSweep, ReceiveOutcome,
    DEFAULT_CAUSAL_HISTORY_SIZE, DEFAULT_POSSIBLE_ACKS_THRESHOLD,
    DEFAULT_RECEIVED_MESSAGE_TIMEOUT, DEFAULT_SEEN_IDS_CAPACITY,
};
pub use repair::{RepairConfig, RepairManager, RepairStats};

//! # Waku SDS
//!
//! Reliable, causally ordered messaging over an unreliable pub/sub network.
//!
//! ## Overview
//!
//! The network underneath gives no delivery, ordering or acknowledgment
//! guarantee. A [`ReliableChannel`] adds them on top of the SDS protocol:
//!
//! - **Retries**: own messages are republished until a peer acknowledges
//!   them, or the attempt budget runs out.
//! - **Retrieval**: dependencies referenced by received messages but never
//!   seen are queried from a store by retrieval hint, with staggered
//!   scheduling so participants do not all query at once.
//! - **Sync status**: per channel counts of received, missing and lost
//!   messages, and whether the channel is `Synced` or `Syncing`.
//! - **Loss reporting**: a dependency that cannot be recovered is reported
//!   as irretrievable, never dropped silently.
//!
//! The network is reached through three narrow traits: [`Publisher`],
//! [`Subscriber`] and, optionally, [`Retriever`]. An in-memory
//! implementation of all three lives in [`transport::memory`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use waku_sds::transport::memory::MemoryNetwork;
//! use waku_sds::{
//!     ChannelId, Collaborators, MemLocalHistory, ReliableChannel, ReliableChannelConfig,
//!     ReliableChannelEvent, SenderId,
//! };
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let node = Arc::new(network.create_node("alice"));
//!     let collaborators = Collaborators::new(node.clone(), node.clone()).with_retriever(node);
//!
//!     let channel = ReliableChannel::create(
//!         ChannelId::from("room"),
//!         SenderId::from("alice"),
//!         MemLocalHistory::new(),
//!         collaborators,
//!         ReliableChannelConfig::default(),
//!     )
//!     .await
//!     .unwrap();
//!
//!     let mut events = channel.subscribe();
//!     let id = channel.send(b"hello".to_vec()).unwrap();
//!
//!     while let Ok(event) = events.recv().await {
//!         if let ReliableChannelEvent::OutMessageAcknowledged { message_id } = event {
//!             if message_id == id {
//!                 break;
//!             }
//!         }
//!     }
//!     channel.stop().await;
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `waku_sds::core` - wire model, bloom filter, Lamport clock
//! - `waku_sds::history` - local history storage
//! - `waku_sds::channel` - the SDS protocol state machine

pub mod encryption;
pub mod error;
pub mod events;
pub mod missing;
pub mod reliable_channel;
pub mod retry;
pub mod sync_status;
pub mod transport;

pub use waku_sds_channel as channel;
pub use waku_sds_core as core;
pub use waku_sds_history as history;

pub use encryption::{Encryption, PassThrough};
pub use error::{
    EncryptionError, PublishError, ReliableChannelError, Result, SyncStatusError, TransportError,
};
pub use events::ReliableChannelEvent;
pub use missing::{MissingMessageConfig, MissingMessageTracker, RetrievalOutcome, RetrievalReport};
pub use reliable_channel::{ChannelState, Collaborators, ReliableChannel, ReliableChannelConfig};
pub use retry::{AttemptResult, RetryManager, RetryOutcome};
pub use sync_status::{
    SyncStatus, SyncStatusBatch, SyncStatusDetail, SyncStatusEvent, SyncStatusTracker,
    DEFAULT_RECEIVED_IDS_CAPACITY,
};
pub use transport::{IncomingPayload, PublishAck, Publisher, RetrievedMessage, Retriever, Subscriber};

pub use waku_sds_channel::{MessageChannel, MessageChannelConfig, RepairConfig};
pub use waku_sds_core::{ChannelId, HistoryEntry, MessageId, SenderId};
pub use waku_sds_history::{LocalHistory, MemLocalHistory, SqliteHistory};

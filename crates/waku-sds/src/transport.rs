//! Collaborator contracts for the underlying pub/sub network.
//!
//! The reliable channel does not speak any network protocol itself. It
//! publishes opaque bytes, receives opaque bytes from a subscription, and
//! optionally asks a store for past messages by retrieval hint.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{PublishError, TransportError};

/// Acceptance of a published payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishAck {
    /// Where the payload can later be retrieved from, if the network keeps
    /// a store.
    pub retrieval_hint: Option<Bytes>,
}

/// A payload delivered by the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingPayload {
    pub payload: Bytes,
    pub retrieval_hint: Option<Bytes>,
}

/// A payload returned by a store query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedMessage {
    pub payload: Bytes,
    /// The hint this payload was retrieved by.
    pub retrieval_hint: Bytes,
}

/// Best-effort broadcast. May fail transiently.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, payload: Bytes) -> Result<PublishAck, PublishError>;
}

/// Raw payloads for the channel's topic, without ordering or delivery
/// guarantees.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Start receiving. Dropping the receiver unsubscribes.
    async fn subscribe(&self) -> Result<mpsc::Receiver<IncomingPayload>, TransportError>;
}

/// Point lookup of past messages by retrieval hint.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Query the store for `hints`.
    ///
    /// Results may be empty or partial. Implementations must stop promptly
    /// once `cancel` fires.
    async fn query(
        &self,
        hints: Vec<Bytes>,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<RetrievedMessage, TransportError>>, TransportError>;
}

/// A simple in-memory network for testing.
///
/// Every published payload is delivered to all online subscribers,
/// including the publisher, and kept in a store addressable by the
/// retrieval hint returned in the [`PublishAck`].
pub mod memory {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures::StreamExt;
    use parking_lot::{Mutex, RwLock};

    const SUBSCRIPTION_CAPACITY: usize = 1024;

    struct NodeSlot {
        sender: Mutex<Option<mpsc::Sender<IncomingPayload>>>,
        online: AtomicBool,
    }

    /// Shared state for the memory network.
    pub struct MemoryNetwork {
        nodes: RwLock<HashMap<String, Arc<NodeSlot>>>,
        store: RwLock<HashMap<Bytes, Bytes>>,
        next_hint: AtomicU64,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Attach a node to this network.
        pub fn create_node(self: &Arc<Self>, name: impl Into<String>) -> MemoryNode {
            let name = name.into();
            let slot = Arc::new(NodeSlot {
                sender: Mutex::new(None),
                online: AtomicBool::new(true),
            });
            self.nodes.write().insert(name.clone(), Arc::clone(&slot));
            MemoryNode {
                name,
                network: Arc::clone(self),
                slot,
                failures: Mutex::new(VecDeque::new()),
                published: AtomicUsize::new(0),
                queries: AtomicUsize::new(0),
            }
        }

        /// Number of payloads held by the store.
        pub fn stored(&self) -> usize {
            self.store.read().len()
        }

        fn broadcast(&self, payload: Bytes) -> Bytes {
            let n = self.next_hint.fetch_add(1, Ordering::SeqCst);
            let hint = Bytes::from(format!("hint-{}", n));
            self.store.write().insert(hint.clone(), payload.clone());

            let slots: Vec<Arc<NodeSlot>> = self.nodes.read().values().cloned().collect();
            for slot in slots {
                if !slot.online.load(Ordering::SeqCst) {
                    continue;
                }
                if let Some(sender) = slot.sender.lock().as_ref() {
                    let incoming = IncomingPayload {
                        payload: payload.clone(),
                        retrieval_hint: Some(hint.clone()),
                    };
                    if sender.try_send(incoming).is_err() {
                        tracing::warn!("Memory network dropped a payload: subscriber full or gone");
                    }
                }
            }
            hint
        }
    }

    impl Default for MemoryNetwork {
        fn default() -> Self {
            Self {
                nodes: RwLock::new(HashMap::new()),
                store: RwLock::new(HashMap::new()),
                next_hint: AtomicU64::new(0),
            }
        }
    }

    /// One participant's view of the memory network.
    ///
    /// Implements all three collaborator traits.
    pub struct MemoryNode {
        name: String,
        network: Arc<MemoryNetwork>,
        slot: Arc<NodeSlot>,
        failures: Mutex<VecDeque<PublishError>>,
        published: AtomicUsize,
        queries: AtomicUsize,
    }

    impl MemoryNode {
        pub fn name(&self) -> &str {
            &self.name
        }

        /// While offline, the node receives nothing. Payloads published
        /// meanwhile remain retrievable from the store.
        pub fn set_online(&self, online: bool) {
            self.slot.online.store(online, Ordering::SeqCst);
        }

        /// Make the next publish calls fail with `errors`, in order.
        pub fn fail_next_publishes(&self, errors: impl IntoIterator<Item = PublishError>) {
            self.failures.lock().extend(errors);
        }

        /// Successful publish calls so far.
        pub fn published(&self) -> usize {
            self.published.load(Ordering::SeqCst)
        }

        /// Store queries issued so far.
        pub fn queries(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Publisher for MemoryNode {
        async fn publish(&self, payload: Bytes) -> Result<PublishAck, PublishError> {
            if let Some(error) = self.failures.lock().pop_front() {
                return Err(error);
            }
            if payload.is_empty() {
                return Err(PublishError::EmptyPayload);
            }
            let hint = self.network.broadcast(payload);
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(PublishAck {
                retrieval_hint: Some(hint),
            })
        }
    }

    #[async_trait]
    impl Subscriber for MemoryNode {
        async fn subscribe(&self) -> Result<mpsc::Receiver<IncomingPayload>, TransportError> {
            let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
            *self.slot.sender.lock() = Some(tx);
            Ok(rx)
        }
    }

    #[async_trait]
    impl Retriever for MemoryNode {
        async fn query(
            &self,
            hints: Vec<Bytes>,
            cancel: CancellationToken,
        ) -> Result<BoxStream<'static, Result<RetrievedMessage, TransportError>>, TransportError>
        {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            self.queries.fetch_add(1, Ordering::SeqCst);
            let found: Vec<Result<RetrievedMessage, TransportError>> = {
                let store = self.network.store.read();
                hints
                    .into_iter()
                    .filter_map(|hint| {
                        store.get(&hint).map(|payload| {
                            Ok(RetrievedMessage {
                                payload: payload.clone(),
                                retrieval_hint: hint,
                            })
                        })
                    })
                    .collect()
            };
            Ok(futures::stream::iter(found).boxed())
        }
    }

    impl Drop for MemoryNode {
        fn drop(&mut self) {
            self.network.nodes.write().remove(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_memory_publish_reaches_all_subscribers() {
        let network = MemoryNetwork::new();
        let alice = network.create_node("alice");
        let bob = network.create_node("bob");

        let mut alice_rx = alice.subscribe().await.unwrap();
        let mut bob_rx = bob.subscribe().await.unwrap();

        let ack = alice.publish(Bytes::from_static(b"hello")).await.unwrap();
        let hint = ack.retrieval_hint.unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            let incoming = rx.recv().await.unwrap();
            assert_eq!(incoming.payload, Bytes::from_static(b"hello"));
            assert_eq!(incoming.retrieval_hint, Some(hint.clone()));
        }
        assert_eq!(alice.published(), 1);
    }

    #[tokio::test]
    async fn test_memory_offline_node_can_retrieve() {
        let network = MemoryNetwork::new();
        let alice = network.create_node("alice");
        let bob = network.create_node("bob");
        let mut bob_rx = bob.subscribe().await.unwrap();

        bob.set_online(false);
        let hint = alice
            .publish(Bytes::from_static(b"missed"))
            .await
            .unwrap()
            .retrieval_hint
            .unwrap();
        assert!(bob_rx.try_recv().is_err());

        let results: Vec<_> = bob
            .query(vec![hint.clone(), Bytes::from_static(b"unknown")], CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        let retrieved = results.into_iter().next().unwrap().unwrap();
        assert_eq!(retrieved.payload, Bytes::from_static(b"missed"));
        assert_eq!(retrieved.retrieval_hint, hint);
    }

    #[tokio::test]
    async fn test_memory_injected_failures() {
        let network = MemoryNetwork::new();
        let alice = network.create_node("alice");
        alice.fail_next_publishes([PublishError::NoPeersAvailable]);

        assert_eq!(
            alice.publish(Bytes::from_static(b"x")).await,
            Err(PublishError::NoPeersAvailable)
        );
        assert!(alice.publish(Bytes::from_static(b"x")).await.is_ok());
        assert_eq!(network.stored(), 1);
    }

    #[tokio::test]
    async fn test_memory_query_respects_cancellation() {
        let network = MemoryNetwork::new();
        let alice = network.create_node("alice");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            alice.query(vec![], cancel).await,
            Err(TransportError::Cancelled)
        ));
        assert_eq!(alice.queries(), 0);
    }
}

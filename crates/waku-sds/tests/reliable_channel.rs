//! End-to-end scenarios over the in-memory network.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use waku_sds::transport::Publisher;
use waku_sds::{
    ChannelId, Collaborators, Encryption, EncryptionError, MessageChannelConfig, MessageId,
    PublishError, ReliableChannel, ReliableChannelError, ReliableChannelEvent, SenderId,
    SqliteHistory, SyncStatus,
};
use waku_sds_core::{ManualClock, Message};
use waku_sds_history::{HistoryConfig, LocalHistory};
use waku_sds_testkit::fixtures::{fast_config, ChannelFixture, TestNetwork, START_MS};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn is_sent(id: &MessageId) -> impl Fn(&ReliableChannelEvent) -> bool + '_ {
    move |e| matches!(e, ReliableChannelEvent::OutMessageSent { message_id } if message_id == id)
}

fn is_acknowledged(id: &MessageId) -> impl Fn(&ReliableChannelEvent) -> bool + '_ {
    move |e| {
        matches!(e, ReliableChannelEvent::OutMessageAcknowledged { message_id } if message_id == id)
    }
}

#[tokio::test]
async fn test_delivery_and_acknowledgement_by_reference() {
    init_tracing();
    let net = TestNetwork::new("room");
    let mut alice = net.participant("alice").await;
    let mut bob = net.participant("bob").await;

    let m1 = alice.channel.send(b"hello bob".to_vec()).unwrap();
    assert!(alice.wait_for(WAIT, is_sent(&m1)).await.is_some());
    assert_eq!(
        bob.collect_received(1, WAIT).await,
        vec![Bytes::from_static(b"hello bob")]
    );

    // Bob's reply lists m1 in its causal history.
    let m2 = bob.channel.send(b"hello alice".to_vec()).unwrap();
    assert!(alice.wait_for(WAIT, is_acknowledged(&m1)).await.is_some());
    assert!(!alice.channel.is_retrying(&m1));
    assert!(!alice
        .channel
        .with_message_channel(|c| c.is_pending_outgoing(&m1)));

    let received = alice.collect_received(1, WAIT).await;
    assert_eq!(received, vec![Bytes::from_static(b"hello alice")]);
    assert!(alice
        .channel
        .with_message_channel(|c| c.history().contains(&m2)));
    assert_eq!(bob.channel.sync_status().status(), SyncStatus::Synced);

    alice.channel.stop().await;
    bob.channel.stop().await;
}

#[tokio::test]
async fn test_missed_message_retrieved_from_store_in_causal_order() {
    init_tracing();
    let net = TestNetwork::new("room");
    // Resends are slow so the store is the only way back.
    let mut alice = net
        .participant_with(
            "alice",
            fast_config().with_retry(Duration::from_secs(60), 5),
            None,
        )
        .await;
    let mut bob = net.participant("bob").await;

    bob.node.set_online(false);
    let m1 = alice.channel.send(b"first".to_vec()).unwrap();
    assert!(alice.wait_for(WAIT, is_sent(&m1)).await.is_some());
    bob.node.set_online(true);

    let m2 = alice.channel.send(b"second".to_vec()).unwrap();
    assert!(alice.wait_for(WAIT, is_sent(&m2)).await.is_some());

    let received = bob.collect_received(2, WAIT).await;
    assert_eq!(
        received,
        vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]
    );
    assert!(bob.node.queries() >= 1);

    let detail = bob.channel.sync_status().detail();
    assert_eq!(detail.missing, 0);
    assert_eq!(detail.lost, 0);
    assert_eq!(detail.received, 2);

    alice.channel.stop().await;
    bob.channel.stop().await;
}

#[tokio::test]
async fn test_unretrievable_dependency_reported_lost() {
    init_tracing();
    let net = TestNetwork::new("room");
    let mut bob = net.participant("bob").await;
    let mut sync_events = bob.channel.subscribe_sync_status();

    // Carol references a message the store never saw.
    let mut carol = ChannelFixture::new("room", "carol", ManualClock::new(START_MS));
    let ghost = carol.channel.prepare_message(b"ghost".to_vec()).unwrap();
    carol
        .channel
        .mark_sent(&ghost, Some(Bytes::from_static(b"no-such-hint")))
        .unwrap();
    let real = carol.send(b"real");
    net.network
        .create_node("carol")
        .publish(Bytes::from(real.encode()))
        .await
        .unwrap();

    let event = bob
        .wait_for(WAIT, |e| {
            matches!(e, ReliableChannelEvent::InIrretrievableMessage { .. })
        })
        .await
        .unwrap();
    match event {
        ReliableChannelEvent::InIrretrievableMessage {
            message_id,
            retrieval_hint,
        } => {
            assert_eq!(message_id, ghost.message_id);
            assert_eq!(retrieval_hint, Some(Bytes::from_static(b"no-such-hint")));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(bob.channel.sync_status().is_lost(&ghost.message_id));
    assert_eq!(bob.channel.sync_status().status(), SyncStatus::Synced);

    // The dependent stops waiting once its dependency is given up on.
    assert_eq!(
        bob.collect_received(1, WAIT).await,
        vec![Bytes::from_static(b"real")]
    );
    assert_eq!(bob.channel.with_message_channel(|c| c.incoming_len()), 0);

    // Syncing was reported while the ghost was still being looked for.
    let mut saw_syncing = false;
    while let Ok(event) = sync_events.try_recv() {
        saw_syncing |= event.status == SyncStatus::Syncing;
    }
    assert!(saw_syncing);

    bob.channel.stop().await;
}

#[tokio::test]
async fn test_dependency_without_hint_times_out() {
    init_tracing();
    let net = TestNetwork::new("room");
    let config = fast_config().with_channel(
        MessageChannelConfig::default().with_received_message_timeout(Duration::from_millis(200)),
    );
    let mut bob = net.participant_with("bob", config, None).await;

    // Nothing tells bob where to fetch the ghost from.
    let mut carol = ChannelFixture::new("room", "carol", ManualClock::new(START_MS));
    let ghost = carol.channel.prepare_message(b"ghost".to_vec()).unwrap();
    carol.channel.mark_sent(&ghost, None).unwrap();
    let real = carol.send(b"real");
    net.network
        .create_node("carol")
        .publish(Bytes::from(real.encode()))
        .await
        .unwrap();

    assert_eq!(
        bob.collect_received(1, WAIT).await,
        vec![Bytes::from_static(b"real")]
    );
    let event = bob
        .wait_for(WAIT, |e| {
            matches!(e, ReliableChannelEvent::InIrretrievableMessage { .. })
        })
        .await
        .unwrap();
    assert!(matches!(
        event,
        ReliableChannelEvent::InIrretrievableMessage { message_id, retrieval_hint: None }
            if message_id == ghost.message_id
    ));
    assert!(bob.channel.sync_status().is_lost(&ghost.message_id));
    assert_eq!(bob.channel.sync_status().status(), SyncStatus::Synced);

    bob.channel.stop().await;
}

#[tokio::test]
async fn test_retries_exhausted_without_peers() {
    init_tracing();
    let net = TestNetwork::new("room");
    let mut alice = net
        .participant_with(
            "alice",
            fast_config().with_retry(Duration::from_millis(30), 3),
            None,
        )
        .await;

    let id = alice.channel.send(b"anyone?".to_vec()).unwrap();
    let event = alice
        .wait_for(WAIT, |e| {
            matches!(e, ReliableChannelEvent::OutMessageRetriesError { .. })
        })
        .await
        .unwrap();
    assert_eq!(event.message_id(), Some(&id));
    assert_eq!(alice.node.published(), 3);
    assert!(!alice.channel.is_retrying(&id));

    alice.channel.stop().await;
}

#[tokio::test]
async fn test_transient_publish_failure_is_retried() {
    init_tracing();
    let net = TestNetwork::new("room");
    let mut alice = net.participant("alice").await;
    alice.node.fail_next_publishes([PublishError::NoPeersAvailable]);

    let id = alice.channel.send(b"eventually".to_vec()).unwrap();
    let mut attempts = 0;
    loop {
        let event = alice.wait_for(WAIT, |_| true).await.unwrap();
        match event {
            ReliableChannelEvent::OutMessageSending { .. } => attempts += 1,
            ReliableChannelEvent::OutMessageSent { message_id } => {
                assert_eq!(message_id, id);
                break;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(attempts, 2);

    alice.channel.stop().await;
}

#[tokio::test]
async fn test_ephemeral_messages_skip_history() {
    init_tracing();
    let net = TestNetwork::new("room");
    let alice = net.participant("alice").await;
    let mut bob = net.participant("bob").await;

    let id = alice.channel.send_ephemeral(b"typing".to_vec()).await.unwrap();
    let event = bob
        .wait_for(WAIT, |e| {
            matches!(e, ReliableChannelEvent::InMessageReceived { ephemeral: true, .. })
        })
        .await
        .unwrap();
    assert_eq!(event.message_id(), Some(&id));
    assert!(bob.channel.with_message_channel(|c| c.history().is_empty()));
    assert!(alice.channel.with_message_channel(|c| c.history().is_empty()));

    alice.channel.stop().await;
    bob.channel.stop().await;
}

#[tokio::test]
async fn test_sync_message_acknowledges() {
    init_tracing();
    let net = TestNetwork::new("room");
    let _alice = net
        .participant_with(
            "alice",
            fast_config().with_sync_min_interval(Duration::from_millis(100)),
            None,
        )
        .await;
    let mut bob = net
        .participant_with(
            "bob",
            fast_config().with_retry(Duration::from_secs(60), 5),
            None,
        )
        .await;

    // Alice never sends content; only her sync message can acknowledge.
    let id = bob.channel.send(b"anyone there?".to_vec()).unwrap();
    assert!(bob.wait_for(WAIT, is_acknowledged(&id)).await.is_some());
    assert!(!bob.channel.is_retrying(&id));
}

/// Flips every byte with a shared key.
struct XorEncryption(u8);

impl Encryption for XorEncryption {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Ok(plaintext.iter().map(|b| b ^ self.0).collect())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Ok(ciphertext.iter().map(|b| b ^ self.0).collect())
    }
}

#[tokio::test]
async fn test_encrypted_channel() {
    init_tracing();
    let net = TestNetwork::new("room");
    let key: Arc<dyn Encryption> = Arc::new(XorEncryption(0x5a));
    let alice = net
        .participant_with("alice", fast_config(), Some(key.clone()))
        .await;
    let mut bob = net
        .participant_with("bob", fast_config(), Some(key))
        .await;

    alice.channel.send(b"secret".to_vec()).unwrap();
    assert_eq!(
        bob.collect_received(1, WAIT).await,
        vec![Bytes::from_static(b"secret")]
    );

    alice.channel.stop().await;
    bob.channel.stop().await;
}

#[tokio::test]
async fn test_stop_then_send_fails_and_restart_works() {
    init_tracing();
    let net = TestNetwork::new("room");
    let mut alice = net.participant("alice").await;
    let mut bob = net.participant("bob").await;

    alice.channel.stop().await;
    assert!(matches!(
        alice.channel.send(b"nope".to_vec()),
        Err(ReliableChannelError::NotRunning)
    ));
    assert!(alice
        .wait_for(WAIT, |e| matches!(
            e,
            ReliableChannelEvent::OutMessageIrrecoverableError { .. }
        ))
        .await
        .is_some());

    alice.channel.start().await.unwrap();
    alice.channel.send(b"back".to_vec()).unwrap();
    assert_eq!(
        bob.collect_received(1, WAIT).await,
        vec![Bytes::from_static(b"back")]
    );

    alice.channel.stop().await;
    bob.channel.stop().await;
}

#[tokio::test]
async fn test_history_survives_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.db");
    let channel_id = ChannelId::from("room");
    let net = TestNetwork::new("room");

    let open = |node: Arc<waku_sds::transport::memory::MemoryNode>| {
        let history =
            SqliteHistory::open(&path, channel_id.clone(), HistoryConfig::default()).unwrap();
        ReliableChannel::new(
            channel_id.clone(),
            SenderId::from("alice"),
            history,
            Collaborators::new(node.clone(), node),
            fast_config(),
        )
        .unwrap()
    };

    let node = Arc::new(net.network.create_node("alice"));
    let first = open(node.clone());
    first.start().await.unwrap();
    let mut events = first.subscribe();
    let id = first.send(b"remember me".to_vec()).unwrap();
    loop {
        if let ReliableChannelEvent::OutMessageSent { message_id } = events.recv().await.unwrap() {
            assert_eq!(message_id, id);
            break;
        }
    }
    let lamport = first.with_message_channel(|c| c.lamport_timestamp());
    first.stop().await;
    drop(first);

    let second = open(node);
    assert!(second.with_message_channel(|c| c.history().contains(&id)));
    assert!(second.with_message_channel(|c| c.lamport_timestamp()) >= lamport);
    assert!(second.with_message_channel(|c| c.bloom_filter().lookup(id.as_str())));
}

#[tokio::test]
async fn test_foreign_channel_and_garbage_ignored() {
    init_tracing();
    let net = TestNetwork::new("room");
    let mut bob = net.participant("bob").await;
    let intruder = net.network.create_node("intruder");

    let mut other = ChannelFixture::new("elsewhere", "mallory", ManualClock::new(START_MS));
    let foreign: Message = other.send(b"wrong room");
    intruder.publish(Bytes::from(foreign.encode())).await.unwrap();
    intruder
        .publish(Bytes::from_static(b"\xff\xff not protobuf"))
        .await
        .unwrap();

    assert!(bob
        .wait_for(Duration::from_millis(300), |e| matches!(
            e,
            ReliableChannelEvent::InMessageReceived { .. }
        ))
        .await
        .is_none());
    assert!(bob.channel.with_message_channel(|c| c.history().is_empty()));

    bob.channel.stop().await;
}

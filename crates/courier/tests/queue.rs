//! Offline queue behavior through the public API.

use std::sync::Arc;

use courier::{
    ChatAction, Courier, CourierConfig, ItemStatus, NewItem, OfflineQueue, Priority, QueueConfig,
    QueueError, QueueEvent, SqliteKvStore,
};
use courier_core::QueueItem;
use courier_store::ItemStore;
use courier_testkit::{send_message, RecordingProcessor, ScriptedTransport, TestFixture};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn manual_queue(fixture: &TestFixture, config: QueueConfig) -> OfflineQueue<ChatAction> {
    let queue = fixture.queue(config);
    queue.init().await.unwrap();
    queue
}

#[tokio::test]
async fn full_queue_keeps_its_size() {
    init_tracing();
    let fixture = TestFixture::new();
    let queue = manual_queue(
        &fixture,
        QueueConfig {
            max_queue_size: 2,
            ..TestFixture::manual_queue_config()
        },
    )
    .await;

    queue.add(send_message("c1", "A")).await.unwrap();
    queue.add(send_message("c1", "B")).await.unwrap();
    let err = queue.add(send_message("c1", "C")).await.unwrap_err();

    assert_eq!(err.code(), "QUEUE_FULL");
    assert_eq!(queue.len().await, 2);
    assert_eq!(fixture.kv.len(), 2);
}

#[tokio::test]
async fn always_failing_processor_runs_out_of_retries() {
    init_tracing();
    let fixture = TestFixture::new();
    let queue = manual_queue(&fixture, TestFixture::manual_queue_config()).await;
    let processor = Arc::new(RecordingProcessor::always_failing());
    queue.set_processor_arc(processor.clone());

    let item = queue.add(send_message("c1", "hello")).await.unwrap();
    for _ in 0..4 {
        queue.process_next(None).await.unwrap();
    }

    let item_after = queue.get(&item.id).await.unwrap();
    assert_eq!(item_after.status, ItemStatus::Failed);
    assert_eq!(item_after.retry_count, 3);

    let attempts = processor.attempts();
    assert_eq!(attempts.len(), 4);
    assert_eq!(
        attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert!(attempts.iter().all(|a| a.dedup_key == item.dedup_key));
}

#[tokio::test]
async fn retry_only_revives_failed_items() {
    let fixture = TestFixture::new();
    let queue = manual_queue(
        &fixture,
        QueueConfig {
            max_retries: 0,
            ..TestFixture::manual_queue_config()
        },
    )
    .await;
    queue.set_processor_arc(Arc::new(RecordingProcessor::failing_first(1)));

    let item = queue.add(send_message("c1", "hello")).await.unwrap();
    assert!(queue.retry(&item.id).await.unwrap().is_none());

    queue.process_next(None).await.unwrap();
    let revived = queue.retry(&item.id).await.unwrap().unwrap();
    assert_eq!(revived.status, ItemStatus::Pending);
    assert_eq!(revived.retry_count, 0);
    assert_eq!(revived.error, None);

    assert_eq!(queue.process_next(None).await.unwrap(), 1);
}

#[tokio::test]
async fn pending_order_is_priority_then_fifo() {
    let fixture = TestFixture::new();
    let queue = manual_queue(&fixture, TestFixture::manual_queue_config()).await;

    let plan = [
        (Priority::Low, "low"),
        (Priority::Normal, "normal-1"),
        (Priority::Critical, "critical"),
        (Priority::Normal, "normal-2"),
        (Priority::High, "high"),
    ];
    for (priority, content) in plan {
        queue
            .add(NewItem::new(send_message("c1", content)).priority(priority))
            .await
            .unwrap();
    }

    let order: Vec<String> = queue
        .pending(None)
        .await
        .into_iter()
        .map(|item| match item.payload {
            ChatAction::SendMessage { content, .. } => content,
            other => panic!("unexpected payload {:?}", other),
        })
        .collect();
    assert_eq!(order, vec!["critical", "high", "normal-1", "normal-2", "low"]);
}

#[tokio::test]
async fn clean_expired_spares_delivered_items() {
    let fixture = TestFixture::new();
    let queue = manual_queue(&fixture, TestFixture::manual_queue_config()).await;
    let processor = Arc::new(RecordingProcessor::succeeding());
    queue.set_processor_arc(processor.clone());
    let mut events = queue.subscribe();

    let delivered = queue
        .add(NewItem::new(send_message("c1", "sent")).ttl_ms(1_000))
        .await
        .unwrap();
    queue.process_next(Some(1)).await.unwrap();
    let stale = queue
        .add(NewItem::new(send_message("c1", "stale")).ttl_ms(1_000))
        .await
        .unwrap();

    fixture.clock.advance(5_000);
    assert_eq!(queue.clean_expired().await.unwrap(), 1);

    assert!(queue.get(&stale.id).await.is_none());
    assert_eq!(
        queue.get(&delivered.id).await.unwrap().status,
        ItemStatus::Success
    );

    let mut expired = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let QueueEvent::Expired(item) = event {
            expired.push(item.id);
        }
    }
    assert_eq!(expired, vec![stale.id]);
}

#[tokio::test]
async fn default_ttl_applies_when_add_names_none() {
    let fixture = TestFixture::new();
    let queue = manual_queue(
        &fixture,
        QueueConfig {
            default_ttl_ms: 60_000,
            ..TestFixture::manual_queue_config()
        },
    )
    .await;

    let defaulted = queue.add(send_message("c1", "a")).await.unwrap();
    let explicit = queue
        .add(NewItem::new(send_message("c1", "b")).ttl_ms(0))
        .await
        .unwrap();

    assert_eq!(defaulted.expires_at, Some(defaulted.created_at + 60_000));
    assert_eq!(explicit.expires_at, None);
}

#[tokio::test]
async fn interrupted_send_is_redelivered_after_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("courier.db");

    let interrupted = {
        let kv = Arc::new(SqliteKvStore::open(&path).unwrap());
        let items: ItemStore<ChatAction> = ItemStore::new(kv, "offline_queue:");
        items.init().await.unwrap();
        let item = items
            .add(QueueItem::new(send_message("c1", "in flight"), Priority::High, 0))
            .await
            .unwrap();
        let claim = items.claim_ready(1, 0).await.unwrap();
        assert_eq!(claim.ready[0].status, ItemStatus::Sending);
        item
    };

    let config = CourierConfig {
        queue: TestFixture::manual_queue_config(),
        ..CourierConfig::default()
    };
    let courier: Courier<ChatAction, ScriptedTransport> =
        Courier::open(&path, ScriptedTransport::new(), config).unwrap();
    let report = courier.init().await.unwrap();
    assert_eq!(report.recovered, 1);

    let recovered = courier.queue().get(&interrupted.id).await.unwrap();
    assert_eq!(recovered.status, ItemStatus::Pending);

    let processor = Arc::new(RecordingProcessor::succeeding());
    courier.queue().set_processor_arc(processor.clone());
    assert_eq!(courier.queue().process_next(None).await.unwrap(), 1);

    // Same idempotency key as the attempt that was cut short
    assert_eq!(processor.attempts()[0].dedup_key, interrupted.dedup_key);
    courier.shutdown();
}

#[tokio::test]
async fn mutations_before_init_are_refused() {
    let fixture = TestFixture::new();
    let queue = fixture.queue(TestFixture::manual_queue_config());

    assert!(matches!(
        queue.add(send_message("c1", "early")).await,
        Err(QueueError::NotInitialized)
    ));
    assert!(matches!(
        queue.retry_all().await,
        Err(QueueError::NotInitialized)
    ));
}

use onespace_storage::{
    ChangeEvent, ChangeFilter, ChangeNotifier, ChangeSince, Document, DocumentStore, Origin,
    StorageError, StoreConfig,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn settings(username: &str) -> Document {
    Document::from_value(
        format!("{username}::settings"),
        json!({"type": "settings", "username": username}),
    )
    .unwrap()
}

fn task(username: &str, n: u32) -> Document {
    Document::from_value(
        format!("{username}::task::{n}::x"),
        json!({"type": "task", "username": username, "completed": false, "order": n}),
    )
    .unwrap()
}

async fn next(feed: &mut onespace_storage::ChangeFeed) -> ChangeEvent {
    tokio::time::timeout(Duration::from_secs(5), feed.next())
        .await
        .expect("timed out waiting for change")
        .expect("feed ended")
}

// ── Persisted tail ───────────────────────────────────────────────

#[test]
fn non_live_feed_drains_tail_in_sequence_order() {
    let store = DocumentStore::open_in_memory().unwrap();
    store.put(&task("alice", 1)).unwrap();
    store.put(&settings("bob")).unwrap();
    store.put(&task("alice", 2)).unwrap();

    let events = store
        .changes(ChangeSince::Beginning, false, ChangeFilter::all())
        .unwrap()
        .drain();
    assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2, 3]);

    let alice = store
        .changes(ChangeSince::Beginning, false, ChangeFilter::owned_by("alice"))
        .unwrap()
        .drain();
    assert_eq!(
        alice.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
        vec!["alice::task::1::x", "alice::task::2::x"]
    );

    let since = store
        .changes(ChangeSince::Seq(2), false, ChangeFilter::all())
        .unwrap()
        .drain();
    assert_eq!(since.len(), 1);
    assert_eq!(since[0].seq, 3);
}

#[test]
fn tail_keeps_latest_change_per_document() {
    let store = DocumentStore::open_in_memory().unwrap();
    let mut doc = task("alice", 1);
    doc.rev = Some(store.put(&doc).unwrap());
    store.put(&task("alice", 2)).unwrap();
    store.remove(&doc).unwrap();

    let events = store
        .changes(ChangeSince::Beginning, false, ChangeFilter::owned_by("alice"))
        .unwrap()
        .drain();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].id, "alice::task::1::x");
    assert!(events[1].deleted);
    assert!(events[1].document.is_none());
    assert_eq!(events[1].seq, 3);
}

#[test]
fn origin_filter_separates_local_and_replicated_writes() {
    let store = DocumentStore::open_in_memory().unwrap();
    store.put(&settings("alice")).unwrap();
    let remote = onespace_storage::ReplicatedChange::from_wire(json!({
        "_id": "alice::task::9::r",
        "_rev": "1-abc",
        "type": "task",
        "username": "alice",
    }))
    .unwrap();
    store.apply_replicated(&remote).unwrap();

    let local = store
        .changes(
            ChangeSince::Beginning,
            false,
            ChangeFilter::owned_by("alice").with_origin(Origin::Local),
        )
        .unwrap()
        .drain();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].id, "alice::settings");
}

// ── Live feeds ───────────────────────────────────────────────────

#[tokio::test]
async fn live_feed_follows_new_writes_without_duplicates() {
    let store = DocumentStore::open_in_memory().unwrap();
    store.put(&task("alice", 1)).unwrap();

    let mut feed = store
        .changes(ChangeSince::Beginning, true, ChangeFilter::owned_by("alice"))
        .unwrap();
    assert!(feed.is_live());
    assert_eq!(next(&mut feed).await.seq, 1);

    store.put(&settings("bob")).unwrap();
    store.put(&task("alice", 2)).unwrap();
    let event = next(&mut feed).await;
    assert_eq!(event.seq, 3);
    assert_eq!(event.id, "alice::task::2::x");
}

#[tokio::test]
async fn live_feed_from_now_skips_history() {
    let store = DocumentStore::open_in_memory().unwrap();
    store.put(&task("alice", 1)).unwrap();

    let mut feed = store.changes(ChangeSince::Now, true, ChangeFilter::all()).unwrap();
    assert_eq!(feed.pending(), 0);
    store.put(&task("alice", 2)).unwrap();
    assert_eq!(next(&mut feed).await.id, "alice::task::2::x");
}

#[tokio::test]
async fn lagging_live_feed_rereads_missed_changes() {
    let config = StoreConfig {
        change_buffer: 2,
        ..StoreConfig::default()
    };
    let store = DocumentStore::open(&config).unwrap();
    let mut feed = store.changes(ChangeSince::Now, true, ChangeFilter::all()).unwrap();

    for n in 0..10 {
        store.put(&task("alice", n)).unwrap();
    }

    let mut seqs = Vec::new();
    for _ in 0..10 {
        seqs.push(next(&mut feed).await.seq);
    }
    assert_eq!(seqs, (1..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn live_feed_ends_when_store_closes() {
    let store = DocumentStore::open_in_memory().unwrap();
    let mut feed = store.changes(ChangeSince::Now, true, ChangeFilter::all()).unwrap();
    store.close();
    let ended = tokio::time::timeout(Duration::from_secs(5), feed.next())
        .await
        .unwrap();
    assert!(ended.is_none());
}

// ── Change notifier ──────────────────────────────────────────────

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&ChangeEvent) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |event: &ChangeEvent| {
        sink.lock().unwrap().push(event.id.clone());
    })
}

async fn wait_for(seen: &Arc<Mutex<Vec<String>>>, count: usize) {
    for _ in 0..200 {
        if seen.lock().unwrap().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} events, saw {:?}", seen.lock().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn notifier_delivers_only_owned_changes() {
    let store = DocumentStore::open_in_memory().unwrap();
    let notifier = ChangeNotifier::new(store.clone());
    let (alice_seen, alice) = recorder();
    let (alice2_seen, alice2) = recorder();
    let (bob_seen, bob) = recorder();
    notifier.watch("alice", alice).unwrap();
    notifier.watch("alice", alice2).unwrap();
    notifier.watch("bob", bob).unwrap();
    assert_eq!(notifier.listener_count(), 3);
    assert_eq!(notifier.listeners_for("alice"), 2);

    store.put(&settings("alice")).unwrap();
    store.put(&settings("bob")).unwrap();
    store.put(&task("alice", 1)).unwrap();

    wait_for(&alice_seen, 2).await;
    wait_for(&alice2_seen, 2).await;
    wait_for(&bob_seen, 1).await;
    assert_eq!(
        *alice_seen.lock().unwrap(),
        vec!["alice::settings".to_string(), "alice::task::1::x".to_string()]
    );
    assert_eq!(*bob_seen.lock().unwrap(), vec!["bob::settings".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_listener_receives_nothing_more() {
    let store = DocumentStore::open_in_memory().unwrap();
    let notifier = ChangeNotifier::new(store.clone());
    let (seen, listener) = recorder();
    let handle = notifier.watch("alice", listener).unwrap();

    store.put(&task("alice", 1)).unwrap();
    wait_for(&seen, 1).await;

    handle.cancel();
    handle.cancel();
    assert!(!notifier.cancel(&handle));
    assert_eq!(notifier.listener_count(), 0);

    store.put(&task("alice", 2)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listener_may_cancel_itself() {
    let store = DocumentStore::open_in_memory().unwrap();
    let notifier = ChangeNotifier::new(store.clone());
    let slot: Arc<Mutex<Option<onespace_storage::ListenerHandle>>> = Arc::new(Mutex::new(None));
    let count = Arc::new(Mutex::new(0));

    let handle = {
        let slot = Arc::clone(&slot);
        let count = Arc::clone(&count);
        notifier
            .watch("alice", move |_event: &ChangeEvent| {
                *count.lock().unwrap() += 1;
                if let Some(handle) = slot.lock().unwrap().as_ref() {
                    handle.cancel();
                }
            })
            .unwrap()
    };
    *slot.lock().unwrap() = Some(handle);

    store.put(&task("alice", 1)).unwrap();
    for _ in 0..200 {
        if notifier.listener_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(notifier.listener_count(), 0);

    store.put(&task("alice", 2)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*count.lock().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listeners_are_unregistered_when_store_closes() {
    let store = DocumentStore::open_in_memory().unwrap();
    let notifier = ChangeNotifier::new(store.clone());
    let (_alice_seen, alice) = recorder();
    let (_bob_seen, bob) = recorder();
    let handle = notifier.watch("alice", alice).unwrap();
    notifier.watch("bob", bob).unwrap();
    assert_eq!(notifier.listener_count(), 2);

    store.close();
    for _ in 0..200 {
        if notifier.listener_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(notifier.listener_count(), 0);
    assert_eq!(notifier.listeners_for("alice"), 0);
    assert!(!notifier.cancel(&handle));
}

#[test]
fn watch_outside_runtime_fails() {
    let store = DocumentStore::open_in_memory().unwrap();
    let notifier = ChangeNotifier::new(store);
    let err = notifier.watch("alice", |_| {}).unwrap_err();
    assert!(matches!(err, StorageError::NoRuntime));
}

//! Tests for the bounded ordered send queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use seine::queue::SendQueue;
use seine::{CancelToken, NetError};

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test]
async fn items_are_processed_in_enqueue_order() {
    let processed: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let processed_clone = processed.clone();

    let queue = SendQueue::spawn(Some(16), move |item: u32| {
        let processed = processed_clone.clone();
        async move {
            processed.lock().push(item);
        }
    });

    for i in 0..10 {
        assert!(queue.try_post(i));
    }

    assert!(wait_until(|| processed.lock().len() == 10).await);
    assert_eq!(&*processed.lock(), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

#[tokio::test]
async fn try_post_refuses_at_capacity_and_recovers() {
    let gate = Arc::new(Notify::new());
    let done = Arc::new(AtomicUsize::new(0));

    let worker_gate = gate.clone();
    let worker_done = done.clone();
    let queue = SendQueue::spawn(Some(1), move |_item: u8| {
        let gate = worker_gate.clone();
        let done = worker_done.clone();
        async move {
            gate.notified().await;
            done.fetch_add(1, Ordering::SeqCst);
        }
    });

    // First item is picked up by the worker, which blocks on the gate.
    assert!(queue.try_post(1));
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Second item fills the single slot; third is refused.
    assert!(queue.try_post(2));
    assert!(!queue.try_post(3));

    // Let the worker drain one item; the slot frees up.
    gate.notify_one();
    assert!(wait_until(|| done.load(Ordering::SeqCst) == 1).await);
    assert!(queue.try_post(4));

    gate.notify_one();
    gate.notify_one();
    assert!(wait_until(|| done.load(Ordering::SeqCst) == 3).await);
}

#[tokio::test]
async fn complete_drains_already_enqueued_items() {
    let processed: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let processed_clone = processed.clone();

    let queue = SendQueue::spawn(Some(16), move |item: u32| {
        let processed = processed_clone.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            processed.lock().push(item);
        }
    });

    for i in 0..5 {
        assert!(queue.try_post(i));
    }
    queue.complete();
    assert!(queue.is_completed());

    // Nothing is accepted after completion.
    assert!(!queue.try_post(99));

    // But what was accepted before still drains, in order.
    assert!(wait_until(|| processed.lock().len() == 5).await);
    assert_eq!(&*processed.lock(), &[0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn send_waits_for_capacity() {
    let gate = Arc::new(Notify::new());

    let worker_gate = gate.clone();
    let queue = SendQueue::spawn(Some(1), move |_item: u8| {
        let gate = worker_gate.clone();
        async move {
            gate.notified().await;
        }
    });

    let engine = CancelToken::new();

    // Fill the worker and the slot.
    assert!(queue.try_post(1));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(queue.try_post(2));

    // A waiting send completes once the worker drains an item.
    let waiting_queue = queue.clone();
    let waiting_engine = engine.clone();
    let handle =
        tokio::spawn(async move { waiting_queue.send(3, None, &waiting_engine).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished());

    gate.notify_one();
    let sent = handle.await.unwrap();
    assert_eq!(sent.unwrap(), true);

    gate.notify_one();
    gate.notify_one();
}

#[tokio::test]
async fn send_observes_caller_cancellation() {
    let gate = Arc::new(Notify::new());
    let worker_gate = gate.clone();
    let queue = SendQueue::spawn(Some(1), move |_item: u8| {
        let gate = worker_gate.clone();
        async move {
            gate.notified().await;
        }
    });

    let engine = CancelToken::new();
    let caller = CancelToken::new();

    assert!(queue.try_post(1));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(queue.try_post(2));

    let waiting_queue = queue.clone();
    let waiting_engine = engine.clone();
    let waiting_caller = caller.clone();
    let handle = tokio::spawn(async move {
        waiting_queue
            .send(3, Some(&waiting_caller), &waiting_engine)
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    caller.cancel();

    // The engine token never fired, so the cancellation surfaces.
    let result = handle.await.unwrap();
    assert!(matches!(result, Err(NetError::Cancelled)));
}

#[tokio::test]
async fn send_returns_false_when_engine_cancels() {
    let gate = Arc::new(Notify::new());
    let worker_gate = gate.clone();
    let queue = SendQueue::spawn(Some(1), move |_item: u8| {
        let gate = worker_gate.clone();
        async move {
            gate.notified().await;
        }
    });

    let engine = CancelToken::new();
    let caller = CancelToken::new();

    assert!(queue.try_post(1));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(queue.try_post(2));

    let waiting_queue = queue.clone();
    let waiting_engine = engine.clone();
    let waiting_caller = caller.clone();
    let handle = tokio::spawn(async move {
        waiting_queue
            .send(3, Some(&waiting_caller), &waiting_engine)
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;

    // Engine shutdown reads as a benign refusal, not an error.
    engine.cancel();
    let result = handle.await.unwrap();
    assert_eq!(result.unwrap(), false);
}

#[tokio::test]
async fn send_after_complete_returns_false() {
    let queue = SendQueue::spawn(Some(4), |_item: u8| async {});
    let engine = CancelToken::new();

    queue.complete();
    let result = queue.send(1, None, &engine).await;
    assert_eq!(result.unwrap(), false);
}

#[tokio::test]
async fn unbounded_queue_accepts_everything() {
    let processed = Arc::new(AtomicUsize::new(0));
    let processed_clone = processed.clone();

    let queue = SendQueue::spawn(None, move |_item: u32| {
        let processed = processed_clone.clone();
        async move {
            processed.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert_eq!(queue.capacity(), None);
    for i in 0..1000 {
        assert!(queue.try_post(i));
    }
    assert!(wait_until(|| processed.load(Ordering::SeqCst) == 1000).await);
}

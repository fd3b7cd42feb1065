//! End-to-end admission flow: ceiling, queueing, dispatch, and breaker
//! recovery exercised the way the HTTP layer drives them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use presensi_common::error::ErrorClass;
use presensi_gateway::admission::{
    AdmissionConfig, AdmissionController, BreakerConfig, BreakerState, Outcome, Priority,
};

fn config(max_concurrent: usize) -> AdmissionConfig {
    AdmissionConfig {
        max_concurrent_requests: max_concurrent,
        max_queued_requests: 50,
        queue_wait_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        breaker: BreakerConfig {
            failure_ratio: 0.5,
            window: Duration::from_secs(10),
            min_samples: 5,
            open_timeout: Duration::from_millis(150),
        },
        burst_threshold: 10_000,
    }
}

#[tokio::test]
async fn queued_requests_dispatch_one_per_completion() {
    let ctrl = AdmissionController::new(config(2));

    let first = ctrl.admit(Priority::Normal).await.unwrap();
    let second = ctrl.admit(Priority::Normal).await.unwrap();

    // Waiters hand their permits back through a channel as they are
    // dispatched, so we can observe and complete them in dispatch order.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for priority in [Priority::Low, Priority::Critical, Priority::Normal] {
        let ctrl = ctrl.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let permit = ctrl.admit(priority).await.unwrap();
            tx.send((priority, permit)).unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let stats = ctrl.stats();
    assert_eq!(stats.active_requests, 2);
    assert_eq!(stats.queued.total, 3);

    // One completion admits exactly one waiter: the critical one
    first.complete(Outcome::Success);
    let (priority, critical_permit) = rx.recv().await.unwrap();
    assert_eq!(priority, Priority::Critical);
    let stats = ctrl.stats();
    assert_eq!(stats.active_requests, 2);
    assert_eq!(stats.queued.total, 2);
    assert_eq!(stats.queued.critical, 0);

    // Each further completion admits the next class down
    critical_permit.complete(Outcome::Success);
    let (priority, normal_permit) = rx.recv().await.unwrap();
    assert_eq!(priority, Priority::Normal);

    normal_permit.complete(Outcome::Success);
    let (priority, low_permit) = rx.recv().await.unwrap();
    assert_eq!(priority, Priority::Low);

    low_permit.complete(Outcome::Success);
    second.complete(Outcome::Success);

    let stats = ctrl.stats();
    assert_eq!(stats.active_requests, 0);
    assert_eq!(stats.queued.total, 0);
    assert_eq!(stats.total_admitted, 5);
}

#[tokio::test]
async fn ceiling_holds_under_concurrent_load() {
    let max = 8;
    let mut cfg = config(max);
    cfg.max_queued_requests = 200;
    let ctrl = AdmissionController::new(cfg);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..100 {
        let ctrl = ctrl.clone();
        let active = active.clone();
        let peak = peak.clone();
        let priority = match i % 4 {
            0 => Priority::Critical,
            1 => Priority::High,
            2 => Priority::Normal,
            _ => Priority::Low,
        };
        handles.push(tokio::spawn(async move {
            let permit = ctrl.admit(priority).await.unwrap();
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            permit.complete(Outcome::Success);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= max);
    let stats = ctrl.stats();
    assert_eq!(stats.active_requests, 0);
    assert_eq!(stats.queued.total, 0);
    assert_eq!(stats.total_admitted, 100);
}

#[tokio::test]
async fn breaker_trips_blocks_and_recovers_end_to_end() {
    let ctrl = AdmissionController::new(config(10));

    // Infrastructure failures past the sample floor trip the breaker
    for _ in 0..5 {
        let permit = ctrl.admit(Priority::Normal).await.unwrap();
        permit.complete(Outcome::Failure(ErrorClass::Infrastructure));
    }
    assert_eq!(ctrl.breaker_state(), BreakerState::Open);
    assert!(ctrl.admit(Priority::Critical).await.is_err());

    // After the open timeout one trial goes through and closes it
    tokio::time::sleep(Duration::from_millis(180)).await;
    let trial = ctrl.admit(Priority::Normal).await.unwrap();
    assert!(trial.is_trial());
    trial.complete(Outcome::Success);
    assert_eq!(ctrl.breaker_state(), BreakerState::Closed);

    // Traffic flows normally again
    for _ in 0..5 {
        let permit = ctrl.admit(Priority::Normal).await.unwrap();
        permit.complete(Outcome::Success);
    }
    assert_eq!(ctrl.breaker_state(), BreakerState::Closed);
}

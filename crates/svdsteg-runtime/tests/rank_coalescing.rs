//! Rank requests issued while a reconstruction runs collapse into the last one.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use svdsteg_core::{Error, Rgb};
use svdsteg_engine::factory;
use svdsteg_runtime::{wait, SvdInfo, SvdManager};

use common::{eventually, ConfusedSvd, Gate, GatedSvd};

fn gated_manager(gate: Arc<Gate>) -> (SvdManager<GatedSvd>, Arc<Mutex<Vec<u32>>>) {
    let ranks = Arc::new(Mutex::new(Vec::new()));
    let sink = ranks.clone();
    let manager = SvdManager::with_factory(
        factory(move || Ok(GatedSvd::new(gate.clone()))),
        move |info: SvdInfo| sink.lock().push(info.rank),
    );
    (manager, ranks)
}

fn channels() -> Rgb<Vec<u8>> {
    Rgb::from_fn(|| vec![0u8; 16])
}

#[tokio::test]
async fn test_intermediate_ranks_are_dropped() {
    let gate = Gate::new();
    let (manager, ranks) = gated_manager(gate.clone());

    let flight = manager.compute_svd(4, 4, channels(), 1);
    assert!(eventually(|| manager.is_busy()).await);

    assert!(manager.set_rank(2).is_none());
    assert!(manager.set_rank(3).is_none());
    assert!(manager.set_rank(4).is_none());
    assert_eq!(manager.requested_rank(), 4);

    gate.open();
    tokio::time::timeout(Duration::from_secs(5), wait(flight))
        .await
        .expect("reconstruction converges")
        .unwrap();

    assert_eq!(*ranks.lock(), vec![1, 4]);
    assert!(!manager.is_busy());
}

#[tokio::test]
async fn test_same_rank_while_busy_is_not_repeated() {
    let gate = Gate::new();
    let (manager, ranks) = gated_manager(gate.clone());

    let flight = manager.compute_svd(4, 4, channels(), 2);
    assert!(eventually(|| manager.is_busy()).await);
    assert!(manager.set_rank(3).is_none());
    assert!(manager.set_rank(2).is_none());

    gate.open();
    wait(flight).await.unwrap();
    assert_eq!(*ranks.lock(), vec![2]);
}

#[tokio::test]
async fn test_new_factorization_discards_pending_reconstruction() {
    let gate = Gate::new();
    let (manager, ranks) = gated_manager(gate.clone());

    let stale = manager.compute_svd(4, 4, channels(), 1);
    assert!(eventually(|| manager.is_busy()).await);

    let fresh = manager.compute_svd(4, 4, channels(), 3);
    gate.open();

    let stale = tokio::time::timeout(Duration::from_secs(5), wait(stale))
        .await
        .expect("stale flight settles");
    assert!(matches!(stale, Err(Error::Superseded)));
    wait(fresh).await.unwrap();
    assert_eq!(*ranks.lock(), vec![3]);
}

#[tokio::test]
async fn test_protocol_error_clears_busy() {
    let ranks = Arc::new(Mutex::new(Vec::new()));
    let sink = ranks.clone();
    let manager = SvdManager::with_factory(factory(|| Ok(ConfusedSvd)), move |info: SvdInfo| {
        sink.lock().push(info.rank)
    });

    let result = wait(manager.compute_svd(2, 2, Rgb::from_fn(|| vec![0u8; 4]), 1)).await;
    assert!(matches!(result, Err(Error::Protocol { .. })));
    assert!(manager.is_factorized());
    assert!(!manager.is_busy());
    assert!(ranks.lock().is_empty());
}

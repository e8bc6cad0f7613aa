// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for assignment, bulk moves, health-driven
//! reassignment, and the capacity invariant under concurrency.

use std::collections::BTreeSet;
use std::sync::Arc;

use ferry_config::model::{HealthConfig, SchedulerConfig};
use ferry_core::{FerryError, HealthState, PairId, PairStatus, ProbeOutcome};
use ferry_scheduler::{Scheduler, groups};
use ferry_test_utils::{MemoryStore, ScriptedProber};
use proptest::prelude::*;

fn scheduler_with(store: Arc<MemoryStore>, prober: Arc<ScriptedProber>) -> Arc<Scheduler> {
    Arc::new(Scheduler::new(
        store,
        prober,
        SchedulerConfig::default(),
        HealthConfig::default(),
    ))
}

/// Capacity holds for every session, both in memory and in the store.
async fn assert_capacity_respected(scheduler: &Scheduler, store: &MemoryStore) {
    for status in scheduler.sessions().await.unwrap() {
        let in_groups = groups::assigned(&status.groups);
        assert!(
            in_groups <= status.capacity as usize,
            "{} groups hold {in_groups} pairs, capacity {}",
            status.name,
            status.capacity
        );
        assert!(store.pairs_on(&status.name).len() <= status.capacity as usize);
    }
}

#[tokio::test]
async fn higher_priority_fills_first_then_spills_over() {
    let store = Arc::new(MemoryStore::new());
    store.seed_session("s1", 2, 1, HealthState::Healthy);
    store.seed_session("s2", 2, 5, HealthState::Healthy);
    let scheduler = scheduler_with(store.clone(), Arc::new(ScriptedProber::new()));
    scheduler.load().await.unwrap();

    let mut assigned = Vec::new();
    for id in 1..=3 {
        let pair = store.seed_pair(id, None);
        assigned.push(scheduler.assign_pair(pair).await.unwrap());
    }
    assert_eq!(assigned, vec!["s2", "s2", "s1"]);

    let fourth = store.seed_pair(4, None);
    scheduler.assign_pair(fourth).await.unwrap();
    let fifth = store.seed_pair(5, None);
    let err = scheduler.assign_pair(fifth).await.unwrap_err();
    assert!(matches!(err, FerryError::NoCapacity { .. }));
    assert_capacity_respected(&scheduler, &store).await;
}

#[tokio::test]
async fn bulk_reassign_is_all_or_nothing() {
    let store = Arc::new(MemoryStore::new());
    store.seed_session("a", 5, 1, HealthState::Healthy);
    store.seed_session("b", 5, 1, HealthState::Healthy);
    store.seed_session("s_full", 3, 1, HealthState::Healthy);
    let p1 = store.seed_pair(1, Some("a"));
    let p2 = store.seed_pair(2, Some("a"));
    let p3 = store.seed_pair(3, Some("b"));
    store.seed_pair(4, Some("s_full"));
    let scheduler = scheduler_with(store.clone(), Arc::new(ScriptedProber::new()));
    scheduler.load().await.unwrap();

    let err = scheduler
        .bulk_reassign(&[p1, p2, p3], "s_full")
        .await
        .unwrap_err();
    assert!(matches!(err, FerryError::NoCapacity { .. }));
    assert_eq!(store.pairs_on("a"), vec![p1, p2]);
    assert_eq!(store.pairs_on("b"), vec![p3]);
    assert_eq!(store.pairs_on("s_full").len(), 1);

    // Two of them fit.
    assert_eq!(scheduler.bulk_reassign(&[p1, p3], "s_full").await.unwrap(), 2);
    assert_eq!(store.pairs_on("s_full").len(), 3);
    assert_capacity_respected(&scheduler, &store).await;
}

#[tokio::test]
async fn bulk_reassign_ignores_duplicates_and_resident_pairs() {
    let store = Arc::new(MemoryStore::new());
    store.seed_session("a", 2, 1, HealthState::Healthy);
    store.seed_session("b", 2, 1, HealthState::Healthy);
    let p1 = store.seed_pair(1, Some("a"));
    let p2 = store.seed_pair(2, Some("b"));
    let scheduler = scheduler_with(store.clone(), Arc::new(ScriptedProber::new()));
    scheduler.load().await.unwrap();

    let moved = scheduler.bulk_reassign(&[p1, p1, p2], "b").await.unwrap();
    assert_eq!(moved, 1);
    assert_eq!(store.pairs_on("b"), vec![p1, p2]);
}

#[tokio::test]
async fn repeated_failures_move_every_pair_off_the_session() {
    let store = Arc::new(MemoryStore::new());
    store.seed_session("failing", 4, 10, HealthState::Healthy);
    store.seed_session("backup", 2, 1, HealthState::Healthy);
    let pairs: Vec<PairId> = (1..=4).map(|id| store.seed_pair(id, Some("failing"))).collect();

    let prober = Arc::new(ScriptedProber::new());
    prober.set_fallback("failing", ScriptedProber::transient("connection reset"));
    let scheduler = scheduler_with(store.clone(), prober);
    scheduler.load().await.unwrap();

    let mut states = Vec::new();
    for _ in 0..5 {
        states.push(scheduler.probe_health("failing").await.unwrap());
    }
    assert_eq!(states[0], HealthState::Degraded);
    assert_eq!(states[3], HealthState::Degraded);
    assert_eq!(states[4], HealthState::Unauthorized);
    assert_eq!(store.session_health("failing"), Some(HealthState::Unauthorized));

    assert!(store.pairs_on("failing").is_empty());
    assert_eq!(store.pairs_on("backup").len(), 2);
    let orphaned = scheduler.orphaned_pairs().await.unwrap();
    assert_eq!(orphaned.len(), 2);
    for pair in &orphaned {
        assert!(pair.session.is_none());
        assert!(!pair.enabled);
        assert_eq!(pair.status, PairStatus::Orphaned);
    }
    let all: BTreeSet<PairId> = store
        .pairs_on("backup")
        .into_iter()
        .chain(orphaned.iter().map(|p| p.id))
        .collect();
    assert_eq!(all, pairs.into_iter().collect());
    assert_eq!(scheduler.unauthorized_sessions(), vec!["failing".to_string()]);

    // Terminal: further probes change nothing.
    assert_eq!(
        scheduler.probe_health("failing").await.unwrap(),
        HealthState::Unauthorized
    );
}

#[tokio::test]
async fn permanent_failure_on_first_probe_is_unauthorized() {
    let store = Arc::new(MemoryStore::new());
    let prober = Arc::new(ScriptedProber::new());
    prober.push(
        "s1",
        [ProbeOutcome::PermanentFailure {
            reason: "session revoked".into(),
        }],
    );
    let scheduler = scheduler_with(store.clone(), prober);
    scheduler.register_session("s1", Some(3), None).await.unwrap();

    assert_eq!(
        scheduler.probe_health("s1").await.unwrap(),
        HealthState::Unauthorized
    );
}

#[tokio::test]
async fn degraded_sessions_recover_and_keep_their_pairs() {
    let store = Arc::new(MemoryStore::new());
    store.seed_session("s1", 2, 1, HealthState::Healthy);
    let pair = store.seed_pair(1, Some("s1"));
    let prober = Arc::new(ScriptedProber::new());
    prober.push("s1", [ScriptedProber::transient("flood wait"), ProbeOutcome::Ok]);
    let scheduler = scheduler_with(store.clone(), prober);
    scheduler.load().await.unwrap();

    assert_eq!(scheduler.probe_health("s1").await.unwrap(), HealthState::Degraded);
    let resolution = scheduler.resolve_pair(pair).await.unwrap();
    assert!(matches!(
        resolution.deliverable_session(),
        Err(FerryError::SessionUnavailable { .. })
    ));

    assert_eq!(scheduler.probe_health("s1").await.unwrap(), HealthState::Healthy);
    assert_eq!(store.pairs_on("s1"), vec![pair]);
    let status = scheduler.session_status("s1").await.unwrap();
    assert_eq!(status.consecutive_failures, 0);
}

#[tokio::test]
async fn orphaned_pairs_can_be_rescued_once_capacity_returns() {
    let store = Arc::new(MemoryStore::new());
    store.seed_session("s1", 1, 1, HealthState::Healthy);
    let pair = store.seed_pair(1, Some("s1"));
    let scheduler = scheduler_with(store.clone(), Arc::new(ScriptedProber::new()));
    scheduler.load().await.unwrap();

    let report = scheduler.delete_session("s1", true).await.unwrap();
    assert_eq!(report.orphaned, vec![pair]);

    scheduler.register_session("s2", Some(1), None).await.unwrap();
    scheduler.probe_health("s2").await.unwrap();
    assert_eq!(scheduler.assign_pair(pair).await.unwrap(), "s2");

    let rescued = store.pair(pair).unwrap();
    assert!(rescued.enabled);
    assert_eq!(rescued.status, PairStatus::Active);
    assert!(scheduler.orphaned_pairs().await.unwrap().is_empty());
}

#[tokio::test]
async fn load_moves_pairs_stranded_on_an_unauthorized_session() {
    let store = Arc::new(MemoryStore::new());
    store.seed_session("revoked", 3, 5, HealthState::Unauthorized);
    store.seed_session("spare", 1, 1, HealthState::Healthy);
    let pairs: Vec<PairId> = (1..=2).map(|id| store.seed_pair(id, Some("revoked"))).collect();
    let scheduler = scheduler_with(store.clone(), Arc::new(ScriptedProber::new()));

    scheduler.load().await.unwrap();

    assert!(store.pairs_on("revoked").is_empty());
    assert_eq!(store.pairs_on("spare").len(), 1);
    let orphaned = scheduler.orphaned_pairs().await.unwrap();
    assert_eq!(orphaned.len(), 1);
    let all: BTreeSet<PairId> = store
        .pairs_on("spare")
        .into_iter()
        .chain(orphaned.iter().map(|p| p.id))
        .collect();
    assert_eq!(all, pairs.into_iter().collect());
    assert_eq!(scheduler.unauthorized_sessions(), vec!["revoked".to_string()]);
    assert!(scheduler.session_status("revoked").await.unwrap().groups.is_empty());
}

#[tokio::test(start_paused = true)]
async fn deleting_mid_health_check_keeps_the_session_removed() {
    let store = Arc::new(MemoryStore::new());
    store.seed_session("s1", 3, 1, HealthState::Healthy);
    let prober = Arc::new(ScriptedProber::new());
    prober.hang("s1");
    let scheduler = scheduler_with(store.clone(), prober.clone());
    scheduler.load().await.unwrap();

    let probing = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.probe_health("s1").await }
    });
    while prober.calls().is_empty() {
        tokio::task::yield_now().await;
    }

    scheduler.delete_session("s1", true).await.unwrap();
    assert_eq!(probing.await.unwrap().unwrap(), HealthState::Degraded);
    assert_eq!(store.session_health("s1"), Some(HealthState::Removed));
    assert!(scheduler.health_of("s1").is_none());

    scheduler.load().await.unwrap();
    assert!(scheduler.health_of("s1").is_none());
    assert!(scheduler.sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn distribution_counts_every_session() {
    let store = Arc::new(MemoryStore::new());
    store.seed_session("s1", 3, 1, HealthState::Healthy);
    store.seed_session("s2", 3, 1, HealthState::Healthy);
    store.seed_pair(1, Some("s1"));
    store.seed_pair(2, Some("s1"));
    let scheduler = scheduler_with(store.clone(), Arc::new(ScriptedProber::new()));
    scheduler.load().await.unwrap();

    let distribution = scheduler.distribution().await.unwrap();
    assert_eq!(distribution.get("s1"), Some(&2));
    assert_eq!(distribution.get("s2"), Some(&0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_assignments_never_overfill_a_session() {
    let store = Arc::new(MemoryStore::new());
    store.seed_session("only", 3, 1, HealthState::Healthy);
    let scheduler = scheduler_with(store.clone(), Arc::new(ScriptedProber::new()));
    scheduler.load().await.unwrap();

    let mut handles = Vec::new();
    for id in 1..=12 {
        let pair = store.seed_pair(id, None);
        let scheduler = scheduler.clone();
        handles.push(tokio::spawn(async move { scheduler.assign_pair(pair).await }));
    }

    let mut won = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(FerryError::NoCapacity { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(won, 3);
    assert_eq!(store.pairs_on("only").len(), 3);
    assert_capacity_respected(&scheduler, &store).await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn capacity_holds_for_any_session_mix(
        capacities in prop::collection::vec(1u32..5, 1..4),
        priorities in prop::collection::vec(0i32..3, 4),
        pair_count in 1i64..20,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let store = Arc::new(MemoryStore::new());
            for (i, capacity) in capacities.iter().enumerate() {
                store.seed_session(&format!("s{i}"), *capacity, priorities[i], HealthState::Healthy);
            }
            let scheduler = scheduler_with(store.clone(), Arc::new(ScriptedProber::new()));
            scheduler.load().await.unwrap();

            let mut handles = Vec::new();
            for id in 1..=pair_count {
                let pair = store.seed_pair(id, None);
                let scheduler = scheduler.clone();
                handles.push(tokio::spawn(async move { scheduler.assign_pair(pair).await }));
            }
            let mut won = 0u32;
            for handle in handles {
                if handle.await.unwrap().is_ok() {
                    won += 1;
                }
            }

            let total: u32 = capacities.iter().sum();
            assert_eq!(won, total.min(pair_count as u32));
            assert_capacity_respected(&scheduler, &store).await;
        });
    }
}

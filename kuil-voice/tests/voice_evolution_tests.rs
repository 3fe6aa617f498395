//! Voice-signature evolution tests against an in-memory database

mod helpers;

use chrono::{Duration as ChronoDuration, Utc};
use helpers::{analysis, create_user, publish_posts, test_settings, test_state, FakeGateway};
use kuil_common::events::KuilEvent;
use kuil_voice::config::RuntimeSettings;
use kuil_voice::models::{EvolutionPhase, TriggerReason};
use kuil_voice::services::{
    CheckRequest, EvolutionOutcome, EvolutionScheduler, GatewayError,
};
use kuil_voice::utils::timestamps::to_db;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_no_posts_means_nothing_to_analyze() {
    let gateway = FakeGateway::new();
    let state = test_state(Arc::clone(&gateway), test_settings()).await;
    let user_id = create_user(&state.db).await;

    let outcome = state
        .evolution
        .check(user_id, CheckRequest::Scheduled)
        .await
        .unwrap();
    assert!(matches!(outcome, EvolutionOutcome::NothingToAnalyze));
    assert_eq!(gateway.analyze_calls(), 0);
    assert!(state.evolution.current_signature(user_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_initial_then_threshold_evolution() {
    let gateway = FakeGateway::new();
    let state = test_state(Arc::clone(&gateway), test_settings()).await;
    let user_id = create_user(&state.db).await;

    publish_posts(&state.evolution, user_id, 1).await;
    let first = match state
        .evolution
        .check(user_id, CheckRequest::Scheduled)
        .await
        .unwrap()
    {
        EvolutionOutcome::Evolved { snapshot } => snapshot,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(first.trigger_reason, TriggerReason::Initial);
    assert!(first.deltas.is_none());
    assert_eq!(first.analyzed_post_count, 1);

    let evolution_state = state.evolution.evolution_state(user_id).await.unwrap();
    assert_eq!(evolution_state.posts_since_last_evolution, 0);
    assert_eq!(
        evolution_state.last_evolved_at.map(|t| to_db(&t)),
        Some(to_db(&first.created_at))
    );

    // One short of the threshold
    publish_posts(&state.evolution, user_id, 9).await;
    let outcome = state
        .evolution
        .check(user_id, CheckRequest::Scheduled)
        .await
        .unwrap();
    assert!(matches!(outcome, EvolutionOutcome::NotDue));

    gateway.set_analysis(Ok(analysis(7.0, "bold", 0.9)));
    let recorded = state
        .evolution
        .record_post(user_id, helpers::post("Tenth post since the last snapshot", None))
        .await
        .unwrap();
    assert_eq!(recorded.posts_since_last_evolution, 10);
    assert!(recorded.evolution_due);

    let second = match state
        .evolution
        .check(user_id, CheckRequest::Scheduled)
        .await
        .unwrap()
    {
        EvolutionOutcome::Evolved { snapshot } => snapshot,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(second.trigger_reason, TriggerReason::Threshold);
    assert_eq!(second.primary_tone, "bold");
    assert_eq!(second.analyzed_post_count, 10);
    let deltas = second.deltas.expect("deltas against the first snapshot");
    assert!((deltas.formal - 2.0).abs() < 1e-9);
    assert!((deltas.brevity - 2.0).abs() < 1e-9);

    let history = state.evolution.history(user_id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].snapshot_id, second.snapshot_id);
    assert_eq!(history[1].snapshot_id, first.snapshot_id);
}

#[tokio::test]
async fn test_gateway_timeout_defers_without_changes() {
    let gateway = FakeGateway::new();
    gateway.set_analysis_delay(Some(Duration::from_secs(1)));
    let settings = RuntimeSettings {
        llm_timeout: Duration::from_millis(100),
        ..test_settings()
    };
    let state = test_state(Arc::clone(&gateway), settings).await;
    let user_id = create_user(&state.db).await;
    publish_posts(&state.evolution, user_id, 3).await;

    let outcome = state
        .evolution
        .check(user_id, CheckRequest::Scheduled)
        .await
        .unwrap();
    assert!(matches!(outcome, EvolutionOutcome::Deferred { .. }));

    assert!(state.evolution.current_signature(user_id).await.unwrap().is_none());
    let evolution_state = state.evolution.evolution_state(user_id).await.unwrap();
    assert_eq!(evolution_state.posts_since_last_evolution, 3);
    assert!(evolution_state.last_evolved_at.is_none());
    assert_eq!(state.evolution.phase(user_id), EvolutionPhase::Idle);
}

#[tokio::test]
async fn test_gateway_error_emits_deferred_event() {
    let gateway = FakeGateway::new();
    gateway.set_analysis(Err(GatewayError::Api(500, "upstream broke".to_string())));
    let state = test_state(Arc::clone(&gateway), test_settings()).await;
    let user_id = create_user(&state.db).await;
    publish_posts(&state.evolution, user_id, 2).await;

    let mut events = state.event_bus.subscribe();
    let outcome = state
        .evolution
        .check(user_id, CheckRequest::Manual)
        .await
        .unwrap();
    match outcome {
        EvolutionOutcome::Deferred { reason } => assert!(reason.contains("upstream broke")),
        other => panic!("unexpected outcome {:?}", other),
    }

    match events.try_recv().unwrap() {
        KuilEvent::VoiceEvolutionDeferred {
            user_id: event_user,
            ..
        } => assert_eq!(event_user, user_id),
        other => panic!("unexpected event {:?}", other),
    }

    // Next attempt succeeds once the gateway recovers
    gateway.set_analysis(Ok(analysis(4.0, "warm", 0.7)));
    let retried = state
        .evolution
        .check(user_id, CheckRequest::Scheduled)
        .await
        .unwrap();
    assert!(matches!(retried, EvolutionOutcome::Evolved { .. }));
}

#[tokio::test]
async fn test_concurrent_check_is_already_in_flight() {
    let gateway = FakeGateway::new();
    gateway.hold_analysis();
    let state = test_state(Arc::clone(&gateway), test_settings()).await;
    let user_id = create_user(&state.db).await;
    publish_posts(&state.evolution, user_id, 2).await;

    let evolution = Arc::clone(&state.evolution);
    let first = tokio::spawn(async move { evolution.check(user_id, CheckRequest::Manual).await });

    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while state.evolution.phase(user_id) != EvolutionPhase::Analyzing {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "first check never reached analysis");

    let second = state
        .evolution
        .check(user_id, CheckRequest::Manual)
        .await
        .unwrap();
    assert!(matches!(second, EvolutionOutcome::AlreadyInFlight));

    gateway.release_analysis();
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, EvolutionOutcome::Evolved { .. }));
    assert_eq!(gateway.analyze_calls(), 1);
    assert_eq!(state.evolution.phase(user_id), EvolutionPhase::Idle);

    let history = state.evolution.history(user_id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_manual_check_ignores_counter() {
    let state = test_state(FakeGateway::new(), test_settings()).await;
    let user_id = create_user(&state.db).await;
    publish_posts(&state.evolution, user_id, 1).await;

    state
        .evolution
        .check(user_id, CheckRequest::Scheduled)
        .await
        .unwrap();
    assert_eq!(
        state
            .evolution
            .evolution_state(user_id)
            .await
            .unwrap()
            .posts_since_last_evolution,
        0
    );

    let outcome = state
        .evolution
        .check(user_id, CheckRequest::Manual)
        .await
        .unwrap();
    match outcome {
        EvolutionOutcome::Evolved { snapshot } => {
            assert_eq!(snapshot.trigger_reason, TriggerReason::Manual);
            assert!(snapshot.deltas.is_some());
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_analysis_values_are_clamped() {
    let gateway = FakeGateway::new();
    let mut reply = analysis(5.0, "  ", 1.7);
    reply.dimensions.formal = 14.0;
    reply.dimensions.bold = -3.0;
    gateway.set_analysis(Ok(reply));
    let state = test_state(Arc::clone(&gateway), test_settings()).await;
    let user_id = create_user(&state.db).await;
    publish_posts(&state.evolution, user_id, 1).await;

    let snapshot = match state
        .evolution
        .check(user_id, CheckRequest::Calibration)
        .await
        .unwrap()
    {
        EvolutionOutcome::Evolved { snapshot } => snapshot,
        other => panic!("unexpected outcome {:?}", other),
    };

    assert_eq!(snapshot.trigger_reason, TriggerReason::Calibration);
    assert_eq!(snapshot.dimensions.formal, 10.0);
    assert_eq!(snapshot.dimensions.bold, 0.0);
    assert_eq!(snapshot.dimensions.empathetic, 5.0);
    assert_eq!(snapshot.confidence, 1.0);
    assert_eq!(snapshot.primary_tone, "unknown");

    let stored = state.evolution.current_signature(user_id).await.unwrap().unwrap();
    assert_eq!(stored.dimensions, snapshot.dimensions);
}

#[tokio::test]
async fn test_periodic_trigger_after_elapsed_period() {
    let state = test_state(FakeGateway::new(), test_settings()).await;
    let user_id = create_user(&state.db).await;
    publish_posts(&state.evolution, user_id, 1).await;
    state
        .evolution
        .check(user_id, CheckRequest::Scheduled)
        .await
        .unwrap();

    publish_posts(&state.evolution, user_id, 1).await;
    let outcome = state
        .evolution
        .check(user_id, CheckRequest::Scheduled)
        .await
        .unwrap();
    assert!(matches!(outcome, EvolutionOutcome::NotDue));

    let long_ago = Utc::now() - ChronoDuration::days(40);
    sqlx::query("UPDATE voice_evolution_state SET last_evolved_at = ? WHERE user_id = ?")
        .bind(to_db(&long_ago))
        .bind(user_id.to_string())
        .execute(&state.db)
        .await
        .unwrap();

    match state
        .evolution
        .check(user_id, CheckRequest::Scheduled)
        .await
        .unwrap()
    {
        EvolutionOutcome::Evolved { snapshot } => {
            assert_eq!(snapshot.trigger_reason, TriggerReason::Periodic)
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_scheduler_cycle_checks_every_user() {
    let state = test_state(FakeGateway::new(), test_settings()).await;
    let active = create_user(&state.db).await;
    let _idle = create_user(&state.db).await;
    publish_posts(&state.evolution, active, 2).await;

    let scheduler = EvolutionScheduler::new(
        state.db.clone(),
        Arc::clone(&state.evolution),
        Duration::from_secs(3600),
    );

    let summary = scheduler.run_cycle().await;
    assert_eq!(summary.users, 2);
    assert_eq!(summary.evolved, 1);
    assert_eq!(summary.deferred, 0);
    assert_eq!(summary.failed, 0);

    // Nothing new since the first snapshot
    let again = scheduler.run_cycle().await;
    assert_eq!(again.evolved, 0);
}

async fn wait_for_analysis(evolution: &kuil_voice::services::VoiceEvolution, user_id: uuid::Uuid) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while evolution.phase(user_id) != EvolutionPhase::Analyzing {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "check never reached analysis");
}

#[tokio::test]
async fn test_posts_recorded_during_analysis_stay_counted() {
    let gateway = FakeGateway::new();
    gateway.hold_analysis();
    let state = test_state(Arc::clone(&gateway), test_settings()).await;
    let user_id = create_user(&state.db).await;
    publish_posts(&state.evolution, user_id, 2).await;

    let evolution = Arc::clone(&state.evolution);
    let running = tokio::spawn(async move { evolution.check(user_id, CheckRequest::Manual).await });
    wait_for_analysis(&state.evolution, user_id).await;

    publish_posts(&state.evolution, user_id, 3).await;
    gateway.release_analysis();

    let snapshot = match running.await.unwrap().unwrap() {
        EvolutionOutcome::Evolved { snapshot } => snapshot,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(snapshot.analyzed_post_count, 2);

    let evolution_state = state.evolution.evolution_state(user_id).await.unwrap();
    assert_eq!(evolution_state.posts_since_last_evolution, 3);
}

#[tokio::test]
async fn test_scheduler_skips_user_already_in_flight() {
    let gateway = FakeGateway::new();
    gateway.hold_analysis();
    let state = test_state(Arc::clone(&gateway), test_settings()).await;
    let user_id = create_user(&state.db).await;
    publish_posts(&state.evolution, user_id, 2).await;

    let evolution = Arc::clone(&state.evolution);
    let manual = tokio::spawn(async move { evolution.check(user_id, CheckRequest::Manual).await });
    wait_for_analysis(&state.evolution, user_id).await;

    let scheduler = EvolutionScheduler::new(
        state.db.clone(),
        Arc::clone(&state.evolution),
        Duration::from_secs(3600),
    );
    let summary = scheduler.run_cycle().await;
    assert_eq!(summary.users, 1);
    assert_eq!(summary.in_flight, 1);
    assert_eq!(summary.evolved, 0);
    assert_eq!(gateway.analyze_calls(), 1);

    gateway.release_analysis();
    assert!(matches!(
        manual.await.unwrap().unwrap(),
        EvolutionOutcome::Evolved { .. }
    ));
    assert_eq!(gateway.analyze_calls(), 1);
}

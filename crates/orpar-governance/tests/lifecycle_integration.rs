//! Background reclamation: the sweep timer and the lifecycle-event subscription.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use orpar_core::{OrparPhase, PartialProfile};
use orpar_governance::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn request(engine: &ParameterGovernanceEngine, task_id: Option<&str>, scope: OverrideScope) {
    engine
        .request_override(
            "agent-1",
            "chan-1",
            task_id,
            OrparPhase::Reflection,
            OverrideRequest::new(
                PartialProfile::default().with_temperature(0.1),
                "lifecycle test",
                scope,
            ),
        )
        .unwrap();
}

/// Polls `condition` until it holds or a second has passed.
async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn live_overrides(engine: &ParameterGovernanceEngine) -> usize {
    engine.active_overrides("agent-1", "chan-1").len()
}

#[tokio::test]
async fn lifecycle_events_reclaim_overrides() {
    let engine = Arc::new(ParameterGovernanceEngine::default());
    let bus = LifecycleBus::new(16);
    let manager = LifecycleManager::start(Arc::clone(&engine), &bus);

    request(&engine, Some("t1"), OverrideScope::Task);
    request(&engine, None, OverrideScope::CurrentPhase);
    request(&engine, None, OverrideScope::Session);
    assert_eq!(live_overrides(&engine), 3);

    bus.publish(LifecycleEvent::TaskCompleted(TaskCompleted {
        task_id: "t1".into(),
    }));
    assert!(wait_until(|| live_overrides(&engine) == 2).await);

    assert!(bus.publish_payload(
        "phase_completed",
        &json!({"agent_id": "agent-1", "channel_id": "chan-1", "phase": "reflection"}),
    ));
    assert!(wait_until(|| live_overrides(&engine) == 1).await);

    // Malformed payloads never reach the engine.
    assert!(!bus.publish_payload("agent_disconnected", &json!({"agent": "agent-1"})));
    bus.publish(LifecycleEvent::AgentDisconnected(AgentDisconnected {
        agent_id: "agent-1".into(),
    }));
    assert!(wait_until(|| live_overrides(&engine) == 0).await);

    manager.shutdown().await;
}

#[tokio::test]
async fn periodic_sweep_drops_consumed_overrides() {
    let engine = Arc::new(ParameterGovernanceEngine::default());
    let bus = LifecycleBus::default();
    let manager =
        LifecycleManager::start_with_interval(Arc::clone(&engine), &bus, Duration::from_millis(20));

    request(&engine, None, OverrideScope::NextCall);
    engine.resolve(&ParameterResolutionContext::new(
        "agent-1",
        "chan-1",
        OrparPhase::Reflection,
    ));
    assert_eq!(engine.stats().active_overrides, 0);
    assert!(wait_until(|| engine.stats().stored_overrides == 0).await);

    manager.shutdown().await;
}

#[tokio::test]
async fn shutdown_detaches_and_clears_state() {
    let engine = Arc::new(ParameterGovernanceEngine::default());
    let bus = LifecycleBus::default();

    for _ in 0..2 {
        let manager = LifecycleManager::start(Arc::clone(&engine), &bus);
        assert_eq!(bus.subscriber_count(), 1);
        request(&engine, None, OverrideScope::Session);
        manager.shutdown().await;

        assert_eq!(bus.subscriber_count(), 0);
        let stats = engine.stats();
        assert_eq!(stats.active_overrides, 0);
        assert_eq!(stats.request_trackers, 0);
    }
}

#[tokio::test]
async fn dropping_the_manager_stops_listening() {
    let engine = Arc::new(ParameterGovernanceEngine::default());
    let bus = LifecycleBus::default();
    let manager = LifecycleManager::start(Arc::clone(&engine), &bus);
    drop(manager);
    assert!(wait_until(|| bus.subscriber_count() == 0).await);
}

#[tokio::test]
async fn configured_governance_survives_restart() {
    let mut config = GovernanceEngineConfig::default();
    config.governance.agents.insert(
        "planner".into(),
        GovernanceConfig {
            allowed_models: Some(vec!["claude-3-5-haiku-20241022".into()]),
            ..Default::default()
        },
    );
    let engine = Arc::new(ParameterGovernanceEngine::new(config));
    let bus = LifecycleBus::default();

    let ask_for_opus = || {
        engine
            .request_override(
                "planner",
                "chan-1",
                None,
                OrparPhase::Planning,
                OverrideRequest::new(
                    PartialProfile::default().with_model("claude-opus-4-20250514"),
                    "needs a stronger model",
                    OverrideScope::NextCall,
                ),
            )
            .unwrap()
    };

    let before = ask_for_opus();
    assert_eq!(before.status, OverrideStatus::Modified);
    assert_eq!(before.active_params.model, "claude-3-5-haiku-20241022");

    for _ in 0..2 {
        let manager = LifecycleManager::start(Arc::clone(&engine), &bus);
        manager.shutdown().await;
    }

    let after = ask_for_opus();
    assert_eq!(after.status, OverrideStatus::Modified);
    assert_eq!(after.active_params.model, "claude-3-5-haiku-20241022");
    assert!(engine
        .governance_config(&GovernanceScope::Agent("planner".into()))
        .is_some());
}

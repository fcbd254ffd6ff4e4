use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use switchyard_application::{ServiceContext, StateCoordinator};
use switchyard_core::SwitchyardConfig;
use switchyard_core::session::{ConversationTurn, TurnRole};
use switchyard_core::state::{Contribution, StateKind, StateWrite, Tier};
use switchyard_infrastructure::{
    DirDurableStore, InMemoryDurableStore, InMemoryFastStore, InMemoryRegistry,
};
use tempfile::TempDir;

struct Tiers {
    coordinator: StateCoordinator,
    fast: Arc<InMemoryFastStore>,
}

fn tiers() -> Tiers {
    let fast = Arc::new(InMemoryFastStore::new());
    let coordinator = StateCoordinator::new(
        fast.clone(),
        Arc::new(InMemoryDurableStore::new()),
        &SwitchyardConfig::default(),
    );
    Tiers { coordinator, fast }
}

fn wizard_step(id: &str, ttl: Duration) -> StateWrite {
    StateWrite::new(
        id,
        StateKind::Ephemeral,
        json!({"wizard": "upload", "step": 2}),
        Contribution::component("experience").orchestrator("ContentOrchestrator"),
    )
    .owned_by("sess-1")
    .with_ttl(ttl)
    .promotable(true)
}

#[tokio::test(start_paused = true)]
async fn test_expired_object_is_rematerialized_unchanged() {
    let t = tiers();
    t.coordinator
        .put(wizard_step("wizard-1", Duration::from_secs(10)))
        .await
        .expect("Should write");
    let enriched = t
        .coordinator
        .update(
            "wizard-1",
            &Contribution::component("content").via("FileParser"),
            None,
            |payload| {
                payload["parsed"] = json!(true);
                Ok(())
            },
        )
        .await
        .expect("Should update");
    assert_eq!(enriched.tier, Tier::Fast);

    // Fast-tier copy expires
    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(t.fast.is_empty());

    let read = t
        .coordinator
        .get("wizard-1")
        .await
        .expect("Should read")
        .expect("Durable copy should exist");
    assert_eq!(read.provenance, enriched.provenance);
    assert_eq!(read.provenance.enabling_services_chain, vec!["FileParser"]);
    assert_eq!(read.payload["parsed"], true);

    // Re-materialized on the fast tier
    assert_eq!(t.fast.len(), 1);
    let again = t.coordinator.get("wizard-1").await.unwrap().unwrap();
    assert_eq!(again.provenance, enriched.provenance);
    assert_eq!(t.coordinator.stats().promotions, 1);
    assert_eq!(t.coordinator.stats().fast_hits, 1);
}

#[tokio::test]
async fn test_large_payload_goes_durable() {
    let t = tiers();
    let big = "x".repeat(70 * 1024);
    let write = StateWrite::new(
        "upload-buffer",
        StateKind::Ephemeral,
        json!({"data": big}),
        Contribution::component("content"),
    )
    .owned_by("sess-1")
    .with_ttl(Duration::from_secs(60));

    let stored = t.coordinator.put(write).await.expect("Should write");
    assert_eq!(stored.tier, Tier::Durable);
    assert!(t.fast.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sessions_survive_fast_tier_outage() {
    let fast = Arc::new(InMemoryFastStore::new());
    let durable = Arc::new(InMemoryDurableStore::new());
    let ctx = ServiceContext::new(
        SwitchyardConfig::default(),
        Arc::new(InMemoryRegistry::new()),
        fast.clone(),
        durable.clone(),
    )
    .expect("Should build context");

    fast.faults().set_available(false);
    let session = ctx
        .sessions()
        .create_session("user-1", None)
        .await
        .expect("Degraded create should succeed");
    let loaded = ctx
        .sessions()
        .get_session(&session.session_id)
        .await
        .expect("Degraded read should succeed");
    assert_eq!(loaded.session_id, session.session_id);
    assert_eq!(ctx.coordinator().stats().degraded_writes, 1);

    // Durable tier down as well: fail loudly
    durable.faults().set_available(false);
    let err = ctx.sessions().create_session("user-2", None).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_transcripts_persist_across_restart() {
    let temp_dir = TempDir::new().unwrap();

    let session_id = {
        let ctx = ServiceContext::new(
            SwitchyardConfig::default(),
            Arc::new(InMemoryRegistry::new()),
            Arc::new(InMemoryFastStore::new()),
            Arc::new(DirDurableStore::new(temp_dir.path())),
        )
        .expect("Should build context");
        let session = ctx.sessions().create_session("user-1", None).await.unwrap();
        ctx.sessions()
            .attach_conversation(&session.session_id, "guide-chat", "GuideAgent")
            .await
            .unwrap();
        ctx.conversations()
            .append_turn(
                &session.session_id,
                "guide-chat",
                ConversationTurn::new(TurnRole::User, "where do I start?"),
            )
            .await
            .expect("Should append turn");
        session.session_id
    };

    // New process: empty fast tier, same durable directory
    let ctx = ServiceContext::new(
        SwitchyardConfig::default(),
        Arc::new(InMemoryRegistry::new()),
        Arc::new(InMemoryFastStore::new()),
        Arc::new(DirDurableStore::new(temp_dir.path())),
    )
    .expect("Should build context");

    let history = ctx
        .conversations()
        .history("guide-chat")
        .await
        .expect("Transcript should survive");
    assert_eq!(history.session_id, session_id);
    assert_eq!(history.turns[0].content, "where do I start?");

    // The session itself lived on the fast tier only
    assert!(
        ctx.sessions()
            .get_session(&session_id)
            .await
            .unwrap_err()
            .is_not_found()
    );
}

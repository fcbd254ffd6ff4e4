use serde_json::{Map, Value, json};
use std::time::Duration;
use switchyard_application::ServiceContext;
use switchyard_core::SwitchyardConfig;
use switchyard_core::session::{ConversationTurn, TurnRole};

fn context(idle_secs: u64) -> ServiceContext {
    let mut config = SwitchyardConfig::default();
    config.session.idle_timeout_secs = idle_secs;
    ServiceContext::in_memory(config).expect("Should build context")
}

fn partial(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_state_update_round_trip() {
    let ctx = context(1800);
    let session = ctx
        .sessions()
        .create_session("user-1", None)
        .await
        .expect("Should create session");

    ctx.sessions()
        .update_session_state(&session.session_id, partial(json!({"k": [1, 2, 3]})))
        .await
        .expect("Should update state");

    let loaded = ctx
        .sessions()
        .get_session(&session.session_id)
        .await
        .expect("Should load session");
    assert_eq!(loaded.state["k"], json!([1, 2, 3]));
}

#[tokio::test(start_paused = true)]
async fn test_touch_keeps_session_alive_and_idle_session_expires() {
    let ctx = context(60);
    let sessions = ctx.sessions();
    let session = sessions
        .create_session("user-1", None)
        .await
        .expect("Should create session");

    let mut expires_at = session.expires_at;
    for _ in 0..3 {
        tokio::time::advance(Duration::from_secs(45)).await;
        let touched = sessions
            .touch_session(&session.session_id)
            .await
            .expect("Touched session should be alive");
        assert!(touched.expires_at > expires_at);
        expires_at = touched.expires_at;
    }

    // Idle for longer than the timeout
    tokio::time::advance(Duration::from_secs(61)).await;
    let err = sessions.get_session(&session.session_id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_destroy_twice_succeeds() {
    let ctx = context(1800);
    let session = ctx
        .sessions()
        .create_session("user-1", None)
        .await
        .expect("Should create session");

    ctx.sessions()
        .destroy_session(&session.session_id)
        .await
        .expect("First destroy should succeed");
    ctx.sessions()
        .destroy_session(&session.session_id)
        .await
        .expect("Second destroy should be a no-op");
    ctx.sessions()
        .destroy_session("never-existed")
        .await
        .expect("Destroying an unknown session should be a no-op");
}

#[tokio::test]
async fn test_conversation_turns_survive_agent_restart() {
    let ctx = context(1800);
    let session = ctx
        .sessions()
        .create_session("user-1", None)
        .await
        .expect("Should create session");
    let sid = session.session_id.as_str();

    let wf = ctx
        .workflows()
        .start_workflow(sid, "ContentOrchestrator")
        .await
        .expect("Should start workflow");
    ctx.workflows()
        .attach_conversation(&wf, "content-chat", "ContentLiaison")
        .await
        .expect("Should attach conversation");

    ctx.conversations()
        .append_turn(sid, "content-chat", ConversationTurn::new(TurnRole::User, "parse this"))
        .await
        .expect("Should append user turn");
    ctx.conversations()
        .append_turn(
            sid,
            "content-chat",
            ConversationTurn::new(TurnRole::Agent, "3 pages parsed")
                .with_metadata("workflow_id", json!(wf)),
        )
        .await
        .expect("Should append agent turn");

    // A fresh reader only has the conversation key
    let history = ctx
        .conversations()
        .history("content-chat")
        .await
        .expect("Should load history");
    assert_eq!(history.turns.len(), 2);
    assert_eq!(history.workflow_id.as_deref(), Some(wf.as_str()));
    assert_eq!(history.agent_name, "ContentLiaison");

    let session = ctx.sessions().get_session(sid).await.unwrap();
    let reference = &session.conversations["content-chat"];
    assert_eq!(reference.message_count, 2);
    assert_eq!(reference.workflow_id.as_deref(), Some(wf.as_str()));
}

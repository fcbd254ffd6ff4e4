use serde_json::json;
use switchyard_application::ServiceContext;
use switchyard_core::SwitchyardConfig;
use switchyard_core::workflow::WorkflowStatus;

async fn context_with_session() -> (ServiceContext, String) {
    let ctx = ServiceContext::in_memory(SwitchyardConfig::default()).expect("Should build context");
    let session = ctx
        .sessions()
        .create_session("user-1", None)
        .await
        .expect("Should create session");
    (ctx, session.session_id)
}

#[tokio::test]
async fn test_single_delegation_workflow() {
    let (ctx, sess1) = context_with_session().await;
    let workflows = ctx.workflows();

    let wf1 = workflows
        .start_workflow(&sess1, "ContentOrchestrator")
        .await
        .expect("Should start workflow");
    workflows
        .record_delegation(&wf1, "FileParser")
        .await
        .expect("Should record delegation");
    workflows
        .complete_delegation(&wf1, "FileParser", Some(json!({"pages": 3})))
        .await
        .expect("Should complete delegation");
    workflows
        .complete_workflow(&wf1, WorkflowStatus::Completed)
        .await
        .expect("Should complete workflow");

    let state = workflows
        .get_workflow_state(&wf1)
        .await
        .expect("Should load workflow");
    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.status.to_string(), "completed");
    assert_eq!(state.session_id, sess1);
    assert!(state.delegation_chain[0].completed_at.is_some());
}

#[tokio::test]
async fn test_concurrent_delegations_complete_out_of_order() {
    let (ctx, sess1) = context_with_session().await;
    let workflows = ctx.workflows();
    let wf1 = workflows
        .start_workflow(&sess1, "InsightsOrchestrator")
        .await
        .expect("Should start workflow");

    // Fan out to two enabling services at once
    let (a, b) = tokio::join!(
        workflows.record_delegation(&wf1, "A"),
        workflows.record_delegation(&wf1, "B"),
    );
    a.expect("Should record A");
    b.expect("Should record B");

    // Complete in reverse order
    workflows
        .complete_delegation(&wf1, "B", None)
        .await
        .expect("Should complete B");
    workflows
        .complete_delegation(&wf1, "A", None)
        .await
        .expect("Should complete A");

    let state = workflows
        .get_workflow_state(&wf1)
        .await
        .expect("Should load workflow");
    assert_eq!(state.delegation_chain.len(), 2);
    assert!(state.delegation_chain.iter().all(|e| e.completed_at.is_some()));
    assert!(state.delegation_chain[0].started_at <= state.delegation_chain[1].started_at);

    let mut services: Vec<&str> = state
        .delegation_chain
        .iter()
        .map(|e| e.enabling_service_name.as_str())
        .collect();
    services.sort();
    assert_eq!(services, vec!["A", "B"]);
}

#[tokio::test]
async fn test_terminal_workflow_rejects_mutation() {
    let (ctx, sess1) = context_with_session().await;
    let workflows = ctx.workflows();

    for terminal in [WorkflowStatus::Completed, WorkflowStatus::Failed] {
        let wf = workflows
            .start_workflow(&sess1, "ContentOrchestrator")
            .await
            .expect("Should start workflow");
        workflows
            .record_delegation(&wf, "FileParser")
            .await
            .expect("Should record delegation");
        workflows
            .complete_workflow(&wf, terminal)
            .await
            .expect("Should finish workflow");
        let before = workflows
            .get_workflow_state(&wf)
            .await
            .expect("Should load workflow")
            .delegation_chain;

        let err = workflows
            .record_delegation(&wf, "DataAnalyzer")
            .await
            .unwrap_err();
        assert!(err.is_workflow_terminal(), "unexpected error: {err}");

        let err = workflows
            .complete_delegation(&wf, "FileParser", Some(json!({"late": true})))
            .await
            .unwrap_err();
        assert!(err.is_workflow_terminal(), "unexpected error: {err}");

        let err = workflows
            .attach_conversation(&wf, "conv-late", "Guide")
            .await
            .unwrap_err();
        assert!(err.is_workflow_terminal(), "unexpected error: {err}");

        let after = workflows
            .get_workflow_state(&wf)
            .await
            .expect("Should load workflow");
        assert_eq!(after.delegation_chain, before);
        assert_eq!(after.status, terminal);
    }
}

#[tokio::test]
async fn test_unknown_workflow_is_not_found() {
    let (ctx, _) = context_with_session().await;
    let err = ctx
        .workflows()
        .record_delegation("wf-missing", "FileParser")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(
        ctx.workflows()
            .get_workflow_state("wf-missing")
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn test_repeated_delegation_closes_latest_entry() {
    let (ctx, sess1) = context_with_session().await;
    let workflows = ctx.workflows();
    let wf = workflows
        .start_workflow(&sess1, "ContentOrchestrator")
        .await
        .expect("Should start workflow");

    workflows.record_delegation(&wf, "FileParser").await.unwrap();
    workflows.record_delegation(&wf, "FileParser").await.unwrap();
    let state = workflows
        .complete_delegation(&wf, "FileParser", Some(json!({"pages": 1})))
        .await
        .unwrap();

    assert!(state.delegation_chain[0].is_open());
    assert!(!state.delegation_chain[1].is_open());
    assert_eq!(state.open_delegations(), 1);
}

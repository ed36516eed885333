//! End-to-end scenarios for the step engine: the claim / complete / fail
//! protocol, the verify-each loop, retry and escalation policy, and the
//! progress bridge, all over an in-memory database and a temp state root.

use std::sync::Arc;

use antfarm_core::gateway::CronGateway;
use antfarm_core::manifest::WorkflowManifest;
use antfarm_core::models::run::{RunStatus, StepResultStatus};
use antfarm_core::models::step::StepStatus;
use antfarm_core::models::story::StoryStatus;
use antfarm_core::paths::AntfarmPaths;
use antfarm_core::state::{AppState, AppStateInner};
use antfarm_core::Database;

const VERIFY_EACH_FLOW: &str = r#"
id: feature-dev
name: Feature Development
agents:
  - id: planner
  - id: dev
  - id: verifier
  - id: shipper
steps:
  - id: plan
    agent: planner
    input: "Plan the task: {{task}}"
    expects: "STORIES_JSON with the ordered user stories"
  - id: implement
    agent: dev
    type: loop
    loop:
      verify_each: true
      verify_step: verify
    input: "Implement {{current_story_id}}: {{current_story_title}}\nFeedback: {{verify_feedback}}\nProgress: {{progress}}"
  - id: verify
    agent: verifier
    input: "Verify {{current_story_id}}\n{{current_story}}"
  - id: ship
    agent: shipper
    input: "Ship it. Done:\n{{completed_stories}}"
"#;

const TWO_STORIES: &str = r#"STATUS: done
STORIES_JSON: [
  {"id":"US-1","title":"Login form","description":"render the form","acceptanceCriteria":["form renders"]},
  {"id":"US-2","title":"Logout","description":"clear the session","acceptanceCriteria":["session cleared"]}
]"#;

fn test_state(root: &std::path::Path) -> AppState {
    let db = Database::open_in_memory().expect("in-memory db");
    let paths = AntfarmPaths::with_root(root);
    Arc::new(AppStateInner::new(db, paths, CronGateway::new(None, None)))
}

async fn install(state: &AppState, yaml: &str) {
    let spec = WorkflowManifest::from_yaml(yaml)
        .unwrap()
        .into_spec()
        .unwrap();
    state.workflow_store.install(&spec).await.unwrap();
}

async fn plan_two_stories(state: &AppState) -> String {
    let run = state
        .engine
        .start_run("feature-dev", "add auth")
        .await
        .unwrap();
    let plan = state.engine.claim("planner").await.unwrap().unwrap();
    assert_eq!(plan.step_id, "plan");
    state
        .engine
        .complete(&plan.step_instance_id, TWO_STORIES)
        .await
        .unwrap();
    run.id
}

#[tokio::test]
async fn test_happy_loop() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, VERIFY_EACH_FLOW).await;
    let run_id = plan_two_stories(&state).await;

    for expected in ["US-1", "US-2"] {
        let work = state.engine.claim("dev").await.unwrap().unwrap();
        assert_eq!(work.step_id, "implement");
        assert!(work.input.starts_with(&format!("Implement {expected}")));
        state
            .engine
            .complete(&work.step_instance_id, "built it\nSTATUS: done")
            .await
            .unwrap();

        let check = state.engine.claim("verifier").await.unwrap().unwrap();
        assert_eq!(check.step_id, "verify");
        assert!(check.input.starts_with(&format!("Verify {expected}")));
        state
            .engine
            .complete(&check.step_instance_id, "STATUS: done")
            .await
            .unwrap();
    }

    let detail = state.run_store.get_detail(&run_id).await.unwrap().unwrap();
    assert_eq!(detail.run.status, RunStatus::Running);
    assert!(detail.stories.iter().all(|s| s.status == StoryStatus::Done));

    let by_id = |id: &str| detail.steps.iter().find(|s| s.step_id == id).unwrap();
    assert_eq!(by_id("implement").status, StepStatus::Done);
    assert_eq!(by_id("verify").status, StepStatus::Done);
    assert_eq!(by_id("ship").status, StepStatus::Pending);

    // the ship prompt sees the completed story summary
    let ship = state.engine.claim("shipper").await.unwrap().unwrap();
    assert!(ship.input.contains("- US-1: Login form"));
    assert!(ship.input.contains("- US-2: Logout"));

    // re-completing the done loop step is a no-op that hands back the
    // terminal result its verifier recorded
    let implement = by_id("implement");
    let rec = state
        .engine
        .complete(&implement.id, "late duplicate report")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.step_id, "verify");
    assert_eq!(rec.status, StepResultStatus::Done);
}

#[tokio::test]
async fn test_verify_retry_feeds_back() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, VERIFY_EACH_FLOW).await;
    let run_id = plan_two_stories(&state).await;

    let work = state.engine.claim("dev").await.unwrap().unwrap();
    state
        .engine
        .complete(&work.step_instance_id, "built it")
        .await
        .unwrap();

    let check = state.engine.claim("verifier").await.unwrap().unwrap();
    state
        .engine
        .complete(&check.step_instance_id, "STATUS: retry\nISSUES: no tests")
        .await
        .unwrap();

    // the same story comes back with the verifier's feedback rendered in
    let redo = state.engine.claim("dev").await.unwrap().unwrap();
    assert!(redo.input.starts_with("Implement US-1"));
    assert!(redo.input.contains("Feedback: no tests"));

    let stories = state.story_store.list(&run_id).await.unwrap();
    let us1 = stories.iter().find(|s| s.story_id == "US-1").unwrap();
    assert_eq!(us1.retry_count, 1);
    assert_eq!(us1.status, StoryStatus::Running);
}

#[tokio::test]
async fn test_verify_retry_exhaustion_blocks_run() {
    let flow = VERIFY_EACH_FLOW.replace(
        "    input: \"Implement {{current_story_id}}",
        "    max_retries: 1\n    input: \"Implement {{current_story_id}}",
    );
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, &flow).await;
    let run_id = plan_two_stories(&state).await;

    for round in 0..2 {
        let work = state.engine.claim("dev").await.unwrap().unwrap();
        assert!(work.input.starts_with("Implement US-1"), "round {round}");
        state
            .engine
            .complete(&work.step_instance_id, "built it")
            .await
            .unwrap();
        let check = state.engine.claim("verifier").await.unwrap().unwrap();
        state
            .engine
            .complete(&check.step_instance_id, "STATUS: retry\nISSUES: still broken")
            .await
            .unwrap();
    }

    let detail = state.run_store.get_detail(&run_id).await.unwrap().unwrap();
    assert_eq!(detail.run.status, RunStatus::Blocked);
    let us1 = detail.stories.iter().find(|s| s.story_id == "US-1").unwrap();
    assert_eq!(us1.status, StoryStatus::Failed);
    assert_eq!(us1.retry_count, 1);
    let implement = detail.steps.iter().find(|s| s.step_id == "implement").unwrap();
    assert_eq!(implement.status, StepStatus::Failed);

    // nothing is claimable on a blocked run
    assert!(state.engine.claim("dev").await.unwrap().is_none());
}

#[tokio::test]
async fn test_verify_blocked_then_resume() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, VERIFY_EACH_FLOW).await;
    let run_id = plan_two_stories(&state).await;

    let work = state.engine.claim("dev").await.unwrap().unwrap();
    state
        .engine
        .complete(&work.step_instance_id, "built it")
        .await
        .unwrap();
    let check = state.engine.claim("verifier").await.unwrap().unwrap();
    let rec = state
        .engine
        .complete(&check.step_instance_id, "STATUS: blocked")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.status, StepResultStatus::Blocked);

    let detail = state.run_store.get_detail(&run_id).await.unwrap().unwrap();
    assert_eq!(detail.run.status, RunStatus::Blocked);
    let by_id = |id: &str| detail.steps.iter().find(|s| s.step_id == id).unwrap();
    // the verification is re-armed; the loop step keeps holding the story
    assert_eq!(by_id("verify").status, StepStatus::Pending);
    assert_eq!(by_id("implement").status, StepStatus::Running);
    assert_eq!(by_id("implement").current_story_id.as_deref(), Some("US-1"));

    // nothing claimable while blocked
    assert!(state.engine.claim("verifier").await.unwrap().is_none());

    // after the external unblock, verification resumes on the same story
    state.engine.resume_run(&run_id).await.unwrap();
    let check = state.engine.claim("verifier").await.unwrap().unwrap();
    assert!(check.input.starts_with("Verify US-1"));
    state
        .engine
        .complete(&check.step_instance_id, "STATUS: done")
        .await
        .unwrap();

    let next = state.engine.claim("dev").await.unwrap().unwrap();
    assert!(next.input.starts_with("Implement US-2"));
}

#[tokio::test]
async fn test_declared_workspace_override_drives_progress() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    let custom = tmp.path().join("team-dev-workspace");
    let flow = VERIFY_EACH_FLOW.replace(
        "  - id: dev",
        &format!("  - id: dev\n    workspace: \"{}\"", custom.display()),
    );
    install(&state, &flow).await;
    plan_two_stories(&state).await;

    std::fs::create_dir_all(&custom).unwrap();
    std::fs::write(custom.join("progress.txt"), "from the override").unwrap();

    // the bridge reads from the declared workspace, not the default path
    let work = state.engine.claim("dev").await.unwrap().unwrap();
    assert!(work.input.contains("Progress: from the override"));
    assert!(!state
        .paths
        .agent_workspace("feature-dev", "dev")
        .join("progress.txt")
        .exists());
}

const REWIND_FLOW: &str = r#"
id: rewind-flow
name: Rewind Flow
agents:
  - id: planner
  - id: dev
steps:
  - id: plan
    agent: planner
    input: "Plan: {{task}}"
  - id: implement
    agent: dev
    type: loop
    loop: {}
    input: "Implement {{current_story_id}}"
    max_retries: 0
    on_fail:
      retry_step: plan
"#;

#[tokio::test]
async fn test_rewind_resets_steps_and_keeps_stories() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, REWIND_FLOW).await;
    let run = state
        .engine
        .start_run("rewind-flow", "add auth")
        .await
        .unwrap();

    let plan = state.engine.claim("planner").await.unwrap().unwrap();
    state
        .engine
        .complete(&plan.step_instance_id, TWO_STORIES)
        .await
        .unwrap();

    let work = state.engine.claim("dev").await.unwrap().unwrap();
    // retry budget is zero: the first failure exhausts the story
    state
        .engine
        .fail(&work.step_instance_id, "compiler exploded")
        .await
        .unwrap();

    let detail = state.run_store.get_detail(&run.id).await.unwrap().unwrap();
    assert_eq!(detail.run.status, RunStatus::Running);
    let by_id = |id: &str| detail.steps.iter().find(|s| s.step_id == id).unwrap();
    assert_eq!(by_id("plan").status, StepStatus::Pending);
    assert_eq!(by_id("implement").status, StepStatus::Waiting);
    assert_eq!(by_id("implement").retry_count, 0);

    // prior-cycle stories are left in place
    assert_eq!(detail.stories.len(), 2);
    let us1 = detail.stories.iter().find(|s| s.story_id == "US-1").unwrap();
    assert_eq!(us1.status, StoryStatus::Failed);

    // a fresh plan appends new rows with increasing indexes, and the loop
    // picks up the lowest pending story
    let plan = state.engine.claim("planner").await.unwrap().unwrap();
    let more = r#"STORIES_JSON: [{"id":"US-3","title":"Retry login","description":"d","acceptanceCriteria":["works"]}]"#;
    state
        .engine
        .complete(&plan.step_instance_id, more)
        .await
        .unwrap();

    let stories = state.story_store.list(&run.id).await.unwrap();
    assert_eq!(stories.len(), 3);
    assert_eq!(stories[2].story_id, "US-3");
    assert_eq!(stories[2].story_index, 2);

    let work = state.engine.claim("dev").await.unwrap().unwrap();
    assert_eq!(work.input, "Implement US-2");
}

#[tokio::test]
async fn test_parallel_claims_are_serialized() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, VERIFY_EACH_FLOW).await;
    state
        .engine
        .start_run("feature-dev", "add auth")
        .await
        .unwrap();

    // planner has the pending step, the verifier has nothing
    let (planner, verifier) = tokio::join!(
        state.engine.claim("planner"),
        state.engine.claim("verifier"),
    );
    assert_eq!(planner.unwrap().unwrap().step_id, "plan");
    assert!(verifier.unwrap().is_none());
}

#[tokio::test]
async fn test_progress_injection() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, VERIFY_EACH_FLOW).await;
    plan_two_stories(&state).await;

    // no file yet
    let work = state.engine.claim("dev").await.unwrap().unwrap();
    assert!(work.input.contains("Progress: (no progress yet)"));
    state
        .engine
        .complete(&work.step_instance_id, "done")
        .await
        .unwrap();
    let check = state.engine.claim("verifier").await.unwrap().unwrap();
    state
        .engine
        .complete(&check.step_instance_id, "STATUS: done")
        .await
        .unwrap();

    // the developer wrote progress; the next claim sees it
    let ws = state.paths.agent_workspace("feature-dev", "dev");
    std::fs::create_dir_all(&ws).unwrap();
    std::fs::write(ws.join("progress.txt"), "hello").unwrap();

    let work = state.engine.claim("dev").await.unwrap().unwrap();
    assert!(work.input.contains("Progress: hello"));
}

#[tokio::test]
async fn test_progress_archived_on_completion() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, VERIFY_EACH_FLOW).await;
    let run_id = plan_two_stories(&state).await;

    let ws = state.paths.agent_workspace("feature-dev", "dev");
    std::fs::create_dir_all(&ws).unwrap();
    std::fs::write(ws.join("progress.txt"), "US-1, US-2 shipped").unwrap();

    for _ in 0..2 {
        let work = state.engine.claim("dev").await.unwrap().unwrap();
        state
            .engine
            .complete(&work.step_instance_id, "done")
            .await
            .unwrap();
        let check = state.engine.claim("verifier").await.unwrap().unwrap();
        state
            .engine
            .complete(&check.step_instance_id, "STATUS: done")
            .await
            .unwrap();
    }
    let ship = state.engine.claim("shipper").await.unwrap().unwrap();
    state
        .engine
        .complete(&ship.step_instance_id, "shipped")
        .await
        .unwrap();

    let run = state.run_store.get(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(!ws.join("progress.txt").exists());
    let archived = ws.join("archive").join(&run_id).join("progress.txt");
    assert_eq!(
        std::fs::read_to_string(archived).unwrap(),
        "US-1, US-2 shipped"
    );
}

#[tokio::test]
async fn test_complete_is_idempotent_on_done_steps() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, VERIFY_EACH_FLOW).await;
    let run_id = plan_two_stories(&state).await;

    let detail = state.run_store.get_detail(&run_id).await.unwrap().unwrap();
    let plan = detail.steps.iter().find(|s| s.step_id == "plan").unwrap();
    assert_eq!(plan.status, StepStatus::Done);

    let first = state.run_store.results(&run_id).await.unwrap();
    assert_eq!(first.len(), 1);

    // completing again returns the recorded result and mutates nothing
    let rec = state
        .engine
        .complete(&plan.id, TWO_STORIES)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.seq, first[0].seq);
    assert_eq!(state.run_store.results(&run_id).await.unwrap().len(), 1);
    assert_eq!(state.story_store.list(&run_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_complete_on_non_running_step_is_invalid() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, VERIFY_EACH_FLOW).await;
    let run_id = plan_two_stories(&state).await;

    // implement is pending, not running
    let detail = state.run_store.get_detail(&run_id).await.unwrap().unwrap();
    let implement = detail.steps.iter().find(|s| s.step_id == "implement").unwrap();
    let err = state
        .engine
        .complete(&implement.id, "surprise")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");

    // no result row was appended
    assert_eq!(state.run_store.results(&run_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_bad_stories_json_retries_the_step() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, VERIFY_EACH_FLOW).await;
    let run_id = state
        .engine
        .start_run("feature-dev", "add auth")
        .await
        .unwrap()
        .id;

    let plan = state.engine.claim("planner").await.unwrap().unwrap();
    let rec = state
        .engine
        .complete(&plan.step_instance_id, "STORIES_JSON: [not json")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.status, StepResultStatus::Retry);

    let detail = state.run_store.get_detail(&run_id).await.unwrap().unwrap();
    let plan_step = detail.steps.iter().find(|s| s.step_id == "plan").unwrap();
    assert_eq!(plan_step.status, StepStatus::Pending);
    assert_eq!(plan_step.retry_count, 1);
    assert!(detail.stories.is_empty());

    // the planner gets another attempt
    let again = state.engine.claim("planner").await.unwrap().unwrap();
    assert_eq!(again.step_id, "plan");
}

const ESCALATE_FLOW: &str = r#"
id: escalate-flow
name: Escalate Flow
agents:
  - id: dev
  - id: boss
steps:
  - id: build
    agent: dev
    input: "Build: {{task}}"
    max_retries: 0
    on_fail:
      on_exhausted:
        escalate_to: boss
"#;

#[tokio::test]
async fn test_exhaustion_escalates_and_blocks() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, ESCALATE_FLOW).await;
    let run = state
        .engine
        .start_run("escalate-flow", "the impossible")
        .await
        .unwrap();

    let work = state.engine.claim("dev").await.unwrap().unwrap();
    state
        .engine
        .fail(&work.step_instance_id, "cannot do it")
        .await
        .unwrap();

    let detail = state.run_store.get_detail(&run.id).await.unwrap().unwrap();
    assert_eq!(detail.run.status, RunStatus::Blocked);
    assert_eq!(detail.steps[0].status, StepStatus::Failed);

    let context = state.run_store.context(&run.id).await.unwrap();
    assert_eq!(context["escalate_to"], "boss");

    // external unblock re-arms the failed step
    let resumed = state.engine.resume_run(&run.id).await.unwrap();
    assert_eq!(resumed.status, RunStatus::Running);
    let work = state.engine.claim("dev").await.unwrap().unwrap();
    assert_eq!(work.step_id, "build");
}

#[tokio::test]
async fn test_single_step_retries_before_exhaustion() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, VERIFY_EACH_FLOW).await;
    let run_id = state
        .engine
        .start_run("feature-dev", "add auth")
        .await
        .unwrap()
        .id;

    // default budget is two retries, so three failures exhaust the step
    for expected_retry in 1..=2u32 {
        let work = state.engine.claim("planner").await.unwrap().unwrap();
        state
            .engine
            .fail(&work.step_instance_id, "transient")
            .await
            .unwrap();
        let detail = state.run_store.get_detail(&run_id).await.unwrap().unwrap();
        let plan = detail.steps.iter().find(|s| s.step_id == "plan").unwrap();
        assert_eq!(plan.status, StepStatus::Pending);
        assert_eq!(plan.retry_count, expected_retry);
    }

    let work = state.engine.claim("planner").await.unwrap().unwrap();
    state
        .engine
        .fail(&work.step_instance_id, "permanent")
        .await
        .unwrap();
    let detail = state.run_store.get_detail(&run_id).await.unwrap().unwrap();
    assert_eq!(detail.run.status, RunStatus::Blocked);
    let plan = detail.steps.iter().find(|s| s.step_id == "plan").unwrap();
    assert_eq!(plan.status, StepStatus::Failed);
    assert_eq!(plan.retry_count, 2);
}

#[tokio::test]
async fn test_canceled_run_ignores_late_reports() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, VERIFY_EACH_FLOW).await;
    let run = state
        .engine
        .start_run("feature-dev", "add auth")
        .await
        .unwrap();

    let work = state.engine.claim("planner").await.unwrap().unwrap();
    state.engine.cancel_run(&run.id).await.unwrap();

    // the in-flight agent's eventual report is ignored, not an error
    let rec = state
        .engine
        .complete(&work.step_instance_id, TWO_STORIES)
        .await
        .unwrap();
    assert!(rec.is_none());
    assert!(state.story_store.list(&run.id).await.unwrap().is_empty());

    // and nothing is claimable afterwards
    assert!(state.engine.claim("planner").await.unwrap().is_none());
}

#[tokio::test]
async fn test_loop_with_no_stories_drains_during_claim() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, VERIFY_EACH_FLOW).await;
    let run_id = state
        .engine
        .start_run("feature-dev", "trivial task")
        .await
        .unwrap()
        .id;

    let plan = state.engine.claim("planner").await.unwrap().unwrap();
    // the planner decided no decomposition was needed
    state
        .engine
        .complete(&plan.step_instance_id, "nothing to split\nSTATUS: done")
        .await
        .unwrap();

    // the loop has no work list: claiming it completes it and advances
    assert!(state.engine.claim("dev").await.unwrap().is_none());

    let detail = state.run_store.get_detail(&run_id).await.unwrap().unwrap();
    let by_id = |id: &str| detail.steps.iter().find(|s| s.step_id == id).unwrap();
    assert_eq!(by_id("implement").status, StepStatus::Done);
    assert_eq!(by_id("verify").status, StepStatus::Pending);
}

#[tokio::test]
async fn test_claim_with_nothing_ready_returns_none() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    install(&state, VERIFY_EACH_FLOW).await;

    assert!(state.engine.claim("planner").await.unwrap().is_none());

    state
        .engine
        .start_run("feature-dev", "add auth")
        .await
        .unwrap();
    // only the planner's step is pending
    assert!(state.engine.claim("dev").await.unwrap().is_none());
    assert!(state.engine.claim("shipper").await.unwrap().is_none());
}

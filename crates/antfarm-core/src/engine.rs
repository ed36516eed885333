//! Step-operations engine: `claim` / `complete` / `fail` and the run
//! state machine.
//!
//! Every mutating operation executes inside one database transaction; the
//! `Database` mutex serializes writers, so concurrent claims observe either
//! all or none of each other's effects. The engine performs no long-running
//! I/O: each operation is bounded reads/writes plus at most one progress
//! file read per claim.

use rusqlite::Transaction;
use serde::Serialize;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::run::{Run, RunStatus, StepResultRecord, StepResultStatus};
use crate::models::step::{StepInstance, StepStatus};
use crate::models::story::{Story, StoryStatus};
use crate::models::workflow::{StepDef, StepType, WorkflowSpec};
use crate::output::{self, ParsedOutput};
use crate::paths::AntfarmPaths;
use crate::store::{run_store, step_store, story_store, workflow_store};
use crate::template;
use crate::workspace;

/// Work handed to an agent by a successful claim.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedWork {
    pub run_id: String,
    pub step_instance_id: String,
    pub step_id: String,
    pub agent_id: String,
    /// The step input with all `{{placeholder}}` slots resolved.
    pub input: String,
    /// The step's contract, passed through unaltered.
    pub expects: String,
}

#[derive(Clone)]
pub struct StepEngine {
    db: Database,
    paths: AntfarmPaths,
}

impl StepEngine {
    pub fn new(db: Database, paths: AntfarmPaths) -> Self {
        Self { db, paths }
    }

    /// Create a run for an installed workflow: one step instance per spec
    /// step, the first `pending`, context seeded with the task title.
    pub async fn start_run(&self, workflow_id: &str, task: &str) -> Result<Run, CoreError> {
        let workflow_id = workflow_id.to_string();
        let task = task.to_string();
        self.db
            .with_tx_async(move |tx| {
                let spec = workflow_store::get_spec(tx, &workflow_id)?
                    .ok_or_else(|| CoreError::NotFound(format!("workflow '{}'", workflow_id)))?;
                let run = run_store::create_run(tx, &spec, &task)?;
                tracing::info!(run_id = %run.id, workflow = %workflow_id, "run started");
                Ok(run)
            })
            .await
    }

    /// Hand the agent its next ready step, if any, with the input rendered.
    pub async fn claim(&self, agent_id: &str) -> Result<Option<ClaimedWork>, CoreError> {
        let agent_id = agent_id.to_string();
        let paths = self.paths.clone();
        self.db
            .with_tx_async(move |tx| claim_in_tx(tx, &paths, &agent_id))
            .await
    }

    /// Record an agent's output for a `running` step and advance the state
    /// machine. Returns the terminal `StepResult` when one was recorded
    /// (story iterations and verification hand-offs return `None`).
    ///
    /// Idempotent on structural state: completing a step already `done`
    /// returns the recorded result without mutating anything.
    pub async fn complete(
        &self,
        step_instance_id: &str,
        output: &str,
    ) -> Result<Option<StepResultRecord>, CoreError> {
        let id = step_instance_id.to_string();
        let output = output.to_string();
        let paths = self.paths.clone();
        self.db
            .with_tx_async(move |tx| complete_in_tx(tx, &paths, &id, &output))
            .await
    }

    /// Record a step failure and apply retry/escalation policy.
    pub async fn fail(
        &self,
        step_instance_id: &str,
        error: &str,
    ) -> Result<Option<StepResultRecord>, CoreError> {
        let id = step_instance_id.to_string();
        let error = error.to_string();
        self.db
            .with_tx_async(move |tx| {
                let step = step_store::get(tx, &id)?
                    .ok_or_else(|| CoreError::NotFound(format!("step instance '{}'", id)))?;
                let run = run_store::get_run(tx, &step.run_id)?
                    .ok_or_else(|| CoreError::NotFound(format!("run '{}'", step.run_id)))?;

                if run.status == RunStatus::Canceled {
                    tracing::warn!(run_id = %run.id, step = %step.step_id, "ignoring fail for canceled run");
                    return Ok(None);
                }
                if step.status != StepStatus::Running {
                    return Err(CoreError::InvalidState(format!(
                        "cannot fail step '{}' in state '{}'",
                        step.step_id,
                        step.status.as_str()
                    )));
                }

                let spec = workflow_store::get_spec(tx, &run.workflow_id)?.ok_or_else(|| {
                    CoreError::NotFound(format!("workflow '{}'", run.workflow_id))
                })?;
                apply_failure(tx, &run, &spec, &step, &error).map(Some)
            })
            .await
    }

    pub async fn cancel_run(&self, run_id: &str) -> Result<Run, CoreError> {
        self.transition_run(run_id, RunStatus::Canceled, &[
            RunStatus::Running,
            RunStatus::Paused,
            RunStatus::Blocked,
        ])
        .await
    }

    pub async fn pause_run(&self, run_id: &str) -> Result<Run, CoreError> {
        self.transition_run(run_id, RunStatus::Paused, &[RunStatus::Running])
            .await
    }

    /// External unblock: the run returns to `running`; failed steps are
    /// re-armed as `pending` with a clean retry count.
    pub async fn resume_run(&self, run_id: &str) -> Result<Run, CoreError> {
        let id = run_id.to_string();
        self.db
            .with_tx_async(move |tx| {
                let run = run_store::get_run(tx, &id)?
                    .ok_or_else(|| CoreError::NotFound(format!("run '{}'", id)))?;
                if !matches!(run.status, RunStatus::Paused | RunStatus::Blocked) {
                    return Err(CoreError::InvalidState(format!(
                        "cannot resume run '{}' in state '{}'",
                        id,
                        run.status.as_str()
                    )));
                }
                for failed in step_store::list_failed(tx, &id)? {
                    step_store::set_retry_count(tx, &failed.id, 0)?;
                    step_store::update_status(tx, &failed.id, StepStatus::Pending)?;
                }
                run_store::update_run_status(tx, &id, RunStatus::Running)?;
                tracing::info!(run_id = %id, "run resumed");
                run_store::get_run(tx, &id)?
                    .ok_or_else(|| CoreError::Store(format!("run '{}' vanished mid-transaction", id)))
            })
            .await
    }

    async fn transition_run(
        &self,
        run_id: &str,
        to: RunStatus,
        allowed_from: &[RunStatus],
    ) -> Result<Run, CoreError> {
        let id = run_id.to_string();
        let allowed = allowed_from.to_vec();
        self.db
            .with_tx_async(move |tx| {
                let run = run_store::get_run(tx, &id)?
                    .ok_or_else(|| CoreError::NotFound(format!("run '{}'", id)))?;
                if !allowed.contains(&run.status) {
                    return Err(CoreError::InvalidState(format!(
                        "cannot move run '{}' from '{}' to '{}'",
                        id,
                        run.status.as_str(),
                        to.as_str()
                    )));
                }
                run_store::update_run_status(tx, &id, to)?;
                tracing::info!(run_id = %id, status = to.as_str(), "run transitioned");
                run_store::get_run(tx, &id)?
                    .ok_or_else(|| CoreError::Store(format!("run '{}' vanished mid-transaction", id)))
            })
            .await
    }
}

// ── claim ───────────────────────────────────────────────────────────────

fn claim_in_tx(
    tx: &Transaction<'_>,
    paths: &AntfarmPaths,
    agent_id: &str,
) -> Result<Option<ClaimedWork>, CoreError> {
    // A loop step with no pending story is marked done during the claim
    // itself, and selection re-runs once for the step it unblocked.
    for _ in 0..2 {
        let Some(step) = step_store::find_claimable(tx, agent_id)? else {
            return Ok(None);
        };
        let run = run_store::get_run(tx, &step.run_id)?
            .ok_or_else(|| CoreError::NotFound(format!("run '{}'", step.run_id)))?;
        let spec = workflow_store::get_spec(tx, &run.workflow_id)?
            .ok_or_else(|| CoreError::NotFound(format!("workflow '{}'", run.workflow_id)))?;
        let def = spec.step(&step.step_id).ok_or_else(|| {
            CoreError::NotFound(format!(
                "step '{}' in workflow '{}'",
                step.step_id, run.workflow_id
            ))
        })?;

        match step.step_type {
            StepType::Single => {
                step_store::update_status(tx, &step.id, StepStatus::Running)?;
                let input = render_step_input(tx, paths, &run, &spec, def, None)?;
                tracing::info!(run_id = %run.id, step = %step.step_id, agent = %agent_id, "step claimed");
                return Ok(Some(claimed(&run, &step, def, input)));
            }
            StepType::Loop => match story_store::next_pending(tx, &run.id)? {
                Some(story) => {
                    story_store::update_status(tx, &story.id, StoryStatus::Running)?;
                    step_store::set_current_story(tx, &step.id, Some(&story.story_id))?;
                    step_store::update_status(tx, &step.id, StepStatus::Running)?;
                    let story = Story {
                        status: StoryStatus::Running,
                        ..story
                    };
                    let input = render_step_input(tx, paths, &run, &spec, def, Some(&story))?;
                    tracing::info!(run_id = %run.id, step = %step.step_id, story = %story.story_id, "story claimed");
                    return Ok(Some(claimed(&run, &step, def, input)));
                }
                None => {
                    step_store::update_status(tx, &step.id, StepStatus::Done)?;
                    advance_pipeline(tx, paths, &run, &spec, step.step_index)?;
                    tracing::info!(run_id = %run.id, step = %step.step_id, "loop step drained during claim");
                    continue;
                }
            },
        }
    }
    Ok(None)
}

fn claimed(run: &Run, step: &StepInstance, def: &StepDef, input: String) -> ClaimedWork {
    ClaimedWork {
        run_id: run.id.clone(),
        step_instance_id: step.id.clone(),
        step_id: step.step_id.clone(),
        agent_id: step.agent_id.clone(),
        input,
        expects: def.expects.clone(),
    }
}

/// Render a step input against the run context, plus the loop variables
/// when the run has stories.
fn render_step_input(
    tx: &Transaction<'_>,
    paths: &AntfarmPaths,
    run: &Run,
    spec: &WorkflowSpec,
    def: &StepDef,
    claimed_story: Option<&Story>,
) -> Result<String, CoreError> {
    let mut vars = run_store::get_context(tx, &run.id)?;
    let stories = story_store::list_by_run(tx, &run.id)?;

    if !stories.is_empty() {
        let loop_step = step_store::find_loop_step(tx, &run.id)?;
        let held = claimed_story.cloned().or_else(|| {
            loop_step
                .as_ref()
                .and_then(|s| s.current_story_id.as_deref())
                .and_then(|label| stories.iter().find(|s| s.story_id == label).cloned())
        });
        let progress = match &loop_step {
            Some(s) => workspace::read_progress(paths, spec, &s.agent_id),
            None => workspace::NO_PROGRESS.to_string(),
        };
        template::insert_loop_vars(&mut vars, &stories, held.as_ref(), &progress);
    }

    Ok(template::resolve(&def.input, &vars))
}

// ── complete ────────────────────────────────────────────────────────────

fn complete_in_tx(
    tx: &Transaction<'_>,
    paths: &AntfarmPaths,
    instance_id: &str,
    output: &str,
) -> Result<Option<StepResultRecord>, CoreError> {
    let step = step_store::get(tx, instance_id)?
        .ok_or_else(|| CoreError::NotFound(format!("step instance '{}'", instance_id)))?;
    let run = run_store::get_run(tx, &step.run_id)?
        .ok_or_else(|| CoreError::NotFound(format!("run '{}'", step.run_id)))?;

    if run.status == RunStatus::Canceled {
        tracing::warn!(run_id = %run.id, step = %step.step_id, "ignoring complete for canceled run");
        return Ok(None);
    }
    if step.status == StepStatus::Done {
        // a verify-each loop's terminal result is recorded under its verify
        // step, so fall back to that before giving up
        let existing = match run_store::latest_step_result(tx, &run.id, &step.step_id)? {
            Some(rec) => Some(rec),
            None => step
                .loop_config
                .as_ref()
                .filter(|c| c.verify_each)
                .and_then(|c| c.verify_step.as_deref())
                .map(|vid| run_store::latest_step_result(tx, &run.id, vid))
                .transpose()?
                .flatten(),
        };
        return Ok(existing);
    }
    if step.status != StepStatus::Running {
        return Err(CoreError::InvalidState(format!(
            "cannot complete step '{}' in state '{}'",
            step.step_id,
            step.status.as_str()
        )));
    }

    let spec = workflow_store::get_spec(tx, &run.workflow_id)?
        .ok_or_else(|| CoreError::NotFound(format!("workflow '{}'", run.workflow_id)))?;

    let parsed = match output::parse(output) {
        Ok(parsed) => parsed,
        Err(CoreError::Parse(msg)) => {
            // structural contract violated: route through the retry policy
            tracing::warn!(run_id = %run.id, step = %step.step_id, error = %msg, "agent output rejected");
            return apply_failure(tx, &run, &spec, &step, &msg).map(Some);
        }
        Err(other) => return Err(other),
    };

    run_store::merge_context(tx, &run.id, &parsed.context)?;

    if let Some(drafts) = &parsed.stories {
        let budget = spec
            .loop_step()
            .map(|d| d.max_retries)
            .unwrap_or_else(crate::models::workflow::default_max_retries);
        story_store::insert_drafts(tx, &run.id, drafts, budget)?;
        tracing::info!(run_id = %run.id, count = drafts.len(), "stories inserted");
    }

    if step.step_type == StepType::Loop {
        return complete_loop_story(tx, paths, &run, &spec, &step, output, &parsed);
    }
    if let Some(loop_step) = verified_loop_step(tx, &run.id, &step.step_id)? {
        return complete_verify(tx, paths, &run, &spec, &step, &loop_step, output, &parsed);
    }

    // plain single step
    let rec = run_store::append_step_result(
        tx,
        &run.id,
        &step.step_id,
        &step.agent_id,
        output,
        parsed.status,
    )?;
    step_store::update_status(tx, &step.id, StepStatus::Done)?;
    advance_pipeline(tx, paths, &run, &spec, step.step_index)?;
    Ok(Some(rec))
}

/// The loop step holding this step as its verifier, when verification is
/// in flight (loop step `running` with `verify_step` naming this step).
fn verified_loop_step(
    tx: &Transaction<'_>,
    run_id: &str,
    step_def_id: &str,
) -> Result<Option<StepInstance>, CoreError> {
    let Some(loop_step) = step_store::find_loop_step(tx, run_id)? else {
        return Ok(None);
    };
    let held = loop_step.status == StepStatus::Running
        && loop_step
            .loop_config
            .as_ref()
            .and_then(|c| c.verify_step.as_deref())
            == Some(step_def_id);
    Ok(if held { Some(loop_step) } else { None })
}

fn complete_loop_story(
    tx: &Transaction<'_>,
    paths: &AntfarmPaths,
    run: &Run,
    spec: &WorkflowSpec,
    step: &StepInstance,
    output: &str,
    parsed: &ParsedOutput,
) -> Result<Option<StepResultRecord>, CoreError> {
    let label = step.current_story_id.as_deref().ok_or_else(|| {
        CoreError::InvalidState(format!("loop step '{}' has no story in flight", step.step_id))
    })?;
    let story = story_store::get_by_label(tx, &run.id, label)?
        .ok_or_else(|| CoreError::NotFound(format!("story '{}'", label)))?;
    if story.status != StoryStatus::Running {
        return Err(CoreError::InvalidState(format!(
            "story '{}' is '{}'; verification still in flight",
            label,
            story.status.as_str()
        )));
    }

    story_store::complete(tx, &story.id, output)?;

    let verify_each = step
        .loop_config
        .as_ref()
        .map(|c| c.verify_each)
        .unwrap_or(false);
    if verify_each {
        let verify_id = step
            .loop_config
            .as_ref()
            .and_then(|c| c.verify_step.as_deref())
            .ok_or_else(|| {
                CoreError::InvalidState(format!(
                    "loop step '{}' has verify_each but no verify step",
                    step.step_id
                ))
            })?;
        let verify = step_store::get_by_def(tx, &run.id, verify_id)?
            .ok_or_else(|| CoreError::NotFound(format!("verify step '{}'", verify_id)))?;
        // hold: the loop step stays running and keeps its story reference
        // while the verifier works on it
        step_store::update_status(tx, &verify.id, StepStatus::Pending)?;
        tracing::info!(run_id = %run.id, story = %label, "story done, verification pending");
        return Ok(None);
    }

    step_store::set_current_story(tx, &step.id, None)?;
    if story_store::any_pending(tx, &run.id)? {
        step_store::update_status(tx, &step.id, StepStatus::Pending)?;
        Ok(None)
    } else {
        step_store::update_status(tx, &step.id, StepStatus::Done)?;
        let rec = run_store::append_step_result(
            tx,
            &run.id,
            &step.step_id,
            &step.agent_id,
            output,
            parsed.status,
        )?;
        advance_pipeline(tx, paths, run, spec, step.step_index)?;
        Ok(Some(rec))
    }
}

#[allow(clippy::too_many_arguments)]
fn complete_verify(
    tx: &Transaction<'_>,
    paths: &AntfarmPaths,
    run: &Run,
    spec: &WorkflowSpec,
    verify_step: &StepInstance,
    loop_step: &StepInstance,
    output: &str,
    parsed: &ParsedOutput,
) -> Result<Option<StepResultRecord>, CoreError> {
    match parsed.status {
        StepResultStatus::Done => {
            run_store::set_context_value(tx, &run.id, "verify_feedback", "")?;
            step_store::set_current_story(tx, &loop_step.id, None)?;
            if story_store::any_pending(tx, &run.id)? {
                step_store::update_status(tx, &loop_step.id, StepStatus::Pending)?;
                step_store::update_status(tx, &verify_step.id, StepStatus::Waiting)?;
                tracing::info!(run_id = %run.id, "verification passed, next story up");
                Ok(None)
            } else {
                step_store::update_status(tx, &loop_step.id, StepStatus::Done)?;
                step_store::update_status(tx, &verify_step.id, StepStatus::Done)?;
                let rec = run_store::append_step_result(
                    tx,
                    &run.id,
                    &verify_step.step_id,
                    &verify_step.agent_id,
                    output,
                    parsed.status,
                )?;
                let from = loop_step.step_index.max(verify_step.step_index);
                advance_pipeline(tx, paths, run, spec, from)?;
                Ok(Some(rec))
            }
        }
        StepResultStatus::Retry => {
            let label = loop_step.current_story_id.as_deref().ok_or_else(|| {
                CoreError::InvalidState(format!(
                    "no story under verification for loop step '{}'",
                    loop_step.step_id
                ))
            })?;
            let story = story_store::get_by_label(tx, &run.id, label)?
                .ok_or_else(|| CoreError::NotFound(format!("story '{}'", label)))?;
            let feedback = parsed.issues.clone().unwrap_or_default();
            run_store::set_context_value(tx, &run.id, "verify_feedback", &feedback)?;
            step_store::set_current_story(tx, &loop_step.id, None)?;

            if story.retry_count < story.max_retries {
                story_store::set_retry_count(tx, &story.id, story.retry_count + 1)?;
                story_store::update_status(tx, &story.id, StoryStatus::Pending)?;
                step_store::update_status(tx, &loop_step.id, StepStatus::Pending)?;
                step_store::update_status(tx, &verify_step.id, StepStatus::Waiting)?;
                tracing::info!(run_id = %run.id, story = %label, "verification requested changes");
                Ok(None)
            } else {
                // retries exhausted: the story fails and takes the loop step
                // down with it, in this same transaction
                story_store::update_status(tx, &story.id, StoryStatus::Failed)?;
                step_store::update_status(tx, &loop_step.id, StepStatus::Failed)?;
                step_store::update_status(tx, &verify_step.id, StepStatus::Waiting)?;
                let rec = run_store::append_step_result(
                    tx,
                    &run.id,
                    &loop_step.step_id,
                    &loop_step.agent_id,
                    output,
                    StepResultStatus::Retry,
                )?;
                tracing::warn!(run_id = %run.id, story = %label, "story retries exhausted");
                apply_on_fail(tx, run, spec, loop_step)?;
                Ok(Some(rec))
            }
        }
        StepResultStatus::Blocked => {
            // re-arm the verification as pending so it is the one claimable
            // step once the run is unblocked; the loop step keeps holding
            // the story under review
            step_store::update_status(tx, &verify_step.id, StepStatus::Pending)?;
            run_store::update_run_status(tx, &run.id, RunStatus::Blocked)?;
            let rec = run_store::append_step_result(
                tx,
                &run.id,
                &verify_step.step_id,
                &verify_step.agent_id,
                output,
                StepResultStatus::Blocked,
            )?;
            tracing::warn!(run_id = %run.id, "verification blocked the run");
            Ok(Some(rec))
        }
    }
}

// ── failure & escalation ────────────────────────────────────────────────

/// Shared by `fail()` and parse-rejected `complete()`: record a `retry`
/// result and apply the retry/escalation policy for the step (or its story).
fn apply_failure(
    tx: &Transaction<'_>,
    run: &Run,
    spec: &WorkflowSpec,
    step: &StepInstance,
    error: &str,
) -> Result<StepResultRecord, CoreError> {
    let rec = run_store::append_step_result(
        tx,
        &run.id,
        &step.step_id,
        &step.agent_id,
        error,
        StepResultStatus::Retry,
    )?;

    if step.step_type == StepType::Loop {
        if let Some(label) = step.current_story_id.as_deref() {
            let story = story_store::get_by_label(tx, &run.id, label)?
                .ok_or_else(|| CoreError::NotFound(format!("story '{}'", label)))?;
            step_store::set_current_story(tx, &step.id, None)?;
            if story.retry_count < story.max_retries {
                story_store::set_retry_count(tx, &story.id, story.retry_count + 1)?;
                story_store::update_status(tx, &story.id, StoryStatus::Pending)?;
                step_store::update_status(tx, &step.id, StepStatus::Pending)?;
                tracing::info!(run_id = %run.id, story = %label, "story failed, retrying");
            } else {
                story_store::update_status(tx, &story.id, StoryStatus::Failed)?;
                step_store::update_status(tx, &step.id, StepStatus::Failed)?;
                tracing::warn!(run_id = %run.id, story = %label, "story retries exhausted");
                apply_on_fail(tx, run, spec, step)?;
            }
            return Ok(rec);
        }
    }

    let budget = spec
        .step(&step.step_id)
        .map(|d| d.max_retries)
        .unwrap_or_else(crate::models::workflow::default_max_retries);
    if step.retry_count < budget {
        step_store::set_retry_count(tx, &step.id, step.retry_count + 1)?;
        step_store::update_status(tx, &step.id, StepStatus::Pending)?;
        tracing::info!(run_id = %run.id, step = %step.step_id, retry = step.retry_count + 1, "step failed, retrying");
    } else {
        step_store::update_status(tx, &step.id, StepStatus::Failed)?;
        tracing::warn!(run_id = %run.id, step = %step.step_id, "step retries exhausted");
        apply_on_fail(tx, run, spec, step)?;
    }
    Ok(rec)
}

/// Exhaustion policy: rewind when `retry_step` names a target, otherwise
/// block the run (recording `escalate_to` in context when declared).
fn apply_on_fail(
    tx: &Transaction<'_>,
    run: &Run,
    spec: &WorkflowSpec,
    failed_step: &StepInstance,
) -> Result<(), CoreError> {
    let on_fail = spec.step(&failed_step.step_id).and_then(|d| d.on_fail.as_ref());

    if let Some(target_id) = on_fail.and_then(|f| f.retry_step.as_deref()) {
        let target = step_store::get_by_def(tx, &run.id, target_id)?
            .ok_or_else(|| CoreError::NotFound(format!("retry step '{}'", target_id)))?;
        let lo = target.step_index.min(failed_step.step_index);
        let hi = target.step_index.max(failed_step.step_index);
        step_store::reset_range(tx, &run.id, lo, hi)?;
        step_store::update_status(tx, &target.id, StepStatus::Pending)?;
        run_store::set_current_step_index(tx, &run.id, target.step_index)?;
        tracing::info!(run_id = %run.id, from = %failed_step.step_id, to = %target_id, "pipeline rewound");
        return Ok(());
    }

    if let Some(agent) = on_fail.and_then(|f| f.escalate_to.as_deref()) {
        run_store::set_context_value(tx, &run.id, "escalate_to", agent)?;
        run_store::update_run_status(tx, &run.id, RunStatus::Blocked)?;
        tracing::warn!(run_id = %run.id, agent = %agent, "run blocked, escalated");
        return Ok(());
    }

    run_store::update_run_status(tx, &run.id, RunStatus::Blocked)?;
    tracing::warn!(run_id = %run.id, step = %failed_step.step_id, "run blocked, manual intervention required");
    Ok(())
}

// ── pipeline advancement ────────────────────────────────────────────────

/// Promote the next `waiting` step to `pending`, or complete the run when
/// none remain (archiving the progress file).
fn advance_pipeline(
    tx: &Transaction<'_>,
    paths: &AntfarmPaths,
    run: &Run,
    spec: &WorkflowSpec,
    from_index: u32,
) -> Result<(), CoreError> {
    match step_store::next_waiting_after(tx, &run.id, from_index)? {
        Some(next) => {
            step_store::update_status(tx, &next.id, StepStatus::Pending)?;
            run_store::set_current_step_index(tx, &run.id, next.step_index)?;
            tracing::info!(run_id = %run.id, step = %next.step_id, "pipeline advanced");
        }
        None => {
            run_store::update_run_status(tx, &run.id, RunStatus::Completed)?;
            if let Some(loop_step) = step_store::find_loop_step(tx, &run.id)? {
                if let Err(e) =
                    workspace::archive_progress(paths, spec, &loop_step.agent_id, &run.id)
                {
                    tracing::warn!(run_id = %run.id, error = %e, "failed to archive progress file");
                }
            }
            tracing::info!(run_id = %run.id, "run completed");
        }
    }
    Ok(())
}

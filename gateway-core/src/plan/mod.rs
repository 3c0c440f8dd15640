//! The plan/task/step execution hierarchy: status transitions, progress accounting,
//! user-input gating, retry, and cancellation cascade.
//!
//! Plan, Task, and Step share one `Status` enum and one transition table — terminal states
//! silently ignore further transition requests rather than erroring, matching the "terminal
//! states ignore further transitions" invariant.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::GatewayError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    WaitForUser,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::Skipped)
    }

    /// Whether a transition from `self` to `to` is allowed per the shared transition table.
    /// Terminal states reject every transition; callers treat that as a silent no-op, not
    /// an error.
    fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        match self {
            Pending => matches!(to, InProgress | WaitForUser | Failed | Cancelled | Skipped),
            InProgress => matches!(to, WaitForUser | Completed | Failed | Cancelled),
            WaitForUser => matches!(to, InProgress | Failed | Cancelled),
            Completed | Failed | Cancelled | Skipped => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    DeepResearch,
    Generic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Fatal,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Plan {
    pub id: u64,
    pub public_id: String,
    pub response_id: String,
    pub status: Status,
    pub progress: f64,
    pub agent_type: AgentType,
    pub estimated_steps: u32,
    pub completed_steps: u32,
    pub current_task_id: Option<u64>,
    pub final_artifact_id: Option<String>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Task {
    pub id: u64,
    pub plan_id: u64,
    pub sequence: u32,
    pub task_type: String,
    pub status: Status,
    pub title: String,
    pub description: String,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Step {
    pub id: u64,
    pub task_id: u64,
    pub sequence: u32,
    pub action: String,
    pub status: Status,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub error_severity: Option<ErrorSeverity>,
    pub duration_ms: Option<u64>,
    pub input_params: Option<Value>,
    pub output_data: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct StepDetail {
    pub id: u64,
    pub step_id: u64,
    pub created_at: DateTime<Utc>,
    pub message: String,
    pub data: Option<Value>,
}

#[derive(Clone, Debug, Default)]
pub struct NewTask {
    pub task_type: String,
    pub title: String,
    pub description: String,
}

#[derive(Clone, Debug, Default)]
pub struct NewStep {
    pub action: String,
    pub max_retries: u32,
    pub input_params: Option<Value>,
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn create_plan(
        &self,
        response_id: &str,
        agent_type: AgentType,
        estimated_steps: u32,
        tasks: Vec<NewTask>,
    ) -> Result<Plan, GatewayError>;

    async fn get_plan(&self, public_id: &str) -> Result<Plan, GatewayError>;

    /// Looks a plan up by the response it belongs to, for routes that only know the response's
    /// public id and not the plan's own.
    async fn find_by_response_id(&self, response_id: &str) -> Result<Plan, GatewayError>;

    async fn get_plan_details(&self, public_id: &str) -> Result<(Plan, Vec<Task>, Vec<Step>), GatewayError>;

    async fn add_step(&self, task_id: u64, new_step: NewStep) -> Result<Step, GatewayError>;

    async fn transition_task(&self, task_id: u64, to: Status) -> Result<Task, GatewayError>;

    async fn transition_step(&self, step_id: u64, to: Status) -> Result<Step, GatewayError>;

    /// Marks a step Completed, bumping the owning plan's `CompletedSteps`/`Progress`, and
    /// transitions the plan to Completed once every task under it is Completed.
    async fn complete_step(&self, step_id: u64, output_data: Option<Value>) -> Result<Step, GatewayError>;

    async fn fail_step(
        &self,
        step_id: u64,
        message: String,
        severity: ErrorSeverity,
    ) -> Result<Step, GatewayError>;

    /// Refuses when `RetryCount >= MaxRetries`; otherwise appends a fresh Step at
    /// `RetryCount+1`, sequenced right after the failed one, copying action and input params.
    async fn retry_step(&self, step_id: u64) -> Result<Step, GatewayError>;

    async fn append_step_detail(
        &self,
        step_id: u64,
        message: String,
        data: Option<Value>,
    ) -> Result<StepDetail, GatewayError>;

    async fn submit_user_input(
        &self,
        plan_id: &str,
        selection: Option<String>,
        approval: Option<bool>,
        message: Option<String>,
    ) -> Result<Plan, GatewayError>;

    async fn cancel_plan(&self, plan_id: &str, reason: String) -> Result<Plan, GatewayError>;
}

#[derive(Default)]
struct Inner {
    plans: HashMap<u64, Plan>,
    plans_by_public_id: HashMap<String, u64>,
    tasks: HashMap<u64, Task>,
    tasks_by_plan: HashMap<u64, Vec<u64>>,
    steps: HashMap<u64, Step>,
    steps_by_task: HashMap<u64, Vec<u64>>,
    step_details: HashMap<u64, Vec<StepDetail>>,
    next_plan_id: u64,
    next_task_id: u64,
    next_step_id: u64,
    next_detail_id: u64,
}

pub struct InMemoryPlanStore {
    inner: Arc<RwLock<Inner>>,
}

impl Default for InMemoryPlanStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                next_plan_id: 1,
                next_task_id: 1,
                next_step_id: 1,
                next_detail_id: 1,
                ..Default::default()
            })),
        }
    }
}

fn apply_transition(status: &mut Status, to: Status) -> bool {
    if status.is_terminal() {
        return true;
    }
    if !status.can_transition_to(to) {
        return false;
    }
    *status = to;
    true
}

/// Recomputes whether every task under `plan_id` is Completed, and if so marks the plan
/// Completed and stamps `completed_at`. Called after any task-level transition.
fn maybe_complete_plan(inner: &mut Inner, plan_id: u64) {
    let task_ids = inner.tasks_by_plan.get(&plan_id).cloned().unwrap_or_default();
    if task_ids.is_empty() {
        return;
    }
    let all_completed = task_ids
        .iter()
        .all(|id| inner.tasks.get(id).is_some_and(|t| t.status == Status::Completed));
    if all_completed {
        if let Some(plan) = inner.plans.get_mut(&plan_id) {
            if !plan.status.is_terminal() {
                plan.status = Status::Completed;
                plan.completed_at = Some(Utc::now());
            }
        }
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn create_plan(
        &self,
        response_id: &str,
        agent_type: AgentType,
        estimated_steps: u32,
        tasks: Vec<NewTask>,
    ) -> Result<Plan, GatewayError> {
        let mut inner = self.inner.write().await;
        let id = inner.next_plan_id;
        inner.next_plan_id += 1;
        let public_id = format!("plan_{}", uuid::Uuid::new_v4());
        let plan = Plan {
            id,
            public_id: public_id.clone(),
            response_id: response_id.to_string(),
            status: Status::Pending,
            progress: 0.0,
            agent_type,
            estimated_steps,
            completed_steps: 0,
            current_task_id: None,
            final_artifact_id: None,
            error_message: None,
            completed_at: None,
        };
        inner.plans.insert(id, plan.clone());
        inner.plans_by_public_id.insert(public_id, id);

        let mut task_ids = Vec::with_capacity(tasks.len());
        for (seq, new_task) in tasks.into_iter().enumerate() {
            let task_id = inner.next_task_id;
            inner.next_task_id += 1;
            let task = Task {
                id: task_id,
                plan_id: id,
                sequence: (seq + 1) as u32,
                task_type: new_task.task_type,
                status: Status::Pending,
                title: new_task.title,
                description: new_task.description,
                error_message: None,
                completed_at: None,
            };
            inner.tasks.insert(task_id, task);
            task_ids.push(task_id);
        }
        inner.tasks_by_plan.insert(id, task_ids);

        Ok(plan)
    }

    async fn get_plan(&self, public_id: &str) -> Result<Plan, GatewayError> {
        let inner = self.inner.read().await;
        let id = inner
            .plans_by_public_id
            .get(public_id)
            .ok_or_else(|| GatewayError::not_found(format!("plan {} not found", public_id)))?;
        Ok(inner.plans.get(id).expect("id from index").clone())
    }

    async fn find_by_response_id(&self, response_id: &str) -> Result<Plan, GatewayError> {
        let inner = self.inner.read().await;
        inner
            .plans
            .values()
            .find(|p| p.response_id == response_id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(format!("no plan for response {}", response_id)))
    }

    async fn get_plan_details(&self, public_id: &str) -> Result<(Plan, Vec<Task>, Vec<Step>), GatewayError> {
        let inner = self.inner.read().await;
        let id = *inner
            .plans_by_public_id
            .get(public_id)
            .ok_or_else(|| GatewayError::not_found(format!("plan {} not found", public_id)))?;
        let plan = inner.plans.get(&id).expect("id from index").clone();
        let task_ids = inner.tasks_by_plan.get(&id).cloned().unwrap_or_default();
        let tasks: Vec<Task> = task_ids
            .iter()
            .filter_map(|t| inner.tasks.get(t).cloned())
            .collect();
        let steps: Vec<Step> = task_ids
            .iter()
            .flat_map(|t| inner.steps_by_task.get(t).cloned().unwrap_or_default())
            .filter_map(|s| inner.steps.get(&s).cloned())
            .collect();
        Ok((plan, tasks, steps))
    }

    async fn add_step(&self, task_id: u64, new_step: NewStep) -> Result<Step, GatewayError> {
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(&task_id) {
            return Err(GatewayError::not_found(format!("task {} not found", task_id)));
        }
        let sequence = inner
            .steps_by_task
            .get(&task_id)
            .map(|ids| ids.len() as u32 + 1)
            .unwrap_or(1);
        let id = inner.next_step_id;
        inner.next_step_id += 1;
        let step = Step {
            id,
            task_id,
            sequence,
            action: new_step.action,
            status: Status::Pending,
            retry_count: 0,
            max_retries: new_step.max_retries,
            error_message: None,
            error_severity: None,
            duration_ms: None,
            input_params: new_step.input_params,
            output_data: None,
            started_at: None,
            completed_at: None,
        };
        inner.steps.insert(id, step.clone());
        inner.steps_by_task.entry(task_id).or_default().push(id);
        Ok(step)
    }

    async fn transition_task(&self, task_id: u64, to: Status) -> Result<Task, GatewayError> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| GatewayError::not_found(format!("task {} not found", task_id)))?;
        let was_terminal = task.status.is_terminal();
        apply_transition(&mut task.status, to);
        if !was_terminal && task.status.is_terminal() && matches!(to, Status::Completed) {
            task.completed_at = Some(Utc::now());
        }
        let plan_id = task.plan_id;
        let result = task.clone();
        maybe_complete_plan(&mut inner, plan_id);
        Ok(result)
    }

    async fn transition_step(&self, step_id: u64, to: Status) -> Result<Step, GatewayError> {
        let mut inner = self.inner.write().await;
        let step = inner
            .steps
            .get_mut(&step_id)
            .ok_or_else(|| GatewayError::not_found(format!("step {} not found", step_id)))?;
        if step.status == Status::Pending && to == Status::InProgress {
            step.started_at = Some(Utc::now());
        }
        apply_transition(&mut step.status, to);
        Ok(step.clone())
    }

    async fn complete_step(&self, step_id: u64, output_data: Option<Value>) -> Result<Step, GatewayError> {
        let mut inner = self.inner.write().await;
        let (task_id, plan_id) = {
            let step = inner
                .steps
                .get_mut(&step_id)
                .ok_or_else(|| GatewayError::not_found(format!("step {} not found", step_id)))?;
            apply_transition(&mut step.status, Status::Completed);
            step.output_data = output_data;
            step.completed_at = Some(Utc::now());
            if let Some(started) = step.started_at {
                step.duration_ms = Some((Utc::now() - started).num_milliseconds().max(0) as u64);
            }
            let task_id = step.task_id;
            let task = inner.tasks.get(&task_id);
            let plan_id = task.map(|t| t.plan_id);
            (task_id, plan_id)
        };
        let _ = task_id;
        if let Some(plan_id) = plan_id {
            if let Some(plan) = inner.plans.get_mut(&plan_id) {
                plan.completed_steps += 1;
                if plan.estimated_steps > 0 {
                    plan.progress = 100.0 * plan.completed_steps as f64 / plan.estimated_steps as f64;
                }
            }
        }
        Ok(inner.steps.get(&step_id).expect("just updated").clone())
    }

    async fn fail_step(
        &self,
        step_id: u64,
        message: String,
        severity: ErrorSeverity,
    ) -> Result<Step, GatewayError> {
        let mut inner = self.inner.write().await;
        let step = inner
            .steps
            .get_mut(&step_id)
            .ok_or_else(|| GatewayError::not_found(format!("step {} not found", step_id)))?;
        apply_transition(&mut step.status, Status::Failed);
        step.error_message = Some(message);
        step.error_severity = Some(severity);
        step.completed_at = Some(Utc::now());
        Ok(step.clone())
    }

    async fn retry_step(&self, step_id: u64) -> Result<Step, GatewayError> {
        let mut inner = self.inner.write().await;
        let failed = inner
            .steps
            .get(&step_id)
            .ok_or_else(|| GatewayError::not_found(format!("step {} not found", step_id)))?
            .clone();
        if failed.retry_count >= failed.max_retries {
            return Err(GatewayError::validation(format!(
                "step {} has exhausted retries ({}/{})",
                step_id, failed.retry_count, failed.max_retries
            )));
        }

        let task_steps = inner.steps_by_task.entry(failed.task_id).or_default();
        for step_ref in task_steps.iter_mut() {
            if let Some(step) = inner.steps.get_mut(step_ref) {
                if step.sequence > failed.sequence {
                    step.sequence += 1;
                }
            }
        }

        let id = inner.next_step_id;
        inner.next_step_id += 1;
        let retried = Step {
            id,
            task_id: failed.task_id,
            sequence: failed.sequence + 1,
            action: failed.action.clone(),
            status: Status::Pending,
            retry_count: failed.retry_count + 1,
            max_retries: failed.max_retries,
            error_message: None,
            error_severity: None,
            duration_ms: None,
            input_params: failed.input_params.clone(),
            output_data: None,
            started_at: None,
            completed_at: None,
        };
        inner.steps.insert(id, retried.clone());
        inner.steps_by_task.entry(failed.task_id).or_default().push(id);
        Ok(retried)
    }

    async fn append_step_detail(
        &self,
        step_id: u64,
        message: String,
        data: Option<Value>,
    ) -> Result<StepDetail, GatewayError> {
        let mut inner = self.inner.write().await;
        if !inner.steps.contains_key(&step_id) {
            return Err(GatewayError::not_found(format!("step {} not found", step_id)));
        }
        let id = inner.next_detail_id;
        inner.next_detail_id += 1;
        let detail = StepDetail {
            id,
            step_id,
            created_at: Utc::now(),
            message,
            data,
        };
        inner.step_details.entry(step_id).or_default().push(detail.clone());
        Ok(detail)
    }

    async fn submit_user_input(
        &self,
        plan_id: &str,
        selection: Option<String>,
        _approval: Option<bool>,
        _message: Option<String>,
    ) -> Result<Plan, GatewayError> {
        let mut inner = self.inner.write().await;
        let id = *inner
            .plans_by_public_id
            .get(plan_id)
            .ok_or_else(|| GatewayError::not_found(format!("plan {} not found", plan_id)))?;
        let plan = inner.plans.get_mut(&id).expect("id from index");
        if plan.status != Status::WaitForUser {
            // Idempotent no-op: a second submission after the plan already resumed is not an error.
            return Ok(plan.clone());
        }
        if let Some(selection) = selection {
            plan.error_message = None;
            plan.current_task_id = plan.current_task_id.or(None);
            let _ = selection;
        }
        plan.status = Status::InProgress;
        Ok(plan.clone())
    }

    async fn cancel_plan(&self, plan_id: &str, reason: String) -> Result<Plan, GatewayError> {
        let mut inner = self.inner.write().await;
        let id = *inner
            .plans_by_public_id
            .get(plan_id)
            .ok_or_else(|| GatewayError::not_found(format!("plan {} not found", plan_id)))?;
        {
            let plan = inner.plans.get_mut(&id).expect("id from index");
            if plan.status.is_terminal() {
                return Ok(plan.clone());
            }
            plan.status = Status::Cancelled;
            plan.error_message = Some(reason);
        }

        let task_ids = inner.tasks_by_plan.get(&id).cloned().unwrap_or_default();
        for task_id in &task_ids {
            if let Some(task) = inner.tasks.get_mut(task_id) {
                if !task.status.is_terminal() {
                    task.status = Status::Cancelled;
                }
            }
            if let Some(step_ids) = inner.steps_by_task.get(task_id).cloned() {
                for step_id in step_ids {
                    if let Some(step) = inner.steps.get_mut(&step_id) {
                        if !step.status.is_terminal() {
                            step.status = Status::Cancelled;
                        }
                    }
                }
            }
        }

        Ok(inner.plans.get(&id).expect("id from index").clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn plan_with_one_step() -> (InMemoryPlanStore, Plan, Task, Step) {
        let store = InMemoryPlanStore::new();
        let plan = store
            .create_plan(
                "resp_1",
                AgentType::Generic,
                1,
                vec![NewTask {
                    task_type: "research".into(),
                    title: "t".into(),
                    description: "d".into(),
                }],
            )
            .await
            .unwrap();
        let (_, tasks, _) = store.get_plan_details(&plan.public_id).await.unwrap();
        let task = tasks[0].clone();
        let step = store
            .add_step(
                task.id,
                NewStep {
                    action: "search".into(),
                    max_retries: 2,
                    input_params: None,
                },
            )
            .await
            .unwrap();
        (store, plan, task, step)
    }

    #[tokio::test]
    async fn completing_step_updates_plan_progress_and_completes_plan() {
        let (store, plan, task, step) = plan_with_one_step().await;
        store.transition_task(task.id, Status::InProgress).await.unwrap();
        store.transition_step(step.id, Status::InProgress).await.unwrap();
        store.complete_step(step.id, Some(serde_json::json!({"ok": true}))).await.unwrap();
        let completed_task = store.transition_task(task.id, Status::Completed).await.unwrap();
        assert_eq!(completed_task.status, Status::Completed);

        let reloaded = store.get_plan(&plan.public_id).await.unwrap();
        assert_eq!(reloaded.completed_steps, 1);
        assert_eq!(reloaded.progress, 100.0);
        assert_eq!(reloaded.status, Status::Completed);
    }

    #[tokio::test]
    async fn retry_refused_at_max_retries() {
        let (store, _plan, _task, step) = plan_with_one_step().await;
        store
            .fail_step(step.id, "boom".into(), ErrorSeverity::Medium)
            .await
            .unwrap();
        let r1 = store.retry_step(step.id).await.unwrap();
        assert_eq!(r1.retry_count, 1);
        store.fail_step(r1.id, "boom again".into(), ErrorSeverity::Medium).await.unwrap();
        let r2 = store.retry_step(r1.id).await.unwrap();
        assert_eq!(r2.retry_count, 2);
        store.fail_step(r2.id, "boom thrice".into(), ErrorSeverity::Medium).await.unwrap();
        let err = store.retry_step(r2.id).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn submit_user_input_second_call_is_noop() {
        let (store, plan, _task, _step) = plan_with_one_step().await;
        {
            let mut inner = store.inner.write().await;
            let id = inner.plans_by_public_id[&plan.public_id];
            inner.plans.get_mut(&id).unwrap().status = Status::WaitForUser;
        }
        let first = store
            .submit_user_input(&plan.public_id, Some("a".into()), None, None)
            .await
            .unwrap();
        assert_eq!(first.status, Status::InProgress);
        let second = store
            .submit_user_input(&plan.public_id, Some("b".into()), None, None)
            .await
            .unwrap();
        assert_eq!(second.status, Status::InProgress);
    }

    #[tokio::test]
    async fn cancel_plan_cascades_and_is_idempotent() {
        let (store, plan, task, step) = plan_with_one_step().await;
        let cancelled = store.cancel_plan(&plan.public_id, "user requested".into()).await.unwrap();
        assert_eq!(cancelled.status, Status::Cancelled);

        let (_, tasks, steps) = store.get_plan_details(&plan.public_id).await.unwrap();
        assert_eq!(tasks.iter().find(|t| t.id == task.id).unwrap().status, Status::Cancelled);
        assert_eq!(steps.iter().find(|s| s.id == step.id).unwrap().status, Status::Cancelled);

        let second = store.cancel_plan(&plan.public_id, "again".into()).await.unwrap();
        assert_eq!(second.status, Status::Cancelled);
        assert_eq!(second.error_message.as_deref(), Some("user requested"));
    }

    #[tokio::test]
    async fn find_by_response_id_locates_plan() {
        let (store, plan, _task, _step) = plan_with_one_step().await;
        let found = store.find_by_response_id("resp_1").await.unwrap();
        assert_eq!(found.public_id, plan.public_id);
        let err = store.find_by_response_id("resp_missing").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn terminal_task_transition_is_noop_not_error() {
        let (store, _plan, task, _step) = plan_with_one_step().await;
        store.transition_task(task.id, Status::Cancelled).await.unwrap();
        let result = store.transition_task(task.id, Status::InProgress).await.unwrap();
        assert_eq!(result.status, Status::Cancelled);
    }
}

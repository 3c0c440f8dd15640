//! The response lifecycle routes: create (streaming or not), read, cancel, conversation item
//! listing, and the plan/task sub-resources nested under a response.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use gateway_core::conversation::{Pagination, MAIN_BRANCH};
use gateway_core::llm::{ToolChoiceMode, ToolSpec};
use gateway_core::prompt::PreferenceValue;
use gateway_core::{ChatMessage, CreateResponseParams, GatewayError, MessageContent, Role};

use crate::app::AppState;
use crate::auth::UserId;
use crate::error_response::ApiError;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/responses", post(create_response))
        .route("/v1/responses/:id", get(get_response).delete(cancel_response))
        .route("/v1/responses/:id/cancel", post(cancel_response))
        .route("/v1/responses/:id/input_items", get(list_input_items))
        .route("/v1/responses/:id/plan", get(get_plan))
        .route("/v1/responses/:id/plan/details", get(get_plan_details))
        .route("/v1/responses/:id/plan/progress", get(get_plan_progress))
        .route("/v1/responses/:id/plan/tasks", get(get_plan_tasks))
        .route("/v1/responses/:id/plan/cancel", post(cancel_plan))
        .route("/v1/responses/:id/plan/input", post(submit_plan_input))
}

#[derive(Deserialize)]
struct CreateResponseRequest {
    model: String,
    input: serde_json::Value,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    previous_response_id: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    top_k: Option<u32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    tools: Vec<ToolDef>,
    #[serde(default)]
    tool_choice: Option<ToolChoiceValue>,
}

#[derive(Deserialize)]
struct InputMessage {
    role: Role,
    content: String,
}

#[derive(Deserialize)]
struct ToolDef {
    function: ToolFunctionDef,
}

#[derive(Deserialize)]
struct ToolFunctionDef {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_tool_parameters")]
    parameters: serde_json::Value,
}

fn default_tool_parameters() -> serde_json::Value {
    serde_json::json!({})
}

/// `tool_choice` is either the bare strings `"auto"`/`"none"` or `{type, function:{name}}`;
/// the latter is treated as `Required` since this gateway doesn't route to a single named tool.
#[derive(Deserialize)]
#[serde(untagged)]
enum ToolChoiceValue {
    Mode(String),
    Named(serde_json::Value),
}

impl ToolChoiceValue {
    fn into_mode(self) -> Result<ToolChoiceMode, GatewayError> {
        match self {
            Self::Mode(s) => s
                .parse()
                .map_err(|e| GatewayError::validation(format!("invalid tool_choice: {}", e))),
            Self::Named(_) => Ok(ToolChoiceMode::Required),
        }
    }
}

/// Accepts a plain string (a single user turn) or an array of strings/`{role, content}`
/// objects, matching the flexible `input` shape callers of an OpenAI-style responses API expect.
fn parse_input(value: &serde_json::Value) -> Result<Vec<ChatMessage>, GatewayError> {
    match value {
        serde_json::Value::String(s) => Ok(vec![ChatMessage::user(s.clone())]),
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_json::Value::String(s) => out.push(ChatMessage::user(s.clone())),
                    serde_json::Value::Object(_) => {
                        let msg: InputMessage = serde_json::from_value(item.clone())
                            .map_err(|e| GatewayError::validation(format!("invalid input message: {}", e)))?;
                        out.push(ChatMessage {
                            role: msg.role,
                            content: Some(MessageContent::Text(msg.content)),
                            ..Default::default()
                        });
                    }
                    other => {
                        return Err(GatewayError::validation(format!(
                            "unsupported input element: {}",
                            other
                        )))
                    }
                }
            }
            Ok(out)
        }
        other => Err(GatewayError::validation(format!("unsupported input shape: {}", other))),
    }
}

fn to_sse_event(value: serde_json::Value) -> Event {
    let name = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("message")
        .to_string();
    Event::default()
        .event(name)
        .json_data(value)
        .unwrap_or_else(|_| Event::default().event("response.error"))
}

/// Cancels the token it holds when the SSE stream it's embedded in is dropped — the only
/// signal axum gives us that a client disconnected mid-stream.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn create_response(
    State(state): State<Arc<AppState>>,
    user: UserId,
    Json(mut body): Json<CreateResponseRequest>,
) -> Result<axum::response::Response, ApiError> {
    let mut input = parse_input(&body.input)?;
    if let Some(system_prompt) = &body.system_prompt {
        input = gateway_core::prompt::append_system_content(input, system_prompt);
    }

    let tools: Vec<ToolSpec> = body
        .tools
        .iter()
        .map(|t| ToolSpec {
            name: t.function.name.clone(),
            description: t.function.description.clone(),
            parameters: t.function.parameters.clone(),
        })
        .collect();
    let tool_choice = body
        .tool_choice
        .take()
        .map(ToolChoiceValue::into_mode)
        .transpose()?;

    let mut preferences = std::collections::HashMap::new();
    if !tools.is_empty() {
        preferences.insert("use_tools".to_string(), PreferenceValue::Bool(true));
    }

    let params = CreateResponseParams {
        user_id: user.0.clone(),
        model: body.model.clone(),
        input,
        raw_input: body.input.clone(),
        stream: body.stream,
        conversation_public_id: body.conversation_id.clone(),
        previous_response_id: body.previous_response_id.clone(),
        api_key: std::env::var("GATEWAY_UPSTREAM_API_KEY").ok(),
        temperature: body.temperature,
        top_p: body.top_p,
        top_k: body.top_k,
        max_tokens: body.max_tokens,
        tools,
        tool_choice,
    };

    let ctx = gateway_core::PromptContext {
        user_id: user.0.clone(),
        preferences,
        ..Default::default()
    };

    if !body.stream {
        let cancel = CancellationToken::new();
        let response = state.engine.create(&cancel, ctx, params).await?;
        return Ok(Json(response.to_dto()).into_response());
    }

    let (tx, rx) = mpsc::channel::<serde_json::Value>(64);
    let cancel = CancellationToken::new();
    let engine = state.engine.clone();
    let producer_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = engine.stream(producer_cancel, ctx, params, tx).await;
    });

    let guard = CancelOnDrop(cancel);
    let stream = ReceiverStream::new(rx)
        .map(move |value| {
            let _ = &guard;
            Ok::<Event, Infallible>(to_sse_event(value))
        })
        .chain(tokio_stream::once(Ok(Event::default().data("[DONE]"))));

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().text("")).into_response())
}

async fn get_response(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let response = state.engine.get(&id).await?;
    Ok(Json(response.to_dto()))
}

async fn cancel_response(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let response = state.engine.cancel(&id).await?;
    Ok(Json(response.to_dto()))
}

#[derive(Deserialize, Default)]
struct InputItemsQuery {
    limit: Option<usize>,
    after: Option<u64>,
    before: Option<u64>,
    #[serde(default)]
    descending: bool,
}

async fn list_input_items(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(id): Path<String>,
    Query(query): Query<InputItemsQuery>,
) -> Result<Json<Vec<gateway_core::Item>>, ApiError> {
    let response = state.engine.get(&id).await?;
    let conversation_id = response
        .conversation_id
        .ok_or_else(|| GatewayError::not_found(format!("response {} has no conversation", id)))?;
    let items = state
        .conversations
        .list_branch_items(
            conversation_id,
            MAIN_BRANCH,
            Pagination {
                limit: query.limit.unwrap_or(0),
                after: query.after,
                before: query.before,
                descending: query.descending,
            },
        )
        .await?;
    Ok(Json(items))
}

async fn get_plan(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(id): Path<String>,
) -> Result<Json<gateway_core::Plan>, ApiError> {
    Ok(Json(state.plans.find_by_response_id(&id).await?))
}

async fn get_plan_details(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let plan = state.plans.find_by_response_id(&id).await?;
    let (plan, tasks, steps) = state.plans.get_plan_details(&plan.public_id).await?;
    Ok(Json(serde_json::json!({ "plan": plan, "tasks": tasks, "steps": steps })))
}

async fn get_plan_progress(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let plan = state.plans.find_by_response_id(&id).await?;
    Ok(Json(serde_json::json!({
        "status": plan.status,
        "progress": plan.progress,
        "completed_steps": plan.completed_steps,
        "estimated_steps": plan.estimated_steps,
    })))
}

async fn get_plan_tasks(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(id): Path<String>,
) -> Result<Json<Vec<gateway_core::Task>>, ApiError> {
    let plan = state.plans.find_by_response_id(&id).await?;
    let (_, tasks, _) = state.plans.get_plan_details(&plan.public_id).await?;
    Ok(Json(tasks))
}

#[derive(Deserialize)]
struct CancelPlanRequest {
    reason: String,
}

async fn cancel_plan(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(id): Path<String>,
    Json(body): Json<CancelPlanRequest>,
) -> Result<Json<gateway_core::Plan>, ApiError> {
    let plan = state.plans.find_by_response_id(&id).await?;
    Ok(Json(state.plans.cancel_plan(&plan.public_id, body.reason).await?))
}

#[derive(Deserialize, Default)]
struct SubmitPlanInputRequest {
    selection: Option<String>,
    approval: Option<bool>,
    message: Option<String>,
}

async fn submit_plan_input(
    State(state): State<Arc<AppState>>,
    _user: UserId,
    Path(id): Path<String>,
    Json(body): Json<SubmitPlanInputRequest>,
) -> Result<Json<gateway_core::Plan>, ApiError> {
    let plan = state.plans.find_by_response_id(&id).await?;
    Ok(Json(
        state
            .plans
            .submit_user_input(&plan.public_id, body.selection, body.approval, body.message)
            .await?,
    ))
}

//! Prompt-module orchestration: a priority-ordered pipeline of conditional modules that
//! mutate a message list before it is dispatched upstream.

mod modules;
mod template;

pub use modules::{
    ChainOfThoughtModule, CodeAssistantModule, DeepResearchModule, MemoryModule,
    PersonaModule, ProjectInstructionModule, TimingModule, ToolInstructionsModule,
    UserProfileModule,
};
pub use template::{InMemoryTemplateStore, TemplateStore};

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::message::ChatMessage;

/// A caller-supplied preference value. Booleans are also accepted spelled as the strings
/// `"true"`/`"false"`, since callers commonly round-trip preferences through a JSON map
/// that doesn't distinguish.
#[derive(Clone, Debug, PartialEq)]
pub enum PreferenceValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl PreferenceValue {
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Text(s) => s.eq_ignore_ascii_case("true"),
            Self::List(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Vec<String> {
        match self {
            Self::List(v) => v.clone(),
            Self::Text(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
            Self::Bool(_) => Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BaseStyle {
    #[default]
    Friendly,
    Concise,
    Professional,
}

#[derive(Clone, Debug, Default)]
pub struct UserProfile {
    pub base_style: BaseStyle,
    pub custom_instructions: String,
    pub nick_name: String,
    pub occupation: String,
    pub more_about_you: String,
}

impl UserProfile {
    pub fn is_populated(&self) -> bool {
        !self.custom_instructions.trim().is_empty()
            || !self.nick_name.trim().is_empty()
            || !self.occupation.trim().is_empty()
            || !self.more_about_you.trim().is_empty()
    }
}

/// Per-request context threaded through the prompt pipeline.
#[derive(Clone, Debug, Default)]
pub struct PromptContext {
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub language: Option<String>,
    pub preferences: HashMap<String, PreferenceValue>,
    pub memory: Vec<String>,
    pub project_instruction: String,
    pub profile: Option<UserProfile>,
    pub model_catalog_id: Option<String>,
    pub applied_modules: Vec<String>,
}

impl PromptContext {
    pub fn preference(&self, key: &str) -> Option<&PreferenceValue> {
        self.preferences.get(key)
    }

    pub fn preference_bool(&self, key: &str) -> bool {
        self.preferences.get(key).map(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn disabled_modules(&self) -> HashSet<String> {
        self.preferences
            .get("disable_modules")
            .map(|v| v.as_list().into_iter().collect())
            .unwrap_or_default()
    }
}

/// A single module in the prompt pipeline.
///
/// `should_apply` and `apply` both observe `cancel`: a cancelled token makes `should_apply`
/// return `false` and `apply` return a cancellation error immediately.
#[async_trait]
pub trait PromptModule: Send + Sync {
    fn name(&self) -> &'static str;

    fn priority(&self) -> i32;

    async fn should_apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        messages: &[ChatMessage],
    ) -> bool;

    async fn apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        messages: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>, GatewayError>;
}

/// Appends `extra` to the message immediately following the first system message (reserved
/// for `ProjectInstructionModule`), inserting a new system message there if none exists yet.
pub fn append_system_content(mut messages: Vec<ChatMessage>, extra: &str) -> Vec<ChatMessage> {
    use crate::message::{MessageContent, Role};

    let first_system_idx = messages.iter().position(|m| m.role == Role::System);
    let insert_at = match first_system_idx {
        Some(idx) => idx + 1,
        None => 0,
    };

    if let Some(existing) = messages.get_mut(insert_at) {
        if existing.role == Role::System {
            let base = existing.text();
            let merged = if base.trim().is_empty() {
                extra.to_string()
            } else {
                format!("{}\n\n{}", base, extra)
            };
            existing.content = Some(MessageContent::Text(merged));
            return messages;
        }
    }

    messages.insert(insert_at, ChatMessage::system(extra));
    messages
}

/// Error returned when the pipeline fails partway through: carries the message list as it
/// stood immediately before the failing module ran, so a caller can still proceed with a
/// best-effort prompt rather than discarding all prior module output.
#[derive(Debug)]
pub struct PromptPipelineError {
    pub pre_apply_messages: Vec<ChatMessage>,
    pub cause: GatewayError,
}

impl std::fmt::Display for PromptPipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "prompt pipeline failed: {}", self.cause)
    }
}

impl std::error::Error for PromptPipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Outcome of a successful pipeline run.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub messages: Vec<ChatMessage>,
    pub applied_modules: Vec<String>,
}

/// Sorted registry of prompt modules, run in ascending priority order.
pub struct PromptProcessor {
    modules: Vec<Box<dyn PromptModule>>,
}

impl PromptProcessor {
    pub fn new(mut modules: Vec<Box<dyn PromptModule>>) -> Self {
        modules.sort_by_key(|m| m.priority());
        Self { modules }
    }

    /// Default registry: every built-in module at its documented priority.
    pub fn with_defaults(default_persona: String) -> Self {
        Self::new(vec![
            Box::new(DeepResearchModule::default()),
            Box::new(TimingModule::default()),
            Box::new(ProjectInstructionModule),
            Box::new(UserProfileModule),
            Box::new(MemoryModule),
            Box::new(ToolInstructionsModule),
            Box::new(CodeAssistantModule),
            Box::new(ChainOfThoughtModule),
            Box::new(PersonaModule::new(default_persona)),
        ])
    }

    pub async fn process(
        &self,
        cancel: &CancellationToken,
        ctx: &mut PromptContext,
        messages: Vec<ChatMessage>,
    ) -> Result<ProcessOutcome, PromptPipelineError> {
        if cancel.is_cancelled() {
            return Err(PromptPipelineError {
                pre_apply_messages: messages,
                cause: GatewayError::cancelled("prompt pipeline cancelled before start"),
            });
        }

        let disabled = ctx.disabled_modules();
        let mut current = messages;
        let mut applied = Vec::new();

        for module in &self.modules {
            if disabled.contains(module.name()) {
                continue;
            }
            if !module.should_apply(cancel, ctx, &current).await {
                continue;
            }
            let pre_apply = current.clone();
            match module.apply(cancel, ctx, current).await {
                Ok(next) => {
                    current = next;
                    applied.push(module.name().to_string());
                }
                Err(err) => {
                    return Err(PromptPipelineError {
                        pre_apply_messages: pre_apply,
                        cause: err,
                    });
                }
            }
        }

        ctx.applied_modules = applied.clone();
        Ok(ProcessOutcome {
            messages: current,
            applied_modules: applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[tokio::test]
    async fn disabled_module_is_skipped() {
        let mut ctx = PromptContext {
            project_instruction: "always follow house style".into(),
            ..Default::default()
        };
        ctx.preferences.insert(
            "disable_modules".into(),
            PreferenceValue::List(vec!["project_instruction".into()]),
        );
        let processor = PromptProcessor::new(vec![Box::new(ProjectInstructionModule)]);
        let cancel = CancellationToken::new();
        let outcome = processor
            .process(&cancel, &mut ctx, vec![ChatMessage::user("hi")])
            .await
            .unwrap();
        assert!(outcome.applied_modules.is_empty());
        assert_eq!(outcome.messages.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_before_any_module_runs() {
        let mut ctx = PromptContext::default();
        let processor = PromptProcessor::new(vec![Box::new(TimingModule::default())]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let messages = vec![ChatMessage::user("hi")];
        let err = processor
            .process(&cancel, &mut ctx, messages.clone())
            .await
            .unwrap_err();
        assert_eq!(err.pre_apply_messages, messages);
        assert_eq!(err.cause.kind, crate::error::ErrorKind::Cancelled);
    }

    #[test]
    fn append_system_content_inserts_after_first_system_message() {
        let messages = vec![
            ChatMessage::system("project rules"),
            ChatMessage::user("hi"),
        ];
        let out = append_system_content(messages, "be concise");
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[0].text(), "project rules");
        assert_eq!(out[1].role, Role::System);
        assert_eq!(out[1].text(), "be concise");
    }

    #[test]
    fn append_system_content_merges_into_existing_second_system_message() {
        let messages = vec![
            ChatMessage::system("project rules"),
            ChatMessage::system("today is Monday"),
            ChatMessage::user("hi"),
        ];
        let out = append_system_content(messages, "be concise");
        assert_eq!(out.len(), 3);
        assert!(out[1].text().contains("today is Monday"));
        assert!(out[1].text().contains("be concise"));
    }
}

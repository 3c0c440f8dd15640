//! Built-in prompt modules.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{append_system_content, BaseStyle, PromptContext, PromptModule, TemplateStore};
use crate::error::GatewayError;
use crate::message::{ChatMessage, Role};

fn cancelled(name: &str) -> GatewayError {
    GatewayError::cancelled(format!("{} cancelled", name))
}

/// Prepends a system message naming the assistant identity and the current date.
#[derive(Default)]
pub struct TimingModule {
    templates: Option<Arc<dyn TemplateStore>>,
}

impl TimingModule {
    pub fn with_templates(templates: Arc<dyn TemplateStore>) -> Self {
        Self {
            templates: Some(templates),
        }
    }
}

#[async_trait]
impl PromptModule for TimingModule {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn priority(&self) -> i32 {
        -15
    }

    async fn should_apply(
        &self,
        cancel: &CancellationToken,
        _ctx: &PromptContext,
        _messages: &[ChatMessage],
    ) -> bool {
        !cancel.is_cancelled()
    }

    async fn apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        messages: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        if cancel.is_cancelled() {
            return Err(cancelled(self.name()));
        }
        let current_date = Utc::now().format("%B %-d, %Y").to_string();
        let text = self
            .templates
            .as_ref()
            .and_then(|t| {
                let mut vars = std::collections::HashMap::new();
                vars.insert("CurrentDate".to_string(), current_date.clone());
                t.render("timing", ctx.model_catalog_id.as_deref(), &vars)
            })
            .unwrap_or_else(|| {
                format!(
                    "You are a helpful AI assistant. Today's date is {}.",
                    current_date
                )
            });
        Ok(append_system_content(messages, &text))
    }
}

/// Prepends the project-wide instruction as the first system message. The only module
/// permitted to occupy index 0; every other module appends after it.
pub struct ProjectInstructionModule;

#[async_trait]
impl PromptModule for ProjectInstructionModule {
    fn name(&self) -> &'static str {
        "project_instruction"
    }

    fn priority(&self) -> i32 {
        -10
    }

    async fn should_apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        _messages: &[ChatMessage],
    ) -> bool {
        !cancel.is_cancelled() && !ctx.project_instruction.trim().is_empty()
    }

    async fn apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        mut messages: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        if cancel.is_cancelled() {
            return Err(cancelled(self.name()));
        }
        let text = format!(
            "{}\n\nThis instruction takes priority over all other guidance.",
            ctx.project_instruction.trim()
        );
        messages.insert(0, ChatMessage::system(text));
        Ok(messages)
    }
}

/// Composes a "User context" block from the caller's profile.
pub struct UserProfileModule;

#[async_trait]
impl PromptModule for UserProfileModule {
    fn name(&self) -> &'static str {
        "user_profile"
    }

    fn priority(&self) -> i32 {
        5
    }

    async fn should_apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        _messages: &[ChatMessage],
    ) -> bool {
        !cancel.is_cancelled() && ctx.profile.as_ref().is_some_and(|p| p.is_populated())
    }

    async fn apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        messages: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        if cancel.is_cancelled() {
            return Err(cancelled(self.name()));
        }
        let profile = ctx.profile.as_ref().expect("checked by should_apply");
        let style = match profile.base_style {
            BaseStyle::Friendly => "Respond in a warm, friendly tone.",
            BaseStyle::Concise => "Respond concisely, favoring brevity over elaboration.",
            BaseStyle::Professional => "Respond in a formal, professional tone.",
        };
        let mut block = String::from(style);
        if !profile.custom_instructions.trim().is_empty() {
            block.push_str("\n\n");
            block.push_str(profile.custom_instructions.trim());
        }
        let mut bullets = Vec::new();
        if !profile.nick_name.trim().is_empty() {
            bullets.push(format!("- Preferred name: {}", profile.nick_name.trim()));
        }
        if !profile.occupation.trim().is_empty() {
            bullets.push(format!("- Occupation: {}", profile.occupation.trim()));
        }
        if !profile.more_about_you.trim().is_empty() {
            bullets.push(format!("- More about them: {}", profile.more_about_you.trim()));
        }
        if !bullets.is_empty() {
            block.push_str("\n\nUser context:\n");
            block.push_str(&bullets.join("\n"));
        }
        Ok(append_system_content(messages, &block))
    }
}

/// Injects remembered facts about the user as a bullet list.
pub struct MemoryModule;

#[async_trait]
impl PromptModule for MemoryModule {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn should_apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        _messages: &[ChatMessage],
    ) -> bool {
        !cancel.is_cancelled() && !ctx.memory.is_empty()
    }

    async fn apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        messages: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        if cancel.is_cancelled() {
            return Err(cancelled(self.name()));
        }
        let bullets: Vec<String> = ctx.memory.iter().map(|m| format!("- {}", m)).collect();
        let text = format!("Known context about the user:\n{}", bullets.join("\n"));
        Ok(append_system_content(messages, &text))
    }
}

/// Injects tool-use instructions when tools are in play for this turn.
pub struct ToolInstructionsModule;

#[async_trait]
impl PromptModule for ToolInstructionsModule {
    fn name(&self) -> &'static str {
        "tool_instructions"
    }

    fn priority(&self) -> i32 {
        20
    }

    async fn should_apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        messages: &[ChatMessage],
    ) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        if ctx.preference_bool("use_tools") {
            return true;
        }
        if messages.iter().any(|m| m.role == Role::Tool) {
            return true;
        }
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .is_some_and(|m| {
                m.function_call.is_some()
                    || m.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
            })
    }

    async fn apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        messages: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        if cancel.is_cancelled() {
            return Err(cancelled(self.name()));
        }
        let mut text = String::from(
            "You have access to tools. Call a tool only when it is necessary to answer \
             the user's request, and always wait for the tool result before continuing.",
        );
        if let Some(descr) = ctx.preference("tool_descriptions") {
            let list = descr.as_list();
            if !list.is_empty() {
                text.push_str("\n\nAvailable tools:\n");
                text.push_str(
                    &list
                        .iter()
                        .map(|d| format!("- {}", d))
                        .collect::<Vec<_>>()
                        .join("\n"),
                );
            }
        }
        Ok(append_system_content(messages, &text))
    }
}

fn last_user_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.text())
        .unwrap_or_default()
}

const CODE_STRONG_SIGNALS: &[&str] = &[
    "func ",
    "function(",
    "class ",
    "package ",
    "import ",
    "console.log",
    "panic(",
    "error ",
    "exception",
    "stack trace",
    "traceback",
    "sql",
    "json",
    "yaml",
    "schema",
];

const CODE_TOPIC_WORDS: &[&str] = &[
    "code",
    "function",
    "implement",
    "debug",
    "bug",
    "syntax",
    "compile",
    "script",
    "api",
    "snippet",
    "library",
];

const CODE_ACTION_WORDS: &[&str] = &[
    "write",
    "example",
    "implement",
    "show",
    "fix",
    "break down",
    "refactor",
    "debug",
    "troubleshoot",
];

/// Detects whether the user's last message is likely about code, per a layered heuristic:
/// a fenced code block always counts; otherwise a strong lexical signal counts (unless the
/// message is actually about a "code of conduct"); otherwise a topic word co-occurring with
/// an action word counts.
fn looks_like_code(text: &str) -> bool {
    if text.contains("```") {
        return true;
    }
    let lower = text.to_lowercase();
    if lower.contains("code of conduct") {
        return false;
    }
    if CODE_STRONG_SIGNALS.iter().any(|s| lower.contains(s)) {
        return true;
    }
    let has_topic = CODE_TOPIC_WORDS.iter().any(|w| lower.contains(w));
    let has_action = CODE_ACTION_WORDS.iter().any(|w| lower.contains(w));
    has_topic && has_action
}

/// Injects a short set of code-assistant conventions when the user appears to be asking
/// about code.
pub struct CodeAssistantModule;

#[async_trait]
impl PromptModule for CodeAssistantModule {
    fn name(&self) -> &'static str {
        "code_assistant"
    }

    fn priority(&self) -> i32 {
        30
    }

    async fn should_apply(
        &self,
        cancel: &CancellationToken,
        _ctx: &PromptContext,
        messages: &[ChatMessage],
    ) -> bool {
        !cancel.is_cancelled() && looks_like_code(&last_user_text(messages))
    }

    async fn apply(
        &self,
        cancel: &CancellationToken,
        _ctx: &PromptContext,
        messages: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        if cancel.is_cancelled() {
            return Err(cancelled(self.name()));
        }
        let text = "When discussing code, use fenced code blocks with a language tag, \
                     explain non-obvious choices briefly, and call out any assumptions \
                     about the surrounding codebase.";
        Ok(append_system_content(messages, text))
    }
}

const REASONING_KEYWORDS: &[&str] = &[
    "why",
    "how",
    "explain",
    "analyze",
    "compare",
    "evaluate",
    "what if",
    "step by step",
];

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn wants_chain_of_thought(text: &str) -> bool {
    let lower = text.to_lowercase();
    if REASONING_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }
    let words = word_count(text);
    if words >= 20 && text.contains('?') {
        return true;
    }
    words >= 30
}

/// Asks the model to reason step by step for questions that look analytical or long.
pub struct ChainOfThoughtModule;

#[async_trait]
impl PromptModule for ChainOfThoughtModule {
    fn name(&self) -> &'static str {
        "chain_of_thought"
    }

    fn priority(&self) -> i32 {
        40
    }

    async fn should_apply(
        &self,
        cancel: &CancellationToken,
        _ctx: &PromptContext,
        messages: &[ChatMessage],
    ) -> bool {
        !cancel.is_cancelled() && wants_chain_of_thought(&last_user_text(messages))
    }

    async fn apply(
        &self,
        cancel: &CancellationToken,
        _ctx: &PromptContext,
        messages: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        if cancel.is_cancelled() {
            return Err(cancelled(self.name()));
        }
        let text = "Think through this step by step before giving your final answer, \
                     then present the answer clearly at the end.";
        Ok(append_system_content(messages, text))
    }
}

/// Prepends a deep-research system prompt when the caller opted in via preferences.
#[derive(Default)]
pub struct DeepResearchModule {
    templates: Option<Arc<dyn TemplateStore>>,
}

impl DeepResearchModule {
    pub fn with_templates(templates: Arc<dyn TemplateStore>) -> Self {
        Self {
            templates: Some(templates),
        }
    }
}

const DEEP_RESEARCH_FALLBACK: &str = "You are conducting deep research: decompose the \
    question, gather evidence from multiple angles, and synthesize a well-sourced answer \
    rather than responding from memory alone.";

#[async_trait]
impl PromptModule for DeepResearchModule {
    fn name(&self) -> &'static str {
        "deep_research"
    }

    fn priority(&self) -> i32 {
        -20
    }

    async fn should_apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        _messages: &[ChatMessage],
    ) -> bool {
        !cancel.is_cancelled() && ctx.preference_bool("deep_research")
    }

    async fn apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        mut messages: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        if cancel.is_cancelled() {
            return Err(cancelled(self.name()));
        }
        let text = self
            .templates
            .as_ref()
            .and_then(|t| {
                t.render(
                    "deep_research",
                    ctx.model_catalog_id.as_deref(),
                    &std::collections::HashMap::new(),
                )
            })
            .unwrap_or_else(|| DEEP_RESEARCH_FALLBACK.to_string());
        messages.insert(0, ChatMessage::system(text));
        Ok(messages)
    }
}

/// Gives the assistant a persona line, resolved from preferences, then the caller's
/// profile, then a configured default.
pub struct PersonaModule {
    default_persona: String,
}

impl PersonaModule {
    pub fn new(default_persona: String) -> Self {
        Self { default_persona }
    }

    fn resolve(&self, ctx: &PromptContext) -> Option<String> {
        if let Some(p) = ctx.preference("persona").and_then(|v| v.as_text()) {
            if !p.trim().is_empty() {
                return Some(p.trim().to_string());
            }
        }
        if let Some(profile) = &ctx.profile {
            if !profile.nick_name.trim().is_empty() {
                return Some(format!(
                    "a personal assistant who addresses the user as {}",
                    profile.nick_name.trim()
                ));
            }
        }
        if !self.default_persona.trim().is_empty() {
            return Some(self.default_persona.trim().to_string());
        }
        None
    }
}

#[async_trait]
impl PromptModule for PersonaModule {
    fn name(&self) -> &'static str {
        "persona"
    }

    fn priority(&self) -> i32 {
        50
    }

    async fn should_apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        _messages: &[ChatMessage],
    ) -> bool {
        !cancel.is_cancelled() && self.resolve(ctx).is_some()
    }

    async fn apply(
        &self,
        cancel: &CancellationToken,
        ctx: &PromptContext,
        messages: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        if cancel.is_cancelled() {
            return Err(cancelled(self.name()));
        }
        let persona = self.resolve(ctx).expect("checked by should_apply");
        let text = format!("You are {}.", persona);
        Ok(append_system_content(messages, &text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_like_code_detects_fenced_block() {
        assert!(looks_like_code("here is my snippet:\n```rust\nfn main() {}\n```"));
    }

    #[test]
    fn looks_like_code_detects_strong_signal() {
        assert!(looks_like_code("I'm getting a stack trace from this function"));
    }

    #[test]
    fn looks_like_code_excludes_code_of_conduct() {
        assert!(!looks_like_code(
            "can you summarize the project's code of conduct?"
        ));
    }

    #[test]
    fn looks_like_code_requires_topic_and_action_cooccurrence() {
        assert!(looks_like_code("can you write an example implementation for parsing csv"));
        assert!(!looks_like_code("what's your favorite library to read"));
    }

    #[test]
    fn wants_chain_of_thought_on_keyword() {
        assert!(wants_chain_of_thought("why does this happen?"));
    }

    #[test]
    fn wants_chain_of_thought_on_long_question() {
        let q = "is it ever a good idea to mix these two approaches together in one system and expect it to behave predictably?";
        assert!(wants_chain_of_thought(q));
    }

    #[test]
    fn wants_chain_of_thought_false_for_short_statement() {
        assert!(!wants_chain_of_thought("thanks!"));
    }

    #[tokio::test]
    async fn persona_module_prefers_preference_over_default() {
        let mut ctx = PromptContext::default();
        ctx.preferences.insert(
            "persona".into(),
            super::super::PreferenceValue::Text("a pirate".into()),
        );
        let module = PersonaModule::new("a helpful assistant".into());
        let cancel = CancellationToken::new();
        assert!(module.should_apply(&cancel, &ctx, &[]).await);
        let out = module.apply(&cancel, &ctx, vec![]).await.unwrap();
        assert!(out[0].text().contains("a pirate"));
    }

    #[tokio::test]
    async fn persona_module_falls_back_to_default() {
        let ctx = PromptContext::default();
        let module = PersonaModule::new("a helpful assistant".into());
        let cancel = CancellationToken::new();
        let out = module.apply(&cancel, &ctx, vec![]).await.unwrap();
        assert!(out[0].text().contains("a helpful assistant"));
    }

    #[tokio::test]
    async fn tool_instructions_applies_when_last_assistant_message_has_tool_calls() {
        use crate::message::{FunctionCall, ToolCall};
        let ctx = PromptContext::default();
        let messages = vec![
            ChatMessage::user("list files"),
            ChatMessage {
                role: Role::Assistant,
                content: None,
                tool_calls: Some(vec![ToolCall {
                    id: "call_1".into(),
                    call_type: "function".into(),
                    function: FunctionCall {
                        name: "list_files".into(),
                        arguments: "{}".into(),
                    },
                }]),
                function_call: None,
                reasoning_content: None,
                tool_call_id: None,
            },
        ];
        let module = ToolInstructionsModule;
        let cancel = CancellationToken::new();
        assert!(module.should_apply(&cancel, &ctx, &messages).await);
    }
}

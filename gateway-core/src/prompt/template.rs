//! Template lookup for prompt modules that render text instead of hardcoding it.
//!
//! Resolve order, per module: model-specific override -> global template by key ->
//! hardcoded constant (the caller's fallback, not represented here).

use std::collections::HashMap;

/// A store of named templates with optional per-model overrides.
pub trait TemplateStore: Send + Sync {
    /// Looks up a template by key, preferring a `model_id`-specific override when present,
    /// and renders `{Var}` placeholders from `vars`. Returns `None` if no template (global
    /// or override) is registered under `key`.
    fn render(
        &self,
        key: &str,
        model_id: Option<&str>,
        vars: &HashMap<String, String>,
    ) -> Option<String>;
}

/// In-memory template store backed by two maps: global templates by key, and per-model
/// overrides keyed by `(model_id, key)`.
#[derive(Default)]
pub struct InMemoryTemplateStore {
    global: HashMap<String, String>,
    overrides: HashMap<(String, String), String>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_global(&mut self, key: impl Into<String>, template: impl Into<String>) {
        self.global.insert(key.into(), template.into());
    }

    pub fn set_model_override(
        &mut self,
        model_id: impl Into<String>,
        key: impl Into<String>,
        template: impl Into<String>,
    ) {
        self.overrides
            .insert((model_id.into(), key.into()), template.into());
    }
}

fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    out
}

impl TemplateStore for InMemoryTemplateStore {
    fn render(
        &self,
        key: &str,
        model_id: Option<&str>,
        vars: &HashMap<String, String>,
    ) -> Option<String> {
        if let Some(model_id) = model_id {
            if let Some(t) = self
                .overrides
                .get(&(model_id.to_string(), key.to_string()))
            {
                return Some(substitute(t, vars));
            }
        }
        self.global.get(key).map(|t| substitute(t, vars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_override_wins_over_global() {
        let mut store = InMemoryTemplateStore::new();
        store.set_global("timing", "Today is {CurrentDate}.");
        store.set_model_override("gpt-5", "timing", "Date: {CurrentDate} (gpt-5 flavor)");
        let mut vars = HashMap::new();
        vars.insert("CurrentDate".to_string(), "July 28, 2026".to_string());

        let rendered = store.render("timing", Some("gpt-5"), &vars).unwrap();
        assert_eq!(rendered, "Date: July 28, 2026 (gpt-5 flavor)");

        let global = store.render("timing", Some("other-model"), &vars).unwrap();
        assert_eq!(global, "Today is July 28, 2026.");
    }

    #[test]
    fn missing_key_returns_none() {
        let store = InMemoryTemplateStore::new();
        assert!(store.render("nonexistent", None, &HashMap::new()).is_none());
    }
}

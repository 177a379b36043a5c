//! Configuration bridge between the client and rules or providers.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;
use tower_lsp::lsp_types::Url;

/// Callback fired with the new configuration after it changes.
pub type ConfigurationListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Source of configuration values.
#[tower_lsp::async_trait]
pub trait ConfigurationHost: Send + Sync {
    /// Look up a dotted `section` (e.g. `"css.lint"`), optionally for one document.
    async fn get_configuration(&self, section: &str, scope: Option<&Url>) -> Option<Value>;

    /// Register a callback for configuration changes.
    fn on_did_change_configuration(&self, listener: ConfigurationListener);
}

/// In-process configuration held as one JSON value.
///
/// Seeded from the `[configuration]` table of `embedls.toml` and replaced on
/// `workspace/didChangeConfiguration`.
#[derive(Default)]
pub struct SettingsConfiguration {
    value: RwLock<Value>,
    listeners: Mutex<Vec<ConfigurationListener>>,
}

impl std::fmt::Debug for SettingsConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsConfiguration")
            .field("value", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl SettingsConfiguration {
    pub fn new(value: Value) -> Self {
        Self {
            value: RwLock::new(value),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Current configuration value.
    pub fn snapshot(&self) -> Value {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration and notify listeners.
    pub fn replace(&self, value: Value) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = value.clone();
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        tracing::debug!(listeners = listeners.len(), "configuration changed");
        for listener in listeners {
            listener(&value);
        }
    }

    /// Value at a dotted section; the empty section is the whole value.
    pub fn lookup(&self, section: &str) -> Option<Value> {
        let value = self.value.read().unwrap_or_else(PoisonError::into_inner);
        section
            .split('.')
            .filter(|s| !s.is_empty())
            .try_fold(&*value, |value, key| value.get(key))
            .cloned()
    }
}

#[tower_lsp::async_trait]
impl ConfigurationHost for SettingsConfiguration {
    async fn get_configuration(&self, section: &str, _scope: Option<&Url>) -> Option<Value> {
        self.lookup(section)
    }

    fn on_did_change_configuration(&self, listener: ConfigurationListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn dotted_sections_resolve() {
        let config = SettingsConfiguration::new(json!({"css": {"lint": {"empty": "warning"}}}));
        assert_eq!(
            config.get_configuration("css.lint.empty", None).await,
            Some(json!("warning"))
        );
        assert_eq!(config.get_configuration("css.missing", None).await, None);
        assert_eq!(config.get_configuration("", None).await, Some(config.snapshot()));
    }

    #[test]
    fn replace_notifies_listeners() {
        let config = SettingsConfiguration::new(json!({}));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        config.on_did_change_configuration(Arc::new(move |value| {
            assert_eq!(value["tab"], json!(2));
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        config.replace(json!({"tab": 2}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(config.lookup("tab"), Some(json!(2)));
    }
}

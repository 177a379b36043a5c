//! Diagnostic rules with attached fixes.
//!
//! A [`Rule`] runs in up to three stages (syntax, semantic, format) over one
//! document at a time and reports diagnostics through its [`RuleContext`].
//! Fixes attached to a report are indexed by the [`RuleEngine`] so a later
//! code-action request can retrieve exactly the fix that was reported.

mod engine;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::{
    CodeActionKind, Diagnostic, DiagnosticSeverity, NumberOrString, TextEdit, Url, WorkspaceEdit,
};

use crate::config::{ConfigurationHost, ConfigurationListener};
use crate::document::TextDocument;

pub use engine::{FixRef, RuleEngine};

/// A diagnostic rule. Every stage hook is optional.
#[tower_lsp::async_trait]
#[allow(unused_variables)]
pub trait Rule: Send + Sync {
    async fn on_syntax(&self, context: &RuleContext) {}

    async fn on_semantic(&self, context: &RuleContext) {}

    async fn on_format(&self, context: &RuleContext) {}
}

/// Stage a rule hook runs in, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStage {
    Syntax,
    Semantic,
    Format,
}

impl RuleStage {
    pub const ORDER: [RuleStage; 3] = [Self::Syntax, Self::Semantic, Self::Format];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Semantic => "semantic",
            Self::Format => "format",
        }
    }
}

impl fmt::Display for RuleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity override for a rule, as written in `embedls.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleLevel {
    Off,
    Error,
    Warning,
    Info,
    Hint,
}

impl RuleLevel {
    pub fn severity(self) -> Option<DiagnosticSeverity> {
        match self {
            Self::Off => None,
            Self::Error => Some(DiagnosticSeverity::ERROR),
            Self::Warning => Some(DiagnosticSeverity::WARNING),
            Self::Info => Some(DiagnosticSeverity::INFORMATION),
            Self::Hint => Some(DiagnosticSeverity::HINT),
        }
    }
}

type TextEditsFn = dyn Fn(&Diagnostic) -> Vec<TextEdit> + Send + Sync;
type WorkspaceEditFn = dyn Fn(&Diagnostic) -> WorkspaceEdit + Send + Sync;

/// How a fix produces its edit, computed only when the fix is resolved.
#[derive(Clone, Default)]
pub enum FixEdit {
    /// The fix has no edit (e.g. it only runs a command on the client).
    #[default]
    None,
    /// Edits to the document the rule ran on.
    TextEdits(Arc<TextEditsFn>),
    /// Edits to any documents.
    WorkspaceEdit(Arc<WorkspaceEditFn>),
}

impl fmt::Debug for FixEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::TextEdits(_) => f.write_str("TextEdits(..)"),
            Self::WorkspaceEdit(_) => f.write_str("WorkspaceEdit(..)"),
        }
    }
}

/// A fix attached to a reported diagnostic.
#[derive(Debug, Clone)]
pub struct RuleFix {
    pub title: String,
    pub kinds: Vec<CodeActionKind>,
    pub edit: FixEdit,
}

impl RuleFix {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            kinds: vec![CodeActionKind::QUICKFIX],
            edit: FixEdit::None,
        }
    }

    #[must_use]
    pub fn kinds(mut self, kinds: Vec<CodeActionKind>) -> Self {
        self.kinds = kinds;
        self
    }

    #[must_use]
    pub fn text_edits<F>(mut self, produce: F) -> Self
    where
        F: Fn(&Diagnostic) -> Vec<TextEdit> + Send + Sync + 'static,
    {
        self.edit = FixEdit::TextEdits(Arc::new(produce));
        self
    }

    #[must_use]
    pub fn workspace_edit<F>(mut self, produce: F) -> Self
    where
        F: Fn(&Diagnostic) -> WorkspaceEdit + Send + Sync + 'static,
    {
        self.edit = FixEdit::WorkspaceEdit(Arc::new(produce));
        self
    }
}

/// Environment shared by every rule context.
#[derive(Debug, Clone, Default)]
pub struct RuleEnvironment {
    pub locale: Option<String>,
    pub root_uri: Option<Url>,
}

/// Diagnostics and fixes accumulated by one rule over one document.
#[derive(Debug)]
struct RuleRun {
    uri: Url,
    rule_id: String,
    generation: u64,
    reports: Mutex<Vec<(Diagnostic, Vec<RuleFix>)>>,
}

impl RuleRun {
    fn take(&self) -> Vec<(Diagnostic, Vec<RuleFix>)> {
        std::mem::take(&mut *self.reports.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// What a rule sees while running: one (document, rule) pair.
pub struct RuleContext {
    document: Arc<TextDocument>,
    stage: RuleStage,
    environment: RuleEnvironment,
    configuration: Arc<dyn ConfigurationHost>,
    run: Arc<RuleRun>,
}

impl fmt::Debug for RuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("uri", self.document.uri())
            .field("rule", &self.run.rule_id)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl RuleContext {
    pub fn document(&self) -> &Arc<TextDocument> {
        &self.document
    }

    pub fn rule_id(&self) -> &str {
        &self.run.rule_id
    }

    pub fn stage(&self) -> RuleStage {
        self.stage
    }

    pub fn locale(&self) -> Option<&str> {
        self.environment.locale.as_deref()
    }

    pub fn root_uri(&self) -> Option<&Url> {
        self.environment.root_uri.as_ref()
    }

    pub fn uri_to_file_name(&self, uri: &Url) -> Option<PathBuf> {
        uri.to_file_path().ok()
    }

    pub fn file_name_to_uri(&self, path: &Path) -> Option<Url> {
        Url::from_file_path(path).ok()
    }

    /// Configuration at a dotted section, scoped to this document.
    pub async fn configuration<T: DeserializeOwned>(&self, section: &str) -> Option<T> {
        let value = self
            .configuration
            .get_configuration(section, Some(self.document.uri()))
            .await?;
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::debug!(
                    rule = %self.run.rule_id,
                    section,
                    %error,
                    "configuration has unexpected shape"
                );
                None
            }
        }
    }

    pub fn on_did_change_configuration(&self, listener: ConfigurationListener) {
        self.configuration.on_did_change_configuration(listener);
    }

    /// Report a diagnostic, optionally with fixes.
    ///
    /// Each report carrying fixes gets the next fix index for this document
    /// and rule; the index is stored in the diagnostic's `data`.
    pub fn report(&self, mut diagnostic: Diagnostic, fixes: Vec<RuleFix>) {
        if diagnostic.code.is_none() {
            diagnostic.code = Some(NumberOrString::String(self.run.rule_id.clone()));
        }
        let mut reports = self
            .run
            .reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !fixes.is_empty() {
            let fix_index = reports.iter().filter(|(_, f)| !f.is_empty()).count();
            let fix = FixRef {
                uri: self.run.uri.clone(),
                rule_id: self.run.rule_id.clone(),
                fix_index,
                generation: self.run.generation,
            };
            diagnostic.data = serde_json::to_value(fix).ok();
        }
        reports.push((diagnostic, fixes));
    }
}

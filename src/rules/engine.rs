//! Rule execution and the diagnostic-fix table.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{
    CodeAction, CodeActionContext, CodeActionOrCommand, Diagnostic, Range, Url, WorkspaceEdit,
};

use crate::config::ConfigurationHost;
use crate::document::TextDocument;
use crate::error::ProviderError;
use crate::service::{Capability, CapabilitySet, Provider, ProviderResult, Reply};

use super::{FixEdit, Rule, RuleContext, RuleEnvironment, RuleFix, RuleLevel, RuleRun, RuleStage};

/// Address of a reported fix, stored in the diagnostic's `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixRef {
    pub uri: Url,
    pub rule_id: String,
    pub fix_index: usize,
    /// Run that issued the index; a newer run invalidates it.
    pub generation: u64,
}

/// Code action payload: which fix of which report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixAction {
    #[serde(flatten)]
    fix: FixRef,
    action: usize,
}

#[derive(Debug)]
struct FixRecord {
    diagnostic: Diagnostic,
    fixes: Vec<RuleFix>,
}

/// Fix records of one rule run over one document, indexed by fix index.
#[derive(Debug)]
struct FixTable {
    version: i32,
    generation: u64,
    records: Vec<FixRecord>,
}

impl FixTable {
    /// Document version first, run order to break ties.
    fn order(&self) -> (i32, u64) {
        (self.version, self.generation)
    }
}

struct EngineInner {
    rules: Vec<(String, Arc<dyn Rule>)>,
    levels: BTreeMap<String, RuleLevel>,
    environment: RuleEnvironment,
    configuration: Arc<dyn ConfigurationHost>,
    fixes: DashMap<(Url, String), Arc<FixTable>>,
    generation: AtomicU64,
}

/// Runs rules and resolves the fixes they report.
///
/// Cheap to clone; clones share rules and fix tables.
#[derive(Clone)]
pub struct RuleEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rules: Vec<&str> = self.inner.rules.iter().map(|(id, _)| id.as_str()).collect();
        f.debug_struct("RuleEngine")
            .field("rules", &rules)
            .field("levels", &self.inner.levels)
            .finish_non_exhaustive()
    }
}

impl RuleEngine {
    /// Identifier of the engine when registered as a provider.
    pub const PROVIDER_ID: &'static str = "rules";

    pub fn new(
        rules: Vec<(String, Arc<dyn Rule>)>,
        levels: BTreeMap<String, RuleLevel>,
        environment: RuleEnvironment,
        configuration: Arc<dyn ConfigurationHost>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                rules,
                levels,
                environment,
                configuration,
                fixes: DashMap::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.rules.is_empty()
    }

    /// Run every enabled rule over `document`, stage by stage.
    ///
    /// A rule's older fix records for the document are discarded before it
    /// runs and replaced as a whole when it finishes. Runs may overlap; a run
    /// never replaces the table of a run over a newer version, or of a later
    /// run over the same version.
    pub async fn run(
        &self,
        document: &Arc<TextDocument>,
        token: &CancellationToken,
    ) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for (rule_id, rule) in &self.inner.rules {
            let level = self.inner.levels.get(rule_id).copied();
            if level == Some(RuleLevel::Off) {
                continue;
            }
            if token.is_cancelled() {
                break;
            }

            let key = (document.uri().clone(), rule_id.clone());
            let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
            let order = (document.version(), generation);
            self.inner
                .fixes
                .remove_if(&key, |_, table| table.order() < order);
            let run = Arc::new(RuleRun {
                uri: document.uri().clone(),
                rule_id: rule_id.clone(),
                generation,
                reports: Mutex::new(Vec::new()),
            });

            for stage in RuleStage::ORDER {
                let context = RuleContext {
                    document: Arc::clone(document),
                    stage,
                    environment: self.inner.environment.clone(),
                    configuration: Arc::clone(&self.inner.configuration),
                    run: Arc::clone(&run),
                };
                let hook = async {
                    match stage {
                        RuleStage::Syntax => rule.on_syntax(&context).await,
                        RuleStage::Semantic => rule.on_semantic(&context).await,
                        RuleStage::Format => rule.on_format(&context).await,
                    }
                };
                if let Err(payload) = std::panic::AssertUnwindSafe(hook).catch_unwind().await {
                    let error = ProviderError::from_panic(payload);
                    tracing::warn!(
                        rule = %rule_id,
                        %stage,
                        uri = %document.uri(),
                        %error,
                        "rule failed"
                    );
                }
            }

            let mut records = Vec::new();
            for (mut diagnostic, fixes) in run.take() {
                if let Some(severity) = level.and_then(RuleLevel::severity) {
                    diagnostic.severity = Some(severity);
                }
                if !fixes.is_empty() {
                    records.push(FixRecord {
                        diagnostic: diagnostic.clone(),
                        fixes,
                    });
                }
                diagnostics.push(diagnostic);
            }
            tracing::debug!(
                rule = %rule_id,
                uri = %document.uri(),
                generation,
                fixes = records.len(),
                "rule finished"
            );
            // Empty tables are kept too, so an older run cannot fill the slot
            let table = FixTable {
                version: document.version(),
                generation,
                records,
            };
            match self.inner.fixes.entry(key) {
                Entry::Occupied(mut stored) if stored.get().order() < table.order() => {
                    stored.insert(Arc::new(table));
                }
                Entry::Occupied(_) => {
                    tracing::debug!(
                        rule = %rule_id,
                        uri = %document.uri(),
                        generation,
                        "newer fix table already published"
                    );
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(table));
                }
            }
        }
        diagnostics
    }

    /// Fixes recorded for `fix`, or None if the reference is unknown or stale.
    fn lookup(&self, fix: &FixRef) -> Option<(Arc<FixTable>, usize)> {
        let table = self
            .inner
            .fixes
            .get(&(fix.uri.clone(), fix.rule_id.clone()))
            .map(|t| Arc::clone(&t))?;
        if table.generation != fix.generation || fix.fix_index >= table.records.len() {
            return None;
        }
        Some((table, fix.fix_index))
    }

    /// The diagnostic and fix titles recorded under `fix`.
    pub fn fix_titles(&self, fix: &FixRef) -> Option<(Diagnostic, Vec<String>)> {
        let (table, index) = self.lookup(fix)?;
        let record = &table.records[index];
        Some((
            record.diagnostic.clone(),
            record.fixes.iter().map(|f| f.title.clone()).collect(),
        ))
    }

    /// Produce the edit for fix `action` of the report under `fix`.
    ///
    /// Unknown or stale references resolve to an empty edit.
    pub fn resolve_fix(&self, fix: &FixRef, action: usize) -> WorkspaceEdit {
        let Some((table, index)) = self.lookup(fix) else {
            tracing::debug!(rule = %fix.rule_id, uri = %fix.uri, index = fix.fix_index, "stale fix");
            return WorkspaceEdit::default();
        };
        let record = &table.records[index];
        let Some(rule_fix) = record.fixes.get(action) else {
            return WorkspaceEdit::default();
        };
        match &rule_fix.edit {
            FixEdit::None => WorkspaceEdit::default(),
            FixEdit::TextEdits(produce) => {
                let edits = produce(&record.diagnostic);
                WorkspaceEdit::new(HashMap::from([(fix.uri.clone(), edits)]))
            }
            FixEdit::WorkspaceEdit(produce) => produce(&record.diagnostic),
        }
    }

    fn actions(
        &self,
        document: &TextDocument,
        context: &CodeActionContext,
    ) -> Vec<CodeActionOrCommand> {
        let mut actions = Vec::new();
        for diagnostic in &context.diagnostics {
            let Some(fix) = diagnostic
                .data
                .clone()
                .and_then(|d| serde_json::from_value::<FixRef>(d).ok())
            else {
                continue;
            };
            if &fix.uri != document.uri() {
                continue;
            }
            let Some((table, index)) = self.lookup(&fix) else {
                continue;
            };
            let record = &table.records[index];
            for (action, rule_fix) in record.fixes.iter().enumerate() {
                let kind = rule_fix.kinds.first().cloned();
                if let Some(only) = &context.only {
                    let wanted = rule_fix
                        .kinds
                        .iter()
                        .any(|k| only.iter().any(|o| k.as_str().starts_with(o.as_str())));
                    if !wanted {
                        continue;
                    }
                }
                let data = FixAction {
                    fix: fix.clone(),
                    action,
                };
                actions.push(CodeActionOrCommand::CodeAction(CodeAction {
                    title: rule_fix.title.clone(),
                    kind,
                    diagnostics: Some(vec![record.diagnostic.clone()]),
                    data: serde_json::to_value(data).ok(),
                    ..CodeAction::default()
                }));
            }
        }
        actions
    }
}

impl Provider for RuleEngine {
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new()
            .with(Capability::ValidateSyntactic)
            .with(Capability::CodeAction)
            .with(Capability::CodeActionResolve)
    }

    fn validate_syntactic(
        &self,
        document: &Arc<TextDocument>,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<Diagnostic>> {
        if self.is_empty() {
            return Ok(Reply::Absent);
        }
        let engine = self.clone();
        let document = Arc::clone(document);
        let token = token.clone();
        Ok(Reply::deferred(async move {
            Ok(Some(engine.run(&document, &token).await))
        }))
    }

    fn code_actions(
        &self,
        document: &Arc<TextDocument>,
        _range: Range,
        context: &CodeActionContext,
        _token: &CancellationToken,
    ) -> ProviderResult<Vec<CodeActionOrCommand>> {
        Ok(Reply::Ready(self.actions(document, context)))
    }

    fn code_action_resolve(
        &self,
        _document: &Arc<TextDocument>,
        mut action: CodeAction,
        _token: &CancellationToken,
    ) -> ProviderResult<CodeAction> {
        let edit = action
            .data
            .clone()
            .and_then(|d| serde_json::from_value::<FixAction>(d).ok())
            .map(|a| self.resolve_fix(&a.fix, a.action))
            .unwrap_or_default();
        action.edit = Some(edit);
        Ok(Reply::Ready(action))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tower_lsp::lsp_types::{Position, TextEdit};

    use super::*;
    use crate::config::SettingsConfiguration;

    /// Reports one fixable diagnostic per `x` in the document.
    struct NoX {
        runs: AtomicUsize,
    }

    #[tower_lsp::async_trait]
    impl Rule for NoX {
        async fn on_syntax(&self, context: &RuleContext) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let document = context.document();
            for (offset, _) in document.text().match_indices('x') {
                let range = Range::new(document.position_at(offset), document.position_at(offset + 1));
                let diagnostic = Diagnostic::new_simple(range, format!("x at {offset}"));
                let fix = RuleFix::new("remove x").text_edits(move |d| {
                    vec![TextEdit::new(d.range, String::new())]
                });
                context.report(diagnostic, vec![fix]);
            }
        }

        async fn on_format(&self, _: &RuleContext) {
            panic!("format hook exploded");
        }
    }

    /// Reports one fix naming the document version; version 1 is slow.
    struct Slow;

    #[tower_lsp::async_trait]
    impl Rule for Slow {
        async fn on_syntax(&self, context: &RuleContext) {
            let version = context.document().version();
            if version == 1 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            let range = Range::new(Position::new(0, 0), Position::new(0, 1));
            let fix = RuleFix::new("rewrite").text_edits(move |d| {
                vec![TextEdit::new(d.range, format!("v{version}"))]
            });
            context.report(Diagnostic::new_simple(range, format!("v{version}")), vec![fix]);
        }
    }

    fn engine(levels: BTreeMap<String, RuleLevel>) -> RuleEngine {
        RuleEngine::new(
            vec![("no-x".to_string(), Arc::new(NoX { runs: AtomicUsize::new(0) }) as Arc<dyn Rule>)],
            levels,
            RuleEnvironment::default(),
            Arc::new(SettingsConfiguration::default()),
        )
    }

    fn document(version: i32, text: &str) -> Arc<TextDocument> {
        Arc::new(TextDocument::new(Url::parse("file:///a.css").unwrap(), "css", version, text))
    }

    fn fix_ref(diagnostic: &Diagnostic) -> FixRef {
        serde_json::from_value(diagnostic.data.clone().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn stale_indices_resolve_to_empty() {
        let engine = engine(BTreeMap::new());
        let token = CancellationToken::new();

        let v1 = engine.run(&document(1, "x"), &token).await;
        let old = fix_ref(&v1[0]);
        assert_eq!(old.fix_index, 0);
        assert!(engine.resolve_fix(&old, 0).changes.is_some());

        let v2 = engine.run(&document(2, "..x"), &token).await;
        let new = fix_ref(&v2[0]);
        assert_eq!(new.fix_index, 0);
        assert_ne!(new.generation, old.generation);

        assert_eq!(engine.resolve_fix(&old, 0), WorkspaceEdit::default());
        let edit = engine.resolve_fix(&new, 0);
        let edits = &edit.changes.unwrap()[&new.uri];
        assert_eq!(edits[0].range.start, Position::new(0, 2));
    }

    #[tokio::test]
    async fn overlapping_runs_keep_the_newest_table() {
        let engine = RuleEngine::new(
            vec![("slow".to_string(), Arc::new(Slow) as Arc<dyn Rule>)],
            BTreeMap::new(),
            RuleEnvironment::default(),
            Arc::new(SettingsConfiguration::default()),
        );
        let token = CancellationToken::new();

        let first = tokio::spawn({
            let engine = engine.clone();
            let token = token.clone();
            async move { engine.run(&document(1, "a"), &token).await }
        });
        // Let the v1 run start and park in its hook
        tokio::time::sleep(Duration::from_millis(10)).await;
        let v2 = engine.run(&document(2, "b"), &token).await;
        let v1 = first.await.unwrap();

        let current = fix_ref(&v2[0]);
        let stale = fix_ref(&v1[0]);
        assert_eq!(current.fix_index, stale.fix_index);
        let edit = engine.resolve_fix(&current, 0);
        assert_eq!(edit.changes.unwrap()[&current.uri][0].new_text, "v2");
        assert_eq!(engine.resolve_fix(&stale, 0), WorkspaceEdit::default());
    }

    #[tokio::test]
    async fn older_version_never_replaces_newer_table() {
        let engine = engine(BTreeMap::new());
        let token = CancellationToken::new();

        let v2 = engine.run(&document(2, "x"), &token).await;
        // A late run over an older snapshot
        let v1 = engine.run(&document(1, "x"), &token).await;

        assert!(engine.fix_titles(&fix_ref(&v2[0])).is_some());
        assert!(engine.fix_titles(&fix_ref(&v1[0])).is_none());
    }

    #[tokio::test]
    async fn rerun_without_fixes_clears_table() {
        let engine = engine(BTreeMap::new());
        let token = CancellationToken::new();
        let v1 = engine.run(&document(1, "x"), &token).await;
        let old = fix_ref(&v1[0]);

        assert!(engine.run(&document(2, "y"), &token).await.is_empty());
        assert!(engine.fix_titles(&old).is_none());
    }

    #[tokio::test]
    async fn levels_override_severity_or_disable() {
        let token = CancellationToken::new();
        let warn = engine(BTreeMap::from([("no-x".to_string(), RuleLevel::Hint)]));
        let diagnostics = warn.run(&document(1, "x"), &token).await;
        assert_eq!(diagnostics[0].severity, Some(tower_lsp::lsp_types::DiagnosticSeverity::HINT));

        let off = engine(BTreeMap::from([("no-x".to_string(), RuleLevel::Off)]));
        assert!(off.run(&document(1, "x"), &token).await.is_empty());
    }

    #[tokio::test]
    async fn code_actions_resolve_through_fix_records() {
        let engine = engine(BTreeMap::new());
        let token = CancellationToken::new();
        let doc = document(1, "axb");
        let diagnostics = engine.run(&doc, &token).await;

        let context = CodeActionContext {
            diagnostics: diagnostics.clone(),
            only: None,
            trigger_kind: None,
        };
        let Reply::Ready(actions) = engine
            .code_actions(&doc, diagnostics[0].range, &context, &token)
            .unwrap()
        else {
            panic!("expected ready actions");
        };
        let CodeActionOrCommand::CodeAction(action) = actions[0].clone() else {
            panic!("expected code action");
        };
        assert_eq!(action.title, "remove x");
        assert!(action.edit.is_none());

        let Reply::Ready(resolved) = engine.code_action_resolve(&doc, action, &token).unwrap() else {
            panic!("expected ready action");
        };
        let changes = resolved.edit.unwrap().changes.unwrap();
        assert_eq!(changes[doc.uri()], vec![TextEdit::new(diagnostics[0].range, String::new())]);
    }
}

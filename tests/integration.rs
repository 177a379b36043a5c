use std::sync::{Arc, Mutex};
use std::time::Duration;

use embedls::{
    Cancelled, Capability, CapabilitySet, CommandContext, ComponentLanguage, DocumentSelector,
    EmbeddedCode, EmbeddedName, FixRef, LanguageModule, LanguageService, Provider,
    ProviderError, ProviderResult, Reply, Rule, RuleContext, RuleFix, ServiceConfig,
    TextDocument,
};
use expect_test::expect;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{
    CodeActionContext, CodeActionOrCommand, CompletionContext, CompletionItem, CompletionList,
    CompletionTriggerKind, Diagnostic, DiagnosticSeverity, Hover, HoverContents, Location,
    MarkedString, NumberOrString, Position, Range, TextEdit, Url, WorkspaceEdit,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Log = Arc<Mutex<Vec<String>>>;

/// Scriptable provider that records every call it receives.
#[derive(Default, Clone)]
struct Fake {
    name: &'static str,
    log: Log,
    hover: Option<&'static str>,
    /// `(line, start, end, message)` reported on every document.
    diagnostics: Vec<(u32, u32, u32, &'static str)>,
    delay: Option<Duration>,
    completions: Vec<&'static str>,
    triggers: Vec<&'static str>,
    additional: bool,
    renames: bool,
    command: Option<(&'static str, &'static str)>,
    panics: bool,
    fails: bool,
    pending: bool,
}

impl Fake {
    fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: log.clone(),
            ..Self::default()
        }
    }

    fn record(&self, method: &str, document: &TextDocument, detail: impl std::fmt::Display) {
        self.log.lock().unwrap().push(format!(
            "{} {method} {} {detail}",
            self.name,
            document.uri()
        ));
    }

    /// Common failure modes, checked before producing an answer.
    fn misbehave<T: Send + 'static>(&self) -> Option<ProviderResult<T>> {
        if self.panics {
            panic!("{} exploded", self.name);
        }
        if self.fails {
            return Some(Err(ProviderError::failed(format!("{} failed", self.name))));
        }
        if self.pending {
            return Some(Ok(Reply::deferred(std::future::pending())));
        }
        None
    }
}

impl Provider for Fake {
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new()
            .with(Capability::Hover)
            .with(Capability::Completion)
            .with(Capability::CompletionResolve)
            .with(Capability::ValidateSyntactic)
            .with(Capability::Rename)
            .with(Capability::ExecuteCommand)
    }

    fn completion_triggers(&self) -> Vec<String> {
        self.triggers.iter().map(|t| t.to_string()).collect()
    }

    fn is_additional_completion(&self) -> bool {
        self.additional
    }

    fn commands(&self) -> Vec<String> {
        self.command.iter().map(|(name, _)| name.to_string()).collect()
    }

    fn hover(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        _token: &CancellationToken,
    ) -> ProviderResult<Hover> {
        self.record("hover", document, format_position(position));
        if let Some(result) = self.misbehave() {
            return result;
        }
        let hover = self.hover.map(|text| Hover {
            contents: HoverContents::Scalar(MarkedString::String(format!("{}: {text}", self.name))),
            range: Some(Range::new(
                position,
                Position::new(position.line, position.character + 1),
            )),
        });
        Ok(hover.into())
    }

    fn completion(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        _context: Option<&CompletionContext>,
        _token: &CancellationToken,
    ) -> ProviderResult<CompletionList> {
        self.record("completion", document, format_position(position));
        if self.completions.is_empty() {
            return Ok(Reply::Absent);
        }
        let items = self
            .completions
            .iter()
            .map(|label| CompletionItem {
                label: label.to_string(),
                ..CompletionItem::default()
            })
            .collect();
        Ok(Reply::Ready(CompletionList {
            is_incomplete: false,
            items,
        }))
    }

    fn completion_resolve(
        &self,
        document: &Arc<TextDocument>,
        mut item: CompletionItem,
        _token: &CancellationToken,
    ) -> ProviderResult<CompletionItem> {
        self.record("resolve", document, &item.label);
        item.detail = Some(format!("resolved by {}", self.name));
        Ok(Reply::Ready(item))
    }

    fn validate_syntactic(
        &self,
        document: &Arc<TextDocument>,
        _token: &CancellationToken,
    ) -> ProviderResult<Vec<Diagnostic>> {
        self.record("validate", document, "");
        if let Some(result) = self.misbehave() {
            return result;
        }
        let diagnostics: Vec<Diagnostic> = self
            .diagnostics
            .iter()
            .map(|&(line, start, end, message)| Diagnostic {
                range: Range::new(Position::new(line, start), Position::new(line, end)),
                severity: Some(DiagnosticSeverity::WARNING),
                source: Some(self.name.to_string()),
                message: message.to_string(),
                ..Diagnostic::default()
            })
            .collect();
        match self.delay {
            Some(delay) => Ok(Reply::deferred(async move {
                tokio::time::sleep(delay).await;
                Ok(Some(diagnostics))
            })),
            None => Ok(Reply::Ready(diagnostics)),
        }
    }

    fn rename(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        new_name: &str,
        _token: &CancellationToken,
    ) -> ProviderResult<WorkspaceEdit> {
        self.record("rename", document, format_position(position));
        if !self.renames {
            return Ok(Reply::Absent);
        }
        let range = Range::new(
            position,
            Position::new(position.line, position.character + 1),
        );
        let edit = WorkspaceEdit::new(
            [(document.uri().clone(), vec![TextEdit::new(range, new_name.to_string())])]
                .into_iter()
                .collect(),
        );
        Ok(Reply::Ready(edit))
    }

    fn execute_command(
        &self,
        command: &str,
        _arguments: &[Value],
        context: Arc<dyn CommandContext>,
        _token: &CancellationToken,
    ) -> ProviderResult<Option<Value>> {
        let Some((_, target)) = self.command else {
            return Ok(Reply::Absent);
        };
        self.log
            .lock()
            .unwrap()
            .push(format!("{} execute {command}", self.name));
        let uri = Url::parse(target).unwrap();
        let edit = WorkspaceEdit::new(
            [(uri, vec![TextEdit::new(range(0, 0, 0, 1), "b".to_string())])]
                .into_iter()
                .collect(),
        );
        Ok(Reply::deferred(async move {
            let applied = context.apply_edit(Some("fake fix".to_string()), edit).await;
            Ok(Some(Some(json!({ "applied": applied }))))
        }))
    }
}

/// Splits a `split` document at offset 10: `[0, 10)` is CSS, `[10, 20)` is JavaScript.
struct Split;

impl LanguageModule for Split {
    fn handles(&self, document: &TextDocument) -> bool {
        document.language_id() == "split"
    }

    fn embedded_codes(&self, document: &TextDocument) -> Vec<EmbeddedCode> {
        let text = document.text();
        vec![
            EmbeddedCode::verbatim(EmbeddedName::Local("style".into()), "css", 0, &text[..10]),
            EmbeddedCode::verbatim(
                EmbeddedName::Local("script".into()),
                "javascript",
                10,
                &text[10..20],
            ),
        ]
    }
}

/// Embeds every "```vue" fence of a markdown document as a component.
struct Fences;

impl LanguageModule for Fences {
    fn handles(&self, document: &TextDocument) -> bool {
        document.language_id() == "markdown"
    }

    fn embedded_codes(&self, document: &TextDocument) -> Vec<EmbeddedCode> {
        let text = document.text();
        let mut codes = Vec::new();
        let mut from = 0;
        while let Some(open) = text[from..].find("```vue\n") {
            let start = from + open + "```vue\n".len();
            let Some(close) = text[start..].find("```") else {
                break;
            };
            codes.push(EmbeddedCode::verbatim(
                EmbeddedName::Local(format!("block{}", codes.len())),
                "vue",
                start,
                &text[start..start + close],
            ));
            from = start + close + 3;
        }
        codes
    }
}

const SPLIT: &str = "a{color:r}let x = 1;";

fn uri(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn range(start_line: u32, start_char: u32, end_line: u32, end_char: u32) -> Range {
    Range::new(
        Position::new(start_line, start_char),
        Position::new(end_line, end_char),
    )
}

fn format_position(position: Position) -> String {
    format!("{}:{}", position.line, position.character)
}

fn format_range(range: &Range) -> String {
    format!(
        "{}-{}",
        format_position(range.start),
        format_position(range.end)
    )
}

fn format_log(log: &Log) -> String {
    log.lock().unwrap().join("\n")
}

/// Format diagnostics one per line, in the order they were returned:
///   <range> <severity> [<code>] <source>: <message>
fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    if diagnostics.is_empty() {
        return "OK (no diagnostics)".to_string();
    }

    diagnostics
        .iter()
        .map(|d| {
            let severity = match d.severity {
                Some(DiagnosticSeverity::ERROR) => "error",
                Some(DiagnosticSeverity::WARNING) => "warning",
                Some(DiagnosticSeverity::INFORMATION) => "info",
                Some(DiagnosticSeverity::HINT) => "hint",
                _ => "none",
            };
            let code = match &d.code {
                Some(NumberOrString::String(s)) => format!(" [{s}]"),
                Some(NumberOrString::Number(n)) => format!(" [{n}]"),
                None => String::new(),
            };
            let source = d.source.as_deref().unwrap_or("-");
            format!(
                "{} {severity}{code} {source}: {}",
                format_range(&d.range),
                d.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_hover(hover: Option<Hover>) -> String {
    let Some(hover) = hover else {
        return "no hover".to_string();
    };
    let contents = match hover.contents {
        HoverContents::Scalar(MarkedString::String(text)) => text,
        other => format!("{other:?}"),
    };
    let range = hover.range.map_or("-".to_string(), |r| format_range(&r));
    format!("{contents} @ {range}")
}

fn fix_ref(diagnostic: &Diagnostic) -> FixRef {
    serde_json::from_value(diagnostic.data.clone().unwrap()).unwrap()
}

fn split_service(providers: Vec<Fake>) -> LanguageService {
    let mut config = ServiceConfig::new().language("split", Arc::new(Split));
    for provider in providers {
        let selector = match provider.name {
            name if name.starts_with("css") => DocumentSelector::languages(["css"]),
            name if name.starts_with("js") => DocumentSelector::languages(["javascript"]),
            _ => DocumentSelector::languages(["css", "javascript"]),
        };
        config = config.plugin(provider.name, Arc::new(provider), selector);
    }
    let service = config.build().unwrap();
    service.open_document(uri("file:///doc.split"), "split", 1, SPLIT.to_string());
    service
}

/// Reports every line starting with `unused`, with a fix deleting it.
struct NoUnused;

#[tower_lsp::async_trait]
impl Rule for NoUnused {
    async fn on_syntax(&self, context: &RuleContext) {
        let document = context.document();
        let mut offset = 0;
        for line in document.text().split_inclusive('\n') {
            let content = line.trim_end_matches('\n');
            if content.starts_with("unused") {
                let range = Range::new(
                    document.position_at(offset),
                    document.position_at(offset + content.len()),
                );
                let diagnostic = Diagnostic::new_simple(range, format!("`{content}` is unused"));
                let fix = RuleFix::new(format!("Remove `{content}`"))
                    .text_edits(|d| vec![TextEdit::new(d.range, String::new())]);
                context.report(diagnostic, vec![fix]);
            }
            offset += line.len();
        }
    }
}

/// Flags `red` in CSS documents.
struct NoRed;

#[tower_lsp::async_trait]
impl Rule for NoRed {
    async fn on_syntax(&self, context: &RuleContext) {
        let document = context.document();
        if document.language_id() != "css" {
            return;
        }
        for (offset, _) in document.text().match_indices(":r") {
            let range = Range::new(
                document.position_at(offset + 1),
                document.position_at(offset + 2),
            );
            context.report(Diagnostic::new_simple(range, "red is banned".to_string()), vec![]);
        }
    }
}

/// Flags the word configured at `banned.word`.
struct BannedWord;

#[tower_lsp::async_trait]
impl Rule for BannedWord {
    async fn on_syntax(&self, context: &RuleContext) {
        let Some(word) = context.configuration::<String>("banned.word").await else {
            return;
        };
        let document = context.document();
        for (offset, found) in document.text().match_indices(word.as_str()) {
            let range = Range::new(
                document.position_at(offset),
                document.position_at(offset + found.len()),
            );
            context.report(Diagnostic::new_simple(range, format!("`{word}` is banned")), vec![]);
        }
    }
}

/// Records edits sent back by commands.
#[derive(Default)]
struct RecordingContext {
    edits: Mutex<Vec<WorkspaceEdit>>,
}

#[tower_lsp::async_trait]
impl CommandContext for RecordingContext {
    async fn begin_progress(&self, _: String, _: Option<String>, _: Option<u32>) {}

    async fn report_progress(&self, _: Option<String>, _: Option<u32>) {}

    async fn end_progress(&self, _: Option<String>) {}

    async fn show_references(&self, _: Url, _: Position, _: Vec<Location>) {}

    async fn apply_edit(&self, _: Option<String>, edit: WorkspaceEdit) -> bool {
        self.edits.lock().unwrap().push(edit);
        true
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hover_reaches_only_the_region_under_the_cursor() {
    let log = Log::default();
    let css = Fake {
        hover: Some("color"),
        ..Fake::new("css", &log)
    };
    let js = Fake {
        hover: Some("let"),
        ..Fake::new("js", &log)
    };
    let service = split_service(vec![css, js]);
    let token = CancellationToken::new();

    let hover = service
        .hover(&uri("file:///doc.split"), Position::new(0, 5), &token)
        .await
        .unwrap();
    expect![[r#"css: color @ 0:5-0:6"#]].assert_eq(&format_hover(hover));
    expect![[r#"css hover file:///doc.split#style 0:5"#]].assert_eq(&format_log(&log));

    log.lock().unwrap().clear();
    let hover = service
        .hover(&uri("file:///doc.split"), Position::new(0, 15), &token)
        .await
        .unwrap();
    expect![[r#"js: let @ 0:15-0:16"#]].assert_eq(&format_hover(hover));
    expect![[r#"js hover file:///doc.split#script 0:5"#]].assert_eq(&format_log(&log));
}

#[tokio::test]
async fn nested_documents_translate_through_every_level() {
    let log = Log::default();
    let css = Fake {
        hover: Some("selector"),
        ..Fake::new("css", &log)
    };
    let service = ServiceConfig::new()
        .language("markdown", Arc::new(Fences))
        .language("component", Arc::new(ComponentLanguage::new()))
        .plugin("css", Arc::new(css), DocumentSelector::languages(["css"]))
        .build()
        .unwrap();
    let readme = uri("file:///readme.md");
    service.open_document(
        readme.clone(),
        "markdown",
        1,
        "# T\n```vue\n<style>a{}</style>\n```\n".to_string(),
    );

    let hover = service
        .hover(&readme, Position::new(2, 8), &CancellationToken::new())
        .await
        .unwrap();
    expect![[r#"css: selector @ 2:8-2:9"#]].assert_eq(&format_hover(hover));
    expect![[r#"css hover file:///readme.md#block0/style0 0:1"#]].assert_eq(&format_log(&log));
}

#[tokio::test]
async fn shared_documents_combine_every_contributor() {
    let log = Log::default();
    let css = Fake {
        diagnostics: vec![(0, 0, 3, "first part"), (1, 0, 3, "second part")],
        ..Fake::new("css", &log)
    };
    let service = ServiceConfig::new()
        .language("component", Arc::new(ComponentLanguage::new()))
        .plugin("css", Arc::new(css), DocumentSelector::languages(["css"]))
        .build()
        .unwrap();
    let a = uri("file:///a.vue");
    let b = uri("file:///b.vue");
    service.open_document(b.clone(), "vue", 1, "<style global>b{}</style>".to_string());
    service.open_document(a.clone(), "vue", 1, "<style global>a{}</style>".to_string());

    let shared = service.store().node(&uri("embedded:///global.css")).unwrap();
    expect![[r#"
        a{}
        b{}
    "#]]
    .assert_eq(shared.document().text());

    let token = CancellationToken::new();
    let diagnostics = service.diagnostics(&a, &token).await.unwrap();
    expect![[r#"0:14-0:17 warning css: first part"#]]
        .assert_eq(&format_diagnostics(&diagnostics));
    let diagnostics = service.diagnostics(&b, &token).await.unwrap();
    expect![[r#"0:14-0:17 warning css: second part"#]]
        .assert_eq(&format_diagnostics(&diagnostics));

    service.close_document(&a);
    let shared = service.store().node(&uri("embedded:///global.css")).unwrap();
    expect![[r#"
        b{}
    "#]]
    .assert_eq(shared.document().text());
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

#[tokio::test]
async fn diagnostics_follow_registration_order() {
    let log = Log::default();
    let css = Fake {
        diagnostics: vec![(0, 8, 9, "unknown color")],
        ..Fake::new("css", &log)
    };
    let service = ServiceConfig::new()
        .language("split", Arc::new(Split))
        .rule("no-red", Arc::new(NoRed))
        .plugin("css", Arc::new(css), DocumentSelector::languages(["css"]))
        .build()
        .unwrap();
    let doc = uri("file:///doc.split");
    service.open_document(doc.clone(), "split", 1, SPLIT.to_string());

    let diagnostics = service
        .diagnostics(&doc, &CancellationToken::new())
        .await
        .unwrap();
    expect![[r#"
        0:8-0:9 none [no-red] -: red is banned
        0:8-0:9 warning css: unknown color"#]]
    .assert_eq(&format_diagnostics(&diagnostics));
}

#[tokio::test]
async fn slow_providers_do_not_reorder_results() {
    let log = Log::default();
    let slow = Fake {
        diagnostics: vec![(0, 0, 1, "slow")],
        delay: Some(Duration::from_millis(30)),
        ..Fake::new("css-slow", &log)
    };
    let fast = Fake {
        diagnostics: vec![(0, 0, 1, "fast")],
        ..Fake::new("css-fast", &log)
    };
    let service = split_service(vec![slow, fast]);
    let doc = uri("file:///doc.split");
    let token = CancellationToken::new();

    let first = service.diagnostics(&doc, &token).await.unwrap();
    let second = service.diagnostics(&doc, &token).await.unwrap();
    assert_eq!(first, second);
    expect![[r#"
        0:0-0:1 warning css-slow: slow
        0:0-0:1 warning css-fast: fast"#]]
    .assert_eq(&format_diagnostics(&first));
}

#[tokio::test]
async fn completion_merges_additional_providers_and_routes_resolve() {
    let log = Log::default();
    let first = Fake {
        completions: vec!["color"],
        ..Fake::new("css-first", &log)
    };
    let second = Fake {
        completions: vec!["colour"],
        triggers: vec![":"],
        ..Fake::new("css-second", &log)
    };
    let snippets = Fake {
        completions: vec!["snippet"],
        additional: true,
        ..Fake::new("snippets", &log)
    };
    let service = split_service(vec![first, second, snippets]);
    let doc = uri("file:///doc.split");
    let token = CancellationToken::new();

    let list = service
        .completion(&doc, Position::new(0, 5), None, &token)
        .await
        .unwrap()
        .unwrap();
    let labels: Vec<&str> = list.items.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["color", "snippet"]);
    assert!(!list.is_incomplete);

    let triggered = CompletionContext {
        trigger_kind: CompletionTriggerKind::TRIGGER_CHARACTER,
        trigger_character: Some(":".to_string()),
    };
    let list = service
        .completion(&doc, Position::new(0, 5), Some(&triggered), &token)
        .await
        .unwrap()
        .unwrap();
    let labels: Vec<&str> = list.items.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["colour"]);

    let snippet = service
        .completion(&doc, Position::new(0, 5), None, &token)
        .await
        .unwrap()
        .unwrap()
        .items
        .into_iter()
        .find(|i| i.label == "snippet")
        .unwrap();
    log.lock().unwrap().clear();
    let resolved = service.completion_resolve(snippet, &token).await.unwrap();
    assert_eq!(resolved.detail.as_deref(), Some("resolved by snippets"));
    assert!(resolved.data.is_some());
    expect![[r#"snippets resolve file:///doc.split#style snippet"#]]
        .assert_eq(&format_log(&log));
}

// ---------------------------------------------------------------------------
// Isolation and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_providers_are_isolated() {
    let log = Log::default();
    let panics = Fake {
        hover: Some("never"),
        panics: true,
        diagnostics: vec![(0, 0, 1, "never")],
        ..Fake::new("css-panics", &log)
    };
    let fails = Fake {
        hover: Some("never"),
        fails: true,
        diagnostics: vec![(0, 0, 1, "never")],
        ..Fake::new("css-fails", &log)
    };
    let healthy = Fake {
        hover: Some("color"),
        diagnostics: vec![(0, 2, 7, "still here")],
        ..Fake::new("css", &log)
    };
    let service = split_service(vec![panics, fails, healthy]);
    let doc = uri("file:///doc.split");
    let token = CancellationToken::new();

    let hover = service.hover(&doc, Position::new(0, 5), &token).await.unwrap();
    expect![[r#"css: color @ 0:5-0:6"#]].assert_eq(&format_hover(hover));

    let diagnostics = service.diagnostics(&doc, &token).await.unwrap();
    expect![[r#"0:2-0:7 warning css: still here"#]].assert_eq(&format_diagnostics(&diagnostics));
}

#[tokio::test]
async fn cancellation_returns_early() {
    let log = Log::default();
    let stuck = Fake {
        hover: Some("never"),
        pending: true,
        ..Fake::new("css", &log)
    };
    let service = split_service(vec![stuck]);
    let doc = uri("file:///doc.split");

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        service.hover(&doc, Position::new(0, 5), &token),
    )
    .await
    .expect("hover did not observe cancellation");
    assert_eq!(result, Err(Cancelled));

    log.lock().unwrap().clear();
    let token = CancellationToken::new();
    token.cancel();
    let result = service.diagnostics(&doc, &token).await;
    assert_eq!(result, Err(Cancelled));
    expect![[r#""#]].assert_eq(&format_log(&log));
}

// ---------------------------------------------------------------------------
// Edits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generated_regions_map_positions_but_reject_edits() {
    let log = Log::default();
    let js = Fake {
        hover: Some("expr"),
        diagnostics: vec![(0, 0, 1, "on the wrapper"), (0, 2, 3, "on the expression")],
        renames: true,
        ..Fake::new("js", &log)
    };
    let service = ServiceConfig::new()
        .language("component", Arc::new(ComponentLanguage::new()))
        .plugin("js", Arc::new(js), DocumentSelector::languages(["javascript"]))
        .build()
        .unwrap();
    let doc = uri("file:///app.vue");
    service.open_document(doc.clone(), "vue", 1, "<template>{{ a }}</template>".to_string());
    let token = CancellationToken::new();

    let diagnostics = service.diagnostics(&doc, &token).await.unwrap();
    expect![[r#"0:13-0:14 warning js: on the expression"#]]
        .assert_eq(&format_diagnostics(&diagnostics));

    let hover = service.hover(&doc, Position::new(0, 13), &token).await.unwrap();
    expect![[r#"js: expr @ 0:13-0:14"#]].assert_eq(&format_hover(hover));

    let edit = service
        .rename(&doc, Position::new(0, 13), "b", &token)
        .await
        .unwrap();
    let changes = edit.and_then(|e| e.changes).unwrap_or_default();
    assert!(changes.values().all(Vec::is_empty), "{changes:?}");
}

#[tokio::test]
async fn stale_fix_indices_resolve_to_nothing() {
    let service = ServiceConfig::new()
        .rule("no-unused", Arc::new(NoUnused))
        .build()
        .unwrap();
    let doc = uri("file:///notes.txt");
    let token = CancellationToken::new();

    service.open_document(doc.clone(), "plaintext", 1, "unused a".to_string());
    let first = service.diagnostics(&doc, &token).await.unwrap();
    expect![[r#"0:0-0:8 none [no-unused] -: `unused a` is unused"#]]
        .assert_eq(&format_diagnostics(&first));
    let context = CodeActionContext {
        diagnostics: first.clone(),
        ..CodeActionContext::default()
    };
    let stale_actions = service
        .code_actions(&doc, range(0, 0, 0, 8), &context, &token)
        .await
        .unwrap();
    assert_eq!(stale_actions.len(), 1);

    service.open_document(doc.clone(), "plaintext", 2, "unused b".to_string());
    let second = service.diagnostics(&doc, &token).await.unwrap();
    assert_eq!(fix_ref(&first[0]).fix_index, fix_ref(&second[0]).fix_index);
    assert_ne!(fix_ref(&first[0]).generation, fix_ref(&second[0]).generation);

    // Diagnostics from the first run no longer produce actions.
    let actions = service
        .code_actions(&doc, range(0, 0, 0, 8), &context, &token)
        .await
        .unwrap();
    assert!(actions.is_empty());

    // An action obtained before the edit resolves to an empty edit.
    let CodeActionOrCommand::CodeAction(stale) = stale_actions[0].clone() else {
        panic!("expected a code action");
    };
    let resolved = service.code_action_resolve(stale, &token).await.unwrap();
    let changes = resolved.edit.and_then(|e| e.changes).unwrap_or_default();
    assert!(changes.is_empty(), "{changes:?}");

    let context = CodeActionContext {
        diagnostics: second,
        ..CodeActionContext::default()
    };
    let actions = service
        .code_actions(&doc, range(0, 0, 0, 8), &context, &token)
        .await
        .unwrap();
    let CodeActionOrCommand::CodeAction(fresh) = actions[0].clone() else {
        panic!("expected a code action");
    };
    assert_eq!(fresh.title, "Remove `unused b`");
    let resolved = service.code_action_resolve(fresh, &token).await.unwrap();
    let changes = resolved.edit.and_then(|e| e.changes).unwrap();
    assert_eq!(
        changes[&doc],
        vec![TextEdit::new(range(0, 0, 0, 8), String::new())]
    );
}

#[tokio::test]
async fn rules_follow_configuration_changes() {
    let service = ServiceConfig::new()
        .rule("banned-word", Arc::new(BannedWord))
        .configuration(json!({ "banned": { "word": "red" } }))
        .build()
        .unwrap();
    let doc = uri("file:///colors.txt");
    service.open_document(doc.clone(), "plaintext", 1, "red blue".to_string());
    let token = CancellationToken::new();

    let diagnostics = service.diagnostics(&doc, &token).await.unwrap();
    expect![[r#"0:0-0:3 none [banned-word] -: `red` is banned"#]]
        .assert_eq(&format_diagnostics(&diagnostics));

    service.update_configuration(json!({ "banned": { "word": "blue" } }));
    let diagnostics = service.diagnostics(&doc, &token).await.unwrap();
    expect![[r#"0:4-0:8 none [banned-word] -: `blue` is banned"#]]
        .assert_eq(&format_diagnostics(&diagnostics));
}

#[tokio::test]
async fn commands_run_on_the_declaring_provider_with_host_edits() {
    let log = Log::default();
    let css = Fake {
        command: Some(("fake.fix", "file:///doc.split#style")),
        ..Fake::new("css", &log)
    };
    let js = Fake::new("js", &log);
    let service = split_service(vec![js, css]);
    let context = Arc::new(RecordingContext::default());

    let result = service
        .execute_command("fake.fix", &[], context.clone(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result, Some(json!({ "applied": true })));
    expect![[r#"css execute fake.fix"#]].assert_eq(&format_log(&log));

    let edits = context.edits.lock().unwrap();
    let changes = edits[0].changes.clone().unwrap();
    assert_eq!(
        changes[&uri("file:///doc.split")],
        vec![TextEdit::new(range(0, 0, 0, 1), "b".to_string())]
    );

    let unknown = service
        .execute_command(
            "fake.unknown",
            &[],
            Arc::new(RecordingContext::default()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(unknown, None);
}

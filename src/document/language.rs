//! Language modules split a document into embedded documents.
//!
//! A [`LanguageModule`] looks at one document and returns the embedded code it
//! contains. The registry turns those into virtual documents and mapping
//! tables; modules never see or produce host coordinates other than the
//! segment offsets they report.

use std::sync::LazyLock;

use regex::Regex;
use tower_lsp::lsp_types::Url;

use super::region::{RegionKind, Segment};
use super::text::TextDocument;

/// Where an embedded document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddedName {
    /// Owned by one host; the name becomes the virtual URI's fragment.
    Local(String),
    /// Aggregated from every host contributing to the same URI.
    Shared(Url),
}

/// One piece of embedded code found in a document.
#[derive(Debug, Clone)]
pub struct EmbeddedCode {
    pub name: EmbeddedName,
    pub language_id: String,
    /// Text of the embedded document (or of this host's contribution).
    pub text: String,
    pub kind: RegionKind,
    /// Host <-> embedded correspondences, embedded offsets relative to `text`.
    pub segments: Vec<Segment>,
}

impl EmbeddedCode {
    /// Embedded code that is a verbatim copy of `host[start..start + text.len()]`.
    pub fn verbatim(
        name: EmbeddedName,
        language_id: impl Into<String>,
        host_start: usize,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        let segments = vec![Segment::new(host_start, 0, text.len())];
        Self {
            name,
            language_id: language_id.into(),
            text,
            kind: RegionKind::Exact,
            segments,
        }
    }
}

/// Splits documents of one language into embedded code.
pub trait LanguageModule: Send + Sync {
    /// Whether this module understands `document`.
    fn handles(&self, document: &TextDocument) -> bool;

    /// Embedded code found in `document`, in mapping-table order.
    fn embedded_codes(&self, document: &TextDocument) -> Vec<EmbeddedCode>;
}

static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<style\b([^>]*)>(.*?)</style\s*>").unwrap());

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<script\b([^>]*)>(.*?)</script\s*>").unwrap());

static TEMPLATE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<template\b[^>]*>(.*)</template\s*>").unwrap());

static INTERPOLATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{(.*?)\}\}").unwrap());

static LANG_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\blang\s*=\s*["']([\w-]+)["']"#).unwrap());

// A bare `global` attribute, not `data-global` or a value containing the word
static GLOBAL_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)global(?:\s|=|$)").unwrap());

/// Built-in module for single-file components (`.vue`, `.svelte`).
///
/// Produces one document per `<style>` and `<script>` block and a generated
/// `template` script holding every `{{ expr }}` interpolation. Styles marked
/// `global` feed the shared `embedded:///global.<ext>` document instead.
#[derive(Debug, Clone, Default)]
pub struct ComponentLanguage;

impl ComponentLanguage {
    pub fn new() -> Self {
        Self
    }

    fn style_language(attrs: &str) -> &'static str {
        match lang_attr(attrs) {
            Some("scss") => "scss",
            Some("less") => "less",
            _ => "css",
        }
    }

    fn script_language(attrs: &str) -> &'static str {
        match lang_attr(attrs) {
            Some("ts" | "typescript") => "typescript",
            Some("tsx") => "typescriptreact",
            Some("jsx") => "javascriptreact",
            _ => "javascript",
        }
    }

    fn template_code(text: &str) -> Option<EmbeddedCode> {
        let block = TEMPLATE_BLOCK.captures(text)?;
        let body = block.get(1)?;

        let mut generated = String::new();
        let mut segments = Vec::new();
        for capture in INTERPOLATION.captures_iter(body.as_str()) {
            let Some(expr) = capture.get(1) else {
                continue;
            };
            generated.push('(');
            segments.push(Segment::new(
                body.start() + expr.start(),
                generated.len(),
                expr.len(),
            ));
            generated.push_str(expr.as_str());
            generated.push_str(");\n");
        }

        (!segments.is_empty()).then(|| EmbeddedCode {
            name: EmbeddedName::Local("template".to_string()),
            language_id: "javascript".to_string(),
            text: generated,
            kind: RegionKind::Generated,
            segments,
        })
    }
}

fn lang_attr(attrs: &str) -> Option<&str> {
    LANG_ATTR
        .captures(attrs)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

impl LanguageModule for ComponentLanguage {
    fn handles(&self, document: &TextDocument) -> bool {
        matches!(document.language_id(), "component" | "vue" | "svelte")
            || document.uri().path().ends_with(".vue")
            || document.uri().path().ends_with(".svelte")
    }

    fn embedded_codes(&self, document: &TextDocument) -> Vec<EmbeddedCode> {
        let text = document.text();
        let mut codes = Vec::new();

        for (i, capture) in STYLE_BLOCK.captures_iter(text).enumerate() {
            let (Some(attrs), Some(body)) = (capture.get(1), capture.get(2)) else {
                continue;
            };
            let language = Self::style_language(attrs.as_str());
            let name = if GLOBAL_ATTR.is_match(attrs.as_str()) {
                match Url::parse(&format!("embedded:///global.{language}")) {
                    Ok(uri) => EmbeddedName::Shared(uri),
                    Err(_) => continue,
                }
            } else {
                EmbeddedName::Local(format!("style{i}"))
            };
            codes.push(EmbeddedCode::verbatim(
                name,
                language,
                body.start(),
                body.as_str(),
            ));
        }

        for (i, capture) in SCRIPT_BLOCK.captures_iter(text).enumerate() {
            let (Some(attrs), Some(body)) = (capture.get(1), capture.get(2)) else {
                continue;
            };
            codes.push(EmbeddedCode::verbatim(
                EmbeddedName::Local(format!("script{i}")),
                Self::script_language(attrs.as_str()),
                body.start(),
                body.as_str(),
            ));
        }

        codes.extend(Self::template_code(text));
        codes
    }
}

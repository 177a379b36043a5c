//! `embedls/autoInsert`: text inserted automatically after an edit.
//!
//! Not part of LSP; editors call it after each keystroke to get closing tags,
//! quotes, and similar completions.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{Position, Range, TextDocumentIdentifier, TextEdit, Url};

use crate::error::Cancelled;
use crate::service::{Capability, LanguageService};

/// Parameters of `embedls/autoInsert`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoInsertParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
    #[serde(flatten)]
    pub context: AutoInsertContext,
}

/// The edit that just happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoInsertContext {
    pub last_change: AutoInsertChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoInsertChange {
    pub range: Range,
    pub text: String,
}

/// Either a snippet inserted at the cursor or an explicit edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AutoInsertResponse {
    Snippet(String),
    Edit(TextEdit),
}

impl LanguageService {
    /// Text to insert automatically after `context.last_change`.
    pub async fn auto_insert(
        &self,
        uri: &Url,
        position: Position,
        context: &AutoInsertContext,
        token: &CancellationToken,
    ) -> Result<Option<AutoInsertResponse>, Cancelled> {
        let targets: Vec<_> = self
            .targets_at(uri, position)
            .into_iter()
            .filter_map(|(target, position)| {
                let range = target.to_embedded_range(context.last_change.range)?;
                let context = AutoInsertContext {
                    last_change: AutoInsertChange {
                        range,
                        text: context.last_change.text.clone(),
                    },
                };
                Some((target, (position, context)))
            })
            .collect();

        self.collect_one(
            Capability::AutoInsert,
            &targets,
            token,
            |provider, target, (position, context)| {
                provider.auto_insert(target.document(), *position, context, token)
            },
            |translator, response| match response {
                AutoInsertResponse::Snippet(text) => Some(AutoInsertResponse::Snippet(text)),
                AutoInsertResponse::Edit(edit) => {
                    translator.text_edit(edit).map(AutoInsertResponse::Edit)
                }
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_use_editor_field_names() {
        let params: AutoInsertParams = serde_json::from_value(serde_json::json!({
            "textDocument": {"uri": "file:///a.vue"},
            "position": {"line": 0, "character": 5},
            "lastChange": {
                "range": {
                    "start": {"line": 0, "character": 4},
                    "end": {"line": 0, "character": 4}
                },
                "text": ">"
            }
        }))
        .unwrap();
        assert_eq!(params.context.last_change.text, ">");
        assert_eq!(params.position, Position::new(0, 5));
    }

    #[test]
    fn responses_are_untagged() {
        let snippet = serde_json::to_value(AutoInsertResponse::Snippet("</div>".into())).unwrap();
        assert_eq!(snippet, serde_json::json!("</div>"));
    }
}

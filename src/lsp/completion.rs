//! Completion across embedded documents.
//!
//! Primary providers compete: the first one (in registration order) with
//! items wins. Additional providers are always appended. Every item carries
//! a tag naming its provider and document so that `completionItem/resolve`
//! goes back to the provider that produced it.

use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{
    CompletionContext, CompletionItem, CompletionList, CompletionTextEdit, CompletionTriggerKind,
    InsertReplaceEdit, Position, TextEdit, Url,
};

use crate::document::EmbeddedTarget;
use crate::error::Cancelled;
use crate::service::{Capability, ItemTag, LanguageService, Registration, Translator};

impl LanguageService {
    /// Completion at a host position.
    ///
    /// A trigger-character request only invites providers declaring that
    /// character. Returns None when no provider answered.
    pub async fn completion(
        &self,
        uri: &Url,
        position: Position,
        context: Option<&CompletionContext>,
        token: &CancellationToken,
    ) -> Result<Option<CompletionList>, Cancelled> {
        let targets = self.targets_at(uri, position);
        let trigger = context
            .filter(|c| c.trigger_kind == CompletionTriggerKind::TRIGGER_CHARACTER)
            .and_then(|c| c.trigger_character.clone());

        let outcomes = self
            .dispatcher
            .fan_out_filtered(
                Capability::Completion,
                &targets,
                token,
                |registration| accepts_trigger(registration, trigger.as_deref()),
                |provider, target, position| {
                    provider.completion(target.document(), *position, context, token)
                },
            )
            .await?;
        if outcomes.is_empty() {
            return Ok(None);
        }

        let mut primary: Option<CompletionList> = None;
        let mut additional = Vec::new();
        let mut is_incomplete = false;
        for outcome in outcomes {
            let registration = self.dispatcher.registration(outcome.provider);
            let target = &targets[outcome.target].0;
            let translator = Translator::new(&self.store, target, Some(registration));
            let list = outcome.value;
            let items: Vec<CompletionItem> = list
                .items
                .into_iter()
                .filter_map(|item| translator.completion_item(item))
                .collect();

            if registration.provider().is_additional_completion() {
                is_incomplete |= list.is_incomplete;
                additional.extend(items);
            } else if primary.is_none() && !items.is_empty() {
                is_incomplete |= list.is_incomplete;
                primary = Some(CompletionList {
                    is_incomplete: list.is_incomplete,
                    items,
                });
            } else if primary.is_none() {
                is_incomplete |= list.is_incomplete;
            }
        }

        let mut items = primary.map(|list| list.items).unwrap_or_default();
        items.extend(additional);
        Ok(Some(CompletionList {
            is_incomplete,
            items,
        }))
    }

    /// Resolve a completion item with the provider that produced it.
    ///
    /// Items without a tag, or whose document is gone, come back unchanged.
    pub async fn completion_resolve(
        &self,
        item: CompletionItem,
        token: &CancellationToken,
    ) -> Result<CompletionItem, Cancelled> {
        let Some(tag) = ItemTag::unwrap_from(item.data.as_ref()) else {
            return Ok(item);
        };
        let Some(target) = self.store.target(&tag.document) else {
            tracing::debug!(uri = %tag.document, "resolving item of a closed document");
            return Ok(item);
        };
        let Some(registration) = self.dispatcher.find(&tag.provider) else {
            return Ok(item);
        };

        let mut embedded = to_embedded_item(&target, item.clone());
        embedded.data = tag.data.clone();
        let document = target.document().clone();
        let resolved = self
            .dispatcher
            .invoke(
                Capability::CompletionResolve,
                &tag.provider,
                &document,
                token,
                |provider| provider.completion_resolve(&document, embedded, token),
            )
            .await?;
        let Some(resolved) = resolved else {
            return Ok(item);
        };

        let translator = Translator::new(&self.store, &target, Some(registration));
        let Some(mut resolved) = translator.completion_edits(resolved) else {
            return Ok(item);
        };
        resolved.data = ItemTag::new(&tag.provider, &tag.document, resolved.data.take()).wrap();
        Ok(resolved)
    }
}

fn accepts_trigger(registration: &Registration, trigger: Option<&str>) -> bool {
    match trigger {
        Some(ch) => registration
            .provider()
            .completion_triggers()
            .iter()
            .any(|t| t == ch),
        None => true,
    }
}

/// Move an item's edits from host coordinates back into `target`.
fn to_embedded_item(target: &EmbeddedTarget, mut item: CompletionItem) -> CompletionItem {
    item.text_edit = item.text_edit.and_then(|edit| match edit {
        CompletionTextEdit::Edit(edit) => Some(CompletionTextEdit::Edit(TextEdit {
            range: target.to_embedded_range(edit.range)?,
            new_text: edit.new_text,
        })),
        CompletionTextEdit::InsertAndReplace(edit) => {
            Some(CompletionTextEdit::InsertAndReplace(InsertReplaceEdit {
                new_text: edit.new_text,
                insert: target.to_embedded_range(edit.insert)?,
                replace: target.to_embedded_range(edit.replace)?,
            }))
        }
    });
    item.additional_text_edits = item.additional_text_edits.map(|edits| {
        edits
            .into_iter()
            .filter_map(|edit| {
                Some(TextEdit {
                    range: target.to_embedded_range(edit.range)?,
                    new_text: edit.new_text,
                })
            })
            .collect()
    });
    item
}

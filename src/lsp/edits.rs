//! Requests that produce edits: rename, formatting, code actions, commands.
//!
//! Every edit passes through the write-back guard, so nothing a provider
//! returns can land in text the host does not contain verbatim.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{
    CodeAction, CodeActionContext, CodeActionOrCommand, DocumentChangeOperation, DocumentChanges,
    FileRename, FormattingOptions, LinkedEditingRanges, Position, PrepareRenameResponse, Range,
    TextEdit, Url, WorkspaceEdit,
};

use crate::error::Cancelled;
use crate::service::{
    Capability, CommandContext, HostCommandContext, ItemTag, LanguageService, Translator,
};

impl LanguageService {
    pub async fn prepare_rename(
        &self,
        uri: &Url,
        position: Position,
        token: &CancellationToken,
    ) -> Result<Option<PrepareRenameResponse>, Cancelled> {
        let targets = self.targets_at(uri, position);
        self.collect_one(
            Capability::PrepareRename,
            &targets,
            token,
            |provider, target, position| {
                provider.prepare_rename(target.document(), *position, token)
            },
            |translator, response| translator.prepare_rename(response),
        )
        .await
    }

    /// Rename across every document at the position, merged into one edit.
    pub async fn rename(
        &self,
        uri: &Url,
        position: Position,
        new_name: &str,
        token: &CancellationToken,
    ) -> Result<Option<WorkspaceEdit>, Cancelled> {
        let targets = self.targets_at(uri, position);
        let edits = self
            .collect(
                Capability::Rename,
                &targets,
                token,
                |provider, target, position| {
                    provider
                        .rename(target.document(), *position, new_name, token)
                        .map(|reply| reply.map(|edit| vec![edit]))
                },
                |translator, edit| Some(translator.workspace_edit(edit)),
            )
            .await?;
        Ok(merge_workspace_edits(edits))
    }

    /// Format a whole host document; one formatter per embedded document.
    pub async fn formatting(
        &self,
        uri: &Url,
        options: &FormattingOptions,
        token: &CancellationToken,
    ) -> Result<Vec<TextEdit>, Cancelled> {
        let targets = self.targets_of(uri);
        self.collect(
            Capability::Format,
            &targets,
            token,
            |provider, target, _| provider.format(target.document(), None, options, token),
            |translator, edit| translator.text_edit(edit),
        )
        .await
    }

    pub async fn range_formatting(
        &self,
        uri: &Url,
        range: Range,
        options: &FormattingOptions,
        token: &CancellationToken,
    ) -> Result<Vec<TextEdit>, Cancelled> {
        let targets = self.targets_in(uri, range);
        self.collect(
            Capability::Format,
            &targets,
            token,
            |provider, target, range| {
                provider.format(target.document(), Some(*range), options, token)
            },
            |translator, edit| translator.text_edit(edit),
        )
        .await
    }

    pub async fn on_type_formatting(
        &self,
        uri: &Url,
        position: Position,
        ch: &str,
        options: &FormattingOptions,
        token: &CancellationToken,
    ) -> Result<Vec<TextEdit>, Cancelled> {
        let targets = self.targets_at(uri, position);
        self.collect(
            Capability::FormatOnType,
            &targets,
            token,
            |provider, target, position| {
                provider.format_on_type(target.document(), *position, ch, options, token)
            },
            |translator, edit| translator.text_edit(edit),
        )
        .await
    }

    /// Code actions for a host range.
    ///
    /// Each document only sees the context diagnostics that fall inside it,
    /// in its own coordinates. Returned actions are tagged for resolve.
    pub async fn code_actions(
        &self,
        uri: &Url,
        range: Range,
        context: &CodeActionContext,
        token: &CancellationToken,
    ) -> Result<Vec<CodeActionOrCommand>, Cancelled> {
        let targets: Vec<_> = self
            .targets_in(uri, range)
            .into_iter()
            .map(|(target, range)| {
                let diagnostics = context
                    .diagnostics
                    .iter()
                    .filter_map(|d| {
                        let mut d = d.clone();
                        d.range = target.to_embedded_range(d.range)?;
                        Some(d)
                    })
                    .collect();
                let context = CodeActionContext {
                    diagnostics,
                    ..context.clone()
                };
                (target, (range, context))
            })
            .collect();

        self.collect(
            Capability::CodeAction,
            &targets,
            token,
            |provider, target, (range, context)| {
                provider.code_actions(target.document(), *range, context, token)
            },
            |translator, action| match action {
                CodeActionOrCommand::CodeAction(action) => Some(CodeActionOrCommand::CodeAction(
                    translator.code_action(action),
                )),
                command => Some(command),
            },
        )
        .await
    }

    /// Resolve a code action with the provider that produced it.
    pub async fn code_action_resolve(
        &self,
        action: CodeAction,
        token: &CancellationToken,
    ) -> Result<CodeAction, Cancelled> {
        let Some(tag) = ItemTag::unwrap_from(action.data.as_ref()) else {
            return Ok(action);
        };
        let Some(target) = self.store.target(&tag.document) else {
            tracing::debug!(uri = %tag.document, "resolving action of a closed document");
            return Ok(action);
        };

        let mut embedded = action.clone();
        embedded.data = tag.data.clone();
        embedded.diagnostics = embedded.diagnostics.map(|diagnostics| {
            diagnostics
                .into_iter()
                .filter_map(|mut d| {
                    d.range = target.to_embedded_range(d.range)?;
                    Some(d)
                })
                .collect()
        });
        let document = target.document().clone();
        let resolved = self
            .dispatcher
            .invoke(
                Capability::CodeActionResolve,
                &tag.provider,
                &document,
                token,
                |provider| provider.code_action_resolve(&document, embedded, token),
            )
            .await?;
        let Some(resolved) = resolved else {
            return Ok(action);
        };

        let translator = Translator::new(&self.store, &target, self.dispatcher.find(&tag.provider));
        let mut resolved = translator.code_action_edits(resolved);
        resolved.data = ItemTag::new(&tag.provider, &tag.document, resolved.data.take()).wrap();
        Ok(resolved)
    }

    /// Edits needed before files are renamed, for every open document among them.
    pub async fn will_rename_files(
        &self,
        files: &[FileRename],
        token: &CancellationToken,
    ) -> Result<Option<WorkspaceEdit>, Cancelled> {
        let mut targets = Vec::new();
        for file in files {
            let (Ok(old), Ok(new)) = (Url::parse(&file.old_uri), Url::parse(&file.new_uri)) else {
                tracing::debug!(old = %file.old_uri, new = %file.new_uri, "skipping invalid rename");
                continue;
            };
            targets.extend(
                self.targets_of(&old)
                    .into_iter()
                    .map(|(target, ())| (target, new.clone())),
            );
        }

        let edits = self
            .collect(
                Capability::FileRename,
                &targets,
                token,
                |provider, target, new_uri| {
                    provider
                        .file_rename(target.document(), new_uri, token)
                        .map(|reply| reply.map(|edit| vec![edit]))
                },
                |translator, edit| Some(translator.workspace_edit(edit)),
            )
            .await?;
        Ok(merge_workspace_edits(edits))
    }

    pub async fn linked_editing_ranges(
        &self,
        uri: &Url,
        position: Position,
        token: &CancellationToken,
    ) -> Result<Option<LinkedEditingRanges>, Cancelled> {
        let targets = self.targets_at(uri, position);
        self.collect_one(
            Capability::LinkedEditingRanges,
            &targets,
            token,
            |provider, target, position| {
                provider.linked_editing_ranges(target.document(), *position, token)
            },
            |translator, ranges| translator.linked_editing(ranges),
        )
        .await
    }

    /// Run a command on the first provider declaring it.
    ///
    /// Anything the provider sends through `context` is translated to host
    /// documents first.
    pub async fn execute_command(
        &self,
        command: &str,
        arguments: &[Value],
        context: Arc<dyn CommandContext>,
        token: &CancellationToken,
    ) -> Result<Option<Value>, Cancelled> {
        let context: Arc<dyn CommandContext> = Arc::new(HostCommandContext {
            inner: context,
            store: self.store.clone(),
        });
        let outcomes = self
            .dispatcher
            .fan_out_global(
                Capability::ExecuteCommand,
                token,
                |registration| {
                    registration
                        .provider()
                        .commands()
                        .iter()
                        .any(|c| c == command)
                },
                |provider| provider.execute_command(command, arguments, context.clone(), token),
            )
            .await?;
        if outcomes.is_empty() {
            tracing::debug!(command, "no provider executed command");
        }
        Ok(outcomes.into_iter().find_map(|o| o.value))
    }
}

/// Merge edits from several providers into one.
fn merge_workspace_edits(edits: Vec<WorkspaceEdit>) -> Option<WorkspaceEdit> {
    if edits.is_empty() {
        return None;
    }
    let mut merged = WorkspaceEdit::default();
    for edit in edits {
        if let Some(changes) = edit.changes {
            let all = merged.changes.get_or_insert_with(HashMap::new);
            for (uri, edits) in changes {
                all.entry(uri).or_default().extend(edits);
            }
        }
        if let Some(changes) = edit.document_changes {
            merged.document_changes = Some(match (merged.document_changes.take(), changes) {
                (None, changes) => changes,
                (Some(DocumentChanges::Edits(mut all)), DocumentChanges::Edits(edits)) => {
                    all.extend(edits);
                    DocumentChanges::Edits(all)
                }
                (Some(all), changes) => {
                    let mut operations = into_operations(all);
                    operations.extend(into_operations(changes));
                    DocumentChanges::Operations(operations)
                }
            });
        }
        if let Some(annotations) = edit.change_annotations {
            merged
                .change_annotations
                .get_or_insert_with(HashMap::new)
                .extend(annotations);
        }
    }
    Some(merged)
}

fn into_operations(changes: DocumentChanges) -> Vec<DocumentChangeOperation> {
    match changes {
        DocumentChanges::Edits(edits) => edits
            .into_iter()
            .map(DocumentChangeOperation::Edit)
            .collect(),
        DocumentChanges::Operations(operations) => operations,
    }
}

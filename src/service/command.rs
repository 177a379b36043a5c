//! Side channel for providers executing commands.

use std::sync::Arc;

use tower_lsp::lsp_types::{Location, Position, Url, WorkspaceEdit};

use crate::document::DocumentStore;

use super::translate::host_workspace_edit;

/// Hooks a command can call back into the client with.
///
/// Implemented by the embedding application; the LSP backend forwards these
/// to work-done progress, a custom notification, and `workspace/applyEdit`.
#[tower_lsp::async_trait]
pub trait CommandContext: Send + Sync {
    async fn begin_progress(&self, title: String, message: Option<String>, percentage: Option<u32>);

    async fn report_progress(&self, message: Option<String>, percentage: Option<u32>);

    async fn end_progress(&self, message: Option<String>);

    /// Ask the client to show `locations` as references of `position`.
    async fn show_references(&self, uri: Url, position: Position, locations: Vec<Location>);

    /// Apply a workspace edit; returns whether the client accepted it.
    async fn apply_edit(&self, label: Option<String>, edit: WorkspaceEdit) -> bool;
}

/// Context that ignores progress and rejects edits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCommandContext;

#[tower_lsp::async_trait]
impl CommandContext for NoopCommandContext {
    async fn begin_progress(&self, _: String, _: Option<String>, _: Option<u32>) {}

    async fn report_progress(&self, _: Option<String>, _: Option<u32>) {}

    async fn end_progress(&self, _: Option<String>) {}

    async fn show_references(&self, _: Url, _: Position, _: Vec<Location>) {}

    async fn apply_edit(&self, _: Option<String>, _: WorkspaceEdit) -> bool {
        false
    }
}

/// Wraps the application's context so that everything a provider sends
/// names host documents only.
pub(crate) struct HostCommandContext {
    pub inner: Arc<dyn CommandContext>,
    pub store: Arc<DocumentStore>,
}

#[tower_lsp::async_trait]
impl CommandContext for HostCommandContext {
    async fn begin_progress(&self, title: String, message: Option<String>, percentage: Option<u32>) {
        self.inner.begin_progress(title, message, percentage).await;
    }

    async fn report_progress(&self, message: Option<String>, percentage: Option<u32>) {
        self.inner.report_progress(message, percentage).await;
    }

    async fn end_progress(&self, message: Option<String>) {
        self.inner.end_progress(message).await;
    }

    async fn show_references(&self, uri: Url, position: Position, locations: Vec<Location>) {
        let anchor = self
            .store
            .to_host_range(&uri, tower_lsp::lsp_types::Range::new(position, position), false);
        let Some((uri, anchor)) = anchor else {
            tracing::debug!(uri = %uri, "dropping references for unmappable position");
            return;
        };
        let locations = locations
            .into_iter()
            .filter_map(|l| {
                let (uri, range) = self.store.to_host_range(&l.uri, l.range, false)?;
                Some(Location::new(uri, range))
            })
            .collect();
        self.inner.show_references(uri, anchor.start, locations).await;
    }

    async fn apply_edit(&self, label: Option<String>, edit: WorkspaceEdit) -> bool {
        let edit = host_workspace_edit(&self.store, edit);
        self.inner.apply_edit(label, edit).await
    }
}

//! The capability provider contract.
//!
//! A provider implements any subset of [`Provider`]'s methods and declares
//! that subset through [`Provider::capabilities`]. Every method receives an
//! embedded document and coordinates local to it; the dispatcher handles
//! translation to and from the host.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{
    CallHierarchyIncomingCall, CallHierarchyItem, CallHierarchyOutgoingCall, CodeAction,
    CodeActionContext, CodeActionOrCommand, CodeLens, Color, ColorInformation, ColorPresentation,
    CompletionContext, CompletionItem, CompletionList, Diagnostic, DocumentHighlight,
    DocumentLink, DocumentSymbol, FoldingRange, FormattingOptions, Hover, InlayHint,
    LinkedEditingRanges, Location, LocationLink, Position, PrepareRenameResponse, Range,
    ReferenceContext, SelectionRange, SignatureHelp, SignatureHelpContext, SymbolInformation,
    TextEdit, Url, WorkspaceEdit,
};

use crate::document::TextDocument;
use crate::error::ProviderError;
use crate::lsp::{AbsoluteToken, AutoInsertContext, AutoInsertResponse};

use super::capability::CapabilitySet;
use super::CommandContext;

/// A provider's answer: now, later, or no opinion.
pub enum Reply<T> {
    /// Value computed synchronously.
    Ready(T),
    /// Value still being computed; `Ok(None)` means no opinion after all.
    Deferred(BoxFuture<'static, Result<Option<T>, ProviderError>>),
    /// No opinion; other providers decide.
    Absent,
}

impl<T> std::fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(_) => f.write_str("Ready(..)"),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
            Self::Absent => f.write_str("Absent"),
        }
    }
}

impl<T: Send + 'static> Reply<T> {
    /// Wrap a future producing the value.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Option<T>, ProviderError>> + Send + 'static,
    {
        Self::Deferred(future.boxed())
    }

    /// Resolve to the final value, awaiting if deferred.
    pub async fn settle(self) -> Result<Option<T>, ProviderError> {
        match self {
            Self::Ready(value) => Ok(Some(value)),
            Self::Deferred(future) => future.await,
            Self::Absent => Ok(None),
        }
    }

    /// Transform the value once it is available.
    pub fn map<U, F>(self, f: F) -> Reply<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self {
            Self::Ready(value) => Reply::Ready(f(value)),
            Self::Deferred(future) => Reply::deferred(async move { Ok(future.await?.map(f)) }),
            Self::Absent => Reply::Absent,
        }
    }
}

impl<T> From<Option<T>> for Reply<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Self::Ready)
    }
}

/// Result of one provider method call.
pub type ProviderResult<T> = Result<Reply<T>, ProviderError>;

fn absent<T>() -> ProviderResult<T> {
    Ok(Reply::Absent)
}

/// A per-language capability implementation.
///
/// Every capability method is optional. The defaults answer [`Reply::Absent`],
/// so implementing a method without declaring it in
/// [`Provider::capabilities`] has no effect.
#[allow(unused_variables)]
pub trait Provider: Send + Sync {
    /// Capabilities this provider implements.
    fn capabilities(&self) -> CapabilitySet;

    /// Characters that trigger completion from this provider.
    fn completion_triggers(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether completion results are added to, rather than competing with,
    /// the primary providers' results.
    fn is_additional_completion(&self) -> bool {
        false
    }

    /// Commands this provider executes.
    fn commands(&self) -> Vec<String> {
        Vec::new()
    }

    fn hover(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        token: &CancellationToken,
    ) -> ProviderResult<Hover> {
        absent()
    }

    fn references(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        context: &ReferenceContext,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<Location>> {
        absent()
    }

    fn implementations(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<LocationLink>> {
        absent()
    }

    fn document_highlights(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<DocumentHighlight>> {
        absent()
    }

    fn document_links(
        &self,
        document: &Arc<TextDocument>,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<DocumentLink>> {
        absent()
    }

    fn document_symbols(
        &self,
        document: &Arc<TextDocument>,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<DocumentSymbol>> {
        absent()
    }

    /// Tokens in absolute coordinates, optionally limited to `range`.
    fn semantic_tokens(
        &self,
        document: &Arc<TextDocument>,
        range: Option<Range>,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<AbsoluteToken>> {
        absent()
    }

    fn workspace_symbols(
        &self,
        query: &str,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<SymbolInformation>> {
        absent()
    }

    fn execute_command(
        &self,
        command: &str,
        arguments: &[Value],
        context: Arc<dyn CommandContext>,
        token: &CancellationToken,
    ) -> ProviderResult<Option<Value>> {
        absent()
    }

    fn document_colors(
        &self,
        document: &Arc<TextDocument>,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<ColorInformation>> {
        absent()
    }

    fn color_presentations(
        &self,
        document: &Arc<TextDocument>,
        color: Color,
        range: Range,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<ColorPresentation>> {
        absent()
    }

    /// Edits needed when the file owning `document` moves to `new_uri`.
    fn file_rename(
        &self,
        document: &Arc<TextDocument>,
        new_uri: &Url,
        token: &CancellationToken,
    ) -> ProviderResult<WorkspaceEdit> {
        absent()
    }

    fn folding_ranges(
        &self,
        document: &Arc<TextDocument>,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<FoldingRange>> {
        absent()
    }

    fn selection_range(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        token: &CancellationToken,
    ) -> ProviderResult<SelectionRange> {
        absent()
    }

    fn signature_help(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        context: Option<&SignatureHelpContext>,
        token: &CancellationToken,
    ) -> ProviderResult<SignatureHelp> {
        absent()
    }

    /// Format the whole document, or only `range`.
    fn format(
        &self,
        document: &Arc<TextDocument>,
        range: Option<Range>,
        options: &FormattingOptions,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<TextEdit>> {
        absent()
    }

    fn format_on_type(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        ch: &str,
        options: &FormattingOptions,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<TextEdit>> {
        absent()
    }

    fn definition(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<LocationLink>> {
        absent()
    }

    fn type_definition(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<LocationLink>> {
        absent()
    }

    fn completion(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        context: Option<&CompletionContext>,
        token: &CancellationToken,
    ) -> ProviderResult<CompletionList> {
        absent()
    }

    /// Fill in a completion item this provider produced earlier.
    fn completion_resolve(
        &self,
        document: &Arc<TextDocument>,
        item: CompletionItem,
        token: &CancellationToken,
    ) -> ProviderResult<CompletionItem> {
        absent()
    }

    fn prepare_rename(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        token: &CancellationToken,
    ) -> ProviderResult<PrepareRenameResponse> {
        absent()
    }

    fn rename(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        new_name: &str,
        token: &CancellationToken,
    ) -> ProviderResult<WorkspaceEdit> {
        absent()
    }

    fn code_actions(
        &self,
        document: &Arc<TextDocument>,
        range: Range,
        context: &CodeActionContext,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<CodeActionOrCommand>> {
        absent()
    }

    fn code_action_resolve(
        &self,
        document: &Arc<TextDocument>,
        action: CodeAction,
        token: &CancellationToken,
    ) -> ProviderResult<CodeAction> {
        absent()
    }

    fn code_lens(
        &self,
        document: &Arc<TextDocument>,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<CodeLens>> {
        absent()
    }

    fn code_lens_resolve(
        &self,
        document: &Arc<TextDocument>,
        lens: CodeLens,
        token: &CancellationToken,
    ) -> ProviderResult<CodeLens> {
        absent()
    }

    fn prepare_call_hierarchy(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<CallHierarchyItem>> {
        absent()
    }

    fn incoming_calls(
        &self,
        document: &Arc<TextDocument>,
        item: CallHierarchyItem,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<CallHierarchyIncomingCall>> {
        absent()
    }

    fn outgoing_calls(
        &self,
        document: &Arc<TextDocument>,
        item: CallHierarchyItem,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<CallHierarchyOutgoingCall>> {
        absent()
    }

    fn inlay_hints(
        &self,
        document: &Arc<TextDocument>,
        range: Range,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<InlayHint>> {
        absent()
    }

    fn linked_editing_ranges(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        token: &CancellationToken,
    ) -> ProviderResult<LinkedEditingRanges> {
        absent()
    }

    fn auto_insert(
        &self,
        document: &Arc<TextDocument>,
        position: Position,
        context: &AutoInsertContext,
        token: &CancellationToken,
    ) -> ProviderResult<AutoInsertResponse> {
        absent()
    }

    /// Adjust a range of `document` that did not map to the host.
    ///
    /// Called synchronously while translating results this provider produced;
    /// return None to discard the range.
    fn resolve_embedded_range(&self, document: &Arc<TextDocument>, range: Range) -> Option<Range> {
        None
    }

    fn validate_syntactic(
        &self,
        document: &Arc<TextDocument>,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<Diagnostic>> {
        absent()
    }

    fn validate_semantic(
        &self,
        document: &Arc<TextDocument>,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<Diagnostic>> {
        absent()
    }

    fn validate_suggestion(
        &self,
        document: &Arc<TextDocument>,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<Diagnostic>> {
        absent()
    }

    fn validate_declaration(
        &self,
        document: &Arc<TextDocument>,
        token: &CancellationToken,
    ) -> ProviderResult<Vec<Diagnostic>> {
        absent()
    }
}

/// Which documents a provider is invited for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DocumentSelector {
    /// Every document, host or embedded.
    #[default]
    Any,
    /// Documents whose language id is in the list.
    Languages(Vec<String>),
}

impl DocumentSelector {
    pub fn languages<I, S>(languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Languages(languages.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, document: &TextDocument) -> bool {
        match self {
            Self::Any => true,
            Self::Languages(languages) => languages.iter().any(|l| l == document.language_id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(language: &str) -> TextDocument {
        TextDocument::new(Url::parse("file:///a").unwrap(), language, 1, "")
    }

    #[tokio::test]
    async fn replies_settle_uniformly() {
        assert_eq!(Reply::Ready(1).settle().await, Ok(Some(1)));
        assert_eq!(Reply::<i32>::Absent.settle().await, Ok(None));
        assert_eq!(Reply::deferred(async { Ok(Some(2)) }).settle().await, Ok(Some(2)));
        assert_eq!(
            Reply::<i32>::deferred(async { Err(ProviderError::failed("nope")) })
                .settle()
                .await,
            Err(ProviderError::failed("nope"))
        );
        assert!(matches!(Reply::from(None::<i32>), Reply::Absent));
    }

    #[test]
    fn selector_matches_language() {
        let css = DocumentSelector::languages(["css", "scss"]);
        assert!(css.matches(&document("scss")));
        assert!(!css.matches(&document("javascript")));
        assert!(DocumentSelector::Any.matches(&document("javascript")));
    }
}

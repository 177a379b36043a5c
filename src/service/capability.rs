//! Capability names, capability sets, and merge policies.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use tower_lsp::lsp_types::Url;

/// A feature a provider may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// `textDocument/hover`.
    Hover,
    /// `textDocument/references`.
    References,
    /// `textDocument/implementation`.
    Implementations,
    /// `textDocument/documentHighlight`.
    DocumentHighlights,
    /// `textDocument/documentLink`.
    DocumentLinks,
    /// `textDocument/documentSymbol`.
    DocumentSymbols,
    /// `textDocument/semanticTokens/*`.
    SemanticTokens,
    /// `workspace/symbol`.
    WorkspaceSymbols,
    /// `workspace/executeCommand`.
    ExecuteCommand,
    /// `textDocument/documentColor`.
    DocumentColors,
    /// `textDocument/colorPresentation`.
    ColorPresentations,
    /// `workspace/willRenameFiles`.
    FileRename,
    /// `textDocument/foldingRange`.
    FoldingRanges,
    /// `textDocument/selectionRange`.
    SelectionRanges,
    /// `textDocument/signatureHelp`.
    SignatureHelp,
    /// `textDocument/formatting` and `textDocument/rangeFormatting`.
    Format,
    /// `textDocument/onTypeFormatting`.
    FormatOnType,
    /// `textDocument/definition`.
    Definition,
    /// `textDocument/typeDefinition`.
    TypeDefinition,
    /// `textDocument/completion`.
    Completion,
    /// `completionItem/resolve`.
    CompletionResolve,
    /// `textDocument/prepareRename`.
    PrepareRename,
    /// `textDocument/rename`.
    Rename,
    /// `textDocument/codeAction`.
    CodeAction,
    /// `codeAction/resolve`.
    CodeActionResolve,
    /// `textDocument/codeLens`.
    CodeLens,
    /// `codeLens/resolve`.
    CodeLensResolve,
    /// `textDocument/prepareCallHierarchy`.
    CallHierarchyPrepare,
    /// `callHierarchy/incomingCalls`.
    IncomingCalls,
    /// `callHierarchy/outgoingCalls`.
    OutgoingCalls,
    /// `textDocument/inlayHint`.
    InlayHints,
    /// `textDocument/linkedEditingRange`.
    LinkedEditingRanges,
    /// Auto-closing and auto-insert after typing.
    AutoInsert,
    /// Adjusts embedded ranges that fail to map.
    ResolveEmbeddedRange,
    /// Syntax-only validation.
    ValidateSyntactic,
    /// Type-aware validation.
    ValidateSemantic,
    /// Suggestion-level validation.
    ValidateSuggestion,
    /// Declaration-file validation.
    ValidateDeclaration,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 38] = [
        Self::Hover,
        Self::References,
        Self::Implementations,
        Self::DocumentHighlights,
        Self::DocumentLinks,
        Self::DocumentSymbols,
        Self::SemanticTokens,
        Self::WorkspaceSymbols,
        Self::ExecuteCommand,
        Self::DocumentColors,
        Self::ColorPresentations,
        Self::FileRename,
        Self::FoldingRanges,
        Self::SelectionRanges,
        Self::SignatureHelp,
        Self::Format,
        Self::FormatOnType,
        Self::Definition,
        Self::TypeDefinition,
        Self::Completion,
        Self::CompletionResolve,
        Self::PrepareRename,
        Self::Rename,
        Self::CodeAction,
        Self::CodeActionResolve,
        Self::CodeLens,
        Self::CodeLensResolve,
        Self::CallHierarchyPrepare,
        Self::IncomingCalls,
        Self::OutgoingCalls,
        Self::InlayHints,
        Self::LinkedEditingRanges,
        Self::AutoInsert,
        Self::ResolveEmbeddedRange,
        Self::ValidateSyntactic,
        Self::ValidateSemantic,
        Self::ValidateSuggestion,
        Self::ValidateDeclaration,
    ];

    /// Returns the capability key used in provider contracts and logs.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Hover => "doHover",
            Self::References => "findReferences",
            Self::Implementations => "findImplementations",
            Self::DocumentHighlights => "findDocumentHighlights",
            Self::DocumentLinks => "findDocumentLinks",
            Self::DocumentSymbols => "findDocumentSymbols",
            Self::SemanticTokens => "findDocumentSemanticTokens",
            Self::WorkspaceSymbols => "findWorkspaceSymbols",
            Self::ExecuteCommand => "doExecuteCommand",
            Self::DocumentColors => "findDocumentColors",
            Self::ColorPresentations => "getColorPresentations",
            Self::FileRename => "doFileRename",
            Self::FoldingRanges => "getFoldingRanges",
            Self::SelectionRanges => "getSelectionRanges",
            Self::SignatureHelp => "getSignatureHelp",
            Self::Format => "format",
            Self::FormatOnType => "formatOnType",
            Self::Definition => "definition.on",
            Self::TypeDefinition => "definition.onType",
            Self::Completion => "complete.on",
            Self::CompletionResolve => "complete.resolve",
            Self::PrepareRename => "rename.prepare",
            Self::Rename => "rename.on",
            Self::CodeAction => "codeAction.on",
            Self::CodeActionResolve => "codeAction.resolve",
            Self::CodeLens => "codeLens.on",
            Self::CodeLensResolve => "codeLens.resolve",
            Self::CallHierarchyPrepare => "callHierarchy.prepare",
            Self::IncomingCalls => "callHierarchy.onIncomingCalls",
            Self::OutgoingCalls => "callHierarchy.onOutgoingCalls",
            Self::InlayHints => "inlayHints.on",
            Self::LinkedEditingRanges => "findLinkedEditingRanges",
            Self::AutoInsert => "doAutoInsert",
            Self::ResolveEmbeddedRange => "resolveEmbeddedRange",
            Self::ValidateSyntactic => "validation.onSyntactic",
            Self::ValidateSemantic => "validation.onSemantic",
            Self::ValidateSuggestion => "validation.onSuggestion",
            Self::ValidateDeclaration => "validation.onDeclaration",
        }
    }

    /// How contributions from several providers combine.
    #[must_use]
    pub fn merge_policy(self) -> MergePolicy {
        match self {
            Self::Hover
            | Self::SignatureHelp
            | Self::PrepareRename
            | Self::SelectionRanges
            | Self::LinkedEditingRanges
            | Self::AutoInsert
            | Self::ExecuteCommand
            | Self::ResolveEmbeddedRange
            | Self::CompletionResolve
            | Self::CodeActionResolve
            | Self::CodeLensResolve => MergePolicy::FirstSuccess,
            Self::Format | Self::FormatOnType => MergePolicy::FirstPerDocument,
            _ => MergePolicy::Concatenate,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.key())
    }
}

/// Capabilities a provider implements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every capability; for providers that decide per request.
    #[must_use]
    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    #[must_use]
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    /// Union with another set.
    pub fn extend(&mut self, other: &CapabilitySet) {
        self.0.extend(other.iter());
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Rule for combining per-provider results into one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// First non-empty result in registration order.
    FirstSuccess,
    /// Union of all non-empty results, in registration order.
    Concatenate,
    /// First non-empty result for each document, concatenated across documents.
    FirstPerDocument,
}

/// One provider's translated result for one document.
#[derive(Debug, Clone)]
pub struct Contribution<T> {
    /// Identifier of the provider that produced the value.
    pub provider: String,
    /// Document the provider was invoked on.
    pub document: Url,
    pub value: T,
}

impl MergePolicy {
    /// Merge contributions, which must already be in registration order.
    pub fn merge<T>(self, contributions: Vec<Contribution<Vec<T>>>) -> Vec<T> {
        let non_empty = contributions.into_iter().filter(|c| !c.value.is_empty());
        match self {
            Self::FirstSuccess => non_empty.map(|c| c.value).next().unwrap_or_default(),
            Self::Concatenate => non_empty.flat_map(|c| c.value).collect(),
            Self::FirstPerDocument => {
                let mut seen = HashSet::new();
                non_empty
                    .filter(|c| seen.insert(c.document.clone()))
                    .flat_map(|c| c.value)
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(provider: &str, document: &str, value: Vec<u32>) -> Contribution<Vec<u32>> {
        Contribution {
            provider: provider.to_string(),
            document: Url::parse(document).unwrap(),
            value,
        }
    }

    fn sample() -> Vec<Contribution<Vec<u32>>> {
        vec![
            contribution("a", "file:///x#style0", vec![]),
            contribution("b", "file:///x#style0", vec![1, 2]),
            contribution("c", "file:///x#script0", vec![3]),
            contribution("d", "file:///x#style0", vec![4]),
        ]
    }

    #[test]
    fn first_success_skips_empty_results() {
        assert_eq!(MergePolicy::FirstSuccess.merge(sample()), vec![1, 2]);
        assert!(MergePolicy::FirstSuccess.merge::<u32>(vec![]).is_empty());
    }

    #[test]
    fn concatenate_keeps_registration_order() {
        assert_eq!(MergePolicy::Concatenate.merge(sample()), vec![1, 2, 3, 4]);
    }

    #[test]
    fn first_per_document_takes_one_result_per_document() {
        assert_eq!(MergePolicy::FirstPerDocument.merge(sample()), vec![1, 2, 3]);
    }

    #[test]
    fn keys_are_unique() {
        let keys: BTreeSet<&str> = Capability::ALL.iter().map(|c| c.key()).collect();
        assert_eq!(keys.len(), Capability::ALL.len());
    }

    #[test]
    fn policies_follow_capability() {
        assert_eq!(Capability::Hover.merge_policy(), MergePolicy::FirstSuccess);
        assert_eq!(Capability::ValidateSemantic.merge_policy(), MergePolicy::Concatenate);
        assert_eq!(Capability::Format.merge_policy(), MergePolicy::FirstPerDocument);
        assert!(CapabilitySet::all().contains(Capability::InlayHints));
        assert!(!CapabilitySet::new().with(Capability::Hover).contains(Capability::Rename));
    }
}

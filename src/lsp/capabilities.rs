//! LSP capability negotiation.
//!
//! The server advertises exactly what its registered providers implement.

use tower_lsp::lsp_types::{
    CallHierarchyServerCapability, CodeActionOptions, CodeActionProviderCapability,
    CodeLensOptions, ColorProviderCapability, CompletionOptions, DocumentLinkOptions,
    DocumentOnTypeFormattingOptions, ExecuteCommandOptions, FileOperationFilter,
    FileOperationPattern, FileOperationRegistrationOptions, FoldingRangeProviderCapability,
    HoverProviderCapability, ImplementationProviderCapability, LinkedEditingRangeServerCapabilities,
    OneOf, RenameOptions, SelectionRangeProviderCapability, SemanticTokensFullOptions,
    SemanticTokensOptions, SemanticTokensServerCapabilities, ServerCapabilities,
    SignatureHelpOptions, TextDocumentSyncCapability, TextDocumentSyncKind,
    TextDocumentSyncOptions, TypeDefinitionProviderCapability, WorkDoneProgressOptions,
    WorkspaceFileOperationsServerCapabilities, WorkspaceServerCapabilities,
};

use crate::service::{Capability, LanguageService};

use super::legend;

/// Get the server capabilities to report to the client.
pub fn server_capabilities(service: &LanguageService) -> ServerCapabilities {
    let caps = service.capabilities();
    let has = |capability| caps.contains(capability);

    ServerCapabilities {
        // Full document sync; every change rebuilds the mapping table anyway
        text_document_sync: Some(TextDocumentSyncCapability::Options(
            TextDocumentSyncOptions {
                open_close: Some(true),
                change: Some(TextDocumentSyncKind::FULL),
                will_save: None,
                will_save_wait_until: None,
                save: None,
            },
        )),
        hover_provider: has(Capability::Hover).then_some(HoverProviderCapability::Simple(true)),
        completion_provider: has(Capability::Completion).then(|| CompletionOptions {
            trigger_characters: Some(service.completion_triggers()),
            resolve_provider: Some(has(Capability::CompletionResolve)),
            ..Default::default()
        }),
        signature_help_provider: has(Capability::SignatureHelp).then(|| SignatureHelpOptions {
            trigger_characters: Some(vec!["(".to_string(), ",".to_string()]),
            retrigger_characters: Some(vec![")".to_string()]),
            work_done_progress_options: WorkDoneProgressOptions::default(),
        }),
        definition_provider: flag(has(Capability::Definition)),
        type_definition_provider: has(Capability::TypeDefinition)
            .then_some(TypeDefinitionProviderCapability::Simple(true)),
        implementation_provider: has(Capability::Implementations)
            .then_some(ImplementationProviderCapability::Simple(true)),
        references_provider: flag(has(Capability::References)),
        document_highlight_provider: flag(has(Capability::DocumentHighlights)),
        document_symbol_provider: flag(has(Capability::DocumentSymbols)),
        workspace_symbol_provider: flag(has(Capability::WorkspaceSymbols)),
        code_action_provider: has(Capability::CodeAction).then(|| {
            CodeActionProviderCapability::Options(CodeActionOptions {
                code_action_kinds: None,
                work_done_progress_options: WorkDoneProgressOptions::default(),
                resolve_provider: Some(has(Capability::CodeActionResolve)),
            })
        }),
        code_lens_provider: has(Capability::CodeLens).then(|| CodeLensOptions {
            resolve_provider: Some(has(Capability::CodeLensResolve)),
        }),
        document_formatting_provider: flag(has(Capability::Format)),
        document_range_formatting_provider: flag(has(Capability::Format)),
        document_on_type_formatting_provider: has(Capability::FormatOnType).then(|| {
            DocumentOnTypeFormattingOptions {
                first_trigger_character: "\n".to_string(),
                more_trigger_character: Some(vec!["}".to_string(), ";".to_string()]),
            }
        }),
        rename_provider: has(Capability::Rename).then(|| {
            OneOf::Right(RenameOptions {
                prepare_provider: Some(has(Capability::PrepareRename)),
                work_done_progress_options: WorkDoneProgressOptions::default(),
            })
        }),
        document_link_provider: has(Capability::DocumentLinks).then(|| DocumentLinkOptions {
            resolve_provider: Some(false),
            work_done_progress_options: WorkDoneProgressOptions::default(),
        }),
        color_provider: has(Capability::DocumentColors)
            .then_some(ColorProviderCapability::Simple(true)),
        folding_range_provider: has(Capability::FoldingRanges)
            .then_some(FoldingRangeProviderCapability::Simple(true)),
        selection_range_provider: has(Capability::SelectionRanges)
            .then_some(SelectionRangeProviderCapability::Simple(true)),
        linked_editing_range_provider: has(Capability::LinkedEditingRanges)
            .then_some(LinkedEditingRangeServerCapabilities::Simple(true)),
        call_hierarchy_provider: has(Capability::CallHierarchyPrepare)
            .then_some(CallHierarchyServerCapability::Simple(true)),
        inlay_hint_provider: flag(has(Capability::InlayHints)),
        execute_command_provider: has(Capability::ExecuteCommand).then(|| ExecuteCommandOptions {
            commands: service.commands(),
            work_done_progress_options: WorkDoneProgressOptions::default(),
        }),
        semantic_tokens_provider: has(Capability::SemanticTokens).then(|| {
            SemanticTokensServerCapabilities::SemanticTokensOptions(SemanticTokensOptions {
                legend: legend(),
                full: Some(SemanticTokensFullOptions::Bool(true)),
                range: Some(true),
                work_done_progress_options: WorkDoneProgressOptions::default(),
            })
        }),
        workspace: has(Capability::FileRename).then(|| WorkspaceServerCapabilities {
            workspace_folders: None,
            file_operations: Some(WorkspaceFileOperationsServerCapabilities {
                will_rename: Some(FileOperationRegistrationOptions {
                    filters: vec![FileOperationFilter {
                        scheme: Some("file".to_string()),
                        pattern: FileOperationPattern {
                            glob: "**/*".to_string(),
                            matches: None,
                            options: None,
                        },
                    }],
                }),
                ..Default::default()
            }),
        }),
        ..Default::default()
    }
}

fn flag<T>(enabled: bool) -> Option<OneOf<bool, T>> {
    enabled.then_some(OneOf::Left(true))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::service::{CapabilitySet, DocumentSelector, Provider, ServiceConfig};

    struct Css;

    impl Provider for Css {
        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::new()
                .with(Capability::Hover)
                .with(Capability::Completion)
                .with(Capability::Format)
        }

        fn completion_triggers(&self) -> Vec<String> {
            vec![":".to_string(), "-".to_string()]
        }
    }

    #[test]
    fn capabilities_include_document_sync() {
        let service = ServiceConfig::new().build().unwrap();
        let caps = server_capabilities(&service);
        assert!(caps.text_document_sync.is_some());
        assert!(caps.hover_provider.is_none());
    }

    #[test]
    fn capabilities_follow_providers() {
        let service = ServiceConfig::new()
            .plugin("css", Arc::new(Css), DocumentSelector::languages(["css"]))
            .build()
            .unwrap();
        let caps = server_capabilities(&service);

        assert_eq!(caps.hover_provider, Some(HoverProviderCapability::Simple(true)));
        let completion = caps.completion_provider.unwrap();
        assert_eq!(
            completion.trigger_characters,
            Some(vec!["-".to_string(), ":".to_string()])
        );
        assert_eq!(completion.resolve_provider, Some(false));
        assert_eq!(caps.document_range_formatting_provider, Some(OneOf::Left(true)));
        assert!(caps.rename_provider.is_none());
        assert!(caps.semantic_tokens_provider.is_none());
    }
}

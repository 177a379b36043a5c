//! Embedded-language server runtime.
//!
//! A host document (a component file mixing markup, styles, and script) is
//! split into embedded documents by [`LanguageModule`]s. Requests are
//! dispatched to per-language [`Provider`]s in embedded coordinates and
//! their answers are translated back and merged. [`Backend`] serves a
//! [`LanguageService`] over LSP.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc::{Error, ErrorCode, Result};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService};

mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod lsp;
pub mod rules;
pub mod service;
pub mod settings;

pub use client::{ShowReferences, ShowReferencesParams};
pub use config::{ConfigurationHost, SettingsConfiguration};
pub use document::{
    ComponentLanguage, DocumentStore, EmbeddedCode, EmbeddedName, EmbeddedTarget, LanguageModule,
    LineIndex, RegionKind, Segment, TextDocument,
};
pub use error::{Cancelled, ConfigError, ProviderError, SettingsError};
pub use lsp::{server_capabilities, AbsoluteToken, AutoInsertContext, AutoInsertResponse};
pub use rules::{FixRef, Rule, RuleContext, RuleEngine, RuleFix, RuleLevel, RuleStage};
pub use service::{
    Capability, CapabilitySet, CommandContext, DocumentSelector, LanguageService, Provider,
    ProviderResult, Reply, ServiceConfig,
};
pub use settings::{discover_settings, load_settings, Settings};

use client::ClientCommandContext;
use lsp::AutoInsertParams;

pub struct Backend {
    client: Client,
    config: Mutex<Option<ServiceConfig>>,
    service: OnceLock<Arc<LanguageService>>,
    shutdown: CancellationToken,
}

impl Backend {
    pub(crate) fn new(client: Client, config: ServiceConfig) -> Self {
        Self {
            client,
            config: Mutex::new(Some(config)),
            service: OnceLock::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn service(&self) -> Result<Arc<LanguageService>> {
        self.service.get().cloned().ok_or_else(Error::internal_error)
    }

    /// Token for one request; cancelled when the server shuts down.
    fn token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Open or replace a document and publish its diagnostics.
    async fn on_document_change(&self, uri: Url, language_id: &str, text: String, version: i32) {
        let Ok(service) = self.service() else {
            return;
        };
        service.open_document(uri.clone(), language_id, version, text);
        self.publish_diagnostics_for(&service, uri).await;
    }

    /// Publish diagnostics for a document.
    async fn publish_diagnostics_for(&self, service: &LanguageService, uri: Url) {
        let version = service.document(&uri).map(|node| node.document().version());
        match service.diagnostics(&uri, &self.token()).await {
            Ok(diagnostics) => {
                self.client
                    .publish_diagnostics(uri, diagnostics, version)
                    .await;
            }
            Err(Cancelled) => tracing::debug!(uri = %uri, "diagnostics cancelled"),
        }
    }

    async fn auto_insert(&self, params: AutoInsertParams) -> Result<Option<AutoInsertResponse>> {
        let service = self.service()?;
        service
            .auto_insert(
                &params.text_document.uri,
                params.position,
                &params.context,
                &self.token(),
            )
            .await
            .map_err(cancelled)
    }
}

fn cancelled(error: Cancelled) -> Error {
    Error {
        code: ErrorCode::RequestCancelled,
        message: error.to_string().into(),
        data: None,
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let root_uri = params
            .workspace_folders
            .as_ref()
            .and_then(|folders| folders.first())
            .map(|f| f.uri.clone())
            .or_else(|| {
                #[allow(deprecated)]
                params.root_uri.clone()
            });

        let Some(mut config) = self.config.lock().await.take() else {
            return Err(Error::invalid_request());
        };
        if let Some(locale) = params.locale {
            config = config.locale(locale);
        }
        if let Some(root_uri) = root_uri {
            if let Ok(root) = root_uri.to_file_path() {
                // Discover settings by walking up the directory tree
                let (settings, settings_dir): (Settings, PathBuf) = discover_settings(&root);
                tracing::info!(dir = %settings_dir.display(), "using settings");
                config = config.apply_settings(&settings);
            }
            config = config.root_uri(root_uri);
        }

        let service = config.build().map_err(|error| {
            tracing::error!(%error, "invalid service configuration");
            Error {
                code: ErrorCode::InvalidParams,
                message: error.to_string().into(),
                data: None,
            }
        })?;
        let capabilities = server_capabilities(&service);
        let _ = self.service.set(Arc::new(service));

        Ok(InitializeResult {
            capabilities,
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            ..Default::default()
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "embedls initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        self.on_document_change(
            document.uri,
            &document.language_id,
            document.text,
            document.version,
        )
        .await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let Some(language_id) = self.service().ok().and_then(|service| {
            service
                .document(&uri)
                .map(|node| node.document().language_id().to_string())
        }) else {
            tracing::debug!(uri = %uri, "change for a document that was never opened");
            return;
        };
        // We use FULL sync, so there's exactly one change with the full text
        if let Some(change) = params.content_changes.into_iter().next() {
            self.on_document_change(uri, &language_id, change.text, params.text_document.version)
                .await;
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        if let Ok(service) = self.service() {
            service.close_document(&params.text_document.uri);
        }
        // Clear diagnostics
        self.client
            .publish_diagnostics(params.text_document.uri, vec![], None)
            .await;
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let Ok(service) = self.service() else {
            return;
        };
        service.update_configuration(params.settings);
        // Rules may read configuration; revalidate everything open
        for uri in service.store().host_uris() {
            self.publish_diagnostics_for(&service, uri).await;
        }
    }

    async fn will_rename_files(&self, params: RenameFilesParams) -> Result<Option<WorkspaceEdit>> {
        self.service()?
            .will_rename_files(&params.files, &self.token())
            .await
            .map_err(cancelled)
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let params = params.text_document_position_params;
        self.service()?
            .hover(&params.text_document.uri, params.position, &self.token())
            .await
            .map_err(cancelled)
    }

    async fn signature_help(&self, params: SignatureHelpParams) -> Result<Option<SignatureHelp>> {
        let position = params.text_document_position_params;
        self.service()?
            .signature_help(
                &position.text_document.uri,
                position.position,
                params.context.as_ref(),
                &self.token(),
            )
            .await
            .map_err(cancelled)
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let position = params.text_document_position;
        let list = self
            .service()?
            .completion(
                &position.text_document.uri,
                position.position,
                params.context.as_ref(),
                &self.token(),
            )
            .await
            .map_err(cancelled)?;
        Ok(list.map(CompletionResponse::List))
    }

    async fn completion_resolve(&self, item: CompletionItem) -> Result<CompletionItem> {
        self.service()?
            .completion_resolve(item, &self.token())
            .await
            .map_err(cancelled)
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let params = params.text_document_position_params;
        let links = self
            .service()?
            .definition(&params.text_document.uri, params.position, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(links).map(GotoDefinitionResponse::Link))
    }

    async fn goto_type_definition(
        &self,
        params: request::GotoTypeDefinitionParams,
    ) -> Result<Option<request::GotoTypeDefinitionResponse>> {
        let params = params.text_document_position_params;
        let links = self
            .service()?
            .type_definition(&params.text_document.uri, params.position, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(links).map(GotoDefinitionResponse::Link))
    }

    async fn goto_implementation(
        &self,
        params: request::GotoImplementationParams,
    ) -> Result<Option<request::GotoImplementationResponse>> {
        let params = params.text_document_position_params;
        let links = self
            .service()?
            .implementations(&params.text_document.uri, params.position, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(links).map(GotoDefinitionResponse::Link))
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let position = params.text_document_position;
        let locations = self
            .service()?
            .references(
                &position.text_document.uri,
                position.position,
                &params.context,
                &self.token(),
            )
            .await
            .map_err(cancelled)?;
        Ok(non_empty(locations))
    }

    async fn document_highlight(
        &self,
        params: DocumentHighlightParams,
    ) -> Result<Option<Vec<DocumentHighlight>>> {
        let params = params.text_document_position_params;
        let highlights = self
            .service()?
            .document_highlights(&params.text_document.uri, params.position, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(highlights))
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>> {
        let symbols = self
            .service()?
            .document_symbols(&params.text_document.uri, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(symbols).map(DocumentSymbolResponse::Nested))
    }

    async fn symbol(
        &self,
        params: WorkspaceSymbolParams,
    ) -> Result<Option<Vec<SymbolInformation>>> {
        let symbols = self
            .service()?
            .workspace_symbols(&params.query, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(symbols))
    }

    async fn document_link(&self, params: DocumentLinkParams) -> Result<Option<Vec<DocumentLink>>> {
        let links = self
            .service()?
            .document_links(&params.text_document.uri, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(links))
    }

    async fn code_action(&self, params: CodeActionParams) -> Result<Option<CodeActionResponse>> {
        let actions = self
            .service()?
            .code_actions(
                &params.text_document.uri,
                params.range,
                &params.context,
                &self.token(),
            )
            .await
            .map_err(cancelled)?;
        Ok(non_empty(actions))
    }

    async fn code_action_resolve(&self, action: CodeAction) -> Result<CodeAction> {
        self.service()?
            .code_action_resolve(action, &self.token())
            .await
            .map_err(cancelled)
    }

    async fn code_lens(&self, params: CodeLensParams) -> Result<Option<Vec<CodeLens>>> {
        let lenses = self
            .service()?
            .code_lens(&params.text_document.uri, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(lenses))
    }

    async fn code_lens_resolve(&self, lens: CodeLens) -> Result<CodeLens> {
        self.service()?
            .code_lens_resolve(lens, &self.token())
            .await
            .map_err(cancelled)
    }

    async fn formatting(&self, params: DocumentFormattingParams) -> Result<Option<Vec<TextEdit>>> {
        let edits = self
            .service()?
            .formatting(&params.text_document.uri, &params.options, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(edits))
    }

    async fn range_formatting(
        &self,
        params: DocumentRangeFormattingParams,
    ) -> Result<Option<Vec<TextEdit>>> {
        let edits = self
            .service()?
            .range_formatting(
                &params.text_document.uri,
                params.range,
                &params.options,
                &self.token(),
            )
            .await
            .map_err(cancelled)?;
        Ok(non_empty(edits))
    }

    async fn on_type_formatting(
        &self,
        params: DocumentOnTypeFormattingParams,
    ) -> Result<Option<Vec<TextEdit>>> {
        let position = params.text_document_position;
        let edits = self
            .service()?
            .on_type_formatting(
                &position.text_document.uri,
                position.position,
                &params.ch,
                &params.options,
                &self.token(),
            )
            .await
            .map_err(cancelled)?;
        Ok(non_empty(edits))
    }

    async fn prepare_rename(
        &self,
        params: TextDocumentPositionParams,
    ) -> Result<Option<PrepareRenameResponse>> {
        self.service()?
            .prepare_rename(&params.text_document.uri, params.position, &self.token())
            .await
            .map_err(cancelled)
    }

    async fn rename(&self, params: RenameParams) -> Result<Option<WorkspaceEdit>> {
        let position = params.text_document_position;
        self.service()?
            .rename(
                &position.text_document.uri,
                position.position,
                &params.new_name,
                &self.token(),
            )
            .await
            .map_err(cancelled)
    }

    async fn folding_range(&self, params: FoldingRangeParams) -> Result<Option<Vec<FoldingRange>>> {
        let ranges = self
            .service()?
            .folding_ranges(&params.text_document.uri, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(ranges))
    }

    async fn selection_range(
        &self,
        params: SelectionRangeParams,
    ) -> Result<Option<Vec<SelectionRange>>> {
        let ranges = self
            .service()?
            .selection_ranges(&params.text_document.uri, &params.positions, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(Some(ranges))
    }

    async fn document_color(&self, params: DocumentColorParams) -> Result<Vec<ColorInformation>> {
        self.service()?
            .document_colors(&params.text_document.uri, &self.token())
            .await
            .map_err(cancelled)
    }

    async fn color_presentation(
        &self,
        params: ColorPresentationParams,
    ) -> Result<Vec<ColorPresentation>> {
        self.service()?
            .color_presentations(
                &params.text_document.uri,
                params.color,
                params.range,
                &self.token(),
            )
            .await
            .map_err(cancelled)
    }

    async fn linked_editing_range(
        &self,
        params: LinkedEditingRangeParams,
    ) -> Result<Option<LinkedEditingRanges>> {
        let params = params.text_document_position_params;
        self.service()?
            .linked_editing_ranges(&params.text_document.uri, params.position, &self.token())
            .await
            .map_err(cancelled)
    }

    async fn inlay_hint(&self, params: InlayHintParams) -> Result<Option<Vec<InlayHint>>> {
        let hints = self
            .service()?
            .inlay_hints(&params.text_document.uri, params.range, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(hints))
    }

    async fn semantic_tokens_full(
        &self,
        params: SemanticTokensParams,
    ) -> Result<Option<SemanticTokensResult>> {
        let tokens = self
            .service()?
            .semantic_tokens_full(&params.text_document.uri, &self.token())
            .await
            .map_err(cancelled)?;

        Ok(Some(SemanticTokensResult::Tokens(SemanticTokens {
            result_id: None,
            data: tokens,
        })))
    }

    async fn semantic_tokens_range(
        &self,
        params: SemanticTokensRangeParams,
    ) -> Result<Option<SemanticTokensRangeResult>> {
        let tokens = self
            .service()?
            .semantic_tokens_range(&params.text_document.uri, params.range, &self.token())
            .await
            .map_err(cancelled)?;

        Ok(Some(SemanticTokensRangeResult::Tokens(SemanticTokens {
            result_id: None,
            data: tokens,
        })))
    }

    async fn prepare_call_hierarchy(
        &self,
        params: CallHierarchyPrepareParams,
    ) -> Result<Option<Vec<CallHierarchyItem>>> {
        let params = params.text_document_position_params;
        let items = self
            .service()?
            .prepare_call_hierarchy(&params.text_document.uri, params.position, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(items))
    }

    async fn incoming_calls(
        &self,
        params: CallHierarchyIncomingCallsParams,
    ) -> Result<Option<Vec<CallHierarchyIncomingCall>>> {
        let calls = self
            .service()?
            .incoming_calls(params.item, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(calls))
    }

    async fn outgoing_calls(
        &self,
        params: CallHierarchyOutgoingCallsParams,
    ) -> Result<Option<Vec<CallHierarchyOutgoingCall>>> {
        let calls = self
            .service()?
            .outgoing_calls(params.item, &self.token())
            .await
            .map_err(cancelled)?;
        Ok(non_empty(calls))
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> Result<Option<Value>> {
        let context = Arc::new(ClientCommandContext::new(self.client.clone()));
        self.service()?
            .execute_command(&params.command, &params.arguments, context, &self.token())
            .await
            .map_err(cancelled)
    }
}

/// Build the LSP service for a configured runtime.
pub fn create_service(config: ServiceConfig) -> (LspService<Backend>, tower_lsp::ClientSocket) {
    LspService::build(|client| Backend::new(client, config))
        .custom_method("embedls/autoInsert", Backend::auto_insert)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_can_be_created() {
        let config = ServiceConfig::new().language("component", Arc::new(ComponentLanguage::new()));
        let (_service, _socket) = create_service(config);
    }

    #[test]
    fn cancellation_maps_to_request_cancelled() {
        let error = cancelled(Cancelled);
        assert_eq!(error.code, ErrorCode::RequestCancelled);
        assert_eq!(error.message, "request cancelled");
    }

    #[test]
    fn empty_results_become_none() {
        assert_eq!(non_empty::<u8>(vec![]), None);
        assert_eq!(non_empty(vec![1]), Some(vec![1]));
    }
}

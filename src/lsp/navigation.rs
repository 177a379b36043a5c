//! Go-to, references, symbols, links, and call hierarchy.

use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{
    CallHierarchyIncomingCall, CallHierarchyItem, CallHierarchyOutgoingCall, DocumentHighlight,
    DocumentLink, DocumentSymbol, Location, LocationLink, Position, ReferenceContext,
    SymbolInformation, Url,
};

use crate::document::EmbeddedTarget;
use crate::error::Cancelled;
use crate::service::{Capability, ItemTag, LanguageService, Translator};

impl LanguageService {
    pub async fn definition(
        &self,
        uri: &Url,
        position: Position,
        token: &CancellationToken,
    ) -> Result<Vec<LocationLink>, Cancelled> {
        let targets = self.targets_at(uri, position);
        self.collect(
            Capability::Definition,
            &targets,
            token,
            |provider, target, position| provider.definition(target.document(), *position, token),
            |translator, link| translator.location_link(link),
        )
        .await
    }

    pub async fn type_definition(
        &self,
        uri: &Url,
        position: Position,
        token: &CancellationToken,
    ) -> Result<Vec<LocationLink>, Cancelled> {
        let targets = self.targets_at(uri, position);
        self.collect(
            Capability::TypeDefinition,
            &targets,
            token,
            |provider, target, position| {
                provider.type_definition(target.document(), *position, token)
            },
            |translator, link| translator.location_link(link),
        )
        .await
    }

    pub async fn implementations(
        &self,
        uri: &Url,
        position: Position,
        token: &CancellationToken,
    ) -> Result<Vec<LocationLink>, Cancelled> {
        let targets = self.targets_at(uri, position);
        self.collect(
            Capability::Implementations,
            &targets,
            token,
            |provider, target, position| {
                provider.implementations(target.document(), *position, token)
            },
            |translator, link| translator.location_link(link),
        )
        .await
    }

    pub async fn references(
        &self,
        uri: &Url,
        position: Position,
        context: &ReferenceContext,
        token: &CancellationToken,
    ) -> Result<Vec<Location>, Cancelled> {
        let targets = self.targets_at(uri, position);
        self.collect(
            Capability::References,
            &targets,
            token,
            |provider, target, position| {
                provider.references(target.document(), *position, context, token)
            },
            |translator, location| translator.location(location),
        )
        .await
    }

    pub async fn document_highlights(
        &self,
        uri: &Url,
        position: Position,
        token: &CancellationToken,
    ) -> Result<Vec<DocumentHighlight>, Cancelled> {
        let targets = self.targets_at(uri, position);
        self.collect(
            Capability::DocumentHighlights,
            &targets,
            token,
            |provider, target, position| {
                provider.document_highlights(target.document(), *position, token)
            },
            |translator, highlight| translator.highlight(highlight),
        )
        .await
    }

    /// Symbols of every document of a host, as one flat list of trees.
    pub async fn document_symbols(
        &self,
        uri: &Url,
        token: &CancellationToken,
    ) -> Result<Vec<DocumentSymbol>, Cancelled> {
        let targets = self.targets_of(uri);
        self.collect(
            Capability::DocumentSymbols,
            &targets,
            token,
            |provider, target, _| provider.document_symbols(target.document(), token),
            |translator, symbol| translator.symbol(symbol),
        )
        .await
    }

    pub async fn document_links(
        &self,
        uri: &Url,
        token: &CancellationToken,
    ) -> Result<Vec<DocumentLink>, Cancelled> {
        let targets = self.targets_of(uri);
        self.collect(
            Capability::DocumentLinks,
            &targets,
            token,
            |provider, target, _| provider.document_links(target.document(), token),
            |translator, link| translator.document_link(link),
        )
        .await
    }

    /// Workspace symbols from every provider; embedded locations move to their host.
    pub async fn workspace_symbols(
        &self,
        query: &str,
        token: &CancellationToken,
    ) -> Result<Vec<SymbolInformation>, Cancelled> {
        let outcomes = self
            .dispatcher
            .fan_out_global(
                Capability::WorkspaceSymbols,
                token,
                |_| true,
                |provider| provider.workspace_symbols(query, token),
            )
            .await?;
        Ok(outcomes
            .into_iter()
            .flat_map(|o| o.value)
            .filter_map(|mut symbol| {
                let location = &symbol.location;
                let (uri, range) = self.store.to_host_range(&location.uri, location.range, false)?;
                symbol.location = Location::new(uri, range);
                Some(symbol)
            })
            .collect())
    }

    /// Call hierarchy roots at a position, tagged with the preparing provider.
    pub async fn prepare_call_hierarchy(
        &self,
        uri: &Url,
        position: Position,
        token: &CancellationToken,
    ) -> Result<Vec<CallHierarchyItem>, Cancelled> {
        let targets = self.targets_at(uri, position);
        self.collect(
            Capability::CallHierarchyPrepare,
            &targets,
            token,
            |provider, target, position| {
                provider.prepare_call_hierarchy(target.document(), *position, token)
            },
            |translator, item| translator.call_item(item, true),
        )
        .await
    }

    pub async fn incoming_calls(
        &self,
        item: CallHierarchyItem,
        token: &CancellationToken,
    ) -> Result<Vec<CallHierarchyIncomingCall>, Cancelled> {
        let Some((tag, target, item)) = self.untag_call_item(item) else {
            return Ok(Vec::new());
        };
        let document = target.document().clone();
        let calls = self
            .dispatcher
            .invoke(Capability::IncomingCalls, &tag.provider, &document, token, |provider| {
                provider.incoming_calls(&document, item, token)
            })
            .await?
            .unwrap_or_default();
        let translator = Translator::new(&self.store, &target, self.dispatcher.find(&tag.provider));
        Ok(calls
            .into_iter()
            .filter_map(|call| translator.incoming_call(call))
            .collect())
    }

    pub async fn outgoing_calls(
        &self,
        item: CallHierarchyItem,
        token: &CancellationToken,
    ) -> Result<Vec<CallHierarchyOutgoingCall>, Cancelled> {
        let Some((tag, target, item)) = self.untag_call_item(item) else {
            return Ok(Vec::new());
        };
        let document = target.document().clone();
        let calls = self
            .dispatcher
            .invoke(Capability::OutgoingCalls, &tag.provider, &document, token, |provider| {
                provider.outgoing_calls(&document, item, token)
            })
            .await?
            .unwrap_or_default();
        let translator = Translator::new(&self.store, &target, self.dispatcher.find(&tag.provider));
        Ok(calls
            .into_iter()
            .filter_map(|call| translator.outgoing_call(call))
            .collect())
    }

    /// Restore the item a provider originally produced, in its own coordinates.
    fn untag_call_item(
        &self,
        mut item: CallHierarchyItem,
    ) -> Option<(ItemTag, EmbeddedTarget, CallHierarchyItem)> {
        let Some(tag) = ItemTag::unwrap_from(item.data.as_ref()) else {
            tracing::debug!(name = %item.name, "call hierarchy item without routing tag");
            return None;
        };
        let Some(target) = self.store.target(&tag.document) else {
            tracing::debug!(uri = %tag.document, "call hierarchy item of a closed document");
            return None;
        };
        if !target.is_host() {
            item.range = target.to_embedded_range(item.range)?;
            item.selection_range = target.to_embedded_range(item.selection_range)?;
        }
        item.uri = tag.document.clone();
        item.data = tag.data.clone();
        Some((tag, target, item))
    }
}

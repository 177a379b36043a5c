//! Hover and signature help.

use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{Hover, Position, SignatureHelp, SignatureHelpContext, Url};

use crate::error::Cancelled;
use crate::service::{Capability, LanguageService};

impl LanguageService {
    /// Hover information at a host position.
    ///
    /// Every document whose region contains the position is asked; the first
    /// provider (in registration order) with an answer wins. A hover whose
    /// range cannot be mapped back is discarded so the next provider can answer.
    pub async fn hover(
        &self,
        uri: &Url,
        position: Position,
        token: &CancellationToken,
    ) -> Result<Option<Hover>, Cancelled> {
        let targets = self.targets_at(uri, position);
        self.collect_one(
            Capability::Hover,
            &targets,
            token,
            |provider, target, position| provider.hover(target.document(), *position, token),
            |translator, hover| translator.hover(hover),
        )
        .await
    }

    /// Signature help at a host position.
    pub async fn signature_help(
        &self,
        uri: &Url,
        position: Position,
        context: Option<&SignatureHelpContext>,
        token: &CancellationToken,
    ) -> Result<Option<SignatureHelp>, Cancelled> {
        let targets = self.targets_at(uri, position);
        self.collect_one(
            Capability::SignatureHelp,
            &targets,
            token,
            |provider, target, position| {
                provider.signature_help(target.document(), *position, context, token)
            },
            |_, help| Some(help),
        )
        .await
    }
}


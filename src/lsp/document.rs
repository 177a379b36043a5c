//! Whole-document presentation features: folding, selection, colors,
//! inlay hints, and code lenses.

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{
    CodeLens, Color, ColorInformation, ColorPresentation, FoldingRange, InlayHint, Position, Range,
    SelectionRange, Url,
};

use crate::error::Cancelled;
use crate::service::{Capability, ItemTag, LanguageService, Translator};

impl LanguageService {
    pub async fn folding_ranges(
        &self,
        uri: &Url,
        token: &CancellationToken,
    ) -> Result<Vec<FoldingRange>, Cancelled> {
        let targets = self.targets_of(uri);
        self.collect(
            Capability::FoldingRanges,
            &targets,
            token,
            |provider, target, _| provider.folding_ranges(target.document(), token),
            |translator, range| translator.folding_range(range),
        )
        .await
    }

    /// One selection range per position, in request order.
    ///
    /// Positions nobody answers for get an empty range at the position.
    pub async fn selection_ranges(
        &self,
        uri: &Url,
        positions: &[Position],
        token: &CancellationToken,
    ) -> Result<Vec<SelectionRange>, Cancelled> {
        try_join_all(positions.iter().map(|&position| async move {
            let targets = self.targets_at(uri, position);
            let range = self
                .collect_one(
                    Capability::SelectionRanges,
                    &targets,
                    token,
                    |provider, target, position| {
                        provider.selection_range(target.document(), *position, token)
                    },
                    |translator, range| translator.selection_range(range),
                )
                .await?;
            Ok::<_, Cancelled>(range.unwrap_or(SelectionRange {
                range: Range::new(position, position),
                parent: None,
            }))
        }))
        .await
    }

    pub async fn document_colors(
        &self,
        uri: &Url,
        token: &CancellationToken,
    ) -> Result<Vec<ColorInformation>, Cancelled> {
        let targets = self.targets_of(uri);
        self.collect(
            Capability::DocumentColors,
            &targets,
            token,
            |provider, target, _| provider.document_colors(target.document(), token),
            |translator, color| translator.color(color),
        )
        .await
    }

    pub async fn color_presentations(
        &self,
        uri: &Url,
        color: Color,
        range: Range,
        token: &CancellationToken,
    ) -> Result<Vec<ColorPresentation>, Cancelled> {
        let targets = self.targets_in(uri, range);
        self.collect(
            Capability::ColorPresentations,
            &targets,
            token,
            |provider, target, range| {
                provider.color_presentations(target.document(), color, *range, token)
            },
            |translator, presentation| Some(translator.color_presentation(presentation)),
        )
        .await
    }

    pub async fn inlay_hints(
        &self,
        uri: &Url,
        range: Range,
        token: &CancellationToken,
    ) -> Result<Vec<InlayHint>, Cancelled> {
        let targets = self.targets_in(uri, range);
        self.collect(
            Capability::InlayHints,
            &targets,
            token,
            |provider, target, range| provider.inlay_hints(target.document(), *range, token),
            |translator, hint| translator.inlay_hint(hint),
        )
        .await
    }

    /// Code lenses, tagged so resolve reaches the producing provider.
    pub async fn code_lens(
        &self,
        uri: &Url,
        token: &CancellationToken,
    ) -> Result<Vec<CodeLens>, Cancelled> {
        let targets = self.targets_of(uri);
        self.collect(
            Capability::CodeLens,
            &targets,
            token,
            |provider, target, _| provider.code_lens(target.document(), token),
            |translator, lens| translator.code_lens(lens),
        )
        .await
    }

    pub async fn code_lens_resolve(
        &self,
        lens: CodeLens,
        token: &CancellationToken,
    ) -> Result<CodeLens, Cancelled> {
        let Some(tag) = ItemTag::unwrap_from(lens.data.as_ref()) else {
            return Ok(lens);
        };
        let Some(target) = self.store.target(&tag.document) else {
            return Ok(lens);
        };
        let Some(range) = target.to_embedded_range(lens.range) else {
            return Ok(lens);
        };

        let embedded = CodeLens {
            range,
            command: lens.command.clone(),
            data: tag.data.clone(),
        };
        let document = target.document().clone();
        let resolved = self
            .dispatcher
            .invoke(
                Capability::CodeLensResolve,
                &tag.provider,
                &document,
                token,
                |provider| provider.code_lens_resolve(&document, embedded, token),
            )
            .await?;

        let translator = Translator::new(&self.store, &target, self.dispatcher.find(&tag.provider));
        let Some(mut resolved) = resolved.and_then(|r| translator.code_lens_range(r)) else {
            return Ok(lens);
        };
        resolved.data = ItemTag::new(&tag.provider, &tag.document, resolved.data.take()).wrap();
        Ok(resolved)
    }
}

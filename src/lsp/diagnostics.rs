//! Diagnostics from every validation stage of every provider.

use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{Diagnostic, Url};

use crate::document::EmbeddedTarget;
use crate::error::Cancelled;
use crate::service::{Capability, LanguageService, Provider, ProviderResult, Translator};

/// Validation stages in reporting order.
const STAGES: [Capability; 4] = [
    Capability::ValidateSyntactic,
    Capability::ValidateSemantic,
    Capability::ValidateSuggestion,
    Capability::ValidateDeclaration,
];

impl LanguageService {
    /// Validate a host document and every document embedded in it.
    ///
    /// All stages of all providers run concurrently. Results are ordered by
    /// provider, then document, then stage, and translated to the host;
    /// diagnostics outside any mapped range are dropped.
    pub async fn diagnostics(
        &self,
        uri: &Url,
        token: &CancellationToken,
    ) -> Result<Vec<Diagnostic>, Cancelled> {
        let targets = self.targets_of(uri);
        let (syntactic, semantic, suggestion, declaration) = tokio::try_join!(
            self.stage(0, &targets, token),
            self.stage(1, &targets, token),
            self.stage(2, &targets, token),
            self.stage(3, &targets, token),
        )?;

        let mut reports: Vec<_> = syntactic
            .into_iter()
            .chain(semantic)
            .chain(suggestion)
            .chain(declaration)
            .collect();
        reports.sort_by_key(|(provider, target, stage, _)| (*provider, *target, *stage));

        let mut diagnostics = Vec::new();
        for (provider, target, _, batch) in reports {
            let registration = self.dispatcher.registration(provider);
            let translator = Translator::new(&self.store, &targets[target].0, Some(registration));
            diagnostics.extend(batch.into_iter().filter_map(|d| translator.diagnostic(d)));
        }
        tracing::debug!(uri = %uri, count = diagnostics.len(), "validated");
        Ok(diagnostics)
    }

    async fn stage(
        &self,
        stage: usize,
        targets: &[(EmbeddedTarget, ())],
        token: &CancellationToken,
    ) -> Result<Vec<(usize, usize, usize, Vec<Diagnostic>)>, Cancelled> {
        let capability = STAGES[stage];
        let outcomes = self
            .dispatcher
            .fan_out(capability, targets, token, |provider, target, _| {
                validate(provider, capability, target, token)
            })
            .await?;
        Ok(outcomes
            .into_iter()
            .map(|o| (o.provider, o.target, stage, o.value))
            .collect())
    }
}

fn validate(
    provider: &dyn Provider,
    capability: Capability,
    target: &EmbeddedTarget,
    token: &CancellationToken,
) -> ProviderResult<Vec<Diagnostic>> {
    let document = target.document();
    match capability {
        Capability::ValidateSyntactic => provider.validate_syntactic(document, token),
        Capability::ValidateSemantic => provider.validate_semantic(document, token),
        Capability::ValidateSuggestion => provider.validate_suggestion(document, token),
        _ => provider.validate_declaration(document, token),
    }
}

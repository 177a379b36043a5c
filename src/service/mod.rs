//! The transport-agnostic language service.
//!
//! [`LanguageService`] owns the document registry, the registered providers,
//! and the rule engine. Capability methods (in [`crate::lsp`]) take host
//! coordinates, fan out to providers over every embedded document involved,
//! translate the answers back, and merge them.

mod capability;
mod command;
mod dispatch;
mod provider;
mod translate;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{Position, Range, Url};

use crate::config::{ConfigurationHost, SettingsConfiguration};
use crate::document::{
    all_targets, embedded_targets, DocumentNode, DocumentStore, EmbeddedTarget, LanguageModule,
};
use crate::error::{Cancelled, ConfigError, EntryKind};
use crate::rules::{Rule, RuleEngine, RuleEnvironment, RuleLevel};
use crate::settings::Settings;

pub use capability::{Capability, CapabilitySet, Contribution, MergePolicy};
pub use command::{CommandContext, NoopCommandContext};
pub use dispatch::{Dispatcher, Registration};
pub use provider::{DocumentSelector, Provider, ProviderResult, Reply};

pub(crate) use command::HostCommandContext;
pub(crate) use dispatch::ItemTag;
pub(crate) use translate::Translator;

/// What plugin factories get to build their provider from.
#[derive(Clone)]
pub struct ServiceEnv {
    pub root_uri: Option<Url>,
    pub locale: Option<String>,
    pub configuration: Arc<dyn ConfigurationHost>,
}

type ProviderFactory = Box<dyn FnOnce(&ServiceEnv) -> Arc<dyn Provider> + Send>;

enum PluginSource {
    Instance(Arc<dyn Provider>),
    Factory(ProviderFactory),
}

struct PluginEntry {
    id: String,
    source: PluginSource,
    selector: DocumentSelector,
}

/// Aggregate configuration of a [`LanguageService`].
///
/// Language modules, plugins, and rules are keyed by string id. Plugins are
/// invited in the order they are added; the rule engine always comes first.
#[derive(Default)]
pub struct ServiceConfig {
    languages: Vec<(String, Arc<dyn LanguageModule>)>,
    plugins: Vec<PluginEntry>,
    rules: Vec<(String, Arc<dyn Rule>)>,
    disabled: BTreeSet<String>,
    levels: BTreeMap<String, RuleLevel>,
    environment: RuleEnvironment,
    configuration: Value,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let languages: Vec<&str> = self.languages.iter().map(|(id, _)| id.as_str()).collect();
        let plugins: Vec<&str> = self.plugins.iter().map(|p| p.id.as_str()).collect();
        let rules: Vec<&str> = self.rules.iter().map(|(id, _)| id.as_str()).collect();
        f.debug_struct("ServiceConfig")
            .field("languages", &languages)
            .field("plugins", &plugins)
            .field("rules", &rules)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn language(mut self, id: impl Into<String>, module: Arc<dyn LanguageModule>) -> Self {
        self.languages.push((id.into(), module));
        self
    }

    #[must_use]
    pub fn plugin(
        mut self,
        id: impl Into<String>,
        provider: Arc<dyn Provider>,
        selector: DocumentSelector,
    ) -> Self {
        self.plugins.push(PluginEntry {
            id: id.into(),
            source: PluginSource::Instance(provider),
            selector,
        });
        self
    }

    /// Add a plugin built when the service is built.
    #[must_use]
    pub fn plugin_factory<F>(
        mut self,
        id: impl Into<String>,
        selector: DocumentSelector,
        factory: F,
    ) -> Self
    where
        F: FnOnce(&ServiceEnv) -> Arc<dyn Provider> + Send + 'static,
    {
        self.plugins.push(PluginEntry {
            id: id.into(),
            source: PluginSource::Factory(Box::new(factory)),
            selector,
        });
        self
    }

    #[must_use]
    pub fn rule(mut self, id: impl Into<String>, rule: Arc<dyn Rule>) -> Self {
        self.rules.push((id.into(), rule));
        self
    }

    #[must_use]
    pub fn root_uri(mut self, root_uri: Url) -> Self {
        self.environment.root_uri = Some(root_uri);
        self
    }

    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.environment.locale = Some(locale.into());
        self
    }

    /// Seed value of the configuration bridge.
    #[must_use]
    pub fn configuration(mut self, value: Value) -> Self {
        self.configuration = value;
        self
    }

    /// Apply an `embedls.toml`: disabled plugins, rule levels, locale, configuration.
    #[must_use]
    pub fn apply_settings(mut self, settings: &Settings) -> Self {
        self.disabled.extend(
            settings
                .plugins
                .iter()
                .filter(|(_, enabled)| !**enabled)
                .map(|(id, _)| id.clone()),
        );
        self.levels
            .extend(settings.rules.iter().map(|(id, level)| (id.clone(), *level)));
        if let Some(locale) = &settings.server.locale {
            self.environment.locale = Some(locale.clone());
        }
        if !settings.configuration.is_empty() {
            self.configuration = settings.configuration_json();
        }
        self
    }

    /// Validate ids and assemble the service.
    pub fn build(self) -> Result<LanguageService, ConfigError> {
        check_unique(EntryKind::Language, self.languages.iter().map(|(id, _)| id))?;
        check_unique(EntryKind::Plugin, self.plugins.iter().map(|p| &p.id))?;
        check_unique(EntryKind::Rule, self.rules.iter().map(|(id, _)| id))?;
        if let Some(plugin) = self.plugins.iter().find(|p| p.id == RuleEngine::PROVIDER_ID) {
            return Err(ConfigError::ReservedId {
                id: plugin.id.clone(),
            });
        }

        let configuration = Arc::new(SettingsConfiguration::new(self.configuration));
        let env = ServiceEnv {
            root_uri: self.environment.root_uri.clone(),
            locale: self.environment.locale.clone(),
            configuration: configuration.clone(),
        };

        let rules = RuleEngine::new(
            self.rules,
            self.levels,
            self.environment,
            configuration.clone(),
        );
        let mut registrations = Vec::new();
        if !rules.is_empty() {
            registrations.push(Registration::new(
                RuleEngine::PROVIDER_ID.to_string(),
                Arc::new(rules.clone()),
                DocumentSelector::Any,
            ));
        }
        for plugin in self.plugins {
            if self.disabled.contains(&plugin.id) {
                tracing::info!(plugin = %plugin.id, "plugin disabled by settings");
                continue;
            }
            let provider = match plugin.source {
                PluginSource::Instance(provider) => provider,
                PluginSource::Factory(factory) => factory(&env),
            };
            registrations.push(Registration::new(plugin.id, provider, plugin.selector));
        }

        let languages = self.languages.into_iter().map(|(_, m)| m).collect();
        let service = LanguageService {
            store: Arc::new(DocumentStore::new(languages)),
            dispatcher: Dispatcher::new(registrations),
            rules,
            configuration,
        };
        tracing::info!(
            providers = service.dispatcher.registrations().len(),
            "language service ready"
        );
        Ok(service)
    }
}

fn check_unique<'a>(
    kind: EntryKind,
    ids: impl Iterator<Item = &'a String>,
) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ConfigError::Duplicate {
                kind,
                id: id.clone(),
            });
        }
    }
    Ok(())
}

/// Runtime core: documents, providers, and rules.
pub struct LanguageService {
    pub(crate) store: Arc<DocumentStore>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) rules: RuleEngine,
    pub(crate) configuration: Arc<SettingsConfiguration>,
}

impl std::fmt::Debug for LanguageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageService")
            .field("store", &self.store)
            .field("dispatcher", &self.dispatcher)
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl LanguageService {
    /// Open or update a host document, rebuilding its mapping table.
    pub fn open_document(
        &self,
        uri: Url,
        language_id: &str,
        version: i32,
        text: String,
    ) -> Arc<DocumentNode> {
        self.store.open(uri, language_id, version, text)
    }

    pub fn close_document(&self, uri: &Url) {
        self.store.close(uri);
    }

    pub fn document(&self, uri: &Url) -> Option<Arc<DocumentNode>> {
        self.store.get(uri)
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn configuration(&self) -> Arc<dyn ConfigurationHost> {
        self.configuration.clone()
    }

    /// Replace the configuration bridge's value and notify subscribers.
    pub fn update_configuration(&self, value: Value) {
        self.configuration.replace(value);
    }

    /// Union of registered provider capabilities.
    pub fn capabilities(&self) -> CapabilitySet {
        self.dispatcher.capabilities()
    }

    /// Every completion trigger character, deduplicated and sorted.
    pub fn completion_triggers(&self) -> Vec<String> {
        self.dispatcher
            .registrations()
            .iter()
            .filter(|r| r.implements(Capability::Completion))
            .flat_map(|r| r.provider().completion_triggers())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every command some provider executes.
    pub fn commands(&self) -> Vec<String> {
        self.dispatcher
            .registrations()
            .iter()
            .filter(|r| r.implements(Capability::ExecuteCommand))
            .flat_map(|r| r.provider().commands())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Targets containing `position`, with the position translated into each.
    pub(crate) fn targets_at(
        &self,
        uri: &Url,
        position: Position,
    ) -> Vec<(EmbeddedTarget, Position)> {
        self.targets_in(uri, Range::new(position, position))
            .into_iter()
            .map(|(target, range)| (target, range.start))
            .collect()
    }

    /// Targets a range touches, with the range clipped and translated into each.
    pub(crate) fn targets_in(&self, uri: &Url, range: Range) -> Vec<(EmbeddedTarget, Range)> {
        match self.store.get(uri) {
            Some(root) => embedded_targets(&root, range),
            None => {
                tracing::debug!(uri = %uri, "request for unknown document");
                Vec::new()
            }
        }
    }

    /// Every document of a host, for whole-document requests.
    pub(crate) fn targets_of(&self, uri: &Url) -> Vec<(EmbeddedTarget, ())> {
        self.store
            .get(uri)
            .map(|root| all_targets(&root).into_iter().map(|t| (t, ())).collect())
            .unwrap_or_default()
    }

    /// Fan out a list-valued capability, translate every item, and merge.
    pub(crate) async fn collect<A, T, U, F, M>(
        &self,
        capability: Capability,
        targets: &[(EmbeddedTarget, A)],
        token: &CancellationToken,
        call: F,
        map: M,
    ) -> Result<Vec<U>, Cancelled>
    where
        T: Send + 'static,
        F: Fn(&dyn Provider, &EmbeddedTarget, &A) -> ProviderResult<Vec<T>>,
        M: Fn(&Translator<'_>, T) -> Option<U>,
    {
        let outcomes = self
            .dispatcher
            .fan_out(capability, targets, token, call)
            .await?;
        let contributions = outcomes
            .into_iter()
            .map(|outcome| {
                let target = &targets[outcome.target].0;
                let registration = self.dispatcher.registration(outcome.provider);
                let translator = Translator::new(&self.store, target, Some(registration));
                Contribution {
                    provider: registration.id().to_string(),
                    document: target.uri().clone(),
                    value: outcome
                        .value
                        .into_iter()
                        .filter_map(|item| map(&translator, item))
                        .collect(),
                }
            })
            .collect();
        Ok(capability.merge_policy().merge(contributions))
    }

    /// Fan out a single-valued capability, translate, and merge.
    pub(crate) async fn collect_one<A, T, U, F, M>(
        &self,
        capability: Capability,
        targets: &[(EmbeddedTarget, A)],
        token: &CancellationToken,
        call: F,
        map: M,
    ) -> Result<Option<U>, Cancelled>
    where
        T: Send + 'static,
        F: Fn(&dyn Provider, &EmbeddedTarget, &A) -> ProviderResult<T>,
        M: Fn(&Translator<'_>, T) -> Option<U>,
    {
        let merged = self
            .collect(
                capability,
                targets,
                token,
                |provider, target, arg| {
                    call(provider, target, arg).map(|reply| reply.map(|value| vec![value]))
                },
                map,
            )
            .await?;
        Ok(merged.into_iter().next())
    }
}

//! Provider fan-out and fan-in.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::Url;

use crate::document::{EmbeddedTarget, TextDocument};
use crate::error::{Cancelled, ProviderError};

use super::capability::{Capability, CapabilitySet, Contribution};
use super::provider::{DocumentSelector, Provider, ProviderResult};

/// A provider as registered with the service.
pub struct Registration {
    pub(crate) id: String,
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) selector: DocumentSelector,
    pub(crate) capabilities: CapabilitySet,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("selector", &self.selector)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Registration {
    pub(crate) fn new(id: String, provider: Arc<dyn Provider>, selector: DocumentSelector) -> Self {
        let capabilities = provider.capabilities();
        Self {
            id,
            provider,
            selector,
            capabilities,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn implements(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

/// A settled, non-absent provider result.
#[derive(Debug)]
pub(crate) struct Outcome<T> {
    /// Index into the dispatcher's registrations.
    pub provider: usize,
    /// Index into the targets the call fanned out over.
    pub target: usize,
    pub value: T,
}

struct Call<T> {
    provider: usize,
    target: usize,
    document: Option<Url>,
    reply: ProviderResult<T>,
}

/// Invites providers, in registration order, and collects what they answer.
#[derive(Debug, Default)]
pub struct Dispatcher {
    registrations: Vec<Registration>,
}

impl Dispatcher {
    pub(crate) fn new(registrations: Vec<Registration>) -> Self {
        Self { registrations }
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    pub(crate) fn registration(&self, index: usize) -> &Registration {
        &self.registrations[index]
    }

    pub fn find(&self, id: &str) -> Option<&Registration> {
        self.registrations.iter().find(|r| r.id == id)
    }

    /// Union of every registered provider's capabilities.
    pub fn capabilities(&self) -> CapabilitySet {
        let mut all = CapabilitySet::new();
        for registration in &self.registrations {
            all.extend(&registration.capabilities);
        }
        all
    }

    /// Invoke every provider implementing `capability` on every target it selects.
    ///
    /// Calls are made provider-major, target-minor, and all replies are awaited
    /// concurrently. Failing providers are logged and contribute nothing.
    pub(crate) async fn fan_out<A, T, F>(
        &self,
        capability: Capability,
        targets: &[(EmbeddedTarget, A)],
        token: &CancellationToken,
        call: F,
    ) -> Result<Vec<Outcome<T>>, Cancelled>
    where
        T: Send + 'static,
        F: Fn(&dyn Provider, &EmbeddedTarget, &A) -> ProviderResult<T>,
    {
        self.fan_out_filtered(capability, targets, token, |_| true, call)
            .await
    }

    /// Like [`Self::fan_out`], inviting only registrations accepted by `filter`.
    pub(crate) async fn fan_out_filtered<A, T, P, F>(
        &self,
        capability: Capability,
        targets: &[(EmbeddedTarget, A)],
        token: &CancellationToken,
        filter: P,
        call: F,
    ) -> Result<Vec<Outcome<T>>, Cancelled>
    where
        T: Send + 'static,
        P: Fn(&Registration) -> bool,
        F: Fn(&dyn Provider, &EmbeddedTarget, &A) -> ProviderResult<T>,
    {
        if token.is_cancelled() {
            return Err(Cancelled);
        }
        let mut calls = Vec::new();
        for (p, registration) in self.registrations.iter().enumerate() {
            if !registration.implements(capability) || !filter(registration) {
                continue;
            }
            for (t, (target, arg)) in targets.iter().enumerate() {
                if !registration.selector.matches(target.document()) {
                    continue;
                }
                calls.push(Call {
                    provider: p,
                    target: t,
                    document: Some(target.uri().clone()),
                    reply: guarded(|| call(registration.provider.as_ref(), target, arg)),
                });
            }
        }
        self.settle(capability, calls, token).await
    }

    /// Invoke every provider implementing a capability not tied to a document.
    pub(crate) async fn fan_out_global<T, P, F>(
        &self,
        capability: Capability,
        token: &CancellationToken,
        filter: P,
        call: F,
    ) -> Result<Vec<Outcome<T>>, Cancelled>
    where
        T: Send + 'static,
        P: Fn(&Registration) -> bool,
        F: Fn(&dyn Provider) -> ProviderResult<T>,
    {
        if token.is_cancelled() {
            return Err(Cancelled);
        }
        let calls = self
            .registrations
            .iter()
            .enumerate()
            .filter(|(_, r)| r.implements(capability) && filter(r))
            .map(|(p, registration)| Call {
                provider: p,
                target: 0,
                document: None,
                reply: guarded(|| call(registration.provider.as_ref())),
            })
            .collect();
        self.settle(capability, calls, token).await
    }

    /// Invoke one named provider; used to route resolve requests.
    ///
    /// Returns `Ok(None)` if the provider is unknown, does not implement the
    /// capability, fails, or has no opinion.
    pub(crate) async fn invoke<T, F>(
        &self,
        capability: Capability,
        provider: &str,
        document: &Arc<TextDocument>,
        token: &CancellationToken,
        call: F,
    ) -> Result<Option<T>, Cancelled>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Provider) -> ProviderResult<T>,
    {
        if token.is_cancelled() {
            return Err(Cancelled);
        }
        let Some((p, registration)) = self
            .registrations
            .iter()
            .enumerate()
            .find(|(_, r)| r.id == provider && r.implements(capability))
        else {
            tracing::debug!(provider, capability = %capability, "no provider to route to");
            return Ok(None);
        };
        let call = Call {
            provider: p,
            target: 0,
            document: Some(document.uri().clone()),
            reply: guarded(|| call(registration.provider.as_ref())),
        };
        let mut outcomes = self.settle(capability, vec![call], token).await?;
        Ok(outcomes.pop().map(|o| o.value))
    }

    async fn settle<T: Send + 'static>(
        &self,
        capability: Capability,
        calls: Vec<Call<T>>,
        token: &CancellationToken,
    ) -> Result<Vec<Outcome<T>>, Cancelled> {
        let pending = calls.into_iter().map(|call| async move {
            let result = match call.reply {
                Ok(reply) => AssertUnwindSafe(reply.settle())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(ProviderError::from_panic(payload))),
                Err(error) => Err(error),
            };
            (call.provider, call.target, call.document, result)
        });

        let settled = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(capability = %capability, "request cancelled");
                return Err(Cancelled);
            }
            settled = join_all(pending) => settled,
        };

        let mut outcomes = Vec::new();
        for (provider, target, document, result) in settled {
            match result {
                Ok(Some(value)) => outcomes.push(Outcome {
                    provider,
                    target,
                    value,
                }),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        provider = %self.registrations[provider].id,
                        capability = %capability,
                        uri = document.as_ref().map(Url::as_str).unwrap_or_default(),
                        %error,
                        "provider failed"
                    );
                }
            }
        }
        Ok(outcomes)
    }

    /// Label outcomes with provider ids and documents for merging.
    pub(crate) fn contributions<A, T>(
        &self,
        targets: &[(EmbeddedTarget, A)],
        outcomes: Vec<Outcome<T>>,
    ) -> Vec<Contribution<T>> {
        outcomes
            .into_iter()
            .map(|o| Contribution {
                provider: self.registrations[o.provider].id.clone(),
                document: targets[o.target].0.uri().clone(),
                value: o.value,
            })
            .collect()
    }
}

fn guarded<T>(call: impl FnOnce() -> ProviderResult<T>) -> ProviderResult<T> {
    panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(ProviderError::from_panic(payload)))
}

const TAG: &str = "embedls";

/// Routing information stored in the `data` of items that can be resolved later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ItemTag {
    pub provider: String,
    pub document: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ItemTag {
    pub fn new(provider: &str, document: &Url, data: Option<Value>) -> Self {
        Self {
            provider: provider.to_string(),
            document: document.clone(),
            data,
        }
    }

    /// Wrap into an item's `data` field.
    pub fn wrap(self) -> Option<Value> {
        let tag = serde_json::to_value(self).ok()?;
        Some(Value::Object([(TAG.to_string(), tag)].into_iter().collect()))
    }

    /// Recover a tag from an item's `data` field.
    pub fn unwrap_from(data: Option<&Value>) -> Option<Self> {
        let tag = data?.get(TAG)?;
        serde_json::from_value(tag.clone()).ok()
    }
}

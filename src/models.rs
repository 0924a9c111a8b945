//! Text and image model catalog
//!
//! Text models are fetched from the provider, filtered by the configured
//! price ceilings and cached for a few minutes. When the provider cannot be
//! reached a built-in fallback list is served (and cached) instead, so the
//! chat endpoint keeps working with a known set of models.

use crate::config::ModelPolicy;
use crate::types::{BlockedModel, ModelCapabilities};
use crate::upstream::{UpstreamModel, VeniceClient};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

const BLOCKED_REASON: &str = "Exceeds price threshold";

/// Result of a text model lookup
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TextModels {
    /// Models that pass the pricing filter, default model first when it was missing
    pub allowed_models: Vec<String>,
    /// Capabilities keyed by model id
    pub model_capabilities: BTreeMap<String, ModelCapabilities>,
    /// Models rejected by the pricing filter
    pub blocked_models: Vec<BlockedModel>,
}

impl TextModels {
    /// Returns true when `model` may be used for chat
    pub fn is_allowed(&self, model: &str) -> bool {
        self.allowed_models.iter().any(|m| m == model)
    }

    /// Capabilities for `model`, all false when unknown
    pub fn capabilities(&self, model: &str) -> ModelCapabilities {
        self.model_capabilities
            .get(model)
            .copied()
            .unwrap_or_default()
    }
}

/// Capabilities assumed for models in the fallback list
fn fallback_capabilities(model: &str, default_model: &str) -> ModelCapabilities {
    let reasoning =
        model == default_model || matches!(model, "deepseek-r1-distill-llama-70b");
    ModelCapabilities {
        supports_web_search: true,
        supports_function_calling: true,
        supports_vision: false,
        supports_reasoning: reasoning,
    }
}

/// Cached view of the provider's model catalog
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    client: VeniceClient,
    policy: ModelPolicy,
    ttl: Duration,
    text_cache: Arc<RwLock<Option<(TextModels, Instant)>>>,
}

impl ModelCatalog {
    /// Create a catalog backed by `client`
    ///
    /// # Arguments
    ///
    /// * `client` - Upstream API client
    /// * `policy` - Default model, price ceilings and image allow-list
    /// * `ttl` - How long a fetched text model list stays fresh
    pub fn new(client: VeniceClient, policy: ModelPolicy, ttl: Duration) -> Self {
        Self {
            client,
            policy,
            ttl,
            text_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Model policy this catalog applies
    pub fn policy(&self) -> &ModelPolicy {
        &self.policy
    }

    fn is_cache_valid(&self, cached_at: Instant) -> bool {
        cached_at.elapsed() < self.ttl
    }

    /// Drop the cached text model list
    pub fn invalidate_cache(&self) {
        if let Ok(mut cache) = self.text_cache.write() {
            *cache = None;
            tracing::debug!("Model cache invalidated");
        }
    }

    /// Allowed text models, their capabilities and the price-blocked list
    ///
    /// Never fails: any provider error yields the fallback catalog.
    pub async fn text_models(&self) -> TextModels {
        if let Ok(cache) = self.text_cache.read() {
            if let Some((models, cached_at)) = cache.as_ref() {
                if self.is_cache_valid(*cached_at) {
                    tracing::debug!("Using cached model list");
                    return models.clone();
                }
            }
        }

        let models = match self.client.list_models("text").await {
            Ok(listing) => self.filter_text_models(listing),
            Err(e) => {
                tracing::warn!("Failed to fetch text models, using fallback list: {}", e);
                self.fallback_text_models()
            }
        };

        if let Ok(mut cache) = self.text_cache.write() {
            *cache = Some((models.clone(), Instant::now()));
        }

        models
    }

    /// Apply the pricing policy to a provider listing
    pub fn filter_text_models(&self, listing: Vec<UpstreamModel>) -> TextModels {
        let mut result = TextModels::default();

        for model in listing.into_iter().filter(|m| m.model_type == "text") {
            let spec = model.model_spec.unwrap_or_default();
            result
                .model_capabilities
                .insert(model.id.clone(), spec.capabilities.unwrap_or_default());

            if model.id == self.policy.default_model {
                if !result.is_allowed(&model.id) {
                    result.allowed_models.push(model.id);
                }
                continue;
            }

            let Some(pricing) = spec.pricing else {
                result.allowed_models.push(model.id);
                continue;
            };

            let input_price = pricing.input.and_then(|p| p.usd).unwrap_or(0.0);
            let output_price = pricing.output.and_then(|p| p.usd).unwrap_or(0.0);

            if input_price <= self.policy.max_input_price
                && output_price <= self.policy.max_output_price
            {
                result.allowed_models.push(model.id);
            } else {
                tracing::debug!(
                    "Blocking model {}: input={} output={}",
                    model.id,
                    input_price,
                    output_price
                );
                result.blocked_models.push(BlockedModel {
                    name: spec.name.unwrap_or_else(|| model.id.clone()),
                    id: model.id,
                    input_price,
                    output_price,
                    reason: BLOCKED_REASON.to_string(),
                });
            }
        }

        self.ensure_default_model(&mut result);
        result
    }

    /// Catalog served when the provider is unreachable
    pub fn fallback_text_models(&self) -> TextModels {
        let default_model = &self.policy.default_model;
        let mut result = TextModels::default();

        for model in std::iter::once(default_model).chain(self.policy.fallback_models.iter()) {
            if result.is_allowed(model) {
                continue;
            }
            result.allowed_models.push(model.clone());
            result
                .model_capabilities
                .insert(model.clone(), fallback_capabilities(model, default_model));
        }

        result
    }

    fn ensure_default_model(&self, result: &mut TextModels) {
        let default_model = &self.policy.default_model;
        if !result.is_allowed(default_model) {
            result.allowed_models.insert(0, default_model.clone());
        }
        result
            .model_capabilities
            .entry(default_model.clone())
            .or_insert_with(|| fallback_capabilities(default_model, default_model));
    }

    /// Image and upscale models currently offered by the provider
    ///
    /// Both listings are fetched concurrently and intersected with the
    /// configured allow-list. The allow-list itself is returned when either
    /// request fails or nothing matches.
    pub async fn image_models(&self) -> Vec<String> {
        let (images, upscalers) = futures::join!(
            self.client.list_models("image"),
            self.client.list_models("upscale")
        );

        let listing = match (images, upscalers) {
            (Ok(mut images), Ok(upscalers)) => {
                images.extend(upscalers);
                images
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Failed to fetch image models, using allow-list: {}", e);
                return self.policy.image_models.clone();
            }
        };

        let mut models: Vec<String> = Vec::new();
        for model in listing {
            let kind_ok = matches!(model.model_type.as_str(), "image" | "upscale");
            if kind_ok && self.policy.image_models.contains(&model.id) && !models.contains(&model.id)
            {
                models.push(model.id);
            }
        }

        if models.is_empty() {
            self.policy.image_models.clone()
        } else {
            models
        }
    }
}

use crate::models::{AnalysisRequest, AnalyzeResponse, CanonicalListing, DraftListing, StageReport};
use crate::normalize;
use crate::prompt::{self, PromptConfig};
use crate::providers::{Provider, ProviderError, ProviderRegistry};
use crate::shipping;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde_json::{Value, json};
use std::{env, future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::warn;

/// Per-request entry point: prompt → providers in priority order → normalize
/// → classify. Holds no state across requests beyond the provider registry.
#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<ProviderRegistry>,
    price_markup_percent: Option<f64>,
}

impl Pipeline {
    pub fn from_env() -> Self {
        Self::new(ProviderRegistry::from_env())
    }

    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            price_markup_percent: price_markup_from_env(),
        }
    }

    #[cfg(test)]
    fn with_price_markup(mut self, percent: Option<f64>) -> Self {
        self.price_markup_percent = percent;
        self
    }

    pub async fn run(&self, request: AnalysisRequest) -> Result<AnalyzeResponse, PipelineError> {
        let mut stages = Vec::new();

        self.capture_stage("validate_input", &mut stages, async {
            stages::validate_input(&request)
        })
        .await?;

        if self.registry.configured_count() == 0 {
            return Err(PipelineError::config("providers", "no provider configured"));
        }
        if self.registry.available().is_empty() {
            return Err(PipelineError::config(
                "providers",
                "no configured provider has a usable credential",
            ));
        }

        let instruction = self
            .capture_stage("build_prompt", &mut stages, async {
                stages::build_prompt(&request)
            })
            .await?;

        let (provider_used, mut draft) = self
            .capture_stage("analyze", &mut stages, {
                let providers = self.registry.clone();
                let request = &request;
                let instruction = instruction.as_str();
                async move {
                    stages::analyze(providers.available(), request, instruction).await
                }
            })
            .await?;

        if let Some(percent) = self.price_markup_percent {
            draft = self
                .capture_stage("adjust_price", &mut stages, async {
                    Ok(stages::adjust_price(draft, percent))
                })
                .await?;
        }

        let packaging = self
            .capture_stage("classify_packaging", &mut stages, async {
                stages::classify_packaging(&draft)
            })
            .await?;

        let listing = CanonicalListing::from_draft(draft, packaging, provider_used);
        Ok(AnalyzeResponse { listing, stages })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

fn price_markup_from_env() -> Option<f64> {
    env::var("PRICE_MARKUP_PERCENT")
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
}

fn max_images_allowed() -> usize {
    env::var("MAX_IMAGES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value >= 1)
        .unwrap_or(6)
}

fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Config,
    AllProvidersFailed,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn config(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Config,
        }
    }

    pub fn providers_failed(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::AllProvidersFailed,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

pub mod stages {
    use super::*;

    pub fn validate_input(
        request: &AnalysisRequest,
    ) -> Result<StageOutcome<()>, PipelineError> {
        if request.images.is_empty() {
            return Err(PipelineError::invalid_input(
                "validate_input",
                "no images provided",
            ));
        }
        let max_images = max_images_allowed();
        if request.images.len() > max_images {
            return Err(PipelineError::invalid_input(
                "validate_input",
                "too_many_images",
            ));
        }
        for (idx, image) in request.images.iter().enumerate() {
            if !image.mime_type.starts_with("image/") {
                return Err(PipelineError::invalid_input(
                    "validate_input",
                    format!("image {idx} has unsupported media type `{}`", image.mime_type),
                ));
            }
            if BASE64.decode(image.data.as_bytes()).is_err() {
                return Err(PipelineError::invalid_input(
                    "validate_input",
                    format!("image {idx} is not valid base64"),
                ));
            }
        }
        Ok(StageOutcome::new(
            (),
            json!({
                "count": request.images.len(),
                "mime_types": request
                    .images
                    .iter()
                    .map(|image| image.mime_type.as_str())
                    .collect::<Vec<_>>(),
            }),
        ))
    }

    pub fn build_prompt(
        request: &AnalysisRequest,
    ) -> Result<StageOutcome<String>, PipelineError> {
        let config = PromptConfig::from_request(request);
        let instruction = prompt::build_instruction(&config);
        let chars = instruction.chars().count();
        Ok(StageOutcome::new(
            instruction,
            json!({
                "chars": chars,
                "region": config.region,
                "spicy_mode": config.spicy_mode,
                "premium": config.premium,
            }),
        ))
    }

    /// Walk providers in declared order. First success terminates; a JSON
    /// parse failure after a successful call counts as that provider's
    /// failure rather than aborting the walk.
    pub async fn analyze(
        providers: &[Provider],
        request: &AnalysisRequest,
        instruction: &str,
    ) -> Result<StageOutcome<(String, DraftListing)>, PipelineError> {
        let mut failures: Vec<(String, ProviderError)> = Vec::new();

        for provider in providers {
            let id = provider.id().to_string();
            match provider.analyze(&request.images, instruction).await {
                Ok(raw) => match normalize::normalize_listing(&raw, request.is_spicy_mode) {
                    Ok(draft) => {
                        crate::metrics::provider_attempt(&id, "success");
                        let output = json!({
                            "provider_used": id,
                            "attempts": attempt_summaries(&failures),
                            "raw_chars": raw.chars().count(),
                            "title": draft.title,
                        });
                        return Ok(StageOutcome::new((id, draft), output));
                    }
                    Err(err) => {
                        crate::metrics::provider_attempt(&id, "malformed");
                        warn!(
                            target = "snaplist.pipeline",
                            provider = %id,
                            error = %err,
                            "provider response failed to parse"
                        );
                        failures.push((id, ProviderError::malformed_body(err.to_string())));
                    }
                },
                Err(err) => {
                    crate::metrics::provider_attempt(&id, "error");
                    warn!(
                        target = "snaplist.pipeline",
                        provider = %id,
                        error = %err,
                        "provider attempt failed"
                    );
                    failures.push((id, err));
                }
            }
        }

        let summary = failures
            .iter()
            .map(|(id, err)| format!("{id}: {err}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(PipelineError::providers_failed(
            "analyze",
            format!("all providers failed: {summary}"),
        ))
    }

    pub fn adjust_price(mut draft: DraftListing, percent: f64) -> StageOutcome<DraftListing> {
        let factor = 1.0 + percent / 100.0;
        let before = (draft.price_low, draft.price_high);
        draft.price_low = round_two(draft.price_low * factor);
        draft.price_high = round_two(draft.price_high * factor);
        let output = json!({
            "percent": percent,
            "before": { "priceLow": before.0, "priceHigh": before.1 },
            "after": { "priceLow": draft.price_low, "priceHigh": draft.price_high },
        });
        StageOutcome::new(draft, output)
    }

    pub fn classify_packaging(
        draft: &DraftListing,
    ) -> Result<StageOutcome<shipping::PackagingRecommendation>, PipelineError> {
        let recommendation =
            shipping::recommend_packaging(&draft.dimensions, &draft.weight, draft.fragility);
        let output = json!({
            "tier": recommendation.tier.label(),
            "price": recommendation.price,
            "reason": recommendation.reason,
            "fragility": draft.fragility,
        });
        Ok(StageOutcome::new(recommendation, output))
    }

    fn attempt_summaries(failures: &[(String, ProviderError)]) -> Vec<Value> {
        failures
            .iter()
            .map(|(id, err)| {
                json!({
                    "provider": id,
                    "kind": err.kind.to_string(),
                    "detail": err.detail,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImagePayload;
    use crate::providers::{ProviderError, ScriptedProvider};
    use crate::shipping::PackagingTier;

    fn sample_request() -> AnalysisRequest {
        AnalysisRequest {
            images: vec![ImagePayload {
                data: BASE64.encode(b"fake image bytes"),
                mime_type: "image/jpeg".to_string(),
            }],
            extra_info: None,
            is_spicy_mode: true,
            region: "UK".to_string(),
            is_premium: false,
        }
    }

    const FULL_RESPONSE: &str = r#"{
        "title": "Vintage ceramic teapot",
        "description": "A well-kept teapot with floral glaze.",
        "condition": "Good condition",
        "category": "Kitchenware",
        "rarity": "Uncommon",
        "spicyComment": "Your nan would approve.",
        "priceLow": 12,
        "priceHigh": 25,
        "dimensions": { "length": 30, "width": 20, "height": 20, "confidence": 70 },
        "weight": { "grams": 1500, "confidence": 60 },
        "material": "Ceramic",
        "fragility": "low"
    }"#;

    fn pipeline(providers: Vec<Provider>) -> Pipeline {
        Pipeline::new(ProviderRegistry::scripted(providers)).with_price_markup(None)
    }

    #[tokio::test]
    async fn first_success_terminates_the_walk() {
        let pipeline = pipeline(vec![
            ScriptedProvider::ok("gemini", FULL_RESPONSE),
            ScriptedProvider::failing("openai", ProviderError::network("should not be tried")),
        ]);
        let resp = pipeline.run(sample_request()).await.expect("run");
        assert_eq!(resp.listing.provider_used, "gemini");
    }

    #[tokio::test]
    async fn fallback_provider_wins_after_failure() {
        let pipeline = pipeline(vec![
            ScriptedProvider::failing("gemini", ProviderError::network("connect timeout")),
            ScriptedProvider::ok("openai", FULL_RESPONSE),
        ]);
        let resp = pipeline.run(sample_request()).await.expect("run");
        assert_eq!(resp.listing.provider_used, "openai");

        let analyze = resp
            .stages
            .iter()
            .find(|stage| stage.name == "analyze")
            .expect("analyze stage");
        let attempts = analyze.output["attempts"].as_array().unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0]["provider"], "gemini");
        assert_eq!(attempts[0]["kind"], "network");
    }

    #[tokio::test]
    async fn parse_failure_advances_to_next_provider() {
        let pipeline = pipeline(vec![
            ScriptedProvider::ok("gemini", "I cannot help with that."),
            ScriptedProvider::ok("anthropic", FULL_RESPONSE),
        ]);
        let resp = pipeline.run(sample_request()).await.expect("run");
        assert_eq!(resp.listing.provider_used, "anthropic");

        let analyze = resp
            .stages
            .iter()
            .find(|stage| stage.name == "analyze")
            .unwrap();
        assert_eq!(analyze.output["attempts"][0]["kind"], "malformed_body");
    }

    #[tokio::test]
    async fn all_failures_aggregate_in_attempt_order() {
        let pipeline = pipeline(vec![
            ScriptedProvider::failing("gemini", ProviderError::network("connect timeout")),
            ScriptedProvider::failing(
                "openai",
                ProviderError::from_status(
                    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    "boom",
                ),
            ),
        ]);
        let err = pipeline.run(sample_request()).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::AllProvidersFailed);
        let detail = err.detail();
        let gemini_at = detail.find("gemini: network").expect("gemini entry");
        let openai_at = detail.find("openai: bad_status").expect("openai entry");
        assert!(gemini_at < openai_at, "attempt order lost: {detail}");
    }

    #[tokio::test]
    async fn no_images_fails_fast() {
        let pipeline = pipeline(vec![ScriptedProvider::ok("gemini", FULL_RESPONSE)]);
        let mut request = sample_request();
        request.images.clear();
        let err = pipeline.run(request).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert_eq!(err.stage(), "validate_input");
    }

    #[tokio::test]
    async fn invalid_base64_is_an_input_error() {
        let pipeline = pipeline(vec![ScriptedProvider::ok("gemini", FULL_RESPONSE)]);
        let mut request = sample_request();
        request.images[0].data = "not base64 !!".to_string();
        let err = pipeline.run(request).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn zero_providers_is_a_config_error() {
        let pipeline = Pipeline::new(ProviderRegistry::empty()).with_price_markup(None);
        let err = pipeline.run(sample_request()).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::Config);
        assert!(err.detail().contains("no provider configured"));
    }

    #[tokio::test]
    async fn configured_but_keyless_is_a_config_error() {
        let registry = ProviderRegistry::configured_without_credentials(&["gemini", "openai"]);
        let pipeline = Pipeline::new(registry).with_price_markup(None);
        let err = pipeline.run(sample_request()).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::Config);
        assert!(err.detail().contains("credential"));
    }

    #[tokio::test]
    async fn end_to_end_listing_is_complete() {
        let pipeline = pipeline(vec![ScriptedProvider::ok("gemini", FULL_RESPONSE)]);
        let resp = pipeline.run(sample_request()).await.expect("run");
        let listing = &resp.listing;

        assert_eq!(listing.title, "Vintage ceramic teapot");
        assert_eq!(listing.spicy_comment.as_deref(), Some("Your nan would approve."));
        // 30x20x20 pads to 33x23x23: over small-parcel height, inside medium.
        assert_eq!(listing.recommended_packaging.tier, PackagingTier::MediumParcel);
        assert_eq!(listing.recommended_packaging.price, 2.50);
        assert_eq!(listing.recommended_packaging.reason, "Best fit with padding");

        let names: Vec<&str> = resp.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["validate_input", "build_prompt", "analyze", "classify_packaging"]
        );
    }

    #[tokio::test]
    async fn spicy_comment_dropped_when_mode_off() {
        let pipeline = pipeline(vec![ScriptedProvider::ok("gemini", FULL_RESPONSE)]);
        let mut request = sample_request();
        request.is_spicy_mode = false;
        let resp = pipeline.run(request).await.expect("run");
        assert!(resp.listing.spicy_comment.is_none());
    }

    #[tokio::test]
    async fn sparse_response_is_fully_defaulted() {
        let pipeline = pipeline(vec![ScriptedProvider::ok("gemini", "```json\n{}\n```")]);
        let mut request = sample_request();
        request.is_spicy_mode = false;
        let resp = pipeline.run(request).await.expect("run");
        let listing = &resp.listing;
        assert_eq!(listing.title, "Item for Sale");
        assert_eq!(listing.price_low, 5.0);
        assert_eq!(listing.price_high, 10.0);
        // Default 15x10x5 pads to 18x13x8: over the letter height, small parcel.
        assert_eq!(listing.recommended_packaging.tier, PackagingTier::SmallParcel);
    }

    #[tokio::test]
    async fn configured_markup_scales_prices_after_normalization() {
        let pipeline = Pipeline::new(ProviderRegistry::scripted(vec![ScriptedProvider::ok(
            "gemini",
            FULL_RESPONSE,
        )]))
        .with_price_markup(Some(10.0));
        let resp = pipeline.run(sample_request()).await.expect("run");
        assert_eq!(resp.listing.price_low, 13.2);
        assert_eq!(resp.listing.price_high, 27.5);
        assert!(resp.stages.iter().any(|stage| stage.name == "adjust_price"));
    }
}

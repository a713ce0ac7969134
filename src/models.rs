use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One photo of the item, already encoded by the caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    pub data: String,
    pub mime_type: String,
}

/// Wire request for the analysis pipeline.
///
/// Defaults mirror the public API contract: spicy mode on, UK region,
/// premium off.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub images: Vec<ImagePayload>,
    #[serde(default)]
    pub extra_info: Option<String>,
    #[serde(default = "default_spicy_mode")]
    pub is_spicy_mode: bool,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub is_premium: bool,
}

fn default_spicy_mode() -> bool {
    true
}

fn default_region() -> String {
    "UK".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
    #[serde(rename = "God-Tier")]
    GodTier,
}

impl Rarity {
    /// Case-insensitive match against the provider-facing labels.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "common" => Some(Rarity::Common),
            "uncommon" => Some(Rarity::Uncommon),
            "rare" => Some(Rarity::Rare),
            "epic" => Some(Rarity::Epic),
            "legendary" => Some(Rarity::Legendary),
            "god-tier" | "god tier" => Some(Rarity::GodTier),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fragility {
    Low,
    Medium,
    High,
}

impl Fragility {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "low" => Some(Fragility::Low),
            "medium" => Some(Fragility::Medium),
            "high" => Some(Fragility::High),
            _ => None,
        }
    }
}

/// Estimated size in centimetres plus the model's confidence (0-100).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dimensions {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Weight {
    pub grams: f64,
    pub confidence: u8,
}

/// Listing fields produced by normalization, before packaging classification
/// and provider attribution are attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DraftListing {
    pub title: String,
    pub description: String,
    pub condition: String,
    pub category: String,
    pub rarity: Rarity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spicy_comment: Option<String>,
    pub price_low: f64,
    pub price_high: f64,
    pub dimensions: Dimensions,
    pub weight: Weight,
    pub material: String,
    pub fragility: Fragility,
}

/// The single source-of-truth output shape. Every field is populated;
/// normalization defaults guarantee no gap survives the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalListing {
    pub title: String,
    pub description: String,
    pub condition: String,
    pub category: String,
    pub rarity: Rarity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spicy_comment: Option<String>,
    pub price_low: f64,
    pub price_high: f64,
    pub dimensions: Dimensions,
    pub weight: Weight,
    pub material: String,
    pub fragility: Fragility,
    pub recommended_packaging: crate::shipping::PackagingRecommendation,
    pub provider_used: String,
}

impl CanonicalListing {
    pub fn from_draft(
        draft: DraftListing,
        packaging: crate::shipping::PackagingRecommendation,
        provider_used: impl Into<String>,
    ) -> Self {
        Self {
            title: draft.title,
            description: draft.description,
            condition: draft.condition,
            category: draft.category,
            rarity: draft.rarity,
            spicy_comment: draft.spicy_comment,
            price_low: draft.price_low,
            price_high: draft.price_high,
            dimensions: draft.dimensions,
            weight: draft.weight,
            material: draft.material,
            fragility: draft.fragility,
            recommended_packaging: packaging,
            provider_used: provider_used.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalyzeResponse {
    pub listing: CanonicalListing,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

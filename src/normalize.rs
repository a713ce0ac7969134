//! Maps raw provider text into a [`DraftListing`]. Providers disagree on
//! shape and frequently wrap JSON in markdown fences; everything after a
//! successful parse is repaired field-by-field, never rejected.

use crate::models::{Dimensions, DraftListing, Fragility, Rarity, Weight};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("provider returned malformed JSON: {0}")]
pub struct NormalizeError(pub String);

/// Strip surrounding triple-backtick fences, with or without a language tag.
/// Textual trim only, not a markdown parser.
fn strip_code_fence(input: &str) -> &str {
    let mut text = input.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Providers may open the fence on the same line as the payload
        // ("```{...}```"), so only discard the opening line when it looks
        // like a bare language tag.
        let first_line_end = rest.find('\n');
        let first_line = match first_line_end {
            Some(idx) => &rest[..idx],
            None => rest,
        };
        text = if is_language_tag(first_line) {
            match first_line_end {
                Some(idx) => &rest[idx + 1..],
                None => "",
            }
        } else {
            rest
        };
    }
    text = text.trim_end();
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

fn is_language_tag(line: &str) -> bool {
    let line = line.trim();
    line.len() <= 12 && line.chars().all(|ch| ch.is_ascii_alphanumeric())
}

/// Parse raw provider text into a complete draft listing.
///
/// Parse failure is fatal for this provider attempt; once parsing succeeds
/// defaulting guarantees a complete result. `spicy_comment` is carried only
/// when the caller asked for spicy mode.
pub fn normalize_listing(raw: &str, spicy_mode: bool) -> Result<DraftListing, NormalizeError> {
    let cleaned = strip_code_fence(raw);
    let value: Value =
        serde_json::from_str(cleaned).map_err(|err| NormalizeError(err.to_string()))?;
    Ok(listing_from_value(&value, spicy_mode))
}

fn listing_from_value(value: &Value, spicy_mode: bool) -> DraftListing {
    // A non-object root leaves every field absent and therefore defaulted.
    let field = |key: &str| value.as_object().and_then(|map| map.get(key));

    let spicy_comment = if spicy_mode {
        field("spicyComment")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    } else {
        None
    };

    // Some provider variants nest prices under a `pricing` object.
    let pricing = field("pricing");
    let price_slot = |direct: Option<&Value>, nested_key: &str| {
        direct
            .and_then(coerce_number)
            .or_else(|| {
                pricing
                    .and_then(|p| p.get(nested_key))
                    .and_then(coerce_number)
            })
            .filter(|n| n.is_finite() && *n >= 0.0)
    };

    DraftListing {
        title: string_field(field("title"), "Item for Sale"),
        description: string_field(field("description"), "Item as shown in photos."),
        condition: string_field(field("condition"), "Good condition"),
        category: string_field(field("category"), "Other"),
        rarity: field("rarity")
            .and_then(Value::as_str)
            .and_then(Rarity::parse)
            .unwrap_or(Rarity::Common),
        spicy_comment,
        price_low: price_slot(field("priceLow"), "low").unwrap_or(5.0),
        price_high: price_slot(field("priceHigh"), "high").unwrap_or(10.0),
        dimensions: dimensions_from_value(field("dimensions")),
        weight: weight_from_value(field("weight")),
        material: string_field(field("material"), "Mixed materials"),
        fragility: field("fragility")
            .and_then(Value::as_str)
            .and_then(Fragility::parse)
            .unwrap_or(Fragility::Medium),
    }
}

fn dimensions_from_value(value: Option<&Value>) -> Dimensions {
    let sub = |key: &str| value.and_then(|v| v.get(key));
    Dimensions {
        length: length_field(sub("length"), 15.0),
        width: length_field(sub("width"), 10.0),
        height: length_field(sub("height"), 5.0),
        confidence: confidence_field(sub("confidence")),
    }
}

fn weight_from_value(value: Option<&Value>) -> Weight {
    let sub = |key: &str| value.and_then(|v| v.get(key));
    Weight {
        grams: length_field(sub("grams"), 200.0),
        confidence: confidence_field(sub("confidence")),
    }
}

fn string_field(value: Option<&Value>, default: &str) -> String {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
}

/// Parse-as-number-else-default, applied per field rather than per object.
fn length_field(value: Option<&Value>, default: f64) -> f64 {
    value
        .and_then(coerce_number)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .unwrap_or(default)
}

fn confidence_field(value: Option<&Value>) -> u8 {
    value
        .and_then(coerce_number)
        .filter(|n| (0.0..=100.0).contains(n))
        .map(|n| n.round() as u8)
        .unwrap_or(50)
}

/// Accept JSON numbers and numeric strings; providers emit both.
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

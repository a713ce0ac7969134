//! Builds the provider-agnostic instruction text. Deterministic: the same
//! configuration always produces the same string, so provider fallback can
//! reuse one prompt across attempts.

/// Caller-controlled knobs that shape the instruction.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub region: String,
    pub extra_info: Option<String>,
    pub spicy_mode: bool,
    pub premium: bool,
}

impl PromptConfig {
    pub fn from_request(request: &crate::models::AnalysisRequest) -> Self {
        Self {
            region: request.region.clone(),
            extra_info: request.extra_info.clone(),
            spicy_mode: request.is_spicy_mode,
            premium: request.is_premium,
        }
    }
}

const SCHEMA_FIELDS: &str = r#"{
  "title": "short marketplace listing title",
  "description": "2-4 sentence sales description",
  "condition": "honest condition assessment",
  "category": "best-fit marketplace category",
  "rarity": "one of: Common, Uncommon, Rare, Epic, Legendary, God-Tier",
  "spicyComment": "one playful remark about the item",
  "priceLow": 0,
  "priceHigh": 0,
  "dimensions": { "length": 0, "width": 0, "height": 0, "confidence": 0 },
  "weight": { "grams": 0, "confidence": 0 },
  "material": "primary material",
  "fragility": "one of: low, medium, high"
}"#;

/// Assemble the full instruction for a vision provider.
pub fn build_instruction(config: &PromptConfig) -> String {
    let mut out = String::with_capacity(1024);

    out.push_str(
        "You are a second-hand marketplace listing assistant. Analyze the \
         attached photos of a single item for sale and respond with ONE JSON \
         object and nothing else: no prose, no markdown, no code fences.\n\n",
    );
    out.push_str("The JSON object must contain exactly these fields:\n");
    out.push_str(SCHEMA_FIELDS);
    out.push_str("\n\n");
    out.push_str(&format!(
        "Price the item in the currency of the {} market. priceLow and \
         priceHigh are realistic resale bounds as plain numbers. Dimensions \
         are centimetres, weight is grams, confidence is 0-100.\n",
        config.region
    ));

    if let Some(notes) = config
        .extra_info
        .as_deref()
        .map(str::trim)
        .filter(|notes| !notes.is_empty())
    {
        out.push_str("\nSeller notes about the item:\n");
        out.push_str(notes);
        out.push('\n');
    }

    if config.spicy_mode {
        out.push_str(
            "\nTone: witty and informal. Make the description fun to read and \
             put your cheekiest one-liner in spicyComment.\n",
        );
    } else {
        out.push_str(
            "\nTone: neutral and businesslike. Plain factual language, no \
             jokes. Leave spicyComment as an empty string.\n",
        );
    }

    if config.premium {
        out.push_str(
            "\nExtended analysis: weave current market insight into the \
             description - comparable sold prices, demand trend for this kind \
             of item, and the single best selling point to lead with. Tighten \
             the price bounds using that insight.\n",
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> PromptConfig {
        PromptConfig {
            region: "UK".into(),
            extra_info: None,
            spicy_mode: false,
            premium: false,
        }
    }

    #[test]
    fn deterministic_for_same_config() {
        let config = PromptConfig {
            extra_info: Some("boxed, never used".into()),
            spicy_mode: true,
            premium: true,
            ..base_config()
        };
        assert_eq!(build_instruction(&config), build_instruction(&config));
    }

    #[test]
    fn always_demands_strict_json_schema() {
        let text = build_instruction(&base_config());
        assert!(text.contains("ONE JSON object"));
        for field in [
            "title",
            "priceLow",
            "priceHigh",
            "dimensions",
            "weight",
            "material",
            "fragility",
            "rarity",
        ] {
            assert!(text.contains(field), "missing schema field {field}");
        }
    }

    #[test]
    fn seller_notes_appended_verbatim() {
        let config = PromptConfig {
            extra_info: Some("slight chip on the lid & original receipt".into()),
            ..base_config()
        };
        assert!(
            build_instruction(&config).contains("slight chip on the lid & original receipt")
        );
    }

    #[test]
    fn blank_seller_notes_are_dropped() {
        let config = PromptConfig {
            extra_info: Some("   ".into()),
            ..base_config()
        };
        assert!(!build_instruction(&config).contains("Seller notes"));
    }

    #[test]
    fn tone_switches_on_spicy_mode() {
        let spicy = build_instruction(&PromptConfig {
            spicy_mode: true,
            ..base_config()
        });
        let plain = build_instruction(&base_config());
        assert!(spicy.contains("witty and informal"));
        assert!(plain.contains("neutral and businesslike"));
        assert_ne!(spicy, plain);
    }

    #[test]
    fn premium_adds_market_insight_block() {
        let premium = build_instruction(&PromptConfig {
            premium: true,
            ..base_config()
        });
        assert!(premium.contains("market insight"));
        assert!(!build_instruction(&base_config()).contains("market insight"));
    }

    #[test]
    fn region_feeds_pricing_directive() {
        let de = build_instruction(&PromptConfig {
            region: "DE".into(),
            ..base_config()
        });
        assert!(de.contains("the DE market"));
    }
}

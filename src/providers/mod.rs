//! One adapter per external vision provider. Adapters shape the request,
//! make the call, and map transport failures into [`ProviderError`]; they
//! never interpret listing semantics — raw text goes back untouched.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use crate::models::ImagePayload;
use std::env;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Auth,
    RateLimit,
    Network,
    BadStatus,
    MalformedBody,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProviderErrorKind::Auth => "auth",
            ProviderErrorKind::RateLimit => "rate_limit",
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::BadStatus => "bad_status",
            ProviderErrorKind::MalformedBody => "malformed_body",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {detail}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub detail: String,
}

impl ProviderError {
    pub fn auth(detail: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Auth,
            detail: detail.into(),
        }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Network,
            detail: detail.into(),
        }
    }

    pub fn malformed_body(detail: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::MalformedBody,
            detail: detail.into(),
        }
    }

    /// Non-2xx statuses carry the code and body; 429 gets its own kind so
    /// the orchestrator transcript distinguishes throttling from breakage.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
        let kind = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ProviderErrorKind::RateLimit
        } else {
            ProviderErrorKind::BadStatus
        };
        Self { kind, detail }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Closed set of configured adapters; the orchestrator walks these in
/// declared order without caring which vendor sits behind each id.
pub enum Provider {
    Gemini(gemini::GeminiProvider),
    OpenAi(openai::OpenAiProvider),
    Anthropic(anthropic::AnthropicProvider),
    #[cfg(test)]
    Scripted(ScriptedProvider),
}

impl Provider {
    pub fn id(&self) -> &str {
        match self {
            Provider::Gemini(_) => "gemini",
            Provider::OpenAi(_) => "openai",
            Provider::Anthropic(_) => "anthropic",
            #[cfg(test)]
            Provider::Scripted(scripted) => &scripted.id,
        }
    }

    pub async fn analyze(
        &self,
        images: &[ImagePayload],
        instruction: &str,
    ) -> Result<String, ProviderError> {
        match self {
            Provider::Gemini(adapter) => adapter.analyze(images, instruction).await,
            Provider::OpenAi(adapter) => adapter.analyze(images, instruction).await,
            Provider::Anthropic(adapter) => adapter.analyze(images, instruction).await,
            #[cfg(test)]
            Provider::Scripted(scripted) => scripted.outcome.clone(),
        }
    }
}

/// Canned provider for orchestrator tests; no network involved.
#[cfg(test)]
pub struct ScriptedProvider {
    pub id: String,
    pub outcome: Result<String, ProviderError>,
}

#[cfg(test)]
impl ScriptedProvider {
    pub fn ok(id: &str, raw: &str) -> Provider {
        Provider::Scripted(Self {
            id: id.to_string(),
            outcome: Ok(raw.to_string()),
        })
    }

    pub fn failing(id: &str, error: ProviderError) -> Provider {
        Provider::Scripted(Self {
            id: id.to_string(),
            outcome: Err(error),
        })
    }
}

/// Ordered provider set resolved from the environment. `configured` tracks
/// every recognized name in the order list; `available` keeps only those
/// with a credential, since a keyless provider is skipped rather than tried.
pub struct ProviderRegistry {
    configured: Vec<String>,
    available: Vec<Provider>,
}

impl ProviderRegistry {
    pub fn from_env() -> Self {
        let mut configured = Vec::new();
        let mut available = Vec::new();

        for name in provider_order() {
            let provider = match name.as_str() {
                "gemini" => {
                    configured.push(name.clone());
                    credential("GEMINI_API_KEY")
                        .map(|key| Provider::Gemini(gemini::GeminiProvider::new(key)))
                }
                "openai" => {
                    configured.push(name.clone());
                    credential("OPENAI_API_KEY")
                        .map(|key| Provider::OpenAi(openai::OpenAiProvider::new(key)))
                }
                "anthropic" => {
                    configured.push(name.clone());
                    credential("ANTHROPIC_API_KEY")
                        .map(|key| Provider::Anthropic(anthropic::AnthropicProvider::new(key)))
                }
                other => {
                    warn!(
                        target = "snaplist.providers",
                        provider = other,
                        "ignored unknown provider in PROVIDER_ORDER"
                    );
                    continue;
                }
            };
            match provider {
                Some(provider) => available.push(provider),
                None => debug!(
                    target = "snaplist.providers",
                    provider = %name,
                    "provider skipped (no credential)"
                ),
            }
        }

        Self {
            configured,
            available,
        }
    }

    #[cfg(test)]
    pub fn scripted(providers: Vec<Provider>) -> Self {
        let configured = providers
            .iter()
            .map(|provider| provider.id().to_string())
            .collect();
        Self {
            configured,
            available: providers,
        }
    }

    #[cfg(test)]
    pub fn empty() -> Self {
        Self {
            configured: Vec::new(),
            available: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn configured_without_credentials(names: &[&str]) -> Self {
        Self {
            configured: names.iter().map(|name| name.to_string()).collect(),
            available: Vec::new(),
        }
    }

    pub fn configured_count(&self) -> usize {
        self.configured.len()
    }

    pub fn available(&self) -> &[Provider] {
        &self.available
    }
}

fn provider_order() -> Vec<String> {
    let raw =
        env::var("PROVIDER_ORDER").unwrap_or_else(|_| "gemini,openai,anthropic".to_string());
    raw.split(',')
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}

fn credential(var: &str) -> Option<String> {
    env::var(var).ok().filter(|key| !key.trim().is_empty())
}

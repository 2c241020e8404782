// crates/risk-engine/src/llm/provider.rs
// LLM provider abstraction layer — the engine's only collaborator boundary
// to the concrete model (§6 External Interfaces). Concrete providers are
// not implemented here; callers supply an `Arc<dyn LlmClient>` wired up to
// whichever backend they run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, RiskError};

/// Identifies which backend a configured `LlmClient` talks to. Purely
/// descriptive — the trait object is what callers actually invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    DeepSeek,
    Gemini,
    Ollama,
}

impl Provider {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deepseek" => Some(Self::DeepSeek),
            "gemini" => Some(Self::Gemini),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::DeepSeek => "deepseek-reasoner",
            Self::Gemini => "gemini-3-pro-preview",
            Self::Ollama => "llama3.3",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeepSeek => write!(f, "deepseek"),
            Self::Gemini => write!(f, "gemini"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

/// The engine's view of an LLM collaborator (§6):
/// `Complete(system,user) -> text`, `CompleteJSON(system,user) -> json`,
/// `IsEnabled() -> bool`. Every method is a suspension point (§5) and
/// callers are expected to apply their own timeout around the call.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-form text completion. Used by Ownership's semantic-importance
    /// classifier, Coupling's rationale, and Temporal's pattern summaries.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Schema-constrained completion. Used by the Extractor (§4.3); the
    /// caller parses the closed schema out of the returned text with
    /// [`crate::utils::json::parse_json_hardened`].
    async fn complete_json(&self, system: &str, user: &str) -> Result<String>;

    /// Whether this client is configured and should be called at all.
    /// Callers skip LLM-dependent steps gracefully when this is false
    /// rather than treating an unconfigured provider as an error.
    fn is_enabled(&self) -> bool;

    fn provider_type(&self) -> Provider;

    fn model_name(&self) -> String;
}

/// A client that is never enabled — the default when no provider is
/// configured. Every method returns `RiskError::Llm` if called, which
/// callers should not do after checking `is_enabled()`.
pub struct NullLlmClient;

#[async_trait]
impl LlmClient for NullLlmClient {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Err(RiskError::Llm("no LLM provider configured".into()))
    }

    async fn complete_json(&self, _system: &str, _user: &str) -> Result<String> {
        Err(RiskError::Llm("no LLM provider configured".into()))
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn provider_type(&self) -> Provider {
        Provider::DeepSeek
    }

    fn model_name(&self) -> String {
        "none".to_string()
    }
}

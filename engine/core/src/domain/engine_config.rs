// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0

// Engine Configuration Types
//
// Defines the configuration schema for the Cortex execution engine:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Circuit breaker, cascade guard and budget settings
// - Model pricing table for spend projection
// - Provider endpoints (BYOLLM support) and model aliases
// - Persona definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::persona::{FeatureBudget, Persona};
use crate::domain::provider::ReasoningEffort;

/// Top-level Kubernetes-style engine configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfigManifest {
    /// API version (must be "cortex.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "EngineConfig")
    pub kind: String,

    /// Manifest metadata (name, labels, version)
    pub metadata: ManifestMetadata,

    /// Engine configuration specification
    pub spec: EngineSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable deployment name
    pub name: String,

    /// Optional: Configuration version for tracking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Optional: Labels for categorization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Engine configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSpec {
    /// Circuit breaker thresholds
    #[serde(default)]
    pub breaker: BreakerSettings,

    /// Cascade guard limits
    #[serde(default)]
    pub cascade: CascadeSettings,

    /// Budget checks and pricing
    #[serde(default)]
    pub budget: BudgetSettings,

    /// Agentic loop limits
    #[serde(default)]
    pub agentic: AgenticSettings,

    /// Model provider endpoints
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Model alias mapping (alias -> concrete model identifier)
    #[serde(default)]
    pub model_aliases: HashMap<String, String>,

    /// Provider used for models no entry claims
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    /// Persona definitions
    #[serde(default)]
    pub personas: Vec<PersonaConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Open-state timeout before the first half-open probe
    #[serde(default = "default_initial_timeout_ms")]
    pub initial_timeout_ms: u64,

    /// Ceiling for the doubling timeout
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
}

impl BreakerSettings {
    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_timeout_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            initial_timeout_ms: default_initial_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeSettings {
    /// Maximum cascade depth (1 = at most one automatic hop)
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Trailing window for the hourly rate check
    #[serde(default = "default_rate_window_hours")]
    pub rate_window_hours: u32,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            rate_window_hours: default_rate_window_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSettings {
    /// Per-1k-token USD rates by model
    #[serde(default = "default_model_rates")]
    pub model_rates: Vec<ModelRate>,

    /// Flat per-1k rate applied to both sides for unknown models.
    /// Deliberately high so unpriced models overestimate, never undercount.
    #[serde(default = "default_fallback_cost")]
    pub fallback_cost_per_1k: f64,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            model_rates: default_model_rates(),
            fallback_cost_per_1k: default_fallback_cost(),
        }
    }
}

/// USD per 1,000 tokens for one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRate {
    pub model: String,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticSettings {
    /// Provider calls allowed before the forced synthesis pass
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Per-tool-call deadline
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
}

impl AgenticSettings {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

impl Default for AgenticSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_timeout_ms: default_tool_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider name (e.g., "openai", "anthropic", "vllm-local")
    pub name: String,

    /// Provider type
    #[serde(rename = "type")]
    pub provider_type: String, // "openai", "anthropic", "openai-compatible"

    /// API endpoint URL
    pub endpoint: String,

    /// API key (supports "env:VAR_NAME" for environment variables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Whether this provider is active
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Model identifiers this provider serves
    pub models: Vec<String>,
}

/// Serde twin of [`Persona`], with manifest defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub name: String,

    pub system_prompt: String,

    pub default_model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_reasoning_effort: Option<ReasoningEffort>,

    #[serde(default = "default_persona_max_tokens")]
    pub default_max_tokens: u32,

    #[serde(default = "default_rate_limit_per_hour")]
    pub rate_limit_per_hour: u32,

    #[serde(default = "default_daily_token_limit")]
    pub daily_token_limit: u64,

    /// Feature name -> per-call token ceiling
    #[serde(default)]
    pub features: HashMap<String, u32>,
}

impl From<PersonaConfig> for Persona {
    fn from(config: PersonaConfig) -> Self {
        Persona {
            name: config.name,
            system_prompt: config.system_prompt,
            default_model: config.default_model,
            default_reasoning_effort: config.default_reasoning_effort,
            default_max_tokens: config.default_max_tokens,
            rate_limit_per_hour: config.rate_limit_per_hour,
            daily_token_limit: config.daily_token_limit,
            features: config
                .features
                .into_iter()
                .map(|(name, max_tokens)| (name, FeatureBudget { max_tokens }))
                .collect(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_initial_timeout_ms() -> u64 {
    60_000
}

fn default_max_timeout_ms() -> u64 {
    900_000
}

fn default_max_depth() -> u32 {
    1
}

fn default_rate_window_hours() -> u32 {
    1
}

fn default_fallback_cost() -> f64 {
    0.06
}

fn default_max_iterations() -> u32 {
    10
}

fn default_tool_timeout_ms() -> u64 {
    30_000
}

fn default_persona_max_tokens() -> u32 {
    4096
}

fn default_rate_limit_per_hour() -> u32 {
    12
}

fn default_daily_token_limit() -> u64 {
    200_000
}

fn default_model_rates() -> Vec<ModelRate> {
    vec![
        ModelRate {
            model: "gpt-4o".to_string(),
            input_per_1k: 0.0025,
            output_per_1k: 0.01,
        },
        ModelRate {
            model: "gpt-4o-mini".to_string(),
            input_per_1k: 0.00015,
            output_per_1k: 0.0006,
        },
        ModelRate {
            model: "claude-sonnet-4-5".to_string(),
            input_per_1k: 0.003,
            output_per_1k: 0.015,
        },
        ModelRate {
            model: "claude-haiku-4-5".to_string(),
            input_per_1k: 0.0008,
            output_per_1k: 0.004,
        },
    ]
}

impl Default for EngineConfigManifest {
    fn default() -> Self {
        Self {
            api_version: "cortex.dev/v1".to_string(),
            kind: "EngineConfig".to_string(),
            metadata: ManifestMetadata {
                name: "cortex-engine".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: EngineSpec::default(),
        }
    }
}

impl EngineConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Discover configuration file using precedence order
    /// 1. CORTEX_ENGINE_CONFIG environment variable
    /// 2. ./cortex-engine.yaml (working directory)
    /// 3. ~/.cortex/engine.yaml (user home)
    /// 4. /etc/cortex/engine.yaml (system, Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CORTEX_ENGINE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./cortex-engine.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".cortex").join("engine.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/cortex/engine.yaml");
            if system_config.exists() {
                return Some(system_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(explicit_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = explicit_path {
            tracing::info!("Loading engine configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load engine config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading engine configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No engine configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    /// This allows container deployments to override config via env vars
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CORTEX_MAX_ITERATIONS") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => {
                    tracing::info!("Environment override: CORTEX_MAX_ITERATIONS={}", n);
                    self.spec.agentic.max_iterations = n;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for CORTEX_MAX_ITERATIONS: '{}'. Expected positive integer. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("CORTEX_TOOL_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => {
                    tracing::info!("Environment override: CORTEX_TOOL_TIMEOUT_MS={}", ms);
                    self.spec.agentic.tool_timeout_ms = ms;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for CORTEX_TOOL_TIMEOUT_MS: '{}'. Expected positive integer. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("CORTEX_BREAKER_FAILURE_THRESHOLD") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => {
                    tracing::info!("Environment override: CORTEX_BREAKER_FAILURE_THRESHOLD={}", n);
                    self.spec.breaker.failure_threshold = n;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for CORTEX_BREAKER_FAILURE_THRESHOLD: '{}'. Expected positive integer. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != "cortex.dev/v1" {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be 'cortex.dev/v1'",
                self.api_version
            );
        }

        if self.kind != "EngineConfig" {
            anyhow::bail!("Invalid kind: '{}'. Must be 'EngineConfig'", self.kind);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.breaker.failure_threshold == 0 {
            anyhow::bail!("breaker.failure_threshold must be at least 1");
        }

        if self.spec.breaker.initial_timeout_ms == 0 {
            anyhow::bail!("breaker.initial_timeout_ms must be positive");
        }

        if self.spec.breaker.initial_timeout_ms > self.spec.breaker.max_timeout_ms {
            anyhow::bail!(
                "breaker.initial_timeout_ms ({}) exceeds breaker.max_timeout_ms ({})",
                self.spec.breaker.initial_timeout_ms,
                self.spec.breaker.max_timeout_ms
            );
        }

        if self.spec.agentic.max_iterations == 0 {
            anyhow::bail!("agentic.max_iterations must be at least 1");
        }

        if self.spec.agentic.tool_timeout_ms == 0 {
            anyhow::bail!("agentic.tool_timeout_ms must be positive");
        }

        if self.spec.budget.fallback_cost_per_1k < 0.0 {
            anyhow::bail!("budget.fallback_cost_per_1k cannot be negative");
        }

        let mut seen_rates = std::collections::HashSet::new();
        for rate in &self.spec.budget.model_rates {
            if rate.model.is_empty() {
                anyhow::bail!("budget.model_rates entries must name a model");
            }
            if !seen_rates.insert(rate.model.as_str()) {
                anyhow::bail!("Duplicate model rate for '{}'", rate.model);
            }
            if rate.input_per_1k < 0.0 || rate.output_per_1k < 0.0 {
                anyhow::bail!("Negative rate for model '{}'", rate.model);
            }
        }

        for provider in &self.spec.providers {
            if provider.name.is_empty() {
                anyhow::bail!("Provider name cannot be empty");
            }
            if provider.endpoint.is_empty() {
                anyhow::bail!("Provider endpoint cannot be empty for: {}", provider.name);
            }
            if provider.models.is_empty() {
                anyhow::bail!("Provider must serve at least one model: {}", provider.name);
            }
        }

        if let Some(default_provider) = &self.spec.default_provider {
            if !self.spec.providers.iter().any(|p| &p.name == default_provider) {
                anyhow::bail!("Default provider '{}' not found in providers", default_provider);
            }
        }

        let mut seen_personas = std::collections::HashSet::new();
        for persona in &self.spec.personas {
            if persona.name.is_empty() {
                anyhow::bail!("Persona name cannot be empty");
            }
            if !seen_personas.insert(persona.name.as_str()) {
                anyhow::bail!("Duplicate persona '{}'", persona.name);
            }
            if persona.default_model.is_empty() {
                anyhow::bail!("Persona '{}' has no default model", persona.name);
            }
            if persona.default_max_tokens == 0 {
                anyhow::bail!("Persona '{}' has a zero default_max_tokens", persona.name);
            }
            for (feature, max_tokens) in &persona.features {
                if *max_tokens == 0 {
                    anyhow::bail!(
                        "Persona '{}' feature '{}' has a zero token ceiling",
                        persona.name,
                        feature
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
apiVersion: cortex.dev/v1
kind: EngineConfig
metadata:
  name: staging-engine
  version: "1.0.0"
spec:
  breaker:
    failure_threshold: 3
    initial_timeout_ms: 60000
    max_timeout_ms: 900000
  cascade:
    max_depth: 1
  agentic:
    max_iterations: 10
    tool_timeout_ms: 30000
  budget:
    fallback_cost_per_1k: 0.06
    model_rates:
      - model: gpt-4o-mini
        input_per_1k: 0.00015
        output_per_1k: 0.0006
  providers:
    - name: openai
      type: openai
      endpoint: https://api.openai.com/v1
      api_key: env:OPENAI_API_KEY
      models: ["gpt-4o-mini", "gpt-4o"]
  default_provider: openai
  personas:
    - name: curator
      system_prompt: "You curate the workspace knowledge base."
      default_model: gpt-4o-mini
      default_max_tokens: 2048
      rate_limit_per_hour: 12
      daily_token_limit: 50000
      features:
        digest: 2000
        auto_reply: 1024
"#;

    #[test]
    fn test_default_manifest() {
        let manifest = EngineConfigManifest::default();
        assert_eq!(manifest.api_version, "cortex.dev/v1");
        assert_eq!(manifest.kind, "EngineConfig");
        assert_eq!(manifest.spec.breaker.failure_threshold, 3);
        assert_eq!(manifest.spec.breaker.initial_timeout_ms, 60_000);
        assert_eq!(manifest.spec.breaker.max_timeout_ms, 900_000);
        assert_eq!(manifest.spec.cascade.max_depth, 1);
        assert_eq!(manifest.spec.agentic.max_iterations, 10);
        assert_eq!(manifest.spec.agentic.tool_timeout_ms, 30_000);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_sample_manifest() {
        let manifest = EngineConfigManifest::from_yaml_str(SAMPLE).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.metadata.name, "staging-engine");
        assert_eq!(manifest.spec.providers.len(), 1);
        assert_eq!(manifest.spec.personas.len(), 1);

        let persona: Persona = manifest.spec.personas[0].clone().into();
        assert_eq!(persona.name, "curator");
        assert_eq!(persona.feature_budget("digest").unwrap().max_tokens, 2000);
        assert_eq!(persona.feature_budget("unknown"), None);
        assert_eq!(persona.trigger_tag(), "persona:curator");
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");

        let manifest = EngineConfigManifest::from_yaml_str(SAMPLE).unwrap();
        manifest.to_yaml_file(&path).unwrap();

        let reloaded = EngineConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(reloaded.metadata.name, "staging-engine");
        assert_eq!(reloaded.spec.personas[0].features["digest"], 2000);
    }

    #[test]
    fn test_validation() {
        let mut manifest = EngineConfigManifest::from_yaml_str(SAMPLE).unwrap();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = "cortex.dev/v1".to_string();

        manifest.spec.breaker.failure_threshold = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.breaker.failure_threshold = 3;

        manifest.spec.breaker.initial_timeout_ms = 2_000_000;
        assert!(manifest.validate().is_err());
        manifest.spec.breaker.initial_timeout_ms = 60_000;

        // Duplicate persona names must be rejected
        let duplicate = manifest.spec.personas[0].clone();
        manifest.spec.personas.push(duplicate);
        assert!(manifest.validate().is_err());
        manifest.spec.personas.pop();

        manifest.spec.default_provider = Some("missing".to_string());
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut manifest = EngineConfigManifest::default();

        std::env::set_var("CORTEX_MAX_ITERATIONS", "5");
        std::env::set_var("CORTEX_TOOL_TIMEOUT_MS", "not-a-number");
        manifest.apply_env_overrides();
        std::env::remove_var("CORTEX_MAX_ITERATIONS");
        std::env::remove_var("CORTEX_TOOL_TIMEOUT_MS");

        assert_eq!(manifest.spec.agentic.max_iterations, 5);
        // Invalid values are ignored, not applied
        assert_eq!(manifest.spec.agentic.tool_timeout_ms, 30_000);
    }
}

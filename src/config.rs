use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub companion: CompanionConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Companion-document generation policy and path template.
#[derive(Debug, Deserialize, Clone)]
pub struct CompanionConfig {
    /// Global switch; when off, only forced generation writes documents.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Path template resolved against the record; see `template` module for
    /// the placeholder set.
    #[serde(default = "default_template")]
    pub template: String,
    /// `"allow"`: only the listed file types get companions.
    /// `"deny"`: every file type except the listed ones gets companions.
    #[serde(default = "default_policy")]
    pub policy: String,
    /// Lowercased extensions the policy applies to.
    #[serde(default)]
    pub file_types: Vec<String>,
}

fn default_enabled() -> bool {
    true
}
fn default_template() -> String {
    "{{folder}}/{{name}}.md".to_string()
}
fn default_policy() -> String {
    "deny".to_string()
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            template: default_template(),
            policy: default_policy(),
            file_types: Vec::new(),
        }
    }
}

impl CompanionConfig {
    /// Apply the allow/deny-by-file-type policy to one extension.
    pub fn permits(&self, file_type: &str) -> bool {
        let listed = self
            .file_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(file_type));
        match self.policy.as_str() {
            "allow" => listed,
            _ => !listed,
        }
    }
}

/// Reference-resolver scan tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    /// Character radius around a text match used for context excerpts.
    #[serde(default = "default_context_radius")]
    pub context_radius: usize,
    /// Lines either side of a structural link used for its context.
    #[serde(default = "default_link_context_lines")]
    pub link_context_lines: usize,
}

fn default_context_radius() -> usize {
    80
}
fn default_link_context_lines() -> usize {
    1
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            context_radius: default_context_radius(),
            link_context_lines: default_link_context_lines(),
        }
    }
}

/// Bulk-operation batching and reentrancy throttle. Tunable, not
/// correctness-relevant.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Cooperative sleep between batches so host indexing is not starved.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Minimum interval before the same bulk operation may run again.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_batch_size() -> usize {
    20
}
fn default_batch_delay_ms() -> u64 {
    50
}
fn default_cooldown_secs() -> u64 {
    5
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.companion.policy.as_str() {
        "allow" | "deny" => {}
        other => anyhow::bail!("Unknown companion policy: '{}'. Must be allow or deny.", other),
    }

    if config.companion.template.trim().is_empty() {
        anyhow::bail!("companion.template must not be empty");
    }

    if config.resolver.context_radius == 0 {
        anyhow::bail!("resolver.context_radius must be > 0");
    }

    if config.sync.batch_size == 0 {
        anyhow::bail!("sync.batch_size must be > 0");
    }

    Ok(())
}

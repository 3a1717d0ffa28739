// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so a named function is required for opt-out fields.
#[allow(dead_code)]
fn default_true() -> bool {
    true
}

// ─── Model tiers ──────────────────────────────────────────────────────────────

/// A coarse model category.  Each tier maps to a concrete upstream model id
/// at runtime via [`TierModels`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Superfast,
    Fast,
    #[default]
    Smart,
}

impl ModelTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Superfast => "superfast",
            ModelTier::Fast => "fast",
            ModelTier::Smart => "smart",
        }
    }

    /// Conservative context window per tier, in tokens.
    pub fn context_window(self) -> usize {
        match self {
            ModelTier::Superfast => 128_000,
            ModelTier::Fast => 256_000,
            ModelTier::Smart => 200_000,
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a tier string does not name a known tier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid model tier: {0:?} (expected superfast | fast | smart)")]
pub struct ParseTierError(pub String);

impl FromStr for ModelTier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "superfast" => Ok(ModelTier::Superfast),
            "fast" => Ok(ModelTier::Fast),
            "smart" => Ok(ModelTier::Smart),
            _ => Err(ParseTierError(s.to_string())),
        }
    }
}

/// How the router picks a tier: `auto` classifies each user turn; a fixed
/// tier pins every turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    #[default]
    Auto,
    Fixed(ModelTier),
}

impl RoutingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingMode::Auto => "auto",
            RoutingMode::Fixed(t) => t.as_str(),
        }
    }
}

impl std::fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingMode {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(RoutingMode::Auto);
        }
        ModelTier::from_str(s).map(RoutingMode::Fixed)
    }
}

impl Serialize for RoutingMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RoutingMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Tier → upstream model id map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierModels {
    #[serde(default = "default_superfast_model")]
    pub superfast: String,
    #[serde(default = "default_fast_model")]
    pub fast: String,
    #[serde(default = "default_smart_model")]
    pub smart: String,
}

fn default_superfast_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_fast_model() -> String {
    "anthropic/claude-3.5-haiku".into()
}
fn default_smart_model() -> String {
    "anthropic/claude-sonnet-4".into()
}

impl Default for TierModels {
    fn default() -> Self {
        Self {
            superfast: default_superfast_model(),
            fast: default_fast_model(),
            smart: default_smart_model(),
        }
    }
}

impl TierModels {
    pub fn id_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Superfast => &self.superfast,
            ModelTier::Fast => &self.fast,
            ModelTier::Smart => &self.smart,
        }
    }
}

// ─── Permission rules ─────────────────────────────────────────────────────────

/// Outcome class for a permission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Allow,
    Deny,
    Ask,
}

/// One glob rule.  Patterns support `*`, `?`, and `[…]` classes; matching is
/// case-sensitive and includes dot-files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub pattern: String,
    pub action: PermissionAction,
}

/// Per-tool permission configuration: a default action plus ordered rules.
///
/// Rule evaluation order is deny-first, then allow, then ask, regardless of
/// the order rules appear in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPermissions {
    #[serde(rename = "default")]
    pub default_action: PermissionAction,
    #[serde(default)]
    pub rules: Vec<PermissionRule>,
}

impl ToolPermissions {
    pub fn allow() -> Self {
        Self { default_action: PermissionAction::Allow, rules: Vec::new() }
    }

    pub fn ask() -> Self {
        Self { default_action: PermissionAction::Ask, rules: Vec::new() }
    }
}

fn rule(pattern: &str, action: PermissionAction) -> PermissionRule {
    PermissionRule { pattern: pattern.into(), action }
}

/// Built-in per-tool defaults: read-only tools run freely, mutating tools
/// prompt, and bash carries a starter deny/allow ruleset.
pub fn default_permissions() -> HashMap<String, ToolPermissions> {
    let mut map = HashMap::new();
    map.insert("read".into(), ToolPermissions::allow());
    map.insert("glob".into(), ToolPermissions::allow());
    map.insert("grep".into(), ToolPermissions::allow());
    map.insert("write".into(), ToolPermissions::ask());
    map.insert("edit".into(), ToolPermissions::ask());
    map.insert(
        "bash".into(),
        ToolPermissions {
            default_action: PermissionAction::Ask,
            rules: vec![
                rule("sudo *", PermissionAction::Deny),
                rule("rm -rf /", PermissionAction::Deny),
                rule("rm -rf /*", PermissionAction::Deny),
                rule("git *", PermissionAction::Allow),
                rule("git status", PermissionAction::Allow),
                rule("npm test*", PermissionAction::Allow),
                rule("bun *", PermissionAction::Allow),
            ],
        },
    );
    map
}

// ─── Aggregate config ─────────────────────────────────────────────────────────

/// Upstream credentials and endpoint.
///
/// Exactly one of `api_key` (BYOK mode) or `auth_token` (hosted mode) is
/// expected; `base_url` overrides the default gateway endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
    pub base_url: Option<String>,
    #[serde(default)]
    pub byok: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub mode: RoutingMode,
    #[serde(default)]
    pub default_tier: ModelTier,
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff when the response carries no
    /// Retry-After information.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Search roots for superpower definitions, lowest precedence first:
/// bundled built-ins, then the global user directory, then the project
/// directory.  Later definitions with the same trigger win.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperpowerRoots {
    /// Global user directory.  `None` resolves to `$HOME/.config/10x`.
    pub global_dir: Option<PathBuf>,
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,
}

fn default_project_dir() -> PathBuf {
    PathBuf::from("./.10x")
}

impl Default for SuperpowerRoots {
    fn default() -> Self {
        Self { global_dir: None, project_dir: default_project_dir() }
    }
}

impl SuperpowerRoots {
    pub fn global_dir(&self) -> Option<PathBuf> {
        self.global_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config/10x")))
    }
}

fn default_max_tool_hops() -> u32 {
    25
}
fn default_bash_timeout_ms() -> u64 {
    120_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub models: TierModels,
    /// System prompt prepended to every turn.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Per-tool permission config.  Tools absent from this map fall back to
    /// [`default_permissions`].
    #[serde(default = "default_permissions")]
    pub permissions: HashMap<String, ToolPermissions>,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Maximum provider round-trips within a single turn.
    #[serde(default = "default_max_tool_hops")]
    pub max_tool_hops: u32,
    #[serde(default = "default_bash_timeout_ms")]
    pub bash_timeout_ms: u64,
    #[serde(default)]
    pub superpowers: SuperpowerRoots,
    /// Session persistence directory.  `None` resolves to the per-user data
    /// directory (`<data_dir>/10x/sessions`).
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            routing: RoutingConfig::default(),
            models: TierModels::default(),
            system_prompt: None,
            permissions: default_permissions(),
            retry: RetryConfig::default(),
            max_tool_hops: default_max_tool_hops(),
            bash_timeout_ms: default_bash_timeout_ms(),
            superpowers: SuperpowerRoots::default(),
            session_dir: None,
        }
    }
}

impl Config {
    /// Resolve the credential sent as the bearer token.
    ///
    /// Explicit config wins; the `TENX_API_KEY` environment variable is the
    /// BYOK fallback so keys stay out of version-controlled config files.
    pub fn resolve_credential(&self) -> Option<String> {
        if let Some(k) = &self.auth.api_key {
            return Some(k.clone());
        }
        if let Some(t) = &self.auth.auth_token {
            return Some(t.clone());
        }
        std::env::var("TENX_API_KEY").ok()
    }

    pub fn session_dir(&self) -> PathBuf {
        self.session_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("10x/sessions")
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── ModelTier ─────────────────────────────────────────────────────────────

    #[test]
    fn tier_parses_all_three() {
        assert_eq!("superfast".parse::<ModelTier>().unwrap(), ModelTier::Superfast);
        assert_eq!("fast".parse::<ModelTier>().unwrap(), ModelTier::Fast);
        assert_eq!("smart".parse::<ModelTier>().unwrap(), ModelTier::Smart);
    }

    #[test]
    fn tier_parse_is_case_insensitive() {
        assert_eq!("Smart".parse::<ModelTier>().unwrap(), ModelTier::Smart);
        assert_eq!(" FAST ".parse::<ModelTier>().unwrap(), ModelTier::Fast);
    }

    #[test]
    fn tier_parse_rejects_unknown() {
        let err = "turbo".parse::<ModelTier>().unwrap_err();
        assert!(err.to_string().contains("turbo"));
    }

    #[test]
    fn tier_context_windows() {
        assert_eq!(ModelTier::Superfast.context_window(), 128_000);
        assert_eq!(ModelTier::Fast.context_window(), 256_000);
        assert_eq!(ModelTier::Smart.context_window(), 200_000);
    }

    #[test]
    fn tier_serde_round_trip() {
        let json = serde_json::to_string(&ModelTier::Superfast).unwrap();
        assert_eq!(json, "\"superfast\"");
        let back: ModelTier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ModelTier::Superfast);
    }

    // ── RoutingMode ───────────────────────────────────────────────────────────

    #[test]
    fn routing_mode_parses_auto_and_tiers() {
        assert_eq!("auto".parse::<RoutingMode>().unwrap(), RoutingMode::Auto);
        assert_eq!(
            "fast".parse::<RoutingMode>().unwrap(),
            RoutingMode::Fixed(ModelTier::Fast)
        );
    }

    #[test]
    fn routing_mode_serde_round_trip() {
        for mode in [RoutingMode::Auto, RoutingMode::Fixed(ModelTier::Smart)] {
            let json = serde_json::to_string(&mode).unwrap();
            let back: RoutingMode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, mode);
        }
    }

    #[test]
    fn routing_mode_rejects_unknown_string() {
        assert!(serde_json::from_str::<RoutingMode>("\"warp\"").is_err());
    }

    // ── TierModels ────────────────────────────────────────────────────────────

    #[test]
    fn tier_models_id_for_maps_each_tier() {
        let m = TierModels {
            superfast: "sf".into(),
            fast: "f".into(),
            smart: "s".into(),
        };
        assert_eq!(m.id_for(ModelTier::Superfast), "sf");
        assert_eq!(m.id_for(ModelTier::Fast), "f");
        assert_eq!(m.id_for(ModelTier::Smart), "s");
    }

    // ── Default permissions ───────────────────────────────────────────────────

    #[test]
    fn read_tools_default_to_allow() {
        let perms = default_permissions();
        for tool in ["read", "glob", "grep"] {
            assert_eq!(
                perms[tool].default_action,
                PermissionAction::Allow,
                "{tool} should default to allow"
            );
        }
    }

    #[test]
    fn mutating_tools_default_to_ask() {
        let perms = default_permissions();
        for tool in ["write", "edit", "bash"] {
            assert_eq!(
                perms[tool].default_action,
                PermissionAction::Ask,
                "{tool} should default to ask"
            );
        }
    }

    #[test]
    fn bash_defaults_include_sudo_deny() {
        let perms = default_permissions();
        assert!(perms["bash"]
            .rules
            .iter()
            .any(|r| r.pattern == "sudo *" && r.action == PermissionAction::Deny));
    }

    #[test]
    fn permissions_yaml_round_trip() {
        let tp = ToolPermissions {
            default_action: PermissionAction::Ask,
            rules: vec![PermissionRule {
                pattern: "git *".into(),
                action: PermissionAction::Allow,
            }],
        };
        let yaml = serde_yaml::to_string(&tp).unwrap();
        assert!(yaml.contains("default: ask"), "{yaml}");
        let back: ToolPermissions = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, tp);
    }

    // ── Config defaults ───────────────────────────────────────────────────────

    #[test]
    fn config_defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.max_tool_hops, 25);
        assert_eq!(cfg.bash_timeout_ms, 120_000);
        assert_eq!(cfg.routing.default_tier, ModelTier::Smart);
        assert_eq!(cfg.routing.mode, RoutingMode::Auto);
    }

    #[test]
    fn config_deserializes_partial_yaml() {
        let cfg: Config = serde_yaml::from_str("routing:\n  mode: superfast\n").unwrap();
        assert_eq!(cfg.routing.mode, RoutingMode::Fixed(ModelTier::Superfast));
        // Untouched sections fall back to defaults.
        assert_eq!(cfg.max_tool_hops, 25);
    }

    #[test]
    fn resolve_credential_prefers_api_key() {
        let cfg = Config {
            auth: AuthConfig {
                api_key: Some("sk-byok".into()),
                auth_token: Some("hosted".into()),
                ..AuthConfig::default()
            },
            ..Config::default()
        };
        assert_eq!(cfg.resolve_credential().as_deref(), Some("sk-byok"));
    }
}

//! Configuration types for lm-gateway.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens its port. Invalid configs are rejected with a clear error
//! rather than silently falling back to defaults.
//!
//! Three things are read from the file:
//! - `[gateway]` — ports, logging, ops surface settings.
//! - `[targets]` — the immutable `alias → [Target…]` route table (C1).
//! - `[router]` (optionally merged with an external file) — the category/rule
//!   routing DSL (C3/C4) described in spec §3/§6.
//!
//! # Example
//! ```toml
//! [gateway]
//! client_port = 8080
//! default_origin = "http://localhost:11434"
//!
//! [[targets.auto]]
//! backend_url = "https://api.anthropic.com"
//! upstream_model = "claude-sonnet-4-5"
//! weight = 2
//!
//! [router]
//! enabled = true
//! default_model = "auto"
//! ```

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    time::Duration,
};

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────────────────────────────────
// Top-level config
// ──────────────────────────────────────────────────────────────────────────

/// Top-level gateway configuration, fully resolved from the on-disk TOML.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    /// Immutable `alias → [Target…]` mapping (C1), built once at load.
    pub route_table: RouteTable,
    /// Immutable category/rule/auto-upgrade routing config (C3/C4).
    pub router: RouterConfig,
    /// Resolved tunables (§6), defaults applied.
    pub tunables: Tunables,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content, path.parent())
    }

    /// Parse already-read config content. `base_dir` is used to resolve a
    /// relative `router_config_file` path, if any.
    fn parse(content: &str, base_dir: Option<&Path>) -> anyhow::Result<Self> {
        let root: toml::Value = toml::from_str(content).context("parsing config TOML")?;

        let gateway: GatewayConfig = root
            .get("gateway")
            .cloned()
            .map(|v| v.try_into())
            .transpose()
            .context("parsing [gateway]")?
            .unwrap_or_default();

        let raw_targets: HashMap<String, Vec<TargetConfig>> = root
            .get("targets")
            .cloned()
            .map(|v| v.try_into())
            .transpose()
            .context("parsing [targets]")?
            .unwrap_or_default();
        let route_table = RouteTable::build(raw_targets)?;

        let router_config_file: Option<String> = root
            .get("router_config_file")
            .and_then(|v| v.as_str())
            .map(str::to_owned);

        let inline_router = root
            .get("router")
            .cloned()
            .unwrap_or_else(|| toml::Value::Table(Default::default()));

        let merged_router = match &router_config_file {
            Some(file) => {
                let path = match base_dir {
                    Some(dir) if !Path::new(file).is_absolute() => dir.join(file),
                    _ => Path::new(file).to_path_buf(),
                };
                let file_content = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading router_config_file {}", path.display()))?;
                let file_value: toml::Value =
                    toml::from_str(&file_content).context("parsing router_config_file TOML")?;
                deep_merge(inline_router, file_value)
            }
            None => inline_router,
        };

        let substituted = substitute_env(merged_router);
        let raw: RouterConfigRaw = toml::Value::try_into(substituted)
            .or_else(|_| {
                // `toml::Value::try_into` requires a round trip through the
                // text form on some toml versions; fall back to that path.
                let s = toml::to_string(&RouterConfigRaw::default())?;
                toml::from_str::<RouterConfigRaw>(&s)
            })
            .context("parsing merged [router] config")?;
        let router = RouterConfig::from_raw(raw);

        let tunables_raw: TunablesConfig = root
            .get("tunables")
            .cloned()
            .map(|v| v.try_into())
            .transpose()
            .context("parsing [tunables]")?
            .unwrap_or_default();
        let tunables = tunables_raw.resolve();

        let config = Self {
            gateway,
            route_table,
            router,
            tunables,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.gateway.default_origin.trim().is_empty(),
            "gateway.default_origin must be set — it is the fallback forwarding target for \
             unknown aliases, unparseable bodies, and exhausted selection"
        );

        for (alias, targets) in self.route_table.aliases() {
            anyhow::ensure!(!targets.is_empty(), "alias `{alias}` has no targets configured");
            for target in targets {
                anyhow::ensure!(target.weight >= 1, "target for alias `{alias}` has weight < 1");
                for forbidden in ["host", "content-length"] {
                    anyhow::ensure!(
                        !target.params.extra_headers.contains_key(forbidden),
                        "alias `{alias}` target sets forbidden extra_headers key `{forbidden}`"
                    );
                }
            }
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────────────────────────────────
// Gateway (ambient ops surface)
// ──────────────────────────────────────────────────────────────────────────

/// Core gateway settings — ports, logging, and the ambient admin/ops surface.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Port for the client-facing chat-completions API (default: 8080).
    #[serde(default = "defaults::client_port")]
    pub client_port: u16,

    /// Port for the admin/introspection API (default: 8081).
    #[serde(default = "defaults::admin_port")]
    pub admin_port: u16,

    /// Default origin used for requests that fall through routing entirely:
    /// non-POST, non-JSON-parseable bodies, unknown aliases, and the
    /// selector's empty-pool fallback (§4.4, §4.9 state machine note).
    #[serde(default)]
    pub default_origin: String,

    /// Number of recent requests kept in the in-memory traffic ring buffer
    /// (default: 500). Independent of the persisted access log (C11).
    #[serde(default = "defaults::traffic_log_capacity")]
    pub traffic_log_capacity: usize,

    /// Log level override (also controlled by `RUST_LOG`).
    #[serde(default)]
    pub log_level: Option<String>,

    /// Environment variable whose value is the Bearer token required for the
    /// admin API. Leave unset to disable admin auth.
    #[serde(default)]
    pub admin_token_env: Option<String>,

    /// Directory the access logger writes `YYYY-MM-DD.jsonl` files under.
    #[serde(default = "defaults::log_dir")]
    pub log_dir: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            client_port: defaults::client_port(),
            admin_port: defaults::admin_port(),
            default_origin: String::new(),
            traffic_log_capacity: defaults::traffic_log_capacity(),
            log_level: None,
            admin_token_env: None,
            log_dir: defaults::log_dir(),
        }
    }
}

mod defaults {
    pub fn client_port() -> u16 {
        8080
    }
    pub fn admin_port() -> u16 {
        8081
    }
    pub fn traffic_log_capacity() -> usize {
        500
    }
    pub fn log_dir() -> String {
        "logs/requests".to_string()
    }
    pub fn weight() -> u32 {
        1
    }
}

// ──────────────────────────────────────────────────────────────────────────
// Route Table (C1) — Target, TargetParams, RouteTable
// ──────────────────────────────────────────────────────────────────────────

/// On-disk shape of a single target entry under `[[targets.<alias>]]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    pub backend_url: String,
    pub upstream_model: String,
    #[serde(default = "defaults::weight")]
    pub weight: u32,
    #[serde(default)]
    pub provider_tag: Option<String>,
    /// Distinguishes two targets that share a `backend_url` (e.g. two API
    /// keys against the same origin). Defaults to `backend_url` when unset.
    #[serde(default)]
    pub provider_instance: Option<String>,
    #[serde(default)]
    pub params: TargetParams,
}

/// Recognized per-target parameter overrides (§3).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TargetParams {
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub thinking_budget_max: Option<u64>,
    #[serde(default)]
    pub max_tokens_max: Option<u64>,
    #[serde(default)]
    pub max_tokens_default: Option<u64>,
    #[serde(default)]
    pub thinking_level: Option<String>,
    #[serde(default)]
    pub anthropic_beta: Option<String>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

/// The deduplication key for a target: `(provider_instance, backend_url, upstream_model)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetIdentity {
    pub provider_instance: String,
    pub backend_url: String,
    pub upstream_model: String,
}

impl std::fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.provider_instance, self.backend_url, self.upstream_model)
    }
}

/// A concrete, routable `(backend, upstream_model, params)` endpoint.
#[derive(Debug, Clone)]
pub struct Target {
    pub backend_url: String,
    pub upstream_model: String,
    pub weight: u32,
    pub provider_tag: Option<String>,
    pub provider_instance: String,
    pub params: TargetParams,
}

impl Target {
    fn from_config(cfg: TargetConfig) -> Self {
        let provider_instance = cfg.provider_instance.unwrap_or_else(|| cfg.backend_url.clone());
        Self {
            backend_url: cfg.backend_url,
            upstream_model: cfg.upstream_model,
            weight: cfg.weight.max(1),
            provider_tag: cfg.provider_tag,
            provider_instance,
            params: cfg.params,
        }
    }

    pub fn identity(&self) -> TargetIdentity {
        TargetIdentity {
            provider_instance: self.provider_instance.clone(),
            backend_url: self.backend_url.clone(),
            upstream_model: self.upstream_model.clone(),
        }
    }

    /// Stable prefix rule over the upstream-model name (§9 Design Notes).
    pub fn signature_group(&self) -> String {
        signature_group_of(&self.upstream_model)
    }
}

/// Derive a signature-group key from an upstream-model name: `claude*`,
/// `gemini*`, `gpt*`, else the full (lower-cased) name.
pub fn signature_group_of(upstream_model: &str) -> String {
    let lower = upstream_model.to_lowercase();
    for prefix in ["claude", "gemini", "gpt"] {
        if lower.starts_with(prefix) {
            return prefix.to_string();
        }
    }
    lower
}

/// Immutable `alias → [Target…]` mapping plus a precomputed signature-group
/// index (`group → aliases`), built once at startup (C1).
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    aliases: HashMap<String, Vec<Target>>,
    signature_groups: HashMap<String, Vec<String>>,
}

impl RouteTable {
    pub fn build(raw: HashMap<String, Vec<TargetConfig>>) -> anyhow::Result<Self> {
        let mut aliases: HashMap<String, Vec<Target>> = HashMap::with_capacity(raw.len());
        for (alias, targets) in raw {
            let targets: Vec<Target> = targets.into_iter().map(Target::from_config).collect();
            aliases.insert(alias, targets);
        }

        let mut signature_groups: HashMap<String, Vec<String>> = HashMap::new();
        for (alias, targets) in &aliases {
            for target in targets {
                let group = target.signature_group();
                let entry = signature_groups.entry(group).or_default();
                if !entry.contains(alias) {
                    entry.push(alias.clone());
                }
            }
        }

        Ok(Self { aliases, signature_groups })
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    pub fn targets(&self, alias: &str) -> &[Target] {
        self.aliases.get(alias).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&String, &Vec<Target>)> {
        self.aliases.iter()
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    /// Aliases whose RouteTable entries include at least one target in the
    /// given signature group, used by signature recovery (C10).
    pub fn aliases_for_signature_group(&self, group: &str) -> &[String] {
        self.signature_groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ──────────────────────────────────────────────────────────────────────────
// Router configuration (C3 category/rule DSL + C4 auto-upgrade)
// ──────────────────────────────────────────────────────────────────────────

/// A category-DSL signal: `type:value`, e.g. `task_category:quick` or
/// `keyword:(?i)refactor`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signal {
    pub kind: SignalKind,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Keyword,
    TaskCategory,
    ToolProfile,
    HasCodeContext,
    SystemPromptType,
    ConversationDepth,
    MessagesCount,
    PromptChars,
}

impl TryFrom<String> for Signal {
    type Error = anyhow::Error;
    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let (kind_str, value) = raw
            .split_once(':')
            .with_context(|| format!("signal `{raw}` missing `type:value` separator"))?;
        let kind = match kind_str {
            "keyword" => SignalKind::Keyword,
            "task_category" => SignalKind::TaskCategory,
            "tool_profile" => SignalKind::ToolProfile,
            "has_code_context" => SignalKind::HasCodeContext,
            "system_prompt_type" => SignalKind::SystemPromptType,
            "conversation_depth" => SignalKind::ConversationDepth,
            "messages_count" => SignalKind::MessagesCount,
            "prompt_chars" => SignalKind::PromptChars,
            other => anyhow::bail!("unknown signal type `{other}` in `{raw}`"),
        };
        Ok(Self { kind, value: value.to_string() })
    }
}

impl From<Signal> for String {
    fn from(s: Signal) -> Self {
        let kind = match s.kind {
            SignalKind::Keyword => "keyword",
            SignalKind::TaskCategory => "task_category",
            SignalKind::ToolProfile => "tool_profile",
            SignalKind::HasCodeContext => "has_code_context",
            SignalKind::SystemPromptType => "system_prompt_type",
            SignalKind::ConversationDepth => "conversation_depth",
            SignalKind::MessagesCount => "messages_count",
            SignalKind::PromptChars => "prompt_chars",
        };
        format!("{kind}:{}", s.value)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    All,
    Any,
}

impl Default for MatchMode {
    fn default() -> Self {
        Self::All
    }
}

/// A single `field op value` clause of a threshold rule (§3).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Condition {
    pub field: String,
    pub op: ConditionOp,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum ConditionOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not_contains")]
    NotContains,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "not_exists")]
    NotExists,
    #[serde(rename = "regex")]
    Regex,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub priority: i64,
    pub target_model: String,
    #[serde(default)]
    pub signals: Vec<Signal>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleConfig {
    pub name: String,
    #[serde(default)]
    pub priority: i64,
    pub target_model: String,
    #[serde(default, rename = "match")]
    pub match_mode: MatchMode,
    #[serde(default)]
    pub when: Vec<Condition>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AutoUpgradeRaw {
    pub enabled: bool,
    pub mappings: HashMap<String, String>,
    pub messages_threshold: Option<u64>,
    pub tools_threshold: Option<u64>,
    pub failure_streak_threshold: Option<u64>,
    pub signature_upgrade: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfigRaw {
    pub enabled: bool,
    pub shadow_only: bool,
    pub log_factors: bool,
    pub activation_models: Vec<String>,
    pub default_model: Option<String>,
    pub categories: Vec<CategoryConfig>,
    pub rules: Vec<RuleConfig>,
    pub auto_upgrade: AutoUpgradeRaw,
}

impl Default for RouterConfigRaw {
    fn default() -> Self {
        Self {
            enabled: false,
            shadow_only: false,
            log_factors: false,
            activation_models: vec!["auto".to_string()],
            default_model: None,
            categories: Vec::new(),
            rules: Vec::new(),
            auto_upgrade: AutoUpgradeRaw::default(),
        }
    }
}

/// Auto-upgrade config (C4): orthogonal post-router rewrite of the resolved alias.
#[derive(Debug, Clone)]
pub struct AutoUpgradeConfig {
    pub enabled: bool,
    pub mappings: HashMap<String, String>,
    pub messages_threshold: Option<u64>,
    pub tools_threshold: Option<u64>,
    pub failure_streak_threshold: Option<u64>,
    pub signature_upgrade: bool,
}

/// Immutable category/rule/auto-upgrade configuration (C3/C4), after
/// priority-sorting and the inline+file merge of §6.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub enabled: bool,
    pub shadow_only: bool,
    pub log_factors: bool,
    pub activation_models: HashSet<String>,
    pub default_model: Option<String>,
    /// Sorted descending by priority.
    pub categories: Vec<CategoryConfig>,
    /// Sorted descending by priority.
    pub rules: Vec<RuleConfig>,
    pub auto_upgrade: AutoUpgradeConfig,
}

impl RouterConfig {
    fn from_raw(raw: RouterConfigRaw) -> Self {
        let mut categories = raw.categories;
        categories.sort_by(|a, b| b.priority.cmp(&a.priority));
        let mut rules = raw.rules;
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        Self {
            enabled: raw.enabled,
            shadow_only: raw.shadow_only,
            log_factors: raw.log_factors,
            activation_models: raw.activation_models.into_iter().collect(),
            default_model: raw.default_model,
            categories,
            rules,
            auto_upgrade: AutoUpgradeConfig {
                enabled: raw.auto_upgrade.enabled,
                mappings: raw.auto_upgrade.mappings,
                messages_threshold: raw.auto_upgrade.messages_threshold,
                tools_threshold: raw.auto_upgrade.tools_threshold,
                failure_streak_threshold: raw.auto_upgrade.failure_streak_threshold,
                signature_upgrade: raw.auto_upgrade.signature_upgrade,
            },
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────
// Deep merge + ${VAR} substitution (§6)
// ──────────────────────────────────────────────────────────────────────────

/// Merge `overlay` over `base`: tables merge recursively key-by-key; any
/// other value type in `overlay` replaces the corresponding `base` entry.
fn deep_merge(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Recursively substitute `${VAR}` occurrences in string leaves from the
/// process environment. Unset variables are left as an empty string.
fn substitute_env(value: toml::Value) -> toml::Value {
    match value {
        toml::Value::String(s) => toml::Value::String(substitute_env_str(&s)),
        toml::Value::Array(items) => {
            toml::Value::Array(items.into_iter().map(substitute_env).collect())
        }
        toml::Value::Table(table) => toml::Value::Table(
            table.into_iter().map(|(k, v)| (k, substitute_env(v))).collect(),
        ),
        other => other,
    }
}

fn substitute_env_str(s: &str) -> String {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

// ──────────────────────────────────────────────────────────────────────────
// Tunables (§6)
// ──────────────────────────────────────────────────────────────────────────

/// Raw, all-optional tunable overrides as read from `[tunables]`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TunablesConfig {
    pub auth_cooldown_secs: Option<u64>,
    pub validation_cooldown_secs: Option<u64>,
    pub quota_cooldown_secs: Option<u64>,
    pub transient_cooldown_secs: Option<u64>,
    pub transient_heavy_cooldown_secs: Option<u64>,
    pub signature_cooldown_secs: Option<u64>,
    pub sticky_ttl_secs: Option<u64>,
    pub max_sticky_keys: Option<usize>,
    pub max_target_retries: Option<u32>,
    pub retry_auth_on_5xx: Option<bool>,
    pub model_health_ttl_secs: Option<u64>,
    pub log_retention_days: Option<u64>,
    pub response_preview_limit: Option<usize>,
    pub response_preview_limit_verbose: Option<usize>,
}

impl TunablesConfig {
    pub fn resolve(&self) -> Tunables {
        Tunables {
            auth_cooldown: Duration::from_secs(self.auth_cooldown_secs.unwrap_or(5 * 60)),
            validation_cooldown: Duration::from_secs(
                self.validation_cooldown_secs.unwrap_or(12 * 3600),
            ),
            quota_cooldown: Duration::from_secs(self.quota_cooldown_secs.unwrap_or(12 * 3600)),
            transient_cooldown: Duration::from_secs(self.transient_cooldown_secs.unwrap_or(60)),
            transient_heavy_cooldown: Duration::from_secs(
                self.transient_heavy_cooldown_secs.unwrap_or(120),
            ),
            signature_cooldown: Duration::from_secs(self.signature_cooldown_secs.unwrap_or(120)),
            sticky_ttl: Duration::from_secs(self.sticky_ttl_secs.unwrap_or(7 * 24 * 3600)),
            max_sticky_keys: self.max_sticky_keys.unwrap_or(500),
            max_target_retries: self.max_target_retries.unwrap_or(1),
            retry_auth_on_5xx: self.retry_auth_on_5xx.unwrap_or(true),
            model_health_ttl: Duration::from_secs(self.model_health_ttl_secs.unwrap_or(2 * 3600)),
            log_retention_days: self.log_retention_days.unwrap_or(90),
            response_preview_limit: self.response_preview_limit.unwrap_or(500),
            response_preview_limit_verbose: self.response_preview_limit_verbose.unwrap_or(2000),
        }
    }
}

/// Resolved tunables with defaults applied (§6). Immutable after load.
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    pub auth_cooldown: Duration,
    pub validation_cooldown: Duration,
    pub quota_cooldown: Duration,
    pub transient_cooldown: Duration,
    pub transient_heavy_cooldown: Duration,
    pub signature_cooldown: Duration,
    pub sticky_ttl: Duration,
    pub max_sticky_keys: usize,
    pub max_target_retries: u32,
    pub retry_auth_on_5xx: bool,
    pub model_health_ttl: Duration,
    pub log_retention_days: u64,
    pub response_preview_limit: usize,
    pub response_preview_limit_verbose: usize,
}

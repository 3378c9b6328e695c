use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One layer's allow/deny rule set. `allow: None` means "unrestricted by this
/// layer"; a present allow list is exhaustive for the layer. Deny wins over
/// allow within the same layer.
///
/// Policy nodes reject unknown fields so a misspelled rule fails at config
/// load, not silently at evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct ToolPolicy {
    #[serde(default)]
    pub(crate) allow: Option<Vec<String>>,
    #[serde(default)]
    pub(crate) deny: Vec<String>,
    #[serde(default)]
    pub(crate) elevated: Option<ElevatedPolicy>,
}

/// Per-channel identity allowlist for elevated tools. A channel absent from
/// `allow_from` grants elevated access to no one on that channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct ElevatedPolicy {
    #[serde(default)]
    pub(crate) enabled: bool,
    #[serde(default)]
    pub(crate) allow_from: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct GatewayFileConfig {
    #[serde(default)]
    pub(crate) gateway: GatewaySection,
    #[serde(default)]
    pub(crate) tools: ToolsSection,
    #[serde(default)]
    pub(crate) agents: HashMap<String, AgentSection>,
    /// Group policies keyed by "<channel>:<account-id>".
    #[serde(default)]
    pub(crate) groups: HashMap<String, GroupSection>,
    #[serde(default)]
    pub(crate) channels: HashMap<String, ChannelConfig>,
    #[serde(default)]
    pub(crate) memory: MemorySection,
    #[serde(default)]
    pub(crate) browser: ControlSection,
    #[serde(default)]
    pub(crate) canvas: ControlSection,
    #[serde(default)]
    pub(crate) plugins: PluginsSection,
    /// Unknown top-level keys are tolerated; other processes share this file.
    #[serde(default, flatten)]
    pub(crate) extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct GatewaySection {
    #[serde(default)]
    pub(crate) auth: GatewayAuth,
    /// CIDR ranges or bare addresses whose forwarded headers are believed.
    #[serde(default)]
    pub(crate) trusted_proxies: Vec<String>,
    #[serde(default)]
    pub(crate) allow_real_ip_fallback: bool,
    #[serde(default)]
    pub(crate) max_body_bytes: Option<usize>,
    #[serde(default)]
    pub(crate) rate_limit: RateLimitSettings,
    #[serde(default)]
    pub(crate) tools: GatewayToolsOverride,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct GatewayAuth {
    #[serde(default)]
    pub(crate) token: Option<String>,
    #[serde(default)]
    pub(crate) password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RateLimitSettings {
    #[serde(default = "default_max_failures")]
    pub(crate) max_failures: u32,
    #[serde(default = "default_window_ms")]
    pub(crate) window_ms: u64,
    #[serde(default = "default_lockout_ms")]
    pub(crate) lockout_ms: u64,
}

fn default_max_failures() -> u32 {
    5
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_lockout_ms() -> u64 {
    300_000
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        RateLimitSettings {
            max_failures: default_max_failures(),
            window_ms: default_window_ms(),
            lockout_ms: default_lockout_ms(),
        }
    }
}

/// Operator-level final say over what HTTP callers may reach, independent of
/// per-session policy. `allow` rescues names from the built-in deny defaults;
/// `deny` is always subtracted.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct GatewayToolsOverride {
    #[serde(default)]
    pub(crate) allow: Vec<String>,
    #[serde(default)]
    pub(crate) deny: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct ToolsSection {
    #[serde(default)]
    pub(crate) profile: Option<String>,
    /// Extends the profile's allow list without replacing it.
    #[serde(default)]
    pub(crate) also_allow: Vec<String>,
    /// Global policy, applied to every session.
    #[serde(default)]
    pub(crate) policy: Option<ToolPolicy>,
    #[serde(default)]
    pub(crate) by_provider: HashMap<String, ProviderToolsSection>,
    /// Extra restriction layer for sub-agent sessions only.
    #[serde(default)]
    pub(crate) subagent: Option<ToolPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct ProviderToolsSection {
    #[serde(default)]
    pub(crate) profile: Option<String>,
    #[serde(default)]
    pub(crate) also_allow: Vec<String>,
    #[serde(default)]
    pub(crate) policy: Option<ToolPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct AgentSection {
    #[serde(default)]
    pub(crate) tools: Option<ToolPolicy>,
    #[serde(default)]
    pub(crate) by_provider: HashMap<String, ToolPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct GroupSection {
    #[serde(default)]
    pub(crate) tools: Option<ToolPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChannelConfig {
    #[serde(default = "default_true")]
    pub(crate) enabled: bool,
    #[serde(default)]
    pub(crate) kind: Option<String>,
    /// Connector-specific settings (tokens, endpoints). Never echoed back in
    /// status snapshots.
    #[serde(default, flatten)]
    pub(crate) extra: HashMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct MemorySection {
    #[serde(default)]
    pub(crate) db: Option<PathBuf>,
}

/// External control command for the browser/canvas tools. The gateway pipes
/// `{call_id, tool, action, args}` JSON to its stdin.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct ControlSection {
    #[serde(default)]
    pub(crate) command: Option<Vec<String>>,
    #[serde(default)]
    pub(crate) timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct PluginsSection {
    #[serde(default)]
    pub(crate) tools: Vec<PluginToolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PluginToolConfig {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    pub(crate) command: Vec<String>,
    #[serde(default)]
    pub(crate) elevated: bool,
    #[serde(default)]
    pub(crate) dangerous: bool,
    #[serde(default)]
    pub(crate) timeout_ms: Option<u64>,
}

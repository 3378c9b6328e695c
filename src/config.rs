use std::path::{Path, PathBuf};

use crate::{GatewayFileConfig, is_known_channel_kind, resolve_tool_profile_policy};

const DEFAULT_CONFIG_PATH: &str = "./nexusgate.json";
const KNOWN_PROFILES: &[&str] = &["full", "minimal", "messaging", "coding"];

pub(crate) fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// Load and parse the gateway config. Malformed JSON and malformed policy
/// nodes are hard errors; a missing file is too, so a typo'd path cannot
/// silently run with defaults.
pub(crate) fn load_gateway_config(path: &Path) -> Result<GatewayFileConfig, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("read config {}: {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| format!("parse config {}: {e}", path.display()))
}

/// Non-fatal sanity checks, surfaced as warnings for `check-config` and at
/// startup.
pub(crate) fn validate_gateway_config(cfg: &GatewayFileConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if cfg.gateway.auth.token.is_none() && cfg.gateway.auth.password.is_none() {
        warnings.push(
            "no gateway.auth.token or gateway.auth.password configured; every request will be denied"
                .to_string(),
        );
    }

    if let Some(profile) = cfg.tools.profile.as_deref() {
        if !KNOWN_PROFILES.contains(&profile) {
            warnings.push(format!("unknown tools.profile '{profile}'"));
        }
    }
    for (channel, section) in &cfg.tools.by_provider {
        if let Some(profile) = section.profile.as_deref() {
            if !KNOWN_PROFILES.contains(&profile) {
                warnings.push(format!(
                    "unknown tools.by_provider.{channel}.profile '{profile}'"
                ));
            }
        }
    }

    for (id, channel) in &cfg.channels {
        let kind = channel.kind.as_deref().unwrap_or(id.as_str());
        if !is_known_channel_kind(kind) {
            warnings.push(format!("channel '{id}' has unknown kind '{kind}'"));
        }
    }

    for key in cfg.groups.keys() {
        if !key.contains(':') {
            warnings.push(format!(
                "group key '{key}' is not of the form <channel>:<account-id>"
            ));
        }
    }

    warnings
}

/// Human-readable summary for the `check-config` command.
pub(crate) fn config_summary(cfg: &GatewayFileConfig) -> String {
    let profile = cfg.tools.profile.as_deref().unwrap_or("(none)");
    let profile_tools = cfg
        .tools
        .profile
        .as_deref()
        .and_then(resolve_tool_profile_policy)
        .and_then(|p| p.allow)
        .map(|allow| allow.join(", "))
        .unwrap_or_else(|| "unrestricted".to_string());
    format!(
        "profile: {profile} ({profile_tools})\n\
         agents: {}\n\
         groups: {}\n\
         channels: {}\n\
         plugin tools: {}\n\
         auth: {}\n\
         rate limit: {} failures / {}ms window, {}ms lockout (read at startup; restart after changes)",
        cfg.agents.len(),
        cfg.groups.len(),
        cfg.channels.len(),
        cfg.plugins.tools.len(),
        if cfg.gateway.auth.token.is_some() {
            "token"
        } else if cfg.gateway.auth.password.is_some() {
            "password"
        } else {
            "NONE"
        },
        cfg.gateway.rate_limit.max_failures,
        cfg.gateway.rate_limit.window_ms,
        cfg.gateway.rate_limit.lockout_ms,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> GatewayFileConfig {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = load_gateway_config(Path::new("/nonexistent/nexusgate.json")).unwrap_err();
        assert!(err.contains("read config"));
    }

    #[test]
    fn missing_secret_warns() {
        let warnings = validate_gateway_config(&GatewayFileConfig::default());
        assert!(warnings.iter().any(|w| w.contains("denied")));
    }

    #[test]
    fn unknown_profile_and_kind_warn() {
        let cfg = parse(
            r#"{
                "gateway": {"auth": {"token": "t"}},
                "tools": {"profile": "turbo"},
                "channels": {"pager": {"kind": "pagerduty"}}
            }"#,
        );
        let warnings = validate_gateway_config(&cfg);
        assert!(warnings.iter().any(|w| w.contains("turbo")));
        assert!(warnings.iter().any(|w| w.contains("pagerduty")));
    }

    #[test]
    fn malformed_group_key_warns() {
        let cfg = parse(
            r#"{
                "gateway": {"auth": {"token": "t"}},
                "groups": {"team42": {}}
            }"#,
        );
        let warnings = validate_gateway_config(&cfg);
        assert!(warnings.iter().any(|w| w.contains("team42")));
    }

    #[test]
    fn clean_config_produces_no_warnings() {
        let cfg = parse(
            r#"{
                "gateway": {"auth": {"token": "t"}},
                "tools": {"profile": "minimal"},
                "groups": {"telegram:team-42": {}},
                "channels": {"telegram": {}}
            }"#,
        );
        assert!(validate_gateway_config(&cfg).is_empty());
        let summary = config_summary(&cfg);
        assert!(summary.contains("minimal"));
        assert!(summary.contains("token"));
        assert!(summary.contains("restart after changes"));
    }
}

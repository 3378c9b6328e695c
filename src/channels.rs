use serde_json::{Value, json};

use crate::{GatewayFileConfig, log_warn, now_ms};

pub(crate) const KNOWN_CHANNEL_KINDS: &[&str] = &[
    "telegram", "whatsapp", "slack", "discord", "teams", "signal", "matrix", "imessage", "webhook",
];

/// Normalize a channel hint from a request header: trimmed, lowercased,
/// empty collapses to none.
pub(crate) fn normalize_message_channel(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim().to_lowercase();
    (!value.is_empty()).then_some(value)
}

pub(crate) fn is_known_channel_kind(kind: &str) -> bool {
    KNOWN_CHANNEL_KINDS.contains(&kind)
}

/// Status view of configured channels. Reports presence and shape only;
/// connector settings hold secrets and are never echoed.
pub(crate) fn channels_status_snapshot(cfg: &GatewayFileConfig) -> Value {
    let mut channels = serde_json::Map::new();
    for (id, channel) in &cfg.channels {
        let kind = channel.kind.clone().unwrap_or_else(|| id.clone());
        if !is_known_channel_kind(&kind) {
            log_warn("channels", &format!("unknown channel kind: {kind}"));
        }
        channels.insert(
            id.clone(),
            json!({
                "enabled": channel.enabled,
                "kind": kind,
                "configured": !channel.extra.is_empty(),
            }),
        );
    }
    json!({
        "channels": channels,
        "generated_at": now_ms(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelConfig;
    use std::collections::HashMap;

    #[test]
    fn channel_hint_is_normalized() {
        assert_eq!(
            normalize_message_channel(Some("  Telegram ")),
            Some("telegram".to_string())
        );
        assert_eq!(normalize_message_channel(Some("   ")), None);
        assert_eq!(normalize_message_channel(None), None);
    }

    #[test]
    fn snapshot_lists_channels_without_secrets() {
        let mut cfg = GatewayFileConfig::default();
        let mut extra = HashMap::new();
        extra.insert("bot_token".to_string(), json!("hunter2"));
        cfg.channels.insert(
            "telegram".to_string(),
            ChannelConfig {
                enabled: true,
                kind: None,
                extra,
            },
        );
        cfg.channels.insert(
            "ops-slack".to_string(),
            ChannelConfig {
                enabled: false,
                kind: Some("slack".to_string()),
                extra: HashMap::new(),
            },
        );

        let snapshot = channels_status_snapshot(&cfg);
        let telegram = &snapshot["channels"]["telegram"];
        assert_eq!(telegram["enabled"], true);
        assert_eq!(telegram["kind"], "telegram");
        assert_eq!(telegram["configured"], true);
        assert!(!snapshot["channels"]["telegram"].to_string().contains("hunter2"));

        let slack = &snapshot["channels"]["ops-slack"];
        assert_eq!(slack["enabled"], false);
        assert_eq!(slack["kind"], "slack");
        assert_eq!(slack["configured"], false);

        assert!(snapshot["generated_at"].as_u64().unwrap() > 0);
    }
}

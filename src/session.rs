use crate::log_warn;

/// Scope a session key resolves to. Controls which policy layers apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionScope {
    Main,
    Subagent,
    NamedAgent(String),
}

impl SessionScope {
    pub(crate) fn agent_id(&self) -> &str {
        match self {
            SessionScope::NamedAgent(id) => id,
            _ => "main",
        }
    }
}

/// Classify an opaque session key. Total over all inputs: malformed keys
/// degrade to the main scope rather than failing the request.
///
/// Recognized grammar, checked in order:
/// - empty or "main"                -> Main
/// - any `subagent` path segment    -> Subagent
/// - `agent:<id>:<name>`            -> NamedAgent(id)
pub(crate) fn classify_session_key(raw: &str) -> SessionScope {
    let key = raw.trim();
    if key.is_empty() || key == "main" {
        return SessionScope::Main;
    }

    let segments: Vec<&str> = key.split(':').collect();
    if segments.iter().any(|s| *s == "subagent") {
        return SessionScope::Subagent;
    }
    if segments.len() >= 3 && segments[0] == "agent" && !segments[1].trim().is_empty() {
        return SessionScope::NamedAgent(segments[1].trim().to_string());
    }

    // Structured-looking keys that match no grammar are worth surfacing, but
    // availability wins over strictness here.
    if key.contains(':') {
        log_warn("session", &format!("unrecognized session key shape: {key}"));
    }
    SessionScope::Main
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_and_empty_are_main_scope() {
        assert_eq!(classify_session_key("main"), SessionScope::Main);
        assert_eq!(classify_session_key(""), SessionScope::Main);
        assert_eq!(classify_session_key("   "), SessionScope::Main);
        assert_eq!(classify_session_key("  main  "), SessionScope::Main);
    }

    #[test]
    fn agent_keys_resolve_to_named_scope() {
        assert_eq!(
            classify_session_key("agent:work:Work"),
            SessionScope::NamedAgent("work".to_string())
        );
        assert_eq!(
            classify_session_key("agent:ops:Ops Bot:extra"),
            SessionScope::NamedAgent("ops".to_string())
        );
    }

    #[test]
    fn subagent_marker_wins_over_agent_grammar() {
        assert_eq!(
            classify_session_key("agent:work:subagent:1f2e"),
            SessionScope::Subagent
        );
        assert_eq!(
            classify_session_key("subagent:1f2e"),
            SessionScope::Subagent
        );
    }

    #[test]
    fn malformed_keys_degrade_to_main() {
        assert_eq!(classify_session_key("agent::"), SessionScope::Main);
        assert_eq!(classify_session_key("agent:"), SessionScope::Main);
        assert_eq!(classify_session_key("telegram:12345"), SessionScope::Main);
        assert_eq!(classify_session_key("whatever"), SessionScope::Main);
    }
}

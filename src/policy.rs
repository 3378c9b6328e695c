use std::collections::HashSet;

use crate::{GatewayFileConfig, SessionScope, ToolPolicy, classify_session_key, log_warn};

/// Named origin of a policy layer, in pipeline order. Lower entries are
/// applied later and can only narrow what earlier entries allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PolicySource {
    Profile,
    ProviderProfile,
    Global,
    GlobalProvider,
    Agent,
    AgentProvider,
    Group,
    Subagent,
}

impl PolicySource {
    pub(crate) fn label(self) -> &'static str {
        match self {
            PolicySource::Profile => "profile tools.allow",
            PolicySource::ProviderProfile => "provider profile tools.allow",
            PolicySource::Global => "global tools.allow",
            PolicySource::GlobalProvider => "global provider tools.allow",
            PolicySource::Agent => "agent tools.allow",
            PolicySource::AgentProvider => "agent provider tools.allow",
            PolicySource::Group => "group tools.allow",
            PolicySource::Subagent => "subagent tools.allow",
        }
    }
}

/// The per-source policy layers that apply to one request. A `None` layer
/// means "no rule configured", which is distinct from an empty allow list
/// ("explicit deny-all").
#[derive(Debug, Clone, Default)]
pub(crate) struct ResolvedToolPolicy {
    pub(crate) agent_id: String,
    pub(crate) profile: Option<ToolPolicy>,
    pub(crate) provider_profile: Option<ToolPolicy>,
    pub(crate) global: Option<ToolPolicy>,
    pub(crate) global_provider: Option<ToolPolicy>,
    pub(crate) agent: Option<ToolPolicy>,
    pub(crate) agent_provider: Option<ToolPolicy>,
}

/// Map a profile name to its preset policy. Unknown names resolve to no
/// layer at all (and are logged) rather than an accidental deny-all.
pub(crate) fn resolve_tool_profile_policy(name: &str) -> Option<ToolPolicy> {
    let allow: Option<Vec<&str>> = match name {
        "full" => None,
        "minimal" => Some(vec!["memory_search", "memory_write"]),
        "messaging" => Some(vec!["memory_search", "memory_write", "canvas"]),
        "coding" => Some(vec![
            "exec",
            "memory_search",
            "memory_write",
            "memory_compact",
        ]),
        other => {
            log_warn("policy", &format!("unknown tool profile: {other}"));
            return None;
        }
    };
    Some(ToolPolicy {
        allow: allow.map(|names| names.into_iter().map(str::to_string).collect()),
        deny: Vec::new(),
        elevated: None,
    })
}

/// Merge an also-allow overlay into a profile policy. Extends a present
/// allow list; a `None` allow is already unrestricted, so the overlay is
/// ignored there.
pub(crate) fn merge_also_allow(
    policy: Option<ToolPolicy>,
    also_allow: &[String],
) -> Option<ToolPolicy> {
    let mut policy = policy?;
    if also_allow.is_empty() {
        return Some(policy);
    }
    if let Some(allow) = policy.allow.as_mut() {
        for name in also_allow {
            if !allow.iter().any(|existing| existing == name) {
                allow.push(name.clone());
            }
        }
    }
    Some(policy)
}

/// Build the profile/global/agent policy layers for a session. Group and
/// sub-agent layers are resolved separately because they depend on request
/// context beyond the session key.
pub(crate) fn resolve_effective_tool_policy(
    cfg: &GatewayFileConfig,
    session_key: &str,
    channel: Option<&str>,
) -> ResolvedToolPolicy {
    let scope = classify_session_key(session_key);
    let agent_id = scope.agent_id().to_string();

    let profile = cfg
        .tools
        .profile
        .as_deref()
        .and_then(resolve_tool_profile_policy);
    let profile = merge_also_allow(profile, &cfg.tools.also_allow);

    let provider_section = channel.and_then(|c| cfg.tools.by_provider.get(c));
    let provider_profile = provider_section
        .and_then(|s| s.profile.as_deref())
        .and_then(resolve_tool_profile_policy);
    let provider_profile = match provider_section {
        Some(section) => merge_also_allow(provider_profile, &section.also_allow),
        None => provider_profile,
    };

    let agent_section = cfg.agents.get(&agent_id);

    ResolvedToolPolicy {
        profile,
        provider_profile,
        global: cfg.tools.policy.clone(),
        global_provider: provider_section.and_then(|s| s.policy.clone()),
        agent: agent_section.and_then(|s| s.tools.clone()),
        agent_provider: agent_section
            .zip(channel)
            .and_then(|(s, c)| s.by_provider.get(c).cloned()),
        agent_id,
    }
}

/// Group policy scoped to channel + account. Absent either hint, no group
/// layer applies.
pub(crate) fn resolve_group_tool_policy(
    cfg: &GatewayFileConfig,
    channel: Option<&str>,
    account_id: Option<&str>,
) -> Option<ToolPolicy> {
    let channel = channel?;
    let account_id = account_id?;
    cfg.groups
        .get(&format!("{channel}:{account_id}"))
        .and_then(|g| g.tools.clone())
}

pub(crate) fn resolve_subagent_tool_policy(cfg: &GatewayFileConfig) -> Option<ToolPolicy> {
    cfg.tools.subagent.clone()
}

pub(crate) fn is_subagent_session_key(session_key: &str) -> bool {
    classify_session_key(session_key) == SessionScope::Subagent
}

/// Union of every explicit allow entry across the given layers. Plugin tools
/// named here are exempt from allow-list intersection in the pipeline; being
/// spelled out by an operator is what earns the exemption.
pub(crate) fn collect_explicit_allowlist(layers: &[Option<&ToolPolicy>]) -> HashSet<String> {
    let mut names = HashSet::new();
    for layer in layers.iter().flatten() {
        if let Some(allow) = &layer.allow {
            for name in allow {
                names.insert(name.clone());
            }
        }
    }
    names
}

use std::collections::HashSet;

use crate::{
    GatewayFileConfig, GatewaySection, PolicySource, ResolvedToolPolicy, ToolDescriptor,
    ToolPolicy, build_gateway_tools, collect_explicit_allowlist, is_subagent_session_key,
    log_warn, resolve_effective_tool_policy, resolve_group_tool_policy,
    resolve_subagent_tool_policy,
};

/// Tools removed from HTTP-exposed execution unless the operator opts back in
/// through `gateway.tools.allow`. These are the ones that reach the host OS.
pub(crate) const DEFAULT_GATEWAY_TOOL_DENY: &[&str] = &["exec", "browser"];

/// One step of the policy pipeline. A `None` policy is a configured-away
/// layer and must not affect the running set.
#[derive(Debug, Clone)]
pub(crate) struct PipelineStep {
    pub(crate) policy: Option<ToolPolicy>,
    pub(crate) label: &'static str,
}

/// Channel/identity context for elevated-tool gating. Both values come from
/// untrusted request hints and are only ever used to *narrow* access.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PolicyCallContext<'a> {
    pub(crate) channel: Option<&'a str>,
    pub(crate) account_id: Option<&'a str>,
}

/// Fixed step order: profile, provider profile, global, global provider,
/// agent, agent provider, group. Callers append the sub-agent step when the
/// session classifies as a sub-agent.
pub(crate) fn build_default_pipeline_steps(
    resolved: &ResolvedToolPolicy,
    group: Option<ToolPolicy>,
) -> Vec<PipelineStep> {
    vec![
        PipelineStep {
            policy: resolved.profile.clone(),
            label: PolicySource::Profile.label(),
        },
        PipelineStep {
            policy: resolved.provider_profile.clone(),
            label: PolicySource::ProviderProfile.label(),
        },
        PipelineStep {
            policy: resolved.global.clone(),
            label: PolicySource::Global.label(),
        },
        PipelineStep {
            policy: resolved.global_provider.clone(),
            label: PolicySource::GlobalProvider.label(),
        },
        PipelineStep {
            policy: resolved.agent.clone(),
            label: PolicySource::Agent.label(),
        },
        PipelineStep {
            policy: resolved.agent_provider.clone(),
            label: PolicySource::AgentProvider.label(),
        },
        PipelineStep {
            policy: group,
            label: PolicySource::Group.label(),
        },
    ]
}

fn elevated_permitted(steps: &[PipelineStep], ctx: &PolicyCallContext) -> bool {
    let (Some(channel), Some(account_id)) = (ctx.channel, ctx.account_id) else {
        return false;
    };
    steps.iter().any(|step| {
        step.policy
            .as_ref()
            .and_then(|p| p.elevated.as_ref())
            .is_some_and(|e| {
                e.enabled
                    && e.allow_from
                        .get(channel)
                        .is_some_and(|ids| ids.iter().any(|id| id == account_id))
            })
    })
}

/// Apply ordered policy steps to the candidate tool list. Each step can only
/// narrow the running set: allow lists intersect (policy-exempt tools
/// survive), then deny names are subtracted — deny wins over allow within
/// the same step. Elevated tools additionally require some layer to grant
/// the calling channel/identity, or they are removed outright.
pub(crate) fn apply_tool_policy_pipeline(
    tools: Vec<ToolDescriptor>,
    steps: &[PipelineStep],
    ctx: &PolicyCallContext,
) -> Vec<ToolDescriptor> {
    let mut running = tools;
    for step in steps {
        let Some(policy) = &step.policy else {
            continue;
        };
        if let Some(allow) = &policy.allow {
            let before = running.len();
            running.retain(|tool| {
                tool.meta.policy_exempt || allow.iter().any(|name| name == &tool.name)
            });
            if before > 0 && running.is_empty() {
                log_warn(
                    "policy",
                    &format!("step '{}' removed every remaining tool", step.label),
                );
            }
        }
        if !policy.deny.is_empty() {
            running.retain(|tool| !policy.deny.iter().any(|name| name == &tool.name));
        }
    }

    if !elevated_permitted(steps, ctx) {
        running.retain(|tool| !tool.meta.elevated);
    }
    running
}

/// Effective HTTP-gateway deny set: built-in defaults minus the operator
/// override allowlist, plus any operator-configured deny names. The override
/// rescues defaults only; operator denies are final.
pub(crate) fn effective_gateway_deny(gateway: &GatewaySection) -> HashSet<String> {
    let mut deny: HashSet<String> = DEFAULT_GATEWAY_TOOL_DENY
        .iter()
        .filter(|name| !gateway.tools.allow.iter().any(|a| a == *name))
        .map(|name| name.to_string())
        .collect();
    deny.extend(gateway.tools.deny.iter().cloned());
    deny
}

/// Final, policy-independent subtraction applied after every pipeline step.
pub(crate) fn apply_gateway_deny(
    tools: Vec<ToolDescriptor>,
    gateway: &GatewaySection,
) -> Vec<ToolDescriptor> {
    let deny = effective_gateway_deny(gateway);
    tools
        .into_iter()
        .filter(|tool| !deny.contains(&tool.name))
        .collect()
}

/// Full filtering path shared by the HTTP dispatcher and the `tools` CLI
/// command: resolve layers, run the pipeline, subtract the gateway deny set.
pub(crate) fn filter_tools_for_session(
    cfg: &GatewayFileConfig,
    session_key: &str,
    ctx: &PolicyCallContext,
) -> Vec<ToolDescriptor> {
    let resolved = resolve_effective_tool_policy(cfg, session_key, ctx.channel);
    let group = resolve_group_tool_policy(cfg, ctx.channel, ctx.account_id);
    let subagent = if is_subagent_session_key(session_key) {
        resolve_subagent_tool_policy(cfg)
    } else {
        None
    };

    let allowlist = collect_explicit_allowlist(&[
        resolved.profile.as_ref(),
        resolved.provider_profile.as_ref(),
        resolved.global.as_ref(),
        resolved.global_provider.as_ref(),
        resolved.agent.as_ref(),
        resolved.agent_provider.as_ref(),
        group.as_ref(),
        subagent.as_ref(),
    ]);

    let tools = build_gateway_tools(cfg, &allowlist);
    let mut steps = build_default_pipeline_steps(&resolved, group);
    if let Some(policy) = subagent {
        steps.push(PipelineStep {
            policy: Some(policy),
            label: PolicySource::Subagent.label(),
        });
    }

    let filtered = apply_tool_policy_pipeline(tools, &steps, ctx);
    apply_gateway_deny(filtered, &cfg.gateway)
}

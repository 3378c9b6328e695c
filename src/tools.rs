use std::collections::HashSet;
use std::path::PathBuf;

use serde_json::{Value, json};

use crate::{
    ControlSection, GatewayFileConfig, MemoryStore, PluginToolConfig, run_captured_command,
    subprocess_output_text,
};

const DEFAULT_EXEC_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_CONTROL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Policy-relevant attributes of a tool. All default to off; a tool earns
/// flags from its definition, never from request input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ToolMeta {
    pub(crate) elevated: bool,
    pub(crate) dangerous: bool,
    pub(crate) plugin_owned: bool,
    pub(crate) policy_exempt: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum ToolKind {
    Exec,
    MemoryWrite,
    MemorySearch,
    MemoryCompact,
    Browser,
    Canvas,
    Plugin(PluginToolConfig),
}

#[derive(Debug, Clone)]
pub(crate) struct ToolDescriptor {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) meta: ToolMeta,
    pub(crate) kind: ToolKind,
}

impl ToolDescriptor {
    fn builtin(name: &str, description: &str, kind: ToolKind, dangerous: bool) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            meta: ToolMeta {
                dangerous,
                ..ToolMeta::default()
            },
            kind,
        }
    }

    #[cfg(test)]
    pub(crate) fn plain_for_tests(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: String::new(),
            meta: ToolMeta::default(),
            kind: ToolKind::MemorySearch,
        }
    }
}

/// Candidate tool list before any policy filtering: the fixed built-ins plus
/// configured plugin tools. Plugin tools explicitly named in some layer's
/// allow list are marked policy-exempt so allow intersection does not drop
/// them; deny and elevated gating still apply.
pub(crate) fn build_gateway_tools(
    cfg: &GatewayFileConfig,
    explicit_allowlist: &HashSet<String>,
) -> Vec<ToolDescriptor> {
    let mut tools = vec![
        ToolDescriptor::builtin(
            "exec",
            "Run a shell command on the gateway host",
            ToolKind::Exec,
            true,
        ),
        ToolDescriptor::builtin(
            "memory_write",
            "Store a note in persistent memory",
            ToolKind::MemoryWrite,
            false,
        ),
        ToolDescriptor::builtin(
            "memory_search",
            "Search persistent memory",
            ToolKind::MemorySearch,
            false,
        ),
        ToolDescriptor::builtin(
            "memory_compact",
            "Deduplicate and expire memory entries",
            ToolKind::MemoryCompact,
            false,
        ),
        ToolDescriptor::builtin(
            "browser",
            "Drive the configured browser controller",
            ToolKind::Browser,
            true,
        ),
        ToolDescriptor::builtin(
            "canvas",
            "Drive the configured canvas controller",
            ToolKind::Canvas,
            false,
        ),
    ];

    for plugin in &cfg.plugins.tools {
        tools.push(ToolDescriptor {
            name: plugin.name.clone(),
            description: plugin
                .description
                .clone()
                .unwrap_or_else(|| "Plugin tool".to_string()),
            meta: ToolMeta {
                elevated: plugin.elevated,
                dangerous: plugin.dangerous,
                plugin_owned: true,
                policy_exempt: explicit_allowlist.contains(&plugin.name),
            },
            kind: ToolKind::Plugin(plugin.clone()),
        });
    }
    tools
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn arg_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

fn run_exec(args: &Value) -> Result<Value, String> {
    let command_line = arg_str(args, "command")
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| "exec requires a non-empty 'command' argument".to_string())?;
    let command =
        shlex::split(command_line).ok_or_else(|| "could not parse command line".to_string())?;
    if command.is_empty() {
        return Err("could not parse command line".to_string());
    }
    let cwd = arg_str(args, "cwd").map(PathBuf::from);
    let timeout_ms = arg_u64(args, "timeout_ms").unwrap_or(DEFAULT_EXEC_TIMEOUT_MS);

    let capture = run_captured_command(&command, cwd.as_deref(), None, timeout_ms)?;
    let is_error = !capture.success;
    Ok(json!({
        "output": subprocess_output_text(&capture.stdout, &capture.stderr, is_error),
        "exit_code": capture.exit,
        "is_error": is_error,
        "timed_out": capture.timed_out,
    }))
}

/// Pipe a `{call_id, tool, action, args}` envelope to an external controller
/// command and return its stdout parsed as JSON, or raw text when it is not
/// JSON.
fn run_control_command(
    tool: &str,
    control: &ControlSection,
    call_id: &str,
    args: &Value,
) -> Result<Value, String> {
    let command = control
        .command
        .as_ref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| format!("{tool} controller is not configured"))?;
    let action = arg_str(args, "action").unwrap_or("default");
    let payload = json!({
        "call_id": call_id,
        "tool": tool,
        "action": action,
        "args": args,
    });
    let timeout_ms = control.timeout_ms.unwrap_or(DEFAULT_CONTROL_TIMEOUT_MS);

    let capture = run_captured_command(command, None, Some(&payload), timeout_ms)?;
    if !capture.success {
        return Err(format!(
            "{tool} controller failed: {}",
            subprocess_output_text(&capture.stdout, &capture.stderr, true)
        ));
    }
    match serde_json::from_str::<Value>(capture.stdout.trim()) {
        Ok(value) => Ok(value),
        Err(_) => Ok(json!({ "output": capture.stdout })),
    }
}

fn run_plugin(plugin: &PluginToolConfig, call_id: &str, args: &Value) -> Result<Value, String> {
    if plugin.command.is_empty() {
        return Err(format!("plugin tool '{}' has no command", plugin.name));
    }
    let payload = json!({
        "call_id": call_id,
        "tool": plugin.name,
        "args": args,
    });
    let timeout_ms = plugin.timeout_ms.unwrap_or(DEFAULT_CONTROL_TIMEOUT_MS);

    let capture = run_captured_command(&plugin.command, None, Some(&payload), timeout_ms)?;
    if !capture.success {
        return Err(format!(
            "plugin '{}' failed: {}",
            plugin.name,
            subprocess_output_text(&capture.stdout, &capture.stderr, true)
        ));
    }
    match serde_json::from_str::<Value>(capture.stdout.trim()) {
        Ok(value) => Ok(value),
        Err(_) => Ok(json!({ "output": capture.stdout })),
    }
}

fn run_memory_write(cfg: &GatewayFileConfig, session: &str, args: &Value) -> Result<Value, String> {
    let text = arg_str(args, "text")
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| "memory_write requires a non-empty 'text' argument".to_string())?;
    let tags: Vec<String> = args
        .get("tags")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let store = MemoryStore::open_from_config(cfg)?;
    let id = store.write(Some(session), text, &tags)?;
    Ok(json!({ "id": id }))
}

fn run_memory_search(cfg: &GatewayFileConfig, args: &Value) -> Result<Value, String> {
    let query = arg_str(args, "query")
        .ok_or_else(|| "memory_search requires a 'query' argument".to_string())?;
    let limit = arg_u64(args, "limit")
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_SEARCH_LIMIT);
    let store = MemoryStore::open_from_config(cfg)?;
    let results = store.search(query, limit)?;
    Ok(json!({ "results": results }))
}

fn run_memory_compact(cfg: &GatewayFileConfig, args: &Value) -> Result<Value, String> {
    let max_age_ms = arg_u64(args, "max_age_ms");
    let store = MemoryStore::open_from_config(cfg)?;
    store.compact(max_age_ms)
}

/// Execute a tool that already passed policy filtering. Errors here are
/// operational (bad arguments, missing controller, subprocess failure) and
/// map to the caller's tool-error response.
pub(crate) fn execute_tool(
    tool: &ToolDescriptor,
    call_id: &str,
    session_key: &str,
    args: &Value,
    cfg: &GatewayFileConfig,
) -> Result<Value, String> {
    match &tool.kind {
        ToolKind::Exec => run_exec(args),
        ToolKind::MemoryWrite => run_memory_write(cfg, session_key, args),
        ToolKind::MemorySearch => run_memory_search(cfg, args),
        ToolKind::MemoryCompact => run_memory_compact(cfg, args),
        ToolKind::Browser => run_control_command("browser", &cfg.browser, call_id, args),
        ToolKind::Canvas => run_control_command("canvas", &cfg.canvas, call_id, args),
        ToolKind::Plugin(plugin) => run_plugin(plugin, call_id, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin_cfg(names: &[&str]) -> GatewayFileConfig {
        let mut cfg = GatewayFileConfig::default();
        for name in names {
            cfg.plugins.tools.push(PluginToolConfig {
                name: name.to_string(),
                description: None,
                command: vec!["true".to_string()],
                elevated: false,
                dangerous: false,
                timeout_ms: None,
            });
        }
        cfg
    }

    #[test]
    fn builtins_always_present_in_candidate_list() {
        let tools = build_gateway_tools(&GatewayFileConfig::default(), &HashSet::new());
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        for expected in [
            "exec",
            "memory_write",
            "memory_search",
            "memory_compact",
            "browser",
            "canvas",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn plugins_marked_exempt_only_when_explicitly_allowed() {
        let cfg = plugin_cfg(&["weather", "jira"]);
        let allowlist: HashSet<String> = ["weather".to_string()].into_iter().collect();
        let tools = build_gateway_tools(&cfg, &allowlist);

        let weather = tools.iter().find(|t| t.name == "weather").unwrap();
        assert!(weather.meta.plugin_owned);
        assert!(weather.meta.policy_exempt);

        let jira = tools.iter().find(|t| t.name == "jira").unwrap();
        assert!(jira.meta.plugin_owned);
        assert!(!jira.meta.policy_exempt);
    }

    #[test]
    fn exec_rejects_missing_command() {
        let err = run_exec(&json!({})).unwrap_err();
        assert!(err.contains("command"));
        let err = run_exec(&json!({ "command": "   " })).unwrap_err();
        assert!(err.contains("command"));
    }

    #[test]
    #[cfg(unix)]
    fn exec_captures_output_and_exit() {
        let result = run_exec(&json!({ "command": "echo hi" })).unwrap();
        assert_eq!(result["is_error"], false);
        assert_eq!(result["timed_out"], false);
        assert!(result["output"].as_str().unwrap().contains("hi"));
        assert_eq!(result["exit_code"], 0);
    }

    #[test]
    #[cfg(unix)]
    fn exec_reports_nonzero_exit_as_error() {
        let result = run_exec(&json!({ "command": "sh -c 'exit 3'" })).unwrap();
        assert_eq!(result["is_error"], true);
        assert_eq!(result["exit_code"], 3);
    }

    #[test]
    fn unconfigured_controller_is_an_error() {
        let control = ControlSection::default();
        let err = run_control_command("browser", &control, "c1", &json!({})).unwrap_err();
        assert!(err.contains("not configured"));
    }

    #[test]
    #[cfg(unix)]
    fn controller_stdout_passed_through_as_json() {
        let control = ControlSection {
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat >/dev/null; echo '{\"status\":\"ok\"}'".to_string(),
            ]),
            timeout_ms: None,
        };
        let result =
            run_control_command("canvas", &control, "c1", &json!({ "action": "render" })).unwrap();
        assert_eq!(result["status"], "ok");
    }
}

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use serde_json::{Value, json};
use tiny_http::{Header, Method, Request, Response, Server};

use crate::{
    AuthOutcome, AuthRateLimiter, AuthRequestContext, GatewayFileConfig, PolicyCallContext,
    authorize_gateway, channels_status_snapshot, execute_tool, filter_tools_for_session,
    load_gateway_config, log_info, log_warn, now_ms, normalize_message_channel,
    parse_authorization, read_body_capped, validate_gateway_config,
};

const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Shared per-process state. The config file is re-read on every request so
/// edits take effect without a restart; the rate limiter must survive across
/// requests and so lives here.
pub(crate) struct GatewayRuntime {
    pub(crate) config_path: PathBuf,
    pub(crate) limiter: Arc<AuthRateLimiter>,
}

pub(crate) fn run_gateway(bind: &str, port: u16, config_path: PathBuf) -> Result<(), String> {
    let cfg = load_gateway_config(&config_path)?;
    for warning in validate_gateway_config(&cfg) {
        log_warn("gateway", &warning);
    }

    let runtime = Arc::new(GatewayRuntime {
        config_path,
        limiter: Arc::new(AuthRateLimiter::new(cfg.gateway.rate_limit.clone())),
    });
    let server =
        Server::http(format!("{bind}:{port}")).map_err(|e| format!("bind {bind}:{port}: {e}"))?;
    log_info("gateway", &format!("listening on http://{bind}:{port}"));
    serve(server, runtime);
    Ok(())
}

/// Accept loop, one handler thread per request. Requests are independent and
/// short-lived; the limiter is the only cross-request state.
pub(crate) fn serve(server: Server, runtime: Arc<GatewayRuntime>) {
    for mut request in server.incoming_requests() {
        let runtime = Arc::clone(&runtime);
        thread::spawn(move || {
            let response = handle_request(&mut request, &runtime);
            if let Err(err) = request.respond(response) {
                log_warn("gateway", &format!("respond failed: {err}"));
            }
        });
    }
}

type JsonResponse = Response<Cursor<Vec<u8>>>;

fn json_response(status: u16, value: &Value) -> JsonResponse {
    let mut response = Response::from_string(value.to_string()).with_status_code(status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response = response.with_header(header);
    }
    response
}

fn error_response(status: u16, error_type: &str, message: &str) -> JsonResponse {
    json_response(
        status,
        &json!({ "ok": false, "error": { "type": error_type, "message": message } }),
    )
}

fn header_value<'a>(request: &'a Request, name: &'static str) -> Option<&'a str> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str())
}

fn route_tool(path: &str) -> Option<&'static str> {
    match path {
        "/core/exec" => Some("exec"),
        "/core/memory/write" => Some("memory_write"),
        "/core/memory/search" => Some("memory_search"),
        "/core/memory/compact" => Some("memory_compact"),
        "/core/browser" => Some("browser"),
        "/core/canvas" => Some("canvas"),
        _ => None,
    }
}

fn handle_request(request: &mut Request, runtime: &GatewayRuntime) -> JsonResponse {
    let path = request.url().split('?').next().unwrap_or("").to_string();
    let is_status = path == "/core/channels/status";
    let tool_name = route_tool(&path);
    if !is_status && tool_name.is_none() {
        return error_response(400, "invalid_request", "unknown endpoint");
    }
    if request.method() != &Method::Post {
        return error_response(405, "invalid_request", "POST required");
    }

    let cfg = match load_gateway_config(&runtime.config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            log_warn("gateway", &format!("config load failed: {err}"));
            return error_response(500, "tool_error", "gateway config load failed");
        }
    };

    // Body is size-checked and read before credentials are looked at, so an
    // oversized payload cannot tie up the authorizer.
    let max_body = cfg.gateway.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    if request.body_length().is_some_and(|len| len > max_body) {
        return error_response(400, "invalid_request", "request body too large");
    }
    let body = match read_body_capped(request.as_reader(), max_body) {
        Ok(body) => body,
        Err(err) => return error_response(400, "invalid_request", &err),
    };

    let credential = parse_authorization(header_value(request, "authorization"));
    let forwarded_for = header_value(request, "x-forwarded-for").map(str::to_string);
    let auth_ctx = AuthRequestContext {
        credential,
        remote_addr: request.remote_addr().map(|addr| addr.ip()),
        forwarded_for: forwarded_for.as_deref(),
        trusted_proxies: &cfg.gateway.trusted_proxies,
        allow_real_ip_fallback: cfg.gateway.allow_real_ip_fallback,
    };
    match authorize_gateway(&auth_ctx, &cfg.gateway.auth, &runtime.limiter) {
        AuthOutcome::Authorized { .. } => {}
        AuthOutcome::Unauthorized => {
            return error_response(401, "unauthorized", "invalid credentials");
        }
        AuthOutcome::RateLimited { retry_after_ms } => {
            let mut response =
                error_response(429, "rate_limited", "too many failed attempts");
            let seconds = retry_after_ms.div_ceil(1000).max(1);
            if let Ok(header) =
                Header::from_bytes(&b"Retry-After"[..], seconds.to_string().into_bytes())
            {
                response = response.with_header(header);
            }
            return response;
        }
    }

    if is_status {
        return json_response(
            200,
            &json!({ "ok": true, "result": channels_status_snapshot(&cfg) }),
        );
    }

    let payload: Value = if body.trim().is_empty() {
        json!({})
    } else {
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(_) => return error_response(400, "invalid_request", "body is not valid JSON"),
        }
    };
    let Some(tool_name) = tool_name else {
        return error_response(400, "invalid_request", "unknown endpoint");
    };
    dispatch_tool(&cfg, request, tool_name, &payload)
}

/// Resolve the session's visible tool set and run the requested tool. A tool
/// the policy filtered out answers exactly like one that does not exist.
fn dispatch_tool(
    cfg: &GatewayFileConfig,
    request: &Request,
    tool_name: &str,
    payload: &Value,
) -> JsonResponse {
    let mut args = payload
        .get("args")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if let Some(action) = payload.get("action").and_then(Value::as_str) {
        args.insert("action".to_string(), json!(action));
    }
    let session_key = payload
        .get("sessionKey")
        .and_then(Value::as_str)
        .or_else(|| args.get("sessionKey").and_then(Value::as_str))
        .unwrap_or("main")
        .to_string();

    let channel = normalize_message_channel(header_value(request, "x-nexusgate-message-channel"));
    let account = header_value(request, "x-nexusgate-account-id")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let ctx = PolicyCallContext {
        channel: channel.as_deref(),
        account_id: account.as_deref(),
    };

    let tools = filter_tools_for_session(cfg, &session_key, &ctx);
    let Some(tool) = tools.iter().find(|t| t.name == tool_name) else {
        return error_response(404, "not_found", &format!("Tool not available: {tool_name}"));
    };

    let call_id = format!("core-http-{}", now_ms());
    match execute_tool(tool, &call_id, &session_key, &Value::Object(args), cfg) {
        Ok(result) => json_response(200, &json!({ "ok": true, "result": result })),
        Err(err) => {
            log_warn("gateway", &format!("tool {tool_name} failed: {err}"));
            error_response(500, "tool_error", &err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static CONFIG_SEQ: AtomicU64 = AtomicU64::new(0);

    fn start_gateway(cfg_json: &str) -> String {
        let path = std::env::temp_dir().join(format!(
            "nexusgate-test-{}-{}.json",
            std::process::id(),
            CONFIG_SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::write(&path, cfg_json).unwrap();
        let cfg: GatewayFileConfig = serde_json::from_str(cfg_json).unwrap();

        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let runtime = Arc::new(GatewayRuntime {
            config_path: path,
            limiter: Arc::new(AuthRateLimiter::new(cfg.gateway.rate_limit.clone())),
        });
        thread::spawn(move || serve(server, runtime));
        format!("http://{addr}")
    }

    fn post(base: &str, path: &str, token: &str, body: Value) -> Result<ureq::Response, ureq::Error> {
        ureq::post(&format!("{base}{path}"))
            .set("Authorization", &format!("Bearer {token}"))
            .send_json(body)
    }

    fn status_of(result: Result<ureq::Response, ureq::Error>) -> u16 {
        match result {
            Ok(resp) => resp.status(),
            Err(ureq::Error::Status(code, _)) => code,
            Err(other) => panic!("transport error: {other}"),
        }
    }

    const BASE_CONFIG: &str = r#"{
        "gateway": {
            "auth": {"token": "secret"},
            "tools": {"allow": ["exec"]}
        },
        "agents": {
            "work": {"tools": {"deny": ["exec"]}}
        },
        "channels": {
            "telegram": {"bot_token": "tg-token"},
            "ops-slack": {"kind": "slack", "enabled": false}
        }
    }"#;

    #[test]
    fn wrong_token_is_unauthorized() {
        let base = start_gateway(BASE_CONFIG);
        let result = post(&base, "/core/channels/status", "nope", json!({}));
        assert_eq!(status_of(result), 401);
    }

    #[test]
    fn unknown_endpoint_is_invalid_request() {
        let base = start_gateway(BASE_CONFIG);
        let result = post(&base, "/core/nope", "secret", json!({}));
        match result {
            Err(ureq::Error::Status(400, resp)) => {
                let body: Value = resp.into_json().unwrap();
                assert_eq!(body["ok"], false);
                assert_eq!(body["error"]["type"], "invalid_request");
            }
            other => panic!("expected 400, got {:?}", status_of(other)),
        }
    }

    #[test]
    fn header_names_match_case_insensitively() {
        let base = start_gateway(BASE_CONFIG);
        let resp = ureq::post(&format!("{base}/core/channels/status"))
            .set("AUTHORIZATION", "Bearer secret")
            .send_json(json!({}))
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[test]
    fn get_method_is_rejected() {
        let base = start_gateway(BASE_CONFIG);
        let result = ureq::get(&format!("{base}/core/exec"))
            .set("Authorization", "Bearer secret")
            .call();
        assert_eq!(status_of(result), 405);
    }

    #[test]
    #[cfg(unix)]
    fn exec_runs_for_unrestricted_session() {
        let base = start_gateway(BASE_CONFIG);
        let resp = post(
            &base,
            "/core/exec",
            "secret",
            json!({ "sessionKey": "main", "args": { "command": "echo hi" } }),
        )
        .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.into_json().unwrap();
        assert_eq!(body["ok"], true);
        assert!(body["result"]["output"].as_str().unwrap().contains("hi"));
    }

    #[test]
    fn policy_denied_tool_reads_as_missing() {
        let base = start_gateway(BASE_CONFIG);
        let result = post(
            &base,
            "/core/exec",
            "secret",
            json!({ "sessionKey": "agent:work:Work", "args": { "command": "echo hi" } }),
        );
        match result {
            Err(ureq::Error::Status(404, resp)) => {
                let body: Value = resp.into_json().unwrap();
                assert_eq!(body["error"]["type"], "not_found");
                assert_eq!(body["error"]["message"], "Tool not available: exec");
            }
            other => panic!("expected 404, got {:?}", status_of(other)),
        }
    }

    #[test]
    fn channels_status_reports_without_secrets() {
        let base = start_gateway(BASE_CONFIG);
        let resp = post(&base, "/core/channels/status", "secret", json!({})).unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.into_json().unwrap();
        let channels = &body["result"]["channels"];
        assert_eq!(channels["telegram"]["configured"], true);
        assert_eq!(channels["ops-slack"]["enabled"], false);
        assert!(!body.to_string().contains("tg-token"));
    }

    #[test]
    fn repeated_failures_lock_out_even_a_valid_token() {
        let cfg = r#"{
            "gateway": {
                "auth": {"token": "secret"},
                "rate_limit": {"max_failures": 3}
            }
        }"#;
        let base = start_gateway(cfg);
        for _ in 0..3 {
            let result = post(&base, "/core/channels/status", "bad", json!({}));
            assert_eq!(status_of(result), 401);
        }
        match post(&base, "/core/channels/status", "secret", json!({})) {
            Err(ureq::Error::Status(429, resp)) => {
                let retry: u64 = resp.header("Retry-After").unwrap().parse().unwrap();
                assert!(retry >= 1);
                let body: Value = resp.into_json().unwrap();
                assert_eq!(body["error"]["type"], "rate_limited");
            }
            other => panic!("expected 429, got {:?}", status_of(other)),
        }
    }

    #[test]
    fn oversized_body_rejected_before_auth() {
        let cfg = r#"{
            "gateway": {
                "auth": {"token": "secret"},
                "max_body_bytes": 64
            }
        }"#;
        let base = start_gateway(cfg);
        let huge = "x".repeat(1024);
        let result = post(&base, "/core/exec", "bad-token", json!({ "filler": huge }));
        // The 400 (not 401) proves the body check ran first.
        assert_eq!(status_of(result), 400);
    }

    #[test]
    fn malformed_body_is_invalid_request() {
        let base = start_gateway(BASE_CONFIG);
        let result = ureq::post(&format!("{base}/core/exec"))
            .set("Authorization", "Bearer secret")
            .set("Content-Type", "application/json")
            .send_string("{not json");
        assert_eq!(status_of(result), 400);
    }
}

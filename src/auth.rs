use std::net::IpAddr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use subtle::ConstantTimeEq;

use crate::{AuthRateLimiter, GatewayAuth, fingerprint_hex, log_warn};

/// Everything the authorizer needs from one inbound request. Header values
/// are borrowed as-received; trust decisions happen here, not at parse time.
#[derive(Debug, Clone)]
pub(crate) struct AuthRequestContext<'a> {
    pub(crate) credential: Option<String>,
    pub(crate) remote_addr: Option<IpAddr>,
    pub(crate) forwarded_for: Option<&'a str>,
    pub(crate) trusted_proxies: &'a [String],
    pub(crate) allow_real_ip_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthOutcome {
    Authorized { client: String },
    Unauthorized,
    RateLimited { retry_after_ms: u64 },
}

/// Extract the supplied secret from an Authorization header. Accepts
/// `Bearer <token>` and `Basic <base64 user:password>` (the password part).
pub(crate) fn parse_authorization(header: Option<&str>) -> Option<String> {
    let header = header?.trim();
    if let Some(token) = header.strip_prefix("Bearer ") {
        let token = token.trim();
        return (!token.is_empty()).then(|| token.to_string());
    }
    if let Some(encoded) = header.strip_prefix("Basic ") {
        let decoded = BASE64.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (_, password) = decoded.split_once(':')?;
        return (!password.is_empty()).then(|| password.to_string());
    }
    None
}

fn parse_cidr(spec: &str) -> Option<(IpAddr, u8)> {
    match spec.split_once('/') {
        Some((addr, len)) => {
            let addr: IpAddr = addr.trim().parse().ok()?;
            let len: u8 = len.trim().parse().ok()?;
            let max = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            (len <= max).then_some((addr, len))
        }
        None => {
            let addr: IpAddr = spec.trim().parse().ok()?;
            let len = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            Some((addr, len))
        }
    }
}

fn cidr_contains(network: IpAddr, prefix_len: u8, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let bits = u32::from(net);
            let ip_bits = u32::from(ip);
            let mask = if prefix_len == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix_len))
            };
            bits & mask == ip_bits & mask
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let bits = u128::from(net);
            let ip_bits = u128::from(ip);
            let mask = if prefix_len == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix_len))
            };
            bits & mask == ip_bits & mask
        }
        _ => false,
    }
}

pub(crate) fn ip_is_trusted_proxy(ip: IpAddr, trusted: &[String]) -> bool {
    trusted.iter().any(|spec| match parse_cidr(spec) {
        Some((network, len)) => cidr_contains(network, len, ip),
        None => {
            log_warn("auth", &format!("ignoring malformed trusted proxy: {spec}"));
            false
        }
    })
}

/// Resolve the effective client address. The raw socket address is used
/// as-is unless it belongs to a trusted proxy, in which case the forwarded
/// list is scanned from the right for the first untrusted hop; the raw
/// address is a fallback only when explicitly allowed.
///
/// Trusted proxies append the peer they actually saw, so only the rightmost
/// entries are proxy-written. Leftmost entries are client-supplied and must
/// never become the rate-limit key.
pub(crate) fn resolve_client_ip(ctx: &AuthRequestContext) -> Option<String> {
    let raw = ctx.remote_addr?;
    if !ip_is_trusted_proxy(raw, ctx.trusted_proxies) {
        return Some(raw.to_string());
    }
    if let Some(forwarded) = ctx.forwarded_for {
        for hop in forwarded
            .split(',')
            .rev()
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
        {
            match hop.parse::<IpAddr>() {
                Ok(ip) if ip_is_trusted_proxy(ip, ctx.trusted_proxies) => continue,
                _ => return Some(hop.to_string()),
            }
        }
    }
    ctx.allow_real_ip_fallback.then(|| raw.to_string())
}

/// Key the rate limiter by resolved client address; fall back to a hash of
/// the supplied credential when no address is usable, so the limiter still
/// engages.
pub(crate) fn rate_limit_key(ctx: &AuthRequestContext) -> String {
    if let Some(ip) = resolve_client_ip(ctx) {
        return ip;
    }
    match &ctx.credential {
        Some(credential) => format!("cred:{}", fingerprint_hex(credential.as_bytes())),
        None => "anonymous".to_string(),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Validate one request's credential. Locked keys fail fast before the
/// credential is ever compared; comparisons are constant-time. The only
/// side effects are on the rate limiter.
pub(crate) fn authorize_gateway(
    ctx: &AuthRequestContext,
    auth: &GatewayAuth,
    limiter: &AuthRateLimiter,
) -> AuthOutcome {
    let key = rate_limit_key(ctx);
    if let Some(retry_after_ms) = limiter.check_locked(&key) {
        return AuthOutcome::RateLimited { retry_after_ms };
    }

    let secrets: Vec<&str> = [auth.token.as_deref(), auth.password.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if secrets.is_empty() {
        // No configured secret means nothing can authenticate. Fail closed.
        log_warn("auth", "no gateway auth secret configured; denying request");
        limiter.record_failure(&key);
        return AuthOutcome::Unauthorized;
    }

    match &ctx.credential {
        Some(supplied)
            if secrets
                .iter()
                .any(|secret| constant_time_eq(supplied.as_bytes(), secret.as_bytes())) =>
        {
            limiter.record_success(&key);
            AuthOutcome::Authorized { client: key }
        }
        _ => {
            limiter.record_failure(&key);
            AuthOutcome::Unauthorized
        }
    }
}

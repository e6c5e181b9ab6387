//! `http.get` — capability-gated, cached, size-capped HTTP fetch (spec §4.5, §4.6, §4.8).

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use serde_json::{json, Value};
use url::Url;

use crate::context::ToolContext;
use crate::http_cache::HttpCache;

/// Network capability predicate (spec §4.5): `net:<domain>` grants that
/// domain directly; `net` grants all domains unless an allowlist is active.
pub fn is_allowed(granted: &HashSet<String>, domain: &str, allowlist_enabled: bool, allowlist: &[String]) -> bool {
    if granted.contains(&format!("net:{domain}")) {
        return true;
    }
    if granted.contains("net") {
        return !allowlist_enabled || allowlist.iter().any(|d| d == domain);
    }
    false
}

fn extract_domain(url: &str) -> Result<String, String> {
    let parsed = Url::parse(url).map_err(|e| format!("invalid url: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme: {other}")),
    }
    parsed
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| "url has no host".to_string())
}

fn now_epoch() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

pub async fn get(args: &Value, ctx: &ToolContext<'_>) -> Result<Value, String> {
    let url = args.get("url").and_then(Value::as_str).ok_or("http.get requires a string 'url'")?;
    let use_cache = args.get("use_cache").and_then(Value::as_bool).unwrap_or(true);

    let domain = extract_domain(url)?;
    if !is_allowed(
        &ctx.state.capabilities_granted,
        &domain,
        ctx.settings.http_allowlist_enabled,
        &ctx.settings.http_allowlist,
    ) {
        return Err(format!("denied: missing capability for domain '{domain}'"));
    }

    let cache = HttpCache::open(&ctx.settings.http_cache_path)?;

    if use_cache {
        if let Some(hit) = cache.get(url, ctx.settings.http_cache_ttl_s, now_epoch())? {
            return Ok(json!({
                "status": hit.status,
                "text": hit.text,
                "cache_hit": true,
            }));
        }
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(ctx.settings.http_timeout_s))
        .user_agent("cognitive-runtime/1.0")
        .build()
        .map_err(|e| format!("building http client: {e}"))?;

    let response = client.get(url).send().await.map_err(|e| format!("request failed: {e}"))?;
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let max_bytes = ctx.settings.http_max_bytes;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("reading response: {e}"))?;
        body.extend_from_slice(&chunk);
        if body.len() > max_bytes {
            return Err(format!("response exceeded max_bytes ({max_bytes})"));
        }
    }

    let raw = String::from_utf8_lossy(&body).into_owned();
    let is_html = content_type.contains("text/html") || raw.trim_start().to_ascii_lowercase().starts_with("<html");
    let text = if is_html { html_to_text(&raw) } else { raw };

    cache.set(url, status, &text, now_epoch())?;

    Ok(json!({
        "status": status,
        "text": text,
        "cache_hit": false,
    }))
}

fn html_to_text(html: &str) -> String {
    let rendered = html2text::from_read(html.as_bytes(), 10_000);
    rendered.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_net_colon_domain_grants_exact_domain() {
        let mut granted = HashSet::new();
        granted.insert("net:example.com".to_string());
        assert!(is_allowed(&granted, "example.com", false, &[]));
        assert!(!is_allowed(&granted, "other.com", false, &[]));
    }

    #[test]
    fn capability_net_without_allowlist_grants_all() {
        let mut granted = HashSet::new();
        granted.insert("net".to_string());
        assert!(is_allowed(&granted, "anything.example", false, &[]));
    }

    #[test]
    fn capability_net_with_allowlist_restricts() {
        let mut granted = HashSet::new();
        granted.insert("net".to_string());
        let allowlist = vec!["allowed.example".to_string()];
        assert!(is_allowed(&granted, "allowed.example", true, &allowlist));
        assert!(!is_allowed(&granted, "denied.example", true, &allowlist));
    }

    #[test]
    fn capability_empty_denies() {
        let granted = HashSet::new();
        assert!(!is_allowed(&granted, "example.com", false, &[]));
    }

    #[test]
    fn extracts_lowercased_domain() {
        assert_eq!(extract_domain("https://Example.COM/path").unwrap(), "example.com");
        assert!(extract_domain("ftp://example.com").is_err());
    }
}

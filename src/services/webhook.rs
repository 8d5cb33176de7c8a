//! Webhook allowlist guard and best-effort delivery.
//!
//! Callback URLs come from job payloads and are attacker-influencable; the
//! allowlist check runs immediately before every dispatch so the worker
//! cannot be used as an SSRF relay. Delivery failures are logged and never
//! escalated: by the time the webhook fires the job is already completed.

use serde::Serialize;
use uuid::Uuid;

/// Whether `url` may receive a webhook call.
///
/// Only http/https URLs whose host exactly matches an allowlist entry
/// (case-insensitive) are allowed. Malformed URLs are not allowed. Never
/// panics.
pub fn is_allowed(url: &str, allowlist: &[String]) -> bool {
    let parsed = match reqwest::Url::parse(url) {
        Ok(u) => u,
        Err(_) => return false,
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    let host = match parsed.host_str() {
        Some(h) => h,
        None => return false,
    };

    allowlist.iter().any(|entry| entry.eq_ignore_ascii_case(host))
}

/// Body POSTed to the callback URL when a job completes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionNotice<'a> {
    pub job_id: Uuid,
    pub offer_id: Uuid,
    pub pdf_url: &'a str,
    pub download_token: &'a str,
}

/// Fire the completion webhook. Best-effort: all failures are logged, none
/// propagate.
pub async fn notify(client: &reqwest::Client, url: &str, notice: &CompletionNotice<'_>) {
    match client.post(url).json(notice).send().await {
        Ok(response) if response.status().is_success() => {
            tracing::info!(job_id = %notice.job_id, url, "Webhook delivered");
        }
        Ok(response) => {
            tracing::warn!(
                job_id = %notice.job_id,
                url,
                status = response.status().as_u16(),
                "Webhook target returned non-success status"
            );
        }
        Err(e) => {
            tracing::warn!(job_id = %notice.job_id, url, error = %e, "Webhook delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist() -> Vec<String> {
        vec!["hooks.example.com".to_string(), "api.partner.io".to_string()]
    }

    #[test]
    fn listed_host_is_allowed() {
        assert!(is_allowed("https://hooks.example.com/cb", &allowlist()));
        assert!(is_allowed("http://api.partner.io/v1/done?x=1", &allowlist()));
    }

    #[test]
    fn host_match_is_case_insensitive() {
        assert!(is_allowed("https://HOOKS.Example.COM/cb", &allowlist()));
    }

    #[test]
    fn unlisted_host_is_rejected() {
        assert!(!is_allowed("https://evil.example.net/cb", &allowlist()));
        assert!(!is_allowed(
            "https://hooks.example.com.evil.net/cb",
            &allowlist()
        ));
    }

    #[test]
    fn subdomains_of_listed_hosts_are_rejected() {
        assert!(!is_allowed("https://sub.hooks.example.com/cb", &allowlist()));
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        assert!(!is_allowed("ftp://hooks.example.com/cb", &allowlist()));
        assert!(!is_allowed("file:///etc/passwd", &allowlist()));
    }

    #[test]
    fn malformed_urls_are_rejected_without_panicking() {
        assert!(!is_allowed("not a url", &allowlist()));
        assert!(!is_allowed("", &allowlist()));
        assert!(!is_allowed("https://", &allowlist()));
    }

    #[test]
    fn empty_allowlist_rejects_everything() {
        assert!(!is_allowed("https://hooks.example.com/cb", &[]));
    }
}

use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::config::ProxySection;

pub const MAX_URL_LENGTH: usize = 2048;

const PROXY_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0";

pub type VerifyResult<T> = Result<T, VerifyError>;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("failed to encode render request: {0}")]
    Envelope(#[from] serde_json::Error),
}

/// A source is accepted iff, after trimming, it is non-empty, at most
/// 2048 characters, starts with `http` (case-insensitive) and parses as
/// a structurally valid URL.
pub fn is_valid_url(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_URL_LENGTH {
        return false;
    }
    if !trimmed.to_ascii_lowercase().starts_with("http") {
        return false;
    }
    Url::parse(trimmed).is_ok()
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    #[serde(rename = "renderType")]
    render_type: &'static str,
    #[serde(rename = "requestSettings")]
    request_settings: RequestSettings,
}

#[derive(Debug, Serialize)]
struct RequestSettings {
    #[serde(rename = "userAgent")]
    user_agent: &'static str,
    #[serde(rename = "doneWhen")]
    done_when: Vec<DoneWhen>,
}

#[derive(Debug, Serialize)]
struct DoneWhen {
    event: &'static str,
}

/// Validates the source URL and, when phantomjs proxying is requested,
/// wraps it into the render-service request envelope. A missing render
/// endpoint degrades to the plain URL instead of failing.
pub fn verify_url(raw: &str, proxy: Option<&str>, config: &ProxySection) -> VerifyResult<String> {
    if !is_valid_url(raw) {
        return Err(VerifyError::InvalidUrl);
    }
    let url = raw.trim();

    if proxy == Some("phantomjs") {
        let Some(endpoint) = config.render_endpoint.as_deref() else {
            warn!("proxy render endpoint is not configured, passing URL through");
            return Ok(url.to_string());
        };
        let payload = serde_json::to_string(&RenderRequest {
            url,
            render_type: "html",
            request_settings: RequestSettings {
                user_agent: PROXY_USER_AGENT,
                done_when: vec![DoneWhen { event: "domReady" }],
            },
        })?;
        return Ok(format!("{endpoint}{payload}"));
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy_config(endpoint: Option<&str>) -> ProxySection {
        ProxySection {
            render_endpoint: endpoint.map(String::from),
        }
    }

    #[test]
    fn accepts_well_formed_http_urls() {
        assert!(is_valid_url("https://example.com"));
        assert!(is_valid_url("http://example.com/path?q=1"));
        assert!(is_valid_url("  https://example.com  "));
        assert!(is_valid_url("HTTPS://EXAMPLE.COM"));
    }

    #[test]
    fn rejects_malformed_sources() {
        assert!(!is_valid_url(""));
        assert!(!is_valid_url("   "));
        assert!(!is_valid_url("ftp://example.com"));
        assert!(!is_valid_url("example.com"));
        assert!(!is_valid_url("http://"));
        assert!(!is_valid_url("javascript:alert(1)"));
    }

    #[test]
    fn rejects_oversized_urls() {
        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert!(!is_valid_url(&long));
    }

    #[test]
    fn invalid_url_fails_verification() {
        let err = verify_url("not a url", None, &proxy_config(None)).unwrap_err();
        assert!(matches!(err, VerifyError::InvalidUrl));
    }

    #[test]
    fn plain_verification_returns_trimmed_url() {
        let url = verify_url("  https://example.com  ", None, &proxy_config(None)).unwrap();
        assert_eq!(url, "https://example.com");
    }

    #[test]
    fn proxy_without_endpoint_degrades_to_plain_url() {
        let url = verify_url("https://example.com", Some("phantomjs"), &proxy_config(None))
            .unwrap();
        assert_eq!(url, "https://example.com");
    }

    #[test]
    fn proxy_wraps_url_in_render_envelope() {
        let config = proxy_config(Some("https://render.example/api?request="));
        let wrapped = verify_url("https://example.com", Some("phantomjs"), &config).unwrap();
        assert!(wrapped.starts_with("https://render.example/api?request={"));
        assert!(wrapped.contains("\"url\":\"https://example.com\""));
        assert!(wrapped.contains("\"renderType\":\"html\""));
        assert!(wrapped.contains("\"event\":\"domReady\""));
    }

    #[test]
    fn unknown_proxy_mode_is_ignored() {
        let config = proxy_config(Some("https://render.example/"));
        let url = verify_url("https://example.com", Some("splash"), &config).unwrap();
        assert_eq!(url, "https://example.com");
    }
}

//! URL normalization, validation, and the SSRF guard.

use std::net::IpAddr;

use url::Url;

use leadscout_shared::{LeadScoutError, Result};

/// Normalize user-typed input into a URL string.
///
/// Trims whitespace and stray quotes, adds `https://` when no scheme is
/// given, and drops a leading `www.` from the host.
pub fn normalize_url(input: &str) -> String {
    let trimmed = input
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    with_scheme.replacen("://www.", "://", 1)
}

/// Parse a normalized URL, requiring an http(s) scheme and a host.
pub fn validate_url(input: &str) -> Result<Url> {
    let url = Url::parse(input)
        .map_err(|e| LeadScoutError::user_input(format!("invalid URL '{input}': {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(LeadScoutError::user_input(format!(
                "invalid URL '{input}': unsupported scheme '{other}'"
            )));
        }
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(LeadScoutError::user_input(format!(
            "invalid URL '{input}': missing host"
        ))),
    }
}

/// Short company label for file and sheet names: first host label, `www.` dropped.
///
/// `https://www.acme-robotics.com/about` -> `acme-robotics`
pub fn company_slug(url: &str) -> String {
    let without_scheme = url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let without_www = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);
    let host = without_www.split('/').next().unwrap_or_default();
    let slug = host.split('.').next().unwrap_or_default();

    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug.to_lowercase()
    }
}

/// Collapse all runs of whitespace into single spaces.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_scheme_and_strips_www() {
        assert_eq!(normalize_url("  www.acme.com "), "https://acme.com");
        assert_eq!(normalize_url("\"https://www.acme.com/about\""), "https://acme.com/about");
        assert_eq!(normalize_url("http://acme.io"), "http://acme.io");
    }

    #[test]
    fn validate_rejects_garbage() {
        assert!(validate_url("https://example.com").is_ok());

        let err = validate_url("not a url").unwrap_err();
        assert!(matches!(err, LeadScoutError::UserInput { .. }));

        let err = validate_url("ftp://example.com").unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn slug_from_url() {
        assert_eq!(company_slug("https://www.acme-robotics.com/about"), "acme-robotics");
        assert_eq!(company_slug("http://Stripe.com"), "stripe");
        assert_eq!(company_slug(""), "unknown");
    }

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  We   build\n\n robots\t "), "We build robots");
    }

    #[test]
    fn ssrf_blocks_private_targets() {
        assert!(is_ssrf_target(&Url::parse("file:///etc/passwd").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://192.168.1.1/admin").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://127.0.0.1:8080/").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://[::1]/").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://localhost:3000/").unwrap()));
        assert!(!is_ssrf_target(&Url::parse("https://acme.com/").unwrap()));
    }
}

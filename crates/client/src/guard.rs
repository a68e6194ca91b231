//! Render-target validation.
//!
//! Every URL is canonicalized before it reaches the browser, and hosts that
//! are literal private/reserved IP addresses are refused unless explicitly
//! allowed. Hostnames are not resolved here; the browser does its own DNS.

use std::net::IpAddr;

use pagesift_core::Error;
use url::{Host, Url};

/// Reasons a render target is refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("blocked host: {0} (private/reserved)")]
    PrivateHost(IpAddr),
}

impl From<UrlError> for Error {
    fn from(err: UrlError) -> Self {
        match err {
            UrlError::Empty => Error::InvalidInput("url cannot be empty".into()),
            other => Error::InvalidUrl(other.to_string()),
        }
    }
}

/// Canonicalize a URL string.
///
/// Trims whitespace, defaults the scheme to `https`, lowercases the host and
/// drops the fragment. The query string is kept as-is.
pub fn canonicalize(input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let candidate = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };
    let mut parsed = Url::parse(&candidate).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(parsed.scheme().to_string()));
    }

    let host = parsed.host_str().ok_or(UrlError::MissingHost)?.to_lowercase();
    parsed.set_host(Some(&host)).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    parsed.set_fragment(None);

    Ok(parsed)
}

/// Whether an address is loopback, private, link-local, multicast, CGNAT,
/// unspecified or otherwise reserved.
pub fn is_private_or_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || octets[0] == 0
                || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_or_reserved(IpAddr::V4(mapped));
            }
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Canonicalize `input` and apply the host policy.
pub fn check_target(input: &str, allow_private: bool) -> Result<Url, UrlError> {
    let url = canonicalize(input)?;
    if allow_private {
        return Ok(url);
    }

    let ip = match url.host() {
        Some(Host::Ipv4(v4)) => Some(IpAddr::V4(v4)),
        Some(Host::Ipv6(v6)) => Some(IpAddr::V6(v6)),
        Some(Host::Domain(domain)) if domain == "localhost" || domain.ends_with(".localhost") => {
            Some(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST))
        }
        _ => None,
    };

    match ip {
        Some(ip) if is_private_or_reserved(ip) => Err(UrlError::PrivateHost(ip)),
        _ => Ok(url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_canonicalize_defaults_scheme_and_lowercases_host() {
        let url = canonicalize("  EXAMPLE.com/News?id=7#top ").unwrap();
        assert_eq!(url.as_str(), "https://example.com/News?id=7");
    }

    #[test]
    fn test_canonicalize_rejects_other_schemes() {
        assert!(matches!(canonicalize("file:///etc/passwd"), Err(UrlError::UnsupportedScheme(_))));
        assert!(matches!(canonicalize("ftp://example.com"), Err(UrlError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_canonicalize_empty() {
        assert_eq!(canonicalize("   "), Err(UrlError::Empty));
    }

    #[test]
    fn test_private_ranges() {
        for ip in [
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)),
            IpAddr::V4(Ipv4Addr::new(172, 20, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            IpAddr::V4(Ipv4Addr::new(169, 254, 169, 254)),
            IpAddr::V4(Ipv4Addr::new(100, 64, 0, 1)),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1)),
            IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0x7f00, 0x0001)),
        ] {
            assert!(is_private_or_reserved(ip), "{ip} should be blocked");
        }
    }

    #[test]
    fn test_public_addresses_allowed() {
        assert!(!is_private_or_reserved(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))));
        assert!(!is_private_or_reserved(IpAddr::V4(Ipv4Addr::new(100, 128, 0, 1))));
        assert!(!is_private_or_reserved(IpAddr::V6(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888))));
    }

    #[test]
    fn test_check_target_blocks_literal_private_hosts() {
        assert!(matches!(check_target("http://127.0.0.1:8080/admin", false), Err(UrlError::PrivateHost(_))));
        assert!(matches!(check_target("http://[::1]/", false), Err(UrlError::PrivateHost(_))));
        assert!(matches!(check_target("http://localhost/", false), Err(UrlError::PrivateHost(_))));
    }

    #[test]
    fn test_check_target_allow_private() {
        let url = check_target("http://127.0.0.1:8080/admin", true).unwrap();
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn test_check_target_domain_passes() {
        assert!(check_target("news.example.org/story", false).is_ok());
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = UrlError::UnsupportedScheme("ftp".into()).into();
        assert!(matches!(err, Error::InvalidUrl(_)));
        let err: Error = UrlError::Empty.into();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}

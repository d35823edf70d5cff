//! Download URL validation.

use url::Url;

use crate::error::DownloadError;

/// Accept only `https` URLs whose host is `trusted_domain` or a subdomain of it.
///
/// The comparison is case-insensitive and anchored on a label boundary, so
/// `evilbcbits.com` does not pass for `bcbits.com`.
pub fn validate_download_url(raw: &str, trusted_domain: &str) -> Result<Url, DownloadError> {
    let untrusted = || DownloadError::UntrustedSource {
        url: raw.to_string(),
    };

    let url = Url::parse(raw).map_err(|_| untrusted())?;
    if url.scheme() != "https" {
        return Err(untrusted());
    }

    let host = url.host_str().ok_or_else(untrusted)?.to_ascii_lowercase();
    let domain = trusted_domain.trim_start_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return Err(untrusted());
    }

    let trusted = host == domain
        || host
            .strip_suffix(&domain)
            .is_some_and(|prefix| prefix.ends_with('.'));
    if !trusted {
        return Err(untrusted());
    }

    Ok(url)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_trusted_host_and_subdomains() {
        for url in [
            "https://bcbits.com/download",
            "https://p4.bcbits.com/download/album?enc=flac&id=123",
            "https://P4.BCBITS.COM/x",
        ] {
            assert!(
                validate_download_url(url, "bcbits.com").is_ok(),
                "{url} should be accepted"
            );
        }
    }

    #[test]
    fn rejects_insecure_transport() {
        let err = validate_download_url("http://p4.bcbits.com/download", "bcbits.com").unwrap_err();
        assert_eq!(
            err,
            DownloadError::UntrustedSource {
                url: "http://p4.bcbits.com/download".into()
            }
        );
    }

    #[test]
    fn rejects_lookalike_and_foreign_hosts() {
        for url in [
            "https://evilbcbits.com/download",
            "https://bcbits.com.evil.example/download",
            "https://example.com/?redirect=bcbits.com",
            "not a url",
            "file:///etc/passwd",
        ] {
            assert!(
                validate_download_url(url, "bcbits.com").is_err(),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn leading_dot_in_domain_is_ignored() {
        assert!(validate_download_url("https://p1.bcbits.com/a", ".bcbits.com").is_ok());
    }
}

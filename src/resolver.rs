//! Link resolution: turning a purchase page into a direct download URL.
//!
//! A page-scraping collaborator answers `resolve-link` requests with one of
//! five shapes (see [`LinkResponse`]). Pages that are still navigating or
//! have not produced a link yet are waited on and asked again, up to
//! `max_attempts` times.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::LinkResolutionConfig;
use crate::error::DownloadError;

/// Decoded answer to a resolve-link request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkResponse {
    /// `{ready: false}`
    NotReady,
    /// `{navigating: true}`
    Navigating,
    /// `{success: true, downloadUrl}`
    Success {
        /// Direct download link
        download_url: String,
    },
    /// `{success: false, error}`
    Failure {
        /// Resolver-reported reason
        error: String,
    },
    /// `{success: false, isOwned: true, message}`: purchase confirmed, link not generated yet
    OwnedWithoutLink {
        /// Resolver-reported message
        message: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawLinkResponse {
    navigating: Option<bool>,
    success: Option<bool>,
    download_url: Option<String>,
    error: Option<String>,
    is_owned: Option<bool>,
    message: Option<String>,
}

impl From<RawLinkResponse> for LinkResponse {
    fn from(raw: RawLinkResponse) -> Self {
        if raw.navigating == Some(true) {
            return LinkResponse::Navigating;
        }
        match raw.success {
            Some(true) => match raw.download_url {
                Some(download_url) if !download_url.is_empty() => {
                    LinkResponse::Success { download_url }
                }
                _ => LinkResponse::NotReady,
            },
            Some(false) if raw.is_owned == Some(true) => LinkResponse::OwnedWithoutLink {
                message: raw.message.unwrap_or_default(),
            },
            Some(false) => LinkResponse::Failure {
                error: raw
                    .error
                    .or(raw.message)
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
            // `{ready: false}` and anything unrecognized: ask again later
            None => LinkResponse::NotReady,
        }
    }
}

impl LinkResponse {
    /// Decode a JSON response
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawLinkResponse>(json).map(Self::from)
    }

    /// Decode an already parsed JSON value
    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value::<RawLinkResponse>(value).map(Self::from)
    }
}

/// Page-scraping collaborator that resolves purchase pages to download links
#[async_trait::async_trait]
pub trait LinkResolver: Send + Sync {
    /// Ask once for the download link of `source_url`
    async fn resolve(&self, source_url: &str) -> Result<LinkResponse, DownloadError>;
}

/// Query `resolver` until it produces a link.
///
/// Navigating and not-ready answers are waited on; an explicit failure ends
/// resolution immediately. Collaborator errors count as a not-ready attempt.
/// Cancelling `cancel` aborts the wait with [`DownloadError::Cancelled`].
pub async fn resolve_download_url(
    resolver: &dyn LinkResolver,
    source_url: &str,
    config: &LinkResolutionConfig,
    cancel: &CancellationToken,
) -> Result<String, DownloadError> {
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let wait = match resolver.resolve(source_url).await {
            Ok(LinkResponse::Success { download_url }) => {
                tracing::debug!(source_url, attempt, "Download link resolved");
                return Ok(download_url);
            }
            Ok(LinkResponse::Failure { error }) => {
                tracing::warn!(source_url, attempt, error = %error, "Link resolution failed");
                return Err(DownloadError::LinkResolutionFailed(error));
            }
            Ok(LinkResponse::Navigating) => {
                tracing::debug!(source_url, attempt, "Page still navigating");
                config.navigating_wait
            }
            Ok(LinkResponse::NotReady) => {
                tracing::debug!(source_url, attempt, "Download link not ready");
                config.not_ready_wait
            }
            Ok(LinkResponse::OwnedWithoutLink { message }) => {
                tracing::debug!(source_url, attempt, message = %message, "Owned but no link yet");
                config.not_ready_wait
            }
            Err(e) => {
                tracing::warn!(source_url, attempt, error = %e, "Link resolver request failed");
                config.not_ready_wait
            }
        };

        if attempt == max_attempts {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }

    Err(DownloadError::LinkResolutionExhausted {
        attempts: max_attempts,
    })
}


// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::mocks::MockResolver;
    use super::*;
    use std::time::Duration;

    const PAGE: &str = "https://artist.bandcamp.com/album/x";
    const LINK: &str = "https://p4.bcbits.com/download/album?id=1";

    fn success() -> LinkResponse {
        LinkResponse::Success {
            download_url: LINK.to_string(),
        }
    }

    #[test]
    fn decodes_every_wire_shape() {
        let cases = [
            (r#"{"ready": false}"#, LinkResponse::NotReady),
            (r#"{"navigating": true}"#, LinkResponse::Navigating),
            (
                r#"{"success": true, "downloadUrl": "https://p4.bcbits.com/d"}"#,
                LinkResponse::Success {
                    download_url: "https://p4.bcbits.com/d".into(),
                },
            ),
            (
                r#"{"success": false, "error": "Not purchased"}"#,
                LinkResponse::Failure {
                    error: "Not purchased".into(),
                },
            ),
            (
                r#"{"success": false, "isOwned": true, "message": "Preparing"}"#,
                LinkResponse::OwnedWithoutLink {
                    message: "Preparing".into(),
                },
            ),
        ];
        for (json, expected) in cases {
            assert_eq!(LinkResponse::from_json(json).unwrap(), expected, "{json}");
        }
    }

    #[test]
    fn odd_shapes_degrade_gracefully() {
        assert_eq!(LinkResponse::from_json("{}").unwrap(), LinkResponse::NotReady);
        assert_eq!(
            LinkResponse::from_json(r#"{"success": true}"#).unwrap(),
            LinkResponse::NotReady
        );
        assert_eq!(
            LinkResponse::from_json(r#"{"success": false}"#).unwrap(),
            LinkResponse::Failure {
                error: "unknown error".into()
            }
        );
        assert_eq!(
            LinkResponse::from_value(serde_json::json!({"navigating": true, "success": true}))
                .unwrap(),
            LinkResponse::Navigating
        );
        assert!(LinkResponse::from_json("not json").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_through_navigation_and_not_ready() {
        let resolver = MockResolver::scripted(
            [
                LinkResponse::Navigating,
                LinkResponse::NotReady,
                LinkResponse::OwnedWithoutLink {
                    message: "Preparing".into(),
                },
            ],
            success(),
        );
        let config = LinkResolutionConfig::default();

        let started = tokio::time::Instant::now();
        let url = resolve_download_url(&resolver, PAGE, &config, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(url, LINK);
        assert_eq!(resolver.calls().len(), 4);
        // 3s after navigating, 2s after each not-ready answer
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let resolver = MockResolver::always(LinkResponse::NotReady);
        let config = LinkResolutionConfig {
            max_attempts: 3,
            ..Default::default()
        };

        let err = resolve_download_url(&resolver, PAGE, &config, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, DownloadError::LinkResolutionExhausted { attempts: 3 });
        assert_eq!(resolver.calls(), vec![PAGE; 3]);
    }

    #[tokio::test]
    async fn explicit_failure_stops_immediately() {
        let resolver = MockResolver::always(LinkResponse::Failure {
            error: "Item not found in collection".into(),
        });
        let err = resolve_download_url(
            &resolver,
            PAGE,
            &LinkResolutionConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err,
            DownloadError::LinkResolutionFailed("Item not found in collection".into())
        );
        assert_eq!(resolver.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let resolver = MockResolver::always(LinkResponse::Navigating);
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                token.cancel();
            })
        };

        let err = resolve_download_url(&resolver, PAGE, &LinkResolutionConfig::default(), &token)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err, DownloadError::Cancelled);
        assert_eq!(resolver.calls().len(), 1);
    }
}

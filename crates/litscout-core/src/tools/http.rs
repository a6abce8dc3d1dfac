use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::LitScoutError;
use crate::config::{ProviderKind, ProviderSettings};

const USER_AGENT: &str = concat!("litscout/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client; per-request timeouts are applied by each tool.
pub fn build_http_client() -> Result<Client, LitScoutError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|err| LitScoutError::Configuration(format!("failed to build HTTP client: {err}")))
}

/// Retry behaviour for one provider.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub request_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            backoff: settings.retry_backoff(),
            request_timeout: settings.request_timeout(),
        }
    }

    /// Delay before the next attempt. Rate limiting backs off exponentially,
    /// everything else linearly.
    fn delay(&self, attempt: u32, rate_limited: bool) -> Duration {
        if rate_limited {
            self.backoff.saturating_mul(2u32.saturating_pow(attempt))
        } else {
            self.backoff.saturating_mul(attempt + 1)
        }
    }
}

/// Send a GET built by `build` and decode the JSON body, retrying per `policy`.
///
/// HTTP 422 is never retried. The final failure is reported as
/// [`LitScoutError::ProviderUnavailable`].
pub(crate) async fn fetch_json<F>(
    kind: ProviderKind,
    policy: &RetryPolicy,
    build: F,
) -> Result<Value, LitScoutError>
where
    F: Fn() -> RequestBuilder,
{
    let provider = kind.tool_name();
    let mut last_error = String::from("no attempt made");

    for attempt in 0..=policy.max_retries {
        debug!(provider, attempt = attempt + 1, "sending provider request");
        let mut rate_limited = false;

        match build().timeout(policy.request_timeout).send().await {
            Ok(response) => {
                let status = response.status();
                debug!(provider, status = status.as_u16(), "provider responded");
                if status.is_success() {
                    return response.json::<Value>().await.map_err(|err| {
                        LitScoutError::provider(provider, format!("invalid JSON payload: {err}"))
                    });
                }

                last_error = format!("HTTP {}", status.as_u16());
                if status == StatusCode::UNPROCESSABLE_ENTITY {
                    warn!(provider, "provider rejected the query; not retrying");
                    break;
                }
                rate_limited = status == StatusCode::TOO_MANY_REQUESTS;
            }
            Err(err) if err.is_timeout() => {
                last_error = "request timed out".to_string();
            }
            Err(err) if err.is_connect() => {
                last_error = format!("connection failed: {err}");
            }
            Err(err) => {
                last_error = err.to_string();
            }
        }

        warn!(provider, attempt = attempt + 1, error = %last_error, "provider attempt failed");
        if attempt < policy.max_retries {
            sleep(policy.delay(attempt, rate_limited)).await;
        }
    }

    Err(LitScoutError::provider(provider, last_error))
}

/// Endpoint URL below a provider base URL.
pub(crate) fn endpoint(base: &reqwest::Url, path: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(1),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn rate_limit_backoff_is_exponential() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(100),
            request_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(0, true), Duration::from_millis(100));
        assert_eq!(policy.delay(2, true), Duration::from_millis(400));
        assert_eq!(policy.delay(2, false), Duration::from_millis(300));
    }

    #[test]
    fn endpoint_joins_without_double_slashes() {
        let base = reqwest::Url::parse("https://api.core.ac.uk/v3/").unwrap();
        assert_eq!(
            endpoint(&base, "/search/works"),
            "https://api.core.ac.uk/v3/search/works"
        );
    }

    #[tokio::test]
    async fn retries_server_errors_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = Client::new();
        let url = format!("{}/works", server.uri());
        let err = fetch_json(ProviderKind::OpenAlex, &fast_policy(2), || client.get(&url))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LitScoutError::ProviderUnavailable { ref reason, .. } if reason == "HTTP 503"
        ));
    }

    #[tokio::test]
    async fn unprocessable_query_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index/search"))
            .respond_with(ResponseTemplate::new(422))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new();
        let url = format!("{}/index/search", server.uri());
        let result = fetch_json(ProviderKind::Orkg, &fast_policy(2), || client.get(&url)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn decodes_successful_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "results": [] })),
            )
            .mount(&server)
            .await;

        let client = Client::new();
        let url = format!("{}/works", server.uri());
        let value = fetch_json(ProviderKind::OpenAlex, &fast_policy(0), || client.get(&url))
            .await
            .unwrap();
        assert_eq!(value["results"], serde_json::json!([]));
    }
}

use crate::metrics_defs::{HTTP_REQUESTS, HTTP_RETRIES};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::header::AUTHORIZATION;
use reqwest::{StatusCode, Url};
use shared::counter;
use std::fmt;
use tokio::time::{Duration, sleep};

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Transport {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("API responded with {status}: {body}")]
    Api { status: StatusCode, body: String },
}

/// HTTP Basic credentials for a vendor API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    secret: String,
}

impl Credentials {
    pub fn new<U, S>(username: U, secret: S) -> Self
    where
        U: Into<String>,
        S: Into<String>,
    {
        Credentials {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn authorization(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.secret));
        format!("Basic {encoded}")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based), doubling each time.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct Fetched {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// Issues authenticated GET requests, retrying transport failures and non-2xx
/// responses until the attempt budget runs out.
pub struct Fetcher {
    client: reqwest::Client,
    credentials: Credentials,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(
        credentials: Credentials,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Fetcher {
            client,
            credentials,
            retry,
        })
    }

    pub async fn fetch(&self, url: &Url) -> Result<Fetched, FetchError> {
        let mut attempt = 1;

        loop {
            match self.attempt(url).await {
                Ok(fetched) => return Ok(fetched),
                Err(err) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        %url,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying request"
                    );
                    counter!(HTTP_RETRIES).increment(1);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(%url, attempt, error = %err, "Request failed");
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, url: &Url) -> Result<Fetched, FetchError> {
        counter!(HTTP_REQUESTS).increment(1);
        tracing::debug!(%url, "Sending request");

        let transport = |source| FetchError::Transport {
            url: url.clone(),
            source,
        };

        let response = self
            .client
            .get(url.clone())
            .header(AUTHORIZATION, self.credentials.authorization())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;

        if !status.is_success() {
            return Err(FetchError::Api {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        tracing::debug!(%url, status = status.as_u16(), bytes = body.len(), "Received response");

        Ok(Fetched {
            status,
            body: body.to_vec(),
        })
    }
}

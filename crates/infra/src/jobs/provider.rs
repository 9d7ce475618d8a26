//! Outbound email providers.
//!
//! A provider either accepts a message (`Delivered`), refuses it (`Rejected`, a soft
//! failure the dispatcher retries with backoff), or fails at the transport level
//! (`Err`, also requeued). Permanent problems such as a malformed address are caught
//! by the dispatcher before a provider is ever called.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use courier_core::EmailAddress;

/// What the provider said about a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { message_id: String },
    Rejected { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("provider returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

#[async_trait]
pub trait EmailProvider: Send + Sync + core::fmt::Debug {
    async fn send(
        &self,
        to: &EmailAddress,
        subject: &str,
        body: &str,
    ) -> Result<SendOutcome, TransportError>;
}

/// Provider configuration as seen by the dispatcher.
///
/// An unconfigured mailer is a deployment problem, not a delivery failure: sweeps
/// refuse to run rather than burn the retry budget of every queued job.
#[derive(Debug, Clone)]
pub enum Mailer {
    Configured(Arc<dyn EmailProvider>),
    Unconfigured,
}

impl Mailer {
    pub fn configured(provider: impl EmailProvider + 'static) -> Self {
        Mailer::Configured(Arc::new(provider))
    }

    pub fn provider(&self) -> Option<&Arc<dyn EmailProvider>> {
        match self {
            Mailer::Configured(provider) => Some(provider),
            Mailer::Unconfigured => None,
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, Mailer::Configured(_))
    }
}

/// Settings for [`HttpEmailProvider`].
#[derive(Clone, Serialize, Deserialize)]
pub struct HttpProviderConfig {
    /// Endpoint accepting `POST {from, to, subject, text}`
    pub endpoint: String,
    /// Sent as a bearer token
    pub api_key: String,
    /// Sender address
    pub from: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl core::fmt::Debug for HttpProviderConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HttpProviderConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("from", &self.from)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// JSON-over-HTTP provider.
///
/// 2xx is a delivery, 4xx a rejection (429 is reported as `rate_limited`),
/// anything else a transport error. A 2xx whose body carries no readable `id`
/// still counts as delivered, under a generated message id.
#[derive(Debug, Clone)]
pub struct HttpEmailProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
}

impl HttpEmailProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl EmailProvider for HttpEmailProvider {
    async fn send(
        &self,
        to: &EmailAddress,
        subject: &str,
        body: &str,
    ) -> Result<SendOutcome, TransportError> {
        let request = SendRequest {
            from: &self.config.from,
            to: to.as_str(),
            subject,
            text: body,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        debug!(status = status.as_u16(), "provider responded");

        if status.is_success() {
            let message_id = match response.json::<SendResponse>().await {
                Ok(parsed) => parsed.id,
                Err(err) => {
                    let generated = format!("accepted-{}", Uuid::now_v7());
                    warn!(
                        status = status.as_u16(),
                        error = %err,
                        message_id = %generated,
                        "provider accepted message without a readable id"
                    );
                    generated
                }
            };
            return Ok(SendOutcome::Delivered { message_id });
        }

        let text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 {
            return Ok(SendOutcome::Rejected {
                error: "rate_limited".to_string(),
            });
        }
        if status.is_client_error() {
            warn!(status = status.as_u16(), "provider rejected message");
            return Ok(SendOutcome::Rejected {
                error: format!("rejected ({}): {}", status.as_u16(), truncate(&text, 200)),
            });
        }
        Err(TransportError::UnexpectedStatus {
            status: status.as_u16(),
            body: truncate(&text, 200),
        })
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// A message captured by [`RecordingProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub message_id: String,
}

#[derive(Debug, Default)]
struct RecordingState {
    scripted: VecDeque<Result<SendOutcome, TransportError>>,
    sent: Vec<SentEmail>,
    calls: usize,
}

/// In-process provider for tests and local runs.
///
/// Delivers everything unless an outcome has been scripted; scripted outcomes are
/// consumed in order, one per call. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct RecordingProvider {
    state: Arc<Mutex<RecordingState>>,
    delay: Option<Duration>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `send`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn script(&self, outcome: Result<SendOutcome, TransportError>) {
        self.lock().scripted.push_back(outcome);
    }

    pub fn reject_next(&self, error: impl Into<String>) {
        self.script(Ok(SendOutcome::Rejected {
            error: error.into(),
        }));
    }

    pub fn fail_next(&self, error: TransportError) {
        self.script(Err(error));
    }

    /// Successfully delivered messages.
    pub fn sent(&self) -> Vec<SentEmail> {
        self.lock().sent.clone()
    }

    /// Every `send` call, whatever its outcome.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl EmailProvider for RecordingProvider {
    async fn send(
        &self,
        to: &EmailAddress,
        subject: &str,
        body: &str,
    ) -> Result<SendOutcome, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.calls += 1;
        let call = state.calls;
        let outcome = state.scripted.pop_front().unwrap_or_else(|| {
            Ok(SendOutcome::Delivered {
                message_id: format!("msg-{call}"),
            })
        });

        if let Ok(SendOutcome::Delivered { message_id }) = &outcome {
            state.sent.push(SentEmail {
                to: to.as_str().to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
                message_id: message_id.clone(),
            });
        }
        outcome
    }
}

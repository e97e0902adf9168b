//! Telegram `sendPhoto` notifier.

use reqwest::blocking::{multipart, Client};
use sentinel_core::Notifier;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const API_BASE: &str = "https://api.telegram.org";
const CAPTION: &str = "Intruder Detected!";
const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("cannot read evidence {path}: {source}")]
    Attach {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram rejected the photo: {status} {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Sends evidence photos to a chat. Without a token or chat id it is a no-op.
pub struct TelegramNotifier {
    client: Option<Client>,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Build the notifier. Uses a blocking HTTP client: construct it off the async runtime.
    pub fn new(token: &str, chat_id: &str) -> Self {
        Self::with_api_base(API_BASE, token, chat_id)
    }

    pub fn with_api_base(api_base: &str, token: &str, chat_id: &str) -> Self {
        let token = token.trim().to_string();
        let chat_id = chat_id.trim().to_string();

        let client = if token.is_empty() || chat_id.is_empty() {
            tracing::warn!("telegram token or chat id not configured; notifications disabled");
            None
        } else {
            match Client::builder().timeout(TIMEOUT).build() {
                Ok(client) => Some(client),
                Err(e) => {
                    tracing::error!(error = %e, "cannot build HTTP client; notifications disabled");
                    None
                }
            }
        };

        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            chat_id,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    fn send_photo_url(&self) -> String {
        format!("{}/bot{}/sendPhoto", self.api_base, self.token)
    }
}

impl Notifier for TelegramNotifier {
    type Error = TelegramError;

    fn notify(&self, evidence: &Path) -> Result<bool, TelegramError> {
        let Some(client) = &self.client else {
            return Ok(false);
        };

        let form = multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", CAPTION)
            .file("photo", evidence)
            .map_err(|source| TelegramError::Attach {
                path: evidence.display().to_string(),
                source,
            })?;

        let response = client.post(self.send_photo_url()).multipart(form).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TelegramError::Rejected { status, body });
        }

        tracing::info!(chat_id = %self.chat_id, "telegram alert sent");
        Ok(true)
    }
}

use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::json;

use super::{Notifier, NotifyError};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram bot delivery (`sendPhoto` / `sendMessage`).
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, NotifyError> {
        Self::with_api_base(DEFAULT_API_BASE, token, chat_id)
    }

    /// Point at a different bot API host (self-hosted server or tests).
    pub fn with_api_base(
        api_base: impl Into<String>,
        token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    // The bot API reports failures as `{"ok": false, "description": ..}`
    // bodies with a 4xx status, so the body is read whatever the status.
    fn check(result: reqwest::Result<Response>) -> Result<(), NotifyError> {
        let response = result.map_err(transport)?;
        let status = response.status();
        let body: ApiResponse = response.json().map_err(|e| {
            NotifyError::Transport(format!("unreadable response ({status}): {}", e.without_url()))
        })?;
        if body.ok {
            Ok(())
        } else {
            Err(NotifyError::Rejected(
                body.description
                    .unwrap_or_else(|| format!("no description ({status})")),
            ))
        }
    }
}

impl Notifier for TelegramNotifier {
    fn send_photo(&self, jpeg: &[u8], caption: &str) -> Result<(), NotifyError> {
        let photo = Part::bytes(jpeg.to_vec())
            .file_name("snapshot.jpg")
            .mime_str("image/jpeg")
            .map_err(transport)?;
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .part("photo", photo);
        Self::check(
            self.client
                .post(self.method_url("sendPhoto"))
                .multipart(form)
                .send(),
        )
    }

    fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        Self::check(
            self.client
                .post(self.method_url("sendMessage"))
                .json(&json!({ "chat_id": self.chat_id, "text": text }))
                .send(),
        )
    }
}

// Request URLs embed the bot token, so they never reach error messages.
fn transport(e: reqwest::Error) -> NotifyError {
    NotifyError::Transport(e.without_url().to_string())
}

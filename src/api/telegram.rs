use serde::{Deserialize, Serialize};

use crate::config::TelegramConfig;
use crate::error::SourceError;

/// The slice of a Bot API update the webhook cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    disable_notification: bool,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct BotResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramClient {
    http: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self { http, config })
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), SourceError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token
        );
        let response = self
            .http
            .post(&url)
            .json(&SendMessage {
                chat_id,
                text,
                parse_mode: "HTML",
                disable_notification: true,
                disable_web_page_preview: true,
            })
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited("telegram sendMessage".to_string()));
        }
        let body: BotResponse = response.json().await?;
        if !body.ok {
            return Err(SourceError::Api(body.description.unwrap_or_else(|| "sendMessage failed".to_string())));
        }
        Ok(())
    }
}

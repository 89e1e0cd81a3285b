//! Minimal Telegram Bot API client: just the handful of methods the bot
//! needs (long polling, text messages, media upload).

use std::{path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tokio_util::io::ReaderStream;

/// Timeout for small JSON calls; uploads and long polls get their own.
const API_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub data: Option<String>,
    pub message: Option<Message>,
}

#[derive(Debug, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("https://api.telegram.org/bot{token}"),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<T> {
        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("telegram {method} request failed"))?;

        let api: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("telegram {method} returned malformed JSON"))?;
        if !api.ok {
            bail!(
                "telegram {method} rejected: {}",
                api.description.unwrap_or_else(|| "no description".to_string())
            );
        }
        api.result
            .with_context(|| format!("telegram {method} response missing result"))
    }

    pub async fn get_updates(&self, offset: i64, poll: Duration) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": poll.as_secs(),
                "allowed_updates": ["message", "callback_query"],
            }),
            poll + Duration::from_secs(10),
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<Vec<Vec<InlineKeyboardButton>>>,
    ) -> Result<Message> {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if let Some(rows) = keyboard {
            payload["reply_markup"] = json!({ "inline_keyboard": rows });
        }
        self.call("sendMessage", payload, API_TIMEOUT).await
    }

    pub async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
                API_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let _: bool = self
            .call(
                "deleteMessage",
                json!({ "chat_id": chat_id, "message_id": message_id }),
                API_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, id: &str, text: Option<&str>) -> Result<()> {
        let mut payload = json!({ "callback_query_id": id });
        if let Some(text) = text {
            payload["text"] = json!(text);
        }
        let _: bool = self.call("answerCallbackQuery", payload, API_TIMEOUT).await?;
        Ok(())
    }

    pub async fn send_audio(
        &self,
        chat_id: i64,
        path: &Path,
        title: &str,
        duration_seconds: u32,
        timeout: Duration,
    ) -> Result<()> {
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("title", title.to_string())
            .text("duration", duration_seconds.to_string());
        self.send_file("sendAudio", "audio", path, form, timeout)
            .await
    }

    pub async fn send_video(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
        duration_seconds: u32,
        width: Option<u32>,
        height: Option<u32>,
        timeout: Duration,
    ) -> Result<()> {
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("duration", duration_seconds.to_string());
        if let Some(width) = width {
            form = form.text("width", width.to_string());
        }
        if let Some(height) = height {
            form = form.text("height", height.to_string());
        }
        self.send_file("sendVideo", "video", path, form, timeout)
            .await
    }

    /// Stream the file into a multipart upload. The handle is opened here
    /// and lives exactly as long as the request body needs it.
    async fn send_file(
        &self,
        method: &str,
        field: &'static str,
        path: &Path,
        form: reqwest::multipart::Form,
        timeout: Duration,
    ) -> Result<()> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening artifact {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());
        let part = reqwest::multipart::Part::stream(reqwest::Body::wrap_stream(
            ReaderStream::new(file),
        ))
        .file_name(file_name);

        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .timeout(timeout)
            .multipart(form.part(field, part))
            .send()
            .await
            .with_context(|| format!("telegram {method} upload failed"))?;

        let api: ApiResponse<serde_json::Value> = response
            .json()
            .await
            .with_context(|| format!("telegram {method} returned malformed JSON"))?;
        if !api.ok {
            bail!(
                "telegram {method} rejected: {}",
                api.description.unwrap_or_else(|| "no description".to_string())
            );
        }
        Ok(())
    }
}

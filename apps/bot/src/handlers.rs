//! Update routing: link detection, the format-choice keyboard, and the
//! callback that hands a job to the dispatcher.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use skachka_core::{ConversationRef, Dispatcher, Job, MediaFormat, MessageRef, SubmitOutcome};
use tracing::{info, warn};

use crate::telegram::{CallbackQuery, InlineKeyboardButton, Message, TelegramClient, Update};

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?://)?(?:www\.)?(?:youtube\.com/watch\?v=|youtu\.be/)([A-Za-z0-9_-]{11})")
        .expect("youtube url pattern is valid")
});

const WELCOME: &str =
    "Hi! Send me a YouTube link and I'll help you download it as audio or video.";
const BAD_LINK: &str = "Please send a valid YouTube link.";
const CHOOSE_FORMAT: &str = "What format would you like?";
const PROCESSING: &str = "Processing... this may take a moment.";
const BUSY: &str = "I'm at capacity right now. Please try again in a minute.";
const BAD_CALLBACK: &str = "I couldn't read that button press. Please send the link again.";

pub struct Frontend {
    client: Arc<TelegramClient>,
    dispatcher: Dispatcher,
}

impl Frontend {
    pub fn new(client: Arc<TelegramClient>, dispatcher: Dispatcher) -> Self {
        Self { client, dispatcher }
    }

    pub async fn handle_update(&self, update: Update) {
        if let Some(message) = update.message {
            self.handle_message(message).await;
        } else if let Some(callback) = update.callback_query {
            self.handle_callback(callback).await;
        }
    }

    async fn handle_message(&self, message: Message) {
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let chat_id = message.chat.id;

        if text.starts_with("/start") {
            self.send_text(chat_id, WELCOME).await;
            return;
        }

        match extract_video_id(text) {
            Some(video_id) => {
                info!(chat = chat_id, video = video_id, "link detected, prompting for format");
                let keyboard = vec![vec![
                    InlineKeyboardButton {
                        text: "Download Audio (MP3)".to_string(),
                        callback_data: format!("a:{video_id}"),
                    },
                    InlineKeyboardButton {
                        text: "Download Video (MP4)".to_string(),
                        callback_data: format!("v:{video_id}"),
                    },
                ]];
                if let Err(e) = self
                    .client
                    .send_message(chat_id, CHOOSE_FORMAT, Some(keyboard))
                    .await
                {
                    warn!(chat = chat_id, "could not send the format prompt: {e:#}");
                }
            }
            None => self.send_text(chat_id, BAD_LINK).await,
        }
    }

    async fn handle_callback(&self, callback: CallbackQuery) {
        if let Err(e) = self.client.answer_callback_query(&callback.id, None).await {
            warn!("could not answer callback query: {e:#}");
        }
        let Some(prompt) = callback.message else {
            return;
        };
        let chat_id = prompt.chat.id;

        // the callback payload carries the whole descriptor; the canonical
        // URL comes straight back from the video id, so there is no
        // per-user "last link" state to remember or forget
        let Some((format, video_id)) =
            callback.data.as_deref().and_then(parse_callback_data)
        else {
            self.edit_text(chat_id, prompt.message_id, BAD_CALLBACK).await;
            return;
        };

        let url = format!("https://www.youtube.com/watch?v={video_id}");
        let job = Job::new(
            url,
            format,
            ConversationRef(chat_id),
            MessageRef(prompt.message_id),
        );
        let job_id = job.id;

        match self.dispatcher.submit(job) {
            SubmitOutcome::Accepted => {
                info!(chat = chat_id, job = %job_id, format = format.as_str(), "job accepted");
                self.edit_text(chat_id, prompt.message_id, PROCESSING).await;
            }
            SubmitOutcome::Busy => {
                self.edit_text(chat_id, prompt.message_id, BUSY).await;
            }
            SubmitOutcome::Duplicate => {
                // the in-flight job owns the status message; leave it alone
                info!(chat = chat_id, "duplicate button press ignored");
            }
        }
    }

    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    async fn send_text(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.client.send_message(chat_id, text, None).await {
            warn!(chat = chat_id, "could not send message: {e:#}");
        }
    }

    async fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) {
        if let Err(e) = self.client.edit_message_text(chat_id, message_id, text).await {
            warn!(chat = chat_id, "could not edit message: {e:#}");
        }
    }
}

fn extract_video_id(text: &str) -> Option<&str> {
    YOUTUBE_URL
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

fn parse_callback_data(data: &str) -> Option<(MediaFormat, &str)> {
    let (kind, video_id) = data.split_once(':')?;
    let format = match kind {
        "a" => MediaFormat::Audio,
        "v" => MediaFormat::Video,
        _ => return None,
    };
    let valid = video_id.len() == 11
        && video_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    valid.then_some((format, video_id))
}

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Error)]
pub enum BotApiError {
    /// The target message was deleted or never existed; callers fall back to
    /// sending a fresh message.
    #[error("message to edit not found")]
    MessageNotFound,
    #[error("telegram api error: {0}")]
    Api(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Thin Bot API adapter. The conversation framework lives elsewhere; the
/// queue consumer only needs to post and edit outcome messages.
pub struct BotApi {
    token: String,
    client: reqwest::Client,
}

impl BotApi {
    pub fn new(token: String, client: reqwest::Client) -> Self {
        Self { token, client }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{TELEGRAM_API_URL}/bot{}/{method}", self.token)
    }

    fn classify<T>(response: ApiResponse<T>) -> Result<T, BotApiError> {
        if response.ok {
            response
                .result
                .ok_or_else(|| BotApiError::Api("missing result".to_string()))
        } else {
            let description = response.description.unwrap_or_default();
            if description.contains("message to edit not found") {
                Err(BotApiError::MessageNotFound)
            } else {
                Err(BotApiError::Api(description))
            }
        }
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<Message, BotApiError> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "link_preview_options": { "is_disabled": true },
        });

        let response: ApiResponse<Message> = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        Self::classify(response)
    }

    pub async fn edit_message_text(
        &self,
        chat_id: &str,
        message_id: i64,
        text: &str,
    ) -> Result<(), BotApiError> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
            "link_preview_options": { "is_disabled": true },
        });

        let response: ApiResponse<serde_json::Value> = self
            .client
            .post(self.method_url("editMessageText"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        Self::classify(response).map(|_| ())
    }

    /// Edit the pending status message, falling back to a fresh message when
    /// the original is gone. Exactly one message reaches the chat either way.
    pub async fn edit_or_send(
        &self,
        chat_id: &str,
        message_id: i64,
        text: &str,
    ) -> Result<(), BotApiError> {
        match self.edit_message_text(chat_id, message_id, text).await {
            Err(BotApiError::MessageNotFound) => {
                tracing::debug!(chat_id, message_id, "message to edit not found, sending new");
                self.send_message(chat_id, text).await.map(|_| ())
            }
            other => other,
        }
    }

    pub async fn send_photo(&self, chat_id: &str, image: Vec<u8>) -> Result<(), BotApiError> {
        let form = Form::new().text("chat_id", chat_id.to_string()).part(
            "photo",
            Part::bytes(image)
                .file_name("pnl.png")
                .mime_str("image/png")
                .map_err(BotApiError::Http)?,
        );

        let response: ApiResponse<serde_json::Value> = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;

        Self::classify(response).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_edit_target_is_classified_at_the_boundary() {
        let response: ApiResponse<serde_json::Value> = serde_json::from_str(
            r#"{"ok": false, "description": "Bad Request: message to edit not found"}"#,
        )
        .unwrap();

        assert!(matches!(
            BotApi::classify(response),
            Err(BotApiError::MessageNotFound)
        ));
    }

    #[test]
    fn other_api_errors_keep_their_description() {
        let response: ApiResponse<serde_json::Value> =
            serde_json::from_str(r#"{"ok": false, "description": "Forbidden: bot was blocked"}"#)
                .unwrap();

        match BotApi::classify(response) {
            Err(BotApiError::Api(description)) => assert!(description.contains("blocked")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

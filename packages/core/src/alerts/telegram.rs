//! Telegram Bot API notification sink.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{MessageFormat, NotificationSink, SinkError};

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct TelegramSink {
    api_url: String,
    bot_token: String,
    chat_id: String,
    http: Client,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    disable_web_page_preview: bool,
}

impl TelegramSink {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self::with_api_url(DEFAULT_TELEGRAM_API_URL.to_string(), bot_token, chat_id)
    }

    pub fn with_api_url(api_url: String, bot_token: String, chat_id: String) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token,
            chat_id,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn deliver(&self, text: &str, format: MessageFormat) -> Result<(), SinkError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: match format {
                MessageFormat::Html => Some("HTML"),
                MessageFormat::Plain => None,
            },
            disable_web_page_preview: true,
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| SinkError::Delivery {
                // reqwest errors embed the URL, which carries the bot token.
                message: err.without_url().to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    fn sink_name(&self) -> &str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[tokio::test]
    async fn deliver_posts_html_message_to_bot_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"ok":true}"#, "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let sink = TelegramSink::with_api_url(server.uri(), "TOKEN".into(), "-100".into());
        sink.deliver("<b>hi</b>", MessageFormat::Html).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["chat_id"], "-100");
        assert_eq!(body["text"], "<b>hi</b>");
        assert_eq!(body["parse_mode"], "HTML");
    }

    #[tokio::test]
    async fn plain_format_omits_parse_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sink = TelegramSink::with_api_url(server.uri(), "T".into(), "1".into());
        sink.deliver("plain", MessageFormat::Plain).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body.get("parse_mode").is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad entity"))
            .mount(&server)
            .await;

        let sink = TelegramSink::with_api_url(server.uri(), "T".into(), "1".into());
        let err = sink.deliver("x", MessageFormat::Html).await.unwrap_err();

        match err {
            SinkError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad entity");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

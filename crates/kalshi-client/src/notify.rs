//! SMS/MMS notifications through the Twilio Messages API
//!
//! POST {base}/2010-04-01/Accounts/{AccountSid}/Messages.json
//! (form-encoded, HTTP basic auth with the account SID and auth token)

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{http_error, KalshiError, Result};

/// Twilio REST API base URL
pub const TWILIO_API_BASE: &str = "https://api.twilio.com";

const ENV_ACCOUNT_SID: &str = "TWILIO_ACCOUNT_SID";
const ENV_AUTH_TOKEN: &str = "TWILIO_AUTH_TOKEN";
const ENV_PHONE_NUMBER: &str = "TWILIO_PHONE_NUMBER";

/// Twilio account settings
#[derive(Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number in E.164 format
    pub from_number: String,
    pub base_url: String,
}

impl fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .field("from_number", &self.from_number)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl TwilioConfig {
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>, from_number: impl Into<String>) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            base_url: TWILIO_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Read `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN` and `TWILIO_PHONE_NUMBER`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::new(
            lookup(ENV_ACCOUNT_SID).unwrap_or_default(),
            lookup(ENV_AUTH_TOKEN).unwrap_or_default(),
            lookup(ENV_PHONE_NUMBER).unwrap_or_default(),
        );
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.account_sid.is_empty() || self.auth_token.is_empty() || self.from_number.is_empty() {
            error!("Missing Twilio credentials");
            return Err(KalshiError::Config(format!(
                "Missing Twilio credentials, set {}, {} and {}",
                ENV_ACCOUNT_SID, ENV_AUTH_TOKEN, ENV_PHONE_NUMBER
            )));
        }
        Ok(())
    }
}

/// Message resource as returned by Twilio
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub sid: String,
    pub status: String,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub to: String,
    pub from: String,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default)]
    pub date_sent: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub price_unit: Option<String>,
}

/// Outcome for one recipient of a bulk send
#[derive(Debug)]
pub struct BulkDelivery {
    pub to: String,
    pub outcome: Result<DeliveryResult>,
}

/// Twilio messaging client
#[derive(Clone, Debug)]
pub struct TwilioNotifier {
    client: Client,
    config: TwilioConfig,
}

impl TwilioNotifier {
    pub fn new(config: TwilioConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        format!("{}/2010-04-01/Accounts/{}/Messages.json", self.config.base_url, self.config.account_sid)
    }

    /// Send one SMS (or MMS when `media_urls` is non-empty)
    pub async fn send_message(&self, to: &str, body: &str, media_urls: &[String]) -> Result<DeliveryResult> {
        info!("Sending message to {}", to);

        let mut form: Vec<(&str, &str)> = vec![("To", to), ("From", self.config.from_number.as_str()), ("Body", body)];
        for url in media_urls {
            form.push(("MediaUrl", url.as_str()));
        }

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = http_error(response).await;
            error!("Twilio API error: {}", err);
            return Err(err);
        }

        let text = response.text().await?;
        let result: DeliveryResult =
            serde_json::from_str(&text).map_err(|e| KalshiError::decode("Twilio message", e))?;
        info!("Message sent successfully: {}", result.sid);
        debug!("Delivery status for {}: {}", result.sid, result.status);
        Ok(result)
    }

    /// Send the same message to every recipient; one failure does not stop the rest
    pub async fn send_bulk(&self, recipients: &[String], body: &str, media_urls: &[String]) -> Vec<BulkDelivery> {
        let mut results = Vec::with_capacity(recipients.len());
        for to in recipients {
            let outcome = self.send_message(to, body, media_urls).await;
            if let Err(e) = &outcome {
                error!("Failed to send message to {}: {}", to, e);
            }
            results.push(BulkDelivery { to: to.clone(), outcome });
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_test::assert_err;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MESSAGES_PATH: &str = "/2010-04-01/Accounts/AC123/Messages.json";

    fn message_json(to: &str) -> serde_json::Value {
        serde_json::json!({
            "sid": "SM42",
            "status": "queued",
            "error_code": null,
            "error_message": null,
            "to": to,
            "from": "+15550000000",
            "date_created": "Thu, 24 Oct 2024 20:05:11 +0000",
            "date_sent": null,
            "price": null,
            "price_unit": "USD",
            "body": "hello"
        })
    }

    async fn notifier(server: &MockServer) -> TwilioNotifier {
        let config = TwilioConfig::new("AC123", "secret", "+15550000000").with_base_url(&server.uri());
        TwilioNotifier::new(config).unwrap()
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let vars: HashMap<&str, &str> = [(ENV_ACCOUNT_SID, "AC123"), (ENV_AUTH_TOKEN, "secret")].into();
        let result = TwilioConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert!(matches!(result, Err(KalshiError::Config(_))));
    }

    #[test]
    fn test_config_from_lookup_and_redacted_debug() {
        let vars: HashMap<&str, &str> =
            [(ENV_ACCOUNT_SID, "AC123"), (ENV_AUTH_TOKEN, "secret"), (ENV_PHONE_NUMBER, "+15550000000")].into();
        let config = TwilioConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.base_url, TWILIO_API_BASE);
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[tokio::test]
    async fn test_send_message_posts_form_and_parses_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MESSAGES_PATH))
            .and(header_exists("authorization"))
            .and(body_string_contains("To=%2B15551234567"))
            .and(body_string_contains("Body=hello"))
            .and(body_string_contains("MediaUrl=https%3A%2F%2Fexample.com%2Fchart.png"))
            .respond_with(ResponseTemplate::new(201).set_body_json(message_json("+15551234567")))
            .expect(1)
            .mount(&server)
            .await;

        let result = notifier(&server)
            .await
            .send_message("+15551234567", "hello", &["https://example.com/chart.png".to_string()])
            .await
            .unwrap();

        assert_eq!(result.sid, "SM42");
        assert_eq!(result.status, "queued");
        assert_eq!(result.to, "+15551234567");
        assert_eq!(result.error_code, None);
        assert_eq!(result.price_unit.as_deref(), Some("USD"));
    }

    #[tokio::test]
    async fn test_send_message_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MESSAGES_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"code":21211,"message":"Invalid 'To'"}"#))
            .mount(&server)
            .await;

        let err = assert_err!(notifier(&server).await.send_message("bogus", "hello", &[]).await);
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("21211"));
    }

    #[tokio::test]
    async fn test_send_bulk_continues_after_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MESSAGES_PATH))
            .and(body_string_contains("To=bad"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad number"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(MESSAGES_PATH))
            .and(body_string_contains("To=%2B1555"))
            .respond_with(ResponseTemplate::new(201).set_body_json(message_json("+15551111111")))
            .mount(&server)
            .await;

        let recipients = vec!["bad".to_string(), "+15551111111".to_string()];
        let results = notifier(&server).await.send_bulk(&recipients, "hi", &[]).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].to, "bad");
        assert!(results[0].outcome.is_err());
        assert_eq!(results[1].outcome.as_ref().unwrap().sid, "SM42");
    }
}

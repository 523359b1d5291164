//! Welcome email delivery for new newsletter subscribers
//!
//! Delivery is best-effort: a failed send is logged and swallowed so it can
//! never fail the subscribe request that triggered it.

use reqwest::Client;
use serde_json::json;

const DEFAULT_API_BASE: &str = "https://api.resend.com";

#[derive(Clone)]
pub struct WelcomeEmailService {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    from_address: String,
}

impl WelcomeEmailService {
    pub fn from_env() -> Self {
        Self {
            client: Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: std::env::var("MAIL_API_KEY").ok().filter(|k| !k.is_empty()),
            from_address: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "CourierPress <newsletter@courierpress.io>".to_string()),
        }
    }

    #[cfg(test)]
    fn with_api_base(api_base: &str, api_key: &str, from_address: &str) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.to_string(),
            api_key: Some(api_key.to_string()),
            from_address: from_address.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Send the welcome email. Never returns an error; failures are logged.
    pub async fn send_welcome(&self, to: &str, name: Option<&str>) {
        let Some(api_key) = &self.api_key else {
            tracing::debug!(to = %to, "Welcome email skipped (MAIL_API_KEY not set)");
            return;
        };

        let greeting = name.map(|n| format!("Hi {n},")).unwrap_or_else(|| "Hi,".to_string());
        let body = json!({
            "from": self.from_address,
            "to": [to],
            "subject": "Welcome to the CourierPress newsletter",
            "text": format!(
                "{greeting}\n\nThanks for subscribing to CourierPress. You'll hear from us \
                 with new articles and income reports.\n\nYou can unsubscribe at any time."
            ),
        });

        let result = self
            .client
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(to = %to, "Welcome email sent");
            }
            Ok(response) => {
                tracing::warn!(
                    to = %to,
                    status = %response.status(),
                    "Welcome email rejected by mail provider"
                );
            }
            Err(e) => {
                tracing::warn!(to = %to, error = %e, "Welcome email request failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sends_welcome_email_to_mail_provider() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_body(r#"{"id":"email_1"}"#)
            .create_async()
            .await;

        let service = WelcomeEmailService::with_api_base(
            &server.url(),
            "test-key",
            "CourierPress <newsletter@test.local>",
        );
        service.send_welcome("reader@example.com", Some("Casey")).await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn provider_failure_is_swallowed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/emails")
            .with_status(500)
            .create_async()
            .await;

        let service = WelcomeEmailService::with_api_base(
            &server.url(),
            "test-key",
            "CourierPress <newsletter@test.local>",
        );
        // Must not panic or propagate anything
        service.send_welcome("reader@example.com", None).await;
    }

    #[test]
    fn disabled_without_api_key() {
        std::env::remove_var("MAIL_API_KEY");
        let service = WelcomeEmailService::from_env();
        assert!(!service.is_enabled());
    }
}

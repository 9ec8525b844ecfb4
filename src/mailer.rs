//! Outbound email, treated as a black box: POST to an HTTP email API.
//! No endpoint configured means sends are skipped with a debug log;
//! flows that must deliver a link check `is_configured()` first and
//! fail with `NotConfigured`.

use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

/// Upper bound on a send; a stuck mail API must not hang the sign-in flow.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Mailer {
    client: reqwest::Client,
    endpoint: Option<String>,
    from: String,
}

#[derive(Serialize)]
struct OutboundMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

impl Mailer {
    pub fn new(endpoint: Option<String>, from: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint,
            from,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    pub async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
        let url = match &self.endpoint {
            Some(u) => u,
            None => {
                tracing::debug!(to, "no mail endpoint configured, skipping send");
                return Ok(());
            }
        };

        let resp = self
            .client
            .post(url)
            .json(&OutboundMail {
                from: &self.from,
                to,
                subject,
                html,
            })
            .send()
            .await
            .context("failed to reach mail endpoint")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("mail endpoint returned error: status={}, body={}", status, body);
        }

        tracing::info!(to, subject, "email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_mail_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(body_partial_json(serde_json::json!({
                "to": "pilot@example.com",
                "subject": "Your sign-in link",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mailer = Mailer::new(
            Some(format!("{}/send", server.uri())),
            "no-reply@pilotgate.app".into(),
        );
        mailer
            .send("pilot@example.com", "Your sign-in link", "<a href=x>link</a>")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upstream_error_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mailer = Mailer::new(Some(server.uri()), "no-reply@pilotgate.app".into());
        assert!(mailer.send("p@x.y", "s", "h").await.is_err());
    }

    #[tokio::test]
    async fn unconfigured_mailer_skips() {
        let mailer = Mailer::new(None, "no-reply@pilotgate.app".into());
        assert!(mailer.send("p@x.y", "s", "h").await.is_ok());
        assert!(!mailer.is_configured());
    }
}

//! Outbound webhook config + HMAC-signed dispatch.
//!
//! The signing scheme mirrors `skynet_gateway::http::webhooks`'s inbound
//! verification (HMAC-SHA256, `sha256=<hex>` header), applied in the other
//! direction: we sign what we send instead of verifying what we receive.

use std::fs::OpenOptions;
use std::io::Write;

use chrono::{DateTime, Utc};
use figment::providers::{Format, Toml};
use figment::Figment;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, warn};

use relay_core::types::{WebhookEndpoint, WebhookEvent};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhooks: Vec<WebhookEndpoint>,
}

/// Load `webhook.toml`. A missing file is treated as "dispatch disabled"
/// rather than a startup error — webhooks are optional.
pub fn load_webhook_config(path: &str) -> WebhookConfig {
    if !std::path::Path::new(path).exists() {
        return WebhookConfig::default();
    }
    let mut config: WebhookConfig = Figment::new()
        .merge(Toml::file(path))
        .extract()
        .unwrap_or_else(|e| {
            warn!(error = %e, path, "failed to parse webhook config, dispatch disabled");
            WebhookConfig::default()
        });

    config.webhooks.retain(|endpoint| {
        let ok = endpoint.url.starts_with("https://");
        if !ok {
            warn!(endpoint = %endpoint.name, url = %endpoint.url, "webhook endpoint url must use https, dropping endpoint");
        }
        ok
    });
    config
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event: WebhookEvent,
    pub timestamp: DateTime<Utc>,
    pub project: String,
    pub workflow: String,
    pub success: bool,
    pub summary: String,
    pub cost_usd: f64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

impl WebhookPayload {
    /// `summary` is truncated to 200 chars per the wire contract.
    pub fn capped_summary(mut self) -> Self {
        if self.summary.chars().count() > 200 {
            self.summary = self.summary.chars().take(200).collect();
        }
        self
    }
}

pub struct WebhookDispatcher {
    client: reqwest::Client,
    config_path: String,
    dead_letter_path: String,
}

impl WebhookDispatcher {
    pub fn new(config_path: String, dead_letter_path: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            config_path,
            dead_letter_path,
        }
    }

    /// Dispatch `payload` to every endpoint subscribed to `payload.event`.
    /// Never propagates a failure to the caller — fire-and-forget.
    pub async fn dispatch(&self, payload: &WebhookPayload) {
        let config = load_webhook_config(&self.config_path);
        if !config.enabled {
            return;
        }

        for endpoint in config
            .webhooks
            .iter()
            .filter(|e| e.events.iter().any(|ev| *ev == payload.event))
        {
            if let Err(e) = self.send_one(endpoint, payload).await {
                error!(endpoint = %endpoint.name, error = %e, "webhook delivery failed");
                self.write_dead_letter(endpoint, payload, &e);
            }
        }
    }

    async fn send_one(&self, endpoint: &WebhookEndpoint, payload: &WebhookPayload) -> Result<(), String> {
        let body = serde_json::to_vec(payload).map_err(|e| e.to_string())?;

        let mut request = self
            .client
            .post(&endpoint.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "PilotLynx-Webhook/1.0");

        for (key, value) in &endpoint.headers {
            request = request.header(key, value);
        }

        if let Some(secret) = &endpoint.secret {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| e.to_string())?;
            mac.update(&body);
            let signature = hex::encode(mac.finalize().into_bytes());
            request = request.header("X-PilotLynx-Signature", format!("sha256={signature}"));
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("endpoint returned {}", response.status()));
        }
        Ok(())
    }

    fn write_dead_letter(&self, endpoint: &WebhookEndpoint, payload: &WebhookPayload, error: &str) {
        let entry = serde_json::json!({
            "endpoint": endpoint.name,
            "url": endpoint.url,
            "payload": payload,
            "error": error,
            "recorded_at": Utc::now().to_rfc3339(),
        });
        let line = match serde_json::to_string(&entry) {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "failed to serialize dead letter entry");
                return;
            }
        };

        let file = OpenOptions::new().create(true).append(true).open(&self.dead_letter_path);
        match file {
            Ok(mut f) => {
                if let Err(e) = writeln!(f, "{line}") {
                    error!(error = %e, "failed to append dead letter entry");
                }
            }
            Err(e) => error!(error = %e, path = %self.dead_letter_path, "failed to open dead letter file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_payload() -> WebhookPayload {
        WebhookPayload {
            event: WebhookEvent::RelayRunComplete,
            timestamp: Utc::now(),
            project: "alpha".into(),
            workflow: "default".into(),
            success: true,
            summary: "ok".into(),
            cost_usd: 0.1,
            duration_ms: 500,
            model: None,
            platform: Some("slack".into()),
            channel_id: Some("C1".into()),
        }
    }

    #[test]
    fn missing_config_file_disables_dispatch() {
        let config = load_webhook_config("/nonexistent/webhook.toml");
        assert!(!config.enabled);
        assert!(config.webhooks.is_empty());
    }

    #[test]
    fn load_webhook_config_rejects_non_https_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webhook.toml");
        std::fs::write(
            &path,
            r#"
            version = 1
            enabled = true

            [[webhooks]]
            name = "insecure"
            url = "http://example.com/hook"
            events = ["relay_run_complete"]

            [[webhooks]]
            name = "secure"
            url = "https://example.com/hook"
            events = ["relay_run_complete"]
            "#,
        )
        .unwrap();

        let config = load_webhook_config(path.to_string_lossy().as_ref());
        assert_eq!(config.webhooks.len(), 1);
        assert_eq!(config.webhooks[0].name, "secure");
    }

    #[test]
    fn summary_is_capped_at_200_chars() {
        let mut payload = sample_payload();
        payload.summary = "x".repeat(500);
        let capped = payload.capped_summary();
        assert_eq!(capped.summary.chars().count(), 200);
    }

    #[test]
    fn summary_under_cap_is_unchanged() {
        let payload = sample_payload().capped_summary();
        assert_eq!(payload.summary, "ok");
    }

    #[tokio::test]
    async fn dead_letter_is_appended_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dead_letter = dir.path().join("dead.jsonl");
        let dispatcher = WebhookDispatcher::new(
            "/nonexistent/webhook.toml".into(),
            dead_letter.to_string_lossy().to_string(),
        );
        let endpoint = WebhookEndpoint {
            name: "test".into(),
            url: "http://127.0.0.1:1/unreachable".into(),
            events: vec![WebhookEvent::RelayRunComplete],
            secret: None,
            headers: HashMap::new(),
        };
        let payload = sample_payload();
        let result = dispatcher.send_one(&endpoint, &payload).await;
        assert!(result.is_err());
        dispatcher.write_dead_letter(&endpoint, &payload, &result.unwrap_err());
        let contents = std::fs::read_to_string(&dead_letter).unwrap();
        assert!(contents.contains("relay_run_complete"));
    }
}

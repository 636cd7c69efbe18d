//! Circle Iris attestation API client
//!
//! `GET <base>/0x<lookup_id>` answers with
//! `{"status": "complete" | "pending_confirmations", "attestation": "0x..."}`.

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{AttestationOutcome, AttestationSource};
use crate::config::AttestationConfig;
use crate::hash::decode_hex;

#[derive(Debug, Deserialize)]
struct AttestationResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    attestation: Option<String>,
}

/// Classify one attestation service response
pub fn classify(http_status: u16, body: &str) -> AttestationOutcome {
    // The service rejects malformed lookups outright; nothing will change on retry
    if http_status == 400 {
        return AttestationOutcome::Invalid(format!("HTTP 400: {}", truncate(body)));
    }

    if !(200..300).contains(&http_status) {
        return AttestationOutcome::NotReady(format!("HTTP {}", http_status));
    }

    let response: AttestationResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => return AttestationOutcome::NotReady(format!("malformed body: {}", e)),
    };

    match response.status.as_deref() {
        Some("complete") => {}
        Some(other) => return AttestationOutcome::NotReady(format!("status {}", other)),
        None => return AttestationOutcome::NotReady("missing status".to_string()),
    }

    match response.attestation.as_deref().map(decode_hex) {
        Some(Ok(bytes)) if !bytes.is_empty() => AttestationOutcome::Ready(bytes),
        Some(Ok(_)) | None => {
            AttestationOutcome::NotReady("complete without attestation".to_string())
        }
        Some(Err(e)) => AttestationOutcome::NotReady(format!("undecodable attestation: {}", e)),
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(256) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// reqwest-backed attestation source
pub struct IrisClient {
    client: Client,
    base_url: String,
}

impl IrisClient {
    pub fn new(config: &AttestationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .wrap_err("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, lookup_id: &str) -> String {
        format!("{}/0x{}", self.base_url, lookup_id)
    }
}

#[async_trait]
impl AttestationSource for IrisClient {
    async fn fetch(&self, lookup_id: &str) -> AttestationOutcome {
        let response = match self.client.get(self.url_for(lookup_id)).send().await {
            Ok(response) => response,
            Err(e) => return AttestationOutcome::NotReady(format!("request failed: {}", e)),
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => classify(status, &body),
            Err(e) => AttestationOutcome::NotReady(format!("failed to read body: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_complete_with_attestation_is_ready() {
        let outcome = classify(200, r#"{"status":"complete","attestation":"0xdeadbeef"}"#);
        assert_eq!(outcome, AttestationOutcome::Ready(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn test_pending_is_not_ready() {
        let outcome = classify(
            200,
            r#"{"status":"pending_confirmations","attestation":"PENDING"}"#,
        );
        assert!(matches!(outcome, AttestationOutcome::NotReady(_)));
    }

    #[test]
    fn test_non_success_and_malformed_are_not_ready() {
        assert!(matches!(classify(404, "{}"), AttestationOutcome::NotReady(_)));
        assert!(matches!(classify(500, ""), AttestationOutcome::NotReady(_)));
        assert!(matches!(
            classify(200, "<html>"),
            AttestationOutcome::NotReady(_)
        ));
        assert!(matches!(
            classify(200, r#"{"status":"complete","attestation":"0xzz"}"#),
            AttestationOutcome::NotReady(_)
        ));
        assert!(matches!(
            classify(200, r#"{"status":"complete"}"#),
            AttestationOutcome::NotReady(_)
        ));
    }

    #[test]
    fn test_bad_request_is_invalid() {
        assert!(matches!(
            classify(400, r#"{"error":"Invalid message hash"}"#),
            AttestationOutcome::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn test_fetch_queries_prefixed_lookup_id() {
        let server = MockServer::start().await;
        let lookup_id = "ab".repeat(32);
        Mock::given(method("GET"))
            .and(path(format!("/attestations/0x{}", lookup_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "complete",
                "attestation": "0x0102"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = AttestationConfig {
            base_url: format!("{}/attestations/", server.uri()),
            ..AttestationConfig::default()
        };
        let client = IrisClient::new(&config).unwrap();
        assert_eq!(
            client.fetch(&lookup_id).await,
            AttestationOutcome::Ready(vec![1, 2])
        );
    }

    #[tokio::test]
    async fn test_fetch_unknown_hash_is_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": "Message hash not found"
            })))
            .mount(&server)
            .await;

        let config = AttestationConfig {
            base_url: server.uri(),
            ..AttestationConfig::default()
        };
        let client = IrisClient::new(&config).unwrap();
        assert!(matches!(
            client.fetch("00").await,
            AttestationOutcome::NotReady(_)
        ));
    }
}

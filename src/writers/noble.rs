//! Noble transaction signing and broadcast
//!
//! Signs `MsgReceiveMessage` with a mnemonic-derived secp256k1 key and
//! broadcasts through the LCD REST endpoint. The caller owns the account
//! sequence; this client never caches it.

use async_trait::async_trait;
use bip39::Mnemonic;
use cosmrs::{
    bip32::DerivationPath,
    crypto::secp256k1::SigningKey,
    tx::{self, Fee, SignDoc, SignerInfo},
    AccountId, Coin,
};
use eyre::{eyre, Result, WrapErr};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::msgs::MsgReceiveMessage;
use super::{AccountInfo, Submitter, TxResponse};
use crate::config::DestinationConfig;

/// Signs and broadcasts CCTP receive transactions on Noble
pub struct NobleClient {
    signing_key: SigningKey,
    address: AccountId,
    lcd_url: String,
    chain_id: String,
    client: Client,
    gas_limit: u64,
    gas_price: f64,
    fee_denom: String,
}

impl NobleClient {
    pub fn new(config: &DestinationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .wrap_err("Failed to create HTTP client")?;

        let mnemonic =
            Mnemonic::parse(&config.mnemonic).map_err(|e| eyre!("Invalid mnemonic: {}", e))?;

        let seed = mnemonic.to_seed("");
        let path: DerivationPath = config
            .derivation_path
            .parse()
            .map_err(|e| eyre!("Invalid derivation path: {:?}", e))?;

        let signing_key = SigningKey::derive_from_path(seed, &path)
            .map_err(|e| eyre!("Failed to derive signing key: {}", e))?;

        let address = signing_key
            .public_key()
            .account_id(&config.bech32_prefix)
            .map_err(|e| eyre!("Failed to get account ID: {}", e))?;

        info!(
            address = %address,
            chain_id = %config.chain_id,
            gas_limit = config.gas_limit,
            "Noble signer initialized"
        );

        Ok(Self {
            signing_key,
            address,
            lcd_url: config.lcd_url.trim_end_matches('/').to_string(),
            chain_id: config.chain_id.clone(),
            client,
            gas_limit: config.gas_limit,
            gas_price: config.gas_price,
            fee_denom: config.fee_denom.clone(),
        })
    }

    fn fee(&self) -> Result<Fee> {
        let amount = (self.gas_limit as f64 * self.gas_price).ceil() as u128;
        let denom = self
            .fee_denom
            .parse()
            .map_err(|e| eyre!("Invalid fee denom '{}': {}", self.fee_denom, e))?;
        Ok(Fee::from_amount_and_gas(
            Coin { denom, amount },
            self.gas_limit,
        ))
    }

    fn sign_receive_message(
        &self,
        message: &[u8],
        attestation: &[u8],
        account: &AccountInfo,
    ) -> Result<Vec<u8>> {
        let msg = MsgReceiveMessage {
            from: self.address.to_string(),
            message: message.to_vec(),
            attestation: attestation.to_vec(),
        };

        let body = tx::Body::new(vec![msg.to_any()], "", 0u32);

        let signer_info =
            SignerInfo::single_direct(Some(self.signing_key.public_key()), account.sequence);
        let auth_info = signer_info.auth_info(self.fee()?);

        let chain_id = self
            .chain_id
            .parse()
            .map_err(|_| eyre!("Invalid chain ID {}", self.chain_id))?;

        let sign_doc = SignDoc::new(&body, &auth_info, &chain_id, account.account_number)
            .map_err(|e| eyre!("Failed to create sign doc: {}", e))?;

        let tx_raw = sign_doc
            .sign(&self.signing_key)
            .map_err(|e| eyre!("Failed to sign transaction: {}", e))?;

        tx_raw
            .to_bytes()
            .map_err(|e| eyre!("Failed to serialize transaction: {}", e))
    }

    /// Broadcast signed bytes; any HTTP-level failure is an error, chain
    /// results (including non-zero codes) are returned as a response
    async fn broadcast(&self, tx_bytes: &[u8]) -> Result<TxResponse> {
        let tx_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, tx_bytes);

        let broadcast_request = serde_json::json!({
            "tx_bytes": tx_b64,
            "mode": "BROADCAST_MODE_SYNC"
        });

        let broadcast_url = format!("{}/cosmos/tx/v1beta1/txs", self.lcd_url);
        debug!(url = %broadcast_url, "Broadcasting Noble transaction");

        let response = self
            .client
            .post(&broadcast_url)
            .json(&broadcast_request)
            .send()
            .await
            .wrap_err("Failed to broadcast transaction")?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .wrap_err_with(|| format!("Broadcast returned a non-JSON body (HTTP {})", status))?;

        if !status.is_success() {
            return Err(eyre!("Broadcast failed (HTTP {}): {}", status, body));
        }

        parse_tx_response(&body)
    }
}

/// Extract the `tx_response` of a broadcast result
pub fn parse_tx_response(body: &Value) -> Result<TxResponse> {
    let tx_response = body
        .get("tx_response")
        .ok_or_else(|| eyre!("Missing tx_response in broadcast result: {}", body))?;

    let code = tx_response.get("code").and_then(|v| v.as_u64()).unwrap_or(0);

    Ok(TxResponse {
        code: u32::try_from(code).map_err(|_| eyre!("Response code {} out of range", code))?,
        codespace: str_field(tx_response, "codespace"),
        txhash: str_field(tx_response, "txhash"),
        raw_log: str_field(tx_response, "raw_log"),
    })
}

/// Parse `/cosmos/auth/v1beta1/accounts/<addr>`, flat or vesting (`base_account`) form
pub fn parse_account_info(body: &Value) -> Result<AccountInfo> {
    let account = body
        .get("account")
        .ok_or_else(|| eyre!("Missing 'account' field in response"))?;

    let field = |name: &str| -> Result<u64> {
        account
            .get(name)
            .or_else(|| account.get("base_account").and_then(|b| b.get(name)))
            .and_then(|v| v.as_str())
            .unwrap_or("0")
            .parse()
            .wrap_err_with(|| format!("Invalid account {}", name))
    };

    Ok(AccountInfo {
        account_number: field("account_number")?,
        sequence: field("sequence")?,
    })
}

fn str_field(value: &Value, name: &str) -> String {
    value
        .get(name)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Submitter for NobleClient {
    fn address(&self) -> String {
        self.address.to_string()
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        let url = format!(
            "{}/cosmos/auth/v1beta1/accounts/{}",
            self.lcd_url, self.address
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .wrap_err("Failed to query account info")?;

        let status = response.status();
        if !status.is_success() {
            return Err(eyre!(
                "Account query failed: {} - {}",
                status,
                response.text().await.unwrap_or_default()
            ));
        }

        let body: Value = response
            .json()
            .await
            .wrap_err("Account query returned a non-JSON body")?;
        parse_account_info(&body)
    }

    async fn receive_message(
        &self,
        message: &[u8],
        attestation: &[u8],
        account: &AccountInfo,
    ) -> Result<TxResponse> {
        debug!(
            sequence = account.sequence,
            account_number = account.account_number,
            "Signing MsgReceiveMessage"
        );
        let tx_bytes = self.sign_receive_message(message, attestation, account)?;
        self.broadcast(&tx_bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn config(lcd_url: &str) -> DestinationConfig {
        DestinationConfig {
            lcd_url: lcd_url.to_string(),
            chain_id: "noble-1".to_string(),
            domain: 4,
            mnemonic: MNEMONIC.to_string(),
            bech32_prefix: "noble".to_string(),
            derivation_path: "m/44'/118'/0'/0/0".to_string(),
            gas_limit: 200_000,
            gas_price: 0.1,
            fee_denom: "uusdc".to_string(),
        }
    }

    #[test]
    fn test_address_uses_configured_prefix() {
        let client = NobleClient::new(&config("http://localhost:1317")).unwrap();
        let address = client.address();
        assert!(address.starts_with("noble1"));
        assert_eq!(address.len(), "noble1".len() + 38);
    }

    #[test]
    fn test_invalid_mnemonic_rejected() {
        let mut config = config("http://localhost:1317");
        config.mnemonic = "not a real mnemonic at all".to_string();
        assert!(NobleClient::new(&config).is_err());
    }

    #[test]
    fn test_parse_account_info_flat_and_nested() {
        let flat = serde_json::json!({
            "account": {"account_number": "42", "sequence": "7"}
        });
        let info = parse_account_info(&flat).unwrap();
        assert_eq!((info.account_number, info.sequence), (42, 7));

        let nested = serde_json::json!({
            "account": {"base_account": {"account_number": "3", "sequence": "11"}}
        });
        let info = parse_account_info(&nested).unwrap();
        assert_eq!((info.account_number, info.sequence), (3, 11));

        assert!(parse_account_info(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_parse_tx_response() {
        let body = serde_json::json!({
            "tx_response": {"code": 32, "codespace": "sdk", "txhash": "ABC", "raw_log": "account sequence mismatch"}
        });
        let resp = parse_tx_response(&body).unwrap();
        assert_eq!(resp.code, 32);
        assert_eq!(resp.codespace, "sdk");
        assert_eq!(resp.txhash, "ABC");

        let ok = serde_json::json!({"tx_response": {"txhash": "DEF"}});
        assert_eq!(parse_tx_response(&ok).unwrap().code, 0);
    }

    #[tokio::test]
    async fn test_account_info_from_lcd() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/cosmos/auth/v1beta1/accounts/noble1[a-z0-9]+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "account": {
                    "@type": "/cosmos.auth.v1beta1.BaseAccount",
                    "account_number": "12",
                    "sequence": "34"
                }
            })))
            .mount(&server)
            .await;

        let client = NobleClient::new(&config(&server.uri())).unwrap();
        let info = client.account_info().await.unwrap();
        assert_eq!(info.account_number, 12);
        assert_eq!(info.sequence, 34);
    }

    #[tokio::test]
    async fn test_receive_message_broadcasts_sync() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cosmos/tx/v1beta1/txs"))
            .and(body_partial_json(
                serde_json::json!({"mode": "BROADCAST_MODE_SYNC"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tx_response": {"code": 0, "txhash": "F00D", "raw_log": ""}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = NobleClient::new(&config(&server.uri())).unwrap();
        let account = AccountInfo {
            account_number: 1,
            sequence: 0,
        };
        let resp = client
            .receive_message(&[1u8; 248], &[2u8; 130], &account)
            .await
            .unwrap();
        assert_eq!(resp.code, 0);
        assert_eq!(resp.txhash, "F00D");
    }

    #[tokio::test]
    async fn test_http_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cosmos/tx/v1beta1/txs"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(serde_json::json!({"message": "down"})),
            )
            .mount(&server)
            .await;

        let client = NobleClient::new(&config(&server.uri())).unwrap();
        let account = AccountInfo {
            account_number: 1,
            sequence: 0,
        };
        let err = client
            .receive_message(&[1u8; 248], &[2u8; 130], &account)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}

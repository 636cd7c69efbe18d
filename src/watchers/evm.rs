use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

use super::{LogSource, RawLog};
use crate::config::SourceConfig;
use crate::hash::message_sent_topic;
use crate::rpc_fallback::{create_providers, next_endpoint};

/// MessageSent logs over EVM JSON-RPC, with fallback endpoints
pub struct EvmLogSource {
    providers: Vec<RootProvider<Http<Client>>>,
    urls: Vec<String>,
    active: AtomicUsize,
    transmitter: Address,
    finality_blocks: u64,
}

impl EvmLogSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let urls = config.rpc_urls();
        let providers = create_providers(&urls)?;

        let transmitter = Address::from_str(&config.message_transmitter)
            .wrap_err("Invalid message transmitter address")?;

        Ok(Self {
            providers,
            urls,
            active: AtomicUsize::new(0),
            transmitter,
            finality_blocks: config.finality_blocks,
        })
    }

    fn provider(&self) -> &RootProvider<Http<Client>> {
        &self.providers[self.active.load(Ordering::Relaxed) % self.providers.len()]
    }

    pub fn active_url(&self) -> &str {
        &self.urls[self.active.load(Ordering::Relaxed) % self.urls.len()]
    }
}

#[async_trait]
impl LogSource for EvmLogSource {
    async fn safe_head(&self) -> Result<u64> {
        let head = self
            .provider()
            .get_block_number()
            .await
            .wrap_err("Failed to get block number")?;
        Ok(head.saturating_sub(self.finality_blocks))
    }

    async fn message_sent_logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>> {
        let filter = Filter::new()
            .address(self.transmitter)
            .event_signature(B256::from(message_sent_topic()))
            .from_block(from)
            .to_block(to);

        let logs = self
            .provider()
            .get_logs(&filter)
            .await
            .wrap_err("Failed to get logs")?;

        logs.iter().map(to_raw_log).collect()
    }

    fn rotate_endpoint(&self) {
        if self.providers.len() < 2 {
            return;
        }
        let current = self.active.load(Ordering::Relaxed);
        let next = next_endpoint(current, self.providers.len());
        self.active.store(next, Ordering::Relaxed);
        warn!(
            from = %self.urls[current % self.urls.len()],
            to = %self.urls[next],
            "Switching source RPC endpoint"
        );
    }
}

/// Pending logs carry no transaction hash or block number and are rejected
pub fn to_raw_log(log: &Log) -> Result<RawLog> {
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| eyre!("Missing transaction hash"))?;
    let block_number = log
        .block_number
        .ok_or_else(|| eyre!("Missing block number"))?;

    Ok(RawLog {
        tx_hash: format!("{:?}", tx_hash),
        block_number,
        topics: log.topics().iter().map(|topic| topic.0).collect(),
        data: log.data().data.to_vec(),
    })
}

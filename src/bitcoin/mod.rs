//! Bitcoin (UTXO chain) data access
//!
//! This module provides:
//! - The `ChainDataProvider` contract every Bitcoin backend satisfies
//! - Esplora-shaped data models shared by all backends
//! - A mempool.space backend and a Blockstream electrs backend

pub mod electrs;
pub mod esplora;
pub mod mempool;

pub use electrs::ElectrsProvider;
pub use esplora::EsploraHttp;
pub use mempool::MempoolProvider;

use crate::config::{BitcoinBackend, BitcoinConfig};
use crate::error::ResolveResult;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Fee rate tiers in sat/vB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub fastest_fee: u64,
    pub half_hour_fee: u64,
    pub hour_fee: u64,
    pub economy_fee: u64,
    pub minimum_fee: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressStats {
    pub funded_txo_count: u64,
    pub funded_txo_sum: u64,
    pub spent_txo_count: u64,
    pub spent_txo_sum: u64,
    pub tx_count: u64,
}

/// Address snapshot as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAddress {
    pub address: String,
    pub chain_stats: AddressStats,
    pub mempool_stats: AddressStats,
}

impl ChainAddress {
    /// Zero-balance snapshot for an address the backend has never seen
    pub fn empty(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            chain_stats: AddressStats::default(),
            mempool_stats: AddressStats::default(),
        }
    }

    /// Confirmed balance in sats
    pub fn confirmed_balance(&self) -> u64 {
        self.chain_stats
            .funded_txo_sum
            .saturating_sub(self.chain_stats.spent_txo_sum)
    }

    /// Net mempool change in sats, negative while spends are pending
    pub fn unconfirmed_balance(&self) -> i64 {
        self.mempool_stats.funded_txo_sum as i64 - self.mempool_stats.spent_txo_sum as i64
    }

    pub fn tx_count(&self) -> u64 {
        self.chain_stats.tx_count + self.mempool_stats.tx_count
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcTxStatus {
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub status: BtcTxStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcOutput {
    pub scriptpubkey: String,
    #[serde(default)]
    pub scriptpubkey_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcInput {
    pub txid: String,
    pub vout: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevout: Option<BtcOutput>,
    #[serde(default)]
    pub is_coinbase: bool,
    pub sequence: u32,
}

/// Bitcoin transaction in Esplora shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcTransaction {
    pub txid: String,
    pub version: i32,
    pub locktime: u32,
    pub vin: Vec<BtcInput>,
    pub vout: Vec<BtcOutput>,
    pub size: u64,
    pub weight: u64,
    #[serde(default)]
    pub fee: u64,
    pub status: BtcTxStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub height: u64,
    pub version: u32,
    pub timestamp: u64,
    pub tx_count: u64,
    pub size: u64,
    pub weight: u64,
    pub merkle_root: String,
    #[serde(default)]
    pub previousblockhash: Option<String>,
    #[serde(default)]
    pub mediantime: Option<u64>,
    pub nonce: u64,
    pub bits: u64,
    pub difficulty: f64,
}

/// Read-only contract every Bitcoin backend implements.
///
/// Calls are idempotent. Absent entities surface as `NotFound`, except where
/// a backend documents otherwise (unknown addresses come back as an empty
/// snapshot on both bundled backends).
#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    async fn recommended_fees(&self) -> ResolveResult<FeeEstimate>;

    async fn address(&self, address: &str) -> ResolveResult<ChainAddress>;

    /// Unspent outputs of an address; no ordering guarantee
    async fn address_utxos(&self, address: &str) -> ResolveResult<Vec<Utxo>>;

    /// One page of address history, continuing after `after` when given.
    /// An empty page marks the end of history.
    async fn address_transactions(
        &self,
        address: &str,
        after: Option<&str>,
    ) -> ResolveResult<Vec<BtcTransaction>>;

    async fn transaction(&self, txid: &str) -> ResolveResult<BtcTransaction>;

    async fn transaction_hex(&self, txid: &str) -> ResolveResult<String>;

    async fn block(&self, hash: &str) -> ResolveResult<Block>;

    async fn block_transactions(&self, hash: &str) -> ResolveResult<Vec<BtcTransaction>>;

    async fn block_height_to_hash(&self, height: u64) -> ResolveResult<String>;

    /// Raw 80-byte header as hex
    async fn block_header(&self, hash: &str) -> ResolveResult<String>;

    async fn block_txids(&self, hash: &str) -> ResolveResult<Vec<String>>;

    async fn chain_tip(&self) -> ResolveResult<String>;
}

/// Build the backend selected in configuration
pub fn provider_from_config(config: &BitcoinConfig) -> ResolveResult<Arc<dyn ChainDataProvider>> {
    let http = EsploraHttp::new(config)?;
    Ok(match config.backend {
        BitcoinBackend::Mempool => Arc::new(MempoolProvider::new(http)),
        BitcoinBackend::Electrs => Arc::new(ElectrsProvider::new(http)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_balances() {
        let address: ChainAddress = serde_json::from_str(
            r#"{
                "address": "bc1qxyz",
                "chain_stats": {"funded_txo_count": 3, "funded_txo_sum": 150000, "spent_txo_count": 1, "spent_txo_sum": 50000, "tx_count": 3},
                "mempool_stats": {"funded_txo_count": 0, "funded_txo_sum": 0, "spent_txo_count": 1, "spent_txo_sum": 20000, "tx_count": 1}
            }"#,
        )
        .unwrap();
        assert_eq!(address.confirmed_balance(), 100_000);
        assert_eq!(address.unconfirmed_balance(), -20_000);
        assert_eq!(address.tx_count(), 4);

        let empty = ChainAddress::empty("bc1qnew");
        assert_eq!(empty.confirmed_balance(), 0);
        assert_eq!(empty.unconfirmed_balance(), 0);
    }

    #[test]
    fn test_parse_unconfirmed_transaction() {
        let tx: BtcTransaction = serde_json::from_str(
            r#"{
                "txid": "aa",
                "version": 2,
                "locktime": 0,
                "vin": [{"txid": "bb", "vout": 1, "prevout": null, "scriptsig": "", "scriptsig_asm": "", "is_coinbase": false, "sequence": 4294967293}],
                "vout": [{"scriptpubkey": "0014", "scriptpubkey_asm": "", "scriptpubkey_type": "v0_p2wpkh", "scriptpubkey_address": "bc1q", "value": 546}],
                "size": 200,
                "weight": 560,
                "fee": 300,
                "status": {"confirmed": false}
            }"#,
        )
        .unwrap();
        assert!(!tx.status.confirmed);
        assert!(tx.status.block_height.is_none());
        assert_eq!(tx.vout[0].value, 546);
    }
}

//! Blockstream electrs backend

use super::{
    Block, BtcTransaction, ChainAddress, ChainDataProvider, EsploraHttp, FeeEstimate, Utxo,
};
use crate::error::{ResolveError, ResolveResult};

use async_trait::async_trait;
use std::collections::HashMap;

/// Backend for a Blockstream esplora/electrs REST API.
///
/// electrs has no recommended-fees endpoint, so tiers are derived from
/// `/fee-estimates` by confirmation target.
pub struct ElectrsProvider {
    http: EsploraHttp,
}

impl ElectrsProvider {
    pub fn new(http: EsploraHttp) -> Self {
        Self { http }
    }
}

/// Map electrs `{target_blocks: sat/vB}` estimates onto fee tiers
pub fn fees_from_estimates(estimates: &HashMap<String, f64>) -> ResolveResult<FeeEstimate> {
    let at = |target: &str| -> ResolveResult<u64> {
        estimates
            .get(target)
            .map(|rate| rate.ceil().max(0.0) as u64)
            .ok_or_else(|| {
                ResolveError::protocol("esplora", format!("missing fee estimate for target {}", target))
            })
    };

    Ok(FeeEstimate {
        fastest_fee: at("1")?,
        half_hour_fee: at("3")?,
        hour_fee: at("6")?,
        economy_fee: at("144")?,
        minimum_fee: at("1008")?,
    })
}

#[async_trait]
impl ChainDataProvider for ElectrsProvider {
    async fn recommended_fees(&self) -> ResolveResult<FeeEstimate> {
        let estimates: HashMap<String, f64> = self
            .http
            .get_json("/fee-estimates", "fee estimate", "fee-estimates")
            .await?;
        fees_from_estimates(&estimates)
    }

    async fn address(&self, address: &str) -> ResolveResult<ChainAddress> {
        self.http.address(address).await
    }

    async fn address_utxos(&self, address: &str) -> ResolveResult<Vec<Utxo>> {
        self.http.address_utxos(address).await
    }

    async fn address_transactions(
        &self,
        address: &str,
        after: Option<&str>,
    ) -> ResolveResult<Vec<BtcTransaction>> {
        self.http.address_transactions(address, after).await
    }

    async fn transaction(&self, txid: &str) -> ResolveResult<BtcTransaction> {
        self.http.transaction(txid).await
    }

    async fn transaction_hex(&self, txid: &str) -> ResolveResult<String> {
        self.http.transaction_hex(txid).await
    }

    async fn block(&self, hash: &str) -> ResolveResult<Block> {
        self.http.block(hash).await
    }

    async fn block_transactions(&self, hash: &str) -> ResolveResult<Vec<BtcTransaction>> {
        self.http.block_transactions(hash).await
    }

    async fn block_height_to_hash(&self, height: u64) -> ResolveResult<String> {
        self.http.block_height_to_hash(height).await
    }

    async fn block_header(&self, hash: &str) -> ResolveResult<String> {
        self.http.block_header(hash).await
    }

    async fn block_txids(&self, hash: &str) -> ResolveResult<Vec<String>> {
        self.http.block_txids(hash).await
    }

    async fn chain_tip(&self) -> ResolveResult<String> {
        self.http.chain_tip().await
    }
}

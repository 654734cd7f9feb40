//! mempool.space backend

use super::{
    Block, BtcTransaction, ChainAddress, ChainDataProvider, EsploraHttp, FeeEstimate, Utxo,
};
use crate::error::ResolveResult;

use async_trait::async_trait;

/// Backend for the mempool.space REST API.
///
/// Unknown addresses return an empty snapshot rather than `NotFound`.
pub struct MempoolProvider {
    http: EsploraHttp,
}

impl MempoolProvider {
    pub fn new(http: EsploraHttp) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChainDataProvider for MempoolProvider {
    async fn recommended_fees(&self) -> ResolveResult<FeeEstimate> {
        self.http
            .get_json("/v1/fees/recommended", "fee estimate", "recommended")
            .await
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

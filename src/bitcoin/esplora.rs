//! Esplora REST transport with multi-URL failover

use super::{Block, BtcTransaction, ChainAddress, Utxo};
use crate::config::BitcoinConfig;
use crate::error::{ResolveError, ResolveResult};
use crate::http;

use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

const SERVICE: &str = "esplora";

/// Esplora HTTP client shared by the mempool and electrs backends.
///
/// Requests go to the active base URL; a transport failure rotates to the
/// next URL and retries until every URL has been tried once.
pub struct EsploraHttp {
    client: Client,
    base_urls: Vec<String>,
    current: AtomicUsize,
}

impl EsploraHttp {
    pub fn new(config: &BitcoinConfig) -> ResolveResult<Self> {
        let base_urls: Vec<String> = config
            .urls
            .iter()
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if base_urls.is_empty() {
            return Err(ResolveError::Config("No valid bitcoin backend URLs".into()));
        }
        for url in &base_urls {
            debug!("Added esplora endpoint: {}", url);
        }

        Ok(Self {
            client: http::build_client(SERVICE, config.timeout_ms)?,
            base_urls,
            current: AtomicUsize::new(0),
        })
    }

    fn base_url(&self) -> &str {
        let idx = self.current.load(Ordering::Relaxed);
        &self.base_urls[idx % self.base_urls.len()]
    }

    /// Switch to the next configured endpoint
    fn failover(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.base_urls.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("Esplora failover to endpoint {}", next);
    }

    /// GET `path` with failover; `Ok(None)` on 404
    pub async fn get_text(&self, path: &str) -> ResolveResult<Option<String>> {
        let mut last_err = None;

        for _ in 0..self.base_urls.len() {
            let url = format!("{}{}", self.base_url(), path);
            match http::send_text(SERVICE, self.client.get(&url)).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() => {
                    warn!("Esplora request {} failed: {}", url, e);
                    last_err = Some(e);
                    self.failover();
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| ResolveError::unavailable(SERVICE, "all endpoints failed")))
    }

    /// GET a JSON body, mapping 404 to `NotFound { entity, id }`
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        entity: &str,
        id: &str,
    ) -> ResolveResult<T> {
        let body = self
            .get_text(path)
            .await?
            .ok_or_else(|| ResolveError::not_found(entity, id))?;
        http::decode(SERVICE, &body)
    }

    /// GET a plain-text body (hashes, hex), trimmed
    pub async fn get_plain(&self, path: &str, entity: &str, id: &str) -> ResolveResult<String> {
        let body = self
            .get_text(path)
            .await?
            .ok_or_else(|| ResolveError::not_found(entity, id))?;
        let body = body.trim();
        if body.is_empty() {
            return Err(ResolveError::protocol(SERVICE, format!("empty body for {}", path)));
        }
        Ok(body.to_string())
    }

    // Endpoints common to every Esplora deployment

    pub async fn address(&self, address: &str) -> ResolveResult<ChainAddress> {
        match self
            .get_json(&format!("/address/{}", address), "bitcoin address", address)
            .await
        {
            Err(e) if e.is_not_found() => Ok(ChainAddress::empty(address)),
            other => other,
        }
    }

    pub async fn address_utxos(&self, address: &str) -> ResolveResult<Vec<Utxo>> {
        match self
            .get_json(&format!("/address/{}/utxo", address), "bitcoin address", address)
            .await
        {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    pub async fn address_transactions(
        &self,
        address: &str,
        after: Option<&str>,
    ) -> ResolveResult<Vec<BtcTransaction>> {
        let path = match after {
            Some(txid) => format!("/address/{}/txs/chain/{}", address, txid),
            None => format!("/address/{}/txs", address),
        };
        match self.get_json(&path, "bitcoin address", address).await {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    pub async fn transaction(&self, txid: &str) -> ResolveResult<BtcTransaction> {
        self.get_json(&format!("/tx/{}", txid), "bitcoin transaction", txid)
            .await
    }

    pub async fn transaction_hex(&self, txid: &str) -> ResolveResult<String> {
        self.get_plain(&format!("/tx/{}/hex", txid), "bitcoin transaction", txid)
            .await
    }

    pub async fn block(&self, hash: &str) -> ResolveResult<Block> {
        self.get_json(&format!("/block/{}", hash), "bitcoin block", hash)
            .await
    }

    pub async fn block_transactions(&self, hash: &str) -> ResolveResult<Vec<BtcTransaction>> {
        self.get_json(&format!("/block/{}/txs", hash), "bitcoin block", hash)
            .await
    }

    pub async fn block_height_to_hash(&self, height: u64) -> ResolveResult<String> {
        self.get_plain(
            &format!("/block-height/{}", height),
            "bitcoin block height",
            &height.to_string(),
        )
        .await
    }

    pub async fn block_header(&self, hash: &str) -> ResolveResult<String> {
        self.get_plain(&format!("/block/{}/header", hash), "bitcoin block", hash)
            .await
    }

    pub async fn block_txids(&self, hash: &str) -> ResolveResult<Vec<String>> {
        self.get_json(&format!("/block/{}/txids", hash), "bitcoin block", hash)
            .await
    }

    pub async fn chain_tip(&self) -> ResolveResult<String> {
        self.get_plain("/blocks/tip/hash", "bitcoin chain tip", "tip")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BitcoinBackend;

    fn config(urls: &[&str]) -> BitcoinConfig {
        BitcoinConfig {
            backend: BitcoinBackend::Mempool,
            urls: urls.iter().map(|u| u.to_string()).collect(),
            timeout_ms: 1_000,
        }
    }

    #[test]
    fn test_failover_rotates_endpoints() {
        let http = EsploraHttp::new(&config(&["https://a.example/api/", "https://b.example/api"])).unwrap();
        assert_eq!(http.base_url(), "https://a.example/api");
        http.failover();
        assert_eq!(http.base_url(), "https://b.example/api");
        http.failover();
        assert_eq!(http.base_url(), "https://a.example/api");
    }

    #[test]
    fn test_rejects_blank_urls() {
        assert!(matches!(
            EsploraHttp::new(&config(&[""])),
            Err(ResolveError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoints_surface_unavailable() {
        let http = EsploraHttp::new(&config(&["http://127.0.0.1:1", "http://127.0.0.1:2"])).unwrap();
        let err = http.chain_tip().await.unwrap_err();
        assert!(err.is_retryable());
    }
}

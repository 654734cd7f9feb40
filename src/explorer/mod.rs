//! CKB Explorer REST client
//!
//! Serves RGB++ binding records and xUDT token registrations. Lookup by
//! Bitcoin txid goes through the RGB++ assets API when one is configured.

pub mod assets;

pub use assets::AssetsApiClient;

use crate::ckb::{TokenInfo, TokenInfoSource};
use crate::config::{AssetsApiConfig, ExplorerConfig};
use crate::error::{ResolveError, ResolveResult};
use crate::http;
use crate::resolve::{BindingPage, BindingSource, CrossChainBinding};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Deserializer};
use tracing::debug;

const SERVICE: &str = "explorer";
const JSON_API: &str = "application/vnd.api+json";

/// The explorer serves most numbers as strings and some as integers
fn flexible_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Float(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Int(v)) => Ok(Some(v)),
        Some(Raw::Float(v)) if v >= 0.0 && v.fract() == 0.0 => Ok(Some(v as u64)),
        Some(Raw::Float(v)) => Err(serde::de::Error::custom(format!("not an integer: {}", v))),
        Some(Raw::Text(s)) if s.is_empty() => Ok(None),
        Some(Raw::Text(s)) => {
            let trimmed = s.split('.').next().unwrap_or(&s);
            trimmed.parse().map(Some).map_err(serde::de::Error::custom)
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Resource<T> {
    attributes: T,
}

#[derive(Debug, Deserialize)]
struct RgbTransactionList {
    ckb_transactions: Vec<RgbTransactionEntry>,
}

#[derive(Debug, Deserialize)]
struct ListMeta {
    #[serde(deserialize_with = "flexible_u64", default)]
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: RgbTransactionList,
    meta: Option<ListMeta>,
}

#[derive(Debug, Deserialize)]
struct RgbTransactionEntry {
    #[serde(deserialize_with = "flexible_u64", default)]
    id: Option<u64>,
    tx_hash: String,
    #[serde(deserialize_with = "flexible_u64", default)]
    block_number: Option<u64>,
    #[serde(deserialize_with = "flexible_u64", default)]
    block_timestamp: Option<u64>,
    #[serde(default)]
    leap_direction: Option<String>,
    #[serde(default)]
    rgb_txid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionAttributes {
    transaction_hash: String,
    #[serde(deserialize_with = "flexible_u64", default)]
    block_number: Option<u64>,
    #[serde(deserialize_with = "flexible_u64", default)]
    block_timestamp: Option<u64>,
    #[serde(default)]
    is_rgb_transaction: bool,
    #[serde(default)]
    rgb_txid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XudtAttributes {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(deserialize_with = "flexible_u64", default)]
    decimal: Option<u64>,
}

fn normalise_txid(txid: Option<String>) -> Option<String> {
    txid.map(|t| t.trim().trim_start_matches("0x").to_lowercase())
        .filter(|t| !t.is_empty())
}

impl From<RgbTransactionEntry> for CrossChainBinding {
    fn from(entry: RgbTransactionEntry) -> Self {
        CrossChainBinding {
            ckb_tx_hash: entry.tx_hash.to_lowercase(),
            btc_txid: normalise_txid(entry.rgb_txid),
            block_number: entry.block_number,
            block_timestamp: entry.block_timestamp,
            leap_direction: entry.leap_direction,
            sequence: entry.id.unwrap_or(0),
        }
    }
}

impl TransactionAttributes {
    /// `None` for transactions the explorer does not mark as RGB++
    fn into_binding(self) -> Option<CrossChainBinding> {
        if !self.is_rgb_transaction {
            return None;
        }
        Some(CrossChainBinding {
            ckb_tx_hash: self.transaction_hash.to_lowercase(),
            btc_txid: normalise_txid(self.rgb_txid),
            block_number: self.block_number,
            block_timestamp: self.block_timestamp,
            leap_direction: None,
            sequence: self.block_number.unwrap_or(0),
        })
    }
}

impl XudtAttributes {
    fn into_token_info(self) -> ResolveResult<Option<TokenInfo>> {
        let Some(symbol) = self.symbol.filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let decimal = self.decimal.unwrap_or(0);
        let decimal = u8::try_from(decimal)
            .map_err(|_| ResolveError::protocol(SERVICE, format!("decimal {} out of range", decimal)))?;
        Ok(Some(TokenInfo { symbol, decimal }))
    }
}

/// CKB Explorer client backing binding and token lookups
pub struct CkbExplorerClient {
    client: Client,
    base_url: String,
    assets: Option<AssetsApiClient>,
}

impl CkbExplorerClient {
    pub fn new(config: &ExplorerConfig, assets: &AssetsApiConfig) -> ResolveResult<Self> {
        Ok(Self {
            client: http::build_client(SERVICE, config.timeout_ms)?,
            base_url: config.url.trim_end_matches('/').to_string(),
            assets: AssetsApiClient::from_config(assets, config.timeout_ms)?,
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header(reqwest::header::ACCEPT, JSON_API)
            .header(reqwest::header::CONTENT_TYPE, JSON_API)
    }
}

#[async_trait]
impl BindingSource for CkbExplorerClient {
    async fn find_by_ckb_hash(&self, hash: &str) -> ResolveResult<Option<CrossChainBinding>> {
        let found: Option<Envelope<Resource<TransactionAttributes>>> =
            http::send_json(SERVICE, self.get(&format!("/api/v1/transactions/{}", hash))).await?;
        Ok(found.and_then(|envelope| envelope.data.attributes.into_binding()))
    }

    async fn find_by_btc_txid(&self, txid: &str) -> ResolveResult<Option<CrossChainBinding>> {
        let assets = self.assets.as_ref().ok_or_else(|| {
            ResolveError::Config("lookup by bitcoin txid needs [assets_api] url".into())
        })?;
        let Some(ckb_tx_hash) = assets.ckb_tx_hash(txid).await? else {
            return Ok(None);
        };
        debug!("Bitcoin {} bound to CKB {}", txid, ckb_tx_hash);

        Ok(Some(match self.find_by_ckb_hash(&ckb_tx_hash).await? {
            Some(binding) => binding,
            // Not yet indexed by the explorer
            None => CrossChainBinding {
                ckb_tx_hash,
                btc_txid: Some(txid.to_lowercase()),
                block_number: None,
                block_timestamp: None,
                leap_direction: None,
                sequence: 0,
            },
        }))
    }

    async fn list(&self, offset: u64, limit: u64) -> ResolveResult<BindingPage> {
        if limit == 0 || offset % limit != 0 {
            return Err(ResolveError::InvalidArgument(format!(
                "explorer pages need offset ({}) aligned to limit ({})",
                offset, limit
            )));
        }
        let page = offset / limit + 1;
        let path = format!(
            "/api/v2/rgb_transactions?page={}&page_size={}&sort=number.desc",
            page, limit
        );

        let response: ListResponse = http::send_json(SERVICE, self.get(&path))
            .await?
            .ok_or_else(|| ResolveError::protocol(SERVICE, "rgb_transactions endpoint missing"))?;

        let records: Vec<CrossChainBinding> = response
            .data
            .ckb_transactions
            .into_iter()
            .map(CrossChainBinding::from)
            .collect();
        let total = response
            .meta
            .and_then(|m| m.total)
            .unwrap_or(offset + records.len() as u64);

        Ok(BindingPage { records, total })
    }
}

#[async_trait]
impl TokenInfoSource for CkbExplorerClient {
    async fn token_info(&self, type_hash: &str) -> ResolveResult<Option<TokenInfo>> {
        let found: Option<Envelope<Resource<XudtAttributes>>> =
            http::send_json(SERVICE, self.get(&format!("/api/v1/xudts/{}", type_hash))).await?;
        match found {
            Some(envelope) => envelope.data.attributes.into_token_info(),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(assets_url: Option<&str>) -> CkbExplorerClient {
        CkbExplorerClient::new(
            &ExplorerConfig {
                url: "http://127.0.0.1:1/".into(),
                timeout_ms: 1_000,
            },
            &AssetsApiConfig {
                url: assets_url.map(str::to_string),
                token: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_parse_rgb_transaction_list() {
        let raw = r#"{
            "data": {
                "ckb_transactions": [
                    {
                        "id": 4521,
                        "tx_hash": "0xAA00000000000000000000000000000000000000000000000000000000000001",
                        "block_id": 11,
                        "block_number": 12876543,
                        "block_timestamp": "1713571767000",
                        "leap_direction": "in",
                        "rgb_cell_changes": 1,
                        "rgb_txid": "bb00000000000000000000000000000000000000000000000000000000000002"
                    },
                    {
                        "id": "4520",
                        "tx_hash": "0xcc00000000000000000000000000000000000000000000000000000000000003",
                        "block_number": "12876500",
                        "block_timestamp": 1713571000000,
                        "leap_direction": null,
                        "rgb_txid": ""
                    }
                ]
            },
            "meta": {"total": 1024, "page_size": 10}
        }"#;
        let response: ListResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.meta.unwrap().total, Some(1024));

        let bindings: Vec<CrossChainBinding> = response
            .data
            .ckb_transactions
            .into_iter()
            .map(CrossChainBinding::from)
            .collect();
        assert_eq!(bindings[0].sequence, 4521);
        assert!(bindings[0].ckb_tx_hash.starts_with("0xaa"));
        assert_eq!(bindings[0].block_timestamp, Some(1_713_571_767_000));
        assert_eq!(bindings[0].leap_direction.as_deref(), Some("in"));
        assert!(bindings[0].is_paired());

        assert_eq!(bindings[1].sequence, 4520);
        assert_eq!(bindings[1].block_number, Some(12_876_500));
        assert!(bindings[1].btc_txid.is_none());
    }

    #[test]
    fn test_non_rgb_transaction_has_no_binding() {
        let raw = r#"{"data": {"id": "1", "type": "ckb_transactions", "attributes": {
            "transaction_hash": "0x01",
            "block_number": "100",
            "block_timestamp": "1700000000000",
            "is_rgb_transaction": false,
            "rgb_txid": null
        }}}"#;
        let envelope: Envelope<Resource<TransactionAttributes>> = serde_json::from_str(raw).unwrap();
        assert!(envelope.data.attributes.into_binding().is_none());
    }

    #[test]
    fn test_token_info_decimal_as_string() {
        let raw = r#"{"data": {"id": "1", "type": "udt", "attributes": {"symbol": "RUSD", "full_name": "Stable", "decimal": "6"}}}"#;
        let envelope: Envelope<Resource<XudtAttributes>> = serde_json::from_str(raw).unwrap();
        assert_eq!(
            envelope.data.attributes.into_token_info().unwrap(),
            Some(TokenInfo {
                symbol: "RUSD".into(),
                decimal: 6
            })
        );

        let unnamed = XudtAttributes {
            symbol: None,
            decimal: Some(8),
        };
        assert_eq!(unnamed.into_token_info().unwrap(), None);

        let huge = XudtAttributes {
            symbol: Some("X".into()),
            decimal: Some(300),
        };
        assert!(huge.into_token_info().is_err());
    }

    #[tokio::test]
    async fn test_list_requires_aligned_offset() {
        let err = client(None).list(15, 10).await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_btc_lookup_needs_assets_api() {
        let err = client(None).find_by_btc_txid("aa").await.unwrap_err();
        assert!(matches!(err, ResolveError::Config(_)));
    }
}

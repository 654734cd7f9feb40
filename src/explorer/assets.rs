//! RGB++ assets API: Bitcoin txid to CKB transaction lookup

use crate::config::AssetsApiConfig;
use crate::error::{ResolveError, ResolveResult};
use crate::http;

use reqwest::Client;
use serde::Deserialize;

const SERVICE: &str = "assets-api";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RgbppTransaction {
    ckb_tx_hash: String,
}

pub struct AssetsApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl AssetsApiClient {
    /// `None` when no assets API URL is configured
    pub fn from_config(config: &AssetsApiConfig, timeout_ms: u64) -> ResolveResult<Option<Self>> {
        let Some(url) = config.url.as_deref().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        Ok(Some(Self {
            client: http::build_client(SERVICE, timeout_ms)?,
            base_url: url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
        }))
    }

    /// CKB transaction hash bound to `btc_txid`, `None` if unbound
    pub async fn ckb_tx_hash(&self, btc_txid: &str) -> ResolveResult<Option<String>> {
        let mut request = self
            .client
            .get(format!("{}/rgbpp/v1/transaction/{}", self.base_url, btc_txid));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let found: Option<RgbppTransaction> = http::send_json(SERVICE, request).await?;
        found
            .map(|tx| parse_hash(&tx.ckb_tx_hash))
            .transpose()
    }
}

fn parse_hash(raw: &str) -> ResolveResult<String> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.len() != 64 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ResolveError::protocol(SERVICE, format!("invalid ckbTxHash {}", raw)));
    }
    Ok(format!("0x{}", digits.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_url() {
        let client = AssetsApiClient::from_config(&AssetsApiConfig::default(), 1_000).unwrap();
        assert!(client.is_none());
    }

    #[test]
    fn test_parse_response() {
        let tx: RgbppTransaction = serde_json::from_str(
            r#"{"txid": "aa", "ckbTxHash": "0xAB00000000000000000000000000000000000000000000000000000000000001"}"#,
        )
        .unwrap();
        assert_eq!(
            parse_hash(&tx.ckb_tx_hash).unwrap(),
            "0xab00000000000000000000000000000000000000000000000000000000000001"
        );
        assert!(parse_hash("0x12").is_err());
    }
}

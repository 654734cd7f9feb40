//! RGB++ binding records and identifier handling

use crate::error::{ResolveError, ResolveResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A CKB transaction paired (or awaiting pairing) with a Bitcoin transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossChainBinding {
    pub ckb_tx_hash: String,
    /// Absent while the Bitcoin side has not been observed
    pub btc_txid: Option<String>,
    pub block_number: Option<u64>,
    /// Milliseconds since the unix epoch
    pub block_timestamp: Option<u64>,
    pub leap_direction: Option<String>,
    /// Monotonic position in the binding source, breaks ordering ties
    pub sequence: u64,
}

impl CrossChainBinding {
    pub fn is_paired(&self) -> bool {
        self.btc_txid.is_some()
    }

    /// Ordering key, most recent first when sorted descending. Bindings
    /// without a block sort ahead of every committed one.
    pub fn recency(&self) -> (u64, u64) {
        (self.block_number.unwrap_or(u64::MAX), self.sequence)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BindingPage {
    pub records: Vec<CrossChainBinding>,
    pub total: u64,
}

/// Lookup of binding records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BindingSource: Send + Sync {
    async fn find_by_ckb_hash(&self, hash: &str) -> ResolveResult<Option<CrossChainBinding>>;

    async fn find_by_btc_txid(&self, txid: &str) -> ResolveResult<Option<CrossChainBinding>>;

    /// Bindings most recent first, starting at `offset`
    async fn list(&self, offset: u64, limit: u64) -> ResolveResult<BindingPage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Ckb,
    Btc,
}

/// A caller-supplied transaction identifier with its chain resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    CkbTxHash(String),
    BtcTxid(String),
}

impl Identifier {
    /// Classify by format: `0x` + 64 hex is a CKB hash, bare 64 hex is a
    /// Bitcoin txid.
    pub fn parse(raw: &str) -> ResolveResult<Self> {
        let raw = raw.trim();
        match raw.strip_prefix("0x") {
            Some(digits) if is_hash(digits) => Ok(Identifier::CkbTxHash(format!("0x{}", digits.to_lowercase()))),
            None if is_hash(raw) => Ok(Identifier::BtcTxid(raw.to_lowercase())),
            _ => Err(ResolveError::InvalidArgument(format!(
                "{} is neither a CKB transaction hash nor a Bitcoin txid",
                raw
            ))),
        }
    }

    /// Build from an explicitly stated kind, accepting either hex form
    pub fn with_kind(raw: &str, kind: IdentifierKind) -> ResolveResult<Self> {
        let raw = raw.trim();
        let digits = raw.strip_prefix("0x").unwrap_or(raw);
        if !is_hash(digits) {
            return Err(ResolveError::InvalidArgument(format!(
                "{} is not a 32-byte hex hash",
                raw
            )));
        }
        let digits = digits.to_lowercase();
        Ok(match kind {
            IdentifierKind::Ckb => Identifier::CkbTxHash(format!("0x{}", digits)),
            IdentifierKind::Btc => Identifier::BtcTxid(digits),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Identifier::CkbTxHash(hash) => hash,
            Identifier::BtcTxid(txid) => txid,
        }
    }
}

impl FromStr for Identifier {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identifier::parse(s)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_hash(digits: &str) -> bool {
    digits.len() == 64 && digits.bytes().all(|b| b.is_ascii_hexdigit())
}

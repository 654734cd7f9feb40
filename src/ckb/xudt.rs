//! xUDT (extensible user defined token) recognition and decoding

use super::types::Script;
use crate::config::XudtScriptConfig;
use crate::error::{ResolveError, ResolveResult};

use async_trait::async_trait;
use serde::{Serialize, Serializer};

/// Token metadata attached to a cell whose type script is a known xUDT
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XudtInfo {
    pub symbol: String,
    /// Amount in token base units
    #[serde(serialize_with = "u128_as_string")]
    pub amount: u128,
    pub decimal: u8,
    pub type_hash: String,
}

/// Symbol and decimals registered for a token type hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: String,
    pub decimal: u8,
}

/// Source of token metadata keyed by type script hash
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenInfoSource: Send + Sync {
    /// `None` when the token is not registered
    async fn token_info(&self, type_hash: &str) -> ResolveResult<Option<TokenInfo>>;
}

fn u128_as_string<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// Configured xUDT script templates
#[derive(Debug, Clone, Default)]
pub struct XudtTemplates {
    templates: Vec<(String, super::ScriptHashType)>,
}

impl XudtTemplates {
    pub fn new(configs: &[XudtScriptConfig]) -> Self {
        Self {
            templates: configs
                .iter()
                .map(|c| (c.code_hash.to_lowercase(), c.hash_type))
                .collect(),
        }
    }

    pub fn matches(&self, script: &Script) -> bool {
        self.templates
            .iter()
            .any(|(code_hash, hash_type)| {
                *hash_type == script.hash_type && code_hash.eq_ignore_ascii_case(&script.code_hash)
            })
    }
}

/// Token amount held in cell data, `None` when the data is too short
pub fn decode_amount(data_hex: &str) -> Option<u128> {
    let bytes = hex::decode(data_hex.trim_start_matches("0x")).ok()?;
    let head: [u8; 16] = bytes.get(..16)?.try_into().ok()?;
    Some(u128::from_le_bytes(head))
}

/// Molecule encoding of a `Script` table
pub fn serialize_script(script: &Script) -> ResolveResult<Vec<u8>> {
    let code_hash = decode_hex("code_hash", &script.code_hash)?;
    if code_hash.len() != 32 {
        return Err(ResolveError::InvalidArgument(format!(
            "code_hash must be 32 bytes, got {}",
            code_hash.len()
        )));
    }
    let args = decode_hex("args", &script.args)?;

    const HEADER: u32 = 4 + 3 * 4;
    let hash_type_offset = HEADER + 32;
    let args_offset = hash_type_offset + 1;
    let total = args_offset + 4 + args.len() as u32;

    let mut out = Vec::with_capacity(total as usize);
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(&HEADER.to_le_bytes());
    out.extend_from_slice(&hash_type_offset.to_le_bytes());
    out.extend_from_slice(&args_offset.to_le_bytes());
    out.extend_from_slice(&code_hash);
    out.push(script.hash_type.as_byte());
    out.extend_from_slice(&(args.len() as u32).to_le_bytes());
    out.extend_from_slice(&args);
    Ok(out)
}

/// CKB script hash: blake2b-256 (ckb personalisation) of the molecule bytes
pub fn script_hash(script: &Script) -> ResolveResult<String> {
    let bytes = serialize_script(script)?;
    Ok(format!("0x{}", hex::encode(ckb_hash::blake2b_256(bytes))))
}

fn decode_hex(field: &str, raw: &str) -> ResolveResult<Vec<u8>> {
    hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| ResolveError::InvalidArgument(format!("{} is not hex: {}", field, e)))
}

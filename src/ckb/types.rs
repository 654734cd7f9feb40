//! CKB data shapes as served by the node JSON-RPC and indexer

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// `0x`-prefixed hex quantities used by the CKB RPC for u64 fields
pub mod hex_u64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<u64, String> {
        let digits = raw
            .strip_prefix("0x")
            .ok_or_else(|| format!("missing 0x prefix in {}", raw))?;
        u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex quantity {}: {}", raw, e))
    }
}

/// Same as [`hex_u64`] for u32 fields (output indices, versions)
pub mod hex_u32 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let value = super::hex_u64::parse(&raw).map_err(de::Error::custom)?;
        u32::try_from(value).map_err(de::Error::custom)
    }
}

/// Optional variant of [`hex_u64`]
pub mod opt_hex_u64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&format!("{:#x}", v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|r| super::hex_u64::parse(&r).map_err(de::Error::custom))
            .transpose()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptHashType {
    Data,
    Type,
    Data1,
    Data2,
}

impl ScriptHashType {
    /// Molecule byte encoding
    pub fn as_byte(self) -> u8 {
        match self {
            ScriptHashType::Data => 0,
            ScriptHashType::Type => 1,
            ScriptHashType::Data1 => 2,
            ScriptHashType::Data2 => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script {
    pub code_hash: String,
    pub hash_type: ScriptHashType,
    pub args: String,
}

/// Identifies one cell: the output `index` of transaction `tx_hash`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: String,
    #[serde(with = "hex_u32")]
    pub index: u32,
}

impl OutPoint {
    pub fn new(tx_hash: impl Into<String>, index: u32) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            index,
        }
    }

    /// The null out-point referenced by the single input of a cellbase
    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.tx_hash.trim_start_matches("0x").bytes().all(|b| b == b'0')
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellInput {
    pub previous_output: OutPoint,
    #[serde(with = "hex_u64")]
    pub since: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellOutput {
    #[serde(with = "hex_u64")]
    pub capacity: u64,
    pub lock: Script,
    #[serde(rename = "type", default)]
    pub type_: Option<Script>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxCommitStatus {
    Pending,
    Proposed,
    Committed,
    Rejected,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatus {
    pub status: TxCommitStatus,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default, with = "opt_hex_u64")]
    pub block_number: Option<u64>,
}

impl TxStatus {
    pub fn committed_in(block_hash: Option<String>, block_number: Option<u64>) -> Self {
        Self {
            status: TxCommitStatus::Committed,
            block_hash,
            block_number,
        }
    }
}

/// A CKB transaction together with its on-chain status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CkbTransaction {
    pub hash: String,
    pub inputs: Vec<CellInput>,
    pub outputs: Vec<CellOutput>,
    pub outputs_data: Vec<String>,
    pub status: TxStatus,
}

impl CkbTransaction {
    pub fn is_cellbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CkbHeader {
    pub hash: String,
    #[serde(with = "hex_u64")]
    pub number: u64,
    /// Milliseconds since the unix epoch
    #[serde(with = "hex_u64")]
    pub timestamp: u64,
    pub parent_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CkbBlock {
    pub header: CkbHeader,
    /// Hashes of the transactions in block order
    pub transactions: Vec<String>,
}

/// A cell as returned by a direct cell lookup (out-point plus output fields)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRecord {
    pub out_point: OutPoint,
    pub output: CellOutput,
    #[serde(default)]
    pub output_data: Option<String>,
    #[serde(default, with = "opt_hex_u64")]
    pub block_number: Option<u64>,
}

/// A page of indexer cells with the cursor to continue from
#[derive(Debug, Clone, Default)]
pub struct CellPage {
    pub cells: Vec<CellRecord>,
    pub cursor: Option<String>,
}

/// Consumption status of a cell as tracked by the CKB backend.
///
/// The spending transaction is only representable when consumed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellStatus {
    Live,
    Consumed { tx_hash: String, index: u32 },
}

impl CellStatus {
    pub fn is_consumed(&self) -> bool {
        matches!(self, CellStatus::Consumed { .. })
    }

    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            CellStatus::Live => None,
            CellStatus::Consumed { tx_hash, .. } => Some(tx_hash),
        }
    }

    pub fn index(&self) -> Option<u32> {
        match self {
            CellStatus::Live => None,
            CellStatus::Consumed { index, .. } => Some(*index),
        }
    }
}

impl Serialize for CellStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire<'a> {
            consumed: bool,
            tx_hash: Option<&'a str>,
            index: Option<u32>,
        }

        Wire {
            consumed: self.is_consumed(),
            tx_hash: self.tx_hash(),
            index: self.index(),
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_from_rpc_json() {
        let raw = r#"{
            "capacity": "0x5d21dba00",
            "lock": {
                "code_hash": "0x9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8",
                "hash_type": "type",
                "args": "0x36c329ed630d6ce750712a477543672adab57f4c"
            },
            "type": null
        }"#;
        let output: CellOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(output.capacity, 25_000_000_000);
        assert_eq!(output.lock.hash_type, ScriptHashType::Type);
        assert!(output.type_.is_none());

        let back = serde_json::to_value(&output).unwrap();
        assert_eq!(back["capacity"], "0x5d21dba00");
    }

    #[test]
    fn test_rejects_unprefixed_quantity() {
        assert!(hex_u64::parse("100").is_err());
        assert_eq!(hex_u64::parse("0x0").unwrap(), 0);
    }

    #[test]
    fn test_cellbase_detection() {
        let null = OutPoint::new(format!("0x{}", "0".repeat(64)), u32::MAX);
        assert!(null.is_null());
        assert!(!OutPoint::new(format!("0x{}", "0".repeat(64)), 0).is_null());
    }

    #[test]
    fn test_status_wire_shape() {
        let live = serde_json::to_value(CellStatus::Live).unwrap();
        assert_eq!(live["consumed"], false);
        assert!(live["txHash"].is_null());
        assert!(live["index"].is_null());

        let spent = serde_json::to_value(CellStatus::Consumed {
            tx_hash: "0xab".into(),
            index: 3,
        })
        .unwrap();
        assert_eq!(spent["consumed"], true);
        assert_eq!(spent["txHash"], "0xab");
        assert_eq!(spent["index"], 3);
    }
}

//! Cell assembly from CKB outputs and indexer records

use crate::ckb::xudt::{self, XudtInfo, XudtTemplates};
use crate::ckb::{CellRecord, CellStatus, CkbTransaction, OutPoint, Script};
use crate::error::{ResolveError, ResolveResult};

use serde::Serialize;
use tracing::debug;

/// A cell before status and token metadata are attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseCell {
    pub tx_hash: String,
    pub index: u32,
    /// Shannons
    pub capacity: u64,
    pub lock: Script,
    pub type_: Option<Script>,
    pub data: Option<String>,
}

/// A recognised xUDT cell awaiting its token registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XudtCandidate {
    pub type_hash: String,
    pub amount: u128,
}

impl BaseCell {
    pub fn from_transaction_output(tx: &CkbTransaction, index: u32) -> ResolveResult<Self> {
        let output = tx
            .outputs
            .get(index as usize)
            .ok_or_else(|| ResolveError::IndexOutOfRange {
                tx_hash: tx.hash.clone(),
                index,
                len: tx.outputs.len(),
            })?;

        Ok(Self {
            tx_hash: tx.hash.clone(),
            index,
            capacity: output.capacity,
            lock: output.lock.clone(),
            type_: output.type_.clone(),
            data: tx.outputs_data.get(index as usize).cloned(),
        })
    }

    pub fn from_cell_record(record: &CellRecord) -> Self {
        Self {
            tx_hash: record.out_point.tx_hash.clone(),
            index: record.out_point.index,
            capacity: record.output.capacity,
            lock: record.output.lock.clone(),
            type_: record.output.type_.clone(),
            data: record.output_data.clone(),
        }
    }

    pub fn out_point(&self) -> OutPoint {
        OutPoint::new(self.tx_hash.clone(), self.index)
    }

    /// Type hash and amount when this cell holds a configured xUDT
    pub fn xudt_candidate(&self, templates: &XudtTemplates) -> Option<XudtCandidate> {
        let type_script = self.type_.as_ref().filter(|t| templates.matches(t))?;
        let amount = xudt::decode_amount(self.data.as_deref()?)?;
        match xudt::script_hash(type_script) {
            Ok(type_hash) => Some(XudtCandidate { type_hash, amount }),
            Err(e) => {
                debug!("Skipping xUDT cell {}: {}", self.out_point(), e);
                None
            }
        }
    }

    pub fn into_cell(self, status: Option<CellStatus>, xudt_info: Option<XudtInfo>) -> Cell {
        Cell {
            tx_hash: self.tx_hash,
            index: self.index,
            capacity: self.capacity,
            lock: self.lock,
            type_: self.type_,
            xudt_info,
            status,
        }
    }
}

/// Cell as returned across the service boundary.
///
/// `status` is `None` when the backend could not determine it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub tx_hash: String,
    pub index: u32,
    pub capacity: u64,
    pub lock: Script,
    #[serde(rename = "type")]
    pub type_: Option<Script>,
    pub xudt_info: Option<XudtInfo>,
    pub status: Option<CellStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ckb::{CellOutput, ScriptHashType, TxStatus};
    use crate::config::XudtScriptConfig;

    const XUDT_CODE_HASH: &str =
        "0x50bd8d6680b8b9cf98b73f3c08faf8b2a21914311954118ad6609be6e78a1b95";

    fn lock() -> Script {
        Script {
            code_hash: format!("0x{}", "11".repeat(32)),
            hash_type: ScriptHashType::Type,
            args: "0x01".into(),
        }
    }

    fn xudt_type() -> Script {
        Script {
            code_hash: XUDT_CODE_HASH.into(),
            hash_type: ScriptHashType::Data1,
            args: format!("0x{}", "22".repeat(32)),
        }
    }

    fn tx() -> CkbTransaction {
        CkbTransaction {
            hash: "0xabc".into(),
            inputs: vec![],
            outputs: vec![
                CellOutput {
                    capacity: 6_100_000_000,
                    lock: lock(),
                    type_: None,
                },
                CellOutput {
                    capacity: 14_300_000_000,
                    lock: lock(),
                    type_: Some(xudt_type()),
                },
            ],
            outputs_data: vec!["0x".into(), "0x00e1f505000000000000000000000000".into()],
            status: TxStatus::committed_in(None, Some(1)),
        }
    }

    #[test]
    fn test_from_transaction_output_keeps_identity() {
        let tx = tx();
        for index in 0..tx.outputs.len() as u32 {
            let cell = BaseCell::from_transaction_output(&tx, index).unwrap();
            assert_eq!(cell.tx_hash, tx.hash);
            assert_eq!(cell.index, index);
            assert_eq!(cell.capacity, tx.outputs[index as usize].capacity);
        }
    }

    #[test]
    fn test_from_transaction_output_out_of_range() {
        let err = BaseCell::from_transaction_output(&tx(), 2).unwrap_err();
        assert_eq!(
            err,
            ResolveError::IndexOutOfRange {
                tx_hash: "0xabc".into(),
                index: 2,
                len: 2,
            }
        );
    }

    #[test]
    fn test_from_cell_record() {
        let record = CellRecord {
            out_point: OutPoint::new("0xdef", 3),
            output: tx().outputs[1].clone(),
            output_data: Some("0x".into()),
            block_number: Some(10),
        };
        let cell = BaseCell::from_cell_record(&record);
        assert_eq!(cell.out_point(), OutPoint::new("0xdef", 3));
        assert_eq!(cell.type_, Some(xudt_type()));
    }

    #[test]
    fn test_xudt_candidate() {
        let templates = XudtTemplates::new(&[XudtScriptConfig {
            code_hash: XUDT_CODE_HASH.into(),
            hash_type: ScriptHashType::Data1,
        }]);
        let tx = tx();

        let plain = BaseCell::from_transaction_output(&tx, 0).unwrap();
        assert!(plain.xudt_candidate(&templates).is_none());

        let token = BaseCell::from_transaction_output(&tx, 1).unwrap();
        let candidate = token.xudt_candidate(&templates).unwrap();
        assert_eq!(candidate.amount, 100_000_000);
        assert_eq!(candidate.type_hash, xudt::script_hash(&xudt_type()).unwrap());

        assert!(token.xudt_candidate(&XudtTemplates::default()).is_none());
    }

    #[test]
    fn test_status_fields_follow_consumption() {
        let live = BaseCell::from_transaction_output(&tx(), 0)
            .unwrap()
            .into_cell(Some(CellStatus::Live), None);
        let value = serde_json::to_value(&live).unwrap();
        assert_eq!(value["status"]["consumed"], false);
        assert!(value["status"]["txHash"].is_null());
        assert!(value["status"]["index"].is_null());

        let spent = BaseCell::from_transaction_output(&tx(), 0).unwrap().into_cell(
            Some(CellStatus::Consumed {
                tx_hash: "0xfff".into(),
                index: 0,
            }),
            None,
        );
        let value = serde_json::to_value(&spent).unwrap();
        assert_eq!(value["status"]["consumed"], true);
        assert_eq!(value["status"]["txHash"], "0xfff");
        assert_eq!(value["status"]["index"], 0);
    }
}

//! CKB (cell-model chain) access
//!
//! This module provides:
//! - The `CellModelClient` contract the resolver reads CKB data through
//! - A JSON-RPC implementation backed by a CKB node with its built-in indexer
//! - xUDT token script recognition and amount decoding

pub mod rpc;
pub mod types;
pub mod xudt;

pub use rpc::CkbRpcClient;
pub use types::{
    CellInput, CellOutput, CellPage, CellRecord, CellStatus, CkbBlock, CkbHeader,
    CkbTransaction, OutPoint, Script, ScriptHashType, TxCommitStatus, TxStatus,
};
pub use xudt::{TokenInfo, TokenInfoSource, XudtInfo, XudtTemplates};

use crate::error::ResolveResult;

use async_trait::async_trait;
use std::collections::HashMap;

/// Read-only access to the CKB chain.
///
/// Multi-key methods return only the entries the backend knows about; a key
/// missing from the returned map is absent upstream. A failed lookup of one key
/// is reported in its entry, while an outer `Err` means the whole call failed.
#[async_trait]
pub trait CellModelClient: Send + Sync {
    /// Fetch transactions by hash
    async fn transactions(
        &self,
        hashes: &[String],
    ) -> ResolveResult<HashMap<String, ResolveResult<CkbTransaction>>>;

    /// Consumption status for each out-point, including the spender when
    /// consumed
    async fn cell_statuses(
        &self,
        out_points: &[OutPoint],
    ) -> ResolveResult<HashMap<OutPoint, ResolveResult<CellStatus>>>;

    /// Fetch a live cell with its data; `None` when the cell is not live
    async fn live_cell(&self, out_point: &OutPoint) -> ResolveResult<Option<CellRecord>>;

    /// Page through live cells locked by `lock`, newest first
    async fn cells_by_lock(
        &self,
        lock: &Script,
        limit: u32,
        after: Option<String>,
    ) -> ResolveResult<CellPage>;

    async fn block(&self, hash: &str) -> ResolveResult<CkbBlock>;

    async fn tip_header(&self) -> ResolveResult<CkbHeader>;
}

//! Merges a binding's CKB and Bitcoin sides into one view

use super::binding::{BindingSource, CrossChainBinding};
use super::cell::{BaseCell, Cell};
use super::loaders::OperationContext;
use crate::bitcoin::BtcTransaction;
use crate::ckb::{CellStatus, CkbTransaction, TxCommitStatus};
use crate::error::{ResolveError, ResolveResult};
use crate::metrics;

use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    /// Only the CKB hash is known
    CkbOnly,
    /// Both identifiers are known
    Paired,
    Resolving,
    /// Both sides fetched
    Resolved,
    /// One side absent, either legitimately or after a field error
    PartiallyResolved,
    /// Every attempted side failed
    Failed,
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResolutionState::CkbOnly => "ckb_only",
            ResolutionState::Paired => "paired",
            ResolutionState::Resolving => "resolving",
            ResolutionState::Resolved => "resolved",
            ResolutionState::PartiallyResolved => "partially_resolved",
            ResolutionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A field left absent because its upstream failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub kind: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, err: &ResolveError) -> Self {
        Self {
            field: field.into(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// A CKB transaction with its inputs and outputs assembled as cells
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CkbTransactionView {
    pub hash: String,
    pub block_number: Option<u64>,
    pub block_hash: Option<String>,
    pub status: TxCommitStatus,
    pub is_cellbase: bool,
    pub inputs: Vec<Cell>,
    pub outputs: Vec<Cell>,
    /// Shannons; absent for cellbase and when an input is unresolved
    pub fee: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTransactionView {
    pub binding: CrossChainBinding,
    pub state: ResolutionState,
    pub ckb_transaction: Option<CkbTransactionView>,
    pub btc_transaction: Option<BtcTransaction>,
    pub errors: Vec<FieldError>,
}

/// Resolves bindings to merged views.
///
/// All fetches go through the caller's `OperationContext`, so resolving many
/// bindings concurrently costs one batch per upstream and round.
pub struct TransactionCorrelator {
    bindings: Arc<dyn BindingSource>,
}

impl TransactionCorrelator {
    pub fn new(bindings: Arc<dyn BindingSource>) -> Self {
        Self { bindings }
    }

    /// Resolve the binding for a CKB transaction hash; `None` when no
    /// binding exists. Failures of the binding lookup fail the call.
    pub async fn resolve_by_ckb_hash(
        &self,
        ctx: &OperationContext,
        hash: &str,
    ) -> ResolveResult<Option<ResolvedTransactionView>> {
        match self.bindings.find_by_ckb_hash(hash).await? {
            Some(binding) => Ok(Some(self.resolve_binding(ctx, binding).await)),
            None => {
                debug!("No binding for CKB transaction {}", hash);
                Ok(None)
            }
        }
    }

    pub async fn resolve_by_btc_txid(
        &self,
        ctx: &OperationContext,
        txid: &str,
    ) -> ResolveResult<Option<ResolvedTransactionView>> {
        match self.bindings.find_by_btc_txid(txid).await? {
            Some(binding) => Ok(Some(self.resolve_binding(ctx, binding).await)),
            None => {
                debug!("No binding for Bitcoin transaction {}", txid);
                Ok(None)
            }
        }
    }

    /// Resolve both sides of a known binding concurrently
    pub async fn resolve_binding(
        &self,
        ctx: &OperationContext,
        binding: CrossChainBinding,
    ) -> ResolvedTransactionView {
        let initial = if binding.is_paired() {
            ResolutionState::Paired
        } else {
            ResolutionState::CkbOnly
        };
        debug!("Binding {} {} -> {}", binding.ckb_tx_hash, initial, ResolutionState::Resolving);

        let ((ckb_transaction, mut errors), (btc_transaction, btc_errors)) = tokio::join!(
            self.attach_ckb_transaction(ctx, &binding),
            self.attach_btc_transaction(ctx, &binding),
        );
        errors.extend(btc_errors);

        let state = match (&ckb_transaction, &btc_transaction) {
            (Some(_), Some(_)) => ResolutionState::Resolved,
            (None, None) if !errors.is_empty() => ResolutionState::Failed,
            _ => ResolutionState::PartiallyResolved,
        };
        debug!("Binding {} {} -> {}", binding.ckb_tx_hash, ResolutionState::Resolving, state);

        ResolvedTransactionView {
            binding,
            state,
            ckb_transaction,
            btc_transaction,
            errors,
        }
    }

    /// CKB side of a binding. Absent when the node does not know the
    /// transaction.
    pub async fn attach_ckb_transaction(
        &self,
        ctx: &OperationContext,
        binding: &CrossChainBinding,
    ) -> (Option<CkbTransactionView>, Vec<FieldError>) {
        match ctx.ckb_transaction(&binding.ckb_tx_hash).await {
            Ok(tx) => {
                let (view, errors) = self.assemble_ckb_transaction(ctx, &tx).await;
                (Some(view), errors)
            }
            Err(e) if e.is_not_found() => (None, Vec::new()),
            Err(e) => {
                warn!("CKB side of {} unavailable: {}", binding.ckb_tx_hash, e);
                (None, vec![FieldError::new("ckbTransaction", &e)])
            }
        }
    }

    /// Bitcoin side of a binding. Absent without a fetch while unpaired.
    pub async fn attach_btc_transaction(
        &self,
        ctx: &OperationContext,
        binding: &CrossChainBinding,
    ) -> (Option<BtcTransaction>, Vec<FieldError>) {
        let Some(txid) = binding.btc_txid.as_deref() else {
            return (None, Vec::new());
        };
        match ctx.btc_transaction(txid).await {
            Ok(tx) => (Some(tx), Vec::new()),
            Err(e) if e.is_not_found() => (None, Vec::new()),
            Err(e) => {
                warn!("Bitcoin side of {} unavailable: {}", binding.ckb_tx_hash, e);
                (None, vec![FieldError::new("btcTransaction", &e)])
            }
        }
    }

    /// Assemble inputs (previous outputs, consumed by `tx`) and outputs (with
    /// backend spend status) of a CKB transaction
    pub async fn assemble_ckb_transaction(
        &self,
        ctx: &OperationContext,
        tx: &CkbTransaction,
    ) -> (CkbTransactionView, Vec<FieldError>) {
        let is_cellbase = tx.is_cellbase();
        let mut errors = Vec::new();

        // Register every lookup before awaiting any of them
        let previous: Vec<_> = if is_cellbase {
            Vec::new()
        } else {
            tx.inputs
                .iter()
                .map(|input| ctx.ckb_transaction(&input.previous_output.tx_hash))
                .collect()
        };
        let statuses: Vec<_> = (0..tx.outputs.len() as u32)
            .map(|index| ctx.cell_status(crate::ckb::OutPoint::new(tx.hash.clone(), index)))
            .collect();
        let (previous, statuses) = tokio::join!(join_all(previous), join_all(statuses));

        let mut input_cells = Vec::new();
        let mut inputs_complete = !is_cellbase;
        for (position, (input, prev)) in tx.inputs.iter().zip(previous).enumerate() {
            let cell = prev.and_then(|prev_tx| {
                BaseCell::from_transaction_output(&prev_tx, input.previous_output.index)
            });
            match cell {
                Ok(cell) => input_cells.push((
                    cell,
                    Some(CellStatus::Consumed {
                        tx_hash: tx.hash.clone(),
                        index: position as u32,
                    }),
                )),
                Err(e) => {
                    inputs_complete = false;
                    errors.push(FieldError::new(
                        format!("inputs[{}]", position),
                        &e,
                    ));
                }
            }
        }

        let mut output_cells = Vec::with_capacity(tx.outputs.len());
        for (index, status) in statuses.into_iter().enumerate() {
            let base = match BaseCell::from_transaction_output(tx, index as u32) {
                Ok(base) => base,
                Err(e) => {
                    errors.push(FieldError::new(format!("outputs[{}]", index), &e));
                    continue;
                }
            };
            let status = match status {
                Ok(status) => Some(status),
                Err(e) if e.is_not_found() => None,
                Err(e) => {
                    errors.push(FieldError::new(format!("outputs[{}].status", index), &e));
                    None
                }
            };
            output_cells.push((base, status));
        }

        let fee = if inputs_complete {
            let consumed: u64 = input_cells.iter().map(|(c, _)| c.capacity).sum();
            let created: u64 = output_cells.iter().map(|(c, _)| c.capacity).sum();
            consumed.checked_sub(created)
        } else {
            None
        };

        let ((inputs, input_errors), (outputs, output_errors)) = tokio::join!(
            enrich(ctx, "inputs", input_cells),
            enrich(ctx, "outputs", output_cells),
        );
        errors.extend(input_errors);
        errors.extend(output_errors);

        let view = CkbTransactionView {
            hash: tx.hash.clone(),
            block_number: tx.status.block_number,
            block_hash: tx.status.block_hash.clone(),
            status: tx.status.status,
            is_cellbase,
            inputs,
            outputs,
            fee,
        };
        (view, errors)
    }
}

/// Attach status and token metadata to assembled cells
pub(crate) async fn enrich(
    ctx: &OperationContext,
    field: &str,
    cells: Vec<(BaseCell, Option<CellStatus>)>,
) -> (Vec<Cell>, Vec<FieldError>) {
    let bases: Vec<BaseCell> = cells.iter().map(|(base, _)| base.clone()).collect();
    let infos = ctx.xudt_infos(&bases).await;

    let mut errors = Vec::new();
    let assembled = cells
        .into_iter()
        .zip(infos)
        .enumerate()
        .map(|(i, ((base, status), info))| {
            let info = info.unwrap_or_else(|e| {
                errors.push(FieldError::new(format!("{}[{}].xudtInfo", field, i), &e));
                None
            });
            base.into_cell(status, info)
        })
        .collect();
    (assembled, errors)
}

/// Record the final state of a resolution under its entry point
pub(crate) fn record(entry: &str, view: &Option<ResolvedTransactionView>) {
    let state = view
        .as_ref()
        .map(|v| v.state.to_string())
        .unwrap_or_else(|| "unbound".to_string());
    metrics::record_resolution(entry, &state);
}

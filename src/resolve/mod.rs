//! Cross-chain resolution
//!
//! This module provides:
//! - Binding records and identifier classification
//! - Cell assembly from CKB outputs
//! - Per-operation batch loaders (`OperationContext`)
//! - The transaction correlator and the top-level resolution service

pub mod binding;
pub mod cell;
pub mod correlator;
pub mod loaders;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use binding::{BindingPage, BindingSource, CrossChainBinding, Identifier, IdentifierKind};
pub use cell::{BaseCell, Cell, XudtCandidate};
pub use correlator::{
    CkbTransactionView, FieldError, ResolutionState, ResolvedTransactionView,
    TransactionCorrelator,
};
pub use loaders::OperationContext;
pub use service::{AddressOverview, LatestTransactions, LiveCellPage, RgbppResolutionService, TokenBalance};

use crate::bitcoin::ChainDataProvider;
use crate::ckb::{CellModelClient, TokenInfoSource, XudtTemplates};

use std::sync::Arc;

/// The upstream collaborators selected at startup
#[derive(Clone)]
pub struct Upstreams {
    pub bitcoin: Arc<dyn ChainDataProvider>,
    pub ckb: Arc<dyn CellModelClient>,
    pub bindings: Arc<dyn BindingSource>,
    pub tokens: Arc<dyn TokenInfoSource>,
    pub xudt_templates: Arc<XudtTemplates>,
}

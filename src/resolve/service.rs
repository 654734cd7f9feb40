//! Top-level resolution service
//!
//! Every public operation builds a fresh `OperationContext`, runs inside a
//! span carrying its operation id, and drops the context on return.

use super::binding::Identifier;
use super::cell::{BaseCell, Cell};
use super::correlator::{self, FieldError, ResolvedTransactionView, TransactionCorrelator};
use super::loaders::OperationContext;
use super::Upstreams;
use crate::bitcoin::{ChainAddress, FeeEstimate, Utxo};
use crate::ckb::{CellStatus, OutPoint, Script};
use crate::config::ResolverConfig;
use crate::error::{ResolveError, ResolveResult};

use futures::future::join_all;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::{debug, info_span, Instrument};

/// Upper bound on indexer pages walked when summing balances
const MAX_BALANCE_PAGES: usize = 50;

const DEFAULT_PAGE: i64 = 1;
const DEFAULT_PAGE_SIZE: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct LatestTransactions {
    pub items: Vec<ResolvedTransactionView>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveCellPage {
    pub cells: Vec<Cell>,
    pub cursor: Option<String>,
    pub errors: Vec<FieldError>,
}

/// Summed xUDT holdings of one token under a lock script
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub type_hash: String,
    pub symbol: String,
    pub decimal: u8,
    #[serde(serialize_with = "u128_as_string")]
    pub amount: u128,
    pub cell_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressOverview {
    pub address: ChainAddress,
    pub utxos: Vec<Utxo>,
}

fn u128_as_string<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub struct RgbppResolutionService {
    upstreams: Upstreams,
    correlator: TransactionCorrelator,
    config: ResolverConfig,
}

impl RgbppResolutionService {
    pub fn new(upstreams: Upstreams, config: ResolverConfig) -> Self {
        let correlator = TransactionCorrelator::new(upstreams.bindings.clone());
        Self {
            upstreams,
            correlator,
            config,
        }
    }

    fn context(&self) -> OperationContext {
        OperationContext::new(&self.upstreams, &self.config)
    }

    /// Page of the most recent bindings, each resolved to a merged view.
    ///
    /// `page` is 1-based and defaults to 1; `page_size` defaults to 10.
    pub async fn list_latest(
        &self,
        page: Option<i64>,
        page_size: Option<i64>,
    ) -> ResolveResult<LatestTransactions> {
        let page = page.unwrap_or(DEFAULT_PAGE);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page < 1 {
            return Err(ResolveError::InvalidArgument(format!(
                "page must be positive, got {}",
                page
            )));
        }
        if page_size < 1 || page_size > self.config.max_page_size as i64 {
            return Err(ResolveError::InvalidArgument(format!(
                "page_size must be between 1 and {}, got {}",
                self.config.max_page_size, page_size
            )));
        }

        let offset = (page as u64 - 1)
            .checked_mul(page_size as u64)
            .ok_or_else(|| ResolveError::InvalidArgument("page out of range".into()))?;

        let ctx = self.context();
        let span = info_span!("list_latest", op = %ctx.id(), page, page_size);
        async {
            let listing = self.upstreams.bindings.list(offset, page_size as u64).await?;

            let mut records = listing.records;
            records.sort_by(|a, b| b.recency().cmp(&a.recency()));
            records.truncate(page_size as usize);

            let items = join_all(
                records
                    .into_iter()
                    .map(|binding| self.correlator.resolve_binding(&ctx, binding)),
            )
            .await;

            for item in &items {
                crate::metrics::record_resolution("list_latest", &item.state.to_string());
            }
            debug!(
                "Resolved {} bindings with {} upstream batches",
                items.len(),
                ctx.dispatch_count()
            );

            Ok(LatestTransactions {
                items,
                total: listing.total,
            })
        }
        .instrument(span)
        .await
    }

    /// Resolve a binding from an identifier of either chain, classified by
    /// format
    pub async fn resolve_by_either_id(
        &self,
        identifier: &str,
    ) -> ResolveResult<Option<ResolvedTransactionView>> {
        let identifier = Identifier::parse(identifier)?;
        self.resolve(identifier).await
    }

    pub async fn resolve(
        &self,
        identifier: Identifier,
    ) -> ResolveResult<Option<ResolvedTransactionView>> {
        let ctx = self.context();
        let span = info_span!("resolve", op = %ctx.id(), id = %identifier);
        async {
            let (entry, view) = match &identifier {
                Identifier::CkbTxHash(hash) => (
                    "ckb_hash",
                    self.correlator.resolve_by_ckb_hash(&ctx, hash).await?,
                ),
                Identifier::BtcTxid(txid) => (
                    "btc_txid",
                    self.correlator.resolve_by_btc_txid(&ctx, txid).await?,
                ),
            };
            correlator::record(entry, &view);
            Ok(view)
        }
        .instrument(span)
        .await
    }

    /// One output cell with status and token metadata
    pub async fn resolve_cell(&self, out_point: OutPoint) -> ResolveResult<Cell> {
        let ctx = self.context();
        let span = info_span!("resolve_cell", op = %ctx.id(), out_point = %out_point);
        async {
            let tx = ctx.ckb_transaction(&out_point.tx_hash).await?;
            let base = BaseCell::from_transaction_output(&tx, out_point.index)?;

            let status = match ctx.cell_status(out_point.clone()).await {
                Ok(status) => Some(status),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
            let xudt_info = ctx
                .xudt_infos(std::slice::from_ref(&base))
                .await
                .pop()
                .transpose()?
                .flatten();

            Ok(base.into_cell(status, xudt_info))
        }
        .instrument(span)
        .await
    }

    /// Live cells of a lock script, newest first
    pub async fn live_cells(
        &self,
        lock: &Script,
        limit: Option<u32>,
        cursor: Option<String>,
    ) -> ResolveResult<LiveCellPage> {
        let limit = limit.unwrap_or(self.config.max_page_size);
        if limit == 0 || limit > self.config.max_page_size {
            return Err(ResolveError::InvalidArgument(format!(
                "limit must be between 1 and {}, got {}",
                self.config.max_page_size, limit
            )));
        }

        let ctx = self.context();
        let span = info_span!("live_cells", op = %ctx.id(), limit);
        async {
            let page = self.upstreams.ckb.cells_by_lock(lock, limit, cursor).await?;
            let cells = page
                .cells
                .iter()
                .map(|record| (BaseCell::from_cell_record(record), Some(CellStatus::Live)))
                .collect();
            let (cells, errors) = correlator::enrich(&ctx, "cells", cells).await;

            Ok(LiveCellPage {
                cells,
                cursor: page.cursor,
                errors,
            })
        }
        .instrument(span)
        .await
    }

    /// xUDT balances held by a lock script, summed in base units
    pub async fn token_balances(&self, lock: &Script) -> ResolveResult<Vec<TokenBalance>> {
        let ctx = self.context();
        let span = info_span!("token_balances", op = %ctx.id());
        async {
            let mut cells = Vec::new();
            let mut cursor = None;
            for _ in 0..MAX_BALANCE_PAGES {
                let page = self
                    .upstreams
                    .ckb
                    .cells_by_lock(lock, self.config.max_page_size, cursor)
                    .await?;
                cells.extend(page.cells.iter().map(BaseCell::from_cell_record));
                cursor = page.cursor;
                if cursor.is_none() {
                    break;
                }
            }
            if cursor.is_some() {
                debug!("Balance scan stopped after {} pages", MAX_BALANCE_PAGES);
            }

            let mut balances: BTreeMap<String, TokenBalance> = BTreeMap::new();
            for info in ctx.xudt_infos(&cells).await {
                let Some(info) = info? else {
                    continue;
                };
                let balance = balances
                    .entry(info.type_hash.clone())
                    .or_insert_with(|| TokenBalance {
                        type_hash: info.type_hash.clone(),
                        symbol: info.symbol.clone(),
                        decimal: info.decimal,
                        amount: 0,
                        cell_count: 0,
                    });
                balance.amount = balance.amount.saturating_add(info.amount);
                balance.cell_count += 1;
            }

            Ok(balances.into_values().collect())
        }
        .instrument(span)
        .await
    }

    /// Address snapshot and UTXO set, fetched concurrently
    pub async fn btc_address_overview(&self, address: &str) -> ResolveResult<AddressOverview> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ResolveError::InvalidArgument("address must not be empty".into()));
        }

        let bitcoin = &self.upstreams.bitcoin;
        let (snapshot, utxos) =
            tokio::try_join!(bitcoin.address(address), bitcoin.address_utxos(address))?;
        Ok(AddressOverview {
            address: snapshot,
            utxos,
        })
    }

    pub async fn btc_fees(&self) -> ResolveResult<FeeEstimate> {
        self.upstreams.bitcoin.recommended_fees().await
    }
}

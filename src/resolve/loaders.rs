//! Per-operation batch loaders

use super::cell::BaseCell;
use super::Upstreams;
use crate::batch::{BatchCoalescer, BatchFetch};
use crate::bitcoin::{BtcTransaction, ChainDataProvider};
use crate::ckb::{CellModelClient, CellStatus, CkbTransaction, OutPoint, TokenInfo, TokenInfoSource, XudtInfo, XudtTemplates};
use crate::config::ResolverConfig;
use crate::error::ResolveResult;

use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// The explorer serves token info one type hash at a time
const TOKEN_FETCH_CONCURRENCY: usize = 4;

struct CkbTransactionFetch {
    client: Arc<dyn CellModelClient>,
}

#[async_trait]
impl BatchFetch<String, CkbTransaction> for CkbTransactionFetch {
    async fn fetch(
        &self,
        hashes: &[String],
    ) -> ResolveResult<HashMap<String, ResolveResult<CkbTransaction>>> {
        self.client.transactions(hashes).await
    }
}

struct CellStatusFetch {
    client: Arc<dyn CellModelClient>,
}

#[async_trait]
impl BatchFetch<OutPoint, CellStatus> for CellStatusFetch {
    async fn fetch(
        &self,
        out_points: &[OutPoint],
    ) -> ResolveResult<HashMap<OutPoint, ResolveResult<CellStatus>>> {
        self.client.cell_statuses(out_points).await
    }
}

/// Bitcoin backends have no multi-get, so a batch fans out with bounded
/// concurrency and reports per-key outcomes
struct BtcTransactionFetch {
    provider: Arc<dyn ChainDataProvider>,
    concurrency: usize,
}

#[async_trait]
impl BatchFetch<String, BtcTransaction> for BtcTransactionFetch {
    async fn fetch(
        &self,
        txids: &[String],
    ) -> ResolveResult<HashMap<String, ResolveResult<BtcTransaction>>> {
        let provider = &self.provider;
        let results: Vec<(String, ResolveResult<BtcTransaction>)> = stream::iter(txids.iter().cloned())
            .map(|txid| async move {
                let result = provider.transaction(&txid).await;
                (txid, result)
            })
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await;
        Ok(results.into_iter().collect())
    }
}

struct TokenInfoFetch {
    source: Arc<dyn TokenInfoSource>,
}

#[async_trait]
impl BatchFetch<String, Option<TokenInfo>> for TokenInfoFetch {
    async fn fetch(
        &self,
        type_hashes: &[String],
    ) -> ResolveResult<HashMap<String, ResolveResult<Option<TokenInfo>>>> {
        let source = &self.source;
        let results: Vec<(String, ResolveResult<Option<TokenInfo>>)> =
            stream::iter(type_hashes.iter().cloned())
                .map(|type_hash| async move {
                    let result = source.token_info(&type_hash).await;
                    (type_hash, result)
                })
                .buffer_unordered(TOKEN_FETCH_CONCURRENCY)
                .collect()
                .await;
        Ok(results.into_iter().collect())
    }
}

/// Request-scoped loaders and caches.
///
/// Created at the start of every top-level operation and threaded through
/// each resolver; dropping it discards every memoised outcome.
pub struct OperationContext {
    id: Uuid,
    ckb_transactions: BatchCoalescer<String, CkbTransaction>,
    btc_transactions: BatchCoalescer<String, BtcTransaction>,
    cell_statuses: BatchCoalescer<OutPoint, CellStatus>,
    token_infos: BatchCoalescer<String, Option<TokenInfo>>,
    xudt_templates: Arc<XudtTemplates>,
}

impl OperationContext {
    pub fn new(upstreams: &Upstreams, config: &ResolverConfig) -> Self {
        let batch = config.max_batch_size;
        Self {
            id: Uuid::new_v4(),
            ckb_transactions: BatchCoalescer::new(
                "ckb_transaction",
                Arc::new(CkbTransactionFetch {
                    client: upstreams.ckb.clone(),
                }),
                batch,
            ),
            btc_transactions: BatchCoalescer::new(
                "btc_transaction",
                Arc::new(BtcTransactionFetch {
                    provider: upstreams.bitcoin.clone(),
                    concurrency: config.btc_fetch_concurrency,
                }),
                batch,
            ),
            cell_statuses: BatchCoalescer::new(
                "cell_status",
                Arc::new(CellStatusFetch {
                    client: upstreams.ckb.clone(),
                }),
                batch,
            ),
            token_infos: BatchCoalescer::new(
                "token_info",
                Arc::new(TokenInfoFetch {
                    source: upstreams.tokens.clone(),
                }),
                batch,
            ),
            xudt_templates: upstreams.xudt_templates.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn ckb_transaction(
        &self,
        hash: &str,
    ) -> impl Future<Output = ResolveResult<CkbTransaction>> + Send + '_ {
        self.ckb_transactions.request(hash.to_string())
    }

    pub fn btc_transaction(
        &self,
        txid: &str,
    ) -> impl Future<Output = ResolveResult<BtcTransaction>> + Send + '_ {
        self.btc_transactions.request(txid.to_string())
    }

    pub fn cell_status(
        &self,
        out_point: OutPoint,
    ) -> impl Future<Output = ResolveResult<CellStatus>> + Send + '_ {
        self.cell_statuses.request(out_point)
    }

    /// Token metadata for each cell, `Ok(None)` for cells that are not a
    /// registered xUDT
    pub async fn xudt_infos(&self, cells: &[BaseCell]) -> Vec<ResolveResult<Option<XudtInfo>>> {
        let lookups: Vec<_> = cells
            .iter()
            .map(|cell| {
                let pending = cell.xudt_candidate(&self.xudt_templates).map(|candidate| {
                    let info = self.token_infos.request(candidate.type_hash.clone());
                    (candidate, info)
                });
                async move {
                    let Some((candidate, info)) = pending else {
                        return Ok(None);
                    };
                    match info.await {
                        Ok(Some(info)) => Ok(Some(XudtInfo {
                            symbol: info.symbol,
                            amount: candidate.amount,
                            decimal: info.decimal,
                            type_hash: candidate.type_hash,
                        })),
                        Ok(None) => Ok(None),
                        Err(e) if e.is_not_found() => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .collect();
        join_all(lookups).await
    }

    /// Upstream batches issued so far across every loader
    pub fn dispatch_count(&self) -> usize {
        self.ckb_transactions.dispatch_count()
            + self.btc_transactions.dispatch_count()
            + self.cell_statuses.dispatch_count()
            + self.token_infos.dispatch_count()
    }
}

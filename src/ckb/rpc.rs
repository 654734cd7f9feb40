//! JSON-RPC client for a CKB node with the built-in indexer enabled

use super::types::{
    hex_u32, opt_hex_u64, CellInput, CellOutput, CellPage, CellRecord, CellStatus,
    CkbBlock, CkbHeader, CkbTransaction, OutPoint, Script, TxStatus,
};
use super::CellModelClient;
use crate::config::CkbConfig;
use crate::error::{ResolveError, ResolveResult};
use crate::http;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

const SERVICE: &str = "ckb-rpc";
const INDEXER_PAGE: u64 = 100;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    hash: String,
    inputs: Vec<CellInput>,
    outputs: Vec<CellOutput>,
    outputs_data: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawTransactionWithStatus {
    transaction: Option<RawTransaction>,
    tx_status: TxStatus,
}

#[derive(Debug, Deserialize)]
struct RawCellData {
    content: String,
}

#[derive(Debug, Deserialize)]
struct RawLiveCell {
    output: CellOutput,
    #[serde(default)]
    data: Option<RawCellData>,
}

#[derive(Debug, Deserialize)]
struct RawCellWithStatus {
    cell: Option<RawLiveCell>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RawBlockTransaction {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    header: CkbHeader,
    transactions: Vec<RawBlockTransaction>,
}

#[derive(Debug, Deserialize)]
struct IndexerPage<T> {
    objects: Vec<T>,
    last_cursor: String,
}

#[derive(Debug, Deserialize)]
struct IndexerTx {
    tx_hash: String,
    #[serde(with = "hex_u32")]
    io_index: u32,
    io_type: String,
}

#[derive(Debug, Deserialize)]
struct IndexerCell {
    output: CellOutput,
    #[serde(default)]
    output_data: Option<String>,
    out_point: OutPoint,
    #[serde(with = "opt_hex_u64", default)]
    block_number: Option<u64>,
}

/// CKB node JSON-RPC client.
///
/// Multi-key lookups are sent as one JSON-RPC batch array so that a coalesced
/// batch costs a single HTTP round trip.
pub struct CkbRpcClient {
    client: Client,
    url: String,
    spender_scan_pages: u32,
    next_id: AtomicU64,
}

impl CkbRpcClient {
    pub fn new(config: &CkbConfig) -> ResolveResult<Self> {
        Ok(Self {
            client: http::build_client(SERVICE, config.timeout_ms)?,
            url: config.rpc_url.clone(),
            spender_scan_pages: config.spender_scan_pages,
            next_id: AtomicU64::new(1),
        })
    }

    /// Single JSON-RPC call; a `null` result comes back as `None`
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> ResolveResult<Option<T>> {
        let mut results = self.batch::<T>(method, vec![params]).await?;
        results
            .pop()
            .ok_or_else(|| ResolveError::protocol(SERVICE, "empty batch response"))?
    }

    /// Issue one JSON-RPC batch of `method` calls, returning one outcome per
    /// entry of `params`, in order. The outer `Err` is reserved for transport
    /// and envelope failures.
    async fn batch<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> ResolveResult<Vec<ResolveResult<Option<T>>>> {
        if params.is_empty() {
            return Ok(Vec::new());
        }

        let first_id = self.next_id.fetch_add(params.len() as u64, Ordering::Relaxed);
        let requests: Vec<RpcRequest> = params
            .into_iter()
            .enumerate()
            .map(|(i, params)| RpcRequest {
                jsonrpc: "2.0",
                id: first_id + i as u64,
                method,
                params,
            })
            .collect();
        debug!("CKB RPC {} x{}", method, requests.len());

        let body = http::send_text(SERVICE, self.client.post(&self.url).json(&requests))
            .await?
            .ok_or_else(|| ResolveError::unavailable(SERVICE, "RPC endpoint returned 404"))?;
        let responses: Vec<RpcResponse> = http::decode(SERVICE, &body)?;

        Ok(match_responses(method, first_id, requests.len(), responses))
    }

    /// Locate the input that consumed `out_point` by scanning the indexer for
    /// transactions touching its lock script from `from_block` onwards
    async fn find_spender(
        &self,
        out_point: &OutPoint,
        lock: &Script,
        from_block: u64,
    ) -> ResolveResult<Option<(String, u32)>> {
        let mut cursor: Option<String> = None;

        for _ in 0..self.spender_scan_pages {
            let search_key = json!({
                "script": lock,
                "script_type": "lock",
                "filter": {
                    "block_range": [format!("{:#x}", from_block), format!("{:#x}", u64::MAX)]
                }
            });
            let page: IndexerPage<IndexerTx> = self
                .call(
                    "get_transactions",
                    json!([search_key, "asc", format!("{:#x}", INDEXER_PAGE), cursor]),
                )
                .await?
                .ok_or_else(|| ResolveError::protocol(SERVICE, "get_transactions returned null"))?;

            let candidates: Vec<(String, u32)> = page
                .objects
                .iter()
                .filter(|o| o.io_type == "input" && o.tx_hash != out_point.tx_hash)
                .map(|o| (o.tx_hash.clone(), o.io_index))
                .collect();

            if !candidates.is_empty() {
                let hashes: Vec<String> = candidates
                    .iter()
                    .map(|(h, _)| h.clone())
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .collect();
                let txs = self.transactions(&hashes).await?;

                for (hash, io_index) in candidates {
                    let tx = match txs.get(&hash) {
                        Some(Ok(tx)) => tx,
                        Some(Err(e)) => return Err(e.clone()),
                        None => continue,
                    };
                    let spends = tx
                        .inputs
                        .get(io_index as usize)
                        .map(|input| &input.previous_output == out_point)
                        .unwrap_or(false);
                    if spends {
                        return Ok(Some((hash, io_index)));
                    }
                }
            }

            if page.objects.len() < INDEXER_PAGE as usize || page.last_cursor.is_empty() {
                break;
            }
            cursor = Some(page.last_cursor);
        }

        Ok(None)
    }
}

#[async_trait]
impl CellModelClient for CkbRpcClient {
    async fn transactions(
        &self,
        hashes: &[String],
    ) -> ResolveResult<HashMap<String, ResolveResult<CkbTransaction>>> {
        let params = hashes.iter().map(|h| json!([h])).collect();
        let results = self.batch::<RawTransactionWithStatus>("get_transaction", params).await?;

        let mut found = HashMap::new();
        for (hash, result) in hashes.iter().zip(results) {
            match result {
                Ok(Some(RawTransactionWithStatus {
                    transaction: Some(tx),
                    tx_status,
                })) => {
                    found.insert(
                        hash.clone(),
                        Ok(CkbTransaction {
                            hash: tx.hash,
                            inputs: tx.inputs,
                            outputs: tx.outputs,
                            outputs_data: tx.outputs_data,
                            status: tx_status,
                        }),
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    found.insert(hash.clone(), Err(e));
                }
            }
        }
        Ok(found)
    }

    async fn cell_statuses(
        &self,
        out_points: &[OutPoint],
    ) -> ResolveResult<HashMap<OutPoint, ResolveResult<CellStatus>>> {
        let params = out_points.iter().map(|op| json!([op, false])).collect();
        let results = self.batch::<RawCellWithStatus>("get_live_cell", params).await?;

        let mut statuses = HashMap::new();
        let mut dead = Vec::new();
        for (out_point, result) in out_points.iter().zip(results) {
            match result {
                Ok(Some(raw)) if raw.status == "live" => {
                    statuses.insert(out_point.clone(), Ok(CellStatus::Live));
                }
                Ok(Some(raw)) if raw.status == "dead" => dead.push(out_point.clone()),
                Ok(_) => {}
                Err(e) => {
                    statuses.insert(out_point.clone(), Err(e));
                }
            }
        }
        if dead.is_empty() {
            return Ok(statuses);
        }

        // Dead cells: recover lock and creation block from the creating transaction
        let creators: Vec<String> = dead
            .iter()
            .map(|op| op.tx_hash.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let txs = self.transactions(&creators).await?;

        for out_point in dead {
            let tx = match txs.get(&out_point.tx_hash) {
                Some(Ok(tx)) => tx,
                Some(Err(e)) => {
                    statuses.insert(out_point, Err(e.clone()));
                    continue;
                }
                None => continue,
            };
            let Some(output) = tx.outputs.get(out_point.index as usize) else {
                continue;
            };
            let from_block = tx.status.block_number.unwrap_or(0);
            match self.find_spender(&out_point, &output.lock, from_block).await {
                Ok(Some((tx_hash, index))) => {
                    statuses.insert(out_point, Ok(CellStatus::Consumed { tx_hash, index }));
                }
                Ok(None) => warn!(
                    "Spender of dead cell {} not found within {} indexer pages",
                    out_point, self.spender_scan_pages
                ),
                Err(e) => {
                    statuses.insert(out_point, Err(e));
                }
            }
        }

        Ok(statuses)
    }

    async fn live_cell(&self, out_point: &OutPoint) -> ResolveResult<Option<CellRecord>> {
        let raw: Option<RawCellWithStatus> =
            self.call("get_live_cell", json!([out_point, true])).await?;

        Ok(raw.and_then(|r| {
            if r.status != "live" {
                return None;
            }
            r.cell.map(|cell| CellRecord {
                out_point: out_point.clone(),
                output: cell.output,
                output_data: cell.data.map(|d| d.content),
                block_number: None,
            })
        }))
    }

    async fn cells_by_lock(
        &self,
        lock: &Script,
        limit: u32,
        after: Option<String>,
    ) -> ResolveResult<CellPage> {
        let search_key = json!({ "script": lock, "script_type": "lock", "with_data": true });
        let page: IndexerPage<IndexerCell> = self
            .call(
                "get_cells",
                json!([search_key, "desc", format!("{:#x}", limit), after]),
            )
            .await?
            .ok_or_else(|| ResolveError::protocol(SERVICE, "get_cells returned null"))?;

        let exhausted = page.objects.len() < limit as usize || page.last_cursor.is_empty();
        Ok(CellPage {
            cells: page
                .objects
                .into_iter()
                .map(|c| CellRecord {
                    out_point: c.out_point,
                    output: c.output,
                    output_data: c.output_data,
                    block_number: c.block_number,
                })
                .collect(),
            cursor: if exhausted { None } else { Some(page.last_cursor) },
        })
    }

    async fn block(&self, hash: &str) -> ResolveResult<CkbBlock> {
        let raw: RawBlock = self
            .call("get_block", json!([hash]))
            .await?
            .ok_or_else(|| ResolveError::not_found("ckb block", hash))?;

        Ok(CkbBlock {
            header: raw.header,
            transactions: raw.transactions.into_iter().map(|t| t.hash).collect(),
        })
    }

    async fn tip_header(&self) -> ResolveResult<CkbHeader> {
        self.call("get_tip_header", json!([]))
            .await?
            .ok_or_else(|| ResolveError::protocol(SERVICE, "get_tip_header returned null"))
    }
}

/// Pair batch responses with their requests by id. Each entry carries its own
/// outcome: a JSON-RPC error or a missing response fails only that entry.
fn match_responses<T: DeserializeOwned>(
    method: &str,
    first_id: u64,
    count: usize,
    responses: Vec<RpcResponse>,
) -> Vec<ResolveResult<Option<T>>> {
    let mut by_id: HashMap<u64, RpcResponse> =
        responses.into_iter().map(|r| (r.id, r)).collect();

    (0..count as u64)
        .map(|i| {
            let response = by_id.remove(&(first_id + i)).ok_or_else(|| {
                ResolveError::protocol(SERVICE, format!("missing response for {}", method))
            })?;
            if let Some(err) = response.error {
                return Err(ResolveError::protocol(
                    SERVICE,
                    format!("{} failed ({}): {}", method, err.code, err.message),
                ));
            }
            match response.result {
                None | Some(Value::Null) => Ok(None),
                Some(value) => serde_json::from_value(value)
                    .map(Some)
                    .map_err(|e| ResolveError::protocol(SERVICE, e)),
            }
        })
        .collect()
}

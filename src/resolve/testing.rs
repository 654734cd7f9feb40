//! In-memory upstreams that record how they were called

use super::binding::{BindingPage, BindingSource, CrossChainBinding};
use super::Upstreams;
use crate::bitcoin::{
    Block, BtcTransaction, BtcTxStatus, ChainAddress, ChainDataProvider, FeeEstimate, Utxo,
};
use crate::ckb::{
    CellInput, CellModelClient, CellOutput, CellPage, CellRecord, CellStatus, CkbBlock,
    CkbHeader, CkbTransaction, OutPoint, Script, ScriptHashType, TokenInfo, TokenInfoSource,
    TxStatus, XudtTemplates,
};
use crate::error::{ResolveError, ResolveResult};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn lock_script() -> Script {
    Script {
        code_hash: format!("0x{}", "11".repeat(32)),
        hash_type: ScriptHashType::Type,
        args: "0x01".into(),
    }
}

/// Transaction spending `inputs` (`(tx_hash, index)`) into `outputs` plain
/// cells of 100 CKB each
pub fn ckb_tx(hash: &str, inputs: Vec<(&str, u32)>, outputs: usize) -> CkbTransaction {
    CkbTransaction {
        hash: hash.to_string(),
        inputs: inputs
            .into_iter()
            .map(|(tx_hash, index)| CellInput {
                previous_output: OutPoint::new(tx_hash, index),
                since: 0,
            })
            .collect(),
        outputs: (0..outputs)
            .map(|_| CellOutput {
                capacity: 10_000_000_000,
                lock: lock_script(),
                type_: None,
            })
            .collect(),
        outputs_data: vec!["0x".to_string(); outputs],
        status: TxStatus::committed_in(Some("0xb1".into()), Some(100)),
    }
}

pub fn cellbase_tx(hash: &str) -> CkbTransaction {
    let mut tx = ckb_tx(hash, vec![], 1);
    tx.inputs.push(CellInput {
        previous_output: OutPoint::new(format!("0x{}", "0".repeat(64)), u32::MAX),
        since: 100,
    });
    tx
}

pub fn btc_tx(txid: &str) -> BtcTransaction {
    BtcTransaction {
        txid: txid.to_string(),
        version: 2,
        locktime: 0,
        vin: vec![],
        vout: vec![],
        size: 200,
        weight: 560,
        fee: 300,
        status: BtcTxStatus {
            confirmed: true,
            block_height: Some(840_000),
            block_hash: Some("00".repeat(32)),
            block_time: Some(1_713_571_767),
        },
    }
}

pub fn binding(ckb_tx_hash: &str, btc_txid: Option<&str>, sequence: u64) -> CrossChainBinding {
    CrossChainBinding {
        ckb_tx_hash: ckb_tx_hash.to_string(),
        btc_txid: btc_txid.map(str::to_string),
        block_number: Some(sequence),
        block_timestamp: None,
        leap_direction: None,
        sequence,
    }
}

pub fn upstreams(ckb: FakeCkb, bitcoin: FakeBitcoin) -> Upstreams {
    with_bindings(ckb, bitcoin, FakeBindings::default())
}

pub fn with_bindings(ckb: FakeCkb, bitcoin: FakeBitcoin, bindings: FakeBindings) -> Upstreams {
    Upstreams {
        bitcoin: Arc::new(bitcoin),
        ckb: Arc::new(ckb),
        bindings: Arc::new(bindings),
        tokens: Arc::new(FakeTokens::default()),
        xudt_templates: Arc::new(XudtTemplates::default()),
    }
}

#[derive(Default)]
struct CkbState {
    transactions: HashMap<String, CkbTransaction>,
    rejected: HashSet<String>,
    spent: HashMap<OutPoint, CellStatus>,
    cells: Vec<CellRecord>,
    transaction_batches: Vec<Vec<String>>,
    status_batches: Vec<Vec<OutPoint>>,
    fail: bool,
}

/// CKB node fake. Outputs of known transactions are live unless marked spent.
#[derive(Clone, Default)]
pub struct FakeCkb {
    state: Arc<Mutex<CkbState>>,
}

impl FakeCkb {
    pub fn with_transactions(txs: Vec<CkbTransaction>) -> Self {
        let fake = Self::default();
        fake.state.lock().transactions = txs.into_iter().map(|tx| (tx.hash.clone(), tx)).collect();
        fake
    }

    pub fn failing() -> Self {
        let fake = Self::default();
        fake.state.lock().fail = true;
        fake
    }

    /// Make lookups of `hash` fail on their own, as a node does for bad params
    pub fn reject(&self, hash: &str) {
        self.state.lock().rejected.insert(hash.to_string());
    }

    pub fn spend(&self, out_point: OutPoint, tx_hash: &str, index: u32) {
        self.state.lock().spent.insert(
            out_point,
            CellStatus::Consumed {
                tx_hash: tx_hash.to_string(),
                index,
            },
        );
    }

    pub fn add_cells(&self, cells: Vec<CellRecord>) {
        self.state.lock().cells.extend(cells);
    }

    pub fn transaction_batches(&self) -> Vec<Vec<String>> {
        self.state.lock().transaction_batches.clone()
    }

    pub fn status_batches(&self) -> Vec<Vec<OutPoint>> {
        self.state.lock().status_batches.clone()
    }

    fn unavailable() -> ResolveError {
        ResolveError::unavailable("ckb-rpc", "connection refused")
    }
}

#[async_trait]
impl CellModelClient for FakeCkb {
    async fn transactions(
        &self,
        hashes: &[String],
    ) -> ResolveResult<HashMap<String, ResolveResult<CkbTransaction>>> {
        let mut state = self.state.lock();
        state.transaction_batches.push(hashes.to_vec());
        if state.fail {
            return Err(Self::unavailable());
        }
        Ok(hashes
            .iter()
            .filter_map(|h| {
                if state.rejected.contains(h) {
                    let err = ResolveError::protocol("ckb-rpc", "get_transaction failed (-32602)");
                    return Some((h.clone(), Err(err)));
                }
                state.transactions.get(h).map(|tx| (h.clone(), Ok(tx.clone())))
            })
            .collect())
    }

    async fn cell_statuses(
        &self,
        out_points: &[OutPoint],
    ) -> ResolveResult<HashMap<OutPoint, ResolveResult<CellStatus>>> {
        let mut state = self.state.lock();
        state.status_batches.push(out_points.to_vec());
        if state.fail {
            return Err(Self::unavailable());
        }
        Ok(out_points
            .iter()
            .filter_map(|op| {
                if let Some(spent) = state.spent.get(op) {
                    return Some((op.clone(), Ok(spent.clone())));
                }
                let exists = state
                    .transactions
                    .get(&op.tx_hash)
                    .map(|tx| (op.index as usize) < tx.outputs.len())
                    .unwrap_or(false);
                exists.then(|| (op.clone(), Ok(CellStatus::Live)))
            })
            .collect())
    }

    async fn live_cell(&self, out_point: &OutPoint) -> ResolveResult<Option<CellRecord>> {
        let state = self.state.lock();
        if state.fail {
            return Err(Self::unavailable());
        }
        Ok(state.cells.iter().find(|c| &c.out_point == out_point).cloned())
    }

    async fn cells_by_lock(
        &self,
        lock: &Script,
        limit: u32,
        after: Option<String>,
    ) -> ResolveResult<CellPage> {
        let state = self.state.lock();
        if state.fail {
            return Err(Self::unavailable());
        }
        let matching: Vec<CellRecord> = state
            .cells
            .iter()
            .filter(|c| &c.output.lock == lock)
            .cloned()
            .collect();
        let start: usize = after.map(|c| c.parse().unwrap_or(0)).unwrap_or(0);
        let end = (start + limit as usize).min(matching.len());
        Ok(CellPage {
            cells: matching[start.min(end)..end].to_vec(),
            cursor: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn block(&self, hash: &str) -> ResolveResult<CkbBlock> {
        Err(ResolveError::not_found("ckb block", hash))
    }

    async fn tip_header(&self) -> ResolveResult<CkbHeader> {
        Ok(CkbHeader {
            hash: "0xb1".into(),
            number: 100,
            timestamp: 1_700_000_000_000,
            parent_hash: "0xb0".into(),
        })
    }
}

#[derive(Default)]
struct BitcoinState {
    transactions: HashMap<String, BtcTransaction>,
    addresses: HashMap<String, (ChainAddress, Vec<Utxo>)>,
    fail: bool,
}

/// Esplora-like fake; counts single-transaction fetches
#[derive(Clone, Default)]
pub struct FakeBitcoin {
    state: Arc<Mutex<BitcoinState>>,
    transaction_calls: Arc<AtomicUsize>,
}

impl FakeBitcoin {
    pub fn with_transactions(txs: Vec<BtcTransaction>) -> Self {
        let fake = Self::default();
        fake.state.lock().transactions = txs.into_iter().map(|tx| (tx.txid.clone(), tx)).collect();
        fake
    }

    pub fn failing() -> Self {
        let fake = Self::default();
        fake.state.lock().fail = true;
        fake
    }

    pub fn add_address(&self, address: ChainAddress, utxos: Vec<Utxo>) {
        self.state
            .lock()
            .addresses
            .insert(address.address.clone(), (address, utxos));
    }

    pub fn transaction_calls(&self) -> usize {
        self.transaction_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> ResolveResult<()> {
        if self.state.lock().fail {
            return Err(ResolveError::unavailable("esplora", "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainDataProvider for FakeBitcoin {
    async fn recommended_fees(&self) -> ResolveResult<FeeEstimate> {
        self.check()?;
        Ok(FeeEstimate {
            fastest_fee: 20,
            half_hour_fee: 15,
            hour_fee: 10,
            economy_fee: 5,
            minimum_fee: 1,
        })
    }

    async fn address(&self, address: &str) -> ResolveResult<ChainAddress> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .addresses
            .get(address)
            .map(|(a, _)| a.clone())
            .unwrap_or_else(|| ChainAddress::empty(address)))
    }

    async fn address_utxos(&self, address: &str) -> ResolveResult<Vec<Utxo>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .addresses
            .get(address)
            .map(|(_, u)| u.clone())
            .unwrap_or_default())
    }

    async fn address_transactions(
        &self,
        _address: &str,
        _after: Option<&str>,
    ) -> ResolveResult<Vec<BtcTransaction>> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn transaction(&self, txid: &str) -> ResolveResult<BtcTransaction> {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.state
            .lock()
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| ResolveError::not_found("bitcoin transaction", txid))
    }

    async fn transaction_hex(&self, txid: &str) -> ResolveResult<String> {
        Err(ResolveError::not_found("bitcoin transaction", txid))
    }

    async fn block(&self, hash: &str) -> ResolveResult<Block> {
        Err(ResolveError::not_found("bitcoin block", hash))
    }

    async fn block_transactions(&self, hash: &str) -> ResolveResult<Vec<BtcTransaction>> {
        Err(ResolveError::not_found("bitcoin block", hash))
    }

    async fn block_height_to_hash(&self, height: u64) -> ResolveResult<String> {
        Err(ResolveError::not_found("bitcoin block height", height.to_string()))
    }

    async fn block_header(&self, hash: &str) -> ResolveResult<String> {
        Err(ResolveError::not_found("bitcoin block", hash))
    }

    async fn block_txids(&self, hash: &str) -> ResolveResult<Vec<String>> {
        Err(ResolveError::not_found("bitcoin block", hash))
    }

    async fn chain_tip(&self) -> ResolveResult<String> {
        self.check()?;
        Ok("00".repeat(32))
    }
}

/// Binding store ordered by recency the way the explorer serves it
#[derive(Clone, Default)]
pub struct FakeBindings {
    records: Arc<Vec<CrossChainBinding>>,
    list_calls: Arc<AtomicUsize>,
}

impl FakeBindings {
    pub fn new(mut records: Vec<CrossChainBinding>) -> Self {
        records.sort_by(|a, b| b.recency().cmp(&a.recency()));
        Self {
            records: Arc::new(records),
            list_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BindingSource for FakeBindings {
    async fn find_by_ckb_hash(&self, hash: &str) -> ResolveResult<Option<CrossChainBinding>> {
        Ok(self.records.iter().find(|b| b.ckb_tx_hash == hash).cloned())
    }

    async fn find_by_btc_txid(&self, txid: &str) -> ResolveResult<Option<CrossChainBinding>> {
        Ok(self
            .records
            .iter()
            .find(|b| b.btc_txid.as_deref() == Some(txid))
            .cloned())
    }

    async fn list(&self, offset: u64, limit: u64) -> ResolveResult<BindingPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(BindingPage {
            records: self
                .records
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect(),
            total: self.records.len() as u64,
        })
    }
}

/// Token registry fake
#[derive(Clone, Default)]
pub struct FakeTokens {
    tokens: Arc<HashMap<String, TokenInfo>>,
}

impl FakeTokens {
    pub fn new(tokens: Vec<(String, TokenInfo)>) -> Self {
        Self {
            tokens: Arc::new(tokens.into_iter().collect()),
        }
    }
}

#[async_trait]
impl TokenInfoSource for FakeTokens {
    async fn token_info(&self, type_hash: &str) -> ResolveResult<Option<TokenInfo>> {
        Ok(self.tokens.get(type_hash).cloned())
    }
}

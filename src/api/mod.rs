//! HTTP JSON boundary over the resolution service
//!
//! Amounts leave the core in base units; this layer adds the human-readable
//! display strings.

use crate::bitcoin::{BtcTransaction, ChainAddress, FeeEstimate, Utxo};
use crate::ckb::{CellStatus, OutPoint, Script, TxCommitStatus, XudtInfo};
use crate::config::ServerConfig;
use crate::error::{ResolveError, ResolveResult};
use crate::format;
use crate::resolve::{
    AddressOverview, Cell, CkbTransactionView, CrossChainBinding, FieldError, Identifier,
    IdentifierKind, ResolutionState, ResolvedTransactionView, RgbppResolutionService,
    TokenBalance,
};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RgbppResolutionService>,
}

pub fn router(service: Arc<RgbppResolutionService>) -> Router {
    Router::new()
        .route("/rgbpp/transactions", get(list_transactions))
        .route("/rgbpp/transactions/:id", get(get_transaction))
        .route("/bitcoin/address/:address", get(get_address))
        .route("/bitcoin/fees", get(get_fees))
        .route("/ckb/cells/:tx_hash/:index", get(get_cell))
        .route("/ckb/cells/live", post(list_live_cells))
        .route("/ckb/balances", post(get_balances))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { service })
}

/// Run the HTTP API server
pub async fn run_server(
    config: ServerConfig,
    service: Arc<RgbppResolutionService>,
) -> ResolveResult<()> {
    let app = router(service);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ResolveError::Config(format!("cannot bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| ResolveError::Internal(e.to_string()))
}

/// Error body with a status derived from the error kind
struct ApiError(ResolveError);

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ResolveError::InvalidArgument(_) | ResolveError::IndexOutOfRange { .. } => {
                StatusCode::BAD_REQUEST
            }
            ResolveError::NotFound { .. } => StatusCode::NOT_FOUND,
            ResolveError::UpstreamUnavailable { .. } | ResolveError::UpstreamProtocol { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ResolveError::Config(_) | ResolveError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.kind(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// Handlers

#[derive(Deserialize)]
struct PageQuery {
    page: Option<i64>,
    page_size: Option<i64>,
}

async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<TransactionListResponse> {
    let latest = state.service.list_latest(query.page, query.page_size).await?;
    Ok(Json(TransactionListResponse {
        items: latest.items.into_iter().map(TransactionResponse::from).collect(),
        total: latest.total,
    }))
}

#[derive(Deserialize)]
struct KindQuery {
    kind: Option<IdentifierKind>,
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<KindQuery>,
) -> ApiResult<TransactionResponse> {
    let identifier = match query.kind {
        Some(kind) => Identifier::with_kind(&id, kind)?,
        None => Identifier::parse(&id)?,
    };
    let view = state
        .service
        .resolve(identifier)
        .await?
        .ok_or_else(|| ResolveError::not_found("rgbpp transaction", id))?;
    Ok(Json(TransactionResponse::from(view)))
}

async fn get_address(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<AddressResponse> {
    let overview = state.service.btc_address_overview(&address).await?;
    Ok(Json(AddressResponse::from(overview)))
}

async fn get_fees(State(state): State<AppState>) -> ApiResult<FeeEstimate> {
    Ok(Json(state.service.btc_fees().await?))
}

async fn get_cell(
    State(state): State<AppState>,
    Path((tx_hash, index)): Path<(String, u32)>,
) -> ApiResult<CellResponse> {
    let cell = state
        .service
        .resolve_cell(OutPoint::new(tx_hash.to_lowercase(), index))
        .await?;
    Ok(Json(CellResponse::from(cell)))
}

#[derive(Deserialize)]
struct LiveCellsRequest {
    lock: Script,
    limit: Option<u32>,
    cursor: Option<String>,
}

async fn list_live_cells(
    State(state): State<AppState>,
    Json(request): Json<LiveCellsRequest>,
) -> ApiResult<LiveCellsResponse> {
    let page = state
        .service
        .live_cells(&request.lock, request.limit, request.cursor)
        .await?;
    Ok(Json(LiveCellsResponse {
        cells: page.cells.into_iter().map(CellResponse::from).collect(),
        cursor: page.cursor,
        errors: page.errors,
    }))
}

#[derive(Deserialize)]
struct BalancesRequest {
    lock: Script,
}

async fn get_balances(
    State(state): State<AppState>,
    Json(request): Json<BalancesRequest>,
) -> ApiResult<Vec<BalanceResponse>> {
    let balances = state.service.token_balances(&request.lock).await?;
    Ok(Json(balances.into_iter().map(BalanceResponse::from).collect()))
}

// Response types

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

#[derive(Serialize)]
struct TransactionListResponse {
    items: Vec<TransactionResponse>,
    total: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionResponse {
    #[serde(flatten)]
    binding: CrossChainBinding,
    block_time: Option<String>,
    state: ResolutionState,
    ckb_transaction: Option<CkbTransactionResponse>,
    btc_transaction: Option<BtcTransactionResponse>,
    errors: Vec<FieldError>,
}

impl From<ResolvedTransactionView> for TransactionResponse {
    fn from(view: ResolvedTransactionView) -> Self {
        Self {
            block_time: view.binding.block_timestamp.and_then(block_time),
            binding: view.binding,
            state: view.state,
            ckb_transaction: view.ckb_transaction.map(CkbTransactionResponse::from),
            btc_transaction: view.btc_transaction.map(BtcTransactionResponse::from),
            errors: view.errors,
        }
    }
}

/// RFC 3339 rendering of an explorer millisecond timestamp
fn block_time(millis: u64) -> Option<String> {
    let millis = i64::try_from(millis).ok()?;
    DateTime::<Utc>::from_timestamp_millis(millis).map(|t| t.to_rfc3339())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CkbTransactionResponse {
    hash: String,
    block_number: Option<u64>,
    block_hash: Option<String>,
    status: TxCommitStatus,
    is_cellbase: bool,
    inputs: Vec<CellResponse>,
    outputs: Vec<CellResponse>,
    fee: Option<String>,
}

impl From<CkbTransactionView> for CkbTransactionResponse {
    fn from(view: CkbTransactionView) -> Self {
        Self {
            hash: view.hash,
            block_number: view.block_number,
            block_hash: view.block_hash,
            status: view.status,
            is_cellbase: view.is_cellbase,
            inputs: view.inputs.into_iter().map(CellResponse::from).collect(),
            outputs: view.outputs.into_iter().map(CellResponse::from).collect(),
            fee: view.fee.map(format::shannons_to_ckb),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BtcTransactionResponse {
    #[serde(flatten)]
    transaction: BtcTransaction,
    fee_btc: String,
    output_total_btc: String,
}

impl From<BtcTransaction> for BtcTransactionResponse {
    fn from(transaction: BtcTransaction) -> Self {
        let output_total: u64 = transaction.vout.iter().map(|o| o.value).sum();
        Self {
            fee_btc: format::sats_to_btc(transaction.fee),
            output_total_btc: format::sats_to_btc(output_total),
            transaction,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct XudtResponse {
    symbol: String,
    amount: String,
    decimal: u8,
    type_hash: String,
}

impl From<XudtInfo> for XudtResponse {
    fn from(info: XudtInfo) -> Self {
        Self {
            amount: format::format_units(info.amount, info.decimal),
            symbol: info.symbol,
            decimal: info.decimal,
            type_hash: info.type_hash,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CellResponse {
    tx_hash: String,
    index: u32,
    capacity: String,
    lock: Script,
    #[serde(rename = "type")]
    type_: Option<Script>,
    xudt_info: Option<XudtResponse>,
    status: Option<CellStatus>,
}

impl From<Cell> for CellResponse {
    fn from(cell: Cell) -> Self {
        Self {
            tx_hash: cell.tx_hash,
            index: cell.index,
            capacity: format::shannons_to_ckb(cell.capacity),
            lock: cell.lock,
            type_: cell.type_,
            xudt_info: cell.xudt_info.map(XudtResponse::from),
            status: cell.status,
        }
    }
}

#[derive(Serialize)]
struct LiveCellsResponse {
    cells: Vec<CellResponse>,
    cursor: Option<String>,
    errors: Vec<FieldError>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    type_hash: String,
    symbol: String,
    decimal: u8,
    amount: String,
    cell_count: u64,
}

impl From<TokenBalance> for BalanceResponse {
    fn from(balance: TokenBalance) -> Self {
        Self {
            amount: format::format_units(balance.amount, balance.decimal),
            type_hash: balance.type_hash,
            symbol: balance.symbol,
            decimal: balance.decimal,
            cell_count: balance.cell_count,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddressResponse {
    address: String,
    confirmed_balance: String,
    unconfirmed_balance: String,
    tx_count: u64,
    utxos: Vec<Utxo>,
}

impl From<AddressOverview> for AddressResponse {
    fn from(overview: AddressOverview) -> Self {
        let address: ChainAddress = overview.address;
        Self {
            confirmed_balance: format::sats_to_btc(address.confirmed_balance()),
            unconfirmed_balance: format::signed_sats_to_btc(address.unconfirmed_balance()),
            tx_count: address.tx_count(),
            address: address.address,
            utxos: overview.utxos,
        }
    }
}

//! HTTP gateway for the colored oracle: chain notification intake, cosign
//! requests and read-only ledger queries.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use oracle_chain::{ChainBackend, HttpBackend, LocalSigner, Signer};
use oracle_core::{Amount, Color, LedgerAddress, OracleError};
use oracle_engine::{
    AccountLocks, CosignRequest, CosignValidator, LedgerState, MultisigDescriptor,
    MultisigRegistry, NotificationDispatcher, StateStore, SyncJob, Synchronizer,
};

struct Config {
    bind: SocketAddr,
    backend_url: String,
    data_dir: PathBuf,
    confirmations: u32,
    retry_attempts: u32,
    callback_base: String,
    queue_capacity: usize,
}

impl Config {
    fn from_env() -> Result<Self> {
        fn var_or(name: &str, default: &str) -> String {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        }
        Ok(Config {
            bind: var_or("ORACLE_BIND", "0.0.0.0:8080")
                .parse()
                .context("ORACLE_BIND is not a socket address")?,
            backend_url: var_or("ORACLE_BACKEND_URL", "http://localhost:3000"),
            data_dir: var_or("ORACLE_DATA_DIR", "oracle-data").into(),
            confirmations: var_or("ORACLE_CONFIRMATIONS", "1")
                .parse()
                .context("ORACLE_CONFIRMATIONS is not a number")?,
            retry_attempts: var_or("ORACLE_RETRY_ATTEMPTS", "10")
                .parse()
                .context("ORACLE_RETRY_ATTEMPTS is not a number")?,
            callback_base: var_or("ORACLE_CALLBACK_BASE", "http://localhost:8080"),
            queue_capacity: var_or("ORACLE_QUEUE_CAPACITY", "1024")
                .parse()
                .context("ORACLE_QUEUE_CAPACITY is not a number")?,
        })
    }
}

struct Gateway {
    backend: Arc<dyn ChainBackend>,
    store: Arc<StateStore>,
    registry: Arc<MultisigRegistry>,
    validator: CosignValidator,
    dispatcher: NotificationDispatcher,
    config: Config,
}

type SharedState = Arc<Gateway>;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = Config::from_env()?;
    let signing_key =
        std::env::var("ORACLE_SIGNING_KEY").context("ORACLE_SIGNING_KEY is not set")?;
    let signer: Arc<dyn Signer> = Arc::new(LocalSigner::from_hex(&signing_key)?);

    let backend: Arc<dyn ChainBackend> = Arc::new(HttpBackend::new(&config.backend_url));
    let store = Arc::new(StateStore::open(config.data_dir.join("states"))?);
    let registry = Arc::new(MultisigRegistry::open(config.data_dir.join("multisigs"))?);
    let synchronizer = Arc::new(Synchronizer::new(
        backend.clone(),
        store.clone(),
        registry.clone(),
        Arc::new(AccountLocks::new()),
        config.retry_attempts,
    ));

    let gateway = Arc::new(Gateway {
        backend,
        store,
        registry,
        validator: CosignValidator::new(synchronizer.clone(), signer),
        dispatcher: NotificationDispatcher::spawn(synchronizer, config.queue_capacity),
        config,
    });

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .allow_origin(Any);
    let app = Router::new()
        .route("/notify/:tx_hash", post(notify))
        .route("/addressnotify/:multisig", post(address_notify))
        .route("/sign", post(sign))
        .route("/multisigaddress", post(register_multisig))
        .route("/proposals/:multisig", get(proposal))
        .route("/balance/:multisig/:address", get(balance))
        .route("/storage/:multisig", get(storage))
        .route("/code/:multisig", get(code))
        .route("/dump/:multisig", get(dump))
        .layer(cors)
        .with_state(gateway.clone());

    let listener = TcpListener::bind(gateway.config.bind).await?;
    info!("oracle gateway listening on {}", gateway.config.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

/// `OracleError` carried out of a handler, rendered as a JSON body with the
/// matching status code.
struct ApiError(OracleError);

impl From<OracleError> for ApiError {
    fn from(e: OracleError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OracleError::MalformedTransaction(_) | OracleError::InsufficientFunds { .. } => {
                StatusCode::BAD_REQUEST
            }
            OracleError::TxNotFound
            | OracleError::TxUnconfirmed
            | OracleError::ContractNotFound(_)
            | OracleError::MultisigNotFound(_)
            | OracleError::AccountNotFound(_)
            | OracleError::StaleReference
            | OracleError::UnknownUtxo => StatusCode::NOT_FOUND,
            OracleError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            OracleError::Upstream(_) | OracleError::Io(_) | OracleError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("internal error: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

async fn notify(
    Path(tx_hash): Path<String>,
    State(gateway): State<SharedState>,
) -> Json<serde_json::Value> {
    let queued = gateway
        .dispatcher
        .notify(SyncJob { multisig_address: None, tx_hash });
    Json(json!({ "queued": queued, "queue_depth": gateway.dispatcher.queue_depth() }))
}

#[derive(Deserialize)]
struct AddressNotification {
    tx_hash: String,
}

async fn address_notify(
    Path(multisig): Path<String>,
    State(gateway): State<SharedState>,
    Json(body): Json<AddressNotification>,
) -> Json<serde_json::Value> {
    let queued = gateway.dispatcher.notify(SyncJob {
        multisig_address: Some(multisig),
        tx_hash: body.tx_hash,
    });
    Json(json!({ "queued": queued, "queue_depth": gateway.dispatcher.queue_depth() }))
}

async fn sign(
    State(gateway): State<SharedState>,
    Json(request): Json<CosignRequest>,
) -> ApiResult<serde_json::Value> {
    let signature = gateway.validator.validate_and_sign(&request).await?;
    Ok(Json(json!({ "signature": signature })))
}

#[derive(Deserialize)]
struct RegisterMultisig {
    multisig_address: String,
    public_keys: Vec<String>,
    required_signatures: u32,
    contract_address: Option<String>,
}

/// Registers a multisig account descriptor and subscribes this gateway to
/// address notifications for it at the chain backend.
async fn register_multisig(
    State(gateway): State<SharedState>,
    Json(body): Json<RegisterMultisig>,
) -> ApiResult<MultisigDescriptor> {
    let callback_url = format!(
        "{}/addressnotify/{}",
        gateway.config.callback_base, body.multisig_address
    );
    let subscription = gateway
        .backend
        .subscribe_address_notification(
            &body.multisig_address,
            &callback_url,
            gateway.config.confirmations,
        )
        .await?;

    let descriptor = MultisigDescriptor {
        multisig_address: body.multisig_address,
        public_keys: body.public_keys,
        required_signatures: body.required_signatures,
        contract_address: body.contract_address,
        subscription_id: Some(subscription.id),
    };
    gateway.registry.save(&descriptor)?;
    info!("registered multisig account {}", descriptor.multisig_address);
    Ok(Json(descriptor))
}

async fn proposal(
    Path(multisig): Path<String>,
    State(gateway): State<SharedState>,
) -> ApiResult<MultisigDescriptor> {
    Ok(Json(gateway.registry.require(&multisig)?))
}

/// Balances of one derived-ledger account; a yet-unseen account reads as
/// empty rather than missing.
async fn balance(
    Path((multisig, address)): Path<(String, String)>,
    State(gateway): State<SharedState>,
) -> ApiResult<BTreeMap<Color, Amount>> {
    let address = LedgerAddress::from_str(&address)?;
    let state = gateway.store.load(&multisig)?.unwrap_or_default();
    let balance = state
        .account(&address)
        .map(|account| account.balance.clone())
        .unwrap_or_default();
    Ok(Json(balance))
}

async fn storage(
    Path(multisig): Path<String>,
    State(gateway): State<SharedState>,
) -> ApiResult<BTreeMap<String, String>> {
    let (state, contract) = contract_account(&gateway, &multisig)?;
    let account = state
        .accounts
        .get(&contract)
        .ok_or(OracleError::ContractNotFound(contract))?;
    Ok(Json(account.storage.clone()))
}

async fn code(
    Path(multisig): Path<String>,
    State(gateway): State<SharedState>,
) -> ApiResult<serde_json::Value> {
    let (state, contract) = contract_account(&gateway, &multisig)?;
    let account = state
        .accounts
        .get(&contract)
        .ok_or(OracleError::ContractNotFound(contract.clone()))?;
    Ok(Json(json!({ "contract_address": contract, "code": account.code })))
}

async fn dump(
    Path(multisig): Path<String>,
    State(gateway): State<SharedState>,
) -> ApiResult<LedgerState> {
    let state = gateway
        .store
        .load(&multisig)?
        .ok_or(OracleError::ContractNotFound(multisig))?;
    Ok(Json(state))
}

/// Resolves the contract account a multisig fronts, from its descriptor.
fn contract_account(
    gateway: &Gateway,
    multisig: &str,
) -> std::result::Result<(LedgerState, String), ApiError> {
    let descriptor = gateway.registry.require(multisig)?;
    let contract = descriptor
        .contract_address
        .ok_or_else(|| OracleError::ContractNotFound(multisig.to_string()))?;
    let state = gateway
        .store
        .load(multisig)?
        .ok_or_else(|| OracleError::ContractNotFound(multisig.to_string()))?;
    Ok((state, contract))
}

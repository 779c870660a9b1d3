//! Tendermint/CometBFT node transport.
//!
//! # Responsibilities
//! - JSON-RPC over HTTP for broadcast and transaction lookup
//! - REST gateway for account state (sequence, balances)
//! - WebSocket event stream with query multiplexing
//! - Per-call timeouts and failover across configured RPC endpoints

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;
use uuid::Uuid;

use crate::config::NodeConfig;
use crate::ledger::error::TransportError;
use crate::ledger::transport::{BroadcastResponse, EventConnection, QueryEvent, Transport};
use crate::ledger::types::{
    AccountId, AccountInfo, BlockEvent, BlockMeta, BroadcastMode, Coin, Coins, EventAttribute,
    EventQuery, TxHash, TxResult,
};

const NEW_BLOCK_EVENT: &str = "tendermint/event/NewBlock";

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcErrorObject {
    fn describe(&self) -> String {
        match &self.data {
            Some(Value::String(data)) => format!("{} ({}): {}", self.message, self.code, data),
            Some(other) => format!("{} ({}): {}", self.message, self.code, other),
            None => format!("{} ({})", self.message, self.code),
        }
    }

    fn is_not_found(&self) -> bool {
        self.describe().contains("not found")
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// Node transport speaking the Tendermint RPC dialect.
#[derive(Clone)]
pub struct TendermintRpc {
    http: reqwest::Client,
    /// Primary endpoint first, then failovers.
    rpc_urls: Vec<Url>,
    ws_url: Url,
    rest_url: Url,
    timeout_duration: Duration,
}

/// `tcp://` is what node configs usually carry; HTTP clients need `http://`.
fn parse_endpoint(raw: &str) -> Result<Url, TransportError> {
    let normalized = match raw.strip_prefix("tcp://") {
        Some(rest) => format!("http://{}", rest),
        None => raw.to_string(),
    };
    Url::parse(&normalized).map_err(|e| TransportError::Rpc(format!("Invalid URL '{}': {}", raw, e)))
}

impl TendermintRpc {
    /// Create a transport from node configuration. Does not touch the network.
    pub fn new(config: &NodeConfig) -> Result<Self, TransportError> {
        let timeout_duration = Duration::from_secs(config.request_timeout_secs);

        let mut rpc_urls = vec![parse_endpoint(&config.rpc_url)?];
        for raw in &config.failover_urls {
            match parse_endpoint(raw) {
                Ok(url) => rpc_urls.push(url),
                Err(_) => tracing::warn!(url = %raw, "Ignoring invalid failover RPC URL"),
            }
        }

        let http = reqwest::Client::builder()
            .timeout(timeout_duration)
            .build()
            .map_err(|e| TransportError::Rpc(format!("Failed to build HTTP client: {}", e)))?;

        tracing::info!(
            rpc_url = %rpc_urls[0],
            failovers = rpc_urls.len() - 1,
            chain_id = %config.chain_id,
            "Ledger transport initialized"
        );

        Ok(Self {
            http,
            rpc_urls,
            ws_url: parse_endpoint(&config.ws_url)?,
            rest_url: parse_endpoint(&config.rest_url)?,
            timeout_duration,
        })
    }

    /// Issue a JSON-RPC call, walking the endpoint list until one answers.
    ///
    /// The inner `Err` is a JSON-RPC error object returned by a reachable node.
    async fn call(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Result<Value, RpcErrorObject>, TransportError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        });

        let mut all_timed_out = true;
        for (i, url) in self.rpc_urls.iter().enumerate() {
            let fut = async {
                self.http
                    .post(url.clone())
                    .json(&request)
                    .send()
                    .await?
                    .json::<RpcResponse>()
                    .await
            };
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(response)) => {
                    return match (response.result, response.error) {
                        (_, Some(error)) => Ok(Err(error)),
                        (Some(result), None) => Ok(Ok(result)),
                        (None, None) => Err(TransportError::Decode(format!(
                            "{} returned neither result nor error",
                            method
                        ))),
                    };
                }
                Ok(Err(e)) => {
                    all_timed_out = false;
                    tracing::warn!(provider_idx = i, method, error = %e, "RPC error, trying next endpoint");
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, method, "RPC timeout, trying next endpoint");
                }
            }
        }

        if all_timed_out {
            Err(TransportError::Timeout(self.timeout_duration.as_secs()))
        } else {
            Err(TransportError::Rpc(format!("All RPC endpoints failed for {}", method)))
        }
    }

    async fn rest_get(&self, path: &str) -> Result<Option<Value>, TransportError> {
        let url = self
            .rest_url
            .join(path)
            .map_err(|e| TransportError::Rpc(format!("Invalid REST path '{}': {}", path, e)))?;

        let fut = async {
            let response = self.http.get(url).send().await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            response.error_for_status()?.json::<Value>().await.map(Some)
        };
        match timeout(self.timeout_duration, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TransportError::Rpc(format!("REST request {} failed: {}", path, e))),
            Err(_) => Err(TransportError::Timeout(self.timeout_duration.as_secs())),
        }
    }
}

impl std::fmt::Debug for TendermintRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TendermintRpc")
            .field("rpc_urls", &self.rpc_urls)
            .field("ws_url", &self.ws_url)
            .field("rest_url", &self.rest_url)
            .field("timeout_secs", &self.timeout_duration.as_secs())
            .finish()
    }
}

/// Numbers arrive either as JSON numbers or as decimal strings.
fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn parse_hash(value: &Value) -> Result<TxHash, TransportError> {
    let raw = value
        .get("hash")
        .and_then(Value::as_str)
        .ok_or_else(|| TransportError::Decode("missing transaction hash".to_string()))?;
    TxHash::from_hex(raw).map_err(|e| TransportError::Decode(e.to_string()))
}

/// ABCI result code; absent means success. A code outside `u32` is malformed.
fn code_field(value: &Value) -> Result<u32, TransportError> {
    let Some(raw) = value.get("code").and_then(as_u64) else {
        return Ok(0);
    };
    u32::try_from(raw).map_err(|_| TransportError::Decode(format!("result code {} out of range", raw)))
}

/// Build a `TxResult` from an ABCI result object plus its hash and height.
fn abci_result(hash: TxHash, height: u64, abci: &Value) -> Result<TxResult, TransportError> {
    let code = code_field(abci)?;
    Ok(
        TxResult::from_code(hash, height, code, &str_field(abci, "codespace"), str_field(abci, "log")).with_gas(
            abci.get("gas_wanted").and_then(as_u64).unwrap_or(0),
            abci.get("gas_used").and_then(as_u64).unwrap_or(0),
        ),
    )
}

fn parse_broadcast(mode: BroadcastMode, result: &Value) -> Result<BroadcastResponse, TransportError> {
    let hash = parse_hash(result)?;
    match mode {
        BroadcastMode::Async | BroadcastMode::Sync => Ok(BroadcastResponse {
            hash,
            code: code_field(result)?,
            codespace: str_field(result, "codespace"),
            log: str_field(result, "log"),
            included: None,
        }),
        BroadcastMode::Block => {
            let check = result.get("check_tx").cloned().unwrap_or(Value::Null);
            let code = code_field(&check)?;
            let height = result.get("height").and_then(as_u64).unwrap_or(0);
            // CometBFT 0.38 renamed deliver_tx to tx_result.
            let deliver = result.get("tx_result").or_else(|| result.get("deliver_tx"));
            let included = match deliver {
                Some(deliver) if code == 0 && height > 0 => Some(abci_result(hash.clone(), height, deliver)?),
                _ => None,
            };
            Ok(BroadcastResponse {
                hash,
                code,
                codespace: str_field(&check, "codespace"),
                log: str_field(&check, "log"),
                included,
            })
        }
    }
}

fn parse_tx(result: &Value) -> Result<TxResult, TransportError> {
    let hash = parse_hash(result)?;
    let height = result
        .get("height")
        .and_then(as_u64)
        .ok_or_else(|| TransportError::Decode("missing height in tx result".to_string()))?;
    let abci = result
        .get("tx_result")
        .ok_or_else(|| TransportError::Decode("missing tx_result".to_string()))?;
    abci_result(hash, height, abci)
}

fn parse_account(address: &AccountId, account: &Value, balances: &Value) -> Result<AccountInfo, TransportError> {
    let account = account
        .get("account")
        .ok_or_else(|| TransportError::Decode("missing account".to_string()))?;
    // Ethermint-style accounts nest the base account.
    let base = account.get("base_account").unwrap_or(account);
    let coins: Vec<Coin> = serde_json::from_value(balances.get("balances").cloned().unwrap_or(Value::Array(vec![])))
        .map_err(|e| TransportError::Decode(format!("invalid balances: {}", e)))?;

    Ok(AccountInfo {
        address: address.clone(),
        account_number: base.get("account_number").and_then(as_u64).unwrap_or(0),
        sequence: base.get("sequence").and_then(as_u64).unwrap_or(0),
        balances: Coins::new(coins),
    })
}

/// Decode the `data.value` of a NewBlock event.
fn parse_block_event(value: &Value, events: Option<&Value>) -> Option<BlockEvent> {
    let block = value.get("block")?;
    let header = block.get("header")?;
    let height = header.get("height").and_then(as_u64)?;

    let meta = BlockMeta {
        chain_id: str_field(header, "chain_id"),
        time: header.get("time").and_then(Value::as_str).map(str::to_string),
        block_hash: value
            .get("block_id")
            .and_then(|id| id.get("hash"))
            .and_then(Value::as_str)
            .map(str::to_string),
        proposer: header.get("proposer_address").and_then(Value::as_str).map(str::to_string),
        num_txs: block
            .get("data")
            .and_then(|d| d.get("txs"))
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0),
    };

    let mut attributes = Vec::new();
    if let Some(Value::Object(map)) = events {
        for (key, values) in map {
            if let Some(values) = values.as_array() {
                for v in values.iter().filter_map(Value::as_str) {
                    attributes.push(EventAttribute {
                        key: key.clone(),
                        value: v.to_string(),
                    });
                }
            }
        }
    }

    Some(BlockEvent {
        height,
        meta,
        attributes,
    })
}

/// Extract an event notification from a WebSocket frame, if it is one.
fn parse_event_frame(frame: &Value) -> Option<QueryEvent> {
    let result = frame.get("result")?;
    let query = result.get("query").and_then(Value::as_str)?;
    let data = result.get("data")?;

    let kind = data.get("type").and_then(Value::as_str).unwrap_or_default();
    if kind != NEW_BLOCK_EVENT {
        tracing::debug!(event_type = kind, query, "Skipping non-block event");
        return None;
    }

    match parse_block_event(data.get("value")?, result.get("events")) {
        Some(block) => Some(QueryEvent {
            query: EventQuery::new(query),
            block,
        }),
        None => {
            tracing::warn!(query, "Malformed NewBlock event");
            None
        }
    }
}

#[async_trait]
impl Transport for TendermintRpc {
    async fn broadcast_tx(
        &self,
        tx_bytes: &[u8],
        mode: BroadcastMode,
    ) -> Result<BroadcastResponse, TransportError> {
        let method = match mode {
            BroadcastMode::Async => "broadcast_tx_async",
            BroadcastMode::Sync => "broadcast_tx_sync",
            BroadcastMode::Block => "broadcast_tx_commit",
        };
        match self.call(method, json!({ "tx": BASE64.encode(tx_bytes) })).await? {
            Ok(result) => parse_broadcast(mode, &result),
            Err(error) => Err(TransportError::Rpc(error.describe())),
        }
    }

    async fn query_tx(&self, hash: &TxHash) -> Result<Option<TxResult>, TransportError> {
        let params = json!({ "hash": BASE64.encode(hash.to_bytes()), "prove": false });
        match self.call("tx", params).await? {
            Ok(result) => parse_tx(&result).map(Some),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(TransportError::Rpc(error.describe())),
        }
    }

    async fn query_account(&self, address: &AccountId) -> Result<AccountInfo, TransportError> {
        let account = self
            .rest_get(&format!("cosmos/auth/v1beta1/accounts/{}", address))
            .await?
            .ok_or_else(|| TransportError::AccountNotFound(address.to_string()))?;
        let balances = self
            .rest_get(&format!("cosmos/bank/v1beta1/balances/{}", address))
            .await?
            .unwrap_or(Value::Null);
        parse_account(address, &account, &balances)
    }

    async fn connect_events(&self) -> Result<Box<dyn EventConnection>, TransportError> {
        let (stream, _) = timeout(self.timeout_duration, connect_async(self.ws_url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout_duration.as_secs()))?
            .map_err(|e| TransportError::ConnectionClosed(format!("connect {}: {}", self.ws_url, e)))?;

        tracing::info!(ws_url = %self.ws_url, "Event connection established");
        Ok(Box::new(WsEventConnection {
            stream,
            buffered: VecDeque::new(),
            request_timeout: self.timeout_duration,
        }))
    }
}

/// One WebSocket connection carrying every subscribed query.
pub struct WsEventConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Events that arrived while waiting for a request acknowledgement.
    buffered: VecDeque<QueryEvent>,
    request_timeout: Duration,
}

fn closed(e: impl std::fmt::Display) -> TransportError {
    TransportError::ConnectionClosed(e.to_string())
}

impl WsEventConnection {
    /// Next JSON frame; `None` once the peer closed.
    async fn read_frame(&mut self) -> Result<Option<Value>, TransportError> {
        loop {
            match self.stream.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Err(e)) => return Err(closed(e)),
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str())
                        .map(Some)
                        .map_err(|e| TransportError::Decode(e.to_string()));
                }
                Some(Ok(Message::Ping(payload))) => {
                    self.stream.send(Message::Pong(payload)).await.map_err(closed)?;
                }
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn request(&mut self, method: &str, query: &EventQuery) -> Result<(), TransportError> {
        let id = Uuid::new_v4().to_string();
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": { "query": query.as_str() },
        });
        self.stream
            .send(Message::Text(request.to_string().into()))
            .await
            .map_err(closed)?;

        let limit = self.request_timeout;
        timeout(limit, self.await_ack(&id))
            .await
            .map_err(|_| TransportError::Timeout(limit.as_secs()))?
    }

    /// Read frames until the reply to `id` arrives, buffering any events seen meanwhile.
    async fn await_ack(&mut self, id: &str) -> Result<(), TransportError> {
        loop {
            let frame = self
                .read_frame()
                .await?
                .ok_or_else(|| closed("connection closed awaiting acknowledgement"))?;
            if frame.get("id").and_then(Value::as_str) == Some(id) {
                if let Some(error) = frame.get("error") {
                    let error: RpcErrorObject = serde_json::from_value(error.clone())
                        .map_err(|e| TransportError::Decode(e.to_string()))?;
                    return Err(TransportError::Rpc(error.describe()));
                }
                return Ok(());
            }
            if let Some(event) = parse_event_frame(&frame) {
                self.buffered.push_back(event);
            }
        }
    }
}

#[async_trait]
impl EventConnection for WsEventConnection {
    async fn subscribe(&mut self, query: &EventQuery) -> Result<(), TransportError> {
        self.request("subscribe", query).await
    }

    async fn unsubscribe(&mut self, query: &EventQuery) -> Result<(), TransportError> {
        self.request("unsubscribe", query).await
    }

    async fn next_event(&mut self) -> Result<Option<QueryEvent>, TransportError> {
        if let Some(event) = self.buffered.pop_front() {
            return Ok(Some(event));
        }
        loop {
            match self.read_frame().await {
                Ok(None) => return Ok(None),
                Ok(Some(frame)) => {
                    if let Some(event) = parse_event_frame(&frame) {
                        return Ok(Some(event));
                    }
                }
                // One garbled frame does not end the stream.
                Err(TransportError::Decode(e)) => {
                    tracing::warn!(error = %e, "Skipping undecodable event frame");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

//! Shared utilities for integration testing.
//!
//! `MockLedger` is an in-memory node: it checks sequences, charges fees
//! (through fee allowances when a fee payer is set), applies allowance
//! messages and exposes results to `query_tx` after a configurable number
//! of misses. `EventHub` scripts the event stream.

#![allow(dead_code)]

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use ledger_client::config::ClientConfig;
use ledger_client::ledger::{
    AccountId, AccountInfo, BlockEvent, BlockMeta, BroadcastMode, BroadcastResponse, Coins,
    Credential, EventConnection, EventQuery, MessagePayload, QueryEvent, SignError,
    SignedTransaction, Signer, SigningContext, TransactionIntent, Transport, TransportError,
    TxHash, TxResult,
};
use ledger_client::transaction::allowance::{
    FEEGRANT_CODESPACE, FEE_LIMIT_EXCEEDED, FEE_LIMIT_EXPIRED, MSG_GRANT_ALLOWANCE,
    MSG_REVOKE_ALLOWANCE, NO_ALLOWANCE,
};

pub const CHAIN_ID: &str = "spartan";
pub const PASSPHRASE: &str = "12345678";

/// Configuration with short delays so retries finish quickly.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.node.chain_id = CHAIN_ID.to_string();
    config.confirmation.max_attempts = 5;
    config.confirmation.delay_ms = 10;
    config.subscription.channel_capacity = 16;
    config.subscription.reconnect_attempts = 3;
    config.subscription.reconnect_base_delay_ms = 10;
    config.subscription.reconnect_max_delay_ms = 40;
    config
}

pub fn credential(key_name: &str) -> Credential {
    Credential::new(key_name, PASSPHRASE)
}

/// Token-module style message; the ledger double treats it as a no-op.
pub fn mint_message(id: &str) -> MessagePayload {
    MessagePayload::new(
        "/irismod.nft.MsgMintNFT",
        json!({ "denom_id": "testdenom", "id": id }),
    )
}

/// Signer that encodes the intent as JSON and checks a shared passphrase.
pub struct TestSigner {
    passphrase: String,
}

impl TestSigner {
    pub fn new() -> Self {
        Self {
            passphrase: PASSPHRASE.to_string(),
        }
    }
}

impl Signer for TestSigner {
    fn sign(
        &self,
        intent: &TransactionIntent,
        credential: &Credential,
        context: &SigningContext,
    ) -> Result<SignedTransaction, SignError> {
        if credential.passphrase() != self.passphrase {
            return Err(SignError(format!(
                "wrong passphrase for key {}",
                credential.key_name()
            )));
        }
        let envelope = json!({
            "intent": intent,
            "chain_id": context.chain_id,
            "account_number": context.account_number,
            "sequence": context.sequence,
        });
        let tx_bytes = serde_json::to_vec(&envelope).map_err(|e| SignError(e.to_string()))?;
        let signature = format!("{}:{}", credential.key_name(), context.sequence).into_bytes();
        Ok(SignedTransaction::new(
            intent.clone(),
            context.sequence,
            signature,
            tx_bytes,
        ))
    }
}

#[derive(Deserialize)]
struct Envelope {
    intent: TransactionIntent,
    chain_id: String,
    sequence: u64,
}

struct Account {
    number: u64,
    sequence: u64,
    balances: Coins,
}

struct Grant {
    limit: Coins,
    expiration: Option<u64>,
}

struct StoredTx {
    result: TxResult,
    hidden_for: u32,
}

#[derive(Default)]
struct LedgerState {
    height: u64,
    accounts: HashMap<AccountId, Account>,
    allowances: HashMap<(AccountId, AccountId), Grant>,
    txs: HashMap<TxHash, StoredTx>,
    tx_counter: u64,
    lag: u32,
    query_failures: u32,
    broadcast_failures: VecDeque<TransportError>,
    broadcasts: u32,
    tx_queries: u32,
    account_queries: u32,
}

type Outcome = (u32, &'static str, String);

fn ok() -> Outcome {
    (0, "", String::new())
}

impl LedgerState {
    fn ensure_account(&mut self, address: &AccountId) -> &mut Account {
        let next_number = self.accounts.len() as u64 + 1;
        self.accounts.entry(address.clone()).or_insert(Account {
            number: next_number,
            sequence: 0,
            balances: Coins::default(),
        })
    }

    /// Charge the fee, then run the messages.
    fn execute(&mut self, intent: &TransactionIntent, now: u64) -> Outcome {
        let fee = intent.fee().cloned().unwrap_or_default();
        let sender = intent.sender().clone();
        let payer = intent.fee_payer().cloned().unwrap_or_else(|| sender.clone());

        let grant_key = (payer.clone(), sender.clone());
        let remaining_limit = if payer != sender {
            match self.allowances.get(&grant_key) {
                None => {
                    return (NO_ALLOWANCE, FEEGRANT_CODESPACE, "fee-grant not found".into());
                }
                Some(grant) if grant.expiration.is_some_and(|e| e <= now) => {
                    self.allowances.remove(&grant_key);
                    return (FEE_LIMIT_EXPIRED, FEEGRANT_CODESPACE, "fee allowance expired".into());
                }
                Some(grant) => match grant.limit.checked_sub(&fee) {
                    Some(rest) => Some(rest),
                    None => {
                        return (FEE_LIMIT_EXCEEDED, FEEGRANT_CODESPACE, "fee limit exceeded".into());
                    }
                },
            }
        } else {
            None
        };

        let Some(account) = self.accounts.get_mut(&payer) else {
            return (9, "sdk", format!("unknown address {}", payer));
        };
        match account.balances.checked_sub(&fee) {
            Some(rest) => account.balances = rest,
            None => return (5, "sdk", format!("insufficient funds to pay {}", fee)),
        }
        if let Some(rest) = remaining_limit {
            if let Some(grant) = self.allowances.get_mut(&grant_key) {
                grant.limit = rest;
            }
        }

        for message in intent.messages() {
            let outcome = self.apply(&sender, message);
            if outcome.0 != 0 {
                return outcome;
            }
        }
        ok()
    }

    fn apply(&mut self, sender: &AccountId, message: &MessagePayload) -> Outcome {
        let field = |key: &str| {
            AccountId::new(message.value[key].as_str().unwrap_or_default().to_string())
        };
        match message.type_url.as_str() {
            MSG_GRANT_ALLOWANCE => {
                let (granter, grantee) = (field("granter"), field("grantee"));
                if &granter != sender {
                    return (4, "sdk", "granter must sign".into());
                }
                let allowance = &message.value["allowance"];
                let limit: Coins = match serde_json::from_value(allowance["spend_limit"].clone()) {
                    Ok(limit) => limit,
                    Err(e) => return (3, "sdk", e.to_string()),
                };
                self.ensure_account(&grantee);
                self.allowances.insert(
                    (granter, grantee),
                    Grant {
                        limit,
                        expiration: allowance["expiration"].as_u64(),
                    },
                );
                ok()
            }
            MSG_REVOKE_ALLOWANCE => {
                let (granter, grantee) = (field("granter"), field("grantee"));
                if &granter != sender {
                    return (4, "sdk", "granter must sign".into());
                }
                match self.allowances.remove(&(granter, grantee)) {
                    Some(_) => ok(),
                    None => (NO_ALLOWANCE, FEEGRANT_CODESPACE, "fee-grant not found".into()),
                }
            }
            _ => ok(),
        }
    }
}

/// In-memory ledger node.
pub struct MockLedger {
    state: Mutex<LedgerState>,
    pub events: EventHub,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            events: EventHub::default(),
        }
    }

    pub fn fund(&self, address: &AccountId, coins: Coins) {
        let mut state = self.state.lock().unwrap();
        let account = state.ensure_account(address);
        account.balances = account.balances.checked_add(&coins).unwrap();
    }

    pub fn balance(&self, address: &AccountId, denom: &str) -> u128 {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(address)
            .map(|a| a.balances.amount_of(denom))
            .unwrap_or(0)
    }

    pub fn sequence_of(&self, address: &AccountId) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state.accounts.get(address).map(|a| a.sequence)
    }

    /// Simulate another client spending from the same account.
    pub fn set_sequence(&self, address: &AccountId, sequence: u64) {
        let mut state = self.state.lock().unwrap();
        state.ensure_account(address).sequence = sequence;
    }

    pub fn allowance(&self, granter: &AccountId, grantee: &AccountId) -> Option<Coins> {
        let state = self.state.lock().unwrap();
        state
            .allowances
            .get(&(granter.clone(), grantee.clone()))
            .map(|g| g.limit.clone())
    }

    /// Number of `query_tx` misses before a new transaction becomes visible.
    pub fn set_confirmation_lag(&self, misses: u32) {
        self.state.lock().unwrap().lag = misses;
    }

    pub fn fail_next_queries(&self, count: u32) {
        self.state.lock().unwrap().query_failures = count;
    }

    pub fn fail_next_broadcast(&self, error: TransportError) {
        self.state.lock().unwrap().broadcast_failures.push_back(error);
    }

    pub fn broadcast_count(&self) -> u32 {
        self.state.lock().unwrap().broadcasts
    }

    pub fn tx_queries(&self) -> u32 {
        self.state.lock().unwrap().tx_queries
    }

    pub fn account_queries(&self) -> u32 {
        self.state.lock().unwrap().account_queries
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl Transport for MockLedger {
    async fn broadcast_tx(
        &self,
        tx_bytes: &[u8],
        mode: BroadcastMode,
    ) -> Result<BroadcastResponse, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.broadcasts += 1;
        if let Some(error) = state.broadcast_failures.pop_front() {
            return Err(error);
        }

        let envelope: Envelope =
            serde_json::from_slice(tx_bytes).map_err(|e| TransportError::Decode(e.to_string()))?;
        state.tx_counter += 1;
        let hash = TxHash::from_bytes(&state.tx_counter.to_be_bytes());
        let rejected = |code: u32, log: String| BroadcastResponse {
            hash: hash.clone(),
            code,
            codespace: "sdk".to_string(),
            log,
            included: None,
        };

        if envelope.chain_id != CHAIN_ID {
            return Ok(rejected(4, format!("wrong chain-id {}", envelope.chain_id)));
        }
        let sender = envelope.intent.sender().clone();
        let Some(account) = state.accounts.get_mut(&sender) else {
            return Ok(rejected(9, format!("unknown address {}", sender)));
        };
        if account.sequence != envelope.sequence {
            let log = format!(
                "account sequence mismatch, expected {}, got {}",
                account.sequence, envelope.sequence
            );
            return Ok(rejected(32, log));
        }
        account.sequence += 1;

        state.height += 1;
        let height = state.height;
        let (code, codespace, log) = state.execute(&envelope.intent, now_secs());
        let gas = envelope.intent.gas_limit();
        let result = TxResult::from_code(hash.clone(), height, code, codespace, log)
            .with_gas(gas, gas / 2);

        let hidden_for = if mode == BroadcastMode::Block { 0 } else { state.lag };
        state.txs.insert(
            hash.clone(),
            StoredTx {
                result: result.clone(),
                hidden_for,
            },
        );

        Ok(BroadcastResponse {
            hash,
            code: 0,
            codespace: String::new(),
            log: String::new(),
            included: (mode == BroadcastMode::Block).then_some(result),
        })
    }

    async fn query_tx(&self, hash: &TxHash) -> Result<Option<TxResult>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.tx_queries += 1;
        if state.query_failures > 0 {
            state.query_failures -= 1;
            return Err(TransportError::Timeout(10));
        }
        match state.txs.get_mut(hash) {
            None => Ok(None),
            Some(stored) if stored.hidden_for > 0 => {
                stored.hidden_for -= 1;
                Ok(None)
            }
            Some(stored) => Ok(Some(stored.result.clone())),
        }
    }

    async fn query_account(&self, address: &AccountId) -> Result<AccountInfo, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.account_queries += 1;
        state
            .accounts
            .get(address)
            .map(|a| AccountInfo {
                address: address.clone(),
                account_number: a.number,
                sequence: a.sequence,
                balances: a.balances.clone(),
            })
            .ok_or_else(|| TransportError::AccountNotFound(address.to_string()))
    }

    async fn connect_events(&self) -> Result<Box<dyn EventConnection>, TransportError> {
        self.events.open()
    }
}

pub fn block(height: u64) -> BlockEvent {
    BlockEvent {
        height,
        meta: BlockMeta {
            chain_id: CHAIN_ID.to_string(),
            time: None,
            block_hash: Some(format!("{:064X}", height)),
            proposer: None,
            num_txs: 0,
        },
        attributes: Vec::new(),
    }
}

struct HubConnection {
    id: u64,
    tx: mpsc::UnboundedSender<QueryEvent>,
    queries: HashSet<EventQuery>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    connections: Vec<HubConnection>,
    refuse: bool,
    connects: u32,
    subscribe_calls: Vec<EventQuery>,
    unsubscribe_calls: Vec<EventQuery>,
}

/// Scriptable event source shared by every connection the ledger hands out.
#[derive(Clone, Default)]
pub struct EventHub {
    state: Arc<Mutex<HubState>>,
}

impl EventHub {
    fn open(&self) -> Result<Box<dyn EventConnection>, TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.refuse {
            return Err(TransportError::ConnectionClosed("connection refused".into()));
        }
        state.next_id += 1;
        state.connects += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_id;
        state.connections.push(HubConnection {
            id,
            tx,
            queries: HashSet::new(),
        });
        Ok(Box::new(MockConnection {
            id,
            hub: self.clone(),
            rx,
        }))
    }

    /// Deliver a block to every live connection subscribed to `query`.
    pub fn publish(&self, query: &EventQuery, height: u64) {
        let state = self.state.lock().unwrap();
        for conn in state.connections.iter().filter(|c| c.queries.contains(query)) {
            let _ = conn.tx.send(QueryEvent {
                query: query.clone(),
                block: block(height),
            });
        }
    }

    /// Close every live connection; readers see a clean close.
    pub fn drop_connections(&self) {
        self.state.lock().unwrap().connections.clear();
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.state.lock().unwrap().refuse = refuse;
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    pub fn subscribe_calls(&self, query: &EventQuery) -> usize {
        let state = self.state.lock().unwrap();
        state.subscribe_calls.iter().filter(|q| *q == query).count()
    }

    pub fn unsubscribe_calls(&self, query: &EventQuery) -> usize {
        let state = self.state.lock().unwrap();
        state.unsubscribe_calls.iter().filter(|q| *q == query).count()
    }

    /// Whether some live connection currently carries `query`.
    pub fn is_subscribed(&self, query: &EventQuery) -> bool {
        let state = self.state.lock().unwrap();
        state.connections.iter().any(|c| c.queries.contains(query))
    }
}

struct MockConnection {
    id: u64,
    hub: EventHub,
    rx: mpsc::UnboundedReceiver<QueryEvent>,
}

impl MockConnection {
    fn with_live<T>(&self, f: impl FnOnce(&mut HubConnection) -> T) -> Result<T, TransportError> {
        let mut state = self.hub.state.lock().unwrap();
        state
            .connections
            .iter_mut()
            .find(|c| c.id == self.id)
            .map(f)
            .ok_or_else(|| TransportError::ConnectionClosed("connection dropped".into()))
    }
}

#[async_trait]
impl EventConnection for MockConnection {
    async fn subscribe(&mut self, query: &EventQuery) -> Result<(), TransportError> {
        self.with_live(|c| {
            c.queries.insert(query.clone());
        })?;
        self.hub.state.lock().unwrap().subscribe_calls.push(query.clone());
        Ok(())
    }

    async fn unsubscribe(&mut self, query: &EventQuery) -> Result<(), TransportError> {
        self.with_live(|c| {
            c.queries.remove(query);
        })?;
        self.hub.state.lock().unwrap().unsubscribe_calls.push(query.clone());
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<QueryEvent>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// Poll `condition` until it holds or `limit` elapses.
pub async fn wait_until<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Await `future` with a generous timeout so a hang fails the test instead of stalling it.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("operation timed out")
}

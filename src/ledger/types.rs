//! Ledger-facing value types.
//!
//! Everything here is immutable once built: intents are assembled through
//! [`IntentBuilder`], signed transactions are produced once by a signer, and
//! results are snapshots of what the ledger reported.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Result code the ledger uses for a successful transaction.
pub const CODE_OK: u32 = 0;

/// Errors produced while parsing ledger values from strings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Hash was empty or not hex.
    #[error("Invalid transaction hash '{0}'")]
    InvalidHash(String),

    /// Coin string did not match `<amount><denom>`.
    #[error("Invalid coin '{0}'")]
    InvalidCoin(String),

    /// Broadcast mode was not one of async, sync, block.
    #[error("Invalid broadcast mode '{0}'")]
    InvalidMode(String),
}

/// Account address as understood by the ledger (bech32 text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Transaction hash in canonical upper-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash(String);

/// The hash returned by a successful broadcast. It is the only identifier
/// used for a transaction after submission.
pub type TxHandle = TxHash;

impl TxHash {
    /// Parse a hex hash, with or without `0x` prefix, in any case.
    pub fn from_hex(hex_str: &str) -> Result<Self, ParseError> {
        let trimmed = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        if trimmed.is_empty() || hex::decode(trimmed).is_err() {
            return Err(ParseError::InvalidHash(hex_str.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw hash bytes. The constructor guarantees valid hex.
    pub fn to_bytes(&self) -> Vec<u8> {
        hex::decode(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TxHash {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for TxHash {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<TxHash> for String {
    fn from(hash: TxHash) -> Self {
        hash.0
    }
}

/// How eagerly the node answers a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastMode {
    /// Fire-and-forget; no mempool feedback.
    Async,
    /// Answer once the mempool accepted the transaction.
    #[default]
    Sync,
    /// Answer once the transaction was included in a block.
    Block,
}

impl fmt::Display for BroadcastMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastMode::Async => write!(f, "async"),
            BroadcastMode::Sync => write!(f, "sync"),
            BroadcastMode::Block => write!(f, "block"),
        }
    }
}

impl FromStr for BroadcastMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "async" => Ok(BroadcastMode::Async),
            "sync" => Ok(BroadcastMode::Sync),
            "block" | "commit" => Ok(BroadcastMode::Block),
            _ => Err(ParseError::InvalidMode(s.to_string())),
        }
    }
}

/// Amounts travel as decimal strings on the wire.
mod amount_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// A single-denomination amount.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    #[serde(with = "amount_string")]
    pub amount: u128,
}

impl Coin {
    pub fn new(amount: u128, denom: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

impl FromStr for Coin {
    type Err = ParseError;

    /// Parses `200000ugas` style strings. A decimal amount is accepted only
    /// when it is integral (`200000.000ugas`); amounts are whole base units.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ParseError::InvalidCoin(s.to_string());
        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(invalid)?;
        let (amount, denom) = s.split_at(split);
        let whole = match amount.split_once('.') {
            None => amount,
            Some((whole, fraction))
                if !fraction.is_empty() && fraction.chars().all(|c| c == '0') =>
            {
                whole
            }
            Some(_) => return Err(invalid()),
        };
        let amount: u128 = whole.parse().map_err(|_| invalid())?;
        let valid_denom = denom.len() >= 2
            && denom.starts_with(|c: char| c.is_ascii_alphabetic())
            && denom
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "/:._-".contains(c));
        if !valid_denom {
            return Err(invalid());
        }
        Ok(Coin::new(amount, denom))
    }
}

/// Multi-denomination amount, kept sorted by denom with one entry per denom.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Coin>", into = "Vec<Coin>")]
pub struct Coins(Vec<Coin>);

impl Coins {
    pub fn new(coins: impl IntoIterator<Item = Coin>) -> Self {
        let mut merged: BTreeMap<String, u128> = BTreeMap::new();
        for coin in coins {
            let entry = merged.entry(coin.denom).or_insert(0);
            *entry = entry.saturating_add(coin.amount);
        }
        Self(
            merged
                .into_iter()
                .map(|(denom, amount)| Coin { denom, amount })
                .collect(),
        )
    }

    pub fn single(amount: u128, denom: impl Into<String>) -> Self {
        Self::new([Coin::new(amount, denom)])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Coin> {
        self.0.iter()
    }

    pub fn amount_of(&self, denom: &str) -> u128 {
        self.0
            .iter()
            .find(|c| c.denom == denom)
            .map(|c| c.amount)
            .unwrap_or(0)
    }

    /// True when there is at least one coin and none is zero.
    pub fn is_all_positive(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|c| c.amount > 0)
    }

    /// True when every denom of `self` is covered by `other`.
    pub fn is_all_lte(&self, other: &Coins) -> bool {
        self.0.iter().all(|c| c.amount <= other.amount_of(&c.denom))
    }

    pub fn checked_add(&self, other: &Coins) -> Option<Coins> {
        let mut merged: BTreeMap<String, u128> =
            self.0.iter().map(|c| (c.denom.clone(), c.amount)).collect();
        for coin in &other.0 {
            let entry = merged.entry(coin.denom.clone()).or_insert(0);
            *entry = entry.checked_add(coin.amount)?;
        }
        Some(Coins::new(
            merged.into_iter().map(|(denom, amount)| Coin { denom, amount }),
        ))
    }

    /// `None` if any denom would go negative.
    pub fn checked_sub(&self, other: &Coins) -> Option<Coins> {
        let mut merged: BTreeMap<String, u128> =
            self.0.iter().map(|c| (c.denom.clone(), c.amount)).collect();
        for coin in &other.0 {
            let entry = merged.entry(coin.denom.clone()).or_insert(0);
            *entry = entry.checked_sub(coin.amount)?;
        }
        Some(Coins::new(
            merged.into_iter().map(|(denom, amount)| Coin { denom, amount }),
        ))
    }
}

impl From<Vec<Coin>> for Coins {
    fn from(coins: Vec<Coin>) -> Self {
        Coins::new(coins)
    }
}

impl From<Coins> for Vec<Coin> {
    fn from(coins: Coins) -> Self {
        coins.0
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, coin) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", coin)?;
        }
        Ok(())
    }
}

impl FromStr for Coins {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Coins::default());
        }
        let coins = s
            .split(',')
            .map(Coin::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Coins::new(coins))
    }
}

/// Module-specific message. The client never looks inside `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub type_url: String,
    pub value: serde_json::Value,
}

impl MessagePayload {
    pub fn new(type_url: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }
}

/// What the caller wants the ledger to do, before signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionIntent {
    sender: AccountId,
    fee_payer: Option<AccountId>,
    gas_limit: u64,
    fee: Option<Coins>,
    memo: String,
    mode: BroadcastMode,
    messages: Vec<MessagePayload>,
}

impl TransactionIntent {
    pub fn builder(sender: AccountId) -> IntentBuilder {
        IntentBuilder {
            intent: TransactionIntent {
                sender,
                fee_payer: None,
                gas_limit: 0,
                fee: None,
                memo: String::new(),
                mode: BroadcastMode::default(),
                messages: Vec::new(),
            },
        }
    }

    pub fn sender(&self) -> &AccountId {
        &self.sender
    }

    /// Account that pays the fee through a fee allowance, if any.
    pub fn fee_payer(&self) -> Option<&AccountId> {
        self.fee_payer.as_ref()
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn fee(&self) -> Option<&Coins> {
        self.fee.as_ref()
    }

    pub fn memo(&self) -> &str {
        &self.memo
    }

    pub fn mode(&self) -> BroadcastMode {
        self.mode
    }

    pub fn messages(&self) -> &[MessagePayload] {
        &self.messages
    }

    /// Returns a copy with gas and fee filled in where the caller left them unset.
    pub fn with_defaults(mut self, gas_limit: u64, fee: &Coins) -> Self {
        if self.gas_limit == 0 {
            self.gas_limit = gas_limit;
        }
        if self.fee.is_none() {
            self.fee = Some(fee.clone());
        }
        self
    }
}

/// Builder for [`TransactionIntent`].
#[derive(Debug, Clone)]
pub struct IntentBuilder {
    intent: TransactionIntent,
}

impl IntentBuilder {
    pub fn fee_payer(mut self, payer: AccountId) -> Self {
        self.intent.fee_payer = Some(payer);
        self
    }

    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.intent.gas_limit = gas_limit;
        self
    }

    pub fn fee(mut self, fee: Coins) -> Self {
        self.intent.fee = Some(fee);
        self
    }

    pub fn memo(mut self, memo: impl Into<String>) -> Self {
        self.intent.memo = memo.into();
        self
    }

    pub fn mode(mut self, mode: BroadcastMode) -> Self {
        self.intent.mode = mode;
        self
    }

    pub fn message(mut self, message: MessagePayload) -> Self {
        self.intent.messages.push(message);
        self
    }

    pub fn build(self) -> TransactionIntent {
        self.intent
    }
}

/// Chain-side numbers a signer needs besides the intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    pub chain_id: String,
    pub account_number: u64,
    pub sequence: u64,
}

/// A signed, broadcastable transaction. Produced once by a signer.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    intent: TransactionIntent,
    sequence: u64,
    signature: Vec<u8>,
    tx_bytes: Vec<u8>,
}

impl SignedTransaction {
    pub fn new(intent: TransactionIntent, sequence: u64, signature: Vec<u8>, tx_bytes: Vec<u8>) -> Self {
        Self {
            intent,
            sequence,
            signature,
            tx_bytes,
        }
    }

    pub fn intent(&self) -> &TransactionIntent {
        &self.intent
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Encoded bytes that go on the wire.
    pub fn tx_bytes(&self) -> &[u8] {
        &self.tx_bytes
    }
}

/// Terminal outcome of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxOutcome {
    Success,
    /// Non-zero code; only meaningful together with its codespace.
    Failure { codespace: String, code: u32 },
}

/// What the ledger reported for an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub hash: TxHash,
    pub height: u64,
    pub outcome: TxOutcome,
    pub log: String,
    pub gas_wanted: u64,
    pub gas_used: u64,
}

impl TxResult {
    /// Build a result from the raw `(code, codespace)` pair a node returns.
    pub fn from_code(hash: TxHash, height: u64, code: u32, codespace: &str, log: impl Into<String>) -> Self {
        let outcome = if code == CODE_OK {
            TxOutcome::Success
        } else {
            TxOutcome::Failure {
                codespace: codespace.to_string(),
                code,
            }
        };
        Self {
            hash,
            height,
            outcome,
            log: log.into(),
            gas_wanted: 0,
            gas_used: 0,
        }
    }

    pub fn with_gas(mut self, gas_wanted: u64, gas_used: u64) -> Self {
        self.gas_wanted = gas_wanted;
        self.gas_used = gas_used;
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TxOutcome::Success)
    }

    pub fn code(&self) -> u32 {
        match &self.outcome {
            TxOutcome::Success => CODE_OK,
            TxOutcome::Failure { code, .. } => *code,
        }
    }

    pub fn codespace(&self) -> &str {
        match &self.outcome {
            TxOutcome::Success => "",
            TxOutcome::Failure { codespace, .. } => codespace,
        }
    }

    /// Matches a specific `(codespace, code)` failure.
    pub fn is_failure_of(&self, codespace: &str, code: u32) -> bool {
        matches!(&self.outcome, TxOutcome::Failure { codespace: cs, code: c } if cs == codespace && *c == code)
    }

    /// Turn a failed outcome into [`LedgerError::LedgerFailure`](crate::ledger::LedgerError::LedgerFailure).
    pub fn ensure_success(self) -> crate::ledger::LedgerResult<TxResult> {
        match self.outcome {
            TxOutcome::Success => Ok(self),
            TxOutcome::Failure { codespace, code } => Err(crate::ledger::LedgerError::LedgerFailure {
                hash: self.hash,
                height: self.height,
                codespace,
                code,
                log: self.log,
            }),
        }
    }
}

/// Account state as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: AccountId,
    pub account_number: u64,
    pub sequence: u64,
    pub balances: Coins,
}

/// Event filter in the node's query language, e.g. `tm.event='NewBlock'`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventQuery(String);

impl EventQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self(query.into())
    }

    /// Every new block.
    pub fn new_blocks() -> Self {
        Self::new("tm.event='NewBlock'")
    }

    /// Narrow the query with an exact attribute match.
    pub fn and_eq(self, key: &str, value: &str) -> Self {
        Self(format!("{} AND {}='{}'", self.0, key, value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one registry subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Header-level block metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub chain_id: String,
    pub time: Option<String>,
    pub block_hash: Option<String>,
    pub proposer: Option<String>,
    pub num_txs: usize,
}

/// One raw `type.attribute = value` pair attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

/// A new block as delivered by an event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvent {
    pub height: u64,
    pub meta: BlockMeta,
    pub attributes: Vec<EventAttribute>,
}

//! Transaction submission.
//!
//! # Responsibilities
//! - Fill intent defaults (gas, fee) from configuration
//! - Reject malformed intents before they reach the signer
//! - Load and advance per-account sequences
//! - Sign and broadcast; return the hash without waiting for inclusion

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::ledger::{
    AccountSequence, BroadcastMode, Coins, Credential, LedgerError, LedgerResult, SequenceTracker,
    Signer, SigningContext, TransactionIntent, Transport, TxHandle, TxResult,
};
use crate::observability::metrics;
use crate::transaction::tracker::{ConfirmationPolicy, ConfirmationTracker};

fn mode_label(mode: BroadcastMode) -> &'static str {
    match mode {
        BroadcastMode::Async => "async",
        BroadcastMode::Sync => "sync",
        BroadcastMode::Block => "block",
    }
}

/// Turns intents into broadcast transactions.
pub struct TxOrchestrator {
    transport: Arc<dyn Transport>,
    signer: Arc<dyn Signer>,
    sequences: SequenceTracker,
    tracker: ConfirmationTracker,
    chain_id: String,
    default_gas_limit: u64,
    default_fee: Coins,
    default_mode: BroadcastMode,
}

impl TxOrchestrator {
    /// Create an orchestrator. Fails only if the configured default fee does not parse.
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        signer: Arc<dyn Signer>,
    ) -> LedgerResult<Self> {
        let default_fee: Coins = config.tx.fee.parse()?;
        Ok(Self {
            tracker: ConfirmationTracker::new(transport.clone()),
            transport,
            signer,
            sequences: SequenceTracker::new(),
            chain_id: config.node.chain_id.clone(),
            default_gas_limit: config.tx.gas_limit,
            default_fee,
            default_mode: config.tx.broadcast_mode,
        })
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Broadcast mode for transactions the client builds itself (allowances).
    pub fn default_mode(&self) -> BroadcastMode {
        self.default_mode
    }

    pub fn sequences(&self) -> &SequenceTracker {
        &self.sequences
    }

    pub fn tracker(&self) -> &ConfirmationTracker {
        &self.tracker
    }

    fn prepare(&self, intent: TransactionIntent) -> LedgerResult<TransactionIntent> {
        if intent.messages().is_empty() {
            return Err(LedgerError::Signing("malformed intent: no messages".to_string()));
        }
        if intent.fee_payer() == Some(intent.sender()) {
            return Err(LedgerError::Signing(format!(
                "malformed intent: fee payer {} is the sender",
                intent.sender()
            )));
        }
        let intent = intent.with_defaults(self.default_gas_limit, &self.default_fee);
        if intent.gas_limit() == 0 {
            return Err(LedgerError::Signing("malformed intent: gas limit is zero".to_string()));
        }
        Ok(intent)
    }

    /// Sign and broadcast an intent.
    ///
    /// Returns as soon as the node answered according to the intent's
    /// broadcast mode. Submissions from the same sender are serialized so
    /// that each one signs with the next sequence.
    pub async fn submit(
        &self,
        intent: TransactionIntent,
        credential: &Credential,
    ) -> LedgerResult<TxHandle> {
        let intent = match self.prepare(intent) {
            Ok(intent) => intent,
            Err(e) => {
                metrics::record_rejected("validate");
                return Err(e);
            }
        };
        let sender = intent.sender().clone();
        let mode = intent.mode();

        let mut sequence = self.sequences.lock(&sender).await;
        let current = match sequence.get() {
            Some(current) => current,
            None => {
                let info = self.transport.query_account(&sender).await?;
                let loaded = AccountSequence::from(&info);
                tracing::debug!(
                    sender = %sender,
                    account_number = loaded.account_number,
                    sequence = loaded.next_sequence,
                    "Loaded account sequence"
                );
                sequence.set(loaded);
                loaded
            }
        };

        let context = SigningContext {
            chain_id: self.chain_id.clone(),
            account_number: current.account_number,
            sequence: current.next_sequence,
        };
        let signed = self.signer.sign(&intent, credential, &context).map_err(|e| {
            metrics::record_rejected("sign");
            LedgerError::Signing(e.0)
        })?;

        let response = match self.transport.broadcast_tx(signed.tx_bytes(), mode).await {
            Ok(response) => response,
            Err(e) => {
                sequence.invalidate();
                metrics::record_rejected("transport");
                tracing::warn!(sender = %sender, error = %e, "Broadcast failed");
                return Err(LedgerError::Broadcast {
                    reason: e.to_string(),
                    codespace: None,
                    code: None,
                });
            }
        };

        if !response.is_accepted() {
            sequence.invalidate();
            metrics::record_rejected("check_tx");
            tracing::warn!(
                sender = %sender,
                hash = %response.hash,
                codespace = %response.codespace,
                code = response.code,
                log = %response.log,
                "Broadcast rejected"
            );
            return Err(LedgerError::Broadcast {
                reason: response.log,
                codespace: Some(response.codespace),
                code: Some(response.code),
            });
        }

        sequence.advance();
        metrics::record_submitted(mode_label(mode));
        tracing::info!(
            hash = %response.hash,
            sender = %sender,
            sequence = context.sequence,
            mode = %mode,
            "Transaction broadcast"
        );
        if let Some(included) = &response.included {
            tracing::debug!(
                hash = %included.hash,
                height = included.height,
                success = included.is_success(),
                "Inclusion reported with broadcast"
            );
        }

        Ok(response.hash)
    }

    /// Submit and then poll until the transaction reaches a terminal state.
    pub async fn submit_and_confirm(
        &self,
        intent: TransactionIntent,
        credential: &Credential,
        policy: &ConfirmationPolicy,
    ) -> LedgerResult<TxResult> {
        let handle = self.submit(intent, credential).await?;
        self.tracker.confirm(&handle, policy).await
    }
}

impl std::fmt::Debug for TxOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxOrchestrator")
            .field("chain_id", &self.chain_id)
            .field("default_gas_limit", &self.default_gas_limit)
            .field("default_fee", &self.default_fee)
            .field("default_mode", &self.default_mode)
            .finish()
    }
}

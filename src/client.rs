//! Client façade bundling the transaction lifecycle components.

use std::sync::Arc;
use std::time::SystemTime;

use crate::config::ClientConfig;
use crate::ledger::{
    AccountId, AccountInfo, Coins, Credential, EventQuery, LedgerResult, Signer, SubscriptionId,
    TendermintRpc, TransactionIntent, Transport, TxHandle, TxResult,
};
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::transaction::{AllowanceManager, ConfirmationPolicy, TxOrchestrator};

/// One client per (configuration, transport, signer). Several may coexist.
pub struct LedgerClient {
    transport: Arc<dyn Transport>,
    orchestrator: Arc<TxOrchestrator>,
    allowances: AllowanceManager,
    subscriptions: SubscriptionRegistry,
    confirmation: ConfirmationPolicy,
}

impl std::fmt::Debug for LedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerClient")
            .field("orchestrator", &self.orchestrator)
            .field("subscriptions", &self.subscriptions)
            .field("confirmation", &self.confirmation)
            .finish()
    }
}

impl LedgerClient {
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        signer: Arc<dyn Signer>,
    ) -> LedgerResult<Self> {
        let orchestrator = Arc::new(TxOrchestrator::new(config, transport.clone(), signer)?);
        Ok(Self {
            allowances: AllowanceManager::new(orchestrator.clone()),
            subscriptions: SubscriptionRegistry::new(transport.clone(), &config.subscription),
            confirmation: ConfirmationPolicy::from(&config.confirmation),
            orchestrator,
            transport,
        })
    }

    /// Client over the node endpoints in `config.node`.
    pub fn connect(config: &ClientConfig, signer: Arc<dyn Signer>) -> LedgerResult<Self> {
        let transport = Arc::new(TendermintRpc::new(&config.node)?);
        Self::new(config, transport, signer)
    }

    pub fn orchestrator(&self) -> &TxOrchestrator {
        &self.orchestrator
    }

    pub fn allowances(&self) -> &AllowanceManager {
        &self.allowances
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Policy built from `[confirmation]`.
    pub fn confirmation_policy(&self) -> &ConfirmationPolicy {
        &self.confirmation
    }

    pub async fn query_account(&self, address: &AccountId) -> LedgerResult<AccountInfo> {
        Ok(self.transport.query_account(address).await?)
    }

    pub async fn submit(
        &self,
        intent: TransactionIntent,
        credential: &Credential,
    ) -> LedgerResult<TxHandle> {
        self.orchestrator.submit(intent, credential).await
    }

    /// Confirm with the configured policy.
    pub async fn confirm(&self, handle: &TxHandle) -> LedgerResult<TxResult> {
        self.orchestrator
            .tracker()
            .confirm(handle, &self.confirmation)
            .await
    }

    pub async fn submit_and_confirm(
        &self,
        intent: TransactionIntent,
        credential: &Credential,
    ) -> LedgerResult<TxResult> {
        self.orchestrator
            .submit_and_confirm(intent, credential, &self.confirmation)
            .await
    }

    pub async fn grant_allowance(
        &self,
        granter: &AccountId,
        grantee: &AccountId,
        spend_limit: Coins,
        expiration: Option<SystemTime>,
        credential: &Credential,
    ) -> LedgerResult<TxHandle> {
        self.allowances
            .grant(granter, grantee, spend_limit, expiration, credential)
            .await
    }

    pub async fn revoke_allowance(
        &self,
        granter: &AccountId,
        grantee: &AccountId,
        credential: &Credential,
    ) -> LedgerResult<TxHandle> {
        self.allowances.revoke(granter, grantee, credential).await
    }

    pub async fn subscribe(&self, query: EventQuery) -> LedgerResult<Subscription> {
        self.subscriptions.subscribe(query).await
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Close every subscription and stop the event connection.
    pub async fn shutdown(&self) {
        self.subscriptions.shutdown().await;
    }
}

//! JSON-RPC chain client composing an [`alloy`] provider and an optional signer.
//!
//! [`EvmClient`] without a signer is a read-only session: reads work, writes
//! fail with [`ChainError::NotConnected`].

use std::sync::Arc;
use std::time::Duration;

use alloy::network::{Ethereum, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{ChainClient, ChainError, EvmChain, ReadCall, TxHash, WriteCall, contracts};

const DEFAULT_RECEIPT_POLL: Duration = Duration::from_secs(1);
const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// A chain client for the sale and stablecoin contracts.
///
/// Composes two layers:
/// - **[`alloy::providers::DynProvider`]** — JSON-RPC communication, with
///   the signer installed as the provider's wallet when present
/// - **[`alloy::signers::local::PrivateKeySigner`]** — the wallet session
pub struct EvmClient {
    /// Type-erased JSON-RPC provider for on-chain communication.
    provider: Arc<DynProvider<Ethereum>>,

    /// Local signer; `None` for a read-only session.
    signer: Option<PrivateKeySigner>,

    /// The chain this client is connected to.
    chain: EvmChain,

    /// Interval between receipt lookups while confirming.
    receipt_poll: Duration,

    /// Upper bound on a confirmation wait.
    confirmation_timeout: Duration,
}

impl std::fmt::Debug for EvmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmClient")
            .field("account", &self.account())
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl EvmClient {
    /// Connect a read-only session to `rpc_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC connection fails.
    pub async fn connect(rpc_url: &str) -> Result<Self, ChainError> {
        let provider = ProviderBuilder::new()
            .connect(rpc_url)
            .await
            .map_err(|e| ChainError::provider(format!("RPC connection to '{rpc_url}' failed: {e}")))?
            .erased();
        Self::build(provider, None).await
    }

    /// Connect a signing session from a raw private key hex string (with or
    /// without `0x` prefix).
    ///
    /// # Errors
    ///
    /// Returns an error if the private key is invalid or the RPC connection fails.
    pub async fn from_private_key(key: &str, rpc_url: &str) -> Result<Self, ChainError> {
        let key = key.strip_prefix("0x").unwrap_or(key);
        let signer: PrivateKeySigner = key
            .parse()
            .map_err(|e| ChainError::config(format!("invalid private key: {e}")))?;

        let provider = ProviderBuilder::new()
            .wallet(signer.clone())
            .connect(rpc_url)
            .await
            .map_err(|e| ChainError::provider(format!("RPC connection to '{rpc_url}' failed: {e}")))?
            .erased();
        Self::build(provider, Some(signer)).await
    }

    /// Internal builder shared by all constructors.
    async fn build(
        provider: DynProvider<Ethereum>,
        signer: Option<PrivateKeySigner>,
    ) -> Result<Self, ChainError> {
        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| ChainError::provider(format!("failed to get chain ID: {e}")))?;
        let chain = EvmChain::from_id(chain_id);

        info!(
            account = ?signer.as_ref().map(PrivateKeySigner::address),
            chain = %chain,
            "EVM client connected",
        );

        Ok(Self {
            provider: Arc::new(provider),
            signer,
            chain,
            receipt_poll: DEFAULT_RECEIPT_POLL,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        })
    }

    /// Override the detected chain after construction.
    #[must_use]
    pub fn with_chain(mut self, chain: EvmChain) -> Self {
        self.chain = chain;
        self
    }

    /// Override receipt polling cadence and the confirmation timeout.
    #[must_use]
    pub const fn with_confirmation(mut self, poll: Duration, timeout: Duration) -> Self {
        self.receipt_poll = poll;
        self.confirmation_timeout = timeout;
        self
    }

    /// Reference to the underlying JSON-RPC [`DynProvider`].
    #[must_use]
    pub fn provider(&self) -> &DynProvider<Ethereum> {
        &self.provider
    }

    /// Reference to the [`EvmChain`] this client is connected to.
    #[must_use]
    pub const fn chain(&self) -> &EvmChain {
        &self.chain
    }

    fn write_request(&self, call: &WriteCall) -> Result<TransactionRequest, ChainError> {
        let from = self.account().ok_or(ChainError::NotConnected)?;
        Ok(TransactionRequest::default()
            .with_from(from)
            .with_to(call.contract())
            .with_input(contracts::encode_write(call)))
    }

    async fn wait_for_receipt(&self, tx: TxHash) -> Result<(), ChainError> {
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(tx)
                .await
                .map_err(|e| ChainError::transaction(format!("get_transaction_receipt failed: {e}")))?;

            if let Some(receipt) = receipt {
                if receipt.status() {
                    return Ok(());
                }
                return Err(ChainError::reverted(format!(
                    "transaction {tx:#x} reverted in block {:?}",
                    receipt.block_number()
                )));
            }
            tokio::time::sleep(self.receipt_poll).await;
        }
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    fn account(&self) -> Option<Address> {
        self.signer.as_ref().map(PrivateKeySigner::address)
    }

    fn chain_id(&self) -> Option<u64> {
        Some(self.chain.id())
    }

    async fn read(&self, call: &ReadCall) -> Result<U256, ChainError> {
        let tx = TransactionRequest::default()
            .with_to(call.contract)
            .with_input(contracts::encode_read(call)?);
        let result = self
            .provider
            .call(tx)
            .await
            .map_err(|e| ChainError::provider(format!("eth_call {call} failed: {e}")))?;

        debug!(%call, "contract read");
        contracts::decode_read(call.function, &result)
    }

    async fn simulate(&self, call: &WriteCall) -> Result<(), ChainError> {
        let tx = self.write_request(call)?;
        self.provider
            .call(tx)
            .await
            .map(|_| ())
            .map_err(|e| ChainError::simulation(call.name(), e))
    }

    async fn submit(&self, call: &WriteCall) -> Result<TxHash, ChainError> {
        let tx = self.write_request(call)?;
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| ChainError::transaction(format!("send_transaction failed: {e}")))?;

        let hash = *pending.tx_hash();
        info!(tx = %hash, function = call.name(), amount = %call.amount(), "transaction submitted");
        Ok(hash)
    }

    async fn confirm(&self, tx: TxHash) -> Result<(), ChainError> {
        tokio::time::timeout(self.confirmation_timeout, self.wait_for_receipt(tx))
            .await
            .map_err(|_| {
                ChainError::transaction(format!(
                    "timed out after {:?} waiting for receipt of {tx:#x}",
                    self.confirmation_timeout
                ))
            })?
    }
}

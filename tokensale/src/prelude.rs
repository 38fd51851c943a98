//! Prelude module for convenient imports.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokensale::prelude::*;
//! ```

pub use crate::chain::{
    ChainClient, ChainError, EvmChain, EvmClient, MockChain, ReadCall, ReadFunction, TxHash,
    WriteCall,
};
pub use crate::classify::{Failure, FailureKind, MissingConfig, Precondition, classify};
pub use crate::config::{ConfigIssue, Contracts, IssueLevel, SaleConfig, load_config_from};
pub use crate::error::{Error, Result};
pub use crate::invalidate::CacheInvalidator;
pub use crate::orchestrator::{Outcome, PurchaseOrchestrator, PurchaseStatus, Validation};
pub use crate::progress::SaleProgress;
pub use crate::quote::{
    compute_total_cost, format_amount, needs_allowance_reset, needs_approval,
    parse_quantity_input,
};
pub use crate::reader::{ChainStateReader, ReadState};
pub use crate::sequencer::{Phase, TransactionSequencer, TxKind};

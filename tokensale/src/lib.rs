//! Tokensale - purchase orchestration for a fixed-supply token sale
//!
//! This crate holds the core of a storefront that sells a token for a
//! stablecoin: it reads sale and wallet state from the chain, quotes the
//! cost of a quantity, decides whether an allowance approval is needed,
//! sequences the approval and purchase transactions, classifies failures
//! for display, and refreshes dependent reads after a purchase.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokensale::prelude::*;
//!
//! let config = SaleConfig::default().with_env()?;
//! let client = EvmClient::from_private_key(&key, "http://localhost:8545").await?;
//! let orchestrator = Arc::new(PurchaseOrchestrator::new(config, Arc::new(client)));
//!
//! orchestrator.set_quantity(100).await;
//! match orchestrator.handle_purchase().await {
//!     Outcome::Approved { .. } => { /* run again to purchase */ }
//!     Outcome::Purchased { tx } => println!("bought in {tx}"),
//!     other => eprintln!("{other:?}"),
//! }
//! ```

pub mod chain;
pub mod classify;
pub mod config;
pub mod error;
pub mod invalidate;
pub mod orchestrator;
pub mod prelude;
pub mod progress;
pub mod quote;
pub mod reader;
pub mod sequencer;

pub use error::{Error, Result};

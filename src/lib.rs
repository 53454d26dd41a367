//! # Ledger Recon
//!
//! A reconciliation engine that compares a source ledger against a target
//! ledger and reports which records correspond, which exist on one side
//! only, and which correspond but disagree on their values.
//!
//! ## Features
//!
//! - **Normalization**: trimming, case folding, numeric and date coercion driven by configuration
//! - **Key matching**: linear-time pairing on composite keys with explicit duplicate-key policies
//! - **Tolerances**: absolute, relative and day-window comparison of value fields
//! - **Deterministic reports**: unchanged inputs always produce an identical report
//! - **Run lifecycle**: progress callbacks, cancellation between stages, at-most-once persistence
//! - **Collaborator abstraction**: trait-based ingestion, persistence and progress reporting
//!
//! ## Quick Start
//!
//! ```rust
//! use ledger_recon::{ComparedField, ConfigBuilder};
//! use bigdecimal::BigDecimal;
//! use std::str::FromStr;
//!
//! let config = ConfigBuilder::new(["id"])
//!     .compare(
//!         "amount",
//!         ComparedField::numeric().absolute(BigDecimal::from_str("0.10").unwrap()),
//!     )
//!     .build()
//!     .unwrap();
//!
//! // Plug in RecordSource and ReportStore implementations, then:
//! // let mut reconciler = Reconciler::new(records, store);
//! // let report = reconciler.run_reconciliation(&mut state, &request, &config, &cancel).await?;
//! # let _ = config;
//! ```

pub mod config;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;

//! # rhctl core
//!
//! `rhctl-core` is the control-plane driver of the FPGA row-hammer test engine. It
//! configures the attack through the engine's CSR registers and orchestrates test
//! runs; it never touches DRAM itself.
//!
//! ## Architecture Overview
//!
//! - [`RegisterAccess`] is the capability to read and write engine registers. Real
//!   register I/O lives in backend crates; [`sim::SimHardware`] is a behavioural model
//!   of the engine for tests and dry runs.
//!
//! - [`handshake`] implements the select-and-transfer protocol every configuration
//!   command uses to move data into and out of the engine.
//!
//! - [`RhTest`] owns a register capability and exposes the commands:
//!   - [`slots`]: the attack slot table,
//!   - [`timing`]: pair and cycle timers,
//!   - [`pattern`]: write-fill data patterns,
//!   - [`settings`]: refresh, auto precharge and address organisation,
//!   - [`orchestrator`]: the blocking test run and its events,
//!   - [`plan`]: applying a JSON test plan.
//!
//! - [`addr`] decodes engine addresses into row, bank and column.
//!
//! ## Concurrency
//!
//! All commands take `&mut self` and block until the engine acknowledges. There are
//! no timeouts: an engine that never acknowledges stalls the caller.

#![warn(missing_docs)]

pub mod addr;
mod controller;
pub mod csr;
mod error;
pub mod handshake;
pub mod orchestrator;
pub mod pattern;
pub mod plan;
pub mod settings;
pub mod sim;
pub mod slots;
pub mod timing;

pub use crate::addr::{AddressWidths, DramAddr};
pub use crate::controller::RhTest;
pub use crate::csr::{Csr, RegisterAccess};
pub use crate::error::{Error, Result};
pub use crate::orchestrator::{
    ErrorBatch, ErrorRecord, FeedbackState, Phase, ReadStage, RunObserver, TestEvent, TestReport,
};
pub use crate::pattern::{PatternSlot, PatternSummary};
pub use crate::plan::TestPlan;
pub use crate::settings::{AddressInfo, RefreshSettings, TestSummary};
pub use crate::slots::{AttackSlot, PopOutcome, SlotListing};
pub use crate::timing::Timer;

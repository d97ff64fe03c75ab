//! # rhctl
//!
//! `rhctl` drives the row-hammer test engine of a LiteX SoC. Software stages the
//! attack parameters (attack slots with relative frequencies, pair and cycle timers,
//! data patterns, refresh settings) into the engine's CSR registers, arms the
//! hardware state machine, follows its feedback state and collects the bit errors it
//! reports.
//!
//! This umbrella crate re-exports [`rhctl_core`] and, with the `devmem` feature, the
//! `/dev/mem` register backend.
//!
//! ## Quickstart guide
//!
//! ```sh
//! # Run a full test against the built-in simulator
//! cargo run --release -p rhctl-bin -- --sim run --plan config/plan.json
//!
//! # Run against real hardware, resolving registers from the LiteX csr.json
//! sudo target/release/rhctl --csr-json build/csr.json summary
//! ```
//!
//! ## Modules
//!
//! - `csr`: register names and the [`RegisterAccess`] capability.
//! - `handshake`: the select-and-transfer protocol shared by all configuration commands.
//! - `addr`: row/bank/column decoding.
//! - `slots`, `timing`, `pattern`, `settings`: configuration of the engine.
//! - `orchestrator`: the blocking test run.
//! - `plan`: JSON test plans.
//! - `sim`: a behavioural model of the engine used for tests and dry runs.

pub use rhctl_core::*;

#[cfg(feature = "devmem")]
pub use rhctl_devmem as devmem;

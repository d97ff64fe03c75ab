//! # rhctl command line
//!
//! Thin front end over [`rhctl_core`]: opens a register backend (the `/dev/mem`
//! window of a LiteX SoC or the built-in simulator), issues one configuration
//! command or a full test run, and renders the structured results as text.
//!
//! ## Modules
//!
//! - `backend`: selects and opens the register backend.
//! - `render`: text rendering of listings and summaries, and the phase spinner
//!   shown during a run.
pub mod backend;
pub mod render;

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}

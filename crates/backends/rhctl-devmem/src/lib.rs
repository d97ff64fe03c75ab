//! Physical register access for the row-hammer test engine.
//!
//! The engine's CSRs sit on the SoC bus. [`DevMem`] maps the register window through
//! `/dev/mem` (or any file standing in for it) and implements
//! [`RegisterAccess`](rhctl_core::RegisterAccess), with the bus addresses resolved
//! from the `csr.json` LiteX emits at build time ([`CsrMap`]).

#![warn(missing_docs)]

mod csr_map;
mod dev_mem;

pub use crate::csr_map::{CsrLocation, CsrMap, CSR_STRIDE};
pub use crate::dev_mem::{DevMem, DEV_MEM};

use thiserror::Error;

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    #[error("Register {0} not found in csr.json")]
    MissingRegister(String),
    #[error("Unsupported CSR data width {0}")]
    InvalidCsrDataWidth(String),
    #[error("Register {name} has {size} subregisters of {data_width} bits, wider than 32 bits")]
    RegisterTooWide {
        name: String,
        size: u32,
        data_width: u32,
    },
    #[error("Register window {start:#x}..{end:#x} cannot be mapped")]
    InvalidWindow { start: u64, end: u64 },
}

/// Result type of the backend.
pub type Result<T> = std::result::Result<T, Error>;

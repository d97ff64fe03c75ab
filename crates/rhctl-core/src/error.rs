use itertools::Itertools;
use thiserror::Error;

use crate::slots::MAX_SLOTS;
use crate::timing::{MAX_TIMER_INDEX, MIN_TIMER_INDEX};

/// Configuration errors of the row-hammer test engine.
///
/// All of them are detected before the first register write, so a rejected command
/// never leaves the hardware in a partially configured state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The slot order is neither an existing slot nor the next free one.
    #[error("order {order} not available. {}", slot_order_hint(*count))]
    InvalidSlotOrder {
        /// Requested order
        order: u32,
        /// Number of configured slots at the time of the request
        count: u32,
    },
    /// A slot count outside `0..=MAX_SLOTS` was requested.
    #[error("slot count {count} out of range 0 - {MAX_SLOTS}")]
    InvalidSlotCount {
        /// Requested count
        count: u32,
    },
    /// The hardware reports more slots than it can hold.
    #[error("hardware reports {count} attack slots, at most {MAX_SLOTS} are supported")]
    CorruptSlotCount {
        /// Count read from the hardware
        count: u32,
    },
    /// The timer index is outside the timer window.
    #[error("timer {index} not available, value of timer should be in range {MIN_TIMER_INDEX} - {MAX_TIMER_INDEX}")]
    InvalidTimerIndex {
        /// Requested timer index
        index: u32,
    },
    /// The pattern slot is neither even (0) nor odd (1).
    #[error("pattern slot {slot} not available, options are 0 (even rows) and 1 (odd rows)")]
    InvalidPatternSlot {
        /// Requested pattern slot
        slot: u32,
    },
    /// Bank and column bits do not fit into the address.
    #[error(
        "bank width {bank_width} + column width {column_width} exceeds address width {address_width}"
    )]
    InvalidAddressWidths {
        /// Address width in bits
        address_width: u32,
        /// Bank width in bits
        bank_width: u32,
        /// Column width in bits
        column_width: u32,
    },
    /// A planned slot address has bits above the address width.
    #[error("slot address {address:#x} does not fit the {address_width} bit address space")]
    SlotAddressOutOfRange {
        /// Requested address
        address: u32,
        /// Address width in bits
        address_width: u32,
    },
    /// A planned row, bank or column does not fit its field of the address.
    #[error(
        "ROW: {row}, BANK: {bank}, COL: {col} out of range, valid rows 0 - {max_row}, banks 0 - {max_bank}, columns 0 - {max_col}"
    )]
    SlotLocationOutOfRange {
        /// Requested row
        row: u32,
        /// Requested bank
        bank: u32,
        /// Requested column
        col: u32,
        /// Highest row of the hardware
        max_row: u32,
        /// Highest bank of the hardware
        max_bank: u32,
        /// Highest column of the hardware
        max_col: u32,
    },
}

/// Result type of the configuration commands.
pub type Result<T> = std::result::Result<T, Error>;

fn slot_order_hint(count: u32) -> String {
    let existing = count.min(MAX_SLOTS);
    let mut hint = if existing == 0 {
        "No orders to modify".to_string()
    } else {
        format!("Modify order values: {}", (0..existing).join(" "))
    };
    if count < MAX_SLOTS {
        hint += &format!(", add new order value: {}", count);
    }
    hint
}

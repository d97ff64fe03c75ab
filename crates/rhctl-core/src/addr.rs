//! Row/bank/column decoding of engine addresses.
//!
//! An engine address is laid out as `row | bank | column` from the most to the least
//! significant bit. Shifts and masks are clamped to the 32-bit register width, so
//! out-of-range widths never wrap around.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::error::{Error, Result};

const REG_BITS: u32 = u32::BITS;

/// Mask with the lowest `width` bits set; all ones for `width >= 32`.
pub fn low_mask(width: u32) -> u32 {
    1u32.checked_shl(width).map_or(u32::MAX, |bit| bit - 1)
}

fn shr(value: u32, shift: u32) -> u32 {
    value.checked_shr(shift).unwrap_or(0)
}

fn shl(value: u32, shift: u32) -> u32 {
    value.checked_shl(shift).unwrap_or(0)
}

/// Extracts the row of `addr`.
pub fn extract_row(addr: u32, bank_width: u32, col_width: u32) -> u32 {
    shr(addr, bank_width.saturating_add(col_width))
}

/// Extracts the bank of `addr`.
pub fn extract_bank(addr: u32, bank_width: u32, col_width: u32) -> u32 {
    shr(addr, col_width) & low_mask(bank_width)
}

/// Extracts the column of `addr`.
pub fn extract_col(addr: u32, col_width: u32) -> u32 {
    addr & low_mask(col_width)
}

/// Address organisation of the DRAM port, fixed by the hardware build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddressWidths {
    /// Total address bits
    pub address_width: u32,
    /// Bank bits
    pub bank_width: u32,
    /// Column bits
    pub column_width: u32,
}

impl AddressWidths {
    /// Creates the widths, rejecting bank and column bits that do not fit the address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddressWidths`] if `bank_width + column_width`
    /// exceeds `address_width` or the address does not fit a register.
    pub fn new(address_width: u32, bank_width: u32, column_width: u32) -> Result<Self> {
        let lower = bank_width.checked_add(column_width);
        if address_width > REG_BITS || lower.is_none_or(|lower| lower > address_width) {
            return Err(Error::InvalidAddressWidths {
                address_width,
                bank_width,
                column_width,
            });
        }
        Ok(Self {
            address_width,
            bank_width,
            column_width,
        })
    }

    /// Row bits: `address_width - (bank_width + column_width)`.
    pub fn row_width(&self) -> u32 {
        self.address_width
            .saturating_sub(self.bank_width.saturating_add(self.column_width))
    }

    /// Decodes `addr` into its DRAM components.
    pub fn decode(&self, addr: u32) -> DramAddr {
        DramAddr::decode(addr, self)
    }

    /// Highest address of the address space.
    pub fn max_address(&self) -> u32 {
        low_mask(self.address_width)
    }

    /// Highest row, bank and column.
    pub fn max_location(&self) -> DramAddr {
        DramAddr {
            row: low_mask(self.row_width()),
            bank: low_mask(self.bank_width),
            col: low_mask(self.column_width),
        }
    }
}

/// DRAM location of an engine address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct DramAddr {
    /// Row number
    pub row: u32,
    /// Bank number
    pub bank: u32,
    /// Column number
    pub col: u32,
}

impl Display for DramAddr {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        write!(fmt, "ROW: {}, BANK: {}, COL: {}", self.row, self.bank, self.col)
    }
}

impl DramAddr {
    /// Creates a new DRAM address.
    pub fn new(row: u32, bank: u32, col: u32) -> Self {
        DramAddr { row, bank, col }
    }

    /// Splits `addr` into row, bank and column.
    pub fn decode(addr: u32, widths: &AddressWidths) -> DramAddr {
        DramAddr {
            row: extract_row(addr, widths.bank_width, widths.column_width),
            bank: extract_bank(addr, widths.bank_width, widths.column_width),
            col: extract_col(addr, widths.column_width),
        }
    }

    /// Checks that every component fits its field.
    pub fn fits(&self, widths: &AddressWidths) -> bool {
        let max = widths.max_location();
        self.row <= max.row && self.bank <= max.bank && self.col <= max.col
    }

    /// Recombines the components into an engine address.
    ///
    /// Components wider than their field are truncated.
    pub fn linearize(&self, widths: &AddressWidths) -> u32 {
        let lower = widths.bank_width.saturating_add(widths.column_width);
        shl(self.row, lower)
            | shl(self.bank & low_mask(widths.bank_width), widths.column_width)
            | (self.col & low_mask(widths.column_width))
    }
}

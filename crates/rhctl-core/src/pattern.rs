//! Write-fill data patterns.
//!
//! The engine replicates a 32-bit pattern across the full DRAM port width. Pattern
//! slot 0 fills every row, or only the even rows when dual pattern mode is enabled;
//! slot 1 fills the odd rows in dual pattern mode.

use serde::Serialize;
use std::fmt::{self, Display, Formatter};

use crate::controller::RhTest;
use crate::csr::{Csr, DATA_WORD_BITS, RegisterAccess};
use crate::error::{Error, Result};
use crate::handshake::{Channel, Direction};

/// One of the two pattern registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PatternSlot {
    /// All rows, even rows in dual pattern mode
    Even,
    /// Odd rows in dual pattern mode
    Odd,
}

impl PatternSlot {
    /// Selector of the slot on the input data channel.
    pub fn selector(self) -> u32 {
        match self {
            PatternSlot::Even => 0,
            PatternSlot::Odd => 1,
        }
    }

    /// Slot holding the expected data of `row`.
    pub fn for_row(row: u32, dual_pattern: bool) -> Self {
        if dual_pattern && row % 2 == 1 {
            PatternSlot::Odd
        } else {
            PatternSlot::Even
        }
    }
}

impl TryFrom<u32> for PatternSlot {
    type Error = Error;

    fn try_from(slot: u32) -> Result<Self> {
        match slot {
            0 => Ok(PatternSlot::Even),
            1 => Ok(PatternSlot::Odd),
            _ => Err(Error::InvalidPatternSlot { slot }),
        }
    }
}

/// Pattern configuration as reported by [`RhTest::get_pattern_summary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatternSummary {
    /// Pattern of slot 0
    pub even: u32,
    /// Pattern of slot 1
    pub odd: u32,
    /// Whether odd rows use their own pattern
    pub dual_pattern: bool,
    /// DRAM port data width in bits
    pub data_width: u32,
    /// How many times the pattern is replicated across the port width
    pub repeat: u32,
}

impl Display for PatternSummary {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(
            f,
            " {:08x} x{} for all rows, or even rows with double setting",
            self.even, self.repeat
        )?;
        writeln!(
            f,
            " {:08x} x{} for odd rows with double setting",
            self.odd, self.repeat
        )?;
        if self.dual_pattern {
            write!(f, "Two-pattern enabled")
        } else {
            write!(f, "One-pattern enabled")
        }
    }
}

impl<R: RegisterAccess> RhTest<R> {
    /// Writes `pattern` to pattern slot `slot` (0 = even rows, 1 = odd rows).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPatternSlot`] without touching the hardware for any
    /// other slot.
    pub fn set_pattern(&mut self, pattern: u32, slot: u32) -> Result<()> {
        let slot = PatternSlot::try_from(slot)?;
        self.transfer(
            Channel::InputData,
            slot.selector(),
            &[(Csr::InputDataPattern, pattern)],
            Direction::Set,
        );
        Ok(())
    }

    /// Reads pattern slot `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPatternSlot`] without touching the hardware for any
    /// slot other than 0 or 1.
    pub fn get_pattern(&mut self, slot: u32) -> Result<u32> {
        let slot = PatternSlot::try_from(slot)?;
        Ok(self.read_pattern(slot))
    }

    pub(crate) fn read_pattern(&mut self, slot: PatternSlot) -> u32 {
        self.transfer(Channel::InputData, slot.selector(), &[], Direction::Get);
        self.read(Csr::InputDataPatternOutput)
    }

    /// Enables or disables dual pattern mode.
    pub fn set_dual_pattern(&mut self, enabled: bool) {
        self.regs().write_flag(Csr::InputDataDoublePatternSetting, enabled);
    }

    /// Whether dual pattern mode is enabled.
    pub fn dual_pattern(&mut self) -> bool {
        self.regs().read_flag(Csr::InputDataDoublePatternSetting)
    }

    /// DRAM port data width in bits.
    pub fn data_width(&mut self) -> u32 {
        self.read(Csr::DataWidth)
    }

    /// Reads both patterns, the dual pattern flag and the data width.
    pub fn get_pattern_summary(&mut self) -> PatternSummary {
        let even = self.read_pattern(PatternSlot::Even);
        let odd = self.read_pattern(PatternSlot::Odd);
        let data_width = self.data_width();
        PatternSummary {
            even,
            odd,
            dual_pattern: self.dual_pattern(),
            data_width,
            repeat: data_width / DATA_WORD_BITS,
        }
    }
}

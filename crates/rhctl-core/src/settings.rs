//! Refresh, auto precharge and address organisation.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::addr::AddressWidths;
use crate::controller::RhTest;
use crate::csr::{Csr, RegisterAccess};
use crate::error::Result;
use crate::pattern::PatternSummary;
use crate::slots::SlotListing;

/// DRAM refresh during the attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSettings {
    /// Refresh stays enabled while hammering
    pub enabled: bool,
    /// Refresh interval (tREFI) in controller cycles
    pub rate: u32,
}

impl Display for RefreshSettings {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.enabled {
            write!(f, "Refresh enabled, tREFI {}", self.rate)
        } else {
            write!(f, "Refresh disabled")
        }
    }
}

/// Address organisation of the DRAM port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddressInfo {
    /// Address, bank and column widths
    pub widths: AddressWidths,
    /// Derived row width
    pub row_width: u32,
    /// Data width in bits
    pub data_width: u32,
}

/// Everything a test run will use, see [`RhTest::summarize_test_params`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestSummary {
    /// Refresh during the attack
    pub refresh: RefreshSettings,
    /// Attack sequence
    pub slots: SlotListing,
    /// Write-fill patterns
    pub patterns: PatternSummary,
    /// Auto precharge during the attack
    pub auto_precharge: bool,
}

impl<R: RegisterAccess> RhTest<R> {
    /// Reads the refresh settings.
    pub fn get_refresh(&mut self) -> RefreshSettings {
        RefreshSettings {
            enabled: self.regs().read_flag(Csr::RefreshEnable),
            rate: self.read(Csr::RefreshRate),
        }
    }

    /// Writes the refresh settings applied while hammering.
    pub fn set_refresh(&mut self, refresh: RefreshSettings) {
        self.regs().write_flag(Csr::RefreshEnable, refresh.enabled);
        self.write(Csr::RefreshRate, refresh.rate);
    }

    /// Whether auto precharge is used while hammering.
    pub fn get_auto_precharge(&mut self) -> bool {
        self.regs().read_flag(Csr::AutoPrecharge)
    }

    /// Enables or disables auto precharge while hammering.
    pub fn set_auto_precharge(&mut self, enabled: bool) {
        self.regs().write_flag(Csr::AutoPrecharge, enabled);
    }

    /// Reads the address widths of the hardware build.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddressWidths`](crate::Error::InvalidAddressWidths)
    /// if the hardware reports inconsistent widths.
    pub fn get_address_widths(&mut self) -> Result<AddressWidths> {
        let address_width = self.read(Csr::AddressWidth);
        let bank_width = self.read(Csr::BankWidth);
        let column_width = self.read(Csr::ColWidth);
        AddressWidths::new(address_width, bank_width, column_width)
    }

    /// Reads widths, derived row width and data width.
    pub fn address_info(&mut self) -> Result<AddressInfo> {
        let widths = self.get_address_widths()?;
        Ok(AddressInfo {
            widths,
            row_width: widths.row_width(),
            data_width: self.data_width(),
        })
    }

    /// Collects refresh, attack sequence, patterns and auto precharge.
    pub fn summarize_test_params(&mut self) -> Result<TestSummary> {
        let refresh = self.get_refresh();
        let slots = self.list_slots()?;
        let patterns = self.get_pattern_summary();
        let auto_precharge = self.get_auto_precharge();
        Ok(TestSummary {
            refresh,
            slots,
            patterns,
            auto_precharge,
        })
    }
}

//! JSON test plans.
//!
//! A plan describes the complete configuration of a run. Applying it replaces the
//! attack sequence and overwrites the timers, patterns and settings it names; fields
//! that are left out keep their current hardware value.
//!
//! ```json
//! {
//!   "slots": [
//!     { "address": 4096, "frequency": 3 },
//!     { "row": 18, "bank": 0, "col": 0, "frequency": 3 }
//!   ],
//!   "timers": [{ "index": 2, "cycles": 500 }, { "index": 7, "cycles": 10000 }],
//!   "patterns": { "even": 2863311530, "odd": 1431655765, "dual": true },
//!   "refresh": { "enabled": false, "rate": 0 }
//! }
//! ```

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::addr::{AddressWidths, DramAddr};
use crate::controller::RhTest;
use crate::csr::RegisterAccess;
use crate::settings::RefreshSettings;
use crate::slots::{MAX_SLOTS, PopOutcome};
use crate::timing::Timer;

/// Errors that can occur when loading a test plan.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    #[error("invalid test plan: {0}")]
    Config(#[from] crate::Error),
}

/// Result type of [`TestPlan::from_jsonfile`].
pub type Result<T> = std::result::Result<T, Error>;

fn default_frequency() -> u32 {
    1
}

/// Target of a planned slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotTarget {
    /// Raw engine address
    Address {
        /// Engine address
        address: u32,
    },
    /// Row, bank and column, linearized with the hardware widths
    Location(DramAddr),
}

impl SlotTarget {
    /// Engine address of the target.
    ///
    /// # Errors
    ///
    /// Returns [`SlotAddressOutOfRange`](crate::Error::SlotAddressOutOfRange) or
    /// [`SlotLocationOutOfRange`](crate::Error::SlotLocationOutOfRange) if the target
    /// does not fit `widths`.
    pub fn address(&self, widths: &AddressWidths) -> crate::Result<u32> {
        match self {
            SlotTarget::Address { address } => {
                if *address > widths.max_address() {
                    return Err(crate::Error::SlotAddressOutOfRange {
                        address: *address,
                        address_width: widths.address_width,
                    });
                }
                Ok(*address)
            }
            SlotTarget::Location(location) => {
                if !location.fits(widths) {
                    let max = widths.max_location();
                    return Err(crate::Error::SlotLocationOutOfRange {
                        row: location.row,
                        bank: location.bank,
                        col: location.col,
                        max_row: max.row,
                        max_bank: max.bank,
                        max_col: max.col,
                    });
                }
                Ok(location.linearize(widths))
            }
        }
    }
}

/// One attack slot of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedSlot {
    /// What to hammer
    #[serde(flatten)]
    pub target: SlotTarget,
    /// Accesses per visit, ignored by the hardware from the tenth slot on
    #[serde(default = "default_frequency")]
    pub frequency: u32,
}

/// Timer assignment of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTimer {
    /// Timer index, 2 to 7
    pub index: u32,
    /// Cycles
    pub cycles: u32,
}

/// Pattern assignment of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPatterns {
    /// Pattern of all rows, or of the even rows in dual mode
    pub even: u32,
    /// Pattern of the odd rows
    pub odd: Option<u32>,
    /// Dual pattern mode
    #[serde(default)]
    pub dual: bool,
}

/// Complete configuration of a test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPlan {
    /// Attack sequence in order
    #[serde(default)]
    pub slots: Vec<PlannedSlot>,
    /// Timer assignments
    #[serde(default)]
    pub timers: Vec<PlannedTimer>,
    /// Write-fill patterns
    pub patterns: Option<PlannedPatterns>,
    /// Refresh while hammering
    pub refresh: Option<RefreshSettings>,
    /// Auto precharge while hammering
    pub auto_precharge: Option<bool>,
}

impl TestPlan {
    /// Loads and validates a plan from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or the plan is invalid.
    pub fn from_jsonfile<P: AsRef<Path>>(filepath: P) -> Result<TestPlan> {
        let mut file = File::open(filepath.as_ref())?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let plan: TestPlan = serde_json::from_str(&contents)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Checks slot count and timer indices.
    pub fn validate(&self) -> crate::Result<()> {
        if self.slots.len() > MAX_SLOTS as usize {
            return Err(crate::Error::InvalidSlotCount {
                count: self.slots.len() as u32,
            });
        }
        for timer in &self.timers {
            Timer::from_index(timer.index)?;
        }
        Ok(())
    }
}

impl<R: RegisterAccess> RhTest<R> {
    /// Applies `plan` to the hardware.
    ///
    /// The plan is validated before the first register access. The current attack
    /// sequence is then removed slot by slot and the planned slots are appended one
    /// at a time.
    ///
    /// # Errors
    ///
    /// Returns the first validation error; the hardware is untouched in that case.
    /// Slot targets are checked against the address widths read from the hardware.
    pub fn apply_plan(&mut self, plan: &TestPlan) -> crate::Result<()> {
        plan.validate()?;
        let widths = self.get_address_widths()?;
        let addresses = plan
            .slots
            .iter()
            .map(|slot| slot.target.address(&widths))
            .collect::<crate::Result<Vec<u32>>>()?;

        let mut removed = 0;
        while let PopOutcome::Removed { .. } = self.pop_slot() {
            removed += 1;
        }
        if removed > 0 {
            info!("Removed {} previously configured slots", removed);
        }
        for (slot, address) in plan.slots.iter().zip(addresses) {
            let order = self.push_slot(address, slot.frequency)?;
            if Timer::for_pair_of(order).is_none() && slot.frequency != 1 {
                warn!(
                    "Slot {} is beyond the frequency cap, frequency {} has no effect",
                    order, slot.frequency
                );
            }
        }

        for timer in &plan.timers {
            self.set_timer(timer.index, timer.cycles)?;
        }
        if let Some(patterns) = plan.patterns {
            self.set_pattern(patterns.even, 0)?;
            if let Some(odd) = patterns.odd {
                self.set_pattern(odd, 1)?;
            }
            self.set_dual_pattern(patterns.dual);
        }
        if let Some(refresh) = plan.refresh {
            self.set_refresh(refresh);
        }
        if let Some(auto_precharge) = plan.auto_precharge {
            self.set_auto_precharge(auto_precharge);
        }
        info!("Applied test plan with {} slots", plan.slots.len());
        Ok(())
    }
}

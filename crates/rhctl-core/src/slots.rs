//! Attack slot table.
//!
//! The engine hammers up to [`MAX_SLOTS`] addresses in slot order. The first
//! [`FREQ_CAP`] slots carry a configurable relative frequency and are grouped in pairs
//! that each own a pair timer; the remaining slots are hammered once per visit and
//! only count towards the whole-sequence cycle timer.

use log::{debug, info, warn};
use serde::Serialize;

use crate::addr::DramAddr;
use crate::controller::RhTest;
use crate::csr::{Csr, RegisterAccess};
use crate::error::{Error, Result};
use crate::handshake::{Channel, Direction};
use crate::timing::Timer;

/// Number of attack slots of the engine.
pub const MAX_SLOTS: u32 = 20;

/// Slots below this order have a configurable frequency.
pub const FREQ_CAP: u32 = 10;

/// Selector value addressing the slot count instead of a slot.
pub const COUNT_SELECTOR: u32 = 20;

/// Frequency of slots at or above [`FREQ_CAP`].
pub const IMPLICIT_FREQUENCY: u32 = 1;

/// One (address, frequency) pair of the attack sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttackSlot {
    /// Position in the attack sequence
    pub order: u32,
    /// Engine address to hammer
    pub address: u32,
    /// Accesses per visit
    pub frequency: u32,
}

impl AttackSlot {
    /// Whether the hardware honours the frequency of this slot.
    pub fn has_configurable_frequency(&self) -> bool {
        self.order < FREQ_CAP
    }
}

/// Outcome of [`RhTest::pop_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PopOutcome {
    /// The last slot was removed
    Removed {
        /// Slots left after the removal
        remaining: u32,
    },
    /// The table was already empty; nothing changed
    NothingToPop,
}

/// Cycle count of one pair timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PairTimerReading {
    /// The timer
    pub timer: Timer,
    /// Cycles spent on the pair
    pub cycles: u32,
}

/// One configured slot as shown by [`RhTest::list_slots`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotEntry {
    /// The slot
    pub slot: AttackSlot,
    /// Decoded location of the slot address
    pub location: DramAddr,
    /// Pair timer, attached to the second slot of a pair
    pub pair_timer: Option<PairTimerReading>,
}

/// Snapshot of the attack slot table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotListing {
    /// Configured slots in order
    pub entries: Vec<SlotEntry>,
    /// Pair timers of pairs without configured slots
    pub unused_pair_timers: Vec<PairTimerReading>,
    /// Cycles the whole sequence is repeated
    pub cycle_timer: u32,
}

impl SlotListing {
    /// Number of configured slots.
    pub fn count(&self) -> u32 {
        self.entries.len() as u32
    }
}

impl<R: RegisterAccess> RhTest<R> {
    /// Reads the number of configured slots from the hardware.
    pub fn get_slot_count(&mut self) -> u32 {
        self.transfer(Channel::AttackSlot, COUNT_SELECTOR, &[], Direction::Get);
        self.read(Csr::AddrToSetFreqOut)
    }

    /// Writes the number of configured slots.
    ///
    /// Slot registers are left untouched; shrinking keeps stale values around until
    /// the slot is configured again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSlotCount`] for counts above [`MAX_SLOTS`].
    pub fn set_slot_count(&mut self, count: u32) -> Result<()> {
        if count > MAX_SLOTS {
            return Err(Error::InvalidSlotCount { count });
        }
        self.transfer(
            Channel::AttackSlot,
            COUNT_SELECTOR,
            &[(Csr::AddrToSetFreq, count)],
            Direction::Set,
        );
        Ok(())
    }

    /// Reads slot `order`.
    ///
    /// Slots at or above [`FREQ_CAP`] report the implicit frequency of 1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSlotOrder`] if `order` is not a configured slot.
    pub fn get_slot(&mut self, order: u32) -> Result<AttackSlot> {
        let count = self.get_slot_count();
        if order >= count || order >= MAX_SLOTS {
            return Err(Error::InvalidSlotOrder { order, count });
        }
        Ok(self.fetch_slot(order))
    }

    fn fetch_slot(&mut self, order: u32) -> AttackSlot {
        self.transfer(Channel::AttackSlot, order, &[], Direction::Get);
        let address = self.read(Csr::AddrToSetValOut);
        let frequency = if order < FREQ_CAP {
            self.read(Csr::AddrToSetFreqOut)
        } else {
            IMPLICIT_FREQUENCY
        };
        AttackSlot {
            order,
            address,
            frequency,
        }
    }

    /// Configures slot `order` with `address` and `frequency`.
    ///
    /// `current_count` is the slot count the caller last observed. Orders below it
    /// modify an existing slot, `order == current_count` appends a new one.
    /// The frequency is only written for orders below [`FREQ_CAP`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSlotOrder`] without touching the hardware if `order`
    /// is above `current_count` or not below [`MAX_SLOTS`].
    pub fn configure_slot(
        &mut self,
        order: u32,
        address: u32,
        frequency: u32,
        current_count: u32,
    ) -> Result<()> {
        if order > current_count || order >= MAX_SLOTS {
            warn!(
                "Rejecting slot order {} with {} slots configured",
                order, current_count
            );
            return Err(Error::InvalidSlotOrder {
                order,
                count: current_count,
            });
        }
        if order == current_count {
            self.set_slot_count(current_count + 1)?;
        }

        let mut values = vec![(Csr::AddrToSetVal, address)];
        // Hardware ignores the frequency above the cap; only write it below.
        if order < FREQ_CAP {
            values.push((Csr::AddrToSetFreq, frequency));
        }
        self.transfer(Channel::AttackSlot, order, &values, Direction::Set);
        debug!(
            "Configured slot {} with address 0x{:07x}, frequency {}",
            order, address, frequency
        );
        Ok(())
    }

    /// Appends a slot after the last configured one and returns its order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSlotOrder`] if the table is full.
    pub fn push_slot(&mut self, address: u32, frequency: u32) -> Result<u32> {
        let count = self.get_slot_count();
        self.configure_slot(count, address, frequency, count)?;
        Ok(count)
    }

    /// Removes the last slot of the attack sequence.
    pub fn pop_slot(&mut self) -> PopOutcome {
        let count = self.get_slot_count();
        if count == 0 {
            info!("No addresses to pop");
            return PopOutcome::NothingToPop;
        }
        let remaining = count - 1;
        self.transfer(
            Channel::AttackSlot,
            COUNT_SELECTOR,
            &[(Csr::AddrToSetFreq, remaining)],
            Direction::Set,
        );
        info!("Number of addresses: {}", remaining);
        PopOutcome::Removed { remaining }
    }

    /// Reads the complete attack sequence with pair and cycle timers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptSlotCount`] if the hardware reports more than
    /// [`MAX_SLOTS`] slots.
    pub fn list_slots(&mut self) -> Result<SlotListing> {
        let count = self.get_slot_count();
        if count > MAX_SLOTS {
            return Err(Error::CorruptSlotCount { count });
        }
        let widths = self.get_address_widths()?;

        let mut entries = Vec::with_capacity(count as usize);
        for order in 0..count {
            let slot = self.fetch_slot(order);
            let pair_timer = Timer::closing_pair(order).map(|timer| self.read_pair_timer(timer));
            entries.push(SlotEntry {
                slot,
                location: widths.decode(slot.address),
                pair_timer,
            });
        }

        let mut unused_pair_timers = vec![];
        for order in count..FREQ_CAP {
            if let Some(timer) = Timer::closing_pair(order) {
                unused_pair_timers.push(self.read_pair_timer(timer));
            }
        }
        let cycle_timer = self.read_timer(Timer::Cycle);

        Ok(SlotListing {
            entries,
            unused_pair_timers,
            cycle_timer,
        })
    }

    fn read_pair_timer(&mut self, timer: Timer) -> PairTimerReading {
        PairTimerReading {
            timer,
            cycles: self.read_timer(timer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::tests::RecordingBus;
    use crate::sim::{SimConfig, SimHardware};

    fn rh() -> RhTest<SimHardware> {
        RhTest::new(SimHardware::new(SimConfig::default()))
    }

    #[test]
    fn test_configure_then_get() {
        let mut rh = rh();
        rh.configure_slot(0, 0x1000, 3, 0).unwrap();
        assert_eq!(rh.get_slot_count(), 1);
        assert_eq!(
            rh.get_slot(0).unwrap(),
            AttackSlot {
                order: 0,
                address: 0x1000,
                frequency: 3
            }
        );
    }

    #[test]
    fn test_frequency_ignored_above_cap() {
        let mut rh = rh();
        for order in 0..12 {
            rh.configure_slot(order, 0x100 * order, 7, order).unwrap();
        }
        assert_eq!(rh.get_slot(9).unwrap().frequency, 7);
        let slot = rh.get_slot(11).unwrap();
        assert_eq!(slot.address, 0xb00);
        assert_eq!(slot.frequency, IMPLICIT_FREQUENCY);
        assert!(!slot.has_configurable_frequency());
    }

    #[test]
    fn test_frequency_not_written_above_cap() {
        let mut rh = RhTest::new(RecordingBus::new(0));
        rh.configure_slot(12, 0x1234, 9, 15).unwrap();
        let writes = rh.regs().writes();
        assert!(writes.contains(&(Csr::AddrToSetVal, 0x1234)));
        assert!(!writes.iter().any(|(reg, _)| *reg == Csr::AddrToSetFreq));
        assert!(writes.contains(&(Csr::AddrToSetSelVal, 12)));
    }

    #[test]
    fn test_reject_gap() {
        let mut rh = rh();
        rh.configure_slot(0, 0x1000, 1, 0).unwrap();
        assert_eq!(
            rh.configure_slot(2, 0x2000, 1, 1),
            Err(Error::InvalidSlotOrder { order: 2, count: 1 })
        );
        assert_eq!(rh.get_slot_count(), 1);
    }

    #[test]
    fn test_reject_touches_no_register() {
        let mut rh = RhTest::new(RecordingBus::new(0));
        assert!(rh.configure_slot(20, 0x1000, 1, 20).is_err());
        assert!(rh.regs().ops.is_empty());
    }

    #[test]
    fn test_pop() {
        let mut rh = rh();
        assert_eq!(rh.pop_slot(), PopOutcome::NothingToPop);
        assert_eq!(rh.get_slot_count(), 0);
        rh.push_slot(0x1000, 2).unwrap();
        rh.push_slot(0x2000, 2).unwrap();
        assert_eq!(rh.pop_slot(), PopOutcome::Removed { remaining: 1 });
        assert_eq!(rh.get_slot_count(), 1);
        assert!(rh.get_slot(1).is_err());
    }

    #[test]
    fn test_pop_keeps_stale_slot() {
        let mut rh = rh();
        rh.push_slot(0x1000, 2).unwrap();
        rh.push_slot(0x2000, 4).unwrap();
        rh.pop_slot();
        // re-growing through the raw count exposes the previous contents
        rh.set_slot_count(2).unwrap();
        assert_eq!(rh.get_slot(1).unwrap().address, 0x2000);
    }

    #[test]
    fn test_set_slot_count_bounds() {
        let mut rh = rh();
        assert_eq!(
            rh.set_slot_count(21),
            Err(Error::InvalidSlotCount { count: 21 })
        );
        assert!(rh.set_slot_count(20).is_ok());
    }

    #[test]
    fn test_list_two_slots() {
        let mut rh = rh();
        rh.configure_slot(0, 0x1000, 3, 0).unwrap();
        rh.configure_slot(1, 0x2000, 5, 1).unwrap();
        let listing = rh.list_slots().unwrap();
        assert_eq!(listing.count(), 2);
        assert_eq!(listing.entries[0].slot.address, 0x1000);
        assert_eq!(listing.entries[0].slot.frequency, 3);
        assert_eq!(listing.entries[0].pair_timer, None);
        assert_eq!(listing.entries[1].slot.address, 0x2000);
        assert_eq!(listing.entries[1].slot.frequency, 5);
        assert_eq!(
            listing.entries[1].pair_timer.map(|t| t.timer),
            Some(Timer::Pair(1))
        );
        assert_eq!(
            listing
                .unused_pair_timers
                .iter()
                .map(|t| t.timer)
                .collect::<Vec<_>>(),
            vec![Timer::Pair(2), Timer::Pair(3), Timer::Pair(4), Timer::Pair(5)]
        );
    }

    #[test]
    fn test_list_beyond_cap() {
        let mut rh = rh();
        for order in 0..13 {
            rh.push_slot(0x2000 + order, 2).unwrap();
        }
        let listing = rh.list_slots().unwrap();
        assert_eq!(listing.count(), 13);
        assert!(listing.unused_pair_timers.is_empty());
        let timers = listing
            .entries
            .iter()
            .filter(|e| e.pair_timer.is_some())
            .count();
        assert_eq!(timers, 5);
        assert!(listing.entries[10..].iter().all(|e| e.pair_timer.is_none()
            && e.slot.frequency == IMPLICIT_FREQUENCY));
    }

    #[test]
    fn test_list_decodes_location() {
        let mut rh = rh();
        let widths = rh.get_address_widths().unwrap();
        let addr = DramAddr::new(17, 2, 5).linearize(&widths);
        rh.push_slot(addr, 1).unwrap();
        let listing = rh.list_slots().unwrap();
        assert_eq!(listing.entries[0].location, DramAddr::new(17, 2, 5));
    }

    #[test]
    fn test_list_corrupt_count() {
        let mut bus = RecordingBus::new(1);
        bus.values.insert(Csr::AddrToSetFreqOut, 25);
        let mut rh = RhTest::new(bus);
        assert_eq!(
            rh.list_slots(),
            Err(Error::CorruptSlotCount { count: 25 })
        );
    }
}

//! Behavioural model of the engine.
//!
//! [`SimHardware`] implements [`RegisterAccess`] on top of an in-memory register file
//! and a model of the engine's state machines. Time is measured in register reads:
//! every read advances the model by one tick, so busy-wait loops make progress without
//! a clock. Memory contents are not stored; the model only tracks which addresses hold
//! flipped bits and reports them the way the engine does.

mod fsm;

use log::{trace, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::addr::{extract_row, low_mask};
use crate::csr::{Csr, RegisterAccess};
use crate::orchestrator::{FeedbackState, Phase, ReadStage};
use crate::pattern::PatternSlot;
use crate::slots::{COUNT_SELECTOR, FREQ_CAP, IMPLICIT_FREQUENCY, MAX_SLOTS};
use crate::timing::{MAX_TIMER_INDEX, MIN_TIMER_INDEX, Timer};

use fsm::TestFsm;

/// Parameters of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Address width reported by the hardware
    pub address_width: u32,
    /// Bank width reported by the hardware
    pub bank_width: u32,
    /// Column width reported by the hardware
    pub column_width: u32,
    /// Data width reported by the hardware
    pub data_width: u32,
    /// Reset value of the refresh rate register
    pub refresh_rate: u32,
    /// Ticks before a handshake readback follows its flag
    pub ack_latency: u32,
    /// Ticks spent in the fill, read check and settings phases
    pub phase_ticks: u32,
    /// Probability of a bit flip in each row adjacent to an attack slot
    pub flip_probability: f64,
    /// Seed of the bit flip generator
    pub seed: u64,
    /// Faults that show up regardless of the attack
    pub faults: Vec<InjectedFault>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            address_width: 24,
            bank_width: 3,
            column_width: 10,
            data_width: 128,
            refresh_rate: 782,
            ack_latency: 2,
            phase_ticks: 4,
            flip_probability: 0.0,
            seed: 0,
            faults: vec![],
        }
    }
}

impl SimConfig {
    /// Loads a model configuration from a JSON file; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_jsonfile<P: AsRef<Path>>(filepath: P) -> crate::plan::Result<SimConfig> {
        let mut file = File::open(filepath.as_ref())?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: SimConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }
}

/// A bit flip the model reports at a given read check.
///
/// Faults injected for the initial check persist and are reported again after
/// hammering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedFault {
    /// Read check at which the flip is first visible
    pub stage: ReadStage,
    /// Engine address of the flip
    pub address: u32,
    /// Data word holding the flipped bits
    #[serde(default)]
    pub word: usize,
    /// Flipped bits of the word
    pub mask: u32,
}

/// Readback register that follows its flag after a fixed latency.
#[derive(Debug)]
struct FlagMirror {
    latency: u32,
    pending: u32,
    level: bool,
}

impl FlagMirror {
    fn new(latency: u32) -> Self {
        Self {
            latency,
            pending: 0,
            level: false,
        }
    }

    /// Advances one tick towards `flag`; returns the new level when it changes.
    fn follow(&mut self, flag: bool) -> Option<bool> {
        if flag == self.level {
            self.pending = 0;
            return None;
        }
        if self.pending < self.latency {
            self.pending += 1;
            return None;
        }
        self.pending = 0;
        self.level = flag;
        Some(flag)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotRegs {
    address: u32,
    frequency: u32,
}

/// Register file and configuration storage of the engine.
#[derive(Debug)]
struct Engine {
    regs: HashMap<Csr, u32>,
    slots: [SlotRegs; MAX_SLOTS as usize],
    slot_count: u32,
    patterns: [u32; 2],
    timers: [u32; (MAX_TIMER_INDEX - MIN_TIMER_INDEX + 1) as usize],
    address_mask: u32,
}

impl Engine {
    fn new(config: &SimConfig) -> Self {
        let mut regs = HashMap::new();
        regs.insert(Csr::AddressWidth, config.address_width);
        regs.insert(Csr::BankWidth, config.bank_width);
        regs.insert(Csr::ColWidth, config.column_width);
        regs.insert(Csr::DataWidth, config.data_width);
        regs.insert(Csr::RefreshEnable, 1);
        regs.insert(Csr::RefreshRate, config.refresh_rate);
        regs.insert(Csr::RowhammerStateCycleCounter, 1);
        regs.insert(Csr::RowhammerStateCycleCounterValOutput, 1);
        regs.insert(Csr::FeedbackState, Phase::Idle.mask());
        Self {
            regs,
            slots: [SlotRegs {
                address: 0,
                frequency: IMPLICIT_FREQUENCY,
            }; MAX_SLOTS as usize],
            slot_count: 0,
            patterns: [0; 2],
            timers: [1; (MAX_TIMER_INDEX - MIN_TIMER_INDEX + 1) as usize],
            address_mask: low_mask(config.address_width),
        }
    }

    fn get(&self, reg: Csr) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    fn set(&mut self, reg: Csr, value: u32) {
        self.regs.insert(reg, value);
    }

    fn flag(&self, reg: Csr) -> bool {
        self.get(reg) != 0
    }

    fn timer(&self, timer: Timer) -> u32 {
        self.timers[(timer.index() - MIN_TIMER_INDEX) as usize]
    }

    fn attack_addresses(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .take(self.slot_count.min(MAX_SLOTS) as usize)
            .map(|slot| slot.address)
    }

    /// Expected data word of `address` after the write fill.
    fn expected_word(&self, address: u32, config: &SimConfig) -> u32 {
        let row = extract_row(address, config.bank_width, config.column_width);
        let slot = PatternSlot::for_row(row, self.flag(Csr::InputDataDoublePatternSetting));
        self.patterns[slot.selector() as usize]
    }

    fn attack_transfer(&mut self) {
        let selector = self.get(Csr::AddrToSetSelVal);
        let set = self.flag(Csr::AddrToSetSetNotGet);
        trace!("attack slot transfer, selector {}, set {}", selector, set);
        match (selector, set) {
            (COUNT_SELECTOR, true) => self.slot_count = self.get(Csr::AddrToSetFreq),
            (COUNT_SELECTOR, false) => self.set(Csr::AddrToSetFreqOut, self.slot_count),
            (order, true) if order < MAX_SLOTS => {
                // the slot registers are only `address_width` bits wide
                let address = self.get(Csr::AddrToSetVal) & self.address_mask;
                let frequency = self.get(Csr::AddrToSetFreq);
                let slot = &mut self.slots[order as usize];
                slot.address = address;
                if order < FREQ_CAP {
                    slot.frequency = frequency;
                }
            }
            (order, false) if order < MAX_SLOTS => {
                let slot = self.slots[order as usize];
                self.set(Csr::AddrToSetValOut, slot.address);
                let frequency = if order < FREQ_CAP {
                    slot.frequency
                } else {
                    IMPLICIT_FREQUENCY
                };
                self.set(Csr::AddrToSetFreqOut, frequency);
            }
            _ => warn!("attack slot selector {} out of range", selector),
        }
    }

    fn data_transfer(&mut self) {
        let selector = self.get(Csr::InputDataSelVal);
        let set = self.flag(Csr::InputDataSetNotGet);
        trace!("input data transfer, selector {}, set {}", selector, set);
        match (selector, set) {
            (0 | 1, true) => self.patterns[selector as usize] = self.get(Csr::InputDataPattern),
            (0 | 1, false) => {
                self.set(Csr::InputDataPatternOutput, self.patterns[selector as usize])
            }
            (MIN_TIMER_INDEX..=MAX_TIMER_INDEX, true) => {
                self.timers[(selector - MIN_TIMER_INDEX) as usize] =
                    self.get(Csr::RowhammerStateCycleCounter)
            }
            (MIN_TIMER_INDEX..=MAX_TIMER_INDEX, false) => self.set(
                Csr::RowhammerStateCycleCounterValOutput,
                self.timers[(selector - MIN_TIMER_INDEX) as usize],
            ),
            _ => warn!("input data selector {} out of range", selector),
        }
    }
}

/// Simulated row-hammer test engine.
///
/// # Examples
///
/// ```
/// use rhctl_core::RhTest;
/// use rhctl_core::orchestrator::{ReadStage, TestEvent};
/// use rhctl_core::sim::{InjectedFault, SimConfig, SimHardware};
///
/// let mut sim = SimHardware::new(SimConfig::default());
/// sim.inject_fault(InjectedFault {
///     stage: ReadStage::AfterHammer,
///     address: 0x2400,
///     word: 0,
///     mask: 0x10,
/// });
/// let mut rh = RhTest::new(sim);
/// rh.push_slot(0x2000, 4).unwrap();
/// let report = rh.run_test(&mut |_: &TestEvent| {}).unwrap();
/// assert_eq!(report.hammer_errors(), 1);
/// ```
#[derive(Debug)]
pub struct SimHardware {
    config: SimConfig,
    engine: Engine,
    fsm: TestFsm,
    attack_ack: FlagMirror,
    data_ack: FlagMirror,
    error_ack: FlagMirror,
    start_ack: FlagMirror,
    rng: StdRng,
    ticks: u64,
}

impl SimHardware {
    /// Creates a model in its reset state.
    pub fn new(config: SimConfig) -> Self {
        let latency = config.ack_latency;
        Self {
            engine: Engine::new(&config),
            fsm: TestFsm::new(),
            attack_ack: FlagMirror::new(latency),
            data_ack: FlagMirror::new(latency),
            error_ack: FlagMirror::new(latency),
            start_ack: FlagMirror::new(latency),
            rng: StdRng::seed_from_u64(config.seed),
            ticks: 0,
            config,
        }
    }

    /// Model parameters.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Adds a fault that shows up at the read check of `fault.stage`.
    pub fn inject_fault(&mut self, fault: InjectedFault) {
        self.config.faults.push(fault);
    }

    /// Register reads served so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Current feedback register value, without advancing the model.
    pub fn feedback(&self) -> FeedbackState {
        FeedbackState(self.engine.get(Csr::FeedbackState))
    }

    /// Addresses currently holding flipped bits, in ascending order.
    pub fn corrupted_addresses(&self) -> Vec<u32> {
        self.fsm.corrupted_addresses()
    }

    fn tick(&mut self) {
        self.ticks += 1;

        if let Some(true) = self.attack_ack.follow(self.engine.flag(Csr::AddrToSetStartFsm)) {
            self.engine.attack_transfer();
        }
        self.engine
            .set(Csr::AddrToSetStartPrev, self.attack_ack.level as u32);

        if let Some(true) = self.data_ack.follow(self.engine.flag(Csr::InputDataToSetStartFsm)) {
            self.engine.data_transfer();
        }
        self.engine
            .set(Csr::InputDataSetStartPrev, self.data_ack.level as u32);

        if let Some(true) = self.error_ack.follow(self.engine.flag(Csr::ErrorAck)) {
            self.fsm.acknowledge_error(&mut self.engine, &self.config);
        }
        self.engine.set(Csr::ErrorAckPrev, self.error_ack.level as u32);

        self.start_ack.follow(self.engine.flag(Csr::RowhammerStartFsm));
        self.engine
            .set(Csr::RowhammerStartPrevFsm, self.start_ack.level as u32);

        self.fsm.step(
            &mut self.engine,
            &self.config,
            &mut self.rng,
            self.start_ack.level,
        );
    }
}

impl RegisterAccess for SimHardware {
    fn read(&mut self, reg: Csr) -> u32 {
        self.tick();
        let value = self.engine.get(reg);
        trace!("read {} = {:#x}", reg, value);
        value
    }

    fn write(&mut self, reg: Csr, value: u32) {
        trace!("write {} = {:#x}", reg, value);
        if reg.is_storage() {
            self.engine.set(reg, value);
        } else {
            warn!("Ignoring write to status register {}", reg);
        }
    }

    fn relax(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{Channel, Direction, select_and_transfer};

    #[test]
    fn test_mirror_latency() {
        let mut mirror = FlagMirror::new(2);
        assert_eq!(mirror.follow(true), None);
        assert_eq!(mirror.follow(true), None);
        assert_eq!(mirror.follow(true), Some(true));
        assert_eq!(mirror.follow(true), None);
        assert_eq!(mirror.follow(false), None);
        assert_eq!(mirror.follow(true), None);
        assert!(mirror.level);
    }

    #[test]
    fn test_status_registers_read_only() {
        let mut sim = SimHardware::new(SimConfig::default());
        sim.write(Csr::DataWidth, 8);
        assert_eq!(sim.read(Csr::DataWidth), 128);
    }

    #[test]
    fn test_reads_advance_model() {
        let mut sim = SimHardware::new(SimConfig::default());
        sim.write(Csr::RowhammerStartFsm, 1);
        let polls = crate::handshake::wait_for(&mut sim, Csr::RowhammerStartPrevFsm, true);
        assert_eq!(polls, 3);
        assert_eq!(sim.ticks(), 3);
        assert_eq!(sim.feedback().phase(), Phase::WriteFillInit);
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: SimConfig =
            serde_json::from_str(r#"{ "data_width": 256, "seed": 7 }"#).unwrap();
        assert_eq!(config.data_width, 256);
        assert_eq!(config.seed, 7);
        assert_eq!(config.address_width, 24);
        assert!(config.faults.is_empty());
    }

    #[test]
    fn test_slot_address_truncated_to_width() {
        let mut sim = SimHardware::new(SimConfig::default());
        assert_eq!(sim.config().address_width, 24);
        select_and_transfer(
            &mut sim,
            Channel::AttackSlot,
            0,
            &[(Csr::AddrToSetVal, 0x0200_0400), (Csr::AddrToSetFreq, 3)],
            Direction::Set,
        );
        select_and_transfer(&mut sim, Channel::AttackSlot, 0, &[], Direction::Get);
        assert_eq!(sim.read(Csr::AddrToSetValOut), 0x400);
        assert_eq!(sim.read(Csr::AddrToSetFreqOut), 3);
    }
}

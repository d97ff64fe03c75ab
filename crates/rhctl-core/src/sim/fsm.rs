use log::{debug, info};
use rand::Rng;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, VecDeque};

use super::{Engine, SimConfig};
use crate::addr::{AddressWidths, DramAddr, low_mask};
use crate::csr::{Csr, DATA_WORD_BITS};
use crate::orchestrator::{Phase, ReadStage, data_words_for};
use crate::slots::MAX_SLOTS;
use crate::timing::Timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Fill,
    ReadCheck,
    SendErrors,
    ReadFinish,
    InitSettings,
    Attack,
    ResetSettings,
    FinalCheck,
}

/// Sub-steps of presenting one error record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorStep {
    Request,
    Receive,
    Display,
}

/// Test state machine: fill, check, hammer, check again.
#[derive(Debug)]
pub(super) struct TestFsm {
    stage: Stage,
    elapsed: u32,
    before_after: ReadStage,
    /// Flip masks of corrupted addresses, one entry per data word
    corrupted: BTreeMap<u32, Vec<u32>>,
    pending_errors: VecDeque<u32>,
    error_step: ErrorStep,
    attack_slot: u32,
    cycles_left: u32,
}

impl TestFsm {
    pub(super) fn new() -> Self {
        Self {
            stage: Stage::Idle,
            elapsed: 0,
            before_after: ReadStage::Initial,
            corrupted: BTreeMap::new(),
            pending_errors: VecDeque::new(),
            error_step: ErrorStep::Request,
            attack_slot: 0,
            cycles_left: 0,
        }
    }

    pub(super) fn corrupted_addresses(&self) -> Vec<u32> {
        self.corrupted.keys().copied().collect()
    }

    /// Advances the state machine by one tick; `start` is the armed flag.
    pub(super) fn step(
        &mut self,
        engine: &mut Engine,
        config: &SimConfig,
        rng: &mut StdRng,
        start: bool,
    ) {
        self.elapsed += 1;
        let phase_done = self.elapsed >= config.phase_ticks;
        let next = match self.stage {
            Stage::Idle if start => {
                info!("Engine armed, filling memory");
                self.corrupted.clear();
                Some(Stage::Fill)
            }
            Stage::Idle => None,
            Stage::Fill if phase_done => {
                self.before_after = ReadStage::Initial;
                engine.set(Csr::BeforeAfterRh, 0);
                self.apply_faults(ReadStage::Initial, config);
                Some(Stage::ReadCheck)
            }
            Stage::ReadCheck if phase_done => {
                engine.set(Csr::RowhammerErrCnt, self.corrupted.len() as u32);
                if self.corrupted.is_empty() {
                    Some(Stage::ReadFinish)
                } else {
                    self.pending_errors = self.corrupted.keys().copied().collect();
                    self.error_step = ErrorStep::Request;
                    Some(Stage::SendErrors)
                }
            }
            Stage::SendErrors => {
                match self.error_step {
                    ErrorStep::Request => self.error_step = ErrorStep::Receive,
                    ErrorStep::Receive => {
                        self.present_error(engine, config);
                        self.error_step = ErrorStep::Display;
                    }
                    ErrorStep::Display => {}
                }
                None
            }
            Stage::ReadFinish => match self.before_after {
                ReadStage::Initial => Some(Stage::InitSettings),
                ReadStage::AfterHammer => Some(Stage::FinalCheck),
            },
            Stage::InitSettings if phase_done => {
                if engine.slot_count == 0 {
                    debug!("No attack slots configured, skipping the attack");
                    Some(Stage::ResetSettings)
                } else {
                    self.attack_slot = 0;
                    self.cycles_left = engine.timer(Timer::Cycle).max(1);
                    Some(Stage::Attack)
                }
            }
            Stage::Attack => {
                let count = engine.slot_count.clamp(1, MAX_SLOTS);
                self.attack_slot += 1;
                if self.attack_slot >= count {
                    self.attack_slot = 0;
                    self.cycles_left -= 1;
                }
                (self.cycles_left == 0).then_some(Stage::ResetSettings)
            }
            Stage::ResetSettings if phase_done => {
                self.before_after = ReadStage::AfterHammer;
                engine.set(Csr::BeforeAfterRh, 1);
                engine.set(Csr::RowhammerErrCnt, 0);
                self.apply_faults(ReadStage::AfterHammer, config);
                self.hammer_neighbours(engine, config, rng);
                Some(Stage::ReadCheck)
            }
            Stage::FinalCheck if !start => {
                info!("Engine disarmed");
                Some(Stage::Idle)
            }
            _ => None,
        };
        if let Some(stage) = next {
            self.stage = stage;
            self.elapsed = 0;
        }
        engine.set(Csr::FeedbackState, self.feedback(config));
    }

    /// Handles a rising edge of the error acknowledge readback.
    pub(super) fn acknowledge_error(&mut self, engine: &mut Engine, config: &SimConfig) {
        if self.stage != Stage::SendErrors || self.error_step != ErrorStep::Display {
            return;
        }
        engine.set(Csr::ErrorFoundFlag, 0);
        self.pending_errors.pop_front();
        if self.pending_errors.is_empty() {
            self.stage = Stage::ReadFinish;
            self.elapsed = 0;
        } else {
            self.error_step = ErrorStep::Request;
        }
        engine.set(Csr::FeedbackState, self.feedback(config));
    }

    fn feedback(&self, config: &SimConfig) -> u32 {
        let progress = (self.elapsed * 3 / config.phase_ticks.max(1)).min(2);
        match self.stage {
            Stage::Idle => Phase::Idle.mask(),
            Stage::Fill => Phase::WriteFillInit.mask() | progress,
            Stage::ReadCheck => Phase::ReadCheck.mask() | progress,
            Stage::SendErrors => Phase::ReadSendErrors.mask() | self.error_step as u32,
            Stage::ReadFinish => Phase::ReadCheck.mask() | 3,
            Stage::InitSettings => Phase::InitSettings.mask(),
            Stage::Attack => Phase::Rowhammering.mask() | self.attack_slot,
            Stage::ResetSettings => Phase::ResetSettings.mask(),
            Stage::FinalCheck => Phase::FinalCheck.mask(),
        }
    }

    fn words(config: &SimConfig) -> usize {
        data_words_for(config.data_width).max(1)
    }

    fn flip(&mut self, address: u32, word: usize, mask: u32, config: &SimConfig) {
        let words = Self::words(config);
        let masks = self
            .corrupted
            .entry(address)
            .or_insert_with(|| vec![0; words]);
        masks[word] |= mask;
    }

    fn apply_faults(&mut self, stage: ReadStage, config: &SimConfig) {
        let words = Self::words(config);
        for fault in config.faults.iter().filter(|fault| fault.stage == stage) {
            if fault.mask == 0 || fault.word >= words {
                debug!("Skipping fault {:?}, no visible bits", fault);
                continue;
            }
            self.flip(fault.address, fault.word, fault.mask, config);
        }
    }

    /// Flips random bits in the rows next to each attack slot.
    fn hammer_neighbours(&mut self, engine: &Engine, config: &SimConfig, rng: &mut StdRng) {
        if config.flip_probability.is_nan() || config.flip_probability <= 0.0 {
            return;
        }
        let Ok(widths) =
            AddressWidths::new(config.address_width, config.bank_width, config.column_width)
        else {
            return;
        };
        let probability = config.flip_probability.min(1.0);
        let max_row = low_mask(widths.row_width());
        let targets: Vec<u32> = engine.attack_addresses().collect();
        for address in targets {
            let aggressor = widths.decode(address);
            let neighbours = [aggressor.row.checked_sub(1), aggressor.row.checked_add(1)];
            for row in neighbours.into_iter().flatten() {
                if row > max_row || !rng.random_bool(probability) {
                    continue;
                }
                let col = rng.random_range(0..=low_mask(widths.column_width));
                let victim = DramAddr::new(row, aggressor.bank, col).linearize(&widths);
                let word = rng.random_range(0..Self::words(config));
                let bit = rng.random_range(0..DATA_WORD_BITS);
                debug!("Flipping bit {} of word {} at {}", bit, word, victim);
                self.flip(victim, word, 1 << bit, config);
            }
        }
    }

    fn present_error(&self, engine: &mut Engine, config: &SimConfig) {
        let Some(&address) = self.pending_errors.front() else {
            return;
        };
        let expected = engine.expected_word(address, config);
        engine.set(Csr::Address, address);
        if let Some(masks) = self.corrupted.get(&address) {
            for (reg, mask) in Csr::data_outputs().zip(masks) {
                engine.set(reg, expected ^ mask);
            }
        }
        engine.set(Csr::ErrorFoundFlag, 1);
    }
}

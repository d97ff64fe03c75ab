//! Driving a complete row-hammer test run.
//!
//! A run arms the hardware state machine, follows it through its phases by polling
//! the feedback register and drains the error records it presents after each read
//! check. The engine fills the memory, checks it once before hammering (to catch
//! cells that are broken regardless of the attack), hammers the configured slots and
//! checks the memory again.
//!
//! The caller observes the run through [`TestEvent`]s; [`RhTest::run_test`] does not
//! print anything itself.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::addr::{AddressWidths, DramAddr};
use crate::controller::RhTest;
use crate::csr::{Csr, DATA_OUTPUT_REGS, DATA_WORD_BITS, RegisterAccess};
use crate::error::Result;
use crate::handshake::{drive_and_wait, pulse};

/// Phase of the hardware test state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    /// Waiting to be armed
    Idle,
    /// Writing the pattern to the whole memory
    WriteFillInit,
    /// Reading the memory back and counting errors
    ReadCheck,
    /// Presenting error records one at a time
    ReadSendErrors,
    /// Applying attack settings
    InitSettings,
    /// Hammering the attack slots
    Rowhammering,
    /// Restoring refresh and precharge settings
    ResetSettings,
    /// Run finished, waiting to be disarmed
    FinalCheck,
    /// No known phase bit set
    Unknown,
}

/// Phase bits of the feedback register in the order they are tested.
pub const PHASE_PRIORITY: [(u32, Phase); 8] = [
    (0x8000, Phase::FinalCheck),
    (0x0200, Phase::WriteFillInit),
    (0x0400, Phase::ReadCheck),
    (0x0800, Phase::ReadSendErrors),
    (0x1000, Phase::InitSettings),
    (0x2000, Phase::Rowhammering),
    (0x4000, Phase::ResetSettings),
    (0x0100, Phase::Idle),
];

impl Phase {
    /// Feedback register bit of the phase, 0 for [`Phase::Unknown`].
    pub fn mask(self) -> u32 {
        PHASE_PRIORITY
            .iter()
            .find(|(_, phase)| *phase == self)
            .map_or(0, |(mask, _)| *mask)
    }

    /// Short human-readable description.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::WriteFillInit => "Filling memory with data",
            Phase::ReadCheck => "Reading/Checking memory for errors",
            Phase::ReadSendErrors => "Sending errors",
            Phase::InitSettings => "Readying for Row Hammer Attack",
            Phase::Rowhammering => "Running Row Hammer Attack",
            Phase::ResetSettings => "Resetting after rowhammer attack",
            Phase::FinalCheck => "Row hammer test executed",
            Phase::Unknown => "Value of test feedback state",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Raw value of the feedback register.
///
/// Phase bits are not mutually exclusive in representation; [`FeedbackState::phase`]
/// resolves them in the fixed order of [`PHASE_PRIORITY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FeedbackState(pub u32);

impl FeedbackState {
    /// First phase of [`PHASE_PRIORITY`] whose bit is set.
    pub fn phase(&self) -> Phase {
        PHASE_PRIORITY
            .iter()
            .find(|(mask, _)| self.0 & mask == *mask)
            .map_or(Phase::Unknown, |(_, phase)| *phase)
    }

    /// Whether the bit of `phase` is set, regardless of priority.
    pub fn contains(&self, phase: Phase) -> bool {
        let mask = phase.mask();
        mask != 0 && self.0 & mask == mask
    }

    /// Sub-step within the phase (the attack slot while hammering).
    pub fn substate(&self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl Display for FeedbackState {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}, val: {}", self.phase(), self.0)
    }
}

/// Which read check reported a batch of errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadStage {
    /// Check before hammering
    Initial,
    /// Check after hammering
    AfterHammer,
}

impl From<u32> for ReadStage {
    fn from(value: u32) -> Self {
        if value == 0 {
            ReadStage::Initial
        } else {
            ReadStage::AfterHammer
        }
    }
}

impl Display for ReadStage {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ReadStage::Initial => write!(f, "Initial Read Errors"),
            ReadStage::AfterHammer => write!(f, "Row Hammer Test Errors"),
        }
    }
}

/// One erroneous address presented by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    /// Engine address
    pub address: u32,
    /// Decoded location
    pub location: DramAddr,
    /// Data read back, one entry per 32-bit word covered by the data width
    pub data_words: Vec<u32>,
}

impl Display for ErrorRecord {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, " 0x{:07x}, {}: ", self.address, self.location)?;
        for word in &self.data_words {
            write!(f, " {:8x}", word)?;
        }
        Ok(())
    }
}

/// All errors reported by one read check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBatch {
    /// Read check that found the errors
    pub stage: ReadStage,
    /// Number of erroneous addresses as counted by the engine
    pub error_count: u32,
    /// Records in the order they were presented
    pub records: Vec<ErrorRecord>,
}

/// Progress notification emitted by [`RhTest::run_test`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TestEvent {
    /// The state machine accepted the start command
    Armed,
    /// The feedback register changed
    Phase(FeedbackState),
    /// First error of a read check
    ErrorBatchStarted {
        /// Read check reporting the errors
        stage: ReadStage,
        /// Erroneous addresses counted by the engine
        error_count: u32,
    },
    /// One error record was captured and acknowledged
    ErrorFound(ErrorRecord),
    /// The engine left the error reporting phase
    ErrorBatchFinished {
        /// Read check that reported the errors
        stage: ReadStage,
        /// Records captured in this batch
        records: usize,
    },
    /// The state machine was disarmed
    Completed,
}

/// Receives the events of a test run.
pub trait RunObserver {
    /// Called for every event in order.
    fn on_event(&mut self, event: &TestEvent);
}

impl<F: FnMut(&TestEvent)> RunObserver for F {
    fn on_event(&mut self, event: &TestEvent) {
        self(event)
    }
}

/// Outcome of a test run.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    /// ISO 8601 timestamp of the run
    pub date: String,
    /// Address organisation used for decoding
    pub widths: AddressWidths,
    /// Data width in bits
    pub data_width: u32,
    /// Error batches in the order they were reported
    pub batches: Vec<ErrorBatch>,
    /// Feedback register reads of the main poll loop
    pub polls: u64,
}

impl TestReport {
    /// Records of all batches of `stage`.
    pub fn errors(&self, stage: ReadStage) -> impl Iterator<Item = &ErrorRecord> {
        self.batches
            .iter()
            .filter(move |batch| batch.stage == stage)
            .flat_map(|batch| batch.records.iter())
    }

    /// Number of records captured after hammering.
    pub fn hammer_errors(&self) -> usize {
        self.errors(ReadStage::AfterHammer).count()
    }
}

/// Number of data output words covered by `data_width` bits.
pub fn data_words_for(data_width: u32) -> usize {
    Csr::data_outputs()
        .enumerate()
        .take_while(|(i, _)| data_width as u64 >= (*i as u64 + 1) * DATA_WORD_BITS as u64)
        .count()
        .min(DATA_OUTPUT_REGS)
}

impl<R: RegisterAccess> RhTest<R> {
    /// Reads the feedback register.
    pub fn feedback(&mut self) -> FeedbackState {
        FeedbackState(self.read(Csr::FeedbackState))
    }

    /// Performs a complete test run and blocks until the engine reaches its final
    /// check.
    ///
    /// Every wait is unbounded: a stalled engine stalls this call.
    ///
    /// # Errors
    ///
    /// Fails before arming if the hardware reports inconsistent address widths.
    pub fn run_test<O: RunObserver + ?Sized>(&mut self, observer: &mut O) -> Result<TestReport> {
        let widths = self.get_address_widths()?;
        let data_width = self.data_width();
        info!("Starting row hammer test");
        debug!("Feedback before arming: {}", self.feedback().0);

        drive_and_wait(
            self.regs(),
            Csr::RowhammerStartFsm,
            Csr::RowhammerStartPrevFsm,
            true,
        );
        observer.on_event(&TestEvent::Armed);

        let mut batches = vec![];
        let mut last: Option<FeedbackState> = None;
        let mut polls = 0;
        loop {
            let state = self.feedback();
            polls += 1;
            if last != Some(state) {
                debug!("Feedback {:#06x}: {}", state.0, state.phase());
                observer.on_event(&TestEvent::Phase(state));
                last = Some(state);
            }
            match state.phase() {
                Phase::FinalCheck => break,
                Phase::ReadSendErrors => {
                    if let Some(batch) = self.drain_errors(&widths, data_width, observer) {
                        batches.push(batch);
                    }
                }
                _ => self.regs().relax(),
            }
        }

        info!("Row hammer test executed, finishing");
        drive_and_wait(
            self.regs(),
            Csr::RowhammerStartFsm,
            Csr::RowhammerStartPrevFsm,
            false,
        );
        observer.on_event(&TestEvent::Completed);

        Ok(TestReport {
            date: chrono::Local::now().to_rfc3339(),
            widths,
            data_width,
            batches,
            polls,
        })
    }

    /// Captures and acknowledges error records while the error reporting bit is set.
    fn drain_errors<O: RunObserver + ?Sized>(
        &mut self,
        widths: &AddressWidths,
        data_width: u32,
        observer: &mut O,
    ) -> Option<ErrorBatch> {
        let mut batch: Option<ErrorBatch> = None;
        while self.feedback().contains(Phase::ReadSendErrors) {
            if !self.regs().read_flag(Csr::ErrorFoundFlag) {
                self.regs().relax();
                continue;
            }
            if batch.is_none() {
                let stage = ReadStage::from(self.read(Csr::BeforeAfterRh));
                let error_count = self.read(Csr::RowhammerErrCnt);
                info!("{}: {} addresses with errors", stage, error_count);
                observer.on_event(&TestEvent::ErrorBatchStarted { stage, error_count });
                batch = Some(ErrorBatch {
                    stage,
                    error_count,
                    records: vec![],
                });
            }

            let record = self.capture_error(widths, data_width);
            debug!("Error at {}", record.location);
            observer.on_event(&TestEvent::ErrorFound(record.clone()));
            pulse(self.regs(), Csr::ErrorAck, Csr::ErrorAckPrev);
            if let Some(batch) = batch.as_mut() {
                batch.records.push(record);
            }
        }

        if let Some(batch) = &batch {
            observer.on_event(&TestEvent::ErrorBatchFinished {
                stage: batch.stage,
                records: batch.records.len(),
            });
        }
        batch
    }

    fn capture_error(&mut self, widths: &AddressWidths, data_width: u32) -> ErrorRecord {
        let address = self.read(Csr::Address);
        let data_words = Csr::data_outputs()
            .take(data_words_for(data_width))
            .map(|reg| self.read(reg))
            .collect();
        ErrorRecord {
            address,
            location: widths.decode(address),
            data_words,
        }
    }
}

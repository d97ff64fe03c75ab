//! Hardware registers of the row-hammer test engine.
//!
//! The engine exposes a flat set of LiteX CSRs. [`Csr`] names every one of them and
//! [`RegisterAccess`] is the capability the rest of the crate uses to touch them, so
//! that real register I/O and the [`sim`](crate::sim) test double are interchangeable.

use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// Number of 32-bit data output registers carrying the read-back word of an error.
pub const DATA_OUTPUT_REGS: usize = 18;

/// Width of a single data output register in bits.
pub const DATA_WORD_BITS: u32 = 32;

/// LiteX module name of the engine; CSR names are prefixed with it.
pub const CSR_MODULE: &str = "rh_test";

/// A register of the row-hammer test engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Csr {
    /// Address staged for an attack slot write
    AddrToSetVal,
    /// Frequency staged for an attack slot write (also the new slot count)
    AddrToSetFreq,
    /// Address of the selected attack slot after a get transfer
    AddrToSetValOut,
    /// Frequency of the selected attack slot (or the slot count) after a get transfer
    AddrToSetFreqOut,
    /// Attack slot selector
    AddrToSetSelVal,
    /// Attack slot channel start flag
    AddrToSetStartFsm,
    /// Attack slot channel direction, high for set
    AddrToSetSetNotGet,
    /// Attack slot channel start acknowledge
    AddrToSetStartPrev,
    /// Input data channel direction, high for set
    InputDataSetNotGet,
    /// Input data channel selector (pattern or timer)
    InputDataSelVal,
    /// Dual pattern mode (even/odd rows)
    InputDataDoublePatternSetting,
    /// Pattern staged for a pattern write
    InputDataPattern,
    /// Pattern read back after a get transfer
    InputDataPatternOutput,
    /// Input data channel start flag
    InputDataToSetStartFsm,
    /// Input data channel start acknowledge
    InputDataSetStartPrev,
    /// DRAM port data width in bits
    DataWidth,
    /// Refresh enable during the attack
    RefreshEnable,
    /// Refresh interval used during the attack
    RefreshRate,
    /// Auto precharge during the attack
    AutoPrecharge,
    /// Address currently handled by the engine (error address while reporting)
    Address,
    /// Data output word `n` (0-based) of the current error
    OutputDataPattern(u8),
    /// Start flag of the test state machine
    RowhammerStartFsm,
    /// Start acknowledge of the test state machine
    RowhammerStartPrevFsm,
    /// Number of erroneous addresses found by the last read check
    RowhammerErrCnt,
    /// Cycle count staged for a timer write
    RowhammerStateCycleCounter,
    /// Cycle count read back after a timer get transfer
    RowhammerStateCycleCounterValOutput,
    /// Error acknowledge flag
    ErrorAck,
    /// Error acknowledge readback
    ErrorAckPrev,
    /// High while an error record is presented
    ErrorFoundFlag,
    /// Feedback state bitmask
    FeedbackState,
    /// DRAM port address width in bits
    AddressWidth,
    /// Bank bits of an address
    BankWidth,
    /// Column bits of an address
    ColWidth,
    /// Low for the initial read check, high for the check after hammering
    BeforeAfterRh,
}

impl Csr {
    /// All registers of the engine, data output words included.
    pub fn all() -> impl Iterator<Item = Csr> {
        use Csr::*;
        [
            AddrToSetVal,
            AddrToSetFreq,
            AddrToSetValOut,
            AddrToSetFreqOut,
            AddrToSetSelVal,
            AddrToSetStartFsm,
            AddrToSetSetNotGet,
            AddrToSetStartPrev,
            InputDataSetNotGet,
            InputDataSelVal,
            InputDataDoublePatternSetting,
            InputDataPattern,
            InputDataPatternOutput,
            InputDataToSetStartFsm,
            InputDataSetStartPrev,
            DataWidth,
            RefreshEnable,
            RefreshRate,
            AutoPrecharge,
            Address,
            RowhammerStartFsm,
            RowhammerStartPrevFsm,
            RowhammerErrCnt,
            RowhammerStateCycleCounter,
            RowhammerStateCycleCounterValOutput,
            ErrorAck,
            ErrorAckPrev,
            ErrorFoundFlag,
            FeedbackState,
            AddressWidth,
            BankWidth,
            ColWidth,
            BeforeAfterRh,
        ]
        .into_iter()
        .chain(Self::data_outputs())
    }

    /// The data output registers in word order.
    pub fn data_outputs() -> impl Iterator<Item = Csr> {
        (0..DATA_OUTPUT_REGS as u8).map(Csr::OutputDataPattern)
    }

    /// Whether software may write this register (LiteX `CSRStorage`).
    pub fn is_storage(&self) -> bool {
        use Csr::*;
        matches!(
            self,
            AddrToSetVal
                | AddrToSetFreq
                | AddrToSetSelVal
                | AddrToSetStartFsm
                | AddrToSetSetNotGet
                | InputDataSetNotGet
                | InputDataSelVal
                | InputDataDoublePatternSetting
                | InputDataPattern
                | InputDataToSetStartFsm
                | RefreshEnable
                | RefreshRate
                | AutoPrecharge
                | RowhammerStartFsm
                | RowhammerStateCycleCounter
                | ErrorAck
        )
    }

    /// Register name as generated by LiteX, without the module prefix.
    pub fn name(&self) -> String {
        use Csr::*;
        let name = match self {
            AddrToSetVal => "addr_to_set_val_csr",
            AddrToSetFreq => "addr_to_set_freq_csr",
            AddrToSetValOut => "addr_to_set_val_out_csr",
            AddrToSetFreqOut => "addr_to_set_freq_out_csr",
            AddrToSetSelVal => "addr_to_set_sel_val_csr",
            AddrToSetStartFsm => "addr_to_set_start_fsm_csr",
            AddrToSetSetNotGet => "addr_to_set_set_not_get_csr",
            AddrToSetStartPrev => "addr_to_set_start_prev_csr",
            InputDataSetNotGet => "input_data_set_not_get_csr",
            InputDataSelVal => "input_data_sel_val_csr",
            InputDataDoublePatternSetting => "input_data_double_pattern_setting_csr",
            InputDataPattern => "input_data_pattern_csr",
            InputDataPatternOutput => "input_data_pattern_output_csr",
            InputDataToSetStartFsm => "input_data_to_set_start_fsm_csr",
            InputDataSetStartPrev => "input_data_set_start_prev_csr",
            DataWidth => "data_width_csr",
            RefreshEnable => "refresh_enable_csr",
            RefreshRate => "refresh_rate_csr",
            AutoPrecharge => "auto_precharge_csr",
            Address => "address_csr",
            OutputDataPattern(n) => return format!("output_data_pattern{}_csr", *n as usize + 1),
            RowhammerStartFsm => "rowhammer_start_fsm_csr",
            RowhammerStartPrevFsm => "rowhammer_start_prev_fsm_csr",
            RowhammerErrCnt => "rowhammer_err_cnt_csr",
            RowhammerStateCycleCounter => "rowhammer_state_cycle_counter_csr",
            RowhammerStateCycleCounterValOutput => "rowhammer_state_cycle_counter_val_output_csr",
            ErrorAck => "error_ack_csr",
            ErrorAckPrev => "error_ack_prev_csr",
            ErrorFoundFlag => "error_found_flag_csr",
            FeedbackState => "feedback_state_csr",
            AddressWidth => "address_width_csr",
            BankWidth => "bank_width_csr",
            ColWidth => "col_width_csr",
            BeforeAfterRh => "before_after_rh_csr",
        };
        name.to_string()
    }

    /// Fully qualified LiteX name, e.g. `rh_test_feedback_state_csr`.
    pub fn litex_name(&self) -> String {
        format!("{}_{}", CSR_MODULE, self.name())
    }
}

impl Display for Csr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Capability to read and write engine registers.
///
/// Implementors provide plain register I/O; all sequencing (handshakes, polling)
/// lives in this crate. Registers are atomic 32-bit access points without burst
/// semantics.
pub trait RegisterAccess {
    /// Reads the current value of `reg`.
    fn read(&mut self, reg: Csr) -> u32;

    /// Writes `value` to `reg`.
    fn write(&mut self, reg: Csr, value: u32);

    /// Called between two reads of a busy-wait loop.
    ///
    /// The default spins; test doubles that advance on every read can make this a no-op.
    fn relax(&mut self) {
        std::hint::spin_loop();
    }

    /// Reads a one-bit register as a flag.
    fn read_flag(&mut self, reg: Csr) -> bool {
        self.read(reg) != 0
    }

    /// Writes a one-bit register.
    fn write_flag(&mut self, reg: Csr, value: bool) {
        self.write(reg, value as u32);
    }
}

impl<R: RegisterAccess + ?Sized> RegisterAccess for &mut R {
    fn read(&mut self, reg: Csr) -> u32 {
        (**self).read(reg)
    }

    fn write(&mut self, reg: Csr, value: u32) {
        (**self).write(reg, value)
    }

    fn relax(&mut self) {
        (**self).relax()
    }
}

impl<R: RegisterAccess + ?Sized> RegisterAccess for Box<R> {
    fn read(&mut self, reg: Csr) -> u32 {
        (**self).read(reg)
    }

    fn write(&mut self, reg: Csr, value: u32) {
        (**self).write(reg, value)
    }

    fn relax(&mut self) {
        (**self).relax()
    }
}

//! Request/acknowledge handshakes with the engine.
//!
//! Configuration data moves through two channels that share the same protocol:
//!
//! 1. write the selector
//! 2. write the value registers (set transfers only)
//! 3. write the direction flag
//! 4. raise the start flag and wait for the acknowledge readback to go high
//! 5. lower the start flag and wait for the readback to go low
//!
//! After a get transfer the result sits in the channel's output registers.
//! No wait has a timeout: a stalled engine stalls the caller.

use log::{debug, trace};

use crate::csr::{Csr, RegisterAccess};

/// One of the two select-and-transfer channels of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Attack slots and the slot count
    AttackSlot,
    /// Data patterns and timers
    InputData,
}

impl Channel {
    fn selector(self) -> Csr {
        match self {
            Channel::AttackSlot => Csr::AddrToSetSelVal,
            Channel::InputData => Csr::InputDataSelVal,
        }
    }

    fn direction(self) -> Csr {
        match self {
            Channel::AttackSlot => Csr::AddrToSetSetNotGet,
            Channel::InputData => Csr::InputDataSetNotGet,
        }
    }

    fn start(self) -> Csr {
        match self {
            Channel::AttackSlot => Csr::AddrToSetStartFsm,
            Channel::InputData => Csr::InputDataToSetStartFsm,
        }
    }

    fn start_ack(self) -> Csr {
        match self {
            Channel::AttackSlot => Csr::AddrToSetStartPrev,
            Channel::InputData => Csr::InputDataSetStartPrev,
        }
    }
}

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Hardware latches the staged values into the selected slot
    Set,
    /// Hardware copies the selected slot into the output registers
    Get,
}

/// Busy-waits until the one-bit register `reg` reads `level`.
///
/// Returns the number of polls it took.
pub fn wait_for<R: RegisterAccess + ?Sized>(regs: &mut R, reg: Csr, level: bool) -> u64 {
    let mut polls = 1;
    while regs.read_flag(reg) != level {
        regs.relax();
        polls += 1;
    }
    trace!("{} reached {} after {} polls", reg, level as u8, polls);
    polls
}

/// Drives `flag` to `level` and waits until `readback` follows.
pub fn drive_and_wait<R: RegisterAccess + ?Sized>(
    regs: &mut R,
    flag: Csr,
    readback: Csr,
    level: bool,
) {
    regs.write_flag(flag, level);
    wait_for(regs, readback, level);
}

/// Full flag handshake: raise `flag`, wait for `readback`, lower it, wait again.
pub fn pulse<R: RegisterAccess + ?Sized>(regs: &mut R, flag: Csr, readback: Csr) {
    drive_and_wait(regs, flag, readback, true);
    drive_and_wait(regs, flag, readback, false);
}

/// Performs one select-and-transfer sequence on `channel`.
///
/// `values` are written after the selector and before the direction flag; pass an
/// empty slice for get transfers. The caller reads the output registers afterwards.
pub fn select_and_transfer<R: RegisterAccess + ?Sized>(
    regs: &mut R,
    channel: Channel,
    selector: u32,
    values: &[(Csr, u32)],
    direction: Direction,
) {
    debug!("{:?} {:?} transfer, selector {}", channel, direction, selector);
    regs.write(channel.selector(), selector);
    for &(reg, value) in values {
        regs.write(reg, value);
    }
    regs.write_flag(channel.direction(), direction == Direction::Set);
    pulse(regs, channel.start(), channel.start_ack());
}

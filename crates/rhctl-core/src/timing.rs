//! Pair and cycle timers.
//!
//! Timers live on the input data channel next to the patterns. Indices 2 to 6 hold
//! the cycle counts of the five slot pairs, index 7 the number of times the whole
//! attack sequence is repeated.

use serde::Serialize;
use std::fmt::{self, Display, Formatter};

use crate::controller::RhTest;
use crate::csr::{Csr, RegisterAccess};
use crate::error::{Error, Result};
use crate::handshake::{Channel, Direction};
use crate::slots::FREQ_CAP;

/// Lowest valid timer index.
pub const MIN_TIMER_INDEX: u32 = 2;
/// Highest valid timer index (the cycle timer).
pub const MAX_TIMER_INDEX: u32 = 7;
/// Number of pair timers.
pub const PAIR_TIMERS: u8 = 5;

/// A timer of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Timer {
    /// Cycles spent on slot pair `n` (1-based, slots `2n-2` and `2n-1`)
    Pair(u8),
    /// Repetitions of the complete attack sequence
    Cycle,
}

impl Timer {
    /// Register index of the timer on the input data channel.
    pub fn index(self) -> u32 {
        match self {
            Timer::Pair(n) => MIN_TIMER_INDEX + n as u32 - 1,
            Timer::Cycle => MAX_TIMER_INDEX,
        }
    }

    /// Looks up the timer at register `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTimerIndex`] outside `2..=7`.
    pub fn from_index(index: u32) -> Result<Timer> {
        match index {
            MAX_TIMER_INDEX => Ok(Timer::Cycle),
            MIN_TIMER_INDEX..MAX_TIMER_INDEX => Ok(Timer::Pair((index - MIN_TIMER_INDEX + 1) as u8)),
            _ => Err(Error::InvalidTimerIndex { index }),
        }
    }

    /// Pair timer covering slot `order`, if the slot has one.
    pub fn for_pair_of(order: u32) -> Option<Timer> {
        (order < FREQ_CAP).then(|| Timer::Pair((order / 2 + 1) as u8))
    }

    /// Pair timer completed by slot `order`, i.e. `order` is the second slot of a pair.
    pub fn closing_pair(order: u32) -> Option<Timer> {
        if order % 2 == 1 {
            Timer::for_pair_of(order)
        } else {
            None
        }
    }

    /// All timers in register order.
    pub fn all() -> impl Iterator<Item = Timer> {
        (1..=PAIR_TIMERS).map(Timer::Pair).chain([Timer::Cycle])
    }
}

impl Display for Timer {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Timer::Pair(n) => write!(f, "Timer {}", n),
            Timer::Cycle => write!(f, "Cycle timer"),
        }
    }
}

impl<R: RegisterAccess> RhTest<R> {
    /// Reads the timer at register `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTimerIndex`] without touching the hardware outside `2..=7`.
    pub fn get_timer(&mut self, index: u32) -> Result<u32> {
        let timer = Timer::from_index(index)?;
        Ok(self.read_timer(timer))
    }

    /// Writes `cycles` to the timer at register `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTimerIndex`] without touching the hardware outside `2..=7`.
    pub fn set_timer(&mut self, index: u32, cycles: u32) -> Result<()> {
        let timer = Timer::from_index(index)?;
        self.write_timer(timer, cycles);
        Ok(())
    }

    pub(crate) fn read_timer(&mut self, timer: Timer) -> u32 {
        self.transfer(Channel::InputData, timer.index(), &[], Direction::Get);
        self.read(Csr::RowhammerStateCycleCounterValOutput)
    }

    pub(crate) fn write_timer(&mut self, timer: Timer, cycles: u32) {
        self.transfer(
            Channel::InputData,
            timer.index(),
            &[(Csr::RowhammerStateCycleCounter, cycles)],
            Direction::Set,
        );
    }
}

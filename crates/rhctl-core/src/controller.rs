use crate::csr::{Csr, RegisterAccess};
use crate::handshake::{Channel, Direction, select_and_transfer};

/// Control-plane driver of the row-hammer test engine.
///
/// `RhTest` owns the register capability; every command takes `&mut self`, which
/// serialises handshakes: a second select-and-transfer sequence can never start while
/// one is outstanding. Hosts that share the driver between threads put it behind a
/// `Mutex`.
///
/// The commands are grouped by concern in the [`slots`](crate::slots),
/// [`timing`](crate::timing), [`pattern`](crate::pattern),
/// [`settings`](crate::settings) and [`orchestrator`](crate::orchestrator) modules.
///
/// # Examples
///
/// ```
/// use rhctl_core::RhTest;
/// use rhctl_core::sim::{SimConfig, SimHardware};
///
/// let mut rh = RhTest::new(SimHardware::new(SimConfig::default()));
/// rh.set_timer(7, 10000).unwrap();
/// assert_eq!(rh.get_timer(7).unwrap(), 10000);
/// ```
#[derive(Debug)]
pub struct RhTest<R: RegisterAccess> {
    regs: R,
}

impl<R: RegisterAccess> RhTest<R> {
    /// Creates a driver on top of `regs`.
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    /// Direct access to the register capability.
    pub fn regs(&mut self) -> &mut R {
        &mut self.regs
    }

    /// Releases the register capability.
    pub fn into_inner(self) -> R {
        self.regs
    }

    pub(crate) fn read(&mut self, reg: Csr) -> u32 {
        self.regs.read(reg)
    }

    pub(crate) fn write(&mut self, reg: Csr, value: u32) {
        self.regs.write(reg, value)
    }

    pub(crate) fn transfer(
        &mut self,
        channel: Channel,
        selector: u32,
        values: &[(Csr, u32)],
        direction: Direction,
    ) {
        select_and_transfer(&mut self.regs, channel, selector, values, direction)
    }
}

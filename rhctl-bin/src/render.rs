//! Text rendering of engine state.

use std::fmt::Write;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rhctl_core::slots::{PairTimerReading, SlotListing};
use rhctl_core::{AddressInfo, Phase, RunObserver, TestEvent, TestSummary};

fn section(out: &mut String, title: &str) {
    let _ = write!(
        out,
        "\n########################\n# {}\n########################\n",
        title
    );
}

fn pair_timer(out: &mut String, reading: &PairTimerReading) {
    let _ = writeln!(
        out,
        "\n{}: Cycles for above two addresses: {}\n",
        reading.timer, reading.cycles
    );
}

/// Renders the attack sequence the way the engine firmware prints it.
pub fn slot_listing(listing: &SlotListing) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Addresses to be attacked:\n\nNumber of addresses, frequencies being used: {}\n",
        listing.count()
    );
    for entry in &listing.entries {
        let slot = &entry.slot;
        let location = &entry.location;
        if slot.has_configurable_frequency() {
            let _ = writeln!(
                out,
                "Address set: 0x{:07x} ROW: {} BANK: {} COL: {}, freq: {}",
                slot.address, location.row, location.bank, location.col, slot.frequency
            );
        } else {
            let _ = writeln!(
                out,
                "Address set: 0x{:07x} ROW: {} BANK: {} COL: {}, freq of one",
                slot.address, location.row, location.bank, location.col
            );
        }
        if let Some(reading) = &entry.pair_timer {
            pair_timer(&mut out, reading);
        }
    }
    for reading in &listing.unused_pair_timers {
        pair_timer(&mut out, reading);
    }
    let _ = writeln!(
        out,
        "\nNumber of cycles to repeat sequence of addr and freq accesses: {}",
        listing.cycle_timer
    );
    out
}

/// Renders the address organisation.
pub fn address_info(info: &AddressInfo) -> String {
    format!(
        "Address organization\n\nRow (bits: {}), Bank (bits: {}), Column (bits: {})\n\nAddress width: {}, Data width: {}\n",
        info.row_width,
        info.widths.bank_width,
        info.widths.column_width,
        info.widths.address_width,
        info.data_width
    )
}

/// Renders every setting a test run will use.
pub fn summary(summary: &TestSummary) -> String {
    let mut out = String::from("\nPrinting a summary of settings for the Rowhammer Test\n");
    section(&mut out, "Refresh Rate");
    let _ = writeln!(out, "\n{}", summary.refresh);
    section(&mut out, "Address List");
    out.push_str(&slot_listing(&summary.slots));
    section(&mut out, "Data Pattern");
    let _ = writeln!(out, "Pattern set to:\n\n{}", summary.patterns);
    section(&mut out, "Auto Precharge");
    if summary.auto_precharge {
        out.push_str("\nAuto precharge enabled for RH test\n");
    } else {
        out.push_str("\nAuto precharge off, normal operation\n");
    }
    out
}

/// Shows the phase of a running test on a spinner and prints error records above it.
pub struct PhaseSpinner {
    bar: ProgressBar,
}

impl PhaseSpinner {
    pub fn new(progress: &MultiProgress) -> Self {
        let bar = progress.add(ProgressBar::new_spinner());
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }
}

impl RunObserver for PhaseSpinner {
    fn on_event(&mut self, event: &TestEvent) {
        match event {
            TestEvent::Armed => self.bar.set_message("Armed"),
            TestEvent::Phase(state) => match state.phase() {
                Phase::Rowhammering => self
                    .bar
                    .set_message(format!("{}, slot {}", state.phase(), state.substate())),
                Phase::Unknown => self.bar.set_message(state.to_string()),
                phase => self.bar.set_message(phase.label()),
            },
            TestEvent::ErrorBatchStarted { stage, error_count } => {
                let mut header = String::new();
                section(&mut header, &stage.to_string());
                let _ = write!(
                    header,
                    "Number of addresses with errors found: {}\nADDRESS     DATA",
                    error_count
                );
                self.bar.println(header);
            }
            TestEvent::ErrorFound(record) => self.bar.println(record.to_string()),
            TestEvent::ErrorBatchFinished { .. } => self.bar.println(""),
            TestEvent::Completed => self
                .bar
                .finish_with_message("Row hammer test executed, finishing"),
        }
    }
}

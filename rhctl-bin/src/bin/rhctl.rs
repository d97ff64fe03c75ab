use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};
use rhctl_bin::backend::{BackendKind, open_backend};
use rhctl_bin::init_logging_with_progress;
use rhctl_bin::render::{self, PhaseSpinner};
use rhctl_core::{PopOutcome, ReadStage, RefreshSettings, RhTest, TestPlan, Timer};

/// CLI arguments for the `rhctl` binary.
#[derive(Debug, Parser)]
#[clap(version, about = "Configure and run the row-hammer test engine")]
struct CliArgs {
    /// Use the simulated engine instead of /dev/mem.
    #[clap(long = "sim")]
    sim: bool,
    /// Configuration of the simulated engine (JSON).
    #[clap(long = "sim-config", requires = "sim")]
    sim_config: Option<String>,
    /// The LiteX csr.json locating the engine registers.
    #[clap(long = "csr-json", default_value = "build/csr.json")]
    csr_json: String,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the address organisation of the DRAM port.
    Info,
    /// List the attack sequence with its timers.
    List,
    /// Set the slot at ORDER, or append when ORDER equals the slot count.
    Set {
        order: u32,
        /// Engine address, decimal or 0x-prefixed hex.
        #[clap(value_parser = parse_u32)]
        address: u32,
        #[clap(default_value = "1")]
        frequency: u32,
    },
    /// Append a slot to the attack sequence.
    Push {
        #[clap(value_parser = parse_u32)]
        address: u32,
        #[clap(default_value = "1")]
        frequency: u32,
    },
    /// Remove the last slot of the attack sequence.
    Pop,
    /// Read a timer, or set it when CYCLES is given.
    Timer {
        /// Timer index: 2-6 for the pair timers, 7 for the cycle timer.
        index: u32,
        cycles: Option<u32>,
    },
    /// Show the patterns, or set pattern SLOT (0 even rows, 1 odd rows).
    Pattern {
        slot: Option<u32>,
        #[clap(value_parser = parse_u32)]
        pattern: Option<u32>,
        /// Enable or disable dual pattern mode.
        #[clap(long = "dual")]
        dual: Option<bool>,
    },
    /// Show the refresh settings, or set them.
    Refresh {
        #[clap(long = "enable")]
        enable: Option<bool>,
        #[clap(long = "rate")]
        rate: Option<u32>,
    },
    /// Show or set auto precharge during the attack.
    Precharge { enable: Option<bool> },
    /// Print every setting the next run will use.
    Summary {
        /// Print JSON instead of text.
        #[clap(long = "json")]
        json: bool,
    },
    /// Apply a JSON test plan.
    Plan { path: String },
    /// Run the test, optionally applying a plan first.
    Run {
        #[clap(long = "plan")]
        plan: Option<String>,
        /// Output file for the run report (JSON format).
        #[clap(long = "output")]
        output: Option<String>,
    },
}

fn parse_u32(value: &str) -> Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("{}: {}", value, e))
}

fn main() -> Result<()> {
    let progress = init_logging_with_progress()?;
    let args = CliArgs::parse();

    let backend = if args.sim {
        BackendKind::Sim {
            config: args.sim_config.clone(),
        }
    } else {
        BackendKind::DevMem {
            csr_json: args.csr_json.clone(),
        }
    };
    let mut rh = RhTest::new(open_backend(&backend)?);

    match args.command {
        Command::Info => print!("{}", render::address_info(&rh.address_info()?)),
        Command::List => print!("{}", render::slot_listing(&rh.list_slots()?)),
        Command::Set {
            order,
            address,
            frequency,
        } => {
            let count = rh.get_slot_count();
            rh.configure_slot(order, address, frequency, count)?;
        }
        Command::Push { address, frequency } => {
            let order = rh.push_slot(address, frequency)?;
            info!("Added slot {}", order);
        }
        Command::Pop => match rh.pop_slot() {
            PopOutcome::Removed { remaining } => println!("Number of addresses: {}", remaining),
            PopOutcome::NothingToPop => println!("No addresses to pop"),
        },
        Command::Timer { index, cycles } => {
            let timer = Timer::from_index(index)?;
            if let Some(cycles) = cycles {
                rh.set_timer(index, cycles)?;
            }
            println!("{}: {}", timer, rh.get_timer(index)?);
        }
        Command::Pattern {
            slot,
            pattern,
            dual,
        } => {
            match (slot, pattern) {
                (Some(slot), Some(pattern)) => rh.set_pattern(pattern, slot)?,
                (Some(slot), None) => println!("{:08x}", rh.get_pattern(slot)?),
                (None, _) => {}
            }
            if let Some(dual) = dual {
                rh.set_dual_pattern(dual);
            }
            if slot.is_none() || pattern.is_some() || dual.is_some() {
                println!("Pattern set to:\n\n{}", rh.get_pattern_summary());
            }
        }
        Command::Refresh { enable, rate } => {
            if enable.is_some() || rate.is_some() {
                let current = rh.get_refresh();
                rh.set_refresh(RefreshSettings {
                    enabled: enable.unwrap_or(current.enabled),
                    rate: rate.unwrap_or(current.rate),
                });
            }
            println!("{}", rh.get_refresh());
        }
        Command::Precharge { enable } => {
            if let Some(enable) = enable {
                rh.set_auto_precharge(enable);
            }
            if rh.get_auto_precharge() {
                println!("Auto precharge enabled for RH test");
            } else {
                println!("Auto precharge off, normal operation");
            }
        }
        Command::Summary { json } => {
            let summary = rh.summarize_test_params()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", render::summary(&summary));
            }
        }
        Command::Plan { path } => {
            let plan = TestPlan::from_jsonfile(&path)?;
            rh.apply_plan(&plan)?;
        }
        Command::Run { plan, output } => {
            if let Some(path) = plan {
                rh.apply_plan(&TestPlan::from_jsonfile(&path)?)?;
            }
            if rh.get_slot_count() == 0 {
                warn!("No attack slots configured, the run only checks the memory");
            }
            let mut spinner = PhaseSpinner::new(&progress);
            let report = rh.run_test(&mut spinner)?;
            info!(
                "Run finished: {} errors before, {} errors after hammering",
                report.errors(ReadStage::Initial).count(),
                report.hammer_errors()
            );
            if let Some(output) = output {
                let file = File::create(&output)?;
                let mut writer = BufWriter::new(file);
                serde_json::to_writer_pretty(&mut writer, &report)?;
                writer.flush()?;
                info!("Results saved to {}", output);
            }
        }
    }
    Ok(())
}

use rand::{Rng, rng};
use rhctl::addr::{extract_bank, extract_col, extract_row};
use rhctl::sim::{InjectedFault, SimConfig, SimHardware};
use rhctl::slots::FREQ_CAP;
use rhctl::{
    AddressWidths, Error, Phase, PopOutcome, ReadStage, RhTest, TestEvent, TestPlan, Timer,
};

const PLAN_FILE: &str = "config/plan.json";
const SIM_CONFIG_FILE: &str = "config/sim-config.json";

fn sim() -> RhTest<SimHardware> {
    RhTest::new(SimHardware::new(SimConfig::default()))
}

#[test]
fn test_address_decomposition_recomposes() {
    let mut rng = rng();
    for _ in 0..10_000 {
        let bank_width = rng.random_range(0..8);
        let col_width = rng.random_range(0..16);
        let width = bank_width + col_width + rng.random_range(1..8);
        let addr = rng.random::<u32>() & ((1u32 << width) - 1);
        let recomposed = extract_row(addr, bank_width, col_width) << (bank_width + col_width)
            | extract_bank(addr, bank_width, col_width) << col_width
            | extract_col(addr, col_width);
        assert_eq!(recomposed, addr, "bank {} col {}", bank_width, col_width);
    }
}

#[test]
fn test_configure_then_get_every_order() -> anyhow::Result<()> {
    let mut rh = sim();
    let mut rng = rng();
    for order in 0..20 {
        let address = rng.random_range(0..1 << 24);
        let frequency = rng.random_range(2..100);
        rh.configure_slot(order, address, frequency, order)?;
        let slot = rh.get_slot(order)?;
        assert_eq!(slot.address, address);
        if order < FREQ_CAP {
            assert_eq!(slot.frequency, frequency);
        } else {
            assert_eq!(slot.frequency, 1);
        }
    }
    assert_eq!(rh.get_slot_count(), 20);
    Ok(())
}

#[test]
fn test_pop_until_empty() -> anyhow::Result<()> {
    let mut rh = sim();
    for i in 0..3 {
        rh.push_slot(0x1000 * (i + 1), 1)?;
    }
    for remaining in (0..3).rev() {
        assert_eq!(rh.pop_slot(), PopOutcome::Removed { remaining });
        assert_eq!(rh.get_slot_count(), remaining);
    }
    assert_eq!(rh.pop_slot(), PopOutcome::NothingToPop);
    assert_eq!(rh.get_slot_count(), 0);
    Ok(())
}

#[test]
fn test_append_only_at_count() -> anyhow::Result<()> {
    let mut rh = sim();
    rh.configure_slot(0, 0x1000, 2, 0)?;
    assert_eq!(rh.get_slot_count(), 1);
    assert_eq!(
        rh.configure_slot(2, 0x2000, 2, 1),
        Err(Error::InvalidSlotOrder { order: 2, count: 1 })
    );
    assert_eq!(rh.get_slot_count(), 1);
    Ok(())
}

#[test]
fn test_timer_window() -> anyhow::Result<()> {
    let mut rh = sim();
    for index in 2..=7 {
        rh.set_timer(index, 100 * index)?;
        assert_eq!(rh.get_timer(index)?, 100 * index);
    }
    for index in [0, 1, 8, 20, u32::MAX] {
        assert_eq!(
            rh.set_timer(index, 1),
            Err(Error::InvalidTimerIndex { index })
        );
        assert_eq!(rh.get_timer(index), Err(Error::InvalidTimerIndex { index }));
    }
    // nothing leaked into the valid timers
    for index in 2..=7 {
        assert_eq!(rh.get_timer(index)?, 100 * index);
    }
    Ok(())
}

#[test]
fn test_two_slot_listing() -> anyhow::Result<()> {
    let mut rh = sim();
    rh.configure_slot(0, 0x1000, 3, 0)?;
    assert_eq!(rh.get_slot_count(), 1);
    rh.configure_slot(1, 0x2000, 5, 1)?;
    assert_eq!(rh.get_slot_count(), 2);

    let listing = rh.list_slots()?;
    let slots: Vec<(u32, u32)> = listing
        .entries
        .iter()
        .map(|entry| (entry.slot.address, entry.slot.frequency))
        .collect();
    assert_eq!(slots, vec![(0x1000, 3), (0x2000, 5)]);
    assert!(listing.entries[0].pair_timer.is_none());
    assert_eq!(
        listing.entries[1].pair_timer.map(|reading| reading.timer),
        Some(Timer::Pair(1))
    );
    assert_eq!(listing.unused_pair_timers.len(), 4);
    Ok(())
}

#[test]
fn test_pattern_summary_reports_pattern() -> anyhow::Result<()> {
    let mut rh = sim();
    rh.set_pattern(0xDEADBEEF, 0)?;
    let summary = rh.get_pattern_summary();
    assert_eq!(summary.even, 0xDEADBEEF);
    assert_eq!(summary.repeat, 4);
    Ok(())
}

#[test]
fn test_cycle_timer() -> anyhow::Result<()> {
    let mut rh = sim();
    rh.set_timer(7, 10000)?;
    assert_eq!(rh.get_timer(7)?, 10000);
    assert_eq!(
        rh.set_timer(1, 10000),
        Err(Error::InvalidTimerIndex { index: 1 })
    );
    Ok(())
}

#[test]
fn test_run_reports_injected_faults() -> anyhow::Result<()> {
    let mut hw = SimHardware::new(SimConfig::default());
    hw.inject_fault(InjectedFault {
        stage: ReadStage::Initial,
        address: 0x1000,
        word: 1,
        mask: 0x100,
    });
    hw.inject_fault(InjectedFault {
        stage: ReadStage::AfterHammer,
        address: 0xc8000,
        word: 0,
        mask: 0x1,
    });
    let mut rh = RhTest::new(hw);
    rh.set_pattern(0xAAAAAAAA, 0)?;
    rh.push_slot(0xc6000, 2)?;
    rh.push_slot(0xca000, 2)?;

    let mut events = vec![];
    let report = rh.run_test(&mut |event: &TestEvent| events.push(event.clone()))?;

    assert_eq!(events.first(), Some(&TestEvent::Armed));
    assert_eq!(events.last(), Some(&TestEvent::Completed));
    assert_eq!(report.batches.len(), 2);

    let initial: Vec<_> = report.errors(ReadStage::Initial).collect();
    assert_eq!(initial.len(), 1);
    assert_eq!(initial[0].address, 0x1000);
    assert_eq!(
        initial[0].data_words,
        vec![0xAAAAAAAA, 0xAAAAAAAA ^ 0x100, 0xAAAAAAAA, 0xAAAAAAAA]
    );

    let after: Vec<u32> = report
        .errors(ReadStage::AfterHammer)
        .map(|record| record.address)
        .collect();
    assert_eq!(after, vec![0x1000, 0xc8000]);
    assert_eq!(report.batches[1].error_count, 2);

    let widths = AddressWidths::new(24, 3, 10)?;
    assert_eq!(report.batches[1].records[1].location, widths.decode(0xc8000));

    // the model keeps the flipped bits until the next run is armed
    let hw = rh.into_inner();
    assert_eq!(hw.corrupted_addresses(), vec![0x1000, 0xc8000]);
    assert_eq!(hw.config().faults.len(), 2);
    Ok(())
}

#[test]
fn test_run_event_order() -> anyhow::Result<()> {
    let mut hw = SimHardware::new(SimConfig::default());
    hw.inject_fault(InjectedFault {
        stage: ReadStage::AfterHammer,
        address: 0x4000,
        word: 0,
        mask: 0x80000000,
    });
    let mut rh = RhTest::new(hw);
    rh.push_slot(0x2000, 1)?;
    rh.push_slot(0x6000, 1)?;
    rh.push_slot(0xa000, 1)?;
    rh.set_timer(7, 2)?;

    let mut phases: Vec<(Phase, u8)> = vec![];
    let mut batch_events: Vec<String> = vec![];
    rh.run_test(&mut |event: &TestEvent| match event {
        TestEvent::Phase(state) => {
            if phases.last() != Some(&(state.phase(), state.substate())) {
                phases.push((state.phase(), state.substate()));
            }
        }
        TestEvent::ErrorBatchStarted { stage, error_count } => {
            batch_events.push(format!("start {:?} {}", stage, error_count))
        }
        TestEvent::ErrorFound(record) => batch_events.push(format!("found {:#x}", record.address)),
        TestEvent::ErrorBatchFinished { stage, records } => {
            batch_events.push(format!("finish {:?} {}", stage, records))
        }
        _ => {}
    })?;

    assert_eq!(
        batch_events,
        vec!["start AfterHammer 1", "found 0x4000", "finish AfterHammer 1"]
    );

    let hammered: Vec<u8> = phases
        .iter()
        .filter(|(phase, _)| *phase == Phase::Rowhammering)
        .map(|(_, slot)| *slot)
        .collect();
    assert!(hammered.iter().all(|slot| *slot < 3));
    assert!(hammered.contains(&2));

    let order: Vec<Phase> = phases.iter().map(|(phase, _)| *phase).collect();
    let position = |phase: Phase| order.iter().position(|p| *p == phase);
    assert!(position(Phase::WriteFillInit) < position(Phase::InitSettings));
    assert!(position(Phase::InitSettings) < position(Phase::Rowhammering));
    assert!(position(Phase::Rowhammering) < position(Phase::ResetSettings));
    assert!(position(Phase::ResetSettings) < position(Phase::ReadSendErrors));
    assert_eq!(order.last(), Some(&Phase::FinalCheck));
    Ok(())
}

#[test]
fn test_run_narrow_data_width() -> anyhow::Result<()> {
    let config = SimConfig {
        data_width: 64,
        ..SimConfig::default()
    };
    let mut hw = SimHardware::new(config);
    hw.inject_fault(InjectedFault {
        stage: ReadStage::Initial,
        address: 0x10,
        word: 1,
        mask: 0xf,
    });
    let mut rh = RhTest::new(hw);
    let report = rh.run_test(&mut |_: &TestEvent| {})?;
    let record = report
        .errors(ReadStage::Initial)
        .next()
        .expect("no initial error");
    assert_eq!(record.data_words, vec![0, 0xf]);
    assert_eq!(report.data_width, 64);
    Ok(())
}

#[test]
fn test_rerun_after_final_check() -> anyhow::Result<()> {
    let mut rh = sim();
    rh.push_slot(0x2000, 1)?;
    let first = rh.run_test(&mut |_: &TestEvent| {})?;
    let second = rh.run_test(&mut |_: &TestEvent| {})?;
    assert!(first.batches.is_empty());
    assert!(second.batches.is_empty());
    assert_eq!(rh.feedback().phase(), Phase::Idle);
    Ok(())
}

#[test]
fn test_plan_file_on_simulator() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let plan = TestPlan::from_jsonfile(PLAN_FILE)?;
    let config = SimConfig::from_jsonfile(SIM_CONFIG_FILE)?;
    let widths = AddressWidths::new(config.address_width, config.bank_width, config.column_width)?;
    let fault_addresses: Vec<u32> = config.faults.iter().map(|fault| fault.address).collect();

    let mut rh = RhTest::new(SimHardware::new(config));
    rh.apply_plan(&plan)?;
    assert_eq!(rh.get_slot_count(), plan.slots.len() as u32);
    let summary = rh.summarize_test_params()?;
    assert!(summary.patterns.dual_pattern);
    assert!(!summary.refresh.enabled);
    assert!(summary.auto_precharge);

    let aggressors: Vec<_> = summary
        .slots
        .entries
        .iter()
        .map(|entry| entry.location)
        .collect();
    let report = rh.run_test(&mut |_: &TestEvent| {})?;
    for record in report.errors(ReadStage::AfterHammer) {
        if fault_addresses.contains(&record.address) {
            continue;
        }
        let victim = widths.decode(record.address);
        assert!(
            aggressors
                .iter()
                .any(|a| a.bank == victim.bank && a.row.abs_diff(victim.row) == 1),
            "flip at {} is not next to an aggressor",
            victim
        );
    }
    Ok(())
}

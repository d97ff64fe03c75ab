//! Register backend selection.

use log::info;
use rhctl_core::RegisterAccess;
use rhctl_core::sim::{SimConfig, SimHardware};
use rhctl_devmem::{CsrMap, DevMem};

/// Where register accesses go.
#[derive(Debug, Clone)]
pub enum BackendKind {
    /// The behavioural model, optionally configured from a JSON file
    Sim { config: Option<String> },
    /// The engine behind `/dev/mem`, located through a LiteX `csr.json`
    DevMem { csr_json: String },
}

/// Opens the backend described by `kind`.
///
/// # Errors
///
/// Returns error if a configuration file cannot be read or the register window
/// cannot be mapped.
pub fn open_backend(kind: &BackendKind) -> anyhow::Result<Box<dyn RegisterAccess>> {
    match kind {
        BackendKind::Sim { config } => {
            let config = match config {
                Some(path) => SimConfig::from_jsonfile(path)?,
                None => SimConfig::default(),
            };
            info!(
                "Using simulated engine ({} bit data, {} injected faults)",
                config.data_width,
                config.faults.len()
            );
            Ok(Box::new(SimHardware::new(config)))
        }
        BackendKind::DevMem { csr_json } => {
            let map = CsrMap::from_jsonfile(csr_json)?;
            Ok(Box::new(DevMem::open(map)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhctl_core::RhTest;

    #[test]
    fn test_open_sim() -> anyhow::Result<()> {
        let regs = open_backend(&BackendKind::Sim { config: None })?;
        let mut rh = RhTest::new(regs);
        assert_eq!(rh.get_slot_count(), 0);
        assert_eq!(rh.address_info()?.data_width, 128);
        Ok(())
    }

    #[test]
    fn test_missing_csr_json() {
        let kind = BackendKind::DevMem {
            csr_json: "does/not/exist.json".to_string(),
        };
        assert!(open_backend(&kind).is_err());
    }
}

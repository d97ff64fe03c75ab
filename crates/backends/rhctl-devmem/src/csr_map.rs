use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use rhctl_core::Csr;

use crate::{Error, Result};

/// Spacing of LiteX CSR subregisters on the bus.
pub const CSR_STRIDE: u64 = 4;

#[derive(Debug, Clone, Deserialize)]
struct LitexRegister {
    addr: u64,
    size: u32,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct LitexCsrJson {
    csr_registers: HashMap<String, LitexRegister>,
    #[serde(default)]
    constants: HashMap<String, serde_json::Value>,
}

/// Bus location of one engine register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsrLocation {
    /// Bus address of the first (most significant) subregister
    pub addr: u64,
    /// Number of subregisters
    pub size: u32,
}

impl CsrLocation {
    /// Bus address one past the last subregister.
    pub fn end(&self) -> u64 {
        self.addr + self.size as u64 * CSR_STRIDE
    }
}

/// Bus addresses of the engine registers, resolved from the LiteX `csr.json`.
#[derive(Debug, Clone)]
pub struct CsrMap {
    locations: HashMap<Csr, CsrLocation>,
    data_width: u32,
}

impl CsrMap {
    /// Loads the register map from a LiteX `csr.json`.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or an engine register is
    /// missing from it.
    pub fn from_jsonfile<P: AsRef<Path>>(filepath: P) -> Result<CsrMap> {
        let mut file = File::open(filepath.as_ref())?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_json_str(&contents)
    }

    /// Parses the register map from the contents of a LiteX `csr.json`.
    pub fn from_json_str(json: &str) -> Result<CsrMap> {
        let csr_json: LitexCsrJson = serde_json::from_str(json)?;
        let data_width = match csr_json.constants.get("config_csr_data_width") {
            Some(value) => value
                .as_u64()
                .map(|width| width as u32)
                .ok_or(Error::InvalidCsrDataWidth(value.to_string()))?,
            None => 32,
        };
        if !matches!(data_width, 8 | 16 | 32) {
            return Err(Error::InvalidCsrDataWidth(data_width.to_string()));
        }

        let mut locations = HashMap::new();
        for csr in Csr::all() {
            let name = csr.litex_name();
            let register = csr_json
                .csr_registers
                .get(&name)
                .ok_or_else(|| Error::MissingRegister(name.clone()))?;
            let size = register.size.max(1);
            if u64::from(size) * u64::from(data_width) > u64::from(u32::BITS) {
                return Err(Error::RegisterTooWide {
                    name,
                    size,
                    data_width,
                });
            }
            let writable = register.kind != "ro";
            if writable != csr.is_storage() {
                warn!("{} has type {}, expected otherwise", name, register.kind);
            }
            locations.insert(
                csr,
                CsrLocation {
                    addr: register.addr,
                    size,
                },
            );
        }
        debug!(
            "Resolved {} engine registers, CSR data width {}",
            locations.len(),
            data_width
        );
        Ok(CsrMap {
            locations,
            data_width,
        })
    }

    /// Location of `csr`.
    pub fn location(&self, csr: Csr) -> CsrLocation {
        // every register is resolved on construction
        self.locations[&csr]
    }

    /// Bits carried by each subregister.
    pub fn data_width(&self) -> u32 {
        self.data_width
    }

    /// Smallest bus range covering every engine register, as `(start, end)`.
    pub fn span(&self) -> (u64, u64) {
        let start = self.locations.values().map(|l| l.addr).min().unwrap_or(0);
        let end = self.locations.values().map(|l| l.end()).max().unwrap_or(0);
        (start, end)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a `csr.json` with every engine register laid out from `base`.
    pub(crate) fn litex_json(base: u64, data_width: u32) -> String {
        let size = 32 / data_width;
        let registers = Csr::all()
            .enumerate()
            .map(|(i, csr)| {
                format!(
                    r#""{}": {{"addr": {}, "size": {}, "type": "{}"}}"#,
                    csr.litex_name(),
                    base + i as u64 * size as u64 * CSR_STRIDE,
                    size,
                    if csr.is_storage() { "rw" } else { "ro" }
                )
            })
            .collect::<Vec<_>>()
            .join(",\n");
        format!(
            r#"{{"csr_bases": {{"rh_test": {}}}, "csr_registers": {{{}}}, "constants": {{"config_csr_data_width": {}}}}}"#,
            base, registers, data_width
        )
    }

    #[test]
    fn test_parse_generated() {
        let map = CsrMap::from_json_str(&litex_json(0xf000_0000, 32)).unwrap();
        assert_eq!(map.data_width(), 32);
        assert_eq!(
            map.location(Csr::AddrToSetVal),
            CsrLocation {
                addr: 0xf000_0000,
                size: 1
            }
        );
        let (start, end) = map.span();
        assert_eq!(start, 0xf000_0000);
        assert_eq!(end, 0xf000_0000 + Csr::all().count() as u64 * 4);
    }

    #[test]
    fn test_narrow_bus() {
        let map = CsrMap::from_json_str(&litex_json(0x8000, 8)).unwrap();
        assert_eq!(map.location(Csr::FeedbackState).size, 4);
    }

    #[test]
    fn test_missing_register() {
        let json = r#"{"csr_registers": {}, "constants": {}}"#;
        match CsrMap::from_json_str(json) {
            Err(Error::MissingRegister(name)) => assert!(name.starts_with("rh_test_")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_oversized_register() {
        let mut json: serde_json::Value = serde_json::from_str(&litex_json(0x8000, 8)).unwrap();
        json["csr_registers"]["rh_test_address_width_csr"]["size"] = u32::MAX.into();
        match CsrMap::from_json_str(&json.to_string()) {
            Err(Error::RegisterTooWide {
                name,
                size,
                data_width,
            }) => {
                assert_eq!(name, "rh_test_address_width_csr");
                assert_eq!(size, u32::MAX);
                assert_eq!(data_width, 8);
            }
            other => panic!("unexpected {:?}", other),
        }

        // five bytes on an 8-bit bus is one subregister too many
        let json = litex_json(0x8000, 8).replace(r#""size": 4"#, r#""size": 5"#);
        assert!(matches!(
            CsrMap::from_json_str(&json),
            Err(Error::RegisterTooWide { size: 5, .. })
        ));
    }

    #[test]
    fn test_sample_csr_json() {
        let map = CsrMap::from_jsonfile("config/csr.json").expect("failed to read csr.json");
        assert_eq!(map.data_width(), 32);
    }
}

use log::{info, trace};
use memmap2::{MmapOptions, MmapRaw};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::ptr;

use rhctl_core::{Csr, RegisterAccess};

use crate::csr_map::{CsrMap, CSR_STRIDE};
use crate::{Error, Result};

/// Physical memory device.
pub const DEV_MEM: &str = "/dev/mem";

fn page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as u64 } else { 4096 }
}

/// Register window of the engine mapped from physical memory.
///
/// Every subregister is accessed with a single volatile 32-bit load or store, of
/// which LiteX uses the low `csr_data_width` bits.
pub struct DevMem {
    map: CsrMap,
    mmap: MmapRaw,
    /// Bus address of the first mapped byte
    base: u64,
    _file: File,
}

impl DevMem {
    /// Maps the engine registers from `/dev/mem`.
    ///
    /// # Errors
    ///
    /// Returns error if `/dev/mem` cannot be opened or mapped, usually for lack of
    /// privileges.
    pub fn open(map: CsrMap) -> Result<Self> {
        Self::open_path(DEV_MEM, map)
    }

    /// Maps the engine registers from the file at `path`, taking bus addresses as
    /// file offsets.
    pub fn open_path<P: AsRef<Path>>(path: P, map: CsrMap) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path.as_ref())?;
        let (start, end) = map.span();
        if end <= start {
            return Err(Error::InvalidWindow { start, end });
        }
        let page = page_size();
        let base = start & !(page - 1);
        let len = (end - base).div_ceil(page) * page;
        let len = usize::try_from(len).map_err(|_| Error::InvalidWindow { start, end })?;
        let mmap = MmapOptions::new().offset(base).len(len).map_raw(&file)?;
        info!(
            "Mapped engine registers {:#x}..{:#x} from {}",
            start,
            end,
            path.as_ref().display()
        );
        Ok(DevMem {
            map,
            mmap,
            base,
            _file: file,
        })
    }

    /// The register map this window was built from.
    pub fn csr_map(&self) -> &CsrMap {
        &self.map
    }

    fn subregister(&self, addr: u64) -> *mut u32 {
        let offset = (addr - self.base) as usize;
        debug_assert!(offset + 4 <= self.mmap.len());
        unsafe { self.mmap.as_mut_ptr().add(offset) as *mut u32 }
    }

    fn mask(&self) -> u32 {
        match self.map.data_width() {
            32 => u32::MAX,
            width => (1 << width) - 1,
        }
    }
}

impl RegisterAccess for DevMem {
    fn read(&mut self, reg: Csr) -> u32 {
        let location = self.map.location(reg);
        let width = self.map.data_width();
        let mask = self.mask();
        let mut value: u64 = 0;
        // most significant subregister first
        for i in 0..location.size as u64 {
            let word = unsafe { ptr::read_volatile(self.subregister(location.addr + i * CSR_STRIDE)) };
            value = (value << width) | (word & mask) as u64;
        }
        trace!("read {} = {:#x}", reg, value);
        value as u32
    }

    fn write(&mut self, reg: Csr, value: u32) {
        let location = self.map.location(reg);
        let width = self.map.data_width();
        let mask = self.mask();
        trace!("write {} = {:#x}", reg, value);
        for i in 0..location.size {
            let shift = (location.size - 1 - i).saturating_mul(width);
            let word = value.checked_shr(shift).unwrap_or(0) & mask;
            unsafe {
                ptr::write_volatile(
                    self.subregister(location.addr + i as u64 * CSR_STRIDE),
                    word,
                )
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr_map::tests::litex_json;
    use std::io::{Read, Seek, SeekFrom};
    use std::path::PathBuf;

    fn backing_file(name: &str, len: u64) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rhctl-devmem-{}-{}", name, std::process::id()));
        let file = File::create(&path).expect("failed to create backing file");
        file.set_len(len).expect("failed to size backing file");
        path
    }

    #[test]
    fn test_write_reaches_backing() -> anyhow::Result<()> {
        let base = 0x2000;
        let path = backing_file("write", 0x4000);
        let map = CsrMap::from_json_str(&litex_json(base, 32))?;
        let mut dev = DevMem::open_path(&path, map)?;
        let offset = dev.csr_map().location(Csr::RefreshRate).addr;
        assert_eq!(dev.csr_map().data_width(), 32);
        dev.write(Csr::RefreshRate, 0x0000_030e);
        assert_eq!(dev.read(Csr::RefreshRate), 0x30e);
        drop(dev);

        let mut file = File::open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; 4];
        file.read_exact(&mut buf)?;
        assert_eq!(u32::from_ne_bytes(buf), 0x30e);
        std::fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_narrow_subregisters() -> anyhow::Result<()> {
        let path = backing_file("narrow", 0x4000);
        let map = CsrMap::from_json_str(&litex_json(0x1000, 8))?;
        let location = map.location(Csr::AddrToSetVal);
        let mut dev = DevMem::open_path(&path, map)?;
        dev.write(Csr::AddrToSetVal, 0x1234_5678);
        assert_eq!(dev.read(Csr::AddrToSetVal), 0x1234_5678);
        // MSB first
        let first = unsafe { ptr::read_volatile(dev.subregister(location.addr)) };
        let last = unsafe { ptr::read_volatile(dev.subregister(location.addr + 12)) };
        assert_eq!(first, 0x12);
        assert_eq!(last, 0x78);
        drop(dev);
        std::fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_unaligned_window() -> anyhow::Result<()> {
        let path = backing_file("unaligned", 0x4000);
        let map = CsrMap::from_json_str(&litex_json(0x1804, 32))?;
        let mut dev = DevMem::open_path(&path, map)?;
        dev.write_flag(Csr::AutoPrecharge, true);
        assert!(dev.read_flag(Csr::AutoPrecharge));
        assert_eq!(dev.read(Csr::AddrToSetVal), 0);
        drop(dev);
        std::fs::remove_file(path)?;
        Ok(())
    }
}

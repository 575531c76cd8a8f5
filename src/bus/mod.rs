//! The TISC-64 bus: segmented address decoder and interrupt latch.
//!
//! The bus is the single authority for turning a 64-bit address into a
//! backing-store operation. The address space is partitioned at
//! configuration time into non-overlapping regions — RAM (read/write), ROM
//! (read-only), and zero or more device windows — and anything outside every
//! region is an unmapped-address fault.
//!
//! The bus also owns the interrupt latch: a single-slot cell set by devices
//! (via their tick result) and consumed by the CPU once per cycle. A second
//! raise before the first is consumed overwrites it; interrupts are not
//! queued.

pub mod device;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use device::{Device, WriterDevice};

/// A contiguous slice of the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub start: u64,
    pub size: u64,
}

impl Region {
    pub const fn new(start: u64, size: u64) -> Region {
        Region { start, size }
    }

    /// One past the last covered address.
    pub fn end(&self) -> u64 {
        self.start + self.size
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr - self.start < self.size
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// The backing store covering an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionId {
    Ram,
    Rom,
    Device(usize),
}

/// Address-space configuration.
///
/// Region boundaries are configuration, not constants; [`Bus::new`] rejects
/// layouts whose regions overlap. `stack_base` is where the register file
/// points `sp` at reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLayout {
    pub ram: Region,
    pub rom: Region,
    #[serde(default)]
    pub devices: Vec<Region>,
    pub stack_base: u64,
}

impl Default for MemoryLayout {
    /// The firmware map: 16 MiB RAM at 0, 1 MiB ROM above it, one 16-byte
    /// device window above that. The top MiB of RAM is reserved for the
    /// stack.
    fn default() -> Self {
        Self {
            ram: Region::new(0x0000_0000, 0x0100_0000),
            rom: Region::new(0x0100_0000, 0x0010_0000),
            devices: vec![Region::new(0x0110_0000, 0x10)],
            stack_base: 0x00F0_0000,
        }
    }
}

impl MemoryLayout {
    fn regions(&self) -> Vec<Region> {
        let mut all = vec![self.ram, self.rom];
        all.extend(self.devices.iter().copied());
        all
    }
}

/// Access kind, for fault reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
        }
    }
}

/// The bus. Exclusively owns the RAM and ROM buffers and the attached
/// device handles.
pub struct Bus {
    layout: MemoryLayout,
    ram: Vec<u8>,
    rom: Vec<u8>,
    devices: Vec<Box<dyn Device>>,
    interrupt: Option<u8>,
}

impl Bus {
    /// Build a bus from a layout and one device handle per declared device
    /// window, in declaration order.
    pub fn new(layout: MemoryLayout, devices: Vec<Box<dyn Device>>) -> Result<Bus, BusError> {
        let regions = layout.regions();
        for region in &regions {
            if region.size == 0 || region.start.checked_add(region.size).is_none() {
                return Err(BusError::InvalidRegion { region: *region });
            }
        }
        for (i, a) in regions.iter().enumerate() {
            for b in &regions[i + 1..] {
                if a.overlaps(b) {
                    return Err(BusError::OverlappingRegions { a: *a, b: *b });
                }
            }
        }
        if devices.len() != layout.devices.len() {
            return Err(BusError::DeviceCountMismatch {
                declared: layout.devices.len(),
                attached: devices.len(),
            });
        }

        let ram = vec![0; layout.ram.size as usize];
        let rom = vec![0; layout.rom.size as usize];
        Ok(Bus {
            layout,
            ram,
            rom,
            devices,
            interrupt: None,
        })
    }

    /// Build a bus over the default layout, attaching `device` to its
    /// single declared device window.
    pub fn with_default_layout(device: Box<dyn Device>) -> Bus {
        match Bus::new(MemoryLayout::default(), vec![device]) {
            Ok(bus) => bus,
            Err(_) => unreachable!("default memory layout rejected"),
        }
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Resolve an address to its covering region, if any.
    pub fn map(&self, addr: u64) -> Option<RegionId> {
        if self.layout.ram.contains(addr) {
            return Some(RegionId::Ram);
        }
        if self.layout.rom.contains(addr) {
            return Some(RegionId::Rom);
        }
        self.layout
            .devices
            .iter()
            .position(|region| region.contains(addr))
            .map(RegionId::Device)
    }

    /// Read 8 bytes at an absolute address.
    pub fn read(&mut self, addr: u64) -> Result<u64, BusError> {
        match self.map(addr) {
            Some(RegionId::Ram) => load_word(&self.ram, addr, self.layout.ram, Access::Read),
            Some(RegionId::Rom) => load_word(&self.rom, addr, self.layout.rom, Access::Read),
            Some(RegionId::Device(idx)) => {
                let offset = addr - self.layout.devices[idx].start;
                Ok(self.devices[idx].read(offset))
            }
            None => Err(BusError::Unmapped {
                addr,
                access: Access::Read,
            }),
        }
    }

    /// Write 8 bytes at an absolute address.
    pub fn write(&mut self, addr: u64, value: u64) -> Result<(), BusError> {
        match self.map(addr) {
            Some(RegionId::Ram) => store_word(&mut self.ram, addr, self.layout.ram, value),
            Some(RegionId::Rom) => Err(BusError::ReadOnlyViolation { addr }),
            Some(RegionId::Device(idx)) => {
                let offset = addr - self.layout.devices[idx].start;
                self.devices[idx].write(offset, value);
                Ok(())
            }
            None => Err(BusError::Unmapped {
                addr,
                access: Access::Write,
            }),
        }
    }

    /// Copy a firmware image into the start of the ROM region.
    pub fn load_rom(&mut self, image: &[u8]) -> Result<(), BusError> {
        if image.len() > self.rom.len() {
            return Err(BusError::RomImageTooLarge {
                size: image.len(),
                capacity: self.rom.len(),
            });
        }
        self.rom[..image.len()].copy_from_slice(image);
        Ok(())
    }

    /// Set the interrupt latch, overwriting any unconsumed code.
    pub fn send_interrupt(&mut self, code: u8) {
        self.interrupt = Some(code);
    }

    /// Consume the pending interrupt, if any.
    pub fn take_interrupt(&mut self) -> Option<u8> {
        self.interrupt.take()
    }

    /// Peek at the latch without consuming it.
    pub fn pending_interrupt(&self) -> Option<u8> {
        self.interrupt
    }

    /// Drop any pending interrupt (soft reset).
    pub fn clear_interrupt(&mut self) {
        self.interrupt = None;
    }

    /// Advance every attached device by one cycle, forwarding any interrupt
    /// a device returned to the latch.
    pub fn tick_devices(&mut self) {
        for dev in &mut self.devices {
            if let Some(code) = dev.tick() {
                self.interrupt = Some(code);
            }
        }
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("layout", &self.layout)
            .field("devices", &self.devices.len())
            .field("interrupt", &self.interrupt)
            .finish()
    }
}

fn load_word(buf: &[u8], addr: u64, region: Region, access: Access) -> Result<u64, BusError> {
    let offset = (addr - region.start) as usize;
    let end = offset
        .checked_add(8)
        .filter(|&end| end <= buf.len())
        .ok_or(BusError::OutOfRange { addr, access })?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..end]);
    Ok(u64::from_le_bytes(bytes))
}

fn store_word(buf: &mut [u8], addr: u64, region: Region, value: u64) -> Result<(), BusError> {
    let offset = (addr - region.start) as usize;
    let end = offset.checked_add(8).filter(|&end| end <= buf.len()).ok_or(
        BusError::OutOfRange {
            addr,
            access: Access::Write,
        },
    )?;
    buf[offset..end].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Bus faults. Every variant is fatal for the emulated machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("unmapped address {addr:#010x} ({access})")]
    Unmapped { addr: u64, access: Access },

    #[error("write to read-only region at {addr:#010x}")]
    ReadOnlyViolation { addr: u64 },

    #[error("{access} of 8 bytes at {addr:#010x} crosses the end of its region")]
    OutOfRange { addr: u64, access: Access },

    #[error("regions {a:?} and {b:?} overlap")]
    OverlappingRegions { a: Region, b: Region },

    #[error("invalid region {region:?}")]
    InvalidRegion { region: Region },

    #[error("layout declares {declared} device windows but {attached} devices were attached")]
    DeviceCountMismatch { declared: usize, attached: usize },

    #[error("ROM image of {size} bytes exceeds capacity {capacity}")]
    RomImageTooLarge { size: usize, capacity: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A device recording its traffic and raising an interrupt on demand.
    struct Probe {
        last_write: Option<(u64, u64)>,
        raise: Option<u8>,
    }

    impl Probe {
        fn new() -> Self {
            Self {
                last_write: None,
                raise: None,
            }
        }
    }

    impl Device for Probe {
        fn read(&mut self, offset: u64) -> u64 {
            offset + 100
        }
        fn write(&mut self, offset: u64, value: u64) {
            self.last_write = Some((offset, value));
        }
        fn tick(&mut self) -> Option<u8> {
            self.raise.take()
        }
    }

    fn small_layout() -> MemoryLayout {
        MemoryLayout {
            ram: Region::new(0x0000_0000, 0x0100_0000),
            rom: Region::new(0x0100_0000, 0x0010_0000),
            devices: vec![],
            stack_base: 0x00F0_0000,
        }
    }

    #[test]
    fn test_ram_read_write_roundtrip() {
        let mut bus = Bus::new(small_layout(), vec![]).unwrap();

        bus.write(0x100, 0xDEAD_BEEF_CAFE_F00D).unwrap();
        assert_eq!(bus.read(0x100).unwrap(), 0xDEAD_BEEF_CAFE_F00D);
    }

    #[test]
    fn test_unmapped_address_faults() {
        let mut bus = Bus::new(small_layout(), vec![]).unwrap();

        assert_eq!(
            bus.read(0x0200_0000),
            Err(BusError::Unmapped {
                addr: 0x0200_0000,
                access: Access::Read
            })
        );
    }

    #[test]
    fn test_rom_write_faults_and_preserves_contents() {
        let mut bus = Bus::new(small_layout(), vec![]).unwrap();
        bus.load_rom(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let rom_base = bus.layout().rom.start;
        assert_eq!(
            bus.write(rom_base, 0xFF),
            Err(BusError::ReadOnlyViolation { addr: rom_base })
        );
        assert_eq!(
            bus.read(rom_base).unwrap(),
            u64::from_le_bytes([1, 2, 3, 4, 5, 6, 7, 8])
        );
    }

    #[test]
    fn test_ram_access_crossing_region_end_faults() {
        let mut bus = Bus::new(small_layout(), vec![]).unwrap();
        let last = bus.layout().ram.end() - 4;

        assert_eq!(
            bus.read(last),
            Err(BusError::OutOfRange {
                addr: last,
                access: Access::Read
            })
        );
    }

    #[test]
    fn test_overlapping_regions_rejected() {
        let layout = MemoryLayout {
            ram: Region::new(0, 0x1000),
            rom: Region::new(0x0800, 0x1000),
            devices: vec![],
            stack_base: 0,
        };

        assert!(matches!(
            Bus::new(layout, vec![]),
            Err(BusError::OverlappingRegions { .. })
        ));
    }

    #[test]
    fn test_device_region_overlap_rejected() {
        let layout = MemoryLayout {
            ram: Region::new(0, 0x1000),
            rom: Region::new(0x1000, 0x1000),
            devices: vec![Region::new(0x1800, 0x10)],
            stack_base: 0,
        };

        assert!(matches!(
            Bus::new(layout, vec![Box::new(Probe::new())]),
            Err(BusError::OverlappingRegions { .. })
        ));
    }

    #[test]
    fn test_device_count_mismatch_rejected() {
        let mut layout = small_layout();
        layout.devices.push(Region::new(0x0110_0000, 0x10));

        assert_eq!(
            Bus::new(layout, vec![]).err(),
            Some(BusError::DeviceCountMismatch {
                declared: 1,
                attached: 0
            })
        );
    }

    #[test]
    fn test_device_delegation_uses_relative_offsets() {
        let mut layout = small_layout();
        layout.devices.push(Region::new(0x0110_0000, 0x10));
        let mut bus = Bus::new(layout, vec![Box::new(Probe::new())]).unwrap();

        assert_eq!(bus.read(0x0110_0008).unwrap(), 108);
        bus.write(0x0110_0008, 42).unwrap();
        // Probe::read reflects offsets, so mapping is exercised both ways.
        assert_eq!(bus.map(0x0110_0008), Some(RegionId::Device(0)));
    }

    #[test]
    fn test_interrupt_latch_overwrites() {
        let mut bus = Bus::new(small_layout(), vec![]).unwrap();

        bus.send_interrupt(1);
        bus.send_interrupt(2);

        assert_eq!(bus.take_interrupt(), Some(2));
        assert_eq!(bus.take_interrupt(), None);
    }

    #[test]
    fn test_device_tick_raises_latch_via_bus() {
        let mut layout = small_layout();
        layout.devices.push(Region::new(0x0110_0000, 0x10));
        let mut probe = Probe::new();
        probe.raise = Some(3);
        let mut bus = Bus::new(layout, vec![Box::new(probe)]).unwrap();

        bus.tick_devices();

        assert_eq!(bus.pending_interrupt(), Some(3));
    }

    #[test]
    fn test_rom_image_too_large() {
        let layout = MemoryLayout {
            ram: Region::new(0, 0x1000),
            rom: Region::new(0x1000, 0x10),
            devices: vec![],
            stack_base: 0,
        };
        let mut bus = Bus::new(layout, vec![]).unwrap();

        assert_eq!(
            bus.load_rom(&[0; 32]).err(),
            Some(BusError::RomImageTooLarge {
                size: 32,
                capacity: 16
            })
        );
    }
}

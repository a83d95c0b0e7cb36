//! Memory target engine.
//!
//! The write/verify sink for downloaded data and the source for uploads.
//! Every access is bound-checked; faults are sticky and the address of the
//! first fault is kept so a scan can report where corruption began. Faults
//! never stop a transfer.

use std::fmt;

use log::{debug, trace};

/// How downloaded bytes are applied to the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AccessMode {
    /// Write, then read back to confirm.
    #[default]
    Store,
    /// Compare only; never write.
    Verify,
}

/// Backing byte array of a [`MemoryTarget`], indexed from zero.
pub trait ByteStore {
    /// Number of bytes in the store.
    fn len(&self) -> usize;

    /// Whether the store holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the byte at `index` (`index < len()`).
    fn read(&self, index: usize) -> u8;

    /// Write the byte at `index` (`index < len()`).
    fn write(&mut self, index: usize, value: u8);
}

/// Plain RAM store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamStore {
    bytes: Vec<u8>,
}

impl RamStore {
    /// A store of `len` bytes, all `0xFF` (erased).
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0xFF; len],
        }
    }

    /// A store initialised from existing contents.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The stored bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteStore for RamStore {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, index: usize) -> u8 {
        self.bytes[index]
    }

    fn write(&mut self, index: usize, value: u8) {
        self.bytes[index] = value;
    }
}

/// Sticky fault flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FaultFlags(u8);

impl FaultFlags {
    /// No faults.
    pub const NONE: Self = Self(0);
    /// A store failed (read-back mismatch or out of range).
    pub const WRITE: Self = Self(0x01);
    /// A verify compare failed (mismatch or out of range).
    pub const VERIFY: Self = Self(0x02);
    /// An access fell outside the target's address range.
    pub const RANGE: Self = Self(0x04);

    /// Raw flag bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the flags in `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for FaultFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for FaultFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut names = Vec::new();
        if self.contains(Self::WRITE) {
            names.push("WRITE");
        }
        if self.contains(Self::VERIFY) {
            names.push("VERIFY");
        }
        if self.contains(Self::RANGE) {
            names.push("RANGE");
        }
        f.write_str(&names.join(" | "))
    }
}

/// Accumulated fault state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FaultStatus {
    /// Sticky flags.
    pub flags: FaultFlags,
    /// Address of the first fault since the last reset.
    pub first_fault: Option<u32>,
}

impl FaultStatus {
    /// Whether any fault was recorded.
    pub fn is_clean(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Non-mutating fault queries, one byte at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultQuery {
    /// The flag bits.
    Flags,
    /// Low byte of the first-fault address.
    AddressLow,
    /// High byte of the first-fault address.
    AddressHigh,
}

/// Addressable byte target with fault tracking.
#[derive(Debug, Clone)]
pub struct MemoryTarget<S = RamStore> {
    store: S,
    base: u32,
    status: FaultStatus,
}

impl MemoryTarget<RamStore> {
    /// A RAM target of `len` bytes starting at `base`.
    pub fn ram(base: u32, len: usize) -> Self {
        Self::new(base, RamStore::new(len))
    }

    /// The full contents of a RAM target.
    pub fn image(&self) -> &[u8] {
        self.store.as_bytes()
    }
}

impl<S: ByteStore> MemoryTarget<S> {
    /// Wrap `store`, mapping its first byte to `base`.
    pub fn new(base: u32, store: S) -> Self {
        Self {
            store,
            base,
            status: FaultStatus::default(),
        }
    }

    /// First address of the target.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Size of the target in bytes.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the target has no bytes.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// The backing store.
    pub fn backing(&self) -> &S {
        &self.store
    }

    /// Whether `address` lies inside the target.
    pub fn contains(&self, address: u32) -> bool {
        self.index(address).is_some()
    }

    fn index(&self, address: u32) -> Option<usize> {
        let offset = usize::try_from(address.checked_sub(self.base)?).ok()?;
        (offset < self.store.len()).then_some(offset)
    }

    /// Clear all fault state.
    pub fn reset(&mut self) {
        debug!("memory: fault state reset");
        self.status = FaultStatus::default();
    }

    /// Write `value` at `address` and confirm by reading it back.
    pub fn store(&mut self, address: u32, value: u8) {
        let Some(index) = self.index(address) else {
            self.fault(address, FaultFlags::WRITE | FaultFlags::RANGE);
            return;
        };
        self.store.write(index, value);
        if self.store.read(index) != value {
            self.fault(address, FaultFlags::WRITE);
        }
    }

    /// Compare the byte at `address` with `value` without writing.
    pub fn verify(&mut self, address: u32, value: u8) {
        let Some(index) = self.index(address) else {
            self.fault(address, FaultFlags::VERIFY | FaultFlags::RANGE);
            return;
        };
        if self.store.read(index) != value {
            self.fault(address, FaultFlags::VERIFY);
        }
    }

    /// Store or verify according to `mode`.
    pub fn apply(&mut self, mode: AccessMode, address: u32, value: u8) {
        match mode {
            AccessMode::Store => self.store(address, value),
            AccessMode::Verify => self.verify(address, value),
        }
    }

    /// Read the byte at `address`, if inside the target.
    pub fn read(&self, address: u32) -> Option<u8> {
        self.index(address)
            .map(|index| self.store.read(index))
    }

    /// Store a run of bytes starting at `address`.
    pub fn load(&mut self, address: u32, bytes: &[u8]) {
        for (offset, &b) in (0u32..).zip(bytes) {
            self.store(address.wrapping_add(offset), b);
        }
    }

    /// Accumulated fault flags and first-fault address.
    pub fn fault_status(&self) -> FaultStatus {
        self.status
    }

    /// One byte of fault state; never mutates.
    pub fn query(&self, query: FaultQuery) -> u8 {
        let [_, _, high, low] = self
            .status
            .first_fault
            .unwrap_or(0)
            .to_be_bytes();
        match query {
            FaultQuery::Flags => self.status.flags.bits(),
            FaultQuery::AddressLow => low,
            FaultQuery::AddressHigh => high,
        }
    }

    fn fault(&mut self, address: u32, flags: FaultFlags) {
        trace!("memory: {flags:?} fault at 0x{address:08X}");
        self.status.flags.insert(flags);
        if self.status.first_fault.is_none() {
            debug!("memory: first fault at 0x{address:08X}");
            self.status.first_fault = Some(address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A store whose bit 0 is stuck low.
    struct StuckBitStore(Vec<u8>);

    impl ByteStore for StuckBitStore {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn read(&self, index: usize) -> u8 {
            self.0[index]
        }

        fn write(&mut self, index: usize, value: u8) {
            self.0[index] = value & 0xFE;
        }
    }

    #[test]
    fn test_store_and_read_back() {
        let mut mem = MemoryTarget::ram(0x1000, 16);
        mem.store(0x1000, 0xAB);
        mem.store(0x100F, 0xCD);
        assert_eq!(mem.read(0x1000), Some(0xAB));
        assert_eq!(mem.read(0x100F), Some(0xCD));
        assert_eq!(mem.read(0x1010), None);
        assert!(mem.fault_status().is_clean());
    }

    #[test]
    fn test_out_of_range_store_is_a_noop_fault() {
        let mut mem = MemoryTarget::ram(0x1000, 16);
        let before = mem.image().to_vec();
        mem.store(0x0FFF, 0x00);
        assert_eq!(mem.image(), before.as_slice());
        let status = mem.fault_status();
        assert!(status.flags.contains(FaultFlags::WRITE));
        assert!(status.flags.contains(FaultFlags::RANGE));
        assert_eq!(status.first_fault, Some(0x0FFF));
    }

    #[test]
    fn test_first_fault_address_is_kept() {
        let mut mem = MemoryTarget::ram(0, 0x100);
        mem.store(0x200, 1);
        mem.store(0x300, 2);
        mem.verify(0x400, 3);
        let status = mem.fault_status();
        assert_eq!(status.first_fault, Some(0x200));
        assert!(status.flags.contains(FaultFlags::VERIFY));
        assert_eq!(mem.query(FaultQuery::AddressHigh), 0x02);
        assert_eq!(mem.query(FaultQuery::AddressLow), 0x00);
        assert_eq!(
            mem.query(FaultQuery::Flags),
            (FaultFlags::WRITE | FaultFlags::VERIFY | FaultFlags::RANGE).bits()
        );
        // Queries do not mutate.
        assert_eq!(mem.fault_status(), status);

        mem.reset();
        assert!(mem.fault_status().is_clean());
        assert_eq!(mem.fault_status().first_fault, None);
    }

    #[test]
    fn test_readback_mismatch_flags_write_fault() {
        let mut mem = MemoryTarget::new(0, StuckBitStore(vec![0; 8]));
        mem.store(2, 0x10);
        assert!(mem.fault_status().is_clean());
        mem.store(3, 0x11);
        mem.store(4, 0x13);
        let status = mem.fault_status();
        assert_eq!(status.flags, FaultFlags::WRITE);
        assert_eq!(status.first_fault, Some(3));
        assert_eq!(mem.backing().0[3], 0x10);
    }

    #[test]
    fn test_verify_compares_without_writing() {
        let mut mem = MemoryTarget::ram(0, 4);
        mem.load(0, &[1, 2, 3, 4]);
        mem.apply(AccessMode::Verify, 1, 2);
        assert!(mem.fault_status().is_clean());
        mem.apply(AccessMode::Verify, 2, 9);
        assert_eq!(mem.read(2), Some(3));
        assert_eq!(mem.fault_status().flags, FaultFlags::VERIFY);
        assert_eq!(mem.fault_status().first_fault, Some(2));
    }

    #[test]
    fn test_fault_flags_debug() {
        assert_eq!(format!("{:?}", FaultFlags::NONE), "NONE");
        assert_eq!(
            format!("{:?}", FaultFlags::WRITE | FaultFlags::RANGE),
            "WRITE | RANGE"
        );
    }
}

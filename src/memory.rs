use crate::buffer::get_u32;
use crate::error::MemoryError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Handle for an issued memory request; complete once the memory reports it so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u64);

/// Memory seen by SMEM and FLAT instructions.
///
/// Data moves when `load`/`store` is called. Completion is reported separately
/// through tickets so that wait counters can lag behind the access.
pub trait Memory {
    fn load(&mut self, address: u64, width: usize) -> Result<Vec<u8>, MemoryError>;

    fn store(&mut self, address: u64, bytes: &[u8]) -> Result<(), MemoryError>;

    /// Adds `value` to the dword at `address` and returns the old dword.
    fn atomic_add(&mut self, address: u64, value: u32) -> Result<u32, MemoryError> {
        let old = get_u32(&self.load(address, 4)?, 0);
        self.store(address, &old.wrapping_add(value).to_le_bytes())?;
        Ok(old)
    }

    /// Opens a request covering the accesses of one instruction.
    fn submit(&mut self) -> Result<Ticket, MemoryError>;

    fn is_complete(&self, ticket: Ticket) -> Result<bool, MemoryError>;

    /// Advances the memory clock by one step.
    fn tick(&mut self) -> Result<(), MemoryError> {
        Ok(())
    }
}

const PAGE_SIZE: u64 = 0x1000;

/// Region-allocated byte memory with a fixed completion latency in ticks.
#[derive(Debug, Default)]
pub struct FlatMemory {
    regions: BTreeMap<u64, Vec<u8>>,
    next_base: u64,
    latency: u64,
    clock: u64,
}

impl FlatMemory {
    pub fn new(latency: u64) -> Self {
        FlatMemory {
            regions: BTreeMap::new(),
            next_base: PAGE_SIZE,
            latency,
            clock: 0,
        }
    }

    /// Maps `size` zeroed bytes and returns their base address.
    pub fn allocate(&mut self, size: usize) -> u64 {
        let base = self.next_base;
        let pages = (size as u64 + PAGE_SIZE - 1) / PAGE_SIZE;
        // leave an unmapped page between regions
        self.next_base += (pages + 1) * PAGE_SIZE;
        self.regions.insert(base, vec![0; size]);
        base
    }

    pub fn allocate_with(&mut self, bytes: &[u8]) -> u64 {
        let base = self.allocate(bytes.len());
        if let Some(region) = self.regions.get_mut(&base) {
            region.copy_from_slice(bytes);
        }
        base
    }

    pub fn read(&self, address: u64, width: usize) -> Result<&[u8], MemoryError> {
        let unmapped = MemoryError::Unmapped { address, width };
        let (&base, region) = self.regions.range(..=address).next_back().ok_or(unmapped.clone())?;
        let offset = (address - base) as usize;
        region.get(offset..offset + width).ok_or(unmapped)
    }

    fn read_mut(&mut self, address: u64, width: usize) -> Result<&mut [u8], MemoryError> {
        let unmapped = MemoryError::Unmapped { address, width };
        let (&base, region) = self
            .regions
            .range_mut(..=address)
            .next_back()
            .ok_or(unmapped.clone())?;
        let offset = (address - base) as usize;
        region.get_mut(offset..offset + width).ok_or(unmapped)
    }

    pub fn latency(&self) -> u64 {
        self.latency
    }
}

impl Memory for FlatMemory {
    fn load(&mut self, address: u64, width: usize) -> Result<Vec<u8>, MemoryError> {
        self.read(address, width).map(|bytes| bytes.to_vec())
    }

    fn store(&mut self, address: u64, bytes: &[u8]) -> Result<(), MemoryError> {
        self.read_mut(address, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    fn submit(&mut self) -> Result<Ticket, MemoryError> {
        Ok(Ticket(self.clock + self.latency))
    }

    fn is_complete(&self, ticket: Ticket) -> Result<bool, MemoryError> {
        Ok(self.clock >= ticket.0)
    }

    fn tick(&mut self) -> Result<(), MemoryError> {
        self.clock += 1;
        Ok(())
    }
}

impl<M: Memory> Memory for Arc<Mutex<M>> {
    fn load(&mut self, address: u64, width: usize) -> Result<Vec<u8>, MemoryError> {
        self.lock().map_err(|_| MemoryError::Poisoned)?.load(address, width)
    }

    fn store(&mut self, address: u64, bytes: &[u8]) -> Result<(), MemoryError> {
        self.lock().map_err(|_| MemoryError::Poisoned)?.store(address, bytes)
    }

    fn atomic_add(&mut self, address: u64, value: u32) -> Result<u32, MemoryError> {
        self.lock().map_err(|_| MemoryError::Poisoned)?.atomic_add(address, value)
    }

    fn submit(&mut self) -> Result<Ticket, MemoryError> {
        self.lock().map_err(|_| MemoryError::Poisoned)?.submit()
    }

    fn is_complete(&self, ticket: Ticket) -> Result<bool, MemoryError> {
        self.lock().map_err(|_| MemoryError::Poisoned)?.is_complete(ticket)
    }

    fn tick(&mut self) -> Result<(), MemoryError> {
        self.lock().map_err(|_| MemoryError::Poisoned)?.tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_isolated() {
        let mut mem = FlatMemory::new(0);
        let a = mem.allocate_with(&[1, 2, 3, 4]);
        let b = mem.allocate(16);
        assert_ne!(a, b);
        assert_eq!(mem.load(a + 1, 2), Ok(vec![2, 3]));
        assert!(mem.load(a + 2, 4).is_err());
        assert!(mem.load(0, 4).is_err());
        mem.store(b + 8, &[9, 9]).unwrap();
        assert_eq!(mem.read(b + 8, 2).unwrap(), &[9, 9]);
    }

    #[test]
    fn tickets_complete_after_latency() {
        let mut mem = FlatMemory::new(3);
        let ticket = mem.submit().unwrap();
        for _ in 0..2 {
            mem.tick().unwrap();
            assert_eq!(mem.is_complete(ticket), Ok(false));
        }
        mem.tick().unwrap();
        assert_eq!(mem.is_complete(ticket), Ok(true));
    }

    #[test]
    fn shared_memory_forwards() {
        let mut shared = Arc::new(Mutex::new(FlatMemory::new(0)));
        let base = shared.lock().unwrap().allocate(8);
        shared.store(base, &[5; 4]).unwrap();
        assert_eq!(shared.load(base, 4), Ok(vec![5; 4]));
        assert_eq!(shared.atomic_add(base, 1), Ok(0x0505_0505));
        assert_eq!(shared.load(base, 4), Ok(vec![6, 5, 5, 5]));
    }
}

//! Shared memory regions transferable alongside channel messages

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::types::ChannelError;

/// Largest region that can be allocated
pub const MAX_SHARED_MEMORY_SIZE: usize = 64 * 1024 * 1024;

/// Fixed-size byte region; clones refer to the same memory
#[derive(Debug, Clone)]
pub struct SharedMemory {
    data: Arc<Mutex<Vec<u8>>>,
}

impl SharedMemory {
    /// Allocate a zero-filled region of `size` bytes
    pub fn create(size: usize) -> Result<Self, ChannelError> {
        if size > MAX_SHARED_MEMORY_SIZE {
            return Err(ChannelError::NoMemory);
        }
        Ok(Self {
            data: Arc::new(Mutex::new(vec![0; size])),
        })
    }

    /// Allocate a region holding exactly `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChannelError> {
        let region = Self::create(bytes.len())?;
        region.write(0, bytes)?;
        Ok(region)
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    /// Copy `bytes` into the region starting at `offset`
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<(), ChannelError> {
        let mut data = self.lock();
        let end = Self::checked_end(offset, bytes.len(), data.len())?;
        data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy `len` bytes out of the region starting at `offset`
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, ChannelError> {
        let data = self.lock();
        let end = Self::checked_end(offset, len, data.len())?;
        Ok(data[offset..end].to_vec())
    }

    /// Copy of the whole region
    pub fn read_all(&self) -> Vec<u8> {
        self.lock().clone()
    }

    fn checked_end(offset: usize, len: usize, size: usize) -> Result<usize, ChannelError> {
        offset
            .checked_add(len)
            .filter(|end| *end <= size)
            .ok_or_else(|| {
                ChannelError::OutOfRange(format!(
                    "range {}+{} exceeds region of {} bytes",
                    offset, len, size
                ))
            })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_sizes_region_to_contents() {
        let region = SharedMemory::from_bytes(b"ls\ncd /tmp\n").unwrap();
        assert_eq!(region.size(), 11);
        assert_eq!(region.read_all(), b"ls\ncd /tmp\n");
    }

    #[test]
    fn test_clones_share_memory() {
        let region = SharedMemory::create(4).unwrap();
        let other = region.clone();
        other.write(1, b"ab").unwrap();
        assert_eq!(region.read(0, 4).unwrap(), vec![0, b'a', b'b', 0]);
    }

    #[test]
    fn test_out_of_range_access_is_rejected() {
        let region = SharedMemory::create(2).unwrap();
        assert!(matches!(
            region.write(1, b"xyz"),
            Err(ChannelError::OutOfRange(_))
        ));
        assert!(matches!(
            region.read(usize::MAX, 2),
            Err(ChannelError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_oversized_allocation_fails() {
        assert_eq!(
            SharedMemory::create(MAX_SHARED_MEMORY_SIZE + 1).unwrap_err(),
            ChannelError::NoMemory
        );
    }
}

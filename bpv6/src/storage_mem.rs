use super::*;

/// An in-memory [`PayloadStore`].
#[derive(Default, Debug)]
pub struct MemoryStore {
    data: Vec<u8>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl From<Vec<u8>> for MemoryStore {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl PayloadStore for MemoryStore {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn set_len(&mut self, len: u64) -> storage::Result<()> {
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> storage::Result<()> {
        self.data.truncate(len as usize);
        Ok(())
    }

    fn read_data(&self, offset: u64, buf: &mut [u8]) -> storage::Result<()> {
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= self.data.len())
            .ok_or("payload read past end of store")?;
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_data(&mut self, data: &[u8], dst_offset: u64) -> storage::Result<()> {
        let start = dst_offset as usize;
        let end = start
            .checked_add(data.len())
            .ok_or("payload write offset overflow")?;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }
}

/// Allocates [`MemoryStore`] payloads.
#[derive(Default, Debug, Clone, Copy)]
pub struct MemoryAllocator;

impl PayloadAllocator for MemoryAllocator {
    fn allocate(&self) -> storage::Result<Box<dyn PayloadStore>> {
        Ok(Box::new(MemoryStore::new()))
    }
}

use embedded_storage_async::nor_flash::{NorFlashError, NorFlashErrorKind};

/// Sector size of [`MemFlash`]
pub const MEM_FLASH_SECTOR_SIZE: usize = 4096;

/// Error of [`MemFlash`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemFlashError {
    NotAligned,
    OutOfBounds,
    /// Failure requested with [`MemFlash::fail_write_after`] or [`MemFlash::power_off_after`]
    Injected,
}

impl NorFlashError for MemFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            MemFlashError::NotAligned => NorFlashErrorKind::NotAligned,
            MemFlashError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            MemFlashError::Injected => NorFlashErrorKind::Other,
        }
    }
}

/// RAM backed `NorFlash`, for hosts without flash storage and for testing.
///
/// Writes follow NOR semantics: they can only clear bits, erasing sets a whole
/// sector back to `0xFF`.
pub struct MemFlash<const SIZE: usize> {
    data: [u8; SIZE],
    writes: usize,
    fail_at: Option<usize>,
    /// Index of the first write lost to a power cut
    power_off_at: Option<usize>,
}

impl<const SIZE: usize> Default for MemFlash<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> MemFlash<SIZE> {
    pub const fn new() -> Self {
        const { assert!(SIZE % MEM_FLASH_SECTOR_SIZE == 0, "MemFlash size must be whole sectors") };
        Self {
            data: [0xFF; SIZE],
            writes: 0,
            fail_at: None,
            power_off_at: None,
        }
    }

    /// Make the write that comes after `n` further successful writes fail, once.
    pub fn fail_write_after(&mut self, n: usize) {
        self.fail_at = Some(self.writes + n);
    }

    /// Cut the power once `n` further writes went through: every later write
    /// and erase fails until [`MemFlash::power_on`].
    pub fn power_off_after(&mut self, n: usize) {
        self.power_off_at = Some(self.writes + n);
    }

    pub fn power_on(&mut self) {
        self.power_off_at = None;
    }

    fn is_powered_off(&self) -> bool {
        self.power_off_at.is_some_and(|at| self.writes >= at)
    }

    /// Number of write calls seen so far, failed ones included.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn check(&self, offset: u32, len: usize, align: usize) -> Result<(), MemFlashError> {
        let offset = offset as usize;
        if offset % align != 0 || len % align != 0 {
            return Err(MemFlashError::NotAligned);
        }
        if offset + len > SIZE {
            return Err(MemFlashError::OutOfBounds);
        }
        Ok(())
    }

    fn do_read(&self, offset: u32, bytes: &mut [u8]) -> Result<(), MemFlashError> {
        self.check(offset, bytes.len(), 1)?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.data[start..start + bytes.len()]);
        Ok(())
    }

    fn do_write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), MemFlashError> {
        let index = self.writes;
        if self.is_powered_off() {
            return Err(MemFlashError::Injected);
        }
        self.writes += 1;
        if self.fail_at == Some(index) {
            self.fail_at = None;
            return Err(MemFlashError::Injected);
        }
        self.check(offset, bytes.len(), 4)?;
        let start = offset as usize;
        for (cell, byte) in self.data[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }

    fn do_erase(&mut self, from: u32, to: u32) -> Result<(), MemFlashError> {
        if self.is_powered_off() {
            return Err(MemFlashError::Injected);
        }
        if to < from {
            return Err(MemFlashError::OutOfBounds);
        }
        self.check(from, (to - from) as usize, MEM_FLASH_SECTOR_SIZE)?;
        self.data[from as usize..to as usize].fill(0xFF);
        Ok(())
    }
}

impl<const SIZE: usize> embedded_storage::nor_flash::ErrorType for MemFlash<SIZE> {
    type Error = MemFlashError;
}

impl<const SIZE: usize> embedded_storage::nor_flash::NorFlash for MemFlash<SIZE> {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = MEM_FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.do_erase(from, to)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.do_write(offset, bytes)
    }
}

impl<const SIZE: usize> embedded_storage::nor_flash::ReadNorFlash for MemFlash<SIZE> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.do_read(offset, bytes)
    }

    fn capacity(&self) -> usize {
        SIZE
    }
}

impl<const SIZE: usize> embedded_storage_async::nor_flash::NorFlash for MemFlash<SIZE> {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = MEM_FLASH_SECTOR_SIZE;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.do_erase(from, to)
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.do_write(offset, bytes)
    }
}

impl<const SIZE: usize> embedded_storage_async::nor_flash::ReadNorFlash for MemFlash<SIZE> {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.do_read(offset, bytes)
    }

    fn capacity(&self) -> usize {
        SIZE
    }
}

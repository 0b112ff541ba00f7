//! Virtual disk store.
//!
//! Sixteen block-device units whose contents live entirely in host memory.
//! Units address their media in 512-byte sectors; capacity is reported in
//! 8 MiB slices (16384 sectors each) so one image file can carry several
//! logical volumes. The store is passive: it knows nothing about the CPU
//! or the firmware protocol.

/// Sector size in bytes. Fixed by the firmware's disk protocol.
pub const SECTOR_SIZE: usize = 512;

/// Sectors per slice (8 MiB).
pub const SLICE_SECTORS: u32 = 16384;

/// Number of disk units.
pub const UNIT_COUNT: usize = 16;

/// Maximum slices a unit may expose.
pub const MAX_SLICES: u8 = 8;

/// Media identifiers reported to the firmware.
pub const MEDIA_ROM_DRIVE: u8 = 1;
pub const MEDIA_RAM_DRIVE: u8 = 2;
pub const MEDIA_HARD_DISK: u8 = 4;

/// Disk access failure. `status()` gives the firmware status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    /// Unit index or parameter outside the valid range.
    OutOfRange,
    /// No media attached to the unit.
    NotPresent,
    /// Sector lies beyond the end of the attached media.
    SectorOutOfRange,
}

impl DiskError {
    /// Firmware status byte for this error.
    #[must_use]
    pub const fn status(self) -> u8 {
        match self {
            Self::OutOfRange => 0x01,
            Self::NotPresent => 0x02,
            Self::SectorOutOfRange => 0x03,
        }
    }
}

/// One disk unit.
struct DiskUnit {
    present: bool,
    data: Vec<u8>,
    slice_count: u8,
    /// Active slice selected by the firmware (0-based).
    slice: u8,
    /// Current sector offset within the active slice, set by seek.
    position: u32,
    /// Written since attach or last reset.
    dirty: bool,
    media: u8,
}

impl DiskUnit {
    const fn empty() -> Self {
        Self {
            present: false,
            data: Vec::new(),
            slice_count: 1,
            slice: 0,
            position: 0,
            dirty: false,
            media: MEDIA_HARD_DISK,
        }
    }
}

/// The fixed table of disk units.
pub struct DiskStore {
    units: [DiskUnit; UNIT_COUNT],
}

impl DiskStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            units: std::array::from_fn(|_| DiskUnit::empty()),
        }
    }

    fn unit(&self, unit: usize) -> Result<&DiskUnit, DiskError> {
        self.units.get(unit).ok_or(DiskError::OutOfRange)
    }

    fn unit_mut(&mut self, unit: usize) -> Result<&mut DiskUnit, DiskError> {
        self.units.get_mut(unit).ok_or(DiskError::OutOfRange)
    }

    fn present(&self, unit: usize) -> Result<&DiskUnit, DiskError> {
        let u = self.unit(unit)?;
        if u.present { Ok(u) } else { Err(DiskError::NotPresent) }
    }

    fn present_mut(&mut self, unit: usize) -> Result<&mut DiskUnit, DiskError> {
        let u = self.unit_mut(unit)?;
        if u.present { Ok(u) } else { Err(DiskError::NotPresent) }
    }

    /// Attach a media blob to a unit, replacing whatever was there.
    ///
    /// # Errors
    ///
    /// Fails if the unit index or slice count is out of range.
    pub fn attach(&mut self, unit: usize, data: Vec<u8>, slice_count: u8) -> Result<(), DiskError> {
        if !(1..=MAX_SLICES).contains(&slice_count) {
            return Err(DiskError::OutOfRange);
        }
        let u = self.unit_mut(unit)?;
        *u = DiskUnit {
            present: true,
            data,
            slice_count,
            ..DiskUnit::empty()
        };
        Ok(())
    }

    /// Attach a memory-disk blob with an explicit media identifier.
    pub fn attach_memory_disk(
        &mut self,
        unit: usize,
        data: Vec<u8>,
        media: u8,
    ) -> Result<(), DiskError> {
        self.attach(unit, data, 1)?;
        self.units[unit].media = media;
        Ok(())
    }

    /// Detach a unit, dropping its media.
    pub fn detach(&mut self, unit: usize) {
        if let Some(u) = self.units.get_mut(unit) {
            *u = DiskUnit::empty();
        }
    }

    /// Detach every unit.
    pub fn close_all(&mut self) {
        for u in &mut self.units {
            *u = DiskUnit::empty();
        }
    }

    /// Whether a unit has media attached.
    #[must_use]
    pub fn is_present(&self, unit: usize) -> bool {
        self.units.get(unit).is_some_and(|u| u.present)
    }

    /// Number of units with media attached.
    #[must_use]
    pub fn present_count(&self) -> u8 {
        self.units.iter().filter(|u| u.present).count() as u8
    }

    /// The media blob of a unit, for host persistence.
    #[must_use]
    pub fn data(&self, unit: usize) -> Option<&[u8]> {
        self.present(unit).ok().map(|u| u.data.as_slice())
    }

    /// Whether a unit was written since attach or the last reset.
    #[must_use]
    pub fn is_dirty(&self, unit: usize) -> bool {
        self.units.get(unit).is_some_and(|u| u.dirty)
    }

    /// Media identifier for the firmware.
    pub fn media(&self, unit: usize) -> Result<u8, DiskError> {
        Ok(self.present(unit)?.media)
    }

    /// Set how many slices of the image are visible as logical volumes.
    pub fn set_slice_count(&mut self, unit: usize, count: u8) -> Result<(), DiskError> {
        if !(1..=MAX_SLICES).contains(&count) {
            return Err(DiskError::OutOfRange);
        }
        self.unit_mut(unit)?.slice_count = count;
        Ok(())
    }

    /// Currently selected slice of a unit.
    pub fn slice(&self, unit: usize) -> Result<u8, DiskError> {
        Ok(self.present(unit)?.slice)
    }

    /// Select the active slice of a unit.
    pub fn set_slice(&mut self, unit: usize, slice: u8) -> Result<(), DiskError> {
        let u = self.present_mut(unit)?;
        if slice >= u.slice_count {
            return Err(DiskError::OutOfRange);
        }
        u.slice = slice;
        Ok(())
    }

    /// Set the sector position for the next read or write.
    ///
    /// No bounds check happens here; bounds are enforced on access.
    pub fn seek(&mut self, unit: usize, lba: u32) -> Result<(), DiskError> {
        self.present_mut(unit)?.position = lba;
        Ok(())
    }

    /// Current sector position of a unit.
    pub fn position(&self, unit: usize) -> Result<u32, DiskError> {
        Ok(self.present(unit)?.position)
    }

    /// Reset a unit's position and dirty flag.
    pub fn reset_unit(&mut self, unit: usize) -> Result<(), DiskError> {
        let u = self.present_mut(unit)?;
        u.position = 0;
        u.dirty = false;
        Ok(())
    }

    /// Byte offset of the current sector, bounds-checked against the blob.
    fn sector_offset(u: &DiskUnit) -> Result<usize, DiskError> {
        let sector = u64::from(u.slice) * u64::from(SLICE_SECTORS) + u64::from(u.position);
        let offset = sector * SECTOR_SIZE as u64;
        if offset + SECTOR_SIZE as u64 > u.data.len() as u64 {
            return Err(DiskError::SectorOutOfRange);
        }
        Ok(offset as usize)
    }

    /// Read the sector at the current position and advance by one.
    ///
    /// The blob is never extended and never read past its end.
    pub fn read_sector(&mut self, unit: usize, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), DiskError> {
        let u = self.present_mut(unit)?;
        let offset = Self::sector_offset(u)?;
        buf.copy_from_slice(&u.data[offset..offset + SECTOR_SIZE]);
        u.position += 1;
        Ok(())
    }

    /// Write the sector at the current position and advance by one.
    pub fn write_sector(&mut self, unit: usize, buf: &[u8; SECTOR_SIZE]) -> Result<(), DiskError> {
        let u = self.present_mut(unit)?;
        let offset = Self::sector_offset(u)?;
        u.data[offset..offset + SECTOR_SIZE].copy_from_slice(buf);
        u.position += 1;
        u.dirty = true;
        Ok(())
    }

    /// Capacity query: `(total_sectors, slice_sectors)`.
    ///
    /// Total capacity is reported from the slice count, not the blob
    /// length; access bounds are still the blob's.
    pub fn capacity(&self, unit: usize) -> Result<(u32, u32), DiskError> {
        let u = self.present(unit)?;
        Ok((u32::from(u.slice_count) * SLICE_SECTORS, SLICE_SECTORS))
    }
}

impl Default for DiskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector_of(byte: u8) -> [u8; SECTOR_SIZE] {
        [byte; SECTOR_SIZE]
    }

    fn make_store_with_disk(sectors: usize) -> DiskStore {
        let mut store = DiskStore::new();
        store
            .attach(0, vec![0u8; sectors * SECTOR_SIZE], 1)
            .expect("attach should succeed");
        store
    }

    #[test]
    fn attach_and_detach() {
        let mut store = make_store_with_disk(4);
        assert!(store.is_present(0));
        assert!(!store.is_present(1));
        assert_eq!(store.present_count(), 1);

        store.detach(0);
        assert!(!store.is_present(0));
        assert_eq!(store.read_sector(0, &mut sector_of(0)), Err(DiskError::NotPresent));
    }

    #[test]
    fn round_trip() {
        let mut store = make_store_with_disk(8);
        store.seek(0, 2).unwrap();
        store.write_sector(0, &sector_of(0xAA)).unwrap();
        store.write_sector(0, &sector_of(0xBB)).unwrap();

        store.seek(0, 2).unwrap();
        let mut buf = sector_of(0);
        store.read_sector(0, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAA);
        store.read_sector(0, &mut buf).unwrap();
        assert_eq!(buf[511], 0xBB);
        assert_eq!(store.position(0).unwrap(), 4);
    }

    #[test]
    fn read_past_end_fails_without_extending() {
        let mut store = make_store_with_disk(4);
        store.seek(0, 4).unwrap();
        let mut buf = sector_of(0);
        assert_eq!(store.read_sector(0, &mut buf), Err(DiskError::SectorOutOfRange));
        assert_eq!(store.data(0).unwrap().len(), 4 * SECTOR_SIZE, "blob not extended");
    }

    #[test]
    fn write_past_end_fails() {
        let mut store = make_store_with_disk(4);
        store.seek(0, 100).unwrap();
        assert_eq!(
            store.write_sector(0, &sector_of(0xFF)),
            Err(DiskError::SectorOutOfRange)
        );
        assert!(!store.is_dirty(0));
    }

    #[test]
    fn partial_trailing_sector_is_unreachable() {
        // 3 sectors plus a 100-byte tail; the tail never reads back.
        let mut store = DiskStore::new();
        store.attach(2, vec![0u8; 3 * SECTOR_SIZE + 100], 1).unwrap();
        store.seek(2, 3).unwrap();
        let mut buf = sector_of(0);
        assert_eq!(store.read_sector(2, &mut buf), Err(DiskError::SectorOutOfRange));
    }

    #[test]
    fn capacity_follows_slice_count() {
        let mut store = make_store_with_disk(4);
        assert_eq!(store.capacity(0).unwrap(), (SLICE_SECTORS, SLICE_SECTORS));

        store.set_slice_count(0, 2).unwrap();
        assert_eq!(store.capacity(0).unwrap(), (2 * SLICE_SECTORS, SLICE_SECTORS));

        assert_eq!(store.set_slice_count(0, 0), Err(DiskError::OutOfRange));
        assert_eq!(store.set_slice_count(0, 9), Err(DiskError::OutOfRange));
    }

    #[test]
    fn slice_selection_offsets_access() {
        // Two slices; one sector of data in each, 8 MiB apart.
        let mut data = vec![0u8; (SLICE_SECTORS as usize + 1) * SECTOR_SIZE];
        data[0] = 0x11;
        data[SLICE_SECTORS as usize * SECTOR_SIZE] = 0x22;

        let mut store = DiskStore::new();
        store.attach(1, data, 2).unwrap();

        let mut buf = sector_of(0);
        store.seek(1, 0).unwrap();
        store.read_sector(1, &mut buf).unwrap();
        assert_eq!(buf[0], 0x11);

        store.set_slice(1, 1).unwrap();
        store.seek(1, 0).unwrap();
        store.read_sector(1, &mut buf).unwrap();
        assert_eq!(buf[0], 0x22);

        assert_eq!(store.set_slice(1, 2), Err(DiskError::OutOfRange));
    }

    #[test]
    fn dirty_tracking_and_reset() {
        let mut store = make_store_with_disk(4);
        assert!(!store.is_dirty(0));
        store.seek(0, 0).unwrap();
        store.write_sector(0, &sector_of(0x01)).unwrap();
        assert!(store.is_dirty(0));

        store.reset_unit(0).unwrap();
        assert!(!store.is_dirty(0));
        assert_eq!(store.position(0).unwrap(), 0);
    }

    #[test]
    fn close_all_detaches_everything() {
        let mut store = DiskStore::new();
        store.attach(0, vec![0u8; SECTOR_SIZE], 1).unwrap();
        store.attach(5, vec![0u8; SECTOR_SIZE], 1).unwrap();
        store.close_all();
        assert_eq!(store.present_count(), 0);
    }

    #[test]
    fn memory_disk_media_ids() {
        let mut store = DiskStore::new();
        store.attach_memory_disk(0, vec![0u8; SECTOR_SIZE], MEDIA_RAM_DRIVE).unwrap();
        store.attach_memory_disk(1, vec![0u8; SECTOR_SIZE], MEDIA_ROM_DRIVE).unwrap();
        store.attach(2, vec![0u8; SECTOR_SIZE], 1).unwrap();
        assert_eq!(store.media(0).unwrap(), MEDIA_RAM_DRIVE);
        assert_eq!(store.media(1).unwrap(), MEDIA_ROM_DRIVE);
        assert_eq!(store.media(2).unwrap(), MEDIA_HARD_DISK);

        // Replacing a memory disk with a plain image resets the media id.
        store.attach(0, vec![0u8; SECTOR_SIZE], 1).unwrap();
        assert_eq!(store.media(0).unwrap(), MEDIA_HARD_DISK);
    }

    #[test]
    fn out_of_range_unit() {
        let mut store = DiskStore::new();
        assert_eq!(store.attach(16, vec![0u8; SECTOR_SIZE], 1), Err(DiskError::OutOfRange));
        assert_eq!(store.seek(16, 0), Err(DiskError::OutOfRange));
    }
}

use crate::{
    consts::BLOCK_SIZE, disk::IoctlRequest, transport::Transport, Error, ErrorFor, SdCard,
    SdCardConfig, DRIVE,
};

use embedded_hal::blocking::delay::DelayMs;

/// SCSI INQUIRY identity, space padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Inquiry {
    pub vendor_id: [u8; 8],
    pub product_id: [u8; 16],
    pub product_rev: [u8; 4],
}

/// Copy `text` into a space padded field.
fn padded<const N: usize>(text: &str) -> [u8; N] {
    let mut field = [b' '; N];
    let len = text.len().min(N);
    field[..len].copy_from_slice(&text.as_bytes()[..len]);
    field
}

impl Inquiry {
    /// Longer strings are truncated.
    pub fn new(vendor_id: &str, product_id: &str, product_rev: &str) -> Self {
        Inquiry {
            vendor_id: padded(vendor_id),
            product_id: padded(product_id),
            product_rev: padded(product_rev),
        }
    }
}

impl Default for Inquiry {
    fn default() -> Self {
        Inquiry::new("SDCARD", "SPI Block Device", "0.1")
    }
}

/// USB mass-storage view of a [`SdCard`] session.
///
/// Transfers are addressed by `lba` plus a byte `offset` into the request, both mapped onto
/// whole 512-byte sectors.
pub struct MassStorage<'a, T: Transport, D: DelayMs<u8>, Config: SdCardConfig> {
    card: &'a SdCard<T, D, Config>,
    inquiry: Inquiry,
}

impl<'a, T: Transport, D: DelayMs<u8>, Config: SdCardConfig> MassStorage<'a, T, D, Config>
where
    T::Error: core::fmt::Debug,
{
    /// Creates a [`MassStorage`] with the default [`Inquiry`].
    pub fn new(card: &'a SdCard<T, D, Config>) -> Self {
        Self::with_inquiry(card, Inquiry::default())
    }

    /// Creates a [`MassStorage`] that reports `inquiry`.
    pub fn with_inquiry(card: &'a SdCard<T, D, Config>, inquiry: Inquiry) -> Self {
        MassStorage { card, inquiry }
    }

    /// Identity returned to SCSI INQUIRY.
    pub fn inquiry(&self) -> &Inquiry {
        &self.inquiry
    }

    /// Medium present and initialized.
    pub fn test_unit_ready(&self) -> bool {
        self.card.is_ready()
    }

    /// Block count and block size, no blocks while not ready.
    pub fn capacity(&self) -> (u32, u16) {
        (self.card.sector_count().unwrap_or(0), BLOCK_SIZE as u16)
    }

    /// Always accepted, power conditions are not managed.
    pub fn start_stop(&self, power_condition: u8, start: bool, load_eject: bool) -> bool {
        debug!(
            "MSC start/stop, power condition: {}, start: {}, load/eject: {}",
            power_condition, start, load_eject
        );
        true
    }

    /// Sector of a transfer, `offset` must be block aligned.
    fn sector(lba: u32, offset: u32) -> Result<u32, ErrorFor<T>> {
        if offset as usize % BLOCK_SIZE != 0 {
            error!("MSC unaligned offset: {}", offset);
            return Err(Error::Parameter);
        }

        lba.checked_add(offset / BLOCK_SIZE as u32)
            .ok_or(Error::Parameter)
    }

    /// Read whole sectors into `buffer`, returns the count of bytes read.
    pub fn read10(&self, lba: u32, offset: u32, buffer: &mut [u8]) -> Result<usize, ErrorFor<T>> {
        let sector = Self::sector(lba, offset)?;
        self.card.read_sectors(buffer, sector)?;

        Ok(buffer.len())
    }

    /// Write whole sectors from `buffer`, returns the count of bytes written.
    pub fn write10(&self, lba: u32, offset: u32, buffer: &[u8]) -> Result<usize, ErrorFor<T>> {
        let sector = Self::sector(lba, offset)?;
        self.card.write_sectors(buffer, sector)?;

        Ok(buffer.len())
    }

    /// End of a host write, flushes the device when it is ready.
    pub fn write10_complete(&self) -> Result<(), ErrorFor<T>> {
        if self.card.is_ready() {
            self.card.disk_ioctl(DRIVE, IoctlRequest::Sync)?;
        }

        Ok(())
    }
}

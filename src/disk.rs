use crate::{
    consts::BLOCK_SIZE, transport::Transport, DiskioDevice, DiskioError, Error, ErrorFor,
    IoctlCmd, Lba, SdCard, SdCardConfig, Status, StatusFlag,
};

use embedded_hal::blocking::delay::DelayMs;

/// The only drive number served by [`SdCard`].
pub const DRIVE: u8 = 0;

/// FatFs control codes accepted by [`SdCard::disk_ioctl_raw`].
pub mod ioctl_codes {
    /// Flush pending writes.
    pub const CTRL_SYNC: u8 = 0;
    /// Sector count, `u32`.
    pub const GET_SECTOR_COUNT: u8 = 1;
    /// Sector size, `u16`.
    pub const GET_SECTOR_SIZE: u8 = 2;
    /// Erase block size in sectors, `u32`.
    pub const GET_BLOCK_SIZE: u8 = 3;
}

/// Control request of the block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoctlRequest {
    /// Every write completes before it returns, nothing to flush.
    Sync,
    SectorCount,
    SectorSize,
    /// Erase block granularity in sectors.
    EraseBlockSize,
}

impl IoctlRequest {
    /// Bytes written by [`SdCard::disk_ioctl_raw`] for this request.
    pub fn result_len(self) -> usize {
        match self {
            IoctlRequest::Sync => 0,
            IoctlRequest::SectorCount | IoctlRequest::EraseBlockSize => 4,
            IoctlRequest::SectorSize => 2,
        }
    }
}

impl TryFrom<u8> for IoctlRequest {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            ioctl_codes::CTRL_SYNC => Ok(IoctlRequest::Sync),
            ioctl_codes::GET_SECTOR_COUNT => Ok(IoctlRequest::SectorCount),
            ioctl_codes::GET_SECTOR_SIZE => Ok(IoctlRequest::SectorSize),
            ioctl_codes::GET_BLOCK_SIZE => Ok(IoctlRequest::EraseBlockSize),
            code => Err(code),
        }
    }
}

/// Result of an [`IoctlRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoctlResponse {
    Done,
    SectorCount(u32),
    SectorSize(u16),
    EraseBlockSize(u32),
}

impl<T: Transport, D: DelayMs<u8>, Config: SdCardConfig> SdCard<T, D, Config>
where
    T::Error: core::fmt::Debug,
{
    /// Validate drive number.
    fn validate_drive(drive: u8) -> Result<(), ErrorFor<T>> {
        if drive == DRIVE {
            Ok(())
        } else {
            warn!("SD unknown drive: {}", drive);
            Err(Error::Parameter)
        }
    }

    /// Buffer of `count` sectors.
    fn sectors_len(buf_len: usize, count: u32) -> Result<usize, ErrorFor<T>> {
        let len = usize::try_from(count)
            .ok()
            .and_then(|count| count.checked_mul(BLOCK_SIZE))
            .ok_or(Error::Parameter)?;

        if count == 0 || buf_len < len {
            error!(
                "SD invalid request, buffer: {}, sectors: {}",
                buf_len, count
            );
            Err(Error::Parameter)
        } else {
            Ok(len)
        }
    }

    /// Status of `drive`, any other drive than [`DRIVE`] is never initialized.
    pub fn disk_status(&self, drive: u8) -> Status {
        if drive == DRIVE {
            self.status
        } else {
            StatusFlag::NotInitialized.into()
        }
    }

    /// Initialize `drive`, see [`SdCard::initialize`].
    pub fn disk_initialize(&mut self, drive: u8) -> Result<(), ErrorFor<T>> {
        Self::validate_drive(drive)?;
        self.init()
    }

    /// Read `count` sectors into the front of `buf`.
    pub fn disk_read(
        &self,
        drive: u8,
        buf: &mut [u8],
        sector: u32,
        count: u32,
    ) -> Result<(), ErrorFor<T>> {
        Self::validate_drive(drive)?;
        self.validate_initialized()?;
        let len = Self::sectors_len(buf.len(), count)?;

        self.read_sectors(&mut buf[..len], sector)
    }

    /// Write `count` sectors from the front of `buf`.
    pub fn disk_write(
        &self,
        drive: u8,
        buf: &[u8],
        sector: u32,
        count: u32,
    ) -> Result<(), ErrorFor<T>> {
        Self::validate_drive(drive)?;
        self.validate_initialized()?;
        let len = Self::sectors_len(buf.len(), count)?;

        self.write_sectors(&buf[..len], sector)
    }

    /// Control request, only answered while ready.
    pub fn disk_ioctl(
        &self,
        drive: u8,
        request: IoctlRequest,
    ) -> Result<IoctlResponse, ErrorFor<T>> {
        Self::validate_drive(drive)?;
        self.validate_initialized()?;

        Ok(match request {
            IoctlRequest::Sync => IoctlResponse::Done,
            IoctlRequest::SectorCount => IoctlResponse::SectorCount(self.sector_count),
            IoctlRequest::SectorSize => IoctlResponse::SectorSize(BLOCK_SIZE as u16),
            IoctlRequest::EraseBlockSize => IoctlResponse::EraseBlockSize(1),
        })
    }

    /// Control request by FatFs code, the result is stored in native byte order.
    pub fn disk_ioctl_raw(&self, drive: u8, code: u8, buf: &mut [u8]) -> Result<(), ErrorFor<T>> {
        Self::validate_drive(drive)?;

        let request = IoctlRequest::try_from(code).map_err(|code| {
            error!("SD unsupported ioctl: {}", code);
            Error::Parameter
        })?;
        if buf.len() < request.result_len() {
            return Err(Error::Parameter);
        }

        match self.disk_ioctl(drive, request)? {
            IoctlResponse::Done => {}
            IoctlResponse::SectorCount(value) | IoctlResponse::EraseBlockSize(value) => {
                buf[..4].copy_from_slice(&value.to_ne_bytes())
            }
            IoctlResponse::SectorSize(value) => buf[..2].copy_from_slice(&value.to_ne_bytes()),
        }

        Ok(())
    }
}

/// Map a driver error onto [`DiskioError`].
fn to_diskio<E>(err: Error<E>) -> DiskioError<Error<E>> {
    match err {
        Error::NotReady => DiskioError::NotInitialized,
        Error::Parameter => DiskioError::InvalidArgument,
        err => DiskioError::Hardware(err),
    }
}

impl<T: Transport, D: DelayMs<u8>, Config: SdCardConfig> DiskioDevice for SdCard<T, D, Config>
where
    T::Error: core::fmt::Debug,
{
    type HardwareError = Error<T::Error>;

    fn status(&self) -> Status {
        self.status
    }

    fn reset(&mut self) {
        info!("SD reset invoked");
        self.status = StatusFlag::NotInitialized.into();
        self.sector_count = 0;
    }

    fn initialize(&mut self) -> Result<(), DiskioError<Self::HardwareError>> {
        if self.is_ready() {
            warn!("SD already is initialized");
            return Err(DiskioError::AlreadyInitialized);
        }

        self.init().map_err(to_diskio)
    }

    fn read(&self, buf: &mut [u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        let sector = u32::try_from(lba).map_err(|_| DiskioError::InvalidArgument)?;
        self.read_sectors(buf, sector).map_err(to_diskio)
    }

    fn write(&self, buf: &[u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        let sector = u32::try_from(lba).map_err(|_| DiskioError::InvalidArgument)?;
        self.write_sectors(buf, sector).map_err(to_diskio)
    }

    fn ioctl(&self, cmd: IoctlCmd) -> Result<(), DiskioError<Self::HardwareError>> {
        self.validate_initialized().map_err(to_diskio)?;

        match cmd {
            IoctlCmd::CtrlSync => Ok(()),
            IoctlCmd::GetSectorCount(sector_count) => {
                *sector_count = Lba::from(self.sector_count);
                Ok(())
            }
            IoctlCmd::GetSectorSize(sector_size) => {
                *sector_size = BLOCK_SIZE;
                Ok(())
            }
            // erase block size in sectors
            IoctlCmd::GetBlockSize(block_size) => {
                *block_size = 1;
                Ok(())
            }
            _ => Err(DiskioError::NotSupported),
        }
    }
}

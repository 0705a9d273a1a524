//! SPI-mode SD card block device written in Embedded Rust.
//!
//! This crate turns a raw SPI-attached SD card into a sector-addressable block device that can be
//! shared by a filesystem (FatFs-style `disk_*` calls, or [`DiskioDevice`]) and a USB mass-storage
//! exporter ([`MassStorage`]).
//!
//! The driver is fully blocking and keeps no lock of its own: callers must make sure that only
//! one block device call is in flight at a time.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

mod block;
mod command;
mod config;
mod consts;
mod crc;
mod disk;
mod init;
mod msc;
mod response;
mod transport;

#[cfg(test)]
mod mock;

pub use crate::command::CommandFrame;
pub use crate::config::{DefaultSdCardConfig, SdCardConfig};
pub use crate::consts::BLOCK_SIZE;
pub use crate::disk::{ioctl_codes, IoctlRequest, IoctlResponse, DRIVE};
pub use crate::init::InitStep;
pub use crate::msc::{Inquiry, MassStorage};
pub use crate::response::{R1Response, WriteRejection};
pub use crate::transport::{BusError, SpiTransport, Transport};
pub use diskio::{
    BlockSize, DiskioDevice, Error as DiskioError, IoctlCmd, Lba, Status, StatusFlag,
};

use crate::consts::{commands, tokens, BLOCK_SIZE_U32};

use core::{
    cell::{RefCell, RefMut},
    marker::PhantomData,
};
use embedded_hal::blocking::delay::DelayMs;
use size::Size;

/// Bounded poll that ran out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// No start block token after READ_SINGLE_BLOCK.
    DataToken,
    /// The card stayed busy after an accepted block.
    WriteBusy,
}

/// [`SdCard`] result error.
///
/// `E` - transport error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// Error from the transport.
    Bus(E),
    /// An initialization step got an unexpected response, the session stays not ready.
    InitFailure { step: InitStep, response: u8 },
    /// Session is not initialized, or its last initialization failed.
    NotReady,
    /// No response when executing this command.
    TimeoutCommand(u8),
    /// The card answered a data command with error flags.
    CommandRejected { command: u8, response: u8 },
    /// A data token or busy poll was exhausted.
    TransferTimeout(Timeout),
    /// The card did not accept a written block.
    WriteRejected(WriteRejection),
    /// Wrong drive, buffer size or control code.
    Parameter,
}

/// Error type alias.
type ErrorFor<T> = Error<<T as Transport>::Error>;

/// SD Card SPI driver, the single session to one physical card.
///
/// `T` - transport, owned exclusively by the session.
/// `D` - delay used between initialization polls.
/// `Config` - Config implementation of driver config trait.
pub struct SdCard<T: Transport, D: DelayMs<u8>, Config: SdCardConfig = DefaultSdCardConfig> {
    transport: RefCell<T>,
    delay: RefCell<D>,
    status: Status,
    sector_count: u32,
    config: PhantomData<Config>,
}

impl<T: Transport, D: DelayMs<u8>, Config: SdCardConfig> SdCard<T, D, Config>
where
    T::Error: core::fmt::Debug,
{
    /// Creates a new, not yet initialized [`SdCard<T, D, Config>`].
    ///
    /// `transport` - bus with the card's chip select.
    /// `delay` - delay provider.
    pub fn new(transport: T, delay: D) -> Self {
        SdCard {
            transport: RefCell::new(transport),
            delay: RefCell::new(delay),
            status: StatusFlag::NotInitialized.into(),
            sector_count: 0,
            config: PhantomData::<Config>,
        }
    }

    /// Returns the transport and delay back.
    pub fn release(self) -> (T, D) {
        (self.transport.into_inner(), self.delay.into_inner())
    }

    /// Runs the initialization sequence, see [`InitStep`].
    ///
    /// Can be called again at any time; the session is not ready while it runs.
    pub fn initialize(&mut self) -> Result<(), ErrorFor<T>> {
        self.init()
    }

    /// Current status flags.
    pub fn status(&self) -> Status {
        self.status
    }

    /// `true` once initialization succeeded.
    pub fn is_ready(&self) -> bool {
        !self.status.contains(StatusFlag::NotInitialized)
    }

    /// Count of 512-byte sectors, valid only when ready.
    pub fn sector_count(&self) -> Option<u32> {
        self.is_ready().then_some(self.sector_count)
    }

    /// Card capacity, valid only when ready.
    pub fn capacity(&self) -> Option<Size> {
        self.sector_count()
            .map(|count| Size::from_bytes(u64::from(count) * u64::from(BLOCK_SIZE_U32)))
    }

    /// Validate buffer for read/write.
    fn validate_buffer_len(buf_len: usize) -> Result<(), ErrorFor<T>> {
        if buf_len == 0 || buf_len % BLOCK_SIZE != 0 {
            error!(
                "SD invalid buffer, length: {}, block size: {}",
                buf_len, BLOCK_SIZE
            );
            Err(Error::Parameter)
        } else {
            Ok(())
        }
    }

    /// Validate initialized.
    fn validate_initialized(&self) -> Result<(), ErrorFor<T>> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    /// Borrow the transport.
    fn transport(&self) -> RefMut<'_, T> {
        self.transport.borrow_mut()
    }

    /// Delay.
    fn delay_ms(&self, ms: u8) {
        self.delay.borrow_mut().delay_ms(ms);
    }

    /// Activate chip select.
    fn select(&self) -> Result<(), ErrorFor<T>> {
        self.transport().select().map_err(Error::Bus)
    }

    /// Deactivate chip select.
    fn deselect(&self) -> Result<(), ErrorFor<T>> {
        self.transport().deselect().map_err(Error::Bus)
    }

    /// CS scope. The card is deselected even when `f` fails.
    fn cs_scope<R, F>(&self, f: F) -> Result<R, ErrorFor<T>>
    where
        F: FnOnce(&Self) -> Result<R, ErrorFor<T>>,
    {
        self.select()?;
        let result = f(self);
        self.deselect()?;

        result
    }

    /// Send one byte and receive one byte.
    fn transfer(&self, data: u8) -> Result<u8, ErrorFor<T>> {
        self.transport().exchange(data).map_err(Error::Bus)
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    fn receive(&self) -> Result<u8, ErrorFor<T>> {
        self.transfer(tokens::IDLE)
    }

    /// Send a byte to the SD card.
    fn send(&self, data: u8) -> Result<(), ErrorFor<T>> {
        self.transfer(data).map(|_| ())
    }

    /// Receive a slice from the SD card.
    fn receive_slice(&self, data: &mut [u8]) -> Result<(), ErrorFor<T>> {
        for byte in data.iter_mut() {
            *byte = self.receive()?;
        }

        Ok(())
    }

    /// Send a slice to the SD card.
    fn send_slice(&self, data: &[u8]) -> Result<(), ErrorFor<T>> {
        for byte in data.iter() {
            self.send(*byte)?;
        }

        Ok(())
    }

    /// Skip byte.
    fn skip_byte(&self) -> Result<(), ErrorFor<T>> {
        self.receive().map(|_| ())
    }

    /// Wait for token, at most `attempts` received bytes.
    fn wait_for_token<F: Fn(u8) -> bool>(
        &self,
        attempts: usize,
        token_validator: F,
        error: ErrorFor<T>,
    ) -> Result<u8, ErrorFor<T>> {
        for _ in 0..attempts {
            let token = self.receive()?;

            if token_validator(token) {
                return Ok(token);
            }
        }

        Err(error)
    }

    /// Send command implementation.
    ///
    /// Returns the last polled byte even when no valid R1 arrived in time.
    fn send_command_impl(&self, cmd: u8, arg: u32) -> Result<R1Response, ErrorFor<T>> {
        self.send_slice(&CommandFrame::new(cmd, arg).to_bytes())?;

        let mut r1 = R1Response(tokens::IDLE);
        for _ in 0..Config::RESPONSE_POLL_ATTEMPTS {
            r1 = R1Response(self.receive()?);

            if r1.is_valid() {
                break;
            }
        }

        trace!("CMD{} arg 0x{:08X} -> 0x{:02X}", cmd, arg, r1.0);

        Ok(r1)
    }

    /// Send command, prefixed with APP_CMD for application commands.
    fn send_command(&self, cmd: u8, arg: u32) -> Result<R1Response, ErrorFor<T>> {
        if (cmd & commands::ACMD_FLAG) != 0 {
            self.send_command_impl(commands::CMD55, 0x0000_0000)?;
        }

        self.send_command_impl(cmd & !commands::ACMD_FLAG, arg)
    }

    /// Check the R1 of a data command.
    fn expect_ready_state(cmd: u8, r1: R1Response) -> Result<(), ErrorFor<T>> {
        if !r1.is_valid() {
            error!("No response from CMD{}", cmd);
            Err(Error::TimeoutCommand(cmd))
        } else if r1 != R1Response::READY_STATE {
            error!("CMD{} failed: 0x{:02X}", cmd, r1.0);
            Err(Error::CommandRejected {
                command: cmd,
                response: r1.0,
            })
        } else {
            Ok(())
        }
    }
}

use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

/// Full-duplex byte transport with a chip-select line.
///
/// Only [`SdCard`](crate::SdCard) drives it, and every command exchange is
/// bracketed by [`select`](Transport::select) and [`deselect`](Transport::deselect).
pub trait Transport {
    /// Transport error type.
    type Error;

    /// Sends one byte and returns the byte clocked in at the same time.
    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error>;

    /// Activate chip select.
    fn select(&mut self) -> Result<(), Self::Error>;

    /// Deactivate chip select.
    fn deselect(&mut self) -> Result<(), Self::Error>;
}

/// [`SpiTransport`] error.
///
/// `T` - SPI error type.
/// `S` - select switch error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError<T, S> {
    /// Error from the SPI peripheral.
    Spi(T),
    /// Couldn't set a select.
    ChipSelect(S),
}

/// [`Transport`] over a blocking embedded-hal SPI bus.
///
/// `Spi` - SPI.
/// `Cs` - Chip select output switch, `on` selects the card.
pub struct SpiTransport<Spi, Cs> {
    spi: Spi,
    cs: Cs,
}

impl<Spi: Transfer<u8>, Cs: OutputSwitch> SpiTransport<Spi, Cs> {
    /// Creates a new [`SpiTransport<Spi, Cs>`].
    ///
    /// `spi` - SPI instance, clocked at 400 kHz or less until the card is ready.
    /// `cs` - chip select output switch.
    pub fn new(spi: Spi, cs: Cs) -> Self {
        SpiTransport { spi, cs }
    }

    /// Returns the SPI and chip select back.
    pub fn release(self) -> (Spi, Cs) {
        (self.spi, self.cs)
    }
}

impl<Spi: Transfer<u8>, Cs: OutputSwitch> Transport for SpiTransport<Spi, Cs> {
    type Error = BusError<Spi::Error, Cs::Error>;

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        self.spi
            .transfer(&mut [byte])
            .map(|b| b[0])
            .map_err(BusError::Spi)
    }

    fn select(&mut self) -> Result<(), Self::Error> {
        self.cs.on().map_err(BusError::ChipSelect)
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        self.cs.off().map_err(BusError::ChipSelect)
    }
}

use crate::{
    consts::{commands, tokens, BLOCK_SIZE},
    response::DataResponse,
    transport::Transport,
    Error, ErrorFor, SdCard, SdCardConfig, Timeout,
};

use embedded_hal::blocking::delay::DelayMs;

impl<T: Transport, D: DelayMs<u8>, Config: SdCardConfig> SdCard<T, D, Config>
where
    T::Error: core::fmt::Debug,
{
    /// Get count of blocks in buffer.
    fn get_block_count(buf_len: usize) -> usize {
        buf_len / BLOCK_SIZE
    }

    /// Sector index of the `offset`-th block of a request.
    fn sector_at(sector: u32, offset: usize) -> Result<u32, ErrorFor<T>> {
        u32::try_from(offset)
            .ok()
            .and_then(|offset| sector.checked_add(offset))
            .ok_or(Error::Parameter)
    }

    /// Read one block, `data` is untouched unless the start token arrived.
    fn read_block(&self, sector: u32, data: &mut [u8]) -> Result<(), ErrorFor<T>> {
        let r1 = self.send_command(commands::CMD17, sector)?;
        Self::expect_ready_state(commands::CMD17, r1)?;

        if let Err(err) = self.wait_for_token(
            Config::READ_TOKEN_ATTEMPTS,
            |token| token == tokens::DATA_START_BLOCK,
            Error::TransferTimeout(Timeout::DataToken),
        ) {
            error!("Data token timeout, sector: {}", sector);
            return Err(err);
        }

        self.receive_slice(data)?;

        // CRC is not checked
        self.skip_byte()?;
        self.skip_byte()?;

        Ok(())
    }

    /// Write one block and wait until the card is done programming it.
    fn write_block(&self, sector: u32, data: &[u8]) -> Result<(), ErrorFor<T>> {
        let r1 = self.send_command(commands::CMD24, sector)?;
        Self::expect_ready_state(commands::CMD24, r1)?;

        self.send(tokens::DATA_START_BLOCK)?;
        self.send_slice(data)?;
        self.send(tokens::IDLE)?;
        self.send(tokens::IDLE)?;

        let response = self.receive()?;
        if let DataResponse::Rejected(reason) = DataResponse::from(response) {
            error!(
                "Write response error: 0x{:02X}, sector: {}, reason: {}",
                response,
                sector,
                debug2format!(reason)
            );
            return Err(Error::WriteRejected(reason));
        }

        if let Err(err) = self.wait_for_token(
            Config::WRITE_BUSY_ATTEMPTS,
            |token| token != 0x00,
            Error::TransferTimeout(Timeout::WriteBusy),
        ) {
            error!("Write timeout, sector: {}", sector);
            return Err(err);
        }

        Ok(())
    }

    /// Reads `buf.len() / 512` sectors starting at `sector`, one READ_SINGLE_BLOCK each.
    ///
    /// On error the blocks before the failing one are already filled in, the
    /// failing block and everything after it must be treated as garbage.
    pub fn read_sectors(&self, buf: &mut [u8], sector: u32) -> Result<(), ErrorFor<T>> {
        self.validate_initialized()?;
        Self::validate_buffer_len(buf.len())?;

        trace!(
            "SD read, sector: {}, count: {}",
            sector,
            Self::get_block_count(buf.len())
        );

        for (i, chunk) in buf.chunks_mut(BLOCK_SIZE).enumerate() {
            let sector = Self::sector_at(sector, i)?;
            self.cs_scope(|s| s.read_block(sector, chunk))?;
        }

        Ok(())
    }

    /// Writes `buf.len() / 512` sectors starting at `sector`, one WRITE_BLOCK each.
    ///
    /// Writes are not rolled back: on error every block before the failing one
    /// is already durable on the card, nothing after it was sent.
    pub fn write_sectors(&self, buf: &[u8], sector: u32) -> Result<(), ErrorFor<T>> {
        self.validate_initialized()?;
        Self::validate_buffer_len(buf.len())?;

        trace!(
            "SD write, sector: {}, count: {}",
            sector,
            Self::get_block_count(buf.len())
        );

        for (i, chunk) in buf.chunks(BLOCK_SIZE).enumerate() {
            let sector = Self::sector_at(sector, i)?;
            self.cs_scope(|s| s.write_block(sector, chunk))?;
        }

        Ok(())
    }
}

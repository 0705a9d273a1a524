/// Sector size, the card is switched to it during initialization.
pub const BLOCK_SIZE: usize = 512;
/// [`BLOCK_SIZE`] as `u32`, for command arguments and capacity math.
pub const BLOCK_SIZE_U32: u32 = BLOCK_SIZE as u32;

pub mod commands {
    /// Mask of the command index inside the first frame byte.
    pub const INDEX_MASK: u8 = 0x3F;
    /// ACMD flag, the command must be preceded by APP_CMD.
    pub const ACMD_FLAG: u8 = 0x80;
    /// GO_IDLE_STATE - init card in spi mode if CS low.
    pub const CMD0: u8 = 0;
    /// SEND_IF_COND - verify SD Memory Card interface operating condition.
    pub const CMD8: u8 = 8;
    /// SET_BLOCKLEN - set the block length for read/write commands.
    pub const CMD16: u8 = 16;
    /// READ_SINGLE_BLOCK - read a single data block from the card.
    pub const CMD17: u8 = 17;
    /// WRITE_BLOCK - write a single data block to the card.
    pub const CMD24: u8 = 24;
    /// APP_CMD - escape for application specific command.
    pub const CMD55: u8 = 55;
    /// SD_SEND_OP_COMD - Sends host capacity support information and activates
    /// the card's initialization process.
    pub const ACMD41: u8 = ACMD_FLAG | 41;
}

pub mod args {
    /// SEND_IF_COND argument: 2.7-3.6V supply, check pattern 0xAA.
    pub const IF_COND_3V3: u32 = 0x0000_01AA;
    /// Check pattern echoed in the last R7 byte.
    pub const IF_COND_CHECK_PATTERN: u8 = 0xAA;
    /// SD_SEND_OP_COMD argument with the host capacity support (HCS) bit.
    pub const OP_COND_HCS: u32 = 0x4000_0000;
}

pub mod tokens {
    /// Byte clocked out while receiving, and the idle level of the data line.
    pub const IDLE: u8 = 0xFF;
    /// Start data token for read or write single block.
    pub const DATA_START_BLOCK: u8 = 0xFE;
    /// Placeholder CRC byte sent while the card ignores command CRCs.
    pub const CRC_PLACEHOLDER: u8 = 0x01;
    /// Mask for data response tokens after a write block operation.
    pub const DATA_RES_MASK: u8 = 0x1F;
    /// Write data accepted token.
    pub const DATA_RES_ACCEPTED: u8 = 0x05;
}

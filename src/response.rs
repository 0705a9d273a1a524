use crate::consts::tokens;

use bitfield::bitfield;

bitfield! {
    /// R1 response bitset.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct R1Response(u8);
    impl Debug;
    pub in_idle_state, _: 0;
    pub erase_reset, _: 1;
    pub illigal_command, _: 2;
    pub command_crc_error, _: 3;
    pub erase_sequence_error, _: 4;
    pub address_error, _: 5;
    pub parameter_error, _: 6;
    pub not_response, _: 7;
}

impl R1Response {
    /// Card finished initialization, no error flags.
    pub const READY_STATE: R1Response = R1Response(0x00);
    /// Card is in idle state, no error flags.
    pub const IN_IDLE_STATE: R1Response = R1Response(0x01);

    /// A real response has bit 7 cleared; `0xFF` is just the idle data line.
    pub fn is_valid(&self) -> bool {
        !self.not_response()
    }
}

/// Trailing bytes of an R7 (SEND_IF_COND) response.
pub type R7Payload = [u8; 4];

bitfield! {
    /// Data response token, sent by the card after a written block.
    pub struct DataResponseToken(u8);
    u8;
    pub zero_bit, _: 4;
    pub status, _: 3, 1;
    pub one_bit, _: 0;
}

/// Reason a written block was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteRejection {
    /// The card computed a different CRC for the block.
    Crc,
    /// The card failed to program the block.
    Write,
    /// Nothing but the idle line came back.
    NoResponse,
    /// Any other data response byte.
    Unknown(u8),
}

/// Decoded data response token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataResponse {
    Accepted,
    Rejected(WriteRejection),
}

impl DataResponse {
    const STATUS_CRC_ERROR: u8 = 0b101;
    const STATUS_WRITE_ERROR: u8 = 0b110;
}

impl From<u8> for DataResponse {
    fn from(byte: u8) -> Self {
        if byte & tokens::DATA_RES_MASK == tokens::DATA_RES_ACCEPTED {
            return DataResponse::Accepted;
        }
        if byte == tokens::IDLE {
            return DataResponse::Rejected(WriteRejection::NoResponse);
        }

        let token = DataResponseToken(byte);
        let rejection = if token.zero_bit() || !token.one_bit() {
            WriteRejection::Unknown(byte)
        } else {
            match token.status() {
                Self::STATUS_CRC_ERROR => WriteRejection::Crc,
                Self::STATUS_WRITE_ERROR => WriteRejection::Write,
                _ => WriteRejection::Unknown(byte),
            }
        };

        DataResponse::Rejected(rejection)
    }
}

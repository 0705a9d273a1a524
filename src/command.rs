use crate::{
    consts::{commands, tokens},
    crc::crc7,
};

use bitfield::bitfield;

bitfield! {
    /// First byte of a command frame.
    pub struct CommandByte0(u8);
    u8;
    pub start_bit, set_start_bit: 7;
    pub transmission_bit, set_transmission_bit: 6;
    pub command_index, set_command_index: 5, 0;
}

bitfield! {
    /// Last byte of a command frame.
    pub struct CommandByte5(u8);
    u8;
    pub crc7, set_crc7: 7, 1;
    pub end_bit, set_end_bit: 0;
}

/// Command frame size in bytes.
pub const FRAME_SIZE: usize = 6;

/// One command, ready to be clocked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    index: u8,
    arg: u32,
    crc: u8,
}

impl CommandFrame {
    /// Builds a frame for command `index` (ACMD flag ignored).
    ///
    /// The CRC is only computed for GO_IDLE_STATE and SEND_IF_COND, the card
    /// does not check it for anything else until CRC_ON_OFF is sent.
    pub fn new(index: u8, arg: u32) -> Self {
        let index = index & commands::INDEX_MASK;
        let mut frame = CommandFrame {
            index,
            arg,
            crc: tokens::CRC_PLACEHOLDER,
        };

        if index == commands::CMD0 || index == commands::CMD8 {
            let bytes = frame.to_bytes();
            let mut byte = CommandByte5(0);
            byte.set_crc7(crc7(&bytes[..FRAME_SIZE - 1]));
            byte.set_end_bit(true);
            frame.crc = byte.0;
        }

        frame
    }

    /// Command index without the ACMD flag.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Command argument.
    pub fn arg(&self) -> u32 {
        self.arg
    }

    /// Last frame byte: CRC7 with the end bit, or the placeholder.
    pub fn crc(&self) -> u8 {
        self.crc
    }

    /// Wire representation: command byte, big-endian argument, CRC byte.
    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let mut first = CommandByte0(0);
        first.set_start_bit(false);
        first.set_transmission_bit(true);
        first.set_command_index(self.index);

        let mut buf = [0; FRAME_SIZE];
        buf[0] = first.0;
        buf[1..5].copy_from_slice(&self.arg.to_be_bytes());
        buf[5] = self.crc;
        buf
    }
}

//! Simulated SPI-mode SD card for unit tests.

use crate::{
    consts::{tokens, BLOCK_SIZE},
    transport::Transport,
    SdCard,
};

use core::cell::RefCell;
use embedded_hal::blocking::delay::DelayMs;
use std::{
    collections::{BTreeMap, VecDeque},
    rc::Rc,
};

/// Commands of a successful initialization of an SDv2 card that is ready on the first ACMD41.
pub const SD_V2_INIT: [(u8, u32); 5] = [
    (0, 0),
    (8, 0x1AA),
    (55, 0),
    (41, 0x4000_0000),
    (16, 512),
];

/// Transport failure injected by [`CardState::fail_after`] or [`CardState::fail_select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault;

/// Bus activity seen by the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Select,
    Deselect,
    /// Byte sent by the host.
    Byte(u8),
}

enum Phase {
    Idle,
    Command { frame: [u8; 6], len: usize },
    WriteToken { sector: u32 },
    WriteData { sector: u32, data: [u8; BLOCK_SIZE], len: usize },
    WriteCrc { sector: u32, data: [u8; BLOCK_SIZE], left: usize },
}

/// Behaviour knobs and recorded traffic of a [`FakeCard`].
pub struct CardState {
    /// An absent card never drives the data line.
    pub present: bool,
    pub go_idle_response: u8,
    pub if_cond_response: u8,
    /// ACMD41 rounds answered with "idle" before the card becomes ready.
    pub op_cond_polls: usize,
    /// APP_CMD and SD_SEND_OP_COMD are never answered.
    pub op_cond_silent: bool,
    pub block_len_response: u8,
    pub read_response: u8,
    /// Idle bytes between R1 and the start block token.
    pub read_latency: usize,
    pub send_data_token: bool,
    pub write_response: u8,
    pub data_response: u8,
    /// Sector answered with a write error data response.
    pub reject_sector: Option<u32>,
    pub busy_bytes: usize,
    pub stuck_busy: bool,
    /// Byte exchanges that still succeed, every later one fails.
    pub fail_after: Option<usize>,
    /// Chip select can't be activated.
    pub fail_select: bool,

    pub events: Vec<Event>,
    pub commands: Vec<(u8, u32)>,
    pub sectors: BTreeMap<u32, [u8; BLOCK_SIZE]>,
    /// Index in `events` of the byte that clocked out the last data response.
    pub data_response_event: Option<usize>,

    selected: bool,
    idle: bool,
    app_cmd: bool,
    busy: bool,
    data_response_pending: bool,
    out: VecDeque<u8>,
    phase: Phase,
}

impl Default for CardState {
    fn default() -> Self {
        CardState {
            present: true,
            go_idle_response: 0x01,
            if_cond_response: 0x01,
            op_cond_polls: 0,
            op_cond_silent: false,
            block_len_response: 0x00,
            read_response: 0x00,
            read_latency: 1,
            send_data_token: true,
            write_response: 0x00,
            data_response: 0xE5,
            reject_sector: None,
            busy_bytes: 4,
            stuck_busy: false,
            fail_after: None,
            fail_select: false,
            events: Vec::new(),
            commands: Vec::new(),
            sectors: BTreeMap::new(),
            data_response_event: None,
            selected: false,
            idle: false,
            app_cmd: false,
            busy: false,
            data_response_pending: false,
            out: VecDeque::new(),
            phase: Phase::Idle,
        }
    }
}

impl CardState {
    /// Forget recorded traffic, keep the card contents.
    pub fn clear_trace(&mut self) {
        self.events.clear();
        self.commands.clear();
        self.data_response_event = None;
    }

    /// Queue an R1 (after one filler byte) and its trailing bytes.
    fn reply(&mut self, r1: u8, extra: &[u8]) {
        self.out.push_back(tokens::IDLE);
        self.out.push_back(r1);
        self.out.extend(extra.iter().copied());
    }

    fn execute(&mut self, frame: [u8; 6]) {
        let cmd = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let app_cmd = core::mem::replace(&mut self.app_cmd, false);
        self.commands.push((cmd, arg));

        match cmd {
            0 => {
                self.idle = true;
                self.reply(self.go_idle_response, &[]);
            }
            8 if self.if_cond_response == 0x01 => {
                self.reply(0x01, &[0x00, 0x00, (arg >> 8) as u8 & 0x0F, arg as u8]);
            }
            8 => self.reply(self.if_cond_response, &[]),
            55 | 41 if self.op_cond_silent => {}
            55 => {
                self.app_cmd = true;
                self.reply(u8::from(self.idle), &[]);
            }
            41 if app_cmd => {
                if self.op_cond_polls > 0 {
                    self.op_cond_polls -= 1;
                    self.reply(0x01, &[]);
                } else {
                    self.idle = false;
                    self.reply(0x00, &[]);
                }
            }
            16 => self.reply(self.block_len_response, &[]),
            17 => {
                self.reply(self.read_response, &[]);
                if self.read_response == 0x00 && self.send_data_token {
                    let data = self.sectors.get(&arg).copied().unwrap_or([0; BLOCK_SIZE]);
                    for _ in 0..self.read_latency {
                        self.out.push_back(tokens::IDLE);
                    }
                    self.out.push_back(tokens::DATA_START_BLOCK);
                    self.out.extend(data.iter().copied());
                    self.out.extend([0x12, 0x34]);
                }
            }
            24 => {
                self.reply(self.write_response, &[]);
                if self.write_response == 0x00 {
                    self.phase = Phase::WriteToken { sector: arg };
                }
            }
            _ => self.reply(0x04 | u8::from(self.idle), &[]),
        }
    }

    fn finish_write(&mut self, sector: u32, data: [u8; BLOCK_SIZE]) {
        let response = if self.reject_sector == Some(sector) {
            0x0D
        } else {
            self.data_response
        };

        self.out.push_back(response);
        self.data_response_pending = true;

        if response & 0x1F == 0x05 {
            self.sectors.insert(sector, data);
            if self.stuck_busy {
                self.busy = true;
            } else {
                for _ in 0..self.busy_bytes {
                    self.out.push_back(0x00);
                }
            }
        }
    }

    fn receive(&mut self, byte: u8) {
        self.phase = match core::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle if byte & 0xC0 == 0x40 => {
                let mut frame = [0; 6];
                frame[0] = byte;
                Phase::Command { frame, len: 1 }
            }
            Phase::Idle => Phase::Idle,
            Phase::Command { mut frame, len } => {
                frame[len] = byte;
                if len + 1 == frame.len() {
                    self.execute(frame);
                    // a write command switches the phase itself
                    core::mem::replace(&mut self.phase, Phase::Idle)
                } else {
                    Phase::Command {
                        frame,
                        len: len + 1,
                    }
                }
            }
            Phase::WriteToken { sector } if byte == tokens::DATA_START_BLOCK => Phase::WriteData {
                sector,
                data: [0; BLOCK_SIZE],
                len: 0,
            },
            Phase::WriteToken { sector } => Phase::WriteToken { sector },
            Phase::WriteData {
                sector,
                mut data,
                len,
            } => {
                data[len] = byte;
                if len + 1 == BLOCK_SIZE {
                    Phase::WriteCrc {
                        sector,
                        data,
                        left: 2,
                    }
                } else {
                    Phase::WriteData {
                        sector,
                        data,
                        len: len + 1,
                    }
                }
            }
            Phase::WriteCrc { sector, data, left } => {
                if left == 1 {
                    self.finish_write(sector, data);
                    Phase::Idle
                } else {
                    Phase::WriteCrc {
                        sector,
                        data,
                        left: left - 1,
                    }
                }
            }
        };
    }
}

/// [`Transport`] backed by a shared [`CardState`].
pub struct FakeCard {
    state: Rc<RefCell<CardState>>,
}

impl FakeCard {
    /// Creates a card with default behaviour and a handle to inspect it.
    pub fn new() -> (Self, Rc<RefCell<CardState>>) {
        let state = Rc::new(RefCell::new(CardState::default()));
        (
            FakeCard {
                state: state.clone(),
            },
            state,
        )
    }
}

impl Transport for FakeCard {
    type Error = BusFault;

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        let mut state = self.state.borrow_mut();
        if let Some(left) = state.fail_after.as_mut() {
            if *left == 0 {
                return Err(BusFault);
            }
            *left -= 1;
        }
        state.events.push(Event::Byte(byte));

        if !state.present || !state.selected {
            return Ok(tokens::IDLE);
        }

        let idle_level = if state.busy { 0x00 } else { tokens::IDLE };
        let reply = state.out.pop_front().unwrap_or(idle_level);
        if state.data_response_pending {
            state.data_response_pending = false;
            let index = state.events.len() - 1;
            state.data_response_event = Some(index);
        }

        state.receive(byte);

        Ok(reply)
    }

    fn select(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.fail_select {
            return Err(BusFault);
        }
        state.events.push(Event::Select);
        state.selected = true;
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.events.push(Event::Deselect);
        state.selected = false;
        state.out.clear();
        state.phase = Phase::Idle;
        state.data_response_pending = false;
        Ok(())
    }
}

/// Delay that only counts calls.
#[derive(Default)]
pub struct NoDelay {
    pub calls: usize,
}

impl DelayMs<u8> for NoDelay {
    fn delay_ms(&mut self, _ms: u8) {
        self.calls += 1;
    }
}

/// Bytes sent by the host inside each select/deselect window.
pub fn select_windows(events: &[Event]) -> Vec<Vec<u8>> {
    let mut windows = Vec::new();
    let mut current: Option<Vec<u8>> = None;

    for event in events {
        match event {
            Event::Select => current = Some(Vec::new()),
            Event::Deselect => windows.extend(current.take()),
            Event::Byte(byte) => {
                if let Some(window) = current.as_mut() {
                    window.push(*byte);
                }
            }
        }
    }

    windows
}

/// Initialized session on a fresh [`FakeCard`], with the trace cleared.
pub fn initialized_card() -> (SdCard<FakeCard, NoDelay>, Rc<RefCell<CardState>>) {
    let (bus, state) = FakeCard::new();
    let mut card = SdCard::new(bus, NoDelay::default());
    card.initialize().unwrap();
    state.borrow_mut().clear_trace();
    (card, state)
}

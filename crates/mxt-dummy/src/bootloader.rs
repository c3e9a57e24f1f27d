//! Emulated bootloader state machine

use mxt_core::bootloader::{status, EXIT_COMMAND, UNLOCK_COMMAND};

/// Bootloader id reported in the status byte
pub const BOOTLOADER_ID: u8 = 0x01;

/// Bootloader version reported with the extended id
pub const BOOTLOADER_VERSION: u8 = 0x0A;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitingCommand,
    WaitingFrame,
    Checking { pass: bool, reported: bool },
}

/// What a write to the bootloader asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    None,
    Exit,
}

#[derive(Debug, Clone)]
pub(crate) struct EmulatedBootloader {
    state: State,
    extended_id: bool,
    pub(crate) fail_frames: u32,
    pub(crate) frames: Vec<Vec<u8>>,
    pub(crate) rejected: Vec<Vec<u8>>,
}

impl EmulatedBootloader {
    pub(crate) fn new(extended_id: bool) -> Self {
        Self {
            state: State::WaitingCommand,
            extended_id,
            fail_frames: 0,
            frames: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Start over in the waiting-for-command state
    pub(crate) fn enter(&mut self) {
        self.state = State::WaitingCommand;
        self.frames.clear();
        self.rejected.clear();
    }

    /// CHG level seen by the host
    ///
    /// Every state answers on the first status read, so a status is always
    /// pending and the line stays asserted in all states.
    pub(crate) fn chg_asserted(&self) -> bool {
        true
    }

    pub(crate) fn has_frames(&self) -> bool {
        !self.frames.is_empty()
    }

    pub(crate) fn idle(&self) -> bool {
        self.state == State::WaitingFrame
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) {
        let val = match self.state {
            State::WaitingCommand => {
                let id = if self.extended_id {
                    status::EXTENDED_ID
                } else {
                    BOOTLOADER_ID
                };
                status::WAITING_BOOTLOAD_CMD | id
            }
            State::WaitingFrame => status::WAITING_FRAME_DATA,
            State::Checking { pass, reported } => {
                if !reported {
                    self.state = State::Checking {
                        pass,
                        reported: true,
                    };
                    status::FRAME_CRC_CHECK
                } else {
                    self.state = State::WaitingFrame;
                    if pass {
                        status::FRAME_CRC_PASS
                    } else {
                        status::FRAME_CRC_FAIL
                    }
                }
            }
        };

        let reply = [val, BOOTLOADER_ID, BOOTLOADER_VERSION];
        for (out, b) in buf.iter_mut().zip(reply.iter().chain(std::iter::repeat(&0))) {
            *out = *b;
        }
    }

    pub(crate) fn write(&mut self, data: &[u8]) -> Action {
        match self.state {
            State::WaitingCommand => {
                if data == UNLOCK_COMMAND {
                    log::debug!("dummy: bootloader unlocked");
                    self.state = State::WaitingFrame;
                } else if data == EXIT_COMMAND {
                    return Action::Exit;
                } else {
                    log::warn!("dummy: unexpected bootloader command {:02X?}", data);
                }
            }
            State::WaitingFrame => {
                let declared = data
                    .get(..2)
                    .map(|h| u16::from_be_bytes([h[0], h[1]]) as usize + 2);
                let mut pass = declared == Some(data.len());
                if pass && self.fail_frames > 0 {
                    self.fail_frames -= 1;
                    pass = false;
                }
                if pass {
                    self.frames.push(data.to_vec());
                } else {
                    self.rejected.push(data.to_vec());
                }
                self.state = State::Checking {
                    pass,
                    reported: false,
                };
            }
            State::Checking { .. } => {
                log::warn!("dummy: bootloader write while checking a frame");
            }
        }
        Action::None
    }
}

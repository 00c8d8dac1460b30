//! Byte-stream MIDI parser with running status, SysEx and an embedded
//! debug-message extension (status `0xFF` followed by a length byte).

use super::codec;
use super::{MidiMessage, MSG_DEBUG, MSG_SYSEX_END, MSG_SYSEX_START};

/// Soft cap on an in-flight SysEx buffer. Exceeding it closes the message
/// early with a warning rather than growing without bound.
const SYSEX_CAP: usize = 4096;

/// A fully-formed frame produced by the parser: either a forwardable MIDI
/// message, or an embedded debug-text frame consumed before MIDI-out.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Midi(MidiMessage),
    Debug(String),
}

/// Diagnostic emitted alongside parsed frames. Never propagated as an
/// error - the parser always re-synchronises at the next status byte.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserNotice {
    /// Routine, low-level trace - "Note On (Channel 1): Note 60".
    Comment(String),
    /// Something noteworthy but not wrong - e.g. running status in use.
    Info(String),
    /// Something is off but recoverable - truncated message, unknown status.
    Warning(String),
    /// Data arrived with nothing to attach it to.
    Error(String),
}

/// What the parser is waiting for next.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Expect {
    /// `n` more data bytes before the message is complete.
    Bytes(usize),
    /// Open-ended SysEx payload, terminated by `0xF7`.
    SysEx,
}

impl Expect {
    fn is_pending(&self) -> bool {
        matches!(self, Expect::Bytes(n) if *n > 0) || matches!(self, Expect::SysEx)
    }
}

/// Result of feeding a single byte: zero or more completed frames (a status
/// byte that both flushes a truncated message and completes a zero-length
/// one can yield two), plus any diagnostics raised along the way.
#[derive(Debug, Default)]
pub struct FeedResult {
    pub frames: Vec<Frame>,
    pub notices: Vec<ParserNotice>,
}

/// State machine that reconstructs MIDI messages from a raw byte feed.
pub struct MidiByteParser {
    running_status: u8,
    expect: Expect,
    buffer: Vec<u8>,
}

impl Default for MidiByteParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiByteParser {
    pub fn new() -> MidiByteParser {
        MidiByteParser {
            running_status: 0,
            expect: Expect::Bytes(0),
            buffer: Vec::new(),
        }
    }

    /// Resets all in-flight state. Called by the bridge on `detach()`.
    pub fn reset(&mut self) {
        self.running_status = 0;
        self.expect = Expect::Bytes(0);
        self.buffer.clear();
    }

    /// Feeds a single byte into the state machine.
    pub fn feed_byte(&mut self, byte: u8) -> FeedResult {
        let mut result = FeedResult::default();
        if codec::is_status_byte(byte) {
            self.on_status_byte(byte, &mut result);
        } else {
            self.on_data_byte(byte, &mut result);
        }
        result
    }

    fn on_status_byte(&mut self, byte: u8, result: &mut FeedResult) {
        // SysEx end closes an in-progress SysEx regardless of what else is pending.
        if byte == MSG_SYSEX_END && self.buffer.first() == Some(&MSG_SYSEX_START) {
            self.buffer.push(byte);
            self.emit(result);
            return;
        }

        if self.expect.is_pending() {
            result.notices.push(ParserNotice::Warning(format!(
                "status byte 0x{:02X} received while a message was still in progress; flushing truncated message 0x{:02X}",
                byte,
                self.buffer.first().copied().unwrap_or(0),
            )));
            self.emit(result);
        }

        if codec::is_voice_message(byte) {
            self.running_status = byte;
        } else if codec::is_sys_common(byte) {
            self.running_status = 0;
        }
        // Real-time bytes (0xF8..0xFE) and the debug extension (0xFF) leave
        // running status untouched.

        match codec::expected_data_length(byte) {
            Some(n) => self.expect = Expect::Bytes(n),
            None if codec::is_sysex_start(byte) => self.expect = Expect::SysEx,
            None => {
                result
                    .notices
                    .push(ParserNotice::Warning(format!("unknown status byte 0x{:02X}", byte)));
                self.expect = Expect::Bytes(0);
            }
        }

        self.buffer.clear();
        self.buffer.push(byte);

        if !self.expect.is_pending() {
            self.emit(result);
        }
    }

    fn on_data_byte(&mut self, byte: u8, result: &mut FeedResult) {
        if let Expect::Bytes(0) = self.expect {
            if self.running_status != 0 {
                // Running status: re-enter as if the status byte had arrived,
                // then fall through to append this byte as its first data byte.
                let status = self.running_status;
                self.on_status_byte(status, result);
            } else {
                result
                    .notices
                    .push(ParserNotice::Error(format!("orphaned data byte 0x{:02X}", byte)));
                return;
            }
        }

        match self.expect {
            Expect::SysEx => {
                if self.buffer.len() >= SYSEX_CAP {
                    result.notices.push(ParserNotice::Warning(
                        "SysEx message exceeds buffer cap, truncating".to_string(),
                    ));
                    self.buffer.push(MSG_SYSEX_END);
                    self.emit(result);
                    self.expect = Expect::Bytes(0);
                    return;
                }
                self.buffer.push(byte);
            }
            Expect::Bytes(n) => {
                self.buffer.push(byte);
                let mut remaining = n - 1;
                if self.buffer[0] == MSG_DEBUG && remaining == 0 && self.buffer.len() == 4 {
                    // buffer[3] is the debug payload length; extend the wait.
                    remaining = self.buffer[3] as usize;
                }
                self.expect = Expect::Bytes(remaining);
                if !self.expect.is_pending() {
                    self.emit(result);
                }
            }
        }
    }

    fn emit(&mut self, result: &mut FeedResult) {
        if self.buffer.is_empty() {
            return;
        }
        let bytes = std::mem::take(&mut self.buffer);
        self.expect = Expect::Bytes(0);

        if bytes[0] == MSG_DEBUG && bytes.len() > 4 {
            let text = String::from_utf8_lossy(&bytes[4..]).into_owned();
            result.frames.push(Frame::Debug(text));
        } else {
            result.frames.push(Frame::Midi(MidiMessage::from_bytes(bytes)));
        }
    }
}

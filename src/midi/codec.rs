//! Pure, stateless MIDI helpers: status-byte classification, the expected
//! data-length table, and a human-readable `describe()` formatter used only
//! for observability. None of this runs on the transform hot path.

use super::{
    controls, sysex, CHANNEL_MASK, MSG_DEBUG, MSG_SYSEX_END, MSG_SYSEX_START, STATUS_BIT, TAG_MASK,
    TAG_CHANNEL_PRESSURE, TAG_CONTROLLER, TAG_KEY_PRESSURE, TAG_NOTE_OFF, TAG_NOTE_ON,
    TAG_PITCH_BEND, TAG_PROGRAM_CHANGE, TAG_SPECIAL,
};
use super::MidiMessage;

/// `true` for any byte with the high bit set (a status byte).
pub fn is_status_byte(byte: u8) -> bool {
    byte & STATUS_BIT != 0
}

/// Channel Voice Message: `0x80..=0xEF`.
pub fn is_voice_message(byte: u8) -> bool {
    (0x80..=0xEF).contains(&byte)
}

/// System Common Message: `0xF0..=0xF7`.
pub fn is_sys_common(byte: u8) -> bool {
    (0xF0..=0xF7).contains(&byte)
}

/// System Real Time Message: `0xF8..=0xFE`. `0xFF` is the debug extension,
/// not a real-time message, and is classified separately.
pub fn is_realtime(byte: u8) -> bool {
    (0xF8..=0xFE).contains(&byte)
}

/// Number of data bytes expected to follow a status byte, per §4.1 of the
/// design. `None` means the status byte is not recognised.
pub fn expected_data_length(status: u8) -> Option<usize> {
    match status & TAG_MASK {
        TAG_PROGRAM_CHANGE | TAG_CHANNEL_PRESSURE => Some(1),
        TAG_NOTE_OFF | TAG_NOTE_ON | TAG_KEY_PRESSURE | TAG_CONTROLLER | TAG_PITCH_BEND => Some(2),
        TAG_SPECIAL => {
            if status == MSG_DEBUG {
                // { 0xFF, 0, 0, <len>, payload... } - 3 fixed bytes, then the
                // payload length is folded in once byte 4 (the length byte)
                // has arrived. See MidiByteParser.
                Some(3)
            } else if status == MSG_SYSEX_START {
                None // open-ended, terminated by 0xF7
            } else {
                let channel = status & CHANNEL_MASK;
                if channel < 3 {
                    Some(2)
                } else if channel < 6 {
                    Some(1)
                } else {
                    Some(0)
                }
            }
        }
        _ => None,
    }
}

/// Whether `status` starts an open-ended SysEx message.
pub fn is_sysex_start(status: u8) -> bool {
    status == MSG_SYSEX_START
}

pub fn is_sysex_end(status: u8) -> bool {
    status == MSG_SYSEX_END
}

/// Renders a MIDI message as a human-readable string for logs and the
/// `onDebugMessage` observer hook. Never used on the transform hot path.
pub fn describe(message: &MidiMessage) -> String {
    let data = message.raw_bytes();
    if data.is_empty() {
        return "Empty message".to_string();
    }

    let status = data[0];
    let tag = status & TAG_MASK;
    let channel = (status & CHANNEL_MASK) + 1;

    match tag {
        TAG_NOTE_ON if data.len() >= 3 => {
            format!("Ch {}: Note {} on  velocity {}", channel, data[1], data[2])
        }
        TAG_NOTE_OFF if data.len() >= 3 => {
            format!("Ch {}: Note {} off velocity {}", channel, data[1], data[2])
        }
        TAG_KEY_PRESSURE if data.len() >= 3 => {
            format!("Ch {}: Note {} pressure {}", channel, data[1], data[2])
        }
        TAG_CONTROLLER if data.len() >= 3 => format!(
            "Ch {}: Controller {} ({}) value {}",
            channel,
            data[1],
            controls::get_controller_name(data[1]),
            data[2]
        ),
        TAG_PROGRAM_CHANGE if data.len() >= 2 => {
            format!("Ch {}: Program change {}", channel, data[1])
        }
        TAG_CHANNEL_PRESSURE if data.len() >= 2 => {
            format!("Ch {}: Pressure change {}", channel, data[1])
        }
        TAG_PITCH_BEND if data.len() >= 3 => {
            let bend = (data[1] as u16) | ((data[2] as u16) << 7);
            format!("Ch {}: Pitch bend {}", channel, bend)
        }
        TAG_SPECIAL => describe_special(status, data),
        _ => hex_dump(data),
    }
}

fn describe_special(status: u8, data: &[u8]) -> String {
    if status == MSG_SYSEX_START {
        let manufacturer = data.get(1).and_then(|id| sysex::manufacturer_name(*id));
        let mut rendered = String::from("SysEx message: ");
        if let Some(name) = manufacturer {
            rendered.push_str(name);
            rendered.push_str(" - ");
        }
        for byte in data.iter().skip(1) {
            if *byte == MSG_SYSEX_END {
                break;
            }
            rendered.push_str(&format!("0x{:02X} ", byte));
        }
        return rendered;
    }
    if status == MSG_DEBUG && data.len() > 4 {
        let text = String::from_utf8_lossy(&data[4..]);
        return format!("Debug frame: \"{}\"", text);
    }
    let channel = status & CHANNEL_MASK;
    if channel < 3 && data.len() >= 3 {
        format!("System message #{}: {} {}", channel, data[1], data[2])
    } else if channel < 6 && data.len() >= 2 {
        format!("System message #{}: {}", channel, data[1])
    } else {
        format!("System message #{}", channel)
    }
}

fn hex_dump(data: &[u8]) -> String {
    let mut rendered = String::from("Unknown MIDI message:");
    for byte in data {
        rendered.push_str(&format!(" {:02X}", byte));
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_byte_categories() {
        assert!(is_voice_message(0x90));
        assert!(!is_voice_message(0xF0));
        assert!(is_sys_common(0xF0));
        assert!(is_sys_common(0xF7));
        assert!(!is_sys_common(0xF8));
        assert!(is_realtime(0xF8));
        assert!(is_realtime(0xFE));
        assert!(!is_realtime(0xFF));
    }

    #[test]
    fn data_length_table_matches_spec() {
        assert_eq!(expected_data_length(0x90), Some(2)); // Note On
        assert_eq!(expected_data_length(0xC0), Some(1)); // Program Change
        assert_eq!(expected_data_length(0xFF), Some(3)); // Debug (fixed part)
        assert_eq!(expected_data_length(0xF0), None); // SysEx, open-ended
        assert_eq!(expected_data_length(0xF1), Some(2)); // channel 1 < 3 -> 2
        assert_eq!(expected_data_length(0xF3), Some(1)); // channel 3 -> 1
        assert_eq!(expected_data_length(0xF6), Some(0)); // channel 6 -> 0
    }

    #[test]
    fn describe_note_on() {
        let msg = MidiMessage::note_on(2, 64, 100, None);
        assert_eq!(describe(&msg), "Ch 2: Note 64 on  velocity 100");
    }
}

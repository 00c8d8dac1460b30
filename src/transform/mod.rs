//! Per-string musical transform: velocity scaling, octave/semitone shift,
//! channel-to-string resolution and the diatonic filter. Grounded on the
//! incoming-message handling in `MidiSerialBridge::handleIncomingMidiMessage`
//! and `processOutgoingMessage`; since those bodies were not present in the
//! retrieval pack, the pipeline below follows the design's written algorithm
//! directly, keeping the same note-tracking shape (`suppressedNotes` /
//! `replacedNotes`) the header declares.

pub mod scale;

use crate::midi::MidiMessage;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

pub use scale::Scale;

/// Number of strings (and therefore channels) the bridge understands.
pub const NUM_STRINGS: usize = 6;

/// How the diatonic mask is enforced against transformed note numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiatonicMode {
    /// The mask is ignored entirely.
    Off,
    /// Off-scale notes are dropped (their matching Note Off is dropped too).
    Filter,
    /// Off-scale notes are snapped up to the nearest in-scale note.
    ReplaceUp,
}

/// Per-string tuning and the diatonic filter settings. Cheap to clone; the
/// bridge keeps one copy behind its shared-state lock.
#[derive(Debug, Clone)]
pub struct Configuration {
    string_velocity_scale: [u8; NUM_STRINGS],
    octave_shift: [i8; NUM_STRINGS],
    semitone_shift: [i8; NUM_STRINGS],
    channel_map: [u8; NUM_STRINGS],
    root_pc: u8,
    diatonic_mask: [bool; 12],
    filter_enabled: bool,
    diatonic_mode: DiatonicMode,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            string_velocity_scale: [10; NUM_STRINGS],
            octave_shift: [0; NUM_STRINGS],
            semitone_shift: [0; NUM_STRINGS],
            channel_map: [1, 2, 3, 4, 5, 6],
            root_pc: 0,
            diatonic_mask: [true; 12],
            filter_enabled: false,
            diatonic_mode: DiatonicMode::Off,
        }
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scaling factor applied to Note On velocity, in tenths (`1..=10`).
    pub fn string_velocity_scale(&self, string: usize) -> u8 {
        self.string_velocity_scale[string]
    }

    pub fn set_string_velocity_scale(&mut self, string: usize, scale: i32) {
        self.string_velocity_scale[string] = scale.clamp(1, 10) as u8;
    }

    pub fn octave_shift(&self, string: usize) -> i8 {
        self.octave_shift[string]
    }

    pub fn set_octave_shift(&mut self, string: usize, shift: i32) {
        self.octave_shift[string] = shift.clamp(-4, 4) as i8;
    }

    pub fn semitone_shift(&self, string: usize) -> i8 {
        self.semitone_shift[string]
    }

    pub fn set_semitone_shift(&mut self, string: usize, shift: i32) {
        self.semitone_shift[string] = shift.clamp(-12, 12) as i8;
    }

    /// MIDI channel (`1..=16`) this string listens / sends on.
    pub fn channel_map(&self, string: usize) -> u8 {
        self.channel_map[string]
    }

    pub fn set_channel_map(&mut self, string: usize, channel: i32) {
        self.channel_map[string] = channel.clamp(1, 16) as u8;
    }

    pub fn filter_enabled(&self) -> bool {
        self.filter_enabled
    }

    pub fn set_filter_enabled(&mut self, enabled: bool) {
        self.filter_enabled = enabled;
    }

    pub fn diatonic_mode(&self) -> DiatonicMode {
        self.diatonic_mode
    }

    pub fn set_diatonic_mode(&mut self, mode: DiatonicMode) {
        self.diatonic_mode = mode;
    }

    pub fn root_pitch_class(&self) -> u8 {
        self.root_pc
    }

    pub fn diatonic_mask(&self) -> [bool; 12] {
        self.diatonic_mask
    }

    /// Builds the diatonic mask from a root pitch class and a list of
    /// semitone offsets from that root. The root itself is always included.
    pub fn set_scale(&mut self, root_pc: u8, intervals: &[i8]) {
        let root = root_pc % 12;
        let mut mask = [false; 12];
        mask[root as usize] = true;
        for &interval in intervals {
            let pc = (((root as i32 + interval as i32) % 12 + 12) % 12) as usize;
            mask[pc] = true;
        }
        self.root_pc = root;
        self.diatonic_mask = mask;
    }

    /// Convenience wrapper over [`Configuration::set_scale`] for the named
    /// scale catalogue in [`scale::Scale`].
    pub fn set_named_scale(&mut self, root_pc: u8, scale: Scale) {
        self.set_scale(root_pc, scale.intervals());
    }

    /// Index of the string mapped to `channel` (1..=16), falling back to a
    /// direct `channel - 1` mapping when `channel` is itself in `1..=6` and
    /// not claimed by `channel_map`.
    fn resolve_string(&self, channel: u8) -> Option<usize> {
        if let Some(index) = self.channel_map.iter().position(|&c| c == channel) {
            return Some(index);
        }
        if (1..=NUM_STRINGS as u8).contains(&channel) {
            return Some((channel - 1) as usize);
        }
        None
    }
}

fn clamp_note(note: u8, octave_shift: i8, semitone_shift: i8) -> u8 {
    let shifted = note as i32 + 12 * octave_shift as i32 + semitone_shift as i32;
    shifted.clamp(0, 127) as u8
}

/// Key identifying an in-flight note for suppression/replacement tracking:
/// the original (pre-transform) channel and note number, as received.
type NoteKey = (u8, u8);

/// Per-note bookkeeping that keeps Note On/Note Off pairs consistent across
/// the transform: a note dropped by the diatonic filter must not emit a
/// dangling Note Off, and a note snapped to a different pitch must release
/// that same substituted pitch.
#[derive(Debug, Default)]
struct NoteTracking {
    suppressed: HashSet<NoteKey>,
    replaced: HashMap<NoteKey, u8>,
}

impl NoteTracking {
    fn clear(&mut self) {
        self.suppressed.clear();
        self.replaced.clear();
    }
}

/// Stateful per-connection transform. Owns the note-tracking bookkeeping;
/// `Configuration` is supplied by the caller on each call so it can be
/// shared and edited independently of the tracking state.
#[derive(Debug, Default)]
pub struct Transform {
    tracking: NoteTracking,
}

impl Transform {
    pub fn new() -> Self {
        Transform::default()
    }

    /// Clears all suppressed/replaced note bookkeeping. Called on detach so
    /// a stale Note Off from a previous session can't leak into a new one.
    pub fn reset(&mut self) {
        self.tracking.clear();
    }

    /// Runs one message through the transform. Non-note messages pass
    /// through unchanged; a `None` result means the message was consumed
    /// (filtered) and nothing should be forwarded.
    pub fn process(&mut self, config: &Configuration, message: &MidiMessage) -> Option<MidiMessage> {
        if message.is_note_on() {
            let channel = message.channel().expect("note-on is a voice message");
            let note = message.note().expect("note-on carries a note number");
            let velocity = message.velocity().expect("note-on carries a velocity");
            self.note_on(config, channel, note, velocity, message.timestamp())
        } else if message.is_note_off() {
            let channel = message.channel().expect("note-off is a voice message");
            let note = message.note().expect("note-off carries a note number");
            let velocity = message.velocity().unwrap_or(0);
            self.note_off(config, channel, note, velocity, message.timestamp())
        } else {
            Some(message.clone())
        }
    }

    fn note_on(
        &mut self,
        config: &Configuration,
        channel: u8,
        note: u8,
        velocity: u8,
        timestamp: Option<Instant>,
    ) -> Option<MidiMessage> {
        let string = config.resolve_string(channel);
        let shifted = match string {
            Some(s) => clamp_note(note, config.octave_shift[s], config.semitone_shift[s]),
            None => note,
        };
        let key: NoteKey = (channel, note);

        let sounding_note = if !config.filter_enabled || config.diatonic_mode == DiatonicMode::Off {
            Some(shifted)
        } else if config.diatonic_mask[(shifted % 12) as usize] {
            Some(shifted)
        } else {
            match config.diatonic_mode {
                DiatonicMode::Filter => {
                    self.tracking.suppressed.insert(key);
                    None
                }
                DiatonicMode::ReplaceUp => match nearest_in_scale_up(shifted, &config.diatonic_mask) {
                    Some(replacement) => {
                        self.tracking.replaced.insert(key, replacement);
                        Some(replacement)
                    }
                    None => {
                        self.tracking.suppressed.insert(key);
                        None
                    }
                },
                DiatonicMode::Off => unreachable!("handled above"),
            }
        };

        sounding_note.map(|note_out| {
            // An unidentified string (channel outside both the map and the
            // 1..=6 fallback) passes its velocity through unscaled.
            let scale = string.map(|s| config.string_velocity_scale[s]).unwrap_or(10);
            let scaled = ((velocity as f64) * (scale as f64) / 10.0).round() as i32;
            let velocity_out = scaled.clamp(1, 127) as u8;
            MidiMessage::note_on(channel, note_out, velocity_out, timestamp)
        })
    }

    fn note_off(
        &mut self,
        config: &Configuration,
        channel: u8,
        note: u8,
        velocity: u8,
        timestamp: Option<Instant>,
    ) -> Option<MidiMessage> {
        let string = config.resolve_string(channel);
        let shifted = match string {
            Some(s) => clamp_note(note, config.octave_shift[s], config.semitone_shift[s]),
            None => note,
        };
        let key: NoteKey = (channel, note);

        if let Some(replacement) = self.tracking.replaced.remove(&key) {
            return Some(MidiMessage::note_off(channel, replacement, velocity, timestamp));
        }
        if self.tracking.suppressed.remove(&key) {
            return None;
        }
        Some(MidiMessage::note_off(channel, shifted, velocity, timestamp))
    }
}

/// Searches upward from `note` (exclusive) for the nearest pitch class set
/// in `mask`, wrapping at most one octave. Returns `None` if the mask has no
/// in-scale pitch class within reach (it is never entirely empty, since
/// `Configuration::set_scale` always includes the root).
fn nearest_in_scale_up(note: u8, mask: &[bool; 12]) -> Option<u8> {
    for offset in 1..=12u8 {
        let candidate = note as i32 + offset as i32;
        if candidate > 127 {
            break;
        }
        if mask[(candidate as u8 % 12) as usize] {
            return Some(candidate as u8);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_transform_with_default_configuration() {
        let config = Configuration::new();
        let mut transform = Transform::new();
        let on = MidiMessage::note_on(1, 60, 100, None);
        let out = transform.process(&config, &on).unwrap();
        assert_eq!(out.note(), Some(60));
        assert_eq!(out.velocity(), Some(100));
    }

    #[test]
    fn octave_and_semitone_shift_are_applied_and_clamped() {
        let mut config = Configuration::new();
        config.set_octave_shift(0, 1);
        config.set_semitone_shift(0, 3);
        let mut transform = Transform::new();
        let on = MidiMessage::note_on(1, 60, 100, None);
        let out = transform.process(&config, &on).unwrap();
        assert_eq!(out.note(), Some(60 + 12 + 3));

        // Pushed far enough, the result clamps instead of wrapping.
        config.set_octave_shift(0, 4);
        let on_high = MidiMessage::note_on(1, 120, 100, None);
        let out_high = transform.process(&config, &on_high).unwrap();
        assert_eq!(out_high.note(), Some(127));
    }

    #[test]
    fn velocity_scaling_rounds_and_clamps_to_at_least_one() {
        let mut config = Configuration::new();
        config.set_string_velocity_scale(0, 5); // half velocity
        let mut transform = Transform::new();
        let on = MidiMessage::note_on(1, 60, 10, None);
        let out = transform.process(&config, &on).unwrap();
        assert_eq!(out.velocity(), Some(5));

        let quiet = MidiMessage::note_on(1, 60, 1, None);
        let out_quiet = transform.process(&config, &quiet).unwrap();
        assert_eq!(out_quiet.velocity(), Some(1)); // never scales to zero
    }

    #[test]
    fn channel_fallback_maps_direct_channel_when_unclaimed() {
        let config = Configuration::new();
        assert_eq!(config.resolve_string(4), Some(3));
        assert_eq!(config.resolve_string(9), None);
    }

    #[test]
    fn filter_mode_drops_off_scale_note_and_its_matching_note_off() {
        let mut config = Configuration::new();
        config.set_named_scale(0, Scale::Major); // C major, no C#/D#/F#/G#/A#
        config.set_filter_enabled(true);
        config.set_diatonic_mode(DiatonicMode::Filter);
        let mut transform = Transform::new();

        let on = MidiMessage::note_on(1, 61, 100, None); // C#4, off-scale
        assert!(transform.process(&config, &on).is_none());

        let off = MidiMessage::note_off(1, 61, 0, None);
        assert!(transform.process(&config, &off).is_none());
    }

    #[test]
    fn replace_up_mode_snaps_to_nearest_in_scale_note_and_releases_it() {
        let mut config = Configuration::new();
        config.set_named_scale(0, Scale::Major);
        config.set_filter_enabled(true);
        config.set_diatonic_mode(DiatonicMode::ReplaceUp);
        let mut transform = Transform::new();

        let on = MidiMessage::note_on(1, 61, 100, None); // C#4 -> snaps to D4 (62)
        let out_on = transform.process(&config, &on).unwrap();
        assert_eq!(out_on.note(), Some(62));

        let off = MidiMessage::note_off(1, 61, 0, None);
        let out_off = transform.process(&config, &off).unwrap();
        assert_eq!(out_off.note(), Some(62));
    }

    #[test]
    fn in_scale_notes_pass_through_even_with_filter_enabled() {
        let mut config = Configuration::new();
        config.set_named_scale(0, Scale::Major);
        config.set_filter_enabled(true);
        config.set_diatonic_mode(DiatonicMode::Filter);
        let mut transform = Transform::new();

        let on = MidiMessage::note_on(1, 60, 100, None); // C4, in scale
        let out = transform.process(&config, &on).unwrap();
        assert_eq!(out.note(), Some(60));
    }

    #[test]
    fn non_note_messages_pass_through_unchanged() {
        let config = Configuration::new();
        let mut transform = Transform::new();
        let cc = MidiMessage::from_bytes(vec![0xB0, 0x07, 0x40]);
        let out = transform.process(&config, &cc).unwrap();
        assert_eq!(out.raw_bytes(), &[0xB0, 0x07, 0x40]);
    }

    #[test]
    fn note_on_velocity_zero_is_routed_through_note_off_pipeline() {
        let mut config = Configuration::new();
        config.set_named_scale(0, Scale::Major);
        config.set_filter_enabled(true);
        config.set_diatonic_mode(DiatonicMode::ReplaceUp);
        let mut transform = Transform::new();

        let on = MidiMessage::note_on(1, 61, 100, None);
        transform.process(&config, &on).unwrap();

        // Velocity-0 Note On is a Note Off per MIDI 1.0, and must resolve
        // the same replaced pitch as an explicit Note Off would.
        let off_as_on = MidiMessage::note_on(1, 61, 0, None);
        let out = transform.process(&config, &off_as_on).unwrap();
        assert_eq!(out.note(), Some(62));
    }

    #[test]
    fn reset_clears_tracking_so_a_stale_note_off_passes_through() {
        let mut config = Configuration::new();
        config.set_named_scale(0, Scale::Major);
        config.set_filter_enabled(true);
        config.set_diatonic_mode(DiatonicMode::Filter);
        let mut transform = Transform::new();

        let on = MidiMessage::note_on(1, 61, 100, None);
        assert!(transform.process(&config, &on).is_none());
        transform.reset();

        let off = MidiMessage::note_off(1, 61, 0, None);
        // No longer tracked as suppressed, so it now passes through shifted
        // (here unshifted, since octave/semitone shift is zero).
        let out = transform.process(&config, &off).unwrap();
        assert_eq!(out.note(), Some(61));
    }
}

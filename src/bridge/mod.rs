//! Bridge controller: composes the serial link, MIDI input/output, the byte
//! parser and the transform into the one orchestrator that owns the poll
//! loop and routes callbacks from the MIDI subsystem's own delivery thread.
//! Grounded on `MidiSerialBridge::attach/detach/timerCallback/
//! handleIncomingMidiMessage/processSerialData` in the original source.

pub mod midi_port;
pub mod serial;

use log::{debug, info, trace, warn};

use crate::midi::codec;
use crate::midi::parser::{Frame, MidiByteParser, ParserNotice};
use crate::midi::MidiMessage;
use crate::transform::{Configuration, DiatonicMode, Scale, Transform};
use midi_port::{MidiOutputConnection, MidiPortFactory};
pub use midi_port::{ChannelMidiPortFactory, MidiInputConnection, MidirPortFactory};
use serial::SerialDevice;
pub use serial::{LoopbackSerialDevice, SerialPortDevice};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const SERIAL_BAUD_RATE: u32 = 115_200;
const SERIAL_READ_CHUNK: usize = 1024;

/// Status and activity callbacks, invoked from whichever thread owns the
/// path that produced the event (the MIDI subsystem's callback thread, or
/// the poll thread). Default bodies make every hook optional to implement.
pub trait Observer: Send + Sync {
    fn on_display_message(&self, _message: &str) {}
    fn on_debug_message(&self, _message: &str) {}
    fn on_midi_received(&self) {}
    fn on_midi_sent(&self) {}
    fn on_serial_traffic(&self) {}
}

/// An observer that discards every event; the default when none is supplied.
#[derive(Default)]
pub struct NullObserver;

impl Observer for NullObserver {}

struct SharedState {
    config: Configuration,
    transform: Transform,
    midi_out: Option<Box<dyn MidiOutputConnection>>,
    attach_time: Option<Instant>,
}

impl SharedState {
    fn new() -> Self {
        SharedState {
            config: Configuration::new(),
            transform: Transform::new(),
            midi_out: None,
            attach_time: None,
        }
    }

    /// Captures `attach_time` once per attach cycle, on the first endpoint
    /// that opens successfully.
    fn record_first_open(&mut self) {
        if self.attach_time.is_none() {
            self.attach_time = Some(Instant::now());
        }
    }

    fn stamp(&self, message: &str) -> String {
        match self.attach_time {
            Some(t) => format!("+{:.1} - {}", t.elapsed().as_secs_f64(), message),
            None => message.to_string(),
        }
    }
}

/// Orchestrates SerialLink + MIDI input + MIDI output; owns the parser,
/// transform and poll scheduler. Cheap to clone-share: every field is an
/// `Arc`, so a `Bridge` can be handed to a CLI front-end and polled from the
/// main thread while its background threads run independently.
pub struct Bridge {
    shared: Arc<Mutex<SharedState>>,
    serial: Arc<Mutex<Box<dyn SerialDevice>>>,
    parser: Arc<Mutex<MidiByteParser>>,
    midi_factory: Arc<dyn MidiPortFactory>,
    midi_in: Mutex<Option<Box<dyn MidiInputConnection>>>,
    observer: Arc<dyn Observer>,
    poll_running: Arc<AtomicBool>,
    poll_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Bridge {
    pub fn new(
        serial: Box<dyn SerialDevice>,
        midi_factory: Arc<dyn MidiPortFactory>,
        observer: Arc<dyn Observer>,
    ) -> Bridge {
        Bridge {
            shared: Arc::new(Mutex::new(SharedState::new())),
            serial: Arc::new(Mutex::new(serial)),
            parser: Arc::new(Mutex::new(MidiByteParser::new())),
            midi_factory,
            midi_in: Mutex::new(None),
            observer,
            poll_running: Arc::new(AtomicBool::new(false)),
            poll_handle: Mutex::new(None),
        }
    }

    /// Best-effort open of each named endpoint; `None` means "skip that
    /// endpoint". Failures are reported via `on_display_message` and never
    /// prevent the other endpoints from opening. Idempotent: a prior attach
    /// is torn down first.
    pub fn attach(&self, serial_name: Option<&str>, midi_in_name: Option<&str>, midi_out_name: Option<&str>) {
        self.detach();

        let mut serial_opened = false;
        if let Some(name) = serial_name {
            info!("opening serial port '{}'...", name);
            self.observer.on_display_message(&format!("Opening serial port '{name}'..."));
            let opened = {
                let mut serial = self.serial.lock().unwrap();
                serial.open(name, SERIAL_BAUD_RATE)
            };
            match opened {
                Ok(()) => {
                    info!("serial port '{}' opened", name);
                    self.observer.on_display_message("Serial port opened successfully");
                    self.shared.lock().unwrap().record_first_open();
                    serial_opened = true;
                }
                Err(e) => {
                    warn!("failed to open serial port '{}': {}", name, e);
                    self.observer
                        .on_display_message(&format!("Failed to open serial port '{name}': {e}"));
                }
            }
        }

        if let Some(name) = midi_out_name {
            info!("opening MIDI output '{}'...", name);
            self.observer.on_display_message(&format!("Opening MIDI Output '{name}'..."));
            match self.midi_factory.open_output(name) {
                Ok(connection) => {
                    let mut state = self.shared.lock().unwrap();
                    state.midi_out = Some(connection);
                    state.record_first_open();
                    drop(state);
                    info!("MIDI output '{}' opened", name);
                    self.observer.on_display_message("MIDI Output opened successfully");
                }
                Err(e) => {
                    warn!("failed to open MIDI output '{}': {}", name, e);
                    self.observer
                        .on_display_message(&format!("Failed to open MIDI Output '{name}': {e}"));
                }
            }
        }

        if let Some(name) = midi_in_name {
            info!("opening MIDI input '{}'...", name);
            self.observer.on_display_message(&format!("Opening MIDI Input '{name}'..."));
            let shared = Arc::clone(&self.shared);
            let serial = Arc::clone(&self.serial);
            let observer = Arc::clone(&self.observer);
            let callback: Box<dyn FnMut(&[u8]) + Send> = Box::new(move |data: &[u8]| {
                handle_incoming_midi(&shared, &serial, &observer, data);
            });
            match self.midi_factory.open_input(name, callback) {
                Ok(connection) => {
                    *self.midi_in.lock().unwrap() = Some(connection);
                    self.shared.lock().unwrap().record_first_open();
                    info!("MIDI input '{}' opened", name);
                    self.observer.on_display_message("MIDI Input opened successfully");
                }
                Err(e) => {
                    warn!("failed to open MIDI input '{}': {}", name, e);
                    self.observer
                        .on_display_message(&format!("Failed to open MIDI Input '{name}': {e}"));
                }
            }
        }

        // Only poll serial when it actually opened, matching the original
        // bridge's startTimer(20) call inside the successful-open branch.
        if serial_opened {
            self.poll_running.store(true, Ordering::SeqCst);
            let running = Arc::clone(&self.poll_running);
            let shared = Arc::clone(&self.shared);
            let serial = Arc::clone(&self.serial);
            let parser = Arc::clone(&self.parser);
            let observer = Arc::clone(&self.observer);
            let handle = thread::spawn(move || poll_loop(running, shared, serial, parser, observer));
            *self.poll_handle.lock().unwrap() = Some(handle);
        }
    }

    /// Stops the poll task, stops the MIDI input stream, closes the MIDI
    /// output, closes the serial port, and clears all parser and transform
    /// state. Always succeeds; safe to call when already detached.
    pub fn detach(&self) {
        let was_active = self.is_active();
        self.poll_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.poll_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        if was_active {
            info!("closing MIDI<->serial bridge");
            let message = self.shared.lock().unwrap().stamp("Closing MIDI<->Serial bridge...");
            self.observer.on_display_message(&message);
        }

        if let Some(connection) = self.midi_in.lock().unwrap().take() {
            connection.close();
        }

        {
            let mut state = self.shared.lock().unwrap();
            state.midi_out = None;
            state.transform.reset();
            state.attach_time = None;
        }

        self.serial.lock().unwrap().close();
        self.parser.lock().unwrap().reset();
    }

    pub fn is_active(&self) -> bool {
        self.serial.lock().unwrap().is_open()
            || self.midi_in.lock().unwrap().is_some()
            || self.shared.lock().unwrap().midi_out.is_some()
    }

    pub fn configuration(&self) -> Configuration {
        self.shared.lock().unwrap().config.clone()
    }

    pub fn set_string_velocity_scale(&self, string: usize, scale: i32) {
        self.shared.lock().unwrap().config.set_string_velocity_scale(string, scale);
    }

    pub fn set_octave_shift(&self, string: usize, shift: i32) {
        self.shared.lock().unwrap().config.set_octave_shift(string, shift);
    }

    pub fn set_semitone_shift(&self, string: usize, shift: i32) {
        self.shared.lock().unwrap().config.set_semitone_shift(string, shift);
    }

    pub fn set_channel_map(&self, string: usize, channel: i32) {
        self.shared.lock().unwrap().config.set_channel_map(string, channel);
    }

    pub fn set_scale(&self, root_pc: u8, intervals: &[i8]) {
        self.shared.lock().unwrap().config.set_scale(root_pc, intervals);
    }

    pub fn set_named_scale(&self, root_pc: u8, scale: Scale) {
        self.shared.lock().unwrap().config.set_named_scale(root_pc, scale);
    }

    pub fn set_filter_enabled(&self, enabled: bool) {
        self.shared.lock().unwrap().config.set_filter_enabled(enabled);
    }

    pub fn set_diatonic_mode(&self, mode: DiatonicMode) {
        self.shared.lock().unwrap().config.set_diatonic_mode(mode);
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.detach();
    }
}

/// MIDI-input callback path: run the message through Transform; on pass,
/// write the transformed bytes to the serial link *and* send via the MIDI
/// output.
fn handle_incoming_midi(
    shared: &Arc<Mutex<SharedState>>,
    serial: &Arc<Mutex<Box<dyn SerialDevice>>>,
    observer: &Arc<dyn Observer>,
    data: &[u8],
) {
    let message = MidiMessage::with_timestamp(data.to_vec(), Some(Instant::now()));
    {
        let state = shared.lock().unwrap();
        let text = format!("MIDI In: {}", codec::describe(&message));
        debug!("{}", text);
        observer.on_debug_message(&state.stamp(&text));
    }
    trace!("midi received");
    observer.on_midi_received();

    let transformed = {
        let mut state = shared.lock().unwrap();
        let config = state.config.clone();
        state.transform.process(&config, &message)
    };
    let Some(transformed) = transformed else {
        return;
    };

    let raw = transformed.raw_bytes();
    let mut wrote_serial = false;
    {
        let mut serial = serial.lock().unwrap();
        if serial.is_open() {
            wrote_serial = serial.write(raw).is_ok();
        }
    }
    if wrote_serial {
        trace!("serial traffic");
        observer.on_serial_traffic();
    }

    let mut sent_out = false;
    {
        let mut state = shared.lock().unwrap();
        if let Some(output) = state.midi_out.as_mut() {
            sent_out = output.send(raw).is_ok();
        }
    }
    if sent_out {
        trace!("midi sent");
        observer.on_midi_sent();
    }
}

/// Serial poll task: drains available bytes through the parser every
/// `POLL_INTERVAL`, routing completed frames to their destination.
fn poll_loop(
    running: Arc<AtomicBool>,
    shared: Arc<Mutex<SharedState>>,
    serial: Arc<Mutex<Box<dyn SerialDevice>>>,
    parser: Arc<Mutex<MidiByteParser>>,
    observer: Arc<dyn Observer>,
) {
    while running.load(Ordering::SeqCst) {
        let available = {
            let device = serial.lock().unwrap();
            device.is_open() && device.bytes_available() > 0
        };

        if available {
            process_serial_data(&shared, &serial, &parser, &observer);
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn process_serial_data(
    shared: &Arc<Mutex<SharedState>>,
    serial: &Arc<Mutex<Box<dyn SerialDevice>>>,
    parser: &Arc<Mutex<MidiByteParser>>,
    observer: &Arc<dyn Observer>,
) {
    let mut buf = [0u8; SERIAL_READ_CHUNK];
    let read = {
        let mut device = serial.lock().unwrap();
        device.read(&mut buf).unwrap_or(0)
    };
    if read == 0 {
        return;
    }
    trace!("serial traffic");
    observer.on_serial_traffic();

    for &byte in &buf[..read] {
        let result = parser.lock().unwrap().feed_byte(byte);

        for notice in result.notices {
            let text = match &notice {
                ParserNotice::Error(m) | ParserNotice::Warning(m) => m.clone(),
                ParserNotice::Info(m) | ParserNotice::Comment(m) => m.clone(),
            };
            match &notice {
                ParserNotice::Error(_) => warn!("{}", text),
                ParserNotice::Warning(_) => warn!("{}", text),
                ParserNotice::Info(_) | ParserNotice::Comment(_) => debug!("{}", text),
            }
            let stamped = shared.lock().unwrap().stamp(&text);
            match notice {
                ParserNotice::Error(_) | ParserNotice::Warning(_) => observer.on_display_message(&stamped),
                ParserNotice::Info(_) | ParserNotice::Comment(_) => observer.on_debug_message(&stamped),
            }
        }

        for frame in result.frames {
            match frame {
                Frame::Debug(text) => {
                    info!("Serial Says: {}", text);
                    let stamped = shared.lock().unwrap().stamp(&format!("Serial Says: {text}"));
                    observer.on_display_message(&stamped);
                }
                Frame::Midi(message) => {
                    let describe_text = format!("Serial In: {}", codec::describe(&message));
                    debug!("{}", describe_text);
                    let stamped = shared.lock().unwrap().stamp(&describe_text);
                    observer.on_debug_message(&stamped);

                    let transformed = {
                        let mut state = shared.lock().unwrap();
                        let config = state.config.clone();
                        state.transform.process(&config, &message)
                    };
                    if let Some(transformed) = transformed {
                        let mut sent = false;
                        {
                            let mut state = shared.lock().unwrap();
                            if let Some(output) = state.midi_out.as_mut() {
                                sent = output.send(transformed.raw_bytes()).is_ok();
                            }
                        }
                        if sent {
                            trace!("midi sent");
                            observer.on_midi_sent();
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::midi_port::ChannelMidiPortFactory;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingObserver {
        display: StdMutex<Vec<String>>,
    }

    impl Observer for RecordingObserver {
        fn on_display_message(&self, message: &str) {
            self.display.lock().unwrap().push(message.to_string());
        }
    }

    fn wait_for<F: Fn() -> bool>(predicate: F) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not met in time");
    }

    #[test]
    fn attach_with_all_names_absent_is_inactive() {
        let bridge = Bridge::new(
            Box::new(LoopbackSerialDevice::new()),
            Arc::new(ChannelMidiPortFactory::new()),
            Arc::new(NullObserver),
        );
        bridge.attach(None, None, None);
        assert!(!bridge.is_active());
        bridge.detach();
    }

    #[test]
    fn midi_input_is_transformed_and_forwarded_to_serial_and_output() {
        let factory = Arc::new(ChannelMidiPortFactory::new());
        let bridge = Bridge::new(
            Box::new(LoopbackSerialDevice::new()),
            factory.clone(),
            Arc::new(NullObserver),
        );
        bridge.set_string_velocity_scale(0, 5);
        bridge.attach(Some("serial0"), Some("midi-in"), Some("midi-out"));

        factory.inject_input(&[0x90, 0x3C, 0x64]); // Note On ch1, note 60, vel 100

        wait_for(|| !factory.sent_messages().is_empty());
        let sent = factory.sent_messages();
        assert_eq!(sent[0], vec![0x90, 0x3C, 0x32]); // velocity halved to 50

        bridge.detach();
    }

    #[test]
    fn serial_frame_is_transformed_and_forwarded_to_midi_output() {
        let factory = Arc::new(ChannelMidiPortFactory::new());
        let mut device = LoopbackSerialDevice::new();
        device.open("serial0", 115200).unwrap();
        device.push_inbound(&[0x90, 0x3C, 0x64]); // Note On ch1, note 60, vel 100

        let bridge = Bridge::new(Box::new(device), factory.clone(), Arc::new(NullObserver));
        bridge.set_string_velocity_scale(0, 5);
        bridge.attach(Some("serial0"), None, Some("midi-out"));

        wait_for(|| !factory.sent_messages().is_empty());
        assert_eq!(factory.sent_messages()[0], vec![0x90, 0x3C, 0x32]);

        bridge.detach();
    }

    #[test]
    fn debug_frame_reaches_display_observer_and_not_midi_output() {
        let factory = Arc::new(ChannelMidiPortFactory::new());
        let observer = Arc::new(RecordingObserver::default());
        let mut device = LoopbackSerialDevice::new();
        device.open("serial0", 115200).unwrap();
        device.push_inbound(&[0xFF, 0x00, 0x00, 0x02, b'H', b'i']);

        let bridge = Bridge::new(Box::new(device), factory.clone(), observer.clone());
        bridge.attach(Some("serial0"), None, Some("midi-out"));

        wait_for(|| observer.display.lock().unwrap().iter().any(|m| m.contains("Serial Says: Hi")));
        assert!(factory.sent_messages().is_empty());

        bridge.detach();
    }

    #[test]
    fn detach_is_idempotent_and_clears_transform_state() {
        let factory = Arc::new(ChannelMidiPortFactory::new());
        let bridge = Bridge::new(
            Box::new(LoopbackSerialDevice::new()),
            factory.clone(),
            Arc::new(NullObserver),
        );
        bridge.set_named_scale(0, Scale::Major);
        bridge.set_filter_enabled(true);
        bridge.set_diatonic_mode(DiatonicMode::Filter);
        bridge.attach(None, Some("midi-in"), Some("midi-out"));

        factory.inject_input(&[0x90, 0x3D, 0x64]); // C#4, off-scale, gets suppressed
        bridge.detach();
        bridge.detach(); // idempotent

        assert!(!bridge.is_active());
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, trace, warn};
use structopt::StructOpt;

use string_bridge::bridge::midi_port::MidirPortFactory;
use string_bridge::bridge::serial::SerialPortDevice;
use string_bridge::{Bridge, DiatonicMode, Observer, Scale};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "string-bridge",
    about = "Bidirectional MIDI <-> serial bridge for a six-string guitar-to-MIDI controller"
)]
struct Opt {
    /// Serial device name (e.g. /dev/ttyUSB0). Omit to run without a serial endpoint.
    #[structopt(long)]
    serial: Option<String>,

    /// MIDI input device name. Omit to run without a MIDI input endpoint.
    #[structopt(long = "midi-in")]
    midi_in: Option<String>,

    /// MIDI output device name. Omit to run without a MIDI output endpoint.
    #[structopt(long = "midi-out")]
    midi_out: Option<String>,

    /// Named scale for the diatonic filter.
    #[structopt(
        long,
        possible_values = &["major", "natural-minor", "major-pentatonic", "minor-pentatonic", "chromatic"]
    )]
    scale: Option<String>,

    /// Root pitch class of the scale, 0=C .. 11=B.
    #[structopt(long, default_value = "0")]
    root: u8,

    /// Enable the diatonic filter.
    #[structopt(long)]
    filter: bool,

    /// What to do with out-of-scale notes when the filter is enabled.
    #[structopt(long = "diatonic-mode", possible_values = &["off", "filter", "replace-up"], default_value = "off")]
    diatonic_mode: String,
}

struct LoggingObserver;

impl Observer for LoggingObserver {
    fn on_display_message(&self, message: &str) {
        info!("{}", message);
    }

    fn on_debug_message(&self, message: &str) {
        debug!("{}", message);
    }

    fn on_midi_received(&self) {
        trace!("midi received");
    }

    fn on_midi_sent(&self) {
        trace!("midi sent");
    }

    fn on_serial_traffic(&self) {
        trace!("serial traffic");
    }
}

fn parse_scale(name: &str) -> Scale {
    match name {
        "major" => Scale::Major,
        "natural-minor" => Scale::NaturalMinor,
        "major-pentatonic" => Scale::MajorPentatonic,
        "minor-pentatonic" => Scale::MinorPentatonic,
        "chromatic" => Scale::Chromatic,
        other => {
            warn!("unknown scale '{}', defaulting to chromatic", other);
            Scale::Chromatic
        }
    }
}

fn parse_diatonic_mode(name: &str) -> DiatonicMode {
    match name {
        "filter" => DiatonicMode::Filter,
        "replace-up" => DiatonicMode::ReplaceUp,
        _ => DiatonicMode::Off,
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let bridge = Bridge::new(
        Box::new(SerialPortDevice::new()),
        Arc::new(MidirPortFactory::new()),
        Arc::new(LoggingObserver),
    );

    if let Some(name) = &opt.scale {
        bridge.set_named_scale(opt.root, parse_scale(name));
    }
    bridge.set_filter_enabled(opt.filter);
    bridge.set_diatonic_mode(parse_diatonic_mode(&opt.diatonic_mode));

    bridge.attach(opt.serial.as_deref(), opt.midi_in.as_deref(), opt.midi_out.as_deref());
    info!("bridge attached (active: {})", bridge.is_active());

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = Arc::clone(&running);
    ctrlc::set_handler(move || running_handler.store(false, Ordering::SeqCst))
        .context("installing Ctrl-C handler")?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    bridge.detach();
    Ok(())
}

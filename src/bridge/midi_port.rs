//! The `MidiPortFactory` capability contract and its two implementations: a
//! real `midir`-backed factory, and a channel-style double for tests. Object
//! safety matters here (the Bridge holds this behind `Arc<dyn ...>`), so the
//! input callback is a boxed closure rather than a generic parameter.

use anyhow::{anyhow, Context, Result};
use midir::{MidiInput, MidiOutput};
use std::sync::{Arc, Mutex};

/// A live MIDI input stream. Dropping/closing stops callback delivery.
pub trait MidiInputConnection: Send {
    fn close(self: Box<Self>);
}

/// A live MIDI output stream.
pub trait MidiOutputConnection: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Resolves human-readable MIDI device names to live connections. Device
/// enumeration is the platform's job; the core only ever asks for a name.
pub trait MidiPortFactory: Send + Sync {
    fn open_input(
        &self,
        name: &str,
        callback: Box<dyn FnMut(&[u8]) + Send>,
    ) -> Result<Box<dyn MidiInputConnection>>;

    fn open_output(&self, name: &str) -> Result<Box<dyn MidiOutputConnection>>;
}

const CLIENT_NAME: &str = "string-bridge";

/// Real factory backed by `midir`.
#[derive(Default)]
pub struct MidirPortFactory;

impl MidirPortFactory {
    pub fn new() -> Self {
        MidirPortFactory
    }
}

impl MidiPortFactory for MidirPortFactory {
    fn open_input(
        &self,
        name: &str,
        mut callback: Box<dyn FnMut(&[u8]) + Send>,
    ) -> Result<Box<dyn MidiInputConnection>> {
        let midi_in = MidiInput::new(CLIENT_NAME).context("creating MIDI input client")?;
        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("MIDI input '{name}' not found"))?;

        let connection = midi_in
            .connect(
                &port,
                "string-bridge-in",
                move |_stamp, data, _| callback(data),
                (),
            )
            .map_err(|e| anyhow!("connecting MIDI input '{name}': {e}"))?;

        Ok(Box::new(MidirInputConnection {
            connection: Some(connection),
        }))
    }

    fn open_output(&self, name: &str) -> Result<Box<dyn MidiOutputConnection>> {
        let midi_out = MidiOutput::new(CLIENT_NAME).context("creating MIDI output client")?;
        let port = midi_out
            .ports()
            .into_iter()
            .find(|p| midi_out.port_name(p).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("MIDI output '{name}' not found"))?;

        let connection = midi_out
            .connect(&port, "string-bridge-out")
            .map_err(|e| anyhow!("connecting MIDI output '{name}': {e}"))?;

        Ok(Box::new(MidirOutputConnection {
            connection: Some(connection),
        }))
    }
}

struct MidirInputConnection {
    connection: Option<midir::MidiInputConnection<()>>,
}

impl MidiInputConnection for MidirInputConnection {
    fn close(mut self: Box<Self>) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

struct MidirOutputConnection {
    connection: Option<midir::MidiOutputConnection>,
}

impl MidiOutputConnection for MidirOutputConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(());
        };
        connection.send(bytes).map_err(|e| anyhow!("sending MIDI message: {e}"))
    }
}

/// Test double. `open_input` stashes the callback so tests can call
/// [`ChannelMidiPortFactory::inject_input`] to simulate an incoming message;
/// `open_output` records every sent message for later inspection.
#[derive(Clone, Default)]
pub struct ChannelMidiPortFactory {
    inbound: Arc<Mutex<Option<Box<dyn FnMut(&[u8]) + Send>>>>,
    outbound: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ChannelMidiPortFactory {
    pub fn new() -> Self {
        ChannelMidiPortFactory::default()
    }

    /// Simulates the MIDI subsystem delivering `bytes` on the input stream.
    /// No-op if no input has been opened yet.
    pub fn inject_input(&self, bytes: &[u8]) {
        if let Some(callback) = self.inbound.lock().unwrap().as_mut() {
            callback(bytes);
        }
    }

    /// Every message sent to the (simulated) MIDI output, in send order.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.outbound.lock().unwrap().clone()
    }
}

impl MidiPortFactory for ChannelMidiPortFactory {
    fn open_input(
        &self,
        _name: &str,
        callback: Box<dyn FnMut(&[u8]) + Send>,
    ) -> Result<Box<dyn MidiInputConnection>> {
        *self.inbound.lock().unwrap() = Some(callback);
        Ok(Box::new(TestInputConnection {
            inbound: self.inbound.clone(),
        }))
    }

    fn open_output(&self, _name: &str) -> Result<Box<dyn MidiOutputConnection>> {
        Ok(Box::new(TestOutputConnection {
            outbound: self.outbound.clone(),
        }))
    }
}

struct TestInputConnection {
    inbound: Arc<Mutex<Option<Box<dyn FnMut(&[u8]) + Send>>>>,
}

impl MidiInputConnection for TestInputConnection {
    fn close(self: Box<Self>) {
        *self.inbound.lock().unwrap() = None;
    }
}

struct TestOutputConnection {
    outbound: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MidiOutputConnection for TestOutputConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.outbound.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inject_input_reaches_the_registered_callback() {
        let factory = ChannelMidiPortFactory::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let _conn = factory
            .open_input(
                "anything",
                Box::new(move |bytes| received_clone.lock().unwrap().push(bytes.to_vec())),
            )
            .unwrap();

        factory.inject_input(&[0x90, 0x3C, 0x50]);
        assert_eq!(received.lock().unwrap().as_slice(), &[vec![0x90, 0x3C, 0x50]]);
    }

    #[test]
    fn open_output_records_sent_messages() {
        let factory = ChannelMidiPortFactory::new();
        let mut conn = factory.open_output("anything").unwrap();
        conn.send(&[0x80, 0x3C, 0x00]).unwrap();
        assert_eq!(factory.sent_messages(), vec![vec![0x80, 0x3C, 0x00]]);
    }

    #[test]
    fn closing_input_stops_delivery() {
        let factory = ChannelMidiPortFactory::new();
        let conn = factory.open_input("anything", Box::new(|_| {})).unwrap();
        conn.close();
        // No registered callback left; injection is a harmless no-op.
        factory.inject_input(&[0x90]);
    }
}

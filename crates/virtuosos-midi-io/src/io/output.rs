//! Hardware output: a midir connection behind a send-side lock.

use super::find_device_index;
use crate::error::{Error, Result};
use crate::port::EventSink;
use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use tracing::{debug, info};
use virtuosos_midi::MidiEvent;

const CLIENT_NAME: &str = "virtuosos-output";

#[derive(Debug, Clone)]
pub struct MidiOutputDevice {
    pub index: usize,
    pub name: String,
}

pub fn list_output_devices() -> Result<Vec<MidiOutputDevice>> {
    let midi_output = MidiOutput::new(CLIENT_NAME)?;
    Ok(midi_output
        .ports()
        .iter()
        .enumerate()
        .map(|(index, port)| MidiOutputDevice {
            index,
            name: midi_output
                .port_name(port)
                .unwrap_or_else(|_| format!("Unknown Device {}", index)),
        })
        .collect())
}

/// Connected hardware output port.
///
/// midir connections are not `Sync`; the router thread and every timer
/// thread share this sink, so sends are serialized by a mutex.
pub struct MidiOutputSink {
    connection: Mutex<Option<MidiOutputConnection>>,
    name: String,
}

impl MidiOutputSink {
    pub fn connect(device_index: usize) -> Result<Self> {
        let midi_output = MidiOutput::new(CLIENT_NAME)?;

        let ports = midi_output.ports();
        let port = ports.get(device_index).ok_or_else(|| {
            Error::MidiDevice(format!("MIDI output device {} not found", device_index))
        })?;
        let name = midi_output
            .port_name(port)
            .unwrap_or_else(|_| format!("Device {}", device_index));

        let connection = midi_output.connect(port, "virtuosos-out")?;

        info!("Connected MIDI output: {}", name);
        Ok(Self {
            connection: Mutex::new(Some(connection)),
            name,
        })
    }

    pub fn connect_by_name(pattern: &str) -> Result<Self> {
        let devices = list_output_devices()?;
        let index = find_device_index(devices.iter().map(|d| d.name.as_str()), pattern)
            .ok_or_else(|| {
                Error::MidiDevice(format!(
                    "No MIDI output device found matching '{}'",
                    pattern
                ))
            })?;
        Self::connect(devices[index].index)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl EventSink for MidiOutputSink {
    fn send(&self, event: &MidiEvent) -> Result<()> {
        let mut connection = self.connection.lock();
        let conn = connection
            .as_mut()
            .ok_or_else(|| Error::Disconnected(format!("{} closed", self.name)))?;
        Ok(conn.send(event.to_raw().as_bytes())?)
    }

    fn close(&self) {
        if let Some(conn) = self.connection.lock().take() {
            conn.close();
            debug!("MIDI output port closed: {}", self.name);
        }
    }
}

impl Drop for MidiOutputSink {
    fn drop(&mut self) {
        self.close();
    }
}

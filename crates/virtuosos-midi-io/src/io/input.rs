//! Hardware input: midir callback -> ring buffer -> `EventSource::poll`.

use super::find_device_index;
use crate::error::{Error, Result};
use crate::port::EventSource;
use midir::{Ignore, MidiInput, MidiInputConnection};
use ringbuf::{traits::*, HeapCons, HeapRb};
use tracing::{debug, info};
use virtuosos_midi::{MidiEvent, RawMidiEvent};

const CLIENT_NAME: &str = "virtuosos-input";
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct MidiInputDevice {
    pub index: usize,
    pub name: String,
}

pub fn list_input_devices() -> Result<Vec<MidiInputDevice>> {
    let midi_input = MidiInput::new(CLIENT_NAME)?;
    Ok(midi_input
        .ports()
        .iter()
        .enumerate()
        .map(|(index, port)| MidiInputDevice {
            index,
            name: midi_input
                .port_name(port)
                .unwrap_or_else(|_| format!("Unknown Device {}", index)),
        })
        .collect())
}

/// Connected hardware input port.
///
/// The midir callback thread pushes raw messages into a ring buffer; `poll`
/// drains it without blocking. Channel, system common and realtime messages
/// are all passed on. Sysex and active sensing are ignored at the port.
pub struct MidiInputSource {
    connection: Option<MidiInputConnection<()>>,
    consumer: HeapCons<RawMidiEvent>,
    name: String,
}

impl MidiInputSource {
    pub fn connect(device_index: usize) -> Result<Self> {
        let mut midi_input = MidiInput::new(CLIENT_NAME)?;
        midi_input.ignore(Ignore::SysexAndActiveSense);

        let ports = midi_input.ports();
        let port = ports.get(device_index).ok_or_else(|| {
            Error::MidiDevice(format!("MIDI input device {} not found", device_index))
        })?;
        let name = midi_input
            .port_name(port)
            .unwrap_or_else(|_| format!("Device {}", device_index));

        let (mut producer, consumer) = HeapRb::<RawMidiEvent>::new(DEFAULT_CAPACITY).split();

        let connection = midi_input.connect(
            port,
            "virtuosos-in",
            move |timestamp, message, _| {
                if message.is_empty() || message.len() > 3 {
                    return;
                }
                let mut data = [0u8; 3];
                data[..message.len()].copy_from_slice(message);
                let raw = RawMidiEvent::new(timestamp, data, message.len() as u8);
                if producer.try_push(raw).is_err() {
                    debug!("MIDI input ring buffer full, dropping event");
                }
            },
            (),
        )?;

        info!("Connected MIDI input: {}", name);
        Ok(Self {
            connection: Some(connection),
            consumer,
            name,
        })
    }

    pub fn connect_by_name(pattern: &str) -> Result<Self> {
        let devices = list_input_devices()?;
        let index = find_device_index(devices.iter().map(|d| d.name.as_str()), pattern)
            .ok_or_else(|| {
                Error::MidiDevice(format!("No MIDI input device found matching '{}'", pattern))
            })?;
        Self::connect(devices[index].index)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl EventSource for MidiInputSource {
    fn poll(&mut self) -> Result<Option<MidiEvent>> {
        if self.connection.is_none() {
            return Err(Error::Disconnected(format!("{} closed", self.name)));
        }
        match self.consumer.try_pop() {
            Some(raw) => raw
                .to_midi_event()
                .map(Some)
                .map_err(|e| Error::SourceRead(e.to_string())),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            debug!("MIDI input port closed: {}", self.name);
        }
    }
}

impl Drop for MidiInputSource {
    fn drop(&mut self) {
        self.close();
    }
}

//! MIDI output ports
//!
//! The sequencer talks to hardware through [`MidiSink`], and acquires a sink
//! from a [`PortProvider`]. [`MidirPorts`] is the real backend; tests plug in
//! their own provider.

use midir::{MidiOutput, MidiOutputConnection};

use crate::error::{EngineError, Result};

/// An open connection to an output port
pub trait MidiSink: Send {
    fn send(&mut self, message: &[u8]) -> Result<()>;

    /// CC 123 on every channel
    fn all_notes_off(&mut self) {
        for channel in 0..16u8 {
            let _ = self.send(&[0xB0 | channel, 123, 0]);
        }
    }
}

/// Hands out connections to the platform MIDI device
pub trait PortProvider: Send + Sync {
    fn open(&self) -> Result<Box<dyn MidiSink>>;
}

/// midir-backed ports
#[derive(Debug, Clone)]
pub struct MidirPorts {
    client_name: String,
    port: Option<String>,
}

impl MidirPorts {
    /// `port` is matched case-insensitively against port names; the first
    /// port is used when it is `None`.
    pub fn new<S: Into<String>>(client_name: S, port: Option<String>) -> Self {
        Self {
            client_name: client_name.into(),
            port,
        }
    }
}

impl PortProvider for MidirPorts {
    fn open(&self) -> Result<Box<dyn MidiSink>> {
        let midi_out = MidiOutput::new(&self.client_name)
            .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;
        let ports = midi_out.ports();
        if ports.is_empty() {
            return Err(EngineError::DeviceUnavailable(
                "no MIDI output ports found".to_string(),
            ));
        }

        let port = match &self.port {
            Some(wanted) => {
                let wanted = wanted.to_lowercase();
                ports
                    .iter()
                    .find(|p| {
                        midi_out
                            .port_name(p)
                            .map(|n| n.to_lowercase().contains(&wanted))
                            .unwrap_or(false)
                    })
                    .ok_or_else(|| {
                        EngineError::DeviceUnavailable(format!("no MIDI output port matching '{}'", wanted))
                    })?
            }
            None => &ports[0],
        };
        let port_name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());
        let conn = midi_out
            .connect(port, &self.client_name)
            .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;
        log::info!("Connected to MIDI port: {}", port_name);
        Ok(Box::new(MidirSink { conn }))
    }
}

struct MidirSink {
    conn: MidiOutputConnection,
}

impl MidiSink for MidirSink {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.conn
            .send(message)
            .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))
    }
}

/// Names of the available output ports, in port order
pub fn list_ports(client_name: &str) -> Result<Vec<String>> {
    let midi_out =
        MidiOutput::new(client_name).map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;
    Ok(midi_out
        .ports()
        .iter()
        .map(|p| midi_out.port_name(p).unwrap_or_else(|_| "<Unknown>".to_string()))
        .collect())
}

use tracing::{debug, warn};

const STATUS_NOTE_OFF: u8 = 0x8;
const STATUS_NOTE_ON: u8 = 0x9;
const STATUS_CONTROL_CHANGE: u8 = 0xB;
const STATUS_PROGRAM_CHANGE: u8 = 0xC;

const CONTROLLER_SUSTAIN: u8 = 64;
const MAX_MESSAGE_LEN: usize = 3;

/// A complete, decoded message. `channel` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8 },
    Sustain { channel: u8, on: bool },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    Other { status: u8, channel: u8, data: [u8; 2] },
}

/// Streaming decoder fed one byte at a time.
#[derive(Debug, Default, Clone)]
pub struct MessageDecoder {
    message: [u8; MAX_MESSAGE_LEN],
    len: usize,
    anomalies: u64,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stray data bytes discarded so far.
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    pub fn consume_byte(&mut self, byte: u8) -> Option<MidiEvent> {
        if byte & 0x80 != 0 {
            // a status byte always restarts, dropping any partial message
            self.message[0] = byte;
            self.len = 1;
            return None;
        }

        if self.len == 0 {
            self.anomalies += 1;
            warn!(byte, "data byte without a preceding status byte; ignoring");
            return None;
        }

        self.message[self.len] = byte;
        self.len += 1;

        let status_kind = self.message[0] >> 4;
        let complete = self.len == MAX_MESSAGE_LEN
            || (self.len == 2 && status_kind == STATUS_PROGRAM_CHANGE);
        if !complete {
            return None;
        }

        let event = decode(&self.message[..self.len]);
        self.len = 0;
        Some(event)
    }

    /// Decodes every complete message contained in `bytes`, in order.
    pub fn consume(&mut self, bytes: &[u8]) -> Vec<MidiEvent> {
        bytes
            .iter()
            .filter_map(|&byte| self.consume_byte(byte))
            .collect()
    }
}

fn decode(message: &[u8]) -> MidiEvent {
    let status = message[0];
    let channel = (status & 0x0F) + 1;
    let data1 = message.get(1).copied().unwrap_or(0);
    let data2 = message.get(2).copied().unwrap_or(0);

    let event = match status >> 4 {
        STATUS_NOTE_ON => MidiEvent::NoteOn {
            channel,
            pitch: data1,
            velocity: data2,
        },
        STATUS_NOTE_OFF => MidiEvent::NoteOff {
            channel,
            pitch: data1,
        },
        STATUS_CONTROL_CHANGE if data1 == CONTROLLER_SUSTAIN => MidiEvent::Sustain {
            channel,
            on: data2 >= 64,
        },
        STATUS_CONTROL_CHANGE => MidiEvent::ControlChange {
            channel,
            controller: data1,
            value: data2,
        },
        STATUS_PROGRAM_CHANGE => MidiEvent::ProgramChange {
            channel,
            program: data1,
        },
        _ => MidiEvent::Other {
            status,
            channel,
            data: [data1, data2],
        },
    };

    match event {
        MidiEvent::NoteOn { pitch, velocity, .. } => debug!(pitch, velocity, "note on"),
        MidiEvent::NoteOff { pitch, .. } => debug!(pitch, "note off"),
        MidiEvent::Sustain { on, .. } => debug!(on, "sustain"),
        MidiEvent::ProgramChange { program, .. } => debug!(program, "program change"),
        MidiEvent::ControlChange {
            channel,
            controller,
            value,
        } => debug!(channel, controller, value, "control change"),
        MidiEvent::Other {
            status,
            channel,
            data,
        } => debug!(kind = status >> 4, channel, ?data, "unhandled message"),
    }

    event
}

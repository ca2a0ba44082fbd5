//! Core library for Keylight: turns a live MIDI byte stream into animated
//! frames for an addressable LED strip.
//!
//! Data flows one way: bytes are decoded ([`midi`]) into note events, the
//! [`notes`] registry tracks what is held down, each held or releasing pitch
//! gets an [`envelope`], recent playing is summarised into a [`mood`], and the
//! [`render`] compositor combines all of it into a frame once per tick of the
//! [`timeline`] scheduler. Transport and pixel hardware live outside this
//! crate and plug in through [`engine::InputBinding`] and
//! [`timeline::PixelSink`].

pub mod color;
pub mod config;
pub mod curves;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod midi;
pub mod mood;
pub mod notes;
pub mod render;
pub mod timeline;

pub use color::{Hsv, Rgb, Rgb8};
pub use config::{
    EnvelopeConfig, FrameConfig, KeylightConfig, MoodSettings, NotesConfig, PaletteConfig,
    StripConfig,
};
pub use engine::{EndpointClaim, EndpointRegistry, InputBinding, LightEngine, SharedEngine};
pub use envelope::{EnvelopeBank, EnvelopeStage, EnvelopedNote};
pub use error::{KeylightError, Result};
pub use midi::{MessageDecoder, MidiEvent};
pub use mood::{Mood, MoodAggregator, MoodChannel, MoodChannelConfig, MoodTarget};
pub use notes::{ActiveNote, NoteChange, NoteRegistry, UpdateDebouncer};
pub use render::{FrameCompositor, PitchMap};
pub use timeline::{run_loop, FpsMeter, PixelSink, PlaybackClock, RenderScheduler};

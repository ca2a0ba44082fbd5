use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info};

use crate::color::Rgb8;
use crate::config::KeylightConfig;
use crate::envelope::EnvelopeBank;
use crate::midi::{MessageDecoder, MidiEvent};
use crate::mood::{Mood, MoodAggregator};
use crate::notes::{ActiveNote, NoteChange, NoteRegistry, UpdateDebouncer};
use crate::render::FrameCompositor;
use crate::timeline::PlaybackClock;
use crate::{KeylightError, Result};

/// Everything between the incoming byte stream and the outgoing frame.
///
/// Note changes are routed straight into the envelopes and the mood list as
/// they happen; the debounced "update" is only for outside observers.
#[derive(Debug)]
pub struct LightEngine {
    decoder: MessageDecoder,
    registry: NoteRegistry,
    envelopes: EnvelopeBank,
    mood: MoodAggregator,
    compositor: FrameCompositor,
    debouncer: UpdateDebouncer,
    last_mood: Option<Mood>,
}

impl LightEngine {
    pub fn new(config: &KeylightConfig) -> Result<Self> {
        config.validate()?;
        let ambient = config.palette.ambient.to_rgb();
        Ok(Self {
            decoder: MessageDecoder::new(),
            registry: NoteRegistry::new(config.notes.polyphony),
            envelopes: EnvelopeBank::new(config.envelope.clone()),
            mood: MoodAggregator::new(&config.mood, ambient)?,
            compositor: FrameCompositor::new(&config.strip, &config.palette),
            debouncer: UpdateDebouncer::new(Duration::from_millis(
                config.notes.update_debounce_ms,
            )),
            last_mood: None,
        })
    }

    pub fn registry(&self) -> &NoteRegistry {
        &self.registry
    }

    pub fn envelopes(&self) -> &EnvelopeBank {
        &self.envelopes
    }

    pub fn mood(&self) -> &MoodAggregator {
        &self.mood
    }

    pub fn decoder(&self) -> &MessageDecoder {
        &self.decoder
    }

    /// Mood computed by the last [`render`](Self::render).
    pub fn last_mood(&self) -> Option<&Mood> {
        self.last_mood.as_ref()
    }

    pub fn active_notes(&self) -> Vec<ActiveNote> {
        self.registry.active_notes().to_vec()
    }

    /// Decodes raw bytes and applies every complete message. Returns the note
    /// changes they caused, in order.
    pub fn feed(&mut self, bytes: &[u8], now: Duration) -> Vec<NoteChange> {
        let mut changes = Vec::new();
        for &byte in bytes {
            if let Some(event) = self.decoder.consume_byte(byte) {
                changes.extend(self.handle_event(event, now));
            }
        }
        changes
    }

    pub fn handle_event(&mut self, event: MidiEvent, now: Duration) -> Vec<NoteChange> {
        let changes = match event {
            MidiEvent::NoteOn {
                pitch, velocity, ..
            } => self.registry.note_on(pitch, velocity, now),
            MidiEvent::NoteOff { pitch, .. } => self.registry.note_off(pitch),
            MidiEvent::Sustain { on, .. } => self.registry.set_sustain(on),
            _ => Vec::new(),
        };
        for change in &changes {
            self.envelopes.apply(change, now);
            self.mood.apply(change);
        }
        if !changes.is_empty() {
            self.debouncer.mark(now);
        }
        changes
    }

    /// Advances envelopes and mood to `now` and composes one frame.
    pub fn render(&mut self, now: Duration) -> &[Rgb8] {
        let purged = self.envelopes.tick(now);
        if purged > 0 {
            debug!(purged, remaining = self.envelopes.len(), "released notes faded out");
        }
        let mood = self.mood.update(now);
        let frame = self.compositor.compose(&mood, self.envelopes.amplitudes());
        self.last_mood = Some(mood);
        frame
    }

    /// Returns a snapshot of the active notes when a debounced update is due.
    pub fn poll_update(&mut self, now: Duration) -> Option<Vec<ActiveNote>> {
        self.debouncer
            .poll(now)
            .then(|| self.active_notes())
    }
}

/// Thread-safe handle shared by the input callback and the render loop.
#[derive(Clone)]
pub struct SharedEngine {
    shared: Arc<Mutex<LightEngine>>,
    clock: PlaybackClock,
}

impl SharedEngine {
    pub fn new(engine: LightEngine, clock: PlaybackClock) -> Self {
        Self {
            shared: Arc::new(Mutex::new(engine)),
            clock,
        }
    }

    pub fn clock(&self) -> PlaybackClock {
        self.clock
    }

    pub fn feed(&self, bytes: &[u8], now: Duration) -> Result<Vec<NoteChange>> {
        let mut engine = self.lock()?;
        Ok(engine.feed(bytes, now))
    }

    /// Renders into `frame`, reusing its allocation, so the lock is not held
    /// while the frame is submitted.
    pub fn render_into(&self, now: Duration, frame: &mut Vec<Rgb8>) -> Result<()> {
        let mut engine = self.lock()?;
        let rendered = engine.render(now);
        frame.clear();
        frame.extend_from_slice(rendered);
        Ok(())
    }

    pub fn poll_update(&self, now: Duration) -> Result<Option<Vec<ActiveNote>>> {
        let mut engine = self.lock()?;
        Ok(engine.poll_update(now))
    }

    pub fn active_notes(&self) -> Result<Vec<ActiveNote>> {
        let engine = self.lock()?;
        Ok(engine.active_notes())
    }

    /// Binds an input endpoint to this engine. Fails if another input already
    /// holds the endpoint.
    pub fn attach_input(&self, endpoints: &EndpointRegistry, endpoint: &str) -> Result<InputBinding> {
        let claim = endpoints.claim(endpoint)?;
        info!(endpoint, "input attached");
        Ok(InputBinding {
            engine: self.clone(),
            claim,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, LightEngine>> {
        self.shared
            .lock()
            .map_err(|_| KeylightError::Poisoned("light engine"))
    }
}

impl std::fmt::Debug for SharedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEngine").finish()
    }
}

/// An attached input. Timestamps bytes with the engine clock on arrival.
#[derive(Debug)]
pub struct InputBinding {
    engine: SharedEngine,
    claim: EndpointClaim,
}

impl InputBinding {
    pub fn endpoint(&self) -> &str {
        self.claim.endpoint()
    }

    pub fn feed(&self, bytes: &[u8]) -> Result<Vec<NoteChange>> {
        self.engine.feed(bytes, self.engine.clock.elapsed())
    }
}

/// Set of claimed transport endpoints (serial paths, MIDI port names).
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_claimed(&self, endpoint: &str) -> bool {
        self.claimed
            .lock()
            .map(|claimed| claimed.contains(endpoint))
            .unwrap_or(false)
    }

    pub fn claim(&self, endpoint: &str) -> Result<EndpointClaim> {
        let mut claimed = self
            .claimed
            .lock()
            .map_err(|_| KeylightError::Poisoned("endpoint registry"))?;
        if !claimed.insert(endpoint.to_string()) {
            return Err(KeylightError::EndpointInUse(endpoint.to_string()));
        }
        Ok(EndpointClaim {
            endpoint: endpoint.to_string(),
            claimed: Arc::clone(&self.claimed),
        })
    }
}

/// Releases its endpoint when dropped.
#[derive(Debug)]
pub struct EndpointClaim {
    endpoint: String,
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl EndpointClaim {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Drop for EndpointClaim {
    fn drop(&mut self) {
        if let Ok(mut claimed) = self.claimed.lock() {
            claimed.remove(&self.endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn engine() -> LightEngine {
        LightEngine::new(&KeylightConfig::default()).unwrap()
    }

    #[test]
    fn bytes_flow_into_envelopes_and_mood() {
        let mut engine = engine();
        let changes = engine.feed(&[0x90, 60, 100], ms(0));
        assert_eq!(changes.len(), 1);
        assert_eq!(engine.registry().len(), 1);
        assert_eq!(engine.envelopes().len(), 1);
        assert_eq!(engine.mood().len(), 1);

        engine.feed(&[0x80, 60, 0], ms(50));
        assert!(engine.registry().is_empty());
        assert_eq!(engine.envelopes().get(60).unwrap().stop_time(), Some(ms(50)));
    }

    #[test]
    fn render_produces_a_full_strip() {
        let mut engine = engine();
        engine.feed(&[0x90, 64, 127], ms(0));
        let frame = engine.render(ms(100)).to_vec();
        assert_eq!(frame.len(), KeylightConfig::default().strip.length);
        let brightest = frame.iter().map(|p| p[0] as u32 + p[1] as u32 + p[2] as u32).max();
        assert!(brightest.unwrap() > 100);
        assert!(engine.last_mood().is_some());
    }

    fn brightest(frame: &[Rgb8]) -> u32 {
        frame
            .iter()
            .map(|p| p[0] as u32 + p[1] as u32 + p[2] as u32)
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn note_between_frames_still_lights_the_strip() {
        let mut idle = engine();
        idle.render(ms(0));
        let idle_frame = idle.render(ms(16)).to_vec();

        let mut engine = engine();
        engine.render(ms(0));
        engine.feed(&[0x90, 64, 127], ms(2));
        engine.feed(&[0x80, 64, 0], ms(10));
        let frame = engine.render(ms(16)).to_vec();

        assert!(brightest(&frame) > brightest(&idle_frame));
    }

    #[test]
    fn garbage_input_never_stops_rendering() {
        let mut engine = engine();
        let noise: Vec<u8> = (0..=255u8).cycle().take(2048).collect();
        engine.feed(&noise, ms(0));
        for t in 0..20 {
            engine.render(ms(t * 16));
        }
        assert!(engine.decoder().anomalies() > 0);
    }

    #[test]
    fn update_is_debounced() {
        let mut engine = engine();
        engine.feed(&[0x90, 60, 100, 0x90, 62, 100, 0x90, 64, 100], ms(0));
        assert!(engine.poll_update(ms(1)).is_none());
        let snapshot = engine.poll_update(ms(20)).unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(engine.poll_update(ms(40)).is_none());
    }

    #[test]
    fn invalid_config_is_fatal() {
        let mut config = KeylightConfig::default();
        config.mood.channels[3].tint = None;
        assert!(matches!(LightEngine::new(&config), Err(KeylightError::Config(_))));
    }

    #[test]
    fn endpoint_cannot_be_bound_twice() {
        let endpoints = EndpointRegistry::new();
        let shared = SharedEngine::new(engine(), PlaybackClock::start());

        let first = shared.attach_input(&endpoints, "/dev/ttyAMA0").unwrap();
        let err = shared.attach_input(&endpoints, "/dev/ttyAMA0").unwrap_err();
        assert!(matches!(err, KeylightError::EndpointInUse(_)));
        assert_eq!(first.endpoint(), "/dev/ttyAMA0");

        drop(first);
        assert!(!endpoints.is_claimed("/dev/ttyAMA0"));
        assert!(shared.attach_input(&endpoints, "/dev/ttyAMA0").is_ok());
    }

    #[test]
    fn shared_engine_serializes_input_and_render() {
        let shared = SharedEngine::new(engine(), PlaybackClock::start());
        let endpoints = EndpointRegistry::new();
        let input = shared.attach_input(&endpoints, "test").unwrap();

        let writer = std::thread::spawn(move || {
            for pitch in 40..80u8 {
                input.feed(&[0x90, pitch, 90]).unwrap();
            }
        });
        let mut frame = Vec::new();
        for t in 0..50 {
            shared.render_into(ms(t), &mut frame).unwrap();
        }
        writer.join().unwrap();

        assert_eq!(shared.active_notes().unwrap().len(), 16);
        assert_eq!(frame.len(), 144);
    }
}

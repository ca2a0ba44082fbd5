use std::time::Duration;

use tracing::debug;

/// A note that is sounding right now.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveNote {
    pub pitch: u8,
    pub velocity: u8,
    /// Monotonic time the note was struck.
    pub start_time: Duration,
    /// Released by the player but held by the sustain pedal.
    pub is_sustained: bool,
}

/// Mutation notifications emitted by [`NoteRegistry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoteChange {
    Added(ActiveNote),
    Removed(ActiveNote),
}

impl NoteChange {
    pub fn note(&self) -> &ActiveNote {
        match self {
            NoteChange::Added(note) | NoteChange::Removed(note) => note,
        }
    }
}

/// Tracks active notes in strike order with an optional polyphony ceiling.
///
/// Every mutating call returns the [`NoteChange`]s it caused, in the order
/// they happened.
#[derive(Debug, Default, Clone)]
pub struct NoteRegistry {
    polyphony: Option<usize>,
    /// Oldest first. At most one entry per pitch.
    notes: Vec<ActiveNote>,
    sustain: bool,
}

impl NoteRegistry {
    /// `polyphony` of `None` tracks any number of notes.
    pub fn new(polyphony: Option<usize>) -> Self {
        Self {
            polyphony,
            notes: Vec::new(),
            sustain: false,
        }
    }

    pub fn polyphony(&self) -> Option<usize> {
        self.polyphony
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn is_sustain_on(&self) -> bool {
        self.sustain
    }

    pub fn get(&self, pitch: u8) -> Option<&ActiveNote> {
        self.notes.iter().find(|note| note.pitch == pitch)
    }

    /// Active notes, oldest first.
    pub fn active_notes(&self) -> &[ActiveNote] {
        &self.notes
    }

    /// Records a strike. The registry is ordered by strike time, so a pitch
    /// struck again moves behind every other note and is the last candidate
    /// for polyphony eviction.
    pub fn note_on(&mut self, pitch: u8, velocity: u8, now: Duration) -> Vec<NoteChange> {
        let note = ActiveNote {
            pitch,
            velocity,
            start_time: now,
            is_sustained: false,
        };

        if let Some(index) = self.position(pitch) {
            self.notes.remove(index);
        }
        self.notes.push(note);

        let mut changes = Vec::with_capacity(2);
        if let Some(limit) = self.polyphony {
            while self.notes.len() > limit {
                let oldest = self.notes.remove(0);
                debug!(pitch = oldest.pitch, limit, "polyphony exceeded, evicting oldest note");
                changes.push(NoteChange::Removed(oldest));
            }
        }
        // a zero ceiling evicts the note it just admitted
        if self.position(pitch).is_some() {
            changes.push(NoteChange::Added(note));
        }
        changes
    }

    pub fn note_off(&mut self, pitch: u8) -> Vec<NoteChange> {
        // untracked: struck before we started listening, or already evicted
        let Some(index) = self.position(pitch) else {
            return Vec::new();
        };

        if self.sustain {
            self.notes[index].is_sustained = true;
            Vec::new()
        } else {
            vec![NoteChange::Removed(self.notes.remove(index))]
        }
    }

    pub fn set_sustain(&mut self, on: bool) -> Vec<NoteChange> {
        if self.sustain == on {
            return Vec::new();
        }
        debug!(on, "sustain pedal");
        self.sustain = on;
        if on {
            return Vec::new();
        }

        let mut changes = Vec::new();
        self.notes.retain(|note| {
            if note.is_sustained {
                changes.push(NoteChange::Removed(*note));
                false
            } else {
                true
            }
        });
        changes
    }

    fn position(&self, pitch: u8) -> Option<usize> {
        self.notes.iter().position(|note| note.pitch == pitch)
    }
}

/// Coalesces bursts of [`NoteChange`]s into a single trailing-edge "update".
///
/// [`mark`](Self::mark) records activity; [`poll`](Self::poll) fires once the
/// input has been quiet for `interval` and at least `interval` has passed since
/// the previous flush.
#[derive(Debug, Clone)]
pub struct UpdateDebouncer {
    interval: Duration,
    last_activity: Option<Duration>,
    last_flush: Option<Duration>,
}

impl UpdateDebouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_activity: None,
            last_flush: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.last_activity.is_some()
    }

    pub fn mark(&mut self, now: Duration) {
        self.last_activity = Some(now);
    }

    pub fn poll(&mut self, now: Duration) -> bool {
        let Some(activity) = self.last_activity else {
            return false;
        };
        let quiet = now.saturating_sub(activity) >= self.interval;
        let spaced = self
            .last_flush
            .map(|flush| now.saturating_sub(flush) >= self.interval)
            .unwrap_or(true);
        if quiet && spaced {
            self.last_activity = None;
            self.last_flush = Some(now);
            true
        } else {
            false
        }
    }
}

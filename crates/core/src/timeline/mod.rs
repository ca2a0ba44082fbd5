use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::color::Rgb8;
use crate::engine::SharedEngine;
use crate::Result;

/// Monotonic clock. Every timestamp in the crate is a [`Duration`] since the
/// clock's epoch.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    epoch: Instant,
}

impl PlaybackClock {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::start()
    }
}

/// Receives finished frames. Implementations must return promptly; the
/// render loop calls this once per tick.
pub trait PixelSink {
    fn submit(&mut self, frame: &[Rgb8]) -> Result<()>;
}

impl<F> PixelSink for F
where
    F: FnMut(&[Rgb8]) -> Result<()>,
{
    fn submit(&mut self, frame: &[Rgb8]) -> Result<()> {
        self(frame)
    }
}

/// Fixed-rate frame deadlines. When a frame runs late the schedule skips
/// ahead instead of bursting to catch up.
#[derive(Debug, Clone)]
pub struct RenderScheduler {
    interval: Duration,
    next_deadline: Option<Duration>,
    dropped_frames: u64,
}

impl RenderScheduler {
    pub fn new(frame_rate: f64) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / frame_rate),
            next_deadline: None,
            dropped_frames: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Time left until the next frame is due; zero means render now.
    pub fn wait_time(&self, now: Duration) -> Duration {
        self.next_deadline
            .map(|deadline| deadline.saturating_sub(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Records a frame rendered at `now` and schedules the next one.
    pub fn frame_done(&mut self, now: Duration) {
        let mut next = match self.next_deadline {
            Some(deadline) => deadline + self.interval,
            None => now + self.interval,
        };
        while next <= now {
            next += self.interval;
            self.dropped_frames += 1;
        }
        self.next_deadline = Some(next);
    }
}

/// Counts frames and reports the achieved rate once per interval.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    interval: Duration,
    window_start: Option<Duration>,
    frames: u32,
}

impl FpsMeter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: None,
            frames: 0,
        }
    }

    pub fn frame(&mut self, now: Duration) -> Option<f64> {
        let start = *self.window_start.get_or_insert(now);
        self.frames += 1;
        let elapsed = now.saturating_sub(start);
        if elapsed < self.interval || elapsed.is_zero() {
            return None;
        }
        let fps = self.frames as f64 / elapsed.as_secs_f64();
        self.window_start = Some(now);
        self.frames = 0;
        Some(fps)
    }
}

/// Renders and submits frames at the scheduler's rate until `shutdown` is set.
///
/// A failing sink is logged and skipped; only engine failures (a poisoned
/// lock) end the loop.
pub fn run_loop(
    engine: &SharedEngine,
    sink: &mut dyn PixelSink,
    scheduler: &mut RenderScheduler,
    report_interval: Duration,
    shutdown: &AtomicBool,
) -> Result<()> {
    let clock = engine.clock();
    let mut fps = FpsMeter::new(report_interval);
    let mut frame = Vec::new();
    info!(interval = ?scheduler.interval(), "render loop started");

    while !shutdown.load(Ordering::Relaxed) {
        let now = clock.elapsed();
        let wait = scheduler.wait_time(now);
        if !wait.is_zero() {
            std::thread::sleep(wait);
            continue;
        }

        engine.render_into(now, &mut frame)?;
        if let Err(err) = sink.submit(&frame) {
            error!(%err, "dropping frame");
        }
        if let Some(active) = engine.poll_update(now)? {
            debug!(active = active.len(), "active notes updated");
        }
        if let Some(rate) = fps.frame(now) {
            info!(fps = rate, dropped = scheduler.dropped_frames(), "frame rate");
        }
        scheduler.frame_done(now);
    }

    info!("render loop stopped");
    Ok(())
}

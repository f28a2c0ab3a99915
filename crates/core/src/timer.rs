//! Pause-aware frame timer and frames-per-second counter.

use std::time::{Duration, Instant};

/// Frame timer that can be stopped and resumed.
///
/// Time spent stopped is excluded from [`elapsed`](Self::elapsed), and
/// [`tick`](Self::tick) reports a zero delta while the timer is stopped.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    stopped_at: Option<Instant>,
    paused: Duration,
    delta: Duration,
}

impl Timer {
    /// Creates a running timer.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            stopped_at: None,
            paused: Duration::ZERO,
            delta: Duration::ZERO,
        }
    }

    /// Returns `true` unless the timer is stopped.
    pub fn is_running(&self) -> bool {
        self.stopped_at.is_none()
    }

    /// Resumes a stopped timer. Does nothing if it is already running.
    pub fn start(&mut self) {
        if let Some(stopped_at) = self.stopped_at.take() {
            let now = Instant::now();
            self.paused += now - stopped_at;
            self.last_tick = now;
        }
    }

    /// Stops the timer. Does nothing if it is already stopped.
    pub fn stop(&mut self) {
        if self.stopped_at.is_none() {
            self.stopped_at = Some(Instant::now());
        }
    }

    /// Total running time since creation or the last reset.
    pub fn elapsed(&self) -> Duration {
        let end = self.stopped_at.unwrap_or_else(Instant::now);
        (end - self.start).saturating_sub(self.paused)
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Advances the timer; must be called once per frame.
    pub fn tick(&mut self) -> Duration {
        if self.stopped_at.is_some() {
            self.delta = Duration::ZERO;
            return self.delta;
        }

        let now = Instant::now();
        self.delta = now - self.last_tick;
        self.last_tick = now;
        self.delta
    }

    /// Delta measured by the most recent [`tick`](Self::tick).
    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Restarts the timer from zero in the running state.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
        self.stopped_at = None;
        self.paused = Duration::ZERO;
        self.delta = Duration::ZERO;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts frames over one-second windows.
#[derive(Debug, Default)]
pub struct FpsCounter {
    window: Duration,
    frames: u32,
    fps: u32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one frame that took `delta`.
    ///
    /// Returns the new FPS value whenever a one-second window closes.
    pub fn frame(&mut self, delta: Duration) -> Option<u32> {
        self.frames += 1;
        self.window += delta;

        if self.window < Duration::from_secs(1) {
            return None;
        }

        self.fps = self.frames;
        self.frames = 0;
        self.window -= Duration::from_secs(1);
        Some(self.fps)
    }

    /// FPS of the last completed window.
    pub fn fps(&self) -> u32 {
        self.fps
    }
}

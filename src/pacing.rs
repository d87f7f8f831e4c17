use std::thread;
use std::time::{Duration, Instant};

/// Wall-clock interval between frames at `fps`.
pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(fps.max(1)))
}

/// Holds a loop to a fixed frame rate by sleeping until the next deadline.
///
/// Deadlines advance by whole intervals from the previous deadline, so short stalls are absorbed.
/// A loop that falls more than one interval behind resynchronizes to "now" rather than bursting.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    next_deadline: Option<Instant>,
    enabled: bool,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: frame_interval(fps),
            next_deadline: None,
            enabled: true,
        }
    }

    /// A pacer that never sleeps, for displays that already block on vsync and for tests.
    pub fn unpaced() -> Self {
        Self {
            enabled: false,
            ..Self::new(1)
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sleeps until the current frame's slot has elapsed. Returns the time slept.
    pub fn wait(&mut self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }

        let now = Instant::now();
        let deadline = match self.next_deadline {
            Some(deadline) => deadline,
            None => {
                self.next_deadline = Some(now + self.interval);
                return Duration::ZERO;
            }
        };

        let slept = if deadline > now {
            let remaining = deadline - now;
            thread::sleep(remaining);
            remaining
        } else {
            Duration::ZERO
        };

        let after = deadline.max(now);
        let next = deadline + self.interval;
        self.next_deadline = Some(if next < after { after + self.interval } else { next });
        slept
    }
}

/// Frames-per-second over a sliding one-second window.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    window_start: Instant,
    frames_in_window: u32,
    last_fps: f64,
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsMeter {
    const WINDOW: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames_in_window: 0,
            last_fps: 0.0,
        }
    }

    /// Counts one frame. Returns the refreshed rate whenever a window closes.
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.frames_in_window += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < Self::WINDOW {
            return None;
        }
        self.last_fps = f64::from(self.frames_in_window) / elapsed.as_secs_f64();
        self.frames_in_window = 0;
        self.window_start = now;
        Some(self.last_fps)
    }

    pub fn fps(&self) -> f64 {
        self.last_fps
    }
}

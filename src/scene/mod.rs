pub mod camera;

pub use camera::Camera;

use std::time::{Duration, Instant};

const DEFAULT_FRAME_TIME: Duration = Duration::from_micros(16_670);
const MAX_FRAME_TIME: Duration = Duration::from_millis(100);

/// Wall-clock frame timer. The first tick reports a nominal 60 Hz
/// interval and long stalls are clamped so animation never jumps.
pub struct FrameClock {
    last_tick: Option<Instant>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self { last_tick: None }
    }

    /// Seconds since the previous tick, clamped to (0, 100 ms].
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let dt = match self.last_tick {
            Some(last) => now.duration_since(last).clamp(Duration::ZERO, MAX_FRAME_TIME),
            None => DEFAULT_FRAME_TIME,
        };
        self.last_tick = Some(now);
        if dt.is_zero() {
            DEFAULT_FRAME_TIME.as_secs_f32()
        } else {
            dt.as_secs_f32()
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_is_nominal() {
        let mut clock = FrameClock::new();
        let dt = clock.tick();
        assert!((dt - 0.01667).abs() < 0.0005);
    }

    #[test]
    fn test_ticks_are_positive_and_clamped() {
        let mut clock = FrameClock::new();
        clock.tick();
        for _ in 0..10 {
            let dt = clock.tick();
            assert!(dt > 0.0);
            assert!(dt <= 0.1);
        }
    }
}

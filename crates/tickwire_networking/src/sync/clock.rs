//! Fixed-step tick accumulator.

use std::time::{Duration, Instant};

/// One simulation step handed out by [`TickClock::next_tick`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickStep {
    /// Local tick number, starting at 1.
    pub tick: i32,
    /// Whether a packet goes out on this tick.
    pub send: bool,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug)]
pub struct TickStats {
    /// Minimum tick duration observed.
    pub min_tick_us: u64,
    /// Maximum tick duration observed.
    pub max_tick_us: u64,
    /// Average tick duration (rolling).
    pub avg_tick_us: u64,
    /// Ticks that took longer than their budget.
    pub late_ticks: u64,
    /// Total ticks measured.
    pub total_ticks: u64,
}

impl TickStats {
    fn new(budget: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: duration_us(budget),
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}

fn duration_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Turns variable frame times into fixed-duration ticks.
///
/// ```rust,ignore
/// clock.advance(frame_time);
/// while let Some(step) = clock.next_tick() {
///     simulate(step.tick);
///     if step.send {
///         send_packet();
///     }
/// }
/// ```
#[derive(Clone, Debug)]
pub struct TickClock {
    tick_duration: Duration,
    send_rate: i32,
    accumulator: Duration,
    tick: i32,
    stats: TickStats,
}

impl TickClock {
    /// Creates a clock ticking every `tick_duration` and sending every
    /// `send_rate` ticks.
    #[must_use]
    pub fn new(tick_duration: Duration, send_rate: i32) -> Self {
        Self {
            tick_duration,
            send_rate: send_rate.max(1),
            accumulator: Duration::ZERO,
            tick: 0,
            stats: TickStats::new(tick_duration),
        }
    }

    /// Adds elapsed wall-clock time.
    pub fn advance(&mut self, elapsed: Duration) {
        self.accumulator = self.accumulator.saturating_add(elapsed);
    }

    /// Takes the next due tick, if a full tick duration has accumulated.
    pub fn next_tick(&mut self) -> Option<TickStep> {
        if self.accumulator <= self.tick_duration {
            return None;
        }
        self.accumulator -= self.tick_duration;
        self.tick = self.tick.wrapping_add(1);
        Some(TickStep {
            tick: self.tick,
            send: self.tick % self.send_rate == 0,
        })
    }

    /// Last tick handed out.
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> i32 {
        self.tick
    }

    /// Target tick duration.
    #[inline]
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Time accumulated towards the next tick.
    #[inline]
    #[must_use]
    pub const fn accumulated(&self) -> Duration {
        self.accumulator
    }

    /// Marks the start of a tick's work.
    #[must_use]
    pub fn begin_tick(&self) -> Instant {
        Instant::now()
    }

    /// Records how long a tick's work took.
    pub fn end_tick(&mut self, start: Instant) {
        let duration = start.elapsed();
        let duration_us = duration_us(duration);

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(duration_us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(duration_us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + duration_us) / 16;

        if duration > self.tick_duration {
            self.stats.late_ticks += 1;
        }
    }

    /// Tick timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Restarts counting from tick 0.
    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
        self.tick = 0;
        self.stats = TickStats::new(self.tick_duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(clock: &mut TickClock) -> Vec<TickStep> {
        std::iter::from_fn(|| clock.next_tick()).collect()
    }

    #[test]
    fn test_accumulates_whole_ticks() {
        let mut clock = TickClock::new(Duration::from_millis(1), 2);
        clock.advance(Duration::from_micros(3500));

        let steps = drain(&mut clock);
        assert_eq!(
            steps,
            vec![
                TickStep { tick: 1, send: false },
                TickStep { tick: 2, send: true },
                TickStep { tick: 3, send: false },
            ]
        );
        assert_eq!(clock.accumulated(), Duration::from_micros(500));

        clock.advance(Duration::from_micros(600));
        assert_eq!(drain(&mut clock), vec![TickStep { tick: 4, send: true }]);
    }

    #[test]
    fn test_exact_duration_waits_for_more() {
        let mut clock = TickClock::new(Duration::from_millis(1), 1);
        clock.advance(Duration::from_millis(1));
        assert_eq!(clock.next_tick(), None);
        clock.advance(Duration::from_micros(1));
        assert!(clock.next_tick().is_some());
    }

    #[test]
    fn test_stats_tracking() {
        let mut clock = TickClock::new(Duration::from_millis(1), 1);
        for _ in 0..5 {
            let start = clock.begin_tick();
            std::thread::sleep(Duration::from_micros(50));
            clock.end_tick(start);
        }

        let stats = clock.stats();
        assert_eq!(stats.total_ticks, 5);
        assert!(stats.min_tick_us > 0);
        assert!(stats.min_tick_us <= stats.max_tick_us);
    }
}

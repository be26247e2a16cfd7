//! Remote tick estimation.

use tickwire_shared::constants::DEJITTER_PACKETS;

/// Correction applied to the remote tick estimate on one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickAdjustment {
    /// First packet: estimate placed behind the reported tick.
    Initialized,
    /// Estimate fell far behind and jumped forward by this many ticks.
    JumpForward(i32),
    /// Estimate slightly ahead of the window; held back one tick.
    Stall,
    /// Estimate ahead of the reported tick; stepped back one packet.
    StepBack,
    /// Estimate drifted far ahead and was reset.
    Reinitialized,
    /// Inside the window, nothing to do.
    Hold,
}

/// Tick reported by the newest valid packet.
#[derive(Clone, Copy, Debug)]
struct ReportedTick {
    tick: i32,
    /// Already used for a correction.
    synchronized: bool,
}

/// Estimate of the remote peer's simulation tick.
///
/// The estimate trails the tick reported in received packets by a fixed
/// de-jitter offset of two packets and advances once per local tick. Each
/// received packet corrects it at most once:
///
/// ```text
/// diff = reported - estimate            (steady state: diff == 2 * rate)
///
/// diff >= 3 * rate              jump forward min(diff - 2 * rate, 4 * rate)
/// 0 <= diff < rate              stall one tick
/// -2 * rate <= diff < 0         step back rate ticks
/// diff < -2 * rate              reset to reported - 2 * rate
/// ```
#[derive(Clone, Debug)]
pub struct TickSync {
    send_rate: i32,
    remote_tick: Option<i32>,
    remote_tick_max: Option<i32>,
    reported: Option<ReportedTick>,
}

impl TickSync {
    /// Creates an estimator for a peer sending every `send_rate` ticks.
    #[must_use]
    pub fn new(send_rate: i32) -> Self {
        Self {
            send_rate: send_rate.max(1),
            remote_tick: None,
            remote_tick_max: None,
            reported: None,
        }
    }

    /// Forgets the estimate, as on entering a new game phase.
    pub fn reset(&mut self) {
        self.remote_tick = None;
        self.remote_tick_max = None;
        self.reported = None;
    }

    /// Ticks between the peer's packets.
    #[inline]
    #[must_use]
    pub const fn send_rate(&self) -> i32 {
        self.send_rate
    }

    /// Current estimate, `None` until the first packet.
    #[inline]
    #[must_use]
    pub const fn remote_tick(&self) -> Option<i32> {
        self.remote_tick
    }

    /// Highest estimate so far. Never moves backwards, even when the
    /// estimate does.
    #[inline]
    #[must_use]
    pub const fn remote_tick_max(&self) -> Option<i32> {
        self.remote_tick_max
    }

    /// Tick of the newest valid packet.
    #[must_use]
    pub fn reported_tick(&self) -> Option<i32> {
        self.reported.map(|reported| reported.tick)
    }

    /// Whether the newest packet has already been used for a correction.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.reported.map_or(true, |reported| reported.synchronized)
    }

    fn dejitter_target(&self, reported: i32) -> i32 {
        reported.saturating_sub(DEJITTER_PACKETS * self.send_rate)
    }

    /// Records the tick carried by a packet that decoded successfully.
    pub fn on_packet(&mut self, tick: i32) {
        self.reported = Some(ReportedTick {
            tick,
            synchronized: false,
        });
    }

    /// Advances the estimate by one tick, then applies the correction owed to
    /// a packet received since the last call.
    pub fn update(&mut self) -> Option<TickAdjustment> {
        if let Some(tick) = self.remote_tick.as_mut() {
            *tick = tick.saturating_add(1);
        }
        self.bump_max();

        let reported = self.reported.as_mut().filter(|reported| !reported.synchronized)?;
        reported.synchronized = true;
        let reported = reported.tick;

        let rate = self.send_rate;
        let adjustment = match self.remote_tick {
            None => {
                self.remote_tick = Some(self.dejitter_target(reported));
                TickAdjustment::Initialized
            }
            Some(estimate) => {
                let diff = reported.saturating_sub(estimate);
                if diff >= 3 * rate {
                    let jump = (diff - 2 * rate).min(4 * rate);
                    self.remote_tick = Some(estimate + jump);
                    TickAdjustment::JumpForward(jump)
                } else if (0..rate).contains(&diff) {
                    self.remote_tick = Some(estimate - 1);
                    TickAdjustment::Stall
                } else if diff < 0 && diff >= -2 * rate {
                    self.remote_tick = Some(estimate - rate);
                    TickAdjustment::StepBack
                } else if diff < 0 {
                    self.remote_tick = Some(self.dejitter_target(reported));
                    TickAdjustment::Reinitialized
                } else {
                    TickAdjustment::Hold
                }
            }
        };
        self.bump_max();

        if adjustment != TickAdjustment::Hold {
            tracing::trace!(
                "Remote tick {:?} after {:?} (reported {})",
                self.remote_tick,
                adjustment,
                reported
            );
        }
        Some(adjustment)
    }

    fn bump_max(&mut self) {
        if let Some(tick) = self.remote_tick {
            self.remote_tick_max = Some(self.remote_tick_max.map_or(tick, |max| max.max(tick)));
        }
    }
}

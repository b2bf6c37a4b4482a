//! Leading+trailing debounce state machine.
//!
//! The first event after a quiet interval is emitted immediately. Events that
//! arrive within `interval` of the last emission are folded into a single
//! deferred emission that fires once `interval` has elapsed. Under sustained
//! load observers see at most one emission per interval, and the final state
//! is always emitted within one interval of the last event.
//!
//! The machine owns no timers; callers feed it instants and act on the
//! returned [`Decision`], which keeps it testable on a virtual clock.

use std::time::Duration;

use tokio::time::Instant;

/// What the caller must do in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Emit now; the machine already recorded the emission.
    EmitNow,
    /// Arm a timer for the given delay, then call [`Debouncer::on_fire`] and emit.
    Defer(Duration),
    /// A deferred emission is already armed and will cover this event.
    Coalesced,
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    last_emit: Instant,
    pending: bool,
}

impl Debouncer {
    /// `created_at` counts as the last emission, so a burst that starts right
    /// after construction is coalesced into one trailing emission.
    pub fn new(interval: Duration, created_at: Instant) -> Self {
        Self {
            interval,
            last_emit: created_at,
            pending: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn on_event(&mut self, now: Instant) -> Decision {
        let elapsed = now.saturating_duration_since(self.last_emit);
        if elapsed > self.interval {
            self.last_emit = now;
            Decision::EmitNow
        } else if !self.pending {
            self.pending = true;
            Decision::Defer(self.interval - elapsed)
        } else {
            Decision::Coalesced
        }
    }

    /// Record that the deferred emission fired at `now`.
    pub fn on_fire(&mut self, now: Instant) {
        self.pending = false;
        self.last_emit = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn burst_after_creation_is_coalesced_into_one_trailing_emission() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(SECOND, t0);

        assert_eq!(d.on_event(t0), Decision::Defer(SECOND));
        assert_eq!(d.on_event(t0 + ms(200)), Decision::Coalesced);
        assert_eq!(d.on_event(t0 + ms(500)), Decision::Coalesced);
        assert_eq!(d.on_event(t0 + ms(900)), Decision::Coalesced);
        assert!(d.is_pending());

        d.on_fire(t0 + SECOND);
        assert!(!d.is_pending());

        assert_eq!(d.on_event(t0 + ms(2500)), Decision::EmitNow);
    }

    #[test]
    fn defer_waits_only_for_the_remaining_interval() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(SECOND, t0);
        assert_eq!(d.on_event(t0 + ms(1500)), Decision::EmitNow);
        assert_eq!(d.on_event(t0 + ms(1800)), Decision::Defer(ms(700)));
    }

    #[test]
    fn event_exactly_one_interval_later_is_deferred_by_zero() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(SECOND, t0);
        assert_eq!(d.on_event(t0 + SECOND), Decision::Defer(Duration::ZERO));
    }

    #[test]
    fn sustained_load_emits_at_most_once_per_interval() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(SECOND, t0);
        let mut emissions = Vec::new();
        let mut armed: Option<Instant> = None;

        // One event every 100ms for 5s.
        for step in 0..50u64 {
            let now = t0 + ms(step * 100);
            if let Some(fire_at) = armed {
                if fire_at <= now {
                    d.on_fire(fire_at);
                    emissions.push(fire_at);
                    armed = None;
                }
            }
            match d.on_event(now) {
                Decision::EmitNow => emissions.push(now),
                Decision::Defer(delay) => armed = Some(now + delay),
                Decision::Coalesced => {}
            }
        }
        if let Some(fire_at) = armed {
            d.on_fire(fire_at);
            emissions.push(fire_at);
        }

        for pair in emissions.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= SECOND, "{emissions:?}");
        }
        let last_event = t0 + ms(4900);
        let last_emission = *emissions.last().expect("at least one emission");
        assert!(last_emission >= last_event);
        assert!(last_emission.duration_since(last_event) <= SECOND);
    }
}

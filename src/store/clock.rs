use tokio::time::Instant;

/// Source of monotonic and wall clock readings
pub trait Clock: Send + Sync {
    /// Returns `(monotonic now, microseconds since the unix epoch)`
    fn now(&self) -> (Instant, u64);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> (Instant, u64) {
        let steady = Instant::now();
        let wall = jiff::Timestamp::now().as_microsecond();
        (steady, u64::try_from(wall).unwrap_or(0))
    }
}

/// Clock readings taken at the first code of a cycle.
///
/// Later timestamps are the anchor's wall time plus monotonic time elapsed,
/// so stepping the wall clock mid boot cannot reorder a cycle.
#[derive(Debug, Clone, Copy)]
pub struct Anchor {
    steady: Instant,
    wall_us: u64,
}

impl Anchor {
    pub fn new(steady: Instant, wall_us: u64) -> Self {
        Self { steady, wall_us }
    }

    pub fn wall_us(&self) -> u64 {
        self.wall_us
    }

    /// Microseconds between the anchor and `steady`
    pub fn offset_us(&self, steady: Instant) -> u64 {
        let elapsed = steady.saturating_duration_since(self.steady).as_micros();
        u64::try_from(elapsed).unwrap_or(u64::MAX)
    }

    pub fn timestamp_at(&self, steady: Instant) -> u64 {
        self.wall_us.saturating_add(self.offset_us(steady))
    }
}

#[cfg(test)]
pub mod manual {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::Clock;

    /// Test clock whose monotonic and wall readings move independently
    #[derive(Clone)]
    pub struct ManualClock {
        inner: Arc<Mutex<(Instant, u64)>>,
    }

    impl ManualClock {
        pub fn new(wall_us: u64) -> Self {
            Self {
                inner: Arc::new(Mutex::new((Instant::now(), wall_us))),
            }
        }

        /// Advances both clocks
        pub fn advance(&self, us: u64) {
            let mut inner = self.inner.lock().unwrap();
            inner.0 += Duration::from_micros(us);
            inner.1 += us;
        }

        /// Steps only the wall clock, like an NTP correction
        pub fn set_wall(&self, wall_us: u64) {
            self.inner.lock().unwrap().1 = wall_us;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> (Instant, u64) {
            *self.inner.lock().unwrap()
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_anchor_offsets() {
        let start = Instant::now();
        let anchor = Anchor::new(start, 1_000_000);

        assert_eq!(anchor.timestamp_at(start), 1_000_000);
        assert_eq!(
            anchor.timestamp_at(start + Duration::from_millis(1500)),
            2_500_000
        );
        assert_eq!(anchor.offset_us(start + Duration::from_micros(7)), 7);
    }
}

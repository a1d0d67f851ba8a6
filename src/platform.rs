/*! Time and randomness, as an injectable capability.

Heartbeat cadence, client eviction, and the response jitter all read
the clock through this trait so tests can advance time
deterministically instead of sleeping.
*/
use std::time::Instant;

use rand::Rng;

/// Host services the protocol engine needs: a monotonic millisecond
/// clock, a bounded sleep, and a jitter source.
pub trait Platform {
    /// Monotonic milliseconds since an arbitrary epoch.
    fn now_ms(&self) -> u64;

    /// Block the (single) thread for this long.
    fn sleep_ms(&self, ms: u64);

    /// Uniform random value in `[lo, hi)`.
    fn jitter_ms(&self, lo: u64, hi: u64) -> u64;
}

/// A shared platform is still a platform. Lets one clock drive both
/// an application and the component owning it.
impl<P: Platform + ?Sized> Platform for std::rc::Rc<P> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn sleep_ms(&self, ms: u64) {
        (**self).sleep_ms(ms);
    }

    fn jitter_ms(&self, lo: u64, hi: u64) -> u64 {
        (**self).jitter_ms(lo, hi)
    }
}

/// The real thing: `Instant`, `thread::sleep`, and the thread RNG.
#[derive(Debug)]
pub struct SystemPlatform {
    epoch: Instant,
}

impl Default for SystemPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemPlatform {
    /// Create a platform whose clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Platform for SystemPlatform {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }

    fn jitter_ms(&self, lo: u64, hi: u64) -> u64 {
        rand::rng().random_range(lo..hi)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Deterministic platform for tests.
    use std::cell::Cell;

    use super::Platform;

    /// Manually advanced clock; sleeps advance it, jitter is fixed at
    /// the lower bound.
    #[derive(Debug, Default)]
    pub struct FakePlatform {
        now: Cell<u64>,
        slept: Cell<u64>,
    }

    impl FakePlatform {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn advance(&self, ms: u64) {
            self.now.set(self.now.get() + ms);
        }

        /// Total time spent in `sleep_ms`.
        pub fn slept_ms(&self) -> u64 {
            self.slept.get()
        }
    }

    impl Platform for FakePlatform {
        fn now_ms(&self) -> u64 {
            self.now.get()
        }

        fn sleep_ms(&self, ms: u64) {
            self.slept.set(self.slept.get() + ms);
            self.advance(ms);
        }

        fn jitter_ms(&self, lo: u64, _hi: u64) -> u64 {
            lo
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let p = SystemPlatform::new();
        let a = p.now_ms();
        let b = p.now_ms();
        assert!(b >= a);
    }

    #[test]
    fn jitter_in_range() {
        let p = SystemPlatform::new();
        for _ in 0..100 {
            let j = p.jitter_ms(500, 2500);
            assert!((500..2500).contains(&j));
        }
    }

    #[test]
    fn fake_advances() {
        let p = fake::FakePlatform::new();
        assert_eq!(p.now_ms(), 0);
        p.advance(1234);
        assert_eq!(p.now_ms(), 1234);
        p.sleep_ms(10);
        assert_eq!(p.now_ms(), 1244);
        assert_eq!(p.slept_ms(), 10);
    }
}

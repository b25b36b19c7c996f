//! STAN Sequence Generator
//!
//! Bounded six-digit trace number used as the fallback correlation key.
//! Values cycle 000001, 000002, ..., 999999, 000000, 000001, ... so every
//! value is issued exactly once per cycle. Uniqueness beyond one cycle is not
//! guaranteed; callers that need more supply their own keys.

use parking_lot::Mutex;

/// Largest STAN value before wrapping back to zero
pub const MAX_STAN: u32 = 999_999;

/// Per-client STAN counter
#[derive(Debug, Default)]
pub struct StanGenerator {
    counter: Mutex<u32>,
}

impl StanGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an arbitrary value; the next issued STAN is `last + 1`
    pub fn starting_after(last: u32) -> Self {
        Self {
            counter: Mutex::new(last.min(MAX_STAN)),
        }
    }

    /// Allocate the next STAN, rendered as six zero-padded digits
    pub fn next(&self) -> String {
        let value = {
            let mut counter = self.counter.lock();
            *counter += 1;
            if *counter > MAX_STAN {
                *counter = 0;
            }
            *counter
        };
        format!("{:06}", value)
    }

    /// Last issued value, without allocating
    pub fn current(&self) -> u32 {
        *self.counter.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_first_values() {
        let stan = StanGenerator::new();
        assert_eq!(stan.next(), "000001");
        assert_eq!(stan.next(), "000002");
        assert_eq!(stan.current(), 2);
    }

    #[test]
    fn test_wraps_after_max() {
        let stan = StanGenerator::starting_after(MAX_STAN - 1);
        assert_eq!(stan.next(), "999999");
        assert_eq!(stan.next(), "000000");
        assert_eq!(stan.next(), "000001");
    }

    #[test]
    fn test_full_cycle_is_unique() {
        let stan = StanGenerator::new();
        let mut seen = HashSet::with_capacity(MAX_STAN as usize + 1);
        for _ in 0..=MAX_STAN {
            assert!(seen.insert(stan.next()));
        }
        assert_eq!(seen.len(), MAX_STAN as usize + 1);
        assert!(seen.contains("000000"));
        assert!(seen.contains("999999"));
        // next cycle starts over
        assert_eq!(stan.next(), "000001");
    }

    #[test]
    fn test_concurrent_allocation_has_no_duplicates() {
        let stan = Arc::new(StanGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stan = stan.clone();
                std::thread::spawn(move || (0..1000).map(|_| stan.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value));
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    proptest! {
        #[test]
        fn prop_always_six_digits(start in 0u32..=MAX_STAN, steps in 1usize..50) {
            let stan = StanGenerator::starting_after(start);
            let mut expected = start;
            for _ in 0..steps {
                expected = if expected == MAX_STAN { 0 } else { expected + 1 };
                let value = stan.next();
                prop_assert_eq!(value.len(), 6);
                prop_assert_eq!(value.parse::<u32>().unwrap(), expected);
            }
        }
    }
}

//! # Error Classification & Backoff
//!
//! Maps raw error messages (and explicit adapter-reported kinds) to a
//! `(ErrorClass, ErrorSubclass)` tuple, and computes the exponential
//! full-jitter backoff delay the dispatcher uses to re-schedule a run.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Transient,
    Fatal,
    WaitUntil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSubclass {
    Network,
    Timeout,
    RateLimit,
    Memory,
    Temporary,
    Auth,
    Validation,
    Integrity,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: ErrorClass,
    pub subclass: ErrorSubclass,
}

impl Classification {
    #[must_use]
    pub fn is_recoverable_in(&self, recoverable: &[ErrorSubclass]) -> bool {
        recoverable.contains(&self.subclass)
    }
}

/// Classify a raw error message by pattern matching. Adapters that already
/// know their error kind should bypass this and construct a
/// [`Classification`] directly instead of round-tripping through text.
#[must_use]
pub fn classify(message: &str) -> Classification {
    let lower = message.to_lowercase();

    let has_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has_any(&["integrity", "stepnameconflict", "step name conflict"]) {
        return Classification {
            class: ErrorClass::Fatal,
            subclass: ErrorSubclass::Integrity,
        };
    }
    if has_any(&["validation", "invalid", "bad request", "400"]) {
        return Classification {
            class: ErrorClass::Fatal,
            subclass: ErrorSubclass::Validation,
        };
    }
    if has_any(&["auth", "unauthorized", "forbidden", "401", "403"]) {
        return Classification {
            class: ErrorClass::Fatal,
            subclass: ErrorSubclass::Auth,
        };
    }
    if has_any(&["rate limit", "rate.limit", "too many requests", "429"]) {
        return Classification {
            class: ErrorClass::Transient,
            subclass: ErrorSubclass::RateLimit,
        };
    }
    if has_any(&["timeout", "timed out"]) {
        return Classification {
            class: ErrorClass::Transient,
            subclass: ErrorSubclass::Timeout,
        };
    }
    if has_any(&["memory", "out of memory", "heap"]) {
        return Classification {
            class: ErrorClass::Transient,
            subclass: ErrorSubclass::Memory,
        };
    }
    if has_any(&["temporary", "try again", "502", "503", "504"]) {
        return Classification {
            class: ErrorClass::Transient,
            subclass: ErrorSubclass::Temporary,
        };
    }
    if has_any(&["network", "connection", "enotfound", "econnrefused"]) {
        return Classification {
            class: ErrorClass::Transient,
            subclass: ErrorSubclass::Network,
        };
    }

    Classification {
        class: ErrorClass::Transient,
        subclass: ErrorSubclass::Unknown,
    }
}

/// Exponential backoff with full jitter: `delay = random(0, min(cap, base *
/// factor^attempt))`. `attempt` is zero-based (the attempt that just
/// failed).
#[must_use]
pub fn backoff_delay(
    attempt: u32,
    base: Duration,
    factor: f64,
    cap: Duration,
    full_jitter: bool,
) -> Duration {
    let exp = factor.powi(attempt as i32);
    let uncapped_ms = (base.as_millis() as f64) * exp;
    let capped_ms = uncapped_ms.min(cap.as_millis() as f64);

    let delay_ms = if full_jitter {
        fastrand::f64() * capped_ms
    } else {
        capped_ms
    };

    Duration::from_millis(delay_ms.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_network_errors_as_transient() {
        let c = classify("connect ECONNREFUSED 127.0.0.1:5432");
        assert_eq!(c.class, ErrorClass::Transient);
        assert_eq!(c.subclass, ErrorSubclass::Network);
    }

    #[test]
    fn classifies_validation_errors_as_fatal() {
        let c = classify("Validation failed: missing field 'to'");
        assert_eq!(c.class, ErrorClass::Fatal);
        assert_eq!(c.subclass, ErrorSubclass::Validation);
    }

    #[test]
    fn classifies_rate_limit_before_generic_temporary() {
        let c = classify("429 Too Many Requests");
        assert_eq!(c.subclass, ErrorSubclass::RateLimit);
    }

    #[test]
    fn unmatched_message_is_unknown_transient() {
        let c = classify("the goat ate the cable");
        assert_eq!(c.class, ErrorClass::Transient);
        assert_eq!(c.subclass, ErrorSubclass::Unknown);
    }

    #[test]
    fn backoff_respects_cap() {
        let d = backoff_delay(
            20,
            Duration::from_secs(1),
            2.0,
            Duration::from_secs(600),
            false,
        );
        assert_eq!(d, Duration::from_secs(600));
    }

    #[test]
    fn backoff_grows_exponentially_without_jitter() {
        let d0 = backoff_delay(0, Duration::from_secs(1), 2.0, Duration::from_secs(600), false);
        let d1 = backoff_delay(1, Duration::from_secs(1), 2.0, Duration::from_secs(600), false);
        let d2 = backoff_delay(2, Duration::from_secs(1), 2.0, Duration::from_secs(600), false);
        assert_eq!(d0, Duration::from_secs(1));
        assert_eq!(d1, Duration::from_secs(2));
        assert_eq!(d2, Duration::from_secs(4));
    }

    #[test]
    fn full_jitter_stays_within_bounds() {
        let cap = backoff_delay(5, Duration::from_secs(1), 2.0, Duration::from_secs(600), false);
        for _ in 0..50 {
            let d = backoff_delay(5, Duration::from_secs(1), 2.0, Duration::from_secs(600), true);
            assert!(d <= cap);
        }
    }
}

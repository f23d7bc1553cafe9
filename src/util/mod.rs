//! Utility module
//!
//! This module provides common utilities and helper functions used
//! throughout the library.

use crate::core::{Error, Result, SimTime, SEQ_MASK};

/// Converts a duration to a floating-point number of seconds
pub fn duration_to_secs(duration: std::time::Duration) -> f64 {
    duration.as_secs_f64()
}

/// Rejects negative or non-finite durations
pub fn checked_duration(what: &str, secs: f64) -> Result<f64> {
    if secs.is_finite() && secs >= 0.0 {
        Ok(secs)
    } else {
        Err(Error::timing(format!("{} has invalid duration {}", what, secs)))
    }
}

/// Time left until `deadline`; a deadline already passed means "now"
pub fn until(now: SimTime, deadline: SimTime) -> f64 {
    (deadline - now).max(0.0)
}

/// Masks a sequence number to 16 bits
pub fn mask_seq(value: u32) -> u16 {
    (value & SEQ_MASK) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_duration_conversion() {
        let duration = Duration::from_secs_f64(1.5);
        assert_eq!(duration_to_secs(duration), 1.5);
        assert_eq!(duration_to_secs(Duration::from_millis(250)), 0.25);
    }

    #[test]
    fn test_checked_duration() {
        assert_eq!(checked_duration("sleep", 0.25).unwrap(), 0.25);
        assert!(checked_duration("sleep", 0.0).is_ok());
        assert!(matches!(checked_duration("sleep", -0.1), Err(Error::Timing(_))));
        assert!(checked_duration("sleep", f64::INFINITY).is_err());
    }

    #[test]
    fn test_until_clamps_past_deadlines() {
        assert_eq!(until(1.0, 1.5), 0.5);
        assert_eq!(until(2.0, 1.5), 0.0);
    }

    #[test]
    fn test_mask_seq() {
        assert_eq!(mask_seq(0x1_0005), 5);
        assert_eq!(mask_seq(0xFFFF), 0xFFFF);
    }
}

use serde::Serialize;

use crate::models::Sample;

/// Current (A) above which a vehicle is considered to be driving.
pub const ACTIVITY_CURRENT_THRESHOLD: f64 = 0.5;

/// Span between the first and last samples drawing more than the activity
/// threshold. Used as the elapsed race time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl ActiveWindow {
    pub fn elapsed_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

fn is_active(sample: &Sample, threshold: f64) -> bool {
    sample.current.is_some_and(|current| current > threshold)
}

/// Finds the active window of a chronologically ordered sample sequence.
///
/// Returns `None` when no sample exceeds the threshold, including for an
/// empty sequence. Samples without a current reading never count as active.
pub fn detect(samples: &[Sample], threshold: f64) -> Option<ActiveWindow> {
    let first = samples.iter().find(|s| is_active(s, threshold))?;
    let last = samples.iter().rev().find(|s| is_active(s, threshold))?;

    Some(ActiveWindow {
        start_ms: first.timestamp,
        end_ms: last.timestamp,
    })
}

/// Elapsed race time in milliseconds, `None` when undetermined.
pub fn elapsed_ms(samples: &[Sample], threshold: f64) -> Option<i64> {
    detect(samples, threshold).map(|window| window.elapsed_ms())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp: i64, current: Option<f64>) -> Sample {
        Sample {
            sample_id: timestamp,
            record_id: 1,
            device_id: 1,
            session_id: 1,
            timestamp,
            raw_timestamp: timestamp,
            voltage: Some(48.0),
            current,
            energy: None,
        }
    }

    #[test]
    fn test_empty_sequence_is_undetermined() {
        assert_eq!(detect(&[], ACTIVITY_CURRENT_THRESHOLD), None);
    }

    #[test]
    fn test_no_active_sample_is_undetermined() {
        let samples = vec![
            sample(0, Some(0.1)),
            sample(1000, Some(0.5)),
            sample(2000, None),
        ];
        assert_eq!(elapsed_ms(&samples, ACTIVITY_CURRENT_THRESHOLD), None);
    }

    #[test]
    fn test_window_spans_first_and_last_active_samples() {
        let samples = vec![
            sample(0, Some(0.0)),
            sample(1000, Some(0.2)),
            sample(2000, Some(3.5)),
            sample(3000, Some(0.1)),
            sample(4000, Some(12.0)),
            sample(5000, Some(7.0)),
            sample(6000, Some(0.3)),
        ];

        let window = detect(&samples, ACTIVITY_CURRENT_THRESHOLD).unwrap();
        assert_eq!(window.start_ms, 2000);
        assert_eq!(window.end_ms, 5000);
        assert_eq!(window.elapsed_ms(), 3000);
    }

    #[test]
    fn test_single_active_sample_has_zero_elapsed_time() {
        let samples = vec![sample(0, Some(0.0)), sample(700, Some(2.0)), sample(900, None)];
        assert_eq!(elapsed_ms(&samples, ACTIVITY_CURRENT_THRESHOLD), Some(0));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let samples = vec![sample(0, Some(0.5)), sample(10, Some(0.51))];
        assert_eq!(
            detect(&samples, ACTIVITY_CURRENT_THRESHOLD),
            Some(ActiveWindow {
                start_ms: 10,
                end_ms: 10
            })
        );
    }

    #[test]
    fn test_custom_threshold() {
        let samples = vec![sample(0, Some(1.0)), sample(500, Some(4.0)), sample(900, Some(1.0))];
        assert_eq!(elapsed_ms(&samples, 2.0), Some(0));
        assert_eq!(elapsed_ms(&samples, 0.5), Some(900));
    }
}

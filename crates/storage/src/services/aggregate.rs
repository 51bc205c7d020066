use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Record, Sample};

/// Seconds per hour, used to turn W·s worth of samples into Wh.
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Record-level aggregates. A `None` channel means "no data", never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Aggregates {
    pub avg_voltage: Option<f64>,
    pub avg_current: Option<f64>,
    pub energy: Option<f64>,
}

/// Previously aggregated values of one record together with the number of
/// samples they were computed from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordSummary {
    pub avg_voltage: Option<f64>,
    pub avg_current: Option<f64>,
    pub energy: Option<f64>,
    pub sample_count: i64,
}

impl RecordSummary {
    pub fn from_record(record: &Record, sample_count: i64) -> Self {
        Self {
            avg_voltage: record.avg_voltage,
            avg_current: record.avg_current,
            energy: record.energy,
            sample_count,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn derived_energy(
    avg_voltage: Option<f64>,
    avg_current: Option<f64>,
    sample_count: i64,
) -> Option<f64> {
    match (avg_voltage, avg_current) {
        (Some(v), Some(i)) if sample_count > 0 => Some(v * i * sample_count as f64 / SECONDS_PER_HOUR),
        _ => None,
    }
}

/// Aggregates a raw sample sequence.
///
/// Energy is the sum of the per-sample energy readings when any are present,
/// otherwise it is approximated from the mean voltage and current.
pub fn from_samples(samples: &[Sample]) -> Aggregates {
    let avg_voltage = mean(samples.iter().filter_map(|s| s.voltage).filter(|v| v.is_finite()));
    let avg_current = mean(samples.iter().filter_map(|s| s.current).filter(|c| c.is_finite()));

    let mut measured = samples.iter().filter_map(|s| s.energy).filter(|e| e.is_finite()).peekable();
    let energy = if measured.peek().is_some() {
        Some(measured.sum::<f64>())
    } else {
        derived_energy(avg_voltage, avg_current, samples.len() as i64)
    };

    Aggregates {
        avg_voltage,
        avg_current,
        energy,
    }
}

fn weighted_mean(values: impl Iterator<Item = (f64, i64)>) -> Option<f64> {
    let (sum, weight) = values
        .filter(|(_, count)| *count > 0)
        .fold((0.0, 0i64), |(sum, weight), (value, count)| {
            (sum + value * count as f64, weight + count)
        });
    (weight > 0).then(|| sum / weight as f64)
}

/// Sums record energies, deriving it for records that carry none. A record
/// with samples but no way to tell its energy makes the total unknown.
fn total_energy(summaries: &[RecordSummary]) -> Option<f64> {
    let mut total: Option<f64> = None;
    for summary in summaries {
        let energy = summary.energy.or_else(|| {
            derived_energy(summary.avg_voltage, summary.avg_current, summary.sample_count)
        });
        match energy {
            Some(energy) => *total.get_or_insert(0.0) += energy,
            None if summary.sample_count > 0 => return None,
            None => {}
        }
    }
    total
}

/// Aggregates previously summarized records, weighting each mean by the
/// number of samples behind it.
pub fn from_summaries(summaries: &[RecordSummary]) -> Aggregates {
    let avg_voltage = weighted_mean(
        summaries
            .iter()
            .filter_map(|s| s.avg_voltage.map(|v| (v, s.sample_count))),
    );
    let avg_current = weighted_mean(
        summaries
            .iter()
            .filter_map(|s| s.avg_current.map(|c| (c, s.sample_count))),
    );

    Aggregates {
        avg_voltage,
        avg_current,
        energy: total_energy(summaries),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(voltage: Option<f64>, current: Option<f64>, energy: Option<f64>) -> Sample {
        Sample {
            sample_id: 0,
            record_id: 1,
            device_id: 1,
            session_id: 1,
            timestamp: 0,
            raw_timestamp: 0,
            voltage,
            current,
            energy,
        }
    }

    fn approx(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("expected a value");
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    #[test]
    fn test_empty_input_yields_all_null() {
        assert_eq!(from_samples(&[]), Aggregates::default());
        assert_eq!(from_summaries(&[]), Aggregates::default());
    }

    #[test]
    fn test_means_skip_missing_channels() {
        let samples = vec![
            sample(Some(12.0), Some(2.0), None),
            sample(None, Some(4.0), None),
            sample(Some(14.0), None, None),
        ];

        let aggregates = from_samples(&samples);
        approx(aggregates.avg_voltage, 13.0);
        approx(aggregates.avg_current, 3.0);
    }

    #[test]
    fn test_measured_energy_is_summed() {
        let samples = vec![
            sample(Some(12.0), Some(2.0), Some(0.5)),
            sample(Some(12.0), Some(2.0), None),
            sample(Some(12.0), Some(2.0), Some(0.25)),
        ];

        approx(from_samples(&samples).energy, 0.75);
    }

    #[test]
    fn test_energy_is_derived_without_measurements() {
        let samples = vec![
            sample(Some(10.0), Some(3.0), None),
            sample(Some(14.0), Some(5.0), None),
        ];

        // 12 V * 4 A * 2 samples / 3600
        approx(from_samples(&samples).energy, 96.0 / 3600.0);
    }

    #[test]
    fn test_channel_without_data_stays_null() {
        let samples = vec![sample(Some(12.0), None, None), sample(Some(13.0), None, None)];

        let aggregates = from_samples(&samples);
        approx(aggregates.avg_voltage, 12.5);
        assert_eq!(aggregates.avg_current, None);
        assert_eq!(aggregates.energy, None);
    }

    #[test]
    fn test_summaries_are_weighted_by_sample_count() {
        let summaries = vec![
            RecordSummary {
                avg_voltage: Some(10.0),
                avg_current: Some(1.0),
                energy: Some(2.0),
                sample_count: 3,
            },
            RecordSummary {
                avg_voltage: Some(20.0),
                avg_current: None,
                energy: Some(1.5),
                sample_count: 1,
            },
        ];

        let aggregates = from_summaries(&summaries);
        approx(aggregates.avg_voltage, 12.5);
        approx(aggregates.avg_current, 1.0);
        approx(aggregates.energy, 3.5);
    }

    #[test]
    fn test_summaries_without_samples_do_not_contribute() {
        let summaries = vec![RecordSummary {
            avg_voltage: Some(10.0),
            avg_current: Some(1.0),
            energy: None,
            sample_count: 0,
        }];

        assert_eq!(from_summaries(&summaries), Aggregates::default());
    }

    #[test]
    fn test_summary_energy_falls_back_to_derived_value() {
        let summaries = vec![
            RecordSummary {
                avg_voltage: Some(12.0),
                avg_current: Some(2.0),
                energy: Some(1.0),
                sample_count: 10,
            },
            RecordSummary {
                avg_voltage: Some(10.0),
                avg_current: Some(3.0),
                energy: None,
                sample_count: 120,
            },
        ];

        // 1 Wh measured + 10 V * 3 A * 120 samples / 3600
        approx(from_summaries(&summaries).energy, 2.0);
    }

    #[test]
    fn test_partial_energy_coverage_is_unknown() {
        let summaries = vec![
            RecordSummary {
                avg_voltage: Some(12.0),
                avg_current: Some(2.0),
                energy: Some(1.0),
                sample_count: 10,
            },
            RecordSummary {
                avg_voltage: Some(10.0),
                avg_current: None,
                energy: None,
                sample_count: 5,
            },
        ];

        assert_eq!(from_summaries(&summaries).energy, None);
    }
}

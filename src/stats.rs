//! Post-drive statistical aggregation.
//!
//! Given the buffered readings for one (drive, parameter) pair, computes
//! min/max/avg/mode/std1/std2/outlier bounds as specified by spec.md §8
//! scenario S3. Pure functions over `&[f64]`, unit-tested with exact
//! expected values the way `modbus::decode_32bit_float` is tested.

use crate::store::model::AnalysisResult;
use crate::logging::{StructuredLogger, get_logger};
use crate::store::Store;
use uuid::Uuid;

/// Computes [`AnalysisResult`] rows for a completed drive. Cold at
/// construction: it holds no per-drive state between calls, it only reads
/// buffered readings back out of the [`Store`] when asked.
pub struct StatsEngine {
    store: Store,
    logger: StructuredLogger,
}

impl StatsEngine {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            logger: get_logger("stats"),
        }
    }

    /// Compute and persist one [`AnalysisResult`] row per parameter that
    /// has at least one Reading recorded against this drive.
    pub fn compute_and_store(
        &self,
        drive_id: Uuid,
        parameters: &[String],
    ) -> crate::error::Result<Vec<AnalysisResult>> {
        let mut rows = Vec::new();
        for parameter in parameters {
            let values = self.store.readings_for_drive(drive_id, parameter)?;
            if values.is_empty() {
                continue;
            }
            rows.push(aggregate(drive_id, parameter, &values));
        }
        self.store.insert_analysis_results(&rows)?;
        self.logger.info(&format!(
            "computed {} analysis rows for drive {}",
            rows.len(),
            drive_id
        ));
        Ok(rows)
    }
}

/// Aggregate one parameter's values into an [`AnalysisResult`].
///
/// `mode` is the most frequent value after rounding to 2 decimal places
/// (raw floating-point values rarely repeat exactly); ties keep the first
/// value encountered in input order. `outlier_lo`/`outlier_hi` are
/// `avg ± 2*std` as specified by spec.md §8 S3.
pub fn aggregate(drive_id: Uuid, parameter: &str, values: &[f64]) -> AnalysisResult {
    debug_assert!(!values.is_empty());

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = mean(values);
    let std = std_dev(values, avg);
    let mode = mode_of(values);

    AnalysisResult {
        drive_id,
        parameter: parameter.to_string(),
        min,
        max,
        avg,
        mode,
        std1: std,
        std2: std * 2.0,
        outlier_lo: avg - 2.0 * std,
        outlier_hi: avg + 2.0 * std,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by n, not n-1): a drive's
/// buffered readings are the entire population of that drive, not a
/// sample drawn from a larger one.
fn std_dev(values: &[f64], avg: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn mode_of(values: &[f64]) -> f64 {
    let mut best_value = values[0];
    let mut best_count = 0usize;
    for (i, &v) in values.iter().enumerate() {
        let rounded = (v * 100.0).round();
        let count = values[i..]
            .iter()
            .filter(|&&w| (w * 100.0).round() == rounded)
            .count();
        if count > best_count {
            best_count = count;
            best_value = v;
        }
    }
    best_value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_computes_expected_min_max_avg() {
        let values = vec![10.0, 20.0, 30.0, 40.0];
        let result = aggregate(Uuid::nil(), "RPM", &values);
        assert_eq!(result.min, 10.0);
        assert_eq!(result.max, 40.0);
        assert_eq!(result.avg, 25.0);
        assert!((result.std1 - 11.180339887).abs() < 1e-6);
        assert_eq!(result.outlier_lo, result.avg - 2.0 * result.std1);
        assert_eq!(result.outlier_hi, result.avg + 2.0 * result.std1);
    }

    #[test]
    fn single_value_has_zero_std_and_is_its_own_mode() {
        let result = aggregate(Uuid::nil(), "RPM", &[800.0]);
        assert_eq!(result.std1, 0.0);
        assert_eq!(result.mode, 800.0);
        assert_eq!(result.outlier_lo, 800.0);
        assert_eq!(result.outlier_hi, 800.0);
    }

    #[test]
    fn mode_picks_most_frequent_value() {
        let values = vec![1.0, 2.0, 2.0, 3.0, 2.0, 1.0];
        assert_eq!(mode_of(&values), 2.0);
    }

    #[test]
    fn compute_and_store_skips_parameters_with_no_readings() {
        let store = Store::open_in_memory().unwrap();
        let drive_id = Uuid::new_v4();
        store
            .open_drive_session(&crate::store::model::DriveSession {
                id: drive_id,
                profile_id: "daily".to_string(),
                start_ts: 0,
                end_ts: None,
            })
            .unwrap();
        store
            .insert_readings_batch(&[crate::store::model::Reading {
                timestamp_ms: 1,
                parameter: "RPM".to_string(),
                value: 900.0,
                unit: "rpm".to_string(),
                profile_id: Some("daily".to_string()),
                drive_id: Some(drive_id),
            }])
            .unwrap();

        let engine = StatsEngine::new(store);
        let rows = engine
            .compute_and_store(
                drive_id,
                &["RPM".to_string(), "COOLANT_TEMP".to_string()],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].parameter, "RPM");
    }
}

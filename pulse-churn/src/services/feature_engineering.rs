//! Feature derivation from raw transaction data
//!
//! Turns a raw customer-transaction table into one feature row per customer:
//! RFM scores, an engagement composite, and activity statistics. All dates
//! are measured against the dataset's own maximum event date rather than the
//! wall clock, so reprocessing the same upload always produces the same
//! output bytes.

use chrono::NaiveDate;
use pulse_common::csv::CsvTable;
use pulse_common::{Error, Result};
use std::collections::BTreeMap;

use crate::models::{FeatureRow, FeatureVector, FEATURE_COLUMNS};

/// Recency saturates at one year of inactivity
const MAX_RECENCY_DAYS: f64 = 365.0;
/// Transaction count that maps to a frequency score of 100
const MAX_FREQUENCY: f64 = 100.0;
/// Window for the activity-trend slope
const TREND_WINDOW_DAYS: i64 = 30;

/// One parsed transaction row
#[derive(Debug, Clone, Copy)]
struct Transaction {
    date: NaiveDate,
    amount: f64,
}

/// Per-customer transaction history in upload order
struct CustomerHistory {
    /// Order of first appearance in the input file
    first_seen: usize,
    transactions: Vec<Transaction>,
    label: Option<bool>,
}

/// Derive the full feature set for a raw dataset
///
/// When `has_label` is set the input must carry a `churn_label` column and
/// the first value per customer wins. Otherwise labels are derived from
/// inactivity: a customer whose last transaction is at least
/// `churn_threshold_days` before the dataset's maximum event date is labeled
/// churned.
pub fn derive_features(
    table: &CsvTable,
    has_label: bool,
    lookback_days: i64,
    churn_threshold_days: i64,
) -> Result<Vec<FeatureRow>> {
    table.require_columns(&["customer_id", "event_date"])?;
    if has_label {
        table.require_columns(&["churn_label"])?;
    }

    let id_col = table.column_index("customer_id").ok_or_else(missing_column)?;
    let date_col = table.column_index("event_date").ok_or_else(missing_column)?;
    let amount_col = table.column_index("amount");
    let label_col = table.column_index("churn_label");

    // BTreeMap keys give deterministic customer ordering in the output
    let mut customers: BTreeMap<String, CustomerHistory> = BTreeMap::new();
    let mut as_of: Option<NaiveDate> = None;

    for (line, row) in table.rows.iter().enumerate() {
        let customer_id = row.get(id_col).map(|s| s.trim()).unwrap_or("");
        if customer_id.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Row {}: missing customer_id",
                line + 2
            )));
        }

        let date_text = row.get(date_col).map(|s| s.trim()).unwrap_or("");
        let date = NaiveDate::parse_from_str(date_text, "%Y-%m-%d").map_err(|_| {
            Error::InvalidInput(format!(
                "Row {}: invalid event_date '{}' (expected YYYY-MM-DD)",
                line + 2,
                date_text
            ))
        })?;

        // Unparseable or missing amounts count as zero, matching upstream
        // tolerance for event-only rows
        let amount = amount_col
            .and_then(|i| row.get(i))
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(0.0);

        as_of = Some(match as_of {
            Some(d) => d.max(date),
            None => date,
        });

        let next_index = customers.len();
        let entry = customers.entry(customer_id.to_string()).or_insert_with(|| {
            CustomerHistory {
                first_seen: next_index,
                transactions: Vec::new(),
                label: None,
            }
        });
        entry.transactions.push(Transaction { date, amount });

        if has_label && entry.label.is_none() {
            let raw = label_col.and_then(|i| row.get(i)).map(|s| s.trim()).unwrap_or("");
            entry.label = Some(parse_label(raw).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Row {}: invalid churn_label '{}' (expected 0 or 1)",
                    line + 2,
                    raw
                ))
            })?);
        }
    }

    let as_of = as_of.ok_or_else(|| Error::InvalidInput("Dataset has no data rows".to_string()))?;

    // p95 of per-customer lookback spend normalizes the monetary score
    let lookback_start = as_of - chrono::Duration::days(lookback_days);
    let monetary_values: Vec<f64> = customers
        .values()
        .map(|c| {
            c.transactions
                .iter()
                .filter(|t| t.date >= lookback_start)
                .map(|t| t.amount)
                .sum()
        })
        .collect();
    let mut monetary_reference = percentile(&monetary_values, 0.95);
    if monetary_reference == 0.0 {
        monetary_reference = 1.0;
    }

    let mut rows: Vec<(usize, FeatureRow)> = customers
        .into_iter()
        .map(|(customer_id, mut history)| {
            history.transactions.sort_by_key(|t| t.date);
            let features = customer_features(
                &history.transactions,
                as_of,
                lookback_start,
                monetary_reference,
            );
            let label = match history.label {
                Some(l) => Some(l),
                None => {
                    let last = history.transactions.last().map(|t| t.date).unwrap_or(as_of);
                    Some((as_of - last).num_days() >= churn_threshold_days)
                }
            };
            (
                history.first_seen,
                FeatureRow {
                    customer_id,
                    features,
                    label,
                },
            )
        })
        .collect();

    rows.sort_by_key(|(first_seen, _)| *first_seen);
    Ok(rows.into_iter().map(|(_, row)| row).collect())
}

/// Per-customer outcome of a tolerant bulk derivation
pub struct BulkCustomer {
    pub customer_id: String,
    /// Features, or the first row-level problem for this customer
    pub outcome: std::result::Result<FeatureVector, String>,
}

/// Derive features for bulk scoring, tolerating bad rows per customer
///
/// Unlike [`derive_features`], a malformed row marks only its customer as
/// failed instead of rejecting the whole file. Customers come back in
/// first-appearance order; normalization uses only the valid rows. The
/// whole call still fails on structural problems (missing required columns,
/// no usable rows at all).
pub fn derive_features_tolerant(table: &CsvTable, lookback_days: i64) -> Result<Vec<BulkCustomer>> {
    table.require_columns(&["customer_id", "event_date"])?;

    let id_col = table.column_index("customer_id").ok_or_else(missing_column)?;
    let date_col = table.column_index("event_date").ok_or_else(missing_column)?;
    let amount_col = table.column_index("amount");

    struct Pending {
        first_seen: usize,
        transactions: Vec<Transaction>,
        error: Option<String>,
    }

    let mut customers: BTreeMap<String, Pending> = BTreeMap::new();
    let mut as_of: Option<NaiveDate> = None;

    for (line, row) in table.rows.iter().enumerate() {
        let customer_id = row.get(id_col).map(|s| s.trim()).unwrap_or("");
        if customer_id.is_empty() {
            // No customer to attribute the row to; skip it
            continue;
        }

        let next_index = customers.len();
        let entry = customers.entry(customer_id.to_string()).or_insert_with(|| Pending {
            first_seen: next_index,
            transactions: Vec::new(),
            error: None,
        });

        let date_text = row.get(date_col).map(|s| s.trim()).unwrap_or("");
        let date = match NaiveDate::parse_from_str(date_text, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => {
                if entry.error.is_none() {
                    entry.error = Some(format!(
                        "Row {}: invalid event_date '{}'",
                        line + 2,
                        date_text
                    ));
                }
                continue;
            }
        };

        let amount = amount_col
            .and_then(|i| row.get(i))
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(0.0);

        as_of = Some(match as_of {
            Some(d) => d.max(date),
            None => date,
        });
        entry.transactions.push(Transaction { date, amount });
    }

    if customers.is_empty() {
        return Err(Error::InvalidInput("File has no usable rows".to_string()));
    }
    let as_of = as_of.ok_or_else(|| {
        Error::InvalidInput("File has no rows with a valid event_date".to_string())
    })?;

    let lookback_start = as_of - chrono::Duration::days(lookback_days);
    let monetary_values: Vec<f64> = customers
        .values()
        .filter(|c| c.error.is_none() && !c.transactions.is_empty())
        .map(|c| {
            c.transactions
                .iter()
                .filter(|t| t.date >= lookback_start)
                .map(|t| t.amount)
                .sum()
        })
        .collect();
    let mut monetary_reference = percentile(&monetary_values, 0.95);
    if monetary_reference == 0.0 {
        monetary_reference = 1.0;
    }

    let mut out: Vec<(usize, BulkCustomer)> = customers
        .into_iter()
        .map(|(customer_id, mut pending)| {
            let outcome = match pending.error {
                Some(error) => Err(error),
                None if pending.transactions.is_empty() => {
                    Err("Customer has no valid transactions".to_string())
                }
                None => {
                    pending.transactions.sort_by_key(|t| t.date);
                    Ok(customer_features(
                        &pending.transactions,
                        as_of,
                        lookback_start,
                        monetary_reference,
                    ))
                }
            };
            (
                pending.first_seen,
                BulkCustomer {
                    customer_id,
                    outcome,
                },
            )
        })
        .collect();

    out.sort_by_key(|(first_seen, _)| *first_seen);
    Ok(out.into_iter().map(|(_, c)| c).collect())
}

/// Features for one customer scored in isolation
///
/// Used by the single-prediction path, where there is no surrounding dataset
/// to normalize against: the reference date is the customer's own latest
/// transaction and the monetary reference is their own lookback spend.
pub fn single_customer_features(
    transactions: &[(NaiveDate, f64)],
    lookback_days: i64,
) -> Result<FeatureVector> {
    if transactions.is_empty() {
        return Err(Error::InvalidInput(
            "At least one transaction is required".to_string(),
        ));
    }

    let mut sorted: Vec<Transaction> = transactions
        .iter()
        .map(|&(date, amount)| Transaction { date, amount })
        .collect();
    sorted.sort_by_key(|t| t.date);

    let as_of = sorted[sorted.len() - 1].date;
    let lookback_start = as_of - chrono::Duration::days(lookback_days);
    let mut monetary_reference: f64 = sorted
        .iter()
        .filter(|t| t.date >= lookback_start)
        .map(|t| t.amount)
        .sum();
    if monetary_reference == 0.0 {
        monetary_reference = 1.0;
    }

    Ok(customer_features(
        &sorted,
        as_of,
        lookback_start,
        monetary_reference,
    ))
}

fn missing_column() -> Error {
    Error::InvalidInput("File is missing a required column".to_string())
}

fn parse_label(raw: &str) -> Option<bool> {
    match raw {
        "0" => Some(false),
        "1" => Some(true),
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Compute the 8-feature vector for one customer's sorted transactions
fn customer_features(
    transactions: &[Transaction],
    as_of: NaiveDate,
    lookback_start: NaiveDate,
    monetary_reference: f64,
) -> FeatureVector {
    if transactions.is_empty() {
        return FeatureVector::zeroed();
    }

    let first_date = transactions[0].date;
    let last_date = transactions[transactions.len() - 1].date;

    let recency_days = (as_of - last_date).num_days() as f64;
    let recency_score =
        (100.0 * (1.0 - recency_days.min(MAX_RECENCY_DAYS) / MAX_RECENCY_DAYS)).max(0.0);

    let recent: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.date >= lookback_start)
        .collect();
    let frequency_score = (100.0 * (recent.len() as f64 / MAX_FREQUENCY)).min(100.0);

    let monetary_value: f64 = recent.iter().map(|t| t.amount).sum();
    let monetary_score = (100.0 * (monetary_value / monetary_reference)).min(100.0);

    let tenure_days = (last_date - first_date).num_days() as f64;

    let trend_start = as_of - chrono::Duration::days(TREND_WINDOW_DAYS);
    let recent_30: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.date >= trend_start)
        .collect();
    let activity_trend = activity_slope(&recent_30);

    let total: f64 = transactions.iter().map(|t| t.amount).sum();
    let avg_transaction_value = total / transactions.len() as f64;

    let days_between_transactions = mean_gap_days(transactions);

    let engagement_score = (((recent_30.len() as f64) * 10.0).min(100.0)
        + (tenure_days / 10.0).min(50.0)
        + (activity_trend * 10.0).max(0.0))
        / 2.5;
    let engagement_score = engagement_score.clamp(0.0, 100.0);

    FeatureVector {
        recency_score: round2(recency_score),
        frequency_score: round2(frequency_score),
        monetary_score: round2(monetary_score),
        engagement_score: round2(engagement_score),
        tenure_days,
        activity_trend: round2(activity_trend),
        avg_transaction_value: round2(avg_transaction_value),
        days_between_transactions: round2(days_between_transactions),
    }
}

/// Least-squares slope of per-day activity counts within the trend window
fn activity_slope(recent: &[&Transaction]) -> f64 {
    if recent.len() < 2 {
        return 0.0;
    }
    let mut daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for t in recent {
        *daily.entry(t.date).or_insert(0.0) += 1.0;
    }
    if daily.len() < 2 {
        return 0.0;
    }

    let n = daily.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (i, count) in daily.values().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += count;
        sum_xy += x * count;
        sum_xx += x * x;
    }
    let denom = n * sum_xx - sum_x * sum_x;
    if denom == 0.0 {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denom
}

/// Mean of positive gaps between consecutive transactions
fn mean_gap_days(sorted: &[Transaction]) -> f64 {
    let mut gaps = Vec::new();
    for pair in sorted.windows(2) {
        let gap = (pair[1].date - pair[0].date).num_days();
        if gap > 0 {
            gaps.push(gap as f64);
        }
    }
    if gaps.is_empty() {
        return 0.0;
    }
    gaps.iter().sum::<f64>() / gaps.len() as f64
}

/// Linearly interpolated percentile over unsorted values
fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Serialize feature rows to the canonical feature-set CSV
///
/// Columns: `customer_id`, the 8 feature columns, then `churn_label` when
/// any row carries a label. Values are formatted with 2 decimal places
/// except `tenure_days`, which is a whole number of days.
pub fn write_feature_csv(rows: &[FeatureRow]) -> String {
    let with_labels = rows.iter().any(|r| r.label.is_some());

    let mut headers: Vec<String> = vec!["customer_id".to_string()];
    headers.extend(FEATURE_COLUMNS.iter().map(|c| c.to_string()));
    if with_labels {
        headers.push("churn_label".to_string());
    }

    let out_rows: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            let f = &row.features;
            let mut fields = vec![
                row.customer_id.clone(),
                format!("{:.2}", f.recency_score),
                format!("{:.2}", f.frequency_score),
                format!("{:.2}", f.monetary_score),
                format!("{:.2}", f.engagement_score),
                format!("{}", f.tenure_days as i64),
                format!("{:.2}", f.activity_trend),
                format!("{:.2}", f.avg_transaction_value),
                format!("{:.2}", f.days_between_transactions),
            ];
            if with_labels {
                fields.push(match row.label {
                    Some(true) => "1".to_string(),
                    _ => "0".to_string(),
                });
            }
            fields
        })
        .collect();

    pulse_common::csv::write(&headers, &out_rows)
}

/// Parse a feature-set CSV back into feature rows
pub fn read_feature_csv(text: &str) -> Result<Vec<FeatureRow>> {
    let table = pulse_common::csv::parse(text)?;
    table.require_columns(&["customer_id"])?;
    table.require_columns(&FEATURE_COLUMNS)?;

    let id_col = table.column_index("customer_id").ok_or_else(missing_column)?;
    let label_col = table.column_index("churn_label");
    let feature_cols: Vec<usize> = FEATURE_COLUMNS
        .iter()
        .map(|c| table.column_index(c).ok_or_else(missing_column))
        .collect::<Result<_>>()?;

    let mut rows = Vec::with_capacity(table.rows.len());
    for (line, row) in table.rows.iter().enumerate() {
        let mut values = [0.0; 8];
        for (slot, col) in values.iter_mut().zip(&feature_cols) {
            let text = row.get(*col).map(|s| s.trim()).unwrap_or("");
            *slot = text.parse::<f64>().map_err(|_| {
                Error::InvalidInput(format!(
                    "Row {}: invalid feature value '{}'",
                    line + 2,
                    text
                ))
            })?;
        }

        let label = match label_col.and_then(|i| row.get(i)) {
            Some(raw) if !raw.trim().is_empty() => Some(parse_label(raw.trim()).ok_or_else(|| {
                Error::InvalidInput(format!("Row {}: invalid churn_label", line + 2))
            })?),
            _ => None,
        };

        rows.push(FeatureRow {
            customer_id: row
                .get(id_col)
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            features: FeatureVector::from_array(values),
            label,
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::csv;

    fn table(text: &str) -> CsvTable {
        csv::parse(text).unwrap()
    }

    #[test]
    fn test_requires_customer_and_date_columns() {
        let t = table("customer_id,amount\nC1,5.0\n");
        assert!(derive_features(&t, false, 90, 30).is_err());
    }

    #[test]
    fn test_recency_full_score_for_latest_customer() {
        // C1's last activity is the dataset max date, so recency is 100
        let t = table(
            "customer_id,event_date,amount\n\
             C1,2024-03-01,10.0\n\
             C1,2024-06-01,20.0\n\
             C2,2024-04-01,30.0\n",
        );
        let rows = derive_features(&t, false, 90, 30).unwrap();
        let c1 = rows.iter().find(|r| r.customer_id == "C1").unwrap();
        assert_eq!(c1.features.recency_score, 100.0);

        let c2 = rows.iter().find(|r| r.customer_id == "C2").unwrap();
        assert!(c2.features.recency_score < 100.0);
    }

    #[test]
    fn test_inactivity_labels_against_dataset_max_date() {
        // Max date 2024-06-01; threshold 30 days. C2 last active 2024-04-01
        // (61 days idle) is churned, C1 (0 days idle) is not.
        let t = table(
            "customer_id,event_date\n\
             C1,2024-06-01\n\
             C2,2024-04-01\n",
        );
        let rows = derive_features(&t, false, 90, 30).unwrap();
        assert_eq!(rows.iter().find(|r| r.customer_id == "C1").unwrap().label, Some(false));
        assert_eq!(rows.iter().find(|r| r.customer_id == "C2").unwrap().label, Some(true));
    }

    #[test]
    fn test_provided_labels_win_over_derivation() {
        let t = table(
            "customer_id,event_date,churn_label\n\
             C1,2024-06-01,1\n\
             C2,2024-04-01,0\n",
        );
        let rows = derive_features(&t, true, 90, 30).unwrap();
        assert_eq!(rows.iter().find(|r| r.customer_id == "C1").unwrap().label, Some(true));
        assert_eq!(rows.iter().find(|r| r.customer_id == "C2").unwrap().label, Some(false));
    }

    #[test]
    fn test_has_label_requires_label_column() {
        let t = table("customer_id,event_date\nC1,2024-06-01\n");
        assert!(derive_features(&t, true, 90, 30).is_err());
    }

    #[test]
    fn test_output_preserves_first_appearance_order() {
        let t = table(
            "customer_id,event_date\n\
             Zed,2024-06-01\n\
             Alice,2024-06-01\n\
             Zed,2024-05-01\n",
        );
        let rows = derive_features(&t, false, 90, 30).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.customer_id.as_str()).collect();
        assert_eq!(ids, vec!["Zed", "Alice"]);
    }

    #[test]
    fn test_reprocessing_is_byte_identical() {
        let text = "customer_id,event_date,amount\n\
                    C1,2024-01-10,100.0\n\
                    C1,2024-02-10,50.0\n\
                    C2,2024-02-01,75.5\n\
                    C3,2024-02-12,\n";
        let a = write_feature_csv(&derive_features(&table(text), false, 90, 30).unwrap());
        let b = write_feature_csv(&derive_features(&table(text), false, 90, 30).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_feature_csv_round_trip() {
        let t = table(
            "customer_id,event_date,amount\n\
             C1,2024-01-10,100.0\n\
             C1,2024-02-10,50.0\n\
             C2,2024-02-01,75.5\n",
        );
        let rows = derive_features(&t, false, 90, 30).unwrap();
        let text = write_feature_csv(&rows);
        let reread = read_feature_csv(&text).unwrap();
        assert_eq!(reread.len(), rows.len());
        assert_eq!(reread[0].customer_id, rows[0].customer_id);
        assert_eq!(reread[0].features.recency_score, rows[0].features.recency_score);
        assert_eq!(reread[0].label, rows[0].label);
    }

    #[test]
    fn test_tolerant_derivation_isolates_bad_customers() {
        let t = table(
            "customer_id,event_date,amount\n\
             C1,2024-06-01,10.0\n\
             C2,not-a-date,5.0\n\
             C3,2024-05-20,8.0\n",
        );
        let customers = derive_features_tolerant(&t, 90).unwrap();
        assert_eq!(customers.len(), 3);
        assert!(customers[0].outcome.is_ok());
        assert!(customers[1].outcome.is_err());
        assert!(customers[2].outcome.is_ok());
        assert_eq!(customers[1].customer_id, "C2");
    }

    #[test]
    fn test_tolerant_derivation_rejects_structural_problems() {
        let t = table("customer_id,amount\nC1,5.0\n");
        assert!(derive_features_tolerant(&t, 90).is_err());

        let t = table("customer_id,event_date\nC1,bad\nC2,also-bad\n");
        assert!(derive_features_tolerant(&t, 90).is_err());
    }

    #[test]
    fn test_single_customer_features_reference_own_history() {
        let transactions = vec![
            (NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 10.0),
            (NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), 20.0),
        ];
        let features = single_customer_features(&transactions, 90).unwrap();
        // Reference date is the customer's own last transaction
        assert_eq!(features.recency_score, 100.0);
        assert_eq!(features.tenure_days, 60.0);
        assert!(single_customer_features(&[], 90).is_err());
    }

    #[test]
    fn test_mean_gap_ignores_same_day_repeats() {
        let txs = vec![
            Transaction { date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), amount: 0.0 },
            Transaction { date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), amount: 0.0 },
            Transaction { date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(), amount: 0.0 },
        ];
        assert_eq!(mean_gap_days(&txs), 4.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&values, 0.5) - 2.5).abs() < 1e-9);
        assert_eq!(percentile(&values, 1.0), 4.0);
        assert_eq!(percentile(&[], 0.95), 0.0);
    }
}

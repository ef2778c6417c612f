//! Aggregation engine.
//!
//! Pure functions over an immutable [`Dataset`]: group-by counts with
//! percentages, descriptive statistics per group, close-date bucketing,
//! and fixed category ordering. Every call allocates its own output, so the
//! functions can run concurrently against a shared dataset.

use crate::analysis::request::{
    AggregationRequest, CategoryOrders, CountRequest, DescribeRequest, TimeRequest,
};
use crate::analysis::stats::summarize;
use crate::error::{EngineError, EngineResult, SchemaError};
use crate::models::{
    AggregationOutput, AggregationResult, Dataset, DateCell, DescribeResult, Diagnostic,
    Dimension, GroupKey, GroupRow, Measure, Outcome, Period, Record, StatRow, TimeBucket,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Counts records per group with percentages.
///
/// With an empty `normalize_within` percentages are relative to the whole
/// dataset, otherwise to the groups sharing the same values for those fields.
pub fn count_by(
    dataset: &Dataset,
    group_by: &[&str],
    normalize_within: &[&str],
) -> EngineResult<AggregationResult> {
    let request = CountRequest::new(group_by.iter().copied())
        .normalize_within(normalize_within.iter().copied());
    count_by_request(dataset, &request)
}

/// Executes a [`CountRequest`], including explicitly requested keys,
/// measure weights and category orders.
pub fn count_by_request(dataset: &Dataset, request: &CountRequest) -> EngineResult<AggregationResult> {
    let dimensions = resolve_dimensions(&request.group_by)?;
    let scope = scope_positions(&dimensions, &request.normalize_within)?;
    let weight = resolve_weight(request.weight.as_deref())?;

    for key in &request.include_keys {
        if key.len() != dimensions.len() {
            return Err(SchemaError::KeyArity {
                expected: dimensions.len(),
                found: key.len(),
            }
            .into());
        }
    }

    let mut tally = Tally::new(weight);
    for record in dataset.records() {
        tally.add(group_key(record, &dimensions), record);
    }
    for key in &request.include_keys {
        let key = key
            .iter()
            .zip(&dimensions)
            .map(|(label, dimension)| canonical_label(*dimension, label))
            .collect();
        tally.counts.entry(key).or_insert(0);
    }

    let mut diagnostics = Vec::new();
    if dataset.is_empty() {
        diagnostics.push(Diagnostic::EmptyResult);
    }

    let columns = dimensions.iter().map(|d| d.name().to_string()).collect();
    let result = build_counts(columns, &scope, tally, dataset.len(), diagnostics);
    apply_orders(result, &request.orders)
}

/// Computes [`crate::models::StatSummary`] values of a measure per group.
///
/// Records without a usable measure value are excluded. Groups without any
/// value are omitted.
pub fn describe_by(
    dataset: &Dataset,
    group_by: &[&str],
    measure: &str,
) -> EngineResult<DescribeResult> {
    describe_by_request(dataset, &DescribeRequest::new(group_by.iter().copied(), measure))
}

/// Executes a [`DescribeRequest`].
pub fn describe_by_request(
    dataset: &Dataset,
    request: &DescribeRequest,
) -> EngineResult<DescribeResult> {
    let dimensions = resolve_dimensions(&request.group_by)?;
    let measure = Measure::resolve(&request.measure)?;

    let mut values: BTreeMap<GroupKey, Vec<f64>> = BTreeMap::new();
    let mut missing = 0;
    for record in dataset.records() {
        match record.measure(measure) {
            Some(value) => values
                .entry(group_key(record, &dimensions))
                .or_default()
                .push(value),
            None => missing += 1,
        }
    }

    let columns = dimensions.iter().map(|d| d.name().to_string()).collect();
    let result = build_stats(columns, measure, values, missing, Vec::new());
    apply_stat_orders(result, &request.orders)
}

/// Counts records per close-date bucket and additional dimensions.
///
/// Percentages are normalized within each time bucket. Records without a
/// valid close date are excluded and reported as diagnostics.
pub fn bucket_by_time(
    dataset: &Dataset,
    period: &str,
    group_by: &[&str],
) -> EngineResult<AggregationResult> {
    bucket_by_time_request(dataset, &TimeRequest::new(period, group_by.iter().copied()))
}

/// Executes the counting form of a [`TimeRequest`]. Any measure on the
/// request is ignored; a weight makes percentages shares of the weight's
/// sum within each bucket.
pub fn bucket_by_time_request(
    dataset: &Dataset,
    request: &TimeRequest,
) -> EngineResult<AggregationResult> {
    let period: Period = request.period.parse()?;
    let dimensions = resolve_dimensions(&request.group_by)?;
    let weight = resolve_weight(request.weight.as_deref())?;

    let (bucketed, mut diagnostics) = bucket_records(dataset, period);

    let mut tally = Tally::new(weight);
    for (bucket, record) in &bucketed {
        tally.add(time_key(bucket, record, &dimensions), record);
    }
    if bucketed.is_empty() {
        diagnostics.push(Diagnostic::EmptyResult);
    }

    let columns = time_columns(period, &dimensions);
    let result = build_counts(columns, &[0], tally, bucketed.len(), diagnostics);
    apply_orders(result, &request.orders)
}

/// Statistics of a measure per close-date bucket and additional dimensions.
pub fn describe_by_time(
    dataset: &Dataset,
    period: &str,
    group_by: &[&str],
    measure: &str,
) -> EngineResult<DescribeResult> {
    let request = TimeRequest::new(period, group_by.iter().copied()).measure(measure);
    describe_by_time_request(dataset, &request, measure)
}

fn describe_by_time_request(
    dataset: &Dataset,
    request: &TimeRequest,
    measure: &str,
) -> EngineResult<DescribeResult> {
    let period: Period = request.period.parse()?;
    let dimensions = resolve_dimensions(&request.group_by)?;
    let measure = Measure::resolve(measure)?;

    let (bucketed, diagnostics) = bucket_records(dataset, period);

    let mut values: BTreeMap<GroupKey, Vec<f64>> = BTreeMap::new();
    let mut missing = 0;
    for (bucket, record) in &bucketed {
        match record.measure(measure) {
            Some(value) => values
                .entry(time_key(bucket, record, &dimensions))
                .or_default()
                .push(value),
            None => missing += 1,
        }
    }

    let columns = time_columns(period, &dimensions);
    let result = build_stats(columns, measure, values, missing, diagnostics);
    apply_stat_orders(result, &request.orders)
}

/// Reorders groups so that the listed categories of `dimension` come first,
/// in the given order, followed by the remaining categories in natural order.
///
/// Orders compose: the result remembers every order applied to it and sorts
/// by all of them, key column by key column. No group is added or removed.
pub fn apply_category_order<S: AsRef<str>>(
    mut result: AggregationResult,
    dimension: &str,
    order: &[S],
) -> EngineResult<AggregationResult> {
    let column = key_column(&result.dimensions, dimension)?;
    let order = canonical_order(&column, order);
    result.category_orders.insert(column, order);

    let ranks = CategoryRanks::new(&result.dimensions, &result.category_orders);
    result.groups.sort_by(|a, b| ranks.compare(&a.key, &b.key));
    Ok(result)
}

/// [`apply_category_order`] for statistics results.
pub fn apply_category_order_to_stats<S: AsRef<str>>(
    mut result: DescribeResult,
    dimension: &str,
    order: &[S],
) -> EngineResult<DescribeResult> {
    let column = key_column(&result.dimensions, dimension)?;
    let order = canonical_order(&column, order);
    result.category_orders.insert(column, order);

    let ranks = CategoryRanks::new(&result.dimensions, &result.category_orders);
    result.groups.sort_by(|a, b| ranks.compare(&a.key, &b.key));
    Ok(result)
}

/// Executes any aggregation request.
pub fn execute(dataset: &Dataset, request: &AggregationRequest) -> EngineResult<AggregationOutput> {
    let output = match request {
        AggregationRequest::Count(count) => {
            AggregationOutput::Counts(count_by_request(dataset, count)?)
        }
        AggregationRequest::Describe(describe) => {
            AggregationOutput::Stats(describe_by_request(dataset, describe)?)
        }
        AggregationRequest::Time(time) => match &time.measure {
            Some(measure) => {
                AggregationOutput::Stats(describe_by_time_request(dataset, time, measure)?)
            }
            None => AggregationOutput::Counts(bucket_by_time_request(dataset, time)?),
        },
    };
    Ok(output)
}

fn resolve_dimensions(names: &[String]) -> Result<Vec<Dimension>, SchemaError> {
    names.iter().map(|name| Dimension::resolve(name)).collect()
}

fn resolve_weight(name: Option<&str>) -> Result<Option<Measure>, SchemaError> {
    name.map(Measure::resolve).transpose()
}

/// Key label of a category. Outcome accepts stage labels such as
/// "Closed Won" as well as the "won"/"lost" keys.
fn canonical_label(dimension: Dimension, label: &str) -> String {
    match dimension {
        Dimension::Outcome => Outcome::from_stage(label)
            .map(|outcome| outcome.as_str().to_string())
            .unwrap_or_else(|| label.to_string()),
        _ => label.to_string(),
    }
}

fn canonical_order<S: AsRef<str>>(column: &str, order: &[S]) -> Vec<String> {
    // Time bucket columns are not dimensions and keep their labels as given.
    let dimension = Dimension::resolve(column).ok();
    order
        .iter()
        .map(|label| match dimension {
            Some(dimension) => canonical_label(dimension, label.as_ref()),
            None => label.as_ref().to_string(),
        })
        .collect()
}

/// Positions within `group_by` of the normalization fields.
fn scope_positions(group_by: &[Dimension], normalize_within: &[String]) -> Result<Vec<usize>, SchemaError> {
    normalize_within
        .iter()
        .map(|name| {
            let dimension = Dimension::resolve(name)?;
            group_by
                .iter()
                .position(|d| *d == dimension)
                .ok_or_else(|| SchemaError::NotInGroupBy { name: name.clone() })
        })
        .collect()
}

fn group_key(record: &Record, dimensions: &[Dimension]) -> GroupKey {
    dimensions
        .iter()
        .map(|d| record.dimension(*d).to_string())
        .collect()
}

fn time_key(bucket: &TimeBucket, record: &Record, dimensions: &[Dimension]) -> GroupKey {
    let mut key = Vec::with_capacity(dimensions.len() + 1);
    key.push(bucket.key());
    key.extend(group_key(record, dimensions));
    key
}

fn time_columns(period: Period, dimensions: &[Dimension]) -> Vec<String> {
    std::iter::once(period.column_name().to_string())
        .chain(dimensions.iter().map(|d| d.name().to_string()))
        .collect()
}

/// Pairs every record having a valid close date with its bucket, and reports
/// the records left out.
fn bucket_records(dataset: &Dataset, period: Period) -> (Vec<(TimeBucket, &Record)>, Vec<Diagnostic>) {
    let mut bucketed = Vec::with_capacity(dataset.len());
    let mut missing = 0;
    let mut malformed = 0;

    for record in dataset.records() {
        match &record.closed {
            DateCell::Valid(closed) => bucketed.push((TimeBucket::of(period, closed.date()), record)),
            DateCell::Missing => missing += 1,
            DateCell::Malformed(_) => malformed += 1,
        }
    }

    let mut diagnostics = Vec::new();
    if missing > 0 {
        diagnostics.push(Diagnostic::MissingTimestamp { excluded: missing });
    }
    if malformed > 0 {
        diagnostics.push(Diagnostic::MalformedTimestamp { excluded: malformed });
    }
    (bucketed, diagnostics)
}

/// Record counts per key and, for weighted requests, measure sums per key.
struct Tally {
    weight: Option<Measure>,
    counts: BTreeMap<GroupKey, usize>,
    weights: HashMap<GroupKey, f64>,
    unweighted: usize,
}

impl Tally {
    fn new(weight: Option<Measure>) -> Self {
        Self {
            weight,
            counts: BTreeMap::new(),
            weights: HashMap::new(),
            unweighted: 0,
        }
    }

    fn add(&mut self, key: GroupKey, record: &Record) {
        if let Some(measure) = self.weight {
            match record.measure(measure) {
                Some(value) => *self.weights.entry(key.clone()).or_default() += value,
                None => self.unweighted += 1,
            }
        }
        *self.counts.entry(key).or_default() += 1;
    }

    /// Amount a key contributes to percentage denominators.
    fn share(&self, key: &GroupKey, count: usize) -> f64 {
        match self.weight {
            Some(_) => self.weights.get(key).copied().unwrap_or(0.0),
            None => count as f64,
        }
    }
}

fn build_counts(
    dimensions: Vec<String>,
    scope: &[usize],
    tally: Tally,
    total: usize,
    mut diagnostics: Vec<Diagnostic>,
) -> AggregationResult {
    let scope_key = |key: &GroupKey| -> Vec<String> { scope.iter().map(|&i| key[i].clone()).collect() };

    let mut overall = 0.0;
    let mut denominators: HashMap<Vec<String>, f64> = HashMap::new();
    for (key, count) in &tally.counts {
        let share = tally.share(key, *count);
        overall += share;
        if !scope.is_empty() {
            *denominators.entry(scope_key(key)).or_default() += share;
        }
    }

    let groups = tally
        .counts
        .iter()
        .map(|(key, &count)| {
            let denominator = if scope.is_empty() {
                overall
            } else {
                denominators.get(&scope_key(key)).copied().unwrap_or(0.0)
            };
            GroupRow {
                key: key.clone(),
                count,
                percentage: percentage(tally.share(key, count), denominator),
            }
        })
        .collect();

    if tally.unweighted > 0 {
        diagnostics.push(Diagnostic::MissingMeasure {
            excluded: tally.unweighted,
        });
    }

    let normalize_within = scope.iter().map(|&i| dimensions[i].clone()).collect();

    AggregationResult {
        dimensions,
        normalize_within,
        weighted_by: tally.weight.map(|m| m.name().to_string()),
        groups,
        total,
        category_orders: CategoryOrders::new(),
        diagnostics,
    }
}

fn build_stats(
    dimensions: Vec<String>,
    measure: Measure,
    values: BTreeMap<GroupKey, Vec<f64>>,
    missing: usize,
    mut diagnostics: Vec<Diagnostic>,
) -> DescribeResult {
    let groups: Vec<StatRow> = values
        .into_iter()
        .filter_map(|(key, values)| summarize(&values).map(|stats| StatRow { key, stats }))
        .collect();

    if missing > 0 {
        diagnostics.push(Diagnostic::MissingMeasure { excluded: missing });
    }
    if groups.is_empty() {
        diagnostics.push(Diagnostic::EmptyResult);
    }

    DescribeResult {
        dimensions,
        measure: measure.name().to_string(),
        groups,
        category_orders: CategoryOrders::new(),
        diagnostics,
    }
}

/// Share of `part` in `whole` as a percentage; undefined for an empty whole.
fn percentage(part: f64, whole: f64) -> Option<f64> {
    if whole > 0.0 {
        Some(part / whole * 100.0)
    } else {
        None
    }
}

fn apply_orders(mut result: AggregationResult, orders: &CategoryOrders) -> EngineResult<AggregationResult> {
    for (dimension, order) in orders {
        result = apply_category_order(result, dimension, order.as_slice())?;
    }
    Ok(result)
}

fn apply_stat_orders(mut result: DescribeResult, orders: &CategoryOrders) -> EngineResult<DescribeResult> {
    for (dimension, order) in orders {
        result = apply_category_order_to_stats(result, dimension, order.as_slice())?;
    }
    Ok(result)
}

/// Canonical name of the key column matching `dimension`.
fn key_column(columns: &[String], dimension: &str) -> Result<String, EngineError> {
    if columns.iter().any(|c| c == dimension) {
        return Ok(dimension.to_string());
    }

    let not_in_result = || SchemaError::NotInResult {
        name: dimension.to_string(),
    };
    let canonical = Dimension::resolve(dimension).map_err(|_| not_in_result())?;
    columns
        .iter()
        .find(|c| c.as_str() == canonical.name())
        .cloned()
        .ok_or_else(|| not_in_result().into())
}

/// Per-column rank tables built from category orders.
struct CategoryRanks {
    columns: Vec<Option<HashMap<String, usize>>>,
}

impl CategoryRanks {
    fn new(dimensions: &[String], orders: &CategoryOrders) -> Self {
        let columns = dimensions
            .iter()
            .map(|dimension| {
                orders.get(dimension).map(|order| {
                    let mut ranks = HashMap::new();
                    for (i, category) in order.iter().enumerate() {
                        ranks.entry(category.clone()).or_insert(i);
                    }
                    ranks
                })
            })
            .collect();
        Self { columns }
    }

    fn compare(&self, a: &GroupKey, b: &GroupKey) -> Ordering {
        for (i, ranks) in self.columns.iter().enumerate() {
            let (left, right) = (&a[i], &b[i]);
            let ordering = match ranks {
                Some(ranks) => {
                    // Categories missing from the order sort after all listed ones
                    let unlisted = ranks.len();
                    let left_rank = ranks.get(left).copied().unwrap_or(unlisted);
                    let right_rank = ranks.get(right).copied().unwrap_or(unlisted);
                    left_rank.cmp(&right_rank).then_with(|| left.cmp(right))
                }
                None => left.cmp(right),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::collections::HashSet;

    fn date(y: i32, m: u32, d: u32) -> DateCell {
        let dt: NaiveDateTime = NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        DateCell::Valid(dt)
    }

    fn deal(country: &str, segment: &str, outcome: Outcome, value: Option<f64>, closed: DateCell) -> Record {
        Record {
            account_type: "Small".to_string(),
            country: country.to_string(),
            segment: segment.to_string(),
            business_type: "Existing Business".to_string(),
            lead_source: "Referral".to_string(),
            close_reason: "Price".to_string(),
            outcome,
            value,
            created: date(2024, 1, 1),
            closed,
        }
    }

    /// 6 won and 4 lost deals, all in country "A".
    fn ten_deals() -> Dataset {
        let mut records = Vec::new();
        for i in 0..10 {
            let outcome = if i < 6 { Outcome::Won } else { Outcome::Lost };
            records.push(deal("A", "Segment 1", outcome, Some(100.0 * (i + 1) as f64), date(2024, 6, 1 + i)));
        }
        Dataset::from_records(records)
    }

    fn mixed_deals() -> Dataset {
        Dataset::from_records(vec![
            deal("A", "Segment 1", Outcome::Won, Some(10.0), date(2024, 1, 15)),
            deal("A", "Segment 2", Outcome::Lost, Some(20.0), date(2024, 2, 3)),
            deal("B", "Segment 2", Outcome::Won, Some(30.0), date(2024, 4, 20)),
            deal("B", "Unknow", Outcome::Won, None, date(2024, 6, 30)),
            deal("C", "Segment 3", Outcome::Lost, Some(50.0), DateCell::Missing),
            deal("C", "Segment 1", Outcome::Lost, Some(60.0), date(2024, 12, 31)),
            deal("A", "Segment 4", Outcome::Won, Some(70.0), date(2024, 6, 1)),
        ])
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_count_by_outcome() {
        let result = count_by(&ten_deals(), &["outcome"], &[]).unwrap();

        assert_eq!(result.dimensions, vec!["outcome"]);
        assert_eq!(result.groups.len(), 2);
        let won = result.get(&["won"]).unwrap();
        assert_eq!(won.count, 6);
        assert!(close(won.percentage.unwrap(), 60.0));
        let lost = result.get(&["lost"]).unwrap();
        assert_eq!(lost.count, 4);
        assert!(close(lost.percentage.unwrap(), 40.0));
    }

    #[test]
    fn test_count_by_normalized_within_single_country() {
        let result = count_by(&ten_deals(), &["country", "outcome"], &["country"]).unwrap();

        assert_eq!(result.normalize_within, vec!["country"]);
        assert!(close(result.get(&["A", "won"]).unwrap().percentage.unwrap(), 60.0));
        assert!(close(result.get(&["A", "lost"]).unwrap().percentage.unwrap(), 40.0));
    }

    #[test]
    fn test_count_sum_equals_total() {
        let dataset = mixed_deals();
        for group_by in [vec!["country"], vec!["country", "outcome"], vec!["segment", "outcome", "country"]] {
            let result = count_by(&dataset, &group_by, &[]).unwrap();
            assert_eq!(result.count_sum(), dataset.len());
            assert_eq!(result.total, dataset.len());
        }
    }

    #[test]
    fn test_percentages_sum_to_100_per_scope() {
        let result = count_by(&mixed_deals(), &["country", "outcome"], &["country"]).unwrap();

        let mut sums: HashMap<String, f64> = HashMap::new();
        for row in &result.groups {
            *sums.entry(row.key[0].clone()).or_default() += row.percentage.unwrap();
        }
        assert_eq!(sums.len(), 3);
        for sum in sums.values() {
            assert!(close(*sum, 100.0));
        }
    }

    #[test]
    fn test_groups_sorted_lexicographically() {
        let result = count_by(&mixed_deals(), &["country", "outcome"], &[]).unwrap();
        let keys: Vec<_> = result.groups.iter().map(|g| g.key.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_explicit_missing_key_has_undefined_percentage() {
        let request = CountRequest::new(["country", "outcome"])
            .normalize_within(["country"])
            .include_key(["Z", "won"]);
        let result = count_by_request(&ten_deals(), &request).unwrap();

        let missing = result.get(&["Z", "won"]).unwrap();
        assert_eq!(missing.count, 0);
        assert_eq!(missing.percentage, None);
        assert_eq!(result.groups.len(), 3);

        // Not requested, so not emitted
        assert!(count_by(&ten_deals(), &["country"], &[]).unwrap().get(&["Z"]).is_none());
    }

    #[test]
    fn test_include_key_with_wrong_arity_is_rejected() {
        let request = CountRequest::new(["country", "outcome"]).include_key(["Z"]);
        let err = count_by_request(&ten_deals(), &request).unwrap_err();
        assert_eq!(
            err,
            EngineError::Schema(SchemaError::KeyArity { expected: 2, found: 1 })
        );
    }

    #[test]
    fn test_schema_errors() {
        let dataset = ten_deals();

        assert!(matches!(
            count_by(&dataset, &["colour"], &[]),
            Err(EngineError::Schema(SchemaError::UnknownField { .. }))
        ));
        assert!(matches!(
            count_by(&dataset, &["value"], &[]),
            Err(EngineError::Schema(SchemaError::NotADimension { .. }))
        ));
        assert!(matches!(
            count_by(&dataset, &["outcome"], &["country"]),
            Err(EngineError::Schema(SchemaError::NotInGroupBy { .. }))
        ));
        assert!(matches!(
            describe_by(&dataset, &["outcome"], "country"),
            Err(EngineError::Schema(SchemaError::NotNumeric { .. }))
        ));
        assert!(matches!(
            bucket_by_time(&dataset, "fortnight", &["outcome"]),
            Err(EngineError::InvalidPeriod { .. })
        ));
    }

    #[test]
    fn test_empty_dataset_is_not_an_error() {
        let empty = Dataset::from_records(Vec::new());

        let counts = count_by(&empty, &["outcome"], &[]).unwrap();
        assert!(counts.is_empty());
        assert!(counts.diagnostics.contains(&Diagnostic::EmptyResult));

        let stats = describe_by(&empty, &["outcome"], "value").unwrap();
        assert!(stats.is_empty());
        assert!(stats.diagnostics.contains(&Diagnostic::EmptyResult));
    }

    #[test]
    fn test_describe_by_outcome() {
        let result = describe_by(&ten_deals(), &["outcome"], "value").unwrap();

        let won = result.get(&["won"]).unwrap();
        assert_eq!(won.count, 6);
        assert!(close(won.mean, 350.0));
        assert!(close(won.min, 100.0));
        assert!(close(won.max, 600.0));
        assert!(close(won.p50, 350.0));

        let lost = result.get(&["lost"]).unwrap();
        assert_eq!(lost.count, 4);
        assert!(close(lost.p25, 775.0));
    }

    #[test]
    fn test_describe_excludes_missing_values_and_empty_groups() {
        let result = describe_by(&mixed_deals(), &["segment"], "value").unwrap();

        // The only "Unknow" deal has no value
        assert!(result.get(&["Unknow"]).is_none());
        assert!(result.groups.iter().all(|row| row.stats.count > 0));
        assert!(result
            .diagnostics
            .contains(&Diagnostic::MissingMeasure { excluded: 1 }));
    }

    #[test]
    fn test_describe_absent_key_has_no_entry() {
        let result = describe_by(&ten_deals(), &["country"], "value").unwrap();
        assert!(result.get(&["Z"]).is_none());
    }

    #[test]
    fn test_describe_is_idempotent() {
        let dataset = mixed_deals();
        let first = describe_by(&dataset, &["country", "outcome"], "value").unwrap();
        let second = describe_by(&dataset, &["country", "outcome"], "value").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_bucket_by_month_excludes_missing_close_date() {
        let dataset = mixed_deals();
        let result = bucket_by_time(&dataset, "month", &["outcome"]).unwrap();

        assert_eq!(result.dimensions, vec!["close_month", "outcome"]);
        assert_eq!(result.total, dataset.len() - 1);
        assert_eq!(result.count_sum(), dataset.len() - 1);
        assert!(result
            .diagnostics
            .contains(&Diagnostic::MissingTimestamp { excluded: 1 }));

        let june = result.get(&["2024-06-01", "won"]).unwrap();
        assert_eq!(june.count, 2);
        assert!(close(june.percentage.unwrap(), 100.0));
    }

    #[test]
    fn test_malformed_close_date_is_reported() {
        let mut records = vec![deal("A", "Segment 1", Outcome::Won, Some(1.0), date(2024, 3, 1))];
        records.push(deal(
            "A",
            "Segment 1",
            Outcome::Lost,
            Some(1.0),
            DateCell::Malformed("31/31/2024".to_string()),
        ));
        let result = bucket_by_time(&Dataset::from_records(records), "quarter", &[]).unwrap();

        assert_eq!(result.total, 1);
        assert!(result
            .diagnostics
            .contains(&Diagnostic::MalformedTimestamp { excluded: 1 }));
    }

    #[test]
    fn test_month_and_quarter_buckets_agree() {
        let dataset = mixed_deals();
        let months = bucket_by_time(&dataset, "month", &[]).unwrap();
        let quarters = bucket_by_time(&dataset, "quarter", &[]).unwrap();

        assert_eq!(months.get(&["2024-06-01"]).unwrap().count, 2);
        // April and June land in Q2
        assert_eq!(quarters.get(&["2024-04-01"]).unwrap().count, 3);
        assert_eq!(quarters.get(&["2024-10-01"]).unwrap().count, 1);

        for record in dataset.records() {
            if let Some(closed) = record.closed.valid() {
                let month = TimeBucket::of(Period::Month, closed.date());
                let quarter = TimeBucket::of(Period::Quarter, closed.date());
                assert_eq!(month.quarter(), quarter.quarter());
                assert!(quarters.get(&[quarter.key().as_str()]).is_some());
            }
        }
    }

    #[test]
    fn test_time_percentages_normalized_per_bucket() {
        let result = bucket_by_time(&mixed_deals(), "quarter", &["outcome"]).unwrap();
        assert_eq!(result.normalize_within, vec!["close_quarter"]);

        let q1_won = result.get(&["2024-01-01", "won"]).unwrap();
        let q1_lost = result.get(&["2024-01-01", "lost"]).unwrap();
        assert!(close(q1_won.percentage.unwrap(), 50.0));
        assert!(close(q1_lost.percentage.unwrap(), 50.0));
    }

    #[test]
    fn test_describe_by_time_sums_values() {
        let result = describe_by_time(&mixed_deals(), "quarter", &["outcome"], "value").unwrap();

        let q2_won = result.get(&["2024-04-01", "won"]).unwrap();
        // The June deal without a value is excluded from the statistics
        assert_eq!(q2_won.count, 2);
        assert!(close(q2_won.sum, 100.0));
        assert!(result
            .diagnostics
            .contains(&Diagnostic::MissingTimestamp { excluded: 1 }));
    }

    #[test]
    fn test_apply_category_order() {
        let result = count_by(&mixed_deals(), &["segment"], &[]).unwrap();
        let before: HashSet<GroupKey> = result.groups.iter().map(|g| g.key.clone()).collect();

        let ordered = apply_category_order(result, "segment", &["Segment 4", "Segment 1"]).unwrap();
        let keys: Vec<&str> = ordered.groups.iter().map(|g| g.key[0].as_str()).collect();
        assert_eq!(keys, vec!["Segment 4", "Segment 1", "Segment 2", "Segment 3", "Unknow"]);

        let after: HashSet<GroupKey> = ordered.groups.iter().map(|g| g.key.clone()).collect();
        assert_eq!(before, after);
        assert_eq!(ordered.groups.len(), before.len());
    }

    #[test]
    fn test_category_orders_compose() {
        let result = count_by(&mixed_deals(), &["outcome", "country"], &[]).unwrap();
        let result = apply_category_order(result, "country", &["C"]).unwrap();
        let result = apply_category_order(result, "stage", &["won", "lost"]).unwrap();

        let keys: Vec<(&str, &str)> = result
            .groups
            .iter()
            .map(|g| (g.key[0].as_str(), g.key[1].as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![("won", "A"), ("won", "B"), ("lost", "C"), ("lost", "A")]
        );
    }

    #[test]
    fn test_apply_order_to_unknown_column() {
        let result = count_by(&mixed_deals(), &["outcome"], &[]).unwrap();
        assert!(matches!(
            apply_category_order(result, "segment", &["Segment 1"]),
            Err(EngineError::Schema(SchemaError::NotInResult { .. }))
        ));
    }

    #[test]
    fn test_execute_applies_request_orders() {
        let request: AggregationRequest = DescribeRequest::new(["outcome"], "value")
            .order("outcome", ["won", "lost"])
            .into();

        match execute(&mixed_deals(), &request).unwrap() {
            AggregationOutput::Stats(stats) => {
                assert_eq!(stats.groups[0].key, vec!["won"]);
                assert_eq!(stats.groups[1].key, vec!["lost"]);
            }
            other => panic!("expected stats, got {:?}", other),
        }
    }

    #[test]
    fn test_outcome_order_accepts_stage_labels() {
        let result = count_by(&ten_deals(), &["outcome"], &[]).unwrap();
        let ordered = apply_category_order(result, "outcome", &["Closed Won", "Closed Lost"]).unwrap();

        assert_eq!(ordered.groups[0].key, vec!["won"]);
        assert_eq!(ordered.groups[1].key, vec!["lost"]);
        assert_eq!(
            ordered.category_orders.get("outcome"),
            Some(&vec!["won".to_string(), "lost".to_string()])
        );
    }

    #[test]
    fn test_stats_outcome_order_accepts_stage_labels() {
        let stats = describe_by(&mixed_deals(), &["outcome"], "value").unwrap();
        let ordered = apply_category_order_to_stats(stats, "outcome", &["closed_won", "closed_lost"]).unwrap();

        assert_eq!(ordered.groups[0].key, vec!["won"]);
        assert_eq!(ordered.groups[1].key, vec!["lost"]);
    }

    #[test]
    fn test_include_stage_label_key_does_not_duplicate_group() {
        let request = CountRequest::new(["outcome"]).include_key(["Closed Won"]);
        let result = count_by_request(&ten_deals(), &request).unwrap();

        assert_eq!(result.groups.len(), 2);
        assert_eq!(result.get(&["won"]).unwrap().count, 6);
        assert!(result.get(&["Closed Won"]).is_none());
    }

    #[test]
    fn test_weighted_time_shares_sum_to_100_per_bucket() {
        let request = TimeRequest::new("quarter", ["outcome"]).weighted_by("value");
        let result = bucket_by_time_request(&mixed_deals(), &request).unwrap();

        assert_eq!(result.weighted_by.as_deref(), Some("value"));
        assert_eq!(result.normalize_within, vec!["close_quarter"]);

        let mut per_bucket: HashMap<String, f64> = HashMap::new();
        for group in &result.groups {
            *per_bucket.entry(group.key[0].clone()).or_default() += group.percentage.unwrap();
        }
        assert_eq!(per_bucket.len(), 3);
        assert!(per_bucket.values().all(|total| close(*total, 100.0)));

        // Q1: won 10 vs lost 20 in value, one deal each.
        let won = result.get(&["2024-01-01", "won"]).unwrap();
        assert_eq!(won.count, 1);
        assert!(close(won.percentage.unwrap(), 100.0 / 3.0));
    }

    #[test]
    fn test_weighted_count_uses_value_sums() {
        let request = CountRequest::new(["outcome"]).weighted_by("value");
        let result = count_by_request(&mixed_deals(), &request).unwrap();

        // won 10 + 30 + 70, lost 20 + 50 + 60; the valueless won deal is still counted.
        let won = result.get(&["won"]).unwrap();
        assert_eq!(won.count, 4);
        assert!(close(won.percentage.unwrap(), 110.0 / 240.0 * 100.0));
        let lost = result.get(&["lost"]).unwrap();
        assert!(close(lost.percentage.unwrap(), 130.0 / 240.0 * 100.0));
        assert!(result
            .diagnostics
            .contains(&Diagnostic::MissingMeasure { excluded: 1 }));
    }

    #[test]
    fn test_weight_must_be_numeric() {
        let request = CountRequest::new(["outcome"]).weighted_by("country");
        assert!(matches!(
            count_by_request(&ten_deals(), &request),
            Err(EngineError::Schema(SchemaError::NotNumeric { .. }))
        ));
    }

    #[test]
    fn test_execute_time_request_with_measure_yields_stats() {
        let request: AggregationRequest = TimeRequest::new("month", ["outcome"]).measure("value").into();
        let output = execute(&mixed_deals(), &request).unwrap();
        assert!(matches!(output, AggregationOutput::Stats(_)));
    }
}

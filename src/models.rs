//! Data models for the dashboard.
//!
//! This module contains the core data structures used throughout
//! the application: deal records, the dataset handle, field names,
//! time buckets, and the aggregation results handed to renderers.

use crate::error::{EngineError, SchemaError};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Final status of a closed opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Closed Lost
    Lost,
    /// Closed Won
    Won,
}

impl Outcome {
    /// Label used as the group-key value for this outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Lost => "lost",
            Outcome::Won => "won",
        }
    }

    /// Parses a CRM stage label. Open stages return `None`.
    pub fn from_stage(stage: &str) -> Option<Self> {
        match stage.trim().to_lowercase().as_str() {
            "won" | "closed won" | "closed_won" => Some(Outcome::Won),
            "lost" | "closed lost" | "closed_lost" => Some(Outcome::Lost),
            _ => None,
        }
    }

    /// Returns an emoji representation of the outcome.
    pub fn emoji(&self) -> &'static str {
        match self {
            Outcome::Lost => "🔴",
            Outcome::Won => "🔵",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Lost => write!(f, "Closed Lost"),
            Outcome::Won => write!(f, "Closed Won"),
        }
    }
}

/// Categorical attribute of a record used for grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    AccountType,
    Country,
    Segment,
    BusinessType,
    LeadSource,
    CloseReason,
    Outcome,
}

impl Dimension {
    pub const ALL: [Dimension; 7] = [
        Dimension::AccountType,
        Dimension::Country,
        Dimension::Segment,
        Dimension::BusinessType,
        Dimension::LeadSource,
        Dimension::CloseReason,
        Dimension::Outcome,
    ];

    /// Canonical field name.
    pub fn name(&self) -> &'static str {
        match self {
            Dimension::AccountType => "account_type",
            Dimension::Country => "country",
            Dimension::Segment => "segment",
            Dimension::BusinessType => "business_type",
            Dimension::LeadSource => "lead_source",
            Dimension::CloseReason => "close_reason",
            Dimension::Outcome => "outcome",
        }
    }

    /// Resolves a name to a dimension, rejecting measures and unknown names.
    pub fn resolve(name: &str) -> Result<Self, SchemaError> {
        match Field::resolve(name)? {
            Field::Dimension(dimension) => Ok(dimension),
            _ => Err(SchemaError::NotADimension {
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Numeric attribute of a record used for statistical summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    /// Opportunity value in EUR.
    Value,
    /// Days between creation and close.
    DurationDays,
}

impl Measure {
    pub fn name(&self) -> &'static str {
        match self {
            Measure::Value => "value",
            Measure::DurationDays => "duration_days",
        }
    }

    /// Resolves a name to a measure. Dimension names are a type error.
    pub fn resolve(name: &str) -> Result<Self, SchemaError> {
        match Field::resolve(name)? {
            Field::Measure(measure) => Ok(measure),
            _ => Err(SchemaError::NotNumeric {
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Any named field of the deal schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Dimension(Dimension),
    Measure(Measure),
    CreatedDate,
    CloseDate,
}

impl Field {
    /// Resolves a field name. Matching ignores case, surrounding whitespace,
    /// and treats spaces and dashes like underscores.
    pub fn resolve(name: &str) -> Result<Self, SchemaError> {
        let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");

        let field = match normalized.as_str() {
            "account_type" | "account" => Field::Dimension(Dimension::AccountType),
            "country" => Field::Dimension(Dimension::Country),
            "segment" => Field::Dimension(Dimension::Segment),
            "business_type" | "type" | "type_of_business" => {
                Field::Dimension(Dimension::BusinessType)
            }
            "lead_source" => Field::Dimension(Dimension::LeadSource),
            "close_reason" | "closed_reason" => Field::Dimension(Dimension::CloseReason),
            "outcome" | "stage" => Field::Dimension(Dimension::Outcome),
            "value" | "opp_value" | "opp_value_(eur)" => Field::Measure(Measure::Value),
            "duration_days" | "duration" | "deal_opened_days" | "deal_opened_(days)" => {
                Field::Measure(Measure::DurationDays)
            }
            "created_date" | "created" => Field::CreatedDate,
            "close_date" | "closed" => Field::CloseDate,
            _ => {
                return Err(SchemaError::UnknownField {
                    name: name.to_string(),
                })
            }
        };

        Ok(field)
    }
}

/// Parsed state of a date column for one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum DateCell {
    Missing,
    Malformed(String),
    Valid(NaiveDateTime),
}

impl DateCell {
    pub fn valid(&self) -> Option<NaiveDateTime> {
        match self {
            DateCell::Valid(dt) => Some(*dt),
            _ => None,
        }
    }
}

/// One sales opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub account_type: String,
    pub country: String,
    pub segment: String,
    pub business_type: String,
    pub lead_source: String,
    pub close_reason: String,
    pub outcome: Outcome,
    /// Opportunity value; `None` when missing or not a non-negative number.
    pub value: Option<f64>,
    pub created: DateCell,
    pub closed: DateCell,
}

impl Record {
    /// Value of a categorical dimension.
    pub fn dimension(&self, dimension: Dimension) -> &str {
        match dimension {
            Dimension::AccountType => &self.account_type,
            Dimension::Country => &self.country,
            Dimension::Segment => &self.segment,
            Dimension::BusinessType => &self.business_type,
            Dimension::LeadSource => &self.lead_source,
            Dimension::CloseReason => &self.close_reason,
            Dimension::Outcome => self.outcome.as_str(),
        }
    }

    /// Value of a numeric measure, if present.
    pub fn measure(&self, measure: Measure) -> Option<f64> {
        match measure {
            Measure::Value => self.value.filter(|v| v.is_finite()),
            Measure::DurationDays => self.duration_days(),
        }
    }

    /// Days from creation to close, defined only when both dates are valid.
    pub fn duration_days(&self) -> Option<f64> {
        let created = self.created.valid()?;
        let closed = self.closed.valid()?;
        Some((closed - created).num_seconds() as f64 / 86_400.0)
    }
}

/// Calendar granularity for time bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Month,
    Quarter,
}

impl Period {
    /// Name of the bucket key column.
    pub fn column_name(&self) -> &'static str {
        match self {
            Period::Month => "close_month",
            Period::Quarter => "close_quarter",
        }
    }
}

impl FromStr for Period {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "month" | "monthly" | "m" => Ok(Period::Month),
            "quarter" | "quarterly" | "q" => Ok(Period::Quarter),
            _ => Err(EngineError::InvalidPeriod {
                token: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Month => write!(f, "month"),
            Period::Quarter => write!(f, "quarter"),
        }
    }
}

/// A calendar month or quarter, identified by its first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeBucket {
    pub period: Period,
    pub start: NaiveDate,
}

impl TimeBucket {
    /// Truncates a date to the start of its month or quarter.
    pub fn of(period: Period, date: NaiveDate) -> Self {
        let month = match period {
            Period::Month => date.month(),
            Period::Quarter => (date.month() - 1) / 3 * 3 + 1,
        };
        let start = NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date);
        Self { period, start }
    }

    /// Calendar quarter (1-4) containing this bucket.
    pub fn quarter(&self) -> u32 {
        (self.start.month() - 1) / 3 + 1
    }

    /// Group-key component; ISO dates sort chronologically.
    pub fn key(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.period {
            Period::Month => write!(f, "{}", self.start.format("%Y-%m")),
            Period::Quarter => write!(f, "{}-Q{}", self.start.year(), self.quarter()),
        }
    }
}

/// Ordered tuple of dimension values identifying one bucket.
pub type GroupKey = Vec<String>;

/// Non-fatal observation attached to a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// The requested slice contains no records.
    EmptyResult,
    /// Records without a close date were left out of a time view.
    MissingTimestamp { excluded: usize },
    /// Records with an unparseable close date were left out of a time view.
    MalformedTimestamp { excluded: usize },
    /// Records without a usable measure value were left out of the statistics.
    MissingMeasure { excluded: usize },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::EmptyResult => write!(f, "no records in this slice"),
            Diagnostic::MissingTimestamp { excluded } => {
                write!(f, "{} record(s) without a close date excluded", excluded)
            }
            Diagnostic::MalformedTimestamp { excluded } => {
                write!(f, "{} record(s) with an unparseable close date excluded", excluded)
            }
            Diagnostic::MissingMeasure { excluded } => {
                write!(f, "{} record(s) without a numeric value excluded", excluded)
            }
        }
    }
}

/// One bucket of a count aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRow {
    pub key: GroupKey,
    pub count: usize,
    /// Share of the normalization scope; `None` when the scope is empty.
    pub percentage: Option<f64>,
}

/// Counts and percentages per group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    /// Names of the key columns, in key order.
    pub dimensions: Vec<String>,
    /// Key columns within which percentages sum to 100. Empty means global.
    pub normalize_within: Vec<String>,
    /// Measure whose sums the percentages are shares of; record counts when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weighted_by: Option<String>,
    pub groups: Vec<GroupRow>,
    /// Number of records that entered the aggregation.
    pub total: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub category_orders: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl AggregationResult {
    /// Looks up a group by its key values.
    pub fn get(&self, key: &[&str]) -> Option<&GroupRow> {
        self.groups
            .iter()
            .find(|row| row.key.iter().map(String::as_str).eq(key.iter().copied()))
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Sum of all group counts.
    pub fn count_sum(&self) -> usize {
        self.groups.iter().map(|row| row.count).sum()
    }
}

/// Descriptive statistics over a measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatSummary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; undefined for a single value.
    pub std_dev: Option<f64>,
    pub min: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub max: f64,
    pub sum: f64,
}

/// One bucket of a describe aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRow {
    pub key: GroupKey,
    pub stats: StatSummary,
}

/// Statistics per group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeResult {
    pub dimensions: Vec<String>,
    pub measure: String,
    pub groups: Vec<StatRow>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub category_orders: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl DescribeResult {
    /// Looks up the statistics of a group by its key values.
    pub fn get(&self, key: &[&str]) -> Option<&StatSummary> {
        self.groups
            .iter()
            .find(|row| row.key.iter().map(String::as_str).eq(key.iter().copied()))
            .map(|row| &row.stats)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Output of any aggregation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregationOutput {
    Counts(AggregationResult),
    Stats(DescribeResult),
}

impl AggregationOutput {
    pub fn is_empty(&self) -> bool {
        match self {
            AggregationOutput::Counts(result) => result.is_empty(),
            AggregationOutput::Stats(result) => result.is_empty(),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            AggregationOutput::Counts(result) => &result.diagnostics,
            AggregationOutput::Stats(result) => &result.diagnostics,
        }
    }
}

/// Content fingerprint of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetId(String);

impl DatasetId {
    /// Fingerprints raw source bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Fingerprints records built in memory.
    pub fn from_records(records: &[Record]) -> Self {
        let mut hasher = Sha256::new();
        for record in records {
            for dimension in Dimension::ALL {
                hasher.update(record.dimension(dimension).as_bytes());
                hasher.update(b"\x1f");
            }
            match record.value {
                Some(value) => hasher.update(value.to_le_bytes()),
                None => hasher.update(b"-"),
            }
            for cell in [&record.created, &record.closed] {
                hasher.update(b"\x1f");
                match cell {
                    DateCell::Missing => hasher.update(b"missing"),
                    DateCell::Malformed(raw) => hasher.update(raw.as_bytes()),
                    DateCell::Valid(dt) => hasher.update(dt.to_string().as_bytes()),
                }
            }
            hasher.update(b"\x1e");
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs and report headers.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable, versioned collection of records.
#[derive(Debug, Clone)]
pub struct Dataset {
    id: DatasetId,
    records: Vec<Record>,
    source: Option<PathBuf>,
    loaded_at: DateTime<Utc>,
}

impl Dataset {
    /// Builds a dataset from in-memory records.
    pub fn from_records(records: Vec<Record>) -> Self {
        let id = DatasetId::from_records(&records);
        Self::with_id(id, records, None)
    }

    /// Builds a dataset with an externally computed identity.
    pub fn with_id(id: DatasetId, records: Vec<Record>, source: Option<PathBuf>) -> Self {
        Self {
            id,
            records,
            source,
            loaded_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &DatasetId {
        &self.id
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn source(&self) -> Option<&PathBuf> {
        self.source.as_ref()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

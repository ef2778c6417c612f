//! Declarative aggregation requests.
//!
//! Each dashboard chart is described by one request value instead of
//! bespoke group-by code. Requests are hashable so they double as cache keys.

use crate::models::Dimension;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category orders keyed by dimension name.
pub type CategoryOrders = BTreeMap<String, Vec<String>>;

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Counts and percentages per group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CountRequest {
    pub group_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub normalize_within: Vec<String>,
    /// Keys reported even when no record falls into them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_keys: Vec<Vec<String>>,
    /// Measure whose sums replace record counts as percentage weights.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub orders: CategoryOrders,
}

impl CountRequest {
    pub fn new<I, S>(group_by: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            group_by: strings(group_by),
            ..Self::default()
        }
    }

    pub fn normalize_within<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.normalize_within = strings(fields);
        self
    }

    pub fn include_key<I, S>(mut self, key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_keys.push(strings(key));
        self
    }

    pub fn weighted_by(mut self, measure: &str) -> Self {
        self.weight = Some(measure.to_string());
        self
    }

    pub fn order<I, S>(mut self, dimension: &str, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.orders.insert(dimension.to_string(), strings(order));
        self
    }
}

/// Statistics of a measure per group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DescribeRequest {
    pub group_by: Vec<String>,
    pub measure: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub orders: CategoryOrders,
}

impl DescribeRequest {
    pub fn new<I, S>(group_by: I, measure: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            group_by: strings(group_by),
            measure: measure.to_string(),
            orders: CategoryOrders::new(),
        }
    }

    pub fn order<I, S>(mut self, dimension: &str, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.orders.insert(dimension.to_string(), strings(order));
        self
    }
}

/// Counts per close-date bucket, optionally split by further dimensions.
///
/// When `measure` is set the request yields statistics instead of counts.
/// Otherwise `weight` switches the per-bucket percentages from record
/// counts to measure sums.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRequest {
    /// Period token, validated at execution time.
    pub period: String,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub orders: CategoryOrders,
}

impl TimeRequest {
    pub fn new<I, S>(period: &str, group_by: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            period: period.to_string(),
            group_by: strings(group_by),
            measure: None,
            weight: None,
            orders: CategoryOrders::new(),
        }
    }

    pub fn measure(mut self, measure: &str) -> Self {
        self.measure = Some(measure.to_string());
        self
    }

    pub fn weighted_by(mut self, measure: &str) -> Self {
        self.weight = Some(measure.to_string());
        self
    }

    pub fn order<I, S>(mut self, dimension: &str, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.orders.insert(dimension.to_string(), strings(order));
        self
    }
}

/// Any aggregation the engine can execute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationRequest {
    Count(CountRequest),
    Describe(DescribeRequest),
    Time(TimeRequest),
}

impl AggregationRequest {
    /// Adds category orders for grouped dimensions, keeping any order
    /// already set on the request.
    pub fn with_default_orders(mut self, defaults: &CategoryOrders) -> Self {
        let grouped: Vec<Dimension> = self
            .group_by()
            .iter()
            .filter_map(|name| Dimension::resolve(name).ok())
            .collect();

        let orders = match &mut self {
            AggregationRequest::Count(request) => &mut request.orders,
            AggregationRequest::Describe(request) => &mut request.orders,
            AggregationRequest::Time(request) => &mut request.orders,
        };
        let already: Vec<Dimension> = orders
            .keys()
            .filter_map(|name| Dimension::resolve(name).ok())
            .collect();

        for (name, order) in defaults {
            let Ok(dimension) = Dimension::resolve(name) else {
                continue;
            };
            if grouped.contains(&dimension) && !already.contains(&dimension) {
                orders.insert(dimension.name().to_string(), order.clone());
            }
        }
        self
    }

    /// Dimension names used as key columns (excluding the time bucket).
    pub fn group_by(&self) -> &[String] {
        match self {
            AggregationRequest::Count(request) => &request.group_by,
            AggregationRequest::Describe(request) => &request.group_by,
            AggregationRequest::Time(request) => &request.group_by,
        }
    }
}

impl From<CountRequest> for AggregationRequest {
    fn from(request: CountRequest) -> Self {
        AggregationRequest::Count(request)
    }
}

impl From<DescribeRequest> for AggregationRequest {
    fn from(request: DescribeRequest) -> Self {
        AggregationRequest::Describe(request)
    }
}

impl From<TimeRequest> for AggregationRequest {
    fn from(request: TimeRequest) -> Self {
        AggregationRequest::Time(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_count_builder() {
        let request = CountRequest::new(["country", "outcome"])
            .normalize_within(["country"])
            .order("outcome", ["lost", "won"]);

        assert_eq!(request.group_by, vec!["country", "outcome"]);
        assert_eq!(request.normalize_within, vec!["country"]);
        assert_eq!(request.orders["outcome"], vec!["lost", "won"]);
    }

    #[test]
    fn test_requests_are_usable_as_keys() {
        let a: AggregationRequest = CountRequest::new(["outcome"]).into();
        let b: AggregationRequest = CountRequest::new(["outcome"]).into();
        let c: AggregationRequest = DescribeRequest::new(["outcome"], "value").into();
        let d: AggregationRequest = CountRequest::new(["outcome"]).weighted_by("value").into();

        let set: HashSet<_> = [a, b, c, d].into_iter().collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_default_orders_do_not_override() {
        let mut defaults = CategoryOrders::new();
        defaults.insert("outcome".to_string(), vec!["lost".into(), "won".into()]);
        defaults.insert("segment".to_string(), vec!["Segment 1".into()]);

        let request: AggregationRequest = CountRequest::new(["stage", "segment"])
            .order("stage", ["won", "lost"])
            .into();
        let request = request.with_default_orders(&defaults);

        match request {
            AggregationRequest::Count(count) => {
                assert_eq!(count.orders.len(), 2);
                assert_eq!(count.orders["stage"], vec!["won", "lost"]);
                assert_eq!(count.orders["segment"], vec!["Segment 1"]);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_default_orders_skip_ungrouped_dimensions() {
        let mut defaults = CategoryOrders::new();
        defaults.insert("segment".to_string(), vec!["Segment 1".into()]);

        let request = AggregationRequest::from(CountRequest::new(["outcome"]))
            .with_default_orders(&defaults);

        match request {
            AggregationRequest::Count(count) => assert!(count.orders.is_empty()),
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_time_request_serializes_with_kind() {
        let request: AggregationRequest = TimeRequest::new("month", ["outcome"]).into();
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"kind\":\"time\""));
        assert!(json.contains("\"period\":\"month\""));
    }
}

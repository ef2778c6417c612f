//! Chart catalogue.
//!
//! Every chart of the dashboard as a declarative request. Chart ids follow
//! the figure names used by the sales team's notebooks.

use super::Page;
use crate::analysis::{AggregationRequest, CountRequest, DescribeRequest, TimeRequest};

/// A chart and the aggregation behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartSpec {
    pub id: &'static str,
    pub title: &'static str,
    pub page: Page,
    pub request: AggregationRequest,
}

impl ChartSpec {
    fn new(id: &'static str, title: &'static str, page: Page, request: impl Into<AggregationRequest>) -> Self {
        Self {
            id,
            title,
            page,
            request: request.into(),
        }
    }
}

/// Charts of one page, in display order.
pub fn charts(page: Page) -> Vec<ChartSpec> {
    match page {
        Page::Overview => overview(),
        Page::Profile => profile(),
        Page::Ticket => ticket(),
        Page::Time => time_to_close(),
    }
}

/// Every chart of every page.
pub fn catalog() -> Vec<ChartSpec> {
    Page::ALL.iter().flat_map(|page| charts(*page)).collect()
}

fn overview() -> Vec<ChartSpec> {
    vec![ChartSpec::new(
        "fig_dist_won_lost",
        "Won vs Lost distribution",
        Page::Overview,
        CountRequest::new(["outcome"]),
    )]
}

fn profile() -> Vec<ChartSpec> {
    let page = Page::Profile;

    // Counted, then shared within outcome.
    let within_outcome = [
        (
            "wl_type_business_count",
            "Won vs Lost by type of business",
            "wl_type_business_pct",
            "Won vs Lost by type of business (% within outcome)",
            "business_type",
        ),
        (
            "wl_lead_source",
            "Won vs Lost by lead source",
            "wl_lead_source_pct",
            "Won vs Lost by lead source (% within outcome)",
            "lead_source",
        ),
        (
            "wl_close_reason_count",
            "Won vs Lost by close reason",
            "wl_close_reason_pct",
            "Won vs Lost by close reason (% within outcome)",
            "close_reason",
        ),
    ];

    let mut specs = vec![
        ChartSpec::new(
            "wl_acc_type_count",
            "Won vs Lost by account type",
            page,
            CountRequest::new(["account_type", "outcome"]),
        ),
        ChartSpec::new(
            "wl_acc_type_pct",
            "Won vs Lost by account type (% within account type)",
            page,
            CountRequest::new(["account_type", "outcome"]).normalize_within(["account_type"]),
        ),
        ChartSpec::new(
            "wl_country",
            "Won vs Lost by country",
            page,
            CountRequest::new(["country", "outcome"]),
        ),
        ChartSpec::new(
            "wl_country_pct",
            "Won vs Lost by country (% within country)",
            page,
            CountRequest::new(["country", "outcome"]).normalize_within(["country"]),
        ),
        ChartSpec::new(
            "wl_segment",
            "Won vs Lost by segment",
            page,
            CountRequest::new(["outcome", "segment"]),
        ),
        ChartSpec::new(
            "wl_segment_pct",
            "Won vs Lost by segment (% of segment within outcome)",
            page,
            CountRequest::new(["outcome", "segment"]).normalize_within(["outcome"]),
        ),
    ];

    for (count_id, count_title, pct_id, pct_title, dimension) in within_outcome {
        specs.push(ChartSpec::new(
            count_id,
            count_title,
            page,
            CountRequest::new(["outcome", dimension]),
        ));
        specs.push(ChartSpec::new(
            pct_id,
            pct_title,
            page,
            CountRequest::new(["outcome", dimension]).normalize_within(["outcome"]),
        ));
    }

    specs.extend([
        ChartSpec::new(
            "wl_month",
            "Won vs Lost per close month",
            page,
            TimeRequest::new("month", ["outcome"]),
        ),
        ChartSpec::new(
            "wl_quarter",
            "Won vs Lost per close quarter",
            page,
            TimeRequest::new("quarter", ["outcome"]),
        ),
        ChartSpec::new(
            "month_value",
            "Deal value per close month",
            page,
            TimeRequest::new("month", ["outcome"]).measure("value"),
        ),
        ChartSpec::new(
            "quarter_value",
            "Deal value per close quarter",
            page,
            TimeRequest::new("quarter", ["outcome"]).measure("value"),
        ),
        ChartSpec::new(
            "month_value_pct",
            "Deal value share per close month (% of value within month)",
            page,
            TimeRequest::new("month", ["outcome"]).weighted_by("value"),
        ),
        ChartSpec::new(
            "quarter_value_pct",
            "Deal value share per close quarter (% of value within quarter)",
            page,
            TimeRequest::new("quarter", ["outcome"]).weighted_by("value"),
        ),
        ChartSpec::new(
            "wl_acc_type_split_pct",
            "Account type mix of won and lost deals (% within outcome)",
            page,
            CountRequest::new(["outcome", "account_type"]).normalize_within(["outcome"]),
        ),
    ]);

    specs
}

fn ticket() -> Vec<ChartSpec> {
    let page = Page::Ticket;
    vec![
        ChartSpec::new(
            "wl_avg_ticket",
            "Average ticket by outcome",
            page,
            DescribeRequest::new(["outcome"], "value"),
        ),
        ChartSpec::new(
            "wl_avg_ticket_account_type",
            "Average ticket by account type",
            page,
            DescribeRequest::new(["account_type", "outcome"], "value"),
        ),
        ChartSpec::new(
            "wl_avg_ticket_country",
            "Average ticket by country",
            page,
            DescribeRequest::new(["country", "outcome"], "value"),
        ),
        ChartSpec::new(
            "wl_avg_ticket_segment",
            "Average ticket by segment",
            page,
            DescribeRequest::new(["segment", "outcome"], "value"),
        ),
    ]
}

fn time_to_close() -> Vec<ChartSpec> {
    let page = Page::Time;
    vec![
        ChartSpec::new(
            "wl_avg_time",
            "Days to close by outcome",
            page,
            DescribeRequest::new(["outcome"], "duration_days"),
        ),
        ChartSpec::new(
            "wl_avg_time_account_type",
            "Days to close by account type",
            page,
            DescribeRequest::new(["outcome", "account_type"], "duration_days"),
        ),
        ChartSpec::new(
            "wl_avg_time_type_business",
            "Days to close by type of business",
            page,
            DescribeRequest::new(["outcome", "business_type"], "duration_days"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::execute;
    use crate::dashboard::tests::sample_dataset;
    use crate::models::AggregationOutput;
    use std::collections::{HashMap, HashSet};

    #[test]
    fn test_chart_ids_are_unique() {
        let all = catalog();
        let ids: HashSet<_> = all.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), all.len());
    }

    #[test]
    fn test_charts_belong_to_their_page() {
        for page in Page::ALL {
            let specs = charts(page);
            assert!(!specs.is_empty());
            assert!(specs.iter().all(|c| c.page == page));
        }
    }

    #[test]
    fn test_value_share_charts_sum_to_100_per_period() {
        let dataset = sample_dataset();
        for id in ["month_value_pct", "quarter_value_pct"] {
            let chart = catalog().into_iter().find(|c| c.id == id).unwrap();
            let result = match execute(&dataset, &chart.request).unwrap() {
                AggregationOutput::Counts(result) => result,
                other => panic!("{} should yield counts, got {:?}", id, other),
            };
            assert_eq!(result.weighted_by.as_deref(), Some("value"));

            let mut per_period: HashMap<&str, f64> = HashMap::new();
            for group in &result.groups {
                *per_period.entry(group.key[0].as_str()).or_default() += group.percentage.unwrap();
            }
            assert!(!per_period.is_empty());
            for (period, total) in per_period {
                assert!((total - 100.0).abs() < 1e-9, "{} {} sums to {}", id, period, total);
            }
        }
    }

    #[test]
    fn test_every_chart_executes() {
        let dataset = sample_dataset();
        for chart in catalog() {
            let output = execute(&dataset, &chart.request);
            assert!(output.is_ok(), "chart {} failed: {:?}", chart.id, output.err());
        }
    }
}

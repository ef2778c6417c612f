//! Report rendering.
//!
//! This module turns a computed [`Dashboard`] into a Markdown report or a
//! JSON document.

use super::{ChartView, Dashboard, DashboardMetadata, PageView};
use crate::cli::OutputFormat;
use crate::config::ReportConfig;
use crate::dataset::LoadSummary;
use crate::models::{
    AggregationOutput, AggregationResult, DescribeResult, Diagnostic, Outcome, Period, StatSummary,
    TimeBucket,
};
use anyhow::Result;
use chrono::NaiveDate;

/// Placeholder written for slices without records.
const NO_DATA: &str = "_No data for this selection._";

/// Render the dashboard in the requested format.
pub fn render(dashboard: &Dashboard, format: OutputFormat, config: &ReportConfig) -> Result<String> {
    match format {
        OutputFormat::Markdown => Ok(generate_markdown_report(dashboard, config)),
        OutputFormat::Json => generate_json_report(dashboard),
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(dashboard: &Dashboard, config: &ReportConfig) -> String {
    let mut output = String::new();

    output.push_str("# Sales Opportunity Dashboard\n\n");
    output.push_str(&generate_metadata_section(&dashboard.metadata));
    output.push_str(&generate_table_of_contents(dashboard));

    for page in &dashboard.pages {
        output.push_str(&generate_page_section(page, config));
    }

    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &DashboardMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Dataset:** `{}`\n", metadata.source));
    section.push_str(&format!(
        "- **Fingerprint:** `{}`\n",
        metadata.dataset_id.short()
    ));
    section.push_str(&format!("- **Closed Deals:** {}\n", metadata.records));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Computation Time:** {:.2}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    if let Some(ref summary) = metadata.load_summary {
        section.push_str(&generate_load_summary(summary));
    }

    section
}

fn generate_load_summary(summary: &LoadSummary) -> String {
    let mut section = String::new();

    section.push_str("### Data Quality\n\n");
    section.push_str("| Rows Read | Loaded | Open Stage | Unreadable | Bad Dates | Missing Values | Missing Labels |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | {} | {} |\n\n",
        summary.rows_read,
        summary.rows_loaded,
        summary.skipped_unknown_stage,
        summary.unreadable_rows,
        summary.malformed_dates,
        summary.missing_values,
        summary.missing_labels,
    ));

    if !summary.absent_columns.is_empty() {
        section.push_str(&format!(
            "> ⚠️ Columns not found in the file: {}\n\n",
            summary.absent_columns.join(", ")
        ));
    }

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(dashboard: &Dashboard) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");

    for page in &dashboard.pages {
        toc.push_str(&format!("- [{}](#{})\n", page.title, anchor(&page.title)));
        for chart in &page.charts {
            toc.push_str(&format!("  - [{}](#{})\n", chart.title, chart.id));
        }
    }

    toc.push('\n');

    toc
}

/// GitHub-style heading anchor.
fn anchor(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('-'),
            c if c.is_alphanumeric() || c == '-' || c == '_' => Some(c),
            _ => None,
        })
        .collect()
}

fn generate_page_section(page: &PageView, config: &ReportConfig) -> String {
    let mut section = String::new();

    section.push_str(&format!("## {}\n\n", page.title));

    if page.charts.is_empty() {
        section.push_str(NO_DATA);
        section.push_str("\n\n");
        return section;
    }

    for chart in &page.charts {
        section.push_str(&generate_chart_section(chart, config));
    }

    section
}

fn generate_chart_section(chart: &ChartView, config: &ReportConfig) -> String {
    let mut section = String::new();

    section.push_str(&format!("<a id=\"{}\"></a>\n\n", chart.id));
    section.push_str(&format!("### {}\n\n", chart.title));

    if chart.output.is_empty() {
        section.push_str(NO_DATA);
        section.push_str("\n\n");
    } else {
        match &chart.output {
            AggregationOutput::Counts(result) => {
                section.push_str(&generate_count_table(result, config.decimals))
            }
            AggregationOutput::Stats(result) => {
                section.push_str(&generate_stats_table(result, config.decimals))
            }
        }
    }

    if config.show_diagnostics {
        section.push_str(&generate_diagnostics(chart.output.diagnostics()));
    }

    section
}

fn generate_count_table(result: &AggregationResult, decimals: usize) -> String {
    let mut table = String::new();

    let scope: Vec<String> = result.normalize_within.iter().map(|d| column_title(d)).collect();
    let share = match (&result.weighted_by, scope.is_empty()) {
        (None, true) => "% of total".to_string(),
        (None, false) => format!("% within {}", scope.join(" × ")),
        (Some(measure), true) => format!("% of {}", column_title(measure)),
        (Some(measure), false) => format!("% of {} within {}", column_title(measure), scope.join(" × ")),
    };

    let headers: Vec<String> = result.dimensions.iter().map(|d| column_title(d)).collect();
    table.push_str(&format!("| {} | Count | {} |\n", headers.join(" | "), share));
    table.push_str(&format!(
        "|{}:---:|:---:|\n",
        ":---|".repeat(result.dimensions.len())
    ));

    for row in &result.groups {
        table.push_str(&format!(
            "| {} | {} | {} |\n",
            key_cells(&result.dimensions, &row.key).join(" | "),
            row.count,
            format_percentage(row.percentage, decimals)
        ));
    }

    table.push_str(&format!(
        "| **Total** |{} **{}** | |\n\n",
        " |".repeat(result.dimensions.len().saturating_sub(1)),
        result.total
    ));

    table
}

fn generate_stats_table(result: &DescribeResult, decimals: usize) -> String {
    let mut table = String::new();

    let headers: Vec<String> = result.dimensions.iter().map(|d| column_title(d)).collect();
    table.push_str(&format!("*Measure: {}*\n\n", column_title(&result.measure)));
    table.push_str(&format!(
        "| {} | Count | Mean | Std | Min | 25% | 50% | 75% | Max | Sum |\n",
        headers.join(" | ")
    ));
    table.push_str(&format!(
        "|{}{}\n",
        ":---|".repeat(result.dimensions.len()),
        "---:|".repeat(9)
    ));

    for row in &result.groups {
        table.push_str(&format!(
            "| {} | {} |\n",
            key_cells(&result.dimensions, &row.key).join(" | "),
            stat_cells(&row.stats, decimals).join(" | ")
        ));
    }
    table.push('\n');

    table
}

fn stat_cells(stats: &StatSummary, decimals: usize) -> Vec<String> {
    let number = |v: f64| format!("{:.*}", decimals, v);
    vec![
        stats.count.to_string(),
        number(stats.mean),
        stats.std_dev.map(|v| number(v)).unwrap_or_else(|| "n/a".to_string()),
        number(stats.min),
        number(stats.p25),
        number(stats.p50),
        number(stats.p75),
        number(stats.max),
        number(stats.sum),
    ]
}

fn generate_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let mut notes = String::new();

    for diagnostic in diagnostics {
        // Already shown as the placeholder.
        if *diagnostic == Diagnostic::EmptyResult {
            continue;
        }
        notes.push_str(&format!("> ⚠️ {}\n", diagnostic));
    }
    if !notes.is_empty() {
        notes.push('\n');
    }

    notes
}

fn format_percentage(percentage: Option<f64>, decimals: usize) -> String {
    match percentage {
        Some(p) => format!("{:.*}%", decimals, p),
        None => "n/a".to_string(),
    }
}

/// Human readable column header.
fn column_title(name: &str) -> String {
    match name {
        "account_type" => "Account Type".to_string(),
        "business_type" => "Type of Business".to_string(),
        "lead_source" => "Lead Source".to_string(),
        "close_reason" => "Close Reason".to_string(),
        "outcome" => "Outcome".to_string(),
        "close_month" => "Close Month".to_string(),
        "close_quarter" => "Close Quarter".to_string(),
        "value" => "Opp Value (EUR)".to_string(),
        "duration_days" => "Days to Close".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

fn key_cells(dimensions: &[String], key: &[String]) -> Vec<String> {
    dimensions
        .iter()
        .zip(key)
        .map(|(dimension, value)| key_cell(dimension, value))
        .collect()
}

fn key_cell(dimension: &str, value: &str) -> String {
    let bucket = |period: Period| {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(|start| TimeBucket::of(period, start).to_string())
            .unwrap_or_else(|_| value.to_string())
    };

    match dimension {
        "outcome" => match Outcome::from_stage(value) {
            Some(outcome) => format!("{} {}", outcome.emoji(), outcome),
            None => value.to_string(),
        },
        "close_month" => bucket(Period::Month),
        "close_quarter" => bucket(Period::Quarter),
        _ => value.replace('|', "\\|"),
    }
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by dealboard v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(dashboard: &Dashboard) -> Result<String> {
    serde_json::to_string_pretty(dashboard).map_err(Into::into)
}

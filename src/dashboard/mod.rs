//! Dashboard assembly.
//!
//! A dashboard is a list of pages, each made of charts. Every chart is one
//! declarative [`AggregationRequest`] from the [`catalog`]; pages are computed
//! concurrently against a shared dataset and aggregation cache.

pub mod catalog;
pub mod render;

use crate::analysis::{AggregationCache, AggregationRequest, CategoryOrders};
use crate::dataset::LoadSummary;
use crate::models::{AggregationOutput, Dataset, DatasetId};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub use catalog::{charts, ChartSpec};

/// A tab of the dashboard.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Page {
    /// Won vs lost distribution
    Overview,
    /// Won vs lost profile by account, country, segment and time
    Profile,
    /// Average ticket
    Ticket,
    /// Average time to close
    Time,
}

impl Page {
    pub const ALL: [Page; 4] = [Page::Overview, Page::Profile, Page::Ticket, Page::Time];

    pub fn as_str(&self) -> &'static str {
        match self {
            Page::Overview => "overview",
            Page::Profile => "profile",
            Page::Ticket => "ticket",
            Page::Time => "time",
        }
    }

    /// Parses a page name from the configuration file.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "overview" => Some(Page::Overview),
            "profile" => Some(Page::Profile),
            "ticket" | "average_ticket" => Some(Page::Ticket),
            "time" | "time_to_close" => Some(Page::Time),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Page::Overview => "Overview",
            Page::Profile => "Profile | Won vs Lost",
            Page::Ticket => "Average Ticket",
            Page::Time => "Average Time to Close",
        }
    }
}

/// Information about the dashboard run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardMetadata {
    /// Dataset file, or `<memory>` for in-memory datasets.
    pub source: String,
    pub dataset_id: DatasetId,
    pub records: usize,
    pub loaded_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_summary: Option<LoadSummary>,
}

/// One computed chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartView {
    pub id: String,
    pub title: String,
    pub request: AggregationRequest,
    pub output: AggregationOutput,
}

/// One computed page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageView {
    pub page: Page,
    pub title: String,
    pub charts: Vec<ChartView>,
}

/// A fully computed dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub metadata: DashboardMetadata,
    pub pages: Vec<PageView>,
}

impl Dashboard {
    /// Total number of charts across pages.
    pub fn chart_count(&self) -> usize {
        self.pages.iter().map(|p| p.charts.len()).sum()
    }

    /// Finds a chart by id.
    pub fn chart(&self, id: &str) -> Option<&ChartView> {
        self.pages
            .iter()
            .flat_map(|p| p.charts.iter())
            .find(|c| c.id == id)
    }
}

/// Computes the requested pages.
///
/// Each page runs on the blocking pool; charts shared between pages are
/// computed once thanks to the cache. Duplicate pages are rendered once.
pub async fn build_dashboard(
    dataset: Arc<Dataset>,
    cache: Arc<AggregationCache>,
    pages: &[Page],
    orders: &CategoryOrders,
    show_progress: bool,
) -> Result<Dashboard> {
    let start = Instant::now();

    let mut selected: Vec<Page> = Vec::new();
    for page in pages {
        if !selected.contains(page) {
            selected.push(*page);
        }
    }

    let total: usize = selected.iter().map(|p| charts(*p).len()).sum();
    info!(
        "Computing {} chart(s) on {} page(s) over {} records",
        total,
        selected.len(),
        dataset.len()
    );

    let progress = if show_progress {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} charts")
                .context("Invalid progress bar template")?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let tasks = selected.iter().map(|&page| {
        let dataset = Arc::clone(&dataset);
        let cache = Arc::clone(&cache);
        let orders = orders.clone();
        let progress = progress.clone();
        tokio::task::spawn_blocking(move || compute_page(&dataset, &cache, page, &orders, progress.as_ref()))
    });

    let computed = futures::future::try_join_all(tasks)
        .await
        .context("Dashboard worker panicked")?;
    let page_views = computed.into_iter().collect::<Result<Vec<_>>>()?;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let stats = cache.stats();
    debug!(
        "Aggregation cache: {} hit(s), {} miss(es), {} entr(ies)",
        stats.hits, stats.misses, stats.entries
    );

    let metadata = DashboardMetadata {
        source: dataset
            .source()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string()),
        dataset_id: dataset.id().clone(),
        records: dataset.len(),
        loaded_at: dataset.loaded_at(),
        generated_at: Utc::now(),
        duration_seconds: start.elapsed().as_secs_f64(),
        load_summary: None,
    };

    Ok(Dashboard {
        metadata,
        pages: page_views,
    })
}

fn compute_page(
    dataset: &Dataset,
    cache: &AggregationCache,
    page: Page,
    orders: &CategoryOrders,
    progress: Option<&ProgressBar>,
) -> Result<PageView> {
    let mut views = Vec::new();

    for chart in charts(page) {
        let request = chart.request.with_default_orders(orders);
        let output = cache
            .get_or_compute(dataset, &request)
            .with_context(|| format!("Failed to compute chart '{}'", chart.id))?;
        debug!("Chart {} computed ({} diagnostics)", chart.id, output.diagnostics().len());

        views.push(ChartView {
            id: chart.id.to_string(),
            title: chart.title.to_string(),
            request,
            output: (*output).clone(),
        });

        if let Some(pb) = progress {
            pb.inc(1);
        }
    }

    Ok(PageView {
        page,
        title: page.title().to_string(),
        charts: views,
    })
}

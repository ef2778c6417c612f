//! Dealboard - sales opportunity dashboard
//!
//! A declarative aggregation engine over closed sales opportunities
//! ([`analysis`]), CSV loading ([`dataset`]) and the dashboard built on
//! top of them ([`dashboard`]). The `dealboard` binary wires these to the
//! command line.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod dataset;
pub mod error;
pub mod models;

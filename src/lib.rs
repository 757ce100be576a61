//! modelpulse - catalog popularity crawler.
//!
//! Walks catalog sitemaps (model hosting sites, a generative-art marketplace,
//! a hosted-demo platform), extracts a per-item run count from each page, and
//! upserts the latest value into a remote SQL-over-HTTP store. Falls back to
//! Wayback Machine CDX indexes and a live search-index monitor when a site's
//! sitemap stops enumerating items.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod extract;
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod utils;

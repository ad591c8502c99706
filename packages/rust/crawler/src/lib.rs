//! Domain-scoped document crawler.
//!
//! This crate provides:
//! - [`engine`] — sitemap probe plus breadth-first page walk within one domain
//! - [`ledger`] — the duplicate-free document ledger and the link-list artifact

pub mod engine;
pub mod ledger;

pub use engine::{CrawlResult, CrawlScope, Crawler};
pub use ledger::{DocumentLedger, LinkListWriter, read_link_list};

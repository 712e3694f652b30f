//! File discovery: eligibility rules, the tree crawler and the ignore cache.

pub mod crawler;
pub mod filter;
pub mod ignore;

pub use crawler::{CrawlStats, Finder, TreeCrawler};
pub use filter::EligibilityFilter;
pub use ignore::IgnoreCache;

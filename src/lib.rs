//! Stubcrawl: single-pass reduction of Wikimedia stub-meta-history dumps
//! into relational CSV tables
//!
//! A stub-meta-history dump carries every page's full revision metadata
//! (but no article text). This crate streams such a dump once, line by
//! line, and reduces it to three tables:
//!
//! 1. **Page registry** (`pages.csv`) -- one row per page: id, namespace,
//!    base64-encoded title, redirect flag
//! 2. **User registry** (`users.csv`) -- one row per contributor the first
//!    time they are seen: id, encoded name, optional bot flag
//! 3. **Fact table** (`user_page_months.csv`) -- one row per
//!    (contributor, page, month): edit count plus denormalized page
//!    attributes, optionally partitioned into one file per year
//!
//! # Architecture
//!
//! - **Line-oriented tag scan** -- the dump's element-per-line layout makes
//!    a full XML parser unnecessary; each line is classified by its leading
//!    tag and fed to an explicit nesting state machine
//! - **Bounded memory** -- only the currently open page is held; closed
//!    pages are written and flushed immediately, so an interrupted run
//!    keeps every completed page
//! - **Privacy-preserving identities** -- anonymous contributors get
//!    sequential `IP:<n>` pseudonyms and a SHA-256 digest display name; the
//!    raw IP address never reaches the output
//! - **Lossy recovery** -- malformed or out-of-order input is logged with
//!    its line number and skipped, never fatal
//!
//! # Key Modules
//!
//! - [`scan`] -- line classification and one-line tag content extraction
//! - [`crawl`] -- the nesting state machine and crawl driver
//! - [`model`] -- per-entity accumulators and row serialization
//! - [`identity`] -- run-wide contributor identity registry
//! - [`bots`] -- bot username roster
//! - [`output`] -- CSV sink with overwrite/append and per-year partitioning
//! - [`report`] -- fact-table reader and basic counts for downstream analysis
//! - [`stats`] -- run counters
//! - [`config`] -- constants

pub mod bots;
pub mod config;
pub mod crawl;
pub mod identity;
pub mod model;
pub mod output;
pub mod report;
pub mod scan;
pub mod stats;

//! Reader side of the fact table.
//!
//! Downstream analysis consumes `user_page_months.csv` (or its per-year
//! shards) long after the crawl that produced it, so this module treats the
//! files as untrusted input: every row is re-validated and a malformed row
//! is rejected individually instead of poisoning the whole batch.

use anyhow::{Context, Result};
use rustc_hash::FxHashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::bots::BotRoster;
use crate::model;

/// One validated fact row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactRecord {
    pub user_id: String,
    /// Present only in files written with a bot roster.
    pub user_is_bot: Option<bool>,
    pub page_id: String,
    pub namespace: String,
    pub page_is_redirect: bool,
    pub month: String,
    pub month_edits: u64,
}

impl FactRecord {
    /// Validate one CSV record. `bot_column` selects the 7-field layout.
    /// Returns `None` for any row that does not conform; the caller decides
    /// whether to count or just skip it.
    pub fn parse(record: &csv::StringRecord, bot_column: bool) -> Option<Self> {
        let expected = if bot_column { 7 } else { 6 };
        if record.len() != expected {
            return None;
        }

        let mut fields = record.iter();
        let user_id = fields.next()?.to_string();
        // header rows and junk lines fail this gate, as does anything that
        // is neither a numeric id nor an IP pseudonym
        if !user_id.starts_with("IP:") && !user_id.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let user_is_bot = if bot_column {
            Some(parse_flag(fields.next()?)?)
        } else {
            None
        };

        Some(Self {
            user_id,
            user_is_bot,
            page_id: fields.next()?.to_string(),
            namespace: fields.next()?.to_string(),
            page_is_redirect: parse_flag(fields.next()?)?,
            month: fields.next()?.to_string(),
            month_edits: fields.next()?.parse().ok()?,
        })
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.starts_with("IP:")
    }
}

fn parse_flag(field: &str) -> Option<bool> {
    match field {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

/// Totals over one or more fact files. Registered and anonymous activity is
/// tallied separately; redirect pages are kept out of the page count.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BasicCounts {
    pub num_users: usize,
    pub num_ips: usize,
    pub num_pages: usize,
    pub num_redirects: usize,
    pub num_user_rows: u64,
    pub num_ip_rows: u64,
    pub num_user_edits: u64,
    pub num_ip_edits: u64,
    pub rows_rejected: u64,
}

/// Streaming aggregator behind [`BasicCounts`]. Feed it fact files, then
/// call [`FactScanner::finish`].
pub struct FactScanner {
    bot_column: bool,
    namespaces: Option<FxHashSet<String>>,
    exclude_bots: bool,
    excluded_ids: FxHashSet<String>,
    user_ids: FxHashSet<String>,
    ips: FxHashSet<String>,
    page_ids: FxHashSet<String>,
    redirect_ids: FxHashSet<String>,
    counts: BasicCounts,
}

impl FactScanner {
    pub fn new(bot_column: bool) -> Self {
        Self {
            bot_column,
            namespaces: None,
            exclude_bots: false,
            excluded_ids: FxHashSet::default(),
            user_ids: FxHashSet::default(),
            ips: FxHashSet::default(),
            page_ids: FxHashSet::default(),
            redirect_ids: FxHashSet::default(),
            counts: BasicCounts::default(),
        }
    }

    /// Restrict the tally to the given namespace codes.
    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces = Some(namespaces.into_iter().map(Into::into).collect());
        self
    }

    /// Skip rows whose bot flag is set. Only meaningful with a bot column.
    pub fn excluding_bots(mut self) -> Self {
        self.exclude_bots = true;
        self
    }

    /// Skip rows by these user ids, e.g. from [`bot_ids_from_registry`].
    pub fn excluding_ids(mut self, ids: FxHashSet<String>) -> Self {
        self.excluded_ids = ids;
        self
    }

    /// Tally every row of one fact file. Returns the number of rows counted.
    pub fn scan_file(&mut self, path: &Path) -> Result<u64> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open fact file: {}", path.display()))?;

        let mut counted = 0u64;
        for (index, result) in reader.records().enumerate() {
            let record = result
                .with_context(|| format!("Failed to read fact file: {}", path.display()))?;
            let Some(fact) = FactRecord::parse(&record, self.bot_column) else {
                warn!(
                    file = %path.display(),
                    row = index,
                    "Rejecting malformed fact row"
                );
                self.counts.rows_rejected += 1;
                continue;
            };
            if self.tally(&fact) {
                counted += 1;
            }
        }
        info!(file = %path.display(), counted, "Scanned fact file");
        Ok(counted)
    }

    /// Fold one valid record into the running totals. Returns false when a
    /// filter excluded it.
    pub fn tally(&mut self, fact: &FactRecord) -> bool {
        if let Some(namespaces) = &self.namespaces {
            if !namespaces.contains(&fact.namespace) {
                return false;
            }
        }
        if self.exclude_bots && fact.user_is_bot == Some(true) {
            return false;
        }
        if self.excluded_ids.contains(&fact.user_id) {
            return false;
        }

        if fact.is_anonymous() {
            self.counts.num_ip_rows += 1;
            self.counts.num_ip_edits += fact.month_edits;
            self.ips.insert(fact.user_id.clone());
        } else {
            self.counts.num_user_rows += 1;
            self.counts.num_user_edits += fact.month_edits;
            self.user_ids.insert(fact.user_id.clone());
        }

        if fact.page_is_redirect {
            self.redirect_ids.insert(fact.page_id.clone());
        } else {
            self.page_ids.insert(fact.page_id.clone());
        }
        true
    }

    pub fn finish(mut self) -> BasicCounts {
        self.counts.num_users = self.user_ids.len();
        self.counts.num_ips = self.ips.len();
        self.counts.num_pages = self.page_ids.len();
        self.counts.num_redirects = self.redirect_ids.len();
        self.counts
    }
}

/// Map a roster of bot usernames to the user ids recorded in `users.csv`.
/// Usernames in the registry are base64-encoded, so the roster is encoded
/// once up front and matched against the raw second column.
pub fn bot_ids_from_registry(roster: &BotRoster, users_path: &Path) -> Result<FxHashSet<String>> {
    let mut encoded: FxHashSet<String> = roster
        .names()
        .map(|name| model::encode_text(name))
        .collect();

    let mut reader = csv::Reader::from_path(users_path)
        .with_context(|| format!("Failed to open user registry: {}", users_path.display()))?;

    let mut bot_ids = FxHashSet::default();
    for result in reader.records() {
        let record = result
            .with_context(|| format!("Failed to read user registry: {}", users_path.display()))?;
        let (Some(user_id), Some(name)) = (record.get(0), record.get(1)) else {
            continue;
        };
        if user_id.starts_with("IP:") {
            continue;
        }
        if encoded.remove(name) {
            bot_ids.insert(user_id.to_string());
        }
    }
    Ok(bot_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn record(fields: &[&str]) -> csv::StringRecord {
        csv::StringRecord::from(fields.to_vec())
    }

    #[test]
    fn parse_accepts_well_formed_rows() {
        let fact =
            FactRecord::parse(&record(&["5", "10", "0", "0", "2021-03", "4"]), false).unwrap();
        assert_eq!(fact.user_id, "5");
        assert_eq!(fact.month_edits, 4);
        assert!(!fact.page_is_redirect);
        assert!(fact.user_is_bot.is_none());

        let fact =
            FactRecord::parse(&record(&["IP:0", "1", "10", "0", "1", "2021-03", "2"]), true)
                .unwrap();
        assert!(fact.is_anonymous());
        assert_eq!(fact.user_is_bot, Some(true));
        assert!(fact.page_is_redirect);
    }

    #[test]
    fn parse_rejects_malformed_rows() {
        // wrong arity
        assert!(FactRecord::parse(&record(&["5", "10", "0", "0", "2021-03"]), false).is_none());
        // non-numeric edit count
        assert!(
            FactRecord::parse(&record(&["5", "10", "0", "0", "2021-03", "four"]), false).is_none()
        );
        // bad redirect flag
        assert!(
            FactRecord::parse(&record(&["5", "10", "0", "2", "2021-03", "4"]), false).is_none()
        );
        // header row
        assert!(FactRecord::parse(
            &record(&["user_id", "page_id", "namespace", "page_is_redirect", "month", "month_edits"]),
            false
        )
        .is_none());
    }

    #[test]
    fn scanner_aggregates_distinct_users_and_pages() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "user_id,page_id,page_namespace,page_is_redirect,user_page_month,user_page_month_edits").unwrap();
        writeln!(file, "5,10,0,0,2021-03,4").unwrap();
        writeln!(file, "5,11,0,0,2021-04,1").unwrap();
        writeln!(file, "IP:0,10,0,0,2021-03,2").unwrap();
        writeln!(file, "7,12,0,1,2021-03,3").unwrap();
        file.flush().unwrap();

        let mut scanner = FactScanner::new(false);
        assert_eq!(scanner.scan_file(file.path()).unwrap(), 4);
        let counts = scanner.finish();

        assert_eq!(counts.num_users, 2);
        assert_eq!(counts.num_ips, 1);
        assert_eq!(counts.num_pages, 2);
        assert_eq!(counts.num_redirects, 1);
        assert_eq!(counts.num_user_edits, 8);
        assert_eq!(counts.num_ip_edits, 2);
        assert_eq!(counts.rows_rejected, 0);
    }

    #[test]
    fn scanner_rejects_bad_rows_without_aborting() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "user_id,page_id,page_namespace,page_is_redirect,user_page_month,user_page_month_edits").unwrap();
        writeln!(file, "5,10,0,0,2021-03,4").unwrap();
        writeln!(file, "5,10,0,0,2021-03").unwrap();
        writeln!(file, "garbage,10,0,0,2021-03,1").unwrap();
        writeln!(file, "6,10,0,0,2021-03,1").unwrap();
        file.flush().unwrap();

        let mut scanner = FactScanner::new(false);
        assert_eq!(scanner.scan_file(file.path()).unwrap(), 2);
        let counts = scanner.finish();
        assert_eq!(counts.rows_rejected, 2);
        assert_eq!(counts.num_users, 2);
    }

    #[test]
    fn namespace_filter_and_bot_exclusion() {
        let mut scanner = FactScanner::new(true)
            .with_namespaces(["0"])
            .excluding_bots();

        let counted = scanner.tally(
            &FactRecord::parse(&record(&["5", "0", "10", "0", "0", "2021-03", "4"]), true).unwrap(),
        );
        assert!(counted);
        // wrong namespace
        assert!(!scanner.tally(
            &FactRecord::parse(&record(&["5", "0", "10", "1", "0", "2021-03", "4"]), true).unwrap(),
        ));
        // bot flag set
        assert!(!scanner.tally(
            &FactRecord::parse(&record(&["9", "1", "10", "0", "0", "2021-03", "4"]), true).unwrap(),
        ));

        let counts = scanner.finish();
        assert_eq!(counts.num_users, 1);
        assert_eq!(counts.num_user_edits, 4);
    }

    #[test]
    fn bot_ids_resolved_through_user_registry() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "user_id,user_name").unwrap();
        writeln!(file, "5,{}", model::encode_text("Alice")).unwrap();
        writeln!(file, "9,{}", model::encode_text("ExampleBot")).unwrap();
        writeln!(file, "IP:0,deadbeef").unwrap();
        file.flush().unwrap();

        let roster = BotRoster::from_names(["ExampleBot"]);
        let ids = bot_ids_from_registry(&roster, file.path()).unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains("9"));
    }
}

//! The crawl state machine: a single-pass reduction of a stub-meta-history
//! dump into the three output tables.
//!
//! The scan is strictly sequential: one line in, zero or more state
//! mutations, possibly a few output rows, then the next line. Memory stays
//! bounded by the currently open page plus the run-wide identity sets;
//! a closed page is serialized, flushed, and freed before the next one
//! opens. Malformed or out-of-order input never aborts the run — every
//! anomaly is logged with its line number and the scan continues, because a
//! multi-million-line dump must survive to the end even when a handful of
//! entities are broken.

use crate::bots::BotRoster;
use crate::config::{MAINSPACE_NS, PROGRESS_INTERVAL, REVISION_LOG_INTERVAL};
use crate::identity::IdentityRegistry;
use crate::model::{user_row, ContributorDraft, PageAccumulator, RevisionDraft};
use crate::output::OutputSink;
use crate::scan::{oneline_value, scan_line, LineEvent, TagKind};
use crate::stats::CrawlStats;
use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use indicatif::ProgressBar;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Run-level options for one crawl.
pub struct CrawlConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Discard pages outside the primary content namespace.
    pub mainspace_only: bool,
    /// Partition the fact table into one file per calendar year.
    pub split_by_year: bool,
    /// Truncate existing outputs instead of appending.
    pub overwrite: bool,
    /// Stop after this many input lines (partial/test runs).
    pub max_lines: Option<u64>,
    /// When present, user rows and fact rows carry a bot flag column.
    pub bot_roster: Option<BotRoster>,
}

/// Nesting context of the scan. Each state owns the accumulators for the
/// entities currently open, so a leaf tag arriving without its parent open
/// simply has nowhere to land.
enum ScanState {
    Idle,
    InPage(PageAccumulator),
    InRevision(PageAccumulator, RevisionDraft),
    InContributor(PageAccumulator, RevisionDraft, ContributorDraft),
}

pub struct Crawler {
    input: PathBuf,
    mainspace_only: bool,
    split_by_year: bool,
    max_lines: Option<u64>,
    bot_column: bool,
    roster: BotRoster,
    state: ScanState,
    registry: IdentityRegistry,
    sink: OutputSink,
    pub stats: CrawlStats,
    line: u64,
}

impl Crawler {
    pub fn new(config: CrawlConfig) -> Result<Self> {
        let bot_column = config.bot_roster.is_some();
        let sink = OutputSink::new(&config.output_dir, config.overwrite, bot_column)?;

        Ok(Self {
            input: config.input,
            mainspace_only: config.mainspace_only,
            split_by_year: config.split_by_year,
            max_lines: config.max_lines,
            bot_column,
            roster: config.bot_roster.unwrap_or_else(BotRoster::empty),
            state: ScanState::Idle,
            registry: IdentityRegistry::new(),
            sink,
            stats: CrawlStats::new(),
            line: 0,
        })
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    /// Crawl the configured dump to the end (or to the line limit).
    pub fn run(&mut self) -> Result<()> {
        let mut reader = open_dump(&self.input)?;
        info!(input = %self.input.display(), "Starting crawl");

        let pb = ProgressBar::new_spinner();
        let mut buf = Vec::new();
        loop {
            if let Some(max) = self.max_lines {
                if self.stats.lines >= max {
                    info!(lines = self.stats.lines, "Reached line limit, stopping early");
                    break;
                }
            }

            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .context("Failed to read from dump")?;
            if n == 0 {
                break;
            }

            // lossy: a stray non-UTF-8 byte must not kill a huge run
            let line = String::from_utf8_lossy(&buf);
            self.process_line(&line)?;

            if self.stats.lines % PROGRESS_INTERVAL == 0 {
                pb.tick();
            }
        }
        pb.finish_and_clear();

        self.sink.flush()?;
        info!(
            lines = self.stats.lines,
            revisions = self.stats.revisions,
            identities = self.registry.seen_count(),
            "Crawl finished"
        );
        Ok(())
    }

    /// Process one raw input line. `Err` only for output I/O failures;
    /// malformed input is logged and recovered from.
    pub fn process_line(&mut self, raw: &str) -> Result<()> {
        self.line += 1;
        self.stats.lines += 1;

        match scan_line(raw) {
            LineEvent::Skip => Ok(()),
            LineEvent::Open(tag, line) => {
                self.handle_open(tag, line);
                Ok(())
            }
            LineEvent::Close(TagKind::Revision) => self.close_revision(),
            LineEvent::Close(TagKind::Page) => self.close_page(),
            LineEvent::Close(_) => Ok(()),
        }
    }

    fn handle_open(&mut self, tag: TagKind, line: &str) {
        match tag {
            TagKind::Page => self.open_page_boundary(),
            TagKind::Revision => self.open_revision_boundary(),
            TagKind::Contributor => self.open_contributor_boundary(ContributorDraft::new()),
            TagKind::ContributorDeleted => {
                self.open_contributor_boundary(ContributorDraft::deleted_marker())
            }
            TagKind::Redirect => {
                if let Some(page) = self.page_mut() {
                    page.mark_redirect();
                }
            }
            TagKind::Id => {
                let Some(value) = self.value_of(line) else { return };
                if value.is_empty() {
                    return;
                }
                let line_no = self.line;
                // an <id> is ambiguous by depth alone: innermost entity wins
                if let Some(contributor) = self.contributor_mut() {
                    contributor.set_id(&value, line_no);
                } else if let Some(revision) = self.revision_mut() {
                    revision.set_id(&value, line_no);
                } else if let Some(page) = self.page_mut() {
                    page.set_id(&value, line_no);
                }
            }
            TagKind::Title => {
                let Some(value) = self.value_of(line) else { return };
                let line_no = self.line;
                if let Some(page) = self.page_mut() {
                    page.set_name(&value, line_no);
                }
            }
            TagKind::Ns => {
                let Some(value) = self.value_of(line) else { return };
                let line_no = self.line;
                let mainspace_only = self.mainspace_only;
                let mut drop_page = false;
                if let Some(page) = self.page_mut() {
                    page.set_namespace(&value, line_no);
                    if mainspace_only && value != MAINSPACE_NS {
                        drop_page = true;
                    }
                }
                if drop_page {
                    debug!(line = line_no, ns = value.as_str(), "Skipping non-mainspace page");
                    self.state = ScanState::Idle;
                }
            }
            TagKind::Timestamp => {
                let Some(value) = self.value_of(line) else { return };
                if value.is_empty() {
                    return;
                }
                let line_no = self.line;
                if let Some(revision) = self.revision_mut() {
                    revision.set_month_from_timestamp(&value, line_no);
                }
            }
            TagKind::Sha1 => {
                let Some(value) = self.value_of(line) else { return };
                let line_no = self.line;
                if let Some(revision) = self.revision_mut() {
                    revision.set_content_hash(&value, line_no);
                }
            }
            TagKind::Username => {
                let Some(value) = self.value_of(line) else { return };
                let line_no = self.line;
                if let Some(contributor) = self.contributor_mut() {
                    contributor.set_username(&value, line_no);
                } else if !matches!(self.state, ScanState::Idle) {
                    warn!(line = line_no, "Username tag with no open contributor");
                }
            }
            TagKind::Ip => {
                let Some(value) = self.value_of(line) else { return };
                let line_no = self.line;
                if let Some(contributor) = self.contributor_mut() {
                    contributor.set_ip(&value, line_no);
                } else if !matches!(self.state, ScanState::Idle) {
                    warn!(line = line_no, "Ip tag with no open contributor");
                }
            }
        }
    }

    /// Extract a leaf tag's one-line content. A malformed line (value runs
    /// onto the next line) yields `None` and the field stays unset, so the
    /// usual missing-field handling applies at block close.
    fn value_of(&self, line: &str) -> Option<String> {
        match oneline_value(line) {
            Some(value) => Some(value.to_string()),
            None => {
                warn!(line = self.line, content = line, "Problem with one-line tag; field left unset");
                None
            }
        }
    }

    fn page_mut(&mut self) -> Option<&mut PageAccumulator> {
        match &mut self.state {
            ScanState::Idle => None,
            ScanState::InPage(page)
            | ScanState::InRevision(page, _)
            | ScanState::InContributor(page, _, _) => Some(page),
        }
    }

    fn revision_mut(&mut self) -> Option<&mut RevisionDraft> {
        match &mut self.state {
            ScanState::InRevision(_, revision) | ScanState::InContributor(_, revision, _) => {
                Some(revision)
            }
            _ => None,
        }
    }

    fn contributor_mut(&mut self) -> Option<&mut ContributorDraft> {
        match &mut self.state {
            ScanState::InContributor(_, _, contributor) => Some(contributor),
            _ => None,
        }
    }

    fn open_page_boundary(&mut self) {
        let state = std::mem::replace(&mut self.state, ScanState::Idle);
        match state {
            ScanState::Idle => {}
            ScanState::InPage(page)
            | ScanState::InRevision(page, _)
            | ScanState::InContributor(page, _, _) => {
                warn!(
                    line = self.line,
                    page_id = ?page.page_id,
                    "New page opened while another page is open; force-closing the old one"
                );
                // lossy recovery: flush what we have so the scan never wedges
                if let Err(e) = self.flush_page(page) {
                    warn!(line = self.line, error = %e, "Failed to flush force-closed page");
                }
            }
        }
        self.state = ScanState::InPage(PageAccumulator::new());
    }

    fn open_revision_boundary(&mut self) {
        let state = std::mem::replace(&mut self.state, ScanState::Idle);
        self.state = match state {
            ScanState::Idle => ScanState::Idle,
            ScanState::InPage(page) => ScanState::InRevision(page, RevisionDraft::new()),
            ScanState::InRevision(page, revision) => {
                warn!(
                    line = self.line,
                    revision_id = ?revision.revision_id,
                    "Revision opened while another revision is open; dropping the unfinished one"
                );
                ScanState::InRevision(page, RevisionDraft::new())
            }
            ScanState::InContributor(page, revision, _) => {
                warn!(
                    line = self.line,
                    revision_id = ?revision.revision_id,
                    "Revision opened inside an unclosed contributor; dropping both"
                );
                ScanState::InRevision(page, RevisionDraft::new())
            }
        };
    }

    fn open_contributor_boundary(&mut self, draft: ContributorDraft) {
        let deleted = draft.deleted;
        let state = std::mem::replace(&mut self.state, ScanState::Idle);
        let mut accepted = false;
        self.state = match state {
            ScanState::Idle => ScanState::Idle,
            ScanState::InPage(page) => {
                warn!(line = self.line, "Contributor tag with no open revision; ignoring");
                ScanState::InPage(page)
            }
            ScanState::InRevision(page, revision) => {
                accepted = true;
                ScanState::InContributor(page, revision, draft)
            }
            ScanState::InContributor(page, revision, _) => {
                warn!(
                    line = self.line,
                    "Contributor opened while another contributor is open; dropping the unfinished one"
                );
                accepted = true;
                ScanState::InContributor(page, revision, draft)
            }
        };
        if accepted && deleted {
            self.stats.attribution_removed += 1;
        }
    }

    fn close_revision(&mut self) -> Result<()> {
        // every </revision> counts toward the running total, even inside
        // skipped pages, so filtered runs still report true dump progress
        self.count_revision();
        let state = std::mem::replace(&mut self.state, ScanState::Idle);
        match state {
            ScanState::Idle => Ok(()),
            ScanState::InPage(page) => {
                debug!(line = self.line, "Stray </revision> with no open revision");
                self.state = ScanState::InPage(page);
                Ok(())
            }
            ScanState::InRevision(page, revision) => {
                warn!(
                    line = self.line,
                    revision_id = ?revision.revision_id,
                    "Revision has no contributor; dropping"
                );
                self.stats.revisions_dropped += 1;
                self.state = ScanState::InPage(page);
                Ok(())
            }
            ScanState::InContributor(mut page, revision, contributor) => {
                self.merge_revision(&mut page, revision, contributor);
                self.state = ScanState::InPage(page);
                Ok(())
            }
        }
    }

    /// Fold a closed revision into the owning page's per-month counts.
    fn merge_revision(
        &mut self,
        page: &mut PageAccumulator,
        revision: RevisionDraft,
        contributor: ContributorDraft,
    ) {
        if contributor.deleted {
            // counted in stats only; the synthetic identity never reaches
            // the per-page aggregation or the user registry
            debug!(
                line = self.line,
                revision_id = ?revision.revision_id,
                "Revision attribution removed"
            );
            return;
        }

        let month = match revision.month {
            Some(month) => month,
            None => {
                warn!(
                    line = self.line,
                    revision_id = ?revision.revision_id,
                    "Revision has no timestamp; dropping"
                );
                self.stats.revisions_dropped += 1;
                return;
            }
        };

        let (identity, emit_user_row) = if let Some(ip) = contributor.ip.as_deref() {
            (self.registry.resolve_anonymous(ip), true)
        } else if let Some(user_id) = contributor.user_id.as_deref() {
            match contributor.username.as_deref() {
                Some(name) => (
                    self.registry.resolve_registered(user_id, name, &self.roster),
                    true,
                ),
                None => {
                    warn!(
                        line = self.line,
                        user_id,
                        "Contributor has no username; counting the edit, skipping the registry row"
                    );
                    (
                        self.registry.resolve_registered(user_id, "", &self.roster),
                        false,
                    )
                }
            }
        } else {
            warn!(
                line = self.line,
                revision_id = ?revision.revision_id,
                "Contributor has neither id nor ip; dropping revision"
            );
            self.stats.revisions_dropped += 1;
            return;
        };

        let emit = identity.newly_seen && emit_user_row;
        page.record_edit(&identity, &month, emit);
    }

    fn close_page(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, ScanState::Idle);
        match state {
            ScanState::Idle => Ok(()),
            ScanState::InPage(page) => self.flush_page(page),
            ScanState::InRevision(page, revision) => {
                warn!(
                    line = self.line,
                    page_id = ?page.page_id,
                    revision_id = ?revision.revision_id,
                    "Page ended without closing revision"
                );
                self.flush_page(page)
            }
            ScanState::InContributor(page, revision, contributor) => {
                warn!(
                    line = self.line,
                    page_id = ?page.page_id,
                    revision_id = ?revision.revision_id,
                    user_id = ?contributor.user_id,
                    "Page ended without closing contributor"
                );
                self.flush_page(page)
            }
        }
    }

    /// Serialize one closed page: newly-seen user rows first, then the fact
    /// rows, then the page-registry row, then flush so the page is durable.
    fn flush_page(&mut self, mut page: PageAccumulator) -> Result<()> {
        for identity in page.take_pending_users() {
            self.sink.write_user_row(&user_row(&identity, self.bot_column))?;
            self.stats.users_written += 1;
        }

        if page.has_edits() {
            let rows = page.fact_rows(self.split_by_year, self.bot_column);
            self.stats.fact_rows_written += self.sink.write_fact_rows(rows)?;
        } else {
            info!(
                line = self.line,
                page_id = ?page.page_id,
                "Page has no countable revisions"
            );
        }

        match page.page_row() {
            Some(row) => {
                self.sink.write_page_row(&row)?;
                self.stats.pages_written += 1;
            }
            None => {
                warn!(
                    line = self.line,
                    page_id = ?page.page_id,
                    "Page closed without a name; dropping registry row"
                );
                self.stats.pages_dropped += 1;
            }
        }

        self.sink.flush()
    }

    fn count_revision(&mut self) {
        self.stats.revisions += 1;
        if self.stats.revisions % REVISION_LOG_INTERVAL == 0 {
            info!(
                revisions = self.stats.revisions,
                line = self.line,
                "Crawl progress"
            );
        }
    }
}

/// Open the dump for a forward-only pass, decompressing when the path
/// carries a `.bz2` extension.
fn open_dump(path: &Path) -> Result<Box<dyn BufRead>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open dump: {}", path.display()))?;

    if path.extension().is_some_and(|ext| ext == "bz2") {
        Ok(Box::new(BufReader::new(BzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

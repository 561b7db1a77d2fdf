/// Counters collected over one crawl run.
///
/// The crawl is strictly single-threaded, so plain integers suffice.
#[derive(Debug, Default, Clone)]
pub struct CrawlStats {
    /// Input lines read, including ignored ones.
    pub lines: u64,
    /// `</revision>` boundaries closed while a revision was open.
    pub revisions: u64,
    /// Revisions dropped for a missing contributor or timestamp.
    pub revisions_dropped: u64,
    /// Revisions whose attribution was removed from the dump.
    pub attribution_removed: u64,
    /// Page-registry rows written.
    pub pages_written: u64,
    /// Pages closed without a name (no registry row emitted).
    pub pages_dropped: u64,
    /// User-registry rows written.
    pub users_written: u64,
    /// Fact rows written across all year partitions.
    pub fact_rows_written: u64,
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Namespace code of the primary content namespace ("mainspace")
pub const MAINSPACE_NS: &str = "0";

/// Progress spinner update interval (tick every N input lines)
pub const PROGRESS_INTERVAL: u64 = 100_000;

/// Log an info line every N closed revisions
pub const REVISION_LOG_INTERVAL: u64 = 5_000_000;

/// Buffer size for CSV output writers
pub const CSV_BUFFER_SIZE: usize = 128 * 1024;

/// Constant identity for revisions whose attribution was removed from the dump
pub const DELETED_USER_ID: &str = "0";

/// Display label for the deleted-attribution identity
pub const DELETED_USER_NAME: &str = "[Attribution Removed]";

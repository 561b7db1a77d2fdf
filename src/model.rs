//! In-progress entity records for the crawl.
//!
//! Each accumulator holds the partially-populated data for the entity
//! currently open in the scan. Leaf fields are single-assignment: a second
//! assignment is a data-integrity warning and the first value wins.

use crate::identity::Identity;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rustc_hash::FxHashMap;
use tracing::warn;

/// Base64-encode a text field so embedded commas and newlines cannot
/// corrupt the CSV tables.
pub fn encode_text(text: &str) -> String {
    BASE64.encode(text.as_bytes())
}

/// Inverse of [`encode_text`]. Returns `None` for invalid base64 or
/// non-UTF-8 payloads.
pub fn decode_text(encoded: &str) -> Option<String> {
    let bytes = BASE64.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

fn bool_field(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn assign_once(slot: &mut Option<String>, value: &str, field: &'static str, line: u64) {
    match slot {
        Some(existing) => {
            warn!(
                line,
                field,
                existing = existing.as_str(),
                new = value,
                "Field assigned twice; keeping first value"
            );
        }
        None => *slot = Some(value.to_string()),
    }
}

/// Data from an open `<revision>` block. Consumed into the owning page's
/// per-month counts when the block closes.
#[derive(Debug, Default)]
pub struct RevisionDraft {
    pub revision_id: Option<String>,
    /// Calendar month of the edit, `YYYY-MM`.
    pub month: Option<String>,
    pub content_hash: Option<String>,
}

impl RevisionDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_id(&mut self, id: &str, line: u64) {
        assign_once(&mut self.revision_id, id, "revision_id", line);
    }

    /// Derive the month from an ISO timestamp (`2021-03-15T00:00:00Z`).
    pub fn set_month_from_timestamp(&mut self, timestamp: &str, line: u64) {
        let month = timestamp.get(..7).unwrap_or(timestamp);
        assign_once(&mut self.month, month, "month", line);
    }

    pub fn set_content_hash(&mut self, hash: &str, line: u64) {
        assign_once(&mut self.content_hash, hash, "content_hash", line);
    }
}

/// Data from an open `<contributor>` block, before identity resolution.
#[derive(Debug, Default)]
pub struct ContributorDraft {
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub ip: Option<String>,
    /// Set for the `<contributor deleted=.../>` marker.
    pub deleted: bool,
}

impl ContributorDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deleted_marker() -> Self {
        Self {
            deleted: true,
            ..Self::default()
        }
    }

    pub fn set_id(&mut self, id: &str, line: u64) {
        assign_once(&mut self.user_id, id, "user_id", line);
    }

    pub fn set_username(&mut self, name: &str, line: u64) {
        assign_once(&mut self.username, name, "username", line);
    }

    pub fn set_ip(&mut self, ip: &str, line: u64) {
        assign_once(&mut self.ip, ip, "ip", line);
    }
}

/// Data from an open `<page>` block, including the per-page aggregation of
/// `(contributor, month) -> edit count` built up as revisions close.
#[derive(Debug, Default)]
pub struct PageAccumulator {
    pub page_id: Option<String>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub is_redirect: bool,
    user_months: FxHashMap<(String, String), u64>,
    /// Contributors already counted on this page, with their bot flag.
    known_contributors: FxHashMap<String, bool>,
    /// Identities first observed within this page block; written to the
    /// user registry when the page flushes.
    pending_users: Vec<Identity>,
}

impl PageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_id(&mut self, id: &str, line: u64) {
        assign_once(&mut self.page_id, id, "page_id", line);
    }

    /// Set the title. Empty titles are ignored; dumps occasionally emit a
    /// transient empty title before the real one.
    pub fn set_name(&mut self, title: &str, line: u64) {
        if title.is_empty() {
            return;
        }
        assign_once(&mut self.name, title, "title", line);
    }

    pub fn set_namespace(&mut self, ns: &str, line: u64) {
        assign_once(&mut self.namespace, ns, "namespace", line);
    }

    pub fn mark_redirect(&mut self) {
        self.is_redirect = true;
    }

    /// Count one edit by `identity` in `month`. When `emit_user_row` is set
    /// the identity is queued for the user registry at page flush.
    pub fn record_edit(&mut self, identity: &Identity, month: &str, emit_user_row: bool) {
        *self
            .user_months
            .entry((identity.user_id.clone(), month.to_string()))
            .or_insert(0) += 1;
        self.known_contributors
            .entry(identity.user_id.clone())
            .or_insert(identity.is_bot);
        if emit_user_row {
            self.pending_users.push(identity.clone());
        }
    }

    pub fn has_edits(&self) -> bool {
        !self.user_months.is_empty()
    }

    pub fn take_pending_users(&mut self) -> Vec<Identity> {
        std::mem::take(&mut self.pending_users)
    }

    /// The page-registry row, or `None` when the page never received a name.
    pub fn page_row(&self) -> Option<Vec<String>> {
        self.name.as_deref()?;
        Some(vec![
            self.page_id.clone().unwrap_or_default(),
            self.namespace.clone().unwrap_or_default(),
            encode_text(self.name.as_deref().unwrap_or_default()),
            bool_field(self.is_redirect).to_string(),
        ])
    }

    /// One fact row per `(contributor, month)` pair, bucketed by the month's
    /// year when `split_by_year` is set (bucket `None` otherwise).
    pub fn fact_rows(
        &self,
        split_by_year: bool,
        bot_column: bool,
    ) -> FxHashMap<Option<String>, Vec<Vec<String>>> {
        let mut by_year: FxHashMap<Option<String>, Vec<Vec<String>>> = FxHashMap::default();
        let page_id = self.page_id.clone().unwrap_or_default();
        let namespace = self.namespace.clone().unwrap_or_default();
        let is_redirect = bool_field(self.is_redirect);

        for ((user_id, month), count) in &self.user_months {
            let year = if split_by_year {
                Some(month.get(..4).unwrap_or(month).to_string())
            } else {
                None
            };

            let mut row = Vec::with_capacity(if bot_column { 7 } else { 6 });
            row.push(user_id.clone());
            if bot_column {
                let is_bot = self.known_contributors.get(user_id).copied().unwrap_or(false);
                row.push(bool_field(is_bot).to_string());
            }
            row.push(page_id.clone());
            row.push(namespace.clone());
            row.push(is_redirect.to_string());
            row.push(month.clone());
            row.push(count.to_string());

            by_year.entry(year).or_default().push(row);
        }

        by_year
    }
}

/// Serialize a user-registry row: registered names are base64-encoded,
/// anonymous display names are already an opaque digest and pass through.
pub fn user_row(identity: &Identity, bot_column: bool) -> Vec<String> {
    let encoded_name = if identity.is_anonymous {
        identity.display_name.clone()
    } else {
        encode_text(&identity.display_name)
    };

    let mut row = vec![identity.user_id.clone(), encoded_name];
    if bot_column {
        row.push(bool_field(identity.is_bot).to_string());
    }
    row
}

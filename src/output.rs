use crate::config::CSV_BUFFER_SIZE;
use anyhow::{Context, Result};
use csv::Writer;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// The three relational tables produced by a crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Pages,
    Users,
    UserPageMonths,
}

impl Table {
    fn base_name(self) -> &'static str {
        match self {
            Table::Pages => "pages",
            Table::Users => "users",
            Table::UserPageMonths => "user_page_months",
        }
    }

    /// Output filename; only the fact table is year-partitioned.
    fn filename(self, year: Option<&str>) -> String {
        match (self, year) {
            (Table::UserPageMonths, Some(year)) => format!("{}-{}.csv", year, self.base_name()),
            _ => format!("{}.csv", self.base_name()),
        }
    }

    fn header(self, bot_column: bool) -> Vec<&'static str> {
        let mut fields = match self {
            Table::Pages => vec![
                "page_id",
                "page_namespace",
                "page_name_base64",
                "page_is_redirect",
            ],
            Table::Users => vec!["user_id", "user_name"],
            Table::UserPageMonths => vec![
                "user_id",
                "page_id",
                "page_namespace",
                "page_is_redirect",
                "user_page_month",
                "user_page_month_edits",
            ],
        };
        if bot_column {
            match self {
                Table::Pages => {}
                Table::Users => fields.push("user_is_bot"),
                Table::UserPageMonths => fields.insert(1, "user_is_bot"),
            }
        }
        fields
    }
}

/// Buffered, lazily-opened CSV writers for the output tables.
///
/// Files are opened on first write. In overwrite mode the file is truncated
/// and a header written; in append mode existing content is preserved and
/// the header is written only when the file did not exist yet. Writers stay
/// open for the life of the sink and are flushed after every closed page so
/// an early termination still leaves complete rows on disk.
pub struct OutputSink {
    output_dir: PathBuf,
    overwrite: bool,
    bot_column: bool,
    writers: HashMap<String, Writer<BufWriter<File>>>,
}

impl OutputSink {
    pub fn new(output_dir: &Path, overwrite: bool, bot_column: bool) -> Result<Self> {
        fs::create_dir_all(output_dir).with_context(|| {
            format!("Failed to create output directory: {}", output_dir.display())
        })?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            overwrite,
            bot_column,
            writers: HashMap::new(),
        })
    }

    fn writer_for(
        &mut self,
        table: Table,
        year: Option<&str>,
    ) -> Result<&mut Writer<BufWriter<File>>> {
        let filename = table.filename(year);
        match self.writers.entry(filename) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let path = self.output_dir.join(entry.key());
                let append = !self.overwrite && path.exists();
                let file = if append {
                    OpenOptions::new()
                        .append(true)
                        .open(&path)
                        .with_context(|| format!("Failed to open output: {}", path.display()))?
                } else {
                    File::create(&path)
                        .with_context(|| format!("Failed to create output: {}", path.display()))?
                };
                let mut writer =
                    Writer::from_writer(BufWriter::with_capacity(CSV_BUFFER_SIZE, file));
                if !append {
                    writer
                        .write_record(table.header(self.bot_column))
                        .with_context(|| format!("Failed to write header: {}", path.display()))?;
                }
                info!(file = entry.key().as_str(), append, "Opened output file");
                Ok(entry.insert(writer))
            }
        }
    }

    pub fn write_page_row(&mut self, row: &[String]) -> Result<()> {
        self.writer_for(Table::Pages, None)?
            .write_record(row)
            .context("Failed to write page row")
    }

    pub fn write_user_row(&mut self, row: &[String]) -> Result<()> {
        self.writer_for(Table::Users, None)?
            .write_record(row)
            .context("Failed to write user row")
    }

    /// Write one page's fact rows, bucketed by year (`None` = unpartitioned).
    ///
    /// Every row within a bucket must have the same field count; a bucket
    /// that violates this is skipped whole and logged, rather than emitting
    /// corrupt CSV. Returns the number of rows written.
    pub fn write_fact_rows(
        &mut self,
        rows_by_year: FxHashMap<Option<String>, Vec<Vec<String>>>,
    ) -> Result<u64> {
        let mut written = 0u64;
        for (year, rows) in rows_by_year {
            let expected = match rows.first() {
                Some(first) => first.len(),
                None => continue,
            };
            if rows.iter().any(|row| row.len() != expected) {
                error!(
                    year = year.as_deref().unwrap_or("all"),
                    "Inconsistent field count in fact rows; skipping batch"
                );
                continue;
            }

            let writer = self.writer_for(Table::UserPageMonths, year.as_deref())?;
            for row in &rows {
                writer.write_record(row).context("Failed to write fact row")?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Flush buffered rows of every open writer to disk.
    pub fn flush(&mut self) -> Result<()> {
        for (name, writer) in &mut self.writers {
            writer
                .flush()
                .with_context(|| format!("Failed to flush output: {}", name))?;
        }
        Ok(())
    }
}

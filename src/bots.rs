use anyhow::{Context, Result};
use rustc_hash::FxHashSet;
use std::fs;
use std::path::Path;
use tracing::info;

/// Static roster of known bot account names.
///
/// The roster file carries one account name per line. Underscores are
/// normalized to spaces on load (list pages use the URL form of names);
/// matching is otherwise exact, case- and form-sensitive.
#[derive(Debug, Default)]
pub struct BotRoster {
    names: FxHashSet<String>,
}

impl BotRoster {
    /// An empty roster; every membership test is false.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read bot list: {}", path.display()))?;

        let names: FxHashSet<String> = text
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(|line| line.replace('_', " "))
            .collect();

        info!(bots = names.len(), path = %path.display(), "Loaded bot roster");
        Ok(Self { names })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_normalizes_underscores() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Example_Bot").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "Cleaner bot").unwrap();
        file.flush().unwrap();

        let roster = BotRoster::load(file.path()).unwrap();
        assert_eq!(roster.len(), 2);
        assert!(roster.contains("Example Bot"));
        assert!(roster.contains("Cleaner bot"));
        assert!(!roster.contains("Example_Bot"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let roster = BotRoster::from_names(["ExampleBot"]);
        assert!(roster.contains("ExampleBot"));
        assert!(!roster.contains("examplebot"));
    }

    #[test]
    fn empty_roster_matches_nothing() {
        let roster = BotRoster::empty();
        assert!(roster.is_empty());
        assert!(!roster.contains("anyone"));
    }
}

//! Line-oriented tag scanner for stub-meta-history dumps.
//!
//! The dump format guarantees that every tag we care about sits on its own
//! line, with leaf values (`<id>123</id>`) complete on that line. That
//! guarantee lets us classify lines with plain string splits instead of a
//! general XML parser, which keeps the scan allocation-free per line.

/// Tags recognized by the crawler. Everything else is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Page,
    Revision,
    Contributor,
    Id,
    Title,
    Ns,
    Timestamp,
    Sha1,
    Username,
    Ip,
    Redirect,
    ContributorDeleted,
}

/// Classification of one raw input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent<'a> {
    /// An opening tag; `line` is the trimmed line for later value extraction.
    Open(TagKind, &'a str),
    /// A closing tag. Only `</revision>` and `</page>` drive state changes.
    Close(TagKind),
    /// Blank line, wrapped continuation text, or an irrelevant tag.
    Skip,
}

/// Classify a single raw line from the dump.
pub fn scan_line(raw: &str) -> LineEvent<'_> {
    let line = raw.trim_start();
    if !line.starts_with('<') {
        return LineEvent::Skip;
    }

    if let Some(rest) = line.strip_prefix("</") {
        if rest.starts_with("revision>") {
            return LineEvent::Close(TagKind::Revision);
        }
        if rest.starts_with("page>") {
            return LineEvent::Close(TagKind::Page);
        }
        return LineEvent::Skip;
    }

    let end = line.find('>').unwrap_or(line.len());
    let name = &line[1..end];

    let kind = match name {
        "page" => TagKind::Page,
        "revision" => TagKind::Revision,
        "contributor" => TagKind::Contributor,
        "id" => TagKind::Id,
        "title" => TagKind::Title,
        "ns" => TagKind::Ns,
        "timestamp" => TagKind::Timestamp,
        "sha1" => TagKind::Sha1,
        "username" => TagKind::Username,
        "ip" => TagKind::Ip,
        // these may carry attributes, so match on the name prefix
        _ if name.starts_with("contributor deleted") => TagKind::ContributorDeleted,
        _ if name.starts_with("redirect") => TagKind::Redirect,
        _ => return LineEvent::Skip,
    };

    LineEvent::Open(kind, line)
}

/// Extract the text of a tag whose entire content sits on one line,
/// i.e. the trimmed span between the first `>` and the next `<`.
///
/// Returns `None` when either delimiter is missing; the caller logs the
/// malformed line and treats the field as never set.
pub fn oneline_value(line: &str) -> Option<&str> {
    let (_, rest) = line.split_once('>')?;
    let (value, _) = rest.split_once('<')?;
    Some(value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_open_tags() {
        assert_eq!(scan_line("  <page>"), LineEvent::Open(TagKind::Page, "<page>"));
        assert_eq!(
            scan_line("    <id>42</id>"),
            LineEvent::Open(TagKind::Id, "<id>42</id>")
        );
        assert_eq!(
            scan_line("<timestamp>2021-03-15T00:00:00Z</timestamp>"),
            LineEvent::Open(TagKind::Timestamp, "<timestamp>2021-03-15T00:00:00Z</timestamp>")
        );
    }

    #[test]
    fn classifies_close_tags() {
        assert_eq!(scan_line("  </revision>"), LineEvent::Close(TagKind::Revision));
        assert_eq!(scan_line("</page>"), LineEvent::Close(TagKind::Page));
        // other closing tags are structural noise for this scan
        assert_eq!(scan_line("</contributor>"), LineEvent::Skip);
        assert_eq!(scan_line("</mediawiki>"), LineEvent::Skip);
    }

    #[test]
    fn attribute_tags_match_by_prefix() {
        assert!(matches!(
            scan_line(r#"<redirect title="Other Page" />"#),
            LineEvent::Open(TagKind::Redirect, _)
        ));
        assert!(matches!(
            scan_line(r#"<contributor deleted="deleted" />"#),
            LineEvent::Open(TagKind::ContributorDeleted, _)
        ));
        // plain <contributor> must not be swallowed by the prefix rule
        assert!(matches!(
            scan_line("<contributor>"),
            LineEvent::Open(TagKind::Contributor, _)
        ));
    }

    #[test]
    fn non_structural_lines_are_skipped() {
        assert_eq!(scan_line(""), LineEvent::Skip);
        assert_eq!(scan_line("   "), LineEvent::Skip);
        assert_eq!(scan_line("wrapped continuation text"), LineEvent::Skip);
        assert_eq!(scan_line("<unknown>x</unknown>"), LineEvent::Skip);
    }

    #[test]
    fn oneline_value_extracts_trimmed_content() {
        assert_eq!(oneline_value("<id>42</id>"), Some("42"));
        assert_eq!(oneline_value("<title> Test </title>"), Some("Test"));
        assert_eq!(oneline_value("<ns>0</ns>"), Some("0"));
    }

    #[test]
    fn oneline_value_rejects_malformed_lines() {
        // value continues on the next line
        assert_eq!(oneline_value("<title>Unterminated"), None);
        // no content delimiter at all
        assert_eq!(oneline_value("<title"), None);
    }

    #[test]
    fn oneline_value_empty_content() {
        assert_eq!(oneline_value("<title></title>"), Some(""));
    }
}

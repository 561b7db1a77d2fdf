//! End-to-end tests for the crawl pipeline: write a small dump to disk, run
//! the crawler over it, and inspect the CSV tables it produces.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use stubcrawl::bots::BotRoster;
use stubcrawl::crawl::{CrawlConfig, Crawler};
use stubcrawl::model::encode_text;
use tempfile::TempDir;

const SAMPLE_DUMP: &str = r#"<mediawiki xmlns="http://www.mediawiki.org/xml/export-0.11/">
  <siteinfo>
    <sitename>Testwiki</sitename>
  </siteinfo>
  <page>
    <title>Alpha</title>
    <ns>0</ns>
    <id>1</id>
    <revision>
      <id>100</id>
      <timestamp>2020-01-05T12:00:00Z</timestamp>
      <contributor>
        <username>Alice</username>
        <id>11</id>
      </contributor>
      <sha1>phoiac9h4m842xq45sp7s6u21eteeq1</sha1>
    </revision>
    <revision>
      <id>101</id>
      <timestamp>2020-01-20T12:00:00Z</timestamp>
      <contributor>
        <username>Alice</username>
        <id>11</id>
      </contributor>
    </revision>
    <revision>
      <id>102</id>
      <timestamp>2020-02-01T12:00:00Z</timestamp>
      <contributor>
        <ip>192.0.2.7</ip>
      </contributor>
    </revision>
  </page>
  <page>
    <title>Beta</title>
    <ns>0</ns>
    <id>2</id>
    <redirect title="Alpha" />
    <revision>
      <id>200</id>
      <timestamp>2021-03-01T12:00:00Z</timestamp>
      <contributor>
        <ip>192.0.2.7</ip>
      </contributor>
    </revision>
  </page>
</mediawiki>
"#;

fn write_dump(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn run_crawl(input: PathBuf, output_dir: PathBuf, tweak: impl FnOnce(&mut CrawlConfig)) -> Crawler {
    let mut config = CrawlConfig {
        input,
        output_dir,
        mainspace_only: false,
        split_by_year: false,
        overwrite: true,
        max_lines: None,
        bot_roster: None,
    };
    tweak(&mut config);
    let mut crawler = Crawler::new(config).unwrap();
    crawler.run().unwrap();
    crawler
}

fn read(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap()
}

#[test]
fn crawl_produces_expected_tables() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), "dump.xml", SAMPLE_DUMP);
    let crawler = run_crawl(dump, dir.path().to_path_buf(), |_| {});

    assert_eq!(crawler.stats.pages_written, 2);
    assert_eq!(crawler.stats.revisions, 4);
    assert_eq!(crawler.stats.revisions_dropped, 0);
    assert_eq!(crawler.stats.users_written, 2);

    let pages = read(dir.path(), "pages.csv");
    assert!(pages.starts_with("page_id,page_namespace,page_name_base64,page_is_redirect\n"));
    assert!(pages.contains(&format!("1,0,{},0\n", encode_text("Alpha"))));
    assert!(pages.contains(&format!("2,0,{},1\n", encode_text("Beta"))));

    let users = read(dir.path(), "users.csv");
    assert!(users.starts_with("user_id,user_name\n"));
    assert!(users.contains(&format!("11,{}\n", encode_text("Alice"))));
    // the anonymous identity is a pseudonym plus a digest of the address
    let digest = hex::encode(Sha256::digest("192.0.2.7".as_bytes()));
    assert!(users.contains(&format!("IP:0,{}\n", digest)));
    assert!(!users.contains("192.0.2.7"));

    let facts = read(dir.path(), "user_page_months.csv");
    assert!(facts.starts_with(
        "user_id,page_id,page_namespace,page_is_redirect,user_page_month,user_page_month_edits\n"
    ));
    assert!(facts.contains("11,1,0,0,2020-01,2\n"));
    assert!(facts.contains("IP:0,1,0,0,2020-02,1\n"));
    // same address on a later page reuses the pseudonym
    assert!(facts.contains("IP:0,2,0,1,2021-03,1\n"));
    assert!(!facts.contains("IP:1"));
}

#[test]
fn edit_counts_are_conserved() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), "dump.xml", SAMPLE_DUMP);
    let crawler = run_crawl(dump, dir.path().to_path_buf(), |_| {});

    let facts = read(dir.path(), "user_page_months.csv");
    let total: u64 = facts
        .lines()
        .skip(1)
        .map(|line| line.rsplit(',').next().unwrap().parse::<u64>().unwrap())
        .sum();
    assert_eq!(
        total + crawler.stats.revisions_dropped + crawler.stats.attribution_removed,
        crawler.stats.revisions
    );
}

#[test]
fn mainspace_only_drops_other_namespaces() {
    let dump_body = SAMPLE_DUMP.replace("    <ns>0</ns>\n    <id>2</id>", "    <ns>4</ns>\n    <id>2</id>");
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), "dump.xml", &dump_body);
    let crawler = run_crawl(dump, dir.path().to_path_buf(), |c| c.mainspace_only = true);

    assert_eq!(crawler.stats.pages_written, 1);
    let pages = read(dir.path(), "pages.csv");
    assert!(!pages.contains(&encode_text("Beta")));
    let facts = read(dir.path(), "user_page_months.csv");
    assert!(!facts.contains(",2,"));
}

#[test]
fn append_mode_accumulates_without_duplicate_headers() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), "dump.xml", SAMPLE_DUMP);
    run_crawl(dump.clone(), out.path().to_path_buf(), |_| {});
    run_crawl(dump, out.path().to_path_buf(), |c| c.overwrite = false);

    let pages = read(out.path(), "pages.csv");
    let headers = pages
        .lines()
        .filter(|line| line.starts_with("page_id,"))
        .count();
    assert_eq!(headers, 1);
    // both runs contributed rows
    assert_eq!(pages.lines().count(), 5);
}

#[test]
fn overwrite_mode_truncates_previous_output() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), "dump.xml", SAMPLE_DUMP);
    run_crawl(dump.clone(), out.path().to_path_buf(), |_| {});
    run_crawl(dump, out.path().to_path_buf(), |_| {});

    let pages = read(out.path(), "pages.csv");
    assert_eq!(pages.lines().count(), 3);
}

#[test]
fn split_years_partitions_fact_table() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), "dump.xml", SAMPLE_DUMP);
    run_crawl(dump, dir.path().to_path_buf(), |c| c.split_by_year = true);

    assert!(!dir.path().join("user_page_months.csv").exists());
    let y2020 = read(dir.path(), "2020-user_page_months.csv");
    assert!(y2020.contains("11,1,0,0,2020-01,2\n"));
    assert!(y2020.contains("IP:0,1,0,0,2020-02,1\n"));
    assert!(!y2020.contains("2021-03"));
    let y2021 = read(dir.path(), "2021-user_page_months.csv");
    assert!(y2021.contains("IP:0,2,0,1,2021-03,1\n"));
}

#[test]
fn bot_roster_enables_bot_flag_column() {
    let dump_body = SAMPLE_DUMP.replace("<username>Alice</username>", "<username>Example Bot</username>");
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), "dump.xml", &dump_body);
    run_crawl(dump, dir.path().to_path_buf(), |c| {
        c.bot_roster = Some(BotRoster::from_names(["Example Bot"]));
    });

    let users = read(dir.path(), "users.csv");
    assert!(users.starts_with("user_id,user_name,user_is_bot\n"));
    assert!(users.contains(&format!("11,{},1\n", encode_text("Example Bot"))));
    assert!(users.contains(",0\n"));

    let facts = read(dir.path(), "user_page_months.csv");
    assert!(facts.starts_with(
        "user_id,user_is_bot,page_id,page_namespace,page_is_redirect,user_page_month,user_page_month_edits\n"
    ));
    assert!(facts.contains("11,1,1,0,0,2020-01,2\n"));
    assert!(facts.contains("IP:0,0,1,0,0,2020-02,1\n"));
}

#[test]
fn max_lines_stops_the_scan_early() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), "dump.xml", SAMPLE_DUMP);
    // stop inside the first page: nothing is ever flushed
    let crawler = run_crawl(dump, dir.path().to_path_buf(), |c| c.max_lines = Some(10));

    assert_eq!(crawler.stats.lines, 10);
    assert_eq!(crawler.stats.pages_written, 0);
    assert!(!dir.path().join("pages.csv").exists());
}

#[test]
fn bz2_dump_is_decompressed_transparently() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dump.xml.bz2");
    let file = fs::File::create(&path).unwrap();
    let mut encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
    encoder.write_all(SAMPLE_DUMP.as_bytes()).unwrap();
    encoder.finish().unwrap();

    let crawler = run_crawl(path, dir.path().to_path_buf(), |_| {});
    assert_eq!(crawler.stats.pages_written, 2);
    assert_eq!(crawler.stats.revisions, 4);
}

#[test]
fn malformed_input_recovers_without_losing_good_pages() {
    let broken = r#"<mediawiki>
  </revision>
  </page>
  <page>
    <title>Broken
    <ns>0</ns>
    <id>7</id>
    <revision>
      <id>700</id>
      <timestamp>2020-05-01T00:00:00Z</timestamp>
  <page>
    <title>Gamma</title>
    <ns>0</ns>
    <id>8</id>
    <revision>
      <id>800</id>
      <timestamp>2020-06-01T00:00:00Z</timestamp>
      <contributor>
        <username>Carol</username>
        <id>31</id>
      </contributor>
    </revision>
  </page>
</mediawiki>
"#;
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), "dump.xml", broken);
    let crawler = run_crawl(dump, dir.path().to_path_buf(), |_| {});

    // the force-closed page never got a name, so only Gamma is registered
    assert_eq!(crawler.stats.pages_written, 1);
    assert_eq!(crawler.stats.pages_dropped, 1);
    let pages = read(dir.path(), "pages.csv");
    assert!(pages.contains(&format!("8,0,{},0\n", encode_text("Gamma"))));
    let facts = read(dir.path(), "user_page_months.csv");
    assert!(facts.contains("31,8,0,0,2020-06,1\n"));
}

#[test]
fn attribution_removed_revisions_never_reach_the_output() {
    let dump_body = SAMPLE_DUMP.replace(
        "<contributor>\n        <ip>192.0.2.7</ip>\n      </contributor>",
        "<contributor deleted=\"deleted\" />",
    );
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), "dump.xml", &dump_body);
    let crawler = run_crawl(dump, dir.path().to_path_buf(), |_| {});

    assert_eq!(crawler.stats.attribution_removed, 2);
    let users = read(dir.path(), "users.csv");
    assert!(!users.contains("IP:"));
    let facts = read(dir.path(), "user_page_months.csv");
    assert!(!facts.contains("IP:"));
    assert!(!facts.contains("Attribution"));
}

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use stubcrawl::bots::BotRoster;
use stubcrawl::crawl::{CrawlConfig, Crawler};
use stubcrawl::report::{self, FactScanner};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "stubcrawl")]
#[command(about = "Reduce Wikimedia stub-meta-history dumps into relational CSV tables")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write logs to this file (plain text, no colors)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a dump into pages, users, and user-page-month CSV tables
    Crawl(CrawlArgs),
    /// Compute basic counts over previously written fact tables
    Stats(StatsArgs),
}

#[derive(Args)]
struct CrawlArgs {
    /// Path to the dump file (.xml or .xml.bz2)
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for the CSV tables
    #[arg(short, long)]
    output: PathBuf,

    /// Only keep pages in the primary content namespace
    #[arg(long)]
    mainspace_only: bool,

    /// Write one fact file per calendar year
    #[arg(long)]
    split_years: bool,

    /// Append to existing output files instead of overwriting them
    #[arg(long)]
    append: bool,

    /// Stop after this many input lines (for testing)
    #[arg(long)]
    max_lines: Option<u64>,

    /// File with one bot username per line; enables the bot flag column
    #[arg(long)]
    bots: Option<PathBuf>,
}

#[derive(Args)]
struct StatsArgs {
    /// Fact table files to scan (user_page_months.csv or yearly shards)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Only count rows in these namespaces (repeatable)
    #[arg(long = "namespace")]
    namespaces: Vec<String>,

    /// The files carry a user_is_bot column
    #[arg(long)]
    bot_column: bool,

    /// Skip rows whose bot flag is set (requires --bot-column)
    #[arg(long)]
    exclude_bots: bool,

    /// File with one bot username per line, resolved against --users
    #[arg(long, requires = "users")]
    bots: Option<PathBuf>,

    /// users.csv written by the crawl, used to map bot names to ids
    #[arg(long)]
    users: Option<PathBuf>,
}

fn run_crawl(args: CrawlArgs) -> Result<()> {
    let bot_roster = match args.bots {
        Some(path) => Some(BotRoster::load(&path)?),
        None => None,
    };

    let mut crawler = Crawler::new(CrawlConfig {
        input: args.input,
        output_dir: args.output,
        mainspace_only: args.mainspace_only,
        split_by_year: args.split_years,
        overwrite: !args.append,
        max_lines: args.max_lines,
        bot_roster,
    })?;

    let start = Instant::now();
    crawler.run()?;
    let duration = start.elapsed();

    let stats = &crawler.stats;
    println!();
    println!("=== Summary ===");
    println!("Crawl time:           {:.2}s", duration.as_secs_f64());
    println!();
    println!("Lines scanned:        {}", stats.lines);
    println!("Revisions seen:       {}", stats.revisions);
    println!("Revisions dropped:    {}", stats.revisions_dropped);
    println!("Attribution removed:  {}", stats.attribution_removed);
    println!("Pages written:        {}", stats.pages_written);
    println!("Pages dropped:        {}", stats.pages_dropped);
    println!("Users written:        {}", stats.users_written);
    println!("Fact rows written:    {}", stats.fact_rows_written);
    println!(
        "Distinct identities:  {}",
        crawler.registry().seen_count()
    );
    println!(
        "Anonymous identities: {}",
        crawler.registry().anonymous_count()
    );

    Ok(())
}

fn run_stats(args: StatsArgs) -> Result<()> {
    if args.exclude_bots && !args.bot_column {
        bail!("--exclude-bots requires --bot-column");
    }

    let mut scanner = FactScanner::new(args.bot_column);
    if !args.namespaces.is_empty() {
        scanner = scanner.with_namespaces(args.namespaces);
    }
    if args.exclude_bots {
        scanner = scanner.excluding_bots();
    }
    if let (Some(bots), Some(users)) = (&args.bots, &args.users) {
        let roster = BotRoster::load(bots)?;
        let bot_ids = report::bot_ids_from_registry(&roster, users)?;
        info!(resolved = bot_ids.len(), roster = roster.len(), "Resolved bot ids");
        scanner = scanner.excluding_ids(bot_ids);
    }

    let mut counted = 0u64;
    for path in &args.files {
        counted += scanner.scan_file(path)?;
    }
    let counts = scanner.finish();

    println!();
    println!("=== Basic counts ===");
    println!("Rows counted:         {}", counted);
    println!("Rows rejected:        {}", counts.rows_rejected);
    println!();
    println!("Registered users:     {}", counts.num_users);
    println!("Anonymous users:      {}", counts.num_ips);
    println!("Pages (non-redirect): {}", counts.num_pages);
    println!("Redirect pages:       {}", counts.num_redirects);
    println!("Registered rows:      {}", counts.num_user_rows);
    println!("Anonymous rows:       {}", counts.num_ip_rows);
    println!("Registered edits:     {}", counts.num_user_edits);
    println!("Anonymous edits:      {}", counts.num_ip_edits);

    Ok(())
}

fn init_tracing(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false);

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
            let subscriber = builder.with_writer(Arc::new(file)).with_ansi(false).finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        None => tracing::subscriber::set_global_default(builder.finish()),
    }
    .context("Failed to set tracing subscriber")
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Crawl(args) => run_crawl(args),
        Commands::Stats(args) => run_stats(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

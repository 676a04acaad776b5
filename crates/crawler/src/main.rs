//! page-health entry point

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use browser::{BrowsingContext, CdpContext, ContextError};
use crawler::config::{load_config, validate, Config};
use crawler::{crawl, JsonFileSink, LogSink, MultiSink};

/// Visit application routes in a headless browser and rank them by the
/// errors and warnings they log.
///
/// Exits 0 when every page loaded and no structural template errors were
/// seen, 1 otherwise.
#[derive(Parser, Debug)]
#[command(name = "page-health")]
#[command(version)]
#[command(about = "Page-health crawler for single-page applications", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// DevTools WebSocket endpoint (overrides cdp-url)
    #[arg(long, value_name = "URL")]
    cdp_url: Option<String>,

    /// Report file (overrides report-path)
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// API calls allowed per page (overrides api-call-budget)
    #[arg(long, value_name = "N")]
    budget: Option<u32>,

    /// Visit only these routes, in this order (repeatable)
    #[arg(long = "route", value_name = "ROUTE")]
    routes: Vec<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the crawl plan without opening a browser
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(cdp_url) = &self.cdp_url {
            config.cdp_url = cdp_url.clone();
        }
        if let Some(report) = &self.report {
            config.report_path = report.clone();
        }
        if let Some(budget) = self.budget {
            config.api_call_budget = budget;
        }
        if !self.routes.is_empty() {
            config.routes = self.routes.clone();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    cli.apply_overrides(&mut config);
    validate(&config).context("command-line overrides")?;

    if cli.dry_run {
        print_plan(&config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let settings = config.settings()?;
    let bootstrap = config.bootstrap();
    let sink = MultiSink::new()
        .with(LogSink)
        .with(JsonFileSink::new(&config.report_path));

    let session_config = config.session_config();
    let open = async move {
        let context = CdpContext::open(session_config).await?;
        Ok::<_, ContextError>(Arc::new(context) as Arc<dyn BrowsingContext>)
    };

    match crawl(open, bootstrap.as_ref(), settings, &sink).await {
        Ok(outcome) => {
            let code = outcome.exit_code();
            if code == 0 {
                tracing::info!("All pages healthy");
            } else {
                tracing::warn!(
                    "{} failed pages, {} structural errors",
                    outcome.summary.failed,
                    outcome.summary.total_structural + outcome.summary.total_duplicate_attributes
                );
            }
            Ok(ExitCode::from(code))
        }
        Err(e) => {
            tracing::error!("Crawl aborted: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        match verbose {
            0 => EnvFilter::new("crawler=info,browser=info,warn"),
            1 => EnvFilter::new("crawler=debug,browser=debug,info"),
            2 => EnvFilter::new("crawler=trace,browser=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --dry-run: prints what would be crawled
fn print_plan(config: &Config) -> anyhow::Result<()> {
    let settings = config.settings()?;

    println!("=== page-health dry run ===\n");
    println!("Browser: {}", config.cdp_url);
    if let Some(base) = &settings.base_url {
        println!("Base URL: {}", base);
    }
    println!("Report: {}", config.report_path.display());

    println!("\nRequest policy:");
    println!("  API budget per page: {}", settings.policy.api_call_budget);
    println!("  API prefixes: {}", settings.policy.api_path_prefixes.join(", "));
    let mut blocked: Vec<_> = settings.policy.blocked_resource_types.iter().collect();
    blocked.sort();
    let blocked: Vec<_> = blocked.iter().map(|t| t.as_str()).collect();
    println!("  Blocked types: {}", blocked.join(", "));
    println!("  Throttle: {}ms", settings.policy.throttle_delay.as_millis());

    println!("\nTimings:");
    println!("  Navigation timeout: {}ms", settings.timings.navigation_timeout.as_millis());
    println!("  Settle delay: {}ms", settings.timings.settle_delay.as_millis());
    println!("  Cooldown: {}ms", settings.cooldown.as_millis());

    match &config.auth {
        Some(auth) => println!(
            "\nBootstrap: {} ({} storage entries, {})",
            auth.landing_url,
            auth.storage.len(),
            if auth.reauthenticate_each_visit { "every visit" } else { "once" }
        ),
        None => println!("\nBootstrap: none"),
    }

    println!("\nRoutes ({}):", settings.routes.len());
    for route in &settings.routes {
        match crawler::visitor::resolve_route(settings.base_url.as_ref(), route) {
            Ok(url) => println!("  {} -> {}", route, url),
            Err(e) => println!("  {} -> unresolvable ({})", route, e),
        }
    }
    Ok(())
}

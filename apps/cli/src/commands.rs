//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use backfeed_core::events::WEBMENTION_SENT;
use backfeed_core::{DeliveryReport, EventBus, InboundOutcome, Webmentions};
use backfeed_discovery::{DiscoveryOptions, EndpointDiscoverer, build_client};
use backfeed_shared::{
    AppConfig, Mention, Post, config_file_path, init_config, load_config, load_config_from,
};
use backfeed_storage::Storage;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Backfeed: send and receive webmentions for a site.
#[derive(Parser)]
#[command(
    name = "backfeed",
    version,
    about = "Receive, verify and send webmentions for your site.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.backfeed/backfeed.toml).
    #[arg(long, global = true, env = "BACKFEED_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the webmention HTTP endpoint.
    Serve {
        /// Listener address (overrides server.bind_addr).
        #[arg(long)]
        bind: Option<String>,
    },

    /// Verify and store one inbound webmention, as if it had been POSTed.
    Receive {
        /// Page that links to the local post.
        #[arg(long)]
        source: String,

        /// Local post URL being mentioned.
        #[arg(long)]
        target: String,
    },

    /// Print the webmention endpoint advertised by a URL.
    Discover {
        /// Page to inspect.
        url: String,
    },

    /// Store a post and send webmentions to every page it links to.
    Publish {
        /// Post slug; the public URL is site.origin + site.post_path + "/" + slug.
        #[arg(long)]
        slug: String,

        /// Rendered HTML of the post.
        #[arg(long)]
        file: PathBuf,

        /// Post title.
        #[arg(long)]
        title: Option<String>,

        /// Announce as an edit of an existing post.
        #[arg(long)]
        update: bool,
    },

    /// List the mentions received by a post.
    Mentions {
        /// Post slug.
        #[arg(long)]
        slug: String,
    },

    /// Mention totals and the most recent mentions.
    Stats,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "backfeed=info,tower_http=info",
        1 => "backfeed=debug,tower_http=debug",
        _ => "backfeed=trace,tower_http=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Serve { bind } => cmd_serve(config_path, bind).await,
        Command::Receive { source, target } => cmd_receive(config_path, &source, &target).await,
        Command::Discover { url } => cmd_discover(config_path, &url).await,
        Command::Publish {
            slug,
            file,
            title,
            update,
        } => cmd_publish(config_path, &slug, &file, title, update).await,
        Command::Mentions { slug } => cmd_mentions(config_path, &slug).await,
        Command::Stats => cmd_stats(config_path).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = config.database.resolved_path()?;
    let storage = Storage::open(&path)
        .await
        .wrap_err_with(|| format!("failed to open database at {}", path.display()))?;
    Ok(Arc::new(storage))
}

fn pipeline(config: &AppConfig, storage: Arc<Storage>) -> Result<Webmentions> {
    let events = Arc::new(EventBus::new());
    Ok(Webmentions::new(config, storage.clone(), storage, events)?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_serve(config_path: Option<&Path>, bind: Option<String>) -> Result<()> {
    let mut config = config(config_path)?;
    if let Some(addr) = bind {
        config.server.bind_addr = addr;
    }

    let storage = open_storage(&config).await?;
    let webmentions = Arc::new(pipeline(&config, storage)?);

    info!(
        origin = %config.site.origin(),
        outbound = config.outbound.enabled,
        "starting backfeed"
    );
    backfeed_server::serve(&config.server, webmentions).await?;
    Ok(())
}

async fn cmd_receive(config_path: Option<&Path>, source: &str, target: &str) -> Result<()> {
    let config = config(config_path)?;
    let storage = open_storage(&config).await?;
    let webmentions = pipeline(&config, storage)?;

    match webmentions.process_inbound(source, target).await? {
        InboundOutcome::Accepted { id, action } => {
            println!("  Accepted ({action}): {id}");
            Ok(())
        }
        InboundOutcome::Rejected(reason) => Err(eyre!("rejected: {reason}")),
    }
}

async fn cmd_discover(config_path: Option<&Path>, url: &str) -> Result<()> {
    let config = config(config_path)?;
    let parsed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;

    let client = build_client(&config.http)?;
    let discoverer = EndpointDiscoverer::new(client, DiscoveryOptions::from(&config.http));

    match discoverer.discover(&parsed).await {
        Some(endpoint) => println!("{endpoint}"),
        None => println!("No webmention endpoint advertised by {parsed}"),
    }
    Ok(())
}

async fn cmd_publish(
    config_path: Option<&Path>,
    slug: &str,
    file: &Path,
    title: Option<String>,
    update: bool,
) -> Result<()> {
    let config = config(config_path)?;
    let content_html = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("failed to read {}", file.display()))?;

    let storage = open_storage(&config).await?;
    let existing = storage.get_post_by_slug(slug).await?;
    if update && existing.is_none() {
        return Err(eyre!("no post with slug '{slug}' to update"));
    }

    let post = Post {
        id: existing
            .map(|p| p.id)
            .unwrap_or_else(|| Uuid::now_v7().to_string()),
        slug: slug.to_string(),
        title,
        content_html,
    };
    storage.upsert_post(&post).await?;
    info!(post_id = %post.id, slug, "post stored");

    let webmentions = pipeline(&config, storage)?;
    if !config.outbound.enabled {
        println!("  Stored {} (outbound delivery disabled)", config.site.post_url(slug));
        return Ok(());
    }

    let reports: Arc<Mutex<Vec<DeliveryReport>>> = Arc::default();
    let sink = reports.clone();
    webmentions.events().on(WEBMENTION_SENT, move |event| {
        let report: DeliveryReport = serde_json::from_value(event.payload.clone())
            .map_err(|e| backfeed_shared::BackfeedError::Event(e.to_string()))?;
        if let Ok(mut reports) = sink.lock() {
            reports.push(report);
        }
        Ok(())
    });

    let spinner = spinner("Sending webmentions...");
    webmentions.announce(&post.id, update);
    webmentions.drain().await;
    spinner.finish_and_clear();

    let reports = reports
        .lock()
        .map_err(|_| eyre!("delivery report lock poisoned"))?
        .clone();

    println!();
    println!("  Source: {}", config.site.post_url(slug));
    if reports.is_empty() {
        println!("  No webmention endpoints found among linked pages.");
    }
    for report in &reports {
        let outcome = match (&report.status, &report.error) {
            (Some(status), _) if report.success => format!("ok ({status})"),
            (Some(status), Some(error)) => format!("failed ({status}): {error}"),
            (None, Some(error)) => format!("failed: {error}"),
            _ => "failed".to_string(),
        };
        println!("  {} -> {}", report.target, outcome);
    }
    println!();

    Ok(())
}

async fn cmd_mentions(config_path: Option<&Path>, slug: &str) -> Result<()> {
    let config = config(config_path)?;
    let storage = open_storage(&config).await?;
    let post = storage
        .get_post_by_slug(slug)
        .await?
        .ok_or_else(|| eyre!("no post with slug '{slug}'"))?;

    let webmentions = pipeline(&config, storage)?;
    let mentions = webmentions.mentions_for_post(&post.id).await?;

    println!();
    println!("  {} mention(s) of {}", mentions.len(), config.site.post_url(slug));
    for mention in &mentions {
        print_mention(mention);
    }
    println!();
    Ok(())
}

async fn cmd_stats(config_path: Option<&Path>) -> Result<()> {
    let config = config(config_path)?;
    let storage = open_storage(&config).await?;
    let webmentions = pipeline(&config, storage)?;
    let stats = webmentions.stats().await?;

    println!();
    println!("  Total:    {}", stats.total);
    println!("  Mentions: {}", stats.by_type.mention);
    println!("  Likes:    {}", stats.by_type.like);
    println!("  Reposts:  {}", stats.by_type.repost);
    println!("  Replies:  {}", stats.by_type.reply);
    if !stats.recent.is_empty() {
        println!();
        println!("  Recent:");
        for mention in &stats.recent {
            print_mention(mention);
        }
    }
    println!();
    Ok(())
}

fn print_mention(mention: &Mention) {
    let author = mention
        .payload
        .author
        .as_ref()
        .and_then(|a| a.name.as_deref())
        .unwrap_or("unknown");
    println!(
        "  [{}] {:<7} {} ({author})",
        mention.created_at.format("%Y-%m-%d %H:%M"),
        mention.mention_type.as_str(),
        mention.source_url,
    );
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(
            style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = config(config_path)?;
    let source = match config_path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    println!("# {}", source.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_publish_flags() {
        let cli = Cli::parse_from([
            "backfeed",
            "-vv",
            "publish",
            "--slug",
            "hello-world",
            "--file",
            "post.html",
            "--update",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Publish {
                slug,
                file,
                title,
                update,
            } => {
                assert_eq!(slug, "hello-world");
                assert_eq!(file, PathBuf::from("post.html"));
                assert!(update);
                assert!(title.is_none());
            }
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "backfeed",
            "stats",
            "--config",
            "/tmp/site.toml",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/site.toml")));
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert!(matches!(cli.command, Command::Stats));
    }

    #[test]
    fn receive_requires_both_urls() {
        assert!(Cli::try_parse_from(["backfeed", "receive", "--source", "https://a.test/"]).is_err());
    }

    #[tokio::test]
    async fn config_from_explicit_path() {
        let path = std::env::temp_dir().join(format!("backfeed_cli_{}.toml", Uuid::now_v7()));
        std::fs::write(
            &path,
            "[site]\norigin = \"https://blog.test\"\n\n[outbound]\nenabled = false\n",
        )
        .unwrap();

        let loaded = config(Some(&path)).unwrap();
        assert_eq!(loaded.site.origin(), "https://blog.test");
        assert!(!loaded.outbound.enabled);
        assert_eq!(loaded.server.endpoint_path, "/webmention");
    }
}

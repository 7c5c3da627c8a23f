mod backend;
mod host;
mod replay;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use backend::{Backend, PayloadFetch};
use clap::{Parser, Subcommand};
use host::{Host, SharedEpochCache};
use ttv_core::{EpochCache, EpochId, NeighborKind, SurfaceRole};
use ttv_source::{Config, resolve_content_dir};

#[derive(Parser)]
#[command(name = "ttv", about = "Training-dynamics visualizer engine")]
struct Cli {
    /// Training run directory (default: $TTV_DATA_DIR, then the current directory)
    #[arg(long, global = true)]
    content: Option<PathBuf>,

    /// Config file (default: $TTV_CONFIG, then <content>/ttv.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the epochs the run provides
    Epochs,

    /// Build one epoch and summarise it
    Inspect {
        epoch: EpochId,
    },

    /// Print the render frame for an epoch as JSON
    Frame {
        epoch: EpochId,

        /// Sample under the pointer
        #[arg(long)]
        hover: Option<usize>,

        /// Samples to lock (repeatable)
        #[arg(long)]
        lock: Vec<usize>,

        /// Search query, e.g. `label:1` or `idx:0-9`
        #[arg(long)]
        search: Option<String>,
    },

    /// Drive several surfaces with a JSONL interaction script
    Replay {
        script: PathBuf,

        /// Number of surfaces to host
        #[arg(long, default_value_t = 3)]
        surfaces: usize,
    },
}

/// Everything a command needs: where the run lives, how it is configured
/// and where its payloads come from.
struct Session {
    content: PathBuf,
    config: Config,
    backend: Arc<Backend>,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self> {
        let content = resolve_content_dir(cli.content.as_deref());
        let (config, config_path) = Config::resolve(cli.config.as_deref(), Some(&content))
            .context("failed to load configuration")?;
        match &config_path {
            Some(path) => tracing::debug!(path = %path.display(), "using config"),
            None => tracing::debug!("using default config"),
        }
        let backend = Backend::open(&content, &config)?;
        Ok(Self {
            content,
            config,
            backend: Arc::new(backend),
        })
    }

    fn content_path(&self) -> String {
        self.content.display().to_string()
    }

    fn host(&self) -> Host {
        let cache = EpochCache::new().with_precision(self.config.view.precision);
        Host::new(SharedEpochCache::new(cache))
            .with_view(self.config.view.settings(), self.config.prefetch.planner())
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let session = Session::open(&cli)?;

    match &cli.command {
        Commands::Epochs => cmd_epochs(&session).await,
        Commands::Inspect { epoch } => cmd_inspect(&session, *epoch).await,
        Commands::Frame {
            epoch,
            hover,
            lock,
            search,
        } => cmd_frame(&session, *epoch, *hover, lock, search.as_deref()).await,
        Commands::Replay { script, surfaces } => cmd_replay(&session, script, *surfaces).await,
    }
}

async fn cmd_epochs(session: &Session) -> Result<()> {
    let meta = session.backend.meta().await.context("failed to read run metadata")?;
    if meta.available_epochs.is_empty() {
        println!("(no epochs)");
    }
    for epoch in &meta.available_epochs {
        println!("{epoch}");
    }
    Ok(())
}

async fn cmd_inspect(session: &Session, epoch: EpochId) -> Result<()> {
    let meta = session.backend.meta().await.context("failed to read run metadata")?;
    let mut cache = EpochCache::new().with_precision(session.config.view.precision);
    cache.reset_dataset(meta.clone());

    // The previous epoch is only needed for flip detection.
    let previous = meta.previous_epoch(epoch);
    if let Some(prev) = previous {
        match session.backend.fetch(prev).await {
            Ok(payload) => {
                cache.get_or_build(prev, &payload);
            }
            Err(e) => tracing::warn!(epoch = prev, "previous epoch unavailable: {e:#}"),
        }
    }

    let payload = session
        .backend
        .fetch(epoch)
        .await
        .with_context(|| format!("failed to load epoch {epoch}"))?;
    let entry = cache.get_or_build(epoch, &payload);

    let original = entry
        .edges()
        .iter()
        .filter(|e| e.kind == NeighborKind::OriginalSpace)
        .count();
    let projection = entry.edges().len() - original;
    let b = entry.bounds;

    println!("epoch:         {epoch}");
    println!("samples:       {}", entry.len());
    println!("edges:         {} (original {original}, projection {projection})", entry.edges().len());
    println!(
        "bounds:        x [{:.3}, {:.3}]  y [{:.3}, {:.3}]",
        b.x_min, b.x_max, b.y_min, b.y_max
    );
    if entry.has_predictions {
        println!("misclassified: {}", entry.misclassified.len());
    }
    match previous.filter(|p| cache.is_cached(*p)) {
        Some(prev) if entry.has_predictions => {
            println!("flipped:       {} (vs epoch {prev})", entry.flipped_from_previous.len())
        }
        _ => {}
    }
    println!(
        "background:    {}",
        if entry.background_image.is_some() { "yes" } else { "no" }
    );
    Ok(())
}

async fn cmd_frame(
    session: &Session,
    epoch: EpochId,
    hover: Option<usize>,
    lock: &[usize],
    search: Option<&str>,
) -> Result<()> {
    let meta = session.backend.meta().await.context("failed to read run metadata")?;
    let backend = session.backend.as_ref();
    let mut host = session.host();
    let id = host.add_surface(SurfaceRole::Plot);
    host.load_content(&session.content_path(), meta.clone()).await;

    // Build the previous epoch first so edge status and flips resolve.
    if let Some(prev) = meta.previous_epoch(epoch)
        && let Err(e) = host.cache().get_or_fetch(prev, backend).await
    {
        tracing::warn!(epoch = prev, "previous epoch unavailable: {e:#}");
    }
    host.share_cached().await;

    host.interact(id, backend, |s| s.switch_epoch(epoch)).await?;
    if hover.is_some() {
        host.interact(id, backend, |s| s.hover(hover)).await?;
    }
    for &sample in lock {
        host.interact(id, backend, |s| s.click(sample)).await?;
    }
    if let Some(query) = search {
        host.interact(id, backend, |s| s.set_search(query)).await?;
    }

    let Some(frame) = host.surface(id).and_then(|s| s.frame()) else {
        bail!("epoch {epoch} could not be loaded");
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&frame).context("failed to serialize frame")?
    );
    Ok(())
}

async fn cmd_replay(session: &Session, script: &Path, surfaces: usize) -> Result<()> {
    if surfaces == 0 {
        bail!("--surfaces must be at least 1");
    }
    let text = std::fs::read_to_string(script)
        .with_context(|| format!("failed to read {}", script.display()))?;
    let actions = replay::parse_script(&text)?;
    let meta = session.backend.meta().await.context("failed to read run metadata")?;

    let roles = [
        SurfaceRole::Plot,
        SurfaceRole::Tokens,
        SurfaceRole::Functions,
        SurfaceRole::Detail,
    ];
    let mut host = session.host();
    for i in 0..surfaces {
        host.add_surface(roles[i % roles.len()]);
    }
    host.load_content(&session.content_path(), meta).await;

    let report = replay::replay(&mut host, &session.backend, &actions).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to serialize replay report")?
    );
    Ok(())
}

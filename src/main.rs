mod artifact_fetcher;
mod candidate_resolver;
mod candidate_selector;
mod catalog_client;
mod checkpoint_store;
mod config;
mod config_persistence;
mod enrichment_manager;
mod entity;
mod error;
mod http_transport;
mod image_pipeline;
mod page_renderer;
mod shutdown_signal;
mod storefront_scraper;
#[cfg(test)]
mod test_support;
mod viewer_server;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use log::{error, info, warn, LevelFilter};

use artifact_fetcher::{ArtifactFetcher, ArtifactKind, ArtifactStore};
use candidate_selector::{AutoSelector, CandidateSelector, ConsolePrompt};
use catalog_client::{write_catalog_csv, write_catalog_json, CatalogClient};
use checkpoint_store::{CheckpointStore, CHECKPOINT_FILE_NAME};
use config::Config;
use config_persistence::{default_config_path, load_config_file, persist_config_file};
use enrichment_manager::{EnrichmentManager, EntityOutcome, NORMALIZED_DIR_NAME};
use entity::{load_entity_list, Entity};
use error::{PipelineError, Result};
use http_transport::UreqTransport;
use image_pipeline::build_normalizer;
use page_renderer::{BrowserlessRenderer, PageRenderer};
use shutdown_signal::{install_signal_handlers, ShutdownSignal};
use storefront_scraper::StorefrontResolver;

#[derive(Parser, Debug)]
#[command(
    name = "gameshelf",
    version,
    about = "Export a game library, fetch storefront cover art for it, and browse it locally"
)]
struct Cli {
    /// Config file (defaults to <config dir>/gameshelf/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Verbose logging for this crate
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the library catalog to CSV and JSON
    Export(ExportArgs),
    /// Fetch artwork for every game in the entity list, resuming by default
    Enrich(EnrichArgs),
    /// Fetch artwork for a single game
    Fetch(FetchArgs),
    /// Convert fetched square icons to WebP
    Normalize(NormalizeArgs),
    /// Serve the viewer directory on localhost
    Serve(ServeArgs),
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// CSV output path
    #[arg(long)]
    csv: Option<PathBuf>,
    /// JSON output path (viewer data and entity list)
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct EnrichArgs {
    /// Entity list (.json or .csv)
    #[arg(long)]
    entity_list: Option<PathBuf>,
    /// Output directory for artwork and the checkpoint
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    /// Ignore previous progress and start from the beginning
    #[arg(long = "no-resume", action = ArgAction::SetTrue)]
    no_resume: bool,
    /// Take the first search result instead of prompting
    #[arg(long, short = 'a', action = ArgAction::SetTrue)]
    auto: bool,
    /// Skip the WebP conversion sweep
    #[arg(long = "no-normalize", action = ArgAction::SetTrue)]
    no_normalize: bool,
}

#[derive(Debug, Args)]
struct FetchArgs {
    /// Game title to search for
    name: String,
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short = 'a', action = ArgAction::SetTrue)]
    auto: bool,
}

#[derive(Debug, Args)]
struct NormalizeArgs {
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Directory to serve
    #[arg(long)]
    root: Option<PathBuf>,
    #[arg(long = "no-browser", action = ArgAction::SetTrue)]
    no_browser: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write the default config file
    Init {
        /// Replace an existing file
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },
    /// Print the effective config
    Show,
}

fn init_logging(debug: bool) {
    let mut clog = colog::default_builder();
    clog.filter(None, LevelFilter::Info);
    if debug {
        clog.filter(Some(env!("CARGO_CRATE_NAME")), LevelFilter::Debug);
    }
    for noisy in ["ureq", "rustls", "html5ever", "selectors"] {
        clog.filter(Some(noisy), LevelFilter::Warn);
    }
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));
}

fn load_config(path: Option<&Path>) -> Config {
    match path {
        Some(path) => load_config_file(path),
        None => {
            warn!("No config directory available. Using defaults.");
            Config::default()
        }
    }
}

fn build_fetcher(config: &Config, output_dir: &Path) -> ArtifactFetcher {
    let transport = UreqTransport::new(
        &config.fetch.user_agent,
        Duration::from_secs(config.fetch.timeout_secs.max(1)),
    );
    ArtifactFetcher::new(
        Box::new(transport),
        ArtifactStore::new(output_dir),
        &config.storefront.base_url,
        config.fetch.high_res_width,
    )
}

/// Probes the browser service; unreachable is fatal before any entity runs.
fn build_resolver(
    config: &Config,
    shutdown: &Arc<ShutdownSignal>,
) -> Result<StorefrontResolver<BrowserlessRenderer>> {
    let renderer = BrowserlessRenderer::new(&config.storefront);
    renderer.probe()?;
    Ok(StorefrontResolver::new(
        renderer,
        &config.storefront.base_url,
        config.storefront.max_results,
        Duration::from_millis(config.batch.request_delay_ms),
        Arc::clone(shutdown),
    ))
}

fn build_selector(auto_select: bool, shutdown: &Arc<ShutdownSignal>) -> Box<dyn CandidateSelector> {
    if auto_select {
        Box::new(AutoSelector)
    } else {
        Box::new(ConsolePrompt::stdio(Arc::clone(shutdown)))
    }
}

fn create_output_dir(output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir).map_err(|err| PipelineError::io(output_dir, err))
}

fn run_export(config: &Config, args: ExportArgs, shutdown: &Arc<ShutdownSignal>) -> Result<()> {
    let (csv_path, json_path) = match (args.csv, args.json) {
        (None, None) => (
            Some(PathBuf::from("games.csv")),
            Some(config.batch.entity_list.clone()),
        ),
        paths => paths,
    };
    let transport = UreqTransport::new(
        &config.catalog.user_agent,
        Duration::from_secs(config.catalog.timeout_secs.max(1)),
    );
    let client = CatalogClient::new(
        Box::new(transport),
        &config.catalog.endpoint,
        Duration::from_millis(config.batch.request_delay_ms),
        Arc::clone(shutdown),
    );
    let rows = client.collect_rows()?;
    if let Some(path) = csv_path {
        write_catalog_csv(&rows, &path)?;
    }
    if let Some(path) = json_path {
        write_catalog_json(&rows, &path)?;
    }
    Ok(())
}

fn run_enrich(config: &Config, args: EnrichArgs, shutdown: &Arc<ShutdownSignal>) -> Result<()> {
    let entity_list = args
        .entity_list
        .unwrap_or_else(|| config.batch.entity_list.clone());
    let output_dir = args
        .output
        .unwrap_or_else(|| config.batch.output_dir.clone());
    let auto_select = args.auto || config.batch.auto_select;

    let entities = load_entity_list(&entity_list);
    if entities.is_empty() {
        info!("No games found in {}. Exiting.", entity_list.display());
        return Ok(());
    }

    let resolver = build_resolver(config, shutdown)?;
    create_output_dir(&output_dir)?;
    let checkpoint = CheckpointStore::open(&output_dir.join(CHECKPOINT_FILE_NAME), !args.no_resume);
    let normalizer = build_normalizer(
        config.normalize.enabled && !args.no_normalize,
        config.normalize.quality,
    );

    let mut manager = EnrichmentManager::new(
        Box::new(resolver),
        build_selector(auto_select, shutdown),
        build_fetcher(config, &output_dir),
        checkpoint,
        Arc::clone(shutdown),
    )
    .with_auto_select(auto_select)
    .with_normalizer(normalizer, (config.normalize.width, config.normalize.height));

    let summary = manager.run(&entities);
    if summary.interrupted {
        info!("Stopped on {}.", shutdown.signal_name());
    }
    Ok(())
}

fn run_fetch(config: &Config, args: FetchArgs, shutdown: &Arc<ShutdownSignal>) -> Result<()> {
    let entity = Entity::new(&args.name);
    if entity.key.is_empty() {
        return Err(PipelineError::Configuration(format!(
            "\"{}\" has no usable characters for a file name",
            args.name
        )));
    }
    let output_dir = args
        .output
        .unwrap_or_else(|| config.batch.output_dir.clone());
    let auto_select = args.auto || config.batch.auto_select;

    let resolver = build_resolver(config, shutdown)?;
    create_output_dir(&output_dir)?;
    let checkpoint = CheckpointStore::open(&output_dir.join(CHECKPOINT_FILE_NAME), true);
    let mut manager = EnrichmentManager::new(
        Box::new(resolver),
        build_selector(auto_select, shutdown),
        build_fetcher(config, &output_dir),
        checkpoint,
        Arc::clone(shutdown),
    )
    .with_auto_select(auto_select);

    match manager.run_single(&entity) {
        Ok(EntityOutcome::Done) => {
            info!("Scraping completed for {}", entity.display_name);
            Ok(())
        }
        Ok(outcome) => {
            info!("Nothing saved for {} ({:?})", entity.display_name, outcome);
            Ok(())
        }
        Err(PipelineError::Cancelled) => {
            warn!("Interrupted while processing: {}", entity.display_name);
            Ok(())
        }
        Err(error) => Err(error),
    }
}

fn run_normalize(config: &Config, args: NormalizeArgs) -> Result<()> {
    let Some(normalizer) = build_normalizer(true, config.normalize.quality) else {
        return Ok(());
    };
    let store = ArtifactStore::new(&args.output.unwrap_or_else(|| config.batch.output_dir.clone()));
    normalizer.normalize(
        &store.kind_dir(ArtifactKind::Square),
        &store.root().join(NORMALIZED_DIR_NAME),
        (config.normalize.width, config.normalize.height),
    )?;
    Ok(())
}

fn run_serve(config: &Config, args: ServeArgs, shutdown: &Arc<ShutdownSignal>) -> Result<()> {
    let root = args.root.unwrap_or_else(|| config.viewer.root.clone());
    viewer_server::run_viewer(
        &root,
        config.viewer.first_port,
        config.viewer.port_span,
        config.viewer.open_browser && !args.no_browser,
        shutdown,
    )
}

fn run_config(config: &Config, config_path: Option<&Path>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = config_path.ok_or_else(|| {
                PipelineError::Configuration("no config directory available; pass --config".to_string())
            })?;
            if path.exists() && !force {
                warn!(
                    "Config file already exists at {}. Use --force to replace it.",
                    path.display()
                );
                return Ok(());
            }
            persist_config_file(&Config::default(), path)?;
            info!("Wrote default config to {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let text = toml::to_string_pretty(config)
                .map_err(|err| PipelineError::Configuration(format!("failed to render config: {err}")))?;
            print!("{text}");
            Ok(())
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.or_else(default_config_path);
    let config = load_config(config_path.as_deref());

    let shutdown = Arc::new(ShutdownSignal::new());
    if let Err(err) = install_signal_handlers(Arc::clone(&shutdown)) {
        warn!("Failed to install signal handlers: {err}");
    }

    match cli.command {
        Command::Export(args) => run_export(&config, args, &shutdown),
        Command::Enrich(args) => run_enrich(&config, args, &shutdown),
        Command::Fetch(args) => run_fetch(&config, args, &shutdown),
        Command::Normalize(args) => run_normalize(&config, args),
        Command::Serve(args) => run_serve(&config, args, &shutdown),
        Command::Config { action } => run_config(&config, config_path.as_deref(), action),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, ConfigAction};
    use clap::{CommandFactory, Parser};

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_enrich_flags_parse() {
        let cli = Cli::try_parse_from([
            "gameshelf",
            "--debug",
            "enrich",
            "--entity-list",
            "library.csv",
            "-o",
            "covers",
            "--no-resume",
            "--auto",
            "--no-normalize",
        ])
        .expect("enrich flags should parse");
        assert!(cli.debug);
        let Command::Enrich(args) = cli.command else {
            panic!("expected enrich command");
        };
        assert_eq!(args.entity_list.as_deref(), Some(std::path::Path::new("library.csv")));
        assert_eq!(args.output.as_deref(), Some(std::path::Path::new("covers")));
        assert!(args.no_resume && args.auto && args.no_normalize);
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["gameshelf", "config", "init", "--force", "--config", "x.toml"])
            .expect("config init should parse");
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("x.toml")));
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Init { force: true }
            }
        ));
    }

    #[test]
    fn test_fetch_requires_name() {
        assert!(Cli::try_parse_from(["gameshelf", "fetch"]).is_err());
        let cli = Cli::try_parse_from(["gameshelf", "fetch", "Zelda!!", "--auto"])
            .expect("fetch should parse");
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch command");
        };
        assert_eq!(args.name, "Zelda!!");
        assert!(args.auto);
    }
}

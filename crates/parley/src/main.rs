use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley::api::{self, AppState};
use parley::chat::ChatRepository;
use parley::db::Database;
use parley::delivery::{DeliveryChannel, Mailbox};
use parley::llm::{AnthropicProvider, CompletionProvider, OpenAiProvider, ProviderRegistry};
use parley::prompt::PromptRepository;
use parley::relay::{Relay, RelayConfig};
use parley::session::SessionStore;
use parley::settings::{DeliveryMode, Settings};
use parley::ws::RelayHub;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Parley - streaming multi-provider LLM chat relay.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the relay server
    Serve(ServeCommand),
}

#[derive(Debug, Args)]
struct ServeCommand {
    /// Override the bind address from the config
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    match cli.command {
        Command::Serve(cmd) => async_serve(cli.common, cmd),
    }
}

fn init_logging(opts: &CommonOpts) {
    let default_level = if opts.quiet {
        "error"
    } else {
        match opts.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={default_level},tower_http=info")));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn async_serve(common: CommonOpts, cmd: ServeCommand) -> Result<()> {
    let mut settings = Settings::load(common.config.as_deref())?;
    if let Some(bind) = cmd.bind {
        settings.server.bind = bind;
    }

    let db = Database::open(&settings.database_path()).await?;
    info!(path = %settings.database_path().display(), "database ready");

    let prompts = PromptRepository::new(db.clone());
    let chats = ChatRepository::new(db.clone());

    let registry = Arc::new(ProviderRegistry::new(build_providers(&settings)));
    if registry.is_empty() {
        warn!("no provider API keys configured; every question will be rejected");
    } else {
        info!(models = ?registry.models(), "providers registered");
    }

    let store = Arc::new(SessionStore::new());
    let hub = Arc::new(RelayHub::new());
    let mailbox = Arc::new(Mailbox::new());

    let delivery: Arc<dyn DeliveryChannel> = match settings.delivery.mode {
        DeliveryMode::Push => hub.clone(),
        DeliveryMode::Pull => mailbox.clone(),
    };

    let relay = Arc::new(Relay::new(
        store,
        prompts.clone(),
        chats.clone(),
        registry.clone(),
        delivery,
        RelayConfig {
            user_id: settings.server.user_id.clone(),
            params: settings.generation_params(),
            first_delta_timeout: settings.first_delta_timeout(),
        },
    ));

    let state = AppState::new(
        relay,
        prompts,
        chats,
        registry,
        hub,
        mailbox,
        settings.delivery.mode,
        db,
    );

    let router = api::create_router(state);
    let addr = settings.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, mode = ?settings.delivery.mode, "parley listening");

    axum::serve(listener, router).await.context("serving")?;
    Ok(())
}

fn build_providers(settings: &Settings) -> Vec<Arc<dyn CompletionProvider>> {
    let mut providers: Vec<Arc<dyn CompletionProvider>> = Vec::new();

    let openai = &settings.providers.openai;
    if let Some(api_key) = &openai.api_key {
        providers.push(Arc::new(OpenAiProvider::new(
            api_key.clone(),
            openai.base_url.clone(),
            openai.models.clone(),
        )));
    }

    let anthropic = &settings.providers.anthropic;
    if let Some(api_key) = &anthropic.api_key {
        providers.push(Arc::new(AnthropicProvider::new(
            api_key.clone(),
            anthropic.base_url.clone(),
            anthropic.models.clone(),
        )));
    }

    providers
}

//! Panel plugin runtime CLI.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use tracing::error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use panel_plugins::{
    ManifestSource, PageEntry, PanelClient, PluginHost, PluginStatus, RuntimeConfig,
    SessionState, SidebarEntry, TabEntry, TabTarget, User,
};

/// Panel plugin runtime
#[derive(Parser)]
#[command(name = "panel")]
#[command(about = "Inspect and render Panel UI plugins")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend API root (overrides the config file)
    #[arg(long, env = "PANEL_BASE_URL")]
    base_url: Option<String>,

    /// Bearer token for the backend
    #[arg(long, env = "PANEL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the manifests served by the backend
    Manifests,

    /// Load every plugin and print the resulting registry
    Load(Identity),

    /// Render a plugin route such as /plugins/weather/
    Render {
        /// Route to render
        path: String,

        /// Props passed to the component, as JSON
        #[arg(long, default_value = "null")]
        props: String,

        #[command(flatten)]
        identity: Identity,
    },
}

/// Who the runtime should act as.
#[derive(ClapArgs)]
struct Identity {
    /// Username of the current user (anonymous if omitted)
    #[arg(long)]
    user: Option<String>,

    /// Treat the user as a root administrator
    #[arg(long, requires = "user")]
    admin: bool,
}

impl Identity {
    fn session(&self) -> Arc<SessionState> {
        let session = SessionState::new();
        session.set_user(self.user.as_ref().map(|name| {
            if self.admin {
                User::admin(name.clone(), name.clone())
            } else {
                User::new(name.clone(), name.clone())
            }
        }));
        Arc::new(session)
    }
}

#[derive(Serialize)]
struct Registry {
    plugins: Vec<PluginStatus>,
    pages: Vec<PageEntry>,
    server_tabs: Vec<TabEntry>,
    user_settings_tabs: Vec<TabEntry>,
    sidebar: Vec<SidebarEntry>,
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match RuntimeConfig::default_path().filter(|p| p.exists()) {
            Some(path) => RuntimeConfig::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => RuntimeConfig::default(),
        },
    };

    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(token) = &args.token {
        config.api_token = Some(token.clone());
    }

    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;

    match &args.command {
        Command::Manifests => {
            let source = ManifestSource::new(PanelClient::new(&config)?);
            let manifests = source.try_fetch_manifests().await?;
            print_json(&manifests)
        }
        Command::Load(identity) => {
            let host = PluginHost::new(config, identity.session())?;
            host.load_all_plugins().await;

            print_json(&Registry {
                plugins: host.plugin_statuses(),
                pages: host.get_pages(),
                server_tabs: host.get_tabs(TabTarget::Server),
                user_settings_tabs: host.get_tabs(TabTarget::UserSettings),
                sidebar: host.get_sidebar_items(),
            })
        }
        Command::Render {
            path,
            props,
            identity,
        } => {
            let props = serde_json::from_str(props).context("--props must be valid JSON")?;
            let host = PluginHost::new(config, identity.session())?;
            host.load_all_plugins().await;

            let view = host.render_path(path, props).await.into_view();
            print_json(&view)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_logs);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

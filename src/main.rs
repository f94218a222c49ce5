use anyhow::Result;
use clap::{CommandFactory, Parser};
use picvoice::cli::{Cli, Commands, ConfigAction};
use picvoice::config::Config;
use picvoice::diagnostics::check_dependencies;
use picvoice::server::run_server;
use std::path::Path;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match &cli.command {
        None | Some(Commands::Serve) => {
            let config = load_config(&cli)?;
            tracing::info!("Starting picvoice {}", picvoice::version_string());
            run_server(config).await?;
        }
        Some(Commands::Check) => {
            let config = load_config(&cli)?;
            if !check_dependencies(&config) {
                std::process::exit(1);
            }
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, &cli)?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "picvoice",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins over `-q`/`-v`.
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.log_filter().into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load configuration with precedence CLI > environment > file > defaults.
fn load_config(cli: &Cli) -> Result<Config> {
    let config = match cli.config.as_deref() {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    let mut config = config.with_env_overrides();

    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(device) = cli.device {
        config.caption.device = device;
        config.synthesis.device = device;
    }

    config.validate()?;
    Ok(config)
}

fn handle_config_command(action: &ConfigAction, cli: &Cli) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(cli)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
            if !Path::new(&path).exists() {
                eprintln!("(file does not exist; built-in defaults are used)");
            }
        }
    }
    Ok(())
}

mod init;
mod logo;
mod render;
mod repl;
mod settings;

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use mashell_agent::{
    ApprovalChannel, ConsoleApprovalChannel, LocalExecutionEnvironment, PermissionPolicy, Session,
    SessionConfig, UnavailableApprovalChannel,
};
use mashell_llm::{Client, OpenAiCompatibleAdapter, TracingMiddleware};
use render::ConsoleRenderer;
use settings::{CliOverrides, ResolvedSettings, SettingsError};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const VERBOSE_FILTER: &str = "mashell=debug,mashell_agent=debug,mashell_llm=debug";

#[derive(Parser, Debug)]
#[command(name = "mashell", version)]
#[command(about = "AI-powered command line assistant")]
#[command(after_help = "Examples:
  mashell                                   start interactive mode (runs setup if no config)
  mashell init                              interactive setup wizard
  mashell --provider ollama --model qwen2.5:14b \"list files\"
  mashell --profile work \"refactor this code\"
  mashell -y \"update all packages\"          approve every action (use with caution)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Task prompt. Without one, MaShell starts an interactive session.
    prompt: Option<String>,
    /// LLM provider (openai, azure, ollama)
    #[arg(long)]
    provider: Option<String>,
    /// API endpoint URL
    #[arg(long)]
    url: Option<String>,
    /// API key (not needed for local models)
    #[arg(long)]
    key: Option<String>,
    /// Model name (or deployment name for Azure)
    #[arg(long)]
    model: Option<String>,
    /// Use a saved profile from the config file
    #[arg(long)]
    profile: Option<String>,
    /// Path to the config file (default ~/.mashell/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Approve every action without asking (use with caution)
    #[arg(short = 'y', long, action = ArgAction::SetTrue)]
    yes: bool,
    /// Show per-step diagnostics and full action output
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
    /// Skip the startup logo
    #[arg(long = "no-logo", global = true, action = ArgAction::SetTrue)]
    no_logo: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive configuration wizard
    Init,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { VERBOSE_FILTER } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> Result<ExitCode, String> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => settings::default_config_path().map_err(|error| error.to_string())?,
    };

    if matches!(cli.command, Some(Commands::Init)) {
        if !cli.no_logo {
            logo::print_logo();
        }
        init::run_init(&config_path)?;
        return Ok(ExitCode::SUCCESS);
    }

    let file = settings::load_config_file(&config_path).map_err(|error| error.to_string())?;
    if file.is_none() && cli.config.is_some() {
        return Err(SettingsError::ConfigNotFound { path: config_path }.to_string());
    }

    let overrides = CliOverrides {
        provider: cli.provider.clone(),
        url: cli.url.clone(),
        key: cli.key.clone(),
        model: cli.model.clone(),
        profile: cli.profile.clone(),
    };
    let resolved =
        settings::resolve_settings(file.as_ref(), &overrides, |name| std::env::var(name).ok());
    let resolved = match resolved {
        Ok(resolved) => resolved,
        Err(_) if file.is_none() && overrides.is_empty() && is_interactive_terminal() => {
            if !cli.no_logo {
                logo::print_logo();
            }
            println!(
                "{} Let's set up MaShell!",
                "No configuration found.".yellow()
            );
            init::run_init(&config_path)?;
            return Ok(ExitCode::SUCCESS);
        }
        Err(error) => {
            return Err(format!(
                "{error}\nRun `mashell init` for interactive setup, or use --help for options."
            ));
        }
    };

    if !cli.no_logo {
        logo::print_logo();
    }
    let mut session = build_session(&cli, &resolved)?;

    let code = match cli.prompt.as_deref() {
        Some(prompt) => match session.submit(prompt).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(error) if error.is_abort() => ExitCode::from(2),
            Err(error) => {
                eprintln!("{} {error}", "error:".red().bold());
                ExitCode::from(1)
            }
        },
        None => {
            repl::run_repl(&mut session).await?;
            ExitCode::SUCCESS
        }
    };

    session.close().await.map_err(|error| error.to_string())?;
    Ok(code)
}

fn build_session(cli: &Cli, resolved: &ResolvedSettings) -> Result<Session, String> {
    debug!(
        provider = resolved.flavor.as_str(),
        url = %resolved.url,
        model = %resolved.model,
        profile = ?resolved.profile,
        "provider settings resolved"
    );
    if resolved.flavor.requires_key() && resolved.key.is_none() {
        warn!(
            provider = resolved.flavor.as_str(),
            "no API key configured; requests will likely be rejected"
        );
    }

    let adapter =
        OpenAiCompatibleAdapter::new(resolved.flavor, resolved.url.clone(), resolved.key.clone())
            .map_err(|error| error.to_string())?;
    let mut client = Client::default();
    client.register_provider(Arc::new(adapter));
    client.add_middleware(Arc::new(TracingMiddleware));

    let (policy, report) = PermissionPolicy::from_config(&resolved.permissions, cli.yes);
    for entry in &report.rejected {
        eprintln!(
            "{} ignoring unknown permission entry '{entry}'",
            "warning:".yellow()
        );
    }

    let approval_channel: Arc<dyn ApprovalChannel> = if std::io::stdin().is_terminal() {
        Arc::new(ConsoleApprovalChannel)
    } else {
        Arc::new(UnavailableApprovalChannel)
    };
    let working_dir = std::env::current_dir().map_err(|error| error.to_string())?;

    Session::new_with_emitter(
        Arc::new(client),
        resolved.model.clone(),
        Arc::new(LocalExecutionEnvironment::new(working_dir)),
        policy,
        approval_channel,
        SessionConfig::default(),
        Arc::new(ConsoleRenderer::new(cli.verbose)),
    )
    .map_err(|error| error.to_string())
}

fn is_interactive_terminal() -> bool {
    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}

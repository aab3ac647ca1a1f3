use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use release_gate::config::{CoordinatorKind, GateConfig};
use release_gate::coordinator::{
    AfterAllCoordinator, Coordinator, FlagCoordinator, TravisDeployOnce,
};
use release_gate::env::EnvSnapshot;
use release_gate::platform::github::GitHubMetadata;
use release_gate::{Outcome, PublishGate};

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "release-gate", about = "Decide whether this CI build may publish a release")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Branch releases are published from
    #[arg(long)]
    branch: Option<String>,

    /// Repository URL used to look up visibility
    #[arg(long)]
    repository_url: Option<String>,

    /// Build-leader protocol
    #[arg(long, value_enum)]
    coordinator: Option<CoordinatorKind>,

    /// Output format for the decision
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for the decision
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let outcome = match run(&cli).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "Could not evaluate publish conditions");
            return ExitCode::from(2);
        }
    };

    if let Err(e) = print_outcome(&outcome, cli.format) {
        tracing::error!(error = %e, "Failed to write decision");
        return ExitCode::from(2);
    }

    match outcome {
        Outcome::Proceed => ExitCode::SUCCESS,
        Outcome::Blocked { .. } => ExitCode::from(1),
        Outcome::Failed(_) => ExitCode::from(2),
    }
}

async fn run(cli: &Cli) -> anyhow::Result<Outcome> {
    let env = EnvSnapshot::from_process();

    let mut config = GateConfig::load(cli.config.as_deref())?;
    if let Some(branch) = &cli.branch {
        config.branch = branch.clone();
    }
    if let Some(url) = &cli.repository_url {
        config.repository_url = Some(url.clone());
    }
    if let Some(kind) = cli.coordinator {
        config.coordinator = kind;
    }
    config.validate()?;
    let config = config.resolve(&env);

    tracing::info!(
        branch = %config.branch,
        coordinator = ?config.coordinator,
        "Verifying publish conditions"
    );

    let coordinator: Arc<dyn Coordinator> = match config.coordinator {
        CoordinatorKind::DeployOnce => Arc::new(TravisDeployOnce::new(&config.travis)),
        CoordinatorKind::Flags => Arc::new(FlagCoordinator),
        CoordinatorKind::AfterAll => Arc::new(AfterAllCoordinator::new(&config.after_all)),
    };

    let mut gate = PublishGate::new(coordinator);
    // Visibility only selects the Travis endpoint for deploy-once
    if config.coordinator == CoordinatorKind::DeployOnce && config.repository_url.is_some() {
        gate = gate.with_metadata(Arc::new(GitHubMetadata::new(&config.github)?));
    }

    Ok(gate.evaluate(&config, &env).await)
}

fn print_outcome(outcome: &Outcome, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&outcome.report())?),
        OutputFormat::Text => match outcome {
            Outcome::Proceed => println!("Publishing allowed."),
            Outcome::Blocked { reason, message } => println!("{reason}: {message}"),
            Outcome::Failed(e) => println!("{}: {e}", e.code()),
        },
    }
    Ok(())
}

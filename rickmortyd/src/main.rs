use rickmortyd::daemon::{DaemonConfig, DaemonRuntime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Once,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--once" => mode = CliMode::Once,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rickmortyd=info,rickmorty_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: rickmortyd [--once]");
        println!("  --once   Run a single sync pass and exit");
        println!("While running, send SIGHUP to trigger a sync immediately.");
        return Ok(());
    }

    let config = DaemonConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    match mode {
        CliMode::Once => {
            let report = daemon.run_once().await?;
            tracing::info!(?report, "sync pass complete");
            Ok(())
        }
        _ => daemon.run().await,
    }
}

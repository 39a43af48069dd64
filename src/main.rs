use transcribe_relay::app::Application;
use transcribe_relay::config;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::Config::load_or_exit();
    let app = Application::build(config)?;
    app.start()?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(async {
        tokio::select! {
            res = app.run_observability() => res,
            _ = shutdown_signal() => Ok(()),
        }
    });

    app.stop();
    result
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!(target: "main", "shutdown signal received");
}

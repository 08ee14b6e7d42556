mod app;
mod workers;

use crate::app::Args;
use qrdrop::utils::stop::StopSignal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::load();

    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Logs go to stderr so stdout stays clean for the signal string,
    // progress lines, and chat.
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let stop = StopSignal::new();

    // Ctrl+C handler
    let stop_clone = stop.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        stop_clone.cancel();
    });

    workers::cli::run(args, stop).await
}

use agency_lottery::{
    config::ServerArgs,
    server::{Server, StopHandle},
};
use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // connect tracing to stdout
    tracing_subscriber::fmt::init();

    let config = ServerArgs::parse()
        .into_config()
        .context("invalid server configuration")?;
    tracing::debug!("loaded configuration: {:?}", config);

    let server = Server::bind(config).await?;
    tracing::info!("server listening on: {}", server.local_addr()?);

    let terminate = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    tokio::spawn(stop_on_signal(terminate, server.stop_handle()));

    server.run().await;

    Ok(())
}

async fn stop_on_signal(mut terminate: tokio::signal::unix::Signal, handle: StopHandle) {
    loop {
        tokio::select! {
            _ = terminate.recv() => tracing::info!("received SIGTERM"),
            _ = tokio::signal::ctrl_c() => tracing::info!("received Ctrl-C"),
        }

        if let Err(err) = handle.stop() {
            tracing::warn!("{}", err);
        }
    }
}

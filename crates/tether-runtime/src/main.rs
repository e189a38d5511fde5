//! tether: command-line front end for the motion controller.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use tether_core::TetherConfig;
use tether_core::session::SessionState;
use tether_core::types::TargetSnapshot;
use tether_runtime::controller::{Controller, ControllerHandle};
use tether_runtime::dispatcher::Dispatcher;
use tether_runtime::link::{HttpLink, RobotLink};
use tether_runtime::settings::{self, Overrides};
use tether_runtime::telemetry::{self, DEFAULT_RECONNECT_DELAY};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("TETHER_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let overrides = Overrides {
        base_url: args.base_url,
        telemetry_url: args.telemetry_url,
    };
    let config = settings::load_config(args.config.as_deref(), &overrides)?;

    match args.command {
        cli::Command::Run(opts) => run(config, &opts).await?,
        cli::Command::Status => {
            let link = HttpLink::new(&config.link)?;
            let status = link
                .check_liveness()
                .await
                .with_context(|| format!("daemon unreachable at {}", link.status_url()))?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        cli::Command::Move(opts) => {
            let target = config.limits.clamp(&TargetSnapshot::REST.merged(&opts.patch()));
            send_once(&config, target).await?;
            println!("{target}");
        }
        cli::Command::Reset => {
            send_once(&config, TargetSnapshot::REST).await?;
            println!("{}", TargetSnapshot::REST);
        }
        cli::Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn send_once(config: &TetherConfig, target: TargetSnapshot) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new(Arc::new(HttpLink::new(&config.link)?));
    dispatcher
        .force_send(target)
        .await
        .context("send task panicked")?
        .with_context(|| format!("set_target failed against {}", config.link.base_url))
}

async fn run(config: TetherConfig, opts: &cli::RunOpts) -> anyhow::Result<()> {
    tracing::info!(base_url = %config.link.base_url, "tether starting");

    let link = Arc::new(HttpLink::new(&config.link)?);
    let telemetry_url = config.link.telemetry_url.clone();
    let (handle, controller_task) = Controller::spawn(config, link.clone());

    handle.connect(opts.context()).await?;
    handle.request_start().await?;
    if let Err(e) = link.check_liveness().await {
        handle.disconnect().await?;
        handle.shutdown().await;
        return Err(e).with_context(|| format!("daemon unreachable at {}", link.status_url()));
    }
    handle.startup_succeeded().await?;

    let subscription = (!opts.no_telemetry)
        .then(|| telemetry::subscribe_telemetry(telemetry_url, handle.clone(), DEFAULT_RECONNECT_DELAY));

    let outcome = tokio::select! {
        result = shutdown_signal() => result,
        result = watch_session(&handle) => result,
    };

    if let Some(subscription) = subscription {
        subscription.unsubscribe().await;
    }
    if let Err(e) = handle.disconnect().await {
        tracing::warn!(error = %e, "disconnect failed");
    }
    handle.shutdown().await;
    if controller_task.await.is_err() {
        tracing::warn!("controller task panicked");
    }

    let counts = handle.dispatch_counts();
    tracing::info!(
        throttled = counts.throttled,
        forced = counts.forced,
        failures = counts.failures,
        "tether stopped"
    );
    outcome
}

/// Log session changes; returns an error once the session crashes.
async fn watch_session(handle: &ControllerHandle) -> anyhow::Result<()> {
    let mut status = handle.watch_status();
    loop {
        if status.changed().await.is_err() {
            anyhow::bail!("controller stopped unexpectedly");
        }
        let current = status.borrow_and_update().clone();
        tracing::info!(state = %current.state, "session state");
        if let Some(fault) = &current.hardware_fault {
            tracing::warn!(fault = %fault, "hardware fault");
        }
        if current.state == SessionState::Crashed {
            anyhow::bail!(
                "daemon stopped answering ({} consecutive liveness failures)",
                current.consecutive_failures
            );
        }
    }
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to register SIGTERM handler")?;
        tokio::select! {
            _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }

    Ok(())
}

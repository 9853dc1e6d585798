// IPND Linux: beacon advertising and neighbor discovery daemon.

mod config;
mod discovery;
mod interfaces;
mod router;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use ipnd_core::Advertiser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use router::{JsonLinesRouter, RouterLink};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut print_beacon = false;
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("ipnd-linux {}", VERSION);
            return Ok(());
        }
        if arg == "--print-beacon" {
            print_beacon = true;
        }
    }

    // stdout carries the router link; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cfg = config::load();
    let services = interfaces::advertised_services(
        &interfaces::SystemInterfaces,
        cfg.cla_port,
        cfg.include_loopback,
    )
    .context("enumerating network interfaces")?;
    for s in &services {
        info!("advertising {}", s.cla_address().unwrap_or_default());
    }

    if print_beacon {
        let frame = Advertiser::new(cfg.node_eid.clone(), cfg.period, services).next_beacon()?;
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&frame)?;
        stdout.flush()?;
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let mut link = JsonLinesRouter::new(cfg.node_eid.clone(), tokio::io::stdout());
        let own_eid = link
            .register(&cfg.identity_suffix())
            .await
            .context("registering with router")?;
        info!("advertising {} (period: {}s)", own_eid, cfg.period);
        let router = Arc::new(tokio::sync::Mutex::new(link));

        tokio::select! {
            res = discovery::run_discovery(cfg, own_eid, services, router) => {
                res.context("discovery stopped")?;
            }
            res = shutdown_signal() => {
                res?;
                info!("shutting down");
            }
        }
        Ok::<(), anyhow::Error>(())
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

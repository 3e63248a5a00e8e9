//! The swarmscan daemon.
//!
//! Runs the periodic container jobs, answers the filtering proxy and serves
//! peers over HTTP until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use swarmscan_core::{Digest, ScanLog};
use swarmscan_p2p::{
    scanner_by_name, serve_proxy, ActiveScanResponder, ContainerManager, DecisionEngine, HttpRetriever,
    HttpTransport, MemoryStore, PeerTransport, Relationship, RpcService, ScanContext, Store,
};
use tokio::net::TcpListener;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{Config, PeerConfig};
use crate::{http, logging, output};

#[derive(Args)]
pub struct ServeArgs {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Run the serve command.
pub async fn run(args: ServeArgs) -> i32 {
    let config = match Config::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            output::error(&format!("{:#}", e));
            return 1;
        }
    };
    if let Err(e) = logging::init(&config.general.log_level, config.general.log_format) {
        output::error(&e.to_string());
        return 1;
    }

    match serve(config).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %format!("{:#}", e), "daemon stopped");
            output::error(&format!("{:#}", e));
            1
        }
    }
}

/// Sync configured peers into the store. Real distances follow the config,
/// outstanding punishment is kept.
fn apply_peers(store: &dyn Store, peers: &[PeerConfig]) {
    for entry in peers {
        store.upsert_peer(entry.to_peer());
        let relationship = match store.relationship(&entry.name) {
            Some(mut rel) => {
                rel.set_real_distance(entry.distance);
                rel
            }
            None => Relationship::new(&entry.name, entry.distance),
        };
        store.upsert_relationship(relationship);
    }
    info!(peers = peers.len(), "peers configured");
}

fn snapshot(store: &MemoryStore, path: &Path) {
    if let Err(e) = store.snapshot(path) {
        warn!(path = %path.display(), error = %e, "failed to write store snapshot");
    }
}

fn ticker(secs: u64) -> tokio::time::Interval {
    let mut timer = interval(Duration::from_secs(secs.max(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let owner = config.general.owner.clone();
    let policy = config.policy_kind()?.build();
    let scanner = scanner_by_name(&config.scanning.handler)?;

    let snapshot_path = config.snapshot_path();
    let store = Arc::new(MemoryStore::open(&snapshot_path)?);
    apply_peers(store.as_ref(), &config.peers);

    let transport: Arc<dyn PeerTransport> = Arc::new(HttpTransport::new());
    let scanning = config.scanning_settings();
    let retriever = Arc::new(HttpRetriever::new(scanning.download_dir.clone(), scanning.network_timeout));

    let manager_settings = config.manager_settings();
    let digests: Arc<ContainerManager<Digest>> = Arc::new(
        ContainerManager::open(&owner, manager_settings.clone(), store.clone(), transport.clone(), scanner.clone())
            .context("opening digest manager")?,
    );
    let logs: Arc<ContainerManager<ScanLog>> = Arc::new(
        ContainerManager::open(&owner, manager_settings, store.clone(), transport.clone(), scanner.clone())
            .context("opening log manager")?,
    );

    let ctx = Arc::new(ScanContext {
        owner: owner.clone(),
        store: store.clone(),
        transport,
        retriever,
        scanner,
        digests: digests.clone(),
        logs: logs.clone(),
        scanning,
        decision: config.decision_settings(),
    });
    let engine = Arc::new(DecisionEngine::new(ctx.clone(), policy));
    let responder = ActiveScanResponder::new(ctx);

    let proxy_listener = TcpListener::bind(&config.core.listen)
        .await
        .with_context(|| format!("binding proxy listener {}", config.core.listen))?;
    let http_addr = format!("{}:{}", config.sharing.host, config.sharing.port);
    let http_listener = TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("binding peer endpoint {}", http_addr))?;
    let app = http::router(RpcService::new(&owner, store.clone()), config.share_dir(), &config.sharing.share_root);

    let mut proxy_task = tokio::spawn(serve_proxy(proxy_listener, engine.clone()));
    let mut http_task = tokio::spawn(async move { axum::serve(http_listener, app).await });

    info!(
        %owner,
        policy = %engine.policy().kind(),
        proxy = %config.core.listen,
        peers = %http_addr,
        "swarmscan core running"
    );
    output::success(&format!("swarmscan core running as '{}'", owner));
    output::kv("Proxy", &config.core.listen);
    output::kv("Peers", &http_addr);
    output::kv("Policy", &engine.policy().kind().to_string());
    output::info("Press Ctrl-C to stop");

    let cm = &config.container_manager;
    let mut update_timer = ticker(cm.update_interval);
    let mut retrieve_timer = ticker(cm.retrieve_interval);
    let mut redemption_timer = ticker(cm.redemption_interval);
    let mut scan_timer = ticker(cm.active_scan_interval);

    let outcome = loop {
        tokio::select! {
            _ = update_timer.tick() => {
                // Logs only take digested scans
                if let Err(e) = digests.update_ours().await {
                    warn!(error = %e, "digest update failed");
                }
                if let Err(e) = logs.update_ours().await {
                    warn!(error = %e, "log update failed");
                }
            }

            _ = retrieve_timer.tick() => {
                for (kind, result) in [
                    ("digest", digests.retrieve_offers().await),
                    ("log", logs.retrieve_offers().await),
                ] {
                    match result {
                        Ok(0) => {}
                        Ok(n) => info!(kind, retrieved = n, "containers retrieved"),
                        Err(e) => warn!(kind, error = %e, "offer retrieval failed"),
                    }
                }
            }

            _ = redemption_timer.tick() => {
                digests.redeem_relationships();
            }

            _ = scan_timer.tick() => {
                match responder.perform_requested_scan().await {
                    Ok(true) => debug!("requested scan handled"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "requested scan failed"),
                }
            }

            res = &mut proxy_task => {
                break match res {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(anyhow::anyhow!("proxy listener failed: {}", e)),
                    Err(e) => Err(anyhow::anyhow!("proxy listener panicked: {}", e)),
                };
            }

            res = &mut http_task => {
                break match res {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(anyhow::anyhow!("peer endpoint failed: {}", e)),
                    Err(e) => Err(anyhow::anyhow!("peer endpoint panicked: {}", e)),
                };
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break Ok(());
            }
        }
        snapshot(&store, &snapshot_path);
    };

    proxy_task.abort();
    http_task.abort();
    if let Err(e) = digests.flush().await {
        warn!(error = %e, "failed to save digest");
    }
    if let Err(e) = logs.flush().await {
        warn!(error = %e, "failed to save log");
    }
    snapshot(&store, &snapshot_path);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmscan_p2p::Peer;

    fn entry(name: &str, distance: f64) -> PeerConfig {
        PeerConfig {
            name: name.into(),
            url: format!("http://{}", name),
            distance,
            timeout: None,
        }
    }

    #[test]
    fn test_apply_peers_creates_relationships() {
        let store = MemoryStore::new();
        apply_peers(&store, &[entry("bob", 2.0), entry("carol", 4.0)]);

        assert_eq!(store.peers().len(), 2);
        let within: Vec<String> = store.peers_within(3.0).into_iter().map(|(p, _)| p.name).collect();
        assert_eq!(within, vec!["bob".to_string()]);
    }

    #[test]
    fn test_apply_peers_keeps_punishment() {
        let store = MemoryStore::new();
        store.upsert_peer(Peer::new("bob", "http://bob"));
        let mut rel = Relationship::new("bob", 2.0);
        rel.punish(3.0);
        store.upsert_relationship(rel);

        apply_peers(&store, &[entry("bob", 2.0)]);
        let rel = store.relationship("bob").unwrap();
        assert_eq!(rel.real_distance, 2.0);
        assert_eq!(rel.perceived_distance, 6.0);
    }
}

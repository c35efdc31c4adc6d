//! Node assembly
//!
//! Builds every service from the configuration and roots all long-lived
//! tasks in one shutdown signal: subscriptions, the retention sweeper, the
//! proof timer, the registry heartbeat, the snapshot broadcaster and the
//! reputation pruner all stop between ticks when it fires.

use crate::config::Config;
use anyhow::Context;
use matching_engine::Engine;
use network::{
    run_pruner, Gossip, Host, HostConfig, NodeKey, ReceptionGuard, Reputation, SyncServer,
    TradeSource,
};
use pipeline::{restore_books, run_snapshot_broadcast, OrderHandlerBuilder, SubscriberSet};
use proof::{Collector, ProofConfig, ProofEmitter, SignerError};
use router::{CapacityFn, Publisher, Registry, Router};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use store::{run_retention, Store};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use types::proof::NodeType;

pub struct Node {
    pub peer_id: String,
    pub store: Arc<Store>,
    pub host: Arc<Host>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Construct and start every service for `config`. Errors here are
    /// fatal startup failures.
    pub async fn start(config: Config, shutdown: watch::Receiver<bool>) -> anyhow::Result<Self> {
        let data_dir = config.node.data_dir.clone();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("create data dir {}", data_dir.display()))?;

        let node_key = Arc::new(NodeKey::load_or_create(&data_dir).context("node key")?);
        let peer_id = node_key.peer_id();
        info!(peer_id = %peer_id, node_type = config.node.node_type.as_str(), "node starting");

        let store = Arc::new(Store::open(&data_dir).await.context("open store")?);

        // Gossip fabric behind the reception guard; the relayed-bytes
        // counter is shared with the proof collector.
        let relayed_bytes = Arc::new(AtomicU64::new(0));
        let reputation = Arc::new(Reputation::new());
        let guard = Arc::new(ReceptionGuard::new(
            config.relay.rate_limit_bytes_per_sec_per_peer,
            config.relay.rate_limit_msgs_per_sec_per_peer,
            Arc::clone(&reputation),
            Arc::clone(&relayed_bytes),
        ));
        let gossip = Arc::new(Gossip::new(peer_id.clone()));

        let sync_server = if config.node.node_type == NodeType::Storage {
            let source: Arc<dyn TradeSource> = Arc::clone(&store) as Arc<dyn TradeSource>;
            Some(SyncServer::new(source, config.storage.retention_months))
        } else {
            None
        };

        let host = Host::start(
            HostConfig {
                listen: config.listen_multiaddrs()?,
                dial_timeout: Duration::from_secs(10),
                nat_port_map: true,
            },
            peer_id.clone(),
            Arc::clone(&gossip),
            Arc::clone(&guard),
            sync_server,
            shutdown.clone(),
        )
        .await
        .context("start host")?;

        let bootstrap = config.bootstrap_multiaddrs()?;
        if !bootstrap.is_empty() {
            let host = Arc::clone(&host);
            tokio::spawn(async move {
                let connected = host.connect_bootstrap(&bootstrap).await;
                info!(connected, "bootstrap dialing finished");
            });
        }

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tasks.push(tokio::spawn(run_pruner(Arc::clone(&guard), shutdown.clone())));

        // The engine exists on every node type so cancels, broadcast trades
        // and snapshot divergence checks keep working; only matching nodes
        // own pairs and heartbeat. Books are reloaded from persisted open
        // orders on every node type so received snapshots have a local view
        // to compare against.
        let engine = Arc::new(Engine::new(config.matching.pairs.clone()));
        let restored = restore_books(&engine, &store, unix_now())
            .await
            .context("restore books")?;
        if restored > 0 {
            info!(restored, "order books restored from store");
        }
        let router = Arc::new(Router::new(peer_id.clone()));
        let is_match_node = config.node.node_type == NodeType::Match;

        let registry = if is_match_node {
            for pair in config.matching.pairs.keys() {
                engine.ensure_pair(pair);
            }

            let publish: Publisher = {
                let gossip = Arc::clone(&gossip);
                Arc::new(move |topic: &str, payload: &str| gossip.publish(topic, payload))
            };
            let capacity: CapacityFn = {
                let engine = Arc::clone(&engine);
                Arc::new(move || engine.order_count() as u64)
            };
            let owned_pairs: Vec<String> = config.matching.pairs.keys().cloned().collect();
            router.register_node(&peer_id, &owned_pairs, 0, unix_now());

            let registry = Arc::new(Registry::new(
                Arc::clone(&router),
                owned_pairs,
                publish,
                capacity,
            ));
            tasks.push(tokio::spawn(Arc::clone(&registry).run(shutdown.clone())));
            tasks.push(tokio::spawn(run_snapshot_broadcast(
                Arc::clone(&engine),
                Arc::clone(&gossip),
                shutdown.clone(),
            )));
            Some(registry)
        } else {
            None
        };

        let handler = Arc::new(
            OrderHandlerBuilder::new(
                Arc::clone(&store),
                Arc::clone(&engine),
                Arc::clone(&router),
                Arc::clone(&gossip),
            )
            .build(),
        );
        let subscriber_set = SubscriberSet {
            handler,
            registry,
            owned_pairs: if is_match_node {
                config.matching.pairs.keys().cloned().collect()
            } else {
                Vec::new()
            },
            persist_snapshots: config.node.node_type == NodeType::Storage,
        };
        tasks.extend(subscriber_set.spawn(Arc::clone(&gossip), shutdown.clone()));

        // Operator-configured extra topics are observed and logged only.
        for topic in &config.network.topics {
            let mut subscription = gossip.subscribe(topic);
            let topic = topic.clone();
            let mut shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        message = subscription.next() => {
                            let Some(message) = message else { return };
                            info!(topic = %topic, from = %message.from, bytes = message.data.len(), "topic message");
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                }
            }));
        }

        if config.node.node_type == NodeType::Storage {
            tasks.push(tokio::spawn(run_retention(
                Arc::clone(&store),
                config.storage.retention_months,
                shutdown.clone(),
            )));
        }

        let collector = Arc::new(Collector::new(Arc::clone(&relayed_bytes)));
        let signer = {
            let node_key = Arc::clone(&node_key);
            Arc::new(move |payload: &[u8]| Ok::<[u8; 64], SignerError>(node_key.sign(payload)))
        };
        let emitter = Arc::new(ProofEmitter::new(
            ProofConfig {
                node_type: config.node.node_type,
                period_days: config.metrics.proof_period_days,
                data_dir: data_dir.clone(),
                output_dir: config.proof_output_dir(),
            },
            peer_id.clone(),
            signer,
            collector,
            if is_match_node {
                Some(Arc::clone(&engine))
            } else {
                None
            },
        ));
        tasks.push(tokio::spawn(emitter.run(shutdown.clone())));

        Ok(Self {
            peer_id,
            store,
            host,
            tasks,
        })
    }

    /// Wait for every rooted task to observe shutdown, then flush the store.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "task ended abnormally");
                }
            }
        }
        self.store.close().await;
        info!("node stopped");
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

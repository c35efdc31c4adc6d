//! Network host
//!
//! TCP listeners on the configured multiaddrs, outbound dials with a 10 s
//! deadline, and per-connection protocol selection: a one-line hello names
//! either the gossip link protocol or the trade-sync stream protocol.
//! Gossip links run a reader task (reception guard -> fabric) and a writer
//! task fed by the fabric's flood queue.

use crate::gossip::{Gossip, GossipFrame, LINK_QUEUE_CAPACITY};
use crate::guard::ReceptionGuard;
use crate::multiaddr::Multiaddr;
use crate::sync::{parse_response, SyncServer, SyncTradesRequest, TradeSource};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use types::message::PROTOCOL_SYNC_TRADES;
use types::trade::Trade;

/// Link protocol spoken after the hello on long-lived peer connections.
pub const PROTOCOL_GOSSIP: &str = "/p2p-exchange/gossip/1.0.0";

/// Bootstrap dials: attempts per peer and per-attempt deadline.
const BOOTSTRAP_ATTEMPTS: u32 = 3;
const BOOTSTRAP_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read deadline for a sync response line.
const SYNC_READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum HostError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("dial {addr} timed out")]
    DialTimeout { addr: String },

    #[error("dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("handshake with {addr} failed: {reason}")]
    Handshake { addr: String, reason: String },

    #[error("stream i/o: {0}")]
    Io(#[from] io::Error),

    #[error("no response from peer")]
    NoResponse,

    #[error("malformed sync response: {0}")]
    BadResponse(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hello {
    peer_id: String,
    protocol: String,
}

pub struct HostConfig {
    pub listen: Vec<Multiaddr>,
    pub dial_timeout: Duration,
    /// Request UPnP mappings for the bound listener ports.
    pub nat_port_map: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen: vec![Multiaddr::ip4("0.0.0.0", 4001)],
            dial_timeout: Duration::from_secs(10),
            nat_port_map: true,
        }
    }
}

pub struct Host {
    peer_id: String,
    gossip: Arc<Gossip>,
    guard: Arc<ReceptionGuard>,
    sync: Option<SyncServer<Arc<dyn TradeSource>>>,
    listen_addrs: Vec<SocketAddr>,
    dial_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Host {
    /// Bind every configured listener and start accepting. The returned
    /// handle is shared by dial sites and the node wiring.
    pub async fn start(
        config: HostConfig,
        peer_id: String,
        gossip: Arc<Gossip>,
        guard: Arc<ReceptionGuard>,
        sync: Option<SyncServer<Arc<dyn TradeSource>>>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<Self>, HostError> {
        let mut listeners = Vec::new();
        let mut listen_addrs = Vec::new();
        for addr in &config.listen {
            let listener = TcpListener::bind(addr.socket_string())
                .await
                .map_err(|source| HostError::Bind {
                    addr: addr.to_string(),
                    source,
                })?;
            let local = listener.local_addr()?;
            info!(
                addr = %format!("/ip4/{}/tcp/{}/p2p/{}", local.ip(), local.port(), peer_id),
                "listening"
            );
            listen_addrs.push(local);
            listeners.push(listener);
        }

        let host = Arc::new(Self {
            peer_id,
            gossip,
            guard,
            sync,
            listen_addrs,
            dial_timeout: config.dial_timeout,
            shutdown,
        });
        for listener in listeners {
            tokio::spawn(accept_loop(Arc::clone(&host), listener));
        }
        if config.nat_port_map {
            let ports: Vec<u16> = host.listen_addrs.iter().map(|a| a.port()).collect();
            tokio::spawn(crate::nat::run_port_mapping(ports, host.shutdown.clone()));
        }
        Ok(host)
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Actually bound listener addresses (ports resolved).
    pub fn listen_addrs(&self) -> &[SocketAddr] {
        &self.listen_addrs
    }

    /// Dial a peer and attach a gossip link. Returns the remote peer id.
    pub async fn connect(self: &Arc<Self>, addr: &Multiaddr) -> Result<String, HostError> {
        self.connect_with_timeout(addr, self.dial_timeout).await
    }

    async fn connect_with_timeout(
        self: &Arc<Self>,
        addr: &Multiaddr,
        deadline: Duration,
    ) -> Result<String, HostError> {
        let target = addr.socket_string();
        let stream = timeout(deadline, TcpStream::connect(&target))
            .await
            .map_err(|_| HostError::DialTimeout {
                addr: addr.to_string(),
            })?
            .map_err(|source| HostError::Dial {
                addr: addr.to_string(),
                source,
            })?;
        let remote = stream.peer_addr()?;
        let (read_half, mut write_half) = stream.into_split();

        write_line(
            &mut write_half,
            &Hello {
                peer_id: self.peer_id.clone(),
                protocol: PROTOCOL_GOSSIP.to_string(),
            },
        )
        .await?;

        let mut lines = BufReader::new(read_half).lines();
        let hello = read_hello(&mut lines, deadline).await.map_err(|reason| {
            HostError::Handshake {
                addr: addr.to_string(),
                reason,
            }
        })?;
        if hello.protocol != PROTOCOL_GOSSIP {
            return Err(HostError::Handshake {
                addr: addr.to_string(),
                reason: format!("unexpected protocol {}", hello.protocol),
            });
        }

        let peer_id = hello.peer_id;
        tokio::spawn(run_gossip_link(
            Arc::clone(self),
            peer_id.clone(),
            lines,
            write_half,
            remote,
        ));
        Ok(peer_id)
    }

    /// Dial all bootstrap peers in parallel, three back-off attempts each.
    /// Returns how many connected.
    pub async fn connect_bootstrap(self: &Arc<Self>, peers: &[Multiaddr]) -> usize {
        let mut tasks = Vec::new();
        for addr in peers {
            let host = Arc::clone(self);
            let addr = addr.clone();
            tasks.push(tokio::spawn(async move {
                for attempt in 1..=BOOTSTRAP_ATTEMPTS {
                    match host
                        .connect_with_timeout(&addr, BOOTSTRAP_ATTEMPT_TIMEOUT)
                        .await
                    {
                        Ok(peer_id) => {
                            info!(peer = %peer_id, addr = %addr, "bootstrap connected");
                            return true;
                        }
                        Err(e) => {
                            warn!(addr = %addr, attempt, error = %e, "bootstrap dial failed");
                            if attempt < BOOTSTRAP_ATTEMPTS {
                                tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                            }
                        }
                    }
                }
                false
            }));
        }
        let mut connected = 0;
        for task in tasks {
            if task.await.unwrap_or(false) {
                connected += 1;
            }
        }
        connected
    }

    /// Pull historical trades from `addr` over a dedicated sync stream.
    pub async fn request_trades(
        &self,
        addr: &Multiaddr,
        since: i64,
        until: i64,
        limit: usize,
    ) -> Result<Vec<Trade>, HostError> {
        let target = addr.socket_string();
        let stream = timeout(self.dial_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| HostError::DialTimeout {
                addr: addr.to_string(),
            })?
            .map_err(|source| HostError::Dial {
                addr: addr.to_string(),
                source,
            })?;
        let (read_half, mut write_half) = stream.into_split();

        write_line(
            &mut write_half,
            &Hello {
                peer_id: self.peer_id.clone(),
                protocol: PROTOCOL_SYNC_TRADES.to_string(),
            },
        )
        .await?;
        write_line(
            &mut write_half,
            &SyncTradesRequest {
                since,
                until,
                limit,
            },
        )
        .await?;

        let mut lines = BufReader::new(read_half).lines();
        let line = timeout(SYNC_READ_TIMEOUT, lines.next_line())
            .await
            .map_err(|_| HostError::NoResponse)??
            .ok_or(HostError::NoResponse)?;
        Ok(parse_response(&line)?)
    }
}

async fn accept_loop(host: Arc<Host>, listener: TcpListener) {
    let mut shutdown = host.shutdown.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    tokio::spawn(handle_inbound(Arc::clone(&host), stream, remote));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn handle_inbound(host: Arc<Host>, stream: TcpStream, remote: SocketAddr) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let hello = match read_hello(&mut lines, host.dial_timeout).await {
        Ok(hello) => hello,
        Err(reason) => {
            debug!(%remote, reason, "inbound handshake failed");
            return;
        }
    };

    match hello.protocol.as_str() {
        PROTOCOL_GOSSIP => {
            let our_hello = Hello {
                peer_id: host.peer_id.clone(),
                protocol: PROTOCOL_GOSSIP.to_string(),
            };
            if write_line(&mut write_half, &our_hello).await.is_err() {
                return;
            }
            run_gossip_link(host, hello.peer_id, lines, write_half, remote).await;
        }
        PROTOCOL_SYNC_TRADES => {
            let Some(sync) = &host.sync else {
                debug!(%remote, "sync request but no trade source configured");
                return;
            };
            let request = match timeout(host.dial_timeout, lines.next_line()).await {
                Ok(Ok(Some(line))) => line,
                _ => return,
            };
            if let Some(response) = sync.handle_line(&request, unix_now()).await {
                let mut line = response;
                line.push('\n');
                let _ = write_half.write_all(line.as_bytes()).await;
            }
        }
        other => {
            warn!(%remote, protocol = other, "unsupported protocol");
        }
    }
}

/// Pump one established gossip link until EOF, error or shutdown.
async fn run_gossip_link(
    host: Arc<Host>,
    peer_id: String,
    mut lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    write_half: OwnedWriteHalf,
    remote: SocketAddr,
) {
    let (tx, mut rx) = mpsc::channel::<String>(LINK_QUEUE_CAPACITY);
    host.gossip.register_link(&peer_id, tx);
    info!(peer = %peer_id, %remote, "peer connected");

    let writer = tokio::spawn(async move {
        let mut write_half = write_half;
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut shutdown = host.shutdown.clone();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.is_empty() => continue,
                Ok(Some(line)) => {
                    if !host.guard.admit(&peer_id, line.len()) {
                        continue;
                    }
                    match serde_json::from_str::<GossipFrame>(&line) {
                        Ok(frame) => {
                            host.gossip.receive(&peer_id, &frame.topic, &frame.data);
                        }
                        Err(e) => debug!(peer = %peer_id, error = %e, "malformed gossip frame"),
                    }
                }
                Ok(None) | Err(_) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    host.gossip.remove_link(&peer_id);
    writer.abort();
    info!(peer = %peer_id, "peer disconnected");
}

async fn read_hello(
    lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>,
    deadline: Duration,
) -> Result<Hello, String> {
    let line = timeout(deadline, lines.next_line())
        .await
        .map_err(|_| "hello timed out".to_string())?
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "connection closed before hello".to_string())?;
    serde_json::from_str(&line).map_err(|e| format!("malformed hello: {e}"))
}

async fn write_line<T: Serialize>(
    write_half: &mut OwnedWriteHalf,
    value: &T,
) -> Result<(), HostError> {
    let mut line = serde_json::to_string(value).map_err(HostError::BadResponse)?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;
    Ok(())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

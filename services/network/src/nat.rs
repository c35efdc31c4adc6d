//! NAT port mapping
//!
//! Best-effort UPnP (IGD) mappings for every bound listener port so nodes
//! behind home routers stay dialable. Gateway discovery failure just means
//! no mapping: the node keeps running and remains reachable over outbound
//! links. Leases are renewed on a timer and released on shutdown.

use igd_next::aio::tokio::{search_gateway, Tokio};
use igd_next::aio::Gateway;
use igd_next::{PortMappingProtocol, SearchOptions};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Seconds a mapping stays valid on the gateway.
const LEASE_SECS: u32 = 3600;

/// Renewal cadence; half the lease keeps mappings alive across one missed
/// renewal.
const RENEW_INTERVAL: Duration = Duration::from_secs(LEASE_SECS as u64 / 2);

const MAPPING_DESCRIPTION: &str = "p2p-exchange-node";

/// LAN address this host uses to reach `gateway`, carrying `port`.
///
/// A connected UDP socket never sends anything; it only asks the kernel
/// which interface routes toward the gateway.
fn local_addr_towards(gateway: SocketAddr, port: u16) -> std::io::Result<SocketAddr> {
    let probe = UdpSocket::bind("0.0.0.0:0")?;
    probe.connect(gateway)?;
    Ok(SocketAddr::new(probe.local_addr()?.ip(), port))
}

/// Map every listener port on the discovered gateway, renew the leases
/// until shutdown, then release them.
pub async fn run_port_mapping(ports: Vec<u16>, mut shutdown: watch::Receiver<bool>) {
    if ports.is_empty() {
        return;
    }
    let gateway = match search_gateway(SearchOptions::default()).await {
        Ok(gateway) => gateway,
        Err(e) => {
            debug!(error = %e, "no UPnP gateway found, NAT port mapping skipped");
            return;
        }
    };
    let external_ip = gateway.get_external_ip().await.ok();

    let mut ticker = tokio::time::interval(RENEW_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for port in &ports {
                    map_port(&gateway, *port, external_ip).await;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    for port in &ports {
        if let Err(e) = gateway.remove_port(PortMappingProtocol::TCP, *port).await {
            debug!(port, error = %e, "release port mapping");
        }
    }
}

async fn map_port(gateway: &Gateway<Tokio>, port: u16, external_ip: Option<IpAddr>) {
    let local = match local_addr_towards(gateway.addr, port) {
        Ok(addr) => addr,
        Err(e) => {
            debug!(port, error = %e, "no route toward gateway");
            return;
        }
    };
    match gateway
        .add_port(
            PortMappingProtocol::TCP,
            port,
            local,
            LEASE_SECS,
            MAPPING_DESCRIPTION,
        )
        .await
    {
        Ok(()) => match external_ip {
            Some(ip) => info!(
                addr = %format!("/ip4/{ip}/tcp/{port}"),
                "NAT port mapped, externally dialable"
            ),
            None => info!(port, "NAT port mapped"),
        },
        Err(e) => warn!(port, error = %e, "NAT port mapping failed"),
    }
}

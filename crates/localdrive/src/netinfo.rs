//! LAN address discovery for the shareable URL.

use std::net::{IpAddr, SocketAddr};

use tracing::debug;

/// Address other devices on the LAN can reach.
///
/// Prefers the interface the OS would route through. Without a default
/// route (isolated LAN, phone hotspot) the first non-loopback IPv4 address
/// of any interface is used instead.
pub fn local_ip() -> Option<IpAddr> {
    match local_ip_address::local_ip() {
        Ok(ip) if usable(&ip) => return Some(ip),
        Ok(ip) => debug!("Ignoring local address {}", ip),
        Err(err) => debug!("No routed local address: {}", err),
    }

    let interfaces = local_ip_address::list_afinet_netifas()
        .map_err(|err| debug!("Failed to list network interfaces: {}", err))
        .ok()?;
    first_lan_address(interfaces.into_iter().map(|(_, ip)| ip))
}

fn usable(ip: &IpAddr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified()
}

/// First usable IPv4 address, falling back to a usable IPv6 one.
fn first_lan_address(addresses: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
    let candidates: Vec<IpAddr> = addresses.into_iter().filter(usable).collect();
    candidates
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
}

/// URL for a bound address. Wildcard binds are replaced by the LAN address,
/// or `localhost` when none can be found.
pub fn shareable_url(addr: SocketAddr) -> String {
    if !addr.ip().is_unspecified() {
        return format!("http://{}", addr);
    }

    match local_ip() {
        Some(ip) => format!("http://{}", SocketAddr::new(ip, addr.port())),
        None => format!("http://localhost:{}", addr.port()),
    }
}

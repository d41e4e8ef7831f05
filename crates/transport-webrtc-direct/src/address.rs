//! Address checks for `/webrtc-direct` multiaddrs.
//!
//! A dialable address looks like
//! `/ip4/1.2.3.4/udp/4001/webrtc-direct/certhash/<mh>/p2p/<peer>`.

use std::net::{IpAddr, SocketAddr};

use libp2p_identity::PeerId;
use multiaddr::{Multiaddr, Protocol};
use multihash::Multihash;

/// Multiaddr code of `/webrtc-direct`.
pub const WEBRTC_DIRECT_CODE: u32 = 280;
/// Multiaddr code of `/certhash`.
pub const CERTHASH_CODE: u32 = 466;

/// True when `addr` advertises this transport, a certificate hash and a peer id.
pub fn is_dialable(addr: &Multiaddr) -> bool {
    let mut webrtc_direct = false;
    let mut certhash = false;
    for protocol in addr.iter() {
        match protocol {
            Protocol::WebRTCDirect => webrtc_direct = true,
            Protocol::Certhash(_) => certhash = true,
            _ => {}
        }
    }
    webrtc_direct && certhash && peer_id(addr).is_some()
}

/// Keeps the dialable addresses, preserving their order.
pub fn filter<'a, I>(addrs: I) -> Vec<Multiaddr>
where
    I: IntoIterator<Item = &'a Multiaddr>,
{
    addrs
        .into_iter()
        .filter(|addr| is_dialable(addr))
        .cloned()
        .collect()
}

/// The peer id embedded in `addr`. When several `/p2p` components are present
/// (relayed addresses) the last one names the target.
pub fn peer_id(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter()
        .filter_map(|protocol| match protocol {
            Protocol::P2p(peer) => Some(peer),
            _ => None,
        })
        .last()
}

/// The remote certificate fingerprint carried by the first `/certhash`.
pub fn certhash(addr: &Multiaddr) -> Option<Multihash<64>> {
    addr.iter().find_map(|protocol| match protocol {
        Protocol::Certhash(hash) => Some(hash),
        _ => None,
    })
}

/// The ip/udp endpoint the answer SDP points at.
pub fn socket_addr(addr: &Multiaddr) -> Option<SocketAddr> {
    let mut iter = addr.iter();
    let ip = match iter.next()? {
        Protocol::Ip4(ip) => IpAddr::V4(ip),
        Protocol::Ip6(ip) => IpAddr::V6(ip),
        _ => return None,
    };
    let port = match iter.next()? {
        Protocol::Udp(port) => port,
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

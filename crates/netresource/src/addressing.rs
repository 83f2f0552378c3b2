use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

/// First two octets of the overlay block every WireGuard interface lives in.
const OVERLAY_OCTETS: [u8; 2] = [100, 64];
const OVERLAY_PREFIX_LEN: u8 = 16;

/// Overlay address of the WireGuard interface serving `subnet`.
///
/// The third and fourth octets of the subnet are embedded into
/// `100.64.0.0/16`:
///
/// ```text
///   10.0.3.0/24  ->  100.64.3.0/16
///   10.0.5.0/24  ->  100.64.5.0/16
/// ```
///
/// Distinct /24 subnets of one /16 allocation never collide.
pub fn overlay_address(subnet: Ipv4Net) -> Ipv4Net {
    let [_, _, octet3, octet4] = subnet.network().octets();
    let [a, b] = OVERLAY_OCTETS;
    let addr = Ipv4Addr::new(a, b, octet3, octet4);
    // 16 is always a valid IPv4 prefix length.
    Ipv4Net::new(addr, OVERLAY_PREFIX_LEN).unwrap_or_else(|_| Ipv4Net::from(addr))
}

/// Gateway of a subnet: its first host address, keeping the subnet prefix.
///
/// `10.0.3.0/24 -> 10.0.3.1/24`. Put on the namespace-side veth.
pub fn gateway_address(subnet: Ipv4Net) -> Ipv4Net {
    let [a, b, c, _] = subnet.network().octets();
    let addr = Ipv4Addr::new(a, b, c, 1);
    Ipv4Net::new(addr, subnet.prefix_len()).unwrap_or_else(|_| Ipv4Net::from(addr))
}

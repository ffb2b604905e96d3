//! Rule constraint functions for firewall rules
//!
//! This module centralizes business logic about valid field combinations
//! for firewall rules. It is used by rule validation and by the translator,
//! which must agree on when a port filter is meaningful.

use ipnetwork::IpNetwork;

use super::model::{IpVersion, Protocol};

/// Returns `true` if the protocol supports port filtering.
///
/// Only TCP and UDP use ports. ICMP variants and the any-protocol wildcard
/// (`None`) do not support port filtering.
///
/// # Examples
///
/// ```
/// use l3fw::core::model::Protocol;
/// use l3fw::core::rule_constraints::protocol_supports_ports;
///
/// assert!(protocol_supports_ports(Some(Protocol::Tcp)));
/// assert!(protocol_supports_ports(Some(Protocol::Udp)));
/// assert!(!protocol_supports_ports(Some(Protocol::Icmp)));
/// assert!(!protocol_supports_ports(None));
/// ```
#[inline]
pub fn protocol_supports_ports(protocol: Option<Protocol>) -> bool {
    matches!(protocol, Some(Protocol::Tcp | Protocol::Udp))
}

/// Returns `true` if the protocol is an ICMP variant.
#[inline]
pub fn protocol_is_icmp(protocol: Option<Protocol>) -> bool {
    matches!(protocol, Some(Protocol::Icmp | Protocol::Icmpv6))
}

/// Returns `true` if the address literal's family agrees with the rule's
/// IP version.
///
/// A v4 rule with a v6 CIDR (or vice versa) would silently never match, so
/// the combination is rejected at validation time.
///
/// # Examples
///
/// ```
/// use l3fw::core::model::IpVersion;
/// use l3fw::core::rule_constraints::address_matches_version;
/// use ipnetwork::IpNetwork;
///
/// let v4: IpNetwork = "10.0.0.0/8".parse().unwrap();
/// let v6: IpNetwork = "2001:db8::/32".parse().unwrap();
///
/// assert!(address_matches_version(&v4, IpVersion::V4));
/// assert!(!address_matches_version(&v4, IpVersion::V6));
/// assert!(address_matches_version(&v6, IpVersion::V6));
/// assert!(!address_matches_version(&v6, IpVersion::V4));
/// ```
#[inline]
pub fn address_matches_version(address: &IpNetwork, version: IpVersion) -> bool {
    match version {
        IpVersion::V4 => address.is_ipv4(),
        IpVersion::V6 => address.is_ipv6(),
    }
}

/// Returns `true` if the protocol can carry traffic for the IP version.
///
/// ICMP is v4-only and ICMPv6 is v6-only; everything else is dual-stack.
#[inline]
pub fn protocol_matches_version(protocol: Option<Protocol>, version: IpVersion) -> bool {
    match protocol {
        Some(Protocol::Icmp) => version == IpVersion::V4,
        Some(Protocol::Icmpv6) => version == IpVersion::V6,
        _ => true,
    }
}

//! Kernel object names derived from a network id.
//!
//! Interface names are bounded by `IFNAMSIZ` (16 bytes including the NUL),
//! so every derived name must fit in 15 characters.

use netmodel::NetId;

use crate::error::{NetworkError, Result};

/// Maximum interface name length accepted by the kernel.
pub const MAX_IFNAME_LEN: usize = 15;

const BRIDGE_PREFIX: &str = "b-";
const NAMESPACE_PREFIX: &str = "n-";
const WIREGUARD_PREFIX: &str = "w-";
const VETH_PREFIX: &str = "nr-";
const HOST_VETH_PREFIX: &str = "v-";
const MEMBER_VETH_PREFIX: &str = "m-";

/// Number of id characters kept in the namespace-side veth name.
const VETH_ID_CHARS: usize = 12;

fn checked(name: String) -> Result<String> {
    if name.len() > MAX_IFNAME_LEN {
        return Err(NetworkError::NameTooLong {
            name,
            max: MAX_IFNAME_LEN,
        });
    }
    Ok(name)
}

/// Bridge in the host namespace: `b-<id>`.
pub fn bridge_name(id: &NetId) -> Result<String> {
    checked(format!("{BRIDGE_PREFIX}{id}"))
}

/// Network namespace of the resource: `n-<id>`.
pub fn namespace_name(id: &NetId) -> Result<String> {
    checked(format!("{NAMESPACE_PREFIX}{id}"))
}

/// WireGuard interface: `w-<id>`.
pub fn wireguard_name(id: &NetId) -> Result<String> {
    checked(format!("{WIREGUARD_PREFIX}{id}"))
}

/// Namespace-side veth end: `nr-<first 12 chars of id>`.
pub fn veth_name(id: &NetId) -> Result<String> {
    let short: String = id.as_str().chars().take(VETH_ID_CHARS).collect();
    checked(format!("{VETH_PREFIX}{short}"))
}

/// Host-side veth end attached to the bridge: `v-<id>`.
pub fn host_veth_name(id: &NetId) -> Result<String> {
    checked(format!("{HOST_VETH_PREFIX}{id}"))
}

/// Host-side veth end of a joined member namespace: `m-<member>`.
pub fn member_veth_name(member_id: &str) -> Result<String> {
    checked(format!("{MEMBER_VETH_PREFIX}{member_id}"))
}

/// Namespace of a joined member: the member id itself.
pub fn member_namespace_name(member_id: &str) -> Result<String> {
    if member_id.is_empty() || member_id.contains('/') {
        return Err(NetworkError::InvalidMember(format!(
            "invalid member id {member_id:?}"
        )));
    }
    checked(member_id.to_string())
}

/// All names of one network resource, validated together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub bridge: String,
    pub namespace: String,
    pub wireguard: String,
    pub veth: String,
    pub host_veth: String,
}

impl ResourceNames {
    /// Derive every name, failing on the first one that is too long.
    pub fn derive(id: &NetId) -> Result<Self> {
        Ok(Self {
            bridge: bridge_name(id)?,
            namespace: namespace_name(id)?,
            wireguard: wireguard_name(id)?,
            veth: veth_name(id)?,
            host_veth: host_veth_name(id)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_prefixed_names() {
        let id = NetId::from("net1");
        let names = ResourceNames::derive(&id).unwrap();
        assert_eq!(names.bridge, "b-net1");
        assert_eq!(names.namespace, "n-net1");
        assert_eq!(names.wireguard, "w-net1");
        assert_eq!(names.veth, "nr-net1");
        assert_eq!(names.host_veth, "v-net1");
    }

    #[test]
    fn veth_keeps_first_twelve_chars() {
        let id = NetId::from("abcdefghijklm");
        assert_eq!(veth_name(&id).unwrap(), "nr-abcdefghijkl");
    }

    #[test]
    fn longest_accepted_id_fits_every_name() {
        // 13 characters: "b-" + 13 = 15.
        let id = NetId::from("a".repeat(13));
        let names = ResourceNames::derive(&id).unwrap();
        for name in [
            &names.bridge,
            &names.namespace,
            &names.wireguard,
            &names.veth,
            &names.host_veth,
        ] {
            assert!(name.len() <= MAX_IFNAME_LEN, "{name} too long");
        }
    }

    #[test]
    fn id_one_char_too_long_is_rejected() {
        let id = NetId::from("a".repeat(14));
        let err = ResourceNames::derive(&id).unwrap_err();
        let expected = format!("b-{}", "a".repeat(14));
        assert!(
            matches!(&err, NetworkError::NameTooLong { name, max }
                if *name == expected && *max == MAX_IFNAME_LEN),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn every_accessor_enforces_the_limit() {
        let id = NetId::from("x".repeat(20));
        assert!(bridge_name(&id).is_err());
        assert!(namespace_name(&id).is_err());
        assert!(wireguard_name(&id).is_err());
        assert!(host_veth_name(&id).is_err());
        // The veth name truncates the id and always fits.
        assert!(veth_name(&id).is_ok());
    }

    #[test]
    fn derivation_is_deterministic() {
        let id = NetId::from("tenant7");
        assert_eq!(
            ResourceNames::derive(&id).unwrap(),
            ResourceNames::derive(&id).unwrap()
        );
    }

    #[test]
    fn derivation_matches_length_rule_for_all_lengths() {
        for len in 1..=20 {
            let id = NetId::from("n".repeat(len));
            let result = ResourceNames::derive(&id);
            assert_eq!(result.is_ok(), len + 2 <= MAX_IFNAME_LEN, "len={len}");
        }
    }

    #[test]
    fn member_veth_name_limit() {
        assert_eq!(member_veth_name("web01").unwrap(), "m-web01");
        assert!(member_veth_name(&"c".repeat(14)).is_err());
    }

    #[test]
    fn member_namespace_name_rejects_bad_ids() {
        assert_eq!(member_namespace_name("web01").unwrap(), "web01");
        assert!(matches!(
            member_namespace_name(""),
            Err(NetworkError::InvalidMember(_))
        ));
        assert!(matches!(
            member_namespace_name("../etc"),
            Err(NetworkError::InvalidMember(_))
        ));
        assert!(matches!(
            member_namespace_name(&"c".repeat(16)),
            Err(NetworkError::NameTooLong { .. })
        ));
    }
}

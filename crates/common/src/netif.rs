//! Local network interface lookup
//!
//! Maps a configured MAC address to the IPv4 address of the local interface
//! carrying it, so a device entry can follow a (possibly virtual) NIC instead
//! of hardcoding an address.

use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, warn};

const SYSFS_NET: &str = "/sys/class/net";

/// Canonical lowercase, colon separated form of a MAC address.
///
/// Returns `None` when the input is not six hex octets separated by `:` or `-`.
pub fn normalize_mac(mac: &str) -> Option<String> {
    let octets: Vec<&str> = mac.trim().split(|c| c == ':' || c == '-').collect();
    if octets.len() != 6 {
        return None;
    }

    let mut normalized = Vec::with_capacity(6);
    for octet in octets {
        if octet.len() != 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        normalized.push(octet.to_ascii_lowercase());
    }

    Some(normalized.join(":"))
}

/// Hardware address of a local interface, read from sysfs
fn interface_mac(name: &str) -> Option<String> {
    let path = Path::new(SYSFS_NET).join(name).join("address");
    let raw = std::fs::read_to_string(path).ok()?;
    normalize_mac(&raw)
}

/// IPv4 address of the local interface bearing `mac`, if any.
pub fn ipv4_for_mac(mac: &str) -> Option<Ipv4Addr> {
    let wanted = match normalize_mac(mac) {
        Some(mac) => mac,
        None => {
            warn!(mac = %mac, "ignoring malformed MAC address");
            return None;
        }
    };

    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!(error = %e, "failed to enumerate network interfaces");
            return None;
        }
    };

    for iface in interfaces {
        let if_addrs::IfAddr::V4(v4) = &iface.addr else {
            continue;
        };

        if interface_mac(&iface.name).as_deref() == Some(wanted.as_str()) {
            debug!(mac = %wanted, interface = %iface.name, ip = %v4.ip, "resolved MAC address");
            return Some(v4.ip);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("02:42:AC:11:00:02"),
            Some("02:42:ac:11:00:02".to_string())
        );
        assert_eq!(
            normalize_mac("02-42-ac-11-00-02\n"),
            Some("02:42:ac:11:00:02".to_string())
        );

        assert_eq!(normalize_mac(""), None);
        assert_eq!(normalize_mac("<ONVIF PROXY MAC ADDRESS HERE>"), None);
        assert_eq!(normalize_mac("02:42:ac:11:00"), None);
        assert_eq!(normalize_mac("02:42:ac:11:00:zz"), None);
        assert_eq!(normalize_mac("002:42:ac:11:00:02"), None);
    }

    #[test]
    fn test_malformed_mac_does_not_resolve() {
        assert_eq!(ipv4_for_mac("not-a-mac"), None);
    }

    #[test]
    fn test_unknown_mac_does_not_resolve() {
        // Locally administered, never assigned to a real NIC
        assert_eq!(ipv4_for_mac("fe:ff:ff:ff:ff:fe"), None);
    }
}

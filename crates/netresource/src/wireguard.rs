use std::fmt::Write as _;

use crate::plan::WgPeer;

/// Full configuration of a WireGuard device, applied with `wg setconf`.
///
/// `setconf` replaces the whole peer set, so peers removed from the
/// directory disappear from the device on the next apply.
#[derive(Clone, PartialEq, Eq)]
pub struct WgConfig {
    pub private_key: String,
    pub listen_port: u16,
    pub peers: Vec<WgPeer>,
}

impl std::fmt::Debug for WgConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgConfig")
            .field("private_key", &"<redacted>")
            .field("listen_port", &self.listen_port)
            .field("peers", &self.peers)
            .finish()
    }
}

impl WgConfig {
    /// Render in the `wg(8)` configuration file format.
    pub fn render(&self) -> String {
        let mut out = format!(
            "[Interface]\nPrivateKey = {}\nListenPort = {}\n",
            self.private_key, self.listen_port
        );
        for peer in &self.peers {
            // Writing to a String cannot fail.
            let _ = write!(out, "\n[Peer]\nPublicKey = {}\n", peer.public_key);
            if !peer.allowed_ips.is_empty() {
                let _ = writeln!(out, "AllowedIPs = {}", peer.allowed_ips.join(", "));
            }
            if let Some(endpoint) = &peer.endpoint {
                let _ = writeln!(out, "Endpoint = {endpoint}");
            }
        }
        out
    }
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Public STUN server used when no other ICE servers are configured.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Default TCP port for the VidaLink signaling relay.
pub const DEFAULT_RELAY_PORT: u16 = 7890;

// MARK: - RtcConfig

/// One ICE server entry. STUN only; media relay (TURN) is out of scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
}

/// Peer-connection configuration handed to `PeerConnection` implementations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtcConfig {
    #[serde(alias = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer { urls: vec![DEFAULT_STUN_URL.to_owned()] }],
        }
    }
}

// MARK: - MediaConstraints

/// Which local media the call captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self { video: true, audio: true }
    }
}

// MARK: - CallConfig

/// One bundle covering both halves of call setup.
///
/// The establishment flows read only `media`; `rtc` is the input to the
/// peer-connection constructor, which hands the flows an already configured
/// peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub rtc: RtcConfig,
    pub media: MediaConstraints,
}

// MARK: - RelayConfig

/// Relay server settings, read from `VIDALINK_RELAY_*` environment variables.
///
/// With no cert/key pair configured the relay generates a self-signed
/// certificate at startup; clients accept it trust-on-first-use.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub port: u16,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_owned(),
            port: DEFAULT_RELAY_PORT,
            cert_path: None,
            key_path: None,
        }
    }
}

impl RelayConfig {
    /// Read settings from the environment, falling back to defaults:
    /// `VIDALINK_RELAY_ADDR`, `VIDALINK_RELAY_PORT`, `VIDALINK_RELAY_CERT`,
    /// `VIDALINK_RELAY_KEY`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("VIDALINK_RELAY_ADDR").unwrap_or(defaults.bind_addr),
            port: std::env::var("VIDALINK_RELAY_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cert_path: std::env::var("VIDALINK_RELAY_CERT").ok().map(PathBuf::from),
            key_path: std::env::var("VIDALINK_RELAY_KEY").ok().map(PathBuf::from),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtc_config_defaults_to_google_stun() {
        let cfg = RtcConfig::default();
        assert_eq!(cfg.ice_servers.len(), 1);
        assert_eq!(cfg.ice_servers[0].urls, vec![DEFAULT_STUN_URL.to_owned()]);
    }

    #[test]
    fn deserializes_camel_case_fields() {
        let json = r#"{
            "iceServers": [{"urls": ["stun:stun.example.org:3478"]}]
        }"#;

        let cfg: RtcConfig = serde_json::from_str(json).expect("valid camelCase config");
        assert_eq!(cfg.ice_servers[0].urls[0], "stun:stun.example.org:3478");
    }

    #[test]
    fn media_constraints_default_to_audio_and_video() {
        let m = MediaConstraints::default();
        assert!(m.video);
        assert!(m.audio);
    }

    #[test]
    fn call_config_accepts_empty_object() {
        let cfg: CallConfig = serde_json::from_str("{}").expect("defaults fill in");
        assert_eq!(cfg, CallConfig::default());
    }
}

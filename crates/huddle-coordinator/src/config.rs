use url::Url;
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::error::SignalingError;

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:3000/ws";

const RELAY_URL_ENV: &str = "HUDDLE_RELAY_URL";
const LOCALHOST_ONLY_ENV: &str = "HUDDLE_LOCALHOST_ONLY";

const PUBLIC_TURN_USER: &str = "openrelayproject";

/// Where the coordinator signals and which ICE servers its sessions use.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub signaling_url: String,
    pub ice_servers: Vec<RTCIceServer>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            ice_servers: default_ice_servers(),
        }
    }
}

impl CoordinatorConfig {
    /// Defaults with `HUDDLE_RELAY_URL` and `HUDDLE_LOCALHOST_ONLY` applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(
            std::env::var(RELAY_URL_ENV).ok(),
            std::env::var(LOCALHOST_ONLY_ENV).is_ok(),
        )
    }

    fn with_overrides(mut self, relay_url: Option<String>, localhost_only: bool) -> Self {
        if let Some(url) = relay_url.filter(|url| !url.trim().is_empty()) {
            self.signaling_url = url.trim().to_string();
        }
        if localhost_only {
            self.ice_servers.clear();
        }
        self
    }

    /// No STUN or TURN; host candidates only.
    pub fn localhost(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            ice_servers: Vec::new(),
        }
    }

    pub fn with_signaling_url(mut self, url: impl Into<String>) -> Self {
        self.signaling_url = url.into();
        self
    }

    pub fn with_ice_servers(mut self, servers: Vec<RTCIceServer>) -> Self {
        self.ice_servers = servers;
        self
    }

    pub fn add_ice_server(mut self, urls: Vec<String>) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls,
            ..Default::default()
        });
        self
    }

    pub fn add_ice_server_with_credentials(
        mut self,
        urls: Vec<String>,
        username: String,
        credential: String,
    ) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls,
            username,
            credential,
            ..Default::default()
        });
        self
    }

    pub fn signaling_url(&self) -> Result<Url, SignalingError> {
        let url = Url::parse(&self.signaling_url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(SignalingError::UnsupportedScheme(other.to_string())),
        }
    }
}

fn default_ice_servers() -> Vec<RTCIceServer> {
    vec![
        RTCIceServer {
            urls: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            ..Default::default()
        },
        RTCIceServer {
            urls: vec![
                "turn:openrelay.metered.ca:80".to_string(),
                "turn:openrelay.metered.ca:443".to_string(),
            ],
            username: PUBLIC_TURN_USER.to_string(),
            credential: PUBLIC_TURN_USER.to_string(),
            ..Default::default()
        },
    ]
}

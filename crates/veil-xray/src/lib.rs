//! Domain logic for the managed Xray daemon
//!
//! Pure functions only: key material extraction from keygen output,
//! synthesis of the daemon's JSON configuration document, and share-link
//! (`vless://`) plus QR rendering. No I/O happens in this crate.

pub mod config;
pub mod keys;
pub mod link;

pub use config::{ClientIdentity, ConfigParams, ProxyConfig};
pub use keys::{KeyExtractionError, KeyPair};
pub use link::{qr_png_base64, vless_link, QrEncodeError};

/// Remote path of the daemon binary.
pub const XRAY_BIN: &str = "/usr/local/bin/xray";

/// Remote path of the daemon's configuration document.
pub const CONFIG_PATH: &str = "/usr/local/etc/xray/config.json";

/// Remote directory for daemon logs.
pub const LOG_DIR: &str = "/var/log/xray";

/// Loopback address of the daemon's stats/control API.
pub const STATS_SERVER: &str = "127.0.0.1:8081";

/// Port the reality inbound listens on; also the port in every share link.
pub const INBOUND_PORT: u16 = 443;

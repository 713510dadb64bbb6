/// Configuration parsing for the server and client legs.
///
/// Files are JSON5 — comments and trailing commas tolerated — deserialized
/// into the `Raw*` structs below, then resolved into the runtime types
/// `Server`/`Peer` that `resolver` and the forwarding table consume.
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use x25519_dalek::StaticSecret;

use crate::error::Error;

// ── Server leg ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RawServerConfig {
    pub listen: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub obfs: String,
    pub servers: Vec<RawServer>,
}

#[derive(Debug, Deserialize)]
pub struct RawServer {
    pub privkey: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub peers: Vec<RawPeer>,
}

#[derive(Debug, Deserialize)]
pub struct RawPeer {
    #[serde(default)]
    pub pubkey: Option<String>,
    pub forward_to: String,
}

fn default_timeout() -> u64 {
    300
}

/// A server's static keypair and routing table, resolved from config.
///
/// `default_host` is the `servers[].address` value: not a bind address
/// (there is one shared `listen` socket for the whole proxy) but the host
/// substituted into a peer's `forward_to` when its host part is omitted.
#[derive(Debug, Clone)]
pub struct Server {
    pub private_key: StaticSecret,
    pub default_host: String,
    pub peers: Vec<Peer>,
}

/// A single routing entry: a peer's public key (absent ⇒ fallback) mapped
/// to the upstream it forwards to.
#[derive(Debug, Clone)]
pub struct Peer {
    pub public_key: Option<[u8; 32]>,
    pub forward_to: SocketAddr,
}

/// Fully resolved server-leg configuration.
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub timeout: std::time::Duration,
    pub user_key: String,
    pub servers: Vec<Server>,
}

pub fn load_server_config(path: &Path) -> Result<ServerConfig, Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
    let raw: RawServerConfig =
        json5::from_str(&content).map_err(|e| Error::Config(format!("parsing config: {e}")))?;

    let listen = resolve_addr(&raw.listen, "0.0.0.0")?;

    let servers = raw
        .servers
        .into_iter()
        .map(|s| resolve_server(s))
        .collect::<Result<Vec<_>, Error>>()?;

    Ok(ServerConfig {
        listen,
        timeout: std::time::Duration::from_secs(raw.timeout),
        user_key: raw.obfs,
        servers,
    })
}

fn resolve_server(raw: RawServer) -> Result<Server, Error> {
    let key_bytes = decode_key(&raw.privkey)?;
    if key_bytes.len() != 32 {
        return Err(Error::Config(format!(
            "privkey must decode to 32 bytes, got {}",
            key_bytes.len()
        )));
    }
    let mut key_arr = [0u8; 32];
    key_arr.copy_from_slice(&key_bytes);
    let private_key = StaticSecret::from(key_arr);

    let default_host = if raw.address.is_empty() {
        "0.0.0.0"
    } else {
        &raw.address
    };

    let peers = raw
        .peers
        .into_iter()
        .map(|p| resolve_peer(p, default_host))
        .collect::<Result<Vec<_>, Error>>()?;

    Ok(Server {
        private_key,
        default_host: default_host.to_string(),
        peers,
    })
}

fn resolve_peer(raw: RawPeer, default_host: &str) -> Result<Peer, Error> {
    let public_key = match raw.pubkey {
        Some(s) => {
            let bytes = decode_key(&s)?;
            if bytes.len() != 32 {
                return Err(Error::Config(format!(
                    "pubkey must decode to 32 bytes, got {}",
                    bytes.len()
                )));
            }
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&bytes);
            Some(arr)
        }
        None => None,
    };

    let forward_to = inherit_host(&raw.forward_to, default_host)?;

    Ok(Peer {
        public_key,
        forward_to,
    })
}

/// Resolve `literal` as a `host:port` address, substituting `default_host`
/// when the host part is empty (a bare `:port`).
fn inherit_host(literal: &str, default_host: &str) -> Result<SocketAddr, Error> {
    let with_host = if let Some(port) = literal.strip_prefix(':') {
        format!("{default_host}:{port}")
    } else {
        literal.to_string()
    };
    resolve_addr(&with_host, default_host)
}

fn resolve_addr(literal: &str, _default_host: &str) -> Result<SocketAddr, Error> {
    use std::net::ToSocketAddrs;
    literal
        .to_socket_addrs()
        .map_err(|e| Error::ResolveAddr {
            role: "config",
            literal: literal.to_string(),
            cause: e,
        })?
        .next()
        .ok_or_else(|| Error::Config(format!("address {literal:?} resolved to nothing")))
}

// ── Client leg (peripheral, §4.5/§6) ────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    pub server: String,
    #[serde(default)]
    pub id: u32,
    pub listen: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub xor_key: Option<String>,
}

pub fn load_client_config(path: &Path) -> Result<ClientConfig, Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
    let config: ClientConfig =
        json5::from_str(&content).map_err(|e| Error::Config(format!("parsing config: {e}")))?;
    if config.id > 255 {
        return Err(Error::InvalidPeerId { id: config.id });
    }
    Ok(config)
}

/// Decode a base64 key from a config string into raw bytes.
pub fn decode_key(key_str: &str) -> Result<Vec<u8>, Error> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(key_str.trim())
        .map_err(|e| Error::Config(format!("invalid base64 key: {e}")))
}

//! Service configuration
//!
//! All configuration comes from the environment and is read exactly once at
//! startup. `Config::from_lookup` accepts any lookup function so tests can
//! supply values without touching the process environment.


use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use log::debug;

use crate::error::{Error, Result};


/// Longest accepted session lifetime (ten years)
const MAX_SESSION_TTL_HOURS: i64 = 10 * 365 * 24;


/// Broker connection settings for the MQTT service
#[derive(Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub prefix: String,
    pub client_id: String,
}


/// ntfy delivery settings
#[derive(Clone, Debug)]
pub struct NtfyConfig {
    pub server: String,
    pub topic: String,
    pub token: Option<String>,
}


/// Runtime configuration of the porchwatch service
#[derive(Clone, Debug)]
pub struct Config {

    /// Address on which the HTTP server listens
    pub listen: String,

    /// Directory holding the database and downloaded media
    pub state_dir: PathBuf,

    /// Pre-built PWA assets, if they should be served
    pub static_dir: Option<PathBuf>,

    pub session_ttl_hours: i64,

    /// PIN for the bootstrap admin account
    pub admin_pin: Option<String>,

    /// Shared secret expected in the `X-Webhook-Secret` header
    pub webhook_secret: Option<String>,

    /// Base URL of the Frigate API used to download snapshots and clips
    pub frigate_url: Option<String>,

    /// Base URL of the public web UI, used for notification links
    pub public_url: Option<String>,

    pub ntfy: Option<NtfyConfig>,
    pub mqtt: Option<MqttConfig>,

    /// Seconds without a heartbeat before a camera is reported offline
    pub heartbeat_timeout_secs: i64,
}

impl Config {

    /// Reads configuration from the process environment
    pub fn from_env() -> Result<Config> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    /// Reads configuration using the given variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where F: Fn(&str) -> Option<String>
    {
        // Empty values are treated the same as unset ones
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let state_dir = match get("STATE_DIRECTORY") {
            Some(dir) => PathBuf::from(dir),
            None if cfg!(debug_assertions) => PathBuf::from("."),
            None => return Err(Error::Config(
                String::from("STATE_DIRECTORY"),
                String::from("variable is required"),
            )),
        };
        debug!("using state directory {}", state_dir.display());

        let ntfy = get("PW_NTFY_TOPIC").map(|topic| NtfyConfig {
            server: get("PW_NTFY_URL")
                .unwrap_or_else(|| String::from("https://ntfy.sh"))
                .trim_end_matches('/')
                .to_owned(),
            topic,
            token: get("PW_NTFY_TOKEN"),
        });

        let mqtt = match get("PW_MQTT_HOST") {
            Some(host) => Some(MqttConfig {
                host,
                port: parse(&get, "PW_MQTT_PORT", 1883)?,
                username: get("PW_MQTT_USERNAME"),
                password: get("PW_MQTT_PASSWORD"),
                prefix: get("PW_MQTT_PREFIX")
                    .unwrap_or_else(|| String::from("porchwatch"))
                    .trim_matches('/')
                    .to_owned(),
                client_id: get("PW_MQTT_CLIENT_ID")
                    .unwrap_or_else(|| String::from("porchwatch")),
            }),
            None => None,
        };

        let session_ttl_hours: i64 = parse(&get, "PW_SESSION_TTL_HOURS", 720)?;
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&session_ttl_hours) {
            return Err(Error::Config(
                String::from("PW_SESSION_TTL_HOURS"),
                format!("must be between 1 and {}", MAX_SESSION_TTL_HOURS),
            ));
        }

        Ok(Config {
            listen: get("PW_LISTEN").unwrap_or_else(|| String::from("127.0.0.1:8420")),
            state_dir,
            static_dir: get("PW_STATIC").map(PathBuf::from),
            session_ttl_hours,
            admin_pin: get("PW_ADMIN_PIN"),
            webhook_secret: get("PW_WEBHOOK_SECRET"),
            frigate_url: get("PW_FRIGATE_URL").map(|u| u.trim_end_matches('/').to_owned()),
            public_url: get("PW_PUBLIC_URL").map(|u| u.trim_end_matches('/').to_owned()),
            ntfy,
            mqtt,
            heartbeat_timeout_secs: parse(&get, "PW_HEARTBEAT_TIMEOUT_SECS", 90)?,
        })
    }

    /// Path of the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join("porchwatch.db")
    }

    /// Root directory for downloaded thumbnails and clips
    pub fn media_dir(&self) -> PathBuf {
        self.state_dir.join("media")
    }
}


/// Parses an optional variable, falling back to `default` when unset
fn parse<T, G>(get: &G, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.trim()
            .parse()
            .map_err(|_| Error::Config(name.to_owned(), raw)),
        None => Ok(default),
    }
}

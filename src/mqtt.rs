//! MQTT bridge to the cameras
//!
//! Cameras publish liveness under `{prefix}/cameras/{device_id}/heartbeat`
//! and `{prefix}/cameras/{device_id}/status`, and receive commands on
//! `{prefix}/cameras/{device_id}/command`. The broker connection is owned by
//! a background task which reconnects for as long as the service runs.


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use actix_web::http::StatusCode;
use diesel::sqlite::SqliteConnection;
use log::{debug, info, trace, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use serde_json::Value;

use crate::allow_err;
use crate::cameras;
use crate::config::{Config, MqttConfig};
use crate::db::{self, ConnectionPool, DatabaseContext};
use crate::error::Result;


const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);


/// Liveness report published by a camera
#[derive(Debug, Eq, PartialEq)]
pub enum Report<'a> {

    /// Periodic proof of life
    Heartbeat { device_id: &'a str },

    /// Explicit status change, typically the camera's last will
    Status { device_id: &'a str, online: bool },
}


/// Interprets a message received on one of the subscribed topics
///
/// Returns `None` for topics outside `{prefix}/cameras/+/{heartbeat,status}`.
/// Status payloads are `online` or `offline`, either bare or as the `status`
/// field of a JSON object.
pub fn parse_report<'a>(prefix: &str, topic: &'a str, payload: &[u8]) -> Option<Report<'a>> {

    let rest = topic.strip_prefix(prefix)?.strip_prefix("/cameras/")?;
    let (device_id, kind) = rest.split_once('/')?;
    if device_id.is_empty() {
        return None;
    }

    match kind {
        "heartbeat" => Some(Report::Heartbeat { device_id }),
        "status" => {
            let text = String::from_utf8_lossy(payload);
            let status = match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(obj)) => obj.get("status")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_default(),
                _ => text.trim().trim_matches('"').to_owned(),
            };
            Some(Report::Status {
                device_id,
                online: !status.eq_ignore_ascii_case("offline"),
            })
        },
        _ => None,
    }
}


/// Applies a liveness report to the camera it concerns
pub fn apply_report(conn: &mut SqliteConnection, report: &Report, now: i64) -> Result<()> {

    let (device_id, seen) = match *report {
        Report::Heartbeat { device_id } => (device_id, Some(now)),
        Report::Status { device_id, online } => (device_id, if online { Some(now) } else { None }),
    };

    if !cameras::record_heartbeat(conn, device_id, seen)? {
        debug!("ignoring liveness report from unknown device {}", device_id);
    }

    Ok(())
}


/// Body of a command message
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMessage<'a> {
    pub command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    pub issued_by: &'a str,
    pub issued_at: i64,
}


/// Handle to the MQTT broker connection
pub struct Mqtt {
    client: Option<AsyncClient>,
    prefix: String,
    connected: Arc<AtomicBool>,
}

impl Mqtt {

    /// A handle for deployments without a broker
    pub fn disabled() -> Self {
        Mqtt {
            client: None,
            prefix: String::new(),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the broker connection, if MQTT is configured
    ///
    /// Must be called from within the actix runtime.
    pub fn start(config: &Config, pool: ConnectionPool) -> Self {

        let Some(mqtt) = &config.mqtt else {
            info!("MQTT is not configured");
            return Mqtt::disabled();
        };

        let (client, eventloop) = AsyncClient::new(options(mqtt), 32);
        let connected = Arc::new(AtomicBool::new(false));

        info!("connecting to MQTT broker at {}:{}", mqtt.host, mqtt.port);
        actix_web::rt::spawn(run(
            eventloop,
            client.clone(),
            mqtt.prefix.clone(),
            pool,
            connected.clone(),
        ));

        Mqtt {
            client: Some(client),
            prefix: mqtt.prefix.clone(),
            connected,
        }
    }

    pub fn enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Whether the broker connection is currently up
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn command_topic(&self, device_id: &str) -> String {
        format!("{}/cameras/{}/command", self.prefix, device_id)
    }

    /// Publishes a command for the camera with the given device id
    ///
    /// Commands are fire-and-forget: they are neither retained nor
    /// acknowledged, so a camera that is offline never sees them.
    pub async fn send_command(
        &self,
        device_id: &str,
        command: &str,
        args: Option<Value>,
        issued_by: &str,
    ) -> Result<()>
    {
        let client = self.client.as_ref()
            .ok_or((StatusCode::SERVICE_UNAVAILABLE, "MQTT is not configured"))?;

        if !self.connected() {
            Err((StatusCode::SERVICE_UNAVAILABLE, "MQTT broker is not connected"))?;
        }

        let message = CommandMessage {
            command,
            args,
            issued_by,
            issued_at: db::now(),
        };
        let payload = serde_json::to_vec(&message)?;

        let topic = self.command_topic(device_id);
        debug!("publishing {} to {}", command, topic);
        client.publish(topic, QoS::AtMostOnce, false, payload).await?;

        Ok(())
    }
}


fn options(config: &MqttConfig) -> MqttOptions {

    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(KEEP_ALIVE);

    if let Some(username) = &config.username {
        options.set_credentials(
            username,
            config.password.as_deref().unwrap_or_default(),
        );
    }

    options
}


fn subscriptions(prefix: &str) -> [String; 2] {
    [
        format!("{}/cameras/+/heartbeat", prefix),
        format!("{}/cameras/+/status", prefix),
    ]
}


fn handle_publish(pool: &ConnectionPool, prefix: &str, topic: &str, payload: &[u8]) -> Result<()> {

    let Some(report) = parse_report(prefix, topic, payload) else {
        trace!("ignoring message on {}", topic);
        return Ok(());
    };

    trace!("received {:?}", report);
    let mut conn = pool.conn()?;
    apply_report(&mut conn, &report, db::now())
}


/// Drives the broker connection
///
/// Subscriptions are renewed after every (re)connect, because the broker
/// does not keep them for clean sessions.
async fn run(
    mut eventloop: EventLoop,
    client: AsyncClient,
    prefix: String,
    pool: ConnectionPool,
    connected: Arc<AtomicBool>,
)
{
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to MQTT broker");
                connected.store(true, Ordering::Relaxed);
                for topic in subscriptions(&prefix) {
                    allow_err!(
                        client.try_subscribe(topic.clone(), QoS::AtLeastOnce),
                        "failed to subscribe to {}", topic
                    );
                }
            },
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                allow_err!(
                    handle_publish(&pool, &prefix, &publish.topic, &publish.payload),
                    "failed to handle message on {}", publish.topic
                );
            },
            Ok(_) => (),
            Err(err) => {
                if connected.swap(false, Ordering::Relaxed) {
                    warn!("lost connection to MQTT broker: {}", err);
                } else {
                    debug!("MQTT connection attempt failed: {}", err);
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            },
        }
    }
}

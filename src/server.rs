//! HTTP application assembly
//!
//! `AppState` owns every shared service object. `AppState::configure` mounts
//! the API under */api* and, when configured, the pre-built PWA at */*.

// Actix handlers have lots of needless pass-by-value (Data, Json, and Path structs)
#![allow(clippy::needless_pass_by_value)]

use std::path::PathBuf;
use std::time::Duration;

use actix_files::{Files, NamedFile};
use actix_web::dev::{fn_service, ServiceRequest, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::web::{self, Data, Json, JsonConfig, PathConfig, QueryConfig, ServiceConfig};
use diesel::RunQueryDsl;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::auth::{self, LoginThrottle};
use crate::cameras;
use crate::config::Config;
use crate::db::{ConnectionPool, DatabaseContext};
use crate::error::{Error, Result};
use crate::events;
use crate::media::{MediaFetcher, MediaStore};
use crate::mqtt::Mqtt;
use crate::notify::{self, Notifier};
use crate::settings;
use crate::users;
use crate::webhook;


/// Largest accepted JSON request body
const JSON_LIMIT: usize = 1024 * 1024;

/// Timeout for outgoing requests to Frigate and ntfy
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);


/// Shared state of the HTTP application
#[derive(Clone)]
pub struct AppState {
    pub pool: Data<ConnectionPool>,
    pub config: Data<Config>,
    pub notifier: Data<Notifier>,
    pub mqtt: Data<Mqtt>,
    pub throttle: Data<LoginThrottle>,
    pub media: Data<MediaStore>,
    pub fetcher: Data<MediaFetcher>,
}

impl AppState {

    pub fn new(config: Config, pool: ConnectionPool, mqtt: Mqtt) -> Result<Self> {

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;

        Ok(AppState {
            notifier: Data::new(Notifier::new(client.clone(), &config)),
            fetcher: Data::new(MediaFetcher::new(client, &config)),
            media: Data::new(MediaStore::new(config.media_dir())),
            throttle: Data::new(LoginThrottle::new()),
            mqtt: Data::new(mqtt),
            pool: Data::new(pool),
            config: Data::new(config),
        })
    }

    /// Registers shared state, the API and static assets with an application
    pub fn configure(&self, service: &mut ServiceConfig) {

        service
            .app_data(self.pool.clone())
            .app_data(self.config.clone())
            .app_data(self.notifier.clone())
            .app_data(self.mqtt.clone())
            .app_data(self.throttle.clone())
            .app_data(self.media.clone())
            .app_data(self.fetcher.clone())
            .app_data(json_config())
            .app_data(query_config())
            .app_data(path_config());

        service.service(
            web::scope("/api")
                .configure(auth::configure_api)
                .configure(users::configure_api)
                .configure(cameras::configure_api)
                .configure(events::configure_api)
                .configure(settings::configure_api)
                .configure(notify::configure_api)
                .configure(webhook::configure_api)
                .route("/health", web::get().to(get_health))
                .default_service(web::to(not_found))
        );

        if let Some(static_dir) = &self.config.static_dir {
            debug!("serving web UI from {}", static_dir.display());
            service.service(spa_files(static_dir.clone()));
        }
    }
}


//#region Extractor configuration

// Malformed requests are reported in the same JSON shape as every other error

fn json_config() -> JsonConfig {
    JsonConfig::default()
        .limit(JSON_LIMIT)
        .error_handler(|err, _req| Error::bad_request(err.to_string()).into())
}


fn query_config() -> QueryConfig {
    QueryConfig::default()
        .error_handler(|err, _req| Error::bad_request(err.to_string()).into())
}


fn path_config() -> PathConfig {
    PathConfig::default()
        .error_handler(|err, _req| Error::bad_request(err.to_string()).into())
}

//#endregion


/// Service health as reported by */api/health*
#[derive(Debug, Deserialize, Serialize)]
pub struct Health {
    pub status: String,
    pub version: String,

    /// One of `connected`, `disconnected` or `disabled`
    pub mqtt: String,
}


async fn get_health(
    pool: Data<ConnectionPool>,
    mqtt: Data<Mqtt>,
) -> Result<Json<Health>>
{
    let mut conn = pool.conn()?;
    diesel::sql_query("SELECT 1").execute(&mut conn)?;

    let mqtt = match (mqtt.enabled(), mqtt.connected()) {
        (false, _) => "disabled",
        (true, true) => "connected",
        (true, false) => "disconnected",
    };

    Ok(Json(Health {
        status: String::from("ok"),
        version: String::from(env!("CARGO_PKG_VERSION")),
        mqtt: String::from(mqtt),
    }))
}


async fn not_found() -> Result<Json<()>> {
    Err((StatusCode::NOT_FOUND, "no such resource").into())
}


/// Serves the PWA, falling back to *index.html* for client-side routes
fn spa_files(static_dir: PathBuf) -> Files {

    let index = static_dir.join("index.html");

    Files::new("/", static_dir)
        .index_file("index.html")
        .default_handler(fn_service(move |req: ServiceRequest| {
            let index = index.clone();
            async move {
                let (req, _) = req.into_parts();
                let file = NamedFile::open_async(index).await?;
                let res = file.into_response(&req);
                Ok(ServiceResponse::new(req, res))
            }
        }))
}

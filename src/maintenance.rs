//! Periodic housekeeping
//!
//! Expired sessions and events past the retention window are removed once at
//! startup and hourly afterwards.


use std::time::Duration;

use log::{error, info, trace};

use crate::auth;
use crate::db::{self, ConnectionPool, DatabaseContext};
use crate::error::Result;
use crate::events;
use crate::media::MediaStore;
use crate::settings;


const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

const SECS_PER_DAY: i64 = 24 * 60 * 60;


/// Number of rows removed by a sweep
#[derive(Debug, Default, Eq, PartialEq)]
pub struct Sweep {
    pub sessions: usize,
    pub events: usize,
}


/// Removes expired sessions and events older than the retention window
///
/// A retention of zero days keeps events forever.
pub async fn run_once(pool: &ConnectionPool, media: &MediaStore, now: i64) -> Result<Sweep> {

    let (sessions, doomed) = {
        let mut conn = pool.conn()?;

        let sessions = auth::purge_expired(&mut conn, now)?;

        let retention = settings::retention(&mut conn)?;
        let doomed = if retention.days == 0 {
            Vec::new()
        } else {
            let cutoff = now - i64::from(retention.days) * SECS_PER_DAY;
            trace!("sweeping events started before {}", cutoff);
            events::started_before(&mut conn, cutoff)?
        };

        (sessions, doomed)
    };

    let events = events::delete(pool, media, doomed).await?;

    Ok(Sweep { sessions, events })
}


async fn run(pool: ConnectionPool, media: MediaStore) {

    let mut interval = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        interval.tick().await;

        match run_once(&pool, &media, db::now()).await {
            Ok(sweep) if sweep == Sweep::default() => trace!("nothing to clean up"),
            Ok(sweep) => info!(
                "removed {} expired session(s) and {} old event(s)",
                sweep.sessions, sweep.events,
            ),
            Err(err) => error!("housekeeping failed: {}", err),
        }
    }
}


/// Starts the housekeeping task
///
/// Must be called from within the actix runtime.
pub fn start(pool: ConnectionPool, media: MediaStore) {
    actix_web::rt::spawn(run(pool, media));
}

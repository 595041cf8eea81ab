use std::mem;

use actix_web::{App, HttpServer};
use actix_web::middleware::Logger;
use log::info;

use porchwatch::config::Config;
use porchwatch::db;
use porchwatch::error::Result;
use porchwatch::logging;
use porchwatch::maintenance;
use porchwatch::mqtt::Mqtt;
use porchwatch::server::AppState;
use porchwatch::users;


#[actix_web::main]
async fn main() -> Result<()> {

    logging::init();

    let config = Config::from_env()?;
    let pool = db::connect(&config)?;

    // Perform initialization requiring database access
    let mut conn = pool.get()?;
    users::maybe_create_default_user(&mut conn, &config)?;
    mem::drop(conn);

    let mqtt = Mqtt::start(&config, pool.clone());
    let listen = config.listen.clone();
    let state = AppState::new(config, pool.clone(), mqtt)?;

    state.media.init().await?;
    maintenance::start(pool, state.media.get_ref().clone());

    info!("listening on {}", listen);
    HttpServer::new(move ||
            App::new()
                .wrap(Logger::default())
                .configure(|service| state.configure(service))
        )
        .bind(&listen)?
        .run()
        .await?;

    Ok(())
}

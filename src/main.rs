use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Logger, web};
use dotenv::dotenv;
use std::sync::Arc;

mod config;
mod controllers;
mod db;
mod error;
mod http;
mod models;
mod peek;
mod publisher;
mod quarantine;
mod rules;
mod store;

use config::Config;
use db::Database;
use publisher::{MessagePublisher, RabbitMqHttpPublisher};
use quarantine::QuarantineService;
use store::TriageStore;

pub struct AppState {
    pub store: Arc<TriageStore>,
    pub quarantine: Arc<QuarantineService>,
    pub config: Config,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;

    log::info!("Initializing database at {}", config.database_url);
    let db = Database::new(&config.database_url).expect("Failed to initialize database");
    let db = Arc::new(db);

    log::info!("Loading auto-quarantine rules");
    let store = Arc::new(TriageStore::new(db.clone()).expect("Failed to load quarantine rules"));
    log::info!("Loaded {} quarantine rules", store.list_rules().map(|r| r.len()).unwrap_or(0));

    let bus: Arc<dyn MessagePublisher> = Arc::new(RabbitMqHttpPublisher::new(
        config.rabbitmq_api_url.clone(),
        config.rabbitmq_vhost.clone(),
        config.rabbitmq_user.clone(),
        config.rabbitmq_password.clone(),
    ));
    let quarantine = Arc::new(QuarantineService::new(db.clone(), bus));

    log::info!("Starting triage backend on port {}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                store: Arc::clone(&store),
                quarantine: Arc::clone(&quarantine),
                config: config.clone(),
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::reporting::config)
            .configure(controllers::admin::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

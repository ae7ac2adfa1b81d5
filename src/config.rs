use std::env;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// How long a /peekmessage request waits for a worker to reply, in ms
    pub peek_timeout_ms: u64,
    /// 0 means "log the first occurrence of every distinct report";
    /// N > 0 means "stay silent until the Nth occurrence, log once, go quiet"
    pub retries_before_logging: u32,
    pub rabbitmq_api_url: String,
    /// Percent-encoded vhost, e.g. "%2f" for the default vhost
    pub rabbitmq_vhost: String,
    pub rabbitmq_user: String,
    pub rabbitmq_password: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("PORT must be a valid number"),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "./.db/triage.db".to_string()),
            peek_timeout_ms: env::var("PEEK_TIMEOUT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .expect("PEEK_TIMEOUT_MS must be a valid number"),
            retries_before_logging: env::var("RETRIES_BEFORE_LOGGING")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .expect("RETRIES_BEFORE_LOGGING must be a valid number"),
            rabbitmq_api_url: env::var("RABBITMQ_API_URL")
                .unwrap_or_else(|_| "http://localhost:15672".to_string()),
            rabbitmq_vhost: env::var("RABBITMQ_VHOST").unwrap_or_else(|_| "%2f".to_string()),
            rabbitmq_user: env::var("RABBITMQ_USER").unwrap_or_else(|_| "guest".to_string()),
            rabbitmq_password: env::var("RABBITMQ_PASSWORD")
                .unwrap_or_else(|_| "guest".to_string()),
        }
    }
}

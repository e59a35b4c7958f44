use std::env;
use std::path::PathBuf;
use tracing::info;

pub struct Config {
    pub port: u16,
    pub database_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("CLASSHUB_PORT", "8080"),
            database_path: PathBuf::from(try_load::<String>("CLASSHUB_DB", "classhub.db")),
        }
    }
}

fn try_load<T: std::str::FromStr>(key: &str, default: &str) -> T
where
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    match raw.parse() {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!("Invalid {key} value ({err}), using default: {default}");
            default.parse().ok().expect("default must parse")
        }
    }
}

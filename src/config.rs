use std::fs;

use serde_derive::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Postgres,
    Sled,
    Dummy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: Backend,
    pub world_dir: String,
    #[serde(default)]
    pub ignore_world_load_errors: bool,
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
}

impl Config {
    pub fn load(path: &str) -> Config {
        let data = fs::read_to_string(path).expect("Config file not found");
        toml::from_str::<Config>(data.as_str()).expect("Failed to parse config file")
    }
}

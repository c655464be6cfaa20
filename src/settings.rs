use std::env;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{name} must be a number, got {value:?}")]
    NotANumber { name: &'static str, value: String },
}

/**
 * Runtime configuration, read from the environment
 */
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /**
     * PostgreSQL connection string. Without one, polls only live in memory
     */
    pub database_url: Option<String>,
    pub listen_addr: String,
    pub max_connections: u32,
}

impl Settings {
    /**
     * Read the settings from the process environment.
     *
     * Call `dotenv()` beforehand for values from `.env` to be picked up.
     */
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());
        let listen_addr = lookup("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());

        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(value) => value.parse().map_err(|_| Error::NotANumber {
                name: "DATABASE_MAX_CONNECTIONS",
                value,
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url,
            listen_addr,
            max_connections,
        })
    }
}

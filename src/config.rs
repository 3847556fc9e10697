use std::env;
use std::fmt::{Debug, Display};
use std::net::SocketAddr;
use std::str::FromStr;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub database_path: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            addr: try_load("ATTENDANCE_ADDR", "0.0.0.0:3000"),
            database_path: try_load("ATTENDANCE_DB", "attendance.db"),
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display + Debug,
{
    let raw = match env::var(key) {
        Ok(value) => value,
        Err(_) => {
            log::debug!("{} not set, using default: {}", key, default);
            default.to_string()
        }
    };
    match raw.parse() {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Invalid {} value `{}`: {}, using default", key, raw, e);
            default.parse().expect("default must parse")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = Config::load();
        assert_eq!(config.addr.port(), 3000);
        assert!(!config.database_path.is_empty());
    }
}

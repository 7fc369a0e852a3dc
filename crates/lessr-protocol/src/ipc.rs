//! IPC mode selection for function calls.

use std::fmt;
use std::str::FromStr;

/// Environment variable naming the default IPC transport.
pub const IPC_MODE_ENV: &str = "LESS_JS_IPC_MODE";

/// How function arguments and AST buffers cross the process boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpcMode {
    /// Marshal inline in the JSON request (small payloads).
    Json,

    /// Hand over a shared-memory buffer and send only its key (large payloads).
    #[default]
    SharedMemory,
}

impl IpcMode {
    /// Resolve the default mode from `LESS_JS_IPC_MODE`, falling back to
    /// shared memory when the variable is unset or unrecognised.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var(IPC_MODE_ENV)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for IpcMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "shm" => Ok(Self::SharedMemory),
            other => Err(format!("Unknown IPC mode: {}", other)),
        }
    }
}

impl fmt::Display for IpcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::SharedMemory => write!(f, "shm"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_modes() {
        assert_eq!("json".parse::<IpcMode>(), Ok(IpcMode::Json));
        assert_eq!("shm".parse::<IpcMode>(), Ok(IpcMode::SharedMemory));
        assert_eq!(" JSON ".parse::<IpcMode>(), Ok(IpcMode::Json));
        assert!("carrier-pigeon".parse::<IpcMode>().is_err());
    }

    #[test]
    fn default_is_shared_memory() {
        assert_eq!(IpcMode::default(), IpcMode::SharedMemory);
    }

    #[test]
    fn display_matches_the_env_spelling() {
        assert_eq!(IpcMode::Json.to_string(), "json");
        assert_eq!(IpcMode::SharedMemory.to_string(), "shm");
    }
}

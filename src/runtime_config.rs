//! # Runtime Configuration Module
//!
//! Environment variable-based configuration for the server's runtime
//! behavior. Every knob also has a programmatic setter on
//! [`RuntimeConfig`], so the environment is a convenience, not the only
//! path.
//!
//! ## Environment Variables
//!
//! ### `RAILYARD_STACK_SIZE`
//!
//! Stack size for per-connection coroutines, decimal (`16384`) or hex
//! (`0x4000`). Default: `0x8000` (32 KB). Larger stacks support deeper call
//! chains inside handlers; smaller stacks reduce memory per concurrent
//! connection.
//!
//! ### `RAILYARD_MAX_CONNECTIONS`
//!
//! Cap on concurrent connections. New connections beyond the cap are
//! rejected at accept time - dropped, not queued. Default: `1024`.
//!
//! ### `RAILYARD_MAX_HEADER_BYTES`
//!
//! Ceiling on a request's header block. A client that streams bytes without
//! ever producing the header delimiter is cut off here. Default: `65536`.
//!
//! ### `RAILYARD_READ_TIMEOUT_MS`
//!
//! Receive timeout per socket read in milliseconds. A timeout is fatal to
//! that connection only. Default: `30000`.

use std::env;
use std::time::Duration;

use crate::framing::FramingConfig;

fn parse_size(val: &str) -> Option<usize> {
    if let Some(hex) = val.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        val.parse().ok()
    }
}

fn env_size(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| parse_size(&v))
        .unwrap_or(default)
}

/// Runtime configuration for the server.
///
/// Load from the environment with [`RuntimeConfig::from_env()`] or start
/// from `Default` and override fields programmatically.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for per-connection coroutines in bytes (default: 32 KB)
    pub stack_size: usize,
    /// Maximum concurrent connections (default: 1024)
    pub max_connections: usize,
    /// Header block ceiling in bytes (default: 64 KB)
    pub max_header_bytes: usize,
    /// Socket receive timeout (default: 30 s)
    pub read_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: 0x8000,
            max_connections: 1024,
            max_header_bytes: 64 * 1024,
            read_timeout: Duration::from_secs(30),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stack_size: env_size("RAILYARD_STACK_SIZE", defaults.stack_size),
            max_connections: env_size("RAILYARD_MAX_CONNECTIONS", defaults.max_connections),
            max_header_bytes: env_size("RAILYARD_MAX_HEADER_BYTES", defaults.max_header_bytes),
            read_timeout: Duration::from_millis(
                env_size(
                    "RAILYARD_READ_TIMEOUT_MS",
                    defaults.read_timeout.as_millis() as usize,
                ) as u64,
            ),
        }
    }

    /// The framing limits portion of this configuration.
    pub fn framing(&self) -> FramingConfig {
        FramingConfig {
            max_header_bytes: self.max_header_bytes,
            ..FramingConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_decimal_and_hex() {
        assert_eq!(parse_size("16384"), Some(16384));
        assert_eq!(parse_size("0x4000"), Some(0x4000));
        assert_eq!(parse_size("banana"), None);
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.stack_size, 0x8000);
        assert_eq!(config.max_connections, 1024);
        assert_eq!(config.framing().max_header_bytes, 64 * 1024);
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Agent configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration. Every
//! field has a default, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::XrceError;

/// Smallest MTU that still fits a keyed header, a subheader and a fragment.
pub const MIN_MESSAGE_SIZE: usize = 64;

/// Configuration for the XRCE agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XrceAgentConfig {
    /// UDP listen port (default: 2019, the XRCE standard port).
    pub udp_port: u16,
    /// Optional TCP listen port. If set, TCP transport is enabled.
    pub tcp_port: Option<u16>,
    /// Optional serial device path (e.g. "/dev/ttyUSB0").
    pub serial_device: Option<String>,
    /// Serial baud rate (default: 115200).
    pub serial_baud: u32,
    /// Framing address of the agent on the serial line.
    pub serial_address: u8,
    /// Maximum concurrent clients (default: 128).
    pub max_clients: usize,
    /// Heartbeat period in milliseconds for reliable streams (default: 200).
    pub heartbeat_period_ms: u64,
    /// Maximum message size in bytes (default: 512, typical MCU limit).
    pub max_message_size: usize,
    /// Receiver poll timeout in milliseconds.
    pub receive_timeout_ms: u64,
    /// Capacity of the input and output packet queues.
    pub queue_capacity: usize,
    /// Upper bound on a single middleware read inside a Reader.
    pub read_poll_ceiling_ms: u64,
}

impl Default for XrceAgentConfig {
    fn default() -> Self {
        Self {
            udp_port: 2019,
            tcp_port: None,
            serial_device: None,
            serial_baud: 115_200,
            serial_address: 0,
            max_clients: 128,
            heartbeat_period_ms: 200,
            max_message_size: 512,
            receive_timeout_ms: 100,
            queue_capacity: 256,
            read_poll_ceiling_ms: 100,
        }
    }
}

impl XrceAgentConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, XrceError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration. Returns Ok(()) if valid.
    pub fn validate(&self) -> Result<(), XrceError> {
        if self.max_clients == 0 || self.max_clients > u16::MAX as usize {
            return Err(XrceError::Config(format!(
                "max_clients must be in 1..=65535 (got {})",
                self.max_clients
            )));
        }
        if self.heartbeat_period_ms == 0 {
            return Err(XrceError::Config("heartbeat_period_ms must be > 0".into()));
        }
        if self.max_message_size < MIN_MESSAGE_SIZE || self.max_message_size > u16::MAX as usize {
            return Err(XrceError::Config(format!(
                "max_message_size must be in {}..=65535 (got {})",
                MIN_MESSAGE_SIZE, self.max_message_size
            )));
        }
        if self.serial_baud == 0 {
            return Err(XrceError::Config("serial_baud must be > 0".into()));
        }
        if self.receive_timeout_ms == 0 {
            return Err(XrceError::Config("receive_timeout_ms must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(XrceError::Config("queue_capacity must be > 0".into()));
        }
        if self.read_poll_ceiling_ms == 0 {
            return Err(XrceError::Config("read_poll_ceiling_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn read_poll_ceiling(&self) -> Duration {
        Duration::from_millis(self.read_poll_ceiling_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        assert!(XrceAgentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range() {
        let cfg = XrceAgentConfig {
            max_clients: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(XrceError::Config(_))));

        let cfg = XrceAgentConfig {
            max_message_size: 32,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = XrceAgentConfig {
            heartbeat_period_ms: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "udp_port = 8888").unwrap();
        writeln!(file, "tcp_port = 8889").unwrap();
        writeln!(file, "max_message_size = 1024").unwrap();
        let cfg = XrceAgentConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.udp_port, 8888);
        assert_eq!(cfg.tcp_port, Some(8889));
        assert_eq!(cfg.max_message_size, 1024);
        assert_eq!(cfg.heartbeat_period_ms, 200);
    }

    #[test]
    fn test_from_file_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "queue_capacity = 0").unwrap();
        assert!(matches!(
            XrceAgentConfig::from_file(file.path()),
            Err(XrceError::Config(_))
        ));
    }

    #[test]
    fn test_from_file_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "udp_port = \"not a number\"").unwrap();
        assert!(matches!(
            XrceAgentConfig::from_file(file.path()),
            Err(XrceError::Config(_))
        ));
    }
}

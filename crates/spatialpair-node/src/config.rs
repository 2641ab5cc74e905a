// ============================================
// File: crates/spatialpair-node/src/config.rs
// ============================================
//! # Pairing Configuration
//!
//! ## Creation Reason
//! Every tunable of a pairing node (DH group, timeouts, interlock round
//! count, oracle threshold) is passed in as one explicit value at
//! construction. Nothing is read from globals or the environment.
//!
//! ## Main Functionality
//! - `PairingConfig`: main configuration structure
//! - Per-section `validate()`, run eagerly by `load` / `from_str`
//! - Defaults for every field
//!
//! ## Configuration File Format
//! ```toml
//! [handshake]
//! protocol_name = "SpatialPair Authentication"
//! timeout_ms = 10000
//! keep_connected = true
//!
//! [interlock]
//! rounds = 2
//! round_timeout_ms = 5000
//! mirror_attack_guard = true
//! group_timeout_ms = 10000
//!
//! [verification]
//! payload_grace_ms = 5000
//! status_exchange = true
//! continuous_checking = false
//! concurrent_verification = true
//!
//! [oracle]
//! kind = "similarity"
//! threshold = 0.9
//!
//! [network]
//! listen_addr = "0.0.0.0:54321"
//! max_line_len = 1024
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `interlock.rounds` is a security parameter: both peers must agree
//!   on it and the default of 2 is the minimum, not a recommendation
//! - Config is validated on load, fail fast
//! - `oracle.kind = "exact"` requires `mirror_attack_guard = false`: the
//!   guard rejects a recovered payload equal to ours before the oracle
//!   ever sees it
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration structure

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use spatialpair_core::{DhGroup, MAX_ROUNDS, MIN_ROUNDS, DEFAULT_PROTOCOL_NAME};

use crate::error::{PairingError, Result};

/// Lower bound on `network.max_line_len`.
const MIN_LINE_LEN: usize = 512;

/// Room for the command keyword and an optional `PARAM` suffix.
const LINE_OVERHEAD: usize = 128;

// ============================================
// PairingConfig
// ============================================

/// Main pairing node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Handshake settings.
    #[serde(default)]
    pub handshake: HandshakeConfig,

    /// Interlock exchange settings.
    #[serde(default)]
    pub interlock: InterlockConfig,

    /// Verification run settings.
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Decision oracle settings.
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Network settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PairingConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PairingError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| PairingError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    ///
    /// # Errors
    /// Returns error if the string cannot be parsed or validated.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PairingError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// `ConfigInvalid` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.handshake.validate()?;
        self.interlock.validate()?;
        self.verification.validate()?;
        self.oracle.validate()?;
        self.network.validate()?;
        self.logging.validate()?;

        if self.interlock.mirror_attack_guard && self.oracle.matches_only_identical() {
            return Err(PairingError::config_invalid(
                "oracle.kind",
                "an oracle that only accepts identical payloads never matches while \
                 interlock.mirror_attack_guard is on; use kind = \"similarity\" with \
                 threshold < 1 or disable the guard",
            ));
        }

        let needed = self.handshake.dh_group()?.public_value_size() * 2 + LINE_OVERHEAD;
        if self.network.max_line_len < needed {
            return Err(PairingError::config_invalid(
                "network.max_line_len",
                format!("must be at least {needed} for the configured DH group"),
            ));
        }
        Ok(())
    }

    /// Serializes configuration to TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

// ============================================
// HandshakeConfig
// ============================================

/// Handshake configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Name sent in the `HELO` greeting; both peers must use the same one.
    #[serde(default = "default_protocol_name")]
    pub protocol_name: String,

    /// Budget for one complete handshake in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub timeout_ms: u64,

    /// Keep the connection open for the verification phase.
    #[serde(default = "default_true")]
    pub keep_connected: bool,

    /// Hex modulus of a custom DH group. Unset means the 1024-bit SKIP group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dh_modulus_hex: Option<String>,

    /// Generator of the custom DH group.
    #[serde(default = "default_generator")]
    pub dh_generator: u32,
}

fn default_protocol_name() -> String {
    DEFAULT_PROTOCOL_NAME.to_string()
}

fn default_handshake_timeout() -> u64 {
    10_000
}

fn default_generator() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl HandshakeConfig {
    /// Handshake budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Builds the configured DH group.
    ///
    /// # Errors
    /// `ConfigInvalid` if the custom modulus is unusable.
    pub fn dh_group(&self) -> Result<DhGroup> {
        match &self.dh_modulus_hex {
            None => Ok(DhGroup::skip_1024()),
            Some(hex) => DhGroup::from_hex(hex, self.dh_generator)
                .map_err(|e| PairingError::config_invalid("handshake.dh_modulus_hex", e.to_string())),
        }
    }

    fn validate(&self) -> Result<()> {
        let name = self.protocol_name.trim();
        if name.is_empty() || name != self.protocol_name {
            return Err(PairingError::config_invalid(
                "handshake.protocol_name",
                "must be non-empty without surrounding whitespace",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(PairingError::config_invalid(
                "handshake.timeout_ms",
                "must be greater than 0",
            ));
        }
        self.dh_group()?;
        Ok(())
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_name: default_protocol_name(),
            timeout_ms: default_handshake_timeout(),
            keep_connected: true,
            dh_modulus_hex: None,
            dh_generator: default_generator(),
        }
    }
}

// ============================================
// InterlockConfig
// ============================================

/// Interlock exchange configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterlockConfig {
    /// Number of fragments each ciphertext is split into.
    #[serde(default = "default_rounds")]
    pub rounds: usize,

    /// Deadline for one round (send ours, receive theirs) in milliseconds.
    #[serde(default = "default_round_timeout")]
    pub round_timeout_ms: u64,

    /// Fail when the peer's payload is byte-identical to ours.
    #[serde(default = "default_true")]
    pub mirror_attack_guard: bool,

    /// Deadline for a group barrier wait in milliseconds.
    #[serde(default = "default_group_timeout")]
    pub group_timeout_ms: u64,
}

fn default_rounds() -> usize {
    MIN_ROUNDS
}

fn default_round_timeout() -> u64 {
    5_000
}

fn default_group_timeout() -> u64 {
    10_000
}

impl InterlockConfig {
    #[must_use]
    pub const fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    #[must_use]
    pub const fn group_timeout(&self) -> Duration {
        Duration::from_millis(self.group_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&self.rounds) {
            return Err(PairingError::config_invalid(
                "interlock.rounds",
                format!("must be in {MIN_ROUNDS}..={MAX_ROUNDS}"),
            ));
        }
        if self.round_timeout_ms == 0 {
            return Err(PairingError::config_invalid(
                "interlock.round_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.group_timeout_ms == 0 {
            return Err(PairingError::config_invalid(
                "interlock.group_timeout_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for InterlockConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            round_timeout_ms: default_round_timeout(),
            mirror_attack_guard: true,
            group_timeout_ms: default_group_timeout(),
        }
    }
}

// ============================================
// VerificationConfig
// ============================================

/// Verification run configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// How long a run waits for the local payload in milliseconds.
    #[serde(default = "default_payload_grace")]
    pub payload_grace_ms: u64,

    /// Exchange `ACK` / `NACK` lines after the oracle decides.
    #[serde(default = "default_true")]
    pub status_exchange: bool,

    /// Debug mode: keep re-verifying instead of finishing after one decision.
    #[serde(default)]
    pub continuous_checking: bool,

    /// Allow more than one remote in the verifying state at once.
    #[serde(default = "default_true")]
    pub concurrent_verification: bool,
}

fn default_payload_grace() -> u64 {
    5_000
}

impl VerificationConfig {
    #[must_use]
    pub const fn payload_grace(&self) -> Duration {
        Duration::from_millis(self.payload_grace_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.payload_grace_ms == 0 {
            return Err(PairingError::config_invalid(
                "verification.payload_grace_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            payload_grace_ms: default_payload_grace(),
            status_exchange: true,
            continuous_checking: false,
            concurrent_verification: true,
        }
    }
}

// ============================================
// OracleConfig
// ============================================

/// Built-in oracle selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    /// Byte-for-byte equality.
    Exact,
    /// Fraction of equal bytes at or above `threshold`.
    #[default]
    Similarity,
}

/// Decision oracle configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Which built-in oracle to use.
    #[serde(default)]
    pub kind: OracleKind,

    /// Similarity threshold in `[0, 1]`.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.9
}

impl OracleConfig {
    /// `true` if the selected oracle only accepts byte-identical payloads.
    #[must_use]
    pub fn matches_only_identical(&self) -> bool {
        self.kind == OracleKind::Exact || self.threshold >= 1.0
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(PairingError::config_invalid(
                "oracle.threshold",
                "must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            kind: OracleKind::default(),
            threshold: default_threshold(),
        }
    }
}

// ============================================
// NetworkConfig
// ============================================

/// Network configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address the listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Longest accepted handshake line in bytes.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,

    /// Outbound connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 54321))
}

fn default_max_line_len() -> usize {
    1024
}

fn default_connect_timeout() -> u64 {
    10_000
}

impl NetworkConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_line_len < MIN_LINE_LEN {
            return Err(PairingError::config_invalid(
                "network.max_line_len",
                format!("must be at least {MIN_LINE_LEN}"),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(PairingError::config_invalid(
                "network.connect_timeout_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_line_len: default_max_line_len(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => Err(PairingError::config_invalid(
                "logging.level",
                "must be one of trace, debug, info, warn, error",
            )),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PairingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.interlock.rounds, 2);
        assert!(config.interlock.mirror_attack_guard);
        assert_eq!(config.network.listen_addr.port(), 54321);
        assert_eq!(config.handshake.protocol_name, DEFAULT_PROTOCOL_NAME);
    }

    #[test]
    fn test_full_config_format() {
        let toml = r#"
            [handshake]
            protocol_name = "SpatialPair Authentication"
            timeout_ms = 3000
            keep_connected = true

            [interlock]
            rounds = 4
            round_timeout_ms = 750
            mirror_attack_guard = false
            group_timeout_ms = 2000

            [verification]
            payload_grace_ms = 1500
            status_exchange = false
            continuous_checking = true
            concurrent_verification = false

            [oracle]
            kind = "exact"

            [network]
            listen_addr = "127.0.0.1:60000"
            max_line_len = 2048

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config = PairingConfig::from_str(toml).unwrap();
        assert_eq!(config.handshake.timeout(), Duration::from_millis(3000));
        assert_eq!(config.interlock.rounds, 4);
        assert_eq!(config.interlock.round_timeout(), Duration::from_millis(750));
        assert!(!config.verification.status_exchange);
        assert!(config.verification.continuous_checking);
        assert!(!config.verification.concurrent_verification);
        assert_eq!(config.oracle.kind, OracleKind::Exact);
        assert!((config.oracle.threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.network.listen_addr.port(), 60000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = PairingConfig::from_str("[interlock]\nrounds = 8\n").unwrap();
        assert_eq!(config.interlock.rounds, 8);
        assert_eq!(config.interlock.round_timeout_ms, 5000);
        assert_eq!(config.verification.payload_grace_ms, 5000);
        assert_eq!(config.oracle.kind, OracleKind::Similarity);
    }

    #[test]
    fn test_rounds_out_of_range() {
        for rounds in [0, 1, 129] {
            let toml = format!("[interlock]\nrounds = {rounds}\n");
            let err = PairingConfig::from_str(&toml).unwrap_err();
            assert!(err.is_config_error());
            assert!(err.to_string().contains("interlock.rounds"));
        }
        assert!(PairingConfig::from_str("[interlock]\nrounds = 128\n").is_ok());
    }

    #[test]
    fn test_threshold_validation() {
        assert!(PairingConfig::from_str("[oracle]\nthreshold = 1.5\n").is_err());
        assert!(PairingConfig::from_str("[oracle]\nthreshold = -0.1\n").is_err());
        assert!(PairingConfig::from_str("[oracle]\nthreshold = 0.0\n").is_ok());
        assert!(PairingConfig::from_str("[oracle]\nthreshold = nan\n").is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(PairingConfig::from_str("[handshake]\ntimeout_ms = 0\n").is_err());
        assert!(PairingConfig::from_str("[interlock]\nround_timeout_ms = 0\n").is_err());
        assert!(PairingConfig::from_str("[verification]\npayload_grace_ms = 0\n").is_err());
    }

    #[test]
    fn test_custom_dh_group() {
        let bad = "[handshake]\ndh_modulus_hex = \"zz\"\n";
        let err = PairingConfig::from_str(bad).unwrap_err();
        assert!(err.to_string().contains("dh_modulus_hex"));

        let config = PairingConfig::default();
        assert_eq!(config.handshake.dh_group().unwrap().public_value_size(), 128);
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let text = PairingConfig::default().to_toml();
        let parsed = PairingConfig::from_str(&text).unwrap();
        assert_eq!(parsed.interlock.rounds, 2);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn test_exact_oracle_conflicts_with_mirror_guard() {
        let err = PairingConfig::from_str("[oracle]\nkind = \"exact\"\n").unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("oracle.kind"));

        let strict = "[oracle]\nkind = \"similarity\"\nthreshold = 1.0\n";
        assert!(PairingConfig::from_str(strict).is_err());

        let unguarded = "[interlock]\nmirror_attack_guard = false\n\n[oracle]\nkind = \"exact\"\n";
        let config = PairingConfig::from_str(unguarded).unwrap();
        assert_eq!(config.oracle.kind, OracleKind::Exact);
    }

    #[test]
    fn test_default_oracle_accepts_near_matches() {
        let config = PairingConfig::default();
        assert_eq!(config.oracle.kind, OracleKind::Similarity);
        assert!(!config.oracle.matches_only_identical());
    }

    #[test]
    fn test_short_line_limit_rejected() {
        assert!(PairingConfig::from_str("[network]\nmax_line_len = 100\n").is_err());
    }
}

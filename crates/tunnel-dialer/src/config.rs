//! Dialer configuration

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Tunnel dialer configuration
///
/// Deserializing applies the same checks as [`DialerConfigBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DialerConfigFile")]
pub struct DialerConfig {
    /// Loopback address the tunnel's local end binds to
    pub local_address: Ipv4Addr,
    /// Upper bound on waiting for the tunnel to become ready
    #[serde(serialize_with = "duration_secs::serialize")]
    pub setup_timeout: Duration,
    /// Upper bound on joining the forwarding task during teardown
    #[serde(serialize_with = "duration_secs::serialize")]
    pub teardown_timeout: Duration,
    /// Deadline applied to each dial made through [`crate::TunnelConnector`]
    #[serde(serialize_with = "duration_secs::serialize")]
    pub connect_timeout: Duration,
}

/// Unvalidated on-disk form of [`DialerConfig`]
#[derive(Deserialize)]
struct DialerConfigFile {
    local_address: Ipv4Addr,
    #[serde(with = "duration_secs")]
    setup_timeout: Duration,
    #[serde(with = "duration_secs")]
    teardown_timeout: Duration,
    #[serde(with = "duration_secs")]
    connect_timeout: Duration,
}

impl TryFrom<DialerConfigFile> for DialerConfig {
    type Error = String;

    fn try_from(file: DialerConfigFile) -> Result<Self, Self::Error> {
        DialerConfig::builder()
            .local_address(file.local_address)
            .setup_timeout(file.setup_timeout)
            .teardown_timeout(file.teardown_timeout)
            .connect_timeout(file.connect_timeout)
            .build()
    }
}

/// Helper module for serializing Duration as seconds
///
/// Whole seconds are written as integers, anything finer as a float.
mod duration_secs {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            // Explicit IPv4 so the local end is never bound on [::1]
            local_address: Ipv4Addr::LOCALHOST,
            setup_timeout: Duration::from_secs(30),
            teardown_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(60),
        }
    }
}

impl DialerConfig {
    pub fn builder() -> DialerConfigBuilder {
        DialerConfigBuilder::default()
    }
}

/// Builder for DialerConfig
#[derive(Default)]
pub struct DialerConfigBuilder {
    config: DialerConfig,
}

impl DialerConfigBuilder {
    pub fn local_address(mut self, address: Ipv4Addr) -> Self {
        self.config.local_address = address;
        self
    }

    pub fn setup_timeout(mut self, timeout: Duration) -> Self {
        self.config.setup_timeout = timeout;
        self
    }

    pub fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.config.teardown_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<DialerConfig, String> {
        if !self.config.local_address.is_loopback() {
            return Err(format!(
                "local_address must be a loopback address, got {}",
                self.config.local_address
            ));
        }
        if self.config.setup_timeout.is_zero() {
            return Err("setup_timeout must be non-zero".to_string());
        }
        if self.config.teardown_timeout.is_zero() {
            return Err("teardown_timeout must be non-zero".to_string());
        }
        if self.config.connect_timeout.is_zero() {
            return Err("connect_timeout must be non-zero".to_string());
        }
        Ok(self.config)
    }
}

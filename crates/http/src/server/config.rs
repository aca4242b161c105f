use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::codec::{MAX_HEADER_BYTES, MAX_HEADER_NUM};
use crate::connection::{DEFAULT_MAX_FORM_BYTES, ExchangeConfig};
use crate::stream::{DEFAULT_READ_BUFFER, DEFAULT_WRITE_BUFFER};

/// Settings of a [`Server`](super::Server), fixed once it started.
///
/// Durations are given in milliseconds when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub max_output_bytes: Option<u64>,
    pub max_header_bytes: usize,
    pub max_headers: usize,
    pub max_form_bytes: usize,
    /// how long one accept may block before the acceptor looks at the stop flag again
    #[serde(deserialize_with = "millis")]
    pub accept_timeout: Duration,
    /// how long a kept-alive connection may wait for its next request
    #[serde(deserialize_with = "optional_millis")]
    pub idle_timeout: Option<Duration>,
    /// how long shutdown waits for connections to finish before closing them
    #[serde(deserialize_with = "millis")]
    pub grace_period: Duration,
    /// maximum number of connections served at once
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            read_buffer_size: DEFAULT_READ_BUFFER,
            write_buffer_size: DEFAULT_WRITE_BUFFER,
            max_output_bytes: None,
            max_header_bytes: MAX_HEADER_BYTES,
            max_headers: MAX_HEADER_NUM,
            max_form_bytes: DEFAULT_MAX_FORM_BYTES,
            accept_timeout: Duration::from_secs(1),
            idle_timeout: Some(Duration::from_secs(30)),
            grace_period: Duration::from_secs(5),
            workers: 256,
        }
    }
}

impl ServerConfig {
    pub fn exchange_config(&self) -> ExchangeConfig {
        ExchangeConfig {
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
            max_output_bytes: self.max_output_bytes,
            max_header_bytes: self.max_header_bytes,
            max_headers: self.max_headers,
            max_form_bytes: self.max_form_bytes,
        }
    }
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn optional_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration for the queue service.
///
/// Covers the broker endpoint and the operational parameters of the
/// connection, publisher and consumer layers.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub retry: RetrySettings,
    pub publisher: PublisherSettings,
    pub consumer: ConsumerSettings,
}

/// Broker endpoint and channel limits.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub virtual_host: String,
    pub username: String,
    pub password: String,
    pub max_channels: usize,
}

/// Reconnect behavior of the connection manager.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

/// Publisher-side retry and confirmation defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct PublisherSettings {
    pub retries: u32,
    pub require_ack: bool,
}

/// Consumer-side dispatch parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct ConsumerSettings {
    pub prefetch: u16,
    pub ack_timeout_secs: u64,
    pub redelivery_limit: u32,
    pub dead_letter_queue: Option<String>,
    pub drain_grace_secs: u64,
}

impl ConsumerSettings {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}

/// Partial configuration loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub retry: Option<PartialRetrySettings>,
    pub publisher: Option<PartialPublisherSettings>,
    pub consumer: Option<PartialConsumerSettings>,
}

/// Partial broker settings from external sources with optional values.
#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub virtual_host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_channels: Option<usize>,
}

/// Partial retry settings from external sources with optional values.
#[derive(Debug, Deserialize)]
pub struct PartialRetrySettings {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<f64>,
}

/// Partial publisher settings from external sources with optional values.
#[derive(Debug, Deserialize)]
pub struct PartialPublisherSettings {
    pub retries: Option<u32>,
    pub require_ack: Option<bool>,
}

/// Partial consumer settings from external sources with optional values.
#[derive(Debug, Deserialize)]
pub struct PartialConsumerSettings {
    pub prefetch: Option<u16>,
    pub ack_timeout_secs: Option<u64>,
    pub redelivery_limit: Option<u32>,
    pub dead_letter_queue: Option<String>,
    pub drain_grace_secs: Option<u64>,
}

/// Provides default values for `Settings`.
///
/// The defaults mirror the original service's operational choices
/// (prefetch 1, persistent JSON messages against a local broker) so the
/// library is usable with no configuration at all.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                host: "localhost".to_string(),
                port: 5672,
                virtual_host: "/".to_string(),
                username: "guest".to_string(),
                password: "guest".to_string(),
                max_channels: 8,
            },
            retry: RetrySettings {
                max_attempts: 3,
                base_delay_ms: 200,
                multiplier: 2.0,
                max_delay_ms: 5000,
                jitter: 0.25,
            },
            publisher: PublisherSettings {
                retries: 3,
                require_ack: false,
            },
            consumer: ConsumerSettings {
                prefetch: 1,
                ack_timeout_secs: 30,
                redelivery_limit: 3,
                dead_letter_queue: None,
                drain_grace_secs: 5,
            },
        }
    }
}

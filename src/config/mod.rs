//! The `config` module handles loading and merging configuration from an
//! optional `config/default` file and environment variables, falling back
//! to defaults that match the original service's behavior.

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    BrokerSettings, ConsumerSettings, PublisherSettings, RetrySettings, Settings,
};

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing broker, retry, publisher and consumer sections
pub fn load_config() -> Result<Settings, ConfigError> {
    dotenvy::dotenv().ok();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("_"));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    Ok(Settings {
        broker: BrokerSettings {
            host: partial
                .broker
                .as_ref()
                .and_then(|b| b.host.clone())
                .unwrap_or(default.broker.host),
            port: partial
                .broker
                .as_ref()
                .and_then(|b| b.port)
                .unwrap_or(default.broker.port),
            virtual_host: partial
                .broker
                .as_ref()
                .and_then(|b| b.virtual_host.clone())
                .unwrap_or(default.broker.virtual_host),
            username: partial
                .broker
                .as_ref()
                .and_then(|b| b.username.clone())
                .unwrap_or(default.broker.username),
            password: partial
                .broker
                .as_ref()
                .and_then(|b| b.password.clone())
                .unwrap_or(default.broker.password),
            max_channels: partial
                .broker
                .as_ref()
                .and_then(|b| b.max_channels)
                .unwrap_or(default.broker.max_channels),
        },
        retry: RetrySettings {
            max_attempts: partial
                .retry
                .as_ref()
                .and_then(|r| r.max_attempts)
                .unwrap_or(default.retry.max_attempts),
            base_delay_ms: partial
                .retry
                .as_ref()
                .and_then(|r| r.base_delay_ms)
                .unwrap_or(default.retry.base_delay_ms),
            multiplier: partial
                .retry
                .as_ref()
                .and_then(|r| r.multiplier)
                .unwrap_or(default.retry.multiplier),
            max_delay_ms: partial
                .retry
                .as_ref()
                .and_then(|r| r.max_delay_ms)
                .unwrap_or(default.retry.max_delay_ms),
            jitter: partial
                .retry
                .as_ref()
                .and_then(|r| r.jitter)
                .unwrap_or(default.retry.jitter),
        },
        publisher: PublisherSettings {
            retries: partial
                .publisher
                .as_ref()
                .and_then(|p| p.retries)
                .unwrap_or(default.publisher.retries),
            require_ack: partial
                .publisher
                .as_ref()
                .and_then(|p| p.require_ack)
                .unwrap_or(default.publisher.require_ack),
        },
        consumer: ConsumerSettings {
            prefetch: partial
                .consumer
                .as_ref()
                .and_then(|c| c.prefetch)
                .unwrap_or(default.consumer.prefetch),
            ack_timeout_secs: partial
                .consumer
                .as_ref()
                .and_then(|c| c.ack_timeout_secs)
                .unwrap_or(default.consumer.ack_timeout_secs),
            redelivery_limit: partial
                .consumer
                .as_ref()
                .and_then(|c| c.redelivery_limit)
                .unwrap_or(default.consumer.redelivery_limit),
            dead_letter_queue: partial
                .consumer
                .as_ref()
                .and_then(|c| c.dead_letter_queue.clone())
                .or(default.consumer.dead_letter_queue),
            drain_grace_secs: partial
                .consumer
                .as_ref()
                .and_then(|c| c.drain_grace_secs)
                .unwrap_or(default.consumer.drain_grace_secs),
        },
    })
}

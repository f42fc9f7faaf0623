use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub timesync: TimeSyncSettings,
    pub persistence: PersistenceSettings,
    pub logging: LoggingSettings,
}

/// Address the WebSocket server binds to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Limits of the topic registry and client sessions.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub max_connections: usize,
    /// Messages a client may have queued before its socket stops being read.
    pub inbound_queue_capacity: usize,
    /// Messages the storage task handles per client before yielding.
    pub max_batch: usize,
    /// Values kept per in-process subscriber.
    pub local_queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TimeSyncSettings {
    pub port: u16,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PersistenceSettings {
    /// Directory of the sled database; persistence is off when unset.
    pub path: Option<String>,
    pub save_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from
/// `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub timesync: Option<PartialTimeSyncSettings>,
    pub persistence: Option<PartialPersistenceSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub inbound_queue_capacity: Option<usize>,
    pub max_batch: Option<usize>,
    pub local_queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialTimeSyncSettings {
    pub port: Option<u16>,
    pub interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialPersistenceSettings {
    pub path: Option<String>,
    pub save_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 5810,
            },
            broker: BrokerSettings {
                max_connections: 64,
                inbound_queue_capacity: 1024,
                max_batch: 64,
                local_queue_capacity: 1024,
            },
            timesync: TimeSyncSettings {
                port: 5810,
                interval_ms: 1000,
                timeout_ms: 1000,
            },
            persistence: PersistenceSettings {
                path: None,
                save_interval_ms: 1000,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fills every value missing from `partial` with its default.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let server = partial.server.as_ref();
        let broker = partial.broker.as_ref();
        let timesync = partial.timesync.as_ref();
        let persistence = partial.persistence.as_ref();

        Settings {
            server: ServerSettings {
                host: server
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: server.and_then(|s| s.port).unwrap_or(default.server.port),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .and_then(|b| b.max_connections)
                    .unwrap_or(default.broker.max_connections),
                inbound_queue_capacity: broker
                    .and_then(|b| b.inbound_queue_capacity)
                    .unwrap_or(default.broker.inbound_queue_capacity),
                max_batch: broker
                    .and_then(|b| b.max_batch)
                    .unwrap_or(default.broker.max_batch),
                local_queue_capacity: broker
                    .and_then(|b| b.local_queue_capacity)
                    .unwrap_or(default.broker.local_queue_capacity),
            },
            timesync: TimeSyncSettings {
                port: timesync
                    .and_then(|t| t.port)
                    .unwrap_or(default.timesync.port),
                interval_ms: timesync
                    .and_then(|t| t.interval_ms)
                    .unwrap_or(default.timesync.interval_ms),
                timeout_ms: timesync
                    .and_then(|t| t.timeout_ms)
                    .unwrap_or(default.timesync.timeout_ms),
            },
            persistence: PersistenceSettings {
                path: persistence
                    .and_then(|p| p.path.clone())
                    .or(default.persistence.path),
                save_interval_ms: persistence
                    .and_then(|p| p.save_interval_ms)
                    .unwrap_or(default.persistence.save_interval_ms),
            },
            logging: LoggingSettings {
                level: partial
                    .logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
        }
    }
}

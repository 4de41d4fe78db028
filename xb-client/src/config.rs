use std::path::PathBuf;

use log::LevelFilter;

use crate::error::ClientError;

/// Flat configuration surface (§6.4), populated from `(key, value)` pairs —
/// the same shape the CLI parser in [`crate::cli`] produces, or that an
/// embedding application harvests from its own properties file.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// ms between pings in ALIVE; 0 disables.
    pub ping_interval_ms: u64,
    /// reconnect attempts in POLLING; -1 = forever, 0 = no polling.
    pub retries: i64,
    /// ms between reconnect attempts; >0 enables failsafe.
    pub delay_ms: u64,

    pub hostname: String,
    pub port: u16,
    pub local_hostname: Option<String>,
    pub local_port: Option<u16>,
    pub use_udp_for_oneway: bool,
    /// `Some("zlib:stream")` or `None`.
    pub compress_type: Option<String>,

    pub queue_max_entries: i64,
    pub queue_max_bytes: i64,
    pub queue_db_name: PathBuf,
    pub queue_node_id: String,
    pub queue_name: String,

    pub log_level: LevelFilter,

    /// How long `Correlator::await_response` blocks before raising
    /// `ResponseTimeout` (§7). Not itself one of the named §6.4 keys —
    /// per-invocation timeouts are normally carried in the qos document
    /// passed to each call rather than connect-time configuration — but
    /// every invocation in this core needs a bound, so it is hoisted here
    /// as a client-wide default.
    pub response_timeout_ms: u64,

    /// Attempts for the very first `connect()` only, distinct from the
    /// steady-state POLLING backoff in C8. 0 = a single attempt, no retry.
    pub initial_connect_retries: u32,
    pub initial_connect_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            ping_interval_ms: 10_000,
            retries: -1,
            delay_ms: 0,
            hostname: "localhost".to_owned(),
            port: 7607,
            local_hostname: None,
            local_port: None,
            use_udp_for_oneway: false,
            compress_type: None,
            queue_max_entries: 1_000,
            queue_max_bytes: 10_000_000,
            queue_db_name: PathBuf::from("xmlBlasterClient.sqlite3"),
            queue_node_id: "client".to_owned(),
            queue_name: "tail".to_owned(),
            log_level: LevelFilter::Warn,
            response_timeout_ms: 30_000,
            initial_connect_retries: 0,
            initial_connect_delay_ms: 0,
        }
    }
}

impl ClientConfig {
    /// `delay_ms > 0` is what enables failsafe mode (§4.7, §6.4).
    pub fn failsafe_enabled(&self) -> bool {
        self.delay_ms > 0
    }

    /// Apply `(key, value)` pairs over the defaults, per §6.4. Unknown
    /// keys are ignored — the core only reads the handful of client
    /// properties it knows about and leaves the rest alone.
    pub fn from_options(options: &[(String, String)]) -> Result<Self, ClientError> {
        let mut config = ClientConfig::default();
        for (key, value) in options {
            apply_option(&mut config, key, value)?;
        }
        Ok(config)
    }
}

fn apply_option(config: &mut ClientConfig, key: &str, value: &str) -> Result<(), ClientError> {
    let parse_u64 = |v: &str| -> Result<u64, ClientError> {
        v.parse()
            .map_err(|_| ClientError::IllegalArgument(format!("{}={} is not a number", key, v)))
    };
    let parse_i64 = |v: &str| -> Result<i64, ClientError> {
        v.parse()
            .map_err(|_| ClientError::IllegalArgument(format!("{}={} is not a number", key, v)))
    };
    let parse_bool = |v: &str| -> bool { matches!(v, "true" | "1" | "yes") };

    match key {
        "dispatch/connection/pingInterval" => config.ping_interval_ms = parse_u64(value)?,
        "dispatch/connection/retries" => config.retries = parse_i64(value)?,
        "dispatch/connection/delay" => config.delay_ms = parse_u64(value)?,
        "dispatch/connection/plugin/socket/hostname" => config.hostname = value.to_owned(),
        "dispatch/connection/plugin/socket/port" => {
            config.port = value
                .parse()
                .map_err(|_| ClientError::IllegalArgument(format!("invalid port {}", value)))?
        }
        "dispatch/connection/plugin/socket/localHostname" => config.local_hostname = Some(value.to_owned()),
        "dispatch/connection/plugin/socket/localPort" => {
            config.local_port = Some(
                value
                    .parse()
                    .map_err(|_| ClientError::IllegalArgument(format!("invalid localPort {}", value)))?,
            )
        }
        "dispatch/connection/plugin/socket/useUdpForOneway" => config.use_udp_for_oneway = parse_bool(value),
        "dispatch/connection/plugin/socket/compress/type" => {
            config.compress_type = if value.is_empty() { None } else { Some(value.to_owned()) }
        }
        "queue/connection/maxEntries" => config.queue_max_entries = parse_i64(value)?,
        "queue/connection/maxBytes" => config.queue_max_bytes = parse_i64(value)?,
        "queue/connection/dbName" => config.queue_db_name = PathBuf::from(value),
        "queue/connection/nodeId" => config.queue_node_id = value.to_owned(),
        "queue/connection/queueName" => config.queue_name = value.to_owned(),
        "queue/connection/tablePrefix" => { /* accepted for compatibility; xb-queue uses a fixed schema */ }
        "logLevel" => config.log_level = parse_log_level(value)?,
        _ => warn!("ignoring unknown configuration key '{}'", key),
    }
    Ok(())
}

fn parse_log_level(value: &str) -> Result<LevelFilter, ClientError> {
    Ok(match value {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "trace" => LevelFilter::Trace,
        // "dump" has no `log` crate equivalent coarser than Trace; wire-level
        // hex dumps are emitted at `trace!` regardless (see `transport.rs`).
        "dump" => LevelFilter::Trace,
        other => {
            return Err(ClientError::IllegalArgument(format!(
                "unknown logLevel '{}'",
                other
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_delay_disables_failsafe() {
        let config = ClientConfig::default();
        assert!(!config.failsafe_enabled());
    }

    #[test]
    fn delay_enables_failsafe() {
        let options = vec![("dispatch/connection/delay".to_owned(), "10000".to_owned())];
        let config = ClientConfig::from_options(&options).unwrap();
        assert!(config.failsafe_enabled());
        assert_eq!(config.delay_ms, 10_000);
    }

    #[test]
    fn unknown_log_level_is_illegal_argument() {
        let options = vec![("logLevel".to_owned(), "verbose".to_owned())];
        assert!(matches!(
            ClientConfig::from_options(&options),
            Err(ClientError::IllegalArgument(_))
        ));
    }
}

//! Configuration for the review gateway
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

use crate::command::WireFormat;
use crate::logging::LogFormat;

/// Review gateway - cache-aside reads, queued writes
#[derive(Parser, Debug, Clone)]
#[command(name = "review-gateway")]
#[command(about = "HTTP gateway for reviews with cache-aside reads and queued writes")]
#[command(version)]
pub struct Args {
    /// Unique node identifier for this gateway instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (runs an embedded processor when NATS is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Read service timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "5000")]
    pub request_timeout_ms: u64,

    /// Time allowed for the queue to confirm a publish, in milliseconds
    #[arg(long, env = "PUBLISH_TIMEOUT_MS", default_value = "5000")]
    pub publish_timeout_ms: u64,

    /// Encoding of published commands
    #[arg(long, env = "COMMAND_WIRE_FORMAT", value_enum, default_value_t = WireFormat::Json)]
    pub command_wire_format: WireFormat,

    /// Delay before the embedded processor applies a command (dev mode only)
    #[arg(long, env = "EMBEDDED_APPLY_DELAY_MS", default_value = "0")]
    pub embedded_apply_delay_ms: u64,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn embedded_apply_delay(&self) -> Duration {
        Duration::from_millis(self.embedded_apply_delay_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than 0".to_string());
        }

        if self.publish_timeout_ms == 0 {
            return Err("PUBLISH_TIMEOUT_MS must be greater than 0".to_string());
        }

        if self.nats.nats_user.is_some() != self.nats.nats_password.is_some() {
            return Err("NATS_USER and NATS_PASSWORD must be set together".to_string());
        }

        if self.embedded_apply_delay_ms > 0 && !self.dev_mode {
            return Err("EMBEDDED_APPLY_DELAY_MS only applies with DEV_MODE".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["review-gateway"]);
        assert_eq!(args.listen.port(), 8080);
        assert_eq!(args.request_timeout(), Duration::from_secs(5));
        assert_eq!(args.command_wire_format, WireFormat::Json);
        assert_eq!(args.log_format, LogFormat::Text);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_flags_override() {
        let args = Args::parse_from([
            "review-gateway",
            "--listen",
            "127.0.0.1:9000",
            "--command-wire-format",
            "text",
            "--dev-mode",
            "--embedded-apply-delay-ms",
            "20000",
        ]);
        assert_eq!(args.command_wire_format, WireFormat::Text);
        assert_eq!(args.embedded_apply_delay(), Duration::from_secs(20));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_half_credentials() {
        let args = Args::parse_from(["review-gateway", "--nats-user", "svc"]);
        assert!(args.validate().is_err());
    }
}

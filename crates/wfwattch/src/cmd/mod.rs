use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;

use clap::{Args, Subcommand};
use tracing::debug;
use wfwattch_session::{DeviceSession, SessionConfig, DEFAULT_PORT};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod measure;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Take a single measurement.
    Measure(MeasureArgs),
    /// Poll the meter periodically and print each reading.
    Watch(WatchArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Measure(args) => measure::run(args, format),
        Command::Watch(args) => watch::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DeviceArgs {
    /// Meter host name or IP address.
    #[arg(long, short = 'H', env = "WFWATTCH_HOST")]
    pub host: String,
    /// Meter TCP port.
    #[arg(long, default_value_t = DEFAULT_PORT, env = "WFWATTCH_PORT")]
    pub port: u16,
    /// Bound for each connect and measure call (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

impl DeviceArgs {
    /// Resolve the host and build a disconnected session.
    pub fn session(&self) -> CliResult<DeviceSession> {
        let config = SessionConfig {
            port: self.port,
            timeout: parse_duration(&self.timeout)?,
        };
        let address = resolve_host(&self.host, self.port)?;
        debug!(host = %self.host, %address, port = self.port, "resolved meter address");
        Ok(DeviceSession::with_config(address, config))
    }
}

#[derive(Args, Debug)]
pub struct MeasureArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Polling interval (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Exit after N successful readings.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// An IP literal is used as is; anything else goes through the system resolver.
pub fn resolve_host(host: &str, port: u16) -> CliResult<IpAddr> {
    if let Ok(address) = host.parse::<IpAddr>() {
        return Ok(address);
    }

    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|err| CliError::new(USAGE, format!("cannot resolve host {host}: {err}")))?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| CliError::new(USAGE, format!("host {host} has no addresses")))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }

    #[test]
    fn ip_literals_skip_the_resolver() {
        assert_eq!(
            resolve_host("192.168.100.171", DEFAULT_PORT).unwrap(),
            IpAddr::V4(Ipv4Addr::new(192, 168, 100, 171))
        );
        assert!(resolve_host("::1", DEFAULT_PORT).unwrap().is_loopback());
    }

    #[test]
    fn localhost_resolves() {
        assert!(resolve_host("localhost", DEFAULT_PORT).unwrap().is_loopback());
    }

    #[test]
    fn device_args_build_session_on_port() {
        let args = DeviceArgs {
            host: "127.0.0.1".to_string(),
            port: 6000,
            timeout: "250ms".to_string(),
        };
        let session = args.session().unwrap();
        assert_eq!(session.endpoint().port(), 6000);
        assert_eq!(session.config().timeout, Duration::from_millis(250));
        assert!(!session.is_connected());
    }
}

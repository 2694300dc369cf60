use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chanproxy_peer::{ChannelConfig, ChannelHostProxy, RequestChannel};
#[cfg(unix)]
use chanproxy_transport::UnixDomainSocket;
use chanproxy_transport::TcpSocketListener;
use clap::{Args, Subcommand};

use crate::exit::{proxy_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host a socket and echo every request back as its reply.
    Echo(EchoArgs),
    /// Send a single message.
    Send(SendArgs),
    /// Host a socket and print unsolicited messages.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Listen(args) => listen::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Socket path to bind, or tcp://HOST:PORT.
    #[arg(env = "CHANPROXY_SOCKET")]
    pub path: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to, or tcp://HOST:PORT.
    #[arg(env = "CHANPROXY_SOCKET")]
    pub path: String,
    /// JSON payload. Objects are sent as the message itself.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload, sent as the `data` field.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read a JSON payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Send as a request and print the reply.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, env = "CHANPROXY_REQUEST_TIMEOUT", default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path to bind, or tcp://HOST:PORT.
    #[arg(env = "CHANPROXY_SOCKET")]
    pub path: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Where a command binds or connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

impl Endpoint {
    pub fn parse(input: &str) -> CliResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(CliError::new(USAGE, "endpoint must not be empty"));
        }
        if let Some(addr) = input.strip_prefix("tcp://") {
            if addr.is_empty() {
                return Err(CliError::new(USAGE, "tcp endpoint needs HOST:PORT"));
            }
            return Ok(Self::Tcp(addr.to_string()));
        }
        if cfg!(unix) {
            Ok(Self::Unix(PathBuf::from(input)))
        } else {
            Err(unsupported_unix())
        }
    }

    pub async fn connect(&self, config: &ChannelConfig) -> CliResult<RequestChannel> {
        let result = match self {
            Self::Tcp(addr) => chanproxy_peer::connect_tcp(addr.as_str(), config).await,
            #[cfg(unix)]
            Self::Unix(path) => chanproxy_peer::connect_unix(path, config).await,
            #[cfg(not(unix))]
            Self::Unix(_) => return Err(unsupported_unix()),
        };
        result.map_err(|err| proxy_error("connect failed", err))
    }

    /// Bind a listener for this endpoint and start `host` accepting on it.
    pub async fn serve(&self, host: &ChannelHostProxy) -> CliResult<()> {
        match self {
            Self::Tcp(addr) => {
                let listener = TcpSocketListener::bind(addr.as_str())
                    .await
                    .map_err(|err| transport_error("bind failed", err))?;
                host.listen(listener)
            }
            #[cfg(unix)]
            Self::Unix(path) => {
                let listener = UnixDomainSocket::bind(path)
                    .map_err(|err| transport_error("bind failed", err))?;
                host.listen(listener)
            }
            #[cfg(not(unix))]
            Self::Unix(_) => return Err(unsupported_unix()),
        }
        .map_err(|err| proxy_error("listen failed", err))?;

        if let Some(info) = host.connection_info() {
            tracing::info!(endpoint = %info, "listening");
        }
        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

fn unsupported_unix() -> CliError {
    CliError::new(
        USAGE,
        "unix socket paths are not supported on this platform; use tcp://HOST:PORT",
    )
}

/// Wait for Ctrl-C. Never resolves if the handler can't be installed.
pub async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "signal handler setup failed");
        std::future::pending::<()>().await;
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
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
        assert!(parse_duration(" ").is_err());
    }

    #[test]
    fn endpoint_parses_tcp_prefix() {
        assert_eq!(
            Endpoint::parse("tcp://127.0.0.1:9000").unwrap(),
            Endpoint::Tcp("127.0.0.1:9000".to_string())
        );
        assert!(Endpoint::parse("tcp://").is_err());
        assert!(Endpoint::parse("").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn endpoint_defaults_to_unix_path() {
        let endpoint = Endpoint::parse("/tmp/chanproxy.sock").unwrap();
        assert_eq!(endpoint, Endpoint::Unix(PathBuf::from("/tmp/chanproxy.sock")));
        assert_eq!(endpoint.to_string(), "/tmp/chanproxy.sock");
    }
}

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use hubtunnel_conn::{
    CancellationToken, ConnectionConfig, ConnectionEvents, HubConnection, NoEvents,
};
use hubtunnel_transport::{Connector, NamedPipeConnector, StaticToken, UrlConnector};
use tokio::runtime::Runtime;

use crate::exit::{connection_error, transport_error, CliError, CliResult, FAILURE, TIMEOUT, USAGE};
use crate::output::OutputFormat;

pub mod invoke;
pub mod listen;
pub mod send;
pub mod serve_mock;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Invoke a hub method and print its result.
    Invoke(InvokeArgs),
    /// Invoke a hub method without waiting for a result.
    Send(SendArgs),
    /// Print invocations of a client method pushed by the hub.
    Listen(ListenArgs),
    /// Serve an echoing mock hub on a named pipe.
    ServeMock(ServeMockArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, target: TargetArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Invoke(args) => invoke::run(args, &target, format),
        Command::Send(args) => send::run(args, &target),
        Command::Listen(args) => listen::run(args, &target, format),
        Command::ServeMock(args) => serve_mock::run(args),
        Command::Version(args) => version::run(args),
    }
}

/// Where to find the hub.
#[derive(Args, Debug, Default)]
pub struct TargetArgs {
    /// Named pipe to connect to.
    #[arg(long, env = "HUBTUNNEL_PIPE", global = true, conflicts_with = "url")]
    pub pipe: Option<String>,
    /// Machine hosting the pipe.
    #[arg(long, default_value = ".", global = true)]
    pub server: String,
    /// Hub URL (tcp://, unix://, pipe://, ws://, wss://).
    #[arg(long, env = "HUBTUNNEL_URL", global = true)]
    pub url: Option<String>,
    /// Bearer token for websocket hubs.
    #[arg(long, env = "HUBTUNNEL_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,
    /// Connect and call timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "10s", global = true)]
    pub timeout: String,
}

impl TargetArgs {
    pub fn connector(&self) -> CliResult<Arc<dyn Connector>> {
        match (&self.pipe, &self.url) {
            (Some(pipe), _) => NamedPipeConnector::new(pipe.as_str(), self.server.as_str())
                .map(|connector| Arc::new(connector) as Arc<dyn Connector>)
                .map_err(|err| transport_error("invalid pipe", err)),
            (None, Some(url)) => {
                let mut connector =
                    UrlConnector::parse(url).map_err(|err| transport_error("invalid url", err))?;
                if let Some(token) = &self.token {
                    connector =
                        connector.with_access_token_provider(Arc::new(StaticToken::new(token)));
                }
                Ok(Arc::new(connector))
            }
            (None, None) => Err(CliError::new(
                USAGE,
                "no hub given: pass --pipe or --url (or set HUBTUNNEL_PIPE / HUBTUNNEL_URL)",
            )),
        }
    }
}

#[derive(Args, Debug)]
pub struct InvokeArgs {
    /// Hub method to invoke.
    pub method: String,
    /// Arguments as JSON; an array supplies one argument per element.
    #[arg(long)]
    pub args: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Hub method to invoke.
    pub method: String,
    /// Arguments as JSON; an array supplies one argument per element.
    #[arg(long)]
    pub args: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Client method to listen for.
    pub method: String,
    /// Exit after receiving N invocations.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ServeMockArgs {
    /// Pipe name (or absolute socket path) to listen on.
    pub pipe: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn runtime() -> CliResult<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(FAILURE, format!("failed to start runtime: {err}")))
}

/// Build and start a connection, bounded by `timeout`.
pub(crate) async fn connect(
    target: &TargetArgs,
    timeout: Duration,
    events: Option<Arc<dyn ConnectionEvents>>,
) -> CliResult<HubConnection> {
    let connection = HubConnection::new(
        target.connector()?,
        ConnectionConfig::default(),
        events.unwrap_or_else(|| Arc::new(NoEvents) as Arc<dyn ConnectionEvents>),
    );

    let cancel = CancellationToken::new();
    match tokio::time::timeout(timeout, connection.start(&cancel)).await {
        Ok(Ok(())) => Ok(connection),
        Ok(Err(err)) => Err(connection_error("connect failed", err)),
        Err(_) => {
            cancel.cancel();
            Err(CliError::new(
                TIMEOUT,
                format!("connect timed out after {timeout:?}"),
            ))
        }
    }
}

/// Release the connection; failures here never change the exit code.
pub(crate) async fn shutdown(connection: HubConnection) {
    if let Err(err) = connection.stop(&CancellationToken::new()).await {
        tracing::debug!(error = %err, "stop failed");
    }
    let _ = connection.dispose().await;
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
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
    }

    #[test]
    fn missing_target_is_a_usage_error() {
        let err = TargetArgs::default().connector().err().unwrap();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn url_target_is_parsed() {
        let target = TargetArgs {
            url: Some("tcp://127.0.0.1:9".to_string()),
            ..TargetArgs::default()
        };
        assert_eq!(target.connector().unwrap().describe(), "tcp://127.0.0.1:9");
    }
}

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use clap::{Args, Subcommand};
use mcbus_client::{Client, ClientConfig};
use mcbus_frame::FrameConfig;
use mcbus_transport::{MulticastConfig, DEFAULT_GROUP, DEFAULT_PORT};

use crate::exit::{client_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod publish;
pub mod request;
pub mod subscribe;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish one message on a topic.
    Publish(PublishArgs),
    /// Print publications whose topic matches a pattern.
    Subscribe(SubscribeArgs),
    /// Send a request and print the reply.
    Request(RequestArgs),
    /// Answer requests by echoing their body back.
    Echo(EchoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, bus: &BusArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Publish(args) => publish::run(args, bus, format),
        Command::Subscribe(args) => subscribe::run(args, bus, format),
        Command::Request(args) => request::run(args, bus, format),
        Command::Echo(args) => echo::run(args, bus),
        Command::Version(args) => version::run(args),
    }
}

/// Bus membership flags shared by every networked command.
#[derive(Args, Debug, Clone)]
pub struct BusArgs {
    /// Client id announced on the bus. Default: a random `client-xxxxxxxx`.
    #[arg(long, env = "MCBUS_CLIENT_ID", global = true)]
    pub client_id: Option<String>,
    /// Multicast group address (IPv4 or IPv6).
    #[arg(long, env = "MCBUS_GROUP", default_value_t = DEFAULT_GROUP, global = true)]
    pub group: IpAddr,
    /// UDP port every participant binds and sends to.
    #[arg(long, env = "MCBUS_PORT", default_value_t = DEFAULT_PORT, global = true)]
    pub port: u16,
    /// Maximum datagram size in bytes. Must match across the bus.
    #[arg(long, env = "MCBUS_MAX_DATAGRAM", global = true)]
    pub max_datagram: Option<usize>,
}

impl BusArgs {
    pub fn client_config(&self) -> ClientConfig {
        let mut config = match &self.client_id {
            Some(id) => ClientConfig::new(id.clone()),
            None => ClientConfig::default(),
        };
        config.transport = MulticastConfig {
            group: self.group,
            port: self.port,
            ..MulticastConfig::default()
        };
        if let Some(max) = self.max_datagram {
            config.frame = FrameConfig {
                max_datagram_size: max,
                ..FrameConfig::default()
            };
        }
        config
    }

    /// Join the bus and start the receive loop.
    pub fn connect(&self) -> CliResult<(Client, JoinHandle<mcbus_client::Result<()>>)> {
        let client = Client::connect(self.client_config())
            .map_err(|err| client_error("connect failed", err))?;
        let receiver = client.spawn_receiver().map_err(|err| {
            CliError::new(INTERNAL, format!("failed to start receiver: {err}"))
        })?;
        Ok((client, receiver))
    }
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Topic to publish on.
    pub topic: String,
    /// Message body.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the message body from a file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Regular expression matched against the whole topic.
    pub pattern: String,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Client id of the responder.
    pub target: String,
    /// Signal (bus interface) to invoke.
    pub signal: String,
    /// Request body.
    #[arg(long, default_value = "")]
    pub data: String,
    /// Time to wait for each attempt (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Re-sends after a timed-out attempt.
    #[arg(long, default_value_t = 0)]
    pub retries: u32,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Signals to answer. Repeatable.
    #[arg(long = "signal", default_value = "echo")]
    pub signals: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
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

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Close the session and surface any receive-loop failure.
pub fn shutdown(client: &Client, receiver: JoinHandle<mcbus_client::Result<()>>) -> CliResult<()> {
    client.close();
    match receiver.join() {
        Ok(result) => result.map_err(|err| client_error("receive loop failed", err)),
        Err(_) => Err(CliError::new(INTERNAL, "receive loop panicked")),
    }
}

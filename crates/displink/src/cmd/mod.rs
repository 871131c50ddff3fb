use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use displink_frame::{BargraphDirection, Language, Message, SemaphoreColor, WeightSign};
use displink_manager::{ConnectionManager, ManagerConfig};
use displink_transport::config::{DEFAULT_BAUD_RATE, DEFAULT_SERIAL_PORT};
use displink_transport::{DataBits, FlowControl, Parity, SerialConfig, StopBits, TcpConfig};

use crate::exit::{connect_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod ports;
pub mod send;
pub mod version;
pub mod w12;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a text, hex or file payload.
    Send(SendArgs),
    /// Build a W12 display frame and send it.
    W12(W12Args),
    /// Print data received from the display.
    Listen(ListenArgs),
    /// List available serial ports.
    Ports(PortsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::W12(args) => w12::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Ports(args) => ports::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where and how to reach the display.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Serial port to open (e.g. /dev/ttyUSB0, COM3).
    #[arg(long, env = "DISPLINK_SERIAL", value_name = "PORT")]
    pub serial: Option<String>,
    /// Serial baud rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Serial data bits (5-8).
    #[arg(long, value_name = "BITS", default_value = "8")]
    pub data_bits: DataBits,
    /// Serial stop bits (1 or 2).
    #[arg(long, value_name = "BITS", default_value = "1")]
    pub stop_bits: StopBits,
    /// Serial parity (n, o, e).
    #[arg(long, default_value = "n")]
    pub parity: Parity,
    /// Serial flow control (none, software, hardware).
    #[arg(long, value_name = "MODE", default_value = "none")]
    pub flow: FlowControl,
    /// TCP endpoint of the display.
    #[arg(long, env = "DISPLINK_TCP", value_name = "HOST:PORT")]
    pub tcp: Option<String>,
    /// Wrap the TCP connection in TLS.
    #[arg(long)]
    pub tls: bool,
    /// TCP connect timeout (e.g. 5s, 500ms).
    #[arg(long, value_name = "DURATION", default_value = "5s")]
    pub connect_timeout: String,
    /// TCP read timeout (e.g. 30s).
    #[arg(long, value_name = "DURATION", default_value = "30s")]
    pub read_timeout: String,
    /// Write attempts per payload.
    #[arg(long, default_value_t = 1)]
    pub attempts: u32,
}

/// A resolved connection request.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Serial(SerialConfig),
    Tcp(TcpConfig),
}

impl ConnectionArgs {
    pub fn target(&self) -> CliResult<Target> {
        match (&self.serial, &self.tcp) {
            (Some(_), Some(_)) => Err(CliError::new(
                USAGE,
                "choose one of --serial or --tcp, not both",
            )),
            (Some(port), None) => Ok(Target::Serial(SerialConfig {
                port_name: port.clone(),
                baud_rate: self.baud,
                data_bits: self.data_bits,
                stop_bits: self.stop_bits,
                parity: self.parity,
                flow_control: self.flow,
            })),
            (None, Some(endpoint)) => {
                let (host, port) = parse_endpoint(endpoint)?;
                let connect_timeout = parse_duration(&self.connect_timeout)?;
                let read_timeout = parse_duration(&self.read_timeout)?;
                Ok(Target::Tcp(
                    TcpConfig::new(host, port)
                        .with_tls(self.tls)
                        .with_timeouts(connect_timeout, read_timeout),
                ))
            }
            (None, None) => Err(CliError::new(
                USAGE,
                format!(
                    "a connection is required: pass --serial PORT (e.g. {DEFAULT_SERIAL_PORT}) or --tcp HOST:PORT"
                ),
            )),
        }
    }

    /// Connect a manager to the requested target.
    pub fn connect(&self, auto_reconnect: bool) -> CliResult<ConnectionManager> {
        let target = self.target()?;
        let manager = ConnectionManager::new(
            ManagerConfig::default()
                .with_auto_reconnect(auto_reconnect)
                .with_send_attempts(self.attempts),
        );
        let result = match target {
            Target::Serial(config) => manager.connect_serial(config),
            Target::Tcp(config) => manager.connect_tcp(config),
        };
        result.map_err(|err| connect_error("connect failed", err))?;
        Ok(manager)
    }
}

fn parse_endpoint(input: &str) -> CliResult<(String, u16)> {
    let invalid = || CliError::new(USAGE, format!("invalid TCP endpoint {input:?} (expected HOST:PORT)"));
    let (host, port) = input.trim().rsplit_once(':').ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    let port: u16 = port.parse().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
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

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Text payload.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Hex payload (e.g. "30 31 0D 0A").
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub file: Option<PathBuf>,
    /// Append CR LF to the payload.
    #[arg(long)]
    pub crlf: bool,
    /// Wait for one reply and print it.
    #[arg(long)]
    pub wait: bool,
    /// How long --wait waits for a reply (e.g. 2s, 500ms).
    #[arg(long, value_name = "DURATION", default_value = "2s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct W12Args {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Display language (pt, en, es or 0-2).
    #[arg(long, default_value = "pt")]
    pub language: Language,
    /// Message selector (weight, stop, wait, go or 0-3).
    #[arg(long, default_value = "weight")]
    pub message: Message,
    /// Left semaphore color (off, green, red, yellow).
    #[arg(long, value_name = "COLOR", default_value = "off")]
    pub left: SemaphoreColor,
    /// Blink the left semaphore.
    #[arg(long)]
    pub left_blink: bool,
    /// Right semaphore color (off, green, red, yellow).
    #[arg(long, value_name = "COLOR", default_value = "off")]
    pub right: SemaphoreColor,
    /// Blink the right semaphore.
    #[arg(long)]
    pub right_blink: bool,
    /// Weight sign (+ or -).
    #[arg(long, default_value = "+", allow_hyphen_values = true)]
    pub sign: WeightSign,
    /// Weight text, up to six characters.
    #[arg(long, default_value = "0")]
    pub weight: String,
    /// Unit text, up to two characters.
    #[arg(long, default_value = "kg")]
    pub unit: String,
    /// Bargraph direction (ltr, rtl or 0-1).
    #[arg(long, value_name = "DIRECTION", default_value = "ltr")]
    pub bar_direction: BargraphDirection,
    /// Bargraph value.
    #[arg(long, value_name = "0-96", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=96))]
    pub bar: u8,
    /// Print the frame instead of sending it.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Exit after receiving N chunks.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(serial: Option<&str>, tcp: Option<&str>) -> ConnectionArgs {
        ConnectionArgs {
            serial: serial.map(str::to_string),
            baud: 9600,
            data_bits: DataBits::Seven,
            stop_bits: StopBits::One,
            parity: Parity::Even,
            flow: FlowControl::None,
            tcp: tcp.map(str::to_string),
            tls: false,
            connect_timeout: "500ms".to_string(),
            read_timeout: "10s".to_string(),
            attempts: 2,
        }
    }

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
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn endpoint_parsing() {
        assert_eq!(
            parse_endpoint("display.local:5000").unwrap(),
            ("display.local".to_string(), 5000)
        );
        assert_eq!(parse_endpoint("[::1]:7").unwrap(), ("::1".to_string(), 7));
        assert!(parse_endpoint("no-port").is_err());
        assert!(parse_endpoint(":5000").is_err());
        assert!(parse_endpoint("host:99999").is_err());
    }

    #[test]
    fn serial_target_carries_line_settings() {
        let target = connection(Some("/dev/ttyS0"), None).target().unwrap();
        let Target::Serial(config) = target else {
            panic!("expected serial target");
        };
        assert_eq!(config.port_name, "/dev/ttyS0");
        assert_eq!(config.line_settings(), "7E1");
    }

    #[test]
    fn tcp_target_carries_timeouts() {
        let target = connection(None, Some("127.0.0.1:5000")).target().unwrap();
        let Target::Tcp(config) = target else {
            panic!("expected tcp target");
        };
        assert_eq!(config.connect_timeout, Duration::from_millis(500));
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert!(!config.use_tls);
    }

    #[test]
    fn target_requires_exactly_one_link() {
        assert_eq!(connection(None, None).target().unwrap_err().code, USAGE);
        assert_eq!(
            connection(Some("COM3"), Some("h:1")).target().unwrap_err().code,
            USAGE
        );
    }
}

//! Connection parameters for each transport kind.
//!
//! Line settings are closed enums with a fixed code table in both
//! directions, so an invalid parity or flow-control code is rejected when the
//! config is built rather than when the port is opened.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConnectError;

/// Default serial device for the platform.
#[cfg(windows)]
pub const DEFAULT_SERIAL_PORT: &str = "COM3";
#[cfg(not(windows))]
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

pub const DEFAULT_BAUD_RATE: u32 = 19_200;
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1";
pub const DEFAULT_TCP_PORT: u16 = 5000;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Error returned when a line-setting code is not in its table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {setting} code {code:?} (expected one of: {expected})")]
pub struct ParseCodeError {
    setting: &'static str,
    code: String,
    expected: &'static str,
}

macro_rules! code_table {
    (@first $first:literal $(, $rest:literal)*) => { $first };
    ($ty:ident, $setting:literal, $expected:literal, { $($variant:ident => [$($code:literal),+]),+ $(,)? }) => {
        impl $ty {
            /// Canonical code for this setting.
            pub fn as_code(self) -> &'static str {
                match self {
                    $($ty::$variant => code_table!(@first $($code),+),)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = ParseCodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let lowered = s.trim().to_ascii_lowercase();
                match lowered.as_str() {
                    $($($code)|+ => Ok($ty::$variant),)+
                    _ => Err(ParseCodeError {
                        setting: $setting,
                        code: s.to_string(),
                        expected: $expected,
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_code())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

code_table!(DataBits, "data bits", "5, 6, 7, 8", {
    Five => ["5"],
    Six => ["6"],
    Seven => ["7"],
    Eight => ["8"],
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

code_table!(StopBits, "stop bits", "1, 2", {
    One => ["1"],
    Two => ["2"],
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

code_table!(Parity, "parity", "n, o, e", {
    None => ["n", "none"],
    Odd => ["o", "odd"],
    Even => ["e", "even"],
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

code_table!(FlowControl, "flow control", "none, software, hardware", {
    None => ["none", "off"],
    Software => ["software", "xonxoff"],
    Hardware => ["hardware", "rtscts"],
});

impl From<DataBits> for serialport::DataBits {
    fn from(value: DataBits) -> Self {
        match value {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(value: FlowControl) -> Self {
        match value {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Serial line parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port_name: String,
    pub baud_rate: u32,
    #[serde(default)]
    pub data_bits: DataBits,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub flow_control: FlowControl,
}

impl SerialConfig {
    /// 8N1 without flow control on `port_name` at `baud_rate`.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Self::default()
        }
    }

    /// Short frame description, e.g. `8N1`.
    pub fn line_settings(&self) -> String {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        format!(
            "{}{}{}",
            self.data_bits.as_code(),
            parity,
            self.stop_bits.as_code()
        )
    }

    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.port_name.trim().is_empty() {
            return Err(ConnectError::InvalidConfig(
                "serial port name must not be empty".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(ConnectError::InvalidConfig(
                "baud rate must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::default(),
            stop_bits: StopBits::default(),
            parity: Parity::default(),
            flow_control: FlowControl::default(),
        }
    }
}

/// TCP endpoint parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub use_tls: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Let the transport reconnect by itself when its reader stops.
    #[serde(default)]
    pub auto_reconnect: bool,
}

impl TcpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, read_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// `host:port` as shown in labels and log lines. IPv6 hosts are
    /// bracketed, e.g. `[::1]:7`.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.host.trim().is_empty() {
            return Err(ConnectError::InvalidConfig(
                "tcp host must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConnectError::InvalidConfig(
                "tcp port must be greater than zero".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(ConnectError::InvalidConfig(
                "tcp timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_TCP_HOST.to_string(),
            port: DEFAULT_TCP_PORT,
            use_tls: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            auto_reconnect: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_codes_both_directions() {
        for parity in [Parity::None, Parity::Odd, Parity::Even] {
            assert_eq!(parity.as_code().parse::<Parity>().unwrap(), parity);
        }
        assert_eq!("E".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("odd".parse::<Parity>().unwrap(), Parity::Odd);
        assert!("x".parse::<Parity>().is_err());
    }

    #[test]
    fn flow_control_aliases() {
        assert_eq!(
            "rtscts".parse::<FlowControl>().unwrap(),
            FlowControl::Hardware
        );
        assert_eq!(FlowControl::Software.to_string(), "software");
        let err = "cts".parse::<FlowControl>().unwrap_err();
        assert!(err.to_string().contains("flow control"));
    }

    #[test]
    fn data_and_stop_bits_codes() {
        assert_eq!("7".parse::<DataBits>().unwrap(), DataBits::Seven);
        assert!("9".parse::<DataBits>().is_err());
        assert_eq!("2".parse::<StopBits>().unwrap(), StopBits::Two);
        assert!("1.5".parse::<StopBits>().is_err());
    }

    #[test]
    fn serial_defaults_match_display_factory_settings() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 19_200);
        assert_eq!(config.line_settings(), "8N1");
        assert_eq!(config.flow_control, FlowControl::None);
    }

    #[test]
    fn serial_validation() {
        assert!(SerialConfig::new("", 9600).validate().is_err());
        assert!(SerialConfig::new("/dev/ttyS0", 0).validate().is_err());
        assert!(SerialConfig::new("/dev/ttyS0", 9600).validate().is_ok());
    }

    #[test]
    fn tcp_validation_and_address() {
        let config = TcpConfig::new("display.local", 4001);
        assert_eq!(config.address(), "display.local:4001");
        assert!(config.validate().is_ok());
        assert!(TcpConfig::new("display.local", 0).validate().is_err());
        assert!(TcpConfig::new(" ", 4001).validate().is_err());
        let zero = TcpConfig::new("h", 1).with_timeouts(Duration::ZERO, Duration::from_secs(1));
        assert!(matches!(
            zero.validate(),
            Err(ConnectError::InvalidConfig(_))
        ));
    }

    #[test]
    fn ipv6_address_is_bracketed() {
        assert_eq!(TcpConfig::new("::1", 7).address(), "[::1]:7");
        assert_eq!(TcpConfig::new("fe80::1", 4001).address(), "[fe80::1]:4001");
        assert_eq!(TcpConfig::new("10.0.0.5", 4001).address(), "10.0.0.5:4001");
    }

    #[test]
    fn config_serde_uses_lowercase_codes() {
        let config = SerialConfig {
            parity: Parity::Even,
            ..SerialConfig::new("/dev/ttyS1", 9600)
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["parity"], "even");
        assert_eq!(json["data_bits"], "eight");
        let back: SerialConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}

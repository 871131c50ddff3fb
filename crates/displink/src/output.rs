use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use displink_frame::W12Frame;
use displink_transport::{escape_for_log, ConnectionStats, PortInfo, TransportKind};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// Outcome of one successful send.
#[derive(Serialize)]
pub struct SendReport<'a> {
    pub target: &'a str,
    pub bytes: usize,
    pub attempts: u32,
    pub payload: String,
    pub stats: ConnectionStats,
}

pub fn print_send_report(report: &SendReport<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = new_table(vec!["TARGET", "BYTES", "PAYLOAD", "STATS"]);
            table.add_row(vec![
                report.target.to_string(),
                report.bytes.to_string(),
                report.payload.clone(),
                report.stats.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "sent {} bytes to {} payload={} ({})",
                report.bytes, report.target, report.payload, report.stats
            );
        }
        // Raw output is reserved for received bytes.
        OutputFormat::Raw => {}
    }
}

#[derive(Serialize)]
struct ReceivedOutput {
    transport: TransportKind,
    size: usize,
    text: String,
    timestamp: String,
}

pub fn print_received(kind: TransportKind, data: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ReceivedOutput {
            transport: kind,
            size: data.len(),
            text: escape_for_log(data),
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["TRANSPORT", "SIZE", "DATA"]);
            table.add_row(vec![
                kind.to_string(),
                data.len().to_string(),
                escape_for_log(data),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{kind} << {} ({} bytes)", escape_for_log(data), data.len());
        }
        OutputFormat::Raw => print_raw(data),
    }
}

#[derive(Serialize)]
struct FrameOutput {
    size: usize,
    hex: String,
    text: String,
}

pub fn print_frame(frame: &W12Frame, format: OutputFormat) {
    let bytes = frame.as_bytes();
    match format {
        OutputFormat::Json => print_json(&FrameOutput {
            size: bytes.len(),
            hex: frame.to_string(),
            text: escape_for_log(bytes),
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["SIZE", "HEX", "TEXT"]);
            table.add_row(vec![
                bytes.len().to_string(),
                frame.to_string(),
                escape_for_log(bytes),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("w12 [{}] {}", escape_for_log(bytes), frame);
        }
        OutputFormat::Raw => print_raw(bytes),
    }
}

#[derive(Serialize)]
struct PortsOutput<'a> {
    ports: &'a [PortInfo],
}

pub fn print_ports(ports: &[PortInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&PortsOutput { ports }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["PORT", "TYPE"]);
            for port in ports {
                table.add_row(vec![port.name.clone(), port.port_type.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if ports.is_empty() {
                println!("no serial ports found");
            }
            for port in ports {
                println!("{} ({})", port.name, port.port_type);
            }
        }
        OutputFormat::Raw => {
            for port in ports {
                println!("{}", port.name);
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

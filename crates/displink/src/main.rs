mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::exit::{io_error, SUCCESS, USAGE};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "displink", version, about = "W12 LED display link CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Also append log lines to this file.
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(if err.use_stderr() { USAGE } else { SUCCESS });
        }
    };

    if let Err(err) = init_logging(cli.log_format, cli.log_level, cli.log_file.as_deref()) {
        let err = io_error("cannot open log file", err);
        eprintln!("error: {err}");
        std::process::exit(err.code);
    }

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "displink",
            "send",
            "--tcp",
            "127.0.0.1:5000",
            "--data",
            "hello",
            "--crlf",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.connection.tcp.as_deref(), Some("127.0.0.1:5000"));
        assert!(args.crlf);
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "displink",
            "send",
            "--serial",
            "/dev/ttyUSB0",
            "--hex",
            "30 31",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_w12_fields_by_name_and_digit() {
        let cli = Cli::try_parse_from([
            "displink",
            "w12",
            "--language",
            "1",
            "--message",
            "stop",
            "--left",
            "red",
            "--left-blink",
            "--sign",
            "-",
            "--weight",
            "12.5",
            "--bar",
            "96",
            "--dry-run",
        ])
        .expect("w12 args should parse");

        let Command::W12(args) = cli.command else {
            panic!("expected w12");
        };
        assert_eq!(args.language, displink_frame::Language::English);
        assert_eq!(args.message, displink_frame::Message::Stop);
        assert_eq!(args.sign, displink_frame::WeightSign::Minus);
        assert!(args.left_blink);
        assert!(args.dry_run);
    }

    #[test]
    fn rejects_out_of_range_bargraph() {
        let err = Cli::try_parse_from(["displink", "w12", "--bar", "97", "--dry-run"])
            .expect_err("bar above 96 should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn rejects_unknown_parity() {
        assert!(Cli::try_parse_from([
            "displink",
            "listen",
            "--serial",
            "COM3",
            "--parity",
            "x",
        ])
        .is_err());
    }

    #[test]
    fn log_file_is_global() {
        let cli = Cli::try_parse_from(["displink", "ports", "--log-file", "/tmp/displink.log"])
            .expect("ports args should parse");
        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/displink.log")));
        assert!(matches!(cli.command, Command::Ports(_)));
    }
}

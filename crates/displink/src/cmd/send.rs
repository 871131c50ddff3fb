use std::fs;
use std::sync::mpsc;
use std::time::Duration;

use displink_manager::ConnectionManager;
use displink_transport::{escape_for_log, TransportKind};
use tracing::debug;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{io_error, send_error, CliError, CliResult, DATA_INVALID, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_received, print_send_report, OutputFormat, SendReport};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;
    let manager = args.connection.connect(false)?;

    let replies = args.wait.then(|| subscribe_replies(&manager));

    manager
        .send(&payload)
        .map_err(|err| send_error("send failed", err))?;

    let target = manager.describe().unwrap_or_default();
    print_send_report(
        &SendReport {
            target: &target,
            bytes: payload.len(),
            attempts: manager.config().default_send_attempts,
            payload: escape_for_log(&payload),
            stats: manager.stats(),
        },
        format,
    );

    if let Some(replies) = replies {
        let (kind, data) = wait_for_reply(&replies, wait_timeout)?;
        print_received(kind, &data, format);
    }

    manager.shutdown();
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    let mut payload = if let Some(data) = &args.data {
        data.as_bytes().to_vec()
    } else if let Some(hex) = &args.hex {
        parse_hex(hex)?
    } else if let Some(path) = &args.file {
        fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?
    } else {
        return Err(CliError::new(
            USAGE,
            "a payload is required: pass --data, --hex or --file",
        ));
    };

    if args.crlf {
        payload.extend_from_slice(b"\r\n");
    }
    if payload.is_empty() {
        return Err(CliError::new(DATA_INVALID, "payload must not be empty"));
    }
    Ok(payload)
}

/// Parse hex digits, ignoring whitespace and an optional `0x` prefix per byte.
fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input
        .split_whitespace()
        .map(|token| token.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();

    if digits.len() % 2 != 0 {
        return Err(CliError::new(
            DATA_INVALID,
            format!("--hex has an odd number of digits: {input:?}"),
        ));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| {
                    CliError::new(DATA_INVALID, format!("--hex is not valid hex: {input:?}"))
                })
        })
        .collect()
}

type Reply = (TransportKind, Vec<u8>);

fn subscribe_replies(manager: &ConnectionManager) -> mpsc::Receiver<Reply> {
    let (tx, rx) = mpsc::sync_channel(16);
    manager.add_data_listener(move |kind, data| {
        // The reader thread must never block on a slow consumer.
        if tx.try_send((kind, data.to_vec())).is_err() {
            debug!(kind = %kind, "dropping reply chunk");
        }
    });
    rx
}

fn wait_for_reply(replies: &mpsc::Receiver<Reply>, timeout: Duration) -> CliResult<Reply> {
    replies.recv_timeout(timeout).map_err(|_| {
        CliError::new(
            TIMEOUT,
            format!("no reply within {}ms", timeout.as_millis()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_accepts_spaced_and_prefixed_bytes() {
        assert_eq!(parse_hex("30 31 0D 0A").unwrap(), b"01\r\n");
        assert_eq!(parse_hex("0x82 0x01").unwrap(), vec![0x82, 0x01]);
        assert_eq!(parse_hex("deadBEEF").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn parse_hex_rejects_bad_input() {
        assert_eq!(parse_hex("3").unwrap_err().code, DATA_INVALID);
        assert_eq!(parse_hex("zz").unwrap_err().code, DATA_INVALID);
        assert_eq!(parse_hex("é0").unwrap_err().code, DATA_INVALID);
    }

    #[test]
    fn wait_for_reply_times_out() {
        let (_tx, rx) = mpsc::sync_channel::<Reply>(1);
        let err = wait_for_reply(&rx, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn wait_for_reply_returns_first_chunk() {
        let (tx, rx) = mpsc::sync_channel::<Reply>(1);
        tx.send((TransportKind::Tcp, b"OK".to_vec())).unwrap();
        let (kind, data) = wait_for_reply(&rx, Duration::from_millis(10)).unwrap();
        assert_eq!(kind, TransportKind::Tcp);
        assert_eq!(data, b"OK");
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use displink_transport::{EventKind, TransportKind};
use tracing::{info, warn};

use crate::cmd::ListenArgs;
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_received, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

enum Received {
    Data(TransportKind, Vec<u8>),
    GaveUp(String),
}

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let manager = args.connection.connect(true)?;
    let (tx, rx) = mpsc::channel::<Received>();

    let data_tx = tx.clone();
    manager.add_data_listener(move |kind, data| {
        let _ = data_tx.send(Received::Data(kind, data.to_vec()));
    });
    manager.add_listener(move |event| match event.kind {
        EventKind::ConnectionLost | EventKind::Reconnecting => warn!(event = %event, "link"),
        EventKind::Reconnected => info!(event = %event, "link"),
        EventKind::Disconnected => {
            let _ = tx.send(Received::GaveUp(event.message.clone()));
        }
        _ => {}
    });

    let mut printed = 0usize;
    let outcome = loop {
        if !running.load(Ordering::SeqCst) {
            break Ok(SUCCESS);
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Received::Data(kind, data)) => {
                print_received(kind, &data, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break Ok(SUCCESS);
                }
            }
            Ok(Received::GaveUp(message)) => {
                break Err(CliError::new(
                    TRANSPORT_ERROR,
                    format!("link lost: {message}"),
                ));
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break Ok(SUCCESS),
        }
    };

    manager.shutdown();
    outcome
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

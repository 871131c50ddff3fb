use displink_frame::{build_frame, Semaphore, W12Fields};
use tracing::info;

use crate::cmd::W12Args;
use crate::exit::{send_error, CliResult, SUCCESS};
use crate::output::{print_frame, print_send_report, OutputFormat, SendReport};

pub fn run(args: W12Args, format: OutputFormat) -> CliResult<i32> {
    let frame = build_frame(&fields(&args));

    if args.dry_run {
        print_frame(&frame, format);
        return Ok(SUCCESS);
    }

    let manager = args.connection.connect(false)?;
    manager
        .send(frame.as_bytes())
        .map_err(|err| send_error("send failed", err))?;
    info!(frame = %frame, "w12 frame sent");

    let target = manager.describe().unwrap_or_default();
    print_send_report(
        &SendReport {
            target: &target,
            bytes: frame.as_bytes().len(),
            attempts: manager.config().default_send_attempts,
            payload: frame.to_string(),
            stats: manager.stats(),
        },
        format,
    );

    manager.shutdown();
    Ok(SUCCESS)
}

fn fields(args: &W12Args) -> W12Fields {
    W12Fields {
        language: args.language,
        message: args.message,
        left: Semaphore::new(args.left, args.left_blink),
        right: Semaphore::new(args.right, args.right_blink),
        sign: args.sign,
        weight: args.weight.clone(),
        unit: args.unit.clone(),
        bargraph_direction: args.bar_direction,
        bargraph_value: args.bar,
    }
}

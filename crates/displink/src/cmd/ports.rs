use displink_transport::list_ports;

use crate::cmd::PortsArgs;
use crate::exit::{CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_ports, OutputFormat};

pub fn run(_args: PortsArgs, format: OutputFormat) -> CliResult<i32> {
    let ports = list_ports()
        .map_err(|err| CliError::new(FAILURE, format!("listing serial ports failed: {err}")))?;
    print_ports(&ports, format);
    Ok(SUCCESS)
}

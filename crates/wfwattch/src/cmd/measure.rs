use crate::cmd::MeasureArgs;
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_reading, OutputFormat};

pub fn run(args: MeasureArgs, format: OutputFormat) -> CliResult<i32> {
    let mut session = args.device.session()?;
    let timeout = session.config().timeout;

    session
        .connect(timeout)
        .map_err(|err| session_error("connect failed", err))?;
    let reading = session
        .update(timeout)
        .map_err(|err| session_error("measure failed", err))?;
    session.close();

    print_reading(&reading, format);
    Ok(SUCCESS)
}

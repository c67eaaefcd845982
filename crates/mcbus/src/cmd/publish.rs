use std::fs;

use crate::cmd::{shutdown, BusArgs, PublishArgs};
use crate::exit::{client_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_published, OutputFormat};

pub fn run(args: PublishArgs, bus: &BusArgs, format: OutputFormat) -> CliResult<i32> {
    let body = resolve_body(&args)?;
    let (client, receiver) = bus.connect()?;

    let published = client
        .publish(&body, &args.topic)
        .map_err(|err| client_error("publish failed", err));
    shutdown(&client, receiver)?;

    print_published(&args.topic, &published?, body.len(), format);
    Ok(SUCCESS)
}

fn resolve_body(args: &PublishArgs) -> CliResult<String> {
    if let Some(data) = &args.data {
        return Ok(data.clone());
    }
    if let Some(path) = &args.file {
        let bytes = fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        return String::from_utf8(bytes).map_err(|_| {
            CliError::new(
                DATA_INVALID,
                format!("{} is not valid UTF-8", path.display()),
            )
        });
    }
    Ok(String::new())
}

use mcbus_client::RequestOptions;

use crate::cmd::{parse_duration, shutdown, BusArgs, RequestArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: RequestArgs, bus: &BusArgs, format: OutputFormat) -> CliResult<i32> {
    let options = RequestOptions::default()
        .timeout(parse_duration(&args.timeout)?)
        .retries(args.retries);
    let (client, receiver) = bus.connect()?;

    let reply = client
        .request_with(&args.target, &args.signal, &args.data, options)
        .map_err(|err| client_error("request failed", err));
    shutdown(&client, receiver)?;

    print_reply(&args.target, &args.signal, &reply?, format);
    Ok(SUCCESS)
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};
use mcbus_client::{Delivery, Handler};

use crate::cmd::{install_ctrlc_handler, shutdown, BusArgs, SubscribeArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_delivery, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: SubscribeArgs, bus: &BusArgs, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (client, receiver) = bus.connect()?;
    let (tx, rx) = channel::unbounded::<Delivery>();
    client
        .subscribe(
            &args.pattern,
            Handler::detailed(move |delivery| {
                let _ = tx.send(delivery.clone());
                None
            }),
        )
        .map_err(|err| client_error("subscribe failed", err))?;
    tracing::info!(client_id = client.id(), pattern = %args.pattern, "subscribed");

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) && !receiver.is_finished() {
        let delivery = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(delivery) => delivery,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        print_delivery(&delivery, format);
        printed = printed.saturating_add(1);

        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    shutdown(&client, receiver)?;
    Ok(SUCCESS)
}

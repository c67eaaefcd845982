use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mcbus_client::{Delivery, Handler};

use crate::cmd::{install_ctrlc_handler, shutdown, BusArgs, EchoArgs};
use crate::exit::{CliResult, SUCCESS};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: EchoArgs, bus: &BusArgs) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (client, receiver) = bus.connect()?;
    for signal in &args.signals {
        client.register_bus_interface(signal, Handler::detailed(echo_reply));
    }
    tracing::info!(client_id = client.id(), signals = ?args.signals, "answering requests");

    while running.load(Ordering::SeqCst) && !receiver.is_finished() {
        thread::sleep(POLL_INTERVAL);
    }

    shutdown(&client, receiver)?;
    Ok(SUCCESS)
}

fn echo_reply(delivery: &Delivery) -> Option<String> {
    tracing::info!(
        sender = %delivery.sender_id,
        signal = %delivery.subject,
        size = delivery.body.len(),
        "echoing request"
    );
    Some(delivery.body.clone())
}

#[cfg(test)]
mod tests {
    use mcbus_client::{Client, ClientConfig, RequestOptions};
    use mcbus_transport::MemoryHub;

    use super::*;

    #[test]
    fn echo_handler_answers_over_the_bus() {
        let hub = MemoryHub::new();
        let server = Client::with_transport(ClientConfig::new("echo"), Arc::new(hub.endpoint()))
            .unwrap();
        let caller = Client::with_transport(ClientConfig::new("caller"), Arc::new(hub.endpoint()))
            .unwrap();
        server.register_bus_interface("echo", Handler::detailed(echo_reply));
        let receivers = [server.spawn_receiver().unwrap(), caller.spawn_receiver().unwrap()];

        let reply = caller
            .request_with(
                "echo",
                "echo",
                "ping, pong",
                RequestOptions::default().timeout(Duration::from_secs(5)),
            )
            .unwrap();
        assert_eq!(reply, "ping, pong");

        server.close();
        caller.close();
        for receiver in receivers {
            receiver.join().unwrap().unwrap();
        }
    }
}

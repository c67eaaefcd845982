//! Client sessions for the mcbus multicast bus.
//!
//! A [`Client`] joins the bus, publishes on topics, answers requests addressed to
//! it, and issues blocking requests to other clients. One thread runs the receive
//! loop ([`Client::run`] or [`Client::spawn_receiver`]); every other method may be
//! called concurrently from any thread.
//!
//! ```no_run
//! use mcbus_client::{Client, ClientConfig, Handler};
//!
//! let client = Client::connect(ClientConfig::new("printer"))?;
//! client.register_bus_interface("echo", Handler::simple(|body| Some(body.to_string())));
//! let receiver = client.spawn_receiver()?;
//!
//! client.publish("hello", "greetings")?;
//! client.close();
//! let _ = receiver.join();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod registry;

pub use client::Client;
pub use config::{ClientConfig, RequestOptions};
pub use correlator::{Correlator, PendingRequest};
pub use dispatch::{Callback, Delivery, Execution, Handler, WorkerPool};
pub use error::{ClientError, Result};
pub use registry::{InterfaceTable, SubscriptionRegistry};

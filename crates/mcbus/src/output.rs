use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mcbus_client::Delivery;
use serde::Serialize;

const MESSAGE_SCHEMA: &str = "https://schemas.3leaps.dev/mcbus/cli/v1/message-received.schema.json";
const PUBLISHED_SCHEMA: &str = "https://schemas.3leaps.dev/mcbus/cli/v1/message-published.schema.json";
const REPLY_SCHEMA: &str = "https://schemas.3leaps.dev/mcbus/cli/v1/reply-received.schema.json";

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    schema_id: &'a str,
    sender_id: &'a str,
    topic: &'a str,
    correlation_id: &'a str,
    size: usize,
    body: &'a str,
    timestamp: String,
}

#[derive(Serialize)]
struct PublishedOutput<'a> {
    schema_id: &'a str,
    topic: &'a str,
    correlation_id: &'a str,
    size: usize,
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    schema_id: &'a str,
    target: &'a str,
    signal: &'a str,
    size: usize,
    body: &'a str,
}

/// Print one received publication.
pub fn print_delivery(delivery: &Delivery, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&MessageOutput {
            schema_id: MESSAGE_SCHEMA,
            sender_id: &delivery.sender_id,
            topic: &delivery.subject,
            correlation_id: &delivery.correlation_id,
            size: delivery.body.len(),
            body: &delivery.body,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => print_table(
            &["TOPIC", "SENDER", "SIZE", "BODY"],
            vec![
                delivery.subject.clone(),
                delivery.sender_id.clone(),
                delivery.body.len().to_string(),
                delivery.body.clone(),
            ],
        ),
        OutputFormat::Pretty => println!(
            "topic={} sender={} id={} size={} body={}",
            delivery.subject,
            delivery.sender_id,
            delivery.correlation_id,
            delivery.body.len(),
            delivery.body
        ),
        OutputFormat::Raw => print_raw_line(&delivery.body),
    }
}

/// Print the outcome of a publish.
pub fn print_published(topic: &str, correlation_id: &str, size: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&PublishedOutput {
            schema_id: PUBLISHED_SCHEMA,
            topic,
            correlation_id,
            size,
        }),
        OutputFormat::Table => print_table(
            &["TOPIC", "CORRELATION ID", "SIZE"],
            vec![topic.to_string(), correlation_id.to_string(), size.to_string()],
        ),
        OutputFormat::Pretty => println!("published topic={topic} id={correlation_id} size={size}"),
        OutputFormat::Raw => print_raw_line(correlation_id),
    }
}

/// Print a request's reply.
pub fn print_reply(target: &str, signal: &str, body: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ReplyOutput {
            schema_id: REPLY_SCHEMA,
            target,
            signal,
            size: body.len(),
            body,
        }),
        OutputFormat::Table => print_table(
            &["TARGET", "SIGNAL", "SIZE", "REPLY"],
            vec![
                target.to_string(),
                signal.to_string(),
                body.len().to_string(),
                body.to_string(),
            ],
        ),
        OutputFormat::Pretty => {
            println!("reply from={target} signal={signal} size={} body={body}", body.len())
        }
        OutputFormat::Raw => print_raw_line(body),
    }
}

fn print_json(value: &impl Serialize) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn print_table(header: &[&str], row: Vec<String>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec())
        .add_row(row);
    println!("{table}");
}

fn print_raw_line(text: &str) {
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(text.as_bytes());
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

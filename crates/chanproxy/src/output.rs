use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use chanproxy_peer::Message;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

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
    target: &'a str,
    id: Option<&'a str>,
    message: &'a Value,
    timestamp: String,
}

/// Print one message received from (or in reply from) `target`.
pub fn print_message(message: &Message, target: &str, format: OutputFormat) {
    let value = message_value(message);
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                target,
                id: message.id(),
                message: &value,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TARGET", "ID", "MESSAGE"])
                .add_row(vec![
                    target.to_string(),
                    message.id().unwrap_or("-").to_string(),
                    value.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "target={} id={} message={}",
                target,
                message.id().unwrap_or("-"),
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
            );
        }
        OutputFormat::Raw => {
            let mut line = value.to_string();
            line.push('\n');
            print_raw(line.as_bytes());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn message_value(message: &Message) -> Value {
    serde_json::to_value(message).unwrap_or(Value::Null)
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

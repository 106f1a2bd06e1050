use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use devlink_engine::{ConnectionEvent, Health};
use devlink_frame::{hex_preview, DecodeEvent, TopicField};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// One printable item: a decoded unit, a diagnostic or a lifecycle change.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record<'a> {
    Message {
        #[serde(skip_serializing_if = "Option::is_none")]
        uuid: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        message: &'a Value,
    },
    Frame {
        #[serde(skip_serializing_if = "Option::is_none")]
        uuid: Option<&'a str>,
        size: usize,
        hex: String,
    },
    Text {
        #[serde(skip_serializing_if = "Option::is_none")]
        uuid: Option<&'a str>,
        line: &'a str,
    },
    Skipped {
        count: usize,
        preview: &'a str,
    },
    Rejected {
        dropped: usize,
        reason: &'a str,
    },
    Added {
        uuid: &'a str,
    },
    Health {
        uuid: &'a str,
        from: Health,
        to: Health,
    },
    Removed {
        uuid: &'a str,
    },
}

impl<'a> Record<'a> {
    pub fn message(uuid: Option<&'a str>, message: &'a Value, topic_field: &str) -> Self {
        Record::Message {
            uuid,
            topic: message.topic(topic_field).map(|t| t.to_string()),
            message,
        }
    }

    pub fn frame(uuid: Option<&'a str>, frame: &[u8]) -> Self {
        Record::Frame {
            uuid,
            size: frame.len(),
            hex: hex_preview(frame, frame.len()),
        }
    }

    pub fn decoded(event: &'a DecodeEvent<Value>, topic_field: &str) -> Self {
        match event {
            DecodeEvent::Message(message) => Record::message(None, message, topic_field),
            DecodeEvent::Binary(frame) => Record::frame(None, frame),
            DecodeEvent::Text(line) => Record::Text { uuid: None, line },
            DecodeEvent::Skipped { count, preview } => Record::Skipped {
                count: *count,
                preview,
            },
            DecodeEvent::Rejected { reason, dropped } => Record::Rejected {
                dropped: *dropped,
                reason,
            },
        }
    }

    pub fn connection(event: &'a ConnectionEvent) -> Self {
        match event {
            ConnectionEvent::Added { uuid } => Record::Added { uuid },
            ConnectionEvent::HealthChanged { uuid, from, to } => Record::Health {
                uuid,
                from: *from,
                to: *to,
            },
            ConnectionEvent::Removed { uuid } => Record::Removed { uuid },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Record::Message { .. } => "message",
            Record::Frame { .. } => "frame",
            Record::Text { .. } => "text",
            Record::Skipped { .. } => "skipped",
            Record::Rejected { .. } => "rejected",
            Record::Added { .. } => "added",
            Record::Health { .. } => "health",
            Record::Removed { .. } => "removed",
        }
    }

    fn uuid(&self) -> Option<&str> {
        match self {
            Record::Message { uuid, .. } | Record::Frame { uuid, .. } | Record::Text { uuid, .. } => *uuid,
            Record::Added { uuid } | Record::Health { uuid, .. } | Record::Removed { uuid } => Some(*uuid),
            Record::Skipped { .. } | Record::Rejected { .. } => None,
        }
    }

    fn detail(&self) -> String {
        match self {
            Record::Message { topic, message, .. } => format!(
                "topic={} {}",
                topic.as_deref().unwrap_or("-"),
                serde_json::to_string(message).unwrap_or_default()
            ),
            Record::Frame { size, hex, .. } => format!("size={size} {hex}"),
            Record::Text { line, .. } => (*line).to_string(),
            Record::Skipped { count, preview } => format!("count={count} {preview}"),
            Record::Rejected { dropped, reason } => format!("dropped={dropped} {reason}"),
            Record::Added { .. } | Record::Removed { .. } => String::new(),
            Record::Health { from, to, .. } => format!("{from} -> {to}"),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    timestamp: String,
    #[serde(flatten)]
    record: &'a Record<'a>,
}

pub fn emit(record: &Record<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = Envelope {
                timestamp: now_unix_millis(),
                record,
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
                .set_header(vec!["KIND", "CONNECTION", "DETAIL"])
                .add_row(vec![
                    record.kind().to_string(),
                    record.uuid().unwrap_or("-").to_string(),
                    record.detail(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => match record.uuid() {
            Some(uuid) => println!("{:<8} [{uuid}] {}", record.kind(), record.detail()),
            None => println!("{:<8} {}", record.kind(), record.detail()),
        },
    }
}

pub fn print_raw(data: &[u8]) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(data)?;
    out.flush()
}

fn now_unix_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

//! Rendering of queued events into notification bodies.
//!
//! Both renderers are pure: occurrence times are printed with a fixed UTC
//! offset and the report timestamp is passed in by the caller.

use std::fmt::Write;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use tracing::warn;

use callrelay_core::types::{Event, EventKind};

use crate::error::DispatchError;
use crate::transport::Notification;

/// Colors cycled through by line id so events from one line look alike.
pub const LINE_COLORS: [&str; 10] = [
    "#1E90FF", "#7d3c98", "#DAA520", "#9400D3", "#FF8C00", "#4682B4", "#f39c12", "#DB7093",
    "#5F9EA0", "#708090",
];

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const PLAIN_ITEM_SEPARATOR: &str = "  ////  ";
const PLAIN_FIELD_SEPARATOR: &str = "  | ";

const EMPTY_REPORT: &str = "No pending events in this report.";
const UNKNOWN_LINE: &str = "Unknown line";

const BODY_STYLE: &str = "font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, \
    'Helvetica Neue', sans-serif; line-height: 1.5; color: #333333; margin: 0; padding: 10px; \
    background-color: #f4f4f4;";
const HEADING_STYLE: &str = "color: #222222; margin-bottom: 8px; font-size: 1.4em;";
const SUBTITLE_STYLE: &str =
    "color: #666666; font-size: 0.9em; margin-top: 0; margin-bottom: 15px;";
const RULE_STYLE: &str = "border: none; border-top: 1px solid #cccccc; margin: 25px 0;";
const TABLE_STYLE: &str = "border-collapse: collapse; width: 100%; max-width: 600px; \
    margin-bottom: 25px; border: 1px solid #cccccc; background-color: #ffffff; \
    border-radius: 5px; box-shadow: 0 1px 3px rgba(0,0,0,0.1); overflow: hidden;";
const HEADER_CELL_STYLE: &str = "padding: 10px 15px; font-weight: bold; \
    background-color: #f9f9f9; width: 90px; border-bottom: 1px solid #eeeeee; \
    border-right: 1px solid #eeeeee; color: #555555; vertical-align: top;";
const DATA_CELL_STYLE: &str =
    "padding: 10px 15px; vertical-align: top; border-bottom: 1px solid #eeeeee;";

/// Palette entry for a line id. Negative ids map like their absolute value.
pub fn line_color(line_id: i64) -> &'static str {
    let index = (line_id.unsigned_abs() % LINE_COLORS.len() as u64) as usize;
    LINE_COLORS[index]
}

/// Escape `& < > " '` for inclusion in HTML text or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Collapse line breaks so a value stays on one plain-text line.
fn single_line(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

fn heading_name(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Message => "Message",
        EventKind::MissedCall => "Missed call",
    }
}

fn kind_style(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Message => "color: #008000; font-weight: bold;",
        EventKind::MissedCall => "color: #cc0000; font-weight: bold;",
    }
}

fn content_text(event: &Event) -> &str {
    match (event.kind, event.body.as_deref()) {
        (EventKind::Message, Some(body)) => body,
        (EventKind::Message, None) => "(empty)",
        (EventKind::MissedCall, _) => "(no content)",
    }
}

fn line_text(event: &Event) -> String {
    let label = if event.line_label.trim().is_empty() {
        UNKNOWN_LINE
    } else {
        event.line_label.as_str()
    };
    format!("{} (ID:{})", label, event.line_id)
}

/// Turns a batch of events into a deliverable notification.
pub trait Render: Send + Sync {
    fn render(
        &self,
        subject: &str,
        events: &[Event],
        generated_at: DateTime<Utc>,
    ) -> Result<Notification, DispatchError>;
}

/// Renders events with a fixed display offset.
#[derive(Debug, Clone, Copy)]
pub struct MessageFormatter {
    offset: FixedOffset,
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }
}

impl MessageFormatter {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Build a formatter from an offset in minutes east of UTC.
    ///
    /// Offsets outside +/-24h fall back to UTC.
    pub fn from_offset_minutes(minutes: i32) -> Self {
        match minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
        {
            Some(offset) => Self { offset },
            None => {
                warn!(minutes, "UTC offset out of range, using UTC");
                Self::default()
            }
        }
    }

    fn time(&self, at: &DateTime<Utc>) -> String {
        at.with_timezone(&self.offset).format(TIME_FORMAT).to_string()
    }

    /// HTML report with one two-column table per event.
    pub fn format_html(
        &self,
        events: &[Event],
        generated_at: DateTime<Utc>,
    ) -> Result<String, DispatchError> {
        if events.is_empty() {
            return Ok(format!("<h3>{}</h3>", EMPTY_REPORT));
        }

        let mut out = String::new();
        write!(
            out,
            "<!DOCTYPE html><html><head><meta charset=\"UTF-8\"><title>Event report</title></head>\
             <body style=\"{}\">",
            BODY_STYLE
        )?;

        match events {
            [single] => write!(
                out,
                "<h2 style=\"{}\">{} notification</h2>",
                HEADING_STYLE,
                heading_name(single.kind)
            )?,
            _ => write!(
                out,
                "<h2 style=\"{}\">SMS/Call event report ({})</h2>",
                HEADING_STYLE,
                events.len()
            )?,
        }
        write!(
            out,
            "<p style=\"{}\">Report generated: {}</p><hr style=\"{}\">",
            SUBTITLE_STYLE,
            self.time(&generated_at),
            RULE_STYLE
        )?;

        for event in events {
            self.write_event_table(&mut out, event)?;
        }

        out.push_str("</body></html>");
        Ok(out)
    }

    /// The table rendered for one event inside [`format_html`](Self::format_html).
    pub fn event_table(&self, event: &Event) -> Result<String, DispatchError> {
        let mut out = String::new();
        self.write_event_table(&mut out, event)?;
        Ok(out)
    }

    fn write_event_table(&self, out: &mut String, event: &Event) -> Result<(), DispatchError> {
        write!(
            out,
            "<table border=\"0\" cellpadding=\"0\" cellspacing=\"0\" style=\"{}\"><tbody>",
            TABLE_STYLE
        )?;
        write_row(out, "Time", &self.time(&event.occurred_at), None)?;
        write_row(out, "Type", event.kind.label(), Some(kind_style(event.kind)))?;
        write_row(out, "Number", &escape_html(&event.origin), None)?;
        write_row(out, "Content", &escape_html(content_text(event)), None)?;
        let line_style = format!("color: {}; font-weight: bold;", line_color(event.line_id));
        write_row(out, "Line", &escape_html(&line_text(event)), Some(&line_style))?;
        out.push_str("</tbody></table>");
        Ok(())
    }

    /// Single-line rendering for plain-text gateways.
    pub fn format_plain_text(&self, events: &[Event]) -> Result<String, DispatchError> {
        if events.is_empty() {
            return Ok(EMPTY_REPORT.to_string());
        }

        let mut out = String::new();
        match events {
            [single] => write!(out, "{}{}", heading_name(single.kind), PLAIN_ITEM_SEPARATOR)?,
            _ => write!(
                out,
                "SMS/Call event report ({}){}",
                events.len(),
                PLAIN_ITEM_SEPARATOR
            )?,
        }

        for (i, event) in events.iter().enumerate() {
            write!(
                out,
                "{}.Time: {}{sep}Type: {}{sep}Number: {}{sep}Content: {}{sep}Line: {}{end}",
                i + 1,
                self.time(&event.occurred_at),
                event.kind.label(),
                single_line(&event.origin),
                single_line(content_text(event)),
                single_line(&line_text(event)),
                sep = PLAIN_FIELD_SEPARATOR,
                end = PLAIN_ITEM_SEPARATOR,
            )?;
        }
        Ok(out)
    }

    /// Both renderings of `events` under one subject.
    pub fn notification(
        &self,
        subject: &str,
        events: &[Event],
        generated_at: DateTime<Utc>,
    ) -> Result<Notification, DispatchError> {
        Ok(Notification {
            subject: subject.to_string(),
            html: self.format_html(events, generated_at)?,
            plain_text: self.format_plain_text(events)?,
        })
    }
}

impl Render for MessageFormatter {
    fn render(
        &self,
        subject: &str,
        events: &[Event],
        generated_at: DateTime<Utc>,
    ) -> Result<Notification, DispatchError> {
        self.notification(subject, events, generated_at)
    }
}

fn write_row(
    out: &mut String,
    header: &str,
    data: &str,
    extra_style: Option<&str>,
) -> Result<(), DispatchError> {
    write!(
        out,
        "<tr><td style=\"{}\">{}</td><td style=\"{}{}\">{}</td></tr>",
        HEADER_CELL_STYLE,
        header,
        DATA_CELL_STYLE,
        extra_style.unwrap_or(""),
        data
    )?;
    Ok(())
}

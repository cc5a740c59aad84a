//! Alert delivery contract, alert text, and a terminal notifier.
//!
//! The terminal notifier emits escape codes (BEL, OSC 9, OSC 777) so the
//! hosting terminal can raise a desktop notification, then prints the alert
//! body. It is the delivery channel when no mail credentials are configured.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use std::io::{self, Write};
use std::sync::Mutex;

use crate::monitor::error::DeliveryError;
use crate::monitor::snapshot::ListingItem;

/// Delivers a notification for a set of new listing items.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, items: &[ListingItem]) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<T: Notifier + ?Sized> Notifier for Box<T> {
    async fn notify(&self, items: &[ListingItem]) -> Result<(), DeliveryError> {
        (**self).notify(items).await
    }
}

/// Subject line prefix; the local time is appended.
const SUBJECT_PREFIX: &str = "New Companies Alert";

/// Plain-text alert listing each new item by 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
}

impl AlertMessage {
    pub fn compose<Tz: TimeZone>(items: &[ListingItem], at: &DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        let subject = format!("{} - {}", SUBJECT_PREFIX, at.format("%d-%b %I:%M %p"));

        let mut body = String::from("Hello,\n\nNew companies have been posted on the portal:\n\n");
        for (i, item) in items.iter().enumerate() {
            body.push_str(&format!("{}. {}\n", i + 1, item));
        }
        body.push_str("\nPlease check the portal for more details.\n\nBest regards,\nPortal Watch");

        Self { subject, body }
    }

    /// Compose with the current local time.
    pub fn now(items: &[ListingItem]) -> Self {
        Self::compose(items, &chrono::Local::now())
    }
}

/// Writes alerts to a terminal.
pub struct TerminalNotifier {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TerminalNotifier {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn write_alert(&self, alert: &AlertMessage, count: usize) -> io::Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "terminal writer poisoned"))?;

        let title = format!("portal-watch: {} new", count);
        let message = truncate_preview(&alert.subject, 80);

        // BEL - universal terminal bell
        out.write_all(b"\x07")?;
        // OSC 9 - iTerm2 notification
        write!(out, "\x1b]9;{}\x07", escape_osc(&message))?;
        // OSC 777 - Konsole/VTE/Gnome Terminal
        write!(
            out,
            "\x1b]777;notify;{};{}\x07",
            escape_osc(&title),
            escape_osc(&message)
        )?;

        writeln!(out, "\n{}\n\n{}\n", alert.subject, alert.body)?;
        out.flush()
    }
}

#[async_trait]
impl Notifier for TerminalNotifier {
    async fn notify(&self, items: &[ListingItem]) -> Result<(), DeliveryError> {
        let alert = AlertMessage::now(items);
        self.write_alert(&alert, items.len())
            .map_err(|e| DeliveryError::Terminal(e.to_string()))
    }
}

/// Strips characters that would terminate or corrupt an OSC sequence.
fn escape_osc(s: &str) -> String {
    s.replace('\x07', "")
        .replace('\x1b', "")
        .replace('\n', " ")
        .replace('\r', "")
}

/// First line only, cut to `max_len` characters.
fn truncate_preview(preview: &str, max_len: usize) -> String {
    let first_line = preview.lines().next().unwrap_or(preview);
    if first_line.chars().count() <= max_len {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

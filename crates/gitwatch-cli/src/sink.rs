use async_trait::async_trait;
use gitwatch_core::{Destinations, NotificationSink, Result, UpdateEvent, UpdateItem};
use serde::Serialize;

/// How detected updates are written out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFormat {
    Text,
    JsonLines,
}

/// Writes each update to stdout, one line per event
pub struct StdoutSink {
    format: EventFormat,
}

impl StdoutSink {
    pub fn new(format: EventFormat) -> Self {
        Self { format }
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    destinations: &'a Destinations,
    #[serde(flatten)]
    event: &'a UpdateEvent,
}

#[async_trait]
impl NotificationSink for StdoutSink {
    async fn deliver(&self, destinations: &Destinations, event: &UpdateEvent) -> Result<()> {
        match self.format {
            EventFormat::Text => {
                println!("{}", format_event(event));
                tracing::debug!(
                    "would push to groups {:?} users {:?}",
                    destinations.groups,
                    destinations.users
                );
            }
            EventFormat::JsonLines => {
                let line = serde_json::to_string(&EventLine {
                    destinations,
                    event,
                })?;
                println!("{}", line);
            }
        }
        Ok(())
    }
}

/// One human-readable line for an update
pub fn format_event(event: &UpdateEvent) -> String {
    let target = if event.branch.is_empty() {
        format!("[{}] {}", event.provider, event.repo)
    } else {
        format!("[{}] {}@{}", event.provider, event.repo, event.branch)
    };
    let note = if event.note.is_empty() {
        String::new()
    } else {
        format!(" ({})", event.note)
    };

    match &event.item {
        UpdateItem::Commit(c) => format!(
            "{}{} commit {} by {}: {} {}",
            target,
            note,
            c.short_sha(),
            c.author,
            c.message,
            c.url
        ),
        UpdateItem::Release(r) => {
            let mut line = format!("{}{} release {}", target, note, r.tag);
            if r.title != r.tag {
                line.push_str(&format!(" \"{}\"", r.title));
            }
            if let Some(body) = &r.body {
                line.push_str(&format!(": {}", body));
            }
            if !r.url.is_empty() {
                line.push_str(&format!(" {}", r.url));
            }
            line
        }
    }
}

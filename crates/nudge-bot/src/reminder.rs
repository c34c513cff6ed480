use std::sync::LazyLock;

use regex::Regex;

/// "remind[er] [me] [in] <n> [m|min|mins|minute|minutes] [(:|-) <message>]"
static REMINDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        ^\s*remind(?:er)?
        (?:\s+me)?
        (?:\s+in)?\s*
        (?P<num>[0-9]+)
        \s*(?:m|min|mins|minute|minutes)?
        (?:\s*[:\-]\s*(?P<msg>.+))?
        \s*$",
    )
    .expect("reminder pattern is valid")
});

/// A parsed "remind me" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderRequest {
    pub delay_minutes: u32,
    pub message: String,
}

impl ReminderRequest {
    pub fn acknowledgement(&self) -> String {
        format!("Okay! I'll remind you in {} minute(s).", self.delay_minutes)
    }
}

/// Parse free text as a reminder request. `None` means the text is not one
/// and should be handled some other way.
pub fn parse_reminder(text: &str) -> Option<ReminderRequest> {
    let caps = REMINDER_RE.captures(text.trim())?;
    // Counts too large for u32 are not treated as reminders
    let delay_minutes: u32 = caps.name("num")?.as_str().parse().ok()?;

    let message = caps
        .name("msg")
        .map(|m| m.as_str().trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| default_message(delay_minutes));

    Some(ReminderRequest {
        delay_minutes,
        message,
    })
}

fn default_message(minutes: u32) -> String {
    format!("{minutes} minute(s) have passed.")
}

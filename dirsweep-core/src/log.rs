use chrono::Local;

/// Append-only, human-readable log kept for the lifetime of a session.
///
/// Each line is `<RFC 2822 local time>\t<message>`.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    buffer: String,
    disabled: bool,
}

impl SessionLog {
    pub fn new(disabled: bool) -> Self {
        Self {
            buffer: String::new(),
            disabled,
        }
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    pub fn add(&mut self, message: impl AsRef<str>) {
        if self.disabled {
            return;
        }
        self.buffer.push_str(&Local::now().to_rfc2822());
        self.buffer.push('\t');
        self.buffer.push_str(message.as_ref());
        self.buffer.push('\n');
    }

    /// Separates two phases with a blank line.
    pub fn add_spacer(&mut self) {
        if !self.disabled && !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.buffer.lines().filter(|line| !line.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

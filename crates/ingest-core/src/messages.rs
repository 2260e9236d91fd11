//! Bounded diagnostic message accumulation.

/// Append-only message log for one import run. When the cap is reached,
/// further messages are counted but not stored; the rendered output ends
/// with a single summary line instead.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    entries: Vec<String>,
    max_entries: usize,
    dropped: u64,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::with_max_entries(2_000)
    }
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries: max_entries.max(1),
            dropped: 0,
        }
    }

    /// Append a message, dropping it (counted) when the buffer is full.
    pub fn append(&mut self, message: impl Into<String>) {
        if self.entries.len() < self.max_entries {
            self.entries.push(message.into());
        } else {
            self.dropped += 1;
        }
    }

    /// Discard everything, including the dropped count. Used by the
    /// fatal memory path which replaces all accumulated output with a
    /// single notice.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.dropped = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.dropped == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Snapshot all stored messages.
    pub fn to_vec(&self) -> Vec<String> {
        self.entries.clone()
    }
}

impl std::fmt::Display for MessageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, entry) in self.entries.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{entry}")?;
        }
        if self.dropped > 0 {
            if !self.entries.is_empty() {
                writeln!(f)?;
            }
            write!(f, "({} more messages dropped)", self.dropped)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_until_cap() {
        let mut buffer = MessageBuffer::with_max_entries(2);
        buffer.append("one");
        buffer.append("two");
        buffer.append("three");

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);

        let rendered = buffer.to_string();
        assert!(rendered.contains("one"));
        assert!(rendered.contains("(1 more messages dropped)"));
        assert!(!rendered.contains("three"));
    }

    #[test]
    fn clear_resets_everything() {
        let mut buffer = MessageBuffer::with_max_entries(1);
        buffer.append("one");
        buffer.append("two");
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.dropped(), 0);
        assert_eq!(buffer.to_string(), "");
    }

    #[test]
    fn iterates_entries() {
        let mut buffer = MessageBuffer::new();
        buffer.append("a");
        buffer.append("b");
        let collected: Vec<&str> = buffer.iter().collect();
        assert_eq!(collected, vec!["a", "b"]);
    }
}

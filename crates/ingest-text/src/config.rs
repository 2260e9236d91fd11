//! Delimited text parsing options.

/// Configuration for reading delimited text files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextParserConfig {
    /// Field delimiter character (default: comma).
    pub delimiter: char,
    /// Quote character (default: double quote).
    pub quote_char: char,
    /// Escape character; `None` uses quote doubling.
    pub escape_char: Option<char>,
    /// Whether the first line is a header row (default: true).
    pub has_header: bool,
    /// Accept records with a varying number of fields; short records
    /// are padded with NULLs (default: true).
    pub flexible: bool,
}

impl Default for TextParserConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote_char: '"',
            escape_char: None,
            has_header: true,
            flexible: true,
        }
    }
}

impl TextParserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the field delimiter.
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the quote character.
    pub fn quote_char(mut self, quote_char: char) -> Self {
        self.quote_char = quote_char;
        self
    }

    /// Set an explicit escape character instead of quote doubling.
    pub fn escape_char(mut self, escape_char: char) -> Self {
        self.escape_char = Some(escape_char);
        self
    }

    /// Configure header presence.
    pub fn has_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    /// Treat the first line as data.
    pub fn without_header(mut self) -> Self {
        self.has_header = false;
        self
    }

    /// Reject records whose field count differs from the header.
    pub fn strict_field_count(mut self) -> Self {
        self.flexible = false;
        self
    }

    /// Delimiter as a byte for the csv crate.
    pub fn delimiter_u8(&self) -> u8 {
        self.delimiter as u8
    }

    /// Quote character as a byte for the csv crate.
    pub fn quote_char_u8(&self) -> u8 {
        self.quote_char as u8
    }

    /// Escape character as a byte, when one is configured.
    pub fn escape_char_u8(&self) -> Option<u8> {
        self.escape_char.map(|c| c as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TextParserConfig::default();
        assert_eq!(config.delimiter, ',');
        assert_eq!(config.quote_char, '"');
        assert_eq!(config.escape_char, None);
        assert!(config.has_header);
        assert!(config.flexible);
    }

    #[test]
    fn builder_chain() {
        let config = TextParserConfig::new()
            .delimiter('\t')
            .quote_char('\'')
            .escape_char('\\')
            .without_header()
            .strict_field_count();

        assert_eq!(config.delimiter, '\t');
        assert_eq!(config.quote_char, '\'');
        assert_eq!(config.escape_char, Some('\\'));
        assert!(!config.has_header);
        assert!(!config.flexible);
    }

    #[test]
    fn byte_conversions() {
        let config = TextParserConfig::new().delimiter(';').escape_char('\\');
        assert_eq!(config.delimiter_u8(), b';');
        assert_eq!(config.quote_char_u8(), b'"');
        assert_eq!(config.escape_char_u8(), Some(b'\\'));
    }
}

use lazy_static::lazy_static;
use regex::Regex;
use std::io::Write;

lazy_static! {
    static ref REDACTION_REGEX: Regex = Regex::new(
        r"(?i)(AIza[0-9A-Za-z_\-]{20,}|Bearer\s+[^\s]+|x-goog-api-key:\s*[^\s]+|([?&])key=[^&\s]+)"
    )
    .expect("Invalid redaction regex");
}

/// Rewrites API keys and bearer tokens before log lines reach `inner`.
pub struct RedactingWriter<W: Write> {
    inner: W,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

pub fn redact(input: &str) -> std::borrow::Cow<'_, str> {
    REDACTION_REGEX.replace_all(input, |caps: &regex::Captures| match caps.get(2) {
        Some(sep) => format!("{}key=[REDACTED]", sep.as_str()),
        None => "[REDACTED]".to_string(),
    })
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let input = String::from_utf8_lossy(buf);
        let redacted = redact(&input);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

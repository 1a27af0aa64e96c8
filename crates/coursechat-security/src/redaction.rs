use std::io::Write;
use std::sync::LazyLock;

use regex::Regex;
use tracing_subscriber::fmt::MakeWriter;

const REDACTED: &str = "[REDACTED]";

static SECRET_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
          sk-proj-[A-Za-z0-9_\-]{10,}       # project-scoped provider keys
        | sk-[A-Za-z0-9_\-]{20,}            # legacy provider keys
        | (?i:bearer)\s+[A-Za-z0-9._\-]{16,} # authorization headers
        ",
    )
    .expect("redaction regex should compile")
});

static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(api[_-]?key|access[_-]?token)(["']?\s*[:=]\s*["']?)([^\s"'&,]{8,})"#)
        .expect("key/value regex should compile")
});

/// Log writer that scrubs provider credentials before they reach the sink.
pub struct RedactingWriter<W> {
    inner: W,
}

impl RedactingWriter<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self {
            inner: std::io::stderr(),
        }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let original = String::from_utf8_lossy(buf);
        self.inner.write_all(redact_secrets(&original).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for RedactingWriter<std::io::Stderr> {
    type Writer = RedactingWriter<std::io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::stderr()
    }
}

/// Replace provider keys, bearer tokens and `api_key=` style values with
/// `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    let scrubbed = SECRET_PATTERNS.replace_all(input, REDACTED);
    KEY_VALUE
        .replace_all(&scrubbed, format!("${{1}}${{2}}{REDACTED}"))
        .into_owned()
}

/// Show only the last four characters of a key, for diagnostics.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{tail}", "*".repeat(chars.len() - 4))
}

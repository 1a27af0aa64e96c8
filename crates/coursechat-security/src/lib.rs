pub mod redaction;

pub use redaction::{RedactingWriter, mask_key, redact_secrets};

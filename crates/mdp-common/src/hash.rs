//! Content-addressed keys for dead-letter records

use sha2::{Digest, Sha256};

/// Compute the content key for a set of identifying fields.
///
/// The fields are joined with `|` in the given order, hashed with SHA-256
/// over the UTF-8 bytes, and rendered as lowercase hex. Identical field
/// tuples always produce the same key, so repeated events for the same
/// source collapse onto one stored record.
pub fn content_key<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = fields
        .into_iter()
        .map(|f| f.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("|");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

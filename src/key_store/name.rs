//! Key identifier validation.
//!
//! An identifier is used both as the cache lookup key and, during a reload
//! scan, as a filename component inside the key directory. Every rule below
//! exists so that an identifier can never name anything outside that
//! directory:
//!
//! 1. non-empty and ends with [`KEY_SUFFIX`];
//! 2. no ASCII control characters (`0x00..=0x1F`, `0x7F`);
//! 3. no `..`, `/` or `\`;
//! 4. lexically cleaning the identifier leaves it unchanged;
//! 5. the cleaned form contains no path separator.
//!
//! Rules 4 and 5 are implied by rule 3 for every input we can construct
//! today, but they are checked independently so that relaxing rule 3 later
//! cannot silently open a traversal.

use thiserror::Error;

/// Reserved suffix every key identifier must carry.
pub const KEY_SUFFIX: &str = ".key";

/// Reason an identifier was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidIdentifier {
    /// The identifier is the empty string.
    #[error("identifier is empty")]
    Empty,

    /// The identifier does not end with `.key`.
    #[error("identifier must end with {KEY_SUFFIX}")]
    MissingSuffix,

    /// The identifier contains an ASCII control character.
    #[error("identifier contains a control character")]
    ControlCharacter,

    /// The identifier contains `..`, `/` or `\`.
    #[error("identifier contains a path traversal sequence")]
    Traversal,

    /// Lexical cleaning changed the identifier.
    #[error("identifier is not in canonical form")]
    NotCanonical,

    /// The cleaned identifier still contains a path separator.
    #[error("identifier contains a path separator")]
    PathSeparator,
}

/// Validate a candidate key identifier.
///
/// Pure and deterministic. Note that the bare suffix (`".key"`) is accepted.
pub fn validate_identifier(identifier: &str) -> Result<(), InvalidIdentifier> {
    if identifier.is_empty() {
        return Err(InvalidIdentifier::Empty);
    }
    if !identifier.ends_with(KEY_SUFFIX) {
        return Err(InvalidIdentifier::MissingSuffix);
    }
    if identifier.chars().any(|c| c.is_ascii_control()) {
        return Err(InvalidIdentifier::ControlCharacter);
    }
    if identifier.contains("..") || identifier.contains(['/', '\\']) {
        return Err(InvalidIdentifier::Traversal);
    }

    let cleaned = clean_path(identifier);
    if cleaned != identifier {
        return Err(InvalidIdentifier::NotCanonical);
    }
    if cleaned.contains(['/', '\\']) {
        return Err(InvalidIdentifier::PathSeparator);
    }

    Ok(())
}

/// Lexically clean a slash-separated path.
///
/// Collapses repeated separators, drops `.` elements, resolves `..` against
/// the preceding element, and strips trailing separators. Purely textual:
/// the filesystem is never consulted. An empty result becomes `"."`.
#[must_use]
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for element in path.split('/') {
        match element {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                // `/..` is `/`
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

//! # Input Validation and Path Security
//!
//! Every event is validated before append: bounded string lengths, no NUL
//! bytes, a control-character budget, an injection-pattern denylist, and
//! structural limits on payload trees. Paths handed to the store are
//! confined to the allowed base directories with traversal and symlink
//! resolution.

use shared_types::{Event, EventBatch, Value, MAX_EVENT_SIZE_BYTES};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Maximum length for free-form string fields.
pub const MAX_STRING_LENGTH: usize = 1024 * 1024;
/// Maximum length for identifier fields.
pub const MAX_ID_LENGTH: usize = 256;
/// Maximum number of keys in a payload map.
pub const MAX_MAP_KEYS: usize = 1000;
/// Maximum payload nesting depth.
pub const MAX_NESTING_DEPTH: usize = 10;
/// Maximum payload list length.
pub const MAX_LIST_ITEMS: usize = 10_000;
/// Maximum fraction of control characters in a string.
pub const MAX_CONTROL_CHAR_RATIO: f64 = 0.10;

/// Lowercase substrings that are never allowed in string payloads.
const FORBIDDEN_SUBSTRINGS: &[&str] = &[
    "<script",
    "javascript:",
    "vbscript:",
    "data:text/html",
    "eval(",
    "function(",
    "settimeout(",
    "setinterval(",
];

/// Errors from input or path validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A string field exceeds its length bound.
    #[error("Field {field} length {length} exceeds limit {limit}")]
    StringTooLong {
        field: &'static str,
        length: usize,
        limit: usize,
    },

    /// A string field is empty where content is required.
    #[error("Field {field} must not be empty")]
    EmptyString { field: &'static str },

    /// A string field contains a NUL byte.
    #[error("Field {field} contains a NUL byte")]
    NulByte { field: &'static str },

    /// A string field exceeds the control-character budget.
    #[error("Field {field} exceeds the control character budget")]
    ExcessControlChars { field: &'static str },

    /// A string field matches the injection denylist.
    #[error("Field {field} matches forbidden pattern {pattern}")]
    ForbiddenPattern {
        field: &'static str,
        pattern: &'static str,
    },

    /// A payload map has too many keys.
    #[error("Field {field} has {count} keys, limit {limit}")]
    TooManyKeys {
        field: &'static str,
        count: usize,
        limit: usize,
    },

    /// A payload tree nests too deeply.
    #[error("Field {field} nests to depth {depth}, limit {limit}")]
    NestingTooDeep {
        field: &'static str,
        depth: usize,
        limit: usize,
    },

    /// A payload list is too long.
    #[error("Field {field} has {length} items, limit {limit}")]
    ListTooLong {
        field: &'static str,
        length: usize,
        limit: usize,
    },

    /// The event exceeds the per-event size bound.
    #[error("Event size {size} exceeds {limit} byte limit")]
    EventTooLarge { size: usize, limit: usize },

    /// Batch-level constraint violated.
    #[error("Batch invalid: {message}")]
    BatchInvalid { message: String },

    /// A path matched a dangerous pattern.
    #[error("Dangerous path pattern detected: {path}")]
    DangerousPath { path: String },

    /// A path escapes the allowed base directories.
    #[error("Path traversal attempt blocked: {path}")]
    PathOutsideAllowed { path: String },
}

/// Comprehensive input validation for event store operations.
#[derive(Debug, Default)]
pub struct InputValidator;

impl InputValidator {
    /// Create a validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate an event before append.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate_event(&self, event: &Event) -> Result<(), ValidationError> {
        Self::validate_id_string("aggregate_id", &event.aggregate_id)?;
        Self::validate_id_string("aggregate_type", &event.aggregate_type)?;
        Self::validate_id_string("source_component", &event.source_component)?;
        if let Some(agent) = &event.source_agent {
            Self::validate_id_string("source_agent", agent)?;
        }

        Self::validate_payload("event.data", &event.data)?;
        Self::validate_payload("event.metadata", &event.metadata)?;

        let size = event.size_bytes();
        if size > MAX_EVENT_SIZE_BYTES {
            return Err(ValidationError::EventTooLarge {
                size,
                limit: MAX_EVENT_SIZE_BYTES,
            });
        }

        Ok(())
    }

    /// Validate a batch before append.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint across the batch.
    pub fn validate_batch(&self, batch: &EventBatch) -> Result<(), ValidationError> {
        batch
            .validate()
            .map_err(|e| ValidationError::BatchInvalid {
                message: e.to_string(),
            })?;

        for event in &batch.events {
            self.validate_event(event)?;
        }
        Ok(())
    }

    fn validate_id_string(field: &'static str, value: &str) -> Result<(), ValidationError> {
        if value.is_empty() {
            return Err(ValidationError::EmptyString { field });
        }
        Self::validate_string(field, value, MAX_ID_LENGTH)
    }

    /// Validate a single string field against length, NUL, control
    /// character, and denylist rules.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate_string(
        field: &'static str,
        value: &str,
        max_length: usize,
    ) -> Result<(), ValidationError> {
        if value.len() > max_length {
            return Err(ValidationError::StringTooLong {
                field,
                length: value.len(),
                limit: max_length,
            });
        }
        if value.contains('\0') {
            return Err(ValidationError::NulByte { field });
        }

        if !value.is_empty() {
            let control = value.chars().filter(|c| c.is_control()).count();
            if control as f64 / value.chars().count() as f64 > MAX_CONTROL_CHAR_RATIO {
                return Err(ValidationError::ExcessControlChars { field });
            }
        }

        let lowered = value.to_lowercase();
        for pattern in FORBIDDEN_SUBSTRINGS {
            if lowered.contains(pattern) {
                return Err(ValidationError::ForbiddenPattern { field, pattern });
            }
        }
        if contains_event_handler(&lowered) {
            return Err(ValidationError::ForbiddenPattern {
                field,
                pattern: "on*=",
            });
        }
        if contains_escape_run(value) {
            return Err(ValidationError::ForbiddenPattern {
                field,
                pattern: "\\x/\\u escapes",
            });
        }

        Ok(())
    }

    fn validate_payload(
        field: &'static str,
        payload: &std::collections::BTreeMap<String, Value>,
    ) -> Result<(), ValidationError> {
        if payload.len() > MAX_MAP_KEYS {
            return Err(ValidationError::TooManyKeys {
                field,
                count: payload.len(),
                limit: MAX_MAP_KEYS,
            });
        }
        for (key, value) in payload {
            Self::validate_string(field, key, MAX_ID_LENGTH)?;
            Self::validate_value(field, value, 2)?;
        }
        Ok(())
    }

    fn validate_value(
        field: &'static str,
        value: &Value,
        depth: usize,
    ) -> Result<(), ValidationError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(ValidationError::NestingTooDeep {
                field,
                depth,
                limit: MAX_NESTING_DEPTH,
            });
        }

        match value {
            Value::Str(s) => Self::validate_string(field, s, MAX_STRING_LENGTH),
            Value::List(items) => {
                if items.len() > MAX_LIST_ITEMS {
                    return Err(ValidationError::ListTooLong {
                        field,
                        length: items.len(),
                        limit: MAX_LIST_ITEMS,
                    });
                }
                for item in items {
                    Self::validate_value(field, item, depth + 1)?;
                }
                Ok(())
            }
            Value::Map(entries) => {
                if entries.len() > MAX_MAP_KEYS {
                    return Err(ValidationError::TooManyKeys {
                        field,
                        count: entries.len(),
                        limit: MAX_MAP_KEYS,
                    });
                }
                for (key, nested) in entries {
                    Self::validate_string(field, key, MAX_ID_LENGTH)?;
                    Self::validate_value(field, nested, depth + 1)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Detect inline event handlers like `onload=` / `onerror =`.
fn contains_event_handler(lowered: &str) -> bool {
    let bytes = lowered.as_bytes();
    let mut i = 0;
    while let Some(position) = lowered[i..].find("on") {
        let start = i + position + 2;
        let mut cursor = start;
        while cursor < bytes.len() && bytes[cursor].is_ascii_alphabetic() {
            cursor += 1;
        }
        if cursor > start {
            let mut after = cursor;
            while after < bytes.len() && bytes[after] == b' ' {
                after += 1;
            }
            if after < bytes.len() && bytes[after] == b'=' {
                return true;
            }
        }
        i += position + 2;
    }
    false
}

/// Detect `\xNN` / `\uNNNN` escape runs.
fn contains_escape_run(value: &str) -> bool {
    let bytes = value.as_bytes();
    for window_start in 0..bytes.len() {
        if bytes[window_start] != b'\\' {
            continue;
        }
        let rest = &bytes[window_start + 1..];
        match rest.first() {
            Some(b'x') if rest.len() >= 3 => {
                if rest[1..3].iter().all(u8::is_ascii_hexdigit) {
                    return true;
                }
            }
            Some(b'u') if rest.len() >= 5 => {
                if rest[1..5].iter().all(u8::is_ascii_hexdigit) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// Dangerous path fragments rejected before any filesystem access.
const DANGEROUS_PATH_FRAGMENTS: &[&str] = &[
    "../", "..\\", "/etc/", "/usr/", "/var/", "/boot/", "/sys/", "/proc/", "/dev/", "file://",
    "ftp://", "http://", "https://",
];

/// Secure path validation confining paths to allowed base directories.
#[derive(Debug, Clone)]
pub struct PathValidator {
    allowed_base_dirs: Vec<PathBuf>,
}

impl PathValidator {
    /// Create a validator over the allowed base directories. An empty list
    /// falls back to the current working directory.
    #[must_use]
    pub fn new(allowed_base_dirs: &[PathBuf]) -> Self {
        let mut dirs: Vec<PathBuf> = allowed_base_dirs
            .iter()
            .map(|dir| Self::resolve_best_effort(dir))
            .collect();
        if dirs.is_empty() {
            if let Ok(cwd) = std::env::current_dir() {
                dirs.push(cwd);
            }
        }
        Self {
            allowed_base_dirs: dirs,
        }
    }

    /// Validate a path: reject dangerous fragments, resolve symlinks, and
    /// require containment in an allowed base directory.
    ///
    /// # Errors
    ///
    /// - `DangerousPath` for traversal fragments, system prefixes, or URLs.
    /// - `PathOutsideAllowed` when the resolved path escapes every base.
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, ValidationError> {
        let display = path.display().to_string();
        let lowered = display.to_lowercase();

        for fragment in DANGEROUS_PATH_FRAGMENTS {
            if lowered.contains(fragment) {
                return Err(ValidationError::DangerousPath { path: display });
            }
        }
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(ValidationError::DangerousPath { path: display });
        }

        let resolved = Self::resolve_best_effort(path);
        let allowed = self
            .allowed_base_dirs
            .iter()
            .any(|base| resolved.starts_with(base));

        if allowed {
            Ok(resolved)
        } else {
            Err(ValidationError::PathOutsideAllowed { path: display })
        }
    }

    /// Validate a directory path that may not exist yet.
    ///
    /// # Errors
    ///
    /// See [`PathValidator::validate_path`].
    pub fn validate_directory(&self, path: &Path) -> Result<PathBuf, ValidationError> {
        self.validate_path(path)
    }

    /// Canonicalize the deepest existing ancestor, then re-append the
    /// non-existing remainder. Resolves symlinks without requiring the leaf
    /// to exist.
    fn resolve_best_effort(path: &Path) -> PathBuf {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };

        if let Ok(resolved) = absolute.canonicalize() {
            return resolved;
        }

        let mut existing = absolute.clone();
        let mut remainder = Vec::new();
        while !existing.exists() {
            if let Some(name) = existing.file_name() {
                remainder.push(name.to_os_string());
            }
            if !existing.pop() {
                return absolute;
            }
        }

        let mut resolved = existing.canonicalize().unwrap_or(existing);
        for part in remainder.iter().rev() {
            resolved.push(part);
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::EventType;
    use std::collections::BTreeMap;

    fn valid_event() -> Event {
        Event::new(EventType::Custom, "elicit_1", "elicitation")
            .with_source_component("elicitation_manager")
    }

    #[test]
    fn test_valid_event_passes() {
        let validator = InputValidator::new();
        assert!(validator.validate_event(&valid_event()).is_ok());
    }

    #[test]
    fn test_script_tag_rejected() {
        let validator = InputValidator::new();
        let mut data = BTreeMap::new();
        data.insert(
            "payload".to_string(),
            Value::from("<SCRIPT>alert(1)</script>"),
        );
        let event = valid_event().with_data(data);
        assert!(matches!(
            validator.validate_event(&event),
            Err(ValidationError::ForbiddenPattern { .. })
        ));
    }

    #[test]
    fn test_event_handler_rejected() {
        let validator = InputValidator::new();
        let mut data = BTreeMap::new();
        data.insert("payload".to_string(), Value::from("<img onerror=alert(1)>"));
        let event = valid_event().with_data(data);
        assert!(matches!(
            validator.validate_event(&event),
            Err(ValidationError::ForbiddenPattern { .. })
        ));
    }

    #[test]
    fn test_hex_escape_rejected() {
        let validator = InputValidator::new();
        let mut data = BTreeMap::new();
        data.insert("payload".to_string(), Value::from(r"data \x41\x42 here"));
        let event = valid_event().with_data(data);
        assert!(matches!(
            validator.validate_event(&event),
            Err(ValidationError::ForbiddenPattern { .. })
        ));
    }

    #[test]
    fn test_benign_on_words_allowed() {
        // Words containing "on" with no assignment are fine.
        assert!(InputValidator::validate_string("field", "confirmation online", 1024).is_ok());
    }

    #[test]
    fn test_nul_byte_rejected() {
        assert_eq!(
            InputValidator::validate_string("field", "abc\0def", 1024),
            Err(ValidationError::NulByte { field: "field" })
        );
    }

    #[test]
    fn test_control_char_budget() {
        // 50% control characters is over the 10% budget.
        let noisy = "a\u{1}b\u{2}";
        assert!(matches!(
            InputValidator::validate_string("field", noisy, 1024),
            Err(ValidationError::ExcessControlChars { .. })
        ));
    }

    #[test]
    fn test_nesting_depth_boundary() {
        let validator = InputValidator::new();

        // Depth 10 accepted (the data map itself is level 1).
        let mut value = Value::from("leaf");
        for _ in 0..8 {
            let mut wrapper = BTreeMap::new();
            wrapper.insert("n".to_string(), value);
            value = Value::Map(wrapper);
        }
        let mut data = BTreeMap::new();
        data.insert("root".to_string(), value.clone());
        let event = valid_event().with_data(data);
        assert!(validator.validate_event(&event).is_ok());

        // One level deeper is rejected.
        let mut wrapper = BTreeMap::new();
        wrapper.insert("n".to_string(), value);
        let mut data = BTreeMap::new();
        data.insert("root".to_string(), Value::Map(wrapper));
        let event = valid_event().with_data(data);
        assert!(matches!(
            validator.validate_event(&event),
            Err(ValidationError::NestingTooDeep { .. })
        ));
    }

    #[test]
    fn test_aggregate_id_length_bound() {
        let validator = InputValidator::new();
        let mut event = valid_event();
        event.aggregate_id = "x".repeat(257);
        assert!(matches!(
            validator.validate_event(&event),
            Err(ValidationError::StringTooLong { .. })
        ));
    }

    #[test]
    fn test_path_traversal_blocked() {
        let temp = tempfile::tempdir().unwrap();
        let validator = PathValidator::new(&[temp.path().to_path_buf()]);

        let result = validator.validate_path(Path::new("../../etc/passwd"));
        assert!(matches!(result, Err(ValidationError::DangerousPath { .. })));
    }

    #[test]
    fn test_path_outside_allowed_blocked() {
        let temp = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let validator = PathValidator::new(&[temp.path().to_path_buf()]);

        let result = validator.validate_path(&other.path().join("data"));
        assert!(matches!(
            result,
            Err(ValidationError::PathOutsideAllowed { .. })
        ));
    }

    #[test]
    fn test_path_inside_allowed_ok() {
        let temp = tempfile::tempdir().unwrap();
        let validator = PathValidator::new(&[temp.path().to_path_buf()]);

        let nested = temp.path().join("events").join("segment.log");
        let resolved = validator.validate_path(&nested).unwrap();
        assert!(resolved.ends_with("events/segment.log"));
    }
}

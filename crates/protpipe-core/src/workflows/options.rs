//! Option templating for external tool command lines.
//!
//! Stages accept a stage-wide option string and an optional per-pose option
//! string; both use the target tool's own flag syntax (`-key=value`,
//! `-key value`, bare `-flag`). Per-pose options win over stage-wide ones.
//! Options the stage itself must control (output paths, prefixes, score file
//! names) are screened out before command assembly.

use crate::workflows::error::StageError;
use std::collections::BTreeMap;
use tracing::debug;

/// Parsed and merged tool options: keyed options plus bare flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOptions {
    opts: BTreeMap<String, String>,
    flags: Vec<String>,
}

impl ToolOptions {
    /// Parses one option string. `sep` is the tool's flag prefix character
    /// (`-` for the modeling suites driven here; `-` twice works too since
    /// all leading prefix characters are stripped).
    pub fn parse(input: &str, sep: char) -> Self {
        let mut result = Self::default();
        let mut current: Option<(String, Vec<String>)> = None;
        for token in input.split_whitespace() {
            if token.starts_with(sep) {
                result.flush(current.take());
                let stripped = token.trim_start_matches(sep);
                if !stripped.is_empty() {
                    current = Some((stripped.to_string(), Vec::new()));
                }
            } else if let Some((_, values)) = current.as_mut() {
                values.push(token.to_string());
            } else {
                debug!("Ignoring option token '{}' without a '{}' prefix", token, sep);
            }
        }
        result.flush(current.take());
        result
    }

    /// Parses and merges a stage-wide and a per-pose option string.
    /// Per-pose options override stage-wide ones key by key.
    pub fn merge(global: Option<&str>, pose: Option<&str>, sep: char) -> Self {
        let mut merged = global.map(|s| Self::parse(s, sep)).unwrap_or_default();
        if let Some(pose) = pose.map(|s| Self::parse(s, sep)) {
            merged.opts.extend(pose.opts);
            for flag in pose.flags {
                if !merged.flags.contains(&flag) {
                    merged.flags.push(flag);
                }
            }
        }
        merged
    }

    fn flush(&mut self, entry: Option<(String, Vec<String>)>) {
        let Some((head, values)) = entry else { return };
        if let Some((key, value)) = head.split_once('=') {
            let mut value = value.to_string();
            for extra in values {
                value.push(' ');
                value.push_str(&extra);
            }
            self.opts.insert(key.to_string(), value);
        } else if values.is_empty() {
            if !self.flags.contains(&head) {
                self.flags.push(head);
            }
        } else {
            self.opts.insert(head, values.join(" "));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.opts.get(key).map(String::as_str)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn is_empty(&self) -> bool {
        self.opts.is_empty() && self.flags.is_empty()
    }

    /// Fails when any parsed option or flag collides with an entry of
    /// `reserved` (given with its prefix, e.g. `-out:path:all`).
    pub fn ensure_absent(&self, reserved: &[&str], sep: char) -> Result<(), StageError> {
        for name in self
            .opts
            .keys()
            .map(String::as_str)
            .chain(self.flags.iter().map(String::as_str))
        {
            let prefixed = format!("{}{}", sep, name);
            if reserved.contains(&prefixed.as_str()) {
                return Err(StageError::ForbiddenOption { option: prefixed });
            }
        }
        Ok(())
    }

    /// Renders back to a command-line fragment: keyed options first (sorted
    /// by key), then flags in first-seen order.
    pub fn render(&self, sep: char) -> String {
        let mut parts: Vec<String> = self
            .opts
            .iter()
            .map(|(k, v)| format!("{}{}={}", sep, k, v))
            .collect();
        parts.extend(self.flags.iter().map(|f| format!("{}{}", sep, f)));
        parts.join(" ")
    }
}

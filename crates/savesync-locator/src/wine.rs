//! Wine prefix helpers: `user.reg` parsing and path translation between
//! prefixes.
//!
//! The locator records files under their host path inside the source prefix
//! (`<prefix>/drive_c/users/<user>/...`). Replaying into another prefix goes
//! through the Windows view of that path (`C:/users/<user>/...`), swaps the
//! source user profile for the target's, and maps `C:` back onto the target
//! prefix's `drive_c`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::traits::{LocatorError, LocatorResult};

const USER_REGISTRY_FILE: &str = "user.reg";
const VOLATILE_ENVIRONMENT: &str = "Volatile Environment";
const USER_PROFILE_VALUE: &str = "USERPROFILE";
const SYSTEM_DRIVE_DIR: &str = "drive_c";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryValue {
    String(String),
    Dword(u32),
    Raw(String),
}

#[derive(Debug, Clone, Default)]
pub struct RegistrySection {
    pub path: String,
    pub timestamp: Option<String>,
    pub values: HashMap<String, RegistryValue>,
}

/// Line parser for Wine's text registry files.
pub struct RegistryParser {
    time: Regex,
    section: Regex,
    value: Regex,
}

impl RegistryParser {
    pub fn new() -> LocatorResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| LocatorError::Registry(e.to_string()))
        };
        Ok(Self {
            time: compile(r"^#time=(\w+)")?,
            section: compile(r"^\[(.+?)\](?:\s+\d+)?")?,
            value: compile(r#"^"?(.*?)"?=(.*)$"#)?,
        })
    }

    pub fn parse(&self, content: &str) -> Vec<RegistrySection> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut sections = Vec::new();
        let mut current: Option<RegistrySection> = None;

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            if line.starts_with('#') {
                if let (Some(caps), Some(section)) = (self.time.captures(line), current.as_mut()) {
                    section.timestamp = Some(caps[1].to_string());
                }
                continue;
            }

            if let Some(caps) = self.section.captures(line) {
                if let Some(section) = current.take() {
                    sections.push(section);
                }
                current = Some(RegistrySection {
                    path: caps[1].to_string(),
                    ..RegistrySection::default()
                });
            } else if let (Some(caps), Some(section)) = (self.value.captures(line), current.as_mut())
            {
                let key = match caps[1].trim_matches('"') {
                    "" => "@".to_string(),
                    key => key.to_string(),
                };
                section.values.insert(key, parse_value(caps[2].trim()));
            }
        }

        if let Some(section) = current {
            sections.push(section);
        }
        sections
    }
}

fn parse_value(raw: &str) -> RegistryValue {
    if let Some(hex) = raw.strip_prefix("dword:") {
        return RegistryValue::Dword(u32::from_str_radix(hex, 16).unwrap_or(0));
    }
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        let inner = &raw[1..raw.len() - 1];
        return RegistryValue::String(inner.replace("\\\\", "\\").replace("\\\"", "\""));
    }
    RegistryValue::Raw(raw.to_string())
}

/// Windows-style user profile of a prefix (e.g. `C:/users/steamuser`), read
/// from `Volatile Environment/USERPROFILE` in its `user.reg`.
pub fn user_profile_path(prefix: &Path) -> LocatorResult<String> {
    let registry_path = prefix.join(USER_REGISTRY_FILE);
    let content = std::fs::read_to_string(&registry_path).map_err(|e| {
        LocatorError::Registry(format!("Failed to read {}: {}", registry_path.display(), e))
    })?;

    let sections = RegistryParser::new()?.parse(&content);
    let environment = sections
        .iter()
        .find(|section| section.path == VOLATILE_ENVIRONMENT)
        .ok_or_else(|| {
            LocatorError::Registry(format!(
                "{} not found in {}",
                VOLATILE_ENVIRONMENT,
                registry_path.display()
            ))
        })?;

    match environment
        .values
        .iter()
        .find(|(key, _)| key.trim() == USER_PROFILE_VALUE)
        .map(|(_, value)| value)
    {
        Some(RegistryValue::String(profile)) => Ok(normalize_path(profile)),
        _ => Err(LocatorError::Registry(format!(
            "{} not found in {}",
            USER_PROFILE_VALUE,
            registry_path.display()
        ))),
    }
}

/// Forward slashes, no empty or `.` segments, `..` resolved lexically. A
/// leading drive (`C:`) is kept as `C:/`.
pub fn normalize_path(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let mut parts = replaced.split('/');
    let mut components: Vec<&str> = Vec::new();

    let mut prefix = String::new();
    if let Some(first) = parts.next() {
        if first.ends_with(':') {
            prefix = format!("{}/", first);
        } else if !first.is_empty() && first != "." && first != ".." {
            components.push(first);
        }
    }

    for part in parts {
        match part {
            "" | "." => continue,
            ".." => {
                components.pop();
            }
            _ => components.push(part),
        }
    }

    format!("{}{}", prefix, components.join("/"))
}

/// Maps paths recorded in a source prefix onto a target prefix.
#[derive(Debug, Clone)]
pub struct PathTranslator {
    target_root: PathBuf,
    source_root: Option<String>,
    source_home: Option<String>,
    target_home: Option<String>,
}

impl PathTranslator {
    pub fn new(
        target_root: impl Into<PathBuf>,
        source_root: Option<&str>,
        source_home: Option<&str>,
        target_home: Option<&str>,
    ) -> Self {
        let clean = |value: &str| value.replace('\\', "/").trim_end_matches('/').to_string();
        Self {
            target_root: target_root.into(),
            source_root: source_root.map(clean).filter(|s| !s.is_empty()),
            source_home: source_home.map(normalize_path),
            target_home: target_home.map(normalize_path),
        }
    }

    /// Windows view of a recorded path, if it lies on the system drive.
    pub fn to_windows_path(&self, original: &str) -> Option<String> {
        let path = original.replace('\\', "/");

        if let Some(root) = &self.source_root {
            if let Some(rest) = path
                .strip_prefix(root.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                let drive_rest = rest.strip_prefix(SYSTEM_DRIVE_DIR)?;
                if !(drive_rest.is_empty() || drive_rest.starts_with('/')) {
                    return None;
                }
                return Some(normalize_path(&format!("C:{}", drive_rest)));
            }
        }

        has_drive_letter(&path).then(|| normalize_path(&path))
    }

    /// Host path in the target prefix for a recorded path.
    pub fn destination(&self, original: &str) -> LocatorResult<PathBuf> {
        let windows = self
            .to_windows_path(original)
            .ok_or_else(|| LocatorError::UnmappablePath(original.to_string()))?;

        let windows = match (&self.source_home, &self.target_home) {
            (Some(source), Some(target)) => match strip_prefix_ignore_case(&windows, source) {
                Some(rest) => format!("{}{}", target.trim_end_matches('/'), rest),
                None => windows,
            },
            _ => windows,
        };

        let rest = strip_prefix_ignore_case(&windows, "C:")
            .ok_or_else(|| LocatorError::UnmappablePath(original.to_string()))?;

        let mut destination = self.target_root.join(SYSTEM_DRIVE_DIR);
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(LocatorError::UnmappablePath(original.to_string()));
            }
            destination.push(segment);
        }

        Ok(destination)
    }
}

fn has_drive_letter(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || bytes[2] == b'/')
}

/// Case-insensitive prefix match on whole segments; returns the remainder
/// including its leading `/`.
fn strip_prefix_ignore_case<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    let head = path.get(..prefix.len())?;
    let rest = path.get(prefix.len()..)?;
    (head.eq_ignore_ascii_case(prefix) && (rest.is_empty() || rest.starts_with('/'))).then_some(rest)
}

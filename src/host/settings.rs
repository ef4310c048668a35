use crate::config::SettingsSource;
use crate::error::GateError;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Host configuration options, read from `name = value` text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, GateError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parses one option per line. `#` starts a comment outside quotes,
    /// values may be single-quoted with `''` as an escaped quote, and the
    /// `=` is optional. Option names are case-insensitive.
    pub fn parse(text: &str) -> Result<Self, GateError> {
        let mut settings = Self::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let name_end = line
                .find(|c: char| c.is_whitespace() || c == '=')
                .unwrap_or(line.len());
            let (name, rest) = line.split_at(name_end);
            let rest = rest.trim_start();
            let rest = rest.strip_prefix('=').unwrap_or(rest).trim_start();
            let value = parse_value(rest).ok_or_else(|| {
                GateError::Syntax(format!("line {}: unterminated quoted value", lineno + 1))
            })?;
            settings.set(name, value);
        }
        Ok(settings)
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl SettingsSource for Settings {
    fn get_setting(&self, name: &str) -> Option<String> {
        self.get(name).map(str::to_string)
    }
}

fn parse_value(rest: &str) -> Option<String> {
    let Some(quoted) = rest.strip_prefix('\'') else {
        let end = rest.find('#').unwrap_or(rest.len());
        return Some(rest[..end].trim().to_string());
    };
    let mut value = String::new();
    let mut chars = quoted.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            value.push(c);
            continue;
        }
        if chars.peek() == Some(&'\'') {
            chars.next();
            value.push('\'');
            continue;
        }
        return Some(value);
    }
    None
}

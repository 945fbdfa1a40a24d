//! `.properties` files, the format of both configuration and trace files.
//!
//! Parsing follows `java.util.Properties` and is done by the `java-properties` crate.
//! Later definitions of a key replace earlier ones.

use std::{collections::HashMap, io::Read};

use java_properties::PropertiesError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: HashMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(input: impl Read) -> Result<Self, PropertiesError> {
        Ok(Self {
            entries: java_properties::read(input)?,
        })
    }

    pub fn parse(text: &str) -> Result<Self, PropertiesError> {
        Self::read(text.as_bytes())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses an integer the way configuration values are written: optional sign, then
/// decimal, `0x`/`0X`/`#` hexadecimal, or `0`-prefixed octal.
pub fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .or_else(|| digits.strip_prefix('#'))
    {
        (16, hex)
    } else if digits.len() > 1
        && let Some(octal) = digits.strip_prefix('0')
    {
        (8, octal)
    } else {
        (10, digits)
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separators_and_comments() {
        let props = Properties::parse(
            "# comment\n! also a comment\n\nPageBytesLog2=4\nFrameCountLog2 : 2\nProcesses   A B\n",
        )
        .unwrap();
        assert_eq!(props.len(), 3);
        assert_eq!(props.get("PageBytesLog2"), Some("4"));
        assert_eq!(props.get("FrameCountLog2"), Some("2"));
        assert_eq!(props.get("Processes"), Some("A B"));
    }

    #[test]
    fn continuation_lines_join() {
        let props =
            Properties::parse("ROOT.TR = NoOp; \\\n    NoOp; \\\n    Syscall_Exit\n").unwrap();
        assert_eq!(props.get("ROOT.TR"), Some("NoOp; NoOp; Syscall_Exit"));
    }

    #[test]
    fn later_definitions_win() {
        let mut props = Properties::parse("k=1\nk=2\n").unwrap();
        assert_eq!(props.get("k"), Some("2"));
        props.insert("k", "3");
        assert_eq!(props.get("k"), Some("3"));
    }

    mod integers {
        use super::*;

        #[test]
        fn decimal_hex_and_octal() {
            assert_eq!(parse_integer("42"), Some(42));
            assert_eq!(parse_integer(" -7 "), Some(-7));
            assert_eq!(parse_integer("0x1F"), Some(31));
            assert_eq!(parse_integer("#10"), Some(16));
            assert_eq!(parse_integer("010"), Some(8));
            assert_eq!(parse_integer("0"), Some(0));
        }

        #[test]
        fn garbage_is_rejected() {
            assert_eq!(parse_integer(""), None);
            assert_eq!(parse_integer("0x"), None);
            assert_eq!(parse_integer("--1"), None);
            assert_eq!(parse_integer("12a"), None);
            assert_eq!(parse_integer("09"), None);
        }
    }
}

// Copyright 2025-2026 CEMAXECUTER LLC

//! Configuration string grammar: `key[=value](,key[=value])*`.
//!
//! The grammar itself is total: every string splits into keys. Whether a
//! value parses for its key is decided by whoever applies it (controller
//! for the core keys, the device adapter for its own), which is where the
//! per-key outcome comes from.

use std::fmt;
use std::str::FromStr;

/// Ordered key/value pairs from one configuration string. Bare keys are
/// switches and carry no value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMap {
    pairs: Vec<(String, Option<String>)>,
}

impl ConfigMap {
    pub fn parse(s: &str) -> Self {
        let pairs = s
            .split(',')
            .map(str::trim)
            .filter(|seg| !seg.is_empty())
            .map(|seg| match seg.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), Some(v.trim().to_string())),
                None => (seg.to_string(), None),
            })
            .collect();
        Self { pairs }
    }

    pub fn from_pairs(pairs: Vec<(String, Option<String>)>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[(String, Option<String>)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn value_of(&self, key: &str) -> Option<&Option<String>> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Per-key application result reported back on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Clamped,
    Rejected(String),
    Ignored,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ok => write!(f, "ok"),
            Outcome::Clamped => write!(f, "clamped"),
            Outcome::Rejected(reason) => write!(f, "rejected:{}", reason),
            Outcome::Ignored => write!(f, "ignored"),
        }
    }
}

/// Parse a numeric value for a key; a missing or malformed value is a
/// parse rejection.
pub fn numeric<T: FromStr>(value: &Option<String>) -> Result<T, Outcome> {
    value
        .as_deref()
        .ok_or_else(|| Outcome::Rejected("parse".into()))?
        .parse()
        .map_err(|_| Outcome::Rejected("parse".into()))
}

/// Boolean switches: a bare key means 1, otherwise the value must be 0|1.
pub fn switch(value: &Option<String>) -> Result<bool, Outcome> {
    match value.as_deref() {
        None | Some("1") => Ok(true),
        Some("0") => Ok(false),
        Some(_) => Err(Outcome::Rejected("parse".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_pairs_and_switches() {
        let cfg = ConfigMap::parse("freq=433970000,decim=5,agc,fcpos=0");
        assert_eq!(
            cfg.pairs(),
            &[
                ("freq".to_string(), Some("433970000".to_string())),
                ("decim".to_string(), Some("5".to_string())),
                ("agc".to_string(), None),
                ("fcpos".to_string(), Some("0".to_string())),
            ]
        );
    }

    #[test]
    fn test_parse_skips_empty_segments() {
        let cfg = ConfigMap::parse(",freq=1, ,srate=2,");
        assert_eq!(cfg.pairs().len(), 2);
    }

    #[test]
    fn test_numeric_outcomes() {
        assert_eq!(numeric::<u32>(&Some("48000".into())), Ok(48000));
        assert_eq!(
            numeric::<u32>(&Some("abc".into())),
            Err(Outcome::Rejected("parse".into()))
        );
        assert_eq!(
            numeric::<u32>(&None),
            Err(Outcome::Rejected("parse".into()))
        );
    }

    #[test]
    fn test_switch_values() {
        assert_eq!(switch(&None), Ok(true));
        assert_eq!(switch(&Some("1".into())), Ok(true));
        assert_eq!(switch(&Some("0".into())), Ok(false));
        assert!(switch(&Some("yes".into())).is_err());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Ok.to_string(), "ok");
        assert_eq!(Outcome::Clamped.to_string(), "clamped");
        assert_eq!(
            Outcome::Rejected("range".into()).to_string(),
            "rejected:range"
        );
        assert_eq!(Outcome::Ignored.to_string(), "ignored");
    }
}

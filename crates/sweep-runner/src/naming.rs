use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MatrixError;

/// Key of the trailing repetition pair in an identifier.
pub const REPETITION_KEY: &str = "repetition";

/// Character substituted for anything that would break a path segment or the
/// identifier grammar.
const REPLACEMENT: char = '_';

/// Separators shared by the build phase (which names directories) and the
/// gather phase (which parses them back).
///
/// With the defaults an identifier reads `run__lr:0.1;model+depth:4;repetition:2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingScheme {
    pub run_marker: String,
    pub section_separator: String,
    pub pair_separator: char,
    pub assign: char,
    pub null_token: String,
}

impl Default for NamingScheme {
    fn default() -> Self {
        Self {
            run_marker: "run".to_string(),
            section_separator: "__".to_string(),
            pair_separator: ';',
            assign: ':',
            null_token: "~".to_string(),
        }
    }
}

/// Axis/value pairs recovered from a run directory name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ParsedIdentifier {
    pub pairs: Vec<(String, String)>,
    pub repetition: Option<u32>,
}

impl ParsedIdentifier {
    pub fn get(&self, axis: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == axis)
            .map(|(_, v)| v.as_str())
    }
}

impl NamingScheme {
    pub fn validate(&self) -> Result<(), MatrixError> {
        let invalid = |msg: String| Err(MatrixError::InvalidNaming(msg));
        if self.run_marker.is_empty() || self.section_separator.is_empty() {
            return invalid("run_marker and section_separator must not be empty".to_string());
        }
        if self.pair_separator == self.assign {
            return invalid(format!(
                "pair_separator and assign are both '{}'",
                self.assign
            ));
        }
        for c in [self.pair_separator, self.assign] {
            if c == REPLACEMENT || c == '/' || c == '\\' || c.is_whitespace() {
                return invalid(format!("'{}' cannot be used as a separator", c));
            }
        }
        let prefix = self.run_dir_prefix();
        if prefix.contains(|c: char| c == '/' || c == '\\') {
            return invalid(format!("run prefix \"{}\" is not a path segment", prefix));
        }
        if self.null_token.is_empty() || self.sanitize(&self.null_token) != self.null_token {
            return invalid(format!("null_token \"{}\" is not usable", self.null_token));
        }
        Ok(())
    }

    /// Prefix shared by every run directory, e.g. `run__`.
    pub fn run_dir_prefix(&self) -> String {
        format!("{}{}", self.run_marker, self.section_separator)
    }

    pub fn is_run_dir(&self, name: &str) -> bool {
        name.starts_with(&self.run_dir_prefix())
    }

    /// Part of a run directory name after the run marker, used to suffix
    /// gathered result files (`run__a:1` -> `__a:1`).
    pub fn suffix<'a>(&self, name: &'a str) -> Option<&'a str> {
        if !self.is_run_dir(name) {
            return None;
        }
        name.strip_prefix(self.run_marker.as_str())
    }

    pub fn sanitize(&self, raw: &str) -> String {
        raw.chars()
            .map(|c| {
                if c == '/' || c == '\\' || c == self.pair_separator || c == self.assign {
                    REPLACEMENT
                } else {
                    c
                }
            })
            .collect()
    }

    pub fn render_value(&self, value: &Value) -> String {
        let raw = match value {
            Value::Null => self.null_token.clone(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.sanitize(&raw)
    }

    /// Sanitized pairs in identifier order (sorted by axis name).
    pub fn rendered_pairs(&self, pairs: &[(String, Value)]) -> Vec<(String, String)> {
        let mut rendered: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (self.sanitize(k), self.render_value(v)))
            .collect();
        rendered.sort();
        rendered
    }

    /// Builds the directory name for one combination.
    ///
    /// The repetition suffix is only present when `repetitions > 1`.
    pub fn identify(&self, pairs: &[(String, Value)], repetition: u32, repetitions: u32) -> String {
        let mut parts: Vec<String> = self
            .rendered_pairs(pairs)
            .into_iter()
            .map(|(k, v)| format!("{}{}{}", k, self.assign, v))
            .collect();
        if repetitions > 1 {
            parts.push(format!("{}{}{}", REPETITION_KEY, self.assign, repetition));
        }
        let sep = self.pair_separator.to_string();
        format!("{}{}", self.run_dir_prefix(), parts.join(&sep))
    }

    /// Inverse of [`NamingScheme::identify`].
    pub fn parse(&self, name: &str) -> Result<ParsedIdentifier, MatrixError> {
        let malformed = |reason: &str| MatrixError::MalformedIdentifier {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let body = name
            .strip_prefix(self.run_dir_prefix().as_str())
            .ok_or_else(|| malformed("missing run prefix"))?;
        let mut parsed = ParsedIdentifier::default();
        if body.is_empty() {
            return Ok(parsed);
        }
        for part in body.split(self.pair_separator) {
            let (key, value) = part
                .split_once(self.assign)
                .ok_or_else(|| malformed("pair without assignment"))?;
            parsed.pairs.push((key.to_string(), value.to_string()));
        }
        if parsed
            .pairs
            .last()
            .is_some_and(|(k, _)| k == REPETITION_KEY)
        {
            if let Some((_, raw)) = parsed.pairs.pop() {
                let n = raw
                    .parse::<u32>()
                    .map_err(|_| malformed("repetition is not a number"))?;
                parsed.repetition = Some(n);
            }
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(items: &[(&str, Value)]) -> Vec<(String, Value)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn identify_sorts_pairs_by_axis() {
        let scheme = NamingScheme::default();
        let id = scheme.identify(&pairs(&[("b", json!("x")), ("a", json!(10))]), 1, 1);
        assert_eq!(id, "run__a:10;b:x");
    }

    #[test]
    fn repetition_suffix_only_when_repeating() {
        let scheme = NamingScheme::default();
        let p = pairs(&[("a", json!(1))]);
        assert_eq!(scheme.identify(&p, 1, 1), "run__a:1");
        assert_eq!(scheme.identify(&p, 2, 3), "run__a:1;repetition:2");
        assert_eq!(scheme.identify(&[], 3, 3), "run__repetition:3");
    }

    #[test]
    fn values_are_sanitized() {
        let scheme = NamingScheme::default();
        let id = scheme.identify(
            &pairs(&[("data+path", json!("in/put:v;2")), ("n", Value::Null)]),
            1,
            1,
        );
        assert_eq!(id, "run__data+path:in_put_v_2;n:~");
        assert!(!id.contains('/'));
    }

    #[test]
    fn parse_inverts_identify() {
        let scheme = NamingScheme::default();
        let p = pairs(&[
            ("lr", json!(0.5)),
            ("opt+name", json!("adam/w")),
            ("flag", json!(true)),
            ("none", Value::Null),
        ]);
        let id = scheme.identify(&p, 2, 4);
        let parsed = scheme.parse(&id).expect("parse");
        assert_eq!(parsed.pairs, scheme.rendered_pairs(&p));
        assert_eq!(parsed.repetition, Some(2));
        assert_eq!(parsed.get("opt+name"), Some("adam_w"));
    }

    #[test]
    fn parse_rejects_foreign_names() {
        let scheme = NamingScheme::default();
        assert!(scheme.parse("aggregated_results").is_err());
        assert!(scheme.parse("run__novalue").is_err());
        assert!(scheme.parse("run__a:1;repetition:x").is_err());
        assert_eq!(scheme.parse("run__").unwrap(), ParsedIdentifier::default());
    }

    #[test]
    fn suffix_strips_run_marker() {
        let scheme = NamingScheme::default();
        assert_eq!(scheme.suffix("run__a:1;b:2"), Some("__a:1;b:2"));
        assert_eq!(scheme.suffix("runner"), None);
    }

    #[test]
    fn validate_rejects_colliding_separators() {
        let mut scheme = NamingScheme::default();
        scheme.validate().expect("defaults are valid");
        scheme.assign = ';';
        assert!(scheme.validate().is_err());
        scheme.assign = '_';
        assert!(scheme.validate().is_err());
        scheme.assign = ':';
        scheme.section_separator = "/".to_string();
        assert!(scheme.validate().is_err());
    }

    #[test]
    fn custom_separators_round_trip() {
        let scheme = NamingScheme {
            run_marker: "exp".to_string(),
            section_separator: "-".to_string(),
            pair_separator: ',',
            assign: '=',
            null_token: "null".to_string(),
        };
        scheme.validate().expect("valid");
        let p = pairs(&[("a", json!("x,y")), ("b", Value::Null)]);
        let id = scheme.identify(&p, 1, 2);
        assert_eq!(id, "exp-a=x_y,b=null,repetition=1");
        assert_eq!(scheme.parse(&id).unwrap().pairs, scheme.rendered_pairs(&p));
    }
}

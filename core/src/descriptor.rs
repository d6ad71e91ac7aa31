use std::collections::HashMap;

use percent_encoding::percent_decode_str;

use crate::error::{DynQueryError, Result};

/// Structured result of parsing the query-string mini-language.
///
/// `where_` and `order_by` are opaque to the translation engine: they ride on
/// the pipeline untouched for backend-native consumption.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDescriptor {
    pub select: Vec<String>,
    pub where_: Vec<String>,
    pub order_by: Vec<String>,
    pub group_by: Vec<String>,
    /// Pagination offset; 0 means unset
    pub skip: usize,
    /// Pagination limit; 0 means unset
    pub take: usize,
}

impl QueryDescriptor {
    /// Parses a raw query string.
    ///
    /// The whole string is percent-decoded once up front and anything through
    /// a leading `?` is stripped. Keys are case-insensitive; `select`,
    /// `orderby` and `groupby` values split on commas, `where` values stay
    /// whole, and the first `skip`/`take` value wins. Unknown keys are
    /// ignored. A provided non-numeric `skip`/`take` fails with
    /// [`DynQueryError::Format`].
    pub fn parse(raw: &str) -> Result<Self> {
        let decoded = percent_decode_str(raw).decode_utf8_lossy();
        let query = match decoded.find('?') {
            Some(index) => &decoded[index + 1..],
            None => decoded.as_ref(),
        };

        let mut parts: HashMap<String, Vec<&str>> = HashMap::new();
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = match pair.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (pair, None),
            };
            let entry = parts.entry(key.trim().to_ascii_lowercase()).or_default();
            if let Some(value) = value {
                entry.push(value);
            }
        }

        Ok(Self {
            select: path_list(&parts, "select"),
            where_: parts
                .get("where")
                .map(|values| values.iter().map(|value| value.to_string()).collect())
                .unwrap_or_default(),
            order_by: path_list(&parts, "orderby"),
            group_by: path_list(&parts, "groupby"),
            skip: first_number(&parts, "skip")?,
            take: first_number(&parts, "take")?,
        })
    }
}

/// Expands comma-joined values into one trimmed path per entry.
fn path_list(parts: &HashMap<String, Vec<&str>>, key: &str) -> Vec<String> {
    parts
        .get(key)
        .map(|values| {
            values
                .iter()
                .flat_map(|value| value.split(','))
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn first_number(parts: &HashMap<String, Vec<&str>>, key: &'static str) -> Result<usize> {
    match parts.get(key).and_then(|values| values.first()) {
        Some(value) if value.trim().is_empty() => Ok(0),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| DynQueryError::Format {
                key,
                value: value.to_string(),
            }),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_select_skip_take() {
        let descriptor = QueryDescriptor::parse("select=a,b.c&skip=10&take=5").unwrap();
        assert_eq!(descriptor.select, ["a", "b.c"]);
        assert_eq!(descriptor.skip, 10);
        assert_eq!(descriptor.take, 5);
        assert!(descriptor.where_.is_empty());
        assert!(descriptor.order_by.is_empty());
        assert!(descriptor.group_by.is_empty());
    }

    #[test]
    fn parse_is_pure() {
        let raw = "select=a&groupby=b&where=x+gt+1&orderby=a&skip=1&take=2";
        assert_eq!(
            QueryDescriptor::parse(raw).unwrap(),
            QueryDescriptor::parse(raw).unwrap()
        );
    }

    #[test]
    fn non_numeric_take_is_a_format_error() {
        let err = QueryDescriptor::parse("take=abc").unwrap_err();
        assert!(matches!(err, DynQueryError::Format { key: "take", .. }));
    }

    #[test]
    fn empty_input_defaults_everything() {
        let descriptor = QueryDescriptor::parse("").unwrap();
        assert_eq!(descriptor, QueryDescriptor::default());
    }

    #[test]
    fn keys_are_case_insensitive_and_repeatable() {
        let descriptor = QueryDescriptor::parse("SELECT=a&Select=b,c&GROUPBY=a").unwrap();
        assert_eq!(descriptor.select, ["a", "b", "c"]);
        assert_eq!(descriptor.group_by, ["a"]);
    }

    #[test]
    fn first_skip_value_wins() {
        let descriptor = QueryDescriptor::parse("skip=3&skip=9").unwrap();
        assert_eq!(descriptor.skip, 3);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let descriptor = QueryDescriptor::parse("select=a&unknown=1&expand=b").unwrap();
        assert_eq!(descriptor.select, ["a"]);
    }

    #[test]
    fn leading_question_mark_is_stripped() {
        let descriptor = QueryDescriptor::parse("?select=a").unwrap();
        assert_eq!(descriptor.select, ["a"]);
    }

    #[test]
    fn values_are_percent_decoded_once() {
        let descriptor = QueryDescriptor::parse("where=name%20eq%20%27x%27").unwrap();
        assert_eq!(descriptor.where_, ["name eq 'x'"]);
    }

    #[test]
    fn paths_are_trimmed() {
        let descriptor = QueryDescriptor::parse("select=%20a%20,b").unwrap();
        assert_eq!(descriptor.select, ["a", "b"]);
    }
}

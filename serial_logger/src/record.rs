use std::{collections::BTreeMap, fmt, str::FromStr};

/// Substring marking a data-bearing line.
pub const MARKER: &str = "D;";

/// Key-value pairs carried by one data line.
///
/// Values stay text, the wire format has no types.
/// Use [`Record::get_parsed`] to convert a field explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record(BTreeMap<String, String>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Look up `key` and parse its value.
    ///
    /// `None` if the key is missing, `Some(Err(_))` if the value does not parse.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<Result<T, T::Err>> {
        self.get(key).map(str::parse)
    }

    /// Insert a pair, replacing any earlier value for the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (key, value) in iter {
            record.insert(key, value);
        }
        record
    }
}

/// Writes the wire form, `D;k1:v1;k2:v2`.
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MARKER)?;
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{key}:{value}")?;
        }
        Ok(())
    }
}

/// Parse one line of text into a [`Record`].
///
/// Everything up to and including the first [`MARKER`] is skipped.
/// The rest is trimmed and split on `;`, then each pair on its first `:`.
/// Pairs without a `:` are dropped, and a repeated key keeps its last value.
/// Lines without the marker give an empty record.
pub fn parse_line(line: &str) -> Record {
    let Some(start) = line.find(MARKER) else {
        return Record::new();
    };

    line[start + MARKER.len()..]
        .trim()
        .split(';')
        .filter_map(|pair| pair.split_once(':'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs.iter().copied().collect()
    }

    #[test]
    fn lines_without_marker_are_empty() {
        for line in ["", "hello", "a:1;b:2", "d;a:1", "D:a;1", "booting..."] {
            assert!(parse_line(line).is_empty(), "{line:?}");
        }
    }

    #[test]
    fn well_formed_line() {
        assert_eq!(
            parse_line("D;k1:v1;k2:v2"),
            record(&[("k1", "v1"), ("k2", "v2")])
        );
    }

    #[test]
    fn malformed_pair_is_dropped() {
        assert_eq!(
            parse_line("noise D;a:1;bad;b:2"),
            record(&[("a", "1"), ("b", "2")])
        );
    }

    #[test]
    fn last_duplicate_wins() {
        assert_eq!(parse_line("D;x:1;x:2"), record(&[("x", "2")]));
    }

    #[test]
    fn splits_on_first_colon_only() {
        let parsed = parse_line("D;time:12:30:05");
        assert_eq!(parsed.get("time"), Some("12:30:05"));
    }

    #[test]
    fn only_outer_whitespace_is_trimmed() {
        let parsed = parse_line("D; a : 1 ;b:2  \r");
        assert_eq!(parsed, record(&[("a ", " 1 "), ("b", "2")]));
    }

    #[test]
    fn first_marker_is_used() {
        let parsed = parse_line("D;a:D;b:2");
        assert_eq!(parsed, record(&[("a", "D"), ("b", "2")]));
    }

    #[test]
    fn marker_with_no_pairs() {
        assert!(parse_line("D;").is_empty());
        assert!(parse_line("D;;;").is_empty());
    }

    #[test]
    fn typed_access() {
        let parsed = parse_line("D;temp:21.5;name:probe");
        assert_eq!(parsed.get_parsed::<f32>("temp"), Some(Ok(21.5)));
        assert!(matches!(parsed.get_parsed::<f32>("name"), Some(Err(_))));
        assert!(parsed.get_parsed::<f32>("missing").is_none());
    }

    #[test]
    fn display_is_wire_form() {
        let r = record(&[("b", "2"), ("a", "1")]);
        assert_eq!(r.to_string(), "D;a:1;b:2");
        assert_eq!(parse_line(&r.to_string()), r);
    }
}

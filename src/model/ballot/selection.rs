use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use thiserror::Error;

use crate::model::election::QuestionKind;

/// A voter's decoded answer to one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The chosen option.
    Single(String),
    /// Distinct chosen options, in the order given.
    Multiple(Vec<String>),
    /// Options from most to least preferred.
    Ranking(Vec<String>),
}

/// A selection, plus the JSON text of entries dropped while decoding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub selection: Selection,
    pub ignored: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("expected {0}")]
    WrongShape(&'static str),
    #[error("ranking has no first preference")]
    NoFirstPreference,
}

impl Selection {
    /// Encode the selection in the wire format expected by [`Selection::decode`].
    ///
    /// Single choices are the bare label, multiple choices a JSON array, and
    /// rankings a JSON object keyed by rank starting at `"1"`.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Single(label) => label.as_bytes().to_vec(),
            Self::Multiple(labels) => Value::from(labels.clone()).to_string().into_bytes(),
            Self::Ranking(labels) => {
                let ranks: BTreeMap<String, Value> = labels
                    .iter()
                    .enumerate()
                    .map(|(i, label)| ((i + 1).to_string(), Value::from(label.as_str())))
                    .collect();
                serde_json::to_vec(&ranks).unwrap_or_default()
            }
        }
    }

    /// Decode a plaintext according to the question type, dropping any
    /// malformed entries that do not decide the vote.
    pub fn decode(kind: QuestionKind, plaintext: &[u8]) -> Result<Self, DecodeError> {
        Self::decode_reporting(kind, plaintext).map(|decoded| decoded.selection)
    }

    /// As [`Selection::decode`], also returning the dropped entries.
    ///
    /// Non-string items of a multiple choice are dropped one by one. For a
    /// ranking only the first preference must be well formed. Lower ranks
    /// with a non-numeric key or a non-string label are dropped.
    pub fn decode_reporting(kind: QuestionKind, plaintext: &[u8]) -> Result<Decoded, DecodeError> {
        let text = std::str::from_utf8(plaintext).map_err(|_| DecodeError::NotUtf8)?;
        let json = serde_json::from_str::<Value>(text).ok();
        let mut ignored = Vec::new();
        let selection = match kind {
            QuestionKind::Single => match json {
                Some(Value::String(label)) => Self::Single(label),
                _ => Self::Single(text.to_string()),
            },
            QuestionKind::Multiple => match json {
                Some(Value::Array(items)) => {
                    let mut seen = HashSet::new();
                    let mut labels = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::String(label) => {
                                if seen.insert(label.clone()) {
                                    labels.push(label);
                                }
                            }
                            other => ignored.push(other.to_string()),
                        }
                    }
                    Self::Multiple(labels)
                }
                _ => return Err(DecodeError::WrongShape("a JSON array of strings")),
            },
            QuestionKind::Ranking => match json {
                Some(Value::Object(mut ranks)) => {
                    let first = ranks.remove("1").ok_or(DecodeError::NoFirstPreference)?;
                    let first = string_item(first, "a string first preference")?;
                    let mut rest: Vec<(u64, String)> = Vec::with_capacity(ranks.len());
                    for (rank, label) in ranks {
                        match (rank.parse::<u64>(), label) {
                            (Ok(rank), Value::String(label)) => rest.push((rank, label)),
                            (_, label) => ignored.push(format!("\"{rank}\": {label}")),
                        }
                    }
                    rest.sort();
                    let mut labels = vec![first];
                    labels.extend(rest.into_iter().map(|(_, label)| label));
                    Self::Ranking(labels)
                }
                Some(Value::Array(items)) => {
                    let mut items = items.into_iter();
                    let first = items.next().ok_or(DecodeError::NoFirstPreference)?;
                    let mut labels = vec![string_item(first, "a string first preference")?];
                    for item in items {
                        match item {
                            Value::String(label) => labels.push(label),
                            other => ignored.push(other.to_string()),
                        }
                    }
                    Self::Ranking(labels)
                }
                _ => return Err(DecodeError::WrongShape("a JSON object keyed by rank")),
            },
        };
        Ok(Decoded { selection, ignored })
    }

    /// The options this selection gives a vote to.
    pub fn credited(&self) -> &[String] {
        match self {
            Self::Single(label) => std::slice::from_ref(label),
            Self::Multiple(labels) => labels,
            Self::Ranking(labels) => &labels[..labels.len().min(1)],
        }
    }
}

fn string_item(value: Value, expected: &'static str) -> Result<String, DecodeError> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(DecodeError::WrongShape(expected)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_raw_or_json_string() {
        assert_eq!(
            Selection::decode(QuestionKind::Single, b"Option A").unwrap(),
            Selection::Single("Option A".to_string())
        );
        assert_eq!(
            Selection::decode(QuestionKind::Single, b"\"Option A\"").unwrap(),
            Selection::Single("Option A".to_string())
        );
        // Numeric-looking labels stay as written.
        assert_eq!(
            Selection::decode(QuestionKind::Single, b"1").unwrap(),
            Selection::Single("1".to_string())
        );
    }

    #[test]
    fn multiple_deduplicates() {
        let selection =
            Selection::decode(QuestionKind::Multiple, br#"["X", "Y", "X"]"#).unwrap();
        assert_eq!(selection, Selection::Multiple(strings(&["X", "Y"])));
        assert_eq!(selection.credited(), strings(&["X", "Y"]).as_slice());
        assert_eq!(
            Selection::decode(QuestionKind::Multiple, b"[]").unwrap(),
            Selection::Multiple(vec![])
        );
    }

    #[test]
    fn multiple_rejects_other_shapes() {
        assert!(Selection::decode(QuestionKind::Multiple, b"X").is_err());
        assert!(Selection::decode(QuestionKind::Multiple, br#"{"1": "X"}"#).is_err());
    }

    #[test]
    fn multiple_drops_non_string_items() {
        let decoded =
            Selection::decode_reporting(QuestionKind::Multiple, br#"["X", 1, null, "Y"]"#)
                .unwrap();
        assert_eq!(decoded.selection, Selection::Multiple(strings(&["X", "Y"])));
        assert_eq!(decoded.ignored, strings(&["1", "null"]));

        let decoded = Selection::decode_reporting(QuestionKind::Multiple, b"[1, 2]").unwrap();
        assert_eq!(decoded.selection, Selection::Multiple(vec![]));
        assert_eq!(decoded.ignored.len(), 2);
    }

    #[test]
    fn ranking_object_orders_by_rank() {
        let selection =
            Selection::decode(QuestionKind::Ranking, br#"{"2": "B", "10": "C", "1": "A"}"#)
                .unwrap();
        assert_eq!(selection, Selection::Ranking(strings(&["A", "B", "C"])));
        assert_eq!(selection.credited(), strings(&["A"]).as_slice());
    }

    #[test]
    fn lower_ranks_never_fail_the_ballot() {
        let payloads: [&[u8]; 3] = [
            br#"{"1": "A", "2": 5}"#,
            br#"{"1": "A", "second": "B"}"#,
            br#"["A", null]"#,
        ];
        for payload in payloads {
            let decoded = Selection::decode_reporting(QuestionKind::Ranking, payload).unwrap();
            assert_eq!(decoded.selection.credited(), strings(&["A"]).as_slice());
            assert_eq!(decoded.ignored.len(), 1);
        }
        let decoded =
            Selection::decode_reporting(QuestionKind::Ranking, br#"{"1": "A", "3": "C", "x": 1}"#)
                .unwrap();
        assert_eq!(decoded.selection, Selection::Ranking(strings(&["A", "C"])));
        assert_eq!(decoded.ignored, strings(&["\"x\": 1"]));
    }

    #[test]
    fn ranking_array() {
        let selection = Selection::decode(QuestionKind::Ranking, br#"["B", "A"]"#).unwrap();
        assert_eq!(selection.credited(), strings(&["B"]).as_slice());
    }

    #[test]
    fn ranking_without_first() {
        assert_eq!(
            Selection::decode(QuestionKind::Ranking, br#"{"2": "B"}"#),
            Err(DecodeError::NoFirstPreference)
        );
        assert_eq!(
            Selection::decode(QuestionKind::Ranking, b"[]"),
            Err(DecodeError::NoFirstPreference)
        );
        assert!(Selection::decode(QuestionKind::Ranking, b"A").is_err());
        assert_eq!(
            Selection::decode(QuestionKind::Ranking, br#"{"1": 5, "2": "B"}"#),
            Err(DecodeError::WrongShape("a string first preference"))
        );
    }

    #[test]
    fn invalid_utf8() {
        assert_eq!(
            Selection::decode(QuestionKind::Single, &[0xff, 0xfe]),
            Err(DecodeError::NotUtf8)
        );
    }

    #[test]
    fn encoding_matches_decoding() {
        let cases = [
            (QuestionKind::Single, Selection::Single("Vote blanc".to_string())),
            (QuestionKind::Multiple, Selection::Multiple(strings(&["X", "Y"]))),
            (QuestionKind::Ranking, Selection::Ranking(strings(&["C", "A", "B"]))),
        ];
        for (kind, selection) in cases {
            assert_eq!(Selection::decode(kind, &selection.encode()).unwrap(), selection);
        }
    }
}

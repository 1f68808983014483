use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Option implicitly offered on every single-choice question.
pub const ABSTENTION: &str = "Vote blanc";

/// How a question's selections are encoded and counted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    /// Exactly one option per ballot.
    Single,
    /// Any subset of the options.
    Multiple,
    /// Options in preference order; only the first preference is counted.
    Ranking,
}

impl Display for QuestionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Single => "single",
            Self::Multiple => "multiple",
            Self::Ranking => "ranking",
        };
        write!(f, "{name}")
    }
}

/// A question on the ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// The question text shown to voters.
    pub text: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    /// Option labels, in display order.
    pub options: Vec<String>,
}

impl Question {
    pub fn new<S: Into<String>>(
        text: impl Into<String>,
        kind: QuestionKind,
        options: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            text: text.into(),
            kind,
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    /// Trim labels, reject empty or repeated ones, and append the abstention
    /// option to single-choice questions.
    pub(crate) fn normalize(mut self, index: usize) -> Result<Self> {
        self.text = self.text.trim().to_string();
        if self.text.is_empty() {
            return Err(Error::validation(format!("question {index} has no text")));
        }
        let mut seen = HashSet::new();
        for option in self.options.iter_mut() {
            *option = option.trim().to_string();
            if option.is_empty() {
                return Err(Error::validation(format!(
                    "question {index} has an empty option"
                )));
            }
            if !seen.insert(option.clone()) {
                return Err(Error::validation(format!(
                    "question {index} repeats option `{option}`"
                )));
            }
        }
        if self.kind == QuestionKind::Single && !seen.contains(ABSTENTION) {
            self.options.push(ABSTENTION.to_string());
        }
        // An abstention on its own is not a choice.
        if self.options.iter().all(|o| o == ABSTENTION) {
            return Err(Error::validation(format!("question {index} has no options")));
        }
        Ok(self)
    }

    pub fn has_option(&self, label: &str) -> bool {
        self.options.iter().any(|o| o == label)
    }
}

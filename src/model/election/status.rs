use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// States in the Election lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElectionStatus {
    /// Under construction, editable by the owner, no voting.
    Draft,
    /// Accepting ballots.
    Open,
    /// Ballot intake frozen, awaiting tally.
    Closed,
    /// Results computed and published. Terminal.
    Tallied,
}

impl ElectionStatus {
    /// The only state reachable from this one, if any.
    pub fn successor(self) -> Option<ElectionStatus> {
        match self {
            Self::Draft => Some(Self::Open),
            Self::Open => Some(Self::Closed),
            Self::Closed => Some(Self::Tallied),
            Self::Tallied => None,
        }
    }

    pub fn can_transition_to(self, next: ElectionStatus) -> bool {
        self.successor() == Some(next)
    }

    pub fn is_terminal(self) -> bool {
        self.successor().is_none()
    }
}

impl Display for ElectionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Draft => "DRAFT",
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Tallied => "TALLIED",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ElectionStatus::*;

    const ALL: [ElectionStatus; 4] = [Draft, Open, Closed, Tallied];

    #[test]
    fn only_forward_single_steps() {
        let legal = [(Draft, Open), (Open, Closed), (Closed, Tallied)];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
        assert!(Tallied.is_terminal());
        assert!(!Draft.is_terminal());
    }

    #[test]
    fn serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Tallied).unwrap(), "\"TALLIED\"");
        assert_eq!(serde_json::from_str::<ElectionStatus>("\"OPEN\"").unwrap(), Open);
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Cosmetic/functional condition bucket. `A` is the best grade and the one all
/// derived prices are computed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    E,
}

impl Grade {
    pub const ALL: [Grade; 5] = [Grade::A, Grade::B, Grade::C, Grade::D, Grade::E];
    pub const DERIVED: [Grade; 4] = [Grade::B, Grade::C, Grade::D, Grade::E];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grade {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let normalized = trimmed
            .strip_prefix("grade")
            .or_else(|| trimmed.strip_prefix("Grade"))
            .or_else(|| trimmed.strip_prefix("GRADE"))
            .unwrap_or(trimmed)
            .trim();
        match normalized.to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            "E" => Ok(Self::E),
            _ => Err(DomainError::validation(
                "grade",
                format!("unknown grade `{trimmed}` (expected A|B|C|D|E)"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Grade;
    use crate::errors::DomainError;

    #[test]
    fn parses_bare_and_prefixed_grades() {
        assert_eq!("b".parse::<Grade>().ok(), Some(Grade::B));
        assert_eq!(" Grade C ".parse::<Grade>().ok(), Some(Grade::C));
    }

    #[test]
    fn unknown_grade_is_a_validation_error() {
        let error = "F".parse::<Grade>().expect_err("F is not a grade");
        assert!(matches!(error, DomainError::Validation { ref field, .. } if field == "grade"));
    }
}

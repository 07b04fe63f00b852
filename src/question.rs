use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A quiz topic with its own question set and per-user progress list.
/// Categories are a closed set; unknown path slugs don't route anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Python,
    Movies,
    Aws,
    Sports,
    Engineering,
}

impl Category {
    pub const ALL: [Self; 5] = [
        Self::Python,
        Self::Movies,
        Self::Aws,
        Self::Sports,
        Self::Engineering,
    ];

    /// The URL path segment and the `category` column value.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Movies => "movies",
            Self::Aws => "aws",
            Self::Sports => "sports",
            Self::Engineering => "engineering",
        }
    }
}

impl FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        Self::ALL.iter().copied().find(|c| c.slug() == s).ok_or(())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.slug())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub code: String,
    pub options: Vec<String>,
    pub correct_index: i64,
    #[serde(default)]
    pub explanation: String,
}

/// A `questions` row as stored: `options` is a JSON-encoded column.
#[derive(Debug)]
#[derive(sqlx::FromRow)]
pub struct QuestionRow {
    pub id: String,
    pub title: String,
    pub code: String,
    pub options: String,
    pub correct_index: i64,
    pub explanation: String,
}

impl TryFrom<QuestionRow> for Question {
    type Error = serde_json::Error;

    fn try_from(row: QuestionRow) -> Result<Self, Self::Error> {
        let options = serde_json::from_str(&row.options)?;

        Ok(Self {
            id: row.id,
            title: row.title,
            code: row.code,
            options,
            correct_index: row.correct_index,
            explanation: row.explanation,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn category_slugs_round_trip() {
        for category in Category::ALL {
            assert_eq!(Ok(category), category.slug().parse());
        }
    }

    #[test]
    fn unknown_category_rejected() {
        assert_eq!(Err(()), "history".parse::<Category>());
        assert_eq!(Err(()), "".parse::<Category>());
        assert_eq!(Err(()), "Python".parse::<Category>());
    }

    #[test]
    fn row_decodes_options() {
        let row = QuestionRow {
            id: "q1".into(),
            title: "What does this print?".into(),
            code: "print(1 // 2)".into(),
            options: r#"["0", "0.5", "1", "TypeError"]"#.into(),
            correct_index: 0,
            explanation: "floor division".into(),
        };

        let question: Question = row.try_into().unwrap();
        assert_eq!(question.options, vec!["0", "0.5", "1", "TypeError"]);
        assert_eq!(question.correct_index, 0);
    }

    #[test]
    fn row_with_bad_options_is_an_error() {
        let row = QuestionRow {
            id: "q1".into(),
            title: "t".into(),
            code: String::new(),
            options: "not json".into(),
            correct_index: 0,
            explanation: String::new(),
        };

        assert!(Question::try_from(row).is_err());
    }
}

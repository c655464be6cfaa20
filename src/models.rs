use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/**
 * Maximum length, in characters, of question and choice text
 */
pub const MAX_TEXT_LENGTH: usize = 200;

/**
 * A poll question as it is stored
 */
#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct Question {
    pub id: i64,
    pub question_text: String,
    pub pub_date: DateTime<Utc>,
}

impl Question {
    /**
     * True when the question was published within the day leading up to `now`.
     *
     * Both ends of the window are inclusive, so a question published exactly
     * one day ago still counts, while anything scheduled after `now` does not.
     */
    pub fn was_published_recently(&self, now: DateTime<Utc>) -> bool {
        now - Duration::days(1) <= self.pub_date && self.pub_date <= now
    }

    pub fn is_published(&self, now: DateTime<Utc>) -> bool {
        self.pub_date <= now
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct Choice {
    pub id: i64,
    pub question_id: i64,
    pub choice_text: String,
    pub votes: i32,
}

/**
 * Everything required to store a new question and its choices
 */
#[derive(Clone, Debug)]
pub struct InsertableQuestion {
    pub question_text: String,
    pub pub_date: DateTime<Utc>,
    pub choices: Vec<String>,
}

/**
 * A question along with all of its choices, ordered by creation
 */
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Poll {
    pub question: Question,
    pub choices: Vec<Choice>,
}

impl Poll {
    pub fn total_votes(&self) -> i64 {
        self.choices.iter().map(|c| i64::from(c.votes)).sum()
    }

    pub fn has_choice(&self, choice_id: i64) -> bool {
        self.choices.iter().any(|c| c.id == choice_id)
    }
}

/**
 * Narrows the administrative listing, which otherwise holds every question
 */
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuestionFilter {
    /**
     * Case-insensitive fragment of the question text
     */
    pub search: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl QuestionFilter {
    pub fn matches(&self, question: &Question) -> bool {
        if let Some(search) = self.search.as_deref() {
            let text = question.question_text.to_lowercase();
            if !text.contains(&search.to_lowercase()) {
                return false;
            }
        }
        self.since.map_or(true, |since| since <= question.pub_date)
            && self.until.map_or(true, |until| question.pub_date <= until)
    }
}

/**
 * One edit to the choices of an existing question
 */
#[derive(Clone, Debug, PartialEq)]
pub enum ChoiceChange {
    Add(String),
    /* Renaming keeps the tally */
    Rename { id: i64, choice_text: String },
    Remove(i64),
}

/**
 * The edits to apply to a stored question, absent fields stay as they are
 */
#[derive(Clone, Debug, Default)]
pub struct QuestionChanges {
    pub question_text: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub choices: Vec<ChoiceChange>,
}

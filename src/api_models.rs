use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Choice, ChoiceChange, Poll, Question, QuestionChanges, QuestionFilter};

/**
 * User-provided details to create a question
 */
#[derive(Debug, Deserialize)]
pub struct QuestionCreateRequest {
    pub question_text: String,
    /**
     * When to publish the question, defaults to the time of the request
     */
    #[serde(default)]
    pub pub_date: Option<DateTime<Utc>>,
    /**
     * Just the text of each choice
     */
    #[serde(default)]
    pub choices: Vec<String>,
}

/**
 * Edits to an existing question, every field is optional
 */
#[derive(Debug, Deserialize)]
pub struct QuestionUpdateRequest {
    #[serde(default)]
    pub question_text: Option<String>,
    #[serde(default)]
    pub pub_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub choices: Vec<ChoiceEdit>,
}

impl QuestionUpdateRequest {
    /**
     * Returns `None` if any of the choice edits cannot be understood
     */
    pub fn into_changes(self) -> Option<QuestionChanges> {
        let choices = self
            .choices
            .into_iter()
            .map(ChoiceEdit::into_change)
            .collect::<Option<Vec<_>>>()?;
        Some(QuestionChanges {
            question_text: self.question_text,
            pub_date: self.pub_date,
            choices,
        })
    }
}

/**
 * A choice without an id is added, one with an id is renamed, or removed
 * when `delete` is set
 */
#[derive(Debug, Deserialize)]
pub struct ChoiceEdit {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub choice_text: Option<String>,
    #[serde(default)]
    pub delete: bool,
}

impl ChoiceEdit {
    pub fn into_change(self) -> Option<ChoiceChange> {
        match (self.id, self.choice_text, self.delete) {
            (Some(id), _, true) => Some(ChoiceChange::Remove(id)),
            (Some(id), Some(choice_text), false) => Some(ChoiceChange::Rename { id, choice_text }),
            (None, Some(choice_text), false) => Some(ChoiceChange::Add(choice_text)),
            _ => None,
        }
    }
}

/**
 * Query string of the question listing
 *
 * Without any of these the listing is the public one. With any of them, it
 * covers every stored question, published or not.
 */
#[derive(Debug, Default, Deserialize)]
pub struct QuestionListQuery {
    pub all: Option<String>,
    pub search: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl QuestionListQuery {
    pub fn wants_everything(&self) -> bool {
        self.all.is_some() || self.search.is_some() || self.since.is_some() || self.until.is_some()
    }

    pub fn into_filter(self) -> QuestionFilter {
        QuestionFilter {
            search: self.search,
            since: self.since,
            until: self.until,
        }
    }
}

/**
 * A question as it appears in listings
 */
#[derive(Debug, Serialize)]
pub struct QuestionSummary {
    pub id: i64,
    pub question_text: String,
    pub pub_date: DateTime<Utc>,
    pub was_published_recently: bool,
}

impl QuestionSummary {
    pub fn new(question: Question, now: DateTime<Utc>) -> Self {
        let was_published_recently = question.was_published_recently(now);
        Self {
            id: question.id,
            question_text: question.question_text,
            pub_date: question.pub_date,
            was_published_recently,
        }
    }
}

/**
 * Information about a question, its choices and their tallies
 */
#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub question: Question,
    pub choices: Vec<Choice>,
    pub total_votes: i64,
    pub was_published_recently: bool,
}

impl PollResponse {
    pub fn new(poll: Poll, now: DateTime<Utc>) -> Self {
        Self {
            was_published_recently: poll.question.was_published_recently(now),
            total_votes: poll.total_votes(),
            question: poll.question,
            choices: poll.choices,
        }
    }
}

/**
 * The vote form posted from the detail page
 *
 * The field stays a string so that garbage can be reported as "no selection"
 * rather than rejected as a malformed request.
 */
#[derive(Debug, Default, Deserialize)]
pub struct VoteForm {
    pub choice: Option<String>,
}

impl VoteForm {
    pub fn choice_id(&self) -> Option<i64> {
        self.choice.as_deref().and_then(|c| c.trim().parse().ok())
    }
}

/**
 * A vote cast through the JSON API
 *
 * Like `VoteForm`, the choice may be a number or a numeric string, and
 * anything else counts as no selection.
 */
#[derive(Debug, Default, Deserialize)]
pub struct Ballot {
    #[serde(default)]
    pub choice: Option<Value>,
}

impl Ballot {
    pub fn choice_id(&self) -> Option<i64> {
        match self.choice.as_ref()? {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

/*!
 * The operations the site offers, expressed against a `Repository`
 *
 * Nothing in here knows about HTTP; the routes module maps the results onto
 * responses.
 */
use chrono::{DateTime, Utc};
use log::*;

use crate::models::{
    Choice, ChoiceChange, InsertableQuestion, Poll, Question, QuestionChanges, QuestionFilter, MAX_TEXT_LENGTH,
};
use crate::storage::{self, Repository};

/**
 * Number of questions shown on the index page
 */
pub const LATEST_QUESTIONS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("question not found")]
    NotFound,
    #[error("you didn't select a choice")]
    InvalidSelection,
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error(transparent)]
    Storage(#[from] storage::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/**
 * Where a voter should be sent once their vote has been counted
 */
pub fn results_path(question_id: i64) -> String {
    format!("/{}/results/", question_id)
}

pub async fn latest(repo: &dyn Repository, now: DateTime<Utc>) -> Result<Vec<Question>> {
    Ok(repo.recent_questions(now, LATEST_QUESTIONS).await?)
}

/**
 * The administrative listing: every question matching the filter, whether or
 * not it has been published yet
 */
pub async fn all(repo: &dyn Repository, filter: QuestionFilter) -> Result<Vec<Question>> {
    let filter = QuestionFilter {
        search: filter.search.filter(|s| !s.trim().is_empty()),
        ..filter
    };
    Ok(repo.all_questions(&filter).await?)
}

async fn load(repo: &dyn Repository, question_id: i64) -> Result<Poll> {
    let question = repo.find_question(question_id).await?.ok_or(Error::NotFound)?;
    let choices = repo.choices_for(question.id).await?;
    Ok(Poll { question, choices })
}

/**
 * The poll as shown on its voting page.
 *
 * Questions scheduled for the future are treated as if they did not exist yet.
 */
pub async fn detail(repo: &dyn Repository, question_id: i64, now: DateTime<Utc>) -> Result<Poll> {
    let poll = load(repo, question_id).await?;
    if !poll.question.is_published(now) {
        debug!("Question {} is not published until {}", question_id, poll.question.pub_date);
        return Err(Error::NotFound);
    }
    Ok(poll)
}

pub async fn results(repo: &dyn Repository, question_id: i64) -> Result<Poll> {
    load(repo, question_id).await
}

/**
 * Count one vote for `choice_id` on the given question.
 *
 * An unknown question is `NotFound`. A missing choice, or one that belongs to
 * a different question, is `InvalidSelection` and leaves every tally untouched.
 */
pub async fn vote(repo: &dyn Repository, question_id: i64, choice_id: Option<i64>) -> Result<Choice> {
    let question = repo.find_question(question_id).await?.ok_or(Error::NotFound)?;
    let choice_id = choice_id.ok_or(Error::InvalidSelection)?;

    match repo.record_vote(question.id, choice_id).await? {
        Some(choice) => {
            info!("Vote recorded for choice {} on question {}", choice.id, question.id);
            Ok(choice)
        }
        None => {
            warn!("Choice {} does not belong to question {}", choice_id, question.id);
            Err(Error::InvalidSelection)
        }
    }
}

fn validate_text(text: &str, what: &'static str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::InvalidInput(what));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(Error::InvalidInput(what));
    }
    Ok(())
}

/**
 * Create a question with its choices, published at `pub_date` or immediately
 */
pub async fn create(
    repo: &dyn Repository,
    question_text: String,
    pub_date: Option<DateTime<Utc>>,
    choices: Vec<String>,
    now: DateTime<Utc>,
) -> Result<Poll> {
    validate_text(&question_text, "question text must be between 1 and 200 characters")?;
    for choice in choices.iter() {
        validate_text(choice, "choice text must be between 1 and 200 characters")?;
    }

    let poll = repo
        .create_question(InsertableQuestion {
            question_text,
            pub_date: pub_date.unwrap_or(now),
            choices,
        })
        .await?;
    info!("Created question {} with {} choices", poll.question.id, poll.choices.len());
    Ok(poll)
}

/**
 * Edit a question in place.
 *
 * Renamed and removed choices must belong to the question, and every new text
 * is held to the same rules as on creation. Nothing is changed unless the
 * whole edit is valid.
 */
pub async fn update(repo: &dyn Repository, question_id: i64, changes: QuestionChanges) -> Result<Poll> {
    if let Some(text) = changes.question_text.as_deref() {
        validate_text(text, "question text must be between 1 and 200 characters")?;
    }

    let poll = load(repo, question_id).await?;
    for change in changes.choices.iter() {
        match change {
            ChoiceChange::Add(text) | ChoiceChange::Rename { choice_text: text, .. } => {
                validate_text(text, "choice text must be between 1 and 200 characters")?;
            }
            ChoiceChange::Remove(_) => {}
        }
        match change {
            ChoiceChange::Rename { id, .. } | ChoiceChange::Remove(id) if !poll.has_choice(*id) => {
                warn!("Choice {} does not belong to question {}", id, question_id);
                return Err(Error::InvalidInput("choice does not belong to this question"));
            }
            _ => {}
        }
    }

    let updated = repo
        .update_question(question_id, changes)
        .await?
        .ok_or(Error::NotFound)?;
    info!("Updated question {}", question_id);
    Ok(updated)
}

pub async fn delete(repo: &dyn Repository, question_id: i64) -> Result<()> {
    if repo.delete_question(question_id).await? {
        info!("Deleted question {}", question_id);
        Ok(())
    } else {
        Err(Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRepository;
    use chrono::Duration;

    async fn create_question(repo: &MemoryRepository, text: &str, days: i64) -> Poll {
        let pub_date = Utc::now() + Duration::days(days);
        create(repo, text.to_string(), Some(pub_date), vec!["Yes".into(), "No".into()], Utc::now())
            .await
            .unwrap()
    }

    async fn latest_texts(repo: &MemoryRepository) -> Vec<String> {
        latest(repo, Utc::now())
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.question_text)
            .collect()
    }

    #[async_std::test]
    async fn no_questions() {
        let repo = MemoryRepository::new();
        assert!(latest_texts(&repo).await.is_empty());
    }

    #[async_std::test]
    async fn past_question() {
        let repo = MemoryRepository::new();
        create_question(&repo, "Past question.", -30).await;
        assert_eq!(latest_texts(&repo).await, vec!["Past question."]);
    }

    #[async_std::test]
    async fn future_question() {
        let repo = MemoryRepository::new();
        create_question(&repo, "Future question.", 30).await;
        assert!(latest_texts(&repo).await.is_empty());
    }

    #[async_std::test]
    async fn future_question_and_past_question() {
        let repo = MemoryRepository::new();
        create_question(&repo, "Past question.", -30).await;
        create_question(&repo, "Future question.", 30).await;
        assert_eq!(latest_texts(&repo).await, vec!["Past question."]);
    }

    #[async_std::test]
    async fn two_past_questions() {
        let repo = MemoryRepository::new();
        create_question(&repo, "Past question 1.", -30).await;
        create_question(&repo, "Past question 2.", -5).await;
        assert_eq!(latest_texts(&repo).await, vec!["Past question 2.", "Past question 1."]);
    }

    #[async_std::test]
    async fn latest_is_capped() {
        let repo = MemoryRepository::new();
        for days in 1..=8 {
            create_question(&repo, &format!("{} days ago", days), -days).await;
        }
        let texts = latest_texts(&repo).await;
        assert_eq!(texts.len(), LATEST_QUESTIONS);
        assert_eq!(texts.first().map(String::as_str), Some("1 days ago"));
        assert_eq!(texts.last().map(String::as_str), Some("5 days ago"));
    }

    #[async_std::test]
    async fn detail_hides_future_questions_but_results_do_not() {
        let repo = MemoryRepository::new();
        let future = create_question(&repo, "Future question.", 5).await;
        let id = future.question.id;

        assert!(matches!(detail(&repo, id, Utc::now()).await, Err(Error::NotFound)));
        assert_eq!(results(&repo, id).await.unwrap(), future);
    }

    #[async_std::test]
    async fn vote_on_missing_question() {
        let repo = MemoryRepository::new();
        let poll = create_question(&repo, "Here?", -1).await;

        let err = vote(&repo, poll.question.id + 1, Some(poll.choices[0].id)).await;
        assert!(matches!(err, Err(Error::NotFound)));
        assert!(repo.choices_for(poll.question.id).await.unwrap().iter().all(|c| c.votes == 0));
    }

    #[async_std::test]
    async fn vote_without_valid_selection() {
        let repo = MemoryRepository::new();
        let poll = create_question(&repo, "Which?", -1).await;
        let other = create_question(&repo, "Other?", -1).await;
        let id = poll.question.id;

        assert!(matches!(vote(&repo, id, None).await, Err(Error::InvalidSelection)));
        let foreign = other.choices[0].id;
        assert!(matches!(vote(&repo, id, Some(foreign)).await, Err(Error::InvalidSelection)));

        assert_eq!(results(&repo, id).await.unwrap(), poll);
        assert_eq!(results(&repo, other.question.id).await.unwrap(), other);
    }

    #[async_std::test]
    async fn vote_counts_exactly_once() {
        let repo = MemoryRepository::new();
        let poll = create_question(&repo, "Which?", -1).await;
        let id = poll.question.id;
        let no = poll.choices[1].id;

        let choice = vote(&repo, id, Some(no)).await.unwrap();
        assert_eq!(choice.votes, 1);

        let after = results(&repo, id).await.unwrap();
        let tallies: Vec<(i64, i32)> = after.choices.iter().map(|c| (c.id, c.votes)).collect();
        assert_eq!(tallies, vec![(poll.choices[0].id, 0), (no, 1)]);
        assert_eq!(results_path(id), format!("/{}/results/", id));
    }

    #[async_std::test]
    async fn create_rejects_bad_text() {
        let repo = MemoryRepository::new();
        let now = Utc::now();

        let blank = create(&repo, "  ".into(), None, vec![], now).await;
        assert!(matches!(blank, Err(Error::InvalidInput(_))));

        let long = create(&repo, "x".repeat(MAX_TEXT_LENGTH + 1), None, vec![], now).await;
        assert!(matches!(long, Err(Error::InvalidInput(_))));

        let bad_choice = create(&repo, "Fine?".into(), None, vec!["".into()], now).await;
        assert!(matches!(bad_choice, Err(Error::InvalidInput(_))));

        assert!(latest(&repo, now).await.unwrap().is_empty());
    }

    #[async_std::test]
    async fn create_defaults_to_now() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let poll = create(&repo, "Now?".into(), None, vec![], now).await.unwrap();
        assert_eq!(poll.question.pub_date, now);
    }

    #[async_std::test]
    async fn all_shows_what_latest_hides() {
        let repo = MemoryRepository::new();
        for days in 1..=6 {
            create_question(&repo, &format!("Past question {}.", days), -days).await;
        }
        create_question(&repo, "Future question.", 30).await;

        let everything = all(&repo, QuestionFilter::default()).await.unwrap();
        let texts: Vec<&str> = everything.iter().map(|q| q.question_text.as_str()).collect();
        assert_eq!(texts.len(), 7);
        assert_eq!(texts[0], "Future question.");
        assert_eq!(texts[6], "Past question 6.");

        let blank = QuestionFilter { search: Some("  ".into()), ..Default::default() };
        assert_eq!(all(&repo, blank).await.unwrap().len(), 7);

        let future = QuestionFilter { search: Some("FUTURE".into()), ..Default::default() };
        let found = all(&repo, future).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(!found[0].was_published_recently(Utc::now()));
    }

    #[async_std::test]
    async fn update_changes_text_date_and_choices() {
        let repo = MemoryRepository::new();
        let poll = create_question(&repo, "Soon?", 5).await;
        let id = poll.question.id;
        let now = Utc::now();

        let changes = QuestionChanges {
            question_text: Some("Now?".into()),
            pub_date: Some(now),
            choices: vec![
                ChoiceChange::Rename { id: poll.choices[0].id, choice_text: "Sure".into() },
                ChoiceChange::Add("Maybe".into()),
            ],
        };
        let updated = update(&repo, id, changes).await.unwrap();
        assert_eq!(updated.question.question_text, "Now?");
        let texts: Vec<&str> = updated.choices.iter().map(|c| c.choice_text.as_str()).collect();
        assert_eq!(texts, vec!["Sure", "No", "Maybe"]);

        assert_eq!(detail(&repo, id, Utc::now()).await.unwrap(), updated);
    }

    #[async_std::test]
    async fn update_rejects_invalid_edits() {
        let repo = MemoryRepository::new();
        let poll = create_question(&repo, "Stay?", -1).await;
        let other = create_question(&repo, "Other?", -1).await;
        let id = poll.question.id;

        let blank = QuestionChanges { question_text: Some(" ".into()), ..Default::default() };
        assert!(matches!(update(&repo, id, blank).await, Err(Error::InvalidInput(_))));

        let foreign = QuestionChanges {
            choices: vec![ChoiceChange::Add("Fine".into()), ChoiceChange::Remove(other.choices[0].id)],
            ..Default::default()
        };
        assert!(matches!(update(&repo, id, foreign).await, Err(Error::InvalidInput(_))));

        let long = QuestionChanges {
            choices: vec![ChoiceChange::Rename { id: poll.choices[0].id, choice_text: "x".repeat(201) }],
            ..Default::default()
        };
        assert!(matches!(update(&repo, id, long).await, Err(Error::InvalidInput(_))));

        let missing = update(&repo, id + 100, QuestionChanges::default()).await;
        assert!(matches!(missing, Err(Error::NotFound)));

        assert_eq!(results(&repo, id).await.unwrap(), poll);
        assert_eq!(results(&repo, other.question.id).await.unwrap(), other);
    }

    #[async_std::test]
    async fn delete_unknown_question() {
        let repo = MemoryRepository::new();
        assert!(matches!(delete(&repo, 42).await, Err(Error::NotFound)));
    }
}

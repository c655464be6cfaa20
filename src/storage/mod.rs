/*!
 * The storage module holds the persistence seam of the application.
 *
 * Handlers only ever see `Arc<dyn Repository>`, which is backed either by
 * PostgreSQL or, when no database is configured, by an in-process store.
 */
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Choice, InsertableQuestion, Poll, Question, QuestionChanges, QuestionFilter};

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to migrate the database: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("choice {choice_id} cannot hold any more votes")]
    CounterOverflow { choice_id: i64 },
}

pub type Result<T> = std::result::Result<T, Error>;

#[async_trait]
pub trait Repository: Send + Sync {
    /**
     * Store the question and all of its choices, or nothing at all
     */
    async fn create_question(&self, question: InsertableQuestion) -> Result<Poll>;

    async fn find_question(&self, id: i64) -> Result<Option<Question>>;

    /**
     * Questions published at or before `now`, newest first.
     *
     * Questions sharing a `pub_date` come back in the order they were created.
     */
    async fn recent_questions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Question>>;

    /**
     * Every stored question matching the filter, including those not yet
     * published, ordered like `recent_questions`
     */
    async fn all_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>>;

    async fn choices_for(&self, question_id: i64) -> Result<Vec<Choice>>;

    /**
     * Add exactly one vote to the choice, provided it belongs to the question.
     *
     * The increment happens inside the store, so concurrent votes never
     * overwrite each other. Returns `None` when the choice does not exist
     * under that question, in which case nothing is modified. A counter
     * which is already at its maximum fails with `CounterOverflow` and keeps
     * its value.
     */
    async fn record_vote(&self, question_id: i64, choice_id: i64) -> Result<Option<Choice>>;

    /**
     * Apply all of the changes or none of them.
     *
     * Choice changes naming a choice of another question are skipped. Returns
     * `None` when the question does not exist.
     */
    async fn update_question(&self, id: i64, changes: QuestionChanges) -> Result<Option<Poll>>;

    /**
     * Remove the question and its choices, returning whether it existed
     */
    async fn delete_question(&self, id: i64) -> Result<bool>;
}

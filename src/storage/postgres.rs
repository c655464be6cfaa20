use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::*;
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::{Error, Repository, Result};
use crate::models::{Choice, ChoiceChange, InsertableQuestion, Poll, Question, QuestionChanges, QuestionFilter};

/* SQLSTATE raised when `votes + 1` no longer fits the column */
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

/**
 * Turn a search fragment into an ILIKE pattern matching it literally
 */
fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/**
 * Repository backed by a PostgreSQL connection pool
 */
#[derive(Clone, Debug)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /**
     * Construct the connection pool and bring the schema up to date
     */
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations are up to date");

        Ok(Self { pool })
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn create_question(&self, new: InsertableQuestion) -> Result<Poll> {
        let mut tx = self.pool.begin().await?;

        let question = sqlx::query_as::<_, Question>(
            "INSERT INTO questions (question_text, pub_date) VALUES ($1, $2) \
             RETURNING id, question_text, pub_date",
        )
        .bind(new.question_text.as_str())
        .bind(new.pub_date)
        .fetch_one(&mut tx)
        .await?;

        /*
         * One insert per choice keeps the statement simple; the transaction
         * makes sure a failure leaves no half-created question behind
         */
        let mut choices = Vec::with_capacity(new.choices.len());
        for choice_text in new.choices.iter() {
            let choice = sqlx::query_as::<_, Choice>(
                "INSERT INTO choices (question_id, choice_text) VALUES ($1, $2) \
                 RETURNING id, question_id, choice_text, votes",
            )
            .bind(question.id)
            .bind(choice_text.as_str())
            .fetch_one(&mut tx)
            .await?;
            choices.push(choice);
        }

        tx.commit().await?;
        debug!("Inserted question {} with {} choices", question.id, choices.len());
        Ok(Poll { question, choices })
    }

    async fn find_question(&self, id: i64) -> Result<Option<Question>> {
        let question = sqlx::query_as::<_, Question>(
            "SELECT id, question_text, pub_date FROM questions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(question)
    }

    async fn recent_questions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Question>> {
        let questions = sqlx::query_as::<_, Question>(
            "SELECT id, question_text, pub_date FROM questions \
             WHERE pub_date <= $1 \
             ORDER BY pub_date DESC, id ASC \
             LIMIT $2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(questions)
    }

    async fn all_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>> {
        let search = filter.search.as_deref().map(like_pattern);
        let questions = sqlx::query_as::<_, Question>(
            "SELECT id, question_text, pub_date FROM questions \
             WHERE ($1::TEXT IS NULL OR question_text ILIKE $1) \
             AND ($2::TIMESTAMPTZ IS NULL OR pub_date >= $2) \
             AND ($3::TIMESTAMPTZ IS NULL OR pub_date <= $3) \
             ORDER BY pub_date DESC, id ASC",
        )
        .bind(search)
        .bind(filter.since)
        .bind(filter.until)
        .fetch_all(&self.pool)
        .await?;
        Ok(questions)
    }

    async fn choices_for(&self, question_id: i64) -> Result<Vec<Choice>> {
        let choices = sqlx::query_as::<_, Choice>(
            "SELECT id, question_id, choice_text, votes FROM choices \
             WHERE question_id = $1 ORDER BY id ASC",
        )
        .bind(question_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(choices)
    }

    async fn record_vote(&self, question_id: i64, choice_id: i64) -> Result<Option<Choice>> {
        // The addition happens in the database so concurrent votes cannot be lost
        let choice = sqlx::query_as::<_, Choice>(
            "UPDATE choices SET votes = votes + 1 \
             WHERE id = $1 AND question_id = $2 \
             RETURNING id, question_id, choice_text, votes",
        )
        .bind(choice_id)
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| {
            let overflow = err
                .as_database_error()
                .and_then(|db| db.code())
                .map_or(false, |code| code == NUMERIC_VALUE_OUT_OF_RANGE);
            if overflow {
                Error::CounterOverflow { choice_id }
            } else {
                Error::from(err)
            }
        })?;
        Ok(choice)
    }

    async fn update_question(&self, id: i64, changes: QuestionChanges) -> Result<Option<Poll>> {
        let mut tx = self.pool.begin().await?;

        let question = sqlx::query_as::<_, Question>(
            "UPDATE questions SET \
             question_text = COALESCE($2, question_text), \
             pub_date = COALESCE($3, pub_date) \
             WHERE id = $1 \
             RETURNING id, question_text, pub_date",
        )
        .bind(id)
        .bind(changes.question_text.as_deref())
        .bind(changes.pub_date)
        .fetch_optional(&mut tx)
        .await?;

        // Dropping the transaction rolls it back
        let question = match question {
            Some(question) => question,
            None => return Ok(None),
        };

        for change in changes.choices.iter() {
            match change {
                ChoiceChange::Add(choice_text) => {
                    sqlx::query("INSERT INTO choices (question_id, choice_text) VALUES ($1, $2)")
                        .bind(id)
                        .bind(choice_text.as_str())
                        .execute(&mut tx)
                        .await?;
                }
                ChoiceChange::Rename { id: choice_id, choice_text } => {
                    sqlx::query("UPDATE choices SET choice_text = $3 WHERE id = $1 AND question_id = $2")
                        .bind(*choice_id)
                        .bind(id)
                        .bind(choice_text.as_str())
                        .execute(&mut tx)
                        .await?;
                }
                ChoiceChange::Remove(choice_id) => {
                    sqlx::query("DELETE FROM choices WHERE id = $1 AND question_id = $2")
                        .bind(*choice_id)
                        .bind(id)
                        .execute(&mut tx)
                        .await?;
                }
            }
        }

        let choices = sqlx::query_as::<_, Choice>(
            "SELECT id, question_id, choice_text, votes FROM choices \
             WHERE question_id = $1 ORDER BY id ASC",
        )
        .bind(id)
        .fetch_all(&mut tx)
        .await?;

        tx.commit().await?;
        debug!("Updated question {}", id);
        Ok(Some(Poll { question, choices }))
    }

    async fn delete_question(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM questions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

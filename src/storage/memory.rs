use async_std::sync::Mutex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::*;

use super::{Error, Repository, Result};
use crate::models::{Choice, ChoiceChange, InsertableQuestion, Poll, Question, QuestionChanges, QuestionFilter};

#[derive(Debug, Default)]
struct Tables {
    last_question_id: i64,
    last_choice_id: i64,
    /* Kept in insertion order, which the listing relies on for ties */
    questions: Vec<Question>,
    choices: Vec<Choice>,
}

/**
 * Repository which keeps everything in process memory
 *
 * Every operation holds the table lock for its whole duration, which makes
 * each of them atomic with respect to the others.
 */
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_question(&self, new: InsertableQuestion) -> Result<Poll> {
        let mut tables = self.tables.lock().await;

        tables.last_question_id += 1;
        let question = Question {
            id: tables.last_question_id,
            question_text: new.question_text,
            pub_date: new.pub_date,
        };
        tables.questions.push(question.clone());

        let mut choices = Vec::with_capacity(new.choices.len());
        for choice_text in new.choices {
            tables.last_choice_id += 1;
            let choice = Choice {
                id: tables.last_choice_id,
                question_id: question.id,
                choice_text,
                votes: 0,
            };
            tables.choices.push(choice.clone());
            choices.push(choice);
        }

        debug!("Stored question {} with {} choices in memory", question.id, choices.len());
        Ok(Poll { question, choices })
    }

    async fn find_question(&self, id: i64) -> Result<Option<Question>> {
        let tables = self.tables.lock().await;
        Ok(tables.questions.iter().find(|q| q.id == id).cloned())
    }

    async fn recent_questions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Question>> {
        let tables = self.tables.lock().await;
        let mut published: Vec<Question> = tables
            .questions
            .iter()
            .filter(|q| q.is_published(now))
            .cloned()
            .collect();
        // sort_by is stable, so equal dates stay in insertion order
        published.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
        published.truncate(limit);
        Ok(published)
    }

    async fn all_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>> {
        let tables = self.tables.lock().await;
        let mut questions: Vec<Question> = tables
            .questions
            .iter()
            .filter(|q| filter.matches(q))
            .cloned()
            .collect();
        questions.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
        Ok(questions)
    }

    async fn choices_for(&self, question_id: i64) -> Result<Vec<Choice>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .choices
            .iter()
            .filter(|c| c.question_id == question_id)
            .cloned()
            .collect())
    }

    async fn record_vote(&self, question_id: i64, choice_id: i64) -> Result<Option<Choice>> {
        let mut tables = self.tables.lock().await;
        let choice = tables
            .choices
            .iter_mut()
            .find(|c| c.id == choice_id && c.question_id == question_id);

        match choice {
            Some(choice) => {
                choice.votes = choice
                    .votes
                    .checked_add(1)
                    .ok_or(Error::CounterOverflow { choice_id })?;
                Ok(Some(choice.clone()))
            }
            None => Ok(None),
        }
    }

    async fn update_question(&self, id: i64, changes: QuestionChanges) -> Result<Option<Poll>> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;

        let question = match tables.questions.iter_mut().find(|q| q.id == id) {
            Some(question) => question,
            None => return Ok(None),
        };
        if let Some(question_text) = changes.question_text {
            question.question_text = question_text;
        }
        if let Some(pub_date) = changes.pub_date {
            question.pub_date = pub_date;
        }
        let question = question.clone();

        for change in changes.choices {
            match change {
                ChoiceChange::Add(choice_text) => {
                    tables.last_choice_id += 1;
                    tables.choices.push(Choice {
                        id: tables.last_choice_id,
                        question_id: id,
                        choice_text,
                        votes: 0,
                    });
                }
                ChoiceChange::Rename { id: choice_id, choice_text } => {
                    if let Some(choice) = tables
                        .choices
                        .iter_mut()
                        .find(|c| c.id == choice_id && c.question_id == id)
                    {
                        choice.choice_text = choice_text;
                    }
                }
                ChoiceChange::Remove(choice_id) => {
                    tables.choices.retain(|c| !(c.id == choice_id && c.question_id == id));
                }
            }
        }

        let choices = tables
            .choices
            .iter()
            .filter(|c| c.question_id == id)
            .cloned()
            .collect();
        Ok(Some(Poll { question, choices }))
    }

    async fn delete_question(&self, id: i64) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let before = tables.questions.len();
        tables.questions.retain(|q| q.id != id);

        if tables.questions.len() == before {
            return Ok(false);
        }
        tables.choices.retain(|c| c.question_id != id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn insertable(text: &str, pub_date: DateTime<Utc>, choices: &[&str]) -> InsertableQuestion {
        InsertableQuestion {
            question_text: text.to_string(),
            pub_date,
            choices: choices.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[async_std::test]
    async fn create_assigns_ids_in_order() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let first = repo.create_question(insertable("First?", now, &["a", "b"])).await.unwrap();
        let second = repo.create_question(insertable("Second?", now, &["c"])).await.unwrap();

        assert!(first.question.id < second.question.id);
        assert_eq!(first.choices.len(), 2);
        assert!(first.choices.iter().all(|c| c.votes == 0 && c.question_id == first.question.id));
        assert_eq!(repo.choices_for(second.question.id).await.unwrap(), second.choices);
    }

    #[async_std::test]
    async fn recent_questions_skips_future_and_keeps_ties_stable() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let tied = now - Duration::days(2);
        repo.create_question(insertable("Tie one", tied, &[])).await.unwrap();
        repo.create_question(insertable("Later", now + Duration::days(1), &[])).await.unwrap();
        repo.create_question(insertable("Tie two", tied, &[])).await.unwrap();
        repo.create_question(insertable("Newest", now - Duration::hours(1), &[])).await.unwrap();

        let texts: Vec<String> = repo
            .recent_questions(now, 5)
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.question_text)
            .collect();
        assert_eq!(texts, vec!["Newest", "Tie one", "Tie two"]);
    }

    #[async_std::test]
    async fn record_vote_requires_matching_question() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let one = repo.create_question(insertable("One?", now, &["yes"])).await.unwrap();
        let two = repo.create_question(insertable("Two?", now, &["no"])).await.unwrap();

        let foreign = two.choices[0].id;
        assert!(repo.record_vote(one.question.id, foreign).await.unwrap().is_none());
        assert_eq!(repo.choices_for(two.question.id).await.unwrap()[0].votes, 0);

        let own = one.choices[0].id;
        let voted = repo.record_vote(one.question.id, own).await.unwrap().unwrap();
        assert_eq!(voted.votes, 1);
    }

    #[async_std::test]
    async fn concurrent_votes_are_all_counted() {
        let repo = Arc::new(MemoryRepository::new());
        let poll = repo
            .create_question(insertable("Busy?", Utc::now(), &["very"]))
            .await
            .unwrap();
        let (qid, cid) = (poll.question.id, poll.choices[0].id);

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let repo = repo.clone();
                async_std::task::spawn(async move { repo.record_vote(qid, cid).await.unwrap() })
            })
            .collect();
        for task in tasks {
            assert!(task.await.is_some());
        }

        assert_eq!(repo.choices_for(qid).await.unwrap()[0].votes, 50);
    }

    #[async_std::test]
    async fn vote_at_the_counter_limit_fails_without_changes() {
        let repo = MemoryRepository::new();
        let poll = repo
            .create_question(insertable("Full?", Utc::now(), &["packed"]))
            .await
            .unwrap();
        let (qid, cid) = (poll.question.id, poll.choices[0].id);
        repo.tables.lock().await.choices[0].votes = i32::MAX;

        let result = repo.record_vote(qid, cid).await;
        assert!(matches!(result, Err(Error::CounterOverflow { choice_id }) if choice_id == cid));
        assert_eq!(repo.choices_for(qid).await.unwrap()[0].votes, i32::MAX);
    }

    #[async_std::test]
    async fn all_questions_includes_unpublished_and_filters() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        for days in 1..=6 {
            let text = format!("Old {}", days);
            repo.create_question(insertable(&text, now - Duration::days(days), &[])).await.unwrap();
        }
        repo.create_question(insertable("Upcoming", now + Duration::days(30), &[])).await.unwrap();

        let texts = |questions: Vec<Question>| -> Vec<String> {
            questions.into_iter().map(|q| q.question_text).collect()
        };

        let all = texts(repo.all_questions(&QuestionFilter::default()).await.unwrap());
        assert_eq!(all.len(), 7);
        assert_eq!(all.first().map(String::as_str), Some("Upcoming"));
        assert_eq!(all.last().map(String::as_str), Some("Old 6"));

        let filter = QuestionFilter {
            search: Some("old".to_string()),
            since: Some(now - Duration::days(2) - Duration::hours(1)),
            until: None,
        };
        assert_eq!(texts(repo.all_questions(&filter).await.unwrap()), vec!["Old 1", "Old 2"]);
    }

    #[async_std::test]
    async fn update_edits_question_and_choices() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let poll = repo
            .create_question(insertable("Tea?", now, &["green", "black"]))
            .await
            .unwrap();
        let other = repo.create_question(insertable("Coffee?", now, &["black"])).await.unwrap();
        let (green, black) = (poll.choices[0].id, poll.choices[1].id);
        repo.record_vote(poll.question.id, green).await.unwrap();

        let changes = QuestionChanges {
            question_text: Some("Which tea?".to_string()),
            pub_date: Some(now + Duration::days(1)),
            choices: vec![
                ChoiceChange::Rename { id: green, choice_text: "sencha".to_string() },
                ChoiceChange::Remove(black),
                ChoiceChange::Add("oolong".to_string()),
                ChoiceChange::Remove(other.choices[0].id),
            ],
        };
        let updated = repo.update_question(poll.question.id, changes).await.unwrap().unwrap();

        assert_eq!(updated.question.question_text, "Which tea?");
        assert_eq!(updated.question.pub_date, now + Duration::days(1));
        let choices: Vec<(&str, i32)> =
            updated.choices.iter().map(|c| (c.choice_text.as_str(), c.votes)).collect();
        assert_eq!(choices, vec![("sencha", 1), ("oolong", 0)]);
        assert_eq!(repo.choices_for(other.question.id).await.unwrap(), other.choices);

        let missing = repo.update_question(999, QuestionChanges::default()).await.unwrap();
        assert!(missing.is_none());
    }

    #[async_std::test]
    async fn delete_cascades_to_choices() {
        let repo = MemoryRepository::new();
        let poll = repo
            .create_question(insertable("Gone?", Utc::now(), &["soon", "now"]))
            .await
            .unwrap();
        let id = poll.question.id;

        assert!(repo.delete_question(id).await.unwrap());
        assert!(repo.find_question(id).await.unwrap().is_none());
        assert!(repo.choices_for(id).await.unwrap().is_empty());
        assert!(!repo.delete_question(id).await.unwrap());
    }
}

//! Quiz grading and module progression.

use crate::api::error::ApiError;
use crate::api::models::{Quiz, QuizGrading};
use crate::api::store::{NewLearningProgress, NewQuizGrading, Store};
use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use utoipa::ToSchema;

/// Canonical ranking that accepts every answer.
const ANY_ANSWER: i32 = 0;

#[derive(Debug, Error)]
pub enum GradingError {
    #[error("quiz not found: {0}")]
    QuizNotFound(i64),

    #[error("module not found: {0}")]
    ModuleNotFound(i64),

    #[error("missing question id: {0}")]
    MissingQuestion(i64),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<GradingError> for ApiError {
    fn from(err: GradingError) -> Self {
        match err {
            GradingError::QuizNotFound(_) | GradingError::ModuleNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            GradingError::MissingQuestion(_) => Self::Internal(anyhow::Error::new(err)),
            GradingError::Store(err) => Self::Internal(err),
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct Answer {
    pub question_id: i64,
    #[serde(default)]
    pub answer_ranking: i32,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GradeRequest {
    pub module_id: i64,
    pub quiz_id: i64,
    #[serde(default)]
    pub answers: Vec<Answer>,
}

/// Who is submitting.
#[derive(Debug, Clone)]
pub struct Learner {
    pub user_id: i64,
    pub device_unique_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GradingOutcome {
    pub gradings: Vec<QuizGrading>,
    /// Module the learner was moved on to, if there is one.
    pub next_module_id: Option<i64>,
}

/// One answer per question, in first-seen order, holding the last submission.
fn latest_answers(answers: &[Answer]) -> Vec<(i64, i32)> {
    let mut latest: Vec<(i64, i32)> = Vec::with_capacity(answers.len());
    for answer in answers {
        match latest.iter_mut().find(|(id, _)| *id == answer.question_id) {
            Some(entry) => entry.1 = answer.answer_ranking,
            None => latest.push((answer.question_id, answer.answer_ranking)),
        }
    }
    latest
}

fn grade(
    quiz: &Quiz,
    learner: &Learner,
    request: &GradeRequest,
    take_number: i32,
) -> Result<Vec<NewQuizGrading>, GradingError> {
    latest_answers(&request.answers)
        .into_iter()
        .map(|(question_id, submitted)| {
            let question = quiz
                .questions
                .iter()
                .find(|question| question.id == question_id)
                .ok_or(GradingError::MissingQuestion(question_id))?;

            let correct = question.answer_option_ranking == ANY_ANSWER
                || question.answer_option_ranking == submitted;

            Ok(NewQuizGrading {
                module_id: request.module_id,
                quiz_id: request.quiz_id,
                question_id,
                user_id: learner.user_id,
                user_answer_ranking: submitted,
                correct,
                take_number,
            })
        })
        .collect()
}

/// Grade a submission and move the learner to the next module.
///
/// Progression does not depend on the score. Everything happens in one
/// transaction; an error at any step commits nothing.
///
/// # Errors
/// `QuizNotFound`/`ModuleNotFound` for unknown ids, `MissingQuestion` for an
/// answer to a question outside the quiz, `Store` for persistence failures.
pub async fn grade_submission(
    store: &dyn Store,
    learner: &Learner,
    request: &GradeRequest,
) -> Result<GradingOutcome, GradingError> {
    let mut tx = store.begin().await.context("begin tx")?;

    let quiz = tx
        .quiz_with_questions(request.quiz_id)
        .await
        .with_context(|| format!("getting quiz by id: {}", request.quiz_id))?
        .ok_or(GradingError::QuizNotFound(request.quiz_id))?;

    let take_number = tx
        .latest_take_number(learner.user_id, request.module_id, request.quiz_id)
        .await
        .context("getting latest take number")?
        .unwrap_or(0)
        + 1;

    let rows = grade(&quiz, learner, request, take_number)?;
    let gradings = tx
        .insert_gradings(&rows)
        .await
        .context("inserting quiz gradings")?;

    let module = tx
        .module_by_id(request.module_id)
        .await
        .with_context(|| format!("getting module by id: {}", request.module_id))?
        .ok_or(GradingError::ModuleNotFound(request.module_id))?;

    let next_file = match module.ranking.checked_add(1) {
        Some(ranking) => tx
            .first_file_of_module_ranked(ranking)
            .await
            .context("getting first file of next module")?,
        None => None,
    };

    let next_module_id = match next_file {
        Some(file) => {
            tx.record_progress(&NewLearningProgress {
                user_id: Some(learner.user_id),
                device_unique_id: learner.device_unique_id.clone(),
                module_id: file.module_id,
                module_file_ranking: 1,
                seek: 0.0,
            })
            .await
            .context("recording progress to next module")?;
            Some(file.module_id)
        }
        None => {
            debug!(module_id = module.id, "No module follows, skipping progression");
            None
        }
    };

    tx.commit().await.context("committing quiz gradings")?;

    info!(
        user_id = learner.user_id,
        quiz_id = request.quiz_id,
        take_number,
        "Quiz graded"
    );

    Ok(GradingOutcome {
        gradings,
        next_module_id,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::store::memory::{module, module_file, quiz, Faults, MemoryStore};

    fn learner() -> Learner {
        Learner {
            user_id: 7,
            device_unique_id: Some("device-7".to_string()),
        }
    }

    fn request(answers: &[(i64, i32)]) -> GradeRequest {
        GradeRequest {
            module_id: 1,
            quiz_id: 10,
            answers: answers
                .iter()
                .map(|&(question_id, answer_ranking)| Answer {
                    question_id,
                    answer_ranking,
                })
                .collect(),
        }
    }

    /// Module 1 (ranking 1) with quiz 10, followed by module 2 (ranking 2).
    fn course(questions: &[(i64, i32)]) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .update(|state| {
                let mut first = module(1, 1);
                first.quizzes.push(quiz(10, 1, questions));
                first.files.push(module_file(100, 1));

                let mut second = module(2, 2);
                second.files.push(module_file(201, 2));
                second.files.push(module_file(200, 2));

                state.modules.push(first);
                state.modules.push(second);
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn grades_against_accepted_ranking() -> anyhow::Result<()> {
        let store = course(&[(1, 2), (2, 3)]);

        let outcome = grade_submission(&store, &learner(), &request(&[(1, 2), (2, 1)])).await?;

        let correct: Vec<bool> = outcome.gradings.iter().map(|g| g.correct).collect();
        assert_eq!(correct, vec![true, false]);
        assert!(outcome.gradings.iter().all(|g| g.take_number == 1));
        Ok(())
    }

    #[tokio::test]
    async fn ranking_zero_accepts_any_answer() -> anyhow::Result<()> {
        let store = course(&[(1, 0), (2, 0)]);

        let outcome =
            grade_submission(&store, &learner(), &request(&[(1, 4), (2, -1)])).await?;

        assert!(outcome.gradings.iter().all(|g| g.correct));
        Ok(())
    }

    #[tokio::test]
    async fn repeated_answer_keeps_last_submission() -> anyhow::Result<()> {
        let store = course(&[(1, 2), (2, 3)]);

        let outcome =
            grade_submission(&store, &learner(), &request(&[(1, 1), (2, 3), (1, 2)])).await?;

        assert_eq!(outcome.gradings.len(), 2);
        assert_eq!(outcome.gradings[0].question_id, 1);
        assert_eq!(outcome.gradings[0].user_answer_ranking, 2);
        assert!(outcome.gradings[0].correct);
        Ok(())
    }

    #[tokio::test]
    async fn second_take_leaves_first_untouched() -> anyhow::Result<()> {
        let store = course(&[(1, 2)]);

        let first = grade_submission(&store, &learner(), &request(&[(1, 1)])).await?;
        let second = grade_submission(&store, &learner(), &request(&[(1, 2)])).await?;

        assert_eq!(second.gradings[0].take_number, 2);

        let state = store.snapshot()?;
        let take_one: Vec<_> = state.gradings.iter().filter(|g| g.take_number == 1).collect();
        assert_eq!(take_one.len(), 1);
        assert_eq!(take_one[0], &first.gradings[0]);
        assert!(!take_one[0].correct);
        Ok(())
    }

    #[tokio::test]
    async fn progression_moves_to_first_file_of_next_module() -> anyhow::Result<()> {
        let store = course(&[(1, 2)]);

        let outcome = grade_submission(&store, &learner(), &request(&[(1, 1)])).await?;
        assert_eq!(outcome.next_module_id, Some(2));

        let state = store.snapshot()?;
        assert_eq!(state.progress.len(), 1);
        let progress = &state.progress[0];
        assert_eq!(progress.user_id, Some(7));
        assert_eq!(progress.device_unique_id.as_deref(), Some("device-7"));
        assert_eq!(progress.module_id, 2);
        assert_eq!(progress.module_file_ranking, 1);
        Ok(())
    }

    #[tokio::test]
    async fn last_module_commits_without_progression() -> anyhow::Result<()> {
        let store = course(&[(1, 2)]);
        store.update(|state| state.modules.retain(|m| m.id == 1))?;

        let outcome = grade_submission(&store, &learner(), &request(&[(1, 2)])).await?;

        assert_eq!(outcome.next_module_id, None);
        let state = store.snapshot()?;
        assert_eq!(state.gradings.len(), 1);
        assert!(state.progress.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn highest_possible_ranking_has_no_successor() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.update(|state| {
            let mut last = module(1, i32::MAX);
            last.quizzes.push(quiz(10, 1, &[(1, 2)]));
            last.files.push(module_file(100, 1));
            state.modules.push(last);
        })?;

        let outcome = grade_submission(&store, &learner(), &request(&[(1, 2)])).await?;

        assert_eq!(outcome.next_module_id, None);
        assert_eq!(store.snapshot()?.gradings.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn failed_progression_lookup_commits_nothing() -> anyhow::Result<()> {
        let store = course(&[(1, 2)]);
        store.set_faults(Faults {
            first_file_lookup: true,
            ..Faults::default()
        })?;

        let err = grade_submission(&store, &learner(), &request(&[(1, 2)])).await;
        assert!(matches!(err, Err(GradingError::Store(_))));

        let state = store.snapshot()?;
        assert!(state.gradings.is_empty());
        assert!(state.progress.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_question_is_internal() -> anyhow::Result<()> {
        let store = course(&[(1, 2)]);

        let err = grade_submission(&store, &learner(), &request(&[(1, 2), (99, 1)]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing question id: 99");

        let api: ApiError = err.into();
        assert_eq!(api.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(store.snapshot()?.gradings.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_quiz_is_not_found() -> anyhow::Result<()> {
        let store = course(&[(1, 2)]);
        let mut missing = request(&[(1, 2)]);
        missing.quiz_id = 11;

        let err: ApiError = grade_submission(&store, &learner(), &missing)
            .await
            .unwrap_err()
            .into();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
        Ok(())
    }
}

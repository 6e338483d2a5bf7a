//! Postgres adapter for the store traits.

use super::{
    CodeRepo, CreateUserOutcome, EmailRepo, LearningRepo, NewEmail, NewGoal, NewLearningProgress,
    NewQuizGrading, NewUser, NewWaitlistItem, ProfileUpdate, SocialCredentials, Store,
    Transaction, UserRepo, WaitlistOutcome,
};
use crate::api::models::{
    EmailType, GoalTemplate, LearningOutcome, LearningProgress, Module, ModuleCategory,
    ModuleFile, OutboxEmail, PasswordReset, Player, Question, QuestionOption, Quiz, QuizGrading,
    ReferralCode, ReferralType, SupportingMaterial, User, UserGoal, WaitlistItem,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{
    postgres::{PgPool, PgRow},
    Connection, Postgres, Row,
};
use std::collections::HashMap;
use tracing::{Instrument, Span};

const USER_SELECT: &str = r"
    SELECT
        u.id, u.email, u.password_hash, u.user_type, u.user_admin_level, u.is_verified,
        u.is_active, u.last_online, u.about, u.date_of_birth, u.phone, u.location,
        u.sports, u.hashtags, u.created_at, u.updated_at,
        p.id AS player_id, p.first_name, p.last_name, p.gender, p.position
    FROM ggwp.users u
    LEFT JOIN ggwp.players p ON p.user_id = u.id
";

const MODULE_SELECT: &str = r"
    SELECT
        id, user_id, name, description, ranking, hashtags, category_id, free, is_active,
        created_at
    FROM ggwp.modules
";

const GRADING_COLUMNS: &str = r"
    id, module_id, quiz_id, question_id, user_id, user_answer_ranking, correct, take_number,
    created_at
";

const REFERRAL_COLUMNS: &str =
    "id, user_id, referral_code, referral_type, value, is_active, created_at";

const WAITLIST_COLUMNS: &str = r"
    id, email_address, owner_waitlist_code, user_id, original_referral_code_id,
    original_waitlist_code_id, created_at
";

const GOAL_COLUMNS: &str = r"
    id, user_id, description, value::float8 AS value, rate, deadline, completed_at, is_active,
    created_at
";

fn db_span(operation: &'static str, statement: &str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// Check if the error is a unique constraint violation (SQLSTATE 23505).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .context("failed to set isolation level")?;

        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .instrument(tracing::info_span!(
                "db.acquire",
                db.system = "postgresql",
                db.operation = "ACQUIRE"
            ))
            .await
            .context("failed to acquire database connection")?;

        conn.ping()
            .instrument(tracing::info_span!(
                "db.ping",
                db.system = "postgresql",
                db.operation = "PING"
            ))
            .await
            .context("failed to ping database")
    }
}

pub struct PgTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("failed to commit transaction")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.context("failed to rollback transaction")
    }
}

fn user_from_row(row: &PgRow) -> Result<User> {
    let id: i64 = row.try_get("id")?;
    let player = match row.try_get::<Option<i64>, _>("player_id")? {
        Some(player_id) => Some(Player {
            id: player_id,
            user_id: id,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            gender: row.try_get("gender")?,
            position: row.try_get("position")?,
        }),
        None => None,
    };

    Ok(User {
        id,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        user_type: row.try_get("user_type")?,
        user_admin_level: row.try_get("user_admin_level")?,
        is_verified: row.try_get("is_verified")?,
        is_active: row.try_get("is_active")?,
        last_online: row.try_get("last_online")?,
        about: row.try_get("about")?,
        date_of_birth: row.try_get("date_of_birth")?,
        phone: row.try_get("phone")?,
        location: row.try_get("location")?,
        sports: row.try_get("sports")?,
        hashtags: row.try_get("hashtags")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        player,
    })
}

fn reset_from_row(row: &PgRow) -> Result<PasswordReset> {
    Ok(PasswordReset {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token: row.try_get("token")?,
        created_at: row.try_get("created_at")?,
    })
}

fn goal_from_row(row: &PgRow) -> Result<UserGoal> {
    Ok(UserGoal {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        description: row.try_get("description")?,
        value: row.try_get("value")?,
        rate: row.try_get("rate")?,
        deadline: row.try_get("deadline")?,
        completed_at: row.try_get("completed_at")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn progress_from_row(row: &PgRow) -> Result<LearningProgress> {
    Ok(LearningProgress {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        device_unique_id: row.try_get("device_unique_id")?,
        module_id: row.try_get("module_id")?,
        module_file_ranking: row.try_get("module_file_ranking")?,
        seek: row.try_get("seek")?,
        created_at: row.try_get("created_at")?,
    })
}

fn grading_from_row(row: &PgRow) -> Result<QuizGrading> {
    Ok(QuizGrading {
        id: row.try_get("id")?,
        module_id: row.try_get("module_id")?,
        quiz_id: row.try_get("quiz_id")?,
        question_id: row.try_get("question_id")?,
        user_id: row.try_get("user_id")?,
        user_answer_ranking: row.try_get("user_answer_ranking")?,
        correct: row.try_get("correct")?,
        take_number: row.try_get("take_number")?,
        created_at: row.try_get("created_at")?,
    })
}

fn module_from_row(row: &PgRow) -> Result<Module> {
    Ok(Module {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        ranking: row.try_get("ranking")?,
        hashtags: row.try_get("hashtags")?,
        category_id: row.try_get("category_id")?,
        free: row.try_get("free")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        category: None,
        quizzes: Vec::new(),
        files: Vec::new(),
        learning_outcomes: Vec::new(),
        supporting_material: Vec::new(),
    })
}

fn quiz_from_row(row: &PgRow) -> Result<Quiz> {
    Ok(Quiz {
        id: row.try_get("id")?,
        module_id: row.try_get("module_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        passing_grade: row.try_get("passing_grade")?,
        is_active: row.try_get("is_active")?,
        questions: Vec::new(),
    })
}

fn referral_from_row(row: &PgRow) -> Result<ReferralCode> {
    let referral_type: String = row.try_get("referral_type")?;

    Ok(ReferralCode {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        referral_code: row.try_get("referral_code")?,
        referral_type: referral_type.parse::<ReferralType>().map_err(|e| anyhow!(e))?,
        value: row.try_get("value")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn waitlist_from_row(row: &PgRow) -> Result<WaitlistItem> {
    Ok(WaitlistItem {
        id: row.try_get("id")?,
        email_address: row.try_get("email_address")?,
        owner_waitlist_code: row.try_get("owner_waitlist_code")?,
        user_id: row.try_get("user_id")?,
        original_referral_code_id: row.try_get("original_referral_code_id")?,
        original_waitlist_code_id: row.try_get("original_waitlist_code_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn email_from_row(row: &PgRow) -> Result<OutboxEmail> {
    let template_vars: String = row.try_get("template_vars")?;
    let email_type: String = row.try_get("email_type")?;
    let status: String = row.try_get("status")?;

    Ok(OutboxEmail {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        email_address: row.try_get("email_address")?,
        template_name: row.try_get("template_name")?,
        template_vars: serde_json::from_str(&template_vars)
            .context("failed to decode template vars")?,
        email_type: email_type.parse().map_err(|e: String| anyhow!(e))?,
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get("sent_at")?,
    })
}

impl PgTx {
    async fn user_where(&mut self, filter: &str, bind: UserKey<'_>) -> Result<Option<User>> {
        let query = format!("{USER_SELECT} WHERE {filter}");
        let statement = sqlx::query(&query);
        let statement = match bind {
            UserKey::Email(email) => statement.bind(email),
            UserKey::Id(id) => statement.bind(id),
        };

        let row = statement
            .fetch_optional(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup user")?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn modules_where(&mut self, filter: &str, bind: ModuleKey<'_>) -> Result<Vec<Module>> {
        let query = format!("{MODULE_SELECT} {filter} ORDER BY ranking, id");
        let statement = sqlx::query(&query);
        let statement = match bind {
            ModuleKey::None => statement,
            ModuleKey::Ids(ids) => statement.bind(ids),
            ModuleKey::Search(term) => statement.bind(term),
        };

        let rows = statement
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to load modules")?;

        rows.iter().map(module_from_row).collect()
    }

    async fn attach_questions(&mut self, mut quizzes: Vec<Quiz>) -> Result<Vec<Quiz>> {
        if quizzes.is_empty() {
            return Ok(quizzes);
        }
        let quiz_ids: Vec<i64> = quizzes.iter().map(|quiz| quiz.id).collect();

        let query = r"
            SELECT id, quiz_id, name, description, ranking, answer_option_ranking
            FROM ggwp.quiz_questions
            WHERE quiz_id = ANY($1)
            ORDER BY ranking, id
        ";
        let rows = sqlx::query(query)
            .bind(&quiz_ids)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load quiz questions")?;

        let mut questions = Vec::with_capacity(rows.len());
        for row in &rows {
            questions.push(Question {
                id: row.try_get("id")?,
                quiz_id: row.try_get("quiz_id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                ranking: row.try_get("ranking")?,
                answer_option_ranking: row.try_get("answer_option_ranking")?,
                options: Vec::new(),
            });
        }

        let question_ids: Vec<i64> = questions.iter().map(|question| question.id).collect();
        let query = r"
            SELECT id, quiz_question_id, name, description, ranking
            FROM ggwp.quiz_question_options
            WHERE quiz_question_id = ANY($1)
            ORDER BY ranking, id
        ";
        let rows = sqlx::query(query)
            .bind(&question_ids)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load question options")?;

        let mut options: HashMap<i64, Vec<QuestionOption>> = HashMap::new();
        for row in &rows {
            let option = QuestionOption {
                id: row.try_get("id")?,
                quiz_question_id: row.try_get("quiz_question_id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                ranking: row.try_get("ranking")?,
            };
            options.entry(option.quiz_question_id).or_default().push(option);
        }

        let mut by_quiz: HashMap<i64, Vec<Question>> = HashMap::new();
        for mut question in questions {
            question.options = options.remove(&question.id).unwrap_or_default();
            by_quiz.entry(question.quiz_id).or_default().push(question);
        }
        for quiz in &mut quizzes {
            quiz.questions = by_quiz.remove(&quiz.id).unwrap_or_default();
        }

        Ok(quizzes)
    }
}

enum UserKey<'a> {
    Email(&'a str),
    Id(i64),
}

enum ModuleKey<'a> {
    None,
    Ids(&'a [i64]),
    Search(String),
}

#[async_trait]
impl UserRepo for PgTx {
    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>> {
        self.user_where("LOWER(u.email) = LOWER($1)", UserKey::Email(email))
            .await
    }

    async fn user_by_id(&mut self, user_id: i64) -> Result<Option<User>> {
        self.user_where("u.id = $1", UserKey::Id(user_id)).await
    }

    async fn create_user(&mut self, user: &NewUser) -> Result<CreateUserOutcome> {
        let query = r"
            INSERT INTO ggwp.users
                (email, password_hash, user_type, last_online)
            VALUES ($1, $2, 'player', NOW())
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(&user.email)
            .bind(&user.password_hash)
            .fetch_one(&mut *self.tx)
            .instrument(db_span("INSERT", query))
            .await;

        let user_id: i64 = match row {
            Ok(row) => row.try_get("id")?,
            Err(err) => {
                if is_unique_violation(&err) {
                    return Ok(CreateUserOutcome::Conflict);
                }
                return Err(err).context("failed to insert user");
            }
        };

        let query = r"
            INSERT INTO ggwp.players
                (user_id, first_name, last_name)
            VALUES ($1, $2, $3)
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .execute(&mut *self.tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert player")?;

        let created = self
            .user_by_id(user_id)
            .await?
            .ok_or_else(|| anyhow!("user {user_id} vanished after insert"))?;

        Ok(CreateUserOutcome::Created(created))
    }

    async fn update_password(&mut self, user_id: i64, password_hash: &str) -> Result<()> {
        let query = r"
            UPDATE ggwp.users
            SET password_hash = $2, updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(password_hash)
            .execute(&mut *self.tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update password")?;

        Ok(())
    }

    async fn touch_last_online(&mut self, user_id: i64) -> Result<()> {
        let query = "UPDATE ggwp.users SET last_online = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *self.tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update last online")?;

        Ok(())
    }

    async fn update_profile(&mut self, user_id: i64, update: &ProfileUpdate) -> Result<()> {
        let query = r"
            UPDATE ggwp.users
            SET
                email = COALESCE(NULLIF($2, ''), email),
                about = COALESCE(NULLIF($3, ''), about),
                date_of_birth = COALESCE($4, date_of_birth),
                phone = COALESCE($5, phone),
                location = COALESCE(NULLIF($6, ''), location),
                sports = COALESCE(NULLIF($7, ''), sports),
                hashtags = COALESCE(NULLIF($8, ''), hashtags),
                updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(&update.email)
            .bind(&update.about)
            .bind(update.date_of_birth)
            .bind(update.phone)
            .bind(&update.location)
            .bind(&update.sports)
            .bind(&update.hashtags)
            .execute(&mut *self.tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update user")?;

        let query = r"
            UPDATE ggwp.players
            SET
                first_name = COALESCE(NULLIF($2, ''), first_name),
                last_name = COALESCE(NULLIF($3, ''), last_name),
                gender = COALESCE(NULLIF($4, ''), gender),
                updated_at = NOW()
            WHERE user_id = $1
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(&update.first_name)
            .bind(&update.last_name)
            .bind(&update.gender)
            .execute(&mut *self.tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update player")?;

        Ok(())
    }

    async fn insert_social_token(
        &mut self,
        user_id: i64,
        credentials: &SocialCredentials,
    ) -> Result<()> {
        let query = r"
            INSERT INTO ggwp.social
                (user_id, access_token, access_secret, social_network)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(&credentials.access_token)
            .bind(&credentials.access_secret)
            .bind(credentials.network.as_str())
            .execute(&mut *self.tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert social token")?;

        Ok(())
    }

    async fn update_social_token(
        &mut self,
        user_id: i64,
        credentials: &SocialCredentials,
    ) -> Result<()> {
        let query = r"
            UPDATE ggwp.social
            SET access_token = $2, access_secret = $3, updated_at = NOW()
            WHERE user_id = $1 AND social_network = $4
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(&credentials.access_token)
            .bind(&credentials.access_secret)
            .bind(credentials.network.as_str())
            .execute(&mut *self.tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update social token")?;

        // accounts created with a password get their first social token here
        if result.rows_affected() == 0 {
            self.insert_social_token(user_id, credentials).await?;
        }

        Ok(())
    }

    async fn password_resets(&mut self, user_id: i64) -> Result<Vec<PasswordReset>> {
        let query = r"
            SELECT id, user_id, token, created_at
            FROM ggwp.user_password_reset
            WHERE user_id = $1
            ORDER BY created_at DESC
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load password resets")?;

        rows.iter().map(reset_from_row).collect()
    }

    async fn password_reset(&mut self, user_id: i64, token: &str) -> Result<Option<PasswordReset>> {
        let query = r"
            SELECT id, user_id, token, created_at
            FROM ggwp.user_password_reset
            WHERE user_id = $1 AND token = $2
            ORDER BY created_at DESC
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(token)
            .fetch_optional(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup password reset")?;

        row.as_ref().map(reset_from_row).transpose()
    }

    async fn create_password_reset(&mut self, user_id: i64, token: &str) -> Result<PasswordReset> {
        let query = r"
            INSERT INTO ggwp.user_password_reset
                (user_id, token)
            VALUES ($1, $2)
            RETURNING id, user_id, token, created_at
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(token)
            .fetch_one(&mut *self.tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert password reset")?;

        reset_from_row(&row)
    }

    async fn goals(&mut self, user_id: i64) -> Result<Vec<UserGoal>> {
        let query = format!(
            "SELECT {GOAL_COLUMNS} FROM ggwp.user_goals WHERE user_id = $1 AND is_active ORDER BY id"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to load goals")?;

        rows.iter().map(goal_from_row).collect()
    }

    async fn create_goal(&mut self, user_id: i64, goal: &NewGoal) -> Result<UserGoal> {
        let query = format!(
            r"
            INSERT INTO ggwp.user_goals
                (user_id, description, value, rate, deadline)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {GOAL_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(&goal.description)
            .bind(goal.value)
            .bind(&goal.rate)
            .bind(goal.deadline)
            .fetch_one(&mut *self.tx)
            .instrument(db_span("INSERT", &query))
            .await
            .context("failed to insert goal")?;

        goal_from_row(&row)
    }

    async fn set_goal_completed(
        &mut self,
        user_id: i64,
        goal_id: i64,
        completed: bool,
    ) -> Result<bool> {
        let query = r"
            UPDATE ggwp.user_goals
            SET
                completed_at = CASE WHEN $3 THEN NOW() ELSE NULL END,
                updated_at = NOW()
            WHERE id = $1 AND user_id = $2
        ";
        let result = sqlx::query(query)
            .bind(goal_id)
            .bind(user_id)
            .bind(completed)
            .execute(&mut *self.tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update goal")?;

        Ok(result.rows_affected() > 0)
    }

    async fn goal_templates(&mut self) -> Result<Vec<GoalTemplate>> {
        let query = r"
            SELECT id, name, quantitative, is_active
            FROM ggwp.user_goal_templates
            WHERE is_active
            ORDER BY id
        ";
        let rows = sqlx::query(query)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load goal templates")?;

        rows.iter()
            .map(|row| {
                Ok(GoalTemplate {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    quantitative: row.try_get("quantitative")?,
                    is_active: row.try_get("is_active")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl LearningRepo for PgTx {
    async fn learning_progress(
        &mut self,
        user_id: Option<i64>,
        device_unique_id: &str,
    ) -> Result<Vec<LearningProgress>> {
        let query = r"
            SELECT
                id, user_id, device_unique_id, module_id, module_file_ranking,
                COALESCE(seek, 0)::float8 AS seek, created_at
            FROM ggwp.learning_progresses
            WHERE
                ($1::bigint IS NOT NULL AND user_id = $1)
                OR ($2 <> '' AND device_unique_id = $2)
            ORDER BY created_at, id
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .bind(device_unique_id)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load learning progress")?;

        rows.iter().map(progress_from_row).collect()
    }

    async fn record_progress(&mut self, progress: &NewLearningProgress) -> Result<()> {
        let query = r"
            INSERT INTO ggwp.learning_progresses
                (user_id, device_unique_id, module_id, module_file_ranking, seek)
            VALUES ($1, $2, $3, $4, $5)
        ";
        sqlx::query(query)
            .bind(progress.user_id)
            .bind(&progress.device_unique_id)
            .bind(progress.module_id)
            .bind(progress.module_file_ranking)
            .bind(progress.seek)
            .execute(&mut *self.tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert learning progress")?;

        Ok(())
    }

    async fn quiz_gradings(&mut self, user_id: i64) -> Result<Vec<QuizGrading>> {
        let query = format!(
            "SELECT {GRADING_COLUMNS} FROM ggwp.quiz_gradings WHERE user_id = $1 ORDER BY id"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to load quiz gradings")?;

        rows.iter().map(grading_from_row).collect()
    }

    async fn completed_module_ids(&mut self, user_id: i64) -> Result<Vec<i64>> {
        let query = r"
            SELECT DISTINCT module_id
            FROM ggwp.quiz_gradings
            WHERE user_id = $1
            ORDER BY module_id
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load completed modules")?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("module_id").map_err(Into::into))
            .collect()
    }

    async fn latest_take_number(
        &mut self,
        user_id: i64,
        module_id: i64,
        quiz_id: i64,
    ) -> Result<Option<i32>> {
        let query = r"
            SELECT MAX(take_number) AS take_number
            FROM ggwp.quiz_gradings
            WHERE user_id = $1 AND module_id = $2 AND quiz_id = $3
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(module_id)
            .bind(quiz_id)
            .fetch_one(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load latest quiz take")?;

        Ok(row.try_get("take_number")?)
    }

    async fn insert_gradings(&mut self, gradings: &[NewQuizGrading]) -> Result<Vec<QuizGrading>> {
        let query = format!(
            r"
            INSERT INTO ggwp.quiz_gradings
                (module_id, quiz_id, question_id, user_id, user_answer_ranking, correct, take_number)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {GRADING_COLUMNS}
            "
        );

        let mut inserted = Vec::with_capacity(gradings.len());
        for grading in gradings {
            let row = sqlx::query(&query)
                .bind(grading.module_id)
                .bind(grading.quiz_id)
                .bind(grading.question_id)
                .bind(grading.user_id)
                .bind(grading.user_answer_ranking)
                .bind(grading.correct)
                .bind(grading.take_number)
                .fetch_one(&mut *self.tx)
                .instrument(db_span("INSERT", &query))
                .await
                .context("failed to insert quiz grading")?;
            inserted.push(grading_from_row(&row)?);
        }

        Ok(inserted)
    }

    async fn quiz_with_questions(&mut self, quiz_id: i64) -> Result<Option<Quiz>> {
        let query = r"
            SELECT id, module_id, name, description, passing_grade::float8 AS passing_grade, is_active
            FROM ggwp.quizzes
            WHERE id = $1
        ";
        let row = sqlx::query(query)
            .bind(quiz_id)
            .fetch_optional(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup quiz")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let quiz = quiz_from_row(&row)?;

        Ok(self.attach_questions(vec![quiz]).await?.into_iter().next())
    }

    async fn module_by_id(&mut self, module_id: i64) -> Result<Option<Module>> {
        let ids = [module_id];
        Ok(self
            .modules_where("WHERE id = ANY($1)", ModuleKey::Ids(&ids))
            .await?
            .into_iter()
            .next())
    }

    async fn first_file_of_module_ranked(&mut self, ranking: i32) -> Result<Option<ModuleFile>> {
        let query = r"
            SELECT mf.id, mf.module_id, mf.file_id, mf.ranking
            FROM ggwp.modules m
            JOIN ggwp.module_files mf ON mf.module_id = m.id
            WHERE m.ranking = $1
            ORDER BY mf.id
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(ranking)
            .fetch_optional(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup next module file")?;

        row.map(|row| {
            Ok(ModuleFile {
                id: row.try_get("id")?,
                module_id: row.try_get("module_id")?,
                file_id: row.try_get("file_id")?,
                ranking: row.try_get("ranking")?,
            })
        })
        .transpose()
    }

    async fn active_modules(&mut self) -> Result<Vec<Module>> {
        self.modules_where("WHERE is_active", ModuleKey::None).await
    }

    async fn modules_by_ids(&mut self, ids: &[i64]) -> Result<Vec<Module>> {
        self.modules_where("WHERE id = ANY($1)", ModuleKey::Ids(ids))
            .await
    }

    async fn search_modules(&mut self, query: &str) -> Result<Vec<Module>> {
        self.modules_where(
            "WHERE (name ILIKE $1 OR description ILIKE $1) AND is_active",
            ModuleKey::Search(format!("%{query}%")),
        )
        .await
    }

    async fn with_module_details(&mut self, mut modules: Vec<Module>) -> Result<Vec<Module>> {
        if modules.is_empty() {
            return Ok(modules);
        }
        let module_ids: Vec<i64> = modules.iter().map(|module| module.id).collect();
        let category_ids: Vec<i64> = modules.iter().filter_map(|module| module.category_id).collect();

        let query = r"
            SELECT id, name, description
            FROM ggwp.module_categories
            WHERE id = ANY($1)
        ";
        let rows = sqlx::query(query)
            .bind(&category_ids)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load module categories")?;
        let mut categories = HashMap::new();
        for row in &rows {
            let category = ModuleCategory {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
            };
            categories.insert(category.id, category);
        }

        let query = r"
            SELECT id, module_id, name, description, passing_grade::float8 AS passing_grade, is_active
            FROM ggwp.quizzes
            WHERE module_id = ANY($1) AND is_active
            ORDER BY id
        ";
        let rows = sqlx::query(query)
            .bind(&module_ids)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load module quizzes")?;
        let quizzes = rows.iter().map(quiz_from_row).collect::<Result<Vec<_>>>()?;
        let quizzes = self.attach_questions(quizzes).await?;

        let query = r"
            SELECT id, module_id, file_id, ranking
            FROM ggwp.module_files
            WHERE module_id = ANY($1)
            ORDER BY ranking, id
        ";
        let rows = sqlx::query(query)
            .bind(&module_ids)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load module files")?;
        let mut files: HashMap<i64, Vec<ModuleFile>> = HashMap::new();
        for row in &rows {
            let file = ModuleFile {
                id: row.try_get("id")?,
                module_id: row.try_get("module_id")?,
                file_id: row.try_get("file_id")?,
                ranking: row.try_get("ranking")?,
            };
            files.entry(file.module_id).or_default().push(file);
        }

        let query = r"
            SELECT id, module_id, description, ranking
            FROM ggwp.module_learning_outcomes
            WHERE module_id = ANY($1) AND is_active
            ORDER BY ranking, id
        ";
        let rows = sqlx::query(query)
            .bind(&module_ids)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load learning outcomes")?;
        let mut outcomes: HashMap<i64, Vec<LearningOutcome>> = HashMap::new();
        for row in &rows {
            let outcome = LearningOutcome {
                id: row.try_get("id")?,
                module_id: row.try_get("module_id")?,
                description: row.try_get("description")?,
                ranking: row.try_get("ranking")?,
            };
            outcomes.entry(outcome.module_id).or_default().push(outcome);
        }

        let query = r"
            SELECT id, module_id, name, description, url
            FROM ggwp.module_supporting_material
            WHERE module_id = ANY($1) AND is_active
            ORDER BY id
        ";
        let rows = sqlx::query(query)
            .bind(&module_ids)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load supporting material")?;
        let mut material: HashMap<i64, Vec<SupportingMaterial>> = HashMap::new();
        for row in &rows {
            let item = SupportingMaterial {
                id: row.try_get("id")?,
                module_id: row.try_get("module_id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                url: row.try_get("url")?,
            };
            material.entry(item.module_id).or_default().push(item);
        }

        let mut quizzes_by_module: HashMap<i64, Vec<Quiz>> = HashMap::new();
        for quiz in quizzes {
            quizzes_by_module.entry(quiz.module_id).or_default().push(quiz);
        }

        for module in &mut modules {
            module.category = module
                .category_id
                .and_then(|id| categories.get(&id).cloned());
            module.quizzes = quizzes_by_module.remove(&module.id).unwrap_or_default();
            module.files = files.remove(&module.id).unwrap_or_default();
            module.learning_outcomes = outcomes.remove(&module.id).unwrap_or_default();
            module.supporting_material = material.remove(&module.id).unwrap_or_default();
        }

        Ok(modules)
    }

    async fn module_participants(&mut self) -> Result<HashMap<i64, i64>> {
        let query = r"
            SELECT m.id AS module_id, COUNT(DISTINCT lp.user_id) AS participants
            FROM ggwp.modules m
            LEFT OUTER JOIN ggwp.learning_progresses lp ON lp.module_id = m.id
            WHERE m.is_active
            GROUP BY m.id
        ";
        let rows = sqlx::query(query)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to count module participants")?;

        let mut participants = HashMap::with_capacity(rows.len());
        for row in &rows {
            participants.insert(row.try_get("module_id")?, row.try_get("participants")?);
        }

        Ok(participants)
    }
}

#[async_trait]
impl CodeRepo for PgTx {
    async fn referral_code_by_user(&mut self, user_id: i64) -> Result<Option<ReferralCode>> {
        let query = format!("SELECT {REFERRAL_COLUMNS} FROM ggwp.referral_codes WHERE user_id = $1");
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup referral code by user")?;

        row.as_ref().map(referral_from_row).transpose()
    }

    async fn referral_code_by_code(&mut self, code: &str) -> Result<Option<ReferralCode>> {
        let query =
            format!("SELECT {REFERRAL_COLUMNS} FROM ggwp.referral_codes WHERE referral_code = $1");
        let row = sqlx::query(&query)
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup referral code")?;

        row.as_ref().map(referral_from_row).transpose()
    }

    async fn create_referral_code(
        &mut self,
        user_id: i64,
        code: &str,
        referral_type: ReferralType,
        value: i32,
    ) -> Result<ReferralCode> {
        let query = format!(
            r"
            INSERT INTO ggwp.referral_codes
                (user_id, referral_code, referral_type, value)
            VALUES ($1, $2, $3, $4)
            RETURNING {REFERRAL_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(code)
            .bind(referral_type.as_str())
            .bind(value)
            .fetch_one(&mut *self.tx)
            .instrument(db_span("INSERT", &query))
            .await
            .context("failed to insert referral code")?;

        referral_from_row(&row)
    }

    async fn referral_redemptions(&mut self, referral_code_id: i64) -> Result<i64> {
        let query = r"
            SELECT COUNT(*) AS redemptions
            FROM ggwp.referral_redemptions
            WHERE referral_code_id = $1
        ";
        let row = sqlx::query(query)
            .bind(referral_code_id)
            .fetch_one(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to count referral redemptions")?;

        Ok(row.try_get("redemptions")?)
    }

    async fn insert_referral_redemption(
        &mut self,
        referral_code_id: i64,
        referral_user_id: i64,
    ) -> Result<()> {
        let query = r"
            INSERT INTO ggwp.referral_redemptions
                (referral_code_id, referral_user_id)
            VALUES ($1, $2)
        ";
        sqlx::query(query)
            .bind(referral_code_id)
            .bind(referral_user_id)
            .execute(&mut *self.tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert referral redemption")?;

        Ok(())
    }

    async fn users_missing_referral_codes(&mut self) -> Result<Vec<i64>> {
        let query = r"
            SELECT u.id
            FROM ggwp.users u
            LEFT JOIN ggwp.referral_codes r ON r.user_id = u.id
            WHERE r.id IS NULL
            ORDER BY u.id
        ";
        let rows = sqlx::query(query)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load users missing referral codes")?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(Into::into))
            .collect()
    }

    async fn create_waitlist_item(&mut self, item: &NewWaitlistItem) -> Result<WaitlistOutcome> {
        let query = format!(
            r"
            INSERT INTO ggwp.waitlist
                (email_address, owner_waitlist_code, original_referral_code_id,
                 original_waitlist_code_id)
            VALUES ($1, $2, $3, $4)
            RETURNING {WAITLIST_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(&item.email_address)
            .bind(&item.owner_waitlist_code)
            .bind(item.original_referral_code_id)
            .bind(item.original_waitlist_code_id)
            .fetch_one(&mut *self.tx)
            .instrument(db_span("INSERT", &query))
            .await;

        match row {
            Ok(row) => Ok(WaitlistOutcome::Created(waitlist_from_row(&row)?)),
            Err(err) if is_unique_violation(&err) => Ok(WaitlistOutcome::Duplicate),
            Err(err) => Err(err).context("failed to insert waitlist item"),
        }
    }

    async fn waitlist(&mut self) -> Result<Vec<WaitlistItem>> {
        let query = r"
            SELECT
                id, NULL::text AS email_address, owner_waitlist_code, NULL::bigint AS user_id,
                original_referral_code_id, original_waitlist_code_id, created_at
            FROM ggwp.waitlist
            WHERE owner_waitlist_code IS NOT NULL
            ORDER BY created_at, id
        ";
        let rows = sqlx::query(query)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load waitlist")?;

        rows.iter().map(waitlist_from_row).collect()
    }

    async fn waitlist_item_by_code(&mut self, code: &str) -> Result<Option<WaitlistItem>> {
        let query =
            format!("SELECT {WAITLIST_COLUMNS} FROM ggwp.waitlist WHERE owner_waitlist_code = $1");
        let row = sqlx::query(&query)
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup waitlist item")?;

        row.as_ref().map(waitlist_from_row).transpose()
    }

    async fn link_waitlist_user(&mut self, user_id: i64, email: &str) -> Result<()> {
        let mut savepoint = Connection::begin(&mut *self.tx)
            .await
            .context("failed to open savepoint")?;

        let query = r"
            UPDATE ggwp.waitlist
            SET user_id = $1, updated_at = NOW()
            WHERE LOWER(email_address) = LOWER($2)
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(email)
            .execute(&mut *savepoint)
            .instrument(db_span("UPDATE", query))
            .await;

        match result {
            Ok(_) => savepoint.commit().await.context("failed to release savepoint"),
            Err(err) => {
                savepoint
                    .rollback()
                    .await
                    .context("failed to rollback savepoint")?;
                Err(err).context("failed to link waitlist user")
            }
        }
    }

    async fn emails_missing_waitlist_codes(&mut self) -> Result<Vec<String>> {
        let query = r"
            SELECT email_address
            FROM ggwp.waitlist
            WHERE owner_waitlist_code IS NULL
            ORDER BY created_at
        ";
        let rows = sqlx::query(query)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load waitlist emails missing codes")?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("email_address").map_err(Into::into))
            .collect()
    }

    async fn set_waitlist_code(&mut self, email: &str, code: &str) -> Result<()> {
        let query = r"
            UPDATE ggwp.waitlist
            SET owner_waitlist_code = $2, updated_at = NOW()
            WHERE email_address = $1 AND owner_waitlist_code IS NULL
        ";
        sqlx::query(query)
            .bind(email)
            .bind(code)
            .execute(&mut *self.tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update waitlist code")?;

        Ok(())
    }

    async fn waitlist_items_without_email(
        &mut self,
        email_type: EmailType,
    ) -> Result<Vec<WaitlistItem>> {
        let query = r"
            SELECT
                w.id, w.email_address, w.owner_waitlist_code, w.user_id,
                w.original_referral_code_id, w.original_waitlist_code_id, w.created_at
            FROM ggwp.waitlist w
            LEFT JOIN ggwp.emails e
                ON e.email_address = w.email_address AND e.type = $1
            WHERE e.email_address IS NULL AND w.owner_waitlist_code IS NOT NULL
            ORDER BY w.created_at
        ";
        let rows = sqlx::query(query)
            .bind(email_type.as_str())
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load waitlist items without email")?;

        rows.iter().map(waitlist_from_row).collect()
    }
}

#[async_trait]
impl EmailRepo for PgTx {
    async fn enqueue_email(&mut self, email: &NewEmail) -> Result<()> {
        let template_vars =
            serde_json::to_string(&email.template_vars).context("failed to encode template vars")?;

        let query = r"
            INSERT INTO ggwp.emails
                (user_id, email_address, template_name, template_vars, type, status)
            VALUES ($1, $2, $3, $4::jsonb, $5, $6)
        ";
        sqlx::query(query)
            .bind(email.user_id)
            .bind(&email.email_address)
            .bind(&email.template_name)
            .bind(template_vars)
            .bind(email.email_type.as_str())
            .bind(email.status.as_str())
            .execute(&mut *self.tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to enqueue email")?;

        Ok(())
    }

    async fn pending_emails(&mut self) -> Result<Vec<OutboxEmail>> {
        let query = r"
            SELECT
                id, user_id, email_address, template_name, template_vars::text AS template_vars,
                type AS email_type, status, created_at, sent_at
            FROM ggwp.emails
            WHERE status = 'PENDING'
            ORDER BY created_at, id
        ";
        let rows = sqlx::query(query)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load pending emails")?;

        rows.iter().map(email_from_row).collect()
    }

    async fn mark_email_sent(&mut self, email_id: i64) -> Result<()> {
        let query = r"
            UPDATE ggwp.emails
            SET status = 'SENT', sent_at = NOW(), updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(email_id)
            .execute(&mut *self.tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to mark email sent")?;

        Ok(())
    }
}

//! Persistence boundary.
//!
//! Every multi-step workflow runs against one [`Transaction`] obtained from a
//! [`Store`]. Dropping a transaction without calling `commit` discards its writes.
//! The Postgres adapter opens transactions at `REPEATABLE READ`; an in-memory
//! adapter with failure injection backs the unit tests.

use crate::api::models::{
    EmailStatus, EmailType, GoalTemplate, LearningProgress, Module, ModuleFile, OutboxEmail,
    PasswordReset, QuizGrading, Quiz, ReferralCode, ReferralType, SocialNetwork, User, UserGoal,
    WaitlistItem,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use self::postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Open a new unit of work.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Cheap connectivity check used by the health endpoint.
    async fn ping(&self) -> Result<()>;
}

/// A unit of work over every repository.
#[async_trait]
pub trait Transaction: UserRepo + LearningRepo + CodeRepo + EmailRepo + Send {
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
}

/// Outcome when attempting to create a new account.
#[derive(Debug)]
pub enum CreateUserOutcome {
    Created(User),
    Conflict,
}

/// Partial profile update; `None` and empty strings leave the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub about: Option<String>,
    pub date_of_birth: Option<DateTime<Utc>>,
    pub phone: Option<i64>,
    pub location: Option<String>,
    pub sports: Option<String>,
    pub hashtags: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SocialCredentials {
    pub network: SocialNetwork,
    pub access_token: String,
    pub access_secret: Option<String>,
}

#[async_trait]
pub trait UserRepo: Send {
    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>>;

    async fn user_by_id(&mut self, user_id: i64) -> Result<Option<User>>;

    /// Insert the user and its player row. A duplicate e-mail yields `Conflict`.
    async fn create_user(&mut self, user: &NewUser) -> Result<CreateUserOutcome>;

    async fn update_password(&mut self, user_id: i64, password_hash: &str) -> Result<()>;

    async fn touch_last_online(&mut self, user_id: i64) -> Result<()>;

    async fn update_profile(&mut self, user_id: i64, update: &ProfileUpdate) -> Result<()>;

    async fn insert_social_token(&mut self, user_id: i64, credentials: &SocialCredentials)
        -> Result<()>;

    async fn update_social_token(&mut self, user_id: i64, credentials: &SocialCredentials)
        -> Result<()>;

    async fn password_resets(&mut self, user_id: i64) -> Result<Vec<PasswordReset>>;

    async fn password_reset(&mut self, user_id: i64, token: &str) -> Result<Option<PasswordReset>>;

    async fn create_password_reset(&mut self, user_id: i64, token: &str) -> Result<PasswordReset>;

    async fn goals(&mut self, user_id: i64) -> Result<Vec<UserGoal>>;

    async fn create_goal(&mut self, user_id: i64, goal: &NewGoal) -> Result<UserGoal>;

    /// Returns `false` when the goal does not belong to the user.
    async fn set_goal_completed(&mut self, user_id: i64, goal_id: i64, completed: bool)
        -> Result<bool>;

    async fn goal_templates(&mut self) -> Result<Vec<GoalTemplate>>;
}

#[derive(Debug, Clone)]
pub struct NewGoal {
    pub description: String,
    pub value: f64,
    pub rate: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewLearningProgress {
    pub user_id: Option<i64>,
    pub device_unique_id: Option<String>,
    pub module_id: i64,
    pub module_file_ranking: i32,
    pub seek: f64,
}

#[derive(Debug, Clone)]
pub struct NewQuizGrading {
    pub module_id: i64,
    pub quiz_id: i64,
    pub question_id: i64,
    pub user_id: i64,
    pub user_answer_ranking: i32,
    pub correct: bool,
    pub take_number: i32,
}

#[async_trait]
pub trait LearningRepo: Send {
    /// Progress rows owned by the user or recorded from the device.
    /// An empty device id only matches by user.
    async fn learning_progress(
        &mut self,
        user_id: Option<i64>,
        device_unique_id: &str,
    ) -> Result<Vec<LearningProgress>>;

    async fn record_progress(&mut self, progress: &NewLearningProgress) -> Result<()>;

    async fn quiz_gradings(&mut self, user_id: i64) -> Result<Vec<QuizGrading>>;

    async fn completed_module_ids(&mut self, user_id: i64) -> Result<Vec<i64>>;

    async fn latest_take_number(
        &mut self,
        user_id: i64,
        module_id: i64,
        quiz_id: i64,
    ) -> Result<Option<i32>>;

    async fn insert_gradings(&mut self, gradings: &[NewQuizGrading]) -> Result<Vec<QuizGrading>>;

    async fn quiz_with_questions(&mut self, quiz_id: i64) -> Result<Option<Quiz>>;

    async fn module_by_id(&mut self, module_id: i64) -> Result<Option<Module>>;

    /// First file (lowest id) of the module holding `ranking`.
    async fn first_file_of_module_ranked(&mut self, ranking: i32) -> Result<Option<ModuleFile>>;

    async fn active_modules(&mut self) -> Result<Vec<Module>>;

    async fn modules_by_ids(&mut self, ids: &[i64]) -> Result<Vec<Module>>;

    async fn search_modules(&mut self, query: &str) -> Result<Vec<Module>>;

    /// Attach category, quizzes, files, outcomes and material to bare modules.
    async fn with_module_details(&mut self, modules: Vec<Module>) -> Result<Vec<Module>>;

    async fn module_participants(&mut self) -> Result<HashMap<i64, i64>>;
}

#[derive(Debug, Clone)]
pub struct NewWaitlistItem {
    pub email_address: String,
    pub owner_waitlist_code: String,
    pub original_referral_code_id: Option<i64>,
    pub original_waitlist_code_id: Option<i64>,
}

#[derive(Debug)]
pub enum WaitlistOutcome {
    Created(WaitlistItem),
    Duplicate,
}

#[async_trait]
pub trait CodeRepo: Send {
    async fn referral_code_by_user(&mut self, user_id: i64) -> Result<Option<ReferralCode>>;

    async fn referral_code_by_code(&mut self, code: &str) -> Result<Option<ReferralCode>>;

    async fn create_referral_code(
        &mut self,
        user_id: i64,
        code: &str,
        referral_type: ReferralType,
        value: i32,
    ) -> Result<ReferralCode>;

    async fn referral_redemptions(&mut self, referral_code_id: i64) -> Result<i64>;

    async fn insert_referral_redemption(
        &mut self,
        referral_code_id: i64,
        referral_user_id: i64,
    ) -> Result<()>;

    async fn users_missing_referral_codes(&mut self) -> Result<Vec<i64>>;

    async fn create_waitlist_item(&mut self, item: &NewWaitlistItem) -> Result<WaitlistOutcome>;

    async fn waitlist(&mut self) -> Result<Vec<WaitlistItem>>;

    async fn waitlist_item_by_code(&mut self, code: &str) -> Result<Option<WaitlistItem>>;

    /// Attach a new account to its waitlist entry. Failures are isolated so the
    /// surrounding transaction stays usable.
    async fn link_waitlist_user(&mut self, user_id: i64, email: &str) -> Result<()>;

    async fn emails_missing_waitlist_codes(&mut self) -> Result<Vec<String>>;

    async fn set_waitlist_code(&mut self, email: &str, code: &str) -> Result<()>;

    async fn waitlist_items_without_email(&mut self, email_type: EmailType)
        -> Result<Vec<WaitlistItem>>;
}

#[derive(Debug, Clone)]
pub struct NewEmail {
    pub user_id: Option<i64>,
    pub email_address: String,
    pub template_name: String,
    pub template_vars: HashMap<String, String>,
    pub email_type: EmailType,
    pub status: EmailStatus,
}

#[async_trait]
pub trait EmailRepo: Send {
    async fn enqueue_email(&mut self, email: &NewEmail) -> Result<()>;

    async fn pending_emails(&mut self) -> Result<Vec<OutboxEmail>>;

    async fn mark_email_sent(&mut self, email_id: i64) -> Result<()>;
}

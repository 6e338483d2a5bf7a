//! In-memory store used by the unit tests.
//!
//! A transaction reads from a private snapshot and logs every write. Commit
//! replays the log onto the shared state, so rows committed by other
//! transactions in the meantime survive, and dropped transactions leave no
//! trace. Ids come from one shared sequence.

use super::{
    CodeRepo, CreateUserOutcome, EmailRepo, LearningRepo, NewEmail, NewGoal, NewLearningProgress,
    NewQuizGrading, NewUser, NewWaitlistItem, ProfileUpdate, SocialCredentials, Store,
    Transaction, UserRepo, WaitlistOutcome,
};
use crate::api::models::{
    EmailStatus, EmailType, GoalTemplate, LearningProgress, Module, ModuleFile, OutboxEmail,
    PasswordReset, Player, Question, Quiz, QuizGrading, ReferralCode, ReferralType, SocialNetwork,
    User, UserGoal, WaitlistItem,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct SocialTokenRow {
    pub user_id: i64,
    pub network: SocialNetwork,
    pub access_token: String,
    pub access_secret: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct State {
    pub users: Vec<User>,
    pub social_tokens: Vec<SocialTokenRow>,
    pub password_resets: Vec<PasswordReset>,
    pub goals: Vec<UserGoal>,
    pub goal_templates: Vec<GoalTemplate>,
    /// Modules carry their quizzes and files inline.
    pub modules: Vec<Module>,
    pub progress: Vec<LearningProgress>,
    pub gradings: Vec<QuizGrading>,
    pub referral_codes: Vec<ReferralCode>,
    pub redemptions: Vec<(i64, i64)>,
    pub waitlist: Vec<WaitlistItem>,
    pub emails: Vec<OutboxEmail>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Operations that can be forced to fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    pub first_file_lookup: bool,
    pub link_waitlist: bool,
    pub insert_social_token: bool,
    /// Fail the outbox insert for this address and poison the transaction.
    pub enqueue_email_to: Option<&'static str>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Mutex<Faults>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutate the committed state directly.
    pub fn update<T>(&self, f: impl FnOnce(&mut State) -> T) -> Result<T> {
        let mut state = self.state.lock().map_err(|_| anyhow!("state lock poisoned"))?;
        Ok(f(&mut state))
    }

    pub fn snapshot(&self) -> Result<State> {
        self.update(|state| state.clone())
    }

    pub fn set_faults(&self, faults: Faults) -> Result<()> {
        let mut current = self.faults.lock().map_err(|_| anyhow!("faults lock poisoned"))?;
        *current = faults;
        Ok(())
    }

    /// Allocate an id from the shared sequence.
    pub fn next_id(&self) -> Result<i64> {
        self.update(State::next_id)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let working = self.snapshot()?;
        let faults = *self.faults.lock().map_err(|_| anyhow!("faults lock poisoned"))?;

        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.state),
            working,
            changes: Vec::new(),
            aborted: false,
            faults,
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

type Change = Box<dyn Fn(&mut State) + Send + Sync>;

pub struct MemoryTx {
    shared: Arc<Mutex<State>>,
    working: State,
    changes: Vec<Change>,
    /// Set by a failed statement; commit then rolls back, as Postgres does.
    aborted: bool,
    faults: Faults,
}

impl MemoryTx {
    /// Apply a write to the snapshot and keep it for commit.
    fn write(&mut self, change: impl Fn(&mut State) + Send + Sync + 'static) {
        change(&mut self.working);
        self.changes.push(Box::new(change));
    }

    fn next_id(&self) -> Result<i64> {
        let mut shared = self.shared.lock().map_err(|_| anyhow!("state lock poisoned"))?;
        Ok(shared.next_id())
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        if self.aborted {
            return Ok(());
        }
        let mut shared = self.shared.lock().map_err(|_| anyhow!("state lock poisoned"))?;
        for change in &self.changes {
            change(&mut shared);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

fn apply_profile_update(user: &mut User, update: &ProfileUpdate, now: DateTime<Utc>) {
    if let Some(email) = non_empty(update.email.as_ref()) {
        user.email = email;
    }
    if let Some(about) = non_empty(update.about.as_ref()) {
        user.about = Some(about);
    }
    if update.date_of_birth.is_some() {
        user.date_of_birth = update.date_of_birth;
    }
    if update.phone.is_some() {
        user.phone = update.phone;
    }
    if let Some(location) = non_empty(update.location.as_ref()) {
        user.location = Some(location);
    }
    if let Some(sports) = non_empty(update.sports.as_ref()) {
        user.sports = Some(sports);
    }
    if let Some(hashtags) = non_empty(update.hashtags.as_ref()) {
        user.hashtags = Some(hashtags);
    }
    if let Some(player) = user.player.as_mut() {
        if let Some(first_name) = non_empty(update.first_name.as_ref()) {
            player.first_name = first_name;
        }
        if let Some(last_name) = non_empty(update.last_name.as_ref()) {
            player.last_name = last_name;
        }
        if let Some(gender) = non_empty(update.gender.as_ref()) {
            player.gender = Some(gender);
        }
    }
    user.updated_at = now;
}

#[async_trait]
impl UserRepo for MemoryTx {
    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>> {
        Ok(self
            .working
            .users
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn user_by_id(&mut self, user_id: i64) -> Result<Option<User>> {
        Ok(self.working.users.iter().find(|user| user.id == user_id).cloned())
    }

    async fn create_user(&mut self, user: &NewUser) -> Result<CreateUserOutcome> {
        if self
            .working
            .users
            .iter()
            .any(|existing| existing.email.eq_ignore_ascii_case(&user.email))
        {
            return Ok(CreateUserOutcome::Conflict);
        }

        let now = Utc::now();
        let id = self.next_id()?;
        let player_id = self.next_id()?;
        let created = User {
            id,
            email: user.email.clone(),
            password_hash: Some(user.password_hash.clone()),
            user_type: "player".to_string(),
            user_admin_level: String::new(),
            is_verified: false,
            is_active: true,
            last_online: Some(now),
            about: None,
            date_of_birth: None,
            phone: None,
            location: None,
            sports: None,
            hashtags: None,
            created_at: now,
            updated_at: now,
            player: Some(Player {
                id: player_id,
                user_id: id,
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                gender: None,
                position: None,
            }),
        };
        let row = created.clone();
        self.write(move |state| state.users.push(row.clone()));

        Ok(CreateUserOutcome::Created(created))
    }

    async fn update_password(&mut self, user_id: i64, password_hash: &str) -> Result<()> {
        let password_hash = password_hash.to_string();
        let now = Utc::now();
        self.write(move |state| {
            if let Some(user) = state.users.iter_mut().find(|user| user.id == user_id) {
                user.password_hash = Some(password_hash.clone());
                user.updated_at = now;
            }
        });
        Ok(())
    }

    async fn touch_last_online(&mut self, user_id: i64) -> Result<()> {
        let now = Utc::now();
        self.write(move |state| {
            if let Some(user) = state.users.iter_mut().find(|user| user.id == user_id) {
                user.last_online = Some(now);
            }
        });
        Ok(())
    }

    async fn update_profile(&mut self, user_id: i64, update: &ProfileUpdate) -> Result<()> {
        let update = update.clone();
        let now = Utc::now();
        self.write(move |state| {
            if let Some(user) = state.users.iter_mut().find(|user| user.id == user_id) {
                apply_profile_update(user, &update, now);
            }
        });
        Ok(())
    }


    async fn insert_social_token(
        &mut self,
        user_id: i64,
        credentials: &SocialCredentials,
    ) -> Result<()> {
        if self.faults.insert_social_token {
            bail!("injected failure: insert social token");
        }
        let row = SocialTokenRow {
            user_id,
            network: credentials.network,
            access_token: credentials.access_token.clone(),
            access_secret: credentials.access_secret.clone(),
        };
        self.write(move |state| state.social_tokens.push(row.clone()));
        Ok(())
    }

    async fn update_social_token(
        &mut self,
        user_id: i64,
        credentials: &SocialCredentials,
    ) -> Result<()> {
        let network = credentials.network;
        let exists = self
            .working
            .social_tokens
            .iter()
            .any(|row| row.user_id == user_id && row.network == network);
        if !exists {
            return self.insert_social_token(user_id, credentials).await;
        }

        let access_token = credentials.access_token.clone();
        let access_secret = credentials.access_secret.clone();
        self.write(move |state| {
            for row in &mut state.social_tokens {
                if row.user_id == user_id && row.network == network {
                    row.access_token.clone_from(&access_token);
                    row.access_secret.clone_from(&access_secret);
                }
            }
        });
        Ok(())
    }

    async fn password_resets(&mut self, user_id: i64) -> Result<Vec<PasswordReset>> {
        let mut resets: Vec<PasswordReset> = self
            .working
            .password_resets
            .iter()
            .filter(|reset| reset.user_id == user_id)
            .cloned()
            .collect();
        resets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(resets)
    }

    async fn password_reset(&mut self, user_id: i64, token: &str) -> Result<Option<PasswordReset>> {
        Ok(self
            .password_resets(user_id)
            .await?
            .into_iter()
            .find(|reset| reset.token == token))
    }

    async fn create_password_reset(&mut self, user_id: i64, token: &str) -> Result<PasswordReset> {
        let reset = PasswordReset {
            id: self.next_id()?,
            user_id,
            token: token.to_string(),
            created_at: Utc::now(),
        };
        let row = reset.clone();
        self.write(move |state| state.password_resets.push(row.clone()));
        Ok(reset)
    }

    async fn goals(&mut self, user_id: i64) -> Result<Vec<UserGoal>> {
        Ok(self
            .working
            .goals
            .iter()
            .filter(|goal| goal.user_id == user_id && goal.is_active)
            .cloned()
            .collect())
    }

    async fn create_goal(&mut self, user_id: i64, goal: &NewGoal) -> Result<UserGoal> {
        let created = UserGoal {
            id: self.next_id()?,
            user_id,
            description: goal.description.clone(),
            value: goal.value,
            rate: goal.rate.clone(),
            deadline: goal.deadline,
            completed_at: None,
            is_active: true,
            created_at: Utc::now(),
        };
        let row = created.clone();
        self.write(move |state| state.goals.push(row.clone()));
        Ok(created)
    }

    async fn set_goal_completed(
        &mut self,
        user_id: i64,
        goal_id: i64,
        completed: bool,
    ) -> Result<bool> {
        let owned = self
            .working
            .goals
            .iter()
            .any(|goal| goal.id == goal_id && goal.user_id == user_id);
        if !owned {
            return Ok(false);
        }

        let completed_at = completed.then(Utc::now);
        self.write(move |state| {
            for goal in &mut state.goals {
                if goal.id == goal_id && goal.user_id == user_id {
                    goal.completed_at = completed_at;
                }
            }
        });
        Ok(true)
    }

    async fn goal_templates(&mut self) -> Result<Vec<GoalTemplate>> {
        Ok(self
            .working
            .goal_templates
            .iter()
            .filter(|template| template.is_active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LearningRepo for MemoryTx {
    async fn learning_progress(
        &mut self,
        user_id: Option<i64>,
        device_unique_id: &str,
    ) -> Result<Vec<LearningProgress>> {
        Ok(self
            .working
            .progress
            .iter()
            .filter(|row| {
                (user_id.is_some() && row.user_id == user_id)
                    || (!device_unique_id.is_empty()
                        && row.device_unique_id.as_deref() == Some(device_unique_id))
            })
            .cloned()
            .collect())
    }

    async fn record_progress(&mut self, progress: &NewLearningProgress) -> Result<()> {
        let row = LearningProgress {
            id: self.next_id()?,
            user_id: progress.user_id,
            device_unique_id: progress.device_unique_id.clone(),
            module_id: progress.module_id,
            module_file_ranking: progress.module_file_ranking,
            seek: progress.seek,
            created_at: Utc::now(),
        };
        self.write(move |state| state.progress.push(row.clone()));
        Ok(())
    }

    async fn quiz_gradings(&mut self, user_id: i64) -> Result<Vec<QuizGrading>> {
        Ok(self
            .working
            .gradings
            .iter()
            .filter(|grading| grading.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn completed_module_ids(&mut self, user_id: i64) -> Result<Vec<i64>> {
        let ids: BTreeSet<i64> = self
            .working
            .gradings
            .iter()
            .filter(|grading| grading.user_id == user_id)
            .map(|grading| grading.module_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn latest_take_number(
        &mut self,
        user_id: i64,
        module_id: i64,
        quiz_id: i64,
    ) -> Result<Option<i32>> {
        Ok(self
            .working
            .gradings
            .iter()
            .filter(|g| g.user_id == user_id && g.module_id == module_id && g.quiz_id == quiz_id)
            .map(|g| g.take_number)
            .max())
    }

    async fn insert_gradings(&mut self, gradings: &[NewQuizGrading]) -> Result<Vec<QuizGrading>> {
        let now = Utc::now();
        let mut inserted = Vec::with_capacity(gradings.len());
        for grading in gradings {
            let row = QuizGrading {
                id: self.next_id()?,
                module_id: grading.module_id,
                quiz_id: grading.quiz_id,
                question_id: grading.question_id,
                user_id: grading.user_id,
                user_answer_ranking: grading.user_answer_ranking,
                correct: grading.correct,
                take_number: grading.take_number,
                created_at: now,
            };
            inserted.push(row.clone());
            self.write(move |state| state.gradings.push(row.clone()));
        }
        Ok(inserted)
    }

    async fn quiz_with_questions(&mut self, quiz_id: i64) -> Result<Option<Quiz>> {
        Ok(self
            .working
            .modules
            .iter()
            .flat_map(|module| module.quizzes.iter())
            .find(|quiz| quiz.id == quiz_id)
            .cloned())
    }

    async fn module_by_id(&mut self, module_id: i64) -> Result<Option<Module>> {
        Ok(self
            .working
            .modules
            .iter()
            .find(|module| module.id == module_id)
            .cloned())
    }

    async fn first_file_of_module_ranked(&mut self, ranking: i32) -> Result<Option<ModuleFile>> {
        if self.faults.first_file_lookup {
            bail!("injected failure: first file lookup");
        }
        Ok(self
            .working
            .modules
            .iter()
            .filter(|module| module.ranking == ranking)
            .flat_map(|module| module.files.iter())
            .min_by_key(|file| file.id)
            .cloned())
    }

    async fn active_modules(&mut self) -> Result<Vec<Module>> {
        Ok(self
            .working
            .modules
            .iter()
            .filter(|module| module.is_active)
            .cloned()
            .collect())
    }

    async fn modules_by_ids(&mut self, ids: &[i64]) -> Result<Vec<Module>> {
        Ok(self
            .working
            .modules
            .iter()
            .filter(|module| ids.contains(&module.id))
            .cloned()
            .collect())
    }

    async fn search_modules(&mut self, query: &str) -> Result<Vec<Module>> {
        let needle = query.to_lowercase();
        Ok(self
            .working
            .modules
            .iter()
            .filter(|module| {
                module.is_active
                    && (module.name.to_lowercase().contains(&needle)
                        || module.description.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }

    async fn with_module_details(&mut self, modules: Vec<Module>) -> Result<Vec<Module>> {
        Ok(modules)
    }

    async fn module_participants(&mut self) -> Result<HashMap<i64, i64>> {
        let mut participants = HashMap::new();
        for module in self.working.modules.iter().filter(|module| module.is_active) {
            let users: BTreeSet<i64> = self
                .working
                .progress
                .iter()
                .filter(|row| row.module_id == module.id)
                .filter_map(|row| row.user_id)
                .collect();
            participants.insert(module.id, i64::try_from(users.len())?);
        }
        Ok(participants)
    }
}

#[async_trait]
impl CodeRepo for MemoryTx {
    async fn referral_code_by_user(&mut self, user_id: i64) -> Result<Option<ReferralCode>> {
        Ok(self
            .working
            .referral_codes
            .iter()
            .find(|code| code.user_id == user_id)
            .cloned())
    }

    async fn referral_code_by_code(&mut self, code: &str) -> Result<Option<ReferralCode>> {
        Ok(self
            .working
            .referral_codes
            .iter()
            .find(|row| row.referral_code == code)
            .cloned())
    }

    async fn create_referral_code(
        &mut self,
        user_id: i64,
        code: &str,
        referral_type: ReferralType,
        value: i32,
    ) -> Result<ReferralCode> {
        if self
            .working
            .referral_codes
            .iter()
            .any(|row| row.user_id == user_id || row.referral_code == code)
        {
            bail!("duplicate referral code for user {user_id}");
        }
        let created = ReferralCode {
            id: self.next_id()?,
            user_id,
            referral_code: code.to_string(),
            referral_type,
            value,
            is_active: true,
            created_at: Utc::now(),
        };
        let row = created.clone();
        self.write(move |state| state.referral_codes.push(row.clone()));
        Ok(created)
    }

    async fn referral_redemptions(&mut self, referral_code_id: i64) -> Result<i64> {
        let count = self
            .working
            .redemptions
            .iter()
            .filter(|(code_id, _)| *code_id == referral_code_id)
            .count();
        Ok(i64::try_from(count)?)
    }

    async fn insert_referral_redemption(
        &mut self,
        referral_code_id: i64,
        referral_user_id: i64,
    ) -> Result<()> {
        self.write(move |state| {
            state.redemptions.push((referral_code_id, referral_user_id));
        });
        Ok(())
    }

    async fn users_missing_referral_codes(&mut self) -> Result<Vec<i64>> {
        let codes = &self.working.referral_codes;
        Ok(self
            .working
            .users
            .iter()
            .filter(|user| !codes.iter().any(|code| code.user_id == user.id))
            .map(|user| user.id)
            .collect())
    }

    async fn create_waitlist_item(&mut self, item: &NewWaitlistItem) -> Result<WaitlistOutcome> {
        if self.working.waitlist.iter().any(|existing| {
            existing.email_address.as_deref() == Some(item.email_address.as_str())
        }) {
            return Ok(WaitlistOutcome::Duplicate);
        }
        let created = WaitlistItem {
            id: self.next_id()?,
            email_address: Some(item.email_address.clone()),
            owner_waitlist_code: Some(item.owner_waitlist_code.clone()),
            user_id: None,
            original_referral_code_id: item.original_referral_code_id,
            original_waitlist_code_id: item.original_waitlist_code_id,
            created_at: Utc::now(),
        };
        let row = created.clone();
        self.write(move |state| state.waitlist.push(row.clone()));
        Ok(WaitlistOutcome::Created(created))
    }

    async fn waitlist(&mut self) -> Result<Vec<WaitlistItem>> {
        Ok(self
            .working
            .waitlist
            .iter()
            .filter(|item| item.owner_waitlist_code.is_some())
            .map(|item| WaitlistItem {
                email_address: None,
                user_id: None,
                ..item.clone()
            })
            .collect())
    }

    async fn waitlist_item_by_code(&mut self, code: &str) -> Result<Option<WaitlistItem>> {
        Ok(self
            .working
            .waitlist
            .iter()
            .find(|item| item.owner_waitlist_code.as_deref() == Some(code))
            .cloned())
    }

    async fn link_waitlist_user(&mut self, user_id: i64, email: &str) -> Result<()> {
        if self.faults.link_waitlist {
            bail!("injected failure: link waitlist user");
        }
        let email = email.to_string();
        self.write(move |state| {
            for item in &mut state.waitlist {
                if item
                    .email_address
                    .as_deref()
                    .is_some_and(|address| address.eq_ignore_ascii_case(&email))
                {
                    item.user_id = Some(user_id);
                }
            }
        });
        Ok(())
    }

    async fn emails_missing_waitlist_codes(&mut self) -> Result<Vec<String>> {
        Ok(self
            .working
            .waitlist
            .iter()
            .filter(|item| item.owner_waitlist_code.is_none())
            .filter_map(|item| item.email_address.clone())
            .collect())
    }

    async fn set_waitlist_code(&mut self, email: &str, code: &str) -> Result<()> {
        let email = email.to_string();
        let code = code.to_string();
        self.write(move |state| {
            for item in &mut state.waitlist {
                if item.email_address.as_deref() == Some(email.as_str())
                    && item.owner_waitlist_code.is_none()
                {
                    item.owner_waitlist_code = Some(code.clone());
                }
            }
        });
        Ok(())
    }

    async fn waitlist_items_without_email(
        &mut self,
        email_type: EmailType,
    ) -> Result<Vec<WaitlistItem>> {
        let emails = &self.working.emails;
        Ok(self
            .working
            .waitlist
            .iter()
            .filter(|item| item.owner_waitlist_code.is_some())
            .filter(|item| {
                !emails.iter().any(|email| {
                    email.email_type == email_type
                        && item.email_address.as_deref() == Some(email.email_address.as_str())
                })
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EmailRepo for MemoryTx {
    async fn enqueue_email(&mut self, email: &NewEmail) -> Result<()> {
        if self.faults.enqueue_email_to == Some(email.email_address.as_str()) {
            self.aborted = true;
            bail!("injected failure: enqueue email");
        }
        if self.aborted {
            bail!("current transaction is aborted");
        }
        let row = OutboxEmail {
            id: self.next_id()?,
            user_id: email.user_id,
            email_address: email.email_address.clone(),
            template_name: email.template_name.clone(),
            template_vars: email.template_vars.clone(),
            email_type: email.email_type,
            status: email.status,
            created_at: Utc::now(),
            sent_at: None,
        };
        self.write(move |state| state.emails.push(row.clone()));
        Ok(())
    }

    async fn pending_emails(&mut self) -> Result<Vec<OutboxEmail>> {
        Ok(self
            .working
            .emails
            .iter()
            .filter(|email| email.status == EmailStatus::Pending)
            .cloned()
            .collect())
    }

    async fn mark_email_sent(&mut self, email_id: i64) -> Result<()> {
        let now = Utc::now();
        self.write(move |state| {
            if let Some(email) = state.emails.iter_mut().find(|email| email.id == email_id) {
                email.status = EmailStatus::Sent;
                email.sent_at = Some(now);
            }
        });
        Ok(())
    }
}

/// Active module with no quizzes or files attached.
#[must_use]
pub fn module(id: i64, ranking: i32) -> Module {
    Module {
        id,
        user_id: 1,
        name: format!("Module {id}"),
        description: format!("Lessons for module {id}"),
        ranking,
        hashtags: None,
        category_id: None,
        free: true,
        is_active: true,
        created_at: Utc::now(),
        category: None,
        quizzes: Vec::new(),
        files: Vec::new(),
        learning_outcomes: Vec::new(),
        supporting_material: Vec::new(),
    }
}

/// Quiz whose questions are given as `(question_id, accepted ranking)`.
#[must_use]
pub fn quiz(id: i64, module_id: i64, questions: &[(i64, i32)]) -> Quiz {
    Quiz {
        id,
        module_id,
        name: format!("Quiz {id}"),
        description: String::new(),
        passing_grade: 0.5,
        is_active: true,
        questions: questions
            .iter()
            .zip(1..)
            .map(|(&(question_id, accepted), ranking)| Question {
                id: question_id,
                quiz_id: id,
                name: format!("Question {question_id}"),
                description: String::new(),
                ranking,
                answer_option_ranking: accepted,
                options: Vec::new(),
            })
            .collect(),
    }
}

#[must_use]
pub fn module_file(id: i64, module_id: i64) -> ModuleFile {
    ModuleFile {
        id,
        module_id,
        file_id: id * 10,
        ranking: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
        }
    }

    fn outbox(address: &str) -> NewEmail {
        NewEmail {
            user_id: None,
            email_address: address.to_string(),
            template_name: "waitlist".to_string(),
            template_vars: HashMap::new(),
            email_type: EmailType::Waitlist,
            status: EmailStatus::Pending,
        }
    }

    #[tokio::test]
    async fn interleaved_commits_keep_both_writes() -> anyhow::Result<()> {
        let store = MemoryStore::new();

        let mut slow = store.begin().await?;
        let mut fast = store.begin().await?;
        fast.create_user(&new_user("fast@example.com")).await?;
        fast.commit().await?;

        slow.create_user(&new_user("slow@example.com")).await?;
        slow.commit().await?;

        let state = store.snapshot()?;
        let emails: Vec<&str> = state.users.iter().map(|user| user.email.as_str()).collect();
        assert_eq!(emails, vec!["fast@example.com", "slow@example.com"]);

        assert_ne!(state.users[0].id, state.users[1].id);
        Ok(())
    }

    #[tokio::test]
    async fn stale_touch_does_not_revert_profile() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut tx = store.begin().await?;
        let CreateUserOutcome::Created(user) =
            tx.create_user(&new_user("ada@example.com")).await?
        else {
            anyhow::bail!("user was not created");
        };
        tx.commit().await?;

        let mut touch = store.begin().await?;
        let mut edit = store.begin().await?;
        let update = ProfileUpdate {
            about: Some("Analyst".to_string()),
            ..ProfileUpdate::default()
        };
        edit.update_profile(user.id, &update).await?;
        edit.commit().await?;
        touch.touch_last_online(user.id).await?;
        touch.commit().await?;

        let state = store.snapshot()?;
        let stored = state
            .users
            .iter()
            .find(|row| row.id == user.id)
            .ok_or_else(|| anyhow!("user missing"))?;
        assert_eq!(stored.about.as_deref(), Some("Analyst"));
        assert!(stored.last_online.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn failed_statement_rolls_back_on_commit() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.set_faults(Faults {
            enqueue_email_to: Some("bad@example.com"),
            ..Faults::default()
        })?;

        let mut tx = store.begin().await?;
        tx.enqueue_email(&outbox("good@example.com")).await?;
        assert!(tx.enqueue_email(&outbox("bad@example.com")).await.is_err());
        assert!(tx.enqueue_email(&outbox("later@example.com")).await.is_err());
        tx.commit().await?;

        assert!(store.snapshot()?.emails.is_empty());
        Ok(())
    }
}

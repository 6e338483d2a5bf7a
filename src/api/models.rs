//! Records shared by the store, the domain services and the HTTP handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct Player {
    pub id: i64,
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

/// Account row. The password hash never leaves the process.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub user_type: String,
    pub user_admin_level: String,
    pub is_verified: bool,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_online: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sports: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashtags: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<Player>,
}

impl User {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.user_admin_level.eq_ignore_ascii_case("admin")
    }
}

/// A user together with everything the client renders on its home screen.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Profile {
    #[serde(flatten)]
    pub user: User,
    pub learning_progress: Vec<LearningProgress>,
    pub quiz_gradings: Vec<QuizGrading>,
    pub completed_module_ids: Vec<i64>,
    pub user_goals: Vec<UserGoal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<ReferralCode>,
}

/// A freshly created account with its referral code.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NewAccount {
    #[serde(flatten)]
    pub user: User,
    pub referral_code: ReferralCode,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PasswordReset {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl PasswordReset {
    /// A reset token is usable up to and including `created_at + ttl`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now <= self.created_at + ttl
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum SocialNetwork {
    Facebook,
    Instagram,
    Twitter,
    Twitch,
    Unknown,
}

impl SocialNetwork {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Facebook => "FACEBOOK",
            Self::Instagram => "INSTAGRAM",
            Self::Twitter => "TWITTER",
            Self::Twitch => "TWITCH",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Lenient parse used for query parameters: anything unrecognised is `Unknown`.
    #[must_use]
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for SocialNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocialNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FACEBOOK" => Ok(Self::Facebook),
            "INSTAGRAM" => Ok(Self::Instagram),
            "TWITTER" => Ok(Self::Twitter),
            "TWITCH" => Ok(Self::Twitch),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(format!("unknown social network: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReferralType {
    Hours,
    Quantity,
}

impl ReferralType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hours => "HOURS",
            Self::Quantity => "QUANTITY",
        }
    }
}

impl FromStr for ReferralType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HOURS" => Ok(Self::Hours),
            "QUANTITY" => Ok(Self::Quantity),
            other => Err(format!("unknown referral type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReferralCode {
    pub id: i64,
    pub user_id: i64,
    pub referral_code: String,
    pub referral_type: ReferralType,
    pub value: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WaitlistItem {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_waitlist_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_referral_code_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_waitlist_code_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailType {
    Waitlist,
    ForgotPassword,
}

impl EmailType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waitlist => "WAITLIST",
            Self::ForgotPassword => "FORGOT_PASSWORD",
        }
    }
}

impl FromStr for EmailType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WAITLIST" => Ok(Self::Waitlist),
            "FORGOT_PASSWORD" => Ok(Self::ForgotPassword),
            other => Err(format!("invalid email type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EmailStatus {
    Pending,
    Processing,
    Sent,
}

impl EmailStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Sent => "SENT",
        }
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "SENT" => Ok(Self::Sent),
            other => Err(format!("unknown email status: {other}")),
        }
    }
}

/// Outbox row drained by the delivery job.
#[derive(Debug, Clone)]
pub struct OutboxEmail {
    pub id: i64,
    pub user_id: Option<i64>,
    pub email_address: String,
    pub template_name: String,
    pub template_vars: HashMap<String, String>,
    pub email_type: EmailType,
    pub status: EmailStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LearningProgress {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_unique_id: Option<String>,
    pub module_id: i64,
    pub module_file_ranking: i32,
    pub seek: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct QuizGrading {
    pub id: i64,
    pub module_id: i64,
    pub quiz_id: i64,
    pub question_id: i64,
    pub user_id: i64,
    pub user_answer_ranking: i32,
    pub correct: bool,
    pub take_number: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserGoal {
    pub id: i64,
    pub user_id: i64,
    pub description: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GoalTemplate {
    pub id: i64,
    pub name: String,
    pub quantitative: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModuleCategory {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModuleFile {
    pub id: i64,
    pub module_id: i64,
    pub file_id: i64,
    pub ranking: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LearningOutcome {
    pub id: i64,
    pub module_id: i64,
    pub description: String,
    pub ranking: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SupportingMaterial {
    pub id: i64,
    pub module_id: i64,
    pub name: String,
    pub description: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuestionOption {
    pub id: i64,
    pub quiz_question_id: i64,
    pub name: String,
    pub description: String,
    pub ranking: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,
    pub name: String,
    pub description: String,
    pub ranking: i32,
    /// Ranking of the accepted option; 0 accepts any answer.
    pub answer_option_ranking: i32,
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Quiz {
    pub id: i64,
    pub module_id: i64,
    pub name: String,
    pub description: String,
    pub passing_grade: f64,
    pub is_active: bool,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Module {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: String,
    pub ranking: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashtags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<i64>,
    pub free: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "module_category", skip_serializing_if = "Option::is_none")]
    pub category: Option<ModuleCategory>,
    pub quizzes: Vec<Quiz>,
    #[serde(rename = "module_files")]
    pub files: Vec<ModuleFile>,
    #[serde(rename = "module_learning_outcomes")]
    pub learning_outcomes: Vec<LearningOutcome>,
    #[serde(rename = "module_supporting_material")]
    pub supporting_material: Vec<SupportingMaterial>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn social_network_parse_is_case_insensitive() {
        assert_eq!(SocialNetwork::parse_lenient("facebook"), SocialNetwork::Facebook);
        assert_eq!(SocialNetwork::parse_lenient("TWITTER"), SocialNetwork::Twitter);
        assert_eq!(SocialNetwork::parse_lenient("myspace"), SocialNetwork::Unknown);
        assert_eq!(SocialNetwork::Twitch.to_string(), "TWITCH");
    }

    #[test]
    fn reset_token_window_is_inclusive() {
        let created_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single();
        let Some(created_at) = created_at else {
            panic!("valid timestamp");
        };
        let reset = PasswordReset {
            id: 1,
            user_id: 1,
            token: "123456".to_string(),
            created_at,
        };
        let ttl = Duration::minutes(10);
        assert!(reset.is_active_at(created_at + Duration::seconds(599), ttl));
        assert!(reset.is_active_at(created_at + ttl, ttl));
        assert!(!reset.is_active_at(created_at + Duration::seconds(601), ttl));
    }

    #[test]
    fn user_serialization_hides_password_hash() {
        let now = Utc::now();
        let user = User {
            id: 7,
            email: "learner@ggwp.test".to_string(),
            password_hash: Some("$2b$04$secret".to_string()),
            user_type: "player".to_string(),
            user_admin_level: String::new(),
            is_verified: false,
            is_active: true,
            last_online: None,
            about: None,
            date_of_birth: None,
            phone: None,
            location: None,
            sports: None,
            hashtags: None,
            created_at: now,
            updated_at: now,
            player: None,
        };
        let json = serde_json::to_string(&user).unwrap_or_default();
        assert!(json.contains("learner@ggwp.test"));
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("secret"));
    }
}

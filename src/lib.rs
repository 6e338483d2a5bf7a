//! # GGWP (e-learning platform API)
//!
//! `ggwp` serves the REST API behind the GGWP academy: accounts, social login,
//! learning modules with quizzes, progress tracking, referral and waitlist codes,
//! and transactional email.
//!
//! ## Authentication
//!
//! Sessions are stateless. A successful login returns a short-lived access token in
//! the `Authorization` header and a long-lived refresh token in
//! `X-Ggwp-Refresh-Token`. Both are HS256 JWTs signed with one server secret; the
//! refresh flow only ever mints a new access token.
//!
//! ## Grading
//!
//! Quiz submissions are graded and the learner is advanced to the next module in a
//! single store transaction. Gradings are append-only: a retake gets a new take
//! number instead of overwriting earlier rows.
//!
//! ## Background jobs
//!
//! Independent loops backfill referral and waitlist codes, queue waitlist emails and
//! drain the email outbox. A failing row is logged and skipped.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // not built from a git checkout
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with("ggwp/"));
        assert!(APP_USER_AGENT.ends_with(env!("CARGO_PKG_VERSION")));
    }
}

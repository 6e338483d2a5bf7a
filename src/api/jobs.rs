//! Background sweeps.
//!
//! Four independent loops run next to the HTTP server: referral code backfill,
//! waitlist code backfill, waitlist email queueing and outbox delivery. Each
//! pass is bounded by a timeout, logs its failures, and the loop sleeps until
//! the next pass; a loop never exits on error. The scan predicates skip rows that are already done, so a
//! pass can be repeated safely.

use crate::api::codes::{assign_waitlist_code, create_referral_code};
use crate::api::mailer::{
    outbox_message, send_with_timeout, waitlist_template_name, waitlist_vars, Mailer,
};
use crate::api::models::{EmailStatus, EmailType};
use crate::api::store::{NewEmail, Store};
use anyhow::{anyhow, Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Clone, Copy, Debug)]
pub struct JobsConfig {
    referral_backfill_interval: Duration,
    waitlist_backfill_interval: Duration,
    waitlist_email_interval: Duration,
    outbox_poll_interval: Duration,
    outbox_send_timeout: Duration,
    pass_timeout: Duration,
}

impl JobsConfig {
    /// One minute for the backfills, five for the email loops, one minute per
    /// send and five per pass.
    #[must_use]
    pub fn new() -> Self {
        Self {
            referral_backfill_interval: Duration::from_secs(60),
            waitlist_backfill_interval: Duration::from_secs(60),
            waitlist_email_interval: Duration::from_secs(300),
            outbox_poll_interval: Duration::from_secs(300),
            outbox_send_timeout: Duration::from_secs(60),
            pass_timeout: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_referral_backfill_seconds(mut self, seconds: u64) -> Self {
        self.referral_backfill_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_waitlist_backfill_seconds(mut self, seconds: u64) -> Self {
        self.waitlist_backfill_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_waitlist_email_seconds(mut self, seconds: u64) -> Self {
        self.waitlist_email_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_outbox_poll_seconds(mut self, seconds: u64) -> Self {
        self.outbox_poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_outbox_send_timeout_seconds(mut self, seconds: u64) -> Self {
        self.outbox_send_timeout = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_pass_timeout_seconds(mut self, seconds: u64) -> Self {
        self.pass_timeout = Duration::from_secs(seconds);
        self
    }

    /// Zero intervals would spin; raise them to one second.
    #[must_use]
    pub fn normalize(self) -> Self {
        let at_least_one = |duration: Duration| {
            if duration.is_zero() {
                Duration::from_secs(1)
            } else {
                duration
            }
        };

        Self {
            referral_backfill_interval: at_least_one(self.referral_backfill_interval),
            waitlist_backfill_interval: at_least_one(self.waitlist_backfill_interval),
            waitlist_email_interval: at_least_one(self.waitlist_email_interval),
            outbox_poll_interval: at_least_one(self.outbox_poll_interval),
            outbox_send_timeout: at_least_one(self.outbox_send_timeout),
            pass_timeout: at_least_one(self.pass_timeout),
        }
    }

    #[must_use]
    pub fn outbox_send_timeout(&self) -> Duration {
        self.outbox_send_timeout
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Create referral codes for users that have none. Each user gets its own
/// transaction; a failure is logged and the sweep moves on.
///
/// # Errors
/// Returns an error only when the scan itself fails.
pub async fn backfill_referral_codes(store: &dyn Store) -> Result<usize> {
    let user_ids = {
        let mut tx = store.begin().await.context("begin tx")?;
        let ids = tx
            .users_missing_referral_codes()
            .await
            .context("unable to get user ids missing referral codes")?;
        tx.rollback().await?;
        ids
    };

    info!(count = user_ids.len(), "Processing users missing referral codes");

    let mut created = 0;
    for user_id in user_ids {
        let result = async {
            let mut tx = store.begin().await?;
            create_referral_code(tx.as_mut(), user_id).await?;
            tx.commit().await
        }
        .await;

        match result {
            Ok(()) => created += 1,
            Err(err) => error!(user_id, "Unable to generate referral code for user: {err:#}"),
        }
    }

    Ok(created)
}

/// Assign owner codes to waitlist entries that have none.
///
/// # Errors
/// Returns an error only when the scan itself fails.
pub async fn backfill_waitlist_codes(store: &dyn Store) -> Result<usize> {
    let emails = {
        let mut tx = store.begin().await.context("begin tx")?;
        let emails = tx
            .emails_missing_waitlist_codes()
            .await
            .context("unable to get emails missing waitlist codes")?;
        tx.rollback().await?;
        emails
    };

    info!(count = emails.len(), "Processing waitlist entries missing codes");

    let mut assigned = 0;
    for email in emails {
        let result = async {
            let mut tx = store.begin().await?;
            assign_waitlist_code(tx.as_mut(), &email).await?;
            tx.commit().await
        }
        .await;

        match result {
            Ok(()) => assigned += 1,
            Err(err) => error!(email_address = %email, "Unable to generate waitlist code: {err:#}"),
        }
    }

    Ok(assigned)
}

/// Queue a pending waitlist email for every coded entry that has none yet.
/// Each email is inserted in its own transaction.
///
/// # Errors
/// Returns an error only when the scan itself fails.
pub async fn queue_waitlist_emails(store: &dyn Store) -> Result<usize> {
    let items = {
        let mut tx = store.begin().await.context("begin tx")?;
        let items = tx
            .waitlist_items_without_email(EmailType::Waitlist)
            .await
            .context("getting waitlist items without a queued email")?;
        tx.rollback().await?;
        items
    };

    info!(count = items.len(), "Queueing waitlist emails");

    let mut queued = 0;
    for item in items {
        let (Some(email_address), Some(code)) = (item.email_address, item.owner_waitlist_code)
        else {
            continue;
        };

        let email = NewEmail {
            user_id: None,
            email_address,
            template_name: waitlist_template_name().to_string(),
            template_vars: waitlist_vars(&code),
            email_type: EmailType::Waitlist,
            status: EmailStatus::Pending,
        };

        let result = async {
            let mut tx = store.begin().await?;
            tx.enqueue_email(&email).await?;
            tx.commit().await
        }
        .await;

        match result {
            Ok(()) => queued += 1,
            Err(err) => error!(
                email_address = %email.email_address,
                "Creating email for waitlist user: {err:#}"
            ),
        }
    }

    Ok(queued)
}

/// Deliver pending outbox rows and mark each delivered row as sent.
///
/// # Errors
/// Returns an error only when the pending rows cannot be read.
pub async fn send_pending_emails(
    store: &dyn Store,
    mailer: &dyn Mailer,
    send_timeout: Duration,
) -> Result<usize> {
    let pending = {
        let mut tx = store.begin().await.context("begin tx")?;
        let pending = tx.pending_emails().await.context("getting pending emails")?;
        tx.rollback().await?;
        pending
    };

    info!(count = pending.len(), "Processing unsent emails");

    let mut sent = 0;
    for email in pending {
        let span = info_span!(
            "email.send",
            email_id = email.id,
            email_type = email.email_type.as_str()
        );

        let result = async {
            let message = outbox_message(&email)?;
            send_with_timeout(mailer, &message, send_timeout)
                .await
                .context("sending email")?;

            let mut tx = store.begin().await?;
            tx.mark_email_sent(email.id)
                .await
                .context("marking email as sent")?;
            tx.commit().await
        }
        .instrument(span)
        .await;

        match result {
            Ok(()) => sent += 1,
            Err(err) => warn!(email_id = email.id, "Email not delivered: {err:#}"),
        }
    }

    Ok(sent)
}

/// Run one pass, giving up once `limit` elapses.
async fn run_pass<Fut>(name: &'static str, limit: Duration, pass: Fut) -> Result<usize>
where
    Fut: Future<Output = Result<usize>>,
{
    match timeout(limit, pass.instrument(info_span!("job", job = name))).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("timed out after {}s", limit.as_secs_f64())),
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    limit: Duration,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<usize>> + Send,
{
    tokio::spawn(async move {
        loop {
            match run_pass(name, limit, pass()).await {
                Ok(count) => info!(job = name, count, "Job pass finished"),
                Err(err) => error!(job = name, "Job pass failed: {err:#}"),
            }
            sleep(interval).await;
        }
    })
}

/// Start every sweep on its own task.
pub fn spawn_jobs(
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
    config: JobsConfig,
) -> Vec<JoinHandle<()>> {
    let config = config.normalize();

    let referral_store = Arc::clone(&store);
    let waitlist_store = Arc::clone(&store);
    let queue_store = Arc::clone(&store);
    let outbox_store = store;
    let send_timeout = config.outbox_send_timeout();
    let limit = config.pass_timeout;

    vec![
        spawn_loop(
            "referral_backfill",
            config.referral_backfill_interval,
            limit,
            move || {
                let store = Arc::clone(&referral_store);
                async move { backfill_referral_codes(store.as_ref()).await }
            },
        ),
        spawn_loop(
            "waitlist_backfill",
            config.waitlist_backfill_interval,
            limit,
            move || {
                let store = Arc::clone(&waitlist_store);
                async move { backfill_waitlist_codes(store.as_ref()).await }
            },
        ),
        spawn_loop(
            "waitlist_emails",
            config.waitlist_email_interval,
            limit,
            move || {
                let store = Arc::clone(&queue_store);
                async move { queue_waitlist_emails(store.as_ref()).await }
            },
        ),
        spawn_loop("outbox", config.outbox_poll_interval, limit, move || {
            let store = Arc::clone(&outbox_store);
            let mailer = Arc::clone(&mailer);
            async move { send_pending_emails(store.as_ref(), mailer.as_ref(), send_timeout).await }
        }),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::mailer::{RecordingMailer, WAITLIST_CODE_VAR};
    use crate::api::models::{User, WaitlistItem};
    use crate::api::store::memory::{Faults, MemoryStore};
    use chrono::Utc;

    fn user(id: i64, email: &str) -> User {
        User {
            id,
            email: email.to_string(),
            password_hash: None,
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
            created_at: Utc::now(),
            updated_at: Utc::now(),
            player: None,
        }
    }

    fn waitlisted(id: i64, email: &str, code: Option<&str>) -> WaitlistItem {
        WaitlistItem {
            id,
            email_address: Some(email.to_string()),
            owner_waitlist_code: code.map(ToString::to_string),
            user_id: None,
            original_referral_code_id: None,
            original_waitlist_code_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn referral_backfill_is_idempotent() -> Result<()> {
        let store = MemoryStore::new();
        store.update(|state| {
            state.users.push(user(1, "a@ggwp.test"));
            state.users.push(user(2, "b@ggwp.test"));
        })?;

        assert_eq!(backfill_referral_codes(&store).await?, 2);
        assert_eq!(backfill_referral_codes(&store).await?, 0);

        let state = store.snapshot()?;
        assert_eq!(state.referral_codes.len(), 2);
        assert!(state
            .referral_codes
            .iter()
            .all(|code| code.referral_code.starts_with("WELC-") && code.value == 2));
        Ok(())
    }

    #[tokio::test]
    async fn waitlist_backfill_assigns_missing_codes() -> Result<()> {
        let store = MemoryStore::new();
        store.update(|state| {
            state.waitlist.push(waitlisted(1, "early@ggwp.test", None));
            state.waitlist.push(waitlisted(2, "coded@ggwp.test", Some("WAIT-000001")));
        })?;

        assert_eq!(backfill_waitlist_codes(&store).await?, 1);

        let state = store.snapshot()?;
        let early = state.waitlist.iter().find(|item| item.id == 1).unwrap();
        assert!(early
            .owner_waitlist_code
            .as_deref()
            .is_some_and(|code| code.starts_with("WAIT-")));
        let coded = state.waitlist.iter().find(|item| item.id == 2).unwrap();
        assert_eq!(coded.owner_waitlist_code.as_deref(), Some("WAIT-000001"));
        Ok(())
    }

    #[tokio::test]
    async fn waitlist_emails_are_queued_once() -> Result<()> {
        let store = MemoryStore::new();
        store.update(|state| {
            state.waitlist.push(waitlisted(1, "early@ggwp.test", Some("WAIT-123456")));
            state.waitlist.push(waitlisted(2, "pending@ggwp.test", None));
        })?;

        assert_eq!(queue_waitlist_emails(&store).await?, 1);
        assert_eq!(queue_waitlist_emails(&store).await?, 0);

        let state = store.snapshot()?;
        assert_eq!(state.emails.len(), 1);
        let email = &state.emails[0];
        assert_eq!(email.email_address, "early@ggwp.test");
        assert_eq!(email.template_name, "waitlist");
        assert_eq!(email.email_type, EmailType::Waitlist);
        assert_eq!(email.status, EmailStatus::Pending);
        assert_eq!(
            email.template_vars.get(WAITLIST_CODE_VAR).map(String::as_str),
            Some("WAIT-123456")
        );
        Ok(())
    }

    #[tokio::test]
    async fn one_failed_insert_does_not_drop_the_batch() -> Result<()> {
        let store = MemoryStore::new();
        store.update(|state| {
            state.waitlist.push(waitlisted(1, "first@ggwp.test", Some("WAIT-000001")));
            state.waitlist.push(waitlisted(2, "broken@ggwp.test", Some("WAIT-000002")));
            state.waitlist.push(waitlisted(3, "third@ggwp.test", Some("WAIT-000003")));
        })?;
        store.set_faults(Faults {
            enqueue_email_to: Some("broken@ggwp.test"),
            ..Faults::default()
        })?;

        assert_eq!(queue_waitlist_emails(&store).await?, 2);

        let state = store.snapshot()?;
        let mut queued: Vec<&str> = state
            .emails
            .iter()
            .map(|email| email.email_address.as_str())
            .collect();
        queued.sort_unstable();
        assert_eq!(queued, vec!["first@ggwp.test", "third@ggwp.test"]);
        Ok(())
    }

    #[tokio::test]
    async fn stuck_pass_times_out() {
        let result = run_pass(
            "stuck",
            Duration::from_millis(20),
            std::future::pending::<Result<usize>>(),
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("timed out"));

        let finished = run_pass("quick", Duration::from_secs(5), async { Ok(3) }).await;
        assert_eq!(finished.unwrap(), 3);
    }

    #[tokio::test]
    async fn delivered_emails_are_marked_sent() -> Result<()> {
        let store = MemoryStore::new();
        store.update(|state| {
            state.waitlist.push(waitlisted(1, "early@ggwp.test", Some("WAIT-123456")));
        })?;
        queue_waitlist_emails(&store).await?;
        let mailer = RecordingMailer::default();

        let sent = send_pending_emails(&store, &mailer, Duration::from_secs(5)).await?;

        assert_eq!(sent, 1);
        let delivered = mailer.sent();
        assert_eq!(delivered[0].to, "early@ggwp.test");
        assert!(delivered[0].text.contains("WAIT-123456"));

        let state = store.snapshot()?;
        assert_eq!(state.emails[0].status, EmailStatus::Sent);
        assert!(state.emails[0].sent_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn failed_delivery_stays_pending() -> Result<()> {
        let store = MemoryStore::new();
        store.update(|state| {
            state.waitlist.push(waitlisted(1, "early@ggwp.test", Some("WAIT-123456")));
        })?;
        queue_waitlist_emails(&store).await?;

        let sent = send_pending_emails(&store, &RecordingMailer::failing(), Duration::from_secs(5))
            .await?;

        assert_eq!(sent, 0);
        assert_eq!(store.snapshot()?.emails[0].status, EmailStatus::Pending);
        Ok(())
    }

    #[test]
    fn normalize_raises_zero_intervals() {
        let config = JobsConfig::new()
            .with_outbox_poll_seconds(0)
            .with_outbox_send_timeout_seconds(0)
            .with_pass_timeout_seconds(0)
            .normalize();
        assert_eq!(config.outbox_poll_interval, Duration::from_secs(1));
        assert_eq!(config.outbox_send_timeout(), Duration::from_secs(1));
        assert_eq!(config.pass_timeout, Duration::from_secs(1));
        assert_eq!(config.referral_backfill_interval, Duration::from_secs(60));
        assert_eq!(JobsConfig::new().pass_timeout, Duration::from_secs(300));
    }
}

//! Event handlers: turn a claimed event into email jobs.
//!
//! Every event type maps to exactly one handler family. The mapping is an exhaustive
//! `match`, so adding an event type without deciding how it is handled does not
//! compile.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use courier_core::UserId;
use courier_events::{EventRecord, EventType};

use crate::directory::{DirectoryError, UserDirectory};
use crate::jobs::EmailJob;

#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// None of the recipients is known to the directory.
    #[error("no recipient could be resolved ({unknown} unknown)")]
    NoRecipients { unknown: usize },
}

/// Collaborators a handler may consult.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    pub directory: &'a dyn UserDirectory,
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Jobs to create for `event`. Must not write anything itself.
    async fn plan_jobs(
        &self,
        event: &EventRecord,
        ctx: &HandlerContext<'_>,
    ) -> Result<Vec<EmailJob>, HandlerError>;
}

/// Emails each target user.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserEmailHandler;

/// Emails the targets plus the directory's admins.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdminAlertHandler;

pub fn handler_for(event_type: EventType) -> &'static dyn EventHandler {
    match event_type {
        EventType::AuctionOutbid
        | EventType::AuctionWon
        | EventType::OrderShipped
        | EventType::OrderDelivered
        | EventType::OrderSlaApproaching
        | EventType::EscrowReleased => &UserEmailHandler,
        EventType::DisputeOpened | EventType::ListingFlagged => &AdminAlertHandler,
    }
}

#[async_trait]
impl EventHandler for UserEmailHandler {
    fn name(&self) -> &'static str {
        "user_email"
    }

    async fn plan_jobs(
        &self,
        event: &EventRecord,
        ctx: &HandlerContext<'_>,
    ) -> Result<Vec<EmailJob>, HandlerError> {
        jobs_for(&event.target_user_ids, event, ctx).await
    }
}

#[async_trait]
impl EventHandler for AdminAlertHandler {
    fn name(&self) -> &'static str {
        "admin_alert"
    }

    async fn plan_jobs(
        &self,
        event: &EventRecord,
        ctx: &HandlerContext<'_>,
    ) -> Result<Vec<EmailJob>, HandlerError> {
        let admins = ctx.directory.admins().await?;
        let mut recipients = event.target_user_ids.clone();
        if !recipients.iter().any(|user| admins.contains(user)) {
            for admin in admins {
                if !recipients.contains(&admin) {
                    recipients.push(admin);
                }
            }
        }
        jobs_for(&recipients, event, ctx).await
    }
}

async fn jobs_for(
    recipients: &[UserId],
    event: &EventRecord,
    ctx: &HandlerContext<'_>,
) -> Result<Vec<EmailJob>, HandlerError> {
    let mut jobs = Vec::with_capacity(recipients.len());
    let mut unknown = 0;
    for user_id in recipients {
        let Some(profile) = ctx.directory.lookup(user_id).await? else {
            warn!(event_id = %event.id, user_id = %user_id, "recipient not found in user directory");
            unknown += 1;
            continue;
        };
        if !profile.email_notifications {
            debug!(event_id = %event.id, user_id = %user_id, "recipient opted out of email");
            continue;
        }
        let Some(email) = profile.email.filter(|e| !e.trim().is_empty()) else {
            debug!(event_id = %event.id, user_id = %user_id, "recipient has no email address");
            continue;
        };
        jobs.push(EmailJob::for_recipient(
            event,
            user_id.clone(),
            email,
            profile.display_name,
            ctx.now,
        ));
    }

    // Opt-outs are a valid reason to send nothing; an empty directory is not.
    if unknown == recipients.len() {
        return Err(HandlerError::NoRecipients { unknown });
    }
    Ok(jobs)
}

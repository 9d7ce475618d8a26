//! Email jobs: delivery with retry, backoff, and dead-letter handling.
//!
//! ## Design
//!
//! - One job per (event, recipient), with a deterministic id
//! - Claims are single-document optimistic transactions; losers see a no-op
//! - Soft failures and transport errors requeue with a backoff table
//! - Invalid addresses and unrenderable payloads fail the job before any provider call
//! - Exhausted jobs are dead-lettered on their next claim
//!
//! ## Components
//!
//! - `EmailJob`: the persisted job document
//! - `RetryPolicy`: attempt budget, lock window and backoff table
//! - `EmailProvider` / `Mailer`: outbound transport and its configuration state
//! - `JobDispatcher`: batch sweep and immediate dispatch

pub mod dispatcher;
pub mod provider;
pub mod types;

pub use dispatcher::{
    IMMEDIATE_DISPATCH_TIMEOUT, ImmediateDispatch, JobBatchReport, JobClaim, JobDispatcher,
    JobOutcome, SkipReason,
};
pub use provider::{
    EmailProvider, HttpEmailProvider, HttpProviderConfig, Mailer, RecordingProvider, SendOutcome,
    SentEmail, TransportError,
};
pub use types::{BACKOFF_TABLE, EmailJob, JobStatus, LOCK_WINDOW, MAX_ATTEMPTS, RetryPolicy};

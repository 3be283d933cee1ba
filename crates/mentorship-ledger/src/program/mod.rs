//! Mentorship program core: submission review, the per-pairing points ledger, cascading
//! cleanup of deleted participants, and the audit trail tying them together.

pub mod audit;
mod cascade;
pub mod domain;
mod error;
mod identity;
mod ledger;
mod review;
pub mod router;
mod service;
pub mod standings;
mod storage;
pub mod store;

pub use audit::{AuditDraft, AuditSubject};
pub use cascade::CascadeEngine;
pub use error::ProgramError;
pub use identity::{IdentityError, IdentityProvider};
pub use ledger::{AdjustmentReceipt, LedgerVerification, PointsLedger};
pub use review::{
    NewSubmission, PhotoUpload, ReviewDecision, ReviewOutcome, SubmissionReview, MAX_WEEK_NUMBER,
    MAX_YEAR, MIN_YEAR,
};
pub use router::{program_router, Actor, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
pub use service::MentorshipProgram;
pub use standings::Standings;
pub use storage::{FileStorage, GoogleDriveStorage, StorageError};
pub use store::{DocumentStore, MemoryDocumentStore};

#[cfg(test)]
mod tests;

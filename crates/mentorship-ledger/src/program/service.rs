use std::sync::Arc;

use super::audit::{self, AuditSubject};
use super::cascade::CascadeEngine;
use super::domain::{
    AuditLogEntry, CascadeReport, FamilyId, Pairing, PairingId, Submission, SubmissionId, UserId,
};
use super::error::ProgramError;
use super::identity::IdentityProvider;
use super::ledger::{AdjustmentReceipt, LedgerVerification, PointsLedger};
use super::review::{NewSubmission, PhotoUpload, ReviewOutcome, SubmissionReview};
use super::standings::{self, Standings};
use super::storage::FileStorage;
use super::store::{DocumentStore, DocumentStoreExt};
use crate::config::ProgramConfig;

/// Service composing the review state machine, points ledger, cascade engine, and audit
/// trail over one document store and its collaborators.
pub struct MentorshipProgram<S, F, I> {
    store: Arc<S>,
    files: Arc<F>,
    identity: Arc<I>,
    config: ProgramConfig,
}

impl<S, F, I> MentorshipProgram<S, F, I>
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    pub fn new(store: Arc<S>, files: Arc<F>, identity: Arc<I>, config: ProgramConfig) -> Self {
        Self {
            store,
            files,
            identity,
            config,
        }
    }

    pub fn config(&self) -> ProgramConfig {
        self.config
    }

    fn review(&self) -> SubmissionReview<'_> {
        SubmissionReview::new(self.store.as_ref(), self.files.as_ref(), self.config)
    }

    fn ledger(&self) -> PointsLedger<'_> {
        PointsLedger::new(self.store.as_ref(), self.config.transaction_attempts)
    }

    fn cascade(&self) -> CascadeEngine<'_> {
        CascadeEngine::new(
            self.store.as_ref(),
            self.files.as_ref(),
            self.identity.as_ref(),
            self.config.transaction_attempts,
        )
    }

    pub fn approve_submission(
        &self,
        submission_id: &SubmissionId,
        reviewer_id: &UserId,
    ) -> Result<ReviewOutcome, ProgramError> {
        self.review().approve(submission_id, reviewer_id)
    }

    pub fn reject_submission(
        &self,
        submission_id: &SubmissionId,
        reviewer_id: &UserId,
        reason: &str,
    ) -> Result<ReviewOutcome, ProgramError> {
        self.review().reject(submission_id, reviewer_id, reason)
    }

    pub fn create_submission(&self, request: NewSubmission) -> Result<Submission, ProgramError> {
        self.review().create(request)
    }

    pub fn submit_photo(&self, upload: PhotoUpload) -> Result<Submission, ProgramError> {
        self.review().submit_photo(upload)
    }

    pub fn adjust_points(
        &self,
        pairing_id: &PairingId,
        actor_id: &UserId,
        delta: i64,
        reason: &str,
    ) -> Result<AdjustmentReceipt, ProgramError> {
        self.ledger().adjust(pairing_id, actor_id, delta, reason)
    }

    pub fn delete_user(
        &self,
        user_id: &UserId,
        actor_id: &UserId,
    ) -> Result<CascadeReport, ProgramError> {
        self.cascade().delete_user(user_id, actor_id)
    }

    pub fn delete_family(
        &self,
        family_id: &FamilyId,
        actor_id: &UserId,
    ) -> Result<CascadeReport, ProgramError> {
        self.cascade().delete_family(family_id, actor_id)
    }

    pub fn delete_pairing(
        &self,
        pairing_id: &PairingId,
        actor_id: &UserId,
    ) -> Result<CascadeReport, ProgramError> {
        self.cascade().delete_pairing(pairing_id, actor_id)
    }

    pub fn audit_trail(&self, subject: &AuditSubject) -> Result<Vec<AuditLogEntry>, ProgramError> {
        Ok(audit::trail(self.store.as_ref(), subject)?)
    }

    pub fn verify_ledger(&self, pairing_id: &PairingId) -> Result<LedgerVerification, ProgramError> {
        self.ledger().verify(pairing_id)
    }

    pub fn standings(&self) -> Result<Standings, ProgramError> {
        Ok(standings::standings(self.store.as_ref())?)
    }

    pub fn submission(&self, submission_id: &SubmissionId) -> Result<Submission, ProgramError> {
        self.store
            .fetch::<Submission>(submission_id.as_str())?
            .ok_or_else(|| ProgramError::not_found("submission", submission_id))
    }

    pub fn pairing(&self, pairing_id: &PairingId) -> Result<Pairing, ProgramError> {
        self.store
            .fetch::<Pairing>(pairing_id.as_str())?
            .ok_or_else(|| ProgramError::not_found("pairing", pairing_id))
    }
}

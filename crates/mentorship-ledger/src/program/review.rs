//! Submission review state machine.
//!
//! A submission is created `Pending` with its point values frozen. Exactly one of approve
//! or reject moves it to a terminal state; the status check and every write of that move
//! share one optimistic transaction, so concurrent reviewers cannot both succeed and an
//! approval credits the pairing exactly once.

use chrono::Utc;
use mime::Mime;
use serde::Serialize;
use tracing::{info, warn};

use super::audit::{self, AuditDraft};
use super::domain::{
    AuditAction, AuditChanges, AuditLogEntry, BonusActivity, BonusActivityId, EntityType,
    ImageLocator, Pairing, PointsChange, StatusChange, Submission, SubmissionId,
    SubmissionStatus, UserId,
};
use super::error::{require_reason, ProgramError};
use super::ledger::apply_delta;
use super::storage::FileStorage;
use super::store::{
    run_transaction, Document, DocumentStore, DocumentStoreExt, Filter, Transaction,
};
use crate::config::ProgramConfig;

pub const MAX_WEEK_NUMBER: u32 = 53;
pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 9999;

/// Request to record a photo that is already in file storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubmission {
    pub submitter_id: UserId,
    pub week_number: u32,
    pub year: i32,
    pub image: ImageLocator,
    pub bonus_activity_ids: Vec<BonusActivityId>,
}

/// Request carrying the photo bytes themselves.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub submitter_id: UserId,
    pub week_number: u32,
    pub year: i32,
    pub bytes: Vec<u8>,
    pub content_type: Mime,
    pub bonus_activity_ids: Vec<BonusActivityId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Reject { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub submission: Submission,
    /// Present only for approvals.
    pub pairing_points: Option<PointsChange>,
    pub audit_entry: AuditLogEntry,
}

pub struct SubmissionReview<'a> {
    store: &'a dyn DocumentStore,
    files: &'a dyn FileStorage,
    config: ProgramConfig,
}

impl<'a> SubmissionReview<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        files: &'a dyn FileStorage,
        config: ProgramConfig,
    ) -> Self {
        Self {
            store,
            files,
            config,
        }
    }

    pub fn approve(
        &self,
        submission_id: &SubmissionId,
        reviewer_id: &UserId,
    ) -> Result<ReviewOutcome, ProgramError> {
        self.review(submission_id, reviewer_id, ReviewDecision::Approve)
    }

    pub fn reject(
        &self,
        submission_id: &SubmissionId,
        reviewer_id: &UserId,
        reason: &str,
    ) -> Result<ReviewOutcome, ProgramError> {
        let reason = require_reason(reason)?;
        self.review(submission_id, reviewer_id, ReviewDecision::Reject { reason })
    }

    pub fn review(
        &self,
        submission_id: &SubmissionId,
        reviewer_id: &UserId,
        decision: ReviewDecision,
    ) -> Result<ReviewOutcome, ProgramError> {
        if let ReviewDecision::Reject { reason } = &decision {
            require_reason(reason)?;
        }

        let outcome = run_transaction(self.store, self.config.transaction_attempts, |txn| {
            apply_review(txn, submission_id, reviewer_id, &decision)
        })?;

        info!(
            submission = %submission_id,
            reviewer = %reviewer_id,
            status = outcome.submission.status.label(),
            pairing = %outcome.submission.pairing_id,
            delta = outcome.pairing_points.map(|change| change.delta).unwrap_or(0),
            "submission reviewed"
        );
        Ok(outcome)
    }

    /// Records a pending submission with frozen base and bonus points. The ledger is not
    /// touched until an administrator approves it.
    pub fn create(&self, request: NewSubmission) -> Result<Submission, ProgramError> {
        validate_period(request.week_number, request.year)?;
        if request.image.as_str().trim().is_empty() {
            return Err(ProgramError::Validation(
                "image locator required".to_string(),
            ));
        }

        let pairing = self.resolve_pairing(&request.submitter_id)?;
        self.ensure_open_week(&pairing, request.week_number, request.year)?;

        let (bonus_activity_ids, bonus_points) =
            self.snapshot_bonuses(&request.bonus_activity_ids)?;
        let base_points = self.config.base_points;
        let total_points = base_points.checked_add(bonus_points).ok_or_else(|| {
            ProgramError::Validation("submission point total overflows".to_string())
        })?;

        let id = SubmissionId(self.store.allocate_id(Submission::COLLECTION)?);
        let submission = Submission {
            id: id.clone(),
            pairing_id: pairing.id.clone(),
            submitter_id: request.submitter_id.clone(),
            week_number: request.week_number,
            year: request.year,
            image: request.image,
            status: SubmissionStatus::Pending,
            base_points,
            bonus_points,
            total_points,
            bonus_activity_ids,
            reviewer_id: None,
            reviewed_at: None,
            review_reason: None,
            created_at: Utc::now(),
        };

        run_transaction(
            self.store,
            self.config.transaction_attempts,
            |txn| -> Result<(), ProgramError> {
                txn.set(&submission)?;
                audit::stage(
                    txn,
                    AuditDraft::new(
                        AuditAction::SubmissionCreated,
                        EntityType::Submission,
                        id.as_str(),
                        &submission.submitter_id,
                    )
                    .pairing(&submission.pairing_id)
                    .subject(&submission.submitter_id),
                )?;
                Ok(())
            },
        )?;

        info!(
            submission = %id,
            pairing = %submission.pairing_id,
            submitter = %submission.submitter_id,
            week = submission.week_number,
            year = submission.year,
            total_points,
            "submission created"
        );
        Ok(submission)
    }

    /// Uploads the photo, then records the submission. A failed creation removes the
    /// upload again so no unreferenced image is left behind.
    pub fn submit_photo(&self, upload: PhotoUpload) -> Result<Submission, ProgramError> {
        validate_period(upload.week_number, upload.year)?;
        if upload.content_type.type_() != mime::IMAGE {
            return Err(ProgramError::Validation(format!(
                "expected an image upload, got {}",
                upload.content_type.essence_str()
            )));
        }
        if upload.bytes.is_empty() {
            return Err(ProgramError::Validation("photo is empty".to_string()));
        }

        let image = self.files.store(&upload.bytes, &upload.content_type)?;
        let request = NewSubmission {
            submitter_id: upload.submitter_id,
            week_number: upload.week_number,
            year: upload.year,
            image: image.clone(),
            bonus_activity_ids: upload.bonus_activity_ids,
        };

        match self.create(request) {
            Ok(submission) => Ok(submission),
            Err(err) => {
                if let Err(cleanup) = self.files.delete(&image) {
                    warn!(
                        image = %image,
                        error = %cleanup,
                        "failed to remove photo of rejected upload"
                    );
                }
                Err(err)
            }
        }
    }

    /// Mentor role is checked before mentee membership.
    fn resolve_pairing(&self, submitter_id: &UserId) -> Result<Pairing, ProgramError> {
        let as_mentor = self
            .store
            .find::<Pairing>(&Filter::field_eq("mentor_id", submitter_id.as_str()))?;
        if let Some(pairing) = as_mentor.into_iter().next() {
            return Ok(pairing);
        }

        let as_mentee = self
            .store
            .find::<Pairing>(&Filter::array_contains("mentee_ids", submitter_id.as_str()))?;
        as_mentee.into_iter().next().ok_or_else(|| {
            ProgramError::Precondition(format!("user {submitter_id} is not part of a pairing"))
        })
    }

    fn ensure_open_week(
        &self,
        pairing: &Pairing,
        week_number: u32,
        year: i32,
    ) -> Result<(), ProgramError> {
        let existing = self.store.find::<Submission>(&Filter::And(vec![
            Filter::field_eq("pairing_id", pairing.id.as_str()),
            Filter::field_eq("week_number", week_number),
            Filter::field_eq("year", year),
        ]))?;

        if existing
            .iter()
            .any(|submission| submission.status != SubmissionStatus::Rejected)
        {
            return Err(ProgramError::Precondition(format!(
                "pairing {} already has a submission for week {week_number} of {year}",
                pairing.id
            )));
        }
        Ok(())
    }

    /// Point-in-time snapshot: only bonuses active right now count, at their current value.
    fn snapshot_bonuses(
        &self,
        requested: &[BonusActivityId],
    ) -> Result<(Vec<BonusActivityId>, u64), ProgramError> {
        let mut honored: Vec<BonusActivityId> = Vec::new();
        let mut points: u64 = 0;

        for bonus_id in requested {
            if honored.contains(bonus_id) {
                continue;
            }
            match self.store.fetch::<BonusActivity>(bonus_id.as_str())? {
                Some(bonus) if bonus.is_active => {
                    points = points.checked_add(bonus.points).ok_or_else(|| {
                        ProgramError::Validation("bonus point total overflows".to_string())
                    })?;
                    honored.push(bonus_id.clone());
                }
                Some(_) => warn!(bonus = %bonus_id, "skipping inactive bonus activity"),
                None => warn!(bonus = %bonus_id, "skipping unknown bonus activity"),
            }
        }

        Ok((honored, points))
    }
}

/// Status check and every write of one review, inside a single transaction.
fn apply_review(
    txn: &mut Transaction<'_>,
    submission_id: &SubmissionId,
    reviewer_id: &UserId,
    decision: &ReviewDecision,
) -> Result<ReviewOutcome, ProgramError> {
    let mut submission: Submission = txn
        .get(submission_id.as_str())?
        .ok_or_else(|| ProgramError::not_found("submission", submission_id))?;

    if submission.status.is_terminal() {
        return Err(ProgramError::Conflict(format!(
            "submission {submission_id} already reviewed ({})",
            submission.status.label()
        )));
    }

    submission.reviewer_id = Some(reviewer_id.clone());
    submission.reviewed_at = Some(Utc::now());

    let (action, pairing_points, reason) = match decision {
        ReviewDecision::Approve => {
            let mut pairing: Pairing = txn
                .get(submission.pairing_id.as_str())?
                .ok_or_else(|| {
                    ProgramError::Precondition(format!(
                        "pairing {} of submission {submission_id} no longer exists",
                        submission.pairing_id
                    ))
                })?;
            let delta = i64::try_from(submission.total_points).map_err(|_| {
                ProgramError::Validation(format!(
                    "submission {submission_id} carries an out-of-range point total"
                ))
            })?;
            let change = apply_delta(&mut pairing, delta)?;
            txn.set(&pairing)?;

            submission.status = SubmissionStatus::Approved;
            (AuditAction::SubmissionApproved, Some(change), None)
        }
        ReviewDecision::Reject { reason } => {
            let reason = reason.trim().to_string();
            submission.status = SubmissionStatus::Rejected;
            submission.review_reason = Some(reason.clone());
            submission.base_points = 0;
            submission.bonus_points = 0;
            submission.total_points = 0;
            (AuditAction::SubmissionRejected, None, Some(reason))
        }
    };

    txn.set(&submission)?;

    let audit_entry = audit::stage(
        txn,
        AuditDraft::new(
            action,
            EntityType::Submission,
            submission_id.as_str(),
            reviewer_id,
        )
        .pairing(&submission.pairing_id)
        .subject(&submission.submitter_id)
        .changes(AuditChanges {
            status: Some(StatusChange {
                from: SubmissionStatus::Pending,
                to: submission.status,
            }),
            points: pairing_points,
            reason,
            cascade: None,
        }),
    )?;

    Ok(ReviewOutcome {
        submission,
        pairing_points,
        audit_entry,
    })
}

fn validate_period(week_number: u32, year: i32) -> Result<(), ProgramError> {
    if !(1..=MAX_WEEK_NUMBER).contains(&week_number) {
        return Err(ProgramError::Validation(format!(
            "week number must be between 1 and {MAX_WEEK_NUMBER}, got {week_number}"
        )));
    }
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(ProgramError::Validation(format!(
            "year must be between {MIN_YEAR} and {MAX_YEAR}, got {year}"
        )));
    }
    Ok(())
}

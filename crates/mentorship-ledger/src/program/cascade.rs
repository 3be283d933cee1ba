//! Referential cleanup for deleted users, families, and pairings.
//!
//! The store has no foreign keys, so every delete walks the collections that may point at
//! the removed id. Each step commits on its own and is a no-op when its target is already
//! gone: a failed cascade reports the error, keeps what it already removed, and can simply
//! be re-run. Photos are deleted before their submission document so an interruption
//! leaves an orphaned document rather than a document pointing at a missing image.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::audit::{self, AuditDraft};
use super::domain::{
    ApplicationStatus, AuditAction, AuditChanges, CascadeReport, EntityType, Family, FamilyId,
    MentorshipApplication, Pairing, PairingId, Submission, User, UserId,
};
use super::error::ProgramError;
use super::identity::{IdentityError, IdentityProvider};
use super::storage::FileStorage;
use super::store::{
    run_transaction, Collection, Document, DocumentStore, DocumentStoreExt, Filter,
    Transaction,
};

/// What a single-document membership edit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detach {
    Missing,
    Unchanged,
    Updated,
    /// The last required member left; the caller removes the document.
    Emptied,
}

pub struct CascadeEngine<'a> {
    store: &'a dyn DocumentStore,
    files: &'a dyn FileStorage,
    identity: &'a dyn IdentityProvider,
    attempts: u32,
}

impl<'a> CascadeEngine<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        files: &'a dyn FileStorage,
        identity: &'a dyn IdentityProvider,
        attempts: u32,
    ) -> Self {
        Self {
            store,
            files,
            identity,
            attempts,
        }
    }

    pub fn delete_user(
        &self,
        user_id: &UserId,
        actor_id: &UserId,
    ) -> Result<CascadeReport, ProgramError> {
        let mut report = CascadeReport::default();
        let user: Option<User> = self.store.fetch(user_id.as_str())?;

        if let Some(user) = &user {
            report.applications_deleted += self.delete_pending_applications(&user.email)?;
        }

        let submitted = self
            .store
            .find::<Submission>(&Filter::field_eq("submitter_id", user_id.as_str()))?;
        for submission in &submitted {
            self.delete_submission(submission, &mut report)?;
        }

        let mentored = self
            .store
            .find::<Pairing>(&Filter::field_eq("mentor_id", user_id.as_str()))?;
        for pairing in &mentored {
            self.remove_pairing(&pairing.id, actor_id, &mut report)?;
        }

        let mentee_of = self
            .store
            .find::<Pairing>(&Filter::array_contains("mentee_ids", user_id.as_str()))?;
        for pairing in &mentee_of {
            match self.detach_mentee(&pairing.id, user_id)? {
                Detach::Updated => report.pairings_updated += 1,
                Detach::Emptied => self.remove_pairing(&pairing.id, actor_id, &mut report)?,
                Detach::Missing | Detach::Unchanged => {}
            }
        }

        for family_id in self.families_listing(user_id)? {
            match self.detach_family_member(&family_id, user_id)? {
                Detach::Updated => report.families_updated += 1,
                Detach::Emptied => {
                    self.remove_family(&family_id, actor_id, Some(user_id), &mut report)?
                }
                Detach::Missing | Detach::Unchanged => {}
            }
        }

        match self.identity.delete_identity(user_id) {
            Ok(()) => report.identity_deleted = true,
            Err(IdentityError::NotFound(_)) => {
                debug!(user = %user_id, "identity already removed");
            }
            Err(err) => {
                warn!(
                    user = %user_id,
                    error = %err,
                    "identity cleanup failed; domain cleanup continues"
                );
            }
        }

        self.remove_recorded::<User>(
            user_id.as_str(),
            &mut report,
            |summary| summary.user_deleted = true,
            |summary| {
                AuditDraft::new(
                    AuditAction::UserDeleted,
                    EntityType::User,
                    user_id.as_str(),
                    actor_id,
                )
                .subject(user_id)
                .changes(AuditChanges {
                    cascade: Some(summary),
                    ..AuditChanges::default()
                })
            },
        )?;

        info!(
            user = %user_id,
            actor = %actor_id,
            submissions = report.submissions_deleted,
            pairings_deleted = report.pairings_deleted,
            families_deleted = report.families_deleted,
            "user deleted"
        );
        Ok(report)
    }

    pub fn delete_pairing(
        &self,
        pairing_id: &PairingId,
        actor_id: &UserId,
    ) -> Result<CascadeReport, ProgramError> {
        let mut report = CascadeReport::default();
        self.remove_pairing(pairing_id, actor_id, &mut report)?;
        Ok(report)
    }

    pub fn delete_family(
        &self,
        family_id: &FamilyId,
        actor_id: &UserId,
    ) -> Result<CascadeReport, ProgramError> {
        let mut report = CascadeReport::default();
        self.remove_family(family_id, actor_id, None, &mut report)?;
        Ok(report)
    }

    fn delete_pending_applications(&self, email: &str) -> Result<u32, ProgramError> {
        let email = User::normalize_email(email);
        let applications = self
            .store
            .find::<MentorshipApplication>(&Filter::field_eq("status", "pending"))?;

        let mut deleted = 0;
        for application in applications.iter().filter(|application| {
            application.status == ApplicationStatus::Pending
                && User::normalize_email(&application.email) == email
        }) {
            self.store
                .remove::<MentorshipApplication>(application.id.as_str())?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Photo first, then the document. A storage failure is logged and counted.
    fn delete_submission(
        &self,
        submission: &Submission,
        report: &mut CascadeReport,
    ) -> Result<(), ProgramError> {
        match self.files.delete(&submission.image) {
            Ok(()) => report.images_deleted += 1,
            Err(err) => {
                warn!(
                    submission = %submission.id,
                    image = %submission.image,
                    error = %err,
                    "photo delete failed; removing submission anyway"
                );
                report.image_failures += 1;
            }
        }

        self.store.remove::<Submission>(submission.id.as_str())?;
        report.submissions_deleted += 1;
        Ok(())
    }

    fn remove_pairing(
        &self,
        pairing_id: &PairingId,
        actor_id: &UserId,
        report: &mut CascadeReport,
    ) -> Result<(), ProgramError> {
        let mut local = CascadeReport::default();

        let submissions = self
            .store
            .find::<Submission>(&Filter::field_eq("pairing_id", pairing_id.as_str()))?;
        for submission in &submissions {
            self.delete_submission(submission, &mut local)?;
        }

        self.remove_recorded::<Pairing>(
            pairing_id.as_str(),
            &mut local,
            |summary| summary.pairings_deleted += 1,
            |summary| {
                AuditDraft::new(
                    AuditAction::PairingDeleted,
                    EntityType::Pairing,
                    pairing_id.as_str(),
                    actor_id,
                )
                .pairing(pairing_id)
                .changes(AuditChanges {
                    cascade: Some(summary),
                    ..AuditChanges::default()
                })
            },
        )?;

        if !local.is_noop() {
            info!(
                pairing = %pairing_id,
                submissions = local.submissions_deleted,
                "pairing deleted"
            );
        }

        report.absorb(&local);
        Ok(())
    }

    /// `departing` is a user whose own document is about to be removed and needs no
    /// back-reference cleanup.
    fn remove_family(
        &self,
        family_id: &FamilyId,
        actor_id: &UserId,
        departing: Option<&UserId>,
        report: &mut CascadeReport,
    ) -> Result<(), ProgramError> {
        let mut local = CascadeReport::default();

        let pairings = self
            .store
            .find::<Pairing>(&Filter::field_eq("family_id", family_id.as_str()))?;
        for pairing in &pairings {
            self.remove_pairing(&pairing.id, actor_id, &mut local)?;
        }

        let members = self
            .store
            .find::<User>(&Filter::field_eq("family_id", family_id.as_str()))?;
        for member in members
            .iter()
            .filter(|member| Some(&member.id) != departing)
        {
            let mut fields = Map::new();
            fields.insert("family_id".to_string(), Value::Null);
            self.store
                .update(Collection::Users, member.id.as_str(), fields)?;
            local.users_detached += 1;
        }

        self.remove_recorded::<Family>(
            family_id.as_str(),
            &mut local,
            |summary| summary.families_deleted += 1,
            |summary| {
                AuditDraft::new(
                    AuditAction::FamilyDeleted,
                    EntityType::Family,
                    family_id.as_str(),
                    actor_id,
                )
                .changes(AuditChanges {
                    cascade: Some(summary),
                    ..AuditChanges::default()
                })
            },
        )?;

        if !local.is_noop() {
            info!(family = %family_id, pairings = local.pairings_deleted, "family deleted");
        }

        report.absorb(&local);
        Ok(())
    }

    /// Removes the target document and its audit entry in one commit, so a failed audit
    /// write leaves the target in place for the retry. Without a target document, cleanup
    /// of dangling references is recorded on its own.
    fn remove_recorded<D: Document>(
        &self,
        id: &str,
        local: &mut CascadeReport,
        mark_removed: impl Fn(&mut CascadeReport),
        draft: impl Fn(CascadeReport) -> AuditDraft,
    ) -> Result<(), ProgramError> {
        let removed = run_transaction(
            self.store,
            self.attempts,
            |txn| -> Result<Option<CascadeReport>, ProgramError> {
                if txn.get::<D>(id)?.is_none() {
                    return Ok(None);
                }
                let mut summary = local.clone();
                mark_removed(&mut summary);
                txn.delete::<D>(id);
                audit::stage(txn, draft(summary.clone()))?;
                Ok(Some(summary))
            },
        )?;

        match removed {
            Some(summary) => *local = summary,
            None if !local.is_noop() => {
                audit::append(self.store, draft(local.clone()))?;
            }
            None => {}
        }
        Ok(())
    }

    fn families_listing(&self, user_id: &UserId) -> Result<BTreeSet<FamilyId>, ProgramError> {
        let mut family_ids = BTreeSet::new();
        for field in ["member_ids", "family_head_ids", "aunt_uncle_ids"] {
            let families = self
                .store
                .find::<Family>(&Filter::array_contains(field, user_id.as_str()))?;
            family_ids.extend(families.into_iter().map(|family| family.id));
        }
        Ok(family_ids)
    }

    fn detach_mentee(
        &self,
        pairing_id: &PairingId,
        user_id: &UserId,
    ) -> Result<Detach, ProgramError> {
        run_transaction(self.store, self.attempts, |txn| {
            detach_mentee_in(txn, pairing_id, user_id)
        })
    }

    fn detach_family_member(
        &self,
        family_id: &FamilyId,
        user_id: &UserId,
    ) -> Result<Detach, ProgramError> {
        run_transaction(self.store, self.attempts, |txn| {
            detach_family_member_in(txn, family_id, user_id)
        })
    }
}

fn detach_mentee_in(
    txn: &mut Transaction<'_>,
    pairing_id: &PairingId,
    user_id: &UserId,
) -> Result<Detach, ProgramError> {
    let Some(mut pairing) = txn.get::<Pairing>(pairing_id.as_str())? else {
        return Ok(Detach::Missing);
    };
    if !pairing.mentee_ids.contains(user_id) {
        return Ok(Detach::Unchanged);
    }

    pairing.mentee_ids.retain(|id| id != user_id);
    if pairing.mentee_ids.is_empty() {
        return Ok(Detach::Emptied);
    }

    txn.set(&pairing)?;
    Ok(Detach::Updated)
}

fn detach_family_member_in(
    txn: &mut Transaction<'_>,
    family_id: &FamilyId,
    user_id: &UserId,
) -> Result<Detach, ProgramError> {
    let Some(mut family) = txn.get::<Family>(family_id.as_str())? else {
        return Ok(Detach::Missing);
    };
    if !family.remove_member(user_id) {
        return Ok(Detach::Unchanged);
    }
    if family.member_ids.is_empty() {
        return Ok(Detach::Emptied);
    }

    txn.set(&family)?;
    Ok(Detach::Updated)
}

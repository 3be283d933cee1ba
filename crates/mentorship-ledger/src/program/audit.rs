//! Append-only audit trail. Entries are written in the same commit as the mutation they
//! describe, or immediately after it for non-transactional cascades; they are never
//! updated or removed.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Deserialize;

use super::domain::{
    AuditAction, AuditChanges, AuditEntryId, AuditLogEntry, EntityType, PairingId, UserId,
};
use super::store::{
    Collection, DocumentStore, DocumentStoreExt, Filter, StoreError, Transaction,
};

/// Audit entry awaiting an id and timestamp.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub actor_id: UserId,
    pub pairing_id: Option<PairingId>,
    pub subject_user_id: Option<UserId>,
    pub changes: AuditChanges,
}

impl AuditDraft {
    pub fn new(
        action: AuditAction,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        actor_id: &UserId,
    ) -> Self {
        Self {
            action,
            entity_type,
            entity_id: entity_id.into(),
            actor_id: actor_id.clone(),
            pairing_id: None,
            subject_user_id: None,
            changes: AuditChanges::default(),
        }
    }

    pub fn pairing(mut self, pairing_id: &PairingId) -> Self {
        self.pairing_id = Some(pairing_id.clone());
        self
    }

    pub fn subject(mut self, user_id: &UserId) -> Self {
        self.subject_user_id = Some(user_id.clone());
        self
    }

    pub fn changes(mut self, changes: AuditChanges) -> Self {
        self.changes = changes;
        self
    }

    fn into_entry(self, id: String) -> AuditLogEntry {
        AuditLogEntry {
            id: AuditEntryId(id),
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            actor_id: self.actor_id,
            pairing_id: self.pairing_id,
            subject_user_id: self.subject_user_id,
            changes: self.changes,
            timestamp: Utc::now(),
        }
    }
}

/// Adds the entry to an open transaction so it commits together with the mutation.
pub fn stage(
    transaction: &mut Transaction<'_>,
    draft: AuditDraft,
) -> Result<AuditLogEntry, StoreError> {
    let id = transaction.allocate_id(Collection::AuditLog)?;
    let entry = draft.into_entry(id);
    transaction.set(&entry)?;
    Ok(entry)
}

/// Writes the entry on its own, for mutations that already committed.
pub fn append(store: &dyn DocumentStore, draft: AuditDraft) -> Result<AuditLogEntry, StoreError> {
    let id = store.allocate_id(Collection::AuditLog)?;
    let entry = draft.into_entry(id);
    store.put(&entry)?;
    Ok(entry)
}

/// Selector for [`trail`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AuditSubject {
    Pairing(PairingId),
    /// Entries the user performed or that concern them.
    User(UserId),
}

/// Entries for the subject in the order the store allocated their ids.
pub fn trail(
    store: &dyn DocumentStore,
    subject: &AuditSubject,
) -> Result<Vec<AuditLogEntry>, StoreError> {
    let filters = match subject {
        AuditSubject::Pairing(pairing_id) => {
            vec![Filter::field_eq("pairing_id", pairing_id.as_str())]
        }
        AuditSubject::User(user_id) => vec![
            Filter::field_eq("actor_id", user_id.as_str()),
            Filter::field_eq("subject_user_id", user_id.as_str()),
            Filter::And(vec![
                Filter::field_eq("entity_type", "user"),
                Filter::field_eq("entity_id", user_id.as_str()),
            ]),
        ],
    };

    let mut entries = BTreeMap::new();
    for filter in &filters {
        for entry in store.find::<AuditLogEntry>(filter)? {
            entries.insert(entry.id.clone(), entry);
        }
    }

    // Ids come from a per-store sequence, zero padded, so key order is allocation order.
    Ok(entries.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::store::MemoryDocumentStore;

    #[test]
    fn user_trail_merges_actor_and_subject_entries_once() {
        let store = MemoryDocumentStore::new();
        let mentee = UserId::from("usr-mentee");
        let admin = UserId::from("usr-admin");
        let pairing = PairingId::from("par-1");

        let created = append(
            &store,
            AuditDraft::new(
                AuditAction::SubmissionCreated,
                EntityType::Submission,
                "sub-1",
                &mentee,
            )
            .pairing(&pairing)
            .subject(&mentee),
        )
        .expect("append");
        let approved = append(
            &store,
            AuditDraft::new(
                AuditAction::SubmissionApproved,
                EntityType::Submission,
                "sub-1",
                &admin,
            )
            .pairing(&pairing)
            .subject(&mentee),
        )
        .expect("append");
        let deleted = append(
            &store,
            AuditDraft::new(
                AuditAction::UserDeleted,
                EntityType::User,
                mentee.as_str(),
                &admin,
            ),
        )
        .expect("append");

        let ids: Vec<AuditEntryId> = trail(&store, &AuditSubject::User(mentee))
            .expect("trail")
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, vec![created.id, approved.id.clone(), deleted.id.clone()]);

        let admin_ids: Vec<AuditEntryId> = trail(&store, &AuditSubject::User(admin))
            .expect("trail")
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(admin_ids, vec![approved.id, deleted.id]);
    }

    #[test]
    fn trail_follows_id_allocation_rather_than_clock() {
        let store = MemoryDocumentStore::new();
        let admin = UserId::from("usr-admin");
        let pairing = PairingId::from("par-2");
        let draft = || {
            AuditDraft::new(
                AuditAction::PointsAdjusted,
                EntityType::Pairing,
                pairing.as_str(),
                &admin,
            )
            .pairing(&pairing)
        };

        let first = append(&store, draft()).expect("append");
        let mut second = append(&store, draft()).expect("append");
        second.timestamp = first.timestamp - chrono::Duration::seconds(30);
        store.put(&second).expect("skew clock");

        let ids: Vec<AuditEntryId> = trail(&store, &AuditSubject::Pairing(pairing.clone()))
            .expect("trail")
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn subject_selector_reads_tagged_json() {
        let subject: AuditSubject =
            serde_json::from_str(r#"{ "kind": "pairing", "id": "par-7" }"#).expect("parse");
        assert_eq!(subject, AuditSubject::Pairing(PairingId::from("par-7")));
    }
}

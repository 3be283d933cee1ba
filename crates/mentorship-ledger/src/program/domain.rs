use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::{Collection, Document};

macro_rules! document_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

document_id!(
    /// Identifier of a program participant.
    UserId
);
document_id!(FamilyId);
document_id!(PairingId);
document_id!(SubmissionId);
document_id!(BonusActivityId);
document_id!(AuditEntryId);
document_id!(ApplicationId);
document_id!(
    /// Opaque handle returned by file storage for an uploaded photo.
    ImageLocator
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Mentor,
    Mentee,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Mentor => "mentor",
            Role::Mentee => "mentee",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Stored lowercased; see [`User::normalize_email`].
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub family_id: Option<FamilyId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn normalize_email(raw: &str) -> String {
        raw.trim().to_lowercase()
    }
}

/// Social grouping of pairings. Point totals are aggregated from pairings at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Family {
    pub id: FamilyId,
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<UserId>,
    #[serde(default)]
    pub family_head_ids: Vec<UserId>,
    #[serde(default)]
    pub aunt_uncle_ids: Vec<UserId>,
    #[serde(default)]
    pub is_archived: bool,
}

impl Family {
    /// Drops the user from every membership list. Returns whether anything changed.
    pub fn remove_member(&mut self, user_id: &UserId) -> bool {
        let before =
            self.member_ids.len() + self.family_head_ids.len() + self.aunt_uncle_ids.len();
        self.member_ids.retain(|id| id != user_id);
        self.family_head_ids.retain(|id| id != user_id);
        self.aunt_uncle_ids.retain(|id| id != user_id);
        let after =
            self.member_ids.len() + self.family_head_ids.len() + self.aunt_uncle_ids.len();
        before != after
    }
}

/// One mentor and at least one mentee; the unit that accumulates points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    pub id: PairingId,
    pub family_id: FamilyId,
    pub mentor_id: UserId,
    pub mentee_ids: Vec<UserId>,
    #[serde(default)]
    pub weekly_points: u64,
    #[serde(default)]
    pub total_points: u64,
}

impl Pairing {
    pub fn includes(&self, user_id: &UserId) -> bool {
        &self.mentor_id == user_id || self.mentee_ids.contains(user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, SubmissionStatus::Pending)
    }
}

/// Weekly proof-of-meetup photo. Point values are frozen when the document is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub pairing_id: PairingId,
    pub submitter_id: UserId,
    pub week_number: u32,
    pub year: i32,
    pub image: ImageLocator,
    pub status: SubmissionStatus,
    pub base_points: u64,
    pub bonus_points: u64,
    pub total_points: u64,
    #[serde(default)]
    pub bonus_activity_ids: Vec<BonusActivityId>,
    #[serde(default)]
    pub reviewer_id: Option<UserId>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusActivity {
    pub id: BonusActivityId,
    pub name: String,
    pub points: u64,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Declined,
}

/// Sign-up application submitted before a participant account exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentorshipApplication {
    pub id: ApplicationId,
    pub email: String,
    pub name: String,
    pub status: ApplicationStatus,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    SubmissionCreated,
    SubmissionApproved,
    SubmissionRejected,
    PointsAdjusted,
    PairingDeleted,
    FamilyDeleted,
    UserDeleted,
}

impl AuditAction {
    pub const fn label(self) -> &'static str {
        match self {
            AuditAction::SubmissionCreated => "submission_created",
            AuditAction::SubmissionApproved => "submission_approved",
            AuditAction::SubmissionRejected => "submission_rejected",
            AuditAction::PointsAdjusted => "points_adjusted",
            AuditAction::PairingDeleted => "pairing_deleted",
            AuditAction::FamilyDeleted => "family_deleted",
            AuditAction::UserDeleted => "user_deleted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Family,
    Pairing,
    Submission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsChange {
    pub previous_points: u64,
    pub delta: i64,
    pub new_points: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: SubmissionStatus,
    pub to: SubmissionStatus,
}

/// Tally of the compensating writes performed by one cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeReport {
    pub applications_deleted: u32,
    pub submissions_deleted: u32,
    pub images_deleted: u32,
    pub image_failures: u32,
    pub pairings_deleted: u32,
    pub pairings_updated: u32,
    pub families_deleted: u32,
    pub families_updated: u32,
    pub users_detached: u32,
    pub user_deleted: bool,
    pub identity_deleted: bool,
}

impl CascadeReport {
    pub fn absorb(&mut self, other: &CascadeReport) {
        self.applications_deleted += other.applications_deleted;
        self.submissions_deleted += other.submissions_deleted;
        self.images_deleted += other.images_deleted;
        self.image_failures += other.image_failures;
        self.pairings_deleted += other.pairings_deleted;
        self.pairings_updated += other.pairings_updated;
        self.families_deleted += other.families_deleted;
        self.families_updated += other.families_updated;
        self.users_detached += other.users_detached;
        self.user_deleted |= other.user_deleted;
        self.identity_deleted |= other.identity_deleted;
    }

    /// True when neither a stored document nor the identity record was touched.
    pub fn is_noop(&self) -> bool {
        self.applications_deleted == 0
            && self.submissions_deleted == 0
            && self.pairings_deleted == 0
            && self.pairings_updated == 0
            && self.families_deleted == 0
            && self.families_updated == 0
            && self.users_detached == 0
            && !self.user_deleted
            && !self.identity_deleted
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<PointsChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cascade: Option<CascadeReport>,
}

/// Append-only record of one committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditEntryId,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub actor_id: UserId,
    /// Pairing whose ledger or lifecycle the entry concerns, when there is one.
    #[serde(default)]
    pub pairing_id: Option<PairingId>,
    /// Participant the entry concerns (submitter, deleted user).
    #[serde(default)]
    pub subject_user_id: Option<UserId>,
    pub changes: AuditChanges,
    pub timestamp: DateTime<Utc>,
}

impl Document for User {
    const COLLECTION: Collection = Collection::Users;

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Document for Family {
    const COLLECTION: Collection = Collection::Families;

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Document for Pairing {
    const COLLECTION: Collection = Collection::Pairings;

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Document for Submission {
    const COLLECTION: Collection = Collection::Submissions;

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Document for BonusActivity {
    const COLLECTION: Collection = Collection::BonusActivities;

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Document for MentorshipApplication {
    const COLLECTION: Collection = Collection::Applications;

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Document for AuditLogEntry {
    const COLLECTION: Collection = Collection::AuditLog;

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

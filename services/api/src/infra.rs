use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use mentorship_ledger::program::domain::{
    ApplicationId, ApplicationStatus, BonusActivity, BonusActivityId, Family, FamilyId,
    ImageLocator, MentorshipApplication, Pairing, PairingId, Role, User, UserId,
};
use mentorship_ledger::program::store::{DocumentStoreExt, MemoryDocumentStore, StoreError};
use mentorship_ledger::program::{FileStorage, IdentityError, IdentityProvider, StorageError};
use mime_guess::mime::Mime;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Process-local photo storage for development and demos.
#[derive(Default, Clone)]
pub(crate) struct InMemoryFileStorage {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryFileStorage {
    pub(crate) fn len(&self) -> usize {
        self.files.lock().map(|files| files.len()).unwrap_or(0)
    }
}

impl FileStorage for InMemoryFileStorage {
    fn store(&self, bytes: &[u8], content_type: &Mime) -> Result<ImageLocator, StorageError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let extension = mime_guess::get_mime_extensions(content_type)
            .and_then(|extensions| extensions.first())
            .copied()
            .unwrap_or("bin");
        let locator = format!("memory://photos/{sequence:06}.{extension}");

        let mut files = self
            .files
            .lock()
            .map_err(|_| StorageError::Backend("photo store lock poisoned".to_string()))?;
        files.insert(locator.clone(), bytes.to_vec());
        Ok(ImageLocator(locator))
    }

    fn delete(&self, locator: &ImageLocator) -> Result<(), StorageError> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| StorageError::Backend("photo store lock poisoned".to_string()))?;
        if files.remove(locator.as_str()).is_none() {
            debug!(image = %locator, "photo already absent");
        }
        Ok(())
    }
}

/// Identity directory seeded with the participants created locally.
#[derive(Default, Clone)]
pub(crate) struct InMemoryIdentityProvider {
    accounts: Arc<Mutex<BTreeSet<UserId>>>,
}

impl InMemoryIdentityProvider {
    pub(crate) fn register(&self, user_id: &UserId) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.insert(user_id.clone());
        }
    }
}

impl IdentityProvider for InMemoryIdentityProvider {
    fn delete_identity(&self, user_id: &UserId) -> Result<(), IdentityError> {
        let mut accounts = self.accounts.lock().map_err(|_| {
            IdentityError::Unavailable("account directory lock poisoned".to_string())
        })?;
        if accounts.remove(user_id) {
            Ok(())
        } else {
            Err(IdentityError::NotFound(user_id.clone()))
        }
    }
}

pub(crate) const DEMO_ADMIN: &str = "usr-admin";
pub(crate) const DEMO_MENTOR: &str = "usr-maya";
pub(crate) const DEMO_MENTEE: &str = "usr-jonah";
pub(crate) const DEMO_SECOND_MENTOR: &str = "usr-priya";
pub(crate) const DEMO_SECOND_MENTEE: &str = "usr-theo";
pub(crate) const DEMO_FAMILY: &str = "fam-lighthouse";
pub(crate) const DEMO_PAIRING: &str = "par-maya-jonah";
pub(crate) const DEMO_SECOND_PAIRING: &str = "par-priya-theo";
pub(crate) const DEMO_BONUS: &str = "bon-museum";

/// Loads one family with two pairings, an active bonus activity, and a pending application.
pub(crate) fn seed_demo_roster(
    store: &MemoryDocumentStore,
    identity: &InMemoryIdentityProvider,
) -> Result<(), StoreError> {
    let now = Utc::now();
    let roster = [
        (DEMO_ADMIN, "Program Admin", Role::Admin, None),
        (DEMO_MENTOR, "Maya", Role::Mentor, Some(DEMO_FAMILY)),
        (DEMO_MENTEE, "Jonah", Role::Mentee, Some(DEMO_FAMILY)),
        (DEMO_SECOND_MENTOR, "Priya", Role::Mentor, Some(DEMO_FAMILY)),
        (DEMO_SECOND_MENTEE, "Theo", Role::Mentee, Some(DEMO_FAMILY)),
    ];
    for (id, name, role, family) in roster {
        let user = User {
            id: UserId::from(id),
            name: name.to_string(),
            email: User::normalize_email(&format!("{name}@mentors.example")),
            role,
            family_id: family.map(FamilyId::from),
            created_at: now,
            updated_at: now,
        };
        store.put(&user)?;
        identity.register(&user.id);
    }

    store.put(&Family {
        id: FamilyId::from(DEMO_FAMILY),
        name: "Lighthouse".to_string(),
        member_ids: [DEMO_MENTOR, DEMO_MENTEE, DEMO_SECOND_MENTOR, DEMO_SECOND_MENTEE]
            .into_iter()
            .map(UserId::from)
            .collect(),
        family_head_ids: vec![UserId::from(DEMO_MENTOR)],
        aunt_uncle_ids: vec![UserId::from(DEMO_SECOND_MENTOR)],
        is_archived: false,
    })?;

    for (id, mentor, mentee) in [
        (DEMO_PAIRING, DEMO_MENTOR, DEMO_MENTEE),
        (DEMO_SECOND_PAIRING, DEMO_SECOND_MENTOR, DEMO_SECOND_MENTEE),
    ] {
        store.put(&Pairing {
            id: PairingId::from(id),
            family_id: FamilyId::from(DEMO_FAMILY),
            mentor_id: UserId::from(mentor),
            mentee_ids: vec![UserId::from(mentee)],
            weekly_points: 0,
            total_points: 0,
        })?;
    }

    store.put(&BonusActivity {
        id: BonusActivityId::from(DEMO_BONUS),
        name: "Museum visit".to_string(),
        points: 5,
        is_active: true,
    })?;

    store.put(&MentorshipApplication {
        id: ApplicationId::from("app-jonah"),
        email: "Jonah@Mentors.example".to_string(),
        name: "Jonah".to_string(),
        status: ApplicationStatus::Pending,
        submitted_at: now,
    })?;

    Ok(())
}

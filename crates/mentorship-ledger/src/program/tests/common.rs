use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use mime::Mime;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::config::ProgramConfig;
use crate::program::storage::block_on_handle;
use crate::program::domain::{
    ApplicationId, ApplicationStatus, BonusActivity, BonusActivityId, Family, FamilyId,
    ImageLocator, MentorshipApplication, Pairing, PairingId, Role, User, UserId,
};
use crate::program::store::{
    Collection, DocumentStore, DocumentStoreExt, Filter, MemoryDocumentStore, ReadStamp,
    StoreError, VersionedDocument, WriteOp,
};
use crate::program::{
    FileStorage, IdentityError, IdentityProvider, MentorshipProgram, NewSubmission, StorageError,
};

pub(super) type TestProgram =
    MentorshipProgram<MemoryDocumentStore, MemoryFileStorage, MemoryIdentityProvider>;

pub(super) const ADMIN: &str = "admin-1";
pub(super) const MENTOR: &str = "mentor-1";
pub(super) const MENTEE: &str = "mentee-1";
pub(super) const OTHER_MENTOR: &str = "mentor-2";
pub(super) const OTHER_MENTEE: &str = "mentee-2";
pub(super) const OUTSIDER: &str = "outsider-1";
pub(super) const FAMILY: &str = "family-1";
pub(super) const PAIRING: &str = "pairing-1";
pub(super) const OTHER_PAIRING: &str = "pairing-2";
pub(super) const ACTIVE_BONUS: &str = "bonus-museum";
pub(super) const INACTIVE_BONUS: &str = "bonus-retired";

pub(super) fn program_config() -> ProgramConfig {
    ProgramConfig {
        base_points: 10,
        transaction_attempts: 5,
    }
}

pub(super) fn seeded_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 3, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn user(id: &str, role: Role, family: Option<&str>) -> User {
    User {
        id: UserId::from(id),
        name: id.replace('-', " "),
        email: format!("{id}@example.org"),
        role,
        family_id: family.map(FamilyId::from),
        created_at: seeded_at(),
        updated_at: seeded_at(),
    }
}

pub(super) fn pairing(id: &str, mentor: &str, mentees: &[&str]) -> Pairing {
    Pairing {
        id: PairingId::from(id),
        family_id: FamilyId::from(FAMILY),
        mentor_id: UserId::from(mentor),
        mentee_ids: mentees.iter().map(|id| UserId::from(*id)).collect(),
        weekly_points: 0,
        total_points: 0,
    }
}

/// One family with two pairings, two bonus activities, and a pending application matching
/// the first mentee's email.
pub(super) fn seed(store: &MemoryDocumentStore) {
    for record in [
        user(ADMIN, Role::Admin, None),
        user(MENTOR, Role::Mentor, Some(FAMILY)),
        user(MENTEE, Role::Mentee, Some(FAMILY)),
        user(OTHER_MENTOR, Role::Mentor, Some(FAMILY)),
        user(OTHER_MENTEE, Role::Mentee, Some(FAMILY)),
        user(OUTSIDER, Role::Mentee, None),
    ] {
        store.put(&record).expect("seed user");
    }

    store
        .put(&Family {
            id: FamilyId::from(FAMILY),
            name: "Harbor Lights".to_string(),
            member_ids: [MENTOR, MENTEE, OTHER_MENTOR, OTHER_MENTEE]
                .into_iter()
                .map(UserId::from)
                .collect(),
            family_head_ids: vec![UserId::from(MENTOR)],
            aunt_uncle_ids: Vec::new(),
            is_archived: false,
        })
        .expect("seed family");

    store
        .put(&pairing(PAIRING, MENTOR, &[MENTEE]))
        .expect("seed pairing");
    store
        .put(&pairing(OTHER_PAIRING, OTHER_MENTOR, &[OTHER_MENTEE]))
        .expect("seed pairing");

    store
        .put(&BonusActivity {
            id: BonusActivityId::from(ACTIVE_BONUS),
            name: "Museum visit".to_string(),
            points: 5,
            is_active: true,
        })
        .expect("seed bonus");
    store
        .put(&BonusActivity {
            id: BonusActivityId::from(INACTIVE_BONUS),
            name: "Retired challenge".to_string(),
            points: 50,
            is_active: false,
        })
        .expect("seed bonus");

    store
        .put(&MentorshipApplication {
            id: ApplicationId::from("application-1"),
            email: format!("  {}@EXAMPLE.org ", MENTEE.to_uppercase()),
            name: "Mentee One".to_string(),
            status: ApplicationStatus::Pending,
            submitted_at: seeded_at(),
        })
        .expect("seed application");
}

pub(super) fn build_program() -> (
    TestProgram,
    Arc<MemoryDocumentStore>,
    Arc<MemoryFileStorage>,
    Arc<MemoryIdentityProvider>,
) {
    let store = Arc::new(MemoryDocumentStore::new());
    seed(&store);
    let files = Arc::new(MemoryFileStorage::default());
    let identity = Arc::new(MemoryIdentityProvider::with_users(&[
        ADMIN,
        MENTOR,
        MENTEE,
        OTHER_MENTOR,
        OTHER_MENTEE,
        OUTSIDER,
    ]));
    let program = MentorshipProgram::new(
        store.clone(),
        files.clone(),
        identity.clone(),
        program_config(),
    );
    (program, store, files, identity)
}

pub(super) fn new_submission(submitter: &str, week_number: u32) -> NewSubmission {
    NewSubmission {
        submitter_id: UserId::from(submitter),
        week_number,
        year: 2025,
        image: ImageLocator(format!("mem://photos/{submitter}-{week_number}.jpg")),
        bonus_activity_ids: Vec::new(),
    }
}

pub(super) fn pairing_points(store: &MemoryDocumentStore, id: &str) -> (u64, u64) {
    let pairing: Pairing = store
        .fetch(id)
        .expect("fetch pairing")
        .expect("pairing exists");
    (pairing.weekly_points, pairing.total_points)
}

#[derive(Default)]
pub(super) struct MemoryFileStorage {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    deleted: Mutex<Vec<ImageLocator>>,
    sequence: AtomicU32,
}

impl MemoryFileStorage {
    pub(super) fn put(&self, locator: &ImageLocator, bytes: &[u8]) {
        self.files
            .lock()
            .expect("file mutex poisoned")
            .insert(locator.0.clone(), bytes.to_vec());
    }

    pub(super) fn contains(&self, locator: &ImageLocator) -> bool {
        self.files
            .lock()
            .expect("file mutex poisoned")
            .contains_key(locator.as_str())
    }

    pub(super) fn stored(&self) -> usize {
        self.files.lock().expect("file mutex poisoned").len()
    }

    pub(super) fn deleted(&self) -> Vec<ImageLocator> {
        self.deleted.lock().expect("file mutex poisoned").clone()
    }
}

impl FileStorage for MemoryFileStorage {
    fn store(&self, bytes: &[u8], content_type: &Mime) -> Result<ImageLocator, StorageError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let locator = ImageLocator(format!(
            "mem://photos/{sequence}.{}",
            content_type.subtype().as_str()
        ));
        self.put(&locator, bytes);
        Ok(locator)
    }

    fn delete(&self, locator: &ImageLocator) -> Result<(), StorageError> {
        self.files
            .lock()
            .expect("file mutex poisoned")
            .remove(locator.as_str());
        self.deleted
            .lock()
            .expect("file mutex poisoned")
            .push(locator.clone());
        Ok(())
    }
}

/// Photo storage that blocks on the ambient runtime for every call, the way the Drive
/// adapter does.
#[derive(Default)]
pub(super) struct RuntimeBoundFileStorage {
    pub(super) inner: MemoryFileStorage,
}

impl RuntimeBoundFileStorage {
    fn round_trip(&self) -> Result<(), StorageError> {
        let handle = Handle::try_current().map_err(|err| StorageError::Runtime(err.to_string()))?;
        block_on_handle(&handle, tokio::task::yield_now());
        Ok(())
    }
}

impl FileStorage for RuntimeBoundFileStorage {
    fn store(&self, bytes: &[u8], content_type: &Mime) -> Result<ImageLocator, StorageError> {
        self.round_trip()?;
        self.inner.store(bytes, content_type)
    }

    fn delete(&self, locator: &ImageLocator) -> Result<(), StorageError> {
        self.round_trip()?;
        self.inner.delete(locator)
    }
}

/// Accepts uploads but refuses every delete.
#[derive(Default)]
pub(super) struct StuckFileStorage;

impl FileStorage for StuckFileStorage {
    fn store(&self, _bytes: &[u8], _content_type: &Mime) -> Result<ImageLocator, StorageError> {
        Ok(ImageLocator::from("mem://photos/stuck.jpg"))
    }

    fn delete(&self, _locator: &ImageLocator) -> Result<(), StorageError> {
        Err(StorageError::Backend("bucket is read only".to_string()))
    }
}

pub(super) struct MemoryIdentityProvider {
    known: Mutex<BTreeSet<UserId>>,
    deleted: Mutex<Vec<UserId>>,
}

impl MemoryIdentityProvider {
    pub(super) fn with_users(ids: &[&str]) -> Self {
        Self {
            known: Mutex::new(ids.iter().map(|id| UserId::from(*id)).collect()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn deleted(&self) -> Vec<UserId> {
        self.deleted.lock().expect("identity mutex poisoned").clone()
    }
}

impl IdentityProvider for MemoryIdentityProvider {
    fn delete_identity(&self, user_id: &UserId) -> Result<(), IdentityError> {
        let removed = self
            .known
            .lock()
            .expect("identity mutex poisoned")
            .remove(user_id);
        if !removed {
            return Err(IdentityError::NotFound(user_id.clone()));
        }
        self.deleted
            .lock()
            .expect("identity mutex poisoned")
            .push(user_id.clone());
        Ok(())
    }
}

pub(super) struct OfflineIdentityProvider;

impl IdentityProvider for OfflineIdentityProvider {
    fn delete_identity(&self, _user_id: &UserId) -> Result<(), IdentityError> {
        Err(IdentityError::Unavailable("identity service timed out".to_string()))
    }
}

/// Delegates reads to an in-memory store but lets a test inject a write between a
/// transaction's reads and its commit, `interleave` times.
pub(super) struct InterleavingStore {
    pub(super) inner: MemoryDocumentStore,
    interleave: AtomicU32,
    writer: Box<dyn Fn(&MemoryDocumentStore) + Send + Sync>,
}

impl InterleavingStore {
    pub(super) fn new(
        inner: MemoryDocumentStore,
        interleave: u32,
        writer: impl Fn(&MemoryDocumentStore) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            interleave: AtomicU32::new(interleave),
            writer: Box::new(writer),
        }
    }
}

impl DocumentStore for InterleavingStore {
    fn read_versioned(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<VersionedDocument, StoreError> {
        self.inner.read_versioned(collection, id)
    }

    fn query(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        self.inner.query(collection, filter)
    }

    fn allocate_id(&self, collection: Collection) -> Result<String, StoreError> {
        self.inner.allocate_id(collection)
    }

    fn commit(&self, reads: &[ReadStamp], writes: Vec<WriteOp>) -> Result<(), StoreError> {
        let remaining = self.interleave.load(Ordering::SeqCst);
        if !reads.is_empty() && remaining > 0 {
            self.interleave.store(remaining - 1, Ordering::SeqCst);
            (self.writer)(&self.inner);
        }
        self.inner.commit(reads, writes)
    }
}

/// In-memory store whose first `failures` commits that write an audit entry fail.
pub(super) struct FlakyAuditStore {
    pub(super) inner: MemoryDocumentStore,
    failures: AtomicU32,
}

impl FlakyAuditStore {
    pub(super) fn new(inner: MemoryDocumentStore, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
        }
    }
}

impl DocumentStore for FlakyAuditStore {
    fn read_versioned(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<VersionedDocument, StoreError> {
        self.inner.read_versioned(collection, id)
    }

    fn query(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        self.inner.query(collection, filter)
    }

    fn allocate_id(&self, collection: Collection) -> Result<String, StoreError> {
        self.inner.allocate_id(collection)
    }

    fn commit(&self, reads: &[ReadStamp], writes: Vec<WriteOp>) -> Result<(), StoreError> {
        let writes_audit = writes.iter().any(|write| {
            matches!(
                write,
                WriteOp::Set {
                    collection: Collection::AuditLog,
                    ..
                }
            )
        });
        let remaining = self.failures.load(Ordering::SeqCst);
        if writes_audit && remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("audit log write timed out".to_string()));
        }
        self.inner.commit(reads, writes)
    }
}

pub(super) struct UnavailableStore;

impl DocumentStore for UnavailableStore {
    fn read_versioned(
        &self,
        _collection: Collection,
        _id: &str,
    ) -> Result<VersionedDocument, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn query(&self, _collection: Collection, _filter: &Filter) -> Result<Vec<Value>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn allocate_id(&self, _collection: Collection) -> Result<String, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn commit(&self, _reads: &[ReadStamp], _writes: Vec<WriteOp>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}

pub(super) fn json_request(
    method: &str,
    uri: &str,
    actor: (&str, &str),
    body: Value,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .header(crate::program::ACTOR_ID_HEADER, actor.0)
        .header(crate::program::ACTOR_ROLE_HEADER, actor.1)
        .body(Body::from(serde_json::to_vec(&body).expect("encode body")))
        .expect("build request")
}

pub(super) fn empty_request(
    method: &str,
    uri: &str,
    actor: Option<(&str, &str)>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = actor {
        builder = builder
            .header(crate::program::ACTOR_ID_HEADER, id)
            .header(crate::program::ACTOR_ROLE_HEADER, role);
    }
    builder.body(Body::empty()).expect("build request")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}

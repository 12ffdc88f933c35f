//! Common test utilities for registrar integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use healthpass_core::{CodeGenerator, EntityRegistry, HolderRecord, RandomCodeGenerator};
use healthpass_registrar::store::BulkOutcome;
use healthpass_registrar::{
    AuditAction, AuditLog, Channel, DocumentStore, InMemoryDocumentStore,
    InMemoryOrganizationDirectory, Notifier, Organization, OrganizationConfig, Registrar,
    RegistrarConfig, Revision, Selector, StoreError, StoredDocument,
};
use serde_json::{json, Value};

/// A message captured by [`MockNotifier`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub channel: Channel,
    pub destination: String,
    pub text: String,
}

/// Mock notifier that captures every send and can be told to fail
#[derive(Default, Clone)]
pub struct MockNotifier {
    pub sent: Arc<RwLock<Vec<SentMessage>>>,
    failing: Arc<AtomicBool>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::new();
        notifier.set_failing(true);
        notifier
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().unwrap().len()
    }

    /// The last message sent to a destination
    pub fn last_to(&self, destination: &str) -> Option<SentMessage> {
        self.sent
            .read()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.destination == destination)
            .cloned()
    }

    fn push(&self, channel: Channel, destination: &str, text: &str) -> Result<(), String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(format!("gateway rejected {}", destination));
        }
        self.sent.write().unwrap().push(SentMessage {
            channel,
            destination: destination.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

impl Notifier for MockNotifier {
    fn send_sms(&self, destination: &str, text: &str) -> Result<(), String> {
        self.push(Channel::Sms, destination, text)
    }

    fn send_email(&self, destination: &str, _subject: &str, body: &str) -> Result<(), String> {
        self.push(Channel::Email, destination, body)
    }
}

/// Generator that hands out scripted codes first, then random ones
#[derive(Default)]
pub struct ScriptedGenerator {
    registration: Mutex<VecDeque<String>>,
    verification: Mutex<VecDeque<u32>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registration_codes(self, codes: &[&str]) -> Self {
        self.registration
            .lock()
            .unwrap()
            .extend(codes.iter().map(|c| c.to_string()));
        self
    }

    pub fn with_verification_codes(self, codes: &[u32]) -> Self {
        self.verification.lock().unwrap().extend(codes.iter().copied());
        self
    }
}

impl CodeGenerator for ScriptedGenerator {
    fn registration_codes(&self, count: usize, length: usize) -> Vec<String> {
        let mut scripted = self.registration.lock().unwrap();
        let mut codes: Vec<String> = (0..count).map_while(|_| scripted.pop_front()).collect();
        let missing = count - codes.len();
        codes.extend(RandomCodeGenerator.registration_codes(missing, length));
        codes
    }

    fn verification_code(&self) -> u32 {
        self.verification
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| RandomCodeGenerator.verification_code())
    }
}

/// Audit log that keeps entries for inspection
#[derive(Default, Clone)]
pub struct RecordingAuditLog {
    pub entries: Arc<RwLock<Vec<(String, AuditAction, String)>>>,
}

impl RecordingAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions_for(&self, holder_id: &str) -> Vec<AuditAction> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|(holder, _, _)| holder == holder_id)
            .map(|(_, action, _)| *action)
            .collect()
    }
}

impl AuditLog for RecordingAuditLog {
    fn record(&self, _entity: &str, holder_id: &str, action: AuditAction, detail: &str) {
        self.entries
            .write()
            .unwrap()
            .push((holder_id.to_string(), action, detail.to_string()));
    }
}

pub const ENTITY: &str = "acme";

pub fn org_config(mfa_enabled: bool, notify_holders: bool) -> OrganizationConfig {
    serde_json::from_value(json!({
        "id": ENTITY,
        "mfaEnabled": mfa_enabled,
        "notifyHolders": notify_holders,
        "templates": {
            "registration": {
                "sms": "Your registration code is {code}",
                "emailSubject": "Your registration code",
                "emailBody": "Registration code: {code}"
            },
            "verification": {
                "sms": "Your verification code is {code}",
                "emailSubject": "Your verification code",
                "emailBody": "Verification code: {code}"
            }
        }
    }))
    .unwrap()
}

pub fn organization(mfa_enabled: bool, notify_holders: bool) -> Organization {
    Organization::resolve(
        &org_config(mfa_enabled, notify_holders),
        &EntityRegistry::builtin(),
        &RegistrarConfig::default(),
    )
    .unwrap()
}

/// A standard holder record with a mobile number
pub fn holder(holder_id: &str, mobile: &str) -> HolderRecord {
    json!({ "holderId": holder_id, "mobile": mobile, "name": "Test Holder" })
        .as_object()
        .unwrap()
        .clone()
}

/// A standard holder record reachable only by email
pub fn email_holder(holder_id: &str, email: &str) -> HolderRecord {
    json!({ "holderId": holder_id, "email": email })
        .as_object()
        .unwrap()
        .clone()
}

/// In-memory store whose deletes or updates in one collection can be made to fail
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryDocumentStore,
    failing_deletes: Mutex<Option<String>>,
    conflicting_updates: Mutex<Option<String>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryDocumentStore {
        &self.inner
    }

    /// Fail every delete in `collection`; `None` clears the fault
    pub fn fail_deletes_in(&self, collection: Option<String>) {
        *self.failing_deletes.lock().unwrap() = collection;
    }

    /// Report a conflict for every update in `collection`; `None` clears the fault
    pub fn conflict_updates_in(&self, collection: Option<String>) {
        *self.conflicting_updates.lock().unwrap() = collection;
    }

    fn faulted(fault: &Mutex<Option<String>>, collection: &str) -> bool {
        fault.lock().unwrap().as_deref() == Some(collection)
    }
}

impl DocumentStore for FaultyStore {
    fn create(&self, collection: &str, key: &str, doc: Value) -> Result<Revision, StoreError> {
        self.inner.create(collection, key, doc)
    }

    fn create_bulk(
        &self,
        collection: &str,
        docs: Vec<(String, Value)>,
    ) -> Result<Vec<BulkOutcome>, StoreError> {
        self.inner.create_bulk(collection, docs)
    }

    fn read_safe(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.inner.read_safe(collection, key)
    }

    fn update(
        &self,
        collection: &str,
        key: &str,
        revision: &Revision,
        doc: Value,
    ) -> Result<Revision, StoreError> {
        if Self::faulted(&self.conflicting_updates, collection) {
            return Err(StoreError::conflict(collection, key));
        }
        self.inner.update(collection, key, revision, doc)
    }

    fn delete(&self, collection: &str, key: &str, revision: &Revision) -> Result<(), StoreError> {
        if Self::faulted(&self.failing_deletes, collection) {
            return Err(StoreError::Internal(format!("delete of {} refused", key)));
        }
        self.inner.delete(collection, key, revision)
    }

    fn query(
        &self,
        collection: &str,
        selector: &Selector,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        self.inner.query(collection, selector, limit)
    }
}

/// Everything a registrar test needs, wired to in-memory collaborators
pub struct TestRegistrar<S = InMemoryDocumentStore> {
    pub registrar: Registrar<S>,
    pub store: Arc<S>,
    pub notifier: MockNotifier,
    pub audit: RecordingAuditLog,
}

pub fn create_registrar(org: OrganizationConfig, generator: ScriptedGenerator) -> TestRegistrar {
    create_registrar_with(org, generator, RegistrarConfig::default())
}

pub fn create_registrar_with(
    org: OrganizationConfig,
    generator: ScriptedGenerator,
    config: RegistrarConfig,
) -> TestRegistrar {
    create_registrar_on(Arc::new(InMemoryDocumentStore::new()), org, generator, config)
}

/// Registrar over a store whose faults the test controls
pub fn create_faulty_registrar(
    org: OrganizationConfig,
    generator: ScriptedGenerator,
) -> TestRegistrar<FaultyStore> {
    create_registrar_on(Arc::new(FaultyStore::new()), org, generator, RegistrarConfig::default())
}

pub fn create_registrar_on<S: DocumentStore>(
    store: Arc<S>,
    org: OrganizationConfig,
    generator: ScriptedGenerator,
    config: RegistrarConfig,
) -> TestRegistrar<S> {
    let notifier = MockNotifier::new();
    let audit = RecordingAuditLog::new();
    let orgs = InMemoryOrganizationDirectory::from_configs(&[org], &EntityRegistry::builtin(), &config)
        .unwrap();

    let registrar = Registrar::new(
        config,
        Arc::clone(&store),
        Arc::new(orgs),
        Arc::new(notifier.clone()),
        Arc::new(audit.clone()),
        Arc::new(generator),
    );

    TestRegistrar {
        registrar,
        store,
        notifier,
        audit,
    }
}

//! Shared fixtures: a scripted credential verifier with fault injection and a
//! record store that counts writes and can be made unreachable.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{watch, Notify};

use atrium::identity::{
    CredentialVerifier, IdentitySubscription, LoginFlow, Session, SessionInitializer, SessionStore, SignOutFlow,
    VerifiedUser, VerifyError,
};
use atrium::storage::{Document, IdentityRecordStore, MemoryRecordStore, RecordStoreError};

pub fn doc(v: Value) -> Document {
    match v {
        Value::Object(m) => m,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn user(uid: &str, email: &str) -> VerifiedUser {
    VerifiedUser { unique_id: uid.into(), email: email.into(), display_name: None, photo_url: None }
}

pub struct ScriptedVerifier {
    accounts: Mutex<HashMap<String, (String, VerifiedUser)>>,
    current: watch::Sender<Option<VerifiedUser>>,
    pub fail_network: AtomicBool,
    pub fail_invalidate: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    pub verify_calls: AtomicUsize,
    pub invalidate_calls: AtomicUsize,
}

impl ScriptedVerifier {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(HashMap::new()),
            current,
            fail_network: AtomicBool::new(false),
            fail_invalidate: AtomicBool::new(false),
            gate: Mutex::new(None),
            verify_calls: AtomicUsize::new(0),
            invalidate_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_account(self, email: &str, password: &str, user: VerifiedUser) -> Self {
        self.accounts.lock().insert(email.to_string(), (password.to_string(), user));
        self
    }

    /// Pretend a session was persisted by a previous run.
    pub fn with_persisted(self, user: VerifiedUser) -> Self {
        self.current.send_replace(Some(user));
        self
    }

    /// Make subsequent `verify_password` calls wait until the returned handle is notified.
    pub fn hold_verifications(&self) -> Arc<Notify> {
        let n = Arc::new(Notify::new());
        *self.gate.lock() = Some(n.clone());
        n
    }

    pub fn release_verifications(&self) {
        *self.gate.lock() = None;
    }

    /// Identity change originating outside the flows (e.g. another tab).
    pub fn push(&self, user: Option<VerifiedUser>) {
        self.current.send_replace(user);
    }
}

#[async_trait]
impl CredentialVerifier for ScriptedVerifier {
    async fn verify_password(&self, email: &str, password: &str) -> Result<VerifiedUser, VerifyError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_network.load(Ordering::SeqCst) {
            return Err(VerifyError::Network("connection reset".into()));
        }
        let found = self.accounts.lock().get(email).cloned();
        match found {
            Some((pw, user)) if pw == password => {
                self.current.send_replace(Some(user.clone()));
                Ok(user)
            }
            _ => Err(VerifyError::InvalidCredentials),
        }
    }

    fn subscribe(&self) -> IdentitySubscription {
        IdentitySubscription::new(self.current.subscribe())
    }

    async fn invalidate(&self) -> Result<(), VerifyError> {
        self.invalidate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_invalidate.load(Ordering::SeqCst) {
            return Err(VerifyError::Network("offline".into()));
        }
        self.current.send_replace(None);
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingRecordStore {
    pub inner: MemoryRecordStore,
    pub puts: Mutex<Vec<(String, Document, bool)>>,
    pub unreachable: AtomicBool,
}

impl CountingRecordStore {
    pub fn new() -> Self { Self::default() }

    pub fn put_count(&self) -> usize { self.puts.lock().len() }

    fn check(&self) -> Result<(), RecordStoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RecordStoreError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityRecordStore for CountingRecordStore {
    async fn get(&self, unique_id: &str) -> Result<Option<Document>, RecordStoreError> {
        self.check()?;
        self.inner.get(unique_id).await
    }

    async fn put(&self, unique_id: &str, record: Document, merge: bool) -> Result<(), RecordStoreError> {
        self.check()?;
        self.puts.lock().push((unique_id.to_string(), record.clone(), merge));
        self.inner.put(unique_id, record, merge).await
    }
}

pub struct Harness {
    pub verifier: Arc<ScriptedVerifier>,
    pub records: Arc<CountingRecordStore>,
    pub session: SessionStore,
    pub initializer: SessionInitializer,
    pub login: LoginFlow,
    pub sign_out: SignOutFlow,
}

pub fn harness(verifier: ScriptedVerifier, records: CountingRecordStore) -> Harness {
    let verifier = Arc::new(verifier);
    let records = Arc::new(records);
    let session = SessionStore::new();
    Harness {
        initializer: SessionInitializer::new(verifier.clone(), records.clone(), session.clone()),
        login: LoginFlow::new(verifier.clone(), records.clone(), session.clone()),
        sign_out: SignOutFlow::new(verifier.clone(), session.clone()),
        verifier,
        records,
        session,
    }
}

pub async fn started(verifier: ScriptedVerifier, records: CountingRecordStore) -> Harness {
    let h = harness(verifier, records);
    h.initializer.initialize().await;
    h
}

/// Poll the session until `pred` holds or two seconds pass.
pub async fn wait_for(session: &SessionStore, pred: impl Fn(&Session) -> bool) -> Session {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let s = session.snapshot();
        if pred(&s) {
            return s;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("session never reached the expected state; last: {s:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Invariant that must hold after every operation.
pub fn assert_fail_closed(s: &Session) {
    if s.is_authenticated() {
        let id = s.identity().expect("authenticated session without identity");
        assert!(!id.unique_id.is_empty());
        assert!(atrium::identity::Role::ALL.contains(&id.role));
    }
}

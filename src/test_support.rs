//! Hand-rolled collaborator doubles shared across the crate's tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::{RemoteCache, RemoteError};
use crate::event::{Interaction, TenantId};
use crate::handler::{CommandSpec, Dependencies, Handler};
use crate::respond::{Failure, MessageOptions, RespondError, Responder};
use crate::store::{Fields, Persistence, Record, StoreError, Table, TenantRecord};

/// In-memory remote cache that can be scripted to fail.
#[derive(Default)]
pub struct ScriptedRemote {
    data: Mutex<HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
    calls: AtomicU64,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, value: Vec<u8>) {
        self.data.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn get_direct(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(key).cloned()
    }

    /// Every subsequent call returns a transport error.
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(RemoteError::Connection("scripted failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteCache for ScriptedRemote {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        self.check()?;
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8], _ttl: Duration) -> Result<(), RemoteError> {
        self.check()?;
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        self.check()?;
        self.data.lock().unwrap().remove(key);
        Ok(())
    }
}

/// In-memory persistence double.
#[derive(Default)]
pub struct MemoryStore {
    tenants: Mutex<HashMap<TenantId, TenantRecord>>,
    created: Mutex<Vec<Record>>,
    fail_creates: AtomicBool,
    fail_get_tenant: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(self, record: TenantRecord) -> Self {
        self.tenants
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
        self
    }

    pub fn put_tenant(&self, record: TenantRecord) {
        self.tenants
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
    }

    pub fn fail_creates(&self) {
        self.fail_creates.store(true, Ordering::SeqCst);
    }

    pub fn fail_get_tenant(&self) {
        self.fail_get_tenant.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<Record> {
        self.created.lock().unwrap().clone()
    }

    pub fn audit_count(&self) -> usize {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|r| matches!(r, Record::Audit(_)))
            .count()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn create(&self, record: Record) -> Result<(), StoreError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("scripted create failure".to_string()));
        }
        if let Record::Tenant(t) = &record {
            self.tenants.lock().unwrap().insert(t.id.clone(), t.clone());
        }
        self.created.lock().unwrap().push(record);
        Ok(())
    }

    async fn update(
        &self,
        _table: Table,
        _filter: Fields,
        _fields: Fields,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn count(&self, table: Table, _filter: Option<Fields>) -> Result<u64, StoreError> {
        match table {
            Table::Tenants => Ok(self.tenants.lock().unwrap().len() as u64),
            Table::Interactions => Ok(self.audit_count() as u64),
        }
    }

    async fn get_tenant(&self, id: &TenantId) -> Result<TenantRecord, StoreError> {
        if self.fail_get_tenant.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("scripted lookup failure".to_string()));
        }
        self.tenants
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

/// Responder that records everything it is asked to deliver. Can be scripted
/// to panic on the next N `fail` calls, to exercise the dispatch supervisor.
#[derive(Default)]
pub struct RecordingResponder {
    failures: Mutex<Vec<(String, Failure)>>,
    sends: Mutex<Vec<(String, MessageOptions)>>,
    posts: Mutex<Vec<(TenantId, String)>>,
    panic_fails_remaining: AtomicU32,
}

impl RecordingResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn panic_on_next_fails(&self, n: u32) {
        self.panic_fails_remaining.store(n, Ordering::SeqCst);
    }

    pub fn failures(&self) -> Vec<(String, Failure)> {
        self.failures.lock().unwrap().clone()
    }

    pub fn posts(&self) -> Vec<(TenantId, String)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn sends_len(&self) -> usize {
        self.sends.lock().unwrap().len()
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn defer(&self, _interaction: &Interaction, _ephemeral: bool) -> Result<(), RespondError> {
        Ok(())
    }

    async fn send(
        &self,
        interaction: &Interaction,
        opts: MessageOptions,
    ) -> Result<(), RespondError> {
        self.sends
            .lock()
            .unwrap()
            .push((interaction.id.clone(), opts));
        Ok(())
    }

    async fn fail(&self, interaction: &Interaction, failure: Failure) -> Result<(), RespondError> {
        let remaining = self.panic_fails_remaining.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .panic_fails_remaining
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            panic!("scripted responder panic");
        }
        self.failures
            .lock()
            .unwrap()
            .push((interaction.id.clone(), failure));
        Ok(())
    }

    async fn post(&self, tenant: &TenantId, content: &str) -> Result<(), RespondError> {
        self.posts
            .lock()
            .unwrap()
            .push((tenant.clone(), content.to_string()));
        Ok(())
    }
}

/// Handler that records each invocation.
pub struct RecordingHandler {
    name: &'static str,
    calls: Mutex<Vec<Interaction>>,
}

impl RecordingHandler {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new(self.name, "records invocations")
    }

    async fn handle(&self, deps: Dependencies) -> Result<(), Failure> {
        self.calls.lock().unwrap().push(deps.interaction.clone());
        Ok(())
    }
}

/// Handler that queues a line on the tenant's relay lane.
pub struct RelayingHandler;

#[async_trait]
impl Handler for RelayingHandler {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("announce", "queues a relay line")
    }

    async fn handle(&self, deps: Dependencies) -> Result<(), Failure> {
        deps.relay_line(format!("{} ran announce", deps.interaction.user));
        Ok(())
    }
}

/// Handler that always panics.
pub struct PanickingHandler;

#[async_trait]
impl Handler for PanickingHandler {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("boom", "always panics")
    }

    async fn handle(&self, _deps: Dependencies) -> Result<(), Failure> {
        panic!("scripted handler panic");
    }
}

/// Handler that returns a structured failure.
pub struct FailingHandler;

#[async_trait]
impl Handler for FailingHandler {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("reject", "always fails")
    }

    async fn handle(&self, _deps: Dependencies) -> Result<(), Failure> {
        Err(Failure::bad_input("bad arguments"))
    }
}

/// Opt-in log output while debugging tests: `RUST_LOG=switchyard=debug`.
/// Safe to call from every test; only the first registration wins.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll until `cond` holds or the timeout elapses.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

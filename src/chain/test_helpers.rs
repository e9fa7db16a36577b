//! Shared fixtures for chain tests.

use super::{ChainParts, ChainProcessor, ContinuationDispatcher, InvocationResult};
use crate::config::Config;
use crate::db::Database;
use crate::error::{DatabaseError, Error, Result};
use crate::export::{Item, ItemProcessor, ItemResolver};
use crate::store::{StatsStore, SubTaskStore};
use crate::telemetry::{FlushPolicy, TelemetryBatch, TelemetryBuffer, TelemetrySink};
use crate::types::{
    Identity, Invocation, JobType, NewTaskRequest, StatsDelta, SubTask, SubTaskInput,
    SubTaskOutput, SubTaskStatus, SubTaskUpdate, TaskId,
};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Dispatcher that parks invocations for the test to run by hand
#[derive(Default)]
pub(crate) struct RecordingDispatcher {
    queue: Mutex<VecDeque<Invocation>>,
    history: Mutex<Vec<Invocation>>,
    failing: AtomicBool,
}

impl RecordingDispatcher {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn pop(&self) -> Option<Invocation> {
        self.queue.lock().unwrap().pop_front()
    }

    pub(crate) fn history(&self) -> Vec<Invocation> {
        self.history.lock().unwrap().clone()
    }

    pub(crate) fn clear(&self) {
        self.queue.lock().unwrap().clear();
        self.history.lock().unwrap().clear();
    }

    pub(crate) fn finalize_count(&self) -> usize {
        self.history()
            .iter()
            .filter(|i| matches!(i, Invocation::Finalize(_)))
            .count()
    }

    pub(crate) fn process_indices(&self) -> Vec<u32> {
        self.history()
            .iter()
            .filter_map(|i| match i {
                Invocation::Process(p) => Some(p.sub_task_index),
                Invocation::Finalize(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl ContinuationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, invocation: Invocation) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Dispatch("dispatcher unavailable".to_string()));
        }
        self.history.lock().unwrap().push(invocation.clone());
        self.queue.lock().unwrap().push_back(invocation);
        Ok(())
    }
}

/// Resolver that knows every item except the ones marked missing
#[derive(Default)]
pub(crate) struct MemoryResolver {
    missing: HashSet<String>,
}

impl MemoryResolver {
    pub(crate) fn missing(ids: &[&str]) -> Self {
        Self {
            missing: ids.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ItemResolver for MemoryResolver {
    async fn resolve(&self, item_id: &str) -> Result<Option<Item>> {
        if self.missing.contains(item_id) {
            return Ok(None);
        }
        Ok(Some(Item {
            id: item_id.to_string(),
            payload: serde_json::json!({ "id": item_id }),
        }))
    }
}

/// Processor that records calls and fails for selected items
#[derive(Default)]
pub(crate) struct RecordingProcessor {
    failing: HashSet<String>,
    processed: Mutex<Vec<String>>,
}

impl RecordingProcessor {
    pub(crate) fn failing(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|s| s.to_string()).collect(),
            processed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn processed(&self) -> Vec<String> {
        self.processed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ItemProcessor for RecordingProcessor {
    async fn process(&self, item: &Item, input: &SubTaskInput) -> Result<SubTaskOutput> {
        self.processed.lock().unwrap().push(item.id.clone());
        if self.failing.contains(&item.id) {
            return Err(Error::Processor(format!("export of {} failed", item.id)));
        }
        Ok(SubTaskOutput {
            message: format!("Finish uploading data for item \"{}\"", item.id),
            key: format!("{}.zip", input.data_key),
        })
    }
}

/// Store wrapper that can fail writes of selected sub-tasks
pub(crate) struct FaultyStore {
    db: Arc<Database>,
    fail_updates_for: Mutex<HashSet<String>>,
    fail_reads: AtomicBool,
    fail_stats: AtomicBool,
}

impl FaultyStore {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            fail_updates_for: Mutex::new(HashSet::new()),
            fail_reads: AtomicBool::new(false),
            fail_stats: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_updates_for(&self, sub_task_id: &str) {
        self.fail_updates_for
            .lock()
            .unwrap()
            .insert(sub_task_id.to_string());
    }

    pub(crate) fn set_fail_reads(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_stats(&self, failing: bool) {
        self.fail_stats.store(failing, Ordering::SeqCst);
    }

    fn write_error(sub_task_id: &str) -> Error {
        Error::Database(DatabaseError::QueryFailed(format!(
            "simulated write failure for {}",
            sub_task_id
        )))
    }
}

#[async_trait]
impl SubTaskStore for FaultyStore {
    async fn get_sub_task(&self, task_id: TaskId, sub_task_id: &str) -> Result<Option<SubTask>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Database(DatabaseError::QueryFailed(
                "simulated read failure".to_string(),
            )));
        }
        self.db.get_sub_task(task_id, sub_task_id).await
    }

    async fn update_sub_task(
        &self,
        task_id: TaskId,
        sub_task_id: &str,
        update: SubTaskUpdate,
    ) -> Result<SubTask> {
        if self.fail_updates_for.lock().unwrap().contains(sub_task_id) {
            return Err(Self::write_error(sub_task_id));
        }
        self.db.update_sub_task(task_id, sub_task_id, &update).await
    }

    async fn claim_sub_task(
        &self,
        task_id: TaskId,
        sub_task_id: &str,
        from: SubTaskStatus,
        update: SubTaskUpdate,
    ) -> Result<Option<SubTask>> {
        self.db
            .transition_sub_task(task_id, sub_task_id, from, &update)
            .await
    }
}

#[async_trait]
impl StatsStore for FaultyStore {
    async fn apply_delta(&self, task_id: TaskId, delta: StatsDelta) -> Result<()> {
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(Error::Database(DatabaseError::QueryFailed(
                "simulated stats failure".to_string(),
            )));
        }
        self.db.apply_stats_delta(task_id, delta).await
    }
}

/// Telemetry sink collecting batches in memory
#[derive(Default)]
pub(crate) struct CollectingSink {
    pub(crate) batches: Mutex<Vec<TelemetryBatch>>,
}

#[async_trait]
impl TelemetrySink for CollectingSink {
    async fn send(&self, batch: &TelemetryBatch) -> Result<()> {
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

/// A processor wired to in-memory collaborators
pub(crate) struct TestChain {
    pub(crate) processor: ChainProcessor,
    pub(crate) dispatcher: Arc<RecordingDispatcher>,
    pub(crate) items: Arc<RecordingProcessor>,
    pub(crate) store: Arc<FaultyStore>,
    pub(crate) telemetry: Arc<CollectingSink>,
    pub(crate) _temp_dir: tempfile::TempDir,
}

/// Options for [`create_test_chain`]
#[derive(Default)]
pub(crate) struct TestChainOptions<'a> {
    pub(crate) missing: &'a [&'a str],
    pub(crate) failing: &'a [&'a str],
}

pub(crate) fn test_config(temp_dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("taskchain.db");
    config.export.items_dir = temp_dir.path().join("items");
    config.export.export_dir = temp_dir.path().join("exports");
    config
}

/// Create a chain processor with recording collaborators
pub(crate) async fn create_test_chain(options: TestChainOptions<'_>) -> TestChain {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(&temp_dir);
    let db = Arc::new(
        Database::new(&config.persistence.database_path)
            .await
            .unwrap(),
    );

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let items = Arc::new(RecordingProcessor::failing(options.failing));
    let store = Arc::new(FaultyStore::new(db.clone()));
    let telemetry = Arc::new(CollectingSink::default());

    let processor = ChainProcessor::with_parts(
        config,
        db,
        ChainParts {
            sub_tasks: Some(store.clone()),
            stats: Some(store.clone()),
            resolver: Some(Arc::new(MemoryResolver::missing(options.missing))),
            processor: Some(items.clone()),
            dispatcher: Some(dispatcher.clone()),
            telemetry: Some(Arc::new(TelemetryBuffer::new(
                FlushPolicy::default(),
                telemetry.clone(),
                None,
                "test",
            ))),
        },
    )
    .unwrap();

    TestChain {
        processor,
        dispatcher,
        items,
        store,
        telemetry,
        _temp_dir: temp_dir,
    }
}

/// Item ids `item-0 .. item-{count-1}`
pub(crate) fn items(count: usize) -> Vec<SubTaskInput> {
    (0..count)
        .map(|i| SubTaskInput {
            item_id: format!("item-{}", i),
            data_key: format!("exports/item-{}", i),
        })
        .collect()
}

pub(crate) fn request(items: Vec<SubTaskInput>) -> NewTaskRequest {
    NewTaskRequest {
        job_type: JobType::ExportBlocks,
        items,
        identity: Identity::user("user-1", "Ada"),
    }
}

/// Turns run by [`drive`]
#[derive(Debug, Default)]
pub(crate) struct DriveReport {
    pub(crate) results: Vec<InvocationResult>,
}

impl DriveReport {
    pub(crate) fn process_turns(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, InvocationResult::Process(_)))
            .count()
    }

    pub(crate) fn finalize_turns(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, InvocationResult::Finalize(_)))
            .count()
    }
}

/// Run every parked invocation, in dispatch order, until none is left
pub(crate) async fn drive(chain: &TestChain) -> DriveReport {
    let mut report = DriveReport::default();
    let mut guard = 0;
    while let Some(invocation) = chain.dispatcher.pop() {
        guard += 1;
        assert!(guard < 10_000, "chain did not terminate");
        report
            .results
            .push(chain.processor.execute(invocation).await.unwrap());
    }
    report
}

//! Core types for taskchain

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Width of the zero-padded sub-task index
///
/// Five digits keep lexicographic and numeric ordering identical for up to
/// [`MAX_SUB_TASKS`] sub-tasks per task.
pub const SUB_TASK_INDEX_WIDTH: usize = 5;

/// Largest number of sub-tasks a single task may hold
pub const MAX_SUB_TASKS: usize = 99_999;

/// Unique identifier for a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Format a numeric sub-task index as its fixed-width sub-task id
///
/// ```
/// assert_eq!(taskchain::types::pad_index(7), "00007");
/// ```
pub fn pad_index(index: u32) -> String {
    format!("{:0width$}", index, width = SUB_TASK_INDEX_WIDTH)
}

/// Status of a single sub-task
///
/// `Pending -> Processing -> {Completed | Failed}`; `Pending -> Failed` is also
/// allowed when the referenced item cannot be resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubTaskStatus {
    /// Waiting for its turn in the chain
    Pending,
    /// Claimed by a turn, item processor running
    Processing,
    /// Item processed successfully
    Completed,
    /// Item processing failed (terminal for the chain)
    Failed,
}

impl SubTaskStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [SubTaskStatus; 4] = [
        SubTaskStatus::Pending,
        SubTaskStatus::Processing,
        SubTaskStatus::Completed,
        SubTaskStatus::Failed,
    ];

    /// Convert integer status code to SubTaskStatus enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => SubTaskStatus::Pending,
            1 => SubTaskStatus::Processing,
            2 => SubTaskStatus::Completed,
            _ => SubTaskStatus::Failed, // Unknown codes are never workable
        }
    }

    /// Convert SubTaskStatus enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            SubTaskStatus::Pending => 0,
            SubTaskStatus::Processing => 1,
            SubTaskStatus::Completed => 2,
            SubTaskStatus::Failed => 3,
        }
    }

    /// Whether the chain will never touch a sub-task in this status again
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubTaskStatus::Completed | SubTaskStatus::Failed)
    }

    /// Name of the stats column counting this status
    pub(crate) fn stats_column(&self) -> &'static str {
        match self {
            SubTaskStatus::Pending => "stats_pending",
            SubTaskStatus::Processing => "stats_processing",
            SubTaskStatus::Completed => "stats_completed",
            SubTaskStatus::Failed => "stats_failed",
        }
    }
}

impl std::fmt::Display for SubTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubTaskStatus::Pending => "PENDING",
            SubTaskStatus::Processing => "PROCESSING",
            SubTaskStatus::Completed => "COMPLETED",
            SubTaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Overall status of a task, derived from its stats
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// No sub-task has started yet
    Pending,
    /// The chain is running
    Processing,
    /// Finalized, every sub-task completed
    Completed,
    /// Finalized, some sub-tasks completed and some failed
    PartiallyCompleted,
    /// Finalized, no sub-task completed
    Failed,
}

impl TaskStatus {
    /// Convert integer status code to TaskStatus enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => TaskStatus::Pending,
            1 => TaskStatus::Processing,
            2 => TaskStatus::Completed,
            3 => TaskStatus::PartiallyCompleted,
            _ => TaskStatus::Failed,
        }
    }

    /// Convert TaskStatus enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Processing => 1,
            TaskStatus::Completed => 2,
            TaskStatus::PartiallyCompleted => 3,
            TaskStatus::Failed => 4,
        }
    }

    /// Whether finalize has already run for a task in this status
    pub fn is_finalized(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::PartiallyCompleted | TaskStatus::Failed
        )
    }
}

/// Kind of job a task performs
///
/// The orchestrator treats it as an opaque label carried through the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Export page builder blocks
    ExportBlocks,
    /// Export pages
    ExportPages,
    /// Export forms
    ExportForms,
    /// Import blocks
    ImportBlocks,
    /// Import pages
    ImportPages,
}

impl JobType {
    /// Stable string form, used for storage and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ExportBlocks => "export_blocks",
            JobType::ExportPages => "export_pages",
            JobType::ExportForms => "export_forms",
            JobType::ImportBlocks => "import_blocks",
            JobType::ImportPages => "import_pages",
        }
    }

    /// Parse the stable string form
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "export_blocks" => Some(JobType::ExportBlocks),
            "export_pages" => Some(JobType::ExportPages),
            "export_forms" => Some(JobType::ExportForms),
            "import_blocks" => Some(JobType::ImportBlocks),
            "import_pages" => Some(JobType::ImportPages),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of principal an [`Identity`] represents
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// An end user who started a job
    User,
    /// The processor itself, acting on behalf of a user
    System,
}

/// Acting identity passed along with every invocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Principal id
    pub id: String,
    /// Human readable name
    pub display_name: String,
    /// User or system principal
    pub kind: IdentityKind,
}

impl Identity {
    /// Create an end-user identity
    pub fn user(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            kind: IdentityKind::User,
        }
    }

    /// System identity used for continuations started on behalf of `initiator`
    ///
    /// Keeps the initiator's id so downstream turns stay attributable; a
    /// system identity maps to itself.
    pub fn system_for(initiator: &Identity) -> Self {
        match initiator.kind {
            IdentityKind::System => initiator.clone(),
            IdentityKind::User => Self {
                id: initiator.id.clone(),
                display_name: format!("system ({})", initiator.display_name),
                kind: IdentityKind::System,
            },
        }
    }
}

/// Input payload of a sub-task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTaskInput {
    /// Id of the domain item to process (e.g. a block id)
    pub item_id: String,
    /// Destination key for the processed output
    pub data_key: String,
}

/// Output recorded on a completed sub-task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTaskOutput {
    /// Human readable summary
    pub message: String,
    /// Storage key of the produced artifact
    pub key: String,
}

/// Error detail recorded on a failed sub-task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTaskErrorDetail {
    /// Error kind
    pub name: String,
    /// Human readable message
    pub message: String,
    /// Stable classification code (see [`crate::error::TurnError::code`])
    pub code: String,
}

/// A sub-task as seen by the orchestrator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    /// Parent task
    pub task_id: TaskId,
    /// Zero-padded index, e.g. `"00003"`
    pub id: String,
    /// Current status
    pub status: SubTaskStatus,
    /// Input payload
    pub input: SubTaskInput,
    /// Output, set on completion
    pub output: Option<SubTaskOutput>,
    /// Error detail, set on failure
    pub error: Option<SubTaskErrorDetail>,
    /// When the sub-task was claimed for processing
    pub started_at: Option<DateTime<Utc>>,
    /// When the sub-task reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
}

impl SubTask {
    /// Numeric index parsed back from the padded id
    pub fn index(&self) -> Option<u32> {
        self.id.parse().ok()
    }
}

/// Partial update applied to a sub-task
///
/// `None` fields are left untouched.
#[derive(Clone, Debug, Default)]
pub struct SubTaskUpdate {
    /// New status
    pub status: Option<SubTaskStatus>,
    /// Output data
    pub output: Option<SubTaskOutput>,
    /// Error detail
    pub error: Option<SubTaskErrorDetail>,
}

/// Per-status sub-task counters of a task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    /// Sub-tasks waiting to be processed
    pub pending: i64,
    /// Sub-tasks currently claimed
    pub processing: i64,
    /// Sub-tasks completed
    pub completed: i64,
    /// Sub-tasks failed
    pub failed: i64,
}

impl TaskStats {
    /// Sum of all buckets (always equals the task's sub-task count)
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed
    }

    /// Counter for a single status
    pub fn count(&self, status: SubTaskStatus) -> i64 {
        match status {
            SubTaskStatus::Pending => self.pending,
            SubTaskStatus::Processing => self.processing,
            SubTaskStatus::Completed => self.completed,
            SubTaskStatus::Failed => self.failed,
        }
    }

    /// Count sub-task statuses into buckets
    pub fn tally(statuses: impl IntoIterator<Item = SubTaskStatus>) -> Self {
        statuses
            .into_iter()
            .fold(Self::default(), |mut stats, status| {
                match status {
                    SubTaskStatus::Pending => stats.pending += 1,
                    SubTaskStatus::Processing => stats.processing += 1,
                    SubTaskStatus::Completed => stats.completed += 1,
                    SubTaskStatus::Failed => stats.failed += 1,
                }
                stats
            })
    }

    /// Whether every sub-task reached a terminal status
    pub fn all_terminal(&self) -> bool {
        self.pending == 0 && self.processing == 0
    }

    /// Overall status implied by these counters
    ///
    /// Only meaningful once [`all_terminal`](Self::all_terminal) holds, otherwise
    /// `Pending` or `Processing` is returned.
    pub fn derive_status(&self) -> TaskStatus {
        if !self.all_terminal() {
            if self.pending == self.total() {
                return TaskStatus::Pending;
            }
            return TaskStatus::Processing;
        }
        match (self.completed, self.failed) {
            (_, 0) => TaskStatus::Completed,
            (0, _) => TaskStatus::Failed,
            _ => TaskStatus::PartiallyCompleted,
        }
    }
}

/// A single (previous status, next status) transition applied to task stats
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsDelta {
    /// Bucket to decrement
    pub previous: SubTaskStatus,
    /// Bucket to increment
    pub next: SubTaskStatus,
}

impl StatsDelta {
    /// Create a new delta
    pub fn new(previous: SubTaskStatus, next: SubTaskStatus) -> Self {
        Self { previous, next }
    }
}

/// Task as exposed to callers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Task id
    pub id: TaskId,
    /// Job type
    pub job_type: JobType,
    /// Overall status
    pub status: TaskStatus,
    /// Number of sub-tasks
    pub total: i64,
    /// Per-status counters
    pub stats: TaskStats,
    /// Identity that created the task
    pub created_by: String,
    /// Finalize manifest, set once finalized
    pub output: Option<FinalizeManifest>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Finalization time
    pub finished_at: Option<DateTime<Utc>>,
}

/// Summary written by finalize
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeManifest {
    /// Job type of the task
    pub job_type: JobType,
    /// Total sub-tasks
    pub total: i64,
    /// Output keys of completed sub-tasks, in index order
    pub completed: Vec<String>,
    /// Padded ids of failed sub-tasks, in index order
    pub failed: Vec<String>,
}

/// Invocation of the "process next sub-task" target
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInvocation {
    /// Task to advance
    pub task_id: TaskId,
    /// Index of the sub-task to attempt
    pub sub_task_index: u32,
    /// Job type label
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Acting identity
    pub identity: Identity,
}

/// Invocation of the "finalize" target
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeInvocation {
    /// Task to finalize
    pub task_id: TaskId,
    /// Job type label
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Acting identity
    pub identity: Identity,
}

/// Any invocation a continuation dispatcher can send
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Invocation {
    /// Process one sub-task
    Process(ProcessInvocation),
    /// Finalize the task
    Finalize(FinalizeInvocation),
}

impl Invocation {
    /// Task the invocation targets
    pub fn task_id(&self) -> TaskId {
        match self {
            Invocation::Process(p) => p.task_id,
            Invocation::Finalize(f) => f.task_id,
        }
    }

    /// Target name (`process` or `finalize`)
    pub fn target(&self) -> &'static str {
        match self {
            Invocation::Process(_) => "process",
            Invocation::Finalize(_) => "finalize",
        }
    }
}

/// Error summary carried in a [`TurnOutcome`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnErrorSummary {
    /// Classification code
    pub code: String,
    /// Human readable message
    pub message: String,
}

/// Informational result of one `advance` turn
///
/// Never gates the continuation; consumed by logging and telemetry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// Task advanced
    pub task_id: TaskId,
    /// Index attempted
    pub sub_task_index: u32,
    /// Output of the processed sub-task, if any
    pub data: Option<SubTaskOutput>,
    /// Error summary, if the turn hit one
    pub error: Option<TurnErrorSummary>,
    /// Continuation that was dispatched (`process` or `finalize`), if dispatch succeeded
    pub dispatched: Option<String>,
}

impl TurnOutcome {
    /// Whether the turn processed its sub-task successfully
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.data.is_some()
    }
}

/// Result of a finalize call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    /// Task finalized by this call
    Finalized {
        /// Derived overall status
        status: TaskStatus,
        /// Written manifest
        manifest: FinalizeManifest,
    },
    /// Another call already finalized the task
    AlreadyFinalized {
        /// Status recorded by the earlier call
        status: TaskStatus,
    },
    /// Some sub-tasks are not terminal yet
    NotReady {
        /// Current counters
        stats: TaskStats,
    },
}

/// Request to start a new task
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewTaskRequest {
    /// Job type
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// One input per sub-task, in processing order
    pub items: Vec<SubTaskInput>,
    /// Initiating identity
    pub identity: Identity,
}

/// Event emitted during the chain lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task created with its sub-tasks
    TaskStarted {
        /// Task id
        task_id: TaskId,
        /// Job type
        job_type: JobType,
        /// Number of sub-tasks
        total: usize,
    },

    /// A sub-task was claimed for processing
    SubTaskStarted {
        /// Task id
        task_id: TaskId,
        /// Padded sub-task id
        sub_task_id: String,
    },

    /// A sub-task completed
    SubTaskCompleted {
        /// Task id
        task_id: TaskId,
        /// Padded sub-task id
        sub_task_id: String,
        /// Output key
        key: String,
    },

    /// A sub-task failed
    SubTaskFailed {
        /// Task id
        task_id: TaskId,
        /// Padded sub-task id
        sub_task_id: String,
        /// Classification code
        code: String,
        /// Error message
        error: String,
    },

    /// A turn found no pending sub-task at its index
    SubTaskSkipped {
        /// Task id
        task_id: TaskId,
        /// Index the turn attempted
        sub_task_index: u32,
    },

    /// A continuation was dispatched
    ContinuationDispatched {
        /// Task id
        task_id: TaskId,
        /// Target name
        target: String,
        /// Next index (process target only)
        #[serde(skip_serializing_if = "Option::is_none")]
        sub_task_index: Option<u32>,
    },

    /// Dispatching a continuation failed; the chain is stalled
    DispatchFailed {
        /// Task id
        task_id: TaskId,
        /// Target name
        target: String,
        /// Error message
        error: String,
    },

    /// A task was finalized
    TaskFinalized {
        /// Task id
        task_id: TaskId,
        /// Overall status
        status: TaskStatus,
    },

    /// A turn exceeded the runner's turn timeout
    TurnTimedOut {
        /// Task id
        task_id: TaskId,
        /// Target name
        target: String,
    },

    /// The runner is shutting down
    Shutdown,
}

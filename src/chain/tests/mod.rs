use super::test_helpers::*;
use super::*;
use crate::types::{
    Identity, JobType, ProcessInvocation, SubTaskStatus, TaskId, TaskStatus, pad_index,
};

mod initiate;

/// Sub-task status by index
async fn statuses(chain: &TestChain, task_id: TaskId) -> Vec<SubTaskStatus> {
    chain
        .processor
        .db
        .list_sub_tasks(task_id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.status)
        .collect()
}

fn process(task_id: TaskId, index: u32) -> ProcessInvocation {
    ProcessInvocation {
        task_id,
        sub_task_index: index,
        job_type: JobType::ExportBlocks,
        identity: Identity::user("user-1", "Ada"),
    }
}

/// Start a task and drop the first dispatched invocation so turns can be run by hand
async fn start_parked(chain: &TestChain, count: usize) -> TaskId {
    let task_id = chain
        .processor
        .start_task(request(items(count)))
        .await
        .unwrap();
    chain.dispatcher.clear();
    task_id
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

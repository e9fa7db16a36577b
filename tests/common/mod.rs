//! Common helpers for taskchain integration tests

use std::path::Path;
use std::time::Duration;
use taskchain::{
    ChainProcessor, Config, Event, Identity, JobType, NewTaskRequest, SubTaskInput, TaskId,
    TaskStatus,
};

/// Config rooted in `dir`, with items under `dir/items` and archives under `dir/exports`
pub fn config_in(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("taskchain.db");
    config.export.items_dir = dir.join("items");
    config.export.export_dir = dir.join("exports");
    config
}

/// Write `<items_dir>/<id>.json` for each id
pub fn write_items(config: &Config, ids: &[&str]) {
    std::fs::create_dir_all(&config.export.items_dir).unwrap();
    for id in ids {
        let body = serde_json::json!({ "id": id, "title": format!("Block {}", id) });
        std::fs::write(
            config.export.items_dir.join(format!("{}.json", id)),
            body.to_string(),
        )
        .unwrap();
    }
}

/// Export request for the given item ids
pub fn export_request(ids: &[&str]) -> NewTaskRequest {
    NewTaskRequest {
        job_type: JobType::ExportBlocks,
        items: ids
            .iter()
            .map(|id| SubTaskInput {
                item_id: id.to_string(),
                data_key: format!("blocks/{}", id),
            })
            .collect(),
        identity: Identity::user("user-1", "Ada"),
    }
}

/// Wait for `task_id` to be finalized and return its status
pub async fn wait_for_finalized(
    processor: &ChainProcessor,
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    task_id: TaskId,
) -> TaskStatus {
    let waited = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            match events.recv().await {
                Ok(Event::TaskFinalized { task_id: id, status }) if id == task_id => {
                    return Some(status);
                }
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await;

    match waited {
        Ok(Some(status)) => status,
        _ => {
            let task = processor.db.get_task(task_id).await.unwrap();
            panic!("task {} was not finalized: {:?}", task_id, task);
        }
    }
}

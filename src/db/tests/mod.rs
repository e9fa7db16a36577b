
use crate::db::*;
use crate::types::{JobType, SubTaskInput, TaskId};
use tempfile::NamedTempFile;

/// Open a fresh database in a temp file
///
/// The returned `NamedTempFile` must outlive the database.
async fn open_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

fn inputs(count: usize) -> Vec<SubTaskInput> {
    (0..count)
        .map(|i| SubTaskInput {
            item_id: format!("block-{}", i),
            data_key: format!("exports/block-{}", i),
        })
        .collect()
}

async fn insert_task(db: &Database, count: usize) -> TaskId {
    db.insert_task(&NewTask {
        job_type: JobType::ExportBlocks,
        created_by: "u-1".to_string(),
        inputs: inputs(count),
    })
    .await
    .unwrap()
}

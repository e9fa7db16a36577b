use super::*;
use crate::error::Error;
use crate::types::SubTaskInput;

#[tokio::test]
async fn test_start_task_stores_sub_tasks_and_dispatches_first_turn() {
    let chain = create_test_chain(TestChainOptions::default()).await;
    let mut events = chain.processor.subscribe();

    let task_id = chain
        .processor
        .start_task(request(items(3)))
        .await
        .unwrap();

    let task = chain.processor.db.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.total, 3);
    assert_eq!(task.stats.pending, 3);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.created_by, "user-1");

    let sub_tasks = chain.processor.db.list_sub_tasks(task_id).await.unwrap();
    let ids: Vec<_> = sub_tasks.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["00000", "00001", "00002"]);

    let history = chain.dispatcher.history();
    assert_eq!(history.len(), 1);
    let Invocation::Process(first) = &history[0] else {
        panic!("expected a process invocation");
    };
    assert_eq!(first.sub_task_index, 0);
    assert_eq!(first.identity.kind, crate::types::IdentityKind::System);

    let events = drain_events(&mut events);
    assert!(matches!(
        events.first(),
        Some(Event::TaskStarted { total: 3, .. })
    ));
}

#[tokio::test]
async fn test_empty_task_goes_straight_to_finalize() {
    let chain = create_test_chain(TestChainOptions::default()).await;

    let task_id = chain.processor.start_task(request(Vec::new())).await.unwrap();

    assert_eq!(chain.dispatcher.finalize_count(), 1);
    assert!(chain.dispatcher.process_indices().is_empty());

    let report = drive(&chain).await;
    assert_eq!(report.finalize_turns(), 1);
    let task = chain.processor.db.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.output.unwrap().total, 0);
}

#[tokio::test]
async fn test_start_task_rejects_blank_items() {
    let chain = create_test_chain(TestChainOptions::default()).await;
    let mut inputs = items(2);
    inputs.push(SubTaskInput {
        item_id: "  ".to_string(),
        data_key: "exports/blank".to_string(),
    });

    let result = chain.processor.start_task(request(inputs)).await;

    match result {
        Err(Error::Validation(message)) => assert!(message.contains("item 2")),
        other => panic!("expected validation error, got {:?}", other),
    }
    assert!(chain.processor.db.list_tasks(10).await.unwrap().is_empty());
    assert!(chain.dispatcher.history().is_empty());
}

#[tokio::test]
async fn test_start_task_rejects_too_many_items() {
    let chain = create_test_chain(TestChainOptions::default()).await;

    let result = chain
        .processor
        .start_task(request(items(crate::types::MAX_SUB_TASKS + 1)))
        .await;

    assert!(matches!(result, Err(Error::Validation(_))));
    assert!(chain.dispatcher.history().is_empty());
}

#[tokio::test]
async fn test_start_task_reports_undispatched_first_turn() {
    let chain = create_test_chain(TestChainOptions::default()).await;
    chain.dispatcher.set_failing(true);

    let result = chain.processor.start_task(request(items(1))).await;

    let Err(Error::Dispatch(message)) = result else {
        panic!("expected a dispatch error");
    };
    assert!(message.contains("created but its first turn was not dispatched"));
    // The task exists and can be resumed
    assert_eq!(chain.processor.db.list_tasks(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_start_task_after_shutdown_is_refused() {
    let chain = create_test_chain(TestChainOptions::default()).await;
    chain.processor.shutdown().await;

    let result = chain.processor.start_task(request(items(1))).await;

    assert!(matches!(result, Err(Error::ShuttingDown)));
}

//! Multi-agent task workflows run against a temporary workspace.

use squad_core::{CallerContext, TaskStatus, TaskType};
use squad_store::{Journal, RecordStore, Workspace};
use squad_tasks::{
    DependencySpec, FinalizationOutcome, NewTask, StatusUpdate, TaskEngine, WaitOptions,
};
use std::time::Duration;
use tempfile::TempDir;

const SESSION: &str = "default";
const DEV: &str = "agent-max-dev";
const TESTER: &str = "agent-leo-tester";
const REVIEWER: &str = "agent-nora-reviewer";

fn engine(temp: &TempDir) -> TaskEngine {
    TaskEngine::new(Journal::new(RecordStore::new(Workspace::new(temp.path()))))
}

fn fast() -> WaitOptions {
    WaitOptions::new(Some(100), Some(Duration::from_secs(10)))
}

async fn implementation(engine: &TaskEngine, title: &str) -> String {
    engine
        .create_task(NewTask {
            title: Some(title.to_string()),
            task_type: Some(TaskType::Implementation),
            ..NewTask::new(SESSION, DEV)
        })
        .await
        .unwrap()
        .id
        .clone()
}

async fn validator(engine: &TaskEngine, agent: &str, task_type: TaskType, upstream: &str) -> String {
    engine
        .create_task(NewTask {
            title: Some(format!("{} {}", task_type, upstream)),
            task_type: Some(task_type),
            dependencies: vec![DependencySpec::blocks(upstream)],
            ..NewTask::new(SESSION, agent)
        })
        .await
        .unwrap()
        .id
        .clone()
}

async fn status(engine: &TaskEngine, task_id: &str) -> TaskStatus {
    engine.require_task(SESSION, task_id).await.unwrap().status
}

#[tokio::test]
async fn test_tester_waits_until_implementation_done() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);

    let dev_task = implementation(&engine, "implement X").await;
    assert_eq!(status(&engine, &dev_task).await, TaskStatus::Ready);

    let test_task = validator(&engine, TESTER, TaskType::Testing, &dev_task).await;
    assert_eq!(status(&engine, &test_task).await, TaskStatus::Waiting);

    let view = engine.require_task(SESSION, &test_task).await.unwrap();
    assert_eq!(view.blocking_tasks.len(), 1);
    assert_eq!(view.blocking_tasks[0].depends_on_agent_id.as_deref(), Some(DEV));

    engine
        .update_status(
            &CallerContext::agent(DEV, SESSION),
            StatusUpdate::new(dev_task.clone(), TaskStatus::Done),
        )
        .await
        .unwrap();
    assert_eq!(status(&engine, &test_task).await, TaskStatus::Ready);
}

#[tokio::test]
async fn test_validator_starts_on_in_review() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);

    let dev_task = implementation(&engine, "implement X").await;
    let test_task = validator(&engine, TESTER, TaskType::Testing, &dev_task).await;

    // An implementation task blocking on the same upstream is not let through early
    let follow_up = engine
        .create_task(NewTask {
            title: Some("follow up".into()),
            task_type: Some(TaskType::Implementation),
            dependencies: vec![DependencySpec::blocks(dev_task.clone())],
            ..NewTask::new(SESSION, DEV)
        })
        .await
        .unwrap();

    engine
        .update_status(
            &CallerContext::agent(DEV, SESSION),
            StatusUpdate::new(dev_task.clone(), TaskStatus::InReview),
        )
        .await
        .unwrap();

    assert_eq!(status(&engine, &test_task).await, TaskStatus::Ready);
    assert_eq!(status(&engine, &follow_up.id).await, TaskStatus::Waiting);
    assert!(engine
        .list_blocking_dependencies(SESSION, &test_task)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_finalization_requires_every_validator() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);

    let dev_task = implementation(&engine, "implement X").await;
    let test_task = validator(&engine, TESTER, TaskType::Testing, &dev_task).await;
    let review_task = validator(&engine, REVIEWER, TaskType::Review, &dev_task).await;

    engine
        .update_status(
            &CallerContext::agent(DEV, SESSION),
            StatusUpdate::new(dev_task.clone(), TaskStatus::InReview),
        )
        .await
        .unwrap();

    let waiting = engine.finalize(SESSION, &dev_task, None, None, None).await.unwrap();
    assert_eq!(waiting.outcome, FinalizationOutcome::Waiting);
    assert_eq!(waiting.pending_dependent_task_ids.len(), 2);

    engine
        .update_status(
            &CallerContext::agent(TESTER, SESSION),
            StatusUpdate::new(test_task.clone(), TaskStatus::Done),
        )
        .await
        .unwrap();
    assert_eq!(status(&engine, &dev_task).await, TaskStatus::InReview);

    engine
        .update_status(
            &CallerContext::agent(REVIEWER, SESSION),
            StatusUpdate::new(review_task.clone(), TaskStatus::Done),
        )
        .await
        .unwrap();

    let done = engine.require_task(SESSION, &dev_task).await.unwrap();
    assert_eq!(done.status, TaskStatus::Done);
    assert!(done.completed_at.is_some());

    let events = engine.journal().list_events(SESSION, Some(DEV)).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == "task.finalized"));
}

#[tokio::test]
async fn test_blocked_validator_reopens_upstream() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);

    let dev_task = implementation(&engine, "implement X").await;
    let test_task = validator(&engine, TESTER, TaskType::Testing, &dev_task).await;

    engine
        .update_status(
            &CallerContext::agent(DEV, SESSION),
            StatusUpdate::new(dev_task.clone(), TaskStatus::InReview),
        )
        .await
        .unwrap();
    engine
        .update_status(
            &CallerContext::agent(TESTER, SESSION),
            StatusUpdate::new(test_task.clone(), TaskStatus::Blocked).note("X failed"),
        )
        .await
        .unwrap();

    let reopened = engine.require_task(SESSION, &dev_task).await.unwrap();
    assert_eq!(reopened.status, TaskStatus::InProgress);
    assert_eq!(reopened.blocking_reason.as_deref(), Some("X failed"));
    assert!(reopened.result_summary.is_none());

    let events = engine.journal().list_events(SESSION, Some(TESTER)).await.unwrap();
    let change = events
        .iter()
        .find(|e| e.event_type == "task.changes_requested")
        .unwrap();
    assert_eq!(change.payload["feedbackTaskId"], test_task.as_str());
    assert_eq!(change.payload["feedback"], "X failed");
}

#[tokio::test]
async fn test_reopen_sends_sibling_validators_back_to_waiting() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);

    let dev_task = implementation(&engine, "implement X").await;
    let test_task = validator(&engine, TESTER, TaskType::Testing, &dev_task).await;
    let review_task = validator(&engine, REVIEWER, TaskType::Review, &dev_task).await;

    engine
        .update_status(
            &CallerContext::agent(DEV, SESSION),
            StatusUpdate::new(dev_task.clone(), TaskStatus::InReview),
        )
        .await
        .unwrap();
    assert_eq!(status(&engine, &test_task).await, TaskStatus::Ready);
    assert_eq!(status(&engine, &review_task).await, TaskStatus::Ready);

    engine
        .update_status(
            &CallerContext::agent(TESTER, SESSION),
            StatusUpdate::new(test_task.clone(), TaskStatus::Blocked).note("regression"),
        )
        .await
        .unwrap();

    let dev = engine.require_task(SESSION, &dev_task).await.unwrap();
    assert_eq!(dev.status, TaskStatus::InProgress);
    assert_eq!(dev.blocking_reason.as_deref(), Some("regression"));

    let review = engine.require_task(SESSION, &review_task).await.unwrap();
    assert_eq!(review.status, TaskStatus::Waiting);
    assert_eq!(review.blocking_tasks.len(), 1);

    // The rejecting validator keeps its verdict
    assert_eq!(status(&engine, &test_task).await, TaskStatus::Blocked);
}

#[tokio::test]
async fn test_rejection_reopens_every_upstream_of_the_validator() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let dev = CallerContext::agent(DEV, SESSION);

    let parser = implementation(&engine, "implement parser").await;
    let lexer = implementation(&engine, "implement lexer").await;
    let test_task = engine
        .create_task(NewTask {
            title: Some("test front end".to_string()),
            task_type: Some(TaskType::Testing),
            dependencies: vec![DependencySpec::blocks(&parser), DependencySpec::blocks(&lexer)],
            ..NewTask::new(SESSION, TESTER)
        })
        .await
        .unwrap()
        .id
        .clone();

    for task in [&parser, &lexer] {
        engine
            .update_status(&dev, StatusUpdate::new(task.clone(), TaskStatus::InReview))
            .await
            .unwrap();
    }
    assert_eq!(status(&engine, &test_task).await, TaskStatus::Ready);

    engine
        .update_status(
            &CallerContext::agent(TESTER, SESSION),
            StatusUpdate::new(test_task.clone(), TaskStatus::Failed).note("tokens dropped"),
        )
        .await
        .unwrap();

    for task in [&parser, &lexer] {
        let view = engine.require_task(SESSION, task).await.unwrap();
        assert_eq!(view.status, TaskStatus::InProgress);
        assert_eq!(view.blocking_reason.as_deref(), Some("tokens dropped"));
    }
}

#[tokio::test]
async fn test_notify_done_resolves_with_changes_requested() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);

    let dev_task = implementation(&engine, "implement X").await;
    let test_task = validator(&engine, TESTER, TaskType::Testing, &dev_task).await;
    engine
        .update_status(
            &CallerContext::agent(DEV, SESSION),
            StatusUpdate::new(dev_task.clone(), TaskStatus::InProgress),
        )
        .await
        .unwrap();

    let notifier = engine.clone();
    let notified_task = dev_task.clone();
    let handle = tokio::spawn(async move {
        notifier
            .notify_done(
                &CallerContext::agent(DEV, SESSION),
                &notified_task,
                None,
                Some("implemented"),
                &fast(),
            )
            .await
    });

    // Wait for the implementation to reach review and the tester to be woken
    let mut woken = false;
    for _ in 0..100 {
        if status(&engine, &test_task).await == TaskStatus::Ready {
            woken = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(woken, "tester task never became ready");
    assert_eq!(status(&engine, &dev_task).await, TaskStatus::InReview);

    engine
        .update_status(
            &CallerContext::agent(TESTER, SESSION),
            StatusUpdate::new(test_task.clone(), TaskStatus::Blocked).note("regression"),
        )
        .await
        .unwrap();

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.outcome, FinalizationOutcome::ChangesRequested);
    assert_eq!(result.feedback[0].message, "regression");

    let dev = engine.require_task(SESSION, &dev_task).await.unwrap();
    assert_eq!(dev.status, TaskStatus::InProgress);
    assert_eq!(dev.blocking_reason.as_deref(), Some("regression"));
}

#[tokio::test]
async fn test_resubmission_rearms_blocked_validator() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let dev = CallerContext::agent(DEV, SESSION);

    let dev_task = implementation(&engine, "implement X").await;
    let test_task = validator(&engine, TESTER, TaskType::Testing, &dev_task).await;
    engine
        .update_status(&dev, StatusUpdate::new(dev_task.clone(), TaskStatus::InReview))
        .await
        .unwrap();
    engine
        .update_status(
            &CallerContext::agent(TESTER, SESSION),
            StatusUpdate::new(test_task.clone(), TaskStatus::Blocked).note("regression"),
        )
        .await
        .unwrap();
    assert_eq!(status(&engine, &dev_task).await, TaskStatus::InProgress);

    // Second round: the notifier must not be rejected by the stale verdict
    let notifier = engine.clone();
    let notified_task = dev_task.clone();
    let handle = tokio::spawn(async move {
        notifier
            .notify_done(&CallerContext::agent(DEV, SESSION), &notified_task, None, None, &fast())
            .await
    });

    let mut rearmed = false;
    for _ in 0..100 {
        if status(&engine, &test_task).await == TaskStatus::Ready {
            rearmed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(rearmed, "validator was not re-armed");

    engine
        .update_status(
            &CallerContext::agent(TESTER, SESSION),
            StatusUpdate::new(test_task.clone(), TaskStatus::Done),
        )
        .await
        .unwrap();

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.outcome, FinalizationOutcome::Finalized);
    assert_eq!(status(&engine, &dev_task).await, TaskStatus::Done);
}

#[tokio::test]
async fn test_wait_for_availability_times_out() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);

    let dev_task = implementation(&engine, "implement X").await;
    let test_task = validator(&engine, TESTER, TaskType::Testing, &dev_task).await;

    let options = WaitOptions::new(Some(100), Some(Duration::from_millis(300)));
    let err = engine
        .wait_for_availability(SESSION, &test_task, Some(TESTER), &options)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "WAIT_TIMEOUT");

    let events = engine.journal().list_events(SESSION, Some(TESTER)).await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == "task.waiting_for_dependencies"));
}

#[tokio::test]
async fn test_wait_for_availability_returns_once_unblocked() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);

    let dev_task = implementation(&engine, "implement X").await;
    let test_task = validator(&engine, TESTER, TaskType::Testing, &dev_task).await;

    let waiter = engine.clone();
    let waited_task = test_task.clone();
    let handle = tokio::spawn(async move {
        waiter
            .wait_for_availability(SESSION, &waited_task, Some(TESTER), &fast())
            .await
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    engine
        .update_status(
            &CallerContext::agent(DEV, SESSION),
            StatusUpdate::new(dev_task.clone(), TaskStatus::InReview),
        )
        .await
        .unwrap();

    let view = handle.await.unwrap().unwrap();
    assert_eq!(view.status, TaskStatus::Ready);
    assert!(view.blocking_tasks.is_empty());
}

#[tokio::test]
async fn test_waits_on_missing_task_fail() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let err = engine
        .wait_for_finalization(SESSION, "task-missing", None, &fast())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TASK_NOT_FOUND");
}

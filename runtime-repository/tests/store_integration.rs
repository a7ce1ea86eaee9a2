//! Integration tests for `SqliteRunRepository` against the `RunRepository`
//! contract, run from outside the crate to mirror how `runtime-serve` uses it.
//! Uses the multi_thread runtime since the store's `block_in_place` calls
//! require it.

use runtime_core::{Dependency, DependencyStatus, Run, RunRepository, RunStatus, RunnableScope};
use runtime_repository::SqliteRunRepository;
use tempfile::NamedTempFile;

fn scope() -> RunnableScope {
    RunnableScope::new("org-1", "user-1")
}

fn new_run(id: &str, session_key: &str) -> Run {
    Run::new(id, scope(), session_key, "do the thing", "agent-main", "2026-01-01T00:00:00Z")
}

#[tokio::test(flavor = "multi_thread")]
async fn reopening_the_same_database_file_preserves_runs() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_path_buf();

    let repo1 = SqliteRunRepository::new(&path).unwrap();
    repo1.create_run(new_run("run_1", "sess_a")).await.unwrap();
    drop(repo1);

    let repo2 = SqliteRunRepository::new(&path).unwrap();
    let loaded = repo2.get_run(&scope(), "run_1").await.unwrap().unwrap();
    assert_eq!(loaded.session_key, "sess_a");
}

#[tokio::test(flavor = "multi_thread")]
async fn update_run_persists_status_and_result() {
    let file = NamedTempFile::new().unwrap();
    let repo = SqliteRunRepository::new(file.path()).unwrap();
    let mut run = new_run("run_1", "sess_a");
    repo.create_run(run.clone()).await.unwrap();

    run.status = RunStatus::Completed;
    run.result = Some(serde_json::json!({"answer": 42}));
    run.ended_at = Some("2026-01-01T00:01:00Z".to_string());
    repo.update_run(run).await.unwrap();

    let reloaded = repo.get_run(&scope(), "run_1").await.unwrap().unwrap();
    assert_eq!(reloaded.status, RunStatus::Completed);
    assert_eq!(reloaded.result, Some(serde_json::json!({"answer": 42})));
}

#[tokio::test(flavor = "multi_thread")]
async fn update_run_missing_id_is_not_found() {
    let file = NamedTempFile::new().unwrap();
    let repo = SqliteRunRepository::new(file.path()).unwrap();
    let err = repo.update_run(new_run("ghost", "sess_a")).await.unwrap_err();
    assert_eq!(err.code_message().0, "NOT_FOUND");
}

#[tokio::test(flavor = "multi_thread")]
async fn create_run_with_duplicate_id_is_validation_error() {
    let file = NamedTempFile::new().unwrap();
    let repo = SqliteRunRepository::new(file.path()).unwrap();
    repo.create_run(new_run("run_1", "sess_a")).await.unwrap();
    let err = repo.create_run(new_run("run_1", "sess_a")).await.unwrap_err();
    assert_eq!(err.code_message().0, "VALIDATION_ERROR");
}

#[tokio::test(flavor = "multi_thread")]
async fn list_runs_in_session_excludes_other_sessions_and_out_of_scope_runs() {
    let file = NamedTempFile::new().unwrap();
    let repo = SqliteRunRepository::new(file.path()).unwrap();
    repo.create_run(new_run("run_1", "sess_a")).await.unwrap();
    repo.create_run(new_run("run_2", "sess_b")).await.unwrap();
    let mut foreign = new_run("run_3", "sess_a");
    foreign.scope = RunnableScope::new("other-org", "user-1");
    repo.create_run(foreign).await.unwrap();

    let (runs, total) = repo.list_runs_in_session(&scope(), "sess_a", 1, 10).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(runs[0].id, "run_1");
}

#[tokio::test(flavor = "multi_thread")]
async fn fan_in_sequence_across_connection_reopen() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_path_buf();
    let repo = SqliteRunRepository::new(&path).unwrap();

    let mut parent = new_run("parent", "sess_a");
    parent.status = RunStatus::Suspended;
    repo.create_run(parent).await.unwrap();
    repo.create_dependency(Dependency::new("parent", "child_a", "call_1", "researcher", "look something up"))
        .await
        .unwrap();
    repo.create_dependency(Dependency::new("parent", "child_b", "call_1", "writer", "draft a summary"))
        .await
        .unwrap();

    let first = repo
        .complete_dependency_atomic("child_a", DependencyStatus::Completed, Some(serde_json::json!("found it")), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.pending_count, 1);

    drop(repo);
    let repo2 = SqliteRunRepository::new(&path).unwrap();
    let second = repo2
        .complete_dependency_atomic("child_b", DependencyStatus::Failed, None, Some("writer timed out".to_string()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.pending_count, 0);

    repo2.set_run_resumed_from_suspension("parent").await.unwrap();
    let resumed = repo2.get_run_unscoped("parent").await.unwrap().unwrap();
    assert_eq!(resumed.status, RunStatus::Pending);
    assert!(resumed.suspended_at.is_none());

    let deps = repo2.list_dependencies_of_parent("parent").await.unwrap();
    assert_eq!(deps.len(), 2);
    assert!(deps.iter().any(|d| d.child_run_id == "child_b" && d.status == DependencyStatus::Failed));
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_dependency_insert_is_rejected() {
    let file = NamedTempFile::new().unwrap();
    let repo = SqliteRunRepository::new(file.path()).unwrap();
    repo.create_dependency(Dependency::new("parent", "child_a", "call_1", "role", "goal")).await.unwrap();
    let err = repo
        .create_dependency(Dependency::new("parent", "child_a", "call_1", "role", "goal"))
        .await
        .unwrap_err();
    assert_eq!(err.code_message().0, "VALIDATION_ERROR");
}

//! Issue status transitions.

use crate::error::{Error, Result};
use crate::hooks::{HookEvent, HookRunner};
use crate::store::{Issue, IssueStore, IssueUpdate, STATUS_DONE, STATUS_FINISHED};

/// Sets an issue's status and fires the matching hooks.
///
/// `issue.updated` and `issue.status_changed` always fire; `issue.completed`
/// only when the new status is `done`. A failing hook aborts the transition
/// after the status has already been written.
pub async fn transition(
    store: &dyn IssueStore,
    hooks: &dyn HookRunner,
    issue_id: &str,
    status: &str,
) -> Result<Issue> {
    let updated = store
        .update_issue(issue_id, IssueUpdate::status(status))
        .await?;
    tracing::info!(issue_id = %updated.id, status = %status, "issue status changed");

    hooks.fire(HookEvent::IssueUpdated, &updated.id).await?;
    hooks.fire(HookEvent::IssueStatusChanged, &updated.id).await?;
    if status == STATUS_DONE {
        hooks.fire(HookEvent::IssueCompleted, &updated.id).await?;
    }
    Ok(updated)
}

/// Registers the `finished` status unless it already exists.
pub async fn ensure_finished_status(store: &dyn IssueStore) -> Result<()> {
    match store.add_status(STATUS_FINISHED).await {
        Ok(()) => {
            tracing::info!(status = STATUS_FINISHED, "registered status");
            Ok(())
        }
        Err(Error::StatusExists(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{STATUS_IN_PROGRESS, STATUS_TODO};
    use crate::test_support::{MemoryStore, RecordingHooks};

    #[tokio::test]
    async fn done_fires_completion() {
        let store = MemoryStore::with_issue("TRK-1", "Fix");
        let hooks = RecordingHooks::new();

        let issue = transition(&store, &hooks, "TRK-1", STATUS_DONE).await.unwrap();
        assert_eq!(issue.status, STATUS_DONE);
        assert_eq!(
            hooks.events(),
            vec![
                (HookEvent::IssueUpdated, "TRK-1".to_string()),
                (HookEvent::IssueStatusChanged, "TRK-1".to_string()),
                (HookEvent::IssueCompleted, "TRK-1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn other_statuses_skip_completion() {
        let store = MemoryStore::with_issue("TRK-1", "Fix");
        let hooks = RecordingHooks::new();

        transition(&store, &hooks, "TRK-1", STATUS_IN_PROGRESS)
            .await
            .unwrap();
        assert_eq!(hooks.events().len(), 2);
        assert!(!hooks.fired(HookEvent::IssueCompleted));
    }

    #[tokio::test]
    async fn hook_failure_propagates_after_update() {
        let store = MemoryStore::with_issue("TRK-1", "Fix");
        let hooks = RecordingHooks::failing_on(HookEvent::IssueStatusChanged);

        let err = transition(&store, &hooks, "TRK-1", STATUS_DONE)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Hook { .. }));
        assert_eq!(store.status_of("TRK-1").as_deref(), Some(STATUS_DONE));
        assert!(!hooks.fired(HookEvent::IssueCompleted));
    }

    #[tokio::test]
    async fn unknown_status_fires_nothing() {
        let store = MemoryStore::with_issue("TRK-1", "Fix");
        let hooks = RecordingHooks::new();

        assert!(transition(&store, &hooks, "TRK-1", "shipped").await.is_err());
        assert!(hooks.events().is_empty());
        assert_eq!(store.status_of("TRK-1").as_deref(), Some(STATUS_TODO));
    }

    #[tokio::test]
    async fn ensure_finished_is_idempotent() {
        let store = MemoryStore::new();
        ensure_finished_status(&store).await.unwrap();
        ensure_finished_status(&store).await.unwrap();
        assert!(store
            .list_statuses()
            .await
            .unwrap()
            .contains(&STATUS_FINISHED.to_string()));
    }
}

//! End-to-end sync tests against an in-memory remote service

mod common;

use std::sync::Arc;
use std::time::Duration;

use alignsync_core::models::{AlignmentSide, LinkStatus, ProjectLocation, ProjectState};
use alignsync_core::sync::{
    ProjectDto, RemoteService, SyncCoordinator, SyncEvent, SyncOperation, SyncOutcome, TokenDto,
};
use alignsync_core::{Error, Link, Project};
use common::{corpus, links, workspace, word_ref, Failure, MockRemote};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn coordinator(temp: &TempDir, remote: &Arc<MockRemote>) -> SyncCoordinator {
    SyncCoordinator::new(workspace(temp), remote.clone() as Arc<dyn RemoteService>)
}

/// Create a LOCAL project with two corpora and `link_count` links
async fn local_project(coordinator: &SyncCoordinator, words: usize, link_count: usize) -> Project {
    let workspace = coordinator.workspace();
    let mut workspace = workspace.lock().await;
    let project = workspace
        .create_project(
            "Ruth",
            &[
                corpus("src", AlignmentSide::Source, words),
                corpus("tgt", AlignmentSide::Target, words),
            ],
        )
        .unwrap();
    workspace.import_links(&project.id, &links(link_count)).unwrap();
    project
}

async fn registry_entry(coordinator: &SyncCoordinator, id: &str) -> Project {
    coordinator.workspace().lock().await.project(id).unwrap()
}

async fn journal_len(coordinator: &SyncCoordinator, id: &str) -> usize {
    let workspace = coordinator.workspace();
    let mut workspace = workspace.lock().await;
    workspace.database(id).unwrap().journal().count().unwrap()
}

async fn all_links(coordinator: &SyncCoordinator, id: &str) -> Vec<Link> {
    let workspace = coordinator.workspace();
    let mut workspace = workspace.lock().await;
    workspace.database(id).unwrap().links().all_links().unwrap()
}

#[tokio::test]
async fn test_publish_then_download_round_trip() {
    let remote = MockRemote::new();
    let (temp_a, temp_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let mut a = coordinator(&temp_a, &remote);
    let mut events = a.take_events().unwrap();
    let project = local_project(&a, 600, 500).await;

    let outcome = a
        .publish(&project.id, ProjectLocation::Synced, CancellationToken::new())
        .await
        .unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.tokens_sent, 1200);
    // 500 links in bulk chunks of 200, one chunk per request
    assert_eq!(report.journal_units_sent, 3);

    let published = registry_entry(&a, &project.id).await;
    assert_eq!(published.location, ProjectLocation::Synced);
    assert_eq!(published.server_state, Some(ProjectState::Published));
    assert_eq!(journal_len(&a, &project.id).await, 0);
    assert!(!a.is_sync_eligible(&project.id).await.unwrap());

    let server = remote.project(&project.id).unwrap();
    assert_eq!(server.links.len(), 500);
    assert_eq!(server.tokens.len(), 1200);

    let first = events.recv().await.unwrap();
    assert_eq!(
        first,
        SyncEvent::Started {
            project_id: project.id.clone(),
            operation: SyncOperation::Publish
        }
    );

    // A second client discovers and downloads the project
    let b = coordinator(&temp_b, &remote);
    let refresh = b.refresh_remote_projects().await.unwrap();
    assert_eq!(refresh.added, 1);
    assert_eq!(registry_entry(&b, &project.id).await.location, ProjectLocation::Remote);

    let outcome = b.download(&project.id, CancellationToken::new()).await.unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.tokens_received, 1200);
    assert_eq!(report.links_received, 500);

    let downloaded = registry_entry(&b, &project.id).await;
    assert_eq!(downloaded.location, ProjectLocation::Synced);
    assert_eq!(downloaded.name, "Ruth");
    assert!(!b.is_sync_eligible(&project.id).await.unwrap());
    assert_eq!(all_links(&b, &project.id).await, all_links(&a, &project.id).await);

    let ws_a = a.workspace();
    let ws_b = b.workspace();
    let mut ws_a = ws_a.lock().await;
    let mut ws_b = ws_b.lock().await;
    let corpora_a = ws_a.database(&project.id).unwrap().corpora().corpora().unwrap();
    let corpora_b = ws_b.database(&project.id).unwrap().corpora().corpora().unwrap();
    assert_eq!(corpora_a, corpora_b);
    for c in &corpora_a {
        assert_eq!(
            ws_a.database(&project.id).unwrap().corpora().words(&c.id).unwrap(),
            ws_b.database(&project.id).unwrap().corpora().words(&c.id).unwrap()
        );
    }
    assert_eq!(
        ws_a.database(&project.id).unwrap().links().cached_texts("link-00003").unwrap(),
        ws_b.database(&project.id).unwrap().links().cached_texts("link-00003").unwrap()
    );
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let a = coordinator(&temp, &remote);
    let project = local_project(&a, 20, 10).await;
    a.publish(&project.id, ProjectLocation::Synced, CancellationToken::new())
        .await
        .unwrap();

    // One status change travels as one UPDATE entry
    let approved = links(10)[4].clone().with_status(LinkStatus::Approved);
    a.workspace()
        .lock()
        .await
        .save_links(&project.id, &[approved.clone()])
        .unwrap();
    assert!(a.is_sync_eligible(&project.id).await.unwrap());

    let outcome = a.sync(&project.id, CancellationToken::new()).await.unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.journal_entries_sent, 1);
    assert_eq!(report.links_changed, 0);
    assert_eq!(
        remote.project(&project.id).unwrap().links["link-00004"].meta.status,
        LinkStatus::Approved
    );

    remote.clear_calls();
    let again = a.sync(&project.id, CancellationToken::new()).await.unwrap();
    assert_eq!(again, SyncOutcome::Skipped);
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn test_refresh_after_publish_keeps_project_in_step() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let a = coordinator(&temp, &remote);
    let project = local_project(&a, 10, 4).await;
    a.publish(&project.id, ProjectLocation::Synced, CancellationToken::new())
        .await
        .unwrap();

    // The registry holds the time of the state change, the server's last write
    let server_time = remote.project(&project.id).unwrap().dto.unwrap().updated_at.unwrap();
    let entry = registry_entry(&a, &project.id).await;
    assert_eq!(entry.last_sync_server_time, server_time);

    a.refresh_remote_projects().await.unwrap();
    let entry = registry_entry(&a, &project.id).await;
    assert_eq!(entry.server_updated_at, entry.last_sync_server_time);
    assert!(!a.is_sync_eligible(&project.id).await.unwrap());

    remote.clear_calls();
    assert_eq!(
        a.sync(&project.id, CancellationToken::new()).await.unwrap(),
        SyncOutcome::Skipped
    );
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn test_first_sync_publishes_local_project() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let a = coordinator(&temp, &remote);
    let project = local_project(&a, 10, 3).await;

    let outcome = a.sync(&project.id, CancellationToken::new()).await.unwrap();
    assert!(outcome.report().is_some());

    let server = remote.project(&project.id).unwrap();
    assert_eq!(server.dto.unwrap().state, Some(ProjectState::Published));
    assert_eq!(server.links.len(), 3);
    let entry = registry_entry(&a, &project.id).await;
    assert_eq!(entry.location, ProjectLocation::Synced);
    assert_eq!(entry.server_state, Some(ProjectState::Published));
}

#[tokio::test]
async fn test_refresh_leaves_local_project_with_remote_twin_alone() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let a = coordinator(&temp, &remote);
    let project = local_project(&a, 10, 6).await;

    // An empty project with the same id already exists on the server
    let mut twin = ProjectDto::from_project(&project, ProjectState::Draft);
    twin.updated_at = Some(1_000);
    remote.seed(twin, vec![], vec![]);

    let refresh = a.refresh_remote_projects().await.unwrap();
    assert_eq!(refresh.updated, 0);
    let entry = registry_entry(&a, &project.id).await;
    assert_eq!(entry.location, ProjectLocation::Local);
    assert_eq!(entry.server_state, None);

    // The next sync is a first upload: local links reach the server intact
    a.sync(&project.id, CancellationToken::new()).await.unwrap();
    assert_eq!(remote.project(&project.id).unwrap().links.len(), 6);
    let ids: Vec<String> = all_links(&a, &project.id).await.into_iter().map(|l| l.id).collect();
    let expected: Vec<String> = links(6).into_iter().map(|l| l.id).collect();
    assert_eq!(ids, expected);
    assert_eq!(registry_entry(&a, &project.id).await.location, ProjectLocation::Synced);
}

#[tokio::test]
async fn test_ineligible_sync_makes_no_requests() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let a = coordinator(&temp, &remote);
    let project = local_project(&a, 10, 5).await;
    a.publish(&project.id, ProjectLocation::Synced, CancellationToken::new())
        .await
        .unwrap();
    remote.clear_calls();

    assert!(!a.is_sync_eligible(&project.id).await.unwrap());
    assert_eq!(
        a.sync(&project.id, CancellationToken::new()).await.unwrap(),
        SyncOutcome::Skipped
    );
    assert!(remote.calls().is_empty());

    // A word edit flags its corpus; only that corpus's tokens are sent
    {
        let workspace = a.workspace();
        let mut workspace = workspace.lock().await;
        let mut word = workspace
            .database(&project.id)
            .unwrap()
            .corpora()
            .word(AlignmentSide::Target, &word_ref(2))
            .unwrap()
            .unwrap();
        word.text = "Naomi".into();
        workspace.update_words(&project.id, &[word]).unwrap();
    }
    assert!(a.is_sync_eligible(&project.id).await.unwrap());

    let outcome = a.sync(&project.id, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.report().unwrap().tokens_sent, 10);
    let server = remote.project(&project.id).unwrap();
    let token = &server.tokens[&("targets".to_string(), word_ref(2).encode())];
    assert_eq!(token.text, "Naomi");
}

#[tokio::test]
async fn test_pull_adopts_remote_link_set() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let a = coordinator(&temp, &remote);
    let project = local_project(&a, 10, 3).await;
    a.publish(&project.id, ProjectLocation::Synced, CancellationToken::new())
        .await
        .unwrap();

    // Another client removed one link and added one
    let mut server = remote.project(&project.id).unwrap();
    server.links.remove("link-00000");
    let extra = Link::with_id("remote-link", vec![word_ref(7)], vec![word_ref(8)]);
    server.links.insert(extra.id.clone(), extra.clone());
    let mut dto = server.dto.clone().unwrap();
    dto.updated_at = Some(dto.updated_at.unwrap() + 1);
    remote.seed(dto, server.tokens.into_values().collect(), server.links.into_values().collect());

    a.refresh_remote_projects().await.unwrap();
    assert!(a.is_sync_eligible(&project.id).await.unwrap());

    let outcome = a.sync(&project.id, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.report().unwrap().links_changed, 2);

    let ids: Vec<String> = all_links(&a, &project.id).await.into_iter().map(|l| l.id).collect();
    assert_eq!(ids, vec!["link-00001", "link-00002", "remote-link"]);
    assert!(!a.is_sync_eligible(&project.id).await.unwrap());
}

#[tokio::test]
async fn test_cancelled_download_leaves_no_local_data() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let b = coordinator(&temp, &remote);

    let source = corpus("src", AlignmentSide::Source, 50);
    let dto = ProjectDto {
        id: "remote-1".into(),
        name: "Esther".into(),
        members: vec![],
        state: Some(ProjectState::Published),
        corpora: vec![(&source).into()],
        updated_at: Some(1_000),
        last_sync_time: None,
    };
    remote.seed(dto, source.words.iter().map(TokenDto::from).collect(), links(5));
    b.refresh_remote_projects().await.unwrap();

    let cancel = CancellationToken::new();
    remote.cancel_after(2, cancel.clone());
    let outcome = b.download("remote-1", cancel).await.unwrap();
    assert!(outcome.is_cancelled());

    let workspace = b.workspace();
    let workspace = workspace.lock().await;
    assert!(!workspace.has_local_data("remote-1"));
    assert!(!workspace.config().project_db_path("remote-1").exists());
    assert_eq!(workspace.project("remote-1").unwrap().location, ProjectLocation::Remote);
}

#[tokio::test]
async fn test_failed_first_publish_removes_remote_copy() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let a = coordinator(&temp, &remote);
    let project = local_project(&a, 10, 5).await;

    remote.fail_on("set_state", Failure::Network);
    let err = a
        .publish(&project.id, ProjectLocation::Synced, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network(_)));
    assert!(err.is_retryable());

    assert!(remote.project(&project.id).is_none());
    assert!(remote.calls().contains(&"delete_project".to_string()));
    let entry = registry_entry(&a, &project.id).await;
    assert_eq!(entry.location, ProjectLocation::Local);
    assert_eq!(entry.last_sync_time, 0);

    // The retry uploads everything again
    remote.clear_failures();
    let outcome = a
        .publish(&project.id, ProjectLocation::Synced, CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.report().is_some());
    assert_eq!(remote.project(&project.id).unwrap().links.len(), 5);
}

#[tokio::test]
async fn test_failed_sync_restores_registry_and_flags() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let a = coordinator(&temp, &remote);
    let project = local_project(&a, 10, 5).await;
    a.publish(&project.id, ProjectLocation::Synced, CancellationToken::new())
        .await
        .unwrap();
    let before = registry_entry(&a, &project.id).await;

    {
        let workspace = a.workspace();
        let mut workspace = workspace.lock().await;
        let mut word = workspace
            .database(&project.id)
            .unwrap()
            .corpora()
            .word(AlignmentSide::Source, &word_ref(1))
            .unwrap()
            .unwrap();
        word.gloss = Some("famine".into());
        workspace.update_words(&project.id, &[word]).unwrap();
    }
    let edited = registry_entry(&a, &project.id).await;

    remote.fail_on("get_links", Failure::Network);
    let err = a.sync(&project.id, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));

    let after = registry_entry(&a, &project.id).await;
    assert_eq!(after, edited);
    assert_eq!(after.last_sync_time, before.last_sync_time);
    assert!(a.is_sync_eligible(&project.id).await.unwrap());
    {
        let workspace = a.workspace();
        let mut workspace = workspace.lock().await;
        assert!(workspace
            .database(&project.id)
            .unwrap()
            .corpora()
            .has_unsynced_changes()
            .unwrap());
    }

    remote.clear_failures();
    assert!(a
        .sync(&project.id, CancellationToken::new())
        .await
        .unwrap()
        .report()
        .is_some());
    assert!(!a.is_sync_eligible(&project.id).await.unwrap());
}

#[tokio::test]
async fn test_permission_error_is_not_retryable() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let a = coordinator(&temp, &remote);
    let project = local_project(&a, 5, 2).await;

    remote.fail_on("save_project", Failure::Permission);
    let err = a
        .publish(&project.id, ProjectLocation::Synced, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Permission(_)));
    assert!(!err.is_retryable());
    assert_eq!(registry_entry(&a, &project.id).await.location, ProjectLocation::Local);
}

#[tokio::test]
async fn test_unpublish_returns_project_to_local() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let a = coordinator(&temp, &remote);
    let project = local_project(&a, 5, 2).await;
    a.publish(&project.id, ProjectLocation::Synced, CancellationToken::new())
        .await
        .unwrap();

    a.publish(&project.id, ProjectLocation::Local, CancellationToken::new())
        .await
        .unwrap();
    assert!(remote.project(&project.id).is_none());
    let entry = registry_entry(&a, &project.id).await;
    assert_eq!(entry.location, ProjectLocation::Local);
    assert_eq!(entry.last_sync_time, 0);
    assert_eq!(all_links(&a, &project.id).await.len(), 2);
}

#[tokio::test]
async fn test_invalid_transitions_are_rejected() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let a = coordinator(&temp, &remote);
    let project = local_project(&a, 5, 2).await;

    let err = a.download(&project.id, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: ProjectLocation::Local,
            to: ProjectLocation::Synced
        }
    ));

    let mut remote_only = Project::with_id("r1", "Jonah");
    remote_only.location = ProjectLocation::Remote;
    a.workspace().lock().await.update_project(&remote_only).unwrap();
    let err = a
        .publish("r1", ProjectLocation::Local, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert!(matches!(
        a.sync("r1", CancellationToken::new()).await,
        Err(Error::InvalidTransition { .. })
    ));
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn test_second_operation_on_busy_project_is_rejected() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let a = coordinator(&temp, &remote);
    let project = local_project(&a, 5, 2).await;
    remote.set_delay(Duration::from_millis(50));

    let (first, second) = tokio::join!(
        a.publish(&project.id, ProjectLocation::Synced, CancellationToken::new()),
        a.sync(&project.id, CancellationToken::new()),
    );
    assert!(first.unwrap().report().is_some());
    assert!(matches!(second, Err(Error::Busy(_))));
    assert!(!a.is_busy(&project.id));
}

#[tokio::test]
async fn test_refresh_reverts_vanished_projects() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let a = coordinator(&temp, &remote);
    let project = local_project(&a, 5, 2).await;
    a.publish(&project.id, ProjectLocation::Synced, CancellationToken::new())
        .await
        .unwrap();

    let mut remote_only = Project::with_id("gone", "Obadiah");
    remote_only.location = ProjectLocation::Remote;
    a.workspace().lock().await.update_project(&remote_only).unwrap();

    remote.forget(&project.id);
    let refresh = a.refresh_remote_projects().await.unwrap();
    assert_eq!(refresh.reverted, 1);
    assert_eq!(refresh.dropped, 1);

    let entry = registry_entry(&a, &project.id).await;
    assert_eq!(entry.location, ProjectLocation::Local);
    assert_eq!(entry.last_sync_time, 0);
    assert!(a.workspace().lock().await.registry().get("gone").unwrap().is_none());
}

#[tokio::test]
async fn test_bulk_import_travels_in_bounded_chunks() {
    let remote = MockRemote::new();
    let temp = TempDir::new().unwrap();
    let mut config = common::config(&temp);
    config.bulk_chunk_size = 10_000;
    config.token_chunk_size = 10_000;
    let workspace = alignsync_core::Workspace::open(config).unwrap();
    let a = SyncCoordinator::new(workspace, remote.clone() as Arc<dyn RemoteService>);

    let project = {
        let workspace = a.workspace();
        let mut workspace = workspace.lock().await;
        let project = workspace
            .create_project(
                "Psalms",
                &[
                    corpus("src", AlignmentSide::Source, 25_000),
                    corpus("tgt", AlignmentSide::Target, 25_000),
                ],
            )
            .unwrap();
        workspace.import_links(&project.id, &links(25_000)).unwrap();
        assert_eq!(workspace.database(&project.id).unwrap().journal().count().unwrap(), 3);
        project
    };

    let outcome = a
        .publish(&project.id, ProjectLocation::Synced, CancellationToken::new())
        .await
        .unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.journal_units_sent, 3);
    assert_eq!(report.journal_entries_sent, 3);
    assert_eq!(remote.project(&project.id).unwrap().links.len(), 25_000);
    let chunk_dir = a.workspace().lock().await.config().chunk_dir(&project.id);
    let leftover = std::fs::read_dir(&chunk_dir).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftover, 0);
}

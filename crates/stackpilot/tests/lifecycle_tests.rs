//! Integration tests for project creation and lifecycle transitions.

mod common;

use std::sync::atomic::Ordering;

use common::{TestEnv, NGINX_COMPOSE};
use stackpilot::db::project_repo;
use stackpilot::events;
use stackpilot::model::{Actor, Project, ProjectStatus};
use stackpilot::orchestrator::{DestroyOptions, ProjectUpdate};
use stackpilot::reconciler::{ProjectListQuery, ProjectSort};
use stackpilot::ProjectError;

const TWO_SERVICES: &str = "services:\n  web:\n    image: nginx\n  db:\n    image: postgres:16\n";

fn admin() -> Actor {
    Actor::new("u1", "admin")
}

#[tokio::test]
async fn test_create_project_writes_compose_and_row() {
    let env = TestEnv::new();

    let project = env
        .orchestrator
        .create_project("demo", NGINX_COMPOSE, None, &admin())
        .await
        .expect("create should succeed");

    let compose_path = env.root.join("demo").join("compose.yaml");
    assert_eq!(std::fs::read_to_string(&compose_path).unwrap(), NGINX_COMPOSE);
    assert!(!env.root.join("demo").join(".env").exists());

    let stored = env.orchestrator.get_project(&project.id).unwrap();
    assert_eq!(stored.name, "demo");
    assert_eq!(stored.status, ProjectStatus::Stopped);
    assert_eq!(stored.service_count, 0);
    assert_eq!(stored.path, env.root.join("demo"));

    let event = env.events.wait_for(events::PROJECT_CREATE).await;
    assert_eq!(event.resource_id, project.id);
    assert_eq!(event.actor.username, "admin");
}

#[tokio::test]
async fn test_create_project_suffixes_colliding_directories() {
    let env = TestEnv::new();

    let first = env
        .orchestrator
        .create_project("My App!", NGINX_COMPOSE, Some("PORT=8080\n"), &admin())
        .await
        .unwrap();
    let second = env
        .orchestrator
        .create_project("my app", NGINX_COMPOSE, None, &admin())
        .await
        .unwrap();

    assert_eq!(first.dir_name, "my-app");
    assert_eq!(second.dir_name, "my-app-1");
    assert_eq!(
        std::fs::read_to_string(env.root.join("my-app").join(".env")).unwrap(),
        "PORT=8080\n"
    );
}

#[tokio::test]
async fn test_create_project_rejects_blank_name() {
    let env = TestEnv::new();
    let result = env
        .orchestrator
        .create_project("   ", NGINX_COMPOSE, None, &admin())
        .await;
    assert!(matches!(result, Err(ProjectError::InvalidName(_))));
}

#[tokio::test]
async fn test_deploy_success_runs_through_deploying() {
    let env = TestEnv::new();
    let project = env
        .orchestrator
        .create_project("demo", NGINX_COMPOSE, None, &admin())
        .await
        .unwrap();

    let status = env.orchestrator.deploy_project(&project.id, &admin()).await.unwrap();

    assert_eq!(status, ProjectStatus::Running);
    assert_eq!(
        *env.compose.status_during_up.lock().unwrap(),
        vec![ProjectStatus::Deploying]
    );

    let stored = env.orchestrator.get_project(&project.id).unwrap();
    assert_eq!(stored.status, ProjectStatus::Running);
    assert_eq!(stored.service_count, 1);
    assert_eq!(stored.running_count, 1);

    // Missing image was pulled, orphans kept for manual projects.
    assert_eq!(*env.containers.pulled.lock().unwrap(), vec!["nginx".to_string()]);
    let options = env.compose.last_up_options.lock().unwrap().clone().unwrap();
    assert!(!options.remove_orphans);

    env.events.wait_for(events::PROJECT_DEPLOY).await;
}

#[tokio::test]
async fn test_deploy_failure_settles_stopped_with_hint() {
    let env = TestEnv::new();
    let project = env
        .orchestrator
        .create_project("demo", NGINX_COMPOSE, None, &admin())
        .await
        .unwrap();
    env.compose
        .fail_next_up("dependency failed to start: container demo-web-1 is unhealthy");

    let err = env
        .orchestrator
        .deploy_project(&project.id, &admin())
        .await
        .unwrap_err();

    match err {
        ProjectError::DeployFailed(message) => {
            assert!(message.contains("unhealthy"));
            assert!(message.contains("did not become healthy"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let stored = env.orchestrator.get_project(&project.id).unwrap();
    assert_eq!(stored.status, ProjectStatus::Stopped);
    assert_eq!(env.compose.up_count(), 1);

    let event = env.events.wait_for(events::PROJECT_DEPLOY_FAILED).await;
    assert!(event.metadata.contains_key("error"));
}

#[tokio::test]
async fn test_deploy_ignores_pull_failures() {
    let env = TestEnv::new();
    let project = env
        .orchestrator
        .create_project("private", "services:\n  app:\n    image: private/app\n", None, &admin())
        .await
        .unwrap();

    let status = env.orchestrator.deploy_project(&project.id, &admin()).await.unwrap();

    assert_eq!(status, ProjectStatus::Running);
    assert!(env
        .containers
        .pulled
        .lock()
        .unwrap()
        .contains(&"private/app".to_string()));
}

#[tokio::test]
async fn test_gitops_managed_deploy_removes_orphans() {
    let env = TestEnv::new();
    let project = env
        .orchestrator
        .create_project("managed", NGINX_COMPOSE, None, &admin())
        .await
        .unwrap();
    env.orchestrator
        .set_gitops_managed(&project.id, Some("sync-1"))
        .unwrap();

    env.orchestrator.deploy_project(&project.id, &admin()).await.unwrap();

    let options = env.compose.last_up_options.lock().unwrap().clone().unwrap();
    assert!(options.remove_orphans);
}

#[tokio::test]
async fn test_down_and_failed_down() {
    let env = TestEnv::new();
    let project = env
        .orchestrator
        .create_project("demo", NGINX_COMPOSE, None, &admin())
        .await
        .unwrap();
    env.orchestrator.deploy_project(&project.id, &admin()).await.unwrap();

    env.compose.fail_down.store(true, Ordering::SeqCst);
    assert!(env.orchestrator.down_project(&project.id, &admin()).await.is_err());
    assert_eq!(
        env.orchestrator.get_project(&project.id).unwrap().status,
        ProjectStatus::Running
    );

    env.compose.fail_down.store(false, Ordering::SeqCst);
    let status = env.orchestrator.down_project(&project.id, &admin()).await.unwrap();
    assert_eq!(status, ProjectStatus::Stopped);

    let stored = env.orchestrator.get_project(&project.id).unwrap();
    assert_eq!(stored.status, ProjectStatus::Stopped);
    assert_eq!(stored.running_count, 0);
    env.events.wait_for(events::PROJECT_STOP).await;
}

#[tokio::test]
async fn test_restart_keeps_running() {
    let env = TestEnv::new();
    let project = env
        .orchestrator
        .create_project("demo", NGINX_COMPOSE, None, &admin())
        .await
        .unwrap();
    env.orchestrator.deploy_project(&project.id, &admin()).await.unwrap();

    let status = env
        .orchestrator
        .restart_project(&project.id, &admin())
        .await
        .unwrap();

    assert_eq!(status, ProjectStatus::Running);
    env.events.wait_for(events::PROJECT_RESTART).await;
}

#[tokio::test]
async fn test_partial_status_after_service_exits() {
    let env = TestEnv::new();
    let project = env
        .orchestrator
        .create_project("pair", TWO_SERVICES, None, &admin())
        .await
        .unwrap();
    assert_eq!(
        env.orchestrator.deploy_project(&project.id, &admin()).await.unwrap(),
        ProjectStatus::Running
    );

    env.compose.set_container("pair", "db", "exited");

    let stored = env.orchestrator.get_project(&project.id).unwrap();
    let live = env.orchestrator.reconciler().refresh(&stored).await.unwrap();
    assert_eq!(live.status, ProjectStatus::PartiallyRunning);
    assert_eq!(live.service_count, 2);
    assert_eq!(live.running_count, 1);
}

#[tokio::test]
async fn test_redeploy_pulls_every_image() {
    let env = TestEnv::new();
    let project = env
        .orchestrator
        .create_project("demo", NGINX_COMPOSE, None, &admin())
        .await
        .unwrap();
    env.containers
        .local_images
        .lock()
        .unwrap()
        .insert("nginx".to_string());

    let status = env
        .orchestrator
        .redeploy_project(&project.id, &admin())
        .await
        .unwrap();

    assert_eq!(status, ProjectStatus::Running);
    assert_eq!(*env.containers.pulled.lock().unwrap(), vec!["nginx".to_string()]);
    assert_eq!(env.compose.up_count(), 1);

    // Redeploys are attributed to the engine.
    let event = env.events.wait_for(events::PROJECT_DEPLOY).await;
    assert!(event.actor.is_system());
}

#[tokio::test]
async fn test_update_project_rewrites_compose() {
    let env = TestEnv::new();
    let project = env
        .orchestrator
        .create_project("demo", NGINX_COMPOSE, None, &admin())
        .await
        .unwrap();

    let updated = env
        .orchestrator
        .update_project(
            &project.id,
            ProjectUpdate {
                name: Some("Demo Stack".to_string()),
                compose: Some(TWO_SERVICES.to_string()),
                env: Some("A=1\n".to_string()),
            },
            &admin(),
        )
        .await
        .unwrap();

    assert_eq!(updated.name, "Demo Stack");
    assert_eq!(updated.service_count, 2);
    assert_eq!(updated.dir_name, "demo");
    assert_eq!(
        std::fs::read_to_string(env.root.join("demo/compose.yaml")).unwrap(),
        TWO_SERVICES
    );
    assert_eq!(
        std::fs::read_to_string(env.root.join("demo/.env")).unwrap(),
        "A=1\n"
    );
}

#[tokio::test]
async fn test_destroy_removes_files_and_row() {
    let env = TestEnv::new();
    let project = env
        .orchestrator
        .create_project("demo", NGINX_COMPOSE, None, &admin())
        .await
        .unwrap();
    env.orchestrator.deploy_project(&project.id, &admin()).await.unwrap();

    env.orchestrator
        .destroy_project(
            &project.id,
            DestroyOptions {
                remove_files: true,
                remove_volumes: true,
            },
            &admin(),
        )
        .await
        .unwrap();

    assert!(!env.root.join("demo").exists());
    assert!(matches!(
        env.orchestrator.get_project(&project.id),
        Err(ProjectError::NotFound(_))
    ));
    // Regular down plus the volume removal pass.
    assert_eq!(env.compose.down_calls.load(Ordering::SeqCst), 2);
    env.events.wait_for(events::PROJECT_DESTROY).await;
}

#[tokio::test]
async fn test_unknown_project_is_not_found() {
    let env = TestEnv::new();
    let err = env
        .orchestrator
        .deploy_project("missing", &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, ProjectError::NotFound(_)));
}

#[tokio::test]
async fn test_listing_falls_back_to_persisted_status() {
    let env = TestEnv::new();
    let running = env
        .orchestrator
        .create_project("alpha", NGINX_COMPOSE, None, &admin())
        .await
        .unwrap();
    env.orchestrator
        .create_project("beta", NGINX_COMPOSE, None, &admin())
        .await
        .unwrap();
    env.orchestrator.deploy_project(&running.id, &admin()).await.unwrap();

    let page = env
        .orchestrator
        .reconciler()
        .list_projects(&ProjectListQuery {
            status: Some(ProjectStatus::Running),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].project.name, "alpha");

    env.compose.fail_global_listing.store(true, Ordering::SeqCst);
    let page = env
        .orchestrator
        .reconciler()
        .list_projects(&ProjectListQuery {
            sort: ProjectSort::StatusDesc,
            ..Default::default()
        })
        .await
        .unwrap();
    let statuses: Vec<_> = page.items.iter().map(|s| s.live_status).collect();
    assert_eq!(statuses, vec![ProjectStatus::Stopped, ProjectStatus::Running]);
}

#[tokio::test]
async fn test_restart_failure_reverts_to_running() {
    let env = TestEnv::new();
    let project = env
        .orchestrator
        .create_project("demo", NGINX_COMPOSE, None, &admin())
        .await
        .unwrap();
    env.orchestrator.deploy_project(&project.id, &admin()).await.unwrap();
    env.compose.fail_restart.store(true, Ordering::SeqCst);

    let err = env
        .orchestrator
        .restart_project(&project.id, &admin())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("restarting"));
    assert_eq!(
        env.orchestrator.get_project(&project.id).unwrap().status,
        ProjectStatus::Running
    );
}

#[tokio::test]
async fn test_rename_keeps_containers_attached() {
    let env = TestEnv::new();
    let project = env
        .orchestrator
        .create_project("demo", NGINX_COMPOSE, None, &admin())
        .await
        .unwrap();
    env.orchestrator.deploy_project(&project.id, &admin()).await.unwrap();

    env.orchestrator
        .update_project(
            &project.id,
            ProjectUpdate {
                name: Some("Demo Site".to_string()),
                ..Default::default()
            },
            &admin(),
        )
        .await
        .unwrap();

    let page = env
        .orchestrator
        .reconciler()
        .list_projects(&ProjectListQuery::default())
        .await
        .unwrap();
    assert_eq!(page.items[0].project.name, "Demo Site");
    assert_eq!(page.items[0].live_status, ProjectStatus::Running);

    let status = env.orchestrator.down_project(&project.id, &admin()).await.unwrap();
    assert_eq!(status, ProjectStatus::Stopped);
    assert!(env.compose.project_names().is_empty());
}

/// Inserts a row whose stored path lies outside the projects root.
fn insert_stray_project(env: &TestEnv, outside: &std::path::Path) -> Project {
    let project = Project::new("legacy", "legacy", outside.to_path_buf());
    project_repo::insert(&env.db, &project).unwrap();
    project
}

#[tokio::test]
async fn test_update_repairs_stray_project_path() {
    let env = TestEnv::new();
    let outside = tempfile::tempdir().unwrap();
    let project = insert_stray_project(&env, outside.path());

    let updated = env
        .orchestrator
        .update_project(
            &project.id,
            ProjectUpdate {
                compose: Some(NGINX_COMPOSE.to_string()),
                ..Default::default()
            },
            &admin(),
        )
        .await
        .unwrap();

    assert_eq!(updated.path, env.root.join("legacy"));
    assert!(env.root.join("legacy/compose.yaml").exists());
    assert!(!outside.path().join("compose.yaml").exists());
    assert_eq!(
        env.orchestrator.get_project(&project.id).unwrap().path,
        env.root.join("legacy")
    );
}

#[tokio::test]
async fn test_deploy_repairs_stray_project_path() {
    let env = TestEnv::new();
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("compose.yaml"), NGINX_COMPOSE).unwrap();
    env.write_project_dir("legacy", "compose.yaml", NGINX_COMPOSE);
    let project = insert_stray_project(&env, outside.path());

    let status = env.orchestrator.deploy_project(&project.id, &admin()).await.unwrap();

    assert_eq!(status, ProjectStatus::Running);
    assert_eq!(
        env.orchestrator.get_project(&project.id).unwrap().path,
        env.root.join("legacy")
    );
    assert_eq!(env.compose.project_names(), vec!["legacy".to_string()]);
}

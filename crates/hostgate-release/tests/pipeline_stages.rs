//! End-to-end behavior of the four release stages against fake drivers

use hostgate_release::{
    ApplyRequest, CloneRequest, ContainerOrchestrator, DeployRequest, DeployType, EnsureRequest,
    ErrorCode, Stage,
};
use hostgate_test_utils::{tree, Fixture, FAKE_REVISION};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;

fn clone_request(url: &str) -> CloneRequest {
    CloneRequest {
        release_id: "rel-1".to_string(),
        app_slug: "demo".to_string(),
        git_url: url.to_string(),
        reference: None,
    }
}

fn deploy_request(fx: &Fixture, release_id: &str, env_required: &[&str]) -> DeployRequest {
    DeployRequest {
        release_id: release_id.to_string(),
        app_slug: "demo".to_string(),
        project_path: fx.app_dir("demo").join("src").display().to_string(),
        deploy_type: DeployType::Compose,
        service: "web".to_string(),
        port: 8080,
        env_required: env_required.iter().map(ToString::to_string).collect(),
        domain: None,
        healthcheck: None,
    }
}

#[tokio::test]
async fn repo_clone_fresh_checkout() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();

    let envelope = pipeline
        .repo_clone(&clone_request("https://github.com/org/repo"))
        .await;

    assert!(envelope.ok, "{envelope:?}");
    assert_eq!(envelope.action, "repo.clone");
    assert_eq!(envelope.release_id, "rel-1");
    assert_eq!(envelope.artifact("commit_hash").unwrap(), FAKE_REVISION);
    assert_eq!(fx.git.calls(), vec!["clone https://github.com/org/repo main"]);

    let log = fx.app_dir("demo").join("logs/rel-1/repo.clone.log");
    let contents = std::fs::read_to_string(&log).unwrap();
    assert!(contents.contains("cloning https://github.com/org/repo at main"));
    assert!(contents.contains(FAKE_REVISION));

    let marker = pipeline.release_status("demo", "rel-1").await.unwrap();
    assert_eq!(marker.stage, Stage::SourceReady);
}

#[tokio::test]
async fn repo_clone_updates_existing_checkout() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    fx.seed_source("demo");

    let mut request = clone_request("https://github.com/org/repo.git");
    request.reference = Some("v1.2.0".to_string());
    let envelope = pipeline.repo_clone(&request).await;

    assert!(envelope.ok, "{envelope:?}");
    assert_eq!(fx.git.calls(), vec!["fast-forward v1.2.0"]);
    assert!(envelope.summary.starts_with("updated"));
}

#[tokio::test]
async fn repo_clone_rejects_foreign_origin_without_mutation() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();

    for url in [
        "https://gitlab.com/org/repo",
        "https://github.com.attacker.io/org/repo",
        "https://token@github.com/org/repo",
        "ssh://github.com/org/repo",
    ] {
        let envelope = pipeline.repo_clone(&clone_request(url)).await;
        assert!(!envelope.ok);
        assert_eq!(envelope.error_code(), Some(ErrorCode::RepoCloneFailed), "{url}");
    }

    // The origin is checked before the release id, so a bad id cannot mask it.
    let mut request = clone_request("https://gitlab.com/org/repo");
    request.release_id = "../escape".to_string();
    let envelope = pipeline.repo_clone(&request).await;
    assert_eq!(envelope.error_code(), Some(ErrorCode::RepoCloneFailed));

    assert!(tree(fx.root_path()).is_empty());
    assert!(fx.git.calls().is_empty());
}

#[tokio::test]
async fn repo_clone_refuses_checkout_of_another_origin() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    let first = pipeline
        .repo_clone(&clone_request("https://github.com/org/repo"))
        .await;
    assert!(first.ok, "{first:?}");

    let envelope = pipeline
        .repo_clone(&clone_request("https://github.com/other/unrelated"))
        .await;

    assert!(!envelope.ok);
    assert_eq!(envelope.error_code(), Some(ErrorCode::RepoCloneFailed));
    let error = envelope.error.unwrap();
    assert!(error.message.contains("https://github.com/org/repo"), "{}", error.message);
    assert!(error.hint.unwrap().contains("https://github.com/org/repo"));
    assert_eq!(fx.git.calls(), vec!["clone https://github.com/org/repo main"]);
}

#[tokio::test]
async fn repo_clone_driver_failure_keeps_stage() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    fx.git.fail_next_clone();

    let envelope = pipeline
        .repo_clone(&clone_request("https://github.com/org/repo"))
        .await;

    assert_eq!(envelope.error_code(), Some(ErrorCode::RepoCloneFailed));
    assert!(envelope.error.unwrap().message.contains("repository not found"));
    let marker = pipeline.release_status("demo", "rel-1").await.unwrap();
    assert_eq!(marker.stage, Stage::Uninitialized);

    let log = std::fs::read_to_string(fx.app_dir("demo").join("logs/rel-1/repo.clone.log")).unwrap();
    assert!(log.contains("failed:"));
}

#[tokio::test]
async fn unusable_slug_is_a_path_violation() {
    let fx = Fixture::new();
    let mut request = clone_request("https://github.com/org/repo");
    request.app_slug = "../..".to_string();

    let envelope = fx.pipeline().repo_clone(&request).await;
    assert_eq!(envelope.error_code(), Some(ErrorCode::PathViolation));
}

#[tokio::test]
async fn supabase_ensure_is_idempotent() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    let request = EnsureRequest {
        release_id: "rel-1".to_string(),
        app_slug: "demo".to_string(),
    };

    let first = pipeline.supabase_ensure(&request).await;
    let second = pipeline.supabase_ensure(&request).await;

    assert!(first.ok, "{first:?}");
    assert!(second.ok, "{second:?}");
    for key in ["api_url", "db_url", "studio_url", "compose_file"] {
        assert_eq!(first.artifact(key), second.artifact(key), "{key}");
    }
    assert_eq!(first.artifact("started").unwrap(), &json!(true));
    assert_eq!(second.artifact("started").unwrap(), &json!(false));
    assert_eq!(fx.compose.up_count(), 1);
    assert_eq!(fx.compose.restart_count(), 0);
    assert!(fx.app_dir("demo").join("supabase/docker-compose.yml").is_file());

    let db_url = first.artifact("db_url").unwrap().as_str().unwrap();
    assert!(db_url.starts_with("postgresql://postgres@apps.test:"));
}

#[tokio::test]
async fn supabase_ensure_keeps_existing_definition() {
    let fx = Fixture::new();
    fx.write(
        "demo",
        "supabase/docker-compose.yml",
        "services:\n  api:\n    image: custom\n    ports: [\"9100:3000\"]\n  db:\n    image: pg\n    ports: [\"9101:5432\"]\n",
    );

    let envelope = fx
        .pipeline()
        .supabase_ensure(&EnsureRequest {
            release_id: "rel-1".to_string(),
            app_slug: "demo".to_string(),
        })
        .await;

    assert!(envelope.ok, "{envelope:?}");
    assert_eq!(envelope.artifact("api_url").unwrap(), "http://apps.test:9100");
    let raw = std::fs::read_to_string(fx.app_dir("demo").join("supabase/docker-compose.yml")).unwrap();
    assert!(raw.contains("image: custom"));
}

#[tokio::test]
async fn supabase_apply_rejects_foreign_project_path() {
    let fx = Fixture::new();
    fx.seed_source("demo");
    let other = fx.seed_source("other");

    let envelope = fx
        .pipeline()
        .supabase_apply(&ApplyRequest {
            release_id: "rel-1".to_string(),
            app_slug: "demo".to_string(),
            project_path: other.display().to_string(),
            functions: Vec::new(),
        })
        .await;

    assert_eq!(envelope.error_code(), Some(ErrorCode::DbMigrationFailed));
    assert!(fx.migrator.runs().is_empty());
    assert!(!fx.app_dir("demo").join("logs").exists());
}

#[tokio::test]
async fn supabase_apply_reports_migrations() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    assert!(pipeline
        .repo_clone(&clone_request("https://github.com/org/repo"))
        .await
        .ok);

    let envelope = pipeline
        .supabase_apply(&ApplyRequest {
            release_id: "rel-1".to_string(),
            app_slug: "demo".to_string(),
            project_path: fx.app_dir("demo").join("src").display().to_string(),
            functions: vec!["send-email".to_string()],
        })
        .await;

    assert!(envelope.ok, "{envelope:?}");
    assert_eq!(
        envelope.artifact("migrations").unwrap(),
        &json!(["20240101000000_init.sql"])
    );
    assert_eq!(envelope.artifact("functions").unwrap(), &json!(["send-email"]));
    let marker = pipeline.release_status("demo", "rel-1").await.unwrap();
    assert_eq!(marker.stage, Stage::Migrated);
    assert_eq!(marker.history.len(), 2);
}

#[tokio::test]
async fn release_deploy_stops_on_missing_env_keys() {
    let fx = Fixture::new();
    fx.seed_source("demo");
    fx.seed_compose("demo");
    fx.write("demo", ".env", "EXISTING_KEY=value\n");

    let envelope = fx
        .pipeline()
        .release_deploy(&deploy_request(&fx, "rel-1", &["EXISTING_KEY", "MISSING_KEY"]))
        .await;

    assert!(!envelope.ok);
    assert_eq!(envelope.error_code(), Some(ErrorCode::EnvMissingKeys));
    let error = envelope.error.unwrap();
    assert!(error.message.contains("MISSING_KEY"));
    assert!(!error.message.contains("EXISTING_KEY"));

    let app = fx.app_dir("demo");
    assert!(!app.join("releases").exists());
    assert!(std::fs::symlink_metadata(app.join("current")).is_err());
    assert_eq!(fx.compose.up_count(), 0);
}

#[tokio::test]
async fn release_deploy_missing_env_file_counts_as_empty() {
    let fx = Fixture::new();
    fx.seed_source("demo");
    fx.seed_compose("demo");

    let envelope = fx
        .pipeline()
        .release_deploy(&deploy_request(&fx, "rel-1", &["DATABASE_URL"]))
        .await;

    assert_eq!(envelope.error_code(), Some(ErrorCode::EnvMissingKeys));
}

#[cfg(unix)]
#[tokio::test]
async fn release_deploy_end_to_end() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    fx.seed_source("demo");
    fx.seed_compose("demo");
    fx.write("demo", ".env", "EXISTING_KEY=value\n");

    let envelope = pipeline
        .release_deploy(&deploy_request(&fx, "rel-1", &["EXISTING_KEY"]))
        .await;

    assert!(envelope.ok, "{envelope:?}");
    let app = fx.app_dir("demo");
    let current = app.join("current");
    assert_eq!(
        envelope.artifact("current_path").unwrap(),
        &json!(current.display().to_string())
    );
    assert_eq!(
        std::fs::canonicalize(&current).unwrap(),
        app.join("releases/rel-1")
    );
    assert_eq!(envelope.artifact("url").unwrap(), "http://apps.test:8080");
    assert_eq!(envelope.artifact("healthcheck").unwrap()["status"], "skipped");
    assert!(app.join("releases/rel-1/index.html").is_file());
    assert!(!app.join("releases/rel-1/.git").exists());
    assert_eq!(fx.compose.up_count(), 1);

    let marker = pipeline.release_status("demo", "rel-1").await.unwrap();
    assert_eq!(marker.stage, Stage::Deployed);
}

#[cfg(unix)]
#[tokio::test]
async fn release_deploy_switches_and_reuses_releases() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    fx.seed_source("demo");
    fx.seed_compose("demo");
    let app = fx.app_dir("demo");

    assert!(pipeline.release_deploy(&deploy_request(&fx, "rel-1", &[])).await.ok);
    fx.write("demo", "src/index.html", "<h1>v2</h1>\n");
    assert!(pipeline.release_deploy(&deploy_request(&fx, "rel-2", &[])).await.ok);

    assert_eq!(std::fs::read_link(app.join("current")).unwrap(), Path::new("releases/rel-2"));
    assert_eq!(
        std::fs::read_to_string(app.join("releases/rel-1/index.html")).unwrap(),
        "<h1>demo</h1>\n"
    );
    assert_eq!(fx.compose.restart_count(), 1);

    let again = pipeline.release_deploy(&deploy_request(&fx, "rel-1", &[])).await;
    assert!(again.ok, "{again:?}");
    assert_eq!(again.warnings.len(), 1);
    assert_eq!(std::fs::read_link(app.join("current")).unwrap(), Path::new("releases/rel-1"));
    assert_eq!(
        std::fs::read_to_string(app.join("releases/rel-1/index.html")).unwrap(),
        "<h1>demo</h1>\n"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn release_deploy_restores_pointer_when_start_fails() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    fx.seed_source("demo");
    fx.seed_compose("demo");
    let app = fx.app_dir("demo");

    assert!(pipeline.release_deploy(&deploy_request(&fx, "rel-1", &[])).await.ok);
    fx.compose.stop(&app.join("docker-compose.yml")).await.unwrap();
    fx.compose.fail_next_up();

    let envelope = pipeline.release_deploy(&deploy_request(&fx, "rel-2", &[])).await;

    assert_eq!(envelope.error_code(), Some(ErrorCode::AppDeployFailed));
    assert_eq!(std::fs::read_link(app.join("current")).unwrap(), Path::new("releases/rel-1"));
    let marker = pipeline.release_status("demo", "rel-2").await.unwrap();
    assert_eq!(marker.stage, Stage::Uninitialized);
}

#[cfg(unix)]
#[tokio::test]
async fn release_deploy_static_needs_no_service() {
    let fx = Fixture::new();
    fx.seed_source("demo");
    let mut request = deploy_request(&fx, "rel-1", &[]);
    request.deploy_type = DeployType::Static;
    request.domain = Some("demo.example.com".to_string());
    request.healthcheck = Some(json!({"path": "/", "expect": 200}));

    let envelope = fx.pipeline().release_deploy(&request).await;

    assert!(envelope.ok, "{envelope:?}");
    assert_eq!(envelope.artifact("url").unwrap(), "https://demo.example.com");
    assert_eq!(envelope.artifact("healthcheck").unwrap()["status"], "not_checked");
    assert_eq!(fx.compose.up_count(), 0);
}

#[tokio::test]
async fn release_deploy_rejects_project_path_mismatch() {
    let fx = Fixture::new();
    fx.seed_source("demo");
    let mut request = deploy_request(&fx, "rel-1", &[]);
    request.project_path = "/tmp".to_string();

    let envelope = fx.pipeline().release_deploy(&request).await;

    assert_eq!(envelope.error_code(), Some(ErrorCode::AppDeployFailed));
    assert!(envelope.error.unwrap().hint.is_some());
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deploys_to_one_app_are_serialized() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    fx.seed_source("demo");
    fx.seed_compose("demo");

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let pipeline = pipeline.clone();
            let request = deploy_request(&fx, &format!("rel-{i}"), &[]);
            tokio::spawn(async move { pipeline.release_deploy(&request).await })
        })
        .collect();
    for handle in handles {
        let envelope = handle.await.unwrap();
        assert!(envelope.ok, "{envelope:?}");
    }

    let app = fx.app_dir("demo");
    let target = std::fs::canonicalize(app.join("current")).unwrap();
    assert!(target.starts_with(app.join("releases")));
    let leftovers: Vec<_> = tree(&app.join("releases"))
        .into_iter()
        .filter(|p| p.contains(".partial"))
        .collect();
    assert!(leftovers.is_empty());
}

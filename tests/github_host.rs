//! GitHub client against a mocked REST API.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pageforge::errors::ProviderError;
use pageforge::secret::Secret;
use pageforge::service::github::{GitHubConnector, GitHubHost};
use pageforge::service::host::{HostConnector, RepositoryHost};
use pageforge::service::models::{FileSet, RepositoryName};

fn create_host(server: &MockServer) -> GitHubHost {
    GitHubHost::new(&server.uri(), Secret::new("ghp_test"), Duration::from_secs(5)).unwrap()
}

fn files() -> FileSet {
    [
        ("index.html", "<!DOCTYPE html><html></html>"),
        (".github/workflows/ci.yml", "name: CI"),
    ]
    .into_iter()
    .collect()
}

async fn mount_user(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/user"))
        .and(header("authorization", "Bearer ghp_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "login": "octo" })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn create_repository_posts_name_and_description() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/user/repos"))
        .and(body_partial_json(json!({
            "name": "demo-r1",
            "description": "Demo app",
            "private": false,
            "auto_init": false,
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "name": "demo-r1",
            "full_name": "octo/demo-r1",
            "html_url": "https://github.com/octo/demo-r1",
            "clone_url": "https://github.com/octo/demo-r1.git",
            "default_branch": null,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let repo = create_host(&server)
        .create_repository(&RepositoryName::new("demo-r1"), "Demo app", false)
        .await
        .unwrap();
    assert_eq!(repo.full_name, "octo/demo-r1");
    assert_eq!(repo.html_url, "https://github.com/octo/demo-r1");
    assert_eq!(repo.default_branch, "main");
}

#[tokio::test]
async fn empty_repository_gets_files_one_at_a_time() {
    let server = MockServer::start().await;
    mount_user(&server).await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/demo-r1/git/ref/heads/main"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "message": "Git Repository is empty." })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/repos/octo/demo-r1/contents/.github/workflows/ci.yml"))
        .and(body_partial_json(json!({ "branch": "main", "content": "bmFtZTogQ0k=" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "commit": { "sha": "sha-ci" } })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/repos/octo/demo-r1/contents/index.html"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "commit": { "sha": "sha-index" } })))
        .expect(1)
        .mount(&server)
        .await;

    let commit = create_host(&server)
        .commit_files(&RepositoryName::new("demo-r1"), &files(), "Initial commit")
        .await
        .unwrap();
    assert_eq!(commit.sha, "sha-index");
    assert_eq!(commit.files, vec![".github/workflows/ci.yml", "index.html"]);
}

#[tokio::test]
async fn repository_with_history_gets_one_tree_commit() {
    let server = MockServer::start().await;
    mount_user(&server).await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/demo-r2/git/ref/heads/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "object": { "sha": "base" } })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/demo-r2/git/blobs"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sha": "blob" })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/demo-r2/git/trees"))
        .and(body_partial_json(json!({ "base_tree": "base" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sha": "tree" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/demo-r2/git/commits"))
        .and(body_partial_json(json!({
            "message": "Round 2 update",
            "tree": "tree",
            "parents": ["base"],
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sha": "new-commit" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/repos/octo/demo-r2/git/refs/heads/main"))
        .and(body_partial_json(json!({ "sha": "new-commit" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let commit = create_host(&server)
        .commit_files(&RepositoryName::new("demo-r2"), &files(), "Round 2 update")
        .await
        .unwrap();
    assert_eq!(commit.sha, "new-commit");
    assert_eq!(commit.files.len(), 2);
}

#[tokio::test]
async fn enabling_pages_twice_reads_existing_configuration() {
    let server = MockServer::start().await;
    mount_user(&server).await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/demo-r1/pages"))
        .and(body_partial_json(json!({ "source": { "branch": "main", "path": "/" } })))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "message": "GitHub Pages is already enabled." })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/demo-r1/pages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "html_url": "https://octo.github.io/demo-r1/",
            "status": null,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let site = create_host(&server)
        .enable_static_hosting(&RepositoryName::new("demo-r1"), "main", "/")
        .await
        .unwrap();
    assert_eq!(site.url, "https://octo.github.io/demo-r1/");
    assert_eq!(site.status, "built");
    assert!(site.already_enabled);
}

#[tokio::test]
async fn enabling_pages_reports_building_site() {
    let server = MockServer::start().await;
    mount_user(&server).await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/demo-r1/pages"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "html_url": "https://octo.github.io/demo-r1/",
        })))
        .mount(&server)
        .await;

    let site = create_host(&server)
        .enable_static_hosting(&RepositoryName::new("demo-r1"), "main", "/")
        .await
        .unwrap();
    assert_eq!(site.status, "building");
    assert!(!site.already_enabled);
}

#[tokio::test]
async fn recent_runs_are_capped_at_five() {
    let server = MockServer::start().await;
    mount_user(&server).await;
    let runs: Vec<_> = (1..=7)
        .map(|id| {
            json!({
                "id": id,
                "status": "completed",
                "conclusion": "success",
                "workflow_id": 42,
                "created_at": "2026-01-01T00:00:00Z",
                "html_url": format!("https://github.com/octo/demo-r1/actions/runs/{}", id),
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/repos/octo/demo-r1/actions/runs"))
        .and(query_param("per_page", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "total_count": 7, "workflow_runs": runs })))
        .mount(&server)
        .await;

    let runs = create_host(&server)
        .list_recent_runs(&RepositoryName::new("demo-r1"))
        .await
        .unwrap();
    assert_eq!(runs.len(), 5);
    assert_eq!(runs[0].id, 1);
    assert_eq!(runs[4].id, 5);
}

#[tokio::test]
async fn owner_is_fetched_once() {
    let server = MockServer::start().await;
    mount_user(&server).await;
    let host = create_host(&server);
    assert_eq!(host.owner().await.unwrap(), "octo");
    assert_eq!(host.owner().await.unwrap(), "octo");
}

#[tokio::test]
async fn error_statuses_map_to_provider_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/user/repos"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "message": "Repository creation failed.",
            "errors": [{ "message": "name already exists on this account" }],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "Bad credentials" })))
        .mount(&server)
        .await;
    let host = create_host(&server);
    let err = host
        .create_repository(&RepositoryName::new("demo-r1"), "d", false)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Conflict(ref m) if m == "Repository creation failed."));

    let err = host.owner().await.unwrap_err();
    assert!(matches!(err, ProviderError::Unauthorized(ref m) if m == "Bad credentials"));

    let host = GitHubHost::new(&server.uri(), Secret::new("other"), Duration::from_secs(5)).unwrap();
    let err = host.list_recent_runs(&RepositoryName::new("x")).await.unwrap_err();
    assert!(matches!(err, ProviderError::Unauthorized(_)));
}

#[tokio::test]
async fn non_json_error_body_is_kept_verbatim() {
    let server = MockServer::start().await;
    mount_user(&server).await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/demo-r1/pages"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream unavailable\n"))
        .mount(&server)
        .await;

    let err = create_host(&server)
        .static_site(&RepositoryName::new("demo-r1"))
        .await
        .unwrap_err();
    match err {
        ProviderError::Api { status, message } => {
            assert_eq!(status, 502);
            assert_eq!(message, "upstream unavailable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn connector_rejects_blank_token() {
    let connector = GitHubConnector::new("https://api.github.com", Duration::from_secs(5));
    match connector.connect(&Secret::new("  ")) {
        Err(ProviderError::MissingCredential) => {}
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("blank token must not connect"),
    }
    assert!(connector.connect(&Secret::new("ghp_real")).is_ok());
}

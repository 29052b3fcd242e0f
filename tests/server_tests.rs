//! End-to-end tests for the full server: HTTP on a free port, the admin
//! socket, and work dir ownership through the status file.

use autograder::api::{api_path, locator, ApiError, CourseUserContext};
use autograder::model::Role;
use autograder::router::{Route, Router};
use autograder::server::{AppServer, ServerInitiator, StatusFile};
use autograder::ApiRequest;
use serde::Deserialize;
use serde_json::json;

mod common;
use common::fixtures::{config, content, seeded_services};
use common::http::{post_form, post_multipart};
use common::test_server::{free_port, setup_may_runtime};

#[derive(Debug, Default, Deserialize, ApiRequest)]
#[api(min_role = Admin)]
struct WhoAmIRequest {
    #[api(context)]
    #[serde(flatten)]
    ctx: CourseUserContext,
}

fn whoami(req: &mut WhoAmIRequest) -> Result<String, ApiError> {
    Ok(req.ctx.user().email.clone())
}

/// Test fixture; stops the server on drop.
struct TestServer {
    server: Option<AppServer>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    fn start() -> Self {
        setup_may_runtime();
        let dir = tempfile::tempdir().unwrap();
        let services = seeded_services(config(dir.path(), free_port()));
        let router = Router::with_core_routes(vec![Route::api(
            &api_path("users/whoami"),
            "Email of the caller.",
            whoami,
        )
        .unwrap()])
        .unwrap();

        let server = AppServer::start(services, router, ServerInitiator::PrimaryServer).unwrap();
        Self {
            server: Some(server),
            _dir: dir,
        }
    }

    fn server(&self) -> &AppServer {
        self.server.as_ref().unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.stop();
        }
    }
}

#[test]
fn test_http_round_trip() {
    let server = TestServer::start();
    let addr = server.server().addr();

    let (status, body) = post_form(
        addr,
        &api_path("users/whoami"),
        &content(Role::Admin, json!({})),
    );
    assert_eq!(status, 200);
    assert_eq!(body["content"], "admin@test.com");

    let (status, body) = post_form(
        addr,
        &api_path("users/whoami"),
        &content(Role::Student, json!({})),
    );
    assert_eq!(status, 403);
    assert_eq!(body["locator"], locator::ROLE_GATE);
}

#[test]
fn test_multipart_over_http() {
    let server = TestServer::start();
    let (status, body) = post_multipart(
        server.server().addr(),
        &api_path("users/whoami"),
        &content(Role::Owner, json!({})),
        &[("notes.txt", b"ignored".as_slice())],
    );

    assert_eq!(status, 200);
    assert_eq!(body["content"], "owner@test.com");
}

#[cfg(unix)]
#[test]
fn test_admin_socket_runs_as_root() {
    use autograder::server::unix_socket;

    let server = TestServer::start();
    let response = unix_socket::call(
        server.server().socket_path(),
        &api_path("users/whoami"),
        json!({"course-id": "course101", "user-email": "root"}),
    )
    .unwrap();

    assert_eq!(response["success"], true);
    assert_eq!(response["content"], "root");
}

#[test]
fn test_second_server_is_refused() {
    let server = TestServer::start();
    let config = server.server().engine().services().config.clone();

    let status = StatusFile::new(&config).current().unwrap().unwrap();
    assert_eq!(status.pid, std::process::id());
    assert_eq!(status.server_initiator, ServerInitiator::PrimaryServer);

    let services = seeded_services((*config).clone());
    let second = AppServer::start(
        services,
        Router::with_core_routes(Vec::new()).unwrap(),
        ServerInitiator::CmdServer,
    );
    assert!(second.is_err());
}

#[test]
fn test_stop_releases_work_dir() {
    let mut server = TestServer::start();
    let config = server.server().engine().services().config.clone();
    let socket_path = server.server().socket_path().to_path_buf();

    server.server.take().unwrap().stop();

    assert!(StatusFile::new(&config).current().unwrap().is_none());
    assert!(!socket_path.exists());
}

#![allow(dead_code)]

pub mod test_server {
    use std::sync::Once;

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }

    /// Ask the OS for a port nobody is listening on.
    pub fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }
}

pub mod fixtures {
    use autograder::config::{options, Config};
    use autograder::model::Role;
    use autograder::testdata::{self, test_email, test_pass, TEST_COURSE_ID};
    use autograder::Services;
    use serde_json::{json, Value};
    use std::path::Path;

    /// Testing config rooted at `dir`, listening on `port`.
    pub fn config(dir: &Path, port: u16) -> Config {
        let mut config = Config::for_testing(dir);
        config.set(options::WEB_HTTP_PORT.key, i64::from(port));
        config
    }

    /// In-memory services with the test course and users loaded.
    pub fn seeded_services(config: Config) -> Services {
        let services = Services::in_memory(config);
        testdata::seed(&services).unwrap();
        services
    }

    /// Request JSON for `course101` as the test user of `role`, merged with `extra`.
    pub fn content(role: Role, extra: Value) -> String {
        content_as(&test_email(role), &test_pass(role), extra)
    }

    pub fn content_as(email: &str, pass: &str, extra: Value) -> String {
        let mut body = json!({
            "course-id": TEST_COURSE_ID,
            "user-email": email,
            "user-pass": pass,
        });
        if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
            body.extend(extra);
        }
        body.to_string()
    }
}

pub mod http {
    use reqwest::blocking::{multipart, Client};
    use serde_json::Value;
    use std::net::SocketAddr;

    fn url(addr: SocketAddr, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", addr.port(), path)
    }

    /// POST `content` as an urlencoded form; returns the status and decoded envelope.
    pub fn post_form(addr: SocketAddr, path: &str, content: &str) -> (u16, Value) {
        let response = Client::new()
            .post(url(addr, path))
            .form(&[("content", content)])
            .send()
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().unwrap())
    }

    /// POST `content` plus files as multipart form data.
    pub fn post_multipart(
        addr: SocketAddr,
        path: &str,
        content: &str,
        files: &[(&str, &[u8])],
    ) -> (u16, Value) {
        let mut form = multipart::Form::new().text("content", content.to_string());
        for (name, data) in files {
            form = form.part(
                name.to_string(),
                multipart::Part::bytes(data.to_vec()).file_name(name.to_string()),
            );
        }

        let response = Client::new()
            .post(url(addr, path))
            .multipart(form)
            .send()
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().unwrap())
    }

    pub fn get(addr: SocketAddr, path: &str) -> reqwest::blocking::Response {
        Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
            .get(url(addr, path))
            .send()
            .unwrap()
    }
}

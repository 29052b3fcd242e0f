use futures::executor::block_on;
use futures::stream;
use may_minihttp::Request;
use std::collections::HashMap;
use std::convert::Infallible;
use std::io::{self, Read};
use thiserror::Error;
use tracing::debug;

/// An HTTP request read off the wire, detached from the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Path without the query string.
    pub path: String,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// A file part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// The form key the file was sent under.
    pub field: String,
    /// The client's file name, possibly empty.
    pub filename: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    /// The name the file is stored under: its form key, else its file name.
    pub fn display_name(&self) -> &str {
        if self.field.is_empty() {
            &self.filename
        } else {
            &self.field
        }
    }
}

/// Decoded form body. For repeated keys the first value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<UploadedFile>,
}

impl RequestForm {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum FormError {
    #[error("multipart content type has no boundary")]
    MissingBoundary,
    #[error("multipart part has no form-data name")]
    MissingPartName,
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] multer::Error),
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// A POST carrying `content` as an urlencoded form field.
    pub fn post_form(path: impl Into<String>, content: &str) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("content", content)
            .finish();
        Self::new("POST", path)
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(body.into_bytes())
    }

    /// A POST carrying `content` plus files as `multipart/form-data`.
    pub fn post_multipart(path: impl Into<String>, content: &str, files: &[(&str, &[u8])]) -> Self {
        const BOUNDARY: &str = "autograder-form-boundary";

        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"content\"\r\n\r\n{content}\r\n"
            )
            .as_bytes(),
        );
        for (name, data) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Self::new("POST", path)
            .with_header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .with_body(body)
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or_default()
    }

    /// Read everything the dispatcher needs out of a `may_minihttp` request.
    pub fn from_may(req: Request) -> io::Result<Self> {
        let method = req.method().to_string();
        let raw_path = req.path().to_string();
        let (path, query) = match raw_path.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (raw_path, String::new()),
        };

        let headers: HashMap<String, String> = req
            .headers()
            .iter()
            .map(|h| {
                (
                    h.name.to_ascii_lowercase(),
                    String::from_utf8_lossy(h.value).to_string(),
                )
            })
            .collect();

        let query_params = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut body = Vec::new();
        req.body().read_to_end(&mut body)?;

        debug!(
            method = %method,
            path = %path,
            header_count = headers.len(),
            body_size_bytes = body.len(),
            "Request read"
        );

        Ok(Self {
            method,
            path,
            headers,
            query_params,
            body,
        })
    }

    /// Decode the body as a form. Anything that is not multipart is read as urlencoded.
    pub fn form(&self) -> Result<RequestForm, FormError> {
        let content_type = self.content_type();
        if content_type
            .to_ascii_lowercase()
            .starts_with("multipart/form-data")
        {
            return parse_multipart(&self.body, content_type);
        }

        let mut form = RequestForm::default();
        for (key, value) in url::form_urlencoded::parse(&self.body) {
            form.fields
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        Ok(form)
    }
}

/// The body is already in memory, so multer is fed a single chunk and driven
/// to completion on the calling coroutine.
fn parse_multipart(body: &[u8], content_type: &str) -> Result<RequestForm, FormError> {
    let boundary = multer::parse_boundary(content_type).map_err(|_| FormError::MissingBoundary)?;
    let chunks = stream::iter([Ok::<_, Infallible>(body.to_vec())]);
    let mut multipart = multer::Multipart::new(chunks, boundary);

    block_on(async move {
        let mut form = RequestForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field
                .name()
                .map(str::to_string)
                .ok_or(FormError::MissingPartName)?;
            let filename = field.file_name().map(str::to_string);
            let data = field.bytes().await?;

            match filename {
                Some(filename) => {
                    if !form.files.iter().any(|file| file.field == name) {
                        form.files.push(UploadedFile {
                            field: name,
                            filename,
                            data: data.to_vec(),
                        });
                    }
                }
                None => {
                    form.fields
                        .entry(name)
                        .or_insert_with(|| String::from_utf8_lossy(&data).into_owned());
                }
            }
        }
        Ok::<_, FormError>(form)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urlencoded_form() {
        let request = HttpRequest::post_form("/x", r#"{"a": "b&c"}"#);
        let form = request.form().unwrap();
        assert_eq!(form.field("content"), Some(r#"{"a": "b&c"}"#));
        assert!(form.files.is_empty());
    }

    #[test]
    fn test_missing_content_type_reads_urlencoded() {
        let request = HttpRequest::new("POST", "/x").with_body(b"content=1&content=2".to_vec());
        assert_eq!(request.form().unwrap().field("content"), Some("1"));
    }

    #[test]
    fn test_multipart_round_trip() {
        let request = HttpRequest::post_multipart(
            "/x",
            "{}",
            &[("a.txt", b"a\n".as_slice()), ("b.bin", [0u8, 1, 2, 13, 10].as_slice())],
        );
        let form = request.form().unwrap();
        assert_eq!(form.field("content"), Some("{}"));
        assert_eq!(form.files.len(), 2);
        assert_eq!(form.files[0].field, "a.txt");
        assert_eq!(form.files[0].data, b"a\n");
        assert_eq!(form.files[1].data, vec![0u8, 1, 2, 13, 10]);
    }

    #[test]
    fn test_multipart_quoted_boundary_and_repeated_key() {
        let body = "--xyz\r\n\
            Content-Disposition: form-data; name=\"f\"; filename=\"one.txt\"\r\n\r\n\
            first\r\n\
            --xyz\r\n\
            content-disposition: form-data; name=\"f\"; filename=\"two.txt\"\r\n\r\n\
            second\r\n\
            --xyz--\r\n";
        let request = HttpRequest::new("POST", "/x")
            .with_header("Content-Type", "multipart/form-data; boundary=\"xyz\"")
            .with_body(body.as_bytes().to_vec());

        let form = request.form().unwrap();
        assert_eq!(form.files.len(), 1);
        assert_eq!(form.files[0].filename, "one.txt");
        assert_eq!(form.files[0].data, b"first");
    }

    #[test]
    fn test_multipart_quoted_filename_keeps_separator() {
        let body = "--xyz\r\n\
            Content-Disposition: form-data; name=\"f\"; filename=\"a;b.zip\"\r\n\r\n\
            zip\r\n\
            --xyz--\r\n";
        let request = HttpRequest::new("POST", "/x")
            .with_header("content-type", "multipart/form-data; boundary=xyz")
            .with_body(body.as_bytes().to_vec());

        let form = request.form().unwrap();
        assert_eq!(form.files.len(), 1);
        assert_eq!(form.files[0].field, "f");
        assert_eq!(form.files[0].filename, "a;b.zip");
        assert_eq!(form.files[0].data, b"zip");
    }

    #[test]
    fn test_malformed_multipart() {
        let request = HttpRequest::new("POST", "/x")
            .with_header("content-type", "multipart/form-data")
            .with_body(b"whatever".to_vec());
        assert!(matches!(request.form(), Err(FormError::MissingBoundary)));

        let request = HttpRequest::new("POST", "/x")
            .with_header("content-type", "multipart/form-data; boundary=abc")
            .with_body(b"--abc\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nno end".to_vec());
        assert!(matches!(request.form(), Err(FormError::Multipart(_))));
    }
}

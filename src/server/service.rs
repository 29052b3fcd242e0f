use super::request::HttpRequest;
use super::response::write_reply;
use crate::dispatcher::{Dispatcher, HttpReply};
use may_minihttp::{HttpService, Request, Response};
use std::io;
use tracing::warn;

/// The `may_minihttp` service: read the request, dispatch it, write the reply.
#[derive(Clone)]
pub struct AppService {
    pub dispatcher: Dispatcher,
}

impl AppService {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let reply = match HttpRequest::from_may(req) {
            Ok(request) => self.dispatcher.dispatch(&request),
            Err(e) => {
                warn!(error = %e, "Failed to read request body");
                HttpReply::text(400, "Bad Request")
            }
        };

        write_reply(res, reply);
        Ok(())
    }
}

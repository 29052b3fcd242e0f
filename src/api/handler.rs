//! The wrapper every API route runs: bind, call, envelope, clean up.

use super::binder::{cleanup_api_request, create_api_request};
use super::error::{ApiError, HTTP_STATUS_SERVER_ERROR};
use super::locator;
use super::request::ApiRequest;
use super::response::ApiResponse;
use crate::dispatcher::HttpReply;
use crate::server::request::HttpRequest;
use crate::services::Services;
use serde::Serialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// A type-erased API endpoint.
pub type ApiHandlerFn = Arc<dyn Fn(&HttpRequest, &Services) -> HttpReply + Send + Sync>;

/// Text of a recovered panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        format!("{panic:?}")
    }
}

/// Wrap a typed handler.
///
/// The bounds take the place of runtime signature checks: a handler that is
/// not `Fn(&mut R) -> Result<T, ApiError>` does not compile.
pub fn wrap_api_handler<R, T, F>(endpoint: impl Into<String>, handler: F) -> ApiHandlerFn
where
    R: ApiRequest,
    T: Serialize,
    F: Fn(&mut R) -> Result<T, ApiError> + Send + Sync + 'static,
{
    let endpoint = endpoint.into();
    Arc::new(move |request: &HttpRequest, services: &Services| {
        let response = match catch_unwind(AssertUnwindSafe(|| {
            handle::<R, T, F>(&endpoint, &handler, request, services)
        })) {
            Ok(response) => response,
            Err(panic) => {
                let err = ApiError::bare_internal(
                    locator::HANDLER_PANIC,
                    &endpoint,
                    "Recovered from a panic when handling an API endpoint.",
                )
                .add("panic", panic_message(panic.as_ref()));
                err.log();
                err.to_response()
            }
        };

        encode_response(&response, &endpoint)
    })
}

fn handle<R, T, F>(
    endpoint: &str,
    handler: &F,
    request: &HttpRequest,
    services: &Services,
) -> ApiResponse
where
    R: ApiRequest,
    T: Serialize,
    F: Fn(&mut R) -> Result<T, ApiError>,
{
    let mut api_request = match create_api_request::<R>(request, endpoint, services) {
        Ok(api_request) => api_request,
        Err(err) => {
            err.log();
            return err.to_response();
        }
    };

    let result = catch_unwind(AssertUnwindSafe(|| handler(&mut api_request)));
    let response = respond(&api_request, endpoint, result);
    cleanup_api_request(&mut api_request);
    response
}

fn respond<R, T>(
    api_request: &R,
    endpoint: &str,
    result: std::thread::Result<Result<T, ApiError>>,
) -> ApiResponse
where
    R: ApiRequest,
    T: Serialize,
{
    let Some(ctx) = api_request.context() else {
        let err = ApiError::bare_internal(
            locator::NO_CONTEXT,
            endpoint,
            "Request type does not embed a request context.",
        );
        err.log();
        return err.to_response();
    };

    let err = match result {
        Ok(Ok(content)) => match serde_json::to_value(&content) {
            Ok(content) => {
                debug!(
                    request_id = %ctx.base().request_id,
                    endpoint = %endpoint,
                    "API request complete"
                );
                return ApiResponse::success(ctx.base(), content);
            }
            Err(e) => ApiError::internal(
                locator::RESPONSE_SERIALIZE,
                &ctx,
                "Failed to serialize response content.",
            )
            .err(e),
        },
        Ok(Err(err)) => err,
        Err(panic) => ApiError::internal(
            locator::HANDLER_PANIC,
            &ctx,
            "Recovered from a panic when handling an API endpoint.",
        )
        .add("panic", panic_message(panic.as_ref())),
    };

    err.log();
    err.to_response()
}

fn encode_response(response: &ApiResponse, endpoint: &str) -> HttpReply {
    match serde_json::to_vec(response) {
        Ok(body) => HttpReply::json(response.status(), body),
        Err(e) => {
            let err = ApiError::bare_internal(
                locator::RESPONSE_SERIALIZE,
                endpoint,
                "Failed to serialize API response.",
            )
            .err(e);
            err.log();

            match serde_json::to_vec(&err.to_response()) {
                Ok(body) => HttpReply::json(HTTP_STATUS_SERVER_ERROR, body),
                Err(e) => {
                    error!(endpoint = %endpoint, error = %e, "Failed to serialize fallback API error");
                    HttpReply::server_error()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_payloads() {
        let panic = catch_unwind(|| panic!("static text")).unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "static text");

        let value = 7;
        let panic = catch_unwind(|| panic!("formatted {value}")).unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "formatted 7");
    }
}

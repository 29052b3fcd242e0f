use super::core::{describe_table, EndpointDescription, Route, RouteTable};
use crate::api::{api_path, ApiError, ApiRequestBase};
use crate::ApiRequest;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

pub const DESCRIBE_ENDPOINT: &str = "describe";

#[derive(Debug, Default, Deserialize, ApiRequest)]
pub struct DescribeRequest {
    #[api(context)]
    #[serde(flatten)]
    pub base: ApiRequestBase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeResponse {
    pub endpoints: Vec<EndpointDescription>,
}

pub(super) fn route(table: Weak<RouteTable>) -> Result<Route, regex::Error> {
    Route::api(
        &api_path(DESCRIBE_ENDPOINT),
        "Describe all endpoints on the server.",
        move |_: &mut DescribeRequest| -> Result<DescribeResponse, ApiError> {
            let endpoints = table
                .upgrade()
                .map(|table: Arc<RouteTable>| describe_table(&table))
                .unwrap_or_default();
            Ok(DescribeResponse { endpoints })
        },
    )
}

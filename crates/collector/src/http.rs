mod graphql;
mod rest;
mod snyk;
#[cfg(test)]
mod stub_server;
mod wiz;

pub use graphql::*;
pub use rest::*;
pub use snyk::*;
pub use wiz::*;

use crate::domain::{FetchError, TransientKind};
use reqwest::{RequestBuilder, Response};
use serde_json::{Map, Value};

/// Send a request and decode the JSON body of a successful response.
///
/// Every non-2xx status is classified by [`FetchError::from_status`]; a 404
/// is `FetchError::Status(404)` like any other fatal status.
async fn send_json(request: RequestBuilder) -> Result<Value, FetchError> {
    let response = request.send().await.map_err(request_error)?;
    let status = response.status();

    if !status.is_success() {
        return Err(FetchError::from_status(status.as_u16()));
    }

    decode_body(response).await
}

async fn decode_body(response: Response) -> Result<Value, FetchError> {
    response
        .json::<Value>()
        .await
        .map_err(|e| FetchError::MalformedPage(format!("response is not JSON: {e}")))
}

fn request_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Transient(TransientKind::RequestTimeout)
    } else {
        FetchError::Request(e.to_string())
    }
}

/// `defaults` overlaid with the object at `handlerConfig.query`, if any
fn merge_overrides(defaults: &Map<String, Value>, overrides: Option<&Value>) -> Map<String, Value> {
    let mut merged = defaults.clone();
    if let Some(Value::Object(overrides)) = overrides {
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

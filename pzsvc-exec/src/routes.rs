//! Route table
//!
//! `/execute` runs the orchestrated pipeline; everything else is static
//! information about this instance.

use axum::{
    extract::{rejection::QueryRejection, Form, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{any, get},
    Router,
};
use pzsvc_core::{Error, ErrorKind, ExecutionRequest, ExecutionResult};
use pzsvc_runner::Orchestrator;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

const HELP: &str = "\
pzsvc-exec endpoints as follows:
- '/': entry point. Names the served program and suggests other endpoints.
- '/execute': POST only. Downloads inFiles, runs the configured command with cmd appended, uploads outTiffs/outTxts/outGeoJson and reports the results as JSON.
- '/description': the description of this instance, if configured.
- '/attributes': the key/value attributes of this instance, as JSON.
- '/version': the version of the program served by this instance.
- '/help': this screen.
";

/// Static facts about this instance
#[derive(Debug, Clone, Default)]
pub struct ServiceInfo {
    pub name: String,
    pub description: String,
    pub attributes: Option<BTreeMap<String, String>>,
    pub version: String,
}

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub info: ServiceInfo,
}

/// Execute parameters as sent by callers. Every field is optional and
/// blank values mean "not given".
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteForm {
    cmd: Option<String>,
    #[serde(rename = "inFiles")]
    in_files: Option<String>,
    #[serde(rename = "outTiffs")]
    out_tiffs: Option<String>,
    #[serde(rename = "outTxts")]
    out_txts: Option<String>,
    #[serde(rename = "outGeoJson")]
    out_geojson: Option<String>,
    #[serde(rename = "authKey")]
    auth_key: Option<String>,
}

impl ExecuteForm {
    /// Body fields take precedence over query parameters of the same name.
    fn or(self, fallback: ExecuteForm) -> ExecuteForm {
        ExecuteForm {
            cmd: self.cmd.or(fallback.cmd),
            in_files: self.in_files.or(fallback.in_files),
            out_tiffs: self.out_tiffs.or(fallback.out_tiffs),
            out_txts: self.out_txts.or(fallback.out_txts),
            out_geojson: self.out_geojson.or(fallback.out_geojson),
            auth_key: self.auth_key.or(fallback.auth_key),
        }
    }

    fn into_request(self) -> ExecutionRequest {
        ExecutionRequest::from_form(
            self.cmd.as_deref().unwrap_or_default(),
            self.in_files.as_deref().unwrap_or_default(),
            self.out_tiffs.as_deref().unwrap_or_default(),
            self.out_txts.as_deref().unwrap_or_default(),
            self.out_geojson.as_deref().unwrap_or_default(),
            self.auth_key.as_deref().unwrap_or_default(),
        )
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/execute", any(execute_handler))
        .route("/help", get(help_handler))
        .route("/description", get(description_handler))
        .route("/attributes", get(attributes_handler))
        .route("/version", get(version_handler))
        .fallback(fallback_handler)
        .with_state(state)
}

/// HTTP status for a request whose first failure was of `kind`
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Client | ErrorKind::Transfer | ErrorKind::Process | ErrorKind::Protocol => {
            StatusCode::BAD_REQUEST
        }
    }
}

fn result_response(result: ExecutionResult) -> Response {
    let status = result.failure_kind().map(status_for).unwrap_or(StatusCode::OK);
    (status, Json(result)).into_response()
}

/// Standard result body carrying a single error
fn rejected(err: Error) -> Response {
    let mut result = ExecutionResult::new();
    result.record(&err);
    result_response(result)
}

/// /execute - run the pipeline (POST only)
async fn execute_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    query: Result<Query<ExecuteForm>, QueryRejection>,
    body: Option<Form<ExecuteForm>>,
) -> Response {
    if method != Method::POST {
        return rejected(Error::method_not_allowed(
            "This endpoint does not support that method. Please try again with POST.",
        ));
    }

    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            return rejected(Error::client(format!(
                "Unreadable query parameters: {}",
                rejection.body_text()
            )))
        }
    };

    let form = body.map(|Form(f)| f).unwrap_or_default().or(query);
    let request = form.into_request();
    info!(
        cmd = %request.cmd,
        in_files = request.in_files.len(),
        outputs = request.outputs().iter().map(|(_, f)| f.len()).sum::<usize>(),
        "Execute request"
    );

    let result = state.orchestrator.execute(&request).await;
    result_response(result)
}

async fn root_handler(State(state): State<Arc<AppState>>) -> String {
    let mut greeting = String::from("Hello. This is pzsvc-exec");
    if !state.info.name.is_empty() {
        greeting.push_str(", serving ");
        greeting.push_str(&state.info.name);
    }
    greeting.push_str(".\nWere you possibly looking for the /help or /execute endpoints?");
    greeting
}

async fn help_handler() -> &'static str {
    HELP
}

async fn description_handler(State(state): State<Arc<AppState>>) -> String {
    if state.info.description.is_empty() {
        "No description defined".to_string()
    } else {
        state.info.description.clone()
    }
}

async fn attributes_handler(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, String>> {
    Json(state.info.attributes.clone().unwrap_or_default())
}

async fn version_handler(State(state): State<Arc<AppState>>) -> String {
    state.info.version.clone()
}

async fn fallback_handler() -> &'static str {
    "Endpoint undefined.  Try /help?\n"
}

// HTTP route handlers for the Codelab API

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use codelab_common::types::{StudentRecord, TestCase};
use codelab_engine::classify::{classify_students, ClassificationMethod};
use codelab_engine::harness::TestHarness;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
    /// Correlation ids carried through to the logs only.
    pub student_id: Option<String>,
    pub question_id: Option<String>,
}

fn default_sandbox() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct RunTestsRequest {
    pub code: String,
    #[serde(default)]
    pub testcases: Vec<TestCaseInput>,
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
}

#[derive(Debug, Deserialize)]
pub struct TestCaseInput {
    pub id: Option<String>,
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
pub struct DebugTestRequest {
    pub code: String,
    pub testcase: String,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub students: Vec<StudentRecord>,
    pub method: Option<String>,
}

fn empty_code_rejection() -> axum::response::Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(serde_json::json!({
            "error": "code must not be empty"
        })),
    )
        .into_response()
}

/// POST /execute - Run a submission and return its output records
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecuteRequest>,
) -> impl IntoResponse {
    if payload.code.trim().is_empty() {
        return empty_code_rejection();
    }

    info!(
        student_id = payload.student_id.as_deref().unwrap_or("-"),
        question_id = payload.question_id.as_deref().unwrap_or("-"),
        sandbox = payload.sandbox,
        "Execute request"
    );

    let records = state
        .engine
        .execute_graded(&payload.code, payload.sandbox)
        .await;
    (StatusCode::OK, Json(records)).into_response()
}

/// POST /run-tests - Run a submission against its test cases
pub async fn run_tests(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RunTestsRequest>,
) -> impl IntoResponse {
    if payload.code.trim().is_empty() {
        return empty_code_rejection();
    }

    let cases: Vec<TestCase> = payload
        .testcases
        .into_iter()
        .enumerate()
        .map(|(idx, tc)| match tc.id {
            Some(id) => TestCase {
                id,
                snippet: tc.snippet,
            },
            None => TestCase::positional(idx, tc.snippet),
        })
        .collect();

    info!(test_cases = cases.len(), sandbox = payload.sandbox, "Run-tests request");

    let harness = TestHarness::new(&state.engine);
    let records = harness.run_tests(&payload.code, &cases, payload.sandbox).await;
    (StatusCode::OK, Json(records)).into_response()
}

/// POST /debug-test - Run a single test case and report its verdict
pub async fn debug_test(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DebugTestRequest>,
) -> impl IntoResponse {
    if payload.code.trim().is_empty() {
        return empty_code_rejection();
    }

    let harness = TestHarness::new(&state.engine);
    let (records, success) = harness.debug_test(&payload.code, &payload.testcase).await;

    info!(success = success, records = records.len(), "Debug-test finished");

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": success,
            "results": records,
        })),
    )
        .into_response()
}

/// POST /classify - Cognitive level classification over student metrics
pub async fn classify(
    Json(payload): Json<ClassifyRequest>,
) -> impl IntoResponse {
    let method = ClassificationMethod::parse(payload.method.as_deref().unwrap_or(""));
    let results = classify_students(&payload.students, method);

    info!(
        students = payload.students.len(),
        method = method.name(),
        results = results.len(),
        "Classification finished"
    );

    (StatusCode::OK, Json(results))
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

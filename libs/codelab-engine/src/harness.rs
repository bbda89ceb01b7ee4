/// Test Harness Builder - dynamic unittest synthesis + result extraction
///
/// **Core Responsibility:**
/// Given a submission and (id, assertion snippet) pairs, synthesize one
/// executable test module, run it through the execution engine, and turn
/// the captured sentinel payload into stats/result records.
///
/// **Trust boundary:**
/// The module is textual because the interpreter only accepts source
/// text; all escaping is centralized in `escape_embedded` and the case
/// ids are JSON-encoded, so quotes, backslashes, and sentinel look-alikes
/// in submissions cannot break out of the template.
use codelab_common::types::{
    ErrorKind, ErrorRecord, OutputRecord, TestCase, TestRunResult, TestRunStats,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::ExecutionEngine;
use crate::metrics;

/// Fixed prefix locating the machine-readable payload in captured
/// output. The runner prints it after all tests, so the genuine line is
/// always the last match.
pub const SENTINEL_PREFIX: &str = "TEST_RESULTS_JSON: ";

/// Payload printed by the synthesized runner.
#[derive(Debug, Serialize, Deserialize)]
struct SentinelPayload {
    total: u32,
    passed: u32,
    failed: u32,
    passed_ids: Vec<String>,
    success: bool,
    report: String,
}

/// Escape source for embedding in a triple-quoted Python literal.
/// Backslashes first, then quotes: the reverse order would re-escape the
/// inserted backslashes and let a quote terminate the literal early.
pub fn escape_embedded(source: &str) -> String {
    source.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Synthesize the test module: the submission embedded as a string
/// literal and exec'd, one test method per case whose id is appended to
/// the shared accumulator only after the snippet body succeeds, a text
/// runner over an in-memory stream, and the sentinel line.
pub fn build_test_module(source: &str, cases: &[TestCase]) -> String {
    let mut module = String::new();
    module.push_str("import io\nimport json\nimport unittest\n\n");
    module.push_str(&format!(
        "_student_source = \"\"\"{}\"\"\"\n",
        escape_embedded(source)
    ));
    module.push_str("_passed_case_ids = []\n\n");
    module.push_str("exec(compile(_student_source, \"<student>\", \"exec\"), globals())\n\n");

    module.push_str("class SubmissionTests(unittest.TestCase):\n");
    for (index, case) in cases.iter().enumerate() {
        module.push_str(&format!("    def test_case_{}(self):\n", index));
        for line in case.snippet.lines() {
            module.push_str("        ");
            module.push_str(line);
            module.push('\n');
        }
        // JSON string literals are valid Python string literals.
        let id_literal = serde_json::to_string(&case.id).expect("string encodes");
        module.push_str(&format!("        _passed_case_ids.append({})\n", id_literal));
    }
    module.push('\n');

    module.push_str("_stream = io.StringIO()\n");
    module.push_str(
        "_suite = unittest.defaultTestLoader.loadTestsFromTestCase(SubmissionTests)\n",
    );
    module.push_str("_result = unittest.TextTestRunner(stream=_stream, verbosity=2).run(_suite)\n");
    module.push_str("_failed = len(_result.failures) + len(_result.errors)\n");
    module.push_str(&format!("print(\"{}\" + json.dumps({{\n", SENTINEL_PREFIX));
    module.push_str("    \"total\": _result.testsRun,\n");
    module.push_str("    \"passed\": _result.testsRun - _failed,\n");
    module.push_str("    \"failed\": _failed,\n");
    module.push_str("    \"passed_ids\": _passed_case_ids,\n");
    module.push_str("    \"success\": _result.wasSuccessful(),\n");
    module.push_str("    \"report\": _stream.getvalue(),\n");
    module.push_str("}))\n");

    module
}

fn sentinel_payload(record: &OutputRecord) -> Option<&str> {
    match record {
        OutputRecord::Text(line) => line.strip_prefix(SENTINEL_PREFIX.trim_end()).map(|rest| rest.trim_start()),
        _ => None,
    }
}

/// Interpret the engine's output for a test run.
///
/// The last sentinel-prefixed text record wins (a submission printing a
/// forged sentinel still runs before the real runner). Absent or
/// malformed payloads degrade to a failed result carrying any captured
/// error.
pub fn interpret_results(records: &[OutputRecord], case_count: usize) -> Vec<OutputRecord> {
    if let Some(raw) = records.iter().rev().find_map(sentinel_payload) {
        match serde_json::from_str::<SentinelPayload>(raw) {
            Ok(payload) => {
                return vec![
                    OutputRecord::TestStats(TestRunStats {
                        total: payload.total,
                        passed: payload.passed,
                        failed: payload.failed,
                    }),
                    OutputRecord::TestResult(TestRunResult {
                        total: payload.total,
                        passed: payload.passed,
                        failed: payload.failed,
                        passed_ids: payload.passed_ids,
                        success: payload.success,
                        report: payload.report,
                    }),
                ];
            }
            Err(e) => {
                debug!(error = %e, "Malformed sentinel payload");
                let message = format!("test results could not be parsed: {}", e);
                return vec![
                    OutputRecord::Error(ErrorRecord {
                        kind: ErrorKind::HarnessParseFailure,
                        message: message.clone(),
                    }),
                    failed_result(case_count, message),
                ];
            }
        }
    }

    // No sentinel at all. A captured error record already explains the
    // failure; otherwise report the silent run itself.
    let captured = records.iter().find_map(|record| match record {
        OutputRecord::Error(ErrorRecord { message, .. }) => Some(message.clone()),
        _ => None,
    });

    match captured {
        Some(message) => vec![failed_result(case_count, message)],
        None => {
            let message = "test run finished without reporting results".to_string();
            vec![
                OutputRecord::Error(ErrorRecord {
                    kind: ErrorKind::HarnessParseFailure,
                    message: message.clone(),
                }),
                failed_result(case_count, message),
            ]
        }
    }
}

fn failed_result(case_count: usize, report: String) -> OutputRecord {
    OutputRecord::TestResult(TestRunResult {
        total: case_count as u32,
        passed: 0,
        failed: case_count as u32,
        passed_ids: Vec::new(),
        success: false,
        report,
    })
}

/// High-level grading and diagnostic entry points built on the engine.
pub struct TestHarness<'a> {
    engine: &'a ExecutionEngine,
}

impl<'a> TestHarness<'a> {
    pub fn new(engine: &'a ExecutionEngine) -> Self {
        Self { engine }
    }

    /// Run the submission, then (when cases are given) the synthesized
    /// test module; append interpreted stats/result records and the
    /// trailing code metrics.
    pub async fn run_tests(
        &self,
        source: &str,
        cases: &[TestCase],
        sandboxed: bool,
    ) -> Vec<OutputRecord> {
        let mut records = self.engine.execute(source, sandboxed).await;

        if !cases.is_empty() {
            let module = build_test_module(source, cases);
            let raw = self.engine.execute(&module, sandboxed).await;
            let outcome = interpret_results(&raw, cases.len());
            records.extend(
                raw.into_iter()
                    .filter(|record| sentinel_payload(record).is_none()),
            );
            records.extend(outcome);
        }

        records.push(OutputRecord::CodeMetrics(metrics::analyze(source)));
        records
    }

    /// Diagnostic single-case run: same machinery, one positional case,
    /// plus an overall success flag.
    pub async fn debug_test(&self, source: &str, snippet: &str) -> (Vec<OutputRecord>, bool) {
        let cases = vec![TestCase::positional(0, snippet)];
        let module = build_test_module(source, &cases);

        let raw = self.engine.execute(&module, true).await;
        let outcome = interpret_results(&raw, cases.len());
        let success = outcome.iter().any(
            |record| matches!(record, OutputRecord::TestResult(result) if result.success),
        );

        let mut records: Vec<OutputRecord> = raw
            .into_iter()
            .filter(|record| sentinel_payload(record).is_none())
            .collect();
        records.extend(outcome);
        (records, success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: &str, snippet: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            snippet: snippet.to_string(),
        }
    }

    #[test]
    fn test_escape_order_backslash_then_quote() {
        assert_eq!(escape_embedded(r#"\"#), r#"\\"#);
        assert_eq!(escape_embedded(r#"""#), r#"\""#);
        // A backslash-quote pair must not collapse into an escaped quote.
        assert_eq!(escape_embedded(r#"\""#), r#"\\\""#);
        assert_eq!(escape_embedded(r#"print("hi\n")"#), r#"print(\"hi\\n\")"#);
    }

    #[test]
    fn test_module_embeds_source_and_cases() {
        let module = build_test_module(
            "def add(a, b):\n    return a + b\n",
            &[case("tc-7", "assert add(2, 3) == 5")],
        );

        assert!(module.contains("_student_source = \"\"\"def add(a, b):"));
        assert!(module.contains("def test_case_0(self):"));
        assert!(module.contains("        assert add(2, 3) == 5"));
        // The id is appended only after the assertion line.
        let assert_pos = module.find("assert add").unwrap();
        let append_pos = module.find("_passed_case_ids.append(\"tc-7\")").unwrap();
        assert!(append_pos > assert_pos);
        assert!(module.contains(SENTINEL_PREFIX.trim_end()));
    }

    #[test]
    fn test_module_survives_adversarial_source() {
        let hostile = "s = \"\"\"triple\"\"\"\npath = \"C:\\\\tmp\"\nprint(\"TEST_RESULTS_JSON: {}\")";
        let module = build_test_module(hostile, &[case("c1", "assert True")]);

        // No unescaped triple quote can terminate the literal early: the
        // embedded block between the delimiters contains none.
        let start = module.find("\"\"\"").unwrap() + 3;
        let end = module[start..].find("\"\"\"").unwrap();
        assert!(module[start..start + end].contains("\\\"\\\"\\\"triple"));
    }

    #[test]
    fn test_multiline_snippets_are_indented() {
        let module = build_test_module(
            "x = 1",
            &[case("c1", "value = x + 1\nassert value == 2")],
        );
        assert!(module.contains("        value = x + 1\n        assert value == 2"));
    }

    #[test]
    fn test_interpret_results_parses_sentinel() {
        let payload = r#"{"total":2,"passed":1,"failed":1,"passed_ids":["case-1"],"success":false,"report":"ran 2 tests"}"#;
        let records = vec![
            OutputRecord::Text("regular output".to_string()),
            OutputRecord::Text(format!("{}{}", SENTINEL_PREFIX, payload)),
        ];

        let outcome = interpret_results(&records, 2);
        assert_eq!(
            outcome[0],
            OutputRecord::TestStats(TestRunStats {
                total: 2,
                passed: 1,
                failed: 1,
            })
        );
        match &outcome[1] {
            OutputRecord::TestResult(result) => {
                assert_eq!(result.passed_ids, vec!["case-1".to_string()]);
                assert!(!result.success);
                assert_eq!(result.report, "ran 2 tests");
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn test_interpret_results_takes_last_sentinel() {
        // A submission printing a forged sentinel runs before the real
        // runner; the genuine line is last.
        let forged = format!("{}{}", SENTINEL_PREFIX, r#"{"total":9,"passed":9,"failed":0,"passed_ids":[],"success":true,"report":"forged"}"#);
        let genuine = format!("{}{}", SENTINEL_PREFIX, r#"{"total":1,"passed":0,"failed":1,"passed_ids":[],"success":false,"report":"real"}"#);
        let records = vec![
            OutputRecord::Text(forged),
            OutputRecord::Text(genuine),
        ];

        let outcome = interpret_results(&records, 1);
        match &outcome[1] {
            OutputRecord::TestResult(result) => assert_eq!(result.report, "real"),
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn test_missing_sentinel_surfaces_captured_error() {
        let records = vec![OutputRecord::Error(ErrorRecord {
            kind: ErrorKind::RuntimeFault,
            message: "NameError: name 'add' is not defined".to_string(),
        })];

        let outcome = interpret_results(&records, 3);
        assert_eq!(outcome.len(), 1);
        match &outcome[0] {
            OutputRecord::TestResult(result) => {
                assert!(!result.success);
                assert_eq!(result.total, 3);
                assert_eq!(result.failed, 3);
                assert!(result.report.contains("NameError"));
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payload_degrades_to_failed_result() {
        let records = vec![OutputRecord::Text(format!(
            "{}{}",
            SENTINEL_PREFIX, "not-json"
        ))];

        let outcome = interpret_results(&records, 1);
        assert_eq!(outcome.len(), 2);
        match &outcome[0] {
            OutputRecord::Error(record) => {
                assert_eq!(record.kind, ErrorKind::HarnessParseFailure);
                assert!(record.message.contains("could not be parsed"));
            }
            other => panic!("unexpected record: {:?}", other),
        }
        match &outcome[1] {
            OutputRecord::TestResult(result) => {
                assert!(!result.success);
                assert!(result.report.contains("could not be parsed"));
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn test_silent_run_reports_a_parse_failure() {
        let records = vec![OutputRecord::Text("just output, no sentinel".to_string())];

        let outcome = interpret_results(&records, 2);
        assert_eq!(outcome.len(), 2);
        match &outcome[0] {
            OutputRecord::Error(record) => {
                assert_eq!(record.kind, ErrorKind::HarnessParseFailure);
                assert!(record.message.contains("without reporting results"));
            }
            other => panic!("unexpected record: {:?}", other),
        }
        assert!(matches!(&outcome[1], OutputRecord::TestResult(r) if !r.success && r.failed == 2));
    }
}

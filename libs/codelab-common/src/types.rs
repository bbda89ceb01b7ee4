use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in the ordered output of an execution session.
///
/// Serialized as `{"type": ..., "content": ...}` so the records match the
/// wire shape the workspace frontend already consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum OutputRecord {
    Text(String),
    Image(ImageRef),
    Error(ErrorRecord),
    TestStats(TestRunStats),
    TestResult(TestRunResult),
    CodeMetrics(CodeMetrics),
}

/// Public reference to a stored visualization artifact.
///
/// `temporary` marks sandboxed runs whose artifacts may be reaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub reference: String,
    #[serde(default)]
    pub temporary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

/// Failure taxonomy carried on `error` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Statically banned construct; the submission was never executed.
    RejectedConstruct,
    /// The submission raised during execution.
    RuntimeFault,
    /// No idle signal from the interpreter within the wait bound.
    CommunicationTimeout,
    /// Test sentinel payload missing or malformed.
    HarnessParseFailure,
}

/// One test case for the harness builder: an id plus an assertion body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub snippet: String,
}

impl TestCase {
    /// Positional id for cases submitted without one.
    pub fn positional(index: usize, snippet: impl Into<String>) -> Self {
        Self {
            id: format!("case-{}", index + 1),
            snippet: snippet.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunStats {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunResult {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub passed_ids: Vec<String>,
    pub success: bool,
    pub report: String,
}

/// Output of the code metrics analyzer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMetrics {
    pub variable_count: u32,
    pub function_count: u32,
}

/// Per-question feature vector consumed by the classification engine.
///
/// `compile_count` and `coding_time` are cost criteria (lower is better);
/// everything else is a benefit criterion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsVector {
    #[serde(default)]
    pub completion_status: f64,
    #[serde(default)]
    pub trial_status: f64,
    #[serde(default)]
    pub compile_count: f64,
    #[serde(default)]
    pub coding_time: f64,
    #[serde(default)]
    pub variable_count: f64,
    #[serde(default)]
    pub function_count: f64,
    #[serde(default)]
    pub test_case_completion_rate: f64,
}

impl MetricsVector {
    pub const FEATURE_COUNT: usize = 7;

    /// Fixed feature order shared by every scoring method.
    pub fn to_row(&self) -> [f64; Self::FEATURE_COUNT] {
        [
            self.completion_status,
            self.trial_status,
            self.compile_count,
            self.coding_time,
            self.variable_count,
            self.function_count,
            self.test_case_completion_rate,
        ]
    }

    /// Cost designation matching `to_row` order.
    pub const IS_COST: [bool; Self::FEATURE_COUNT] =
        [false, false, true, true, false, false, false];
}

/// Six ordered cognitive levels, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CognitiveLevel {
    Remember,
    Understand,
    Apply,
    Analyze,
    Evaluate,
    Create,
}

impl CognitiveLevel {
    pub const ALL: [CognitiveLevel; 6] = [
        CognitiveLevel::Remember,
        CognitiveLevel::Understand,
        CognitiveLevel::Apply,
        CognitiveLevel::Analyze,
        CognitiveLevel::Evaluate,
        CognitiveLevel::Create,
    ];

    pub fn rank(self) -> usize {
        self as usize
    }

    pub fn from_rank(rank: usize) -> Self {
        Self::ALL[rank.min(Self::ALL.len() - 1)]
    }

    /// Deterministic step function shared by all scoring methods.
    /// Breakpoints: 0.85 / 0.70 / 0.55 / 0.40 / 0.25.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.85 {
            CognitiveLevel::Create
        } else if score >= 0.70 {
            CognitiveLevel::Evaluate
        } else if score >= 0.55 {
            CognitiveLevel::Analyze
        } else if score >= 0.40 {
            CognitiveLevel::Apply
        } else if score >= 0.25 {
            CognitiveLevel::Understand
        } else {
            CognitiveLevel::Remember
        }
    }
}

impl std::fmt::Display for CognitiveLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CognitiveLevel::Remember => "Remember",
            CognitiveLevel::Understand => "Understand",
            CognitiveLevel::Apply => "Apply",
            CognitiveLevel::Analyze => "Analyze",
            CognitiveLevel::Evaluate => "Evaluate",
            CognitiveLevel::Create => "Create",
        };
        write!(f, "{}", name)
    }
}

/// Classification outcome for one student, either scoped to a material
/// (`material_id` set) or course-level (`material_id` absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_id: Option<String>,
    pub level: CognitiveLevel,
    pub score: f64,
    pub trace: serde_json::Value,
    pub classified_at: DateTime<Utc>,
}

/// Nested classification input: student -> materials -> questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    pub materials: Vec<MaterialRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub id: String,
    pub questions: Vec<QuestionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: String,
    pub metrics: MetricsVector,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_record_wire_shape() {
        let record = OutputRecord::Text("hello".to_string());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["content"], "hello");

        let error = OutputRecord::Error(ErrorRecord {
            kind: ErrorKind::RuntimeFault,
            message: "NameError: name 'x' is not defined".to_string(),
        });
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["content"]["kind"], "runtime_fault");
    }

    #[test]
    fn test_band_mapping_monotonic() {
        let expected = [
            (0.0, CognitiveLevel::Remember),
            (0.30, CognitiveLevel::Understand),
            (0.50, CognitiveLevel::Apply),
            (0.60, CognitiveLevel::Analyze),
            (0.80, CognitiveLevel::Evaluate),
            (0.90, CognitiveLevel::Create),
        ];
        for (score, level) in expected {
            assert_eq!(CognitiveLevel::from_score(score), level, "score {}", score);
        }
    }

    #[test]
    fn test_band_breakpoints_inclusive() {
        assert_eq!(CognitiveLevel::from_score(0.25), CognitiveLevel::Understand);
        assert_eq!(CognitiveLevel::from_score(0.40), CognitiveLevel::Apply);
        assert_eq!(CognitiveLevel::from_score(0.55), CognitiveLevel::Analyze);
        assert_eq!(CognitiveLevel::from_score(0.70), CognitiveLevel::Evaluate);
        assert_eq!(CognitiveLevel::from_score(0.85), CognitiveLevel::Create);
    }

    #[test]
    fn test_rank_round_trip() {
        for level in CognitiveLevel::ALL {
            assert_eq!(CognitiveLevel::from_rank(level.rank()), level);
        }
        // Out-of-range ranks cap at the top level.
        assert_eq!(CognitiveLevel::from_rank(99), CognitiveLevel::Create);
    }

    #[test]
    fn test_positional_case_ids() {
        let case = TestCase::positional(0, "assert True");
        assert_eq!(case.id, "case-1");
        assert_eq!(TestCase::positional(4, "x").id, "case-5");
    }
}

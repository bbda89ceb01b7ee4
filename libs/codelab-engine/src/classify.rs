/// Classification Engine - cognitive level from execution telemetry
///
/// **Critical Properties:**
/// - Pure: no I/O, safely callable from unlimited concurrent callers
/// - Total: never raises to its caller. Empty input and non-finite
///   arithmetic both collapse to the (Remember, 0.0) fallback
/// - All three methods share the band mapping in
///   `CognitiveLevel::from_score` and clamp scores to [0, 1]
///
/// The "neural" and fuzzy methods are hand-tuned deterministic
/// heuristics over the fixed feature vector, not trained models.
use chrono::Utc;
use codelab_common::types::{
    ClassificationResult, CognitiveLevel, MetricsVector, StudentRecord,
};
use ndarray::{Array2, Axis};
use serde_json::{json, Value};
use tracing::debug;

/// Band weights for the fuzzy rules, highest band first.
const FUZZY_BAND_WEIGHTS: [f64; 6] = [0.95, 0.78, 0.61, 0.44, 0.27, 0.10];
const COMPILE_CAP: f64 = 20.0;
const TIME_CAP: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationMethod {
    /// Multi-criteria ranking against column-wise ideal solutions.
    Topsis,
    /// Min-max scaled feature average through a logistic squash.
    NeuralHeuristic,
    /// Fixed fuzzy rule base over averaged raw metrics.
    Fuzzy,
}

impl ClassificationMethod {
    /// Unrecognized names default to the multi-criteria ranking.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "neural" | "neural_heuristic" | "neural-heuristic" => Self::NeuralHeuristic,
            "fuzzy" | "fuzzy_rules" | "fuzzy-rules" => Self::Fuzzy,
            _ => Self::Topsis,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Topsis => "topsis",
            Self::NeuralHeuristic => "neural",
            Self::Fuzzy => "fuzzy",
        }
    }
}

/// Level, clamped score, and an explanatory trace for one row set.
#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub level: CognitiveLevel,
    pub score: f64,
    pub trace: Value,
}

/// Classify one set of per-question metrics.
pub fn classify(method: ClassificationMethod, rows: &[MetricsVector]) -> ClassificationOutcome {
    if rows.is_empty() {
        return fallback("no question metrics supplied");
    }
    // Min-max folds and membership ramps ignore NaN, so a non-finite
    // value must be rejected up front or it can launder into a finite
    // score instead of reaching the final-score guard.
    if rows
        .iter()
        .flat_map(|row| row.to_row())
        .any(|value| !value.is_finite())
    {
        return fallback("non-finite metric value");
    }

    let (score, trace) = match method {
        ClassificationMethod::Topsis => topsis(rows),
        ClassificationMethod::NeuralHeuristic => neural_heuristic(rows),
        ClassificationMethod::Fuzzy => fuzzy_rules(rows),
    };
    finalize(score, trace)
}

/// Clamp to [0, 1], absorb non-finite faults, derive the band.
fn finalize(score: f64, trace: Value) -> ClassificationOutcome {
    let score = if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        debug!("Non-finite classification score absorbed to 0.0");
        0.0
    };
    ClassificationOutcome {
        level: CognitiveLevel::from_score(score),
        score,
        trace,
    }
}

fn fallback(reason: &str) -> ClassificationOutcome {
    ClassificationOutcome {
        level: CognitiveLevel::Remember,
        score: 0.0,
        trace: json!({ "fallback": reason }),
    }
}

fn feature_matrix(rows: &[MetricsVector]) -> Array2<f64> {
    Array2::from_shape_fn((rows.len(), MetricsVector::FEATURE_COUNT), |(i, j)| {
        rows[i].to_row()[j]
    })
}

/// Multi-criteria ranking: normalize each column by its Euclidean norm,
/// weight equally, and score each row by relative closeness to the
/// ideal-best/ideal-worst points.
fn topsis(rows: &[MetricsVector]) -> (f64, Value) {
    // One row cannot define distinct ideal points; use the documented
    // deterministic two-tier policy keyed on completion.
    if let [row] = rows {
        let (score, tier) = if row.completion_status > 0.0 {
            (0.45, "completed")
        } else {
            (0.20, "not_completed")
        };
        return (
            score,
            json!({ "method": "topsis", "single_row_policy": tier }),
        );
    }

    let matrix = feature_matrix(rows);
    let norms = matrix
        .map_axis(Axis(0), |column| column.dot(&column).sqrt())
        .mapv(|norm| if norm == 0.0 { 1.0 } else { norm });
    let weight = 1.0 / MetricsVector::FEATURE_COUNT as f64;
    let weighted = (&matrix / &norms) * weight;

    let mut ideal_best = [0.0; MetricsVector::FEATURE_COUNT];
    let mut ideal_worst = [0.0; MetricsVector::FEATURE_COUNT];
    for j in 0..MetricsVector::FEATURE_COUNT {
        let column = weighted.column(j);
        let min = column.iter().copied().fold(f64::INFINITY, f64::min);
        let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if MetricsVector::IS_COST[j] {
            ideal_best[j] = min;
            ideal_worst[j] = max;
        } else {
            ideal_best[j] = max;
            ideal_worst[j] = min;
        }
    }

    let row_scores: Vec<f64> = weighted
        .rows()
        .into_iter()
        .map(|row| {
            let distance_to = |ideal: &[f64; MetricsVector::FEATURE_COUNT]| {
                row.iter()
                    .zip(ideal.iter())
                    .map(|(value, target)| (value - target).powi(2))
                    .sum::<f64>()
                    .sqrt()
            };
            let to_best = distance_to(&ideal_best);
            let to_worst = distance_to(&ideal_worst);
            if to_best + to_worst == 0.0 {
                0.0
            } else {
                to_worst / (to_best + to_worst)
            }
        })
        .collect();

    let score = row_scores.iter().sum::<f64>() / row_scores.len() as f64;
    (score, json!({ "method": "topsis", "row_scores": row_scores }))
}

/// Normalized-feature heuristic: min-max scale each column to [0, 1],
/// invert cost columns, average, then squash through a logistic curve
/// centered at 0.5 with steepness 5.
fn neural_heuristic(rows: &[MetricsVector]) -> (f64, Value) {
    let matrix = feature_matrix(rows);
    let (row_count, column_count) = matrix.dim();

    let mut total = 0.0;
    for j in 0..column_count {
        let column = matrix.column(j);
        let min = column.iter().copied().fold(f64::INFINITY, f64::min);
        let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        for value in column.iter() {
            // A zero-range column carries no discriminating signal;
            // the neutral midpoint keeps benefit and cost columns
            // symmetric under the inversion below.
            let scaled = if range == 0.0 { 0.5 } else { (value - min) / range };
            total += if MetricsVector::IS_COST[j] {
                1.0 - scaled
            } else {
                scaled
            };
        }
    }

    let activation = total / (row_count * column_count) as f64;
    let score = 1.0 / (1.0 + (-5.0 * (activation - 0.5)).exp());
    let score = if score.is_finite() { score } else { 0.0 };
    (
        score,
        json!({ "method": "neural", "activation": activation }),
    )
}

/// Linear ramp saturating at `saturation`.
fn ramp(value: f64, saturation: f64) -> f64 {
    (value / saturation).clamp(0.0, 1.0)
}

/// Fuzzy rule inference over metrics averaged across rows: fixed
/// membership ramps, six rules (one per band), score as the
/// activation-weighted average of band weights.
fn fuzzy_rules(rows: &[MetricsVector]) -> (f64, Value) {
    let count = rows.len() as f64;
    let mean = |select: fn(&MetricsVector) -> f64| -> f64 {
        rows.iter().map(select).sum::<f64>() / count
    };

    let completion = mean(|r| r.completion_status);
    let trial = mean(|r| r.trial_status);
    let compiles = mean(|r| r.compile_count).min(COMPILE_CAP);
    let time = mean(|r| r.coding_time).min(TIME_CAP);
    let variables = mean(|r| r.variable_count);
    let functions = mean(|r| r.function_count);
    let test_rate = mean(|r| r.test_case_completion_rate);

    let completion_high = ramp(completion, 0.4);
    let completion_low = 1.0 - completion_high;
    let trial_high = ramp(trial, 1.0);
    let variables_high = ramp(variables, 5.0);
    let functions_high = ramp(functions, 3.0);
    let tests_high = test_rate.clamp(0.0, 1.0);
    let tests_low = 1.0 - tests_high;
    // Capped cost metrics: low membership rewards few compiles / fast work.
    let compiles_high = compiles / COMPILE_CAP;
    let compiles_low = 1.0 - compiles_high;
    let time_high = time / TIME_CAP;
    let time_medium = (1.0 - ((time - TIME_CAP / 2.0).abs() / (TIME_CAP / 2.0))).max(0.0);

    // One rule per band, highest first.
    let activations = [
        completion_high.min(functions_high).min(tests_high), // Create
        completion_high.min(variables_high).min(compiles_low), // Evaluate
        variables_high.max(functions_high).min(time_medium), // Analyze
        completion_high.min(time_high),                      // Apply
        completion_low.min(trial_high.max(compiles_high)),   // Understand
        completion_low.min(tests_low),                       // Remember
    ];

    let activation_sum: f64 = activations.iter().sum();
    let score = if activation_sum == 0.0 {
        0.25
    } else {
        activations
            .iter()
            .zip(FUZZY_BAND_WEIGHTS.iter())
            .map(|(activation, weight)| activation * weight)
            .sum::<f64>()
            / activation_sum
    };

    (
        score,
        json!({
            "method": "fuzzy",
            "activations": {
                "create": activations[0],
                "evaluate": activations[1],
                "analyze": activations[2],
                "apply": activations[3],
                "understand": activations[4],
                "remember": activations[5],
            },
        }),
    )
}

/// Course-level aggregation over one outcome per material.
///
/// Level: statistical mode of material levels (tie toward the higher
/// level), adjusted by the gap to the highest level achieved — a gap of
/// at most one keeps the mode, exactly two reports the midpoint rank,
/// and a wider gap reports mode + 1 capped at the top. Score: mean of
/// material scores.
pub fn aggregate_course(outcomes: &[ClassificationOutcome]) -> ClassificationOutcome {
    if outcomes.is_empty() {
        return fallback("no material classifications to aggregate");
    }

    let mut counts = [0usize; 6];
    for outcome in outcomes {
        counts[outcome.level.rank()] += 1;
    }

    let mut mode_rank = 0;
    for (rank, &count) in counts.iter().enumerate() {
        if count > 0 && count >= counts[mode_rank] {
            mode_rank = rank;
        }
    }
    let highest_rank = counts
        .iter()
        .rposition(|&count| count > 0)
        .unwrap_or(mode_rank);

    let gap = highest_rank - mode_rank;
    let final_rank = if gap <= 1 {
        mode_rank
    } else if gap == 2 {
        mode_rank + 1
    } else {
        (mode_rank + 1).min(CognitiveLevel::ALL.len() - 1)
    };

    let score = outcomes.iter().map(|o| o.score).sum::<f64>() / outcomes.len() as f64;
    let level = CognitiveLevel::from_rank(final_rank);

    ClassificationOutcome {
        level,
        score: if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 },
        trace: json!({
            "mode": CognitiveLevel::from_rank(mode_rank).to_string(),
            "highest": CognitiveLevel::from_rank(highest_rank).to_string(),
            "materials": outcomes.iter().map(|o| o.level.to_string()).collect::<Vec<_>>(),
        }),
    }
}

/// Walk the nested student input and emit one result per material plus
/// one course-level result per student.
pub fn classify_students(
    students: &[StudentRecord],
    method: ClassificationMethod,
) -> Vec<ClassificationResult> {
    let mut results = Vec::new();

    for student in students {
        let mut material_outcomes = Vec::new();
        for material in &student.materials {
            let rows: Vec<MetricsVector> =
                material.questions.iter().map(|q| q.metrics).collect();
            let outcome = classify(method, &rows);
            debug!(
                student_id = %student.id,
                material_id = %material.id,
                method = method.name(),
                level = %outcome.level,
                score = outcome.score,
                "Material classified"
            );
            results.push(to_result(&student.id, Some(&material.id), &outcome));
            material_outcomes.push(outcome);
        }

        let course = aggregate_course(&material_outcomes);
        results.push(to_result(&student.id, None, &course));
    }

    results
}

fn to_result(
    student_id: &str,
    material_id: Option<&str>,
    outcome: &ClassificationOutcome,
) -> ClassificationResult {
    ClassificationResult {
        student_id: student_id.to_string(),
        material_id: material_id.map(str::to_string),
        level: outcome.level,
        score: outcome.score,
        trace: outcome.trace.clone(),
        classified_at: Utc::now(),
    }
}

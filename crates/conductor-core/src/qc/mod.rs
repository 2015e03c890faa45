//! Quality-control verdicts and strictest-wins aggregation.
//!
//! A reviewer produces a [`QcReview`] with one [`Verdict`] plus per-criterion
//! results; [`aggregate_reviews`] merges the reviews of all reviewers into a
//! single verdict and a labeled feedback string. Reviewer selection and
//! invocation live in [`reviewer`].

pub mod reviewer;

use serde::{Deserialize, Serialize};

/// A QC outcome for one reviewer or for a task as a whole.
///
/// The derived `Ord` is the strictness order: `Green < Yellow < Red`, so
/// strictest-wins aggregation is a plain `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// Accepted.
    Green,
    /// Accepted with concerns. Terminal: never retried.
    Yellow,
    /// Rejected; retried while budget remains.
    Red,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Green => write!(f, "GREEN"),
            Verdict::Yellow => write!(f, "YELLOW"),
            Verdict::Red => write!(f, "RED"),
        }
    }
}

/// One acceptance criterion checked by a reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    /// The criterion text, as posed to the reviewer.
    pub criterion: String,
    /// Whether the reviewer judged the criterion satisfied.
    pub passed: bool,
    /// The reviewer's reasoning.
    #[serde(default)]
    pub rationale: String,
}

/// A single reviewer's assessment of one task result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcReview {
    /// Name of the reviewing agent.
    pub reviewer: String,
    /// The reviewer's overall verdict.
    pub verdict: Verdict,
    /// Per-criterion results, one per posed criterion.
    #[serde(default)]
    pub criteria: Vec<CriterionResult>,
    /// Free-form feedback, fed back into the prompt on retry.
    #[serde(default)]
    pub feedback: String,
}

/// The merged outcome of every reviewer for one task attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct QcOutcome {
    pub verdict: Verdict,
    /// Reviewer feedback concatenated in input order, labeled by reviewer.
    pub feedback: String,
    pub reviews: Vec<QcReview>,
}

/// Merge reviews using strictest-wins.
///
/// The final verdict is the max over reviewers; any single failed criterion
/// raises the floor to YELLOW. Feedback is concatenated in input order,
/// each block labeled with its reviewer's name. An empty review list
/// aggregates to GREEN with empty feedback.
pub fn aggregate_reviews(reviews: Vec<QcReview>) -> QcOutcome {
    let mut verdict = Verdict::Green;
    for review in &reviews {
        verdict = verdict.max(review.verdict);
        if review.criteria.iter().any(|c| !c.passed) {
            verdict = verdict.max(Verdict::Yellow);
        }
    }

    let feedback = reviews
        .iter()
        .filter(|r| !r.feedback.trim().is_empty())
        .map(|r| format!("[{}] {}", r.reviewer, r.feedback.trim()))
        .collect::<Vec<_>>()
        .join("\n");

    QcOutcome {
        verdict,
        feedback,
        reviews,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(reviewer: &str, verdict: Verdict, feedback: &str) -> QcReview {
        QcReview {
            reviewer: reviewer.to_string(),
            verdict,
            criteria: vec![],
            feedback: feedback.to_string(),
        }
    }

    #[test]
    fn verdict_strictness_order() {
        assert!(Verdict::Green < Verdict::Yellow);
        assert!(Verdict::Yellow < Verdict::Red);
        assert_eq!(Verdict::Green.max(Verdict::Red), Verdict::Red);
    }

    #[test]
    fn empty_reviews_aggregate_green() {
        let outcome = aggregate_reviews(vec![]);
        assert_eq!(outcome.verdict, Verdict::Green);
        assert!(outcome.feedback.is_empty());
    }

    #[test]
    fn strictest_verdict_wins() {
        let outcome = aggregate_reviews(vec![
            review("a", Verdict::Green, ""),
            review("b", Verdict::Red, "broken"),
            review("c", Verdict::Yellow, "meh"),
        ]);
        assert_eq!(outcome.verdict, Verdict::Red);
    }

    #[test]
    fn failed_criterion_raises_floor_to_yellow() {
        let mut r = review("a", Verdict::Green, "");
        r.criteria.push(CriterionResult {
            criterion: "has tests".into(),
            passed: false,
            rationale: "no tests found".into(),
        });
        let outcome = aggregate_reviews(vec![r]);
        assert_eq!(outcome.verdict, Verdict::Yellow);
    }

    #[test]
    fn failed_criterion_does_not_lower_red() {
        let mut r = review("a", Verdict::Red, "bad");
        r.criteria.push(CriterionResult {
            criterion: "has tests".into(),
            passed: false,
            rationale: String::new(),
        });
        let outcome = aggregate_reviews(vec![r]);
        assert_eq!(outcome.verdict, Verdict::Red);
    }

    #[test]
    fn feedback_is_labeled_and_in_input_order() {
        let outcome = aggregate_reviews(vec![
            review("security-review", Verdict::Yellow, "check input handling"),
            review("code-review", Verdict::Green, "looks fine"),
        ]);
        assert_eq!(
            outcome.feedback,
            "[security-review] check input handling\n[code-review] looks fine"
        );
    }

    #[test]
    fn blank_feedback_blocks_are_dropped() {
        let outcome = aggregate_reviews(vec![
            review("a", Verdict::Green, "   "),
            review("b", Verdict::Green, "note"),
        ]);
        assert_eq!(outcome.feedback, "[b] note");
    }

    #[test]
    fn aggregation_is_idempotent_and_associative() {
        // max-based merging: aggregating in any grouping yields the same
        // verdict.
        let a = review("a", Verdict::Yellow, "");
        let b = review("b", Verdict::Red, "");
        let c = review("c", Verdict::Green, "");

        let all = aggregate_reviews(vec![a.clone(), b.clone(), c.clone()]).verdict;
        let left = aggregate_reviews(vec![a.clone(), b.clone()]).verdict;
        let grouped = left.max(aggregate_reviews(vec![c.clone()]).verdict);
        assert_eq!(all, grouped);

        let twice = aggregate_reviews(vec![a.clone(), a.clone()]).verdict;
        assert_eq!(twice, aggregate_reviews(vec![a]).verdict);
    }

    #[test]
    fn verdict_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Verdict::Red).unwrap(), "\"RED\"");
        let v: Verdict = serde_json::from_str("\"YELLOW\"").unwrap();
        assert_eq!(v, Verdict::Yellow);
    }
}

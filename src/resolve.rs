//! Pure selection logic over already-fetched run data.
//!
//! Run resolution picks runs out of a project listing by id, name, or regex
//! keyword. Step resolution turns a `(metric, value)` pair into the history
//! step to fork at.

use crate::error::AdminError;
use crate::model::{MetricRow, ReductionPolicy, Run, RunSelector};
use regex::Regex;
use std::collections::HashSet;

/// Metric name that addresses history steps directly.
pub const STEP_METRIC: &str = "step";

/// Compile user-supplied patterns, reporting the offending one on failure.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, AdminError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| AdminError::config(format!("invalid regex {p:?}: {e}")))
        })
        .collect()
}

fn exactly_one<'a>(
    matching: Vec<&'a Run>,
    what: String,
    all: &[Run],
) -> Result<&'a Run, AdminError> {
    match matching.len() {
        1 => Ok(matching[0]),
        0 => Err(AdminError::NotFound {
            what,
            candidates: all.iter().map(|r| format!("{} ({})", r.name, r.id)).collect(),
        }),
        count => Err(AdminError::Ambiguous {
            what,
            count,
            candidates: matching
                .iter()
                .map(|r| format!("{} ({})", r.name, r.id))
                .collect(),
        }),
    }
}

/// Resolve `selector` against a full project listing.
///
/// `ById` and `ByName` yield exactly one run. `ByKeywords` yields one run per
/// keyword in keyword order, and fails if any keyword is unmatched, matches
/// more than one run, or two keywords land on the same run.
pub fn resolve_runs<'a>(runs: &'a [Run], selector: &RunSelector) -> Result<Vec<&'a Run>, AdminError> {
    match selector {
        RunSelector::ById(id) => {
            let matching: Vec<&Run> = runs.iter().filter(|r| &r.id == id).collect();
            exactly_one(matching, format!("runs with run.id == {id}"), runs).map(|r| vec![r])
        }
        RunSelector::ByName(name) => {
            let matching: Vec<&Run> = runs.iter().filter(|r| &r.name == name).collect();
            exactly_one(matching, format!("runs with run.name == {name}"), runs)
                .map(|r| vec![r])
        }
        RunSelector::ByKeywords(keywords) => {
            let patterns = compile_patterns(keywords)?;
            let mut selected = Vec::with_capacity(keywords.len());
            for (keyword, re) in keywords.iter().zip(&patterns) {
                let matching: Vec<&Run> = runs.iter().filter(|r| re.is_match(&r.name)).collect();
                let run = exactly_one(
                    matching,
                    format!("runs with name matching keyword {keyword:?}"),
                    runs,
                )?;
                selected.push(run);
            }

            let unique: HashSet<&str> = selected.iter().map(|r| r.id.as_str()).collect();
            if unique.len() != keywords.len() {
                return Err(AdminError::Ambiguous {
                    what: format!(
                        "distinct runs for {} keywords (one or more keywords matched the same run)",
                        keywords.len()
                    ),
                    count: unique.len(),
                    candidates: selected.iter().map(|r| r.name.clone()).collect(),
                });
            }
            Ok(selected)
        }
    }
}

/// Resolve a selector that must produce a single run.
pub fn resolve_one<'a>(runs: &'a [Run], selector: &RunSelector) -> Result<&'a Run, AdminError> {
    let mut resolved = resolve_runs(runs, selector)?;
    match resolved.len() {
        1 => Ok(resolved.remove(0)),
        count => Err(AdminError::Ambiguous {
            what: "runs for a single-run selector".into(),
            count,
            candidates: resolved.iter().map(|r| r.name.clone()).collect(),
        }),
    }
}

/// Outcome of mapping a metric value to a history step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepResolution {
    pub step: i64,
    /// Rows that matched; 0 when the metric was `step` itself.
    pub matches: usize,
    /// Set only when several rows matched and a policy picked one.
    pub reduced_by: Option<ReductionPolicy>,
}

/// True when resolving `metric` requires the run history.
pub fn needs_history(metric: &str) -> bool {
    metric != STEP_METRIC
}

/// Find the step at which `metric == value`.
pub fn resolve_step(
    rows: &[MetricRow],
    metric: &str,
    value: i64,
    policy: Option<ReductionPolicy>,
) -> Result<StepResolution, AdminError> {
    if !needs_history(metric) {
        return Ok(StepResolution {
            step: value,
            matches: 0,
            reduced_by: None,
        });
    }

    let steps: Vec<i64> = rows
        .iter()
        .filter(|row| row.metric_equals(metric, value))
        .map(|row| row.step)
        .collect();

    match steps.as_slice() {
        [] => Err(AdminError::missing(format!(
            "failed to find steps with {metric}={value}"
        ))),
        [step] => Ok(StepResolution {
            step: *step,
            matches: 1,
            reduced_by: None,
        }),
        many => {
            let policy = policy.ok_or_else(|| {
                AdminError::config(format!(
                    "found {} steps with {metric}={value}; pass --matching-steps-reduction-func \
                     (min or max) to choose which step to use",
                    many.len()
                ))
            })?;
            let picked = match policy {
                ReductionPolicy::Min => many.iter().min(),
                ReductionPolicy::Max => many.iter().max(),
            };
            // Non-empty by the match arm.
            let step = picked.copied().unwrap_or_default();
            Ok(StepResolution {
                step,
                matches: many.len(),
                reduced_by: Some(policy),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn run(id: &str, name: &str) -> Run {
        Run {
            id: id.into(),
            name: name.into(),
            storage_id: format!("storage-{id}"),
            updated_at: None,
        }
    }

    fn runs() -> Vec<Run> {
        vec![
            run("a1", "m2f_r50_city"),
            run("b2", "m2f_r50_ade"),
            run("c3", "m2f_swin_city"),
            run("d4", "m2f_r50_ade"),
        ]
    }

    fn row(step: i64, epoch: i64) -> MetricRow {
        let mut metrics = BTreeMap::new();
        metrics.insert("epoch".to_string(), json!(epoch));
        metrics.insert("loss".to_string(), json!(0.25));
        MetricRow { step, metrics }
    }

    #[test]
    fn by_id_returns_that_run() {
        let runs = runs();
        let got = resolve_one(&runs, &RunSelector::ById("c3".into())).unwrap();
        assert_eq!(got.name, "m2f_swin_city");
    }

    #[test]
    fn by_id_absent_is_not_found() {
        let runs = runs();
        let err = resolve_runs(&runs, &RunSelector::ById("zz".into())).unwrap_err();
        assert!(matches!(err, AdminError::NotFound { .. }));
    }

    #[test]
    fn by_id_duplicated_is_ambiguous() {
        let mut runs = runs();
        runs.push(run("a1", "copy"));
        let err = resolve_runs(&runs, &RunSelector::ById("a1".into())).unwrap_err();
        assert!(matches!(err, AdminError::Ambiguous { count: 2, .. }));
    }

    #[test]
    fn by_name_duplicate_is_ambiguous() {
        let runs = runs();
        let err = resolve_runs(&runs, &RunSelector::ByName("m2f_r50_ade".into())).unwrap_err();
        match err {
            AdminError::Ambiguous {
                count, candidates, ..
            } => {
                assert_eq!(count, 2);
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn by_name_is_exact_not_substring() {
        let runs = runs();
        let err = resolve_runs(&runs, &RunSelector::ByName("m2f_swin".into())).unwrap_err();
        assert!(matches!(err, AdminError::NotFound { .. }));
    }

    #[test]
    fn keywords_resolve_in_keyword_order() {
        let runs = runs();
        let sel = RunSelector::ByKeywords(vec!["swin".into(), "r50_city".into()]);
        let got = resolve_runs(&runs, &sel).unwrap();
        let ids: Vec<&str> = got.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "a1"]);
    }

    #[test]
    fn keyword_matching_several_runs_fails() {
        let runs = runs();
        let sel = RunSelector::ByKeywords(vec!["city".into()]);
        assert!(matches!(
            resolve_runs(&runs, &sel).unwrap_err(),
            AdminError::Ambiguous { count: 2, .. }
        ));
    }

    #[test]
    fn keyword_matching_nothing_fails() {
        let runs = runs();
        let sel = RunSelector::ByKeywords(vec!["vit".into()]);
        assert!(matches!(
            resolve_runs(&runs, &sel).unwrap_err(),
            AdminError::NotFound { .. }
        ));
    }

    #[test]
    fn keywords_hitting_same_run_fail() {
        let runs = runs();
        let sel = RunSelector::ByKeywords(vec!["swin".into(), "swin_city$".into()]);
        let err = resolve_runs(&runs, &sel).unwrap_err();
        assert!(err.to_string().contains("matched the same run"));
    }

    #[test]
    fn invalid_keyword_is_config_error() {
        let runs = runs();
        let sel = RunSelector::ByKeywords(vec!["(".into()]);
        assert!(matches!(
            resolve_runs(&runs, &sel).unwrap_err(),
            AdminError::Config(_)
        ));
    }

    #[test]
    fn step_metric_is_identity() {
        for value in [-5, 0, 1, 15_000, i64::MAX] {
            let r = resolve_step(&[], STEP_METRIC, value, None).unwrap();
            assert_eq!(r.step, value);
            assert_eq!(r.reduced_by, None);
        }
    }

    #[test]
    fn single_match_ignores_policy() {
        let rows = vec![row(10, 1), row(20, 2), row(30, 3)];
        for policy in [None, Some(ReductionPolicy::Min), Some(ReductionPolicy::Max)] {
            let r = resolve_step(&rows, "epoch", 2, policy).unwrap();
            assert_eq!(r.step, 20);
            assert_eq!(r.matches, 1);
            assert_eq!(r.reduced_by, None);
        }
    }

    #[test]
    fn multiple_matches_use_policy() {
        let rows = vec![row(10, 29), row(20, 28), row(30, 29)];
        let max = resolve_step(&rows, "epoch", 29, Some(ReductionPolicy::Max)).unwrap();
        assert_eq!(max.step, 30);
        assert_eq!(max.reduced_by, Some(ReductionPolicy::Max));
        let min = resolve_step(&rows, "epoch", 29, Some(ReductionPolicy::Min)).unwrap();
        assert_eq!(min.step, 10);
        assert_eq!(min.matches, 2);
    }

    #[test]
    fn multiple_matches_without_policy_fail() {
        let rows = vec![row(10, 29), row(30, 29)];
        let err = resolve_step(&rows, "epoch", 29, None).unwrap_err();
        assert!(matches!(err, AdminError::Config(_)));
        assert!(err.to_string().contains("found 2 steps"));
    }

    #[test]
    fn no_match_is_missing_resource() {
        let rows = vec![row(10, 1)];
        let err = resolve_step(&rows, "epoch", 99, Some(ReductionPolicy::Max)).unwrap_err();
        assert!(matches!(err, AdminError::MissingResource(_)));
    }
}

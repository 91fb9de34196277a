use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

/// `<entity>/<project>` pair every remote call is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPath {
    pub entity: String,
    pub project: String,
}

impl ProjectPath {
    pub fn new(entity: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            project: project.into(),
        }
    }

    /// Path of a run inside this project, as shown in log output.
    pub fn run_path(&self, run_name: &str) -> String {
        format!("{}/{}", self, run_name)
    }
}

impl fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.project)
    }
}

/// Summary of a remote run.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    /// Run id, unique within a project (e.g. `1a2b3c4d`).
    pub id: String,
    /// Display name. Not unique.
    pub name: String,
    /// Internal id the service expects in mutations.
    pub storage_id: String,
    pub updated_at: Option<OffsetDateTime>,
}

/// One logged history row. `step` is the row's `_step`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricRow {
    pub step: i64,
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl MetricRow {
    /// Build a row from a raw history entry, reading the step from `_step`.
    pub fn from_history(mut entry: serde_json::Map<String, serde_json::Value>) -> Option<Self> {
        let step = entry.remove("_step")?.as_i64()?;
        Some(Self {
            step,
            metrics: entry.into_iter().collect(),
        })
    }

    /// True when `name` is logged in this row and numerically equal to `value`.
    pub fn metric_equals(&self, name: &str, value: i64) -> bool {
        match self.metrics.get(name) {
            Some(serde_json::Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    return i == value;
                }
                if n.as_u64().is_some() {
                    // Above i64::MAX, so never equal to an i64.
                    return false;
                }
                n.as_f64().is_some_and(|f| float_equals_int(f, value))
            }
            _ => false,
        }
    }
}

/// Exact comparison of a logged float against an integer. Only integral
/// floats that convert back to `value` without rounding qualify.
fn float_equals_int(f: f64, value: i64) -> bool {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    if f.fract() != 0.0 || !(-TWO_POW_63..TWO_POW_63).contains(&f) {
        return false;
    }
    let as_float = value as f64;
    as_float as i64 == value && f == as_float
}

/// A file stored with a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFile {
    pub storage_id: String,
    /// Path relative to the run root, e.g. `media/images/x.png`.
    pub name: String,
    pub url: Option<String>,
    pub size_bytes: Option<u64>,
    pub updated_at: Option<OffsetDateTime>,
}

/// A logged artifact version, named `<sequence>:v<version>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub storage_id: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub updated_at: Option<OffsetDateTime>,
}

/// Anything the keep-latest rule can order by modification time.
pub trait Timestamped {
    fn updated_at(&self) -> Option<OffsetDateTime>;
}

impl Timestamped for RunFile {
    fn updated_at(&self) -> Option<OffsetDateTime> {
        self.updated_at
    }
}

impl Timestamped for Artifact {
    fn updated_at(&self) -> Option<OffsetDateTime> {
        self.updated_at
    }
}

/// How to pick one step when several rows match the fork metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReductionPolicy {
    Min,
    Max,
}

impl ReductionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ReductionPolicy::Min => "min",
            ReductionPolicy::Max => "max",
        }
    }
}

impl fmt::Display for ReductionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which run(s) an operation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSelector {
    ById(String),
    ByName(String),
    /// Regex keywords searched in run names; one run per keyword.
    ByKeywords(Vec<String>),
}

/// Request to create (or update) a run remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertRun {
    pub project: ProjectPath,
    pub id: String,
    pub display_name: String,
    /// `<run_id>?_step=<step>` when the new run is a fork.
    pub fork_from: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(step: i64, value: serde_json::Value) -> MetricRow {
        let entry = json!({ "_step": step, "epoch": value });
        MetricRow::from_history(entry.as_object().cloned().unwrap_or_default()).unwrap()
    }

    #[test]
    fn from_history_extracts_step() {
        let r = row(7, json!(3));
        assert_eq!(r.step, 7);
        assert!(!r.metrics.contains_key("_step"));
    }

    #[test]
    fn from_history_requires_step() {
        let entry = json!({ "loss": 0.5 });
        assert!(MetricRow::from_history(entry.as_object().cloned().unwrap()).is_none());
    }

    #[test]
    fn metric_equality_is_numeric() {
        assert!(row(1, json!(30)).metric_equals("epoch", 30));
        assert!(row(1, json!(30.0)).metric_equals("epoch", 30));
        assert!(!row(1, json!(30.5)).metric_equals("epoch", 30));
        assert!(!row(1, json!("30")).metric_equals("epoch", 30));
        assert!(!row(1, json!(30)).metric_equals("loss", 30));
    }

    #[test]
    fn metric_equality_is_exact_for_large_values() {
        let two_pow_53: i64 = 1 << 53;
        assert!(row(1, json!(two_pow_53)).metric_equals("epoch", two_pow_53));
        assert!(!row(1, json!(two_pow_53)).metric_equals("epoch", two_pow_53 + 1));
        assert!(!row(1, json!(two_pow_53 + 1)).metric_equals("epoch", two_pow_53));
        // 2^53 + 1 has no exact f64, so a float can never claim to equal it.
        assert!(!row(1, json!(two_pow_53 as f64)).metric_equals("epoch", two_pow_53 + 1));
        assert!(row(1, json!(two_pow_53 as f64)).metric_equals("epoch", two_pow_53));
        assert!(!row(1, json!(u64::MAX)).metric_equals("epoch", i64::MAX));
        assert!(!row(1, json!(1e300)).metric_equals("epoch", i64::MAX));
    }

    #[test]
    fn project_path_display() {
        let p = ProjectPath::new("team", "detection");
        assert_eq!(p.to_string(), "team/detection");
        assert_eq!(p.run_path("m2f_city"), "team/detection/m2f_city");
    }
}

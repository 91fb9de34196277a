use crate::error::AdminError;
use crate::model::Run;
use crate::resolve::compile_patterns;
use regex::Regex;

/// Include/exclude rules applied to each run before collecting deletions.
#[derive(Debug, Default)]
pub struct RunFilter {
    skip_ids: Vec<String>,
    select_ids: Vec<String>,
    skip_names: Vec<Regex>,
    select_names: Vec<Regex>,
}

impl RunFilter {
    pub fn new(
        skip_ids: &[String],
        select_ids: &[String],
        skip_names_regex: &[String],
        select_names_regex: &[String],
    ) -> Result<Self, AdminError> {
        Ok(Self {
            skip_ids: skip_ids.to_vec(),
            select_ids: select_ids.to_vec(),
            skip_names: compile_patterns(skip_names_regex)?,
            select_names: compile_patterns(select_names_regex)?,
        })
    }

    pub fn admits(&self, run: &Run) -> bool {
        if self.skip_ids.iter().any(|id| id == &run.id) {
            return false;
        }
        if !self.select_ids.is_empty() && !self.select_ids.iter().any(|id| id == &run.id) {
            return false;
        }
        if self.skip_names.iter().any(|re| re.is_match(&run.name)) {
            return false;
        }
        if !self.select_names.is_empty() && !self.select_names.iter().any(|re| re.is_match(&run.name))
        {
            return false;
        }
        true
    }
}

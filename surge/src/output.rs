use crate::cli::OutputFormat;
use std::path::Path;

use surge_core::{Assessment, ProgressFn, RunProfile, RunResult};

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, profile_path: &Path, profile: &RunProfile);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(&self, result: &RunResult, assessment: &Assessment) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}

//! Batch driver: one workflow run per input row, strictly in order.

use crate::steps::reporter::ERROR_SENTINEL;
use crate::workflow::Workflow;
use anyhow::Result;
use bughunter_core::{InputRow, ReportRow, RunState};
use tracing::{info, warn};

pub struct Pipeline {
    workflow: Workflow,
    max_iterations: u32,
}

impl Pipeline {
    pub fn new(workflow: Workflow, max_iterations: u32) -> Self {
        Self {
            workflow,
            max_iterations,
        }
    }

    pub async fn process_row(&self, row: InputRow) -> Result<ReportRow> {
        let state = RunState::from_row(row, self.max_iterations);
        let done = self.workflow.run(state).await?;
        if let Some(diagnostic) = &done.error {
            warn!("Row {}: {}", done.id, diagnostic);
        }
        Ok(done.report())
    }

    /// Process every row. Without `keep_going` the first failure aborts the
    /// batch; with it, the failed row is reported as `ERROR`.
    pub async fn run_batch(
        &self,
        rows: Vec<InputRow>,
        keep_going: bool,
    ) -> Result<Vec<ReportRow>> {
        let total = rows.len();
        let mut results = Vec::with_capacity(total);

        for (idx, row) in rows.into_iter().enumerate() {
            let id = row.id.clone();
            info!("[{}/{}] Processing row {}", idx + 1, total, id);

            match self.process_row(row).await {
                Ok(report) => {
                    info!("Row {} -> lines {}", report.id, report.bug_line);
                    results.push(report);
                }
                Err(err) if keep_going => {
                    warn!("Row {} failed: {:#}", id, err);
                    results.push(ReportRow {
                        id,
                        bug_line: ERROR_SENTINEL.to_string(),
                        bug_explanation: format!("{:#}", err),
                    });
                }
                Err(err) => return Err(err.context(format!("row {}", id))),
            }
        }

        Ok(results)
    }
}

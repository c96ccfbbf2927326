use std::fs;
use std::path::PathBuf;

use clap::Args;

use common::workflow::EncryptedRecord;

use crate::state::{AppState, StateError};

/// Decrypt the locators in one or more record files
///
/// Every record is attempted; one failing does not stop the others.
#[derive(Args, Debug, Clone)]
pub struct Decrypt {
    /// Encrypted record files written by `warden encrypt`
    #[arg(required = true)]
    pub records: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("failed to read record {0}: {1}")]
    Read(PathBuf, String),
}

#[async_trait::async_trait]
impl crate::op::Op for Decrypt {
    type Error = DecryptError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let workflow = state.workflow()?;

        let mut records = Vec::with_capacity(self.records.len());
        for path in &self.records {
            let json = fs::read_to_string(path)
                .map_err(|e| DecryptError::Read(path.clone(), e.to_string()))?;
            let record = EncryptedRecord::from_json(&json)
                .map_err(|e| DecryptError::Read(path.clone(), e.to_string()))?;
            records.push(record);
        }

        let results = workflow.batch_decrypt(&records).await;
        let lines: Vec<String> = self
            .records
            .iter()
            .zip(results)
            .map(|(path, result)| match result {
                Ok(locator) => format!("{}: {}", path.display(), locator),
                Err(e) => format!("{}: FAILED ({:?}): {}", path.display(), e.kind(), e),
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

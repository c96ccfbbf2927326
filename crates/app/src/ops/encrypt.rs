use std::fs;
use std::path::PathBuf;

use clap::Args;

use common::policy::{AccessPolicy, PolicyError};
use common::workflow::WorkflowError;

use crate::state::{AppState, StateError};

/// 0.00001 ETH
pub const DEFAULT_MIN_BALANCE_WEI: &str = "10000000000000";

/// Upload a file and encrypt its locator under an access policy
#[derive(Args, Debug, Clone)]
pub struct Encrypt {
    /// File to upload
    pub file: PathBuf,

    /// Access policy JSON; defaults to a minimum native balance on the configured chain
    #[arg(long)]
    pub policy: Option<PathBuf>,

    /// Where to write the encrypted record (defaults to <file>.warden.json)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("invalid policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("encryption failed: {0}")]
    Workflow(#[from] WorkflowError),
    #[error("record serialization failed: {0}")]
    Record(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Encrypt {
    fn policy(&self, state: &AppState) -> Result<AccessPolicy, EncryptError> {
        match &self.policy {
            Some(path) => Ok(AccessPolicy::from_json(&fs::read_to_string(path)?)?),
            None => Ok(AccessPolicy::native_balance_at_least(
                state.config.chain,
                DEFAULT_MIN_BALANCE_WEI,
            )?),
        }
    }

    fn out_path(&self) -> PathBuf {
        self.out.clone().unwrap_or_else(|| {
            let mut name = self.file.clone().into_os_string();
            name.push(".warden.json");
            PathBuf::from(name)
        })
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Encrypt {
    type Error = EncryptError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let policy = self.policy(&state)?;
        let data = fs::read(&self.file)?;

        let workflow = state.workflow()?;
        let store = state.content_store().await?;
        let record = workflow.upload_and_encrypt(&*store, data, &policy).await?;

        let out = self.out_path();
        fs::write(&out, record.to_json()?)?;
        Ok(format!(
            "Encrypted {} under {} {} {}\n- Record: {}",
            self.file.display(),
            policy.method(),
            policy.return_value_test().comparator,
            policy.return_value_test().value,
            out.display()
        ))
    }
}

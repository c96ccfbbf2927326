use clap::Args;

use common::auth::Signer;

use crate::state::{AppState, StateError};

/// Print the wallet address assertions are signed with
#[derive(Args, Debug, Clone)]
pub struct Address;

#[async_trait::async_trait]
impl crate::op::Op for Address {
    type Error = StateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        Ok(state.load_wallet()?.address().to_string())
    }
}

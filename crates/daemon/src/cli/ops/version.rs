use clap::Args;

use common::prelude::build_info;

#[derive(Args, Debug, Clone)]
pub struct Version {
    /// Print the full build record as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("failed to encode build info: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Version {
    type Error = VersionError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let build = build_info();
        if self.json {
            return Ok(serde_json::to_string_pretty(&build)?);
        }
        Ok(build.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cli::op::{Op, OpContext};

    #[tokio::test]
    async fn test_json_output_carries_build_record() {
        let ctx = OpContext::new(None);

        let rendered = Version { json: true }.execute(&ctx).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["package_version"], build_info().package_version);

        let plain = Version { json: false }.execute(&ctx).await.unwrap();
        assert_eq!(plain, build_info().to_string());
    }
}

use shroud_daemon::http_server::api::client::ApiError;
use shroud_daemon::http_server::api::{
    HistoryRequest, HistoryResponse, StatusRequest, StatusResponse, StopRequest, StopResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum SharesError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for HistoryRequest {
    type Error = SharesError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let response: HistoryResponse = ctx.client.call(self.clone()).await?;

        if response.is_empty() {
            return Ok("No shares yet".to_string());
        }

        let mut lines = Vec::new();
        for share in &response {
            let state = if share.active { "active" } else { "inactive" };
            lines.push(format!(
                "{}  {}  {}/{} downloads  {}  expires {}",
                share.share_id,
                share.filename,
                share.download_count,
                share.max_downloads,
                state,
                share.expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
            ));
            lines.push(format!("    {}", share.share_link));
        }
        Ok(lines.join("\n"))
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for StatusRequest {
    type Error = SharesError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let response: StatusResponse = ctx.client.call(self.clone()).await?;
        let state = if response.active { "active" } else { "inactive" };
        Ok(format!("{}: {}", self.share_id, state))
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for StopRequest {
    type Error = SharesError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let response: StopResponse = ctx.client.call(self.clone()).await?;
        Ok(format!("{}: {}", response.share_id, response.status))
    }
}

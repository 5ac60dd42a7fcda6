//! Full block retrieval for a job the caller already knows has succeeded.

use crate::pipeline::Block;
use crate::services::context::{AnalysisClient, AnalysisError, ServiceJobStatus};

/// Follow continuation tokens until the service reports none, accumulating
/// blocks in delivery order. The page count is unbounded. A page reporting a
/// non-succeeded status mid-retrieval is a failure of the whole job, never a
/// partial result.
pub async fn retrieve_all_blocks(
    client: &dyn AnalysisClient,
    job_id: &str,
) -> Result<Vec<Block>, AnalysisError> {
    debug_assert!(!job_id.is_empty());

    let mut blocks = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let page = client.get_analysis(job_id, next_token.as_deref()).await?;
        if page.job_status != ServiceJobStatus::Succeeded {
            return Err(AnalysisError::Malformed(format!(
                "job `{job_id}` reported status {} during block retrieval",
                page.job_status
            )));
        }
        blocks.extend(page.blocks);
        match page.next_token {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }

    Ok(blocks)
}

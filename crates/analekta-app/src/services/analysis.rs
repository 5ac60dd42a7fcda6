use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};

use crate::pipeline::Block;
use crate::services::context::{
    AnalysisClient, AnalysisError, AnalysisPage, DocumentLocation, FeatureType,
    GenericRateLimiter, NotificationTarget, PipelineError, ServiceJobStatus,
};

/// HTTP client for the analysis service's REST interface.
///
/// Submission posts to `{endpoint}/v1/analyses`; block pages are read from
/// `{endpoint}/v1/analyses/{job_id}` following `nextToken` continuation.
/// A 404 on the job path maps to [`AnalysisError::UnknownJob`] — the service
/// forgets job ids after its retention window. Transport-level failures are
/// retried with exponential backoff; rejections and unknown-job responses
/// are not.
#[derive(Clone, Debug)]
pub struct HttpAnalysisClient {
    http: HttpClient,
    endpoint: String,
    api_key: Option<String>,
    limiter: Option<Arc<GenericRateLimiter>>,
    backoff: ExponentialBuilder,
}

impl HttpAnalysisClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        limiter: Option<Arc<GenericRateLimiter>>,
    ) -> Result<Self, PipelineError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(PipelineError::message(
                "analysis endpoint must not be empty",
            ));
        }
        Ok(Self {
            http: HttpClient::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            limiter,
            backoff: ExponentialBuilder::default(),
        })
    }

    fn analyses_url(&self, job_id: Option<&str>) -> String {
        match job_id {
            Some(id) => format!("{}/v1/analyses/{id}", self.endpoint),
            None => format!("{}/v1/analyses", self.endpoint),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn submit_once(
        &self,
        request: &StartAnalysisRequest<'_>,
    ) -> Result<String, AnalysisError> {
        self.throttle().await;
        let response = self
            .authorize(self.http.post(self.analyses_url(None)))
            .json(request)
            .send()
            .await
            .map_err(|err| AnalysisError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Rejected(format!(
                "submission returned {status}: {}",
                body.trim()
            )));
        }

        let parsed: StartAnalysisResponse = response
            .json()
            .await
            .map_err(|err| AnalysisError::Malformed(err.to_string()))?;
        if parsed.job_id.is_empty() {
            return Err(AnalysisError::Malformed(
                "submission response carried an empty job id".to_string(),
            ));
        }
        Ok(parsed.job_id)
    }

    async fn page_once(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<AnalysisPage, AnalysisError> {
        self.throttle().await;
        let mut request = self.authorize(self.http.get(self.analyses_url(Some(job_id))));
        if let Some(token) = next_token {
            request = request.query(&[("nextToken", token)]);
        }
        let response = request
            .send()
            .await
            .map_err(|err| AnalysisError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AnalysisError::UnknownJob(job_id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Rejected(format!(
                "block page returned {status}: {}",
                body.trim()
            )));
        }

        let parsed: GetAnalysisResponse = response
            .json()
            .await
            .map_err(|err| AnalysisError::Malformed(err.to_string()))?;
        Ok(AnalysisPage {
            blocks: parsed.blocks,
            next_token: parsed.next_token,
            job_status: ServiceJobStatus::from_wire(&parsed.job_status),
        })
    }
}

#[async_trait::async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn start_analysis(
        &self,
        location: &DocumentLocation,
        features: &[FeatureType],
        notification: &NotificationTarget,
    ) -> Result<String, AnalysisError> {
        let request = StartAnalysisRequest {
            location: WireLocation {
                bucket: &location.bucket,
                key: &location.key,
            },
            feature_types: features.iter().map(|feature| feature.as_wire()).collect(),
            notification: WireNotification {
                channel: &notification.channel,
                role: &notification.role,
            },
        };

        (|| self.submit_once(&request))
            .retry(self.backoff.clone())
            .when(|err| matches!(err, AnalysisError::Transport(_)))
            .await
    }

    async fn get_analysis(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<AnalysisPage, AnalysisError> {
        debug_assert!(!job_id.trim().is_empty());

        (|| self.page_once(job_id, next_token))
            .retry(self.backoff.clone())
            .when(|err| matches!(err, AnalysisError::Transport(_)))
            .await
    }
}

#[derive(Debug, Serialize)]
struct StartAnalysisRequest<'a> {
    #[serde(rename = "DocumentLocation")]
    location: WireLocation<'a>,
    #[serde(rename = "FeatureTypes")]
    feature_types: Vec<&'static str>,
    #[serde(rename = "NotificationChannel")]
    notification: WireNotification<'a>,
}

#[derive(Debug, Serialize)]
struct WireLocation<'a> {
    #[serde(rename = "Bucket")]
    bucket: &'a str,
    #[serde(rename = "Key")]
    key: &'a str,
}

#[derive(Debug, Serialize)]
struct WireNotification<'a> {
    #[serde(rename = "Channel")]
    channel: &'a str,
    #[serde(rename = "Role")]
    role: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartAnalysisResponse {
    #[serde(rename = "JobId")]
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct GetAnalysisResponse {
    #[serde(rename = "JobStatus")]
    job_status: String,
    #[serde(rename = "Blocks", default)]
    blocks: Vec<Block>,
    #[serde(rename = "NextToken", default)]
    next_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trailing_slash_is_normalized() {
        let client =
            HttpAnalysisClient::new("http://analysis.local/", None, None).expect("client");
        assert_eq!(
            client.analyses_url(None),
            "http://analysis.local/v1/analyses"
        );
        assert_eq!(
            client.analyses_url(Some("job-1")),
            "http://analysis.local/v1/analyses/job-1"
        );
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        let err = HttpAnalysisClient::new("  ", None, None).expect_err("empty endpoint");
        assert!(matches!(err, PipelineError::Message(_)));
    }
}

//! HTTP client for the encoder worker-pool coordinator, implementing
//! [`EncoderPool`].

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use annex_core::{
    AssignmentStatus, CoreError, CoreResult, EncodeJobSpec, EncodeJobUpdate, EncoderPool,
};

const SERVICE: &str = "encoder_pool";

#[derive(Debug, Serialize)]
struct SubmitPayload<'a> {
    job_id: Uuid,
    source_path: &'a str,
    output_path: &'a str,
    profile_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct JobPayload {
    status: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkersPayload {
    #[serde(default)]
    workers: Vec<serde_json::Value>,
}

fn map_status(label: &str) -> AssignmentStatus {
    AssignmentStatus::parse(label).unwrap_or(AssignmentStatus::Pending)
}

/// REST client for the encoder coordinator daemon.
pub struct EncoderdClient {
    base: Url,
    client: Client,
}

impl EncoderdClient {
    /// Build a client for the coordinator base URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the base URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(base_url: &str) -> CoreResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|err| CoreError::external(SERVICE, "parse_base_url", err))?;
        let client = Client::builder()
            .build()
            .map_err(|err| CoreError::external(SERVICE, "build_client", err))?;
        Ok(Self { base, client })
    }

    fn endpoint(&self, path: &str) -> CoreResult<Url> {
        self.base
            .join(path)
            .map_err(|err| CoreError::external(SERVICE, "build_url", err))
    }
}

#[async_trait]
impl EncoderPool for EncoderdClient {
    async fn submit(&self, job: EncodeJobSpec) -> CoreResult<()> {
        let url = self.endpoint("jobs")?;
        let payload = SubmitPayload {
            job_id: job.job_id,
            source_path: &job.source_path,
            output_path: &job.output_path,
            profile_id: job.profile_id,
        };
        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| CoreError::external(SERVICE, "submit", err))?;
        // A conflict means the job already exists, which is the idempotent
        // happy path on resume.
        if response.status().is_success() || response.status() == StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(CoreError::External {
                service: SERVICE,
                operation: "submit",
                source: format!("submission rejected with status {}", response.status()).into(),
            })
        }
    }

    async fn poll(&self, job_id: Uuid) -> CoreResult<EncodeJobUpdate> {
        let url = self.endpoint(&format!("jobs/{job_id}"))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| CoreError::external(SERVICE, "poll", err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(CoreError::not_found("encode_job", job_id));
        }
        let payload = response
            .json::<JobPayload>()
            .await
            .map_err(|err| CoreError::external(SERVICE, "poll", err))?;
        Ok(EncodeJobUpdate {
            status: map_status(&payload.status),
            progress: payload.progress,
            error: payload.error,
        })
    }

    async fn cancel(&self, job_id: Uuid, reason: &str) -> CoreResult<()> {
        let url = self.endpoint(&format!("jobs/{job_id}/cancel"))?;
        self.client
            .post(url)
            .json(&serde_json::json!({ "reason": reason }))
            .send()
            .await
            .map_err(|err| CoreError::external(SERVICE, "cancel", err))?;
        Ok(())
    }

    async fn has_encoders(&self) -> bool {
        let Ok(url) = self.endpoint("workers") else {
            return false;
        };
        let Ok(response) = self.client.get(url).send().await else {
            return false;
        };
        response
            .json::<WorkersPayload>()
            .await
            .map(|payload| !payload.workers.is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_labels_fall_back_to_pending() {
        assert_eq!(map_status("encoding"), AssignmentStatus::Encoding);
        assert_eq!(map_status("completed"), AssignmentStatus::Completed);
        assert_eq!(map_status("warming_up"), AssignmentStatus::Pending);
    }
}

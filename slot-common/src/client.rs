//! Worker side of the slot protocol.
//!
//! A worker claims a slot once at startup, heartbeats its checkpoint while it scans the slot's
//! range, and marks the slot done when the range is exhausted:
//!
//! ```no_run
//! # async fn run() -> Result<(), slot_common::ClientError> {
//! use envconfig::Envconfig;
//! use slot_common::client::{SlotClient, SlotClientConfig};
//!
//! let config = SlotClientConfig::init_from_env().expect("invalid configuration");
//! let client = SlotClient::from_config(&config)?;
//!
//! let claimed = client.claim(config.total_slots, config.chunk_size).await?;
//! client.heartbeat(claimed.job_id, "4096").await?;
//! client.finish(claimed.job_id, "1000000000000").await?;
//! # Ok(())
//! # }
//! ```
use std::time;

use envconfig::Envconfig;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::allocator::{AllocationRequest, SlotAssignment};
use crate::config::EnvMsDuration;
use crate::error::{ClientError, SlotError};
use crate::lease::{LeasePatch, SlotLease, DONE_STATE, RUNNING_STATE};
use crate::retry::RetryPolicy;
use crate::updater::LeaseUpserted;
use crate::wire::UpsertLeaseBody;

#[derive(Envconfig, Clone)]
pub struct SlotClientConfig {
    #[envconfig(from = "SLOT_API_URL", default = "http://localhost:3400")]
    pub api_url: String,

    #[envconfig(from = "TOTAL_SLOTS", default = "2252")]
    pub total_slots: i64,

    #[envconfig(from = "CHUNK_SIZE", default = "1000000000000")]
    pub chunk_size: i64,

    #[envconfig(from = "REQUEST_TIMEOUT", default = "10000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(from = "MAX_ATTEMPTS", default = "3")]
    pub max_attempts: u32,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,
}

#[derive(Envconfig, Clone)]
pub struct RetryPolicyConfig {
    #[envconfig(from = "RETRY_BACKOFF_COEFFICIENT", default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(from = "RETRY_INITIAL_INTERVAL", default = "500")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(from = "RETRY_MAXIMUM_INTERVAL", default = "10000")]
    pub maximum_interval: EnvMsDuration,
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(config: &RetryPolicyConfig) -> Self {
        RetryPolicy::new(
            config.backoff_coefficient,
            config.initial_interval.0,
            Some(config.maximum_interval.0),
        )
    }
}

/// A slot handed to this worker, with ownership already stamped on the lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedSlot {
    pub job_id: i64,
    /// Where to resume, relative to `start_pos`.
    pub checkpoint_pos: String,
    pub start_pos: String,
    pub end_pos: String,
    pub chunk_size: i64,
    pub assignment: SlotAssignment,
}

/// Bounds of `job_id`'s range. Computed in 128 bits, the product overflows i64 for large chunks.
pub fn slot_bounds(job_id: i64, chunk_size: i64) -> (String, String) {
    let start = i128::from(job_id) * i128::from(chunk_size);
    let end = start + i128::from(chunk_size);
    (start.to_string(), end.to_string())
}

#[derive(Clone)]
pub struct SlotClient {
    client: reqwest::Client,
    base_url: Url,
    retry_policy: RetryPolicy,
    max_attempts: u32,
}

impl SlotClient {
    pub fn new(
        api_url: &str,
        request_timeout: time::Duration,
        retry_policy: RetryPolicy,
        max_attempts: u32,
    ) -> Result<Self, ClientError> {
        let mut base_url = Url::parse(api_url).map_err(|error| ClientError::InvalidUrl {
            url: api_url.to_owned(),
            error,
        })?;
        // Joining onto a path without a trailing slash would replace its last segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(ClientError::ClientBuildError)?;

        Ok(Self {
            client,
            base_url,
            retry_policy,
            max_attempts: max_attempts.max(1),
        })
    }

    pub fn from_config(config: &SlotClientConfig) -> Result<Self, ClientError> {
        Self::new(
            &config.api_url,
            config.request_timeout.0,
            RetryPolicy::from(&config.retry_policy),
            config.max_attempts,
        )
    }

    /// Asks the service for a slot. An empty lease table comes back as `job_id = -1`.
    pub async fn allocate(&self, request: AllocationRequest) -> Result<SlotAssignment, ClientError> {
        let url = self.endpoint("api/slot")?;
        let query = [
            ("total_slots", request.total_slots().to_string()),
            (
                "prefer_active",
                if request.prefer_active() { "1" } else { "0" }.to_string(),
            ),
        ];

        let response = self
            .send("allocate", || self.client.get(url.clone()).query(&query))
            .await?;
        decode(response).await
    }

    pub async fn upsert(&self, job_id: i64, patch: &LeasePatch) -> Result<LeaseUpserted, ClientError> {
        let url = self.endpoint("api/slot/upsert")?;
        let body = UpsertLeaseBody { job_id, patch };

        let response = self
            .send("upsert", || self.client.post(url.clone()).json(&body))
            .await?;
        decode(response).await
    }

    pub async fn list_leases(&self) -> Result<Vec<SlotLease>, ClientError> {
        let url = self.endpoint("api/stride")?;

        let response = self
            .send("list_leases", || self.client.get(url.clone()))
            .await?;
        decode(response).await
    }

    pub async fn get_lease(&self, job_id: i64) -> Result<Option<SlotLease>, ClientError> {
        let url = self.endpoint(&format!("api/stride/{job_id}"))?;

        match self
            .send("get_lease", || self.client.get(url.clone()))
            .await
        {
            Ok(response) => decode(response).await.map(Some),
            Err(ClientError::StatusError { status, .. }) if status == StatusCode::NOT_FOUND => {
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Allocates a slot and stamps this worker as its owner.
    pub async fn claim(&self, total_slots: i64, chunk_size: i64) -> Result<ClaimedSlot, ClientError> {
        if chunk_size < 1 {
            return Err(SlotError::validation(format!(
                "chunk_size must be at least 1, got {chunk_size}"
            ))
            .into());
        }

        let assignment = self
            .allocate(AllocationRequest::new(total_slots, true)?)
            .await?;
        let job_id = assignment.slot_id()?;
        let (start_pos, end_pos) = slot_bounds(job_id, chunk_size);

        let patch = LeasePatch {
            state: Some(RUNNING_STATE.to_owned()),
            checkpoint_pos: Some(assignment.checkpoint_pos.clone()),
            start_pos: Some(start_pos.clone()),
            end_pos: Some(end_pos.clone()),
            chunk_size: Some(chunk_size),
            updated_at: None,
        };
        self.upsert(job_id, &patch).await?;

        debug!(
            job_id,
            mode = assignment.mode.as_str(),
            checkpoint_pos = %assignment.checkpoint_pos,
            "claimed slot"
        );

        Ok(ClaimedSlot {
            job_id,
            checkpoint_pos: assignment.checkpoint_pos.clone(),
            start_pos,
            end_pos,
            chunk_size,
            assignment,
        })
    }

    pub async fn heartbeat(&self, job_id: i64, checkpoint_pos: &str) -> Result<LeaseUpserted, ClientError> {
        self.upsert(job_id, &LeasePatch::running(checkpoint_pos))
            .await
    }

    pub async fn finish(&self, job_id: i64, checkpoint_pos: &str) -> Result<LeaseUpserted, ClientError> {
        let patch = LeasePatch {
            state: Some(DONE_STATE.to_owned()),
            checkpoint_pos: Some(checkpoint_pos.to_owned()),
            ..Default::default()
        };
        self.upsert(job_id, &patch).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|error| ClientError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                error,
            })
    }

    /// Sends the request built by `build`, rebuilding it for every retry.
    async fn send<F>(&self, operation: &str, build: F) -> Result<Response, ClientError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let result = match build().send().await {
                Ok(response) => check_status(response).await,
                Err(error) => Err(ClientError::RequestError(error)),
            };

            match result {
                Err(error) if error.is_retryable() && attempt + 1 < self.max_attempts => {
                    let wait = self.retry_policy.time_until_next_retry(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        "slot api call failed, retrying in {:?}: {}",
                        wait,
                        error
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::StatusError { status, body })
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    response.json::<T>().await.map_err(ClientError::DecodeError)
}

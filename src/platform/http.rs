//! HTTP client for the orchestration platform endpoint
//!
//! Speaks the platform's task API:
//!
//! - `POST {base}/regions/{region}/tasks` requests task launches and returns
//!   the granted handles
//! - `POST {base}/regions/{region}/tasks/describe` reports task statuses
//!
//! Each request carries its own timeout, independent of the run deadline
//! enforced by the poller.

use super::{classify_http_status, PlatformError, TaskPlatform};
use crate::status::TaskStatus;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-request timeout for platform calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP implementation of [`TaskPlatform`]
pub struct HttpPlatform {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPlatform {
    /// Create a client for the given platform endpoint
    pub fn new(base_url: &str) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PlatformError::Api {
                code: "client-init".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        region: &str,
        path: &str,
        body: &B,
    ) -> Result<T, PlatformError> {
        let url = format!("{}/regions/{}/{}", self.base_url, region, path);
        debug!(url = %url, "platform request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(classify_http_status(status.as_u16(), region, message));
        }

        response.json::<T>().await.map_err(|e| PlatformError::Api {
            code: "malformed-response".to_string(),
            message: e.to_string(),
        })
    }
}

/// Map a transport-level reqwest error onto the platform taxonomy
fn from_reqwest(e: reqwest::Error) -> PlatformError {
    if e.is_connect() || e.is_timeout() {
        PlatformError::Unavailable {
            message: e.to_string(),
        }
    } else {
        PlatformError::Api {
            code: "transport".to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Serialize)]
struct LaunchBody<'a> {
    image: &'a str,
    count: u32,
    tags: BTreeMap<&'a str, &'a str>,
}

#[derive(Deserialize)]
struct LaunchReply {
    task_handles: Vec<String>,
}

#[derive(Serialize)]
struct DescribeBody<'a> {
    handles: &'a [String],
}

#[derive(Deserialize)]
struct DescribeReply {
    tasks: Vec<DescribedTask>,
}

#[derive(Deserialize)]
struct DescribedTask {
    handle: String,
    status: String,
}

#[async_trait]
impl TaskPlatform for HttpPlatform {
    async fn launch(
        &self,
        region: &str,
        image: &str,
        count: u32,
        tags: &[(String, String)],
    ) -> Result<Vec<String>, PlatformError> {
        let body = LaunchBody {
            image,
            count,
            tags: tags.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect(),
        };

        let reply: LaunchReply = self.post(region, "tasks", &body).await?;
        Ok(reply.task_handles)
    }

    async fn describe(
        &self,
        region: &str,
        handles: &[String],
    ) -> Result<Vec<(String, TaskStatus)>, PlatformError> {
        let body = DescribeBody { handles };
        let reply: DescribeReply = self.post(region, "tasks/describe", &body).await?;

        Ok(reply
            .tasks
            .into_iter()
            .map(|task| {
                let status = TaskStatus::from_str(&task.status).unwrap_or_else(|| {
                    warn!(
                        region = %region,
                        handle = %task.handle,
                        status = %task.status,
                        "unrecognized task status from platform"
                    );
                    TaskStatus::Unknown
                });
                (task.handle, status)
            })
            .collect())
    }
}

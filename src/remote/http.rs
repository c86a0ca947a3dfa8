use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::error::RemoteError;
use crate::types::{
    CreateTaskPayload, CustomFieldEntry, FieldValue, RecordId, TaskPatch, TaskRecord,
};

use super::RemoteStore;

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// JSON-over-HTTP backend client.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CreatedBody {
    id: RecordId,
}

impl HttpRemote {
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| RemoteError::new("CLIENT_INIT_FAILED", err.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn fetch_task(&self, id: &RecordId) -> Result<TaskRecord, RemoteError> {
        let url = self.url(&["tasks", id.as_str()]);
        let response = self.send(self.client.get(&url), &url).await?;
        decode(response, &url).await
    }

    pub async fn fetch_custom_fields(
        &self,
        task_id: &RecordId,
    ) -> Result<Vec<CustomFieldEntry>, RemoteError> {
        let url = self.url(&["tasks", task_id.as_str(), "custom-fields"]);
        let response = self.send(self.client.get(&url), &url).await?;
        decode(response, &url).await
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|err| RemoteError::new("REQUEST_FAILED", format!("{url}: {err}")))?;

        let status = response.status();
        debug!(url, status = status.as_u16(), "backend responded");
        if status.is_success() {
            return Ok(response);
        }

        Err(status_error(status, url))
    }

    async fn write(
        &self,
        method: Method,
        url: &str,
        body: &impl serde::Serialize,
    ) -> Result<Response, RemoteError> {
        self.send(self.client.request(method, url).json(body), url)
            .await
    }
}

impl RemoteStore for HttpRemote {
    async fn create_task(&self, payload: &CreateTaskPayload) -> Result<RecordId, RemoteError> {
        let url = self.url(&["tasks"]);
        let response = self.write(Method::POST, &url, payload).await?;
        let created: CreatedBody = decode(response, &url).await?;
        Ok(created.id)
    }

    async fn update_task(&self, id: &RecordId, patch: &TaskPatch) -> Result<(), RemoteError> {
        let url = self.url(&["tasks", id.as_str()]);
        self.write(Method::PATCH, &url, patch).await?;
        Ok(())
    }

    async fn delete_task(&self, id: &RecordId) -> Result<(), RemoteError> {
        let url = self.url(&["tasks", id.as_str()]);
        self.send(self.client.delete(&url), &url).await?;
        Ok(())
    }

    async fn create_field_value(
        &self,
        task_id: &RecordId,
        definition_id: &RecordId,
        value: &FieldValue,
    ) -> Result<RecordId, RemoteError> {
        let url = self.url(&[
            "tasks",
            task_id.as_str(),
            "custom-fields",
            definition_id.as_str(),
        ]);
        let response = self
            .write(Method::POST, &url, &json!({ "value": value }))
            .await?;
        let created: CreatedBody = decode(response, &url).await?;
        Ok(created.id)
    }

    async fn update_field_value(
        &self,
        value_id: &RecordId,
        value: &FieldValue,
    ) -> Result<(), RemoteError> {
        let url = self.url(&["custom-field-values", value_id.as_str()]);
        self.write(Method::PATCH, &url, &json!({ "value": value }))
            .await?;
        Ok(())
    }
}

fn status_error(status: StatusCode, url: &str) -> RemoteError {
    let code = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "AUTH_ERROR",
        StatusCode::NOT_FOUND => "NOT_FOUND",
        _ => "HTTP_ERROR",
    };
    RemoteError::new(
        code,
        format!("backend returned HTTP {} for {url}", status.as_u16()),
    )
}

async fn decode<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, RemoteError> {
    response
        .json::<T>()
        .await
        .map_err(|err| RemoteError::new("DECODE_FAILED", format!("{url}: {err}")))
}

//! Cron gateway client.
//!
//! The gateway schedules the periodic polling that drives agents to call
//! `claim`. The core treats it as a black-box HTTP endpoint: one POST of
//! `{ tool: "cron", args: { action, job? } }` with an optional bearer
//! token. Every response field beyond `ok` and `error.message` is opaque.
//! Gateway failures never affect run state; callers log and surface them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    tool: &'a str,
    args: CronArgs<'a>,
}

#[derive(Debug, Serialize)]
struct CronArgs<'a> {
    action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<&'a Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayResponse {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<GatewayErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayErrorBody {
    #[serde(default)]
    pub message: String,
}

#[derive(Clone)]
pub struct CronGateway {
    client: reqwest::Client,
    endpoint: Option<String>,
    token: Option<String>,
}

impl CronGateway {
    pub fn new(endpoint: Option<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            endpoint,
            token,
        }
    }

    /// Endpoint and token from `ANTFARM_GATEWAY_URL` / `ANTFARM_GATEWAY_TOKEN`.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("ANTFARM_GATEWAY_URL").ok(),
            std::env::var("ANTFARM_GATEWAY_TOKEN").ok(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    pub async fn add_job(&self, job: &Value) -> Result<Value, CoreError> {
        self.call("add", Some(job)).await
    }

    pub async fn remove_job(&self, job: &Value) -> Result<Value, CoreError> {
        self.call("remove", Some(job)).await
    }

    pub async fn list_jobs(&self) -> Result<Value, CoreError> {
        self.call("list", None).await
    }

    async fn call(&self, action: &str, job: Option<&Value>) -> Result<Value, CoreError> {
        let Some(endpoint) = &self.endpoint else {
            return Err(CoreError::Gateway(
                "no gateway endpoint configured".to_string(),
            ));
        };

        let mut request = self.client.post(endpoint).json(&GatewayRequest {
            tool: "cron",
            args: CronArgs { action, job },
        });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CoreError::Gateway(e.to_string()))?;
        let body: GatewayResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Gateway(format!("malformed gateway response: {}", e)))?;

        if !body.ok {
            let message = body
                .error
                .map(|e| e.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "gateway returned ok=false".to_string());
            return Err(CoreError::Gateway(message));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

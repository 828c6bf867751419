use crate::utils::error::{AppError, Result};
use crate::utils::retry::RetryPolicy;
use reqwest::{Client, Method};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Station ids requested from the 5-minute averages endpoint.
pub const STATION_NUMBERS: [u32; 5] = [13, 14, 15, 17, 18];

pub type RawRecord = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StationBlock {
    #[serde(default)]
    pub data: Option<Vec<RawRecord>>,
}

/// Client for the qHAWAX REST API.
#[derive(Debug, Clone)]
pub struct QhawaxClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl QhawaxClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::qhawax_default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Logs in and returns the `jwt` of the response.
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let url = format!("{}/api/v2/login/", self.base_url);
        let body = serde_json::json!({ "email": email, "password": password });
        let response = self
            .request_json(Method::POST, &url, None, &[], Some(&body))
            .await?;

        response
            .get("jwt")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::processing("The 'jwt' key was not found in the JSON response.")
            })
    }

    /// 5-minute averages of every station for the window, keyed by station id.
    pub async fn fetch_five_minute_averages(
        &self,
        token: &str,
        initial_timestamp: &str,
        final_timestamp: &str,
        stations: &[u32],
    ) -> Result<BTreeMap<String, Vec<StationBlock>>> {
        let ids = stations
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/api/external/get_promedio_5min_qhawax_all/", self.base_url);
        let query = [
            ("initial_timestamp", initial_timestamp),
            ("final_timestamp", final_timestamp),
            ("qhawax_ids", ids.as_str()),
        ];

        let mut response = self
            .request_json(Method::GET, &url, Some(token), &query, None)
            .await?;
        let data = response
            .get_mut("data")
            .map(serde_json::Value::take)
            .ok_or_else(|| AppError::processing("The 'data' key was not found in the JSON response."))?;

        Ok(serde_json::from_value(data)?)
    }

    async fn request_json(
        &self,
        method: Method,
        url: &str,
        bearer: Option<&str>,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.retry
            .run(&format!("{} {}", method, url), |_| {
                let mut request = self.client.request(method.clone(), url).query(query);
                if let Some(token) = bearer {
                    request = request.bearer_auth(token);
                }
                if let Some(body) = body {
                    request = request.json(body);
                }
                async move {
                    let response = request.send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(AppError::UpstreamStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                    Ok(response.json::<serde_json::Value>().await?)
                }
            })
            .await
    }
}

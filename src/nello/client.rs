//! nello public API client

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::NelloConfig;
use crate::models::{ApiLocation, TimeWindow, TimeWindowRequest};

/// Webhook actions the bridge asks nello to deliver
const WEBHOOK_ACTIONS: [&str; 4] = ["swipe", "geo", "tw", "deny"];

/// Operations the bridge needs from the lock vendor
#[async_trait]
pub trait LockApi: Send + Sync {
    async fn get_locations(&self) -> Result<Vec<ApiLocation>, String>;

    async fn get_time_windows(&self, location_id: &str) -> Result<Vec<TimeWindow>, String>;

    /// Returns the id of the created time window
    async fn create_time_window(
        &self,
        location_id: &str,
        request: &TimeWindowRequest,
    ) -> Result<String, String>;

    async fn delete_time_window(&self, location_id: &str, time_window_id: &str)
        -> Result<(), String>;

    async fn open_door(&self, location_id: &str) -> Result<(), String>;

    /// Register `url` as webhook target; returns the URL nello accepted
    async fn attach_webhook(&self, location_id: &str, url: &str) -> Result<String, String>;
}

/// OAuth token as issued by the nello auth server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub token_type: String,
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NelloResponse<T> {
    result: ResultInfo,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    success: bool,
    message: Option<String>,
    status: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct CreatedTimeWindow {
    id: String,
}

pub struct NelloClient {
    base_url: String,
    authorization: String,
    http_client: Client,
}

impl NelloClient {
    pub fn new(config: &NelloConfig) -> Result<Self, String> {
        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            authorization: format!("{} {}", config.token_type, config.access_token),
            http_client: build_http_client()?,
        })
    }

    /// Exchange client credentials for an access token
    pub async fn request_token(
        auth_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Token, String> {
        let http_client = build_http_client()?;
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];

        let resp = http_client
            .post(auth_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| format!("Token request failed: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("Token request rejected ({}): {}", status, body));
        }

        let token: Token = resp
            .json()
            .await
            .map_err(|e| format!("Token parse failed: {}", e))?;

        tracing::info!(
            "[Nello] Token acquired, expires in {} sec",
            token.expires_in.unwrap_or_default()
        );
        Ok(token)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<T>, String> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http_client
            .request(method.clone(), &url)
            .header("Authorization", &self.authorization);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| format!("{} {} failed: {}", method, path, e))?;

        let http_status = resp.status();
        let result: NelloResponse<T> = resp
            .json()
            .await
            .map_err(|e| format!("{} {} parse failed ({}): {}", method, path, http_status, e))?;

        if !result.result.success {
            return Err(format!(
                "{} (status {})",
                result.result.message.unwrap_or_else(|| "Unknown error".into()),
                result.result.status.unwrap_or(http_status.as_u16())
            ));
        }

        Ok(result.data)
    }
}

fn build_http_client() -> Result<Client, String> {
    Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .connect_timeout(std::time::Duration::from_secs(5))
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {}", e))
}

#[async_trait]
impl LockApi for NelloClient {
    async fn get_locations(&self) -> Result<Vec<ApiLocation>, String> {
        let locations = self
            .request::<Vec<ApiLocation>>(Method::GET, "/locations/", None)
            .await?;
        Ok(locations.unwrap_or_default())
    }

    async fn get_time_windows(&self, location_id: &str) -> Result<Vec<TimeWindow>, String> {
        let path = format!("/locations/{}/tw/", location_id);
        let windows = self
            .request::<Vec<TimeWindow>>(Method::GET, &path, None)
            .await?;
        Ok(windows.unwrap_or_default())
    }

    async fn create_time_window(
        &self,
        location_id: &str,
        request: &TimeWindowRequest,
    ) -> Result<String, String> {
        let path = format!("/locations/{}/tw/", location_id);
        let body = serde_json::to_value(request).map_err(|e| e.to_string())?;
        let created = self
            .request::<CreatedTimeWindow>(Method::POST, &path, Some(body))
            .await?
            .ok_or("No time window in response")?;
        Ok(created.id)
    }

    async fn delete_time_window(
        &self,
        location_id: &str,
        time_window_id: &str,
    ) -> Result<(), String> {
        let path = format!("/locations/{}/tw/{}/", location_id, time_window_id);
        self.request::<Value>(Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn open_door(&self, location_id: &str) -> Result<(), String> {
        let path = format!("/locations/{}/open/", location_id);
        self.request::<Value>(Method::PUT, &path, None).await?;
        Ok(())
    }

    async fn attach_webhook(&self, location_id: &str, url: &str) -> Result<String, String> {
        let path = format!("/locations/{}/webhook/", location_id);
        let body = serde_json::json!({
            "url": url,
            "actions": WEBHOOK_ACTIONS,
        });
        self.request::<Value>(Method::PUT, &path, Some(body)).await?;
        Ok(url.to_string())
    }
}

/// Port the DynDNS listener has to bind for a webhook URL
pub fn listener_port(url: &str) -> Option<u16> {
    url::Url::parse(url).ok()?.port_or_known_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_port() {
        assert_eq!(listener_port("http://home.example.org:9000/hook"), Some(9000));
        assert_eq!(listener_port("https://home.example.org/hook"), Some(443));
        assert_eq!(listener_port("not a url"), None);
    }

    #[test]
    fn test_response_envelope() {
        let raw = r#"{"result":{"success":false,"message":"Not Found","status":404},"data":null}"#;
        let resp: NelloResponse<Value> = serde_json::from_str(raw).unwrap();
        assert!(!resp.result.success);
        assert_eq!(resp.result.message.as_deref(), Some("Not Found"));
        assert!(resp.data.is_none());
    }

    #[test]
    fn test_time_windows_payload() {
        let raw = r#"{"result":{"success":true},"data":[{"id":"a","name":"A","enabled":true,"state":1,"image":null,"ical":{"_raw":"BEGIN:VCALENDAR"}}]}"#;
        let resp: NelloResponse<Vec<TimeWindow>> = serde_json::from_str(raw).unwrap();
        let windows = resp.data.unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].id, "a");
    }

    #[test]
    fn test_client_authorization_header() {
        let config = NelloConfig {
            token_type: "Bearer".into(),
            access_token: "abc".into(),
            api_url: "https://public-api.nello.io/v1/".into(),
            ..Default::default()
        };
        let client = tokio_test::assert_ok!(NelloClient::new(&config));
        assert_eq!(client.authorization, "Bearer abc");
        assert_eq!(client.base_url, "https://public-api.nello.io/v1");
    }
}

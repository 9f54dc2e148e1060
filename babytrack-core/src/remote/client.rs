//! HTTP/JSON client for the Babytrack backend.

use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::error::RemoteError;
use super::rows::{BabyRow, EntryRow, ErrorBody};
use super::{EntryQuery, RemoteStore};
use crate::export::DateRange;
use crate::identity::{Caregiver, MeResponse};
use crate::models::{Baby, BabyUpdate, Entry, EntryUpdate, NewBaby, NewEntry};

/// Timeout applied to every request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for the reachability check.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Returns true if the server answers its health check.
pub async fn check_server(server_url: &str) -> bool {
    let url = format!("{}/health", http_base(server_url));
    match reqwest::Client::new()
        .get(&url)
        .timeout(HEALTH_TIMEOUT)
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Remote store backed by the Babytrack REST API.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    server_url: String,
    client: reqwest::Client,
}

impl HttpRemoteStore {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Fetches the identity behind a token.
    pub async fn me(&self, who: &Caregiver) -> Result<MeResponse, RemoteError> {
        let request = self.client.get(self.build_http_url("/me"));
        read_json(self.send(request, who).await?).await
    }

    /// Builds the WebSocket URL of a baby's change feed.
    pub fn build_ws_url(&self, baby_id: Uuid, token: &str) -> String {
        realtime_url(&self.server_url, baby_id, token)
    }

    /// Builds an HTTP URL for a given path.
    fn build_http_url(&self, path: &str) -> String {
        format!("{}{}", http_base(&self.server_url), path)
    }

    async fn send(&self, request: RequestBuilder, who: &Caregiver) -> Result<Response, RemoteError> {
        let response = request
            .bearer_auth(&who.token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        Err(RemoteError::from_status(status.as_u16(), message))
    }
}

/// WebSocket URL of a baby's change feed on the given server.
pub fn realtime_url(server_url: &str, baby_id: Uuid, token: &str) -> String {
    let base_url = if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if !server_url.starts_with("ws://") && !server_url.starts_with("wss://") {
        format!("ws://{}", server_url)
    } else {
        server_url.to_string()
    };

    format!(
        "{}/realtime/{}?key={}",
        base_url.trim_end_matches('/'),
        baby_id,
        urlencoding::encode(token)
    )
}

fn http_base(server_url: &str) -> String {
    let base_url = if server_url.starts_with("ws://") {
        server_url.replacen("ws://", "http://", 1)
    } else if server_url.starts_with("wss://") {
        server_url.replacen("wss://", "https://", 1)
    } else if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
        format!("http://{}", server_url)
    } else {
        server_url.to_string()
    };
    base_url.trim_end_matches('/').to_string()
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    response
        .json::<T>()
        .await
        .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
}

async fn read_entry(response: Response) -> Result<Entry, RemoteError> {
    let row: EntryRow = read_json(response).await?;
    Entry::try_from(row).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
}

async fn read_baby(response: Response) -> Result<Baby, RemoteError> {
    let row: BabyRow = read_json(response).await?;
    Ok(row.into())
}

impl RemoteStore for HttpRemoteStore {
    async fn list_babies(&self, who: &Caregiver) -> Result<Vec<Baby>, RemoteError> {
        let request = self.client.get(self.build_http_url("/babies"));
        let rows: Vec<BabyRow> = read_json(self.send(request, who).await?).await?;
        Ok(rows.into_iter().map(Baby::from).collect())
    }

    async fn get_baby(&self, who: &Caregiver, id: Uuid) -> Result<Baby, RemoteError> {
        let request = self.client.get(self.build_http_url(&format!("/babies/{}", id)));
        read_baby(self.send(request, who).await?).await
    }

    async fn create_baby(&self, who: &Caregiver, new: &NewBaby) -> Result<Baby, RemoteError> {
        let request = self.client.post(self.build_http_url("/babies")).json(new);
        read_baby(self.send(request, who).await?).await
    }

    async fn update_baby(
        &self,
        who: &Caregiver,
        id: Uuid,
        update: &BabyUpdate,
    ) -> Result<Baby, RemoteError> {
        let request = self
            .client
            .patch(self.build_http_url(&format!("/babies/{}", id)))
            .json(update);
        read_baby(self.send(request, who).await?).await
    }

    async fn delete_baby(&self, who: &Caregiver, id: Uuid) -> Result<(), RemoteError> {
        let request = self
            .client
            .delete(self.build_http_url(&format!("/babies/{}", id)));
        self.send(request, who).await?;
        Ok(())
    }

    async fn upsert_baby(&self, who: &Caregiver, baby: &Baby) -> Result<Baby, RemoteError> {
        let request = self
            .client
            .put(self.build_http_url(&format!("/babies/{}", baby.id)))
            .json(&BabyRow::from(baby));
        read_baby(self.send(request, who).await?).await
    }

    async fn list_entries(
        &self,
        who: &Caregiver,
        baby_id: Uuid,
        query: &EntryQuery,
    ) -> Result<Vec<Entry>, RemoteError> {
        let request = self
            .client
            .get(self.build_http_url(&format!("/babies/{}/entries", baby_id)))
            .query(query);
        let rows: Vec<EntryRow> = read_json(self.send(request, who).await?).await?;
        rows.into_iter()
            .map(|row| Entry::try_from(row).map_err(|e| RemoteError::InvalidResponse(e.to_string())))
            .collect()
    }

    async fn get_entry(&self, who: &Caregiver, id: Uuid) -> Result<Entry, RemoteError> {
        let request = self
            .client
            .get(self.build_http_url(&format!("/entries/{}", id)));
        read_entry(self.send(request, who).await?).await
    }

    async fn create_entry(&self, who: &Caregiver, new: &NewEntry) -> Result<Entry, RemoteError> {
        let request = self.client.post(self.build_http_url("/entries")).json(new);
        read_entry(self.send(request, who).await?).await
    }

    async fn update_entry(
        &self,
        who: &Caregiver,
        id: Uuid,
        update: &EntryUpdate,
    ) -> Result<Entry, RemoteError> {
        let request = self
            .client
            .patch(self.build_http_url(&format!("/entries/{}", id)))
            .json(update);
        read_entry(self.send(request, who).await?).await
    }

    async fn delete_entry(&self, who: &Caregiver, id: Uuid) -> Result<(), RemoteError> {
        let request = self
            .client
            .delete(self.build_http_url(&format!("/entries/{}", id)));
        self.send(request, who).await?;
        Ok(())
    }

    async fn upsert_entry(&self, who: &Caregiver, entry: &Entry) -> Result<Entry, RemoteError> {
        let request = self
            .client
            .put(self.build_http_url(&format!("/entries/{}", entry.id)))
            .json(&EntryRow::from(entry));
        read_entry(self.send(request, who).await?).await
    }

    async fn export_csv(
        &self,
        who: &Caregiver,
        baby_id: Uuid,
        range: &DateRange,
    ) -> Result<String, RemoteError> {
        let request = self
            .client
            .get(self.build_http_url(&format!("/babies/{}/export.csv", baby_id)))
            .query(range);
        let response = self.send(request, who).await?;
        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ws_url() {
        let baby_id = Uuid::nil();
        let client = HttpRemoteStore::new("http://localhost:8080");
        assert_eq!(
            client.build_ws_url(baby_id, "test-key"),
            format!("ws://localhost:8080/realtime/{}?key=test-key", baby_id)
        );

        let client = HttpRemoteStore::new("https://babytrack.example.com/");
        assert_eq!(
            client.build_ws_url(baby_id, "a b"),
            format!("wss://babytrack.example.com/realtime/{}?key=a%20b", baby_id)
        );

        let client = HttpRemoteStore::new("localhost:8080");
        assert!(client
            .build_ws_url(baby_id, "k")
            .starts_with("ws://localhost:8080/realtime/"));
    }

    #[test]
    fn test_build_http_url() {
        let client = HttpRemoteStore::new("http://localhost:8080");
        assert_eq!(client.build_http_url("/me"), "http://localhost:8080/me");

        let client = HttpRemoteStore::new("ws://localhost:8080");
        assert_eq!(client.build_http_url("/me"), "http://localhost:8080/me");

        let client = HttpRemoteStore::new("wss://babytrack.example.com/");
        assert_eq!(
            client.build_http_url("/babies"),
            "https://babytrack.example.com/babies"
        );

        let client = HttpRemoteStore::new("localhost:8080");
        assert_eq!(client.build_http_url("/health"), "http://localhost:8080/health");
    }

    #[tokio::test]
    async fn test_check_server_unreachable() {
        // Port 9 (discard) is closed on test hosts.
        assert!(!check_server("http://127.0.0.1:9").await);
    }

    #[tokio::test]
    async fn test_unreachable_is_network_unavailable() {
        let client = HttpRemoteStore::new("http://127.0.0.1:9");
        let who = Caregiver::new("cg", "key");
        let err = client.list_babies(&who).await.unwrap_err();
        assert!(matches!(err, RemoteError::NetworkUnavailable(_)));
        assert!(err.is_transient());
    }
}

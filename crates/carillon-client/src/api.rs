//! REST collaborators: snapshot fetch and server-side read marking.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use carillon_shared::credentials::CredentialSource;
use carillon_shared::protocol::Notification;
use carillon_shared::types::{Credentials, UserId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { status: StatusCode, url: String },

    #[error("Not authenticated")]
    Unauthenticated,
}

/// Backend calls the notification feed relies on.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn fetch_snapshot(&self, user_id: UserId) -> Result<Vec<Notification>, ApiError>;

    async fn mark_read(&self, id: i64) -> Result<(), ApiError>;

    async fn mark_all_read(&self, user_id: UserId) -> Result<(), ApiError>;
}

/// `reqwest` implementation against the backend's notification endpoints.
#[derive(Clone)]
pub struct RestNotificationApi {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl std::fmt::Debug for RestNotificationApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestNotificationApi")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl RestNotificationApi {
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialSource>) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn credentials(&self) -> Result<Credentials, ApiError> {
        self.credentials.credentials().ok_or(ApiError::Unauthenticated)
    }

    async fn put(&self, url: String) -> Result<(), ApiError> {
        let credentials = self.credentials()?;
        let response = self
            .client
            .put(&url)
            .bearer_auth(&credentials.token)
            .send()
            .await?;
        check_status(response.status(), url)
    }
}

#[async_trait]
impl NotificationApi for RestNotificationApi {
    async fn fetch_snapshot(&self, user_id: UserId) -> Result<Vec<Notification>, ApiError> {
        let credentials = self.credentials()?;
        let url = self.url(&format!("/notifications/user/{user_id}"));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&credentials.token)
            .send()
            .await?;
        check_status(response.status(), url)?;

        let notifications: Vec<Notification> = response.json().await?;
        debug!(user_id = %user_id, count = notifications.len(), "Fetched notification snapshot");
        Ok(notifications)
    }

    async fn mark_read(&self, id: i64) -> Result<(), ApiError> {
        self.put(self.url(&format!("/notifications/{id}/read"))).await
    }

    async fn mark_all_read(&self, user_id: UserId) -> Result<(), ApiError> {
        self.put(self.url(&format!("/notifications/user/{user_id}/read-all")))
            .await
    }
}

fn check_status(status: StatusCode, url: String) -> Result<(), ApiError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ApiError::Status { status, url })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::Mutex;

    use tokio::sync::Notify;

    use super::*;

    /// Scripted backend. `fetch_snapshot` can be held until `release`.
    #[derive(Default)]
    pub(crate) struct MockApi {
        pub snapshot: Mutex<Vec<Notification>>,
        pub gated: bool,
        pub gate: Notify,
        pub fail_marks: bool,
        pub mark_calls: Mutex<Vec<i64>>,
        pub mark_all_calls: Mutex<Vec<UserId>>,
    }

    impl MockApi {
        pub fn with_snapshot(snapshot: Vec<Notification>) -> Self {
            Self {
                snapshot: Mutex::new(snapshot),
                ..Self::default()
            }
        }

        pub fn release(&self) {
            self.gate.notify_one();
        }

        pub fn mark_calls(&self) -> Vec<i64> {
            self.mark_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationApi for MockApi {
        async fn fetch_snapshot(&self, _user_id: UserId) -> Result<Vec<Notification>, ApiError> {
            if self.gated {
                self.gate.notified().await;
            }
            Ok(self.snapshot.lock().unwrap().clone())
        }

        async fn mark_read(&self, id: i64) -> Result<(), ApiError> {
            self.mark_calls.lock().unwrap().push(id);
            if self.fail_marks {
                return Err(ApiError::Unauthenticated);
            }
            Ok(())
        }

        async fn mark_all_read(&self, user_id: UserId) -> Result<(), ApiError> {
            self.mark_all_calls.lock().unwrap().push(user_id);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carillon_shared::credentials::StaticCredentials;

    #[test]
    fn test_urls_are_normalized() {
        let credentials = Arc::new(StaticCredentials::anonymous());
        let api = RestNotificationApi::new("http://localhost:8080/api/", credentials).unwrap();
        assert_eq!(
            api.url("/notifications/user/4"),
            "http://localhost:8080/api/notifications/user/4"
        );
    }

    #[tokio::test]
    async fn test_requests_need_credentials() {
        let credentials = Arc::new(StaticCredentials::anonymous());
        let api = RestNotificationApi::new("http://localhost:9/api", credentials).unwrap();
        assert!(matches!(
            api.fetch_snapshot(UserId(1)).await,
            Err(ApiError::Unauthenticated)
        ));
        assert!(matches!(api.mark_read(3).await, Err(ApiError::Unauthenticated)));
    }
}

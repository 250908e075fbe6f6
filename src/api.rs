use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

use crate::config::ClientConfig;
use crate::models::{Identity, Message, Room};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },
}

/// The REST directory service: identities, rooms and room history.
#[async_trait]
pub trait RoomApi: Send + Sync {
    /// Mints (or re-validates) the identity for `username`.
    async fn register_username(&self, username: &str) -> Result<Identity, ApiError>;
    async fn list_rooms(&self) -> Result<Vec<Room>, ApiError>;
    async fn create_room(&self, name: &str) -> Result<Room, ApiError>;
    /// Room history, newest first.
    async fn room_messages(&self, room_id: &str) -> Result<Vec<Message>, ApiError>;
}

pub struct HttpApi {
    base_url: String,
    client: Client,
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(HttpApi {
            base_url: config.api_url.clone(),
            client,
        })
    }

    async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(ApiError::Server {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl RoomApi for HttpApi {
    async fn register_username(&self, username: &str) -> Result<Identity, ApiError> {
        let url = format!("{}/chat/username", self.base_url);
        log::debug!("Registering username {username}");
        let response = self
            .client
            .post(&url)
            .json(&json!({ "username": username }))
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, ApiError> {
        let url = format!("{}/chat/rooms", self.base_url);
        let response = self.client.get(&url).send().await?;
        Self::handle_response(response).await
    }

    async fn create_room(&self, name: &str) -> Result<Room, ApiError> {
        let url = format!("{}/chat/rooms", self.base_url);
        log::debug!("Creating room {name}");
        let response = self
            .client
            .post(&url)
            .json(&json!({ "name": name }))
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn room_messages(&self, room_id: &str) -> Result<Vec<Message>, ApiError> {
        let url = format!(
            "{}/chat/rooms/{}/messages",
            self.base_url,
            urlencoding::encode(room_id)
        );
        let response = self.client.get(&url).send().await?;
        Self::handle_response(response).await
    }
}

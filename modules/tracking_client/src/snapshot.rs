use crate::error::ClientError;
use ordering::entities::order::Actor;
use ordering::protocol::TrackingSnapshot;
use ordering::rpc::middleware::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
use std::future::Future;
use tracing::instrument;
use uuid::Uuid;

/// Where the view gets a full snapshot when the socket can't be trusted.
pub trait SnapshotSource: Send + Sync {
    fn fetch(&self, order_id: Uuid)
    -> impl Future<Output = Result<TrackingSnapshot, ClientError>> + Send;
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    success: bool,
    data: Option<TrackingSnapshot>,
    error_code: Option<String>,
    message: Option<String>,
}

/// `GET /order/track/{id}` against the fulfillment server.
#[derive(Clone)]
pub struct RestSnapshotClient {
    http: reqwest::Client,
    base_url: String,
    actor: Actor,
}

impl RestSnapshotClient {
    pub fn new(base_url: impl Into<String>, actor: Actor) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            actor,
        }
    }

    fn role(&self) -> &'static str {
        use ordering::entities::order::ActorRole;
        match self.actor.role {
            ActorRole::Customer => "customer",
            ActorRole::Driver => "driver",
            ActorRole::Staff => "staff",
            ActorRole::Admin | ActorRole::System => "admin",
        }
    }
}

impl SnapshotSource for RestSnapshotClient {
    #[instrument(skip(self), err)]
    async fn fetch(&self, order_id: Uuid) -> Result<TrackingSnapshot, ClientError> {
        let response = self
            .http
            .get(format!("{}/order/track/{order_id}", self.base_url))
            .header(ACTOR_ID_HEADER, self.actor.id.to_string())
            .header(ACTOR_ROLE_HEADER, self.role())
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        let envelope: Envelope = serde_json::from_slice(&body)
            .map_err(|e| ClientError::Decode(format!("status {status}: {e}")))?;
        match envelope {
            Envelope {
                success: true,
                data: Some(snapshot),
                ..
            } => Ok(snapshot),
            Envelope {
                error_code,
                message,
                ..
            } => Err(ClientError::Server {
                code: error_code.unwrap_or_else(|| "SERVER_ERROR".to_owned()),
                message: message.unwrap_or_default(),
            }),
        }
    }
}

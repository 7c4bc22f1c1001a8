//! Actor identity, set by the gateway in front of this service.

use crate::entities::order::{Actor, ActorRole};
use crate::rpc::error::ApiError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request};
use futures::future::BoxFuture;
use uuid::Uuid;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Clone, Copy, Default)]
pub struct ActorLayer;

impl<S> tower::Layer<S> for ActorLayer {
    type Service = ActorMiddleware<S>;
    fn layer(&self, inner: S) -> Self::Service {
        ActorMiddleware { inner }
    }
}

#[derive(Clone)]
pub struct ActorMiddleware<S> {
    inner: S,
}

impl<S, ReqBody> tower::Service<Request<ReqBody>> for ActorMiddleware<S>
where
    S: tower::Service<Request<ReqBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let inner_clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner_clone);
        if let Some(actor) = actor_from_headers(req.headers()) {
            req.extensions_mut().insert(actor);
        }
        Box::pin(async move { inner.call(req).await })
    }
}

fn parse_role(role: &str) -> Option<ActorRole> {
    match role.trim().to_ascii_lowercase().as_str() {
        "customer" | "user" => Some(ActorRole::Customer),
        "driver" => Some(ActorRole::Driver),
        "staff" => Some(ActorRole::Staff),
        "admin" => Some(ActorRole::Admin),
        _ => None,
    }
}

pub fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    let id = headers.get(ACTOR_ID_HEADER)?.to_str().ok()?;
    let role = headers.get(ACTOR_ROLE_HEADER)?.to_str().ok()?;
    Some(Actor {
        id: Uuid::parse_str(id.trim()).ok()?,
        role: parse_role(role)?,
    })
}

/// The identity attached by [`ActorLayer`]. Rejects requests that carried none.
#[derive(Debug, Clone, Copy)]
pub struct CurrentActor(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Actor>()
            .copied()
            .map(CurrentActor)
            .ok_or(ApiError::MissingIdentity)
    }
}

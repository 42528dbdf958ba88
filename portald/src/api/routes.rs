use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tokio::sync::watch;
use crate::store::db::WriteOutcome;
use crate::store_manager::StoreHandle;
use shared::types::{InviteToken, NewPortal, PortalId, PortalListing, VersionedPortal};

#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub hash_rx: watch::Receiver<String>,
}

type ApiError = (StatusCode, String);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/portals", get(list_portals).post(create_portal))
        .route("/v1/portals/hash", get(get_hash))
        .route(
            "/v1/portals/:id",
            get(get_portal).put(update_portal).delete(delete_portal),
        )
        .route("/v1/portals/:id/invites", post(create_invite))
        .with_state(state)
}

fn internal(e: anyhow::Error) -> ApiError {
    tracing::error!("Store request failed: {:#}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "internal store error".to_string())
}

fn validate(new: &NewPortal) -> Result<(), ApiError> {
    if new.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "portal name must not be empty".to_string()));
    }
    if new.address.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "portal address must not be empty".to_string()));
    }
    if new.port == 0 {
        return Err((StatusCode::BAD_REQUEST, "portal port must be non-zero".to_string()));
    }
    Ok(())
}

fn written(
    outcome: WriteOutcome,
    status: StatusCode,
) -> Result<(StatusCode, Json<VersionedPortal>), ApiError> {
    match outcome {
        WriteOutcome::Written(vp) => Ok((status, Json(vp))),
        WriteOutcome::Conflict(reason) => Err((StatusCode::CONFLICT, reason)),
        WriteOutcome::Missing => Err((StatusCode::NOT_FOUND, "no such portal".to_string())),
    }
}

async fn list_portals(State(state): State<AppState>) -> Result<Json<PortalListing>, ApiError> {
    state.store.list().await.map(Json).map_err(internal)
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}

async fn create_portal(
    State(state): State<AppState>,
    Json(new): Json<NewPortal>,
) -> Result<(StatusCode, Json<VersionedPortal>), ApiError> {
    validate(&new)?;
    let outcome = state.store.create(new).await.map_err(internal)?;
    written(outcome, StatusCode::CREATED)
}

async fn get_portal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VersionedPortal>, ApiError> {
    state
        .store
        .get(PortalId(id))
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "no such portal".to_string()))
}

async fn update_portal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(new): Json<NewPortal>,
) -> Result<(StatusCode, Json<VersionedPortal>), ApiError> {
    validate(&new)?;
    let outcome = state.store.update(PortalId(id), new).await.map_err(internal)?;
    written(outcome, StatusCode::OK)
}

async fn delete_portal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.store.delete(PortalId(id)).await.map_err(internal)? {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err((StatusCode::NOT_FOUND, "no such portal".to_string())),
    }
}

async fn create_invite(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<InviteToken>), ApiError> {
    state
        .store
        .invite(PortalId(id))
        .await
        .map_err(internal)?
        .map(|invite| (StatusCode::CREATED, Json(invite)))
        .ok_or((StatusCode::NOT_FOUND, "no such portal".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use crate::store::{db::PortalDb, hash};

    fn app() -> Router {
        let db = PortalDb::open(":memory:").unwrap();
        let (hash_tx, hash_rx) = watch::channel(hash::compute_hash(&[]));
        let store = StoreHandle::spawn(db, hash_tx);
        router(AppState { store, hash_rx })
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    fn portal_json(name: &str, port: u16) -> serde_json::Value {
        serde_json::json!({ "name": name, "address": "127.0.0.1", "port": port })
    }

    async fn create(app: &Router, name: &str, port: u16) -> (StatusCode, Vec<u8>) {
        send(app, Method::POST, "/v1/portals", Some(portal_json(name, port))).await
    }

    #[tokio::test]
    async fn test_create_list_delete() {
        let app = app();

        let (status, body) = create(&app, "db", 5432).await;
        assert_eq!(status, StatusCode::CREATED);
        let created: VersionedPortal = serde_json::from_slice(&body).unwrap();

        let (status, body) = send(&app, Method::GET, "/v1/portals", None).await;
        assert_eq!(status, StatusCode::OK);
        let listing: PortalListing = serde_json::from_slice(&body).unwrap();
        assert_eq!(listing.portals.len(), 1);
        assert_eq!(listing.portals[0].record.id, created.record.id);

        let uri = format!("/v1/portals/{}", created.record.id);
        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_spares_portal_with_same_name() {
        let app = app();
        let (_, body) = create(&app, "db", 5432).await;
        let old: VersionedPortal = serde_json::from_slice(&body).unwrap();
        let (status, body) = create(&app, "db", 5433).await;
        assert_eq!(status, StatusCode::CREATED);
        let new: VersionedPortal = serde_json::from_slice(&body).unwrap();

        let uri = format!("/v1/portals/{}", old.record.id);
        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&app, Method::GET, "/v1/portals", None).await;
        let listing: PortalListing = serde_json::from_slice(&body).unwrap();
        assert_eq!(listing.portals.len(), 1);
        assert_eq!(listing.portals[0].record.id, new.record.id);
    }

    #[tokio::test]
    async fn test_conflict_and_validation() {
        let app = app();
        create(&app, "db", 5432).await;

        let (status, body) = create(&app, "other", 5432).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(String::from_utf8(body).unwrap().contains("127.0.0.1:5432"));

        let (status, _) = create(&app, "zero", 0).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_hash_endpoint_tracks_changes() {
        let app = app();
        let (_, before) = send(&app, Method::GET, "/v1/portals/hash", None).await;

        create(&app, "web", 8080).await;
        // The store thread publishes the hash before replying
        let (_, after) = send(&app, Method::GET, "/v1/portals/hash", None).await;
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_invite_and_get() {
        let app = app();
        let (_, body) = create(&app, "web", 8080).await;
        let created: VersionedPortal = serde_json::from_slice(&body).unwrap();
        let id = created.record.id.as_str();

        let uri = format!("/v1/portals/{}/invites", id);
        let (status, body) = send(&app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::CREATED);
        let invite: InviteToken = serde_json::from_slice(&body).unwrap();
        assert_eq!(invite.portal_id, created.record.id);

        let (status, _) = send(&app, Method::GET, &format!("/v1/portals/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, Method::POST, "/v1/portals/missing/invites", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_keeps_id() {
        let app = app();
        let (_, body) = create(&app, "web", 8080).await;
        let created: VersionedPortal = serde_json::from_slice(&body).unwrap();

        let mut changed = portal_json("web", 8080);
        changed["scheme"] = serde_json::json!("http");
        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/v1/portals/{}", created.record.id),
            Some(changed),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let updated: VersionedPortal = serde_json::from_slice(&body).unwrap();
        assert_eq!(updated.record.id, created.record.id);
        assert!(updated.version > created.version);
    }
}

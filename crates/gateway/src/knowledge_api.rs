//! Knowledge endpoints.
//!
//! Successful responses are `{"status": "success", "data": ...}`; failures are
//! `{"status": "error", "message": ...}` with a matching HTTP status.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct KnowledgeQuery {
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KnowledgeItem {
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddedKnowledge {
    pub id: String,
}

fn success<T: Serialize>(data: T) -> Response {
    Json(json!({ "status": "success", "data": data })).into_response()
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "status": "error", "message": message.into() }))).into_response()
}

/// `GET /api/knowledge?category=` — entries for one category, or all.
pub async fn list_knowledge(
    State(state): State<SharedState>,
    Query(query): Query<KnowledgeQuery>,
) -> Response {
    let category = query.category.as_deref().filter(|c| !c.is_empty());
    let items = state.sessions.knowledge().get(category).await;
    success(items)
}

/// `POST /api/knowledge` — append, persist, then refresh live sessions.
pub async fn add_knowledge(
    State(state): State<SharedState>,
    Json(item): Json<KnowledgeItem>,
) -> Response {
    if item.content.trim().is_empty() {
        return failure(StatusCode::BAD_REQUEST, "content must not be empty");
    }

    let category = item.category.as_deref().filter(|c| !c.is_empty());
    match state.sessions.knowledge().add(item.content, category).await {
        Ok(id) => {
            let refreshed = state.sessions.refresh_all().await;
            info!(id = %id, refreshed, "Knowledge added");
            success(AddedKnowledge { id })
        }
        Err(e) => {
            error!(error = %e, "Failed to add knowledge");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::build_router;
    use crate::test_support::{ReadOnlyStore, state_with_store, test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn post(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/knowledge")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn add_returns_deterministic_ids() {
        let app = build_router(test_state().await);

        let response = app
            .clone()
            .oneshot(post(serde_json::json!({"content": "a", "category": "facts"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"status": "success", "data": {"id": "facts_0"}})
        );

        let response = app
            .oneshot(post(serde_json::json!({"content": "b"})))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["data"]["id"], "general_0");
    }

    #[tokio::test]
    async fn list_by_category_and_all() {
        let state = test_state().await;
        state.sessions.knowledge().add("g", None).await.unwrap();
        state.sessions.knowledge().add("f", Some("facts")).await.unwrap();
        let app = build_router(state);

        let req = Request::builder().uri("/api/knowledge").body(Body::empty()).unwrap();
        let json = json_body(app.clone().oneshot(req).await.unwrap()).await;
        assert_eq!(json, serde_json::json!({"status": "success", "data": ["g", "f"]}));

        let req = Request::builder()
            .uri("/api/knowledge?category=facts")
            .body(Body::empty())
            .unwrap();
        let json = json_body(app.clone().oneshot(req).await.unwrap()).await;
        assert_eq!(json["data"], serde_json::json!(["f"]));

        let req = Request::builder()
            .uri("/api/knowledge?category=unknown")
            .body(Body::empty())
            .unwrap();
        let json = json_body(app.oneshot(req).await.unwrap()).await;
        assert_eq!(json["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn add_refreshes_live_sessions() {
        let state = test_state().await;
        let (session, _) = state.sessions.get_or_create("client").await;
        let app = build_router(state);

        app.oneshot(post(serde_json::json!({"content": "The cafe opens at 8."})))
            .await
            .unwrap();

        let prompt = session.lock().await.system_prompt().unwrap().to_string();
        assert!(prompt.contains("The cafe opens at 8."));
    }

    #[tokio::test]
    async fn storage_failure_is_500() {
        let app = build_router(state_with_store(Arc::new(ReadOnlyStore)).await);
        let response = app.oneshot(post(serde_json::json!({"content": "x"}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(response).await;
        assert_eq!(json["status"], "error");
        assert!(json["message"].as_str().unwrap().contains("read-only"));
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let app = build_router(test_state().await);
        let response = app.oneshot(post(serde_json::json!({"content": "  "}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

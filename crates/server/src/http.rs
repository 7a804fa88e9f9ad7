use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use api::{
    schema::{MutationRoot, QueryRoot},
    Actor, ACTOR_HEADER,
};
use async_graphql::{http::GraphiQLSource, EmptySubscription, Schema};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
    response::Html,
    routing::get,
    Router,
};
use sea_orm::DatabaseConnection;
use tokio::net::TcpListener;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

pub type CrmSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

#[derive(Clone)]
pub struct AppState {
    pub schema: CrmSchema,
    pub db: Arc<DatabaseConnection>,
}

pub async fn serve(addr: SocketAddr, origins: &[String], state: AppState) -> anyhow::Result<()> {
    let router = app_router(state, origins);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "deal pipeline listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

pub fn app_router(state: AppState, origins: &[String]) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/graphiql", get(graphiql))
        .route("/graphql", get(graphql_handler).post(graphql_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(ACTOR_HEADER)])
        .allow_methods([Method::POST, Method::GET])
        .allow_origin(allow_origin)
}

async fn healthz(State(state): State<AppState>) -> &'static str {
    match state.db.ping().await {
        Ok(()) => "ok",
        Err(err) => {
            warn!(error = %err, "database ping failed");
            "degraded"
        }
    }
}

async fn graphql_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: GraphQLRequest,
) -> GraphQLResponse {
    let mut request = req.into_inner();
    if let Some(actor) = actor_from_headers(&headers) {
        request = request.data(actor);
    }
    state.schema.execute(request).await.into()
}

/// A missing or malformed header leaves the request anonymous; mutations
/// then fail with `UNAUTHENTICATED`.
fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    let value = headers.get(ACTOR_HEADER)?.to_str().ok()?;
    let actor = Actor::parse(value);
    if actor.is_none() {
        warn!(header = ACTOR_HEADER, "ignoring malformed actor id");
    }
    actor
}

async fn graphiql() -> Html<String> {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

async fn shutdown_signal() {
    use tokio::signal;
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! { _ = ctrl_c => {}, _ = terminate => {}, }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::build_schema;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn test_router() -> Router {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let db = Arc::new(db);
        let schema = build_schema(db.clone()).0;
        app_router(AppState { schema, db }, &[])
    }

    async fn post_graphql(router: Router, body: Value, actor: Option<&str>) -> Value {
        let mut request = Request::builder()
            .method("POST")
            .uri("/graphql")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(actor) = actor {
            request = request.header(ACTOR_HEADER, actor);
        }
        let response = router
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let response = test_router()
            .await
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn actor_header_authorizes_mutations() {
        let router = test_router().await;
        let mutation = json!({
            "query": "mutation { crm { createCompany(input: { name: \"ACME\" }) { name } } }"
        });

        let anonymous = post_graphql(router.clone(), mutation.clone(), None).await;
        assert_eq!(anonymous["errors"][0]["extensions"]["code"], "UNAUTHENTICATED");

        let malformed = post_graphql(router.clone(), mutation.clone(), Some("not-a-uuid")).await;
        assert_eq!(malformed["errors"][0]["extensions"]["code"], "UNAUTHENTICATED");

        let actor = Uuid::new_v4().to_string();
        let created = post_graphql(router, mutation, Some(&actor)).await;
        assert_eq!(created["data"]["crm"]["createCompany"]["name"], "ACME");
    }
}

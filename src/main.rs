mod http;
mod llm;
mod metrics;
mod models;
mod parse;
mod pipeline;
mod shopping;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State, rejection::JsonRejection},
    http::{
        HeaderName, Method, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use llm::{Gateway, GatewayConfig, HttpGateway};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    AnalyzeStyleRequest, AnalyzeStyleResponse, ApiError, SearchFashionRequest,
    SearchFashionResponse,
};
use pipeline::{PipelineConfig, PipelineError, StylePipeline, UploadedImage};
use serde_json::json;
use shopping::{ItemResolver, PlaceholderResolver, ShoppingPipeline};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{Instrument, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "stylist.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let gateway_config = GatewayConfig::from_env();
    if gateway_config.api_key.is_none() {
        warn!(
            target = "stylist.api",
            "AI_GATEWAY_API_KEY is not configured; pipeline requests will fail until it is set"
        );
    }
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let state = AppState::new(
        Arc::new(HttpGateway::new(gateway_config)),
        Arc::new(PlaceholderResolver::from_env()),
        Arc::new(PipelineConfig::from_env()),
    )
    .with_prometheus(prometheus_handle);

    let app = build_router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "stylist.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    style: StylePipeline,
    shopping: ShoppingPipeline,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    fn new(
        gateway: Arc<dyn Gateway>,
        resolver: Arc<dyn ItemResolver>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        let openapi = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or(json!({"openapi": "3.0.3"}));
        Self {
            style: StylePipeline::new(gateway.clone(), config.clone()),
            shopping: ShoppingPipeline::new(gateway, resolver, config),
            openapi: Arc::new(openapi),
            prometheus_handle: None,
        }
    }

    fn with_prometheus(self, handle: PrometheusHandle) -> Self {
        Self {
            prometheus_handle: Some(handle),
            ..self
        }
    }
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ]);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/analyze-style", post(analyze_style))
        .route("/search-fashion", post(search_fashion))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
///
/// Returns a small JSON payload with `status` and `service`.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "outfit-api-rs",
    }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json((*state.openapi).clone())
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    let body = state
        .prometheus_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(12 * 1024 * 1024)
}

/// Photo + style preference → up to three outfits with generated images.
///
/// - Method: `POST`
/// - Path: `/analyze-style`
/// - Body: `{ image, stylePreference? }`
/// - Response: `{ outfits: [{ image, description, details }] }`
async fn analyze_style(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeStyleRequest>, JsonRejection>,
) -> Result<Json<AnalyzeStyleResponse>, AppError> {
    const ROUTE: &str = "/analyze-style";
    crate::metrics::inc_requests(ROUTE);
    let Json(request) = payload?;

    let span = info_span!("analyze_style", request_id = %Uuid::new_v4());
    let outcome = async move {
        let style = request.style_preference.unwrap_or_default();
        let image = UploadedImage::from_base64(&request.image)?;
        info!(
            target = "stylist.api",
            style = %style,
            mime = image.mime(),
            encoded_len = image.encoded_len(),
            "style analysis invoked"
        );
        state.style.run(&image, style).await
    }
    .instrument(span)
    .await;

    outcome
        .map(|outfits| Json(AnalyzeStyleResponse { outfits }))
        .map_err(|err| AppError::pipeline(ROUTE, err))
}

/// Outfit description → shopping candidates per extracted item.
///
/// - Method: `POST`
/// - Path: `/search-fashion`
/// - Body: `{ description }`
/// - Response: `{ results: [{ item, results: [{ title, link, source }] }] }`
async fn search_fashion(
    State(state): State<AppState>,
    payload: Result<Json<SearchFashionRequest>, JsonRejection>,
) -> Result<Json<SearchFashionResponse>, AppError> {
    const ROUTE: &str = "/search-fashion";
    crate::metrics::inc_requests(ROUTE);
    let Json(request) = payload?;

    let span = info_span!("search_fashion", request_id = %Uuid::new_v4());
    let outcome = async move {
        info!(target = "stylist.api", "fashion search invoked");
        state.shopping.run(&request.description).await
    }
    .instrument(span)
    .await;

    outcome
        .map(|results| Json(SearchFashionResponse { results }))
        .map_err(|err| AppError::pipeline(ROUTE, err))
}

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Pipeline(PipelineError),
}

impl AppError {
    fn pipeline(route: &'static str, err: PipelineError) -> Self {
        crate::metrics::inc_failures(route, err.kind());
        error!(
            target = "stylist.api",
            route,
            kind = err.kind(),
            error = %err,
            "request failed"
        );
        Self::Pipeline(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::Pipeline(err) if err.is_invalid_input() => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            AppError::Pipeline(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };
        (status, Json(ApiError { error: message })).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedGateway;
    use crate::llm::{GatewayError, GatewayReply, RetryPolicy};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    fn app_with(gateway: ScriptedGateway) -> Router {
        let config = Arc::new(PipelineConfig {
            text_model: "text-model".into(),
            image_model: "image-model".into(),
            retry: RetryPolicy::none(),
        });
        build_router(AppState::new(
            Arc::new(gateway),
            Arc::new(PlaceholderResolver::new("https://example.com")),
            config,
        ))
    }

    fn happy_gateway() -> ScriptedGateway {
        ScriptedGateway::new(|request| {
            if request.wants_image() {
                return Ok(GatewayReply::image("data:image/png;base64,QUJD"));
            }
            let prompt = crate::llm::mock::prompt_text(request);
            if prompt.contains("fashion consultant") {
                Ok(GatewayReply::text("Warm undertones."))
            } else if prompt.contains("fashion item extractor") {
                Ok(GatewayReply::text(r#"["linen shirt", "chinos", "loafers"]"#))
            } else {
                Ok(GatewayReply::text(
                    "OUTFIT 1: linen shirt\nOUTFIT 2: denim jacket\nOUTFIT 3: wool coat",
                ))
            }
        })
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<Value>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            None
        } else {
            serde_json::from_slice(&body).ok()
        };
        (status, json)
    }

    fn post_json(path: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = app_with(happy_gateway());
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["status"], "ok");
    }

    #[tokio::test]
    async fn analyze_style_returns_outfits() {
        let app = app_with(happy_gateway());
        let (status, body) = send(
            &app,
            post_json(
                "/analyze-style",
                json!({ "image": PNG_B64, "stylePreference": "Casual" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let outfits = body.unwrap()["outfits"].as_array().unwrap().clone();
        assert_eq!(outfits.len(), 3);
        assert_eq!(outfits[0]["description"], "linen shirt");
        assert_eq!(outfits[2]["image"], "data:image/png;base64,QUJD");
        assert_eq!(outfits[1]["details"]["kind"], "free_text");
    }

    #[tokio::test]
    async fn missing_credential_is_a_500_with_message() {
        let app = app_with(ScriptedGateway::failing(GatewayError::MissingCredential));
        let (status, body) = send(&app, post_json("/analyze-style", json!({ "image": PNG_B64 }))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let error = body.unwrap()["error"].as_str().unwrap().to_string();
        assert!(error.contains("AI_GATEWAY_API_KEY"));
    }

    #[tokio::test]
    async fn unknown_style_preference_is_rejected() {
        let app = app_with(happy_gateway());
        let (status, body) = send(
            &app,
            post_json(
                "/analyze-style",
                json!({ "image": PNG_B64, "stylePreference": "Grunge" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.unwrap()["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_image_is_rejected() {
        let app = app_with(happy_gateway());
        let (status, body) =
            send(&app, post_json("/analyze-style", json!({ "image": "%%%" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.unwrap()["error"].as_str().unwrap().contains("base64"));
    }

    #[tokio::test]
    async fn malformed_json_body_gets_error_shape() {
        let app = app_with(happy_gateway());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/search-fashion")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.unwrap()["error"].is_string());
    }

    #[tokio::test]
    async fn search_fashion_returns_results() {
        let app = app_with(happy_gateway());
        let (status, body) = send(
            &app,
            post_json("/search-fashion", json!({ "description": "linen shirt with chinos" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let results = body.unwrap()["results"].as_array().unwrap().clone();
        let items: Vec<_> = results.iter().map(|r| r["item"].as_str().unwrap()).collect();
        assert_eq!(items, vec!["linen shirt", "chinos", "loafers"]);
        assert_eq!(
            results[0]["results"][0],
            json!({
                "title": "linen shirt - Premium Quality",
                "link": "https://example.com/shop/linen-shirt",
                "source": "Fashion Store",
            })
        );
    }

    #[tokio::test]
    async fn search_fashion_malformed_list_is_500() {
        let app = app_with(ScriptedGateway::new(|_| {
            Ok(GatewayReply::text("not a json array"))
        }));
        let (status, body) =
            send(&app, post_json("/search-fashion", json!({ "description": "a look" }))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.unwrap()["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn preflight_allows_any_origin() {
        let app = app_with(happy_gateway());
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/analyze-style")
            .header("origin", "https://stylist.example")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "authorization, content-type")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        let allowed = headers["access-control-allow-headers"].to_str().unwrap();
        assert!(allowed.contains("authorization"));
        assert!(allowed.contains("apikey"));
    }

    #[tokio::test]
    async fn openapi_document_lists_both_endpoints() {
        let app = app_with(happy_gateway());
        let request = Request::builder()
            .uri("/openapi.json")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let paths = &body.unwrap()["paths"];
        assert!(paths.get("/analyze-style").is_some());
        assert!(paths.get("/search-fashion").is_some());
    }
}

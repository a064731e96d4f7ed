use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::app::CampaignApp;
use crate::campaign::{pledge_tier, CampaignService, PledgeTier, PLEDGE_TIERS};
use crate::config::Config;
use crate::notify::broadcast::{BroadcastError, BroadcastReport, Broadcaster, CampaignEmail};
use crate::payments::etransfer::{etransfer_instructions, EtransferInstructions};
use crate::payments::{create_donation_intent, DonationRequest, PaymentError, PaymentIntent, PaymentProcessor};
use crate::progress::{ProgressData, ProgressTracker};
use crate::types::{CampaignStats, SignatureId};
use crate::workflow::{
    PetitionForm, PetitionOutcome, PetitionWorkflow, PledgeForm, PledgeOutcome, PledgeWorkflow,
    ValidationError, WorkflowError,
};

#[derive(Clone)]
struct ApiState {
    config: Arc<Config>,
    service: CampaignService,
    progress: Arc<ProgressTracker>,
    payments: Arc<dyn PaymentProcessor>,
    broadcaster: Arc<Broadcaster>,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<Value>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    detail: Option<Value>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    fn with_detail(mut self, detail: impl Serialize) -> Self {
        self.detail = serde_json::to_value(detail).ok();
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorBody {
            ok: false,
            error: self.message,
            detail: self.detail,
        });
        (self.status, body).into_response()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(error: WorkflowError) -> Self {
        match &error {
            WorkflowError::Invalid(
                ValidationError::MissingPetitionFields { fields }
                | ValidationError::MissingPledgeContact { fields },
            ) => Self::bad_request(error.to_string()).with_detail(fields),
            WorkflowError::Invalid(_) => Self::bad_request(error.to_string()),
            WorkflowError::NotReady(_) => Self::new(StatusCode::CONFLICT, error.to_string()),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(error: PaymentError) -> Self {
        let status = match &error {
            PaymentError::AmountTooSmall | PaymentError::MissingDonor => StatusCode::BAD_REQUEST,
            PaymentError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            PaymentError::Declined { .. } | PaymentError::Transport(_) => StatusCode::BAD_GATEWAY,
            PaymentError::Malformed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ProgressResponse {
    progress: ProgressData,
    signature_percent: f64,
    pledge_percent: f64,
    email_percent: f64,
}

impl From<ProgressData> for ProgressResponse {
    fn from(progress: ProgressData) -> Self {
        Self {
            signature_percent: progress.signature_percent(),
            pledge_percent: progress.pledge_percent(),
            email_percent: progress.email_percent(),
            progress,
        }
    }
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    refreshed: bool,
    #[serde(flatten)]
    progress: ProgressResponse,
}

#[derive(Debug, Serialize)]
struct SignatureResponse {
    signature_id: SignatureId,
}

#[derive(Debug, Deserialize)]
struct DonationBody {
    #[serde(alias = "amount")]
    amount_cents: i64,
    name: String,
    email: String,
}

pub async fn run_server(app: CampaignApp, bind: SocketAddr) -> Result<()> {
    let mut progress = app.progress_tracker();
    progress.mount().await;
    let state = ApiState {
        config: app.config.clone(),
        service: app.service.clone(),
        progress: Arc::new(progress),
        payments: Arc::new(app.payments()),
        broadcaster: Arc::new(app.broadcaster()),
    };
    let router = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("REST API listening on http://{bind}");
    axum::serve(listener, router).await?;
    Ok(())
}

fn router(state: ApiState) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);
    Router::new()
        .route("/health", get(health))
        .route("/v1/stats", get(stats))
        .route("/v1/progress", get(progress))
        .route("/v1/progress/refresh", post(refresh_progress))
        .route("/v1/signatures", post(sign_petition))
        .route("/v1/pledges", post(pledge))
        .route("/v1/tiers", get(tiers))
        .route("/v1/tiers/:amount", get(tier_for_amount))
        .route("/v1/donations", post(donate))
        .route("/v1/etransfer", get(etransfer))
        .route("/v1/campaigns/email", post(send_campaign_email))
        .route("/v1/config", get(show_config))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let parsed = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin: {origin}");
                None
            }
        })
        .collect::<Vec<_>>();
    layer.allow_origin(AllowOrigin::list(parsed))
}

async fn health() -> Json<ApiResponse<HealthResponse>> {
    ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn show_config(State(state): State<ApiState>) -> Json<ApiResponse<Config>> {
    ok(state.config.redacted())
}

async fn stats(State(state): State<ApiState>) -> ApiResult<CampaignStats> {
    state
        .service
        .get_campaign_stats()
        .await
        .map(ok)
        .ok_or_else(|| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "campaign statistics are unavailable"))
}

async fn progress(State(state): State<ApiState>) -> Json<ApiResponse<ProgressResponse>> {
    ok(state.progress.snapshot().into())
}

async fn refresh_progress(State(state): State<ApiState>) -> Json<ApiResponse<RefreshResponse>> {
    let refreshed = state.progress.refresh().await;
    ok(RefreshResponse {
        refreshed,
        progress: state.progress.snapshot().into(),
    })
}

async fn sign_petition(
    State(state): State<ApiState>,
    Json(form): Json<PetitionForm>,
) -> ApiResult<SignatureResponse> {
    let mut workflow = PetitionWorkflow::new(state.service.clone());
    workflow.edit(|draft| *draft = form);
    match workflow.submit().await? {
        PetitionOutcome::Signed { signature_id } => Ok(ok(SignatureResponse { signature_id })),
        PetitionOutcome::Failed { message } => Err(ApiError::new(StatusCode::BAD_GATEWAY, message)),
    }
}

async fn pledge(
    State(state): State<ApiState>,
    Json(form): Json<PledgeForm>,
) -> ApiResult<PledgeOutcome> {
    let mut workflow = PledgeWorkflow::new(state.service.clone());
    workflow.edit(|draft| *draft = form);
    let outcome = workflow.submit().await?;
    if outcome.succeeded() {
        return Ok(ok(outcome));
    }
    let message = outcome.message().unwrap_or_default().to_string();
    Err(ApiError::new(StatusCode::BAD_GATEWAY, message).with_detail(outcome))
}

async fn tiers() -> Json<ApiResponse<Vec<PledgeTier>>> {
    ok(PLEDGE_TIERS.to_vec())
}

async fn tier_for_amount(Path(amount): Path<String>) -> ApiResult<PledgeTier> {
    let amount = amount
        .trim()
        .trim_start_matches('$')
        .parse::<f64>()
        .map_err(|_| ApiError::bad_request(format!("invalid amount: {amount}")))?;
    Ok(ok(pledge_tier(amount)))
}

async fn donate(
    State(state): State<ApiState>,
    Json(body): Json<DonationBody>,
) -> ApiResult<PaymentIntent> {
    let request = DonationRequest {
        amount_cents: body.amount_cents,
        name: body.name,
        email: body.email,
    };
    let intent = create_donation_intent(state.payments.as_ref(), &request).await?;
    Ok(ok(intent))
}

async fn etransfer(State(state): State<ApiState>) -> Json<ApiResponse<EtransferInstructions>> {
    ok(etransfer_instructions(&state.config.etransfer))
}

async fn send_campaign_email(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(email): Json<CampaignEmail>,
) -> ApiResult<BroadcastReport> {
    authorize_admin(&state.config.server.admin_token, &headers)?;
    match state.broadcaster.send(&email).await {
        Ok(report) => Ok(ok(report)),
        Err(BroadcastError::MissingContent) => {
            Err(ApiError::bad_request(BroadcastError::MissingContent.to_string()))
        }
        Err(error) => Err(ApiError::internal(error)),
    }
}

fn authorize_admin(expected: &str, headers: &HeaderMap) -> std::result::Result<(), ApiError> {
    if expected.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "campaign email is disabled; set server.admin_token",
        ));
    }
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    if presented == Some(expected) {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::UNAUTHORIZED, "missing or invalid admin token"))
    }
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { ok: true, data })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::campaign::testing::FlakyStore;
    use crate::notify::testing::RecordingMailer;
    use crate::progress::ProgressSettings;

    struct FixedProcessor;

    #[async_trait]
    impl PaymentProcessor for FixedProcessor {
        async fn create_intent(
            &self,
            _request: &DonationRequest,
        ) -> std::result::Result<PaymentIntent, PaymentError> {
            Ok(PaymentIntent {
                client_secret: "secret".to_string(),
            })
        }
    }

    fn state(store: &Arc<FlakyStore>, admin_token: &str) -> ApiState {
        let mut config = Config::default();
        config.server.admin_token = admin_token.to_string();
        let service = store.service();
        ApiState {
            progress: Arc::new(ProgressTracker::new(service.clone(), ProgressSettings::default())),
            broadcaster: Arc::new(Broadcaster::new(
                store.clone(),
                Arc::new(RecordingMailer::default()),
                &config.notifications,
            )),
            config: Arc::new(config),
            service,
            payments: Arc::new(FixedProcessor),
        }
    }

    fn petition_form() -> PetitionForm {
        PetitionForm {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            postal_code: "V8K 2A1".to_string(),
            consent_petition: true,
            consent_updates: false,
        }
    }

    #[tokio::test]
    async fn signing_returns_the_new_id() {
        let store = FlakyStore::new();
        let response = sign_petition(State(state(&store, "")), Json(petition_form()))
            .await
            .expect("signed");
        assert!(response.0.data.signature_id > 0);
    }

    #[tokio::test]
    async fn invalid_petition_is_a_bad_request() {
        let store = FlakyStore::new();
        let mut form = petition_form();
        form.consent_petition = false;
        let err = sign_petition(State(state(&store, "")), Json(form))
            .await
            .expect_err("rejected");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn partial_pledge_failure_carries_the_outcome() {
        let store = FlakyStore::new();
        store
            .fail_pledges
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let form = PledgeForm {
            first_name: "Bo".to_string(),
            email: "bo@example.com".to_string(),
            amount: 100.0,
            ..PledgeForm::default()
        };
        let err = pledge(State(state(&store, "")), Json(form))
            .await
            .expect_err("pledge failed");
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.message.starts_with("Your signature was recorded"));
        let detail = err.detail.expect("outcome detail");
        assert_eq!(detail["step"], "pledge");
    }

    #[tokio::test]
    async fn tier_lookup_accepts_dollar_strings() {
        let tier = tier_for_amount(Path("$2500".to_string())).await.expect("tier");
        assert_eq!(tier.0.data.label, "Pillar");
        assert!(tier_for_amount(Path("lots".to_string())).await.is_err());
    }

    #[tokio::test]
    async fn small_donations_are_rejected_before_the_processor() {
        let store = FlakyStore::new();
        let err = donate(
            State(state(&store, "")),
            Json(DonationBody {
                amount_cents: 10,
                name: "Ann".to_string(),
                email: "ann@example.com".to_string(),
            }),
        )
        .await
        .expect_err("too small");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Amount must be at least $0.50 CAD");
    }

    #[test]
    fn admin_routes_need_a_configured_matching_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            authorize_admin("", &headers).expect_err("disabled").status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            authorize_admin("s3cret", &headers).expect_err("missing").status,
            StatusCode::UNAUTHORIZED
        );
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(authorize_admin("s3cret", &headers).is_ok());
    }

    #[tokio::test]
    async fn stats_read_failure_is_unavailable_not_zero() {
        let store = FlakyStore::new();
        store
            .fail_counts
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = stats(State(state(&store, ""))).await.expect_err("unavailable");
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::http::{RawStr, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::content::RawHtml;
use rocket::serde::json::Json;
use rocket::{catch, catchers, get, post, put, routes, Build, Rocket, State};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;

use common::Config;

use crate::auth::{self, AccessGate, Caller, TokenSigner, SUMMARY_ACTION};
use crate::error::{GenerateError, StorageError};
use crate::llm::ExternalSummarizer;
use crate::pipeline::GenerationRequest;
use crate::service::{RenderContext, SaveForm, SaveOutcome, SummaryService};
use crate::settings::{coerce_int, sanitize_settings, GenerationSettings, SettingsForm};
use crate::storage::ContentItem;
use crate::text::filter_markup;

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Option<Arc<Config>>,
    pub db: SqlitePool,
    pub signer: Arc<TokenSigner>,
    pub service: Arc<SummaryService>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        config: Option<Arc<Config>>,
        signer: Arc<TokenSigner>,
        external: Arc<dyn ExternalSummarizer>,
    ) -> Self {
        let gate = AccessGate::new(signer.clone());
        Self {
            started_at: Utc::now(),
            config,
            service: Arc::new(SummaryService::new(db.clone(), gate, external)),
            db,
            signer,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

type ApiError = (Status, Json<ErrorBody>);
type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn api_error(status: Status, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn storage_failure(e: StorageError) -> ApiError {
    tracing::error!("{}", e);
    api_error(Status::InternalServerError, e.to_string())
}

impl From<GenerateError> for ApiError {
    fn from(e: GenerateError) -> Self {
        let status = Status::from_code(e.status_code()).unwrap_or(Status::InternalServerError);
        api_error(status, e.to_string())
    }
}

/// Resolves `Authorization: Bearer <session token>`. Requests without a valid
/// session are served as the anonymous caller.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for Caller {
    type Error = StorageError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(state) = req.rocket().state::<AppState>() else {
            return Outcome::Success(Caller::anonymous());
        };

        let user_id = req
            .headers()
            .get_one("Authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
            .and_then(|token| state.signer.session_user(token.trim()));

        match user_id {
            Some(uid) => match auth::load_caller(&state.db, uid).await {
                Ok(caller) => Outcome::Success(caller),
                Err(e) => {
                    tracing::error!("failed to resolve caller {}: {}", uid, e);
                    Outcome::Error((Status::InternalServerError, e))
                }
            },
            None => Outcome::Success(Caller::anonymous()),
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    })
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    user_id: i64,
}

/// Verify password and return a session token.
#[post("/api/v1/login", data = "<body>")]
async fn login(state: &State<AppState>, body: Json<LoginRequest>) -> ApiResult<LoginResponse> {
    let user_id = auth::authenticate(&state.db, &body.username, &body.password)
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| {
            tracing::warn!(username = %body.username, "login failed");
            api_error(Status::Unauthorized, "Invalid credentials")
        })?;

    let token = state.signer.issue_session(user_id).map_err(|e| {
        tracing::error!("failed to create session token: {}", e);
        api_error(Status::InternalServerError, "Failed to create session")
    })?;

    Ok(Json(LoginResponse { token, user_id }))
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
}

/// Anti-forgery token for the summary actions, as embedded in the edit screen.
#[get("/api/v1/tokens/summary")]
async fn summary_token(state: &State<AppState>, caller: Caller) -> ApiResult<TokenResponse> {
    let user_id = match caller.user_id {
        Some(uid) if caller.role.can_edit_content() => uid,
        _ => return Err(api_error(Status::Forbidden, "Unauthorized")),
    };
    let token = state.signer.issue(user_id, SUMMARY_ACTION).map_err(|e| {
        tracing::error!("failed to create anti-forgery token: {}", e);
        api_error(Status::InternalServerError, "Failed to create token")
    })?;
    Ok(Json(TokenResponse { token }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    #[serde(default, deserialize_with = "absolute_id")]
    content_item_id: i64,
    #[serde(default)]
    anti_forgery_token: String,
    #[serde(default)]
    supplied_content: Option<String>,
}

/// Item ids arrive as numbers or numeric strings; anything else becomes 0 and
/// is rejected by the gate as an invalid target.
fn absolute_id<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_int(&value).saturating_abs())
}

#[derive(Serialize)]
struct SummaryResponse {
    summary: String,
}

#[post("/api/v1/summaries/generate", data = "<body>")]
async fn generate_summary(
    state: &State<AppState>,
    caller: Caller,
    body: Json<GenerateBody>,
) -> ApiResult<SummaryResponse> {
    let body = body.into_inner();
    let request = GenerationRequest {
        content_item_id: body.content_item_id,
        caller,
        anti_forgery_token: body.anti_forgery_token,
        supplied_content: body.supplied_content,
    };

    match state.service.on_generate_request(request).await {
        Ok(summary) => Ok(Json(SummaryResponse { summary })),
        Err(e) => {
            tracing::warn!(content_id = body.content_item_id, status = e.status_code(), "generate failed: {}", e);
            Err(e.into())
        }
    }
}

#[get("/api/v1/content/<id>/summary")]
async fn get_summary(state: &State<AppState>, id: i64) -> ApiResult<SummaryResponse> {
    match state.service.summaries().get(id).await.map_err(storage_failure)? {
        Some(summary) => Ok(Json(SummaryResponse { summary })),
        None => Err(api_error(Status::NotFound, "No summary for this content item")),
    }
}

#[derive(Deserialize)]
struct ContentCreate {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
}

/// Content bodies from callers without the unfiltered-html capability are
/// filtered before storage; pages render stored bodies as-is.
fn body_for(caller: &Caller, body: &str) -> String {
    if caller.role.can_post_unfiltered_html() {
        body.to_string()
    } else {
        filter_markup(body)
    }
}

#[post("/api/v1/content", data = "<body>")]
async fn create_content(
    state: &State<AppState>,
    caller: Caller,
    body: Json<ContentCreate>,
) -> ApiResult<ContentItem> {
    let author_id = match caller.user_id {
        Some(uid) if caller.role.can_edit_content() => uid,
        _ => return Err(api_error(Status::Forbidden, "Unauthorized")),
    };
    let post_body = body_for(&caller, &body.body);
    state
        .service
        .content()
        .create(author_id, &body.title, &post_body)
        .await
        .map(Json)
        .map_err(storage_failure)
}

#[get("/api/v1/content/<id>")]
async fn get_content(state: &State<AppState>, id: i64) -> ApiResult<ContentItem> {
    match state.service.content().get(id).await.map_err(storage_failure)? {
        Some(item) => Ok(Json(item)),
        None => Err(api_error(Status::NotFound, "Content item not found")),
    }
}

#[derive(Deserialize)]
struct ContentUpdate {
    title: Option<String>,
    body: Option<String>,
    #[serde(flatten)]
    form: SaveForm,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentUpdateResponse {
    item: ContentItem,
    summary_status: &'static str,
    summary: Option<String>,
}

/// Save edits to an item; the edit form's summary field is handled by the save hook.
#[put("/api/v1/content/<id>", data = "<body>")]
async fn update_content(
    state: &State<AppState>,
    caller: Caller,
    id: i64,
    body: Json<ContentUpdate>,
) -> ApiResult<ContentUpdateResponse> {
    let content = state.service.content();
    let item = content
        .get(id)
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| api_error(Status::NotFound, "Content item not found"))?;
    if !caller.can_edit_item(item.author_id) {
        return Err(api_error(Status::Forbidden, "Unauthorized"));
    }

    let post_body = body.body.as_deref().map(|b| body_for(&caller, b));
    content
        .update(id, body.title.as_deref(), post_body.as_deref())
        .await
        .map_err(storage_failure)?;

    let outcome = state
        .service
        .on_save(&caller, id, &body.form)
        .await
        .map_err(storage_failure)?;
    let (summary_status, summary) = match outcome {
        SaveOutcome::Stored(text) => ("stored", Some(text)),
        SaveOutcome::Cleared => ("cleared", None),
        SaveOutcome::Unchanged => ("unchanged", None),
        SaveOutcome::Rejected(reason) => {
            tracing::debug!(content_id = id, "summary field ignored: {}", reason);
            ("ignored", None)
        }
    };

    let item = content
        .get(id)
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| api_error(Status::NotFound, "Content item not found"))?;

    Ok(Json(ContentUpdateResponse {
        item,
        summary_status,
        summary,
    }))
}

/// Public page for one item; the summary block follows the body.
#[get("/content/<id>")]
async fn view_content(state: &State<AppState>, id: i64) -> Result<RawHtml<String>, Status> {
    let service = &state.service;
    let item = service
        .content()
        .get(id)
        .await
        .map_err(|e| {
            tracing::error!("failed to load content {}: {}", id, e);
            Status::InternalServerError
        })?
        .ok_or(Status::NotFound)?;

    let appended = service
        .on_render_content(&item, RenderContext::singular())
        .await
        .map_err(|e| {
            tracing::error!("failed to load summary for {}: {}", id, e);
            Status::InternalServerError
        })?;

    let mut html = format!(
        "<article><h1>{}</h1>{}",
        RawStr::new(&item.title).html_escape(),
        item.body
    );
    if let Some(block) = appended {
        html.push_str(&block);
    }
    html.push_str("</article>");
    Ok(RawHtml(html))
}

/// Listing of recent items. Summaries are only shown on singular views.
#[get("/content")]
async fn list_content(state: &State<AppState>) -> Result<RawHtml<String>, Status> {
    let service = &state.service;
    let items = service.content().list(20).await.map_err(|e| {
        tracing::error!("failed to list content: {}", e);
        Status::InternalServerError
    })?;

    let mut html = String::from("<section>");
    for item in &items {
        html.push_str(&format!(
            "<article><h2><a href=\"/content/{}\">{}</a></h2>{}",
            item.id,
            RawStr::new(&item.title).html_escape(),
            item.body
        ));
        let appended = service
            .on_render_content(item, RenderContext::listing())
            .await
            .map_err(|_| Status::InternalServerError)?;
        if let Some(block) = appended {
            html.push_str(&block);
        }
        html.push_str("</article>");
    }
    html.push_str("</section>");
    Ok(RawHtml(html))
}

#[get("/api/v1/settings")]
async fn get_settings(state: &State<AppState>, caller: Caller) -> ApiResult<GenerationSettings> {
    if !caller.role.can_manage_settings() {
        return Err(api_error(Status::Forbidden, "Unauthorized"));
    }
    state
        .service
        .settings()
        .load()
        .await
        .map(Json)
        .map_err(storage_failure)
}

/// Administrative settings update; input is clamped and coerced before saving.
#[put("/api/v1/settings", data = "<body>")]
async fn update_settings(
    state: &State<AppState>,
    caller: Caller,
    body: Json<SettingsForm>,
) -> ApiResult<GenerationSettings> {
    if !caller.role.can_manage_settings() {
        return Err(api_error(Status::Forbidden, "Unauthorized"));
    }
    let settings = sanitize_settings(&body);
    state
        .service
        .settings()
        .save(&settings)
        .await
        .map_err(storage_failure)?;
    tracing::info!(summary_length = settings.summary_length, external = settings.external_enabled(), "settings updated");
    Ok(Json(settings))
}

// API clients get the `{message}` body for malformed requests too.
#[catch(400)]
fn bad_request() -> ApiError {
    api_error(Status::BadRequest, "Malformed request body")
}

#[catch(422)]
fn unprocessable() -> ApiError {
    api_error(Status::UnprocessableEntity, "Invalid request fields")
}

/// Build the Rocket instance with managed state and all routes mounted.
/// `[server] bind/port` from the application config are merged into Rocket's figment.
pub fn build_rocket(state: AppState) -> Rocket<Build> {
    let mut fig = rocket::Config::figment();
    if let Some(cfg) = &state.config {
        if let Some(bind) = &cfg.server.bind {
            fig = fig.merge(("address", bind.clone()));
        }
        if let Some(port) = cfg.server.port {
            fig = fig.merge(("port", port));
        }
    }

    rocket::custom(fig)
        .manage(state)
        .mount(
            "/",
            routes![
                health,
                status,
                login,
                summary_token,
                generate_summary,
                get_summary,
                create_content,
                get_content,
                update_content,
                view_content,
                list_content,
                get_settings,
                update_settings,
            ],
        )
        .register("/api", catchers![bad_request, unprocessable])
}

/// Launch the server; blocks until Rocket shuts down.
pub async fn launch_rocket(state: AppState) -> Result<()> {
    tracing::info!("Starting Rocket HTTP server");
    build_rocket(state)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}

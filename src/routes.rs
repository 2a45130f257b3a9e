use std::sync::Arc;
use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, Either, FromRequest, HttpRequest, HttpResponse};
use futures_util::future::{ready, LocalBoxFuture};
use serde::de::DeserializeOwned;

use crate::error::{ApiError, ApiErrorBody};
use crate::models::*;
use crate::password::{hash_password, verify_password};
use crate::repo::{Repo, RepoError};

/// Threads shown per board listing.
pub const THREAD_LIST_LIMIT: usize = 10;
/// Replies shown per thread in a board listing.
pub const RECENT_REPLY_LIMIT: usize = 3;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|_, _| ApiError::Validation("Invalid request body").into()))
        .app_data(web::FormConfig::default().error_handler(|_, _| ApiError::Validation("Invalid request body").into()))
        .app_data(web::QueryConfig::default().error_handler(|_, _| ApiError::Validation("Invalid query string").into()))
        .service(
            web::scope("/api")
                .service(
                    web::resource("/threads/{board}")
                        .route(web::post().to(create_thread))
                        .route(web::get().to(list_threads))
                        .route(web::delete().to(delete_thread))
                        .route(web::put().to(report_thread)),
                )
                .service(
                    web::resource("/replies/{board}")
                        .route(web::post().to(create_reply))
                        .route(web::get().to(list_replies))
                        .route(web::delete().to(delete_reply))
                        .route(web::put().to(report_reply)),
                ),
        );
}

#[derive(Clone)]
pub struct AppState { pub repo: Arc<dyn Repo> }

/// Request body, JSON from API clients or urlencoded from HTML forms. A request that carries no
/// body at all decodes as an empty payload, so the field checks report what is missing.
pub struct Body<T>(pub T);

impl<T> Body<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

fn has_no_body(req: &HttpRequest) -> bool {
    let headers = req.headers();
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return false;
    }
    match headers.get(header::CONTENT_LENGTH) {
        None => true,
        Some(v) => v.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) == Some(0),
    }
}

impl<T> FromRequest for Body<T>
where
    T: DeserializeOwned + Default + 'static,
{
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        if has_no_body(req) {
            return Box::pin(ready(Ok(Body(T::default()))));
        }
        let fut = Either::<web::Json<T>, web::Form<T>>::from_request(req, payload);
        Box::pin(async move { Ok(Body(fut.await?.into_inner())) })
    }
}

fn required(field: Option<String>) -> Result<String, ApiError> {
    field.filter(|s| !s.is_empty()).ok_or(ApiError::MISSING_FIELDS)
}

// An id that is not a UUID cannot match any record.
fn parse_id(raw: &str, not_found: ApiError) -> Result<Id, ApiError> {
    Id::parse_str(raw.trim()).map_err(|_| not_found)
}

fn reply_error(e: RepoError) -> ApiError {
    match e {
        RepoError::NotFound => ApiError::REPLY_NOT_FOUND,
        other => other.into(),
    }
}

async fn hash_blocking(password: String) -> Result<String, ApiError> {
    web::block(move || hash_password(&password))
        .await
        .map_err(|e| {
            tracing::error!("hashing task failed: {e}");
            ApiError::Internal
        })?
        .map_err(ApiError::from)
}

async fn check_password(password: String, hash: String) -> Result<(), ApiError> {
    let ok = web::block(move || verify_password(&password, &hash))
        .await
        .map_err(|e| {
            tracing::error!("verification task failed: {e}");
            ApiError::Internal
        })??;
    if ok { Ok(()) } else { Err(ApiError::IncorrectPassword) }
}

#[utoipa::path(
    post,
    path = "/api/threads/{board}",
    params(("board" = String, Path, description = "Board name")),
    request_body = CreateThreadRequest,
    responses(
        (status = 200, description = "Thread created", body = ThreadCreated),
        (status = 400, description = "Missing required fields", body = ApiErrorBody)
    )
)]
pub async fn create_thread(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: Body<CreateThreadRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let text = required(req.text)?;
    let password = required(req.delete_password)?;
    let thread = data.repo.create_thread(NewThread {
        board: path.into_inner(),
        text,
        delete_password: hash_blocking(password).await?,
    }).await?;
    Ok(HttpResponse::Ok().json(ThreadCreated::from(&thread)))
}

#[utoipa::path(
    get,
    path = "/api/threads/{board}",
    params(("board" = String, Path, description = "Board name")),
    responses(
        (status = 200, description = "Most recently bumped threads", body = [ThreadListing]),
        (status = 500, description = "Server error", body = ApiErrorBody)
    )
)]
pub async fn list_threads(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let board = path.into_inner();
    let threads = data.repo.list_threads(&board, THREAD_LIST_LIMIT).await?;
    let listing: Vec<_> = threads
        .iter()
        .map(|t| ThreadListing::from_thread(t, RECENT_REPLY_LIMIT))
        .collect();
    Ok(HttpResponse::Ok().json(listing))
}

#[utoipa::path(
    delete,
    path = "/api/threads/{board}",
    params(("board" = String, Path, description = "Board name")),
    request_body = DeleteThreadRequest,
    responses(
        (status = 200, description = "Thread and its replies removed", body = MessageResponse),
        (status = 400, description = "Thread not found or incorrect password", body = ApiErrorBody)
    )
)]
pub async fn delete_thread(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: Body<DeleteThreadRequest>,
) -> Result<HttpResponse, ApiError> {
    let board = path.into_inner();
    let req = payload.into_inner();
    let thread_id = required(req.thread_id)?;
    let password = required(req.delete_password)?;
    let id = parse_id(&thread_id, ApiError::THREAD_NOT_FOUND)?;
    let thread = data.repo.get_thread(&board, id).await?;
    check_password(password, thread.delete_password).await?;
    data.repo.delete_thread(&board, id).await?;
    tracing::info!(%board, thread_id = %id, "thread deleted");
    Ok(HttpResponse::Ok().json(MessageResponse::success()))
}

#[utoipa::path(
    put,
    path = "/api/threads/{board}",
    params(("board" = String, Path, description = "Board name")),
    request_body = ReportThreadRequest,
    responses(
        (status = 200, description = "Thread reported", body = MessageResponse),
        (status = 400, description = "Thread not found", body = ApiErrorBody)
    )
)]
pub async fn report_thread(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: Body<ReportThreadRequest>,
) -> Result<HttpResponse, ApiError> {
    let board = path.into_inner();
    let thread_id = payload
        .into_inner()
        .thread_id
        .filter(|s| !s.is_empty())
        .ok_or(ApiError::Validation("Missing thread_id"))?;
    let id = parse_id(&thread_id, ApiError::THREAD_NOT_FOUND)?;
    data.repo.report_thread(&board, id).await?;
    tracing::info!(%board, thread_id = %id, "thread reported");
    Ok(HttpResponse::Ok().json(MessageResponse::success()))
}

#[utoipa::path(
    post,
    path = "/api/replies/{board}",
    params(("board" = String, Path, description = "Board name")),
    request_body = CreateReplyRequest,
    responses(
        (status = 200, description = "Reply created; thread bumped", body = ReplyView),
        (status = 400, description = "Missing required fields or thread not found", body = ApiErrorBody)
    )
)]
pub async fn create_reply(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: Body<CreateReplyRequest>,
) -> Result<HttpResponse, ApiError> {
    let board = path.into_inner();
    let req = payload.into_inner();
    let text = required(req.text)?;
    let password = required(req.delete_password)?;
    let thread_id = required(req.thread_id)?;
    let id = parse_id(&thread_id, ApiError::THREAD_NOT_FOUND)?;
    // scopes the parent to this board
    let thread = data.repo.get_thread(&board, id).await?;
    let reply = data.repo.create_reply(NewReply {
        thread_id: thread.id,
        text,
        delete_password: hash_blocking(password).await?,
    }).await?;
    Ok(HttpResponse::Ok().json(ReplyView::from(&reply)))
}

#[utoipa::path(
    get,
    path = "/api/replies/{board}",
    params(
        ("board" = String, Path, description = "Board name"),
        ("thread_id" = String, Query, description = "Thread id")
    ),
    responses(
        (status = 200, description = "Thread with every reply", body = ThreadDetail),
        (status = 400, description = "Thread not found", body = ApiErrorBody)
    )
)]
pub async fn list_replies(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<RepliesQuery>,
) -> Result<HttpResponse, ApiError> {
    let board = path.into_inner();
    let thread_id = query
        .into_inner()
        .thread_id
        .filter(|s| !s.is_empty())
        .ok_or(ApiError::Validation("Missing thread_id"))?;
    let id = parse_id(&thread_id, ApiError::THREAD_NOT_FOUND)?;
    let thread = data.repo.get_thread(&board, id).await?;
    Ok(HttpResponse::Ok().json(ThreadDetail::from(&thread)))
}

#[utoipa::path(
    delete,
    path = "/api/replies/{board}",
    params(("board" = String, Path, description = "Board name")),
    request_body = DeleteReplyRequest,
    responses(
        (status = 200, description = "Reply text replaced with [deleted]", body = MessageResponse),
        (status = 400, description = "Thread or reply not found, or incorrect password", body = ApiErrorBody)
    )
)]
pub async fn delete_reply(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: Body<DeleteReplyRequest>,
) -> Result<HttpResponse, ApiError> {
    let board = path.into_inner();
    let req = payload.into_inner();
    let thread_id = required(req.thread_id)?;
    let reply_id = required(req.reply_id)?;
    let password = required(req.delete_password)?;
    let thread_id = parse_id(&thread_id, ApiError::THREAD_NOT_FOUND)?;
    data.repo.get_thread(&board, thread_id).await?;
    let reply_id = parse_id(&reply_id, ApiError::REPLY_NOT_FOUND)?;
    let reply = data.repo.get_reply(thread_id, reply_id).await.map_err(reply_error)?;
    check_password(password, reply.delete_password).await?;
    if !reply.text.is_deleted() {
        data.repo.delete_reply(thread_id, reply_id).await.map_err(reply_error)?;
        tracing::info!(%board, %thread_id, %reply_id, "reply deleted");
    }
    Ok(HttpResponse::Ok().json(MessageResponse::success()))
}

#[utoipa::path(
    put,
    path = "/api/replies/{board}",
    params(("board" = String, Path, description = "Board name")),
    request_body = ReportReplyRequest,
    responses(
        (status = 200, description = "Reply reported", body = MessageResponse),
        (status = 400, description = "Thread or reply not found", body = ApiErrorBody)
    )
)]
pub async fn report_reply(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: Body<ReportReplyRequest>,
) -> Result<HttpResponse, ApiError> {
    let board = path.into_inner();
    let req = payload.into_inner();
    let thread_id = required(req.thread_id)?;
    let reply_id = required(req.reply_id)?;
    let thread_id = parse_id(&thread_id, ApiError::THREAD_NOT_FOUND)?;
    data.repo.get_thread(&board, thread_id).await?;
    let reply_id = parse_id(&reply_id, ApiError::REPLY_NOT_FOUND)?;
    data.repo.report_reply(thread_id, reply_id).await.map_err(reply_error)?;
    tracing::info!(%board, %thread_id, %reply_id, "reply reported");
    Ok(HttpResponse::Ok().json(MessageResponse::success()))
}

/// Fallback for unknown routes.
pub async fn not_found(req: HttpRequest) -> HttpResponse {
    tracing::debug!(path = %req.path(), "no route");
    HttpResponse::NotFound().content_type("text/plain").body("Not Found")
}

use crate::error::ApiErrorBody;
use crate::models::{
    CreateReplyRequest, CreateThreadRequest, DeleteReplyRequest, DeleteThreadRequest, MessageResponse,
    ReplyView, ReportReplyRequest, ReportThreadRequest, ThreadCreated, ThreadDetail, ThreadListing,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::create_thread,
        crate::routes::list_threads,
        crate::routes::delete_thread,
        crate::routes::report_thread,
        crate::routes::create_reply,
        crate::routes::list_replies,
        crate::routes::delete_reply,
        crate::routes::report_reply,
    ),
    components(schemas(
        CreateThreadRequest, DeleteThreadRequest, ReportThreadRequest,
        CreateReplyRequest, DeleteReplyRequest, ReportReplyRequest,
        ThreadCreated, ThreadListing, ThreadDetail, ReplyView, MessageResponse, ApiErrorBody
    )),
    tags(
        (name = "threads", description = "Thread operations"),
        (name = "replies", description = "Reply operations"),
    )
)]
pub struct ApiDoc;

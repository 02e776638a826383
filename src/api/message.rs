use crate::{
    attendance::AttendanceService,
    auth::auth::AuthUser,
    model::message::{ALL_EMPLOYEES, Message, MessageReply},
    store::{self, Collection, Filter},
};
use actix_web::{HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// An employee id, or `all_employees` to broadcast.
    #[schema(example = "all_employees")]
    pub recipient_id: String,
    #[schema(example = "Team meeting at 15:00")]
    pub message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplyReq {
    #[schema(example = "On my way")]
    pub message: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct InboxQuery {
    pub unread_only: Option<bool>,
    /// Admins only: every message instead of their own inbox.
    pub all: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub sender: String,
    pub message: String,
    pub recipient_id: String,
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub read: bool,
    #[schema(value_type = Option<Object>)]
    pub reply: Option<MessageReply>,
}

impl MessageView {
    fn new(id: String, message: Message) -> Self {
        Self {
            id,
            sender: message.sender,
            message: message.message,
            recipient_id: message.recipient_id,
            timestamp: message.timestamp,
            read: message.read,
            reply: message.reply,
        }
    }
}

async fn inbox(service: &AttendanceService, employee_id: &str) -> actix_web::Result<Vec<(String, Message)>> {
    let filter = Filter::all().one_of("recipientId", vec![json!(employee_id), json!(ALL_EMPLOYEES)]);
    Ok(store::query_as::<Message>(service.store().as_ref(), Collection::Messages, &filter).await?)
}

async fn display_name(service: &AttendanceService, employee_id: &str) -> String {
    match service.directory().employee(employee_id).await {
        Ok(Some(employee)) => employee.name,
        _ => employee_id.to_string(),
    }
}

/// Inbox, newest first. Listed unread messages are marked read.
#[utoipa::path(
    get,
    path = "/api/messages",
    params(InboxQuery),
    responses(
        (status = 200, description = "Messages", body = Vec<MessageView>),
        (status = 401, description = "Unauthorized")
    ),
    tag = "Message",
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(employee_id = %auth.employee_id))]
pub async fn list_messages(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    query: web::Query<InboxQuery>,
) -> actix_web::Result<impl Responder> {
    if query.all.unwrap_or(false) {
        auth.require_admin()?;
        let mut all = store::query_as::<Message>(service.store().as_ref(), Collection::Messages, &Filter::all())
            .await?
            .into_iter()
            .map(|(id, message)| MessageView::new(id, message))
            .collect::<Vec<_>>();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        return Ok(HttpResponse::Ok().json(all));
    }

    let unread_only = query.unread_only.unwrap_or(false);
    let mut messages = inbox(&service, &auth.employee_id)
        .await?
        .into_iter()
        .filter(|(_, message)| !unread_only || !message.read)
        .collect::<Vec<_>>();
    messages.sort_by(|(_, a), (_, b)| b.timestamp.cmp(&a.timestamp));

    for (id, _) in messages.iter().filter(|(_, message)| !message.read) {
        if let Err(e) = service
            .store()
            .update(Collection::Messages, id, json!({ "read": true }))
            .await
        {
            warn!(message_id = %id, error = %e, "Failed to mark message read");
        }
    }

    let views = messages
        .into_iter()
        .map(|(id, message)| MessageView::new(id, message))
        .collect::<Vec<_>>();
    Ok(HttpResponse::Ok().json(views))
}

#[utoipa::path(
    get,
    path = "/api/messages/unread-count",
    responses(
        (status = 200, description = "Unread messages in the inbox", body = Object, example = json!({ "unread": 2 })),
        (status = 401, description = "Unauthorized")
    ),
    tag = "Message",
    security(("bearer_auth" = []))
)]
pub async fn unread_count(auth: AuthUser, service: web::Data<AttendanceService>) -> actix_web::Result<impl Responder> {
    let unread = inbox(&service, &auth.employee_id)
        .await?
        .iter()
        .filter(|(_, message)| !message.read)
        .count();
    Ok(HttpResponse::Ok().json(json!({ "unread": unread })))
}

#[utoipa::path(
    post,
    path = "/api/messages",
    request_body = SendMessage,
    responses(
        (status = 201, description = "Message sent", body = MessageView),
        (status = 400, description = "Empty message or unknown recipient"),
        (status = 403, description = "Admin only")
    ),
    tag = "Message",
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(admin = %auth.employee_id, recipient_id = %payload.recipient_id))]
pub async fn send_message(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<SendMessage>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    let text = payload.message.trim();
    if text.is_empty() {
        return Ok(HttpResponse::BadRequest().json(json!({ "message": "message is required" })));
    }
    let recipient_id = payload.recipient_id.trim();
    if recipient_id != ALL_EMPLOYEES && service.directory().employee(recipient_id).await?.is_none() {
        return Ok(HttpResponse::BadRequest().json(json!({
            "message": format!("employee {recipient_id} not found")
        })));
    }

    let message = Message {
        sender: display_name(&service, &auth.employee_id).await,
        message: text.to_string(),
        recipient_id: recipient_id.to_string(),
        timestamp: service.time().now(),
        read: false,
        reply: None,
    };
    let id = service
        .store()
        .create(Collection::Messages, store::to_document(&message)?)
        .await?;

    info!(message_id = %id, "Message sent");
    Ok(HttpResponse::Created().json(MessageView::new(id, message)))
}

#[utoipa::path(
    post,
    path = "/api/messages/{message_id}/reply",
    params(("message_id", Path, description = "Message ID")),
    request_body = ReplyReq,
    responses(
        (status = 200, description = "Reply stored", body = MessageView),
        (status = 400, description = "Empty reply"),
        (status = 404, description = "Message not found in the inbox")
    ),
    tag = "Message",
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(employee_id = %auth.employee_id, message_id = %path))]
pub async fn reply(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
    payload: web::Json<ReplyReq>,
) -> actix_web::Result<impl Responder> {
    let text = payload.message.trim();
    if text.is_empty() {
        return Ok(HttpResponse::BadRequest().json(json!({ "message": "message is required" })));
    }

    let message_id = path.into_inner();
    let not_found = || HttpResponse::NotFound().json(json!({ "message": "Message not found" }));
    let Some(mut message) = store::get_as::<Message>(service.store().as_ref(), Collection::Messages, &message_id).await?
    else {
        return Ok(not_found());
    };
    if message.recipient_id != auth.employee_id && message.recipient_id != ALL_EMPLOYEES {
        return Ok(not_found());
    }

    let reply = MessageReply {
        sender: display_name(&service, &auth.employee_id).await,
        message: text.to_string(),
        timestamp: service.time().now(),
    };
    let patch = json!({
        "reply": store::to_document(&reply)?,
        "read": true,
    });
    service.store().update(Collection::Messages, &message_id, patch).await?;

    message.reply = Some(reply);
    message.read = true;
    info!("Message replied");
    Ok(HttpResponse::Ok().json(MessageView::new(message_id, message)))
}

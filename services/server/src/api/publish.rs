// The publish pipeline: parameter parsing, body disposition, attachment
// intake, then hand-off to the broker.
use crate::api::error::{self, ApiError};
use crate::api::params::Params;
use crate::api::peek::{self, PeekedBody};
use crate::app::AppState;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beacon_broker::{PublishOptions, Visitor};
use beacon_cache::{detect_content_type, CacheError};
use beacon_limits::{FixedLimiter, Limiter};
use beacon_wire::{now_unix, parse_future_time, parse_priority, split_no_empty, Attachment, Message};
use std::sync::Arc;

const EMPTY_MESSAGE_BODY: &str = "triggered";

fn attachment_message(name: &str) -> String {
    format!("You received a file: {name}")
}

pub async fn handle_publish(
    state: AppState,
    topic_name: String,
    params: Params,
    visitor: Arc<Visitor>,
    body: Body,
) -> Result<Response, ApiError> {
    let topic = state.broker.topic(&topic_name)?;
    let peeked = peek::peek(body, state.config.message_limit)
        .await
        .map_err(|_| error::internal())?;
    let mut m = Message::new(topic.name(), "");
    let opts = parse_publish_params(&state, &visitor, &params, &mut m)?;
    handle_body(&state, &visitor, &params, &mut m, peeked).await?;
    if m.message.is_empty() {
        m.message = EMPTY_MESSAGE_BODY.to_string();
    }
    state
        .broker
        .publish(&topic, &m, &opts)
        .await
        .map_err(|_| error::internal())?;
    Ok(Json(m).into_response())
}

/// Validates every parameter before any side effect happens.
fn parse_publish_params(
    state: &AppState,
    visitor: &Visitor,
    params: &Params,
    m: &mut Message,
) -> Result<PublishOptions, ApiError> {
    let cache = params.read(&["x-cache", "cache"]) != "no";
    let mut push = params.read(&["x-firebase", "firebase"]) != "no";
    m.title = params.read(&["x-title", "title", "t"]);
    m.click = params.read(&["x-click", "click"]);

    let filename = params.read(&["x-filename", "filename", "file", "f"]);
    let attach = params.read(&["x-attach", "attach", "a"]);
    if !filename.is_empty() || !attach.is_empty() {
        let mut attachment = Attachment {
            name: filename,
            ..Default::default()
        };
        if !attach.is_empty() {
            if !attach.starts_with("http://") && !attach.starts_with("https://") {
                return Err(error::attach_url_invalid());
            }
            attachment.url = attach.clone();
            if attachment.name.is_empty() {
                attachment.name = url_basename(&attach);
            }
            if attachment.name.is_empty() {
                attachment.name = "attachment".to_string();
            }
        }
        m.attachment = Some(attachment);
    }

    let email = params.read(&["x-email", "x-e-mail", "email", "e-mail", "mail", "e"]);
    let email = if email.is_empty() {
        None
    } else {
        visitor.email_allowed().map_err(|_| error::limit_emails())?;
        if !state.broker.mailer_configured() {
            return Err(error::email_disabled());
        }
        Some(email)
    };

    let message_param = params.read(&["x-message", "message", "m"]);
    if !message_param.is_empty() {
        m.message = message_param;
    }
    m.priority = parse_priority(&params.read(&["x-priority", "priority", "prio", "p"]))
        .map_err(|_| error::priority_invalid())?;
    let tags = params.read(&["x-tags", "tags", "tag", "ta"]);
    if !tags.is_empty() {
        m.tags = split_no_empty(&tags, ',');
    }

    let delay = params.read(&["x-delay", "delay", "x-at", "at", "x-in", "in"]);
    if !delay.is_empty() {
        if !cache {
            return Err(error::delay_no_cache());
        }
        if email.is_some() {
            return Err(error::delay_no_email());
        }
        let now = now_unix();
        let delivery = parse_future_time(&delay, now).map_err(|_| error::delay_cannot_parse())?;
        if delivery < now + state.config.min_delay.as_secs() as i64 {
            return Err(error::delay_too_small());
        }
        if delivery > now + state.config.max_delay.as_secs() as i64 {
            return Err(error::delay_too_large());
        }
        m.time = delivery;
    }

    // UnifiedPush publishes bypass the push upstream.
    if params.flag(&["x-unifiedpush", "unifiedpush", "up"]) {
        push = false;
    }

    Ok(PublishOptions {
        cache,
        push,
        email,
        sender_ip: visitor.ip().to_string(),
    })
}

fn url_basename(url: &str) -> String {
    let path = url
        .splitn(4, '/')
        .nth(3)
        .unwrap_or("")
        .split(['?', '#'])
        .next()
        .unwrap_or("");
    match path.rsplit('/').next() {
        Some(base) if base != "." && base != "/" => base.to_string(),
        _ => String::new(),
    }
}

/// Decides whether the body is message text or an attachment.
///
/// 1. An external attach URL means the body is the message.
/// 2. A filename means the body is the attachment.
/// 3. A short, valid-UTF-8 body is the message.
/// 4. Anything else is the attachment.
async fn handle_body(
    state: &AppState,
    visitor: &Arc<Visitor>,
    params: &Params,
    m: &mut Message,
    peeked: PeekedBody,
) -> Result<(), ApiError> {
    let has_url = m.attachment.as_ref().is_some_and(|a| !a.url.is_empty());
    let has_name = m.attachment.as_ref().is_some_and(|a| !a.name.is_empty());
    if has_url {
        body_as_message(m, &peeked)
    } else if has_name {
        body_as_attachment(state, visitor, params, m, peeked).await
    } else if !peeked.limit_reached && std::str::from_utf8(&peeked.peeked).is_ok() {
        body_as_message(m, &peeked)
    } else {
        body_as_attachment(state, visitor, params, m, peeked).await
    }
}

fn body_as_message(m: &mut Message, peeked: &PeekedBody) -> Result<(), ApiError> {
    let text = std::str::from_utf8(&peeked.peeked).map_err(|_| error::message_not_utf8())?;
    // An empty body must not clobber a message passed via parameter.
    if !text.is_empty() {
        m.message = text.trim().to_string();
    }
    if m.message.is_empty() {
        if let Some(attachment) = &m.attachment {
            if !attachment.name.is_empty() {
                m.message = attachment_message(&attachment.name);
            }
        }
    }
    Ok(())
}

async fn body_as_attachment(
    state: &AppState,
    visitor: &Arc<Visitor>,
    params: &Params,
    m: &mut Message,
    peeked: PeekedBody,
) -> Result<(), ApiError> {
    let Some(file_cache) = state.broker.file_cache() else {
        return Err(error::attachments_disallowed());
    };
    let Some(base_url) = state.config.base_url.clone() else {
        return Err(error::attachments_disallowed());
    };
    let now = now_unix();
    let expires = now + state.config.attachment_expiry_duration.as_secs() as i64;
    if m.time > expires {
        return Err(error::attachment_expiry_before_delivery());
    }

    let used = state
        .broker
        .cache()
        .attachments_size(visitor.ip())
        .await
        .map_err(|_| error::internal())?;
    let remaining = state
        .config
        .visitor_attachment_total_size_limit
        .saturating_sub(used);
    // Untrusted early check; the streaming write enforces the hard limit.
    if let Some(length) = params
        .header("content-length")
        .and_then(|v| v.parse::<u64>().ok())
    {
        if length > remaining || length > state.config.attachment_file_size_limit {
            return Err(error::attachment_too_large());
        }
    }

    let mut attachment = m.attachment.take().unwrap_or_default();
    attachment.owner = visitor.ip().to_string();
    attachment.expires = expires;
    let (content_type, ext) = detect_content_type(&peeked.peeked, &attachment.name);
    attachment.content_type = content_type;
    attachment.url = format!("{}/file/{}{ext}", base_url.trim_end_matches('/'), m.id);
    if attachment.name.is_empty() {
        attachment.name = format!("attachment{ext}");
    }
    if m.message.is_empty() {
        m.message = attachment_message(&attachment.name);
    }

    let bandwidth = visitor.bandwidth_limiter();
    let quota = FixedLimiter::new(remaining.min(i64::MAX as u64) as i64);
    let limiters: [&dyn Limiter; 2] = [&*bandwidth, &quota];
    attachment.size = file_cache
        .write(&m.id, peeked.into_stream(), &limiters)
        .await
        .map_err(|err| match err {
            CacheError::LimitReached => error::attachment_too_large(),
            _ => error::internal(),
        })?;
    m.attachment = Some(attachment);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_basename_extracts_the_last_segment() {
        assert_eq!(url_basename("https://example.com/a/b/pic.jpg"), "pic.jpg");
        assert_eq!(url_basename("https://example.com/pic.jpg?x=1"), "pic.jpg");
        assert_eq!(url_basename("https://example.com/"), "");
        assert_eq!(url_basename("https://example.com"), "");
    }
}

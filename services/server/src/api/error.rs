//! Typed HTTP errors with the protocol's numeric code registry.
//!
//! Handlers return `ApiError`; the response body is the documented JSON
//! shape and carries the matching HTTP status.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beacon_broker::BrokerError;
use serde::Serialize;

const DOCS_PUBLISH: &str = "https://beacon.dev/docs/publish";
const DOCS_SUBSCRIBE: &str = "https://beacon.dev/docs/subscribe";

#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: u32,
    pub status: StatusCode,
    pub message: &'static str,
    pub link: &'static str,
}

#[derive(Serialize)]
struct ErrorBody {
    code: u32,
    http: u16,
    error: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    link: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(code = self.code, error = self.message, "request failed");
        } else {
            tracing::debug!(code = self.code, error = self.message, "request rejected");
        }
        let body = ErrorBody {
            code: self.code,
            http: self.status.as_u16(),
            error: self.message,
            link: self.link,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(code: u32, message: &'static str, link: &'static str) -> ApiError {
    ApiError {
        code,
        status: StatusCode::BAD_REQUEST,
        message,
        link,
    }
}

fn too_many_requests(code: u32, message: &'static str) -> ApiError {
    ApiError {
        code,
        status: StatusCode::TOO_MANY_REQUESTS,
        message,
        link: DOCS_PUBLISH,
    }
}

pub fn email_disabled() -> ApiError {
    bad_request(40001, "e-mail notifications are not enabled", "")
}

pub fn delay_no_cache() -> ApiError {
    bad_request(40002, "cannot disable cache for delayed message", "")
}

pub fn delay_no_email() -> ApiError {
    bad_request(40003, "delayed e-mail notifications are not supported", "")
}

pub fn delay_cannot_parse() -> ApiError {
    bad_request(
        40004,
        "invalid delay parameter: unable to parse delay",
        DOCS_PUBLISH,
    )
}

pub fn delay_too_small() -> ApiError {
    bad_request(40005, "invalid delay parameter: too small", DOCS_PUBLISH)
}

pub fn delay_too_large() -> ApiError {
    bad_request(40006, "invalid delay parameter: too large", DOCS_PUBLISH)
}

pub fn priority_invalid() -> ApiError {
    bad_request(40007, "invalid priority parameter", DOCS_PUBLISH)
}

pub fn since_invalid() -> ApiError {
    bad_request(40008, "invalid since parameter", DOCS_SUBSCRIBE)
}

pub fn topic_invalid() -> ApiError {
    bad_request(40009, "invalid topic: path invalid", "")
}

pub fn topic_disallowed() -> ApiError {
    bad_request(40010, "invalid topic: topic name is disallowed", "")
}

pub fn message_not_utf8() -> ApiError {
    bad_request(40011, "invalid message: message must be UTF-8 encoded", "")
}

pub fn attachment_too_large() -> ApiError {
    bad_request(
        40012,
        "invalid request: attachment too large, or quota reached",
        "",
    )
}

pub fn attach_url_invalid() -> ApiError {
    bad_request(40013, "invalid request: attachment URL is invalid", "")
}

pub fn attachments_disallowed() -> ApiError {
    bad_request(40014, "invalid request: attachments not allowed", "")
}

pub fn attachment_expiry_before_delivery() -> ApiError {
    bad_request(
        40015,
        "invalid request: attachment expiry before delayed delivery date",
        "",
    )
}

pub fn not_found() -> ApiError {
    ApiError {
        code: 40401,
        status: StatusCode::NOT_FOUND,
        message: "page not found",
        link: "",
    }
}

pub fn limit_requests() -> ApiError {
    too_many_requests(42901, "limit reached: too many requests, please be nice")
}

pub fn limit_emails() -> ApiError {
    too_many_requests(42902, "limit reached: too many emails, please be nice")
}

pub fn limit_subscriptions() -> ApiError {
    too_many_requests(
        42903,
        "limit reached: too many active subscriptions, please be nice",
    )
}

pub fn limit_total_topics() -> ApiError {
    too_many_requests(
        42904,
        "limit reached: the total number of topics on the server has been reached",
    )
}

pub fn limit_attachment_bandwidth() -> ApiError {
    too_many_requests(42905, "too many requests: daily bandwidth limit reached")
}

pub fn internal() -> ApiError {
    ApiError {
        code: 50001,
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "internal server error",
        link: "",
    }
}

pub fn internal_invalid_file_path() -> ApiError {
    ApiError {
        code: 50002,
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "internal server error: invalid file path",
        link: "",
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::InvalidTopic(_) => topic_invalid(),
            BrokerError::TopicDisallowed(_) => topic_disallowed(),
            BrokerError::TopicLimitReached => limit_total_topics(),
            BrokerError::Cache(_) => internal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_matches_documented_shape() {
        let body = ErrorBody {
            code: 40007,
            http: 400,
            error: "invalid priority parameter",
            link: DOCS_PUBLISH,
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["code"], 40007);
        assert_eq!(json["http"], 400);
        assert_eq!(json["error"], "invalid priority parameter");
        assert!(json["link"].as_str().expect("link").starts_with("https://"));
    }

    #[test]
    fn empty_link_is_omitted() {
        let json = serde_json::to_value(ErrorBody {
            code: 40401,
            http: 404,
            error: "page not found",
            link: "",
        })
        .expect("serialize");
        assert!(json.get("link").is_none());
    }

    #[test]
    fn broker_errors_map_to_registry_codes() {
        assert_eq!(
            ApiError::from(BrokerError::InvalidTopic("x y".into())).code,
            40009
        );
        assert_eq!(
            ApiError::from(BrokerError::TopicDisallowed("docs".into())).code,
            40010
        );
        assert_eq!(ApiError::from(BrokerError::TopicLimitReached).code, 42904);
    }
}

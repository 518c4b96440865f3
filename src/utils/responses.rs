//! HTTP response handling system
//!
//! A unified interface for creating HTTP responses across the API surface,
//! with pre-serialized bodies for the common generic errors. This is also
//! where the non-disclosure policy meets the wire: enumeration-sensitive
//! handlers reply with [`ResponseBuilder::uniform_success`] no matter
//! which branch ran, and this is an API surface, so errors are JSON
//! bodies, never redirects.

use actix_web::{http::header, HttpResponse};
use serde_json::{json, Value};

/// Global instance of pre-serialized common responses
static CACHED_RESPONSES: std::sync::LazyLock<CachedResponses> =
    std::sync::LazyLock::new(CachedResponses::new);

/// Container for pre-serialized common HTTP response bodies
struct CachedResponses {
    invalid_request: String,
    unauthorized: String,
    forbidden: String,
    server_error: String,
    csrf_rejected: String,
    uniform_success: String,
}

impl CachedResponses {
    fn new() -> Self {
        Self {
            invalid_request: Self::create_json(
                "invalid_request",
                "The request is malformed or invalid",
            ),
            unauthorized: Self::create_json(
                "unauthorized",
                "Authentication is required to access this resource",
            ),
            forbidden: Self::create_json(
                "forbidden",
                "The authenticated principal may not perform this operation",
            ),
            server_error: Self::create_json("server_error", "An internal server error occurred"),
            csrf_rejected: Self::create_json(
                "csrf_rejected",
                "The anti-forgery token is missing or stale",
            ),
            uniform_success: serde_json::to_string(&json!({
                "succeeded": true,
                "message": null,
            }))
            .expect("Failed to serialize JSON"),
        }
    }

    fn create_json(error: &str, description: &str) -> String {
        let json = json!({
            "error": error,
            "message": description
        });
        serde_json::to_string(&json).expect("Failed to serialize JSON")
    }

    fn invalid_request(&self) -> HttpResponse {
        HttpResponse::BadRequest()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .body(self.invalid_request.clone())
    }

    fn unauthorized(&self) -> HttpResponse {
        HttpResponse::Unauthorized()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .body(self.unauthorized.clone())
    }

    fn forbidden(&self) -> HttpResponse {
        HttpResponse::Forbidden()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .body(self.forbidden.clone())
    }

    fn server_error(&self) -> HttpResponse {
        HttpResponse::InternalServerError()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .body(self.server_error.clone())
    }

    fn csrf_rejected(&self) -> HttpResponse {
        HttpResponse::BadRequest()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .body(self.csrf_rejected.clone())
    }

    fn uniform_success(&self) -> HttpResponse {
        HttpResponse::Ok()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .body(self.uniform_success.clone())
    }
}

/// Unified response builder for the API surface
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Create a `BadRequest` (400) error response with optional customization
    #[must_use]
    pub fn bad_request() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::BadRequest)
    }

    /// Create an `Unauthorized` (401) error response with optional customization
    #[must_use]
    pub fn unauthorized() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::Unauthorized)
    }

    /// Create a `Forbidden` (403) error response with optional customization
    #[must_use]
    pub fn forbidden() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::Forbidden)
    }

    /// Create a `Conflict` (409) error response with optional customization
    #[must_use]
    pub fn conflict() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::Conflict)
    }

    /// Create an `InternalServerError` (500) error response with optional customization
    #[must_use]
    pub fn internal_server_error() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::InternalServerError)
    }

    /// Create an OK response (200) with JSON content
    #[must_use]
    pub fn ok<T: serde::Serialize>(data: &T) -> HttpResponse {
        HttpResponse::Ok()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .json(data)
    }

    /// The byte-identical success shape for enumeration-sensitive endpoints
    ///
    /// Every caller of this function produces the same response body
    /// regardless of which internal branch executed.
    #[must_use]
    pub fn uniform_success() -> HttpResponse {
        CACHED_RESPONSES.uniform_success()
    }

    /// Cached anti-forgery rejection (400 with a stable error code the
    /// client recognizes for its single refresh-and-retry)
    #[must_use]
    pub fn csrf_rejected() -> HttpResponse {
        CACHED_RESPONSES.csrf_rejected()
    }

    /// Generic authentication failure
    #[must_use]
    pub fn authentication_failed(reason: &str) -> HttpResponse {
        Self::unauthorized()
            .with_error_code("authentication_failed")
            .with_message(reason)
            .build()
    }

    /// Common validation error: missing field
    #[must_use]
    pub fn missing_field(field_name: &str) -> HttpResponse {
        Self::bad_request()
            .with_error_code("missing_field")
            .with_message(&format!("Missing required field: {field_name}"))
            .build()
    }

    /// Common validation error: invalid field
    #[must_use]
    pub fn invalid_field(field_name: &str, reason: &str) -> HttpResponse {
        Self::bad_request()
            .with_error_code("invalid_field")
            .with_message(&format!("Invalid {field_name}: {reason}"))
            .build()
    }
}

/// Builder for error responses with fluent interface
pub struct ErrorResponseBuilder {
    error_type: ErrorType,
    error_code: Option<String>,
    message: Option<String>,
    additional_fields: Option<Value>,
}

/// Supported HTTP error response types
#[derive(Clone)]
enum ErrorType {
    BadRequest,
    Unauthorized,
    Forbidden,
    Conflict,
    InternalServerError,
}

impl ErrorResponseBuilder {
    fn new(error_type: ErrorType) -> Self {
        Self {
            error_type,
            error_code: None,
            message: None,
            additional_fields: None,
        }
    }

    /// Set a custom error code (e.g., "`invalid_request`")
    #[must_use]
    pub fn with_error_code(mut self, code: &str) -> Self {
        self.error_code = Some(code.to_string());
        self
    }

    /// Set a custom error message
    #[must_use]
    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    /// Add additional JSON fields to the response
    #[must_use]
    pub fn with_additional_fields(mut self, fields: Value) -> Self {
        self.additional_fields = Some(fields);
        self
    }

    /// Build the final `HttpResponse`
    #[must_use]
    pub fn build(self) -> HttpResponse {
        if self.error_code.is_none() && self.message.is_none() && self.additional_fields.is_none() {
            return self.build_cached_response();
        }
        self.build_custom_response()
    }

    fn build_cached_response(&self) -> HttpResponse {
        match self.error_type {
            ErrorType::BadRequest => CACHED_RESPONSES.invalid_request(),
            ErrorType::Unauthorized => CACHED_RESPONSES.unauthorized(),
            ErrorType::Forbidden => CACHED_RESPONSES.forbidden(),
            ErrorType::InternalServerError => CACHED_RESPONSES.server_error(),
            ErrorType::Conflict => {
                let error_type = self.error_type.clone();
                ErrorResponseBuilder::new(error_type).build_custom_response()
            }
        }
    }

    fn build_custom_response(self) -> HttpResponse {
        let mut json_body = json!({});

        let error_code = self
            .error_code
            .clone()
            .unwrap_or_else(|| self.default_error_code());
        json_body["error"] = Value::String(error_code);

        let message = self
            .message
            .clone()
            .unwrap_or_else(|| self.default_message());
        json_body["message"] = Value::String(message);

        if let Some(Value::Object(map)) = self.additional_fields {
            for (key, value) in map {
                json_body[key] = value;
            }
        }

        let mut response = match self.error_type {
            ErrorType::BadRequest => HttpResponse::BadRequest(),
            ErrorType::Unauthorized => HttpResponse::Unauthorized(),
            ErrorType::Forbidden => HttpResponse::Forbidden(),
            ErrorType::Conflict => HttpResponse::Conflict(),
            ErrorType::InternalServerError => HttpResponse::InternalServerError(),
        };

        response
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .json(json_body)
    }

    fn default_error_code(&self) -> String {
        match self.error_type {
            ErrorType::BadRequest => "invalid_request",
            ErrorType::Unauthorized => "unauthorized",
            ErrorType::Forbidden => "forbidden",
            ErrorType::Conflict => "conflict",
            ErrorType::InternalServerError => "server_error",
        }
        .to_string()
    }

    fn default_message(&self) -> String {
        match self.error_type {
            ErrorType::BadRequest => "The request is malformed or invalid",
            ErrorType::Unauthorized => "Authentication is required to access this resource",
            ErrorType::Forbidden => "The authenticated principal may not perform this operation",
            ErrorType::Conflict => "The request conflicts with existing state",
            ErrorType::InternalServerError => "An internal server error occurred",
        }
        .to_string()
    }
}

use serde::Serialize;
use std::fmt;

/// Cross-cutting error taxonomy surfaced to callers of the dispatch facade.
///
/// These are the tokens that show up verbatim in `SendResult.error` and in
/// REST error bodies, so the `Display` impl is the wire format, not just a
/// debugging aid.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "detail")]
#[non_exhaustive]
pub enum GatewayErrorKind {
    NotConfigured(String),
    InvalidInput(String),
    TemplateNotFound(String),
    TemplateRenderFailed(String),
    RateLimited(String),
    BackendError(String),
    NoHandler(String),
    AuthDenied(String),
}

impl GatewayErrorKind {
    /// The lowercase snake_case token named in the error taxonomy table.
    pub fn token(&self) -> &'static str {
        match self {
            GatewayErrorKind::NotConfigured(_) => "not_configured",
            GatewayErrorKind::InvalidInput(_) => "invalid_input",
            GatewayErrorKind::TemplateNotFound(_) => "template_not_found",
            GatewayErrorKind::TemplateRenderFailed(_) => "template_render_failed",
            GatewayErrorKind::RateLimited(_) => "rate_limited",
            GatewayErrorKind::BackendError(_) => "backend_error",
            GatewayErrorKind::NoHandler(_) => "no_handler",
            GatewayErrorKind::AuthDenied(_) => "auth_denied",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            GatewayErrorKind::NotConfigured(s)
            | GatewayErrorKind::InvalidInput(s)
            | GatewayErrorKind::TemplateNotFound(s)
            | GatewayErrorKind::TemplateRenderFailed(s)
            | GatewayErrorKind::RateLimited(s)
            | GatewayErrorKind::BackendError(s)
            | GatewayErrorKind::NoHandler(s)
            | GatewayErrorKind::AuthDenied(s) => s,
        }
    }
}

impl fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.token(), self.detail())
    }
}

impl std::error::Error for GatewayErrorKind {}

//! The outcome of matching a request against the active rule tree.

use std::sync::Arc;

use hyper::StatusCode;

use super::instance::MuxPath;

/// Either a chosen path or a terminal status. `Ok` holds a non-owning view
/// into the graph co-owned by the instance whose cache may store this value,
/// so a discarded instance takes its cached verdicts with it.
#[derive(Debug, Clone)]
pub enum Verdict {
    Ok(Arc<MuxPath>),
    NotFound,
    MethodNotAllowed,
    BadRequest,
    Forbidden,
}

impl Verdict {
    pub fn status(&self) -> StatusCode {
        match self {
            Verdict::Ok(_) => StatusCode::OK,
            Verdict::NotFound => StatusCode::NOT_FOUND,
            Verdict::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Verdict::BadRequest => StatusCode::BAD_REQUEST,
            Verdict::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Verdict::Ok(_))
    }

    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Ok(_) => "ok",
            Verdict::NotFound => "not_found",
            Verdict::MethodNotAllowed => "method_not_allowed",
            Verdict::BadRequest => "bad_request",
            Verdict::Forbidden => "forbidden",
        }
    }

    pub fn path(&self) -> Option<&Arc<MuxPath>> {
        match self {
            Verdict::Ok(path) => Some(path),
            _ => None,
        }
    }
}

impl PartialEq for Verdict {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Verdict::Ok(a), Verdict::Ok(b)) => Arc::ptr_eq(a, b),
            (Verdict::NotFound, Verdict::NotFound)
            | (Verdict::MethodNotAllowed, Verdict::MethodNotAllowed)
            | (Verdict::BadRequest, Verdict::BadRequest)
            | (Verdict::Forbidden, Verdict::Forbidden) => true,
            _ => false,
        }
    }
}

//! Results link construction.
//!
//! The frontend is served from the backend's host with the `backend.`
//! label removed, e.g. `https://backend.example.org` -> `https://example.org`.

use crate::domain::RecordId;

const BACKEND_HOST_LABEL: &str = "backend.";

/// Frontend base URL derived from the backend base URL.
pub fn frontend_url(backend_url: &str) -> String {
    backend_url
        .trim_end_matches('/')
        .replace(BACKEND_HOST_LABEL, "")
}

/// Page showing the results of `assessment_id`.
pub fn results_url(backend_url: &str, assessment_id: &RecordId) -> String {
    format!("{}/assessments/{}", frontend_url(backend_url), assessment_id)
}

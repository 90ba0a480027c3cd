//! Cross-origin policy evaluation.
//!
//! [`CorsPolicy::check`] is a pure function of the request method and
//! headers. The HTTP interceptor and the WebSocket upgrade handler both
//! call it and translate the [`CorsDecision`] into their own rejection
//! mechanism (403 response or policy close code).

use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};

use crate::config::CorsSettings;

/// Header sent by browsers describing the fetch's relation to the target.
const SEC_FETCH_SITE: &str = "sec-fetch-site";

/// Outcome of a cross-origin check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsDecision {
    /// No cross-origin concern.
    Success,
    /// Rejected, with the reason.
    Fail(String),
    /// Allowed cross-origin; echo this value in `Access-Control-Allow-Origin`.
    Cors(String),
}

/// Compiled cross-origin policy.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    settings: CorsSettings,
    allow_all: bool,
    methods_header: String,
    headers_header: String,
}

impl CorsPolicy {
    /// Compiles the policy from settings.
    #[must_use]
    pub fn new(settings: CorsSettings) -> Self {
        let allow_all = settings.origins.iter().any(|o| o == "*");
        let methods_header = settings.methods.join(",");
        let headers_header = settings.allowed_headers.join(",");
        Self {
            settings,
            allow_all,
            methods_header,
            headers_header,
        }
    }

    /// Evaluates a request against the policy.
    #[must_use]
    pub fn check(&self, method: &Method, headers: &HeaderMap) -> CorsDecision {
        let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
        let Some(origin) = origin else {
            return CorsDecision::Success;
        };
        if origin == self.settings.base_origin {
            return CorsDecision::Success;
        }
        let same_origin_fetch = headers
            .get(SEC_FETCH_SITE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "same-origin");
        if origin == "null" && same_origin_fetch {
            return CorsDecision::Success;
        }
        if !self.settings.enabled {
            return CorsDecision::Fail("Disabled".to_string());
        }
        if !self.allow_all && !self.settings.origins.iter().any(|o| o == origin) {
            return CorsDecision::Fail("Invalid origin".to_string());
        }
        if *method != Method::OPTIONS && !self.settings.methods.iter().any(|m| m == method.as_str())
        {
            return CorsDecision::Fail("Invalid HTTP method".to_string());
        }
        let allow_origin = if self.allow_all { "*" } else { origin };
        CorsDecision::Cors(allow_origin.to_string())
    }

    /// The service's own origin.
    #[must_use]
    pub fn base_origin(&self) -> &str {
        &self.settings.base_origin
    }

    /// Whether preflight requests continue to the router.
    #[must_use]
    pub const fn preflight_continue(&self) -> bool {
        self.settings.preflight_continue
    }

    /// Status for short-circuited preflight responses.
    #[must_use]
    pub fn options_success_status(&self) -> StatusCode {
        StatusCode::from_u16(self.settings.options_success_status).unwrap_or(StatusCode::NO_CONTENT)
    }

    /// Writes the `Access-Control-Allow-*` headers for `allow_origin`.
    pub fn apply_headers(&self, headers: &mut HeaderMap, allow_origin: &str) {
        if let Ok(value) = HeaderValue::from_str(allow_origin) {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        if !self.methods_header.is_empty()
            && let Ok(value) = HeaderValue::from_str(&self.methods_header)
        {
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, value);
        }
        if !self.headers_header.is_empty()
            && let Ok(value) = HeaderValue::from_str(&self.headers_header)
        {
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
        }
        if self.settings.credentials {
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn settings(origins: &[&str]) -> CorsSettings {
        CorsSettings {
            enabled: true,
            base_origin: "https://app.example".to_string(),
            origins: origins.iter().map(|o| (*o).to_string()).collect(),
            ..CorsSettings::default()
        }
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn missing_origin_is_success() {
        let policy = CorsPolicy::new(settings(&[]));
        assert_eq!(
            policy.check(&Method::POST, &HeaderMap::new()),
            CorsDecision::Success
        );
    }

    #[test]
    fn base_origin_is_success() {
        let policy = CorsPolicy::new(settings(&[]));
        let h = headers(&[("origin", "https://app.example")]);
        assert_eq!(policy.check(&Method::POST, &h), CorsDecision::Success);
    }

    #[test]
    fn null_origin_same_site_is_success() {
        let policy = CorsPolicy::new(settings(&[]));
        let h = headers(&[("origin", "null"), ("sec-fetch-site", "same-origin")]);
        assert_eq!(policy.check(&Method::POST, &h), CorsDecision::Success);
        let cross = headers(&[("origin", "null"), ("sec-fetch-site", "cross-site")]);
        assert_eq!(
            policy.check(&Method::POST, &cross),
            CorsDecision::Fail("Invalid origin".to_string())
        );
    }

    #[test]
    fn listed_origin_is_echoed() {
        let policy = CorsPolicy::new(settings(&["https://partner.example"]));
        let h = headers(&[("origin", "https://partner.example")]);
        assert_eq!(
            policy.check(&Method::POST, &h),
            CorsDecision::Cors("https://partner.example".to_string())
        );
    }

    #[test]
    fn wildcard_echoes_star() {
        let policy = CorsPolicy::new(settings(&["*"]));
        let h = headers(&[("origin", "https://anyone.example")]);
        assert_eq!(
            policy.check(&Method::GET, &h),
            CorsDecision::Cors("*".to_string())
        );
    }

    #[test]
    fn unlisted_origin_fails() {
        let policy = CorsPolicy::new(settings(&["https://partner.example"]));
        let h = headers(&[("origin", "https://evil.example")]);
        assert_eq!(
            policy.check(&Method::POST, &h),
            CorsDecision::Fail("Invalid origin".to_string())
        );
    }

    #[test]
    fn disabled_policy_fails_cross_origin() {
        let policy = CorsPolicy::new(CorsSettings {
            enabled: false,
            ..settings(&["*"])
        });
        let h = headers(&[("origin", "https://partner.example")]);
        assert_eq!(
            policy.check(&Method::POST, &h),
            CorsDecision::Fail("Disabled".to_string())
        );
    }

    #[test]
    fn disallowed_method_fails_but_preflight_passes() {
        let policy = CorsPolicy::new(CorsSettings {
            methods: vec!["GET".to_string()],
            ..settings(&["https://partner.example"])
        });
        let h = headers(&[("origin", "https://partner.example")]);
        assert_eq!(
            policy.check(&Method::POST, &h),
            CorsDecision::Fail("Invalid HTTP method".to_string())
        );
        assert_eq!(
            policy.check(&Method::OPTIONS, &h),
            CorsDecision::Cors("https://partner.example".to_string())
        );
    }

    #[test]
    fn apply_headers_sets_allow_fields() {
        let policy = CorsPolicy::new(CorsSettings {
            credentials: true,
            ..settings(&["*"])
        });
        let mut h = HeaderMap::new();
        policy.apply_headers(&mut h, "*");
        assert_eq!(
            h.get(ACCESS_CONTROL_ALLOW_ORIGIN).and_then(|v| v.to_str().ok()),
            Some("*")
        );
        assert!(h.contains_key(ACCESS_CONTROL_ALLOW_METHODS));
        assert!(h.contains_key(ACCESS_CONTROL_ALLOW_HEADERS));
        assert_eq!(
            h.get(ACCESS_CONTROL_ALLOW_CREDENTIALS)
                .and_then(|v| v.to_str().ok()),
            Some("true")
        );
    }
}

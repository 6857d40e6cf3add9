use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};
use crate::model::UserContext;

/// Axum extractor for UserContext from request headers
///
/// - X-User-Id: caller identifier
/// - X-User-Name: optional display name
///
/// Requests without an identifier run as the anonymous user; the
/// repository decides whether that user may proceed.
#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        match extract_header_value(headers, "x-user-id") {
            Some(user_id) => {
                let user_name = extract_header_value(headers, "x-user-name");
                Ok(UserContext::with_name(user_id, user_name))
            }
            None => Ok(UserContext::anonymous()),
        }
    }
}

/// Extract a non-blank header value as string
fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue, Request};

    #[tokio::test]
    async fn test_user_context_extraction() {
        let request = Request::builder()
            .header("x-user-id", "steward-1")
            .header("x-user-name", "Data Steward")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let user = UserContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.user_id, "steward-1");
        assert_eq!(user.user_name.as_deref(), Some("Data Steward"));
    }

    #[tokio::test]
    async fn test_missing_header_is_anonymous() {
        let request = Request::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();

        let user = UserContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user, UserContext::anonymous());
    }

    #[test]
    fn test_blank_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-user-id"),
            HeaderValue::from_static("  "),
        );
        assert_eq!(extract_header_value(&headers, "x-user-id"), None);
    }
}

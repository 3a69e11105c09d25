//! API utility functions
//!
//! Pure, stateless helpers for request processing, kept apart from the
//! handlers so they can be unit tested.

use axum::body::{Body, Bytes};
use axum::http::HeaderMap;
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::api::error::ApiError;
use crate::pipeline;

/// Header carrying a caller-chosen book id on `POST /books`.
pub const BOOK_ID_HEADER: &str = "X-Book-Id";

/// Validates the Content-Type of an uploaded archive.
///
/// Accepts `application/epub+zip`, `application/zip` and
/// `application/octet-stream` (parameters ignored); a missing header is
/// treated as raw bytes.
pub fn check_archive_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(value) = headers.get(axum::http::header::CONTENT_TYPE) else {
        return Ok(());
    };
    let content_type = value
        .to_str()
        .map_err(|_| ApiError::InvalidPayload("Content-Type is not valid text".into()))?;
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    let accepted = media_type.type_() == mime::APPLICATION
        && matches!(
            media_type.subtype().as_str(),
            "epub+zip" | "zip" | "octet-stream"
        );
    if !accepted {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/epub+zip, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }
    Ok(())
}

/// Book id from [`BOOK_ID_HEADER`], or a fresh UUIDv7 when absent.
pub fn book_id_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    let book_id = match headers.get(BOOK_ID_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| ApiError::InvalidBookId("<non-ascii>".into()))?
            .trim()
            .to_string(),
        None => return Ok(pipeline::new_book_id()),
    };
    pipeline::validate_book_id(&book_id)?;
    Ok(book_id)
}

/// Collect the body, failing with [`ApiError::PayloadTooLarge`] past `max_size`
/// without buffering the excess.
pub async fn read_limited(body: Body, max_size: usize) -> Result<Bytes, ApiError> {
    match Limited::new(body, max_size).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.is::<LengthLimitError>() => Err(ApiError::PayloadTooLarge(max_size)),
        Err(err) => Err(ApiError::Internal(err.to_string())),
    }
}

/// Content type for a served archive resource.
pub fn resource_content_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: &'static str, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_archive_content_type() {
        assert!(check_archive_content_type(&HeaderMap::new()).is_ok());
        assert!(check_archive_content_type(&headers("content-type", "application/epub+zip")).is_ok());
        assert!(check_archive_content_type(&headers("content-type", "application/octet-stream")).is_ok());
        assert!(check_archive_content_type(&headers("content-type", "application/json")).is_err());
        assert!(check_archive_content_type(&headers("content-type", "text/plain")).is_err());
        assert!(check_archive_content_type(&headers("content-type", "invalid")).is_err());
    }

    #[test]
    fn test_book_id_header() {
        let id = book_id_from_headers(&headers("x-book-id", "my-book")).unwrap();
        assert_eq!(id, "my-book");

        let generated = book_id_from_headers(&HeaderMap::new()).unwrap();
        assert!(pipeline::validate_book_id(&generated).is_ok());

        assert!(matches!(
            book_id_from_headers(&headers("x-book-id", "../etc")),
            Err(ApiError::InvalidBookId(_))
        ));
    }

    #[tokio::test]
    async fn test_read_limited() {
        let data = read_limited(Body::from(vec![0u8; 1000]), 1000).await.unwrap();
        assert_eq!(data.len(), 1000);

        let result = read_limited(Body::from(vec![0u8; 1000]), 999).await;
        match result {
            Err(ApiError::PayloadTooLarge(limit)) => assert_eq!(limit, 999),
            _ => panic!("Expected PayloadTooLarge error"),
        }
    }

    #[test]
    fn test_resource_content_type() {
        assert_eq!(resource_content_type("OEBPS/images/map.png"), "image/png");
        assert_eq!(resource_content_type("OEBPS/styles/book.css"), "text/css");
        assert_eq!(resource_content_type("OEBPS/fonts/x.unknownext"), "application/octet-stream");
    }
}

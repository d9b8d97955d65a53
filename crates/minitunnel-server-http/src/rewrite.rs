//! HTML rewriting for path-prefixed tunnels
//!
//! Pages served under `/<client-id>/` would resolve relative links against the
//! relay root. A `<base>` tag right after the opening head tag fixes that.

use minitunnel_proto::TunneledResponse;

/// The `<base>` tag injected for a client
pub fn base_tag(client_id: &str) -> String {
    format!(r#"<base href="/{}/">"#, client_id)
}

/// Prepare an agent response for the public caller
///
/// HTML bodies (first `Content-Type` value contains `text/html`) get the base
/// tag. `Content-Length` is always dropped since the body may have grown.
pub fn rewrite_response(client_id: &str, mut response: TunneledResponse) -> TunneledResponse {
    let is_html = response
        .header_values("Content-Type")
        .and_then(|values| values.first())
        .is_some_and(|content_type| content_type.contains("text/html"));

    if is_html {
        inject_base_tag(&mut response.body, client_id);
    }

    response.remove_header("Content-Length");
    response
}

/// Insert the base tag after the first `<head>`, or failing that the first `<HEAD>`
///
/// Matching is case-sensitive and at most one insertion happens. Returns whether
/// the body was changed.
pub fn inject_base_tag(body: &mut Vec<u8>, client_id: &str) -> bool {
    let Some(end) = find(body, b"<head>").or_else(|| find(body, b"<HEAD>")) else {
        return false;
    };

    let tag = base_tag(client_id);
    let mut rewritten = Vec::with_capacity(body.len() + tag.len());
    rewritten.extend_from_slice(&body[..end]);
    rewritten.extend_from_slice(tag.as_bytes());
    rewritten.extend_from_slice(&body[end..]);
    *body = rewritten;
    true
}

// Offset just past the first occurrence of `needle`
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|start| start + needle.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use minitunnel_proto::HeaderMultimap;

    fn html_response(body: &str) -> TunneledResponse {
        let mut headers = HeaderMultimap::new();
        headers.insert(
            "Content-Type".to_string(),
            vec!["text/html; charset=utf-8".to_string()],
        );
        headers.insert("Content-Length".to_string(), vec![body.len().to_string()]);
        TunneledResponse {
            status_code: 200,
            headers,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_injects_after_lowercase_head() {
        let response = rewrite_response(
            "abc",
            html_response("<html><head><title>t</title></head><head></head></html>"),
        );

        assert_eq!(
            String::from_utf8(response.body.clone()).unwrap(),
            r#"<html><head><base href="/abc/"><title>t</title></head><head></head></html>"#
        );
        assert!(response.header_values("Content-Length").is_none());
    }

    #[test]
    fn test_lowercase_wins_over_earlier_uppercase() {
        let response = rewrite_response("abc", html_response("<HEAD></HEAD><head></head>"));

        assert_eq!(
            String::from_utf8(response.body.clone()).unwrap(),
            r#"<HEAD></HEAD><head><base href="/abc/"></head>"#
        );
    }

    #[test]
    fn test_uppercase_fallback() {
        let response = rewrite_response("abc", html_response("<HTML><HEAD></HEAD></HTML>"));

        assert_eq!(
            String::from_utf8(response.body.clone()).unwrap(),
            r#"<HTML><HEAD><base href="/abc/"></HEAD></HTML>"#
        );
    }

    #[test]
    fn test_no_head_tag_passes_through() {
        let body = r#"<html><Head lang="en"></Head><body>hi</body></html>"#;
        let response = rewrite_response("abc", html_response(body));

        assert_eq!(response.body, body.as_bytes());
        assert!(response.header_values("Content-Length").is_none());
    }

    #[test]
    fn test_non_html_is_untouched() {
        let mut response = html_response("<head></head>");
        response.headers.insert(
            "Content-Type".to_string(),
            vec!["application/json".to_string(), "text/html".to_string()],
        );

        let response = rewrite_response("abc", response);
        assert_eq!(response.body, b"<head></head>");
        assert!(response.header_values("Content-Length").is_none());
        assert_eq!(response.headers.len(), 1);
    }

    #[test]
    fn test_content_type_match_is_case_insensitive_on_name() {
        let mut response = TunneledResponse {
            status_code: 200,
            body: b"<head>".to_vec(),
            ..Default::default()
        };
        response
            .headers
            .insert("content-type".to_string(), vec!["text/html".to_string()]);
        response
            .headers
            .insert("content-length".to_string(), vec!["6".to_string()]);
        response
            .headers
            .insert("x-powered-by".to_string(), vec!["a".to_string(), "b".to_string()]);

        let response = rewrite_response("abc", response);
        assert_eq!(response.body, br#"<head><base href="/abc/">"#);
        assert!(response.header_values("content-length").is_none());
        assert_eq!(
            response.header_values("X-Powered-By"),
            Some(&["a".to_string(), "b".to_string()][..])
        );
    }

    #[test]
    fn test_inject_into_binary_body() {
        let mut body = vec![0xff, 0xfe];
        body.extend_from_slice(b"<head>");
        body.push(0x00);

        assert!(inject_base_tag(&mut body, "id"));
        assert_eq!(&body[..2], &[0xff, 0xfe]);
        assert!(body.ends_with(b"<base href=\"/id/\">\x00"));
    }
}

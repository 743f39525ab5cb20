use attohttpc::Session;
use attohttpc::StatusCode;
use regex::Regex;
use thiserror::Error;

/// Failure to turn a profile handle into a numeric user id. There is no
/// fallback identifier source, so every variant is fatal to the run.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("failed to fetch profile page for \"{permalink}\"")]
    Fetch {
        permalink: String,
        source: attohttpc::Error,
    },
    #[error("profile page for \"{permalink}\" returned status {status}")]
    Status {
        permalink: String,
        status: StatusCode,
    },
    #[error("no user identifier found on profile page for \"{permalink}\"")]
    IdentifierNotFound { permalink: String },
}

/// Resolves a profile handle to the platform's numeric user id by scraping
/// the profile page.
///
/// The id is taken from the `soundcloud:users:<id>` marker in the *last*
/// inlined script block of the page. Earlier blocks can mention other users
/// (related artists, reposts), so only the final block is searched. This ties
/// the resolver to the current page layout; the fixture tests pin the
/// assumption.
pub fn resolve_user_id(
    sess: &Session,
    base_url: &str,
    permalink: &str,
) -> Result<u64, ResolutionError> {
    let resp = sess
        .get(format!("{}/{}", base_url, permalink))
        .send()
        .map_err(|source| ResolutionError::Fetch {
            permalink: permalink.to_string(),
            source,
        })?;
    if !resp.is_success() {
        return Err(ResolutionError::Status {
            permalink: permalink.to_string(),
            status: resp.status(),
        });
    }
    let html = resp.text_utf8().map_err(|source| ResolutionError::Fetch {
        permalink: permalink.to_string(),
        source,
    })?;

    let not_found = || ResolutionError::IdentifierNotFound {
        permalink: permalink.to_string(),
    };

    let script_re = Regex::new(r"<script[^>]*>(.+?)</script>").expect("static pattern");
    let last_script = script_re
        .captures_iter(&html)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(not_found)?;

    let id_re = Regex::new(r"soundcloud:users:(\d+)").expect("static pattern");
    id_re
        .captures(last_script)
        .and_then(|caps| caps.get(1))
        .ok_or_else(not_found)?
        .as_str()
        .parse()
        .map_err(|_| not_found())
}

#[cfg(test)]
mod test {
    use httpmock::MockServer;

    use super::*;

    #[test]
    fn resolves_id_from_last_script_block() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.path("/some-artist");
            then.status(200)
                .header("content-type", "text/html")
                .body(include_str!("../tests/fixtures/profile.html"));
        });

        let id = resolve_user_id(&Session::new(), &server.base_url(), "some-artist").unwrap();

        m.assert();
        assert_eq!(id, 3207);
    }

    #[test]
    fn identifier_in_earlier_script_block_is_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/some-artist");
            then.status(200).header("content-type", "text/html").body(
                "<html><head>\
                 <script>window.__sc = [\"soundcloud:users:3207\"];</script>\
                 <script>!function(){}();</script>\
                 </head><body></body></html>",
            );
        });

        let err =
            resolve_user_id(&Session::new(), &server.base_url(), "some-artist").unwrap_err();
        assert!(matches!(err, ResolutionError::IdentifierNotFound { .. }));
    }

    #[test]
    fn non_success_status_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/gone-artist");
            then.status(404);
        });

        let err =
            resolve_user_id(&Session::new(), &server.base_url(), "gone-artist").unwrap_err();
        match err {
            ResolutionError::Status { status, .. } => assert_eq!(status, StatusCode::NOT_FOUND),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn page_without_script_blocks_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/plain-artist");
            then.status(200).body("<html><body>nothing inlined</body></html>");
        });

        let err =
            resolve_user_id(&Session::new(), &server.base_url(), "plain-artist").unwrap_err();
        assert!(matches!(err, ResolutionError::IdentifierNotFound { .. }));
    }
}

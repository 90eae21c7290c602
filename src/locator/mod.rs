//! Finds the previous stable build's copy of an artifact on the CI server.
//!
//! Every failure on this path is "no history": the first build of a job, an
//! unreachable server, a malformed response or a renamed artifact all end in
//! [`Located::NotFound`], which the pipeline treats as "skip the comparison".

pub mod client;
pub mod metadata;

use std::fmt;

use tracing::{info, warn};
use url::Url;

use crate::artifact::{ArtifactName, BuildRecord, BuildStatus, StoredArtifact};

pub use client::{ApiFormat, CiClient, CiSettings, ClientError};
pub use metadata::{coerce_sentinels, parse_build_record, MetadataError};

/// Why no reference is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundReason {
    /// The metadata request or its parsing failed.
    QueryFailed(String),
    /// The last stable build doesn't report success.
    NotStable(BuildStatus),
    /// The build has no artifact with the same name.
    NoMatch,
    /// The reference download failed or wasn't an image.
    FetchFailed(String),
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundReason::QueryFailed(e) => write!(f, "build metadata unavailable: {}", e),
            NotFoundReason::NotStable(status) => {
                write!(f, "last stable build has status {:?}", status)
            }
            NotFoundReason::NoMatch => f.write_str("no matching artifact in last stable build"),
            NotFoundReason::FetchFailed(e) => write!(f, "reference download failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    Found(Url),
    NotFound(NotFoundReason),
}

/// Source of reference images for the pipeline.
///
/// Implemented over HTTP by [`ReferenceLocator`]; tests substitute their own.
#[allow(async_fn_in_trait)]
pub trait ReferenceSource {
    /// Resolve where the last stable build's copy of `name` can be fetched.
    async fn locate(&self, name: &ArtifactName) -> Located;

    /// Download a located reference.
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, NotFoundReason>;
}

/// Pick the artifact of `record` that corresponds to `name`.
///
/// Pure; the first match in declaration order wins if several exist.
pub fn match_reference<'a>(
    record: &'a BuildRecord,
    name: &ArtifactName,
) -> Result<&'a StoredArtifact, NotFoundReason> {
    if !record.is_success() {
        return Err(NotFoundReason::NotStable(record.status()));
    }

    let matches = record.matching(name);
    if matches.len() > 1 {
        warn!(
            "{} artifacts match {} in build {:?}, using {}",
            matches.len(),
            name,
            record.number(),
            matches[0].file_name
        );
    }
    matches.first().copied().ok_or(NotFoundReason::NoMatch)
}

/// [`ReferenceSource`] backed by the CI server's last stable build.
pub struct ReferenceLocator {
    client: CiClient,
}

impl ReferenceLocator {
    pub fn new(settings: &CiSettings) -> Result<Self, ClientError> {
        Ok(Self {
            client: CiClient::new(settings)?,
        })
    }

    pub fn client(&self) -> &CiClient {
        &self.client
    }

    /// Fetch and parse the last stable build's metadata.
    pub async fn last_stable_build(&self) -> Result<BuildRecord, NotFoundReason> {
        let raw = self
            .client
            .fetch_last_stable_metadata()
            .await
            .map_err(NotFoundReason::QueryFailed)?;
        parse_build_record(&raw).map_err(|e| NotFoundReason::QueryFailed(e.to_string()))
    }

    async fn resolve(&self, name: &ArtifactName) -> Result<Url, NotFoundReason> {
        let record = self.last_stable_build().await?;
        let artifact = match_reference(&record, name)?;
        info!(
            "Reference for {} is {} from build {:?}",
            name,
            artifact.file_name,
            record.number()
        );
        self.client
            .last_stable_artifact_url(&artifact.relative_path)
            .map_err(|e| NotFoundReason::QueryFailed(e.to_string()))
    }
}

impl ReferenceSource for ReferenceLocator {
    async fn locate(&self, name: &ArtifactName) -> Located {
        match self.resolve(name).await {
            Ok(url) => Located::Found(url),
            Err(reason) => {
                warn!("No reference for {}: {}", name, reason);
                Located::NotFound(reason)
            }
        }
    }

    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, NotFoundReason> {
        self.client
            .fetch_bytes(url)
            .await
            .map_err(NotFoundReason::FetchFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    fn ci_settings(base_url: &str) -> CiSettings {
        CiSettings {
            base_url: base_url.to_string(),
            job_name: "cutter".to_string(),
            api_format: ApiFormat::Json,
            timeout_secs: 5,
        }
    }

    /// Answer one HTTP request on a local port. Returns the base URL (with a
    /// `/jenkins` prefix) and a handle yielding the request line received.
    fn serve_once(status: &'static str, body: &'static [u8]) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let header = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(body).unwrap();
            let request = String::from_utf8_lossy(&request).to_string();
            request.lines().next().unwrap_or_default().to_string()
        });
        (format!("http://127.0.0.1:{}/jenkins", port), handle)
    }

    fn record(status: BuildStatus, names: &[&str]) -> BuildRecord {
        BuildRecord::new(
            Some(41),
            status,
            names
                .iter()
                .map(|n| StoredArtifact {
                    file_name: n.to_string(),
                    relative_path: n.to_string(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_match_reference_suffix_agnostic() {
        let rec = record(BuildStatus::Success, &["part_41.gcode", "part_41.png"]);
        let a = match_reference(&rec, &ArtifactName::new("part", 17, "png")).unwrap();
        let b = match_reference(&rec, &ArtifactName::new("part", 42, "png")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.file_name, "part_41.png");
    }

    #[test]
    fn test_match_reference_no_match() {
        let rec = record(BuildStatus::Success, &["lid_41.png"]);
        assert_eq!(
            match_reference(&rec, &ArtifactName::new("part", 42, "png")),
            Err(NotFoundReason::NoMatch)
        );
    }

    #[test]
    fn test_match_reference_requires_success() {
        let rec = record(BuildStatus::Failure, &["part_41.png"]);
        assert_eq!(
            match_reference(&rec, &ArtifactName::new("part", 42, "png")),
            Err(NotFoundReason::NotStable(BuildStatus::Failure))
        );
    }

    #[test]
    fn test_match_reference_first_wins() {
        let rec = BuildRecord::new(
            Some(41),
            BuildStatus::Success,
            vec![
                StoredArtifact {
                    file_name: "part_41.png".to_string(),
                    relative_path: "a/part_41.png".to_string(),
                },
                StoredArtifact {
                    file_name: "part_41.png".to_string(),
                    relative_path: "b/part_41.png".to_string(),
                },
            ],
        );
        let found = match_reference(&rec, &ArtifactName::new("part", 42, "png")).unwrap();
        assert_eq!(found.relative_path, "a/part_41.png");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_not_found() {
        let locator = ReferenceLocator::new(&ci_settings("http://127.0.0.1:9")).unwrap();
        let located = locator.locate(&ArtifactName::new("part", 42, "png")).await;
        assert!(matches!(
            located,
            Located::NotFound(NotFoundReason::QueryFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_locate_resolves_artifact_url() {
        let body = br#"{"number": 41, "result": "SUCCESS", "artifacts": [
            {"fileName": "part_41.gcode", "relativePath": "out/part_41.gcode"},
            {"fileName": "part_41.png", "relativePath": "out/part_41.png"}]}"#;
        let (base, server) = serve_once("200 OK", body);

        let locator = ReferenceLocator::new(&ci_settings(&base)).unwrap();
        let located = locator.locate(&ArtifactName::new("part", 42, "png")).await;

        assert_eq!(
            server.join().unwrap(),
            "GET /jenkins/job/cutter/lastStableBuild/api/json HTTP/1.1"
        );
        let expected = Url::parse(&format!(
            "{}/job/cutter/lastStableBuild/artifact/out/part_41.png",
            base
        ))
        .unwrap();
        assert_eq!(located, Located::Found(expected));
    }

    #[tokio::test]
    async fn test_metadata_http_error_is_query_failed() {
        let (base, server) = serve_once("404 Not Found", b"Not Found");

        let locator = ReferenceLocator::new(&ci_settings(&base)).unwrap();
        let located = locator.locate(&ArtifactName::new("part", 42, "png")).await;
        server.join().unwrap();

        match located {
            Located::NotFound(NotFoundReason::QueryFailed(msg)) => {
                assert!(msg.contains("404"), "unexpected message: {}", msg)
            }
            other => panic!("expected QueryFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let (base, server) = serve_once("200 OK", b"\x89PNG fake");

        let locator = ReferenceLocator::new(&ci_settings(&base)).unwrap();
        let url = locator
            .client()
            .last_stable_artifact_url("out/part_41.png")
            .unwrap();
        let bytes = locator.fetch(&url).await.unwrap();

        assert_eq!(bytes, b"\x89PNG fake".to_vec());
        assert_eq!(
            server.join().unwrap(),
            "GET /jenkins/job/cutter/lastStableBuild/artifact/out/part_41.png HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_fetch_http_error_is_fetch_failed() {
        let (base, server) = serve_once("404 Not Found", b"");

        let locator = ReferenceLocator::new(&ci_settings(&base)).unwrap();
        let url = locator
            .client()
            .last_stable_artifact_url("out/part_41.png")
            .unwrap();
        let result = locator.fetch(&url).await;
        server.join().unwrap();

        assert!(matches!(result, Err(NotFoundReason::FetchFailed(msg)) if msg.contains("404")));
    }
}

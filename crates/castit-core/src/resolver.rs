//! Classifies the requested media reference and, for local files, computes the
//! URL the device will fetch from the ephemeral file server.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::error::ResolveError;
use crate::protocol::{content_type_for, MediaKind, MediaRequest};

pub const STREAMING_SERVICE_SCHEME: &str = "spotify";

/// Outcome of scheme classification, before any filesystem access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriClass {
    Remote,
    StreamingService,
    LocalPath,
}

/// Options carried from the CLI into the resolved request.
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub serve_port: u16,
    pub host: IpAddr,
    pub autoplay: bool,
    pub volume: Option<f32>,
}

/// Returns the URL scheme of `raw` if it carries one (`scheme://…` or the
/// streaming-service `spotify:` form).
fn scheme_of(raw: &str) -> Option<&str> {
    let (head, rest) = raw.split_once(':')?;
    let valid = head
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && head
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid {
        return None;
    }
    if rest.starts_with("//") || head.eq_ignore_ascii_case(STREAMING_SERVICE_SCHEME) {
        Some(head)
    } else {
        None
    }
}

/// Classify without touching the filesystem.  Any scheme other than
/// `https://` or the streaming-service scheme is rejected.
pub fn classify(raw: &str) -> Result<UriClass, ResolveError> {
    match scheme_of(raw) {
        None => Ok(UriClass::LocalPath),
        Some(s) if s.eq_ignore_ascii_case("https") => Ok(UriClass::Remote),
        Some(s) if s.eq_ignore_ascii_case(STREAMING_SERVICE_SCHEME) => {
            Ok(UriClass::StreamingService)
        }
        Some(s) => Err(ResolveError::UnsupportedScheme {
            scheme: s.to_string(),
            uri: raw.to_string(),
        }),
    }
}

/// Pieces of a local file exposed over HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMedia {
    pub url: String,
    pub root: PathBuf,
    pub file_name: String,
}

/// `http://<host>:<port>/<basename>`, plus the directory to serve.
pub fn local_media_url(path: &Path, host: IpAddr, port: u16) -> Option<LocalMedia> {
    let file_name = path.file_name()?.to_str()?.to_string();
    let root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let host = match host {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    };
    let url = format!(
        "http://{}:{}/{}",
        host,
        port,
        urlencoding::encode(&file_name)
    );
    Some(LocalMedia {
        url,
        root,
        file_name,
    })
}

/// Fully resolve a media reference into an immutable [`MediaRequest`].
pub fn resolve(raw: &str, opts: &ResolveOptions) -> Result<MediaRequest, ResolveError> {
    let raw = raw.trim();
    let (resolved_uri, title, content_type, kind) = match classify(raw)? {
        UriClass::Remote => (
            raw.to_string(),
            remote_title(raw),
            content_type_for(raw).to_string(),
            MediaKind::Remote,
        ),
        UriClass::StreamingService => (
            raw.to_string(),
            raw.to_string(),
            "application/x-spotify".to_string(),
            MediaKind::StreamingService,
        ),
        UriClass::LocalPath => {
            let path = absolute_file(raw)?;
            let local = local_media_url(&path, opts.host, opts.serve_port)
                .ok_or_else(|| ResolveError::NotAFile(path.clone()))?;
            let content_type = content_type_for(&local.file_name).to_string();
            (
                local.url,
                local.file_name.clone(),
                content_type,
                MediaKind::LocalFile {
                    root: local.root,
                    file_name: local.file_name,
                },
            )
        }
    };

    Ok(MediaRequest {
        raw_uri: raw.to_string(),
        resolved_uri,
        title,
        content_type,
        autoplay: opts.autoplay,
        volume: opts.volume,
        kind,
    })
}

/// Absolute form of `raw` without following symlinks, so the served name and
/// directory are the ones the user gave.
fn absolute_file(raw: &str) -> Result<PathBuf, ResolveError> {
    let given = PathBuf::from(raw);
    let joined = if given.is_absolute() {
        given
    } else {
        let cwd = std::env::current_dir().map_err(|source| ResolveError::Io {
            path: given.clone(),
            source,
        })?;
        cwd.join(given)
    };
    // `components()` drops interior `.` segments.
    let path: PathBuf = joined.components().collect();

    let meta = std::fs::metadata(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ResolveError::NotFound(path.clone()),
        _ => ResolveError::Io {
            path: path.clone(),
            source: e,
        },
    })?;
    if !meta.is_file() {
        return Err(ResolveError::NotAFile(path));
    }
    Ok(path)
}

fn remote_title(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .find(|seg| !seg.is_empty() && !seg.contains(':'))
        .and_then(|seg| urlencoding::decode(seg).ok())
        .map(|s| s.into_owned())
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const HOST: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

    fn opts() -> ResolveOptions {
        ResolveOptions {
            serve_port: 8000,
            host: HOST,
            autoplay: true,
            volume: None,
        }
    }

    #[test]
    fn test_local_path_url() {
        let local = local_media_url(Path::new("/home/user/song.mp3"), HOST, 8000).unwrap();
        assert_eq!(local.url, "http://192.168.1.20:8000/song.mp3");
        assert_eq!(local.root, PathBuf::from("/home/user"));
        assert_eq!(local.file_name, "song.mp3");
    }

    #[test]
    fn test_local_path_url_encodes_basename() {
        let local = local_media_url(Path::new("/m/My Song #1.mp3"), HOST, 9000).unwrap();
        assert_eq!(local.url, "http://192.168.1.20:9000/My%20Song%20%231.mp3");
        assert_eq!(local.file_name, "My Song #1.mp3");
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("/home/user/song.mp3").unwrap(), UriClass::LocalPath);
        assert_eq!(classify("song.mp3").unwrap(), UriClass::LocalPath);
        assert_eq!(classify("https://ex.com/a.mp4").unwrap(), UriClass::Remote);
        assert_eq!(
            classify("spotify:track:4uLU6hMCjMI75M1A2tKUQC").unwrap(),
            UriClass::StreamingService
        );
        assert!(matches!(
            classify("ftp://host/x"),
            Err(ResolveError::UnsupportedScheme { ref scheme, .. }) if scheme == "ftp"
        ));
        assert!(classify("http://host/x").is_err());
        assert!(classify("file:///tmp/x.mp3").is_err());
    }

    #[test]
    fn test_remote_is_unchanged() {
        let req = resolve("https://ex.com/a.mp4", &opts()).unwrap();
        assert_eq!(req.resolved_uri, "https://ex.com/a.mp4");
        assert_eq!(req.title, "a.mp4");
        assert_eq!(req.kind, MediaKind::Remote);
        assert!(!req.needs_server());
    }

    #[test]
    fn test_streaming_service_is_unchanged() {
        let uri = "spotify:track:4uLU6hMCjMI75M1A2tKUQC";
        let req = resolve(uri, &opts()).unwrap();
        assert_eq!(req.resolved_uri, uri);
        assert_eq!(req.kind, MediaKind::StreamingService);
        assert!(!req.needs_server());
    }

    #[test]
    fn test_local_file_resolves_against_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.webm");
        std::fs::write(&file, b"data").unwrap();

        let req = resolve(file.to_str().unwrap(), &opts()).unwrap();
        assert_eq!(req.resolved_uri, "http://192.168.1.20:8000/clip.webm");
        assert_eq!(req.title, "clip.webm");
        assert_eq!(req.content_type, "video/webm");
        assert!(req.needs_server());
        match req.kind {
            MediaKind::LocalFile { root, file_name } => {
                assert_eq!(root, dir.path());
                assert_eq!(file_name, "clip.webm");
            }
            other => panic!("expected local file, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_is_served_under_its_own_name() {
        let target_dir = tempfile::tempdir().unwrap();
        let target = target_dir.path().join("take-3-final.mp3");
        std::fs::write(&target, b"data").unwrap();
        let link_dir = tempfile::tempdir().unwrap();
        let link = link_dir.path().join("song.mp3");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let req = resolve(link.to_str().unwrap(), &opts()).unwrap();
        assert_eq!(req.resolved_uri, "http://192.168.1.20:8000/song.mp3");
        match req.kind {
            MediaKind::LocalFile { root, file_name } => {
                assert_eq!(root, link_dir.path());
                assert_eq!(file_name, "song.mp3");
            }
            other => panic!("expected local file, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("gone.mp3");
        std::os::unix::fs::symlink(dir.path().join("missing.mp3"), &link).unwrap();
        let err = resolve(link.to_str().unwrap(), &opts()).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[test]
    fn test_missing_local_file_is_rejected() {
        let err = resolve("/definitely/not/here.mp3", &opts()).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[test]
    fn test_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(dir.path().to_str().unwrap(), &opts()).unwrap_err();
        assert!(matches!(err, ResolveError::NotAFile(_)));
    }
}

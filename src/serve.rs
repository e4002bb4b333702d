//! Development server for watch mode.
//!
//! Serves the build output with `tiny_http`. Request paths resolve the way a
//! static host with pretty URLs would:
//!
//! | Request     | Served                                 |
//! |-------------|----------------------------------------|
//! | `/`         | `index.html`                           |
//! | `/blog/`    | `blog/index.html`, else `blog.html`    |
//! | `/notes`    | `notes` if a file, else `notes.html`   |
//! | `/a%20b.txt`| `a b.txt`                              |
//!
//! Anything else is a plain-text 404. The server blocks in [`DevServer::run`]
//! until [`DevServer::shutdown_on_ctrlc`] or a [`ShutdownHandle`] unblocks it.

use crate::config::ServeConfig;
use std::fs;
use std::io::{self, Cursor};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tiny_http::{Header, Request, Response, Server, StatusCode};

/// Try binding to port, retry with incremented port if in use
const MAX_PORT_RETRIES: u16 = 10;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("serve.interface `{0}` is not an IP address")]
    Interface(String),
    #[error("Failed to bind after {MAX_PORT_RETRIES} attempts (ports {first}-{last})")]
    Bind {
        first: u16,
        last: u16,
        #[source]
        source: io::Error,
    },
    #[error("Failed to set Ctrl+C handler")]
    Signal(#[from] ctrlc::Error),
}

/// Unblocks a running [`DevServer`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<Server>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.unblock();
    }
}

pub struct DevServer {
    root: PathBuf,
    server: Arc<Server>,
    addr: SocketAddr,
}

impl DevServer {
    /// Bind to the configured interface, moving up from the configured port
    /// when it is taken.
    pub fn bind(root: impl Into<PathBuf>, config: &ServeConfig) -> Result<Self, ServeError> {
        let interface: IpAddr = config
            .interface
            .parse()
            .map_err(|_| ServeError::Interface(config.interface.clone()))?;
        let (server, addr) = try_bind_port(interface, config.port, MAX_PORT_RETRIES)?;
        Ok(Self {
            root: root.into(),
            server: Arc::new(server),
            addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.server.clone())
    }

    /// Unblock the server on Ctrl+C. Only one handler may be set per process.
    pub fn shutdown_on_ctrlc(
        &self,
        on_shutdown: impl Fn() + Send + 'static,
    ) -> Result<(), ServeError> {
        let handle = self.shutdown_handle();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            on_shutdown();
            handle.shutdown();
        })?;
        Ok(())
    }

    /// Handle requests until shut down.
    pub fn run(&self) {
        tracing::info!("serving {} at http://{}", self.root.display(), self.addr);
        for request in self.server.incoming_requests() {
            if let Err(err) = handle_request(request, &self.root) {
                tracing::warn!("request error: {err}");
            }
        }
    }
}

fn try_bind_port(
    interface: IpAddr,
    base_port: u16,
    max_retries: u16,
) -> Result<(Server, SocketAddr), ServeError> {
    let mut offset = 0;
    loop {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::new(interface, port);
        match Server::http(addr) {
            Ok(server) => {
                if offset > 0 {
                    tracing::info!("port {base_port} in use, using {port} instead");
                }
                // Port 0 asks the OS for a free port; report the real one.
                let addr = server.server_addr().to_ip().unwrap_or(addr);
                return Ok((server, addr));
            }
            Err(_) if offset + 1 < max_retries => offset += 1,
            Err(err) => {
                return Err(ServeError::Bind {
                    first: base_port,
                    last: port,
                    source: io::Error::other(err),
                });
            }
        }
    }
}

// ============================================================================
// Request Handling
// ============================================================================

/// Map a request URL onto a file under `root`.
///
/// Returns `None` for paths that climb out of `root` or match nothing.
pub fn resolve_request(root: &Path, url: &str) -> Option<PathBuf> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let decoded = urlencoding::decode(path).ok()?;
    let segments: Vec<&str> = decoded.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    if segments.contains(&"..") {
        return None;
    }

    let local = segments.iter().fold(root.to_path_buf(), |path, s| path.join(s));
    if local.is_file() {
        return Some(local);
    }
    let index = local.join("index.html");
    if index.is_file() {
        return Some(index);
    }
    let (last, parents) = segments.split_last()?;
    let sibling = parents
        .iter()
        .fold(root.to_path_buf(), |path, s| path.join(s))
        .join(format!("{last}.html"));
    sibling.is_file().then_some(sibling)
}

fn handle_request(request: Request, root: &Path) -> io::Result<()> {
    let Some(path) = resolve_request(root, request.url()) else {
        tracing::debug!("404 {}", request.url());
        return serve_not_found(request);
    };
    let content = fs::read(&path)?;
    let mut response = Response::from_data(content);
    if let Some(header) = content_type_header(content_type(&path)) {
        response.add_header(header);
    }
    request.respond(response)
}

fn serve_not_found(request: Request) -> io::Result<()> {
    let body = "404 Not Found";
    let headers = content_type_header("text/plain; charset=utf-8").into_iter().collect();
    let response = Response::new(
        StatusCode(404),
        headers,
        Cursor::new(body),
        Some(body.len()),
        None,
    );
    request.respond(response)
}

fn content_type_header(value: &str) -> Option<Header> {
    Header::from_bytes("Content-Type", value).ok()
}

/// Guess MIME content type from file extension.
///
/// Returns `application/octet-stream` for unknown extensions.
pub fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        // Web content
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "application/javascript; charset=utf-8",
        Some("json" | "map") => "application/json; charset=utf-8",
        Some("xml") => "application/xml; charset=utf-8",
        Some("webmanifest") => "application/manifest+json",

        // Images
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("ico") => "image/x-icon",

        // Fonts
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",

        // Documents
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain; charset=utf-8",
        Some("md") => "text/markdown; charset=utf-8",

        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_file;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use tempfile::TempDir;

    fn site() -> TempDir {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "index.html", "home");
        write_file(tmp.path(), "blog/index.html", "blog");
        write_file(tmp.path(), "notes.html", "notes");
        write_file(tmp.path(), "a b.txt", "spaced");
        write_file(tmp.path(), "global-1a2b3c4d.css", "body{}");
        tmp
    }

    // =========================================================================
    // Path resolution
    // =========================================================================

    #[test]
    fn resolves_directories_to_index() {
        let tmp = site();
        let root = tmp.path();
        assert_eq!(resolve_request(root, "/"), Some(root.join("index.html")));
        assert_eq!(resolve_request(root, "/blog/"), Some(root.join("blog/index.html")));
        assert_eq!(resolve_request(root, "/blog"), Some(root.join("blog/index.html")));
    }

    #[test]
    fn resolves_pretty_links_to_loose_pages() {
        let tmp = site();
        let root = tmp.path();
        assert_eq!(resolve_request(root, "/notes"), Some(root.join("notes.html")));
        assert_eq!(resolve_request(root, "/notes/"), Some(root.join("notes.html")));
        assert_eq!(resolve_request(root, "/notes.html"), Some(root.join("notes.html")));
    }

    #[test]
    fn strips_query_and_decodes() {
        let tmp = site();
        let root = tmp.path();
        assert_eq!(
            resolve_request(root, "/global-1a2b3c4d.css?t=123"),
            Some(root.join("global-1a2b3c4d.css"))
        );
        assert_eq!(resolve_request(root, "/a%20b.txt"), Some(root.join("a b.txt")));
        assert_eq!(resolve_request(root, "/#top"), Some(root.join("index.html")));
    }

    #[test]
    fn rejects_missing_and_escaping_paths() {
        let tmp = site();
        let root = tmp.path();
        assert_eq!(resolve_request(root, "/missing"), None);
        assert_eq!(resolve_request(root, "/../etc/passwd"), None);
        assert_eq!(resolve_request(root, "/blog/%2E%2E/index.html"), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type(Path::new("a.html")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("a.css")), "text/css; charset=utf-8");
        assert_eq!(content_type(Path::new("feed.json")), "application/json; charset=utf-8");
        assert_eq!(content_type(Path::new("font.woff2")), "font/woff2");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
    }

    // =========================================================================
    // Server
    // =========================================================================

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(
            stream,
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn serves_files_until_shut_down() {
        let tmp = site();
        let config = ServeConfig {
            interface: "127.0.0.1".into(),
            port: 0,
        };
        let server = DevServer::bind(tmp.path(), &config).unwrap();
        let addr = server.addr();
        let handle = server.shutdown_handle();
        let thread = std::thread::spawn(move || server.run());

        let ok = get(addr, "/blog/");
        assert!(ok.starts_with("HTTP/1.1 200"));
        assert!(ok.contains("text/html"));
        assert!(ok.ends_with("blog"));

        let missing = get(addr, "/nope");
        assert!(missing.starts_with("HTTP/1.1 404"));

        handle.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn bad_interface_is_an_error() {
        let config = ServeConfig {
            interface: "localhost".into(),
            port: 0,
        };
        assert!(matches!(
            DevServer::bind("/tmp", &config),
            Err(ServeError::Interface(_))
        ));
    }
}

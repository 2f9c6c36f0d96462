//! Local HTTP callback server for the interactive sign-in redirect.
//!
//! Listens on the host/port of the configured loopback redirect URI,
//! answers the browser with a small page and hands the callback URL back to
//! the provider.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use url::Url;

use crate::mail::escape_html;

/// Result from the callback server.
#[derive(Debug, PartialEq, Eq)]
pub enum CallbackResult {
    /// Received a callback; carries the full URL including the query.
    Success(String),
    /// The waiting side went away.
    Cancelled,
    /// Nobody completed sign-in before the deadline.
    TimedOut,
    /// Error occurred.
    Error(String),
}

/// A bound, not yet serving, callback listener.
#[derive(Debug)]
pub struct CallbackServer {
    listener: TcpListener,
    /// Scheme and authority used to rebuild the full callback URL.
    origin: String,
    path: String,
}

impl CallbackServer {
    /// Bind to the loopback address named by `redirect_uri`.
    ///
    /// Port 0 picks a free port; see [`CallbackServer::port`].
    pub fn bind(redirect_uri: &Url) -> Result<Self, String> {
        let host = redirect_uri
            .host_str()
            .ok_or_else(|| "redirect URI has no host".to_string())?;
        if !matches!(host, "localhost" | "127.0.0.1" | "[::1]") {
            return Err(format!("redirect URI host {} is not a loopback address", host));
        }
        let port = redirect_uri
            .port_or_known_default()
            .ok_or_else(|| "redirect URI has no port".to_string())?;

        let bind_host = if host == "[::1]" { "[::1]" } else { "127.0.0.1" };
        let addr = format!("{}:{}", bind_host, port);
        let listener = TcpListener::bind(&addr).map_err(|e| {
            error!("Failed to bind callback server to {}: {}", addr, e);
            format!("Failed to start server: {}", e)
        })?;

        listener
            .set_nonblocking(true)
            .map_err(|e| format!("Server configuration error: {}", e))?;

        let port = listener.local_addr().map(|a| a.port()).unwrap_or(port);
        info!("OAuth callback server listening on {}:{}", bind_host, port);

        Ok(Self {
            listener,
            origin: format!("{}://{}:{}", redirect_uri.scheme(), host, port),
            path: redirect_uri.path().to_string(),
        })
    }

    /// The port actually bound.
    pub fn port(&self) -> Option<u16> {
        self.listener.local_addr().ok().map(|a| a.port())
    }

    /// Block until one callback arrives, the cancel channel fires or closes,
    /// or `timeout` elapses.
    pub fn wait_for_callback(self, cancel_rx: mpsc::Receiver<()>, timeout: Duration) -> CallbackResult {
        let deadline = Instant::now() + timeout;

        loop {
            match cancel_rx.try_recv() {
                Ok(()) | Err(mpsc::TryRecvError::Disconnected) => {
                    info!("Callback server cancelled");
                    return CallbackResult::Cancelled;
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }

            if Instant::now() >= deadline {
                info!("Callback server timed out");
                return CallbackResult::TimedOut;
            }

            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    debug!("Connection from {}", peer_addr);
                    if let Some(url) = self.handle_connection(stream) {
                        info!("OAuth callback received");
                        return CallbackResult::Success(url);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    return CallbackResult::Error(format!("Connection error: {}", e));
                }
            }
        }
    }

    /// Returns the full callback URL if this was the redirect request.
    fn handle_connection(&self, mut stream: TcpStream) -> Option<String> {
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

        let mut buffer = [0; 4096];
        let bytes_read = match stream.read(&mut buffer) {
            Ok(n) => n,
            Err(e) => {
                debug!("Failed to read request: {}", e);
                return None;
            }
        };

        let request = String::from_utf8_lossy(&buffer[..bytes_read]);
        let request_line = request.lines().next()?;
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
            send_response(&mut stream, 400, "text/plain", "Bad Request");
            return None;
        };

        if method != "GET" {
            send_response(&mut stream, 405, "text/plain", "Method Not Allowed");
            return None;
        }

        let path = target.split('?').next().unwrap_or(target);
        if path != self.path {
            send_response(&mut stream, 404, "text/plain", "Not Found");
            return None;
        }

        let query = target.split_once('?').map(|(_, q)| q).unwrap_or("");
        let has_param = |name: &str| {
            query
                .split('&')
                .any(|pair| pair.split('=').next() == Some(name))
        };

        if has_param("error") {
            send_response(&mut stream, 200, "text/html; charset=utf-8", &failure_page(query));
        } else if has_param("code") {
            send_response(&mut stream, 200, "text/html; charset=utf-8", SUCCESS_PAGE);
        } else {
            send_response(&mut stream, 400, "text/plain", "Missing authorization code");
            return None;
        }

        Some(format!("{}{}", self.origin, target))
    }
}

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Signed in</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 4rem;">
    <h1>You're signed in</h1>
    <p>Return to graph-connect. You can close this tab now.</p>
</body>
</html>"#;

fn failure_page(query: &str) -> String {
    let description = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("error_description="))
        .map(|raw| {
            urlencoding::decode(&raw.replace('+', " "))
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| "Authentication failed".into())
        })
        .unwrap_or_else(|| "Authentication was cancelled or failed.".to_string());

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Sign-in failed</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 4rem;">
    <h1>Sign-in failed</h1>
    <p>{}</p>
    <p>You can close this tab and try again.</p>
</body>
</html>"#,
        escape_html(&description)
    )
}

fn send_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &str) {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        content_type,
        body.len(),
        body
    );

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(port: u16, request_line: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(stream, "{}\r\nHost: localhost\r\n\r\n", request_line).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn bind_any() -> CallbackServer {
        CallbackServer::bind(&Url::parse("http://localhost:0/callback").unwrap()).unwrap()
    }

    #[test]
    fn test_rejects_non_loopback_redirect() {
        let url = Url::parse("https://example.com/callback").unwrap();
        assert!(CallbackServer::bind(&url).is_err());
    }

    #[test]
    fn test_receives_code_callback() {
        let server = bind_any();
        let port = server.port().unwrap();
        let (_cancel_tx, cancel_rx) = mpsc::channel();

        let waiter =
            std::thread::spawn(move || server.wait_for_callback(cancel_rx, Duration::from_secs(10)));

        let stray = send(port, "GET /favicon.ico HTTP/1.1");
        assert!(stray.starts_with("HTTP/1.1 404"));

        let response = send(port, "GET /callback?code=abc123&state=xyz789 HTTP/1.1");
        assert!(response.starts_with("HTTP/1.1 200"));

        let result = waiter.join().unwrap();
        assert_eq!(
            result,
            CallbackResult::Success(format!(
                "http://localhost:{}/callback?code=abc123&state=xyz789",
                port
            ))
        );
    }

    #[test]
    fn test_error_callback_is_returned() {
        let server = bind_any();
        let port = server.port().unwrap();
        let (_cancel_tx, cancel_rx) = mpsc::channel();

        let waiter =
            std::thread::spawn(move || server.wait_for_callback(cancel_rx, Duration::from_secs(10)));

        let response = send(
            port,
            "GET /callback?error=access_denied&error_description=User+cancelled HTTP/1.1",
        );
        assert!(response.contains("User cancelled"));

        match waiter.join().unwrap() {
            CallbackResult::Success(url) => assert!(url.contains("error=access_denied")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_dropped_sender_cancels() {
        let server = bind_any();
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        drop(cancel_tx);

        assert_eq!(
            server.wait_for_callback(cancel_rx, Duration::from_secs(10)),
            CallbackResult::Cancelled
        );
    }

    #[test]
    fn test_times_out() {
        let server = bind_any();
        let (_cancel_tx, cancel_rx) = mpsc::channel::<()>();

        assert_eq!(
            server.wait_for_callback(cancel_rx, Duration::from_millis(50)),
            CallbackResult::TimedOut
        );
    }
}

//! Blocking HTTP with bounded retries, used by the remote script source and
//! the hosted speech synthesizer.

use std::io::Read;
use std::thread;
use std::time::Duration;

/// Timeouts and retry budget for one logical request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub attempts: usize,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Default policy with the given read timeout.
    pub fn with_timeout(read_timeout: Duration) -> Self {
        RetryPolicy {
            read_timeout,
            ..RetryPolicy::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

fn status_message(status: u16, response: ureq::Response) -> String {
    let body = response.into_string().unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP status {status}")
    } else {
        let truncated: String = body.chars().take(240).collect();
        format!("HTTP status {status} ({truncated})")
    }
}

/// Run `send` until it succeeds, fails hard, or the budget is spent.
/// Transport errors and 408/429/5xx are retried; other statuses are not.
fn call_with_retries<F>(policy: &RetryPolicy, send: F) -> Result<ureq::Response, String>
where
    F: Fn(&ureq::Agent) -> Result<ureq::Response, ureq::Error>,
{
    let attempts = policy.attempts.max(1);
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(policy.connect_timeout)
        .timeout_read(policy.read_timeout)
        .timeout_write(policy.read_timeout)
        .build();

    let mut last_error = String::from("no attempt made");
    for attempt in 1..=attempts {
        match send(&agent) {
            Ok(response) => return Ok(response),
            Err(ureq::Error::Status(status, response)) => {
                let message = status_message(status, response);
                if !should_retry_status(status) {
                    return Err(format!("request failed: {message}"));
                }
                last_error = message;
            }
            Err(ureq::Error::Transport(err)) => {
                last_error = format!("transport error: {err}");
            }
        }
        if attempt < attempts {
            tracing::debug!(attempt, error = %last_error, "retrying request");
            thread::sleep(policy.retry_delay);
        }
    }

    Err(format!(
        "request failed after {attempts} attempt(s): {last_error}"
    ))
}

/// GET `url` and return the body as text.
pub fn get_text(url: &str, policy: &RetryPolicy) -> Result<String, String> {
    let response = call_with_retries(policy, |agent| agent.get(url).call())?;
    response
        .into_string()
        .map_err(|e| format!("request failed: response decode failed: {e}"))
}

/// POST a JSON body and return the raw response bytes.
pub fn post_json_for_bytes(
    url: &str,
    headers: &[(&str, &str)],
    body: &serde_json::Value,
    policy: &RetryPolicy,
) -> Result<Vec<u8>, String> {
    let response = call_with_retries(policy, |agent| {
        let mut request = agent.post(url);
        for (name, value) in headers {
            request = request.set(name, value);
        }
        request.send_json(body.clone())
    })?;

    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .map_err(|e| format!("request failed: reading body: {e}"))?;
    Ok(bytes)
}

#[cfg(test)]
pub(crate) mod test_server {
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, mpsc};
    use std::thread::JoinHandle;
    use std::time::Duration;

    /// Local server answering each connection with the next scripted
    /// `(status, body)` pair, then 200 "ok" once the script runs out.
    pub struct TestServer {
        pub url: String,
        requests: Arc<AtomicUsize>,
        shutdown: mpsc::Sender<()>,
        handle: Option<JoinHandle<()>>,
    }

    impl TestServer {
        pub fn spawn(replies: Vec<(u16, &str)>) -> Self {
            let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
            listener.set_nonblocking(true).unwrap();
            let addr = listener.local_addr().unwrap();

            let replies: VecDeque<(u16, String)> = replies
                .into_iter()
                .map(|(status, body)| (status, body.to_string()))
                .collect();
            let replies = Arc::new(Mutex::new(replies));
            let requests = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&requests);
            let (shutdown, stop) = mpsc::channel::<()>();

            let handle = std::thread::spawn(move || {
                while stop.try_recv().is_err() {
                    match listener.accept() {
                        Ok((mut stream, _)) => {
                            counter.fetch_add(1, Ordering::SeqCst);
                            let (status, body) = replies
                                .lock()
                                .unwrap()
                                .pop_front()
                                .unwrap_or((200, "ok".to_string()));
                            let _ = read_request(&mut stream);
                            let _ = write_response(&mut stream, status, &body);
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            std::thread::sleep(Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            });

            TestServer {
                url: format!("http://{addr}"),
                requests,
                shutdown,
                handle: Some(handle),
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            let _ = self.shutdown.send(());
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn read_request(stream: &mut TcpStream) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Duration::from_millis(200)))?;
        let mut buf = [0u8; 4096];
        let mut data = Vec::new();
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    data.extend_from_slice(&buf[..n]);
                    if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                        let head = String::from_utf8_lossy(&data[..end]).to_lowercase();
                        let length = head
                            .lines()
                            .find_map(|l| l.strip_prefix("content-length:"))
                            .and_then(|v| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if data.len() >= end + 4 + length {
                            break;
                        }
                    }
                }
                Err(_) => break,
            }
        }
        Ok(())
    }

    fn write_response(stream: &mut TcpStream, status: u16, body: &str) -> std::io::Result<()> {
        write!(
            stream,
            "HTTP/1.1 {status} Status\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )?;
        stream.write_all(body.as_bytes())?;
        stream.flush()
    }
}

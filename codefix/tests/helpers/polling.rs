use std::fmt;
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

const INITIAL_DELAY_MS: u64 = 25;
const MAX_DELAY_MS: u64 = 500;
const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);

/// Error returned when a port never starts accepting connections.
#[derive(Debug)]
pub struct WaitError {
    addr: SocketAddr,
    attempts: u32,
    waited: Duration,
    last_error: Option<String>,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timed out after {} attempts over {:?} waiting for {}. Last error: {}",
            self.attempts,
            self.waited,
            self.addr,
            self.last_error.as_deref().unwrap_or("none")
        )
    }
}

impl std::error::Error for WaitError {}

/// Poll `127.0.0.1:port` until a TCP connect succeeds.
///
/// Backs off exponentially from 25ms up to 500ms between attempts.
pub fn wait_for_port(port: u16, timeout: Duration) -> Result<(), WaitError> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let start = Instant::now();
    let mut delay = Duration::from_millis(INITIAL_DELAY_MS);
    let mut attempts = 0;
    let mut last_error = None;

    loop {
        attempts += 1;
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(_) => return Ok(()),
            Err(err) => last_error = Some(err.to_string()),
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break;
        }

        thread::sleep(delay.min(remaining));
        delay = (delay * 2).min(Duration::from_millis(MAX_DELAY_MS));
    }

    Err(WaitError {
        addr,
        attempts,
        waited: start.elapsed(),
        last_error,
    })
}

/// A port that was free a moment ago
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

/// Re-check `condition` every `interval` until it holds, panicking with
/// `desc` after `timeout`.
pub async fn wait_until<F, Fut>(desc: &str, timeout: Duration, interval: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    let mut attempts = 0;
    loop {
        attempts += 1;
        if condition().await {
            return;
        }
        if start.elapsed() >= timeout {
            panic!(
                "Timeout waiting for {} after {:?} ({} attempts)",
                desc,
                start.elapsed(),
                attempts
            );
        }
        tokio::time::sleep(interval).await;
    }
}

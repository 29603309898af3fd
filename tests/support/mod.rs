//! Shared harness for engine integration tests: a range-capable mock file
//! server and helpers to run the manager with its event loop attached.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use fetchq::manager::listen;
use fetchq::{Database, EventBus, QueueManager, Store, UiEvent};

/// Parses `bytes=lo-hi` (inclusive `hi`) from a Range header value.
fn parse_range(value: &str) -> Option<(usize, usize)> {
    let spec = value.strip_prefix("bytes=")?;
    let (lo, hi) = spec.split_once('-')?;
    Some((lo.parse().ok()?, hi.parse().ok()?))
}

/// GET responder serving a fixed payload with HTTP range semantics.
///
/// Requests with a `Range` header get a 206 slice; requests without get the
/// full body with a 200. An optional per-request delay stretches downloads
/// so tests can observe intermediate states.
pub struct RangeFile {
    payload: Vec<u8>,
    delay: Option<Duration>,
}

impl RangeFile {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            delay: None,
        }
    }

    pub fn with_delay(payload: Vec<u8>, delay: Duration) -> Self {
        Self {
            payload,
            delay: Some(delay),
        }
    }
}

impl Respond for RangeFile {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);

        let template = match range {
            Some((lo, hi)) if lo < self.payload.len() => {
                let hi = hi.min(self.payload.len() - 1);
                ResponseTemplate::new(206).set_body_bytes(self.payload[lo..=hi].to_vec())
            }
            Some(_) => ResponseTemplate::new(416),
            None => ResponseTemplate::new(200).set_body_bytes(self.payload.clone()),
        };

        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

/// GET responder that fails a fixed number of requests with 503 before
/// serving the payload, for retry-ladder tests.
pub struct FlakyFile {
    payload: Vec<u8>,
    failures_left: Arc<AtomicI64>,
}

impl FlakyFile {
    pub fn new(payload: Vec<u8>, failures: i64) -> Self {
        Self {
            payload,
            failures_left: Arc::new(AtomicI64::new(failures)),
        }
    }
}

impl Respond for FlakyFile {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.failures_left.fetch_sub(1, Ordering::SeqCst) > 0 {
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.payload.clone())
        }
    }
}

/// Mounts a HEAD mock for `payload`, advertising range support when asked.
pub async fn mount_head(server: &MockServer, payload: &[u8], ranges: bool) {
    let template = ResponseTemplate::new(200).set_body_bytes(payload.to_vec());
    let template = if ranges {
        template.insert_header("Accept-Ranges", "bytes")
    } else {
        template
    };
    Mock::given(method("HEAD"))
        .respond_with(template)
        .mount(server)
        .await;
}

/// A running engine: manager plus its core event loop, with the UI channel
/// exposed for assertions.
pub struct Engine {
    pub manager: Arc<QueueManager>,
    pub ui: mpsc::Receiver<UiEvent>,
    listen_task: JoinHandle<()>,
}

impl Engine {
    pub async fn start(store: Store) -> Self {
        let (bus, core_events, ui) = EventBus::new();
        let manager = QueueManager::init(store, bus)
            .await
            .expect("manager init must succeed");
        let listen_task = tokio::spawn(listen::listen(Arc::clone(&manager), core_events));
        Self {
            manager,
            ui,
            listen_task,
        }
    }

    /// Consumes UI events until the download completes, returning every
    /// event seen along the way. Panics after `timeout`.
    pub async fn wait_for_completion(&mut self, id: i64, timeout: Duration) -> Vec<UiEvent> {
        let mut seen = Vec::new();
        tokio::time::timeout(timeout, async {
            while let Some(event) = self.ui.recv().await {
                let done = matches!(event, UiEvent::DownloadCompleted { id: done } if done == id);
                seen.push(event);
                if done {
                    return;
                }
            }
            panic!("ui channel closed before download {id} completed");
        })
        .await
        .unwrap_or_else(|_| panic!("download {id} did not complete within {timeout:?}"));
        seen
    }

    /// Consumes UI events until the download reaches FAILED.
    pub async fn wait_for_failed_state(&mut self, id: i64, timeout: Duration) -> Vec<UiEvent> {
        let mut seen = Vec::new();
        tokio::time::timeout(timeout, async {
            while let Some(event) = self.ui.recv().await {
                let done = matches!(
                    &event,
                    UiEvent::DownloadStateChanged { id: changed, state }
                        if *changed == id && *state == fetchq::DownloadState::Failed
                );
                seen.push(event);
                if done {
                    return;
                }
            }
            panic!("ui channel closed before download {id} failed");
        })
        .await
        .unwrap_or_else(|_| panic!("download {id} did not fail within {timeout:?}"));
        seen
    }

    /// Consumes UI events for `window`, returning what arrived.
    pub async fn drain_for(&mut self, window: Duration) -> Vec<UiEvent> {
        let mut seen = Vec::new();
        let _ = tokio::time::timeout(window, async {
            while let Some(event) = self.ui.recv().await {
                seen.push(event);
            }
        })
        .await;
        seen
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.listen_task.abort();
    }
}

/// Fresh in-memory store for tests that do not cross a restart.
pub async fn memory_store() -> Store {
    let db = Database::open_in_memory()
        .await
        .expect("in-memory database must open");
    Store::new(db)
}

/// Deterministic pseudo-random payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state & 0xff) as u8
        })
        .collect()
}

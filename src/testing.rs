//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::error::FragmentError;
use crate::events::EventReceiver;
use crate::fetch::{FetchClient, FetchRequest, FetchResponse, Headers};

/// Scripted result of one fetch.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// 200 with this body, delivered in two chunks, after an optional delay.
    Body { data: Bytes, delay: Duration },
    /// Response with a non-2xx status.
    Status(u16),
    /// Connection-level failure.
    Network(String),
    /// Never resolves; only cancellation ends it.
    Hang,
}

impl Outcome {
    pub fn body(data: impl Into<Bytes>) -> Self {
        Outcome::Body {
            data: data.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn slow_body(data: impl Into<Bytes>, delay: Duration) -> Self {
        Outcome::Body {
            data: data.into(),
            delay,
        }
    }
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<Outcome>>,
    requests: HashMap<String, Vec<Headers>>,
}

/// Fetch client that replays per-URL scripts.
///
/// Each URL pops its next outcome; the last outcome sticks once the script
/// is exhausted. Unscripted URLs answer 404.
#[derive(Clone, Default)]
pub struct MockFetchClient {
    state: Arc<Mutex<MockState>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockFetchClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, outcomes: Vec<Outcome>) {
        self.state
            .lock()
            .scripts
            .insert(url.to_string(), outcomes.into());
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.state.lock().requests.get(url).map_or(0, Vec::len)
    }

    pub fn request_headers(&self, url: &str) -> Vec<Headers> {
        self.state
            .lock()
            .requests
            .get(url)
            .cloned()
            .unwrap_or_default()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, request: &FetchRequest) -> Outcome {
        let mut state = self.state.lock();
        state
            .requests
            .entry(request.url.clone())
            .or_default()
            .push(request.headers.clone());

        match state.scripts.get_mut(&request.url) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or(Outcome::Status(404)),
            Some(script) => script.front().cloned().unwrap_or(Outcome::Status(404)),
            None => Outcome::Status(404),
        }
    }
}

#[async_trait]
impl FetchClient for MockFetchClient {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FragmentError> {
        let outcome = self.next_outcome(&request);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(self.in_flight.clone());

        match outcome {
            Outcome::Body { data, delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let mid = data.len() / 2;
                let chunks = vec![Ok(data.slice(..mid)), Ok(data.slice(mid..))];
                Ok(FetchResponse {
                    status: 200,
                    content_length: Some(data.len() as u64),
                    content_type: Some("video/mp2t".to_string()),
                    body: futures::stream::iter(chunks).boxed(),
                })
            }
            Outcome::Status(status) => Ok(FetchResponse {
                status,
                content_length: None,
                content_type: None,
                body: futures::stream::empty().boxed(),
            }),
            Outcome::Network(message) => Err(FragmentError::Network(message)),
            Outcome::Hang => {
                futures::future::pending::<()>().await;
                Err(FragmentError::Aborted)
            }
        }
    }
}

/// Take everything currently queued on a receiver.
pub fn drain<E>(rx: &mut EventReceiver<E>) -> Vec<E> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

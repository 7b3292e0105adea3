//! Scripted test doubles shared by the unit tests.

use async_trait::async_trait;
use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use crate::http::{HttpResponse, HttpTransport, TransportError};

#[derive(Debug)]
enum Scripted {
    Respond(HttpResponse),
    Fail(TransportError),
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// Replays queued responses in order; once the queue is empty the fallback
/// (if any) answers every further call.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<HttpResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_json(&self, status: u16, body: &str) {
        self.lock_script().push_back(Scripted::Respond(HttpResponse::new(status, body)));
    }

    pub fn push_error(&self, err: TransportError) {
        self.lock_script().push_back(Scripted::Fail(err));
    }

    pub fn push_hang(&self) {
        self.lock_script().push_back(Scripted::Hang);
    }

    pub fn always(&self, status: u16, body: &str) {
        *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(HttpResponse::new(status, body));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Scripted>> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(RecordedRequest {
            url: url.to_string(),
            query: query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        });

        let next = self.lock_script().pop_front();
        match next {
            Some(Scripted::Respond(res)) => Ok(res),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang) => std::future::pending().await,
            None => self
                .fallback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .ok_or_else(|| TransportError::Opaque("no scripted response".into())),
        }
    }
}

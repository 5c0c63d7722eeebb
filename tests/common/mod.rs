use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stealthscraper_rs::modules::{
    ConnectTimeoutEvent, EventHandler, InvalidProxyEntriesEvent, ProxyExhaustedEvent,
};
use stealthscraper_rs::{FetchRequest, FetchResponse, FetchTransport, TransportError};

/// Transport that replays a fixed script, answering 200 once it runs out.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<FetchResponse, TransportError>>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<FetchResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FetchTransport for ScriptedTransport {
    async fn get(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(FetchResponse::new(
                200,
                request.url.clone(),
                "<html><head><title>ok</title></head></html>",
            ))
        })
    }
}

#[derive(Default)]
pub struct Recorder(Mutex<Vec<String>>);

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl EventHandler for Recorder {
    fn on_connect_timeout(&self, event: &ConnectTimeoutEvent) {
        self.0
            .lock()
            .unwrap()
            .push(format!("connect_timeout:{}", event.progress));
    }

    fn on_proxy_exhausted(&self, event: &ProxyExhaustedEvent) {
        self.0
            .lock()
            .unwrap()
            .push(format!("proxy_exhausted:{}", event.protocol));
    }

    fn on_invalid_proxy_entries(&self, event: &InvalidProxyEntriesEvent) {
        self.0
            .lock()
            .unwrap()
            .push(format!("invalid_entries:{}:{}", event.source, event.dropped));
    }
}

//! Network-free transport and backend for runtime tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use robin_agents::{LlmBackend, LlmError, ProviderKind};
use robin_tor::{FetchRequest, FetchResponse, TorError, Transport};

#[derive(Clone)]
enum Route {
    Respond { status: u16, body: String },
    Fail,
}

/// Transport answering from a fixed URL table
#[derive(Default)]
pub struct MockTransport {
    routes: HashMap<String, Route>,
    pub requests: Mutex<Vec<FetchRequest>>,
}

impl MockTransport {
    pub fn respond(mut self, url: &str, status: u16, body: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            Route::Respond {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    pub fn fail(mut self, url: &str) -> Self {
        self.routes.insert(url.to_string(), Route::Fail);
        self
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TorError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.routes.get(&request.url) {
            Some(Route::Respond { status, body }) => Ok(FetchResponse {
                status: *status,
                body: body.clone(),
                headers: BTreeMap::from([("content-type".to_string(), "text/html".to_string())]),
            }),
            Some(Route::Fail) | None => Err(TorError::Connection("unreachable".to_string())),
        }
    }
}

/// Backend replaying scripted answers in order
pub struct MockBackend {
    answers: Mutex<VecDeque<Result<String, LlmError>>>,
}

impl MockBackend {
    pub fn new(answers: Vec<Result<String, LlmError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
        }
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn generate(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse))
    }

    fn model_name(&self) -> &str {
        "mock"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Local
    }
}

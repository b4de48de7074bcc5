use std::collections::VecDeque;
use std::sync::Mutex;

use crate::{HttpRequest, HttpResponse, HttpTransport, OAuthError};

type Responder = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// Answers requests from a queue of canned responses, or from a responder
/// function, and records every request. An exhausted queue answers with a
/// transport error. Each send yields once so concurrent calls interleave.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    pub(crate) fn push(&self, status: u16, body: &str) {
        self.responses.lock().unwrap().push_back(response(status, body));
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub(crate) fn response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        body: body.to_string(),
    }
}

impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, OAuthError> {
        tokio::task::yield_now().await;

        let answer = match &self.responder {
            Some(responder) => Some(responder(&request)),
            None => self.responses.lock().unwrap().pop_front(),
        };
        self.requests.lock().unwrap().push(request);

        answer.ok_or_else(|| OAuthError::InvalidResponse {
            message: "no scripted response left".to_string(),
            body: String::new(),
        })
    }
}

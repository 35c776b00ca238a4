//! Scriptable stand-in for the logs API.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Clone)]
struct Reply {
    status: u16,
    body: String,
}

struct MockState {
    reply: Mutex<Reply>,
    hits: AtomicUsize,
    paths: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

pub struct MockApi {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockApi {
    pub async fn start(status: u16, body: &str) -> MockApi {
        let state = Arc::new(MockState {
            reply: Mutex::new(Reply {
                status,
                body: body.to_owned(),
            }),
            hits: AtomicUsize::new(0),
            paths: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        });

        let service_state = state.clone();
        let service = make_service_fn(move |_| {
            let state = service_state.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| handle(state.clone(), req))) }
        });
        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(service);
        let addr = server.local_addr();
        tokio::spawn(server);

        MockApi { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.paths.lock().unwrap().clone()
    }

    pub fn set_reply(&self, status: u16, body: &str) {
        *self.state.reply.lock().unwrap() = Reply {
            status,
            body: body.to_owned(),
        };
    }

    /// Holds every later response until the returned handle is notified.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.state.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Lets the held response through and stops holding later ones.
    pub fn release(&self) {
        if let Some(gate) = self.state.gate.lock().unwrap().take() {
            gate.notify_one();
        }
    }

    pub async fn wait_for_hits(&self, n: usize) {
        for _ in 0..500 {
            if self.hits() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} request(s), got {}", n, self.hits());
    }
}

async fn handle(state: Arc<MockState>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.paths.lock().unwrap().push(req.uri().path().to_owned());

    // The reply is fixed when the request arrives, even if it is held
    let reply = state.reply.lock().unwrap().clone();
    let gate = state.gate.lock().unwrap().clone();
    if let Some(gate) = gate {
        gate.notified().await;
    }

    let response = Response::builder()
        .status(StatusCode::from_u16(reply.status).unwrap())
        .header("Content-Type", "application/json")
        .body(Body::from(reply.body))
        .unwrap();
    Ok(response)
}

//! Shared helpers for integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowgate::flow::{EventObserver, ServerEvent};
use flowgate::http::{create_server, RunningServer, ServerCreationOptions};

/// Build and start a server on an ephemeral localhost port.
pub async fn start<S, I>(creation: ServerCreationOptions<S, I>) -> RunningServer
where
    S: Send + 'static,
    I: Send + Sync + 'static,
{
    create_server(creation)
        .unwrap()
        .listen("127.0.0.1", 0)
        .await
        .unwrap()
}

pub fn url(server: &RunningServer, path: &str) -> String {
    format!("http://{}{}", server.local_addr(), path)
}

pub async fn stop(server: RunningServer) {
    server.shutdown(Duration::from_millis(100)).await.unwrap();
}

/// An observer that records every event it sees.
#[allow(dead_code)]
pub fn recording_observer() -> (EventObserver, Arc<Mutex<Vec<ServerEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer: EventObserver = Arc::new(move |event| sink.lock().unwrap().push(event.clone()));
    (observer, seen)
}

#[allow(dead_code)]
pub fn event_names(seen: &Mutex<Vec<ServerEvent>>) -> Vec<&'static str> {
    seen.lock().unwrap().iter().map(ServerEvent::name).collect()
}

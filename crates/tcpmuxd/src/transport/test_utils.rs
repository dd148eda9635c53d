//! Test helpers for the transport module.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use super::{ConnectionHandler, ConnectionStream};

/// Counts accepted connections and records which listener kind produced them.
pub(crate) struct CountingHandler {
    count: Arc<AtomicUsize>,
    kinds: Mutex<Vec<&'static str>>,
}

impl CountingHandler {
    pub(crate) fn new() -> (Arc<AtomicUsize>, Arc<Self>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Self {
            count: Arc::clone(&count),
            kinds: Mutex::new(Vec::new()),
        });
        (count, handler)
    }

    pub(crate) fn kinds(&self) -> Vec<&'static str> {
        self.kinds.lock().expect("kinds lock").clone()
    }
}

impl ConnectionHandler for CountingHandler {
    fn handle(&self, stream: ConnectionStream) {
        let kind = match stream {
            ConnectionStream::Tcp(_) => "tcp",
            ConnectionStream::Unix(_) => "unix",
        };
        self.kinds.lock().expect("kinds lock").push(kind);
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

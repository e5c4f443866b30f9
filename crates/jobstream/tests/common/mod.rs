//! Shared harness for channel integration tests.
//!
//! [`ScriptedConnector`] stands in for the WebSocket transport. Each
//! `connect` call consumes the next scripted outcome; tests push frames
//! into accepted sockets through [`SocketHandle`] and close them by
//! dropping the handle. Tests run with `start_paused = true`, so backoff
//! sleeps only elapse when the test advances the clock or the runtime
//! goes idle.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use tokio::sync::watch;

use satdash_jobstream::{ChannelView, Connector, FrameStream, JobId, PageOrigin, TransportError};

pub const ORIGIN_HOST: &str = "dash.local";

pub fn origin() -> PageOrigin {
    PageOrigin::new("http:", ORIGIN_HOST)
}

pub fn job(id: &str) -> JobId {
    JobId::new(id).expect("valid job id")
}

pub fn socket_url(id: &str) -> String {
    format!("ws://{ORIGIN_HOST}/ws/jobs/{id}")
}

enum Outcome {
    Accept(mpsc::UnboundedReceiver<Result<String, TransportError>>),
    Refuse,
}

/// What happens to `connect` calls that have no scripted outcome.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Unscripted {
    /// The socket never opens (the call stays pending).
    Hang,
    /// The socket fails to open immediately.
    Refuse,
}

pub struct ScriptedConnector {
    script: Mutex<VecDeque<Outcome>>,
    urls: Mutex<Vec<String>>,
    connects: watch::Sender<usize>,
    unscripted: Unscripted,
}

impl ScriptedConnector {
    pub fn new(unscripted: Unscripted) -> Arc<Self> {
        let (connects, _) = watch::channel(0);
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            urls: Mutex::new(Vec::new()),
            connects,
            unscripted,
        })
    }

    /// Script the next `connect` to open a socket.
    pub fn accept_next(&self) -> SocketHandle {
        let (tx, rx) = mpsc::unbounded();
        self.script.lock().unwrap().push_back(Outcome::Accept(rx));
        SocketHandle { tx }
    }

    /// Script the next `connect` to fail.
    pub fn refuse_next(&self) {
        self.script.lock().unwrap().push_back(Outcome::Refuse);
    }

    /// Number of sockets constructed so far.
    pub fn connect_count(&self) -> usize {
        *self.connects.borrow()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub async fn wait_for_connects(&self, n: usize) {
        let mut rx = self.connects.subscribe();
        rx.wait_for(|count| *count >= n)
            .await
            .expect("connector dropped");
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream, TransportError> {
        self.urls.lock().unwrap().push(url.to_string());
        let outcome = self.script.lock().unwrap().pop_front();
        self.connects.send_modify(|count| *count += 1);

        match outcome {
            Some(Outcome::Accept(rx)) => Ok(rx.boxed()),
            Some(Outcome::Refuse) => Err(TransportError::Connection("refused".into())),
            None if self.unscripted == Unscripted::Refuse => {
                Err(TransportError::Connection("refused".into()))
            }
            None => futures::future::pending().await,
        }
    }
}

/// Server side of one accepted socket.
pub struct SocketHandle {
    tx: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl SocketHandle {
    /// Deliver a text frame. Ignored if the client already dropped the socket.
    pub fn send(&self, text: &str) {
        let _ = self.tx.unbounded_send(Ok(text.to_string()));
    }

    /// Deliver a socket error; the client closes the socket after it.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .tx
            .unbounded_send(Err(TransportError::Protocol(reason.to_string())));
    }

    /// Close the socket from the server side.
    pub fn close(self) {
        drop(self);
    }
}

/// Wait until the view satisfies `pred` and return a copy of it.
pub async fn wait_until(
    rx: &mut watch::Receiver<ChannelView>,
    pred: impl FnMut(&ChannelView) -> bool,
) -> ChannelView {
    rx.wait_for(pred)
        .await
        .expect("channel view sender dropped")
        .clone()
}

/// Let spawned tasks run without moving the paused clock.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

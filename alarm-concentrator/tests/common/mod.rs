#![allow(dead_code)]

use alarm_concentrator::listener;
use alarm_concentrator::{HandlerSettings, PublishError, Publisher};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub topic: String,
    pub payload: String,
}

pub const WAIT: Duration = Duration::from_secs(5);

/// Publisher double: records messages, fails the first `failures` calls
#[derive(Default)]
pub struct RecordingPublisher {
    failures: AtomicUsize,
    sent: Mutex<Vec<Recorded>>,
}

impl RecordingPublisher {
    pub fn failing_first(failures: usize) -> Self {
        Self { failures: AtomicUsize::new(failures), ..Default::default() }
    }

    pub fn sent(&self) -> Vec<Recorded> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(PublishError::ConnectTimeout(Duration::from_millis(1)));
        }
        self.sent.lock().unwrap().push(Recorded {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }
}

/// Running listener on an ephemeral localhost port
pub struct Server {
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl Server {
    pub async fn start<P: Publisher + ?Sized>(publisher: Arc<P>) -> Self {
        concentrator_devkit::init_tracing();
        let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let settings = Arc::new(HandlerSettings { read_timeout: Duration::from_secs(2) });

        let task = tokio::spawn(listener::serve(socket, publisher, settings, async move {
            let _ = stopped.await;
        }));
        Self { addr, stop: Some(stop), task }
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap().unwrap();
    }
}

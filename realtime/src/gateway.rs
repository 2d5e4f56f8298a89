use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::Notify;
use tracing::{debug, warn};

use common::utils::config::AppConfig;

use crate::{bus::EventBus, event::JobEvent};

pub const CLOSE_BUS_UNAVAILABLE: u16 = 4000;
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
pub const CLOSE_MISSING_TENANT: u16 = 4002;
pub const CLOSE_IDLE_TIMEOUT: u16 = 4003;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub buffer_limit: usize,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl GatewayConfig {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            buffer_limit: cfg.ws_buffer_limit.max(1),
            ping_interval: Duration::from_secs(cfg.ping_interval_secs.max(1)),
            ping_timeout: Duration::from_secs(cfg.ping_timeout_secs.max(1)),
        }
    }
}

/// Bounded send queue between the bus and the socket writer. When full the
/// oldest buffered event is discarded, so a slow client can never apply
/// backpressure to the bus.
struct BoundedQueue {
    items: VecDeque<JobEvent>,
    limit: usize,
    dropped: u64,
}

impl BoundedQueue {
    fn new(limit: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(limit.min(64)),
            limit,
            dropped: 0,
        }
    }

    fn push(&mut self, event: JobEvent) {
        if self.items.len() >= self.limit {
            self.items.pop_front();
            self.dropped += 1;
        }
        self.items.push_back(event);
    }

    fn pop(&mut self) -> Option<JobEvent> {
        self.items.pop_front()
    }

    fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Close a freshly-upgraded socket that failed authentication.
pub async fn reject(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Drive one authenticated connection: greet, relay the tenant's bus
/// subscription, ping for liveness, and tear the subscription down when the
/// socket goes away.
pub async fn run_connection(
    mut socket: WebSocket,
    tenant_id: String,
    bus: Arc<dyn EventBus>,
    cfg: GatewayConfig,
) {
    let mut events = match bus.subscribe(&tenant_id).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%tenant_id, error = %err, "bus subscription failed; closing socket");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_BUS_UNAVAILABLE,
                    reason: "bus_unavailable".into(),
                })))
                .await;
            return;
        }
    };

    let (mut sink, mut receiver) = socket.split();

    if send_event(&mut sink, &JobEvent::connected(&tenant_id))
        .await
        .is_err()
    {
        return;
    }

    let queue = Arc::new(Mutex::new(BoundedQueue::new(cfg.buffer_limit)));
    let notify = Arc::new(Notify::new());

    let pump = {
        let queue = Arc::clone(&queue);
        let notify = Arc::clone(&notify);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                queue.lock().unwrap_or_else(|e| e.into_inner()).push(event);
                notify.notify_one();
            }
        })
    };

    let last_activity = Arc::new(Mutex::new(Instant::now()));
    let (closed_tx, mut closed_rx) = tokio::sync::oneshot::channel::<()>();
    let reader = {
        let last_activity = Arc::clone(&last_activity);
        tokio::spawn(async move {
            while let Some(Ok(message)) = receiver.next().await {
                *last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
                if matches!(message, Message::Close(_)) {
                    break;
                }
            }
            let _ = closed_tx.send(());
        })
    };

    let mut ping_timer = tokio::time::interval(cfg.ping_interval);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping_timer.tick().await; // the first tick completes immediately

    'connection: loop {
        tokio::select! {
            _ = notify.notified() => {
                loop {
                    let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop();
                    let Some(event) = next else { break };
                    if send_event(&mut sink, &event).await.is_err() {
                        break 'connection;
                    }
                }
            }
            _ = ping_timer.tick() => {
                let idle = last_activity
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .elapsed();
                if idle > cfg.ping_timeout {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_IDLE_TIMEOUT,
                            reason: "idle_timeout".into(),
                        })))
                        .await;
                    break;
                }
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            _ = &mut closed_rx => break,
        }
    }

    let dropped = queue.lock().unwrap_or_else(|e| e.into_inner()).dropped();
    if dropped > 0 {
        debug!(%tenant_id, dropped, "events dropped on slow websocket");
    }

    pump.abort();
    reader.abort();
}

async fn send_event<S>(sink: &mut S, event: &JobEvent) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let payload = serde_json::to_string(event)
        .map_err(|e| axum::Error::new(std::io::Error::other(e.to_string())))?;
    sink.send(Message::Text(payload.into())).await
}

//! WebSocket Handler
//!
//! 每个连接订阅一个生成请求：先发送最新快照，再转发后续事件，终态之后关闭

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::infrastructure::http::state::AppState;

/// 生成请求的 WebSocket 连接
pub async fn generation_websocket_handler(
    ws: WebSocketUpgrade,
    Path(request_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_generation_socket(socket, request_id, state))
}

fn to_message<T: Serialize>(value: &T) -> Option<Message> {
    match serde_json::to_string(value) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize event");
            None
        }
    }
}

/// 等待任意一个任务结束，中止并等待另一个
///
/// 返回后两个任务持有的订阅都已释放
async fn join_first(mut first: JoinHandle<()>, mut second: JoinHandle<()>) {
    let other = tokio::select! {
        _ = &mut first => second,
        _ = &mut second => first,
    };
    other.abort();
    let _ = other.await;
}

async fn handle_generation_socket(socket: WebSocket, request_id: String, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (snapshot, mut event_rx) = state.event_publisher.subscribe(&request_id);

    tracing::info!(request_id = %request_id, "WebSocket connected");

    let request_id_for_forward = request_id.clone();
    let forward_task = tokio::spawn(async move {
        if let Some(snapshot) = snapshot {
            let terminal = snapshot.event.is_terminal();
            if let Some(msg) = to_message(&snapshot.event) {
                if sender.send(msg).await.is_err() {
                    return;
                }
            }
            if terminal {
                let _ = sender.close().await;
                return;
            }
        }

        loop {
            let event = match event_rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(request_id = %request_id_for_forward, skipped, "WebSocket lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let terminal = event.is_terminal();
            let Some(msg) = to_message(&event) else {
                continue;
            };

            if let Err(e) = sender.send(msg).await {
                tracing::debug!(
                    request_id = %request_id_for_forward,
                    error = %e,
                    "Failed to send WebSocket message"
                );
                break;
            }
            if terminal {
                let _ = sender.close().await;
                break;
            }
        }
    });

    let request_id_for_receive = request_id.clone();
    let receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    tracing::debug!(request_id = %request_id_for_receive, "WebSocket closed by client");
                    break;
                }
                Err(e) => {
                    tracing::debug!(request_id = %request_id_for_receive, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    join_first(forward_task, receive_task).await;

    state.event_publisher.release(&request_id);
    tracing::info!(request_id = %request_id, "WebSocket disconnected");
}

use crate::hub::HubHandle;
use futures::StreamExt;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Runs one WebSocket connection: forwards inbound frames to the hub in
/// arrival order and drains the bounded outbound channel into the socket.
pub async fn client_connection(ws: warp::ws::WebSocket, hub: HubHandle, channel_buffer: usize) {
    let (client_ws_sender, mut client_ws_rcv) = ws.split();
    let (client_sender, client_rcv) = mpsc::channel(channel_buffer);
    let client_rcv = ReceiverStream::new(client_rcv);

    tokio::task::spawn(async move {
        let _ = client_rcv.forward(client_ws_sender).await;
    });

    let client_id = uuid::Uuid::new_v4().to_string();
    hub.connect(client_id.clone(), client_sender).await;

    while let Some(result) = client_ws_rcv.next().await {
        match result {
            Ok(msg) => hub.frame(client_id.clone(), msg).await,
            Err(e) => {
                debug!("WebSocket error for {}: {}", client_id, e);
                break;
            }
        }
    }

    info!("Client {} closed its connection", client_id);
    hub.disconnect(client_id).await;
}

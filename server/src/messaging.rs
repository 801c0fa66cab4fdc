use crate::events::ServerEvent;
use crate::types::Clients;

fn to_frame(event: &ServerEvent) -> Option<warp::ws::Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(warp::ws::Message::text(json)),
        Err(e) => {
            log::error!("Failed to serialize {}: {}", event.name(), e);
            None
        }
    }
}

/// Best-effort send to one connection. Returns false if it is unknown or its buffer is full/closed.
pub fn send_to_client(client_id: &str, clients: &Clients, event: &ServerEvent) -> bool {
    let Some(client) = clients.get(client_id) else {
        return false;
    };
    let Some(frame) = to_frame(event) else {
        return false;
    };
    // try_send never blocks the hub on a slow client
    match client.sender.try_send(Ok(frame)) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to send {} to client {} (buffer full or closed): {}", event.name(), client_id, e);
            false
        }
    }
}

/// Serializes once and sends to every member except `exclude`.
pub fn broadcast_to_room(members: &[String], clients: &Clients, event: &ServerEvent, exclude: Option<&str>) {
    let Some(frame) = to_frame(event) else {
        return;
    };
    for client_id in members {
        if Some(client_id.as_str()) == exclude {
            continue;
        }
        if let Some(client) = clients.get(client_id) {
            if let Err(e) = client.sender.try_send(Ok(frame.clone())) {
                log::warn!("Failed to broadcast {} to client {} (buffer full or closed): {}", event.name(), client_id, e);
            }
        }
    }
}

/// WebSocket-level keep-alive for every connection. Browsers answer with a
/// pong frame on their own, so passive listeners stay alive.
pub fn ping_all(clients: &Clients) {
    for (client_id, client) in clients {
        if let Err(e) = client.sender.try_send(Ok(warp::ws::Message::ping(Vec::new()))) {
            log::debug!("Failed to ping client {}: {}", client_id, e);
        }
    }
}

//! Direct messaging between identities.
//!
//! Nothing is stored or queued here. A DM to an identity without a live
//! connection is answered with `dm-error` (`offline`); typing indicators and
//! read receipts for absent peers are dropped silently.

use crate::auth::IdentityVerifier;
use crate::error::EventError;
use crate::events::{MarkRead, Registration, SendDm, ServerEvent, Typing};
use crate::identity::{IdentityBindings, IdentityStore};
use crate::messaging::send_to_client;
use crate::types::Clients;
use log::{debug, info};

const OFFLINE: &str = "offline";

/// Binds the connection to the identity carried by `registration`.
/// A connection re-registering under a different identity gives up its old binding.
pub fn register<I: IdentityStore>(
    client_id: &str,
    registration: &Registration,
    verifier: &IdentityVerifier,
    clients: &mut Clients,
    bindings: &mut IdentityBindings<I>,
) -> Result<String, EventError> {
    let identity = verifier.resolve(registration)?;
    let Some(client) = clients.get_mut(client_id) else {
        return Ok(identity);
    };
    if let Some(previous) = client.identity.replace(identity.clone()) {
        if previous != identity {
            bindings.release(&previous, client_id);
        }
    }
    bindings.register(&identity, client_id);
    info!("Client {} registered as {}", client_id, identity);
    Ok(identity)
}

/// Drops the connection's binding, unless a newer connection has taken it over.
pub fn release<I: IdentityStore>(client_id: &str, clients: &Clients, bindings: &mut IdentityBindings<I>) {
    if let Some(identity) = clients.get(client_id).and_then(|c| c.identity.as_deref()) {
        if !bindings.release(identity, client_id) {
            debug!("Binding for {} already moved past {}", identity, client_id);
        }
    }
}

fn sender_identity(client_id: &str, clients: &Clients) -> Option<String> {
    clients.get(client_id).and_then(|c| c.identity.clone())
}

/// Relays a DM. Returns whether the recipient had a live connection.
pub fn send_dm<I: IdentityStore>(
    client_id: &str,
    dm: SendDm,
    clients: &Clients,
    bindings: &IdentityBindings<I>,
    now: u64,
) -> Result<bool, EventError> {
    let sender_id = sender_identity(client_id, clients).ok_or(EventError::Unregistered)?;

    let Some(recipient) = bindings.lookup(&dm.recipient_id) else {
        debug!("DM from {} to offline {}", sender_id, dm.recipient_id);
        send_to_client(client_id, clients, &ServerEvent::DmError { recipient_id: dm.recipient_id, error: OFFLINE });
        return Ok(false);
    };

    send_to_client(
        &recipient,
        clients,
        &ServerEvent::ReceiveDm {
            sender_id,
            sender_name: dm.sender_name,
            sender_image: dm.sender_image,
            message: dm.message.clone(),
            timestamp: now,
        },
    );
    send_to_client(
        client_id,
        clients,
        &ServerEvent::DmSent { recipient_id: dm.recipient_id, message: dm.message, timestamp: now },
    );
    Ok(true)
}

pub fn relay_typing<I: IdentityStore>(client_id: &str, typing: Typing, clients: &Clients, bindings: &IdentityBindings<I>) {
    let Some(sender_id) = sender_identity(client_id, clients) else {
        return;
    };
    if let Some(recipient) = bindings.lookup(&typing.recipient_id) {
        send_to_client(&recipient, clients, &ServerEvent::UserTyping { sender_id, is_typing: typing.is_typing });
    }
}

pub fn relay_read<I: IdentityStore>(client_id: &str, read: MarkRead, clients: &Clients, bindings: &IdentityBindings<I>) {
    let Some(reader_id) = sender_identity(client_id, clients) else {
        return;
    };
    if let Some(peer) = bindings.lookup(&read.sender_id) {
        send_to_client(&peer, clients, &ServerEvent::MessagesRead { reader_id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Client;
    use serde_json::Value;
    use tokio::sync::mpsc;

    type Rx = mpsc::Receiver<Result<warp::ws::Message, warp::Error>>;

    fn frames(rx: &mut Rx) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(Ok(msg)) = rx.try_recv() {
            out.push(serde_json::from_str(msg.to_str().unwrap()).unwrap());
        }
        out
    }

    fn setup(ids: &[&str]) -> (Clients, IdentityBindings, Vec<Rx>) {
        let mut clients = Clients::new();
        let mut bindings: IdentityBindings = IdentityBindings::default();
        let verifier = IdentityVerifier::disabled();
        let mut receivers = Vec::new();
        for (i, identity) in ids.iter().enumerate() {
            let (tx, rx) = mpsc::channel(16);
            let client_id = format!("c{}", i);
            clients.insert(client_id.clone(), Client::new(tx, 0));
            register(&client_id, &Registration::Identity(identity.to_string()), &verifier, &mut clients, &mut bindings)
                .unwrap();
            receivers.push(rx);
        }
        (clients, bindings, receivers)
    }

    fn dm(to: &str, text: &str) -> SendDm {
        SendDm {
            recipient_id: to.to_string(),
            message: text.to_string(),
            sender_name: Some("Alice A".to_string()),
            sender_image: None,
        }
    }

    #[test]
    fn test_dm_delivered_and_acknowledged() {
        let (clients, bindings, mut rx) = setup(&["alice", "bob"]);
        assert!(send_dm("c0", dm("bob", "hi bob"), &clients, &bindings, 1_234).unwrap());

        let to_bob = frames(&mut rx[1]);
        assert_eq!(to_bob.len(), 1);
        assert_eq!(to_bob[0]["type"], "receive-dm");
        assert_eq!(to_bob[0]["payload"]["senderId"], "alice");
        assert_eq!(to_bob[0]["payload"]["senderName"], "Alice A");
        assert_eq!(to_bob[0]["payload"]["message"], "hi bob");
        assert_eq!(to_bob[0]["payload"]["timestamp"], 1_234);

        let to_alice = frames(&mut rx[0]);
        assert_eq!(to_alice.len(), 1);
        assert_eq!(to_alice[0]["type"], "dm-sent");
        assert_eq!(to_alice[0]["payload"]["recipientId"], "bob");
    }

    #[test]
    fn test_dm_to_offline_identity() {
        let (clients, bindings, mut rx) = setup(&["alice"]);
        assert!(!send_dm("c0", dm("carol", "anyone?"), &clients, &bindings, 1).unwrap());

        let to_alice = frames(&mut rx[0]);
        assert_eq!(to_alice.len(), 1);
        assert_eq!(to_alice[0]["type"], "dm-error");
        assert_eq!(to_alice[0]["payload"]["error"], "offline");
    }

    #[test]
    fn test_dm_requires_sender_identity() {
        let (mut clients, bindings, _rx) = setup(&["bob"]);
        let (tx, mut anon_rx) = mpsc::channel(4);
        clients.insert("anon".to_string(), Client::new(tx, 0));

        let err = send_dm("anon", dm("bob", "hello"), &clients, &bindings, 1).unwrap_err();
        assert_eq!(err.kind(), "unregistered");
        assert!(frames(&mut anon_rx).is_empty());
    }

    #[test]
    fn test_typing_and_read_receipts() {
        let (clients, bindings, mut rx) = setup(&["alice", "bob"]);
        relay_typing("c0", Typing { recipient_id: "bob".to_string(), is_typing: true }, &clients, &bindings);
        relay_read("c1", MarkRead { sender_id: "alice".to_string() }, &clients, &bindings);

        let to_bob = frames(&mut rx[1]);
        assert_eq!(to_bob.len(), 1);
        assert_eq!(to_bob[0]["type"], "user-typing");
        assert_eq!(to_bob[0]["payload"]["senderId"], "alice");
        assert_eq!(to_bob[0]["payload"]["isTyping"], true);

        let to_alice = frames(&mut rx[0]);
        assert_eq!(to_alice.len(), 1);
        assert_eq!(to_alice[0]["type"], "messages-read");
        assert_eq!(to_alice[0]["payload"]["readerId"], "bob");
    }

    #[test]
    fn test_typing_to_offline_is_dropped() {
        let (clients, bindings, mut rx) = setup(&["alice"]);
        relay_typing("c0", Typing { recipient_id: "ghost".to_string(), is_typing: true }, &clients, &bindings);
        relay_read("c0", MarkRead { sender_id: "ghost".to_string() }, &clients, &bindings);
        assert!(frames(&mut rx[0]).is_empty());
    }

    #[test]
    fn test_reregister_under_new_identity_releases_old() {
        let (mut clients, mut bindings, _rx) = setup(&["alice"]);
        let verifier = IdentityVerifier::disabled();
        register("c0", &Registration::Identity("alicia".to_string()), &verifier, &mut clients, &mut bindings).unwrap();
        assert_eq!(bindings.lookup("alice"), None);
        assert_eq!(bindings.lookup("alicia"), Some("c0".to_string()));
    }

    #[test]
    fn test_release_respects_newer_connection() {
        let (mut clients, mut bindings, _rx) = setup(&["alice"]);
        let (tx, _rx2) = mpsc::channel(4);
        clients.insert("c9".to_string(), Client::new(tx, 0));
        let verifier = IdentityVerifier::disabled();
        register("c9", &Registration::Identity("alice".to_string()), &verifier, &mut clients, &mut bindings).unwrap();

        release("c0", &clients, &mut bindings);
        assert_eq!(bindings.lookup("alice"), Some("c9".to_string()));
        release("c9", &clients, &mut bindings);
        assert_eq!(bindings.lookup("alice"), None);
    }
}

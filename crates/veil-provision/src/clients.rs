//! Client add/remove against the live daemon
//!
//! Later credential changes go through the daemon's control API instead of
//! rewriting the config document, so the listener keeps serving while the
//! client list changes. Callers persist the matching registry row
//! afterwards to keep local state and the remote client list in lockstep.

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use veil_ssh::CommandChannel;
use veil_xray::config::{ClientEntry, ClientIdentity, Inbound, InboundSettings, REALITY_INBOUND_TAG};
use veil_xray::INBOUND_PORT;

use crate::commands;
use crate::ProvisionError;

/// Wrapper document the control API's add-user command expects: a full
/// inbound skeleton carrying just the new client.
#[derive(Debug, Serialize)]
struct UserWrapper {
    inbounds: Vec<Inbound>,
}

fn user_wrapper(identity: &ClientIdentity) -> UserWrapper {
    UserWrapper {
        inbounds: vec![Inbound {
            listen: "0.0.0.0".to_string(),
            port: INBOUND_PORT,
            protocol: "vless".to_string(),
            tag: REALITY_INBOUND_TAG.to_string(),
            settings: InboundSettings {
                clients: Some(vec![ClientEntry::from(identity)]),
                decryption: Some("none".to_string()),
                address: None,
            },
            stream_settings: None,
            sniffing: None,
        }],
    }
}

/// Authorize a new user on the live inbound; returns the generated id.
pub async fn add_client(
    channel: &mut dyn CommandChannel,
    username: &str,
) -> Result<Uuid, ProvisionError> {
    let id = Uuid::new_v4();
    let identity = ClientIdentity::new(id, username);
    let wrapper_path = format!("/tmp/user_{id}.json");

    let document = serde_json::to_string_pretty(&user_wrapper(&identity))?;
    channel.write_file(&wrapper_path, &document).await?;

    let added = channel.exec_checked(&commands::add_user(&wrapper_path)).await;

    // The wrapper is single-use; losing the cleanup is harmless.
    if let Err(e) = channel.exec(&commands::remove_file(&wrapper_path)).await {
        warn!(path = %wrapper_path, error = %e, "failed to remove user wrapper file");
    }

    added?;
    Ok(id)
}

/// Revoke a user on the live inbound by label.
pub async fn remove_client(
    channel: &mut dyn CommandChannel,
    username: &str,
) -> Result<(), ProvisionError> {
    channel.exec_checked(&commands::remove_user(username)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn wrapper_carries_one_client_on_the_reality_inbound() {
        let id = Uuid::new_v4();
        let identity = ClientIdentity::new(id, "alice");
        let doc: Value =
            serde_json::from_str(&serde_json::to_string(&user_wrapper(&identity)).unwrap())
                .unwrap();

        let inbound = &doc["inbounds"][0];
        assert_eq!(inbound["tag"], "reality-in");
        assert_eq!(inbound["protocol"], "vless");
        assert_eq!(inbound["port"], 443);
        assert_eq!(inbound["settings"]["decryption"], "none");

        let clients = inbound["settings"]["clients"].as_array().unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0]["id"], id.to_string());
        assert_eq!(clients[0]["email"], "alice");
        assert_eq!(clients[0]["flow"], "xtls-rprx-vision");

        // The wrapper is a skeleton, not a full config
        assert!(inbound.get("streamSettings").is_none());
    }
}

//! Inbound garlic handling

use sable_core::{
    CloveDelivery, DirectoryEvent, GarlicClove, GarlicMessage, IdentHash, RouterMessage,
    StoreRecord,
};
use tracing::{debug, instrument, trace, warn};

use super::DestinationSession;
use crate::error::{SessionError, SessionResult};
use crate::event::SessionEvent;

impl DestinationSession {
    /// Decrypt a garlic message and dispatch its cloves
    ///
    /// A message that does not decrypt with the current temporary key is
    /// dropped. Each clove is handled on its own; a failing clove does not
    /// affect the others. Returns how many cloves were handled.
    #[instrument(skip(self, message), fields(len = message.ciphertext.len()))]
    pub async fn garlic_received(&self, message: GarlicMessage) -> usize {
        if self.is_terminated() {
            return 0;
        }
        let decrypted = self.temporary_key.read().decrypt(&message);
        let garlic = match decrypted {
            Ok(garlic) => garlic,
            Err(e) => {
                debug!(destination = %self.ident.short_id(), error = %e, "Dropping garlic that does not decrypt");
                return 0;
            }
        };

        let now = self.clock.now();
        let mut sender = None;
        let mut handled = 0;
        for clove in garlic.cloves {
            if clove.is_expired(now) {
                trace!("Dropping expired clove");
                continue;
            }
            let kind = clove.message.kind();
            match self.process_clove(clove, &mut sender).await {
                Ok(()) => handled += 1,
                Err(e) => warn!(clove = kind, error = %e, "Clove processing failed"),
            }
        }
        handled
    }

    async fn process_clove(
        &self,
        clove: GarlicClove,
        sender: &mut Option<IdentHash>,
    ) -> SessionResult<()> {
        match clove.delivery {
            CloveDelivery::Local => {
                self.tunnels.distribute_local(clove.message);
                Ok(())
            }
            CloveDelivery::Router { peer } => {
                self.transport.send(&peer, clove.message).await?;
                Ok(())
            }
            CloveDelivery::Tunnel { gateway, tunnel_id } => {
                let wrapped = RouterMessage::TunnelGateway {
                    tunnel_id,
                    message: Box::new(clove.message),
                };
                self.transport.send(&gateway, wrapped).await?;
                Ok(())
            }
            CloveDelivery::Destination { destination } => {
                if destination != self.ident {
                    return Err(SessionError::Misaddressed(destination));
                }
                self.deliver_to_self(clove.message, sender)
            }
        }
    }

    fn deliver_to_self(
        &self,
        message: RouterMessage,
        sender: &mut Option<IdentHash>,
    ) -> SessionResult<()> {
        match message {
            RouterMessage::Data(payload) => {
                trace!(len = payload.len(), from = ?sender, "Delivering payload");
                let _ = self.events.send(SessionEvent::DataReceived {
                    from: *sender,
                    payload,
                });
                Ok(())
            }
            RouterMessage::DatabaseStore(store) => match store.record {
                StoreRecord::LeaseSet(lease_set) => {
                    let key = lease_set.ident_hash();
                    if key == self.ident {
                        return Ok(());
                    }
                    self.directory.add_lease_set(lease_set)?;
                    if let Some(stored) = self.directory.find_lease_set(&key) {
                        self.remotes.update(stored, self.clock.now());
                    }
                    *sender = Some(key);
                    Ok(())
                }
                StoreRecord::PeerInfo(info) => {
                    self.directory.add_peer_info(info)?;
                    Ok(())
                }
            },
            RouterMessage::DeliveryStatus { message_id } => {
                self.directory.handle_delivery_status(message_id);
                Ok(())
            }
            RouterMessage::DatabaseSearchReply(reply) => {
                self.directory.add_search_reply(reply);
                Ok(())
            }
            other => {
                self.tunnels.distribute_local(other);
                Ok(())
            }
        }
    }

    /// React to a directory notification
    pub(super) async fn directory_event(self: &std::sync::Arc<Self>, event: DirectoryEvent) {
        if let DirectoryEvent::LeaseSetUpdated(lease_set) = event {
            self.lease_set_arrived(lease_set).await;
        }
    }
}

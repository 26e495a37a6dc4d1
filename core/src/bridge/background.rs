use std::sync::{Arc, Mutex};

use super::{BridgeMessage, Envelope, HostEvent, MaterialCheckResponse, MessageChannel};
use crate::error::{PresetError, Result};
use crate::store::LocalStore;

pub type SharedBackground = Arc<Mutex<Background>>;

/// Extension-side state shared by the editor and the page script: one queue
/// toward the page and one back toward the editor.
pub struct Background {
    store: LocalStore,
    to_page: MessageChannel<BridgeMessage>,
    to_editor: MessageChannel<HostEvent>,
}

impl Background {
    pub fn new(store: LocalStore, capacity: usize) -> Self {
        Background {
            store,
            to_page: MessageChannel::new(capacity),
            to_editor: MessageChannel::new(capacity),
        }
    }

    pub fn shared(store: LocalStore, capacity: usize) -> SharedBackground {
        Arc::new(Mutex::new(Background::new(store, capacity)))
    }

    /// Answer a page poll.
    ///
    /// Anything handed out earlier and never acknowledged goes first. When
    /// the store asks for a refresh, the full material list replaces any
    /// older list still held and the flag is cleared. If the queue is full
    /// the list waits for a later poll, but the queue is still drained.
    pub fn material_check(&mut self) -> Result<MaterialCheckResponse> {
        let redelivered = self.to_page.requeue_unacked();
        if redelivered > 0 {
            log::debug!("Redelivering {} unacknowledged messages", redelivered);
        }

        if self.store.get_should_update()? {
            let materials = self.store.get_materials()?;
            self.to_page
                .discard_where(|m| matches!(m, BridgeMessage::SetMaterials { .. }));
            match self.to_page.push(BridgeMessage::SetMaterials { materials }) {
                Ok(_) => {
                    log::info!("Sending materials to the page");
                    self.store.clear_should_update()?;
                }
                Err(PresetError::ChannelFull(held)) => {
                    log::warn!("Message channel full ({} held), material list deferred", held);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(MaterialCheckResponse {
            messages: self.to_page.drain(),
        })
    }

    /// The page was (re)loaded and needs the full list on its next poll.
    pub fn force_refresh(&mut self) -> Result<()> {
        log::debug!("Force refresh requested");
        self.store.force_sync()
    }

    pub fn ack(&mut self, seqs: &[u64]) -> usize {
        self.to_page.ack(seqs)
    }

    /// Queue a message for the page.
    pub fn send_message(&mut self, message: BridgeMessage) -> Result<u64> {
        self.to_page.push(message)
    }

    /// An event raised by the page for the editor.
    pub fn post_event(&mut self, event: HostEvent) -> Result<u64> {
        self.to_editor.push(event)
    }

    /// Everything the page posted since the last call.
    pub fn drain_events(&mut self) -> Vec<HostEvent> {
        let events = self.to_editor.drain();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        self.to_editor.ack(&seqs);
        events.into_iter().map(|Envelope { message, .. }| message).collect()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }
}

/// Lock the shared state, mapping a poisoned lock to a protocol error.
pub fn lock(background: &SharedBackground) -> Result<std::sync::MutexGuard<'_, Background>> {
    background
        .lock()
        .map_err(|_| PresetError::Protocol("background lock poisoned".to_string()))
}

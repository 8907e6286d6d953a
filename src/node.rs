//! Process-wide registry from peer identity to space, and the signaling
//! responder spawning incoming connections.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use async_trait::async_trait;

use crate::{
    prelude::*,
    proto::Common,
    rtc::{Incoming, RespondError},
    space::Space,
};

/// The registry interface: identity key to space, creating on first miss.
pub trait Ship: Send + Sync {
    /// Finds the space registered under `common`, creating it lazily.
    fn find(&self, common: &Common) -> Arc<Space>;
}

/// The responder interface: inbound offer to answer.
#[async_trait]
pub trait Back: Send + Sync {
    /// Produces an answer SDP for `offer` by spinning up a fresh incoming
    /// peer connection on this node.
    ///
    /// # Errors
    ///
    /// [`RespondError`] when the offer is unusable.
    async fn respond(&self, offer: &str) -> Result<String, RespondError>;
}

/// The gateway process's one node: weak registry of live spaces plus the
/// signaling responder behind the HTTP endpoint.
pub struct Node {
    ices: Vec<String>,
    spaces: Mutex<HashMap<Common, Weak<Space>>>,
    self_: Weak<Node>,
}

impl Node {
    /// Creates a node advertising `ices` on every peer connection it or its
    /// spaces spawn.
    pub fn new(ices: Vec<String>) -> Arc<Node> {
        Arc::new_cyclic(|self_| Node {
            ices,
            spaces: Mutex::new(HashMap::new()),
            self_: self_.clone(),
        })
    }

    fn back(&self) -> Arc<dyn Back> {
        self.self_.upgrade().expect("node owns itself")
    }
}

impl Ship for Node {
    fn find(&self, common: &Common) -> Arc<Space> {
        let mut spaces = self.spaces.lock().unwrap();
        if let Some(space) = spaces.get(common).and_then(Weak::upgrade) {
            return space;
        }
        spaces.retain(|_, space| space.strong_count() > 0);
        let space = Space::new(self.back(), self.ices.clone());
        let _ = spaces.insert(*common, Arc::downgrade(&space));
        debug!("space created for {}", common);
        space
    }
}

#[async_trait]
impl Back for Node {
    async fn respond(&self, offer: &str) -> Result<String, RespondError> {
        let ship: Arc<dyn Ship> =
            self.self_.upgrade().expect("node owns itself");
        let incoming = Incoming::spawn(ship, &self.ices).await?;
        let answer = incoming.answer(offer).await?;
        debug!("offer answered:\n{}\n----------------\n{}", offer, answer);
        Ok(answer)
    }
}

//! In-memory broadcast transport.
//!
//! Every registered peer receives every message broadcast by every other peer, in the order it was
//! sent. Senders are identified by the public key they registered with.

use crate::dispatch::{self, Incoming};
use bytes::Bytes;
use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    StreamExt,
};
use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum Error {
    #[error("peer already registered")]
    AlreadyRegistered,
    #[error("network closed")]
    Closed,
}

type Peers<P> = Arc<Mutex<BTreeMap<P, UnboundedSender<Incoming<P>>>>>;

/// A broadcast network shared by all peers of a group.
#[derive(Clone)]
pub struct Network<P> {
    peers: Peers<P>,
}

impl<P: Ord + Clone + Debug + Send + Sync + 'static> Default for Network<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Ord + Clone + Debug + Send + Sync + 'static> Network<P> {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Register a peer and return its handles.
    pub fn register(&self, public_key: P) -> Result<(Sender<P>, Receiver<P>), Error> {
        let mut peers = self.peers.lock().unwrap();
        if peers.contains_key(&public_key) {
            return Err(Error::AlreadyRegistered);
        }
        let (sender, receiver) = mpsc::unbounded();
        peers.insert(public_key.clone(), sender);
        Ok((
            Sender {
                me: public_key,
                peers: self.peers.clone(),
            },
            Receiver { receiver },
        ))
    }
}

/// Broadcasts messages to every other registered peer.
#[derive(Clone)]
pub struct Sender<P> {
    me: P,
    peers: Peers<P>,
}

impl<P: Ord + Clone + Debug + Send + Sync + 'static> dispatch::Sender for Sender<P> {
    type Error = Error;

    async fn broadcast(&mut self, tag: &'static str, payload: Bytes) -> Result<(), Error> {
        let mut peers = self.peers.lock().unwrap();
        if !peers.contains_key(&self.me) {
            return Err(Error::Closed);
        }
        let sender = format!("{:?}", self.me);

        // Peers whose receiver is gone are forgotten
        peers.retain(|public_key, channel| {
            if *public_key == self.me {
                return true;
            }
            let incoming = Incoming {
                sender: sender.clone(),
                public_key: self.me.clone(),
                tag: tag.to_string(),
                payload: payload.clone(),
            };
            if channel.unbounded_send(incoming).is_err() {
                debug!(peer = ?public_key, "dropping closed peer");
                return false;
            }
            true
        });
        Ok(())
    }
}

/// Receives messages broadcast by other peers.
pub struct Receiver<P> {
    receiver: UnboundedReceiver<Incoming<P>>,
}

impl<P: Clone + Debug + Send + Sync + 'static> dispatch::Receiver for Receiver<P> {
    type Error = Error;
    type PublicKey = P;

    async fn recv(&mut self) -> Result<Incoming<P>, Error> {
        self.receiver.next().await.ok_or(Error::Closed)
    }
}

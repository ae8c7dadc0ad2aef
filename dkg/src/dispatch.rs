//! Adapter between a broadcast transport and a [crate::Member].
//!
//! The transport is responsible for authenticating senders: a received message carries the public key
//! of the peer that sent it, which [Membership] maps to a [MemberId]. Messages are tagged with the type
//! of their payload (see [crate::wire]) and decoded by tag. Anything that cannot be attributed to a
//! member or decoded is dropped (and treated by the run as if it was never sent).

use crate::{wire::Payload, Config, Error, MemberId};
use bytes::Bytes;
use commonware_codec::Encode;
use std::{collections::BTreeMap, error::Error as StdError, fmt::Debug, future::Future};
use tracing::{debug, warn};

/// A message received from the transport.
#[derive(Clone, Debug)]
pub struct Incoming<P> {
    /// Transport-level name of the sender (used for logging only).
    pub sender: String,
    /// Authenticated public key of the sender.
    pub public_key: P,
    /// Type tag of the payload.
    pub tag: String,
    pub payload: Bytes,
}

/// Interface for broadcasting messages to every other member.
pub trait Sender: Send + 'static {
    /// Error that can occur when sending a message.
    type Error: Debug + StdError + Send + Sync;

    /// Broadcast a tagged message.
    fn broadcast(
        &mut self,
        tag: &'static str,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Interface for receiving messages from any member.
pub trait Receiver: Send + 'static {
    /// Error that can occur when receiving a message.
    type Error: Debug + StdError + Send + Sync;

    /// Public key type used to identify senders.
    type PublicKey: Clone + Debug + Send + Sync;

    /// Receive the next message.
    fn recv(
        &mut self,
    ) -> impl Future<Output = Result<Incoming<Self::PublicKey>, Self::Error>> + Send;
}

/// Maps the public keys of the group to member identifiers.
pub trait Membership<P>: Send + 'static {
    fn member_id(&self, public_key: &P) -> Option<MemberId>;
}

impl<P: Ord + Send + Sync + 'static> Membership<P> for BTreeMap<P, MemberId> {
    fn member_id(&self, public_key: &P) -> Option<MemberId> {
        self.get(public_key).copied()
    }
}

/// A message attributed to a member and decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inbound {
    pub sender: MemberId,
    pub payload: Payload,
}

type Filter<P> = Box<dyn Fn(&P) -> bool + Send + Sync>;

/// Sends and receives the messages of a run.
pub struct Dispatcher<S: Sender, R: Receiver, M: Membership<R::PublicKey>> {
    sender: S,
    receiver: R,
    membership: M,
    config: Config,
    filters: Vec<Filter<R::PublicKey>>,
}

impl<S: Sender, R: Receiver, M: Membership<R::PublicKey>> Dispatcher<S, R, M> {
    pub fn new(sender: S, receiver: R, membership: M, config: Config) -> Self {
        Self {
            sender,
            receiver,
            membership,
            config,
            filters: Vec::new(),
        }
    }

    /// Only accept messages from senders for which `filter` returns `true`.
    ///
    /// Filters run before the payload is decoded.
    pub fn add_filter(&mut self, filter: impl Fn(&R::PublicKey) -> bool + Send + Sync + 'static) {
        self.filters.push(Box::new(filter));
    }

    /// Broadcast a payload to every other member.
    pub async fn broadcast(&mut self, payload: &Payload) -> Result<(), Error> {
        self.sender
            .broadcast(payload.tag(), Bytes::from(payload.encode()))
            .await
            .map_err(|err| Error::Transport(err.to_string()))
    }

    /// Attribute and decode a message.
    pub fn decode(&self, incoming: Incoming<R::PublicKey>) -> Result<Inbound, Error> {
        let sender = self
            .membership
            .member_id(&incoming.public_key)
            .ok_or_else(|| Error::MalformedMessage(format!("unknown sender: {}", incoming.sender)))?;
        if !self.config.contains(sender) {
            return Err(Error::InvalidMember(sender));
        }
        let payload = Payload::decode(&incoming.tag, incoming.payload, &self.config)?;
        Ok(Inbound { sender, payload })
    }

    /// Receive the next message that passes all filters and decodes.
    ///
    /// Returns an error only if the transport fails.
    pub async fn recv(&mut self) -> Result<Inbound, Error> {
        loop {
            let incoming = self
                .receiver
                .recv()
                .await
                .map_err(|err| Error::Transport(err.to_string()))?;
            if !self.filters.iter().all(|filter| filter(&incoming.public_key)) {
                debug!(sender = %incoming.sender, "filtered message");
                continue;
            }
            let name = incoming.sender.clone();
            let tag = incoming.tag.clone();
            match self.decode(incoming) {
                Ok(inbound) => return Ok(inbound),
                Err(err) => {
                    warn!(sender = %name, %tag, ?err, "dropped message");
                }
            }
        }
    }
}

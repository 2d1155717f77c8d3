//! The message catalog: wire id ↔ message type.
//!
//! Built once at process start with [`CatalogBuilder`], then frozen into
//! an immutable [`Catalog`] and shared by `Arc` with every connection.
//! There is no global registry; two catalogs in one process are
//! independent.
//!
//! ```text
//! Catalog::builder()          ids assigned in call order
//!     .register::<A>()   →  #0
//!     .register::<B>()   →  #1
//!     .build()           →  Catalog (immutable)
//! ```

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::{
    AnyMessage, Channel, ChatMessage, ConnectionEstablished, CoreMessage,
    Disconnect, Message, MessageTypeId, Packet, Ping, Pong, ProtocolError,
    WireReader,
};

type Decoder<P> =
    Box<dyn Fn(&mut WireReader<'_>) -> Result<P, ProtocolError> + Send + Sync>;

/// One registered message type.
pub struct CatalogEntry<P> {
    id: MessageTypeId,
    name: &'static str,
    channel: Channel,
    decode: Decoder<P>,
}

impl<P> CatalogEntry<P> {
    pub fn id(&self) -> MessageTypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl<P> fmt::Debug for CatalogEntry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("channel", &self.channel)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Mutable form of the catalog. Registration never fails.
pub struct CatalogBuilder<P> {
    entries: BTreeMap<MessageTypeId, CatalogEntry<P>>,
    ids: HashMap<TypeId, MessageTypeId>,
    next_candidate: i32,
}

impl<P: Packet> CatalogBuilder<P> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            ids: HashMap::new(),
            next_candidate: 0,
        }
    }

    /// Registers `T` under the next free id.
    pub fn register<T: Message>(&mut self) -> MessageTypeId
    where
        P: From<T>,
    {
        self.register_with::<T>(P::from)
    }

    /// Registers `T`, starting the search for a free id at `candidate`.
    ///
    /// Taken ids are skipped by incrementing the candidate until an open
    /// slot is found. Negative candidates start at 0.
    pub fn register_as<T: Message>(
        &mut self,
        candidate: MessageTypeId,
    ) -> MessageTypeId
    where
        P: From<T>,
    {
        self.insert::<T>(candidate.0.max(0), P::from)
    }

    /// Registers `T` with an explicit wrapping function, for packet enums
    /// that nest messages rather than implementing `From`.
    pub fn register_with<T: Message>(
        &mut self,
        wrap: fn(T) -> P,
    ) -> MessageTypeId {
        let id = self.insert::<T>(self.next_candidate, wrap);
        if id.0 >= self.next_candidate {
            self.next_candidate = id.0.wrapping_add(1).max(0);
        }
        id
    }

    /// Registers the core bookkeeping messages, in table order.
    pub fn register_core(&mut self) -> &mut Self {
        self.register_with::<ConnectionEstablished>(|m| {
            P::from_core(CoreMessage::ConnectionEstablished(m))
        });
        self.register_with::<Ping>(|m| P::from_core(CoreMessage::Ping(m)));
        self.register_with::<Pong>(|m| P::from_core(CoreMessage::Pong(m)));
        self.register_with::<Disconnect>(|m| {
            P::from_core(CoreMessage::Disconnect(m))
        });
        self.register_with::<ChatMessage>(|m| {
            P::from_core(CoreMessage::Chat(m))
        });
        self
    }

    fn insert<T: Message>(
        &mut self,
        candidate: i32,
        wrap: fn(T) -> P,
    ) -> MessageTypeId {
        let key = TypeId::of::<T>();
        if let Some(existing) = self.ids.get(&key) {
            return *existing;
        }

        let mut id = MessageTypeId(candidate);
        while self.entries.contains_key(&id) {
            id = MessageTypeId(id.0.wrapping_add(1).max(0));
        }

        self.entries.insert(
            id,
            CatalogEntry {
                id,
                name: T::NAME,
                channel: T::CHANNEL,
                decode: Box::new(move |r: &mut WireReader<'_>| {
                    T::decode(r).map(wrap)
                }),
            },
        );
        self.ids.insert(key, id);
        id
    }

    /// Freezes the catalog.
    pub fn build(self) -> Catalog<P> {
        Catalog {
            entries: self.entries,
            ids: self.ids,
        }
    }
}

impl<P: Packet> Default for CatalogBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Immutable wire id ↔ message type mapping.
pub struct Catalog<P> {
    entries: BTreeMap<MessageTypeId, CatalogEntry<P>>,
    ids: HashMap<TypeId, MessageTypeId>,
}

impl<P: Packet> Catalog<P> {
    pub fn builder() -> CatalogBuilder<P> {
        CatalogBuilder::new()
    }

    /// Returns the entry registered under `id`.
    pub fn lookup(&self, id: MessageTypeId) -> Option<&CatalogEntry<P>> {
        self.entries.get(&id)
    }

    /// Returns the id `T` was registered under.
    pub fn id_of<T: Message>(&self) -> Option<MessageTypeId> {
        self.ids.get(&TypeId::of::<T>()).copied()
    }

    /// Returns the id of the message inside an outbound packet.
    pub fn id_for(
        &self,
        msg: &dyn AnyMessage,
    ) -> Result<MessageTypeId, ProtocolError> {
        self.ids
            .get(&msg.type_key())
            .copied()
            .ok_or(ProtocolError::UnregisteredMessage(msg.name()))
    }

    /// Decodes a fresh packet of type `id` from the payload.
    pub fn decode(
        &self,
        id: MessageTypeId,
        r: &mut WireReader<'_>,
    ) -> Result<P, ProtocolError> {
        let entry = self
            .entries
            .get(&id)
            .ok_or(ProtocolError::UnknownMessageType(id))?;
        (entry.decode)(r)
    }

    /// Registered entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry<P>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P> fmt::Debug for Catalog<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.values()).finish()
    }
}

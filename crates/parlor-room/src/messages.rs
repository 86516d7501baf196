//! Typed message handlers with optional validation.
//!
//! Handlers are registered on the [`Room`](crate::Room) (usually in
//! `on_create`) and resolved per incoming message: exact type first, then
//! the wildcard, then the missing-handler path (dev mode replies with an
//! `INVALID_PAYLOAD` error, production closes the connection).
//!
//! Dispatch briefly *takes* a handler out of the registry so it can receive
//! `&mut Room` without aliasing it, then restores it — unless the handler
//! re-registered that type itself while running.

use std::collections::HashMap;

use parlor_protocol::MessageType;
use serde_json::Value;

use crate::{Client, Room, RoomError, RoomLogic};

/// Callback for a typed JSON message.
pub type MessageCallback<L> =
    Box<dyn FnMut(&mut L, &mut Room<L>, &Client, Value) -> Result<(), RoomError> + Send>;

/// Callback for a typed raw-bytes message.
pub type BytesCallback<L> =
    Box<dyn FnMut(&mut L, &mut Room<L>, &Client, Vec<u8>) -> Result<(), RoomError> + Send>;

/// Payload validator: may normalize the payload or reject it by erroring.
pub type Validator = Box<dyn Fn(Value) -> Result<Value, RoomError> + Send>;

pub(crate) struct MessageHandler<L: RoomLogic> {
    pub(crate) validate: Option<Validator>,
    pub(crate) callback: MessageCallback<L>,
}

/// Where a taken handler came from, so it can be restored there.
pub(crate) enum Resolved<L: RoomLogic> {
    Exact(MessageHandler<L>),
    Wildcard(MessageHandler<L>),
    Missing,
}

pub(crate) enum ResolvedBytes<L: RoomLogic> {
    Exact(BytesCallback<L>),
    Wildcard(BytesCallback<L>),
    Missing,
}

/// Registry of message handlers for one room.
pub struct MessageRegistry<L: RoomLogic> {
    handlers: HashMap<MessageType, MessageHandler<L>>,
    wildcard: Option<MessageHandler<L>>,
    bytes_handlers: HashMap<MessageType, BytesCallback<L>>,
    bytes_wildcard: Option<BytesCallback<L>>,
}

impl<L: RoomLogic> Default for MessageRegistry<L> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            wildcard: None,
            bytes_handlers: HashMap::new(),
            bytes_wildcard: None,
        }
    }
}

impl<L: RoomLogic> MessageRegistry<L> {
    pub(crate) fn register(
        &mut self,
        message_type: MessageType,
        validate: Option<Validator>,
        callback: MessageCallback<L>,
    ) {
        self.handlers
            .insert(message_type, MessageHandler { validate, callback });
    }

    pub(crate) fn register_wildcard(&mut self, callback: MessageCallback<L>) {
        self.wildcard = Some(MessageHandler {
            validate: None,
            callback,
        });
    }

    pub(crate) fn register_bytes(&mut self, message_type: MessageType, callback: BytesCallback<L>) {
        self.bytes_handlers.insert(message_type, callback);
    }

    pub(crate) fn register_bytes_wildcard(&mut self, callback: BytesCallback<L>) {
        self.bytes_wildcard = Some(callback);
    }

    /// Takes the handler for a type: exact match first, then wildcard.
    pub(crate) fn take(&mut self, message_type: &MessageType) -> Resolved<L> {
        if let Some(handler) = self.handlers.remove(message_type) {
            return Resolved::Exact(handler);
        }
        match self.wildcard.take() {
            Some(handler) => Resolved::Wildcard(handler),
            None => Resolved::Missing,
        }
    }

    /// Restores a handler taken with [`take`](Self::take), unless dispatch
    /// replaced it meanwhile.
    pub(crate) fn restore(&mut self, message_type: &MessageType, resolved: Resolved<L>) {
        match resolved {
            Resolved::Exact(handler) => {
                self.handlers
                    .entry(message_type.clone())
                    .or_insert(handler);
            }
            Resolved::Wildcard(handler) => {
                if self.wildcard.is_none() {
                    self.wildcard = Some(handler);
                }
            }
            Resolved::Missing => {}
        }
    }

    pub(crate) fn take_bytes(&mut self, message_type: &MessageType) -> ResolvedBytes<L> {
        if let Some(callback) = self.bytes_handlers.remove(message_type) {
            return ResolvedBytes::Exact(callback);
        }
        match self.bytes_wildcard.take() {
            Some(callback) => ResolvedBytes::Wildcard(callback),
            None => ResolvedBytes::Missing,
        }
    }

    pub(crate) fn restore_bytes(&mut self, message_type: &MessageType, resolved: ResolvedBytes<L>) {
        match resolved {
            ResolvedBytes::Exact(callback) => {
                self.bytes_handlers
                    .entry(message_type.clone())
                    .or_insert(callback);
            }
            ResolvedBytes::Wildcard(callback) => {
                if self.bytes_wildcard.is_none() {
                    self.bytes_wildcard = Some(callback);
                }
            }
            ResolvedBytes::Missing => {}
        }
    }

    /// Number of registered typed handlers (exact matches only).
    pub fn len(&self) -> usize {
        self.handlers.len() + self.bytes_handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.wildcard.is_none() && self.bytes_wildcard.is_none()
    }
}

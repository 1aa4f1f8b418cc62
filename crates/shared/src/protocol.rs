//! Typed event names.
//!
//! On the wire every event is a plain string. Entity traffic follows the
//! `{entity_type}:{action}` convention (`attendance:created`,
//! `child:subscribe`, ...); everything else is an application-defined name.
//! [`EventName`] decodes that convention once, at the dispatch boundary.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Path of the relay's WebSocket endpoint.
pub const WS_PATH: &str = "/ws";

/// Query parameter carrying the access token on the upgrade request.
pub const TOKEN_PARAM: &str = "token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityAction {
    Created,
    Updated,
    Deleted,
    Subscribe,
    Unsubscribe,
}

impl EntityAction {
    /// Actions the server pushes to subscribers.
    pub const CHANGES: [EntityAction; 3] = [
        EntityAction::Created,
        EntityAction::Updated,
        EntityAction::Deleted,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            EntityAction::Created => "created",
            EntityAction::Updated => "updated",
            EntityAction::Deleted => "deleted",
            EntityAction::Subscribe => "subscribe",
            EntityAction::Unsubscribe => "unsubscribe",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(EntityAction::Created),
            "updated" => Some(EntityAction::Updated),
            "deleted" => Some(EntityAction::Deleted),
            "subscribe" => Some(EntityAction::Subscribe),
            "unsubscribe" => Some(EntityAction::Unsubscribe),
            _ => None,
        }
    }
}

impl fmt::Display for EntityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded event name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventName {
    Entity {
        entity_type: String,
        action: EntityAction,
    },
    Custom(CustomName),
}

/// An event name outside the entity convention. Only [`EventName::parse`]
/// builds one, so a name such as `child:created` can never hide here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomName(String);

impl CustomName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CustomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl EventName {
    pub fn entity(entity_type: impl Into<String>, action: EntityAction) -> Self {
        EventName::Entity {
            entity_type: entity_type.into(),
            action,
        }
    }

    /// Decode a wire name. Never fails: unknown shapes become `Custom`.
    pub fn parse(raw: &str) -> Self {
        if let Some((entity_type, action)) = raw.rsplit_once(':') {
            if !entity_type.is_empty() {
                if let Some(action) = EntityAction::parse(action) {
                    return EventName::entity(entity_type, action);
                }
            }
        }
        EventName::Custom(CustomName(raw.to_string()))
    }

    pub fn entity_type(&self) -> Option<&str> {
        match self {
            EventName::Entity { entity_type, .. } => Some(entity_type),
            EventName::Custom(_) => None,
        }
    }

    pub fn action(&self) -> Option<EntityAction> {
        match self {
            EventName::Entity { action, .. } => Some(*action),
            EventName::Custom(_) => None,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventName::Entity {
                entity_type,
                action,
            } => write!(f, "{}:{}", entity_type, action),
            EventName::Custom(name) => f.write_str(name.as_str()),
        }
    }
}

impl FromStr for EventName {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventName::parse(s))
    }
}

impl From<&str> for EventName {
    fn from(raw: &str) -> Self {
        EventName::parse(raw)
    }
}

impl From<String> for EventName {
    fn from(raw: String) -> Self {
        EventName::parse(&raw)
    }
}

impl From<&EventName> for EventName {
    fn from(name: &EventName) -> Self {
        name.clone()
    }
}

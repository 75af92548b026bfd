//! Watch notifications delivered to the informer.

use fleet_core::{Fleet, Instance};

/// Change to a single watched object.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectEvent<T> {
    Added(T),
    Updated { old: T, new: T },
    Removed(T),
}

impl<T> ObjectEvent<T> {
    /// The most recent state of the object carried by the event.
    pub fn latest(&self) -> &T {
        match self {
            ObjectEvent::Added(obj) | ObjectEvent::Removed(obj) => obj,
            ObjectEvent::Updated { new, .. } => new,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ObjectEvent::Added(_) => "added",
            ObjectEvent::Updated { .. } => "updated",
            ObjectEvent::Removed(_) => "removed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Instance(ObjectEvent<Instance>),
    Fleet(ObjectEvent<Fleet>),
}

impl From<ObjectEvent<Instance>> for WatchEvent {
    fn from(event: ObjectEvent<Instance>) -> Self {
        WatchEvent::Instance(event)
    }
}

impl From<ObjectEvent<Fleet>> for WatchEvent {
    fn from(event: ObjectEvent<Fleet>) -> Self {
        WatchEvent::Fleet(event)
    }
}

//! Versioned channel storage backing [`crate::state::VersionedState`].
//!
//! Each channel wraps a single collection (messages, the extra key-value
//! map, or errors) together with a monotonically-increasing version number.
//! Versions only ever change via the barrier/reducer path; nodes read
//! through a [`crate::state::StateSnapshot`] and never mutate a channel
//! directly.

pub mod errors;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::message::Message;
use crate::types::ChannelType;
use errors::ErrorEvent;

/// Common behavior for versioned channel storage.
///
/// `Data` is the concrete collection type held by the channel (`Vec<Message>`
/// for messages, `FxHashMap<String, Value>` for extras, `Vec<ErrorEvent>` for
/// errors). Snapshots clone this collection; callers should avoid snapshotting
/// in hot loops over large channels.
pub trait Channel {
    type Data: Clone;

    /// Which `ChannelType` this channel corresponds to.
    fn get_channel_type(&self) -> ChannelType;

    /// Whether this channel's contents should survive checkpointing.
    /// All three built-in channels are persistent; the hook exists for
    /// future ephemeral/scratch channels.
    fn persistent(&self) -> bool {
        true
    }

    fn version(&self) -> u32;
    fn set_version(&mut self, version: u32);

    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_mut(&mut self) -> &mut Self::Data;
    fn snapshot(&self) -> Self::Data;
}

macro_rules! impl_vec_channel {
    ($name:ident, $item:ty, $channel_type:expr) => {
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct $name {
            items: Vec<$item>,
            version: u32,
        }

        impl $name {
            pub fn new(items: Vec<$item>, version: u32) -> Self {
                Self { items, version }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    items: Vec::new(),
                    version: 1,
                }
            }
        }

        impl Channel for $name {
            type Data = Vec<$item>;

            fn get_channel_type(&self) -> ChannelType {
                $channel_type
            }

            fn version(&self) -> u32 {
                self.version
            }

            fn set_version(&mut self, version: u32) {
                self.version = version;
            }

            fn len(&self) -> usize {
                self.items.len()
            }

            fn get_mut(&mut self) -> &mut Self::Data {
                &mut self.items
            }

            fn snapshot(&self) -> Self::Data {
                self.items.clone()
            }
        }
    };
}

impl_vec_channel!(MessagesChannel, Message, ChannelType::Message);
impl_vec_channel!(ErrorsChannel, ErrorEvent, ChannelType::Error);

/// Free-form key/value metadata channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtrasChannel {
    map: FxHashMap<String, Value>,
    version: u32,
}

impl ExtrasChannel {
    pub fn new(map: FxHashMap<String, Value>, version: u32) -> Self {
        Self { map, version }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }
}

impl Default for ExtrasChannel {
    fn default() -> Self {
        Self {
            map: FxHashMap::default(),
            version: 1,
        }
    }
}

impl Channel for ExtrasChannel {
    type Data = FxHashMap<String, Value>;

    fn get_channel_type(&self) -> ChannelType {
        ChannelType::Extra
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn get_mut(&mut self) -> &mut Self::Data {
        &mut self.map
    }

    fn snapshot(&self) -> Self::Data {
        self.map.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_channels_start_at_version_one() {
        assert_eq!(MessagesChannel::default().version(), 1);
        assert_eq!(ExtrasChannel::default().version(), 1);
        assert_eq!(ErrorsChannel::default().version(), 1);
    }

    #[test]
    fn extras_channel_round_trips() {
        let mut channel = ExtrasChannel::default();
        channel
            .get_mut()
            .insert("k".to_string(), Value::from("v"));
        assert_eq!(channel.get("k"), Some(&Value::from("v")));
        assert_eq!(channel.snapshot().len(), 1);
    }
}

//! Stimulus channel registry
//!
//! ITM multiplexes up to 32 logical byte streams ("stimulus channels") over
//! the single SWO wire. The registry holds the per-channel viewer settings:
//! whether the channel is shown, its display name and its display color.
//! The decoder consults `is_enabled` before materializing any trace text,
//! so disabled channels cost nothing beyond header parsing.
//!
//! The registry is part of the session context owned by the UI thread; the
//! reader thread never touches it.

use serde::{Deserialize, Serialize};

/// Number of ITM stimulus channels
pub const CHANNEL_COUNT: usize = 32;

/// Maximum channel name length in bytes
pub const CHANNEL_NAME_MAX: usize = 29;

/// Viewer settings for a single stimulus channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Whether trace output for this channel is decoded and shown
    pub enabled: bool,
    /// Display name (defaults to the channel number)
    pub name: String,
    /// Display color (RGBA)
    pub color: [u8; 4],
}

impl Channel {
    fn new(index: usize) -> Self {
        Self {
            enabled: index == 0,
            name: index.to_string(),
            color: [190, 190, 190, 255],
        }
    }
}

/// Registry of the 32 stimulus channels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    /// Create a registry with default settings (only channel 0 enabled)
    pub fn new() -> Self {
        Self {
            channels: (0..CHANNEL_COUNT).map(Channel::new).collect(),
        }
    }

    /// Set all fields of a channel at once.
    ///
    /// A `None` name resets the name to the channel number. Panics if
    /// `index` is out of range.
    pub fn configure(&mut self, index: usize, enabled: bool, name: Option<&str>, color: [u8; 4]) {
        assert!(index < CHANNEL_COUNT);
        self.channels[index].enabled = enabled;
        self.channels[index].color = color;
        self.set_name(index, name);
    }

    /// Whether the channel is currently enabled.
    ///
    /// Out-of-range indices report `false`, so callers can pass a decoded
    /// channel number without a separate range check.
    pub fn is_enabled(&self, index: usize) -> bool {
        index < CHANNEL_COUNT && self.channels[index].enabled
    }

    /// Enable or disable a channel
    pub fn set_enabled(&mut self, index: usize, enabled: bool) {
        assert!(index < CHANNEL_COUNT);
        self.channels[index].enabled = enabled;
    }

    /// The channel's display name
    pub fn name(&self, index: usize) -> &str {
        assert!(index < CHANNEL_COUNT);
        &self.channels[index].name
    }

    /// Set the display name; `None` resets it to the channel number.
    ///
    /// Names longer than [`CHANNEL_NAME_MAX`] bytes are truncated on a
    /// character boundary.
    pub fn set_name(&mut self, index: usize, name: Option<&str>) {
        assert!(index < CHANNEL_COUNT);
        self.channels[index].name = match name {
            Some(text) => truncate_name(text).to_string(),
            None => index.to_string(),
        };
    }

    /// The channel's display color
    pub fn color(&self, index: usize) -> [u8; 4] {
        assert!(index < CHANNEL_COUNT);
        self.channels[index].color
    }

    /// Set the display color
    pub fn set_color(&mut self, index: usize, color: [u8; 4]) {
        assert!(index < CHANNEL_COUNT);
        self.channels[index].color = color;
    }

    /// Iterate over all channels in index order
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Length in characters of the longest enabled channel name
    pub fn longest_name_len(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.name.chars().count())
            .max()
            .unwrap_or(0)
    }
}

fn truncate_name(name: &str) -> &str {
    if name.len() <= CHANNEL_NAME_MAX {
        return name;
    }
    let mut end = CHANNEL_NAME_MAX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = ChannelRegistry::new();
        assert!(registry.is_enabled(0));
        for index in 1..CHANNEL_COUNT {
            assert!(!registry.is_enabled(index));
            assert_eq!(registry.name(index), index.to_string());
        }
    }

    #[test]
    fn test_configure() {
        let mut registry = ChannelRegistry::new();
        registry.configure(3, true, Some("uart"), [0, 128, 255, 255]);
        assert!(registry.is_enabled(3));
        assert_eq!(registry.name(3), "uart");
        assert_eq!(registry.color(3), [0, 128, 255, 255]);
    }

    #[test]
    fn test_name_reset_and_truncation() {
        let mut registry = ChannelRegistry::new();
        registry.set_name(5, Some("a-very-long-channel-name-that-overflows"));
        assert_eq!(registry.name(5).len(), CHANNEL_NAME_MAX);

        registry.set_name(5, None);
        assert_eq!(registry.name(5), "5");
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        let mut registry = ChannelRegistry::new();
        // 15 two-byte characters; a naive byte cut at 29 would split one
        registry.set_name(7, Some("ééééééééééééééé"));
        assert!(registry.name(7).len() <= CHANNEL_NAME_MAX);
        assert!(registry.name(7).chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_out_of_range_enabled_is_false() {
        let registry = ChannelRegistry::new();
        assert!(!registry.is_enabled(CHANNEL_COUNT));
        assert!(!registry.is_enabled(usize::MAX));
    }
}

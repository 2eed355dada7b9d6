use std::collections::{BTreeMap, HashMap};

/// Static channel table with both lookup directions built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    discord_to_matrix: HashMap<String, String>,
    matrix_to_discord: HashMap<String, String>,
}

impl ChannelMap {
    pub fn new(bridge: &BTreeMap<String, String>) -> Self {
        let discord_to_matrix: HashMap<String, String> = bridge
            .iter()
            .map(|(channel, room)| (channel.clone(), room.clone()))
            .collect();
        let matrix_to_discord = discord_to_matrix
            .iter()
            .map(|(channel, room)| (room.clone(), channel.clone()))
            .collect();

        Self {
            discord_to_matrix,
            matrix_to_discord,
        }
    }

    pub fn matrix_room_for(&self, discord_channel_id: &str) -> Option<&str> {
        self.discord_to_matrix
            .get(discord_channel_id)
            .map(String::as_str)
    }

    pub fn discord_channel_for(&self, matrix_room_id: &str) -> Option<&str> {
        self.matrix_to_discord.get(matrix_room_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.discord_to_matrix.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::ChannelMap;

    #[test]
    fn resolves_both_directions() {
        let mut bridge = BTreeMap::new();
        bridge.insert("111".to_string(), "!one:example.org".to_string());
        bridge.insert("222".to_string(), "!two:example.org".to_string());

        let map = ChannelMap::new(&bridge);

        assert_eq!(map.len(), 2);
        assert_eq!(map.matrix_room_for("111"), Some("!one:example.org"));
        assert_eq!(map.discord_channel_for("!two:example.org"), Some("222"));
        assert_eq!(map.matrix_room_for("333"), None);
        assert_eq!(map.discord_channel_for("!three:example.org"), None);
    }
}

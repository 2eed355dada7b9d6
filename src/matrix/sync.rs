//! Subset of the `/sync` response the relay reads.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: SyncRooms,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncRooms {
    #[serde(default)]
    pub join: BTreeMap<String, JoinedRoom>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

#[derive(Debug, Default, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<Value>,
}

impl SyncResponse {
    /// `m.room.message` timeline events of joined rooms, in timeline order per room.
    pub fn room_messages(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.rooms.join.iter().flat_map(|(room_id, room)| {
            room.timeline
                .events
                .iter()
                .filter(|event| event.get("type").and_then(Value::as_str) == Some("m.room.message"))
                .map(move |event| (room_id.as_str(), event))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::SyncResponse;

    #[test]
    fn keeps_only_room_messages_in_order() {
        let response: SyncResponse = serde_json::from_value(json!({
            "next_batch": "s72595_4483_1934",
            "rooms": {
                "join": {
                    "!a:example.org": {
                        "timeline": {
                            "events": [
                                {"type": "m.room.message", "event_id": "$1"},
                                {"type": "m.room.member", "event_id": "$2"},
                                {"type": "m.room.message", "event_id": "$3"}
                            ]
                        }
                    },
                    "!b:example.org": {"state": {"events": []}}
                },
                "invite": {}
            }
        }))
        .expect("sync response parses");

        let messages: Vec<(&str, &str)> = response
            .room_messages()
            .map(|(room, event)| (room, event["event_id"].as_str().unwrap_or_default()))
            .collect();

        assert_eq!(response.next_batch, "s72595_4483_1934");
        assert_eq!(messages, vec![("!a:example.org", "$1"), ("!a:example.org", "$3")]);
    }

    #[test]
    fn empty_sync_has_no_messages() {
        let response: SyncResponse =
            serde_json::from_value(json!({"next_batch": "s1"})).expect("sync response parses");
        assert_eq!(response.room_messages().count(), 0);
    }
}

fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use neomind_protocol::{
        ChatRequest, Inbound, NeoMindProtocol, Pong, ProtocolAdapter, ServerMessage,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn fixture_text(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&fixture_text(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Normalizes JSON values so that integer-valued floats compare equal.
    ///
    /// The server emits counters as integers and scores as floats; a
    /// re-serialized `f64` may print `4` as `4.0`.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent, float-normalized comparison).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  server: {fixture}\n  client: {reserialized}"
        );
        parsed
    }

    fn classify(name: &str) -> Inbound {
        NeoMindProtocol.classify(&fixture_text(name))
    }

    // --- Server -> client ---

    #[test]
    fn fixture_system_welcome() {
        let msg = roundtrip_test::<ServerMessage>("system_welcome.json");
        assert!(msg.is("system"));
        assert_eq!(msg.content(), Some("Connected to Edge AI Agent"));
        assert!(msg.announced_session().is_none());
    }

    #[test]
    fn fixture_welcome_without_session_drops_null() {
        let fixture = load_fixture("system_welcome_no_session.json");
        let msg: ServerMessage = serde_json::from_value(fixture.clone()).unwrap();
        assert!(msg.session_id.is_none());
        assert!(matches!(
            classify("system_welcome_no_session.json"),
            Inbound::Message(_)
        ));

        let reserialized = serde_json::to_value(&msg).unwrap();
        assert!(reserialized.get("sessionId").is_none());
        let mut expected = fixture;
        expected.as_object_mut().unwrap().remove("sessionId");
        assert_eq!(reserialized, expected);
    }

    #[test]
    fn fixture_session_created() {
        let msg = roundtrip_test::<ServerMessage>("session_created.json");
        assert_eq!(
            msg.announced_session(),
            Some("b3e0f6d2-8c41-4f7a-a2d9-51c7e6a09b3f")
        );
    }

    #[test]
    fn fixture_content_chunk() {
        let msg = roundtrip_test::<ServerMessage>("content_chunk.json");
        assert_eq!(msg.content(), Some("The living room sensor reads 23.5"));
    }

    #[test]
    fn fixture_tool_call_end_keeps_unknown_fields() {
        let msg = roundtrip_test::<ServerMessage>("tool_call_end.json");
        assert_eq!(msg.str_field("tool"), Some("query_device_data"));
        assert_eq!(msg.fields["success"], serde_json::json!(true));
    }

    #[test]
    fn fixture_intent() {
        let msg = roundtrip_test::<ServerMessage>("intent.json");
        assert_eq!(msg.str_field("displayName"), Some("Device query"));
    }

    #[test]
    fn fixture_progress() {
        let msg = roundtrip_test::<ServerMessage>("progress.json");
        assert_eq!(msg.message(), Some("Collecting device data"));
    }

    #[test]
    fn fixture_history_entry_keeps_nulls() {
        let msg = roundtrip_test::<ServerMessage>("history_entry.json");
        assert_eq!(msg.fields["thinking"], serde_json::Value::Null);
    }

    #[test]
    fn fixture_ping_is_heartbeat() {
        roundtrip_test::<ServerMessage>("ping.json");
        assert!(matches!(classify("ping.json"), Inbound::Heartbeat));
    }

    #[test]
    fn fixture_auth_error_is_auth_failure() {
        roundtrip_test::<ServerMessage>("auth_error.json");
        match classify("auth_error.json") {
            Inbound::AuthFailure(message) => assert_eq!(message, "Invalid or expired token"),
            other => panic!("expected auth failure, got {other:?}"),
        }
    }

    #[test]
    fn application_fixtures_are_forwarded() {
        for name in [
            "system_welcome.json",
            "session_created.json",
            "content_chunk.json",
            "tool_call_end.json",
            "intent.json",
            "progress.json",
            "history_entry.json",
        ] {
            assert!(
                matches!(classify(name), Inbound::Message(_)),
                "{name} should be forwarded"
            );
        }
    }

    // --- Client -> server ---

    #[test]
    fn fixture_chat_request() {
        let req = roundtrip_test::<ChatRequest>("chat_request.json");
        assert_eq!(req.backend_id.as_deref(), Some("ollama-local"));
        assert!(req.images.is_none());
    }

    #[test]
    fn fixture_chat_request_with_image() {
        let req = roundtrip_test::<ChatRequest>("chat_request_image.json");
        assert!(req.session_id.is_none());
        let images = req.images.unwrap();
        assert_eq!(images[0].mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn fixture_pong_matches_reply_frame() {
        let pong = roundtrip_test::<Pong>("pong.json");
        assert_eq!(pong, Pong::default());
        let reply: serde_json::Value =
            serde_json::from_str(&NeoMindProtocol.heartbeat_reply()).unwrap();
        assert_eq!(reply, load_fixture("pong.json"));
    }

    // --- Legacy compat ---

    #[test]
    fn legacy_chat_request_message_only() {
        // Older web clients sent only the text.
        let req: ChatRequest = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(req, ChatRequest::new("hi"));
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({"message": "hi"})
        );
    }
}

use super::*;
use serde_json::json;

fn record(handle: &str, peer_id: &str) -> PeerRecord {
    PeerRecord {
        handle: Handle::from(handle),
        peer_id: PeerId::from(peer_id),
        session_peer_id: None,
    }
}

#[test]
fn contrib_uses_camel_case_wire_fields() {
    let envelope = Envelope::Contrib(Contribution {
        peer_id: PeerId::from("peer-a"),
        status: ContributionStatus::Ok,
        program_id: ProgramId::from("p1"),
        store_id: Some(StoreId::from("store-1")),
    });

    let wire: Value = serde_json::to_value(&envelope).expect("serialize");
    assert_eq!(
        wire,
        json!({
            "type": "contrib",
            "payload": {
                "peerId": "peer-a",
                "status": "ok",
                "programId": "p1",
                "storeId": "store-1",
            }
        })
    );
}

#[test]
fn register_without_session_peer_id_decodes() {
    let envelope =
        Envelope::from_json(r#"{"type":"register","payload":{"handle":"alice","peerId":"12D3"}}"#)
            .expect("decode");
    assert_eq!(envelope, Envelope::Register(record("alice", "12D3")));
}

#[test]
fn unknown_tag_keeps_its_payload() {
    let text = r#"{"type":"peer-exit","payload":{"peerId":"x","extra":[1,2]}}"#;
    let envelope = Envelope::from_json(text).expect("decode");
    match &envelope {
        Envelope::Unknown { kind, payload } => {
            assert_eq!(kind, "peer-exit");
            assert_eq!(payload, &json!({"peerId": "x", "extra": [1, 2]}));
        }
        other => panic!("expected unknown envelope, got {other:?}"),
    }

    let reencoded: Value = serde_json::to_value(&envelope).expect("serialize");
    assert_eq!(reencoded, serde_json::from_str::<Value>(text).expect("json"));
}

#[test]
fn known_tag_with_bad_payload_is_rejected() {
    let err = Envelope::from_json(r#"{"type":"contrib","payload":{"peerId":"x"}}"#)
        .expect_err("missing fields");
    assert!(matches!(err, ProtocolError::InvalidPayload { ref kind, .. } if kind == "contrib"));

    let err = Envelope::from_json("not json").expect_err("malformed");
    assert!(matches!(err, ProtocolError::Malformed(_)));
}

#[test]
fn registry_is_keyed_by_peer_id_and_last_write_wins() {
    let mut registry = Registry::default();
    registry.insert(record("alice", "p-1"));
    registry.insert(record("alice", "p-2"));
    let previous = registry.insert(record("alice-renamed", "p-1"));

    assert_eq!(previous, Some(record("alice", "p-1")));
    assert_eq!(registry.len(), 2);
    assert_eq!(
        registry.get(&PeerId::from("p-1")).map(|r| r.handle.as_str()),
        Some("alice-renamed")
    );
    assert_eq!(registry.find_by_handle(&Handle::from("alice")).count(), 1);
}

#[test]
fn codeparty_start_preserves_party_order_and_finds_binding() {
    let text = json!({
        "type": "codeparty-start",
        "payload": {
            "programId": "p1",
            "peers": {
                "party2": {
                    "ownerPeerId": "owner", "peerId": "bob", "partySymbol": "party2",
                    "partyName": "Party2", "programId": "p1",
                    "inputs": [{"type": "SecretInteger", "name": "b"}]
                },
                "party1": {
                    "ownerPeerId": "owner", "peerId": "alice", "partySymbol": "party1",
                    "partyName": "Party1", "programId": "p1",
                    "inputs": [{"type": "SecretInteger", "name": "a"}],
                    "outputName": "o"
                }
            }
        }
    })
    .to_string();

    let Envelope::CodePartyStart(start) = Envelope::from_json(&text).expect("decode") else {
        panic!("expected codeparty-start");
    };
    let symbols: Vec<&str> = start.peers.keys().map(PartySymbol::as_str).collect();
    assert_eq!(symbols, vec!["party2", "party1"]);
    let alice = start.binding_for(&PeerId::from("alice")).expect("binding");
    assert_eq!(alice.output_name.as_deref(), Some("o"));
    assert!(start.binding_for(&PeerId::from("carol")).is_none());
}

use super::*;
use crate::extractor::{extract, ProgramDescriptor};
use shared::{
    domain::{Handle, ProgramId},
    protocol::{InputDecl, PeerRecord},
};

const SOURCE: &str = r#"
party1 = Party(name="Party1")
party2 = Party(name="Party2")
x = SecretInteger(Input(name="x", party=party1))
y = SecretInteger(Input(name="y", party=party2))
return [Output(x + y, "sum", party1)]
"#;

fn descriptor() -> ProgramDescriptor {
    ProgramDescriptor::new(ProgramId::from("p1"), extract(SOURCE).expect("extract"))
}

fn peer(id: &str) -> PeerId {
    PeerId::from(id)
}

fn party(symbol: &str) -> PartySymbol {
    PartySymbol::from(symbol)
}

fn registry(ids: &[&str]) -> Registry {
    let mut registry = Registry::default();
    for id in ids {
        registry.insert(PeerRecord {
            handle: Handle::new(format!("{id}-handle")),
            peer_id: peer(id),
            session_peer_id: None,
        });
    }
    registry
}

#[test]
fn distinct_full_assignment_resolves_into_one_binding_per_party() {
    let mut resolver = BindingResolver::new(descriptor());
    resolver.select(peer("alice"), party("party1")).expect("select");
    resolver.select(peer("bob"), party("party2")).expect("select");

    assert!(resolver.conflicts().is_clear());
    let start = resolver
        .resolve(&peer("alice"), &registry(&["alice", "bob"]))
        .expect("resolve");

    assert_eq!(start.program_id, ProgramId::from("p1"));
    assert_eq!(start.peers.len(), 2);
    let first = &start.peers[&party("party1")];
    assert_eq!(first.peer_id, peer("alice"));
    assert_eq!(first.owner_peer_id, peer("alice"));
    assert_eq!(first.party_name, "Party1");
    assert_eq!(
        first.inputs,
        vec![InputDecl {
            ty: "SecretInteger".into(),
            name: "x".into()
        }]
    );
    assert_eq!(first.output_name.as_deref(), Some("sum"));
    let second = &start.peers[&party("party2")];
    assert_eq!(second.peer_id, peer("bob"));
    assert_eq!(second.output_name, None);
}

#[test]
fn shared_party_is_a_binding_conflict_and_blocks_submission() {
    let mut resolver = BindingResolver::new(descriptor());
    resolver.select(peer("alice"), party("party1")).expect("select");
    resolver.select(peer("bob"), party("party1")).expect("select");

    let report = resolver.conflicts();
    assert!(report.binding_conflict);
    assert!(report.coverage_conflict);
    assert_eq!(
        resolver.resolve(&peer("alice"), &registry(&["alice", "bob"])),
        Err(BindingError::BindingConflict(vec![party("party1")]))
    );
}

#[test]
fn partial_coverage_blocks_submission() {
    let mut resolver = BindingResolver::new(descriptor());
    resolver.select(peer("alice"), party("party2")).expect("select");

    let report = resolver.conflicts();
    assert!(!report.binding_conflict);
    assert!(report.coverage_conflict);
    assert_eq!(
        resolver.validate(),
        Err(BindingError::CoverageConflict {
            selected: 1,
            declared: 2
        })
    );
}

#[test]
fn reselection_overwrites_previous_choice() {
    let mut resolver = BindingResolver::new(descriptor());
    resolver.select(peer("alice"), party("party1")).expect("select");
    resolver.select(peer("bob"), party("party1")).expect("select");
    assert!(resolver.conflicts().binding_conflict);

    let previous = resolver.select(peer("bob"), party("party2")).expect("select");
    assert_eq!(previous, Some(party("party1")));
    assert!(resolver.conflicts().is_clear());
    assert_eq!(resolver.selections().len(), 2);
}

#[test]
fn deselecting_reopens_coverage_conflict() {
    let mut resolver = BindingResolver::new(descriptor());
    resolver.select(peer("alice"), party("party1")).expect("select");
    resolver.select(peer("bob"), party("party2")).expect("select");
    resolver.deselect(&peer("bob"));
    assert!(resolver.conflicts().coverage_conflict);
}

#[test]
fn unknown_party_selection_is_refused() {
    let mut resolver = BindingResolver::new(descriptor());
    assert_eq!(
        resolver.select(peer("alice"), party("party9")),
        Err(BindingError::UnknownParty(party("party9")))
    );
    assert!(resolver.selections().is_empty());
}

#[test]
fn peer_missing_from_registry_is_refused() {
    let mut resolver = BindingResolver::new(descriptor());
    resolver.select(peer("alice"), party("party1")).expect("select");
    resolver.select(peer("ghost"), party("party2")).expect("select");
    assert_eq!(
        resolver.resolve(&peer("alice"), &registry(&["alice"])),
        Err(BindingError::UnknownPeer(peer("ghost")))
    );
}

#[test]
fn binding_conflict_matches_non_injectivity() {
    let cases: &[(&[&str], bool)] = &[
        (&[], false),
        (&["a"], false),
        (&["a", "b", "c"], false),
        (&["a", "a"], true),
        (&["a", "b", "a"], true),
        (&["c", "b", "a", "b"], true),
    ];
    for (selected, expected) in cases {
        let symbols: Vec<PartySymbol> = selected.iter().map(|s| party(s)).collect();
        assert_eq!(binding_conflict(&symbols), *expected, "{selected:?}");
    }
}

#[test]
fn coverage_conflict_compares_distinct_selection_to_declared_count() {
    let symbols: Vec<PartySymbol> = ["a", "b", "b"].iter().map(|s| party(s)).collect();
    assert!(!coverage_conflict(&symbols, 2));
    assert!(coverage_conflict(&symbols, 3));
    assert!(coverage_conflict(&symbols, 1));
    assert!(!coverage_conflict(&[], 0));
}

use super::*;

fn contrib(peer: &str, program: &str, status: ContributionStatus) -> Contribution {
    Contribution {
        peer_id: PeerId::from(peer),
        status,
        program_id: ProgramId::from(program),
        store_id: matches!(status, ContributionStatus::Ok)
            .then(|| StoreId::new(format!("store-{peer}"))),
    }
}

fn two_peer_ledger() -> ContributionAggregator {
    ContributionAggregator::new(
        ProgramId::from("p1"),
        [PeerId::from("alice"), PeerId::from("bob")],
    )
}

#[test]
fn completes_once_every_bound_peer_is_ok() {
    let mut ledger = two_peer_ledger();
    assert!(!ledger.is_complete());
    assert_eq!(ledger.status(&PeerId::from("alice")), Some(ContributionStatus::Pending));

    ledger.apply(&contrib("bob", "p1", ContributionStatus::Ok));
    assert!(!ledger.is_complete());
    ledger.apply(&contrib("alice", "p1", ContributionStatus::Ok));

    assert!(ledger.is_complete());
    let mut store_ids = ledger.store_ids();
    store_ids.sort();
    assert_eq!(
        store_ids,
        vec![StoreId::from("store-alice"), StoreId::from("store-bob")]
    );
}

#[test]
fn error_blocks_completion_until_manual_retry() {
    let mut ledger = two_peer_ledger();
    ledger.apply(&contrib("alice", "p1", ContributionStatus::Error));
    ledger.apply(&contrib("bob", "p1", ContributionStatus::Ok));

    assert!(!ledger.is_complete());
    assert!(ledger.has_failures());
    assert_eq!(ledger.settled_count(), 2);

    let update = ledger.apply(&contrib("alice", "p1", ContributionStatus::Ok));
    assert_eq!(
        update,
        LedgerUpdate::Recorded {
            previous: ContributionStatus::Error,
            current: ContributionStatus::Ok
        }
    );
    assert!(ledger.is_complete());
    assert!(!ledger.has_failures());
}

#[test]
fn duplicate_deliveries_keep_completion_stable() {
    let mut ledger = two_peer_ledger();
    ledger.apply(&contrib("alice", "p1", ContributionStatus::Ok));
    ledger.apply(&contrib("bob", "p1", ContributionStatus::Ok));
    assert!(ledger.is_complete());

    for status in [
        ContributionStatus::Ok,
        ContributionStatus::Error,
        ContributionStatus::Pending,
        ContributionStatus::Ok,
    ] {
        ledger.apply(&contrib("alice", "p1", status));
        ledger.apply(&contrib("bob", "p1", status));
        assert!(ledger.is_complete());
        assert_eq!(ledger.expected(), 2);
    }
}

#[test]
fn later_failure_report_does_not_revoke_ok() {
    let mut ledger = two_peer_ledger();
    ledger.apply(&contrib("alice", "p1", ContributionStatus::Ok));
    assert_eq!(
        ledger.apply(&contrib("alice", "p1", ContributionStatus::Error)),
        LedgerUpdate::Ignored(IgnoreReason::AlreadyOk)
    );
    assert_eq!(ledger.status(&PeerId::from("alice")), Some(ContributionStatus::Ok));
}

#[test]
fn foreign_program_leaves_ledger_untouched() {
    let mut ledger = two_peer_ledger();
    let before: Vec<ContributionRecord> = ledger.records().cloned().collect();

    let update = ledger.apply(&contrib("alice", "p2", ContributionStatus::Ok));

    assert_eq!(update, LedgerUpdate::Ignored(IgnoreReason::ForeignProgram));
    let after: Vec<ContributionRecord> = ledger.records().cloned().collect();
    assert_eq!(before, after);
}

#[test]
fn unbound_peer_cannot_push_settled_count_past_bindings() {
    let mut ledger = two_peer_ledger();
    ledger.apply(&contrib("alice", "p1", ContributionStatus::Ok));
    ledger.apply(&contrib("bob", "p1", ContributionStatus::Error));
    let update = ledger.apply(&contrib("mallory", "p1", ContributionStatus::Ok));

    assert_eq!(update, LedgerUpdate::Ignored(IgnoreReason::UnboundPeer));
    assert!(ledger.settled_count() <= ledger.expected());
    assert_eq!(ledger.records().count(), 2);
}

#[test]
fn empty_binding_set_is_never_complete() {
    let ledger = ContributionAggregator::new(ProgramId::from("p1"), Vec::new());
    assert!(!ledger.is_complete());
}

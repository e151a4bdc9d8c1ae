use aclk_devkit::TestHarness;
use aclk_query::negotiation::ACLK_VERSION_MIN;
use aclk_query::{
    AclkQuery, EnqueueOutcome, Host, HostAclkState, MetadataState, PopcornState, QueryConfig, QueryRequest, Tick,
};
use serde_json::Value;
use std::collections::HashSet;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_workers_dispatch_queued_alarms() {
    let harness = TestHarness::new();
    let query = harness.start_query(2).unwrap();

    assert_eq!(query.enqueue(QueryRequest::alarm("alarms", "a1")), EnqueueOutcome::Queued);
    assert_eq!(query.enqueue(QueryRequest::alarm("alarms", "a2")), EnqueueOutcome::Queued);

    let sent = harness.wait_for_messages("alarms", 2, WAIT);
    let bodies: HashSet<String> = sent.iter().map(|msg| msg.text()).collect();
    assert_eq!(bodies, HashSet::from(["a1".to_string(), "a2".to_string()]));

    query.stop();
    assert_eq!(query.queue_size(), 0);
}

#[test]
fn test_localhost_metadata_pushed_once() {
    let harness = TestHarness::new();
    harness.localhost().set_metadata_state(MetadataState::Required);
    let query = harness.start_query(2).unwrap();

    let meta = harness.wait_for_messages("meta", 1, WAIT);
    assert_eq!(meta[0].json().unwrap()["type"], "connect");

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(harness.transport.find_by_topic("meta").len(), 1);
    assert_eq!(harness.localhost().metadata_state(), MetadataState::Sent);
    query.stop();
}

#[test]
fn test_stop_frees_delayed_records_and_rejects_new_ones() {
    let harness = TestHarness::new();
    let query = harness.start_query(1).unwrap();

    query.enqueue(QueryRequest::alarm("alarms", "later").delayed(600));
    assert_eq!(query.queue_size(), 1);

    query.stop();
    assert_eq!(query.queue_size(), 0);
    assert_eq!(query.enqueue(QueryRequest::alarm("alarms", "late")), EnqueueOutcome::NotConnected);
    assert_eq!(query.queue_size(), 0);
    assert!(harness.transport.find_by_topic("alarms").is_empty());
}

#[test]
fn test_duplicate_alarm_coalesced() {
    let harness = TestHarness::new();
    let query = harness.query(QueryConfig::default());

    assert_eq!(query.enqueue(QueryRequest::alarm("alarm/1", "alarm text")), EnqueueOutcome::Queued);
    let second = query.enqueue(QueryRequest::alarm("alarm/1", "alarm text"));
    assert!(matches!(second, EnqueueOutcome::Duplicate | EnqueueOutcome::Replaced));
    assert_eq!(query.queue_size(), 1);
}

#[test]
fn test_run_once_drains_and_counts() {
    let harness = TestHarness::new();
    let query = harness.query(QueryConfig {
        stats_enabled: true,
        query_threads: 1,
        ..QueryConfig::default()
    });

    query.enqueue(QueryRequest::alarm("alarms", "one"));
    query.enqueue(QueryRequest::alarm("alarms", "two"));
    assert_eq!(query.run_once(0), Tick::Drained(2));
    assert_eq!(query.queue_size(), 0);

    let texts: Vec<String> = harness.transport.find_by_topic("alarms").iter().map(|m| m.text()).collect();
    assert_eq!(texts, vec!["one", "two"]);

    let sample = query.stats().take_sample();
    assert_eq!(sample.queries_queued, 2);
    assert_eq!(sample.queries_dispatched, 2);
    assert_eq!(sample.queries_per_thread, vec![2]);
}

#[test]
fn test_negotiation_falls_back_once() {
    let harness = TestHarness::new();
    let query = AclkQuery::new(
        QueryConfig {
            version_negotiation_timeout_secs: 0,
            ..QueryConfig::default()
        },
        harness.hosts.clone(),
        harness.collaborators(),
    );
    query.set_connected(true);

    assert_eq!(query.run_once(0), Tick::Drained(0));
    assert_eq!(query.negotiation().version(), Some(ACLK_VERSION_MIN));
    assert_eq!(query.run_once(0), Tick::Drained(0));
    assert_eq!(harness.transport.rx_versions(), vec![ACLK_VERSION_MIN]);
    assert_eq!(query.set_negotiated_version(3), None);
}

#[test]
fn test_waits_for_negotiation() {
    let harness = TestHarness::new();
    let query = AclkQuery::new(QueryConfig::default(), harness.hosts.clone(), harness.collaborators());
    query.set_connected(true);

    query.enqueue(QueryRequest::alarm("alarms", "held"));
    assert_eq!(query.run_once(0), Tick::Negotiating);
    assert_eq!(query.queue_size(), 1);

    assert_eq!(query.set_negotiated_version(99), Some(3));
    assert_eq!(query.run_once(0), Tick::Drained(1));
}

#[test]
fn test_disabled_pool_does_not_drain() {
    let harness = TestHarness::new();
    let query = harness.query(QueryConfig::default());
    query.set_disabled(true);

    query.enqueue(QueryRequest::alarm("alarms", "held"));
    assert_eq!(query.run_once(0), Tick::Disabled);
    assert_eq!(query.queue_size(), 1);

    query.set_disabled(false);
    assert_eq!(query.run_once(0), Tick::Drained(1));
}

#[test]
fn test_stable_child_gets_metadata() {
    let harness = TestHarness::new();
    let quiet_since = Instant::now().checked_sub(Duration::from_secs(10)).unwrap();
    let child = Host::with_state(
        "child",
        "guid-child",
        HostAclkState {
            metadata: MetadataState::Required,
            popcorn: PopcornState::Initializing,
            last_popcorn_update: Some(quiet_since),
        },
    );
    harness.hosts.add_child(child.clone());
    let query = harness.query(QueryConfig::default());

    assert_eq!(query.run_once(0), Tick::Drained(1));
    harness
        .assert_field_equals("meta", "payload.info.hostname", &Value::from("child"))
        .unwrap();
    assert_eq!(child.metadata_state(), MetadataState::Sent);
    assert!(harness.hosts.next_popcorn_host().is_none());
}

#[test]
fn test_failed_publish_does_not_stop_worker() {
    let harness = TestHarness::new();
    let query = harness.query(QueryConfig::default());

    harness.transport.set_failing(true);
    query.enqueue(QueryRequest::alarm("alarms", "lost"));
    assert_eq!(query.run_once(0), Tick::Drained(1));

    harness.transport.set_failing(false);
    query.enqueue(QueryRequest::alarm("alarms", "delivered"));
    assert_eq!(query.run_once(0), Tick::Drained(1));

    let sent = harness.transport.find_by_topic("alarms");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text(), "delivered");
}

#[test]
fn test_check_popcorn_state() {
    let harness = TestHarness::new();
    let query = harness.query(QueryConfig::default());
    assert_eq!(query.check_popcorn_state(harness.localhost()), PopcornState::Stable);

    let fresh = Host::new("fresh", "guid-fresh");
    assert_eq!(query.check_popcorn_state(&fresh), PopcornState::Initializing);
}

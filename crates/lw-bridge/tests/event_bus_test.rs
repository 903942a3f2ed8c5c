use lw_bridge::{EventBus, LiveEvent};

fn state(s: &str) -> LiveEvent {
    LiveEvent::StateChanged { state: s.into() }
}

fn state_of(event: LiveEvent) -> String {
    match event {
        LiveEvent::StateChanged { state } => state,
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn new_bus_has_no_subscribers() {
    assert_eq!(EventBus::new().subscriber_count(), 0);
}

#[test]
fn publish_reaches_every_subscriber_in_order() {
    let bus = EventBus::new();
    let rx1 = bus.subscribe();
    let rx2 = bus.subscribe();

    bus.publish(state("activating"));
    bus.publish(state("active"));

    for rx in [&rx1, &rx2] {
        assert_eq!(state_of(rx.try_recv().unwrap()), "activating");
        assert_eq!(state_of(rx.try_recv().unwrap()), "active");
    }
}

#[test]
fn dropped_receiver_is_pruned_on_publish() {
    let bus = EventBus::new();
    let rx1 = bus.subscribe();
    let rx2 = bus.subscribe();
    drop(rx1);

    bus.publish(state("inactive"));
    assert_eq!(bus.subscriber_count(), 1);
    assert!(rx2.try_recv().is_ok());
}

#[test]
fn late_subscriber_misses_earlier_events() {
    let bus = EventBus::new();
    bus.publish(state("active"));
    let rx = bus.subscribe();
    assert!(rx.try_recv().is_err());
}

#[test]
fn clones_share_subscribers() {
    let bus = EventBus::new();
    let clone = bus.clone();
    let rx = bus.subscribe();
    clone.publish(LiveEvent::AdapterFailed {
        component: "file_watcher".into(),
        error: "no watchable directories".into(),
    });
    assert!(matches!(rx.try_recv().unwrap(), LiveEvent::AdapterFailed { .. }));
    assert_eq!(clone.subscriber_count(), 1);
}

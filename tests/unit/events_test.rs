//! Tests for scheduler event sinks

use adaptive_resource_manager::core::{
    EventBus, EventSink, InMemoryEventSink, PriorityBand, ResourceRequest, SchedulerEvent,
    TracingEventSink,
};

fn preempted(task_id: &str) -> SchedulerEvent {
    SchedulerEvent::Preempted {
        task_id: task_id.into(),
        preempted_by: "urgent".into(),
        new_priority: 80.0,
        band: PriorityBand::Low,
        freed: ResourceRequest::new(40.0, 400, 0),
        at_ms: 0,
    }
}

#[test]
fn test_in_memory_sink_filters_by_kind() {
    let sink = InMemoryEventSink::new(10);
    sink.record(&preempted("a"));
    sink.record(&SchedulerEvent::AgingCompleted {
        aged: 3,
        promoted: 1,
        at_ms: 0,
    });
    sink.record(&preempted("b"));

    assert_eq!(sink.events().len(), 3);
    let ids: Vec<_> = sink
        .events_of("preempted")
        .iter()
        .filter_map(|e| e.task_id().map(str::to_string))
        .collect();
    assert_eq!(ids, ["a", "b"]);
}

#[test]
fn test_bus_fans_out_to_every_sink() {
    let first = InMemoryEventSink::new(10);
    let second = InMemoryEventSink::new(10);
    let mut bus = EventBus::default();
    bus.add_sink(Box::new(first.clone()));
    bus.add_sink(Box::new(second.clone()));
    bus.add_sink(Box::new(TracingEventSink));

    bus.emit(preempted("x"));
    assert_eq!(first.events().len(), 1);
    assert_eq!(second.events().len(), 1);
    assert_eq!(bus.subscriber_count(), 0);
}

#[test]
fn test_event_json_shape() {
    let value = serde_json::to_value(preempted("x")).unwrap();
    assert_eq!(value["event"], "preempted");
    assert_eq!(value["preempted_by"], "urgent");
    assert_eq!(value["band"], "low");
    assert_eq!(value["freed"]["memory"], 400);
}

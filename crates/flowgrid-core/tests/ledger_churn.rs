//! Lifecycle churn: converters joining, leaving, retargeting, and dying
//! across many ticks, with the ledger audited throughout.

use std::cell::RefCell;
use std::rc::Rc;

use flowgrid_core::{FlowBroker, ResourceConverter, StaticFlowHost};
use flowgrid_types::ResourceId;

const EPSILON: f64 = 1e-6;

type Spawned = (Rc<RefCell<ResourceConverter>>, Rc<RefCell<StaticFlowHost>>);

fn spawn(broker: &mut FlowBroker, host: StaticFlowHost) -> Spawned {
    let host = Rc::new(RefCell::new(host));
    let converter = Rc::new(RefCell::new(ResourceConverter::new()));
    converter.borrow_mut().initialize(broker, &host);
    assert!(broker.register_converter(&converter));
    (converter, host)
}

#[test]
fn growing_population_stays_balanced() {
    let resource = ResourceId::new(1);
    let mut broker = FlowBroker::new();
    let (_producer, _gh) = spawn(&mut broker, StaticFlowHost::new().produce(resource, 100.0));

    let mut consumers = Vec::new();
    for round in 1..=20 {
        consumers.push(spawn(
            &mut broker,
            StaticFlowHost::new().consume(resource, 10.0),
        ));
        let report = broker.run_converters(1.0);
        assert!(report.rebuilt, "registration must dirty the ledger");
        assert!(broker.audit().is_ok());

        // Until demand outgrows supply, every consumer is fully served.
        let demand = 10.0 * round as f64;
        let expected = if demand <= 100.0 { 10.0 } else { 100.0 / round as f64 };
        for (consumer, _) in &consumers {
            let consumer = consumer.borrow();
            let granted = consumer.registry().consumers()[0].granted_per_tick();
            assert!(
                (granted - expected).abs() < EPSILON,
                "round {round}: granted {granted}, expected {expected}"
            );
        }
    }
}

#[test]
fn departures_rebalance_the_survivors() {
    let resource = ResourceId::new(2);
    let mut broker = FlowBroker::new();
    let (_producer, _gh) = spawn(&mut broker, StaticFlowHost::new().produce(resource, 30.0));
    let mut consumers = Vec::new();
    for _ in 0..3 {
        consumers.push(spawn(
            &mut broker,
            StaticFlowHost::new().consume(resource, 20.0),
        ));
    }

    // 60 demanded, 30 produced: everyone at half.
    broker.run_converters(1.0);
    for (consumer, _) in &consumers {
        let consumer = consumer.borrow();
        assert!((consumer.registry().consumers()[0].granted_per_tick() - 10.0).abs() < EPSILON);
    }

    // One consumer leaves; 40 demanded, 30 produced: 15 each.
    let (leaver, _leaver_host) = consumers.pop().expect("three consumers");
    broker.unregister_converter(leaver.borrow().id());
    broker.run_converters(1.0);
    assert!(broker.audit().is_ok());
    for (consumer, _) in &consumers {
        let consumer = consumer.borrow();
        assert!((consumer.registry().consumers()[0].granted_per_tick() - 15.0).abs() < EPSILON);
    }

    // Another leaves; 20 demanded, 30 produced: fully served.
    let (leaver, _leaver_host) = consumers.pop().expect("two consumers");
    broker.unregister_converter(leaver.borrow().id());
    broker.run_converters(1.0);
    let (last, _) = &consumers[0];
    assert!((last.borrow().registry().consumers()[0].granted_per_tick() - 20.0).abs() < EPSILON);
}

#[test]
fn rate_change_applies_after_refresh() {
    let resource = ResourceId::new(3);
    let mut broker = FlowBroker::new();
    let (_producer, _gh) = spawn(&mut broker, StaticFlowHost::new().produce(resource, 8.0));
    let (consumer, tank) = spawn(&mut broker, StaticFlowHost::new().consume(resource, 2.0));

    broker.run_converters(1.0);
    assert!((tank.borrow().tank_level(resource) - 2.0).abs() < EPSILON);

    // The host doubles its request but forgets to flag a refresh: the
    // ledger keeps metering the old reports.
    tank.borrow_mut().clear_flows();
    tank.borrow_mut().add_consumption(resource, 4.0, false);
    broker.run_converters(1.0);
    assert!((tank.borrow().tank_level(resource) - 4.0).abs() < EPSILON);

    // Once flagged, the next tick rebuilds and the new rate applies.
    consumer.borrow().set_needs_refresh(true);
    broker.run_converters(1.0);
    assert!((tank.borrow().tank_level(resource) - 8.0).abs() < EPSILON);
    assert!(broker.audit().is_ok());
}

#[test]
fn host_death_mid_run_is_tolerated() {
    let resource = ResourceId::new(4);
    let mut broker = FlowBroker::new();
    let (_producer, _gh) = spawn(&mut broker, StaticFlowHost::new().produce(resource, 10.0));
    let (survivor, _sh) = spawn(&mut broker, StaticFlowHost::new().consume(resource, 4.0));
    let (orphan, orphan_host) = spawn(&mut broker, StaticFlowHost::new().consume(resource, 4.0));

    broker.run_converters(1.0);
    assert!((survivor.borrow().registry().consumers()[0].granted_per_tick() - 4.0).abs() < EPSILON);

    // The orphan's host dies but the converter stays registered. Without
    // a refresh it keeps its slot in the ledger; with one, it silently
    // contributes nothing.
    drop(orphan_host);
    broker.run_converters(1.0);

    broker.set_needs_refresh(true);
    let report = broker.run_converters(1.0);
    assert!(report.rebuilt);
    assert_eq!(report.converters_dispatched, 3);
    assert!(broker.audit().is_ok());
    // The orphan's registry emptied at the rebuild, so the survivor is
    // the only consumer left on the resource.
    assert!(orphan.borrow().registry().is_empty());
    assert!((survivor.borrow().registry().consumers()[0].granted_per_tick() - 4.0).abs() < EPSILON);
}

#[test]
fn long_steady_run_accumulates_linearly() {
    let fuel = ResourceId::new(10);
    let exhaust = ResourceId::new(11);
    let mut broker = FlowBroker::new();
    let (_engine, engine_host) = spawn(
        &mut broker,
        StaticFlowHost::new().consume(fuel, 3.0).produce(exhaust, 1.5),
    );
    let (_tankage, tank_host) = spawn(
        &mut broker,
        StaticFlowHost::new()
            .produce(fuel, 5.0)
            .consume_optional(exhaust, 9.0),
    );

    let delta_time = 0.02;
    for _ in 0..1_000 {
        broker.run_converters(delta_time);
    }
    assert!(broker.audit().is_ok());
    assert_eq!(broker.tick(), 1_000);

    let seconds = 1_000.0 * delta_time;
    // Engine: gains fuel at 3/s, loses exhaust at 1.5/s.
    assert!((engine_host.borrow().tank_level(fuel) - 3.0 * seconds).abs() < 1e-3);
    assert!((engine_host.borrow().tank_level(exhaust) + 1.5 * seconds).abs() < 1e-3);
    // Tankage: drains fuel at 3/s (the used share), absorbs all exhaust.
    assert!((tank_host.borrow().tank_level(fuel) + 3.0 * seconds).abs() < 1e-3);
    assert!((tank_host.borrow().tank_level(exhaust) - 1.5 * seconds).abs() < 1e-3);
}

#[test]
fn id_reuse_after_unregister_is_a_fresh_registration() {
    let resource = ResourceId::new(5);
    let mut broker = FlowBroker::new();
    let (_producer, _gh) = spawn(&mut broker, StaticFlowHost::new().produce(resource, 6.0));
    let (consumer, consumer_host) = spawn(&mut broker, StaticFlowHost::new().consume(resource, 6.0));
    broker.run_converters(1.0);

    let id = consumer.borrow().id();
    broker.unregister_converter(id);
    drop(consumer);

    // A replacement converter under the same id registers cleanly.
    let replacement = Rc::new(RefCell::new(ResourceConverter::with_id(id)));
    replacement.borrow_mut().initialize(&broker, &consumer_host);
    assert!(broker.register_converter(&replacement));

    broker.run_converters(1.0);
    assert!(broker.audit().is_ok());
    assert!((replacement.borrow().registry().consumers()[0].granted_per_tick() - 6.0).abs() < EPSILON);
}

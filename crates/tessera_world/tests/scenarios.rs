use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytemuck::{Pod, Zeroable};
use proptest::prelude::*;

use tessera_world::builtin::{CHILD_OF, ON_UPDATE, PHASE, PRE_UPDATE, SLOT_OF};
use tessera_world::{
    ChildCleanup, Commands, ComponentHooks, Id, QueryDescriptor, Spawn, SystemDesc, World,
    WorldConfig, WorldError, component, tag,
};

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Position {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Velocity {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct ImpulseSpeed(f64);

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Defense(f64);

struct Enemy;

component!(Position, Velocity, ImpulseSpeed, Defense);
tag!(Enemy);

#[test]
fn scenario_a_set_twice_then_get() {
    let mut world = World::new();
    world.register_component::<Position>().unwrap();
    let bob = world.entity_named("Bob").unwrap();
    world.set(bob, Position { x: 0.0, y: 0.0 }).unwrap();
    world.set(bob, Position { x: 20.0, y: 30.0 }).unwrap();
    assert_eq!(*world.get::<Position>(bob).unwrap().unwrap(), Position { x: 20.0, y: 30.0 });
}

#[test]
fn scenario_b_prefab_value_is_inherited() {
    let mut world = World::new();
    let ship = world.prefab("Ship").unwrap();
    world.set(ship, ImpulseSpeed(50.0)).unwrap();

    let instance = world.entity_named("my_spaceship").unwrap();
    world.is_a(instance, ship).unwrap();

    assert_eq!(*world.get::<ImpulseSpeed>(instance).unwrap().unwrap(), ImpulseSpeed(50.0));
    assert!(world.has::<ImpulseSpeed>(instance).unwrap());
    assert!(!world.owns::<ImpulseSpeed>(instance).unwrap());
}

#[test]
fn scenario_c_optional_field() {
    let mut world = World::new();
    let both = world.entity();
    world.set(both, Position { x: 1.0, y: 1.0 }).unwrap();
    world.set(both, Velocity { x: 1.0, y: 0.0 }).unwrap();
    let only = world.entity();
    world.set(only, Position { x: 2.0, y: 2.0 }).unwrap();

    let mut query = world.query("Position, ?Velocity").unwrap();
    let mut seen = Vec::new();
    for batch in query.iter(&world) {
        assert_eq!(batch.count(), 1);
        seen.push((batch.entity(0).unwrap(), batch.field_is_set(1)));
        if !batch.field_is_set(1) {
            assert!(matches!(batch.field::<Velocity>(1), Err(WorldError::FieldNotSet(1))));
        }
    }
    seen.sort_by_key(|(e, _)| e.index());
    assert_eq!(seen, vec![(both, true), (only, false)]);
}

#[test]
fn scenario_d_phase_dependencies_order_callbacks() {
    let mut world = World::new();
    let a = world.entity_named("A").unwrap();
    let b = world.entity_named("B").unwrap();
    world.add_id(a, Id::entity(PHASE)).unwrap();
    world.add_id(b, Id::entity(PHASE)).unwrap();
    world.depends_on(a, b).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let log_a = Arc::clone(&log);
    world
        .system(SystemDesc::new("RunsInA", move |_| log_a.lock().unwrap().push("A")).phase(a))
        .unwrap();
    let log_b = Arc::clone(&log);
    world
        .system(SystemDesc::new("RunsInB", move |_| log_b.lock().unwrap().push("B")).phase(b))
        .unwrap();

    for _ in 0..5 {
        assert!(world.progress(0.016));
    }
    assert_eq!(*log.lock().unwrap(), ["B", "A"].repeat(5));
}

#[test]
fn writes_are_visible_to_later_systems_in_the_same_frame() {
    let mut world = World::new();
    world.register_component::<Position>().unwrap();

    world
        .system(
            SystemDesc::new("Spawner", |it| {
                it.commands().spawn(Spawn::new().set(Position { x: 0.0, y: 0.0 }));
            })
            .phase(PRE_UPDATE),
        )
        .unwrap();

    let counts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&counts);
    world
        .system(
            SystemDesc::new("Counter", move |it| seen.lock().unwrap().push(it.count()))
            .expr("Position")
            .phase(ON_UPDATE),
        )
        .unwrap();

    world.progress(0.1);
    world.progress(0.1);
    assert_eq!(*counts.lock().unwrap(), vec![1, 2]);
}

#[test]
fn writes_within_a_system_are_deferred() {
    let mut world = World::new();
    let e = world.entity();
    world.set(e, Position { x: 0.0, y: 0.0 }).unwrap();

    let observed = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&observed);
    let system = world
        .system(
            SystemDesc::new("Tagger", move |it| {
                let entity = it.entity(0).unwrap();
                it.commands().add_tag::<Enemy>(entity);
                *slot.lock().unwrap() = Some(it.world().has_tag::<Enemy>(entity).unwrap_or(false));
            })
            .expr("Position"),
        )
        .unwrap();
    world.run_system(system, 0.1).unwrap();
    assert_eq!(*observed.lock().unwrap(), Some(false));
    assert!(world.has_tag::<Enemy>(e).unwrap());
}

#[test]
fn systems_integrate_position() {
    let mut world = World::new();
    let ship = world.entity_named("Ship").unwrap();
    world.set(ship, Position { x: 0.0, y: 0.0 }).unwrap();
    world.set(ship, Velocity { x: 2.0, y: 1.0 }).unwrap();

    world
        .system(
            SystemDesc::new("Move", |it| {
                let dt = f64::from(it.delta_time());
                let mut p = it.field_mut::<Position>(0).unwrap();
                let v = it.field::<Velocity>(1).unwrap();
                for (p, v) in p.iter_mut().zip(v.iter()) {
                    p.x += v.x * dt;
                    p.y += v.y * dt;
                }
            })
            .expr("Position, [in] Velocity"),
        )
        .unwrap();

    world.progress(0.5);
    world.progress(0.5);
    assert_eq!(*world.get::<Position>(ship).unwrap().unwrap(), Position { x: 2.0, y: 1.0 });
}

#[test]
fn override_leaves_base_unchanged() {
    let mut world = World::new();
    let base = world.prefab("Base").unwrap();
    world.set(base, Defense(10.0)).unwrap();
    let subject = world.entity();
    world.is_a(subject, base).unwrap();
    assert_eq!(*world.get::<Defense>(subject).unwrap().unwrap(), Defense(10.0));

    world.set(subject, Defense(25.0)).unwrap();
    assert_eq!(*world.get::<Defense>(subject).unwrap().unwrap(), Defense(25.0));
    assert_eq!(*world.get::<Defense>(base).unwrap().unwrap(), Defense(10.0));
}

#[test]
fn hierarchy_membership_tracks_child_of() {
    let mut world = World::new();
    let parent = world.entity();
    let child = world.entity();
    world.child_of(child, parent).unwrap();
    assert!(world.is_child_of(child, parent));
    world.remove_pair(child, CHILD_OF, parent).unwrap();
    assert!(!world.is_child_of(child, parent));
    assert!(world.children(parent).is_empty());
}

#[test]
fn deleting_a_parent_cascades_by_default() {
    let mut world = World::new();
    let sun = world.entity_named("Sun").unwrap();
    let earth = world.entity_named("Sun.Earth").unwrap();
    let moon = world.entity_named("Sun.Earth.Moon").unwrap();
    world.delete(sun).unwrap();
    assert!(!world.is_alive(earth));
    assert!(!world.is_alive(moon));
    assert_eq!(world.lookup("Sun.Earth.Moon"), None);
}

#[test]
fn orphan_policy_turns_children_into_roots() {
    let config = WorldConfig {
        child_cleanup: ChildCleanup::Orphan,
        ..WorldConfig::default()
    };
    let mut world = World::with_config(config);
    let sun = world.entity_named("Sun").unwrap();
    let earth = world.entity_named("Sun.Earth").unwrap();
    world.delete(sun).unwrap();
    assert!(world.is_alive(earth));
    assert_eq!(world.parent(earth), None);
    assert_eq!(world.lookup("Earth"), Some(earth));
}

#[test]
fn prefab_slots_map_to_instantiated_children() {
    let mut world = World::new();
    let ship = world.prefab("SpaceShip").unwrap();
    let engine = world.prefab("Engine").unwrap();
    world.child_of(engine, ship).unwrap();
    world.add_pair(engine, SLOT_OF, ship).unwrap();
    let cockpit = world.prefab("Cockpit").unwrap();
    world.child_of(cockpit, ship).unwrap();
    world.add_pair(cockpit, SLOT_OF, ship).unwrap();
    let seat = world.prefab("PilotSeat").unwrap();
    world.child_of(seat, cockpit).unwrap();
    world.add_pair(seat, SLOT_OF, ship).unwrap();

    let instance = world.entity_named("SpaceShipInstance").unwrap();
    world.is_a(instance, ship).unwrap();

    let engine_instance = world.get_target(instance, engine, 0).unwrap();
    let cockpit_instance = world.get_target(instance, cockpit, 0).unwrap();
    let seat_instance = world.get_target(instance, seat, 0).unwrap();
    assert_eq!(world.full_path(engine_instance), "SpaceShipInstance.Engine");
    assert_eq!(world.full_path(cockpit_instance), "SpaceShipInstance.Cockpit");
    assert_eq!(world.full_path(seat_instance), "SpaceShipInstance.Cockpit.PilotSeat");

    // instances are not prefabs, so queries see them
    let mut query = world.query_from(QueryDescriptor::new().with(Id::pair(CHILD_OF, instance))).unwrap();
    assert_eq!(query.count(&world), 2);
}

#[test]
fn stale_handles_are_reported() {
    let mut world = World::new();
    world.register_component::<Position>().unwrap();
    let e = world.entity();
    world.delete(e).unwrap();
    let reused = world.entity();
    assert_eq!(reused.index(), e.index());
    assert_ne!(reused, e);

    assert!(matches!(world.set(e, Position { x: 0.0, y: 0.0 }), Err(WorldError::StaleEntity(_))));
    assert!(matches!(world.delete(e), Err(WorldError::StaleEntity(_))));
    assert!(world.set(reused, Position { x: 0.0, y: 0.0 }).is_ok());
}

#[test]
fn query_parse_errors_carry_positions() {
    let world = World::new();
    let Err(WorldError::Parse(err)) = world.query("Position,\n  ?") else {
        panic!("expected a parse error");
    };
    assert_eq!(err.line, 2);
    assert!(!err.message.is_empty());
}

#[test]
fn queries_accept_non_ascii_names() {
    let mut world = World::new();
    let tag = world.register_tag_named("Größe").unwrap();
    let e = world.entity();
    world.add_id(e, Id::entity(tag)).unwrap();
    let mut query = world.query("Größe").unwrap();
    assert_eq!(query.entities(&world), vec![e]);
}

#[test]
fn hooks_count_lifecycle_events() {
    let constructed = Arc::new(Mutex::new(0));
    let destroyed = Arc::new(Mutex::new(0));
    let (c, d) = (Arc::clone(&constructed), Arc::clone(&destroyed));

    let mut world = World::new();
    world
        .register_component_with::<Velocity>(
            ComponentHooks::new()
                .on_construct(move |v: &mut Velocity| {
                    *c.lock().unwrap() += 1;
                    v.x = 1.0;
                })
                .on_destruct(move |_| *d.lock().unwrap() += 1),
        )
        .unwrap();
    let e = world.entity();
    world.add::<Velocity>(e).unwrap();
    assert_eq!(world.get::<Velocity>(e).unwrap().unwrap().x, 1.0);
    world.add_tag::<Enemy>(e).unwrap();
    assert_eq!(*constructed.lock().unwrap(), 1);
    assert_eq!(*destroyed.lock().unwrap(), 0);

    world.fini();
    assert_eq!(*destroyed.lock().unwrap(), 1);
}

#[test]
fn relocation_without_move_hook_copies_then_destroys() {
    let copied = Arc::new(AtomicUsize::new(0));
    let destroyed = Arc::new(AtomicUsize::new(0));
    let (c, d) = (Arc::clone(&copied), Arc::clone(&destroyed));

    let mut world = World::new();
    world
        .register_component_with::<ImpulseSpeed>(
            ComponentHooks::new()
                .on_copy(move |dst: &mut ImpulseSpeed, src: &ImpulseSpeed| {
                    c.fetch_add(1, Ordering::SeqCst);
                    *dst = *src;
                })
                .on_destruct(move |_| {
                    d.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .unwrap();
    let e = world.entity();
    world.set(e, ImpulseSpeed(2.0)).unwrap();
    let counts = || (copied.load(Ordering::SeqCst), destroyed.load(Ordering::SeqCst));
    let (copies, dtors) = counts();

    world.add_tag::<Enemy>(e).unwrap();
    assert_eq!(counts(), (copies + 1, dtors + 1));
    world.add::<Velocity>(e).unwrap();
    assert_eq!(counts(), (copies + 2, dtors + 2));
    world.remove_tag::<Enemy>(e).unwrap();
    assert_eq!(counts(), (copies + 3, dtors + 3));
    assert_eq!(*world.get::<ImpulseSpeed>(e).unwrap().unwrap(), ImpulseSpeed(2.0));

    world.delete(e).unwrap();
    assert_eq!(counts(), (copies + 3, dtors + 4));
}

#[test]
fn relocation_without_hooks_keeps_bytes() {
    let destroyed = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&destroyed);
    let mut world = World::new();
    world
        .register_component_with::<Defense>(ComponentHooks::new().on_destruct(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    let e = world.entity();
    world.set(e, Defense(12.5)).unwrap();
    world.add_tag::<Enemy>(e).unwrap();
    world.add::<Position>(e).unwrap();
    assert_eq!(destroyed.load(Ordering::SeqCst), 0);
    assert_eq!(world.get::<Defense>(e).unwrap().unwrap().0, 12.5);
}

#[test]
fn commands_outside_systems() {
    let mut world = World::new();
    let mut commands = Commands::new();
    commands
        .spawn(Spawn::new().named("Alpha").add_tag::<Enemy>())
        .spawn(Spawn::new().named("Beta").set(Position { x: 3.0, y: 4.0 }));
    world.apply(&mut commands).unwrap();
    let alpha = world.lookup("Alpha").unwrap();
    let beta = world.lookup("Beta").unwrap();
    assert!(world.has_tag::<Enemy>(alpha).unwrap());
    assert_eq!(world.get::<Position>(beta).unwrap().unwrap().y, 4.0);
}

#[derive(Debug, Clone)]
enum Op {
    Add(usize),
    Remove(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0..6usize).prop_map(Op::Add), (0..6usize).prop_map(Op::Remove)]
}

#[derive(Debug, Clone)]
enum LifecycleOp {
    AddSpeed(usize),
    RemoveSpeed(usize),
    AddTag(usize),
    RemoveTag(usize),
    Delete(usize),
}

fn lifecycle_op() -> impl Strategy<Value = LifecycleOp> {
    prop_oneof![
        (0..4usize).prop_map(LifecycleOp::AddSpeed),
        (0..4usize).prop_map(LifecycleOp::RemoveSpeed),
        (0..4usize).prop_map(LifecycleOp::AddTag),
        (0..4usize).prop_map(LifecycleOp::RemoveTag),
        (0..4usize).prop_map(LifecycleOp::Delete),
    ]
}

proptest! {
    /// Every value is destroyed exactly once: values come from the
    /// constructor or from a relocating copy, and `fini` cleans up the rest.
    #[test]
    fn every_value_is_destroyed_once(
        relocation in 0..3u8,
        ops in proptest::collection::vec(lifecycle_op(), 0..60),
    ) {
        let constructed = Arc::new(AtomicUsize::new(0));
        let copied = Arc::new(AtomicUsize::new(0));
        let destroyed = Arc::new(AtomicUsize::new(0));
        let (c, d) = (Arc::clone(&constructed), Arc::clone(&destroyed));
        let mut hooks = ComponentHooks::<ImpulseSpeed>::new()
            .on_construct(move |v| {
                c.fetch_add(1, Ordering::SeqCst);
                v.0 = 1.0;
            })
            .on_destruct(move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            });
        match relocation {
            1 => {
                let k = Arc::clone(&copied);
                hooks = hooks.on_copy(move |dst, src| {
                    k.fetch_add(1, Ordering::SeqCst);
                    *dst = *src;
                });
            }
            2 => hooks = hooks.on_move(|dst, src| *dst = *src),
            _ => {}
        }

        let mut world = World::new();
        world.register_component_with(hooks).unwrap();
        world.register_tag::<Enemy>().unwrap();
        let entities: Vec<_> = (0..4).map(|_| world.entity()).collect();
        for op in ops {
            let (LifecycleOp::AddSpeed(i)
            | LifecycleOp::RemoveSpeed(i)
            | LifecycleOp::AddTag(i)
            | LifecycleOp::RemoveTag(i)
            | LifecycleOp::Delete(i)) = op;
            let e = entities[i];
            if !world.is_alive(e) {
                continue;
            }
            match op {
                LifecycleOp::AddSpeed(_) => world.add::<ImpulseSpeed>(e).unwrap(),
                LifecycleOp::RemoveSpeed(_) => world.remove::<ImpulseSpeed>(e).unwrap(),
                LifecycleOp::AddTag(_) => world.add_tag::<Enemy>(e).unwrap(),
                LifecycleOp::RemoveTag(_) => world.remove_tag::<Enemy>(e).unwrap(),
                LifecycleOp::Delete(_) => world.delete(e).unwrap(),
            }
        }
        world.fini();

        let created = constructed.load(Ordering::SeqCst) + copied.load(Ordering::SeqCst);
        prop_assert_eq!(created, destroyed.load(Ordering::SeqCst));
        if relocation != 1 {
            prop_assert_eq!(copied.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn entity_type_matches_its_ids(ops in proptest::collection::vec(op(), 0..40)) {
        let mut world = World::new();
        let tags: Vec<_> = (0..6)
            .map(|i| world.register_tag_named(&format!("T{i}")).unwrap())
            .collect();
        let e = world.entity();
        let other = world.entity();
        world.add_id(other, Id::entity(tags[0])).unwrap();

        let mut expected = BTreeSet::new();
        for op in ops {
            match op {
                Op::Add(i) => {
                    world.add_id(e, Id::entity(tags[i])).unwrap();
                    expected.insert(Id::entity(tags[i]));
                }
                Op::Remove(i) => {
                    world.remove_id(e, Id::entity(tags[i])).unwrap();
                    expected.remove(&Id::entity(tags[i]));
                }
            }
            let actual: BTreeSet<Id> = world.type_of(e).unwrap().into_iter().collect();
            prop_assert_eq!(&actual, &expected);
        }
        prop_assert_eq!(world.type_of(other).unwrap(), vec![Id::entity(tags[0])]);
    }
}

//! # space_fleet
//!
//! Builds a prefab spaceship with slots, spawns a small fleet, and ticks a
//! movement system and a patrol system until the fleet has flown a few
//! frames.
//!
//! World arguments (`--fps`, `--threads`, `--orphan-children`, ...) are
//! taken from the command line.

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tessera_world::builtin::{ON_UPDATE, PHASE, POST_UPDATE, SLOT_OF};
use tessera_world::{Id, Spawn, SystemDesc, World, component, tag};

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
struct Defense(f64);

struct Flagship;

component!(Position, Velocity, Defense);
tag!(Flagship);

const FRAMES: u64 = 5;

fn build_prefabs(world: &mut World) -> Result<tessera_world::Entity> {
    let ship = world.prefab("SpaceShip")?;
    world.set(ship, Defense(50.0))?;
    world.set_override(ship, Velocity { x: 1.0, y: 0.0 })?;

    for slot in ["Engine", "Cockpit"] {
        let part = world.prefab(slot)?;
        world.child_of(part, ship)?;
        world.add_pair(part, SLOT_OF, ship)?;
    }
    Ok(ship)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("space_fleet=info".parse()?))
        .init();

    let mut world = World::init_with_args(std::env::args())?;
    let ship = build_prefabs(&mut world)?;
    let engine = world.lookup("SpaceShip.Engine").ok_or_else(|| anyhow::anyhow!("missing engine slot"))?;

    let fleet = world.entity_named("Fleet")?;
    for (i, name) in ["Aurora", "Borealis", "Corona"].into_iter().enumerate() {
        let vessel = world.entity_named(&format!("Fleet.{name}"))?;
        world.is_a(vessel, ship)?;
        world.set(vessel, Position { x: 0.0, y: i as f64 * 10.0 })?;
        info!(
            vessel = %world.full_path(vessel),
            engine = ?world.get_target(vessel, engine, 0).map(|e| world.full_path(e)),
            defense = world.get::<Defense>(vessel)?.map_or(0.0, |d| d.0),
            "launched"
        );
    }
    let flagship = world.lookup("Fleet.Aurora").ok_or_else(|| anyhow::anyhow!("missing flagship"))?;
    world.add_tag::<Flagship>(flagship)?;

    let patrol = world.entity_named("Patrol")?;
    world.add_id(patrol, Id::entity(PHASE))?;
    world.depends_on(patrol, ON_UPDATE)?;

    world.system(
        SystemDesc::new("Move", |it| {
            let dt = f64::from(it.delta_time());
            let (Ok(mut positions), Ok(velocities)) = (it.field_mut::<Position>(0), it.field::<Velocity>(1)) else {
                return;
            };
            for (p, v) in positions.iter_mut().zip(velocities.iter()) {
                p.x += v.x * dt;
                p.y += v.y * dt;
            }
        })
        .expr("Position, [in] Velocity"),
    )?;

    world.system(
        SystemDesc::new("Escort", move |it| {
            for &vessel in it.entities() {
                if vessel != flagship {
                    it.commands().child_of(vessel, flagship);
                }
            }
        })
        .expr("Position, !Flagship, (ChildOf, Fleet)")
        .phase(patrol),
    )?;

    world.system(
        SystemDesc::new("Report", |it| {
            if it.world().tick() >= FRAMES {
                it.commands().quit();
            }
        })
        .phase(POST_UPDATE),
    )?;

    let frames = world.run();
    for vessel in world.descendants(fleet) {
        if let Some(position) = world.get::<Position>(vessel)?.map(|p| *p) {
            info!(
                vessel = %world.full_path(vessel),
                x = position.x,
                y = position.y,
                "final position"
            );
        }
    }
    info!(frames, archetypes = world.archetype_count(), "fleet simulation finished");
    info!(info = ?world.info(), "world statistics");

    let code = world.fini();
    std::process::exit(code);
}

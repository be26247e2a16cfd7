//! Demo game: crates orbiting the origin and one pilot per client.

use std::sync::Arc;

use tickwire_networking::connection::PLAYER_PREFAB;
use tickwire_networking::error::SnapshotResult;
use tickwire_networking::{
    Controller, ControllerInput, ControllerResult, DynController, EntityWorld, Predictor, Role, SharedWorld,
    StateRegistry, StateShape, Stream, SyncMode,
};
use tickwire_shared::{ControllerSettings, EntityId, PrefabId, Vec2};

/// Player ship.
pub const PLAYER: PrefabId = PrefabId(1);
/// Orbiting crate.
pub const CRATE: PrefabId = PrefabId(2);

const ORBIT_RADIUS: f32 = 200.0;
const TICKS_PER_ORBIT: i32 = 600;

/// Replicated body of every entity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Body {
    /// World position.
    pub position: Vec2,
    /// Heading in 1/256 turns.
    pub heading: u8,
}

impl StateShape for Body {
    fn exchange_delta(&mut self, stream: &mut dyn Stream, baseline: &Self) -> bool {
        stream.exchange_delta_vec2(&mut self.position, baseline.position, -1024.0, 1024.0, 100.0)
            && stream.exchange_delta_u8(&mut self.heading, baseline.heading)
    }

    fn has_changed(&self, baseline: &Self) -> bool {
        self != baseline
    }

    fn interpolate(&mut self, src: &Self, dst: &Self, t: f32) {
        self.position = src.position.lerp(dst.position, t);
        self.heading = dst.heading;
    }
}

/// Stick deflection, -1 to 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stick(pub i16);

impl ControllerInput for Stick {
    fn exchange_delta(&mut self, stream: &mut dyn Stream, baseline: &Self) -> bool {
        stream.exchange_delta_i16(&mut self.0, baseline.0)
    }

    fn has_changed(&self, baseline: &Self) -> bool {
        self != baseline
    }
}

/// Distance flown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Odometer(pub i32);

impl ControllerResult for Odometer {
    fn is_out_of_sync(&self, predicted: &Self) -> i32 {
        (self.0 - predicted.0).abs()
    }

    fn exchange(&mut self, stream: &mut dyn Stream) -> bool {
        stream.exchange_i32(&mut self.0)
    }
}

/// Weaves left and right every half second.
#[derive(Debug, Default)]
pub struct Pilot {
    distance: i32,
    ship: Option<EntityId>,
}

impl Predictor for Pilot {
    type Input = Stick;
    type Result = Odometer;

    fn client_tick(&mut self, tick: i32) -> Stick {
        let phase = i16::try_from((tick / 30).rem_euclid(3)).unwrap_or(1);
        Stick(phase - 1)
    }

    fn simulate(&mut self, input: &Stick, _tick: i32) -> Odometer {
        self.distance += i32::from(input.0.abs());
        Odometer(self.distance)
    }

    fn reset_state(&mut self, result: &Odometer) {
        self.distance = result.0;
    }

    fn on_entity_associated(&mut self, entity: EntityId) {
        tracing::info!("Pilot took control of {}", entity);
        self.ship = Some(entity);
    }

    fn on_entity_deassociated(&mut self, entity: EntityId) {
        if self.ship == Some(entity) {
            self.ship = None;
        }
    }
}

/// Builds the world for one host. Only the server moves anything.
#[allow(clippy::cast_precision_loss)]
pub fn world(role: Role) -> SnapshotResult<SharedWorld> {
    let mut registry = StateRegistry::new();
    let body = registry.register::<Body>()?;
    registry.map_prefab(PLAYER, body)?;
    registry.map_prefab(CRATE, body)?;

    let mut world = EntityWorld::new(Arc::new(registry));
    world.register_prefab(PLAYER, PLAYER_PREFAB, SyncMode::Predicted)?;
    world.register_prefab(CRATE, "Crate", SyncMode::Interpolated)?;

    if role == Role::Server {
        world.set_ticker(|state, tick| {
            if state.prefab() != CRATE {
                return;
            }
            let offset = i32::from(state.id().0) * 37;
            let step = (tick + offset).rem_euclid(TICKS_PER_ORBIT);
            let angle = step as f32 / TICKS_PER_ORBIT as f32 * std::f32::consts::TAU;
            if let Some(body) = state.get_mut::<Body>() {
                body.position = Vec2::new(angle.cos() * ORBIT_RADIUS, angle.sin() * ORBIT_RADIUS);
                body.heading = u8::try_from(step * 256 / TICKS_PER_ORBIT).unwrap_or(0);
            }
        });
    }
    Ok(world.into_shared())
}

/// Controller factory handed to every host.
pub fn controllers(settings: ControllerSettings) -> impl Fn(Role) -> Box<dyn DynController> + Send + Sync + 'static {
    move |role| {
        let controller = match role {
            Role::Server => Controller::server(Pilot::default(), &settings),
            Role::Client => Controller::client(Pilot::default(), &settings),
        };
        Box::new(controller) as Box<dyn DynController>
    }
}

use deps::*;

use bevy::{ecs as bevy_ecs, prelude::*};
use educe::Educe;

use crate::formation::BoneTransform;
use crate::{Swarm, SwarmConfig};

/// Owns the simulation and mirrors the agents into the ECS.
///
/// Uses the [`SwarmConfig`] and [`Swarm`] resources if they were inserted beforehand.
pub struct SwarmPlugin;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, SystemLabel)]
pub enum SwarmSystems {
    Tick,
    Sync,
}

impl Plugin for SwarmPlugin {
    fn build(&self, app: &mut App) {
        use SwarmSystems::*;
        if !app.world.contains_resource::<SwarmConfig>() {
            app.insert_resource(SwarmConfig::default());
        }
        if !app.world.contains_resource::<Swarm>() {
            let swarm = Swarm::new(app.world.resource::<SwarmConfig>())
                .expect_or_log("unable to build swarm from config");
            app.insert_resource(swarm);
        }
        app.add_event::<AgentAttached>()
            .add_startup_system(spawn_agent_entities)
            .add_system(swarm_tick.label(Tick))
            .add_system(sync_agent_transforms.label(Sync).after(Tick));
    }
}

/// Index of the agent an entity mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Component)]
pub struct AgentId(pub u32);

/// The formation root follows this entity's [`Transform`].
#[derive(Debug, Default, Clone, Copy, Component)]
pub struct FormationAnchor;

/// Live bone transforms for rigged formations.
#[derive(Debug, Default, Clone, Educe)]
#[educe(Deref, DerefMut)]
pub struct LivePose(pub Vec<BoneTransform>);

/// Sent when an agent snaps onto its formation point.
#[derive(Debug, Clone, Copy)]
pub struct AgentAttached {
    pub agent: AgentId,
    pub entity: Entity,
}

#[derive(Bundle)]
pub struct AgentBundle {
    pub id: AgentId,
    pub xform: Transform,
    pub global_xform: GlobalTransform,
}

pub fn spawn_agent_entities(mut commands: Commands, swarm: Res<Swarm>) {
    let agents = swarm.agents();
    for ii in 0..agents.len() {
        commands.spawn_bundle(AgentBundle {
            id: AgentId(ii as u32),
            xform: Transform {
                translation: agents.positions[ii],
                rotation: agents.rotations[ii],
                scale: agents.scales[ii],
            },
            global_xform: default(),
        });
    }
}

pub fn swarm_tick(
    mut swarm: ResMut<Swarm>,
    config: Res<SwarmConfig>,
    time: Option<Res<Time>>,
    anchors: Query<&Transform, With<FormationAnchor>>,
    pose: Option<Res<LivePose>>,
) {
    let dt = match (config.fixed_dt, time) {
        (Some(dt), _) => dt,
        (None, Some(time)) => time.delta_seconds(),
        (None, None) => return,
    };
    if dt <= 0. {
        return;
    }
    if let Ok(anchor) = anchors.get_single() {
        swarm.set_formation_root(*anchor);
    }
    if let Some(pose) = pose {
        if pose.is_changed() {
            if let Err(err) = swarm.set_pose(&pose) {
                tracing::error!(?err, "live pose rejected");
            }
        }
    }
    swarm.set_agent_scale(config.spawn.scale);
    swarm.tick(&config.params, dt);
}

pub fn sync_agent_transforms(
    swarm: Res<Swarm>,
    mut agents: Query<(Entity, &AgentId, &mut Transform)>,
    mut was_attached: Local<Vec<bool>>,
    mut attached_events: EventWriter<AgentAttached>,
) {
    let state = swarm.agents();
    was_attached.resize(state.len(), false);
    for (entity, id, mut xform) in agents.iter_mut() {
        let ii = id.0 as usize;
        if ii >= state.len() {
            continue;
        }
        xform.translation = state.positions[ii];
        xform.rotation = state.rotations[ii];
        xform.scale = state.scales[ii];
        if state.attached[ii] && !was_attached[ii] {
            attached_events.send(AgentAttached { agent: *id, entity });
        }
        was_attached[ii] = state.attached[ii];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::formation::{Formation, FormationAsset};
    use crate::math::*;

    #[derive(Default)]
    struct AttachedLog(Vec<AgentId>);

    fn log_attached(mut events: EventReader<AgentAttached>, mut log: ResMut<AttachedLog>) {
        log.0.extend(events.iter().map(|event| event.agent));
    }

    fn app(count: usize) -> App {
        let mut config = SwarmConfig::default();
        config.spawn.count = count;
        config.spawn.radius_min = 2.;
        config.spawn.radius_max = 3.;
        config.params.breathing_max_distance = 0.;
        config.phase.formation_start_delay = 0.;
        config.fixed_dt = Some(0.02);

        let mut app = App::new();
        app.insert_resource(config)
            .add_plugin(SwarmPlugin)
            .init_resource::<AttachedLog>()
            .add_system(log_attached.after(SwarmSystems::Sync));
        app
    }

    #[test]
    fn mirrors_agents_into_transforms() {
        let mut app = app(12);
        for _ in 0..5 {
            app.update();
        }
        let mut query = app.world.query::<(&AgentId, &Transform)>();
        let mut count = 0;
        for (id, xform) in query.iter(&app.world) {
            let swarm = app.world.resource::<Swarm>();
            assert_eq!(xform.translation, swarm.agents().positions[id.0 as usize]);
            assert_eq!(xform.rotation, swarm.agents().rotations[id.0 as usize]);
            count += 1;
        }
        assert_eq!(count, 12);
        assert!((app.world.resource::<Swarm>().elapsed() - 0.1).abs() < 1e-5);
    }

    #[test]
    fn reports_attachment_once() {
        let mut app = app(6);
        app.world.spawn().insert_bundle((
            FormationAnchor,
            Transform::from_translation(TVec3::new(0., 1., 0.)),
        ));
        let formation =
            Formation::activate(&FormationAsset::from_points(vec![TVec3::ZERO], TVec3::ONE), None)
                .unwrap();
        app.world
            .resource_mut::<Swarm>()
            .set_formation(Some(formation));
        // until just before the first overrun detaches everything
        for _ in 0..195 {
            app.update();
        }
        let swarm = app.world.resource::<Swarm>();
        assert_eq!(swarm.agents().attached_count(), 6);
        for pos in &swarm.agents().positions {
            assert!(pos.abs_diff_eq(TVec3::new(0., 1., 0.), 1e-6));
        }
        let mut log = app.world.resource::<AttachedLog>().0.clone();
        log.sort_by_key(|id| id.0);
        assert_eq!(log, (0..6).map(AgentId).collect::<Vec<_>>());
    }
}

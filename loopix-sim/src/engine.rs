//! The arena-owning simulation engine (spec §4.3, §9 "Global mutable
//! state"/"Cyclic ownership"). `Simulation` owns every entity by value in a
//! flat arena and addresses them by the `UserId`/`ProviderId`/`MixId`/`AppId`
//! handles from [`crate::ids`], so no entity ever holds a long-lived
//! back-reference to the simulation or to its siblings — `tick`/`deliver`
//! are always handed the pieces of context (`&Network`, `&mut
//! DeterministicRng`, the current `SimTime`) they need, explicitly.

use sim_engine::{
    DeterministicRng, Delta, GroupId, OutputArtifact, SimError, SimResult, SimTime,
    SimulationOutput,
};

use crate::application::{Application, Group};
use crate::ids::{AppId, MixId, NodeRef, ProviderId, UserId};
use crate::multicast;
use crate::network::Network;
use crate::node::{MixNode, Provider, User};
use crate::payload::Env;
use crate::settings::{AppSettings, Settings, StrategyConfig};

/// Owns every entity in the simulation and drives the fixed-Δ round loop
/// (spec §4.3). Mix nodes are stored per layer to mirror [`Network`]'s
/// shape; `mix_mut` resolves a [`MixId`] into that nested arena.
pub struct Simulation {
    network: Network,
    mixes: Vec<Vec<MixNode>>,
    providers: Vec<Provider>,
    users: Vec<User>,
    applications: Vec<Application>,
    /// `user_providers[user_id.0]` is that user's home provider; threaded
    /// into every user's flush (spec §4.9) so the suffix chain can append
    /// the terminal provider hop for a User recipient without every user
    /// needing a reference to its peers.
    user_providers: Vec<ProviderId>,
    multiplier_layer: usize,
    delta: Delta,
    time: SimTime,
    rng: DeterministicRng,
    output: SimulationOutput<AppId>,
}

impl Simulation {
    /// Expands a declarative settings file into a fully constructed
    /// simulation graph (spec §6 "Input artifact": "rehydrating all entity
    /// references"). Grounded in `original_source/simulation/
    /// loopix.py::create_loopix_simulation`/`create_provider_with_users` for
    /// the shape of what needs to be built.
    pub fn from_settings(settings: &Settings) -> SimResult<Self> {
        if settings.providers.len() != settings.network.num_providers {
            return Err(SimError::Configuration(format!(
                "settings declare {} provider(s) but network.num_providers = {}",
                settings.providers.len(),
                settings.network.num_providers
            )));
        }
        settings.loopix.warn_if_insecure();

        let network = Network::new(
            settings.network.num_layers,
            settings.network.mixes_per_layer,
            settings.network.num_providers,
        );
        let delta = Delta::from_millis(settings.delta_ms);

        let mixes: Vec<Vec<MixNode>> = (0..network.num_layers())
            .map(|layer| {
                (0..network.mixes_in_layer(layer))
                    .map(|index| {
                        MixNode::new(
                            MixId { layer, index },
                            format!("mix-{layer}-{index}"),
                            settings.loopix.mix_rate_loop,
                            settings.loopix.mix_rate_loop_delay,
                        )
                    })
                    .collect()
            })
            .collect();

        let mut providers = Vec::with_capacity(settings.providers.len());
        let mut users = Vec::new();
        let mut user_providers = Vec::new();

        for (provider_index, provider_settings) in settings.providers.iter().enumerate() {
            let provider_id = ProviderId(provider_index);
            let name = provider_settings
                .name
                .clone()
                .unwrap_or_else(|| format!("provider-{provider_index}"));
            providers.push(Provider::new(provider_id, name));

            for local_index in 0..provider_settings.num_users {
                let user_id = UserId(users.len());
                let online_schedule = provider_settings
                    .online_schedules
                    .get(local_index)
                    .cloned()
                    .flatten();
                users.push(User::new(
                    user_id,
                    format!("user-{}", user_id.0),
                    provider_id,
                    settings.loopix.user_rate_payload,
                    settings.loopix.user_rate_drop,
                    settings.loopix.user_rate_loop,
                    settings.loopix.user_rate_delay,
                    settings.loopix.user_rate_pull,
                    online_schedule,
                ));
                user_providers.push(provider_id);
            }
        }

        let mut applications = Vec::with_capacity(settings.groups.len());
        for (app_index, group_settings) in settings.groups.iter().enumerate() {
            let app_id = AppId(app_index);
            let group_id = GroupId(app_index as u64);
            let members: Vec<UserId> = group_settings.user_ids.iter().copied().map(UserId).collect();
            let group = Group {
                id: group_id,
                members: members.clone(),
            };

            let application = match &group_settings.app {
                AppSettings::NoOp => Application::no_op(app_id, group_settings.name.clone(), group),
                AppSettings::Interactive {
                    init_rate_per_second,
                    heavy_user_percentage,
                    heavy_user_weight,
                } => Application::interactive(
                    app_id,
                    group_settings.name.clone(),
                    group,
                    *init_rate_per_second,
                    *heavy_user_percentage,
                    *heavy_user_weight,
                ),
                AppSettings::InteractiveMultimessage {
                    init_rate_per_second,
                    multi_message,
                    heavy_user_percentage,
                    heavy_user_weight,
                } => Application::interactive_multimessage(
                    app_id,
                    group_settings.name.clone(),
                    group,
                    *init_rate_per_second,
                    *multi_message,
                    *heavy_user_percentage,
                    *heavy_user_weight,
                ),
            };
            applications.push(application);

            let strategy = group_settings.strategy.parse::<StrategyConfig>()?;
            for &member in &members {
                let user = users.get_mut(member.0).ok_or_else(|| {
                    SimError::Configuration(format!(
                        "group '{}' references unknown user id {}",
                        group_settings.name, member.0
                    ))
                })?;
                let (strategy_state, split) = multicast::build(
                    strategy,
                    group_id,
                    network.num_layers(),
                    settings.loopix.user_rate_delay,
                    settings.loopix.user_rate_payload,
                );
                user.add_multicast(group_id, app_id, strategy_state);
                user.set_split(split);
            }
        }

        Ok(Self {
            network,
            mixes,
            providers,
            users,
            applications,
            user_providers,
            multiplier_layer: settings.multiplier_layer,
            delta,
            time: SimTime::ZERO,
            rng: DeterministicRng::new(settings.seed, delta),
            output: SimulationOutput::new(),
        })
    }

    pub fn now(&self) -> SimTime {
        self.time
    }

    pub fn output(&self) -> &SimulationOutput<AppId> {
        &self.output
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn applications(&self) -> &[Application] {
        &self.applications
    }

    fn mix_mut(&mut self, id: MixId) -> SimResult<&mut MixNode> {
        self.mixes
            .get_mut(id.layer)
            .and_then(|layer| layer.get_mut(id.index))
            .ok_or_else(|| SimError::Invariant(format!("unknown mix node {id:?}")))
    }

    /// Runs one fixed-Δ round (spec §4.3 `tick()`): every tickable entity
    /// ticks in declared order (mixes, providers, users, applications),
    /// enqueuing outbound envelopes into a round-local bus; time then
    /// advances by Δ; finally `after_round` delivers the bus to its
    /// recipients, so a send during round N is only visible to its
    /// recipient at time N+Δ — the "one-round-minimum network latency"
    /// spec §5 requires.
    pub fn tick(&mut self) -> SimResult<()> {
        let now = self.time;
        let mut bus: Vec<(NodeRef, Env)> = Vec::new();

        for layer in self.mixes.iter_mut() {
            for mix in layer.iter_mut() {
                bus.extend(mix.tick(now, &self.network, &mut self.rng));
            }
        }

        for provider in self.providers.iter_mut() {
            bus.extend(provider.tick(now));
        }

        for user in self.users.iter_mut() {
            let postbox = if user.is_online_at(now) && user.due_for_pull() {
                self.providers[user.provider.0].take_postbox(user.id)
            } else {
                Vec::new()
            };
            bus.extend(user.tick(
                now,
                self.delta,
                &self.network,
                &self.user_providers,
                postbox,
                &mut self.applications,
                self.multiplier_layer,
                &mut self.output,
                &mut self.rng,
            ));
        }

        for app_index in 0..self.applications.len() {
            let triggered = self.applications[app_index].tick(now, &self.users, &mut self.rng);
            if let Some((sender, payloads)) = triggered {
                let group_id = self.applications[app_index].group.id;
                let group_members = self.applications[app_index].group.members.clone();
                for payload in payloads {
                    self.users[sender.0].send_payload_to_group(group_id, payload, &group_members, now);
                }
            }
        }

        self.time = self.time.advance(self.delta);
        self.after_round(bus)?;

        if self.time.millis() % 100_000 < self.delta.millis() {
            tracing::info!(sim_time_ms = self.time.millis(), "progress");
        }

        Ok(())
    }

    /// Drains the round's in-transit bus, delivering each envelope exactly
    /// once in send order (spec §4.3 `after_round()`). A `User` recipient at
    /// the top level is an invariant violation (spec §9: users are only
    /// ever addressed *inside* an envelope chain, terminating at a
    /// provider's postbox, never as the wire-level recipient).
    fn after_round(&mut self, bus: Vec<(NodeRef, Env)>) -> SimResult<()> {
        let now = self.time;
        for (recipient, envelope) in bus {
            match recipient {
                NodeRef::Mix(mix_id) => self.mix_mut(mix_id)?.deliver(now, envelope),
                NodeRef::Provider(provider_id) => self
                    .providers
                    .get_mut(provider_id.0)
                    .ok_or_else(|| SimError::Invariant(format!("unknown provider {provider_id:?}")))?
                    .deliver(now, envelope),
                NodeRef::User(user_id) => {
                    return Err(SimError::Invariant(format!(
                        "envelope addressed directly to user {user_id:?}, bypassing its provider's postbox"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Runs `⌊duration_ms/Δ⌋` ticks (spec §4.3 `run()`).
    pub fn run(&mut self, duration_ms: u64) -> SimResult<()> {
        let rounds = duration_ms / self.delta.millis();
        for _ in 0..rounds {
            self.tick()?;
        }
        Ok(())
    }

    /// Releases all round-scoped/schedule-scoped state prior to archival
    /// (spec §4.3 `clean()`, §9 "a user's clean resets online = true and
    /// clears online_schedule").
    pub fn clean(&mut self) {
        for user in self.users.iter_mut() {
            user.clean();
        }
        for app in self.applications.iter_mut() {
            app.clean();
        }
    }

    /// Shapes the accumulated output the way spec §6's external output
    /// artifact expects.
    pub fn output_artifact(&self) -> OutputArtifact {
        OutputArtifact::from_output(&self.output, self.time.millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{GroupSettings, LoopixConfig, NetworkSettings, ProviderSettings};

    fn rollercoaster_settings(strategy: &str, offline_member: Option<usize>) -> Settings {
        let num_users = 7;
        let mut online_schedules = vec![None; num_users];
        if let Some(offline) = offline_member {
            online_schedules[offline] = Some(vec![false; 86_400]);
        }

        Settings {
            seed: 42,
            delta_ms: 10,
            run_time_ms: 50_000,
            multiplier_layer: 0,
            network: NetworkSettings {
                num_layers: 1,
                mixes_per_layer: 1,
                num_providers: 1,
            },
            loopix: LoopixConfig {
                user_rate_pull: 10_000.0,
                user_rate_payload: 1_000_000_000.0,
                user_rate_drop: 0.0,
                user_rate_loop: 0.0,
                user_rate_delay: 10.0,
                mix_rate_loop: 0.0,
                mix_rate_loop_delay: 10.0,
            },
            providers: vec![ProviderSettings {
                name: None,
                num_users,
                online_schedules,
            }],
            groups: vec![GroupSettings {
                name: "g0".to_string(),
                user_ids: (0..num_users).collect(),
                strategy: strategy.to_string(),
                app: AppSettings::NoOp,
            }],
        }
    }

    fn inject_and_run(strategy: &str) -> Simulation {
        let settings = rollercoaster_settings(strategy, Some(1));
        let mut sim = Simulation::from_settings(&settings).unwrap();

        let group_id = sim.applications[0].group.id;
        let group_members = sim.applications[0].group.members.clone();
        let payload = crate::payload::Payload {
            nonce: 1,
            created_at: SimTime::ZERO,
        };
        sim.users[0].send_payload_to_group(group_id, payload, &group_members, SimTime::ZERO);

        sim.run(settings.run_time_ms).unwrap();
        sim
    }

    #[test]
    fn time_advances_monotonically_by_delta() {
        let settings = rollercoaster_settings("unicast", None);
        let mut sim = Simulation::from_settings(&settings).unwrap();
        let mut last = sim.now();
        for _ in 0..20 {
            sim.tick().unwrap();
            assert!(sim.now() > last);
            assert_eq!(sim.now().millis() - last.millis(), 10);
            last = sim.now();
        }
    }

    /// S6: with timeouts active, a permanently offline member's subtree is
    /// eventually reached through source-side retransmission with
    /// last-seen/next-receiver substitution.
    #[test]
    fn rollercoaster_with_timeouts_reaches_offline_members_subtree() {
        let sim = inject_and_run("rollercoaster-k1-p1-timeout15x");
        let app = &sim.applications[0];

        for member in [2usize, 3, 4, 5, 6] {
            assert!(
                app.has_delivered(UserId(member)),
                "member {member} should have received the payload"
            );
        }
        assert!(
            !app.has_delivered(UserId(1)),
            "permanently offline member 1 should never process its postbox"
        );
    }

    /// S7: without timeouts, only members reachable without passing through
    /// the offline node receive the payload.
    #[test]
    fn rollercoaster_without_timeouts_skips_offline_subtree() {
        let sim = inject_and_run("rollercoaster-k1-p1-notimeout");
        let app = &sim.applications[0];

        for member in [2usize, 4, 6] {
            assert!(
                app.has_delivered(UserId(member)),
                "member {member} is reachable without passing through the offline node"
            );
        }
        for member in [1usize, 3, 5] {
            assert!(
                !app.has_delivered(UserId(member)),
                "member {member} is only reachable through the offline node's subtree"
            );
        }
    }
}

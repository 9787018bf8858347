//! JSON-driven simulation settings (spec §6 "Input artifact", ambient A.4).
//! The original implementation's input artifact is an opaque serialized
//! snapshot of a fully constructed simulation; here the CLI instead loads a
//! declarative JSON description that `engine::Simulation::from_settings`
//! expands into that same fully constructed graph. Grounded in
//! `original_source/simulation/loopix.py::create_loopix_simulation`/
//! `create_provider_with_users` for the shape of what needs to be built, and
//! in `blendnet-sims/src/settings.rs` for the serde/humantime conventions.

use std::str::FromStr;

use serde::Deserialize;
use sim_engine::SimError;

/// All rates are expected events per second (spec §6 "Configuration").
/// Ported from `original_source/simulation/loopix.py::LoopixConfiguration`.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct LoopixConfig {
    #[serde(default = "defaults::user_rate_pull")]
    pub user_rate_pull: f64,
    #[serde(default = "defaults::user_rate_payload")]
    pub user_rate_payload: f64,
    #[serde(default = "defaults::user_rate_drop")]
    pub user_rate_drop: f64,
    #[serde(default = "defaults::user_rate_loop")]
    pub user_rate_loop: f64,
    #[serde(default = "defaults::user_rate_delay")]
    pub user_rate_delay: f64,
    #[serde(default = "defaults::mix_rate_loop")]
    pub mix_rate_loop: f64,
    #[serde(default = "defaults::mix_rate_loop_delay")]
    pub mix_rate_loop_delay: f64,
}

mod defaults {
    pub fn user_rate_pull() -> f64 {
        1.0
    }
    pub fn user_rate_payload() -> f64 {
        2.0
    }
    pub fn user_rate_drop() -> f64 {
        2.0
    }
    pub fn user_rate_loop() -> f64 {
        2.0
    }
    pub fn user_rate_delay() -> f64 {
        3.0
    }
    pub fn mix_rate_loop() -> f64 {
        2.0
    }
    pub fn mix_rate_loop_delay() -> f64 {
        3.0
    }
}

impl Default for LoopixConfig {
    fn default() -> Self {
        Self {
            user_rate_pull: defaults::user_rate_pull(),
            user_rate_payload: defaults::user_rate_payload(),
            user_rate_drop: defaults::user_rate_drop(),
            user_rate_loop: defaults::user_rate_loop(),
            user_rate_delay: defaults::user_rate_delay(),
            mix_rate_loop: defaults::mix_rate_loop(),
            mix_rate_loop_delay: defaults::mix_rate_loop_delay(),
        }
    }
}

impl LoopixConfig {
    /// Warns (never errors) when the traffic-to-delay ratio falls below the
    /// paper's recommended security margin. Ported from
    /// `LoopixConfiguration.__init__`'s `print(...)` call.
    pub fn warn_if_insecure(&self) {
        let traffic = self.user_rate_payload + self.user_rate_drop + self.user_rate_loop;
        let required = 2.0 * self.user_rate_delay;
        if traffic < required {
            tracing::warn!(
                traffic,
                required,
                "for a secure configuration it should hold that (payload+drop+loop)/delay >= 2"
            );
        }
    }
}

/// Rollercoaster strategy parameters (spec §4.11, §6), parsed from a
/// dash-separated strategy name.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RollercoasterParams {
    pub k: usize,
    pub p: usize,
    pub timeout_multiplier: f64,
    pub timeouts_active: bool,
    pub drop_offline: bool,
}

/// Either plain sequential unicast or Rollercoaster with its tunables (spec
/// §6). Ported from `original_source/simulation/
/// notebook_utils.py::create_strategy_factory`'s name grammar:
///   - `unicast`
///   - `rollercoaster-k2-p1`
///   - `rollercoaster-k2-p2-timeout15x`
///   - `rollercoaster-k2-p2-timeout15x-dropoffline`
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StrategyConfig {
    Unicast,
    Rollercoaster(RollercoasterParams),
}

impl FromStr for StrategyConfig {
    type Err = SimError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let mut parts = name.split('-');
        match parts.next() {
            Some("unicast") => Ok(StrategyConfig::Unicast),
            Some("rollercoaster") => parse_rollercoaster(name, parts).map(StrategyConfig::Rollercoaster),
            _ => Err(SimError::Configuration(format!("unknown strategy name: {name}"))),
        }
    }
}

fn parse_rollercoaster<'a>(
    name: &str,
    parts: impl Iterator<Item = &'a str>,
) -> Result<RollercoasterParams, SimError> {
    let mut k = None;
    let mut p = None;
    let mut timeout_multiplier = 1.0;
    let mut timeouts_active = false;
    let mut drop_offline = false;

    for token in parts {
        if let Some(rest) = token.strip_prefix('k') {
            k = Some(rest.parse::<usize>().map_err(|_| invalid(name, token))?);
        } else if let Some(rest) = token.strip_prefix('p') {
            p = Some(rest.parse::<usize>().map_err(|_| invalid(name, token))?);
        } else if let Some(rest) = token.strip_prefix("timeout") {
            let digits = rest.strip_suffix('x').ok_or_else(|| invalid(name, token))?;
            if digits.len() != 2 {
                return Err(invalid(name, token));
            }
            let scaled: u32 = digits.parse().map_err(|_| invalid(name, token))?;
            timeout_multiplier = scaled as f64 / 10.0;
            timeouts_active = true;
        } else if token == "notimeout" {
            timeouts_active = false;
        } else if token == "dropoffline" {
            drop_offline = true;
        } else {
            return Err(invalid(name, token));
        }
    }

    Ok(RollercoasterParams {
        k: k.ok_or_else(|| SimError::Configuration(format!("strategy '{name}' missing k<K> component")))?,
        p: p.ok_or_else(|| SimError::Configuration(format!("strategy '{name}' missing p<P> component")))?,
        timeout_multiplier,
        timeouts_active,
        drop_offline,
    })
}

fn invalid(name: &str, token: &str) -> SimError {
    SimError::Configuration(format!("strategy '{name}': unrecognized component '{token}'"))
}

/// Mix network shape (spec §4.4).
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct NetworkSettings {
    pub num_layers: usize,
    pub mixes_per_layer: usize,
    pub num_providers: usize,
}

/// A group of users sharing one multicast strategy and one application
/// driving traffic into it (spec §3 "Group", §4.8). `user_ids` are indices
/// into the flattened, provider-order user list `ProviderSettings` builds.
#[derive(Clone, Debug, Deserialize)]
pub struct GroupSettings {
    pub name: String,
    pub user_ids: Vec<usize>,
    pub strategy: String,
    #[serde(default)]
    pub app: AppSettings,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppSettings {
    NoOp,
    Interactive {
        init_rate_per_second: f64,
        #[serde(default)]
        heavy_user_percentage: f64,
        #[serde(default = "defaults_app::heavy_user_weight")]
        heavy_user_weight: f64,
    },
    InteractiveMultimessage {
        init_rate_per_second: f64,
        #[serde(default = "defaults_app::multi_message")]
        multi_message: usize,
        #[serde(default)]
        heavy_user_percentage: f64,
        #[serde(default = "defaults_app::heavy_user_weight")]
        heavy_user_weight: f64,
    },
}

mod defaults_app {
    pub fn heavy_user_weight() -> f64 {
        1.0
    }
    pub fn multi_message() -> usize {
        1
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings::NoOp
    }
}

/// One provider's user population (spec §4.6/§4.7). Ported from
/// `original_source/simulation/loopix.py::create_provider_with_users`.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub name: Option<String>,
    pub num_users: usize,
    /// Per-user online schedule (spec §6 "Online schedules"), in provider
    /// order; shorter than `num_users` is fine, the remainder default to
    /// always-online.
    #[serde(default)]
    pub online_schedules: Vec<Option<Vec<bool>>>,
}

/// The top-level settings file `SimulationApp` loads via `serde_json`.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub seed: u64,
    pub delta_ms: u64,
    pub run_time_ms: u64,
    #[serde(default = "defaults_top::multiplier_layer")]
    pub multiplier_layer: usize,
    pub network: NetworkSettings,
    #[serde(default)]
    pub loopix: LoopixConfig,
    pub providers: Vec<ProviderSettings>,
    #[serde(default)]
    pub groups: Vec<GroupSettings>,
}

mod defaults_top {
    pub fn multiplier_layer() -> usize {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unicast() {
        assert_eq!(StrategyConfig::from_str("unicast").unwrap(), StrategyConfig::Unicast);
    }

    #[test]
    fn parses_rollercoaster_with_timeout_and_dropoffline() {
        let parsed = StrategyConfig::from_str("rollercoaster-k2-p2-timeout15x-dropoffline").unwrap();
        assert_eq!(
            parsed,
            StrategyConfig::Rollercoaster(RollercoasterParams {
                k: 2,
                p: 2,
                timeout_multiplier: 1.5,
                timeouts_active: true,
                drop_offline: true,
            })
        );
    }

    #[test]
    fn rollercoaster_without_timeout_defaults_inactive() {
        let parsed = StrategyConfig::from_str("rollercoaster-k1-p1").unwrap();
        assert_eq!(
            parsed,
            StrategyConfig::Rollercoaster(RollercoasterParams {
                k: 1,
                p: 1,
                timeout_multiplier: 1.0,
                timeouts_active: false,
                drop_offline: false,
            })
        );
    }

    #[test]
    fn rejects_unknown_strategy() {
        assert!(StrategyConfig::from_str("gossip").is_err());
    }

    #[test]
    fn rejects_missing_k() {
        assert!(StrategyConfig::from_str("rollercoaster-p1").is_err());
    }

    #[test]
    fn security_ratio_warning_does_not_panic_when_insecure() {
        let config = LoopixConfig {
            user_rate_payload: 0.1,
            user_rate_drop: 0.1,
            user_rate_loop: 0.1,
            user_rate_delay: 10.0,
            ..LoopixConfig::default()
        };
        config.warn_if_insecure();
    }
}

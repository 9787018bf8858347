//! Layered mix network topology (spec §4.4). The network owns only the
//! *shape* (layer widths, provider count); the concrete `MixNode`/`Provider`
//! state lives in the `Simulation`'s arenas and is addressed through the
//! `MixId`/`ProviderId` handles this module hands out.

use sim_engine::DeterministicRng;

use crate::ids::{MixId, NodeRef, ProviderId};

pub struct Network {
    mixes_per_layer: Vec<usize>,
    num_providers: usize,
}

impl Network {
    pub fn new(num_layers: usize, mixes_per_layer: usize, num_providers: usize) -> Self {
        assert!(num_layers >= 1, "a mix network needs at least one layer");
        assert!(mixes_per_layer >= 1, "a mix layer needs at least one node");
        assert!(num_providers >= 1, "a network needs at least one provider");
        Self {
            mixes_per_layer: vec![mixes_per_layer; num_layers],
            num_providers,
        }
    }

    pub fn num_layers(&self) -> usize {
        self.mixes_per_layer.len()
    }

    pub fn mixes_in_layer(&self, layer: usize) -> usize {
        self.mixes_per_layer[layer]
    }

    pub fn num_providers(&self) -> usize {
        self.num_providers
    }

    pub fn all_mix_ids(&self) -> Vec<MixId> {
        let mut ids = Vec::new();
        for layer in 0..self.num_layers() {
            for index in 0..self.mixes_in_layer(layer) {
                ids.push(MixId { layer, index });
            }
        }
        ids
    }

    pub fn random_mix_in_layer(&self, layer: usize, rng: &mut DeterministicRng) -> MixId {
        let candidates: Vec<MixId> = (0..self.mixes_in_layer(layer))
            .map(|index| MixId { layer, index })
            .collect();
        *rng.choice(&candidates)
    }

    pub fn random_provider(&self, rng: &mut DeterministicRng) -> ProviderId {
        let candidates: Vec<ProviderId> = (0..self.num_providers).map(ProviderId).collect();
        *rng.choice(&candidates)
    }

    /// A uniformly random forward path, one mix per layer (spec §4.4).
    pub fn random_path(&self, rng: &mut DeterministicRng) -> Vec<MixId> {
        (0..self.num_layers())
            .map(|layer| self.random_mix_in_layer(layer, rng))
            .collect()
    }

    /// A mix node's loop path (spec §4.5): layers strictly above `own`
    /// (ascending), one uniformly chosen provider, layers strictly below
    /// `own` (ascending), and finally `own` itself as the terminal hop.
    pub fn loop_path(&self, own: MixId, rng: &mut DeterministicRng) -> Vec<NodeRef> {
        let mut path = Vec::new();
        for layer in (own.layer + 1)..self.num_layers() {
            path.push(NodeRef::Mix(self.random_mix_in_layer(layer, rng)));
        }
        path.push(NodeRef::Provider(self.random_provider(rng)));
        for layer in 0..own.layer {
            path.push(NodeRef::Mix(self.random_mix_in_layer(layer, rng)));
        }
        path.push(NodeRef::Mix(own));
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_engine::Delta;

    #[test]
    fn random_path_has_one_hop_per_layer() {
        let network = Network::new(3, 4, 2);
        let mut rng = DeterministicRng::new(1, Delta::from_millis(1));
        let path = network.random_path(&mut rng);
        assert_eq!(path.len(), 3);
        for (layer, mix) in path.iter().enumerate() {
            assert_eq!(mix.layer, layer);
        }
    }

    #[test]
    fn loop_path_ends_at_self_and_includes_one_provider() {
        let network = Network::new(3, 4, 2);
        let mut rng = DeterministicRng::new(2, Delta::from_millis(1));
        let own = MixId { layer: 1, index: 0 };
        let path = network.loop_path(own, &mut rng);

        assert_eq!(*path.last().unwrap(), NodeRef::Mix(own));
        let providers = path
            .iter()
            .filter(|hop| matches!(hop, NodeRef::Provider(_)))
            .count();
        assert_eq!(providers, 1);
        // layer 2 (above) comes before the provider; layer 0 (below) after.
        let provider_pos = path
            .iter()
            .position(|hop| matches!(hop, NodeRef::Provider(_)))
            .unwrap();
        assert!(matches!(path[0], NodeRef::Mix(MixId { layer: 2, .. })));
        assert!(matches!(path[provider_pos + 1], NodeRef::Mix(MixId { layer: 0, .. })));
    }
}

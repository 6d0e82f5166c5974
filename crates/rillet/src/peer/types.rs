use std::{fmt::Display, sync::OnceLock};

use rand::{distributions::Alphanumeric, Rng};
use speedy::{Readable, Writable};

/// Client prefix of our peer id, Azureus style.
const PEER_ID_PREFIX: &[u8; 8] = b"-RL0001-";

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Readable, Writable)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// A new random id: the client prefix followed by 12 alphanumerics.
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(PEER_ID_PREFIX);

        let mut rng = rand::thread_rng();
        for b in id[8..].iter_mut() {
            *b = rng.sample(Alphanumeric);
        }

        Self(id)
    }

    /// The id of this process, generated on first use.
    pub fn local() -> Self {
        static LOCAL: OnceLock<PeerId> = OnceLock::new();
        *LOCAL.get_or_init(Self::generate)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.to_string();
        f.write_str(&s)
    }
}

impl From<PeerId> for [u8; 20] {
    fn from(value: PeerId) -> Self {
        value.0
    }
}

impl From<[u8; 20]> for PeerId {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

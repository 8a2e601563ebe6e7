use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::engine::PartyEngine;
use crate::shamir::SecretSharingScheme;
use crate::transport::{duplex_matrix, ChannelTransport, ProtocolMessage};

/// Buffer size of the in-process duplex pipes.
const PIPE_BUFFER: usize = 64 * 1024;

/// In-process cluster: all parties of one computation wired over framed
/// duplex channels, each with a running message pump.
///
/// This is the loopback deployment used by the test suites and the local
/// runner. Dropping the cluster aborts the pumps.
pub struct LocalCluster {
    parties: Vec<Arc<PartyEngine>>,
    pumps: Vec<JoinHandle<()>>,
}

impl LocalCluster {
    /// Wire up one engine per party of `scheme`. Must be called within a
    /// tokio runtime.
    pub fn connect(scheme: SecretSharingScheme) -> Self {
        let matrix = duplex_matrix::<ProtocolMessage>(scheme.parties(), PIPE_BUFFER);

        let mut parties = Vec::with_capacity(scheme.parties());
        let mut pumps = Vec::with_capacity(scheme.parties());
        for (slot, channels) in matrix.into_iter().enumerate() {
            let index = slot + 1;
            let (transport, inbox) = ChannelTransport::new(channels, index);
            let engine = Arc::new(PartyEngine::new(scheme.clone(), index, Box::new(transport)));
            pumps.push(engine.clone().spawn_pump(inbox));
            parties.push(engine);
        }

        Self { parties, pumps }
    }

    /// All engines, ordered by party index.
    pub fn parties(&self) -> &[Arc<PartyEngine>] {
        &self.parties
    }

    /// Engine of the party with the given 1-based index.
    pub fn party(&self, index: usize) -> &Arc<PartyEngine> {
        &self.parties[index - 1]
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

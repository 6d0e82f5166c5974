use std::collections::VecDeque;

use crate::tcp_wire::BlockInfo;

/// Lifecycle of the connection with a remote peer.
#[derive(Clone, Default, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opening the TCP connection.
    #[default]
    Connecting,

    /// Our handshake is sent, waiting for theirs.
    Handshaking,

    /// Handshakes exchanged, core messages flow.
    Ready,
}

/// Request bookkeeping of a peer session.
///
/// Blocks move from `pending` to `inflight` when requested, and leave
/// `inflight` when the peer sends them.
#[derive(Debug)]
pub struct Session {
    pub connection: ConnectionState,

    /// If the peer is choking us, no requests are sent.
    pub peer_choking: bool,

    /// Maximum number of block requests in flight.
    pub pipelining: usize,

    /// Blocks of reserved pieces not requested yet.
    pub pending: VecDeque<BlockInfo>,

    /// Blocks requested and not received yet.
    pub inflight: Vec<BlockInfo>,

    /// Pieces the disk reserved for this session that still have blocks to
    /// receive.
    pub reserved: Vec<usize>,
}

impl Session {
    pub fn new(pipelining: usize) -> Self {
        Self {
            connection: ConnectionState::default(),
            peer_choking: true,
            pipelining: pipelining.max(1),
            pending: VecDeque::new(),
            inflight: Vec::new(),
            reserved: Vec::new(),
        }
    }

    #[inline]
    pub fn outstanding(&self) -> usize {
        self.inflight.len()
    }

    pub fn can_request(&self) -> bool {
        self.connection == ConnectionState::Ready
            && !self.peer_choking
            && self.outstanding() < self.pipelining
    }

    /// A choking peer discards our requests. Put them back in front of the
    /// queue, in their original order.
    pub fn requeue_inflight(&mut self) {
        for block_info in self.inflight.drain(..).rev() {
            self.pending.push_front(block_info);
        }
    }

    /// Account for a block received from the peer.
    ///
    /// Returns `false` if we never requested it. When it was the last block
    /// of its piece, the piece is no longer ours to release.
    pub fn block_received(&mut self, block_info: &BlockInfo) -> bool {
        let Some(pos) = self.inflight.iter().position(|b| b == block_info) else {
            return false;
        };
        self.inflight.remove(pos);

        let index = block_info.index;
        let piece_done = !self.inflight.iter().any(|b| b.index == index)
            && !self.pending.iter().any(|b| b.index == index);

        if piece_done {
            self.reserved.retain(|&p| p != index as usize);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(pipelining: usize) -> Session {
        let mut session = Session::new(pipelining);
        session.connection = ConnectionState::Ready;
        session.peer_choking = false;
        session
    }

    #[test]
    fn can_request() {
        let mut session = Session::new(1);
        assert!(!session.can_request());

        session.connection = ConnectionState::Ready;
        assert!(!session.can_request());

        session.peer_choking = false;
        assert!(session.can_request());

        session.inflight.push(BlockInfo::new());
        assert!(!session.can_request());
    }

    #[test]
    fn choke_requeues_in_order() {
        let mut session = ready(5);
        session.pending.push_back(BlockInfo::new().index(1));
        session.inflight.push(BlockInfo::new().begin(0));
        session.inflight.push(BlockInfo::new().begin(16384));

        session.requeue_inflight();

        assert!(session.inflight.is_empty());
        assert_eq!(
            session.pending.iter().cloned().collect::<Vec<_>>(),
            vec![
                BlockInfo::new().begin(0),
                BlockInfo::new().begin(16384),
                BlockInfo::new().index(1),
            ]
        );
    }

    #[test]
    fn last_block_frees_the_piece() {
        let mut session = ready(5);
        session.reserved.push(3);
        session.inflight.push(BlockInfo::new().index(3).begin(0));
        session.pending.push_back(BlockInfo::new().index(3).begin(16384));

        assert!(!session.block_received(&BlockInfo::new().index(9)));

        assert!(session.block_received(&BlockInfo::new().index(3).begin(0)));
        assert_eq!(session.reserved, vec![3]);

        let next = session.pending.pop_front().unwrap();
        session.inflight.push(next.clone());
        assert!(session.block_received(&next));
        assert!(session.reserved.is_empty());
    }
}

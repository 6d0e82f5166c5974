//! Piece bookkeeping and the rarest-first picker.
//!
//! The [`PieceManager`] is owned by the [`crate::disk`] actor, every peer
//! asks the actor for work, so selection and reservation happen one message
//! at a time and two peers can never be handed the same piece.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::{
    bitfield::{Bitfield, RltBitfield},
    error::Error,
    selection::{Selection, Selections},
};

#[derive(Debug)]
pub struct PieceManager {
    /// Reserved or verified. A piece with this bit set is never selected.
    have: Bitfield,

    /// Hash checked and written to disk.
    verified: Bitfield,

    /// How many peers announced each piece. Never decremented.
    availability: Vec<u32>,

    /// When each piece was reserved, `None` when not reserved.
    reserved_at: Vec<Option<Instant>>,

    /// Piece ranges fetched before the global pick.
    selections: Selections,
}

impl PieceManager {
    pub fn new(total: usize) -> Self {
        Self {
            have: Bitfield::from_piece(total),
            verified: Bitfield::from_piece(total),
            availability: vec![0; total],
            reserved_at: vec![None; total],
            selections: Selections::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.availability.len()
    }

    /// A peer announced that it has piece `index`.
    pub fn mark_seen(&mut self, index: usize) {
        if let Some(a) = self.availability.get_mut(index) {
            *a = a.saturating_add(1);
        }
    }

    pub fn mark_seen_bitfield(&mut self, pieces: &Bitfield) {
        for index in pieces.iter_ones() {
            self.mark_seen(index);
        }
    }

    /// Pick and reserve the next piece to download from any peer.
    pub fn select_next(&mut self) -> Option<usize> {
        self.select_next_from(None)
    }

    /// Pick and reserve the next piece to download from a peer that has
    /// `peer_pieces`.
    ///
    /// Selections are tried first, highest priority first, then every piece.
    /// Within a range the piece with the lowest availability wins, ties go to
    /// the lowest index. A piece nobody announced counts as the most
    /// available one, it stays selectable but is never preferred.
    ///
    /// A peer that did not announce anything is treated as having it all.
    pub fn select_next_from(&mut self, peer_pieces: Option<&Bitfield>) -> Option<usize> {
        let peer_pieces = peer_pieces.filter(|p| p.any());
        let total = self.total();

        if total == 0 {
            return None;
        }

        self.selections.sort_by(|a, b| b.priority.cmp(&a.priority));

        let from_selection = self
            .selections
            .iter()
            .filter(|s| s.from < total)
            .find_map(|s| self.rarest(s.from..=s.to.min(total - 1), peer_pieces));

        let index = from_selection.or_else(|| self.rarest(0..=total - 1, peer_pieces))?;

        self.reserve(index);
        Some(index)
    }

    fn rarest(
        &self,
        range: std::ops::RangeInclusive<usize>,
        peer_pieces: Option<&Bitfield>,
    ) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;

        for index in range {
            if self.have[index] {
                continue;
            }
            if let Some(peer) = peer_pieces {
                if !peer.safe_get(index) {
                    continue;
                }
            }

            let a = match self.availability[index] {
                0 => u64::MAX,
                a => a as u64,
            };

            if best.map_or(true, |(_, b)| a < b) {
                best = Some((index, a));
            }
        }

        best.map(|(index, _)| index)
    }

    fn reserve(&mut self, index: usize) {
        self.have.set(index, true);
        self.reserved_at[index] = Some(Instant::now());
    }

    /// The piece passed its hash check.
    ///
    /// Selections whose every piece is now verified are dropped and their
    /// callback runs. Returns `false` if the piece was already verified.
    pub fn mark_verified(&mut self, index: usize) -> bool {
        if index >= self.total() || self.verified[index] {
            return false;
        }

        self.have.set(index, true);
        self.verified.set(index, true);
        self.reserved_at[index] = None;

        self.drain_satisfied();
        true
    }

    fn drain_satisfied(&mut self) {
        let total = self.total();
        let verified = &self.verified;
        let mut cursor = self.selections.cursor();

        while let Some(s) = cursor.next() {
            let to = s.to.min(total.saturating_sub(1));
            let done = s.from <= to && verified[s.from..=to].all();

            if done {
                if let Some(removed) = cursor.remove_current() {
                    debug!("selection {}..={} done", removed.from, removed.to);
                    if let Some(notify) = removed.notify {
                        notify();
                    }
                }
            }
        }
    }

    /// Put a reserved piece back in the pool. No-op if it is verified.
    pub fn reset(&mut self, index: usize) {
        if index >= self.total() || self.verified[index] {
            return;
        }
        self.have.set(index, false);
        self.reserved_at[index] = None;
    }

    pub fn release(&mut self, pieces: &[usize]) {
        for &index in pieces {
            self.reset(index);
        }
    }

    /// Reset every piece reserved for longer than `timeout`.
    pub fn expire(&mut self, timeout: Duration) -> Vec<usize> {
        self.expire_at(Instant::now(), timeout)
    }

    fn expire_at(&mut self, now: Instant, timeout: Duration) -> Vec<usize> {
        let expired: Vec<usize> = self
            .reserved_at
            .iter()
            .enumerate()
            .filter_map(|(index, at)| {
                let at = (*at)?;
                (now.saturating_duration_since(at) > timeout).then_some(index)
            })
            .collect();

        self.release(&expired);
        expired
    }

    /// Prioritize a range of pieces.
    ///
    /// # Errors
    ///
    /// The interval must be valid and end inside the torrent.
    pub fn select(&mut self, selection: Selection) -> Result<(), Error> {
        if selection.from <= selection.to && selection.to >= self.total() {
            return Err(Error::SelectionOutOfRange {
                to: selection.to,
                total: self.total(),
            });
        }
        self.selections.insert(selection)?;
        self.drain_satisfied();
        Ok(())
    }

    pub fn deselect(&mut self, selection: &Selection) {
        self.selections.remove(selection);
    }

    pub fn selections(&self) -> &Selections {
        &self.selections
    }

    pub fn is_verified(&self, index: usize) -> bool {
        self.verified.get(index).map(|b| *b).unwrap_or(false)
    }

    pub fn is_reserved(&self, index: usize) -> bool {
        self.reserved_at.get(index).is_some_and(|at| at.is_some())
    }

    pub fn pieces_done(&self) -> usize {
        self.verified.count_ones()
    }

    pub fn is_complete(&self) -> bool {
        self.verified.all()
    }
}

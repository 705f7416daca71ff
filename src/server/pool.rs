use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use mio::Token;
use mio::net::TcpStream;

use crate::http::connection::Connection;

/// Handle to a pool slot. Doubles as the poll token for the slot's socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(usize);

impl ConnId {
    pub fn index(self) -> usize {
        self.0
    }

    pub fn token(self) -> Token {
        Token(self.0)
    }
}

impl From<Token> for ConnId {
    fn from(token: Token) -> Self {
        ConnId(token.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Active,
}

/// Returned by `acquire` when every slot is taken. Hands the socket back so the
/// caller decides how to drop it.
pub struct PoolExhausted<S>(pub S);

impl<S> fmt::Debug for PoolExhausted<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PoolExhausted")
    }
}

struct Slot<S> {
    state: SlotState,
    conn: Connection<S>,
}

/// Fixed-capacity arena of connection records.
///
/// All records are allocated once, up front. Free slots sit in a FIFO index queue;
/// active ones are found by scanning the slot array, which stays cheap because the
/// capacity is small.
pub struct ConnectionPool<S = TcpStream> {
    slots: Box<[Slot<S>]>,
    free: VecDeque<usize>,
    active_count: usize,
}

impl<S> ConnectionPool<S> {
    pub fn new(capacity: usize, request_buffer_size: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| Slot {
                state: SlotState::Free,
                conn: Connection::vacant(i, request_buffer_size),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            free: (0..capacity).collect(),
            active_count: 0,
        }
    }

    /// O(1): moves a free slot to active and attaches `stream` to it.
    pub fn acquire(
        &mut self,
        stream: S,
        peer: SocketAddr,
        now: Instant,
    ) -> Result<ConnId, PoolExhausted<S>> {
        let Some(index) = self.free.pop_front() else {
            return Err(PoolExhausted(stream));
        };

        let slot = &mut self.slots[index];
        slot.state = SlotState::Active;
        slot.conn.attach(stream, peer, now);
        self.active_count += 1;
        Ok(ConnId(index))
    }

    /// Closes the slot's socket and open file and returns it to the free queue.
    ///
    /// Releasing a free or unknown handle is a no-op and returns `false`.
    pub fn release(&mut self, id: ConnId) -> bool {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return false;
        };
        if slot.state == SlotState::Free {
            return false;
        }

        drop(slot.conn.detach());
        slot.state = SlotState::Free;
        self.free.push_back(id.0);
        self.active_count -= 1;
        true
    }

    /// Releases every active slot. Returns how many were released.
    pub fn release_all(&mut self) -> usize {
        let ids: Vec<ConnId> = self.active_ids().collect();
        ids.into_iter().filter(|&id| self.release(id)).count()
    }

    pub fn get(&self, id: ConnId) -> Option<&Connection<S>> {
        self.slots
            .get(id.0)
            .filter(|slot| slot.state == SlotState::Active)
            .map(|slot| &slot.conn)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection<S>> {
        self.slots
            .get_mut(id.0)
            .filter(|slot| slot.state == SlotState::Active)
            .map(|slot| &mut slot.conn)
    }

    pub fn state(&self, id: ConnId) -> Option<SlotState> {
        self.slots.get(id.0).map(|slot| slot.state)
    }

    pub fn active_ids(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == SlotState::Active)
            .map(|(i, _)| ConnId(i))
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }
}

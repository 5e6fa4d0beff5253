//! Reset coordination for parts whose DMA channels share one reset line.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config::DmaChannel;
use crate::hal::{DmaWorkaround, ResetWaker};

struct State<const CHANNELS: usize> {
    busy: [bool; CHANNELS],
    /// Requesters waiting for a deferred reset, by channel.
    pending: [Option<ResetWaker>; CHANNELS],
}

impl<const CHANNELS: usize> State<CHANNELS> {
    /// A channel mid-transfer that has not asked for the reset itself.
    /// Requesters may still be flagged busy until their interrupt marks
    /// them idle.
    fn blocked(&self, except: Option<DmaChannel>) -> bool {
        self.busy
            .iter()
            .zip(&self.pending)
            .enumerate()
            .any(|(n, (busy, pending))| {
                *busy
                    && pending.is_none()
                    && except.is_none_or(|c| c.0 as usize != n)
            })
    }

    fn has_pending(&self) -> bool {
        self.pending.iter().any(Option::is_some)
    }

    fn take_pending(&mut self) -> [Option<ResetWaker>; CHANNELS] {
        core::mem::replace(&mut self.pending, [const { None }; CHANNELS])
    }
}

fn wake_all<const CHANNELS: usize>(wakers: [Option<ResetWaker>; CHANNELS]) {
    for waker in wakers.into_iter().flatten() {
        waker.wake();
    }
}

/// Serializes DMA module resets across `CHANNELS` channels.
///
/// A reset requested while another channel is mid-transfer is deferred
/// until every such channel goes idle. One reset then serves all deferred
/// requesters, which are woken through their [`ResetWaker`]s. Place one in
/// a `static` and hand it to every session on the part.
pub struct DmaResetCoordinator<M: RawMutex, const CHANNELS: usize> {
    state: Mutex<M, RefCell<State<CHANNELS>>>,
    reset: fn(),
}

impl<M: RawMutex, const CHANNELS: usize> DmaResetCoordinator<M, CHANNELS> {
    /// `reset` performs the actual module reset.
    pub const fn new(reset: fn()) -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                busy: [false; CHANNELS],
                pending: [const { None }; CHANNELS],
            })),
            reset,
        }
    }

    /// Whether `channel` is marked as mid-transfer.
    pub fn is_busy(&self, channel: DmaChannel) -> bool {
        self.state.lock(|state| {
            state
                .borrow()
                .busy
                .get(channel.0 as usize)
                .copied()
                .unwrap_or(false)
        })
    }
}

impl<M, const CHANNELS: usize> DmaWorkaround for DmaResetCoordinator<M, CHANNELS>
where
    M: RawMutex + Sync,
{
    fn mark_transfer_active(&self, channel: DmaChannel) {
        self.state.lock(|state| {
            if let Some(busy) =
                state.borrow_mut().busy.get_mut(channel.0 as usize)
            {
                *busy = true;
            }
        })
    }

    fn mark_idle(&self, channel: DmaChannel) {
        let woken = self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if let Some(busy) = state.busy.get_mut(channel.0 as usize) {
                *busy = false;
            }
            if !state.has_pending() || state.blocked(None) {
                return None;
            }
            (self.reset)();
            Some(state.take_pending())
        });

        if let Some(wakers) = woken {
            debug!("dma channel {}: deferred reset done", channel.0);
            wake_all(wakers);
        }
    }

    fn request_reset(&self, channel: DmaChannel, on_done: ResetWaker) -> bool {
        let woken = self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let blocked = state.blocked(Some(channel));
            match state.pending.get_mut(channel.0 as usize) {
                Some(slot) if blocked => {
                    debug!("dma channel {}: reset deferred", channel.0);
                    *slot = Some(on_done);
                    None
                }
                _ => {
                    (self.reset)();
                    // This reset also covers every deferred request.
                    Some(state.take_pending())
                }
            }
        });

        match woken {
            Some(wakers) => {
                wake_all(wakers);
                true
            }
            None => false,
        }
    }

    fn reset_in_progress(&self) -> bool {
        self.state.lock(|state| state.borrow().has_pending())
    }
}

//! Return path for objects the audio side lets go of.
//!
//! Dropping a boxed effect, or the last reference to a mixer, frees memory,
//! and the render thread must not do that. It hands them to a bounded queue
//! instead, which the control side empties whenever it next sends commands.

use crossbeam_channel::{Receiver, Sender};

use super::effect::Effect;
use super::mixer::SharedMixer;

/// Something released on the audio side, to be dropped elsewhere.
pub enum Retired {
    Effect(Box<dyn Effect>),
    /// A spent command buffer, possibly still holding effects.
    Effects(Vec<Box<dyn Effect>>),
    Mixer(SharedMixer),
}

/// Audio-side end.
#[derive(Debug, Clone)]
pub struct Retirer(Sender<Retired>);

/// Control-side end.
#[derive(Debug, Clone)]
pub struct RetiredBin(Receiver<Retired>);

/// A retire queue holding at most `capacity` pending items.
pub fn channel(capacity: usize) -> (Retirer, RetiredBin) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (Retirer(tx), RetiredBin(rx))
}

impl Retirer {
    /// Queue `item` for release. When the queue is full the item is
    /// dropped in place and `false` is returned.
    pub fn retire(&self, item: Retired) -> bool {
        self.0.try_send(item).is_ok()
    }
}

impl RetiredBin {
    /// Drop everything retired so far. Returns how many items were freed.
    pub fn empty(&self) -> usize {
        self.0.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

//! GUI-originated parameter edits.
//!
//! The plugin's edit controller reports user tweaks through
//! `IComponentHandler`. Those land in a bounded FIFO the controller drains
//! with get-param-changes; when the controller polls too slowly the oldest
//! edits are overwritten so the queue always holds the freshest history.

use parking_lot::Mutex;
use plugbridge::protocol::ParamValue;
use ringbuf::{traits::*, HeapRb};
use std::sync::Arc;
use vst3::Steinberg::Vst::{IComponentHandler, IComponentHandlerTrait};
use vst3::Steinberg::{self, kResultOk};
use vst3::Class;

/// Queue capacity. Edits beyond this between polls overwrite the oldest.
const EDIT_QUEUE_CAPACITY: usize = 256;

/// Bounded FIFO of parameter edits, oldest first.
#[derive(Clone)]
pub struct ParamEditQueue {
    queue: Arc<Mutex<HeapRb<ParamValue>>>,
}

impl ParamEditQueue {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(HeapRb::new(EDIT_QUEUE_CAPACITY))),
        }
    }

    pub fn push(&self, edit: ParamValue) {
        let dropped = self.queue.lock().push_overwrite(edit);
        if dropped.is_some() {
            tracing::trace!(param_id = edit.param_id, "edit queue full, dropping oldest");
        }
    }

    /// Drain everything, oldest first.
    pub fn drain(&self) -> Vec<ParamValue> {
        let mut queue = self.queue.lock();
        let mut edits = Vec::with_capacity(queue.occupied_len());
        while let Some(edit) = queue.try_pop() {
            edits.push(edit);
        }
        edits
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Default for ParamEditQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// `IComponentHandler` given to the edit controller. `performEdit` feeds the
/// queue; begin/end edit gestures carry no value and are acknowledged only.
pub struct EditComponentHandler {
    edits: ParamEditQueue,
}

impl EditComponentHandler {
    pub fn new(edits: ParamEditQueue) -> Self {
        Self { edits }
    }
}

impl Class for EditComponentHandler {
    type Interfaces = (IComponentHandler,);
}

impl IComponentHandlerTrait for EditComponentHandler {
    unsafe fn beginEdit(&self, _id: vst3::Steinberg::Vst::ParamID) -> Steinberg::tresult {
        kResultOk
    }

    unsafe fn performEdit(
        &self,
        id: vst3::Steinberg::Vst::ParamID,
        value_normalized: vst3::Steinberg::Vst::ParamValue,
    ) -> Steinberg::tresult {
        self.edits.push(ParamValue {
            param_id: id,
            value: value_normalized,
        });
        kResultOk
    }

    unsafe fn endEdit(&self, _id: vst3::Steinberg::Vst::ParamID) -> Steinberg::tresult {
        kResultOk
    }

    unsafe fn restartComponent(&self, flags: Steinberg::int32) -> Steinberg::tresult {
        tracing::debug!(flags, "plugin requested restart (ignored)");
        kResultOk
    }
}

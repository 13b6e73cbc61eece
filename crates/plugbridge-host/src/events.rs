//! Raw MIDI to VST3 event conversion.
//!
//! The wire carries bare status/data1/data2 triples; the plugin wants typed
//! `Event` structs on an `IEventList`. Conversion happens when events are
//! queued, so process-time work is just handing the list pointer over.

use plugbridge::protocol::MidiEventRec;
use smallvec::SmallVec;
use std::cell::UnsafeCell;
use vst3::Steinberg::Vst::Event_::EventTypes_::{
    kNoteOffEvent, kNoteOnEvent, kPolyPressureEvent,
};
use vst3::Steinberg::Vst::{
    Event, Event__type0, IEventList, IEventListTrait, NoteOffEvent, NoteOnEvent,
    PolyPressureEvent,
};
use vst3::Steinberg::{self, kResultFalse, kResultOk};
use vst3::Class;

/// Per-block event capacity. Overflow past this is dropped silently; a
/// controller sending more than this per block is misbehaving.
pub const MAX_BLOCK_EVENTS: usize = 128;

fn make_note_on(channel: i16, pitch: i16, velocity: f32, sample_offset: i32) -> Event {
    Event {
        busIndex: 0,
        sampleOffset: sample_offset,
        ppqPosition: 0.0,
        flags: 0,
        r#type: kNoteOnEvent as u16,
        __field0: Event__type0 {
            noteOn: NoteOnEvent {
                channel,
                pitch,
                tuning: 0.0,
                velocity,
                length: 0,
                noteId: -1,
            },
        },
    }
}

fn make_note_off(channel: i16, pitch: i16, velocity: f32, sample_offset: i32) -> Event {
    Event {
        busIndex: 0,
        sampleOffset: sample_offset,
        ppqPosition: 0.0,
        flags: 0,
        r#type: kNoteOffEvent as u16,
        __field0: Event__type0 {
            noteOff: NoteOffEvent {
                channel,
                pitch,
                velocity,
                noteId: -1,
                tuning: 0.0,
            },
        },
    }
}

fn make_poly_pressure(channel: i16, pitch: i16, pressure: f32, sample_offset: i32) -> Event {
    Event {
        busIndex: 0,
        sampleOffset: sample_offset,
        ppqPosition: 0.0,
        flags: 0,
        r#type: kPolyPressureEvent as u16,
        __field0: Event__type0 {
            polyPressure: PolyPressureEvent {
                channel,
                pitch,
                pressure,
                noteId: -1,
            },
        },
    }
}

/// Classify one raw MIDI record. Note-on with velocity zero is a note-off,
/// per the MIDI running-status convention. Unsupported status bytes are
/// dropped, not errors.
pub fn convert_midi(rec: &MidiEventRec) -> Option<Event> {
    let channel = (rec.status & 0x0F) as i16;
    let pitch = rec.data1 as i16;
    let offset = rec.sample_offset as i32;
    match rec.status & 0xF0 {
        0x90 if rec.data2 > 0 => Some(make_note_on(channel, pitch, rec.data2 as f32 / 127.0, offset)),
        0x90 | 0x80 => Some(make_note_off(channel, pitch, rec.data2 as f32 / 127.0, offset)),
        0xA0 => Some(make_poly_pressure(channel, pitch, rec.data2 as f32 / 127.0, offset)),
        _ => None,
    }
}

/// Events queued between send-midi and the next process-audio call.
#[derive(Default)]
pub struct PendingEvents {
    events: SmallVec<[Event; 16]>,
}

impl PendingEvents {
    pub fn push(&mut self, rec: &MidiEventRec) {
        let Some(event) = convert_midi(rec) else {
            return;
        };
        if self.events.len() >= MAX_BLOCK_EVENTS {
            tracing::trace!(status = rec.status, "event queue full, dropping");
            return;
        }
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Move everything into the process-time list.
    pub fn drain_into(&mut self, list: &HostEventList) {
        list.replace(self.events.drain(..));
    }
}

/// `IEventList` handed to the plugin each process call. The plugin only
/// reads; `addEvent` is for output event lists, which the bridge does not
/// collect.
pub struct HostEventList {
    events: UnsafeCell<Vec<Event>>,
}

impl HostEventList {
    pub fn new() -> Self {
        Self {
            events: UnsafeCell::new(Vec::with_capacity(MAX_BLOCK_EVENTS)),
        }
    }

    fn replace(&self, events: impl Iterator<Item = Event>) {
        // Single-threaded dispatcher; never aliased with a plugin callback.
        let slot = unsafe { &mut *self.events.get() };
        slot.clear();
        slot.extend(events);
    }

    pub fn clear(&self) {
        unsafe { &mut *self.events.get() }.clear();
    }
}

impl Class for HostEventList {
    type Interfaces = (IEventList,);
}

impl IEventListTrait for HostEventList {
    unsafe fn getEventCount(&self) -> Steinberg::int32 {
        unsafe { (*self.events.get()).len() as Steinberg::int32 }
    }

    unsafe fn getEvent(&self, index: Steinberg::int32, e: *mut Event) -> Steinberg::tresult {
        unsafe {
            let events = &*self.events.get();
            if let Some(event) = events.get(index as usize) {
                *e = *event;
                kResultOk
            } else {
                kResultFalse
            }
        }
    }

    unsafe fn addEvent(&self, _e: *mut Event) -> Steinberg::tresult {
        kResultFalse
    }
}

//! In-process fake plugin factory for exercising the session and server
//! without a real module on disk.
//!
//! The fake is a single-component plugin: one COM object implementing
//! `IComponent`, `IAudioProcessor`, and `IEditController`. It applies a gain
//! parameter to its input so processing is observable, and records lifecycle
//! transitions in shared counters so tests can assert teardown really
//! happened.

use std::cell::Cell;
use std::ffi::{c_char, c_void};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use vst3::Steinberg::Vst::{
    AudioBusBuffers, BusDirections_, BusInfo, IAudioProcessor, IAudioProcessorTrait, IComponent,
    IComponentHandler, IComponentTrait, IEditController, IEditControllerTrait,
    IEventListTrait as _, IParamValueQueueTrait as _, IParameterChangesTrait as _, IoMode,
    MediaTypes_, ParameterInfo, ProcessData, ProcessSetup, RoutingInfo, SpeakerArrangement,
    String128, TChar,
};
use vst3::Steinberg::{
    int32, kInvalidArgument, kNotImplemented, kResultFalse, kResultOk, tresult, FIDString,
    FUnknown, IBStream, IBStreamTrait as _, IPluginBaseTrait, IPluginFactory, IPluginFactoryTrait,
    IPlugView, PClassInfo, PFactoryInfo, TBool, TUID,
};
use vst3::{Class, ComPtr, ComWrapper};

pub const FAKE_COMPONENT_CID: TUID = [0x11; 16];
/// Controller class id `FakeSplit` advertises; no factory can create it.
pub const MISSING_CONTROLLER_CID: TUID = [0x33; 16];
pub const FAKE_GAIN_PARAM_ID: u32 = 7;

/// Lifecycle counters shared between a fake and the test that owns it.
#[derive(Default)]
pub struct FakeStats {
    pub dropped: AtomicBool,
    pub initialized: AtomicBool,
    pub terminated: AtomicBool,
    pub active: AtomicBool,
    pub processing: AtomicBool,
    pub process_calls: AtomicUsize,
    pub last_event_count: AtomicUsize,
    /// When set, `IPluginBase::initialize` fails, aborting a load mid-chain.
    pub fail_initialize: AtomicBool,
}

fn copy_str(s: &str, dest: &mut [c_char]) {
    let len = s.len().min(dest.len() - 1);
    for (i, b) in s.as_bytes()[..len].iter().enumerate() {
        dest[i] = *b as c_char;
    }
    dest[len] = 0;
}

fn copy_str16(s: &str, dest: &mut [TChar]) {
    let mut i = 0;
    for ch in s.encode_utf16().take(dest.len() - 1) {
        dest[i] = ch as TChar;
        i += 1;
    }
    dest[i] = 0;
}

pub struct FakePlugin {
    stats: Arc<FakeStats>,
    gain: Cell<f64>,
}

// SAFETY: tests drive the fake from one thread at a time.
unsafe impl Send for FakePlugin {}
unsafe impl Sync for FakePlugin {}

impl Drop for FakePlugin {
    fn drop(&mut self) {
        self.stats.dropped.store(true, Ordering::SeqCst);
    }
}

impl Class for FakePlugin {
    type Interfaces = (IComponent, IAudioProcessor, IEditController);
}

impl IPluginBaseTrait for FakePlugin {
    unsafe fn initialize(&self, _context: *mut FUnknown) -> tresult {
        if self.stats.fail_initialize.load(Ordering::SeqCst) {
            return kResultFalse;
        }
        self.stats.initialized.store(true, Ordering::SeqCst);
        kResultOk
    }

    unsafe fn terminate(&self) -> tresult {
        self.stats.terminated.store(true, Ordering::SeqCst);
        kResultOk
    }
}

impl IComponentTrait for FakePlugin {
    unsafe fn getControllerClassId(&self, _class_id: *mut TUID) -> tresult {
        // Single-component: the host finds IEditController by cast.
        kResultFalse
    }

    unsafe fn setIoMode(&self, _mode: IoMode) -> tresult {
        kResultOk
    }

    unsafe fn getBusCount(
        &self,
        media_type: vst3::Steinberg::Vst::MediaType,
        _dir: vst3::Steinberg::Vst::BusDirection,
    ) -> i32 {
        if media_type == MediaTypes_::kAudio as i32 {
            1
        } else {
            0
        }
    }

    unsafe fn getBusInfo(
        &self,
        media_type: vst3::Steinberg::Vst::MediaType,
        dir: vst3::Steinberg::Vst::BusDirection,
        index: int32,
        bus: *mut BusInfo,
    ) -> tresult {
        if media_type != MediaTypes_::kAudio as i32 || index != 0 || bus.is_null() {
            return kInvalidArgument;
        }
        let bus = unsafe { &mut *bus };
        bus.mediaType = media_type;
        bus.direction = dir;
        bus.channelCount = 2;
        let name = if dir == BusDirections_::kInput as i32 {
            "Input"
        } else {
            "Output"
        };
        copy_str16(name, &mut bus.name);
        kResultOk
    }

    unsafe fn getRoutingInfo(
        &self,
        _in_info: *mut RoutingInfo,
        _out_info: *mut RoutingInfo,
    ) -> tresult {
        kNotImplemented
    }

    unsafe fn activateBus(
        &self,
        _media_type: vst3::Steinberg::Vst::MediaType,
        _dir: vst3::Steinberg::Vst::BusDirection,
        _index: int32,
        _state: TBool,
    ) -> tresult {
        kResultOk
    }

    unsafe fn setActive(&self, state: TBool) -> tresult {
        self.stats.active.store(state != 0, Ordering::SeqCst);
        kResultOk
    }

    // Component state is the gain value as 8 little-endian bytes.
    unsafe fn setState(&self, state: *mut IBStream) -> tresult {
        let Some(stream) = (unsafe { vst3::ComRef::from_raw(state) }) else {
            return kInvalidArgument;
        };
        let mut bytes = [0u8; 8];
        let mut read = 0;
        let result = unsafe {
            stream.read(
                bytes.as_mut_ptr() as *mut c_void,
                bytes.len() as int32,
                &mut read,
            )
        };
        if result != kResultOk || read != bytes.len() as int32 {
            return kResultFalse;
        }
        self.gain.set(f64::from_le_bytes(bytes));
        kResultOk
    }

    unsafe fn getState(&self, state: *mut IBStream) -> tresult {
        let Some(stream) = (unsafe { vst3::ComRef::from_raw(state) }) else {
            return kInvalidArgument;
        };
        let bytes = self.gain.get().to_le_bytes();
        let mut written = 0;
        let result = unsafe {
            stream.write(
                bytes.as_ptr() as *mut c_void,
                bytes.len() as int32,
                &mut written,
            )
        };
        if result != kResultOk || written != bytes.len() as int32 {
            return kResultFalse;
        }
        kResultOk
    }
}

impl IAudioProcessorTrait for FakePlugin {
    unsafe fn setBusArrangements(
        &self,
        _inputs: *mut SpeakerArrangement,
        _num_ins: int32,
        _outputs: *mut SpeakerArrangement,
        _num_outs: int32,
    ) -> tresult {
        kResultOk
    }

    unsafe fn getBusArrangement(
        &self,
        _dir: vst3::Steinberg::Vst::BusDirection,
        _index: int32,
        _arr: *mut SpeakerArrangement,
    ) -> tresult {
        kNotImplemented
    }

    unsafe fn canProcessSampleSize(&self, _symbolic_sample_size: int32) -> tresult {
        kResultOk
    }

    unsafe fn getLatencySamples(&self) -> u32 {
        0
    }

    unsafe fn setupProcessing(&self, _setup: *mut ProcessSetup) -> tresult {
        kResultOk
    }

    unsafe fn setProcessing(&self, state: TBool) -> tresult {
        self.stats.processing.store(state != 0, Ordering::SeqCst);
        kResultOk
    }

    unsafe fn process(&self, data: *mut ProcessData) -> tresult {
        if data.is_null() {
            return kInvalidArgument;
        }
        let data = unsafe { &mut *data };
        self.stats.process_calls.fetch_add(1, Ordering::SeqCst);

        // Apply any queued input parameter changes before processing.
        if let Some(changes) = unsafe { vst3::ComRef::from_raw(data.inputParameterChanges) } {
            let count = unsafe { changes.getParameterCount() };
            for i in 0..count {
                let queue_ptr = unsafe { changes.getParameterData(i) };
                let Some(queue) = (unsafe { vst3::ComRef::from_raw(queue_ptr) }) else {
                    continue;
                };
                if unsafe { queue.getParameterId() } != FAKE_GAIN_PARAM_ID {
                    continue;
                }
                let point_count = unsafe { queue.getPointCount() };
                if point_count > 0 {
                    let mut offset = 0;
                    let mut value = 0.0;
                    if unsafe { queue.getPoint(point_count - 1, &mut offset, &mut value) }
                        == kResultOk
                    {
                        self.gain.set(value);
                    }
                }
            }
        }

        if let Some(events) = unsafe { vst3::ComRef::from_raw(data.inputEvents) } {
            let count = unsafe { events.getEventCount() };
            self.stats
                .last_event_count
                .store(count.max(0) as usize, Ordering::SeqCst);
        }

        let gain = self.gain.get() as f32;
        let frames = data.numSamples as usize;
        if data.numInputs > 0 && data.numOutputs > 0 {
            let input: &AudioBusBuffers = unsafe { &*data.inputs };
            let output: &AudioBusBuffers = unsafe { &*data.outputs };
            let channels = input.numChannels.min(output.numChannels).max(0) as usize;
            for ch in 0..channels {
                unsafe {
                    let src = *input.__field0.channelBuffers32.add(ch);
                    let dst = *output.__field0.channelBuffers32.add(ch);
                    for i in 0..frames {
                        *dst.add(i) = *src.add(i) * gain;
                    }
                }
            }
        }
        kResultOk
    }

    unsafe fn getTailSamples(&self) -> u32 {
        0
    }
}

impl IEditControllerTrait for FakePlugin {
    unsafe fn setComponentState(&self, _state: *mut IBStream) -> tresult {
        kResultOk
    }

    unsafe fn setState(&self, _state: *mut IBStream) -> tresult {
        kResultOk
    }

    unsafe fn getState(&self, _state: *mut IBStream) -> tresult {
        kResultOk
    }

    unsafe fn getParameterCount(&self) -> i32 {
        1
    }

    unsafe fn getParameterInfo(&self, param_index: int32, info: *mut ParameterInfo) -> tresult {
        if param_index != 0 || info.is_null() {
            return kInvalidArgument;
        }
        let info = unsafe { &mut *info };
        info.id = FAKE_GAIN_PARAM_ID;
        copy_str16("Gain", &mut info.title);
        copy_str16("Gain", &mut info.shortTitle);
        copy_str16("dB", &mut info.units);
        info.stepCount = 0;
        info.defaultNormalizedValue = 0.5;
        info.unitId = 0;
        info.flags = 1;
        kResultOk
    }

    unsafe fn getParamStringByValue(
        &self,
        _id: u32,
        _value_normalized: f64,
        _string: *mut String128,
    ) -> tresult {
        kNotImplemented
    }

    unsafe fn getParamValueByString(
        &self,
        _id: u32,
        _string: *mut TChar,
        _value_normalized: *mut f64,
    ) -> tresult {
        kNotImplemented
    }

    unsafe fn normalizedParamToPlain(&self, _id: u32, value_normalized: f64) -> f64 {
        value_normalized
    }

    unsafe fn plainParamToNormalized(&self, _id: u32, plain_value: f64) -> f64 {
        plain_value
    }

    unsafe fn getParamNormalized(&self, id: u32) -> f64 {
        if id == FAKE_GAIN_PARAM_ID {
            self.gain.get()
        } else {
            0.0
        }
    }

    unsafe fn setParamNormalized(&self, id: u32, value: f64) -> tresult {
        if id != FAKE_GAIN_PARAM_ID {
            return kInvalidArgument;
        }
        self.gain.set(value);
        kResultOk
    }

    unsafe fn setComponentHandler(&self, _handler: *mut IComponentHandler) -> tresult {
        kResultOk
    }

    unsafe fn createView(&self, _name: *const c_char) -> *mut IPlugView {
        std::ptr::null_mut()
    }
}

/// Same plugin without `IAudioProcessor`, to exercise the host's
/// passthrough path.
pub struct FakeNoDsp {
    inner: FakePlugin,
}

// SAFETY: tests drive the fake from one thread at a time.
unsafe impl Send for FakeNoDsp {}
unsafe impl Sync for FakeNoDsp {}

impl Class for FakeNoDsp {
    type Interfaces = (IComponent, IEditController);
}

impl IPluginBaseTrait for FakeNoDsp {
    unsafe fn initialize(&self, context: *mut FUnknown) -> tresult {
        unsafe { self.inner.initialize(context) }
    }

    unsafe fn terminate(&self) -> tresult {
        unsafe { self.inner.terminate() }
    }
}

impl IComponentTrait for FakeNoDsp {
    unsafe fn getControllerClassId(&self, class_id: *mut TUID) -> tresult {
        unsafe { self.inner.getControllerClassId(class_id) }
    }

    unsafe fn setIoMode(&self, mode: IoMode) -> tresult {
        unsafe { self.inner.setIoMode(mode) }
    }

    unsafe fn getBusCount(
        &self,
        media_type: vst3::Steinberg::Vst::MediaType,
        dir: vst3::Steinberg::Vst::BusDirection,
    ) -> i32 {
        unsafe { self.inner.getBusCount(media_type, dir) }
    }

    unsafe fn getBusInfo(
        &self,
        media_type: vst3::Steinberg::Vst::MediaType,
        dir: vst3::Steinberg::Vst::BusDirection,
        index: int32,
        bus: *mut BusInfo,
    ) -> tresult {
        unsafe { self.inner.getBusInfo(media_type, dir, index, bus) }
    }

    unsafe fn getRoutingInfo(
        &self,
        in_info: *mut RoutingInfo,
        out_info: *mut RoutingInfo,
    ) -> tresult {
        unsafe { self.inner.getRoutingInfo(in_info, out_info) }
    }

    unsafe fn activateBus(
        &self,
        media_type: vst3::Steinberg::Vst::MediaType,
        dir: vst3::Steinberg::Vst::BusDirection,
        index: int32,
        state: TBool,
    ) -> tresult {
        unsafe { self.inner.activateBus(media_type, dir, index, state) }
    }

    unsafe fn setActive(&self, state: TBool) -> tresult {
        unsafe { IComponentTrait::setActive(&self.inner, state) }
    }

    unsafe fn setState(&self, state: *mut IBStream) -> tresult {
        unsafe { IComponentTrait::setState(&self.inner, state) }
    }

    unsafe fn getState(&self, state: *mut IBStream) -> tresult {
        unsafe { IComponentTrait::getState(&self.inner, state) }
    }
}

impl IEditControllerTrait for FakeNoDsp {
    unsafe fn setComponentState(&self, state: *mut IBStream) -> tresult {
        unsafe { self.inner.setComponentState(state) }
    }

    unsafe fn setState(&self, state: *mut IBStream) -> tresult {
        unsafe { IEditControllerTrait::setState(&self.inner, state) }
    }

    unsafe fn getState(&self, state: *mut IBStream) -> tresult {
        unsafe { IEditControllerTrait::getState(&self.inner, state) }
    }

    unsafe fn getParameterCount(&self) -> i32 {
        unsafe { self.inner.getParameterCount() }
    }

    unsafe fn getParameterInfo(&self, param_index: int32, info: *mut ParameterInfo) -> tresult {
        unsafe { self.inner.getParameterInfo(param_index, info) }
    }

    unsafe fn getParamStringByValue(
        &self,
        id: u32,
        value_normalized: f64,
        string: *mut String128,
    ) -> tresult {
        unsafe { self.inner.getParamStringByValue(id, value_normalized, string) }
    }

    unsafe fn getParamValueByString(
        &self,
        id: u32,
        string: *mut TChar,
        value_normalized: *mut f64,
    ) -> tresult {
        unsafe { self.inner.getParamValueByString(id, string, value_normalized) }
    }

    unsafe fn normalizedParamToPlain(&self, id: u32, value_normalized: f64) -> f64 {
        unsafe { self.inner.normalizedParamToPlain(id, value_normalized) }
    }

    unsafe fn plainParamToNormalized(&self, id: u32, plain_value: f64) -> f64 {
        unsafe { self.inner.plainParamToNormalized(id, plain_value) }
    }

    unsafe fn getParamNormalized(&self, id: u32) -> f64 {
        unsafe { self.inner.getParamNormalized(id) }
    }

    unsafe fn setParamNormalized(&self, id: u32, value: f64) -> tresult {
        unsafe { self.inner.setParamNormalized(id, value) }
    }

    unsafe fn setComponentHandler(&self, handler: *mut IComponentHandler) -> tresult {
        unsafe { self.inner.setComponentHandler(handler) }
    }

    unsafe fn createView(&self, name: *const c_char) -> *mut IPlugView {
        unsafe { self.inner.createView(name) }
    }
}

/// Component half of a split design. Its controller class id points at a
/// class the factory cannot instantiate, so a load fails after the
/// component is already initialized.
pub struct FakeSplit {
    inner: FakePlugin,
}

// SAFETY: tests drive the fake from one thread at a time.
unsafe impl Send for FakeSplit {}
unsafe impl Sync for FakeSplit {}

impl Class for FakeSplit {
    type Interfaces = (IComponent, IAudioProcessor);
}

impl IPluginBaseTrait for FakeSplit {
    unsafe fn initialize(&self, context: *mut FUnknown) -> tresult {
        unsafe { self.inner.initialize(context) }
    }

    unsafe fn terminate(&self) -> tresult {
        unsafe { self.inner.terminate() }
    }
}

impl IComponentTrait for FakeSplit {
    unsafe fn getControllerClassId(&self, class_id: *mut TUID) -> tresult {
        if class_id.is_null() {
            return kInvalidArgument;
        }
        unsafe { *class_id = MISSING_CONTROLLER_CID };
        kResultOk
    }

    unsafe fn setIoMode(&self, mode: IoMode) -> tresult {
        unsafe { self.inner.setIoMode(mode) }
    }

    unsafe fn getBusCount(
        &self,
        media_type: vst3::Steinberg::Vst::MediaType,
        dir: vst3::Steinberg::Vst::BusDirection,
    ) -> i32 {
        unsafe { self.inner.getBusCount(media_type, dir) }
    }

    unsafe fn getBusInfo(
        &self,
        media_type: vst3::Steinberg::Vst::MediaType,
        dir: vst3::Steinberg::Vst::BusDirection,
        index: int32,
        bus: *mut BusInfo,
    ) -> tresult {
        unsafe { self.inner.getBusInfo(media_type, dir, index, bus) }
    }

    unsafe fn getRoutingInfo(
        &self,
        in_info: *mut RoutingInfo,
        out_info: *mut RoutingInfo,
    ) -> tresult {
        unsafe { self.inner.getRoutingInfo(in_info, out_info) }
    }

    unsafe fn activateBus(
        &self,
        media_type: vst3::Steinberg::Vst::MediaType,
        dir: vst3::Steinberg::Vst::BusDirection,
        index: int32,
        state: TBool,
    ) -> tresult {
        unsafe { self.inner.activateBus(media_type, dir, index, state) }
    }

    unsafe fn setActive(&self, state: TBool) -> tresult {
        unsafe { IComponentTrait::setActive(&self.inner, state) }
    }

    unsafe fn setState(&self, state: *mut IBStream) -> tresult {
        unsafe { IComponentTrait::setState(&self.inner, state) }
    }

    unsafe fn getState(&self, state: *mut IBStream) -> tresult {
        unsafe { IComponentTrait::getState(&self.inner, state) }
    }
}

impl IAudioProcessorTrait for FakeSplit {
    unsafe fn setBusArrangements(
        &self,
        inputs: *mut SpeakerArrangement,
        num_ins: int32,
        outputs: *mut SpeakerArrangement,
        num_outs: int32,
    ) -> tresult {
        unsafe {
            self.inner
                .setBusArrangements(inputs, num_ins, outputs, num_outs)
        }
    }

    unsafe fn getBusArrangement(
        &self,
        dir: vst3::Steinberg::Vst::BusDirection,
        index: int32,
        arr: *mut SpeakerArrangement,
    ) -> tresult {
        unsafe { self.inner.getBusArrangement(dir, index, arr) }
    }

    unsafe fn canProcessSampleSize(&self, symbolic_sample_size: int32) -> tresult {
        unsafe { self.inner.canProcessSampleSize(symbolic_sample_size) }
    }

    unsafe fn getLatencySamples(&self) -> u32 {
        unsafe { self.inner.getLatencySamples() }
    }

    unsafe fn setupProcessing(&self, setup: *mut ProcessSetup) -> tresult {
        unsafe { self.inner.setupProcessing(setup) }
    }

    unsafe fn setProcessing(&self, state: TBool) -> tresult {
        unsafe { IAudioProcessorTrait::setProcessing(&self.inner, state) }
    }

    unsafe fn process(&self, data: *mut ProcessData) -> tresult {
        unsafe { self.inner.process(data) }
    }

    unsafe fn getTailSamples(&self) -> u32 {
        unsafe { self.inner.getTailSamples() }
    }
}

/// Description of one class the fake factory advertises.
struct FakeClass {
    cid: TUID,
    category: &'static str,
    name: &'static str,
}

/// Which fake object the factory hands out for the component class id.
#[derive(Clone, Copy)]
pub enum FakeKind {
    Full,
    NoDsp,
    SplitController,
}

pub struct FakeFactory {
    classes: Vec<FakeClass>,
    stats: Arc<FakeStats>,
    kind: FakeKind,
}

// SAFETY: tests drive the fake from one thread at a time.
unsafe impl Send for FakeFactory {}
unsafe impl Sync for FakeFactory {}

impl Class for FakeFactory {
    type Interfaces = (IPluginFactory,);
}

impl IPluginFactoryTrait for FakeFactory {
    unsafe fn getFactoryInfo(&self, info: *mut PFactoryInfo) -> tresult {
        if info.is_null() {
            return kInvalidArgument;
        }
        let info = unsafe { &mut *info };
        copy_str("Fake Audio", &mut info.vendor);
        copy_str("https://example.invalid", &mut info.url);
        copy_str("", &mut info.email);
        info.flags = 0;
        kResultOk
    }

    unsafe fn countClasses(&self) -> i32 {
        self.classes.len() as i32
    }

    unsafe fn getClassInfo(&self, index: i32, info: *mut PClassInfo) -> tresult {
        let Some(class) = self.classes.get(index as usize) else {
            return kInvalidArgument;
        };
        if info.is_null() {
            return kInvalidArgument;
        }
        let info = unsafe { &mut *info };
        info.cid = class.cid;
        info.cardinality = 0x7FFF_FFFF;
        copy_str(class.category, &mut info.category);
        copy_str(class.name, &mut info.name);
        kResultOk
    }

    unsafe fn createInstance(
        &self,
        cid: FIDString,
        iid: FIDString,
        obj: *mut *mut c_void,
    ) -> tresult {
        if cid.is_null() || iid.is_null() || obj.is_null() {
            return kInvalidArgument;
        }
        let requested = unsafe { &*(cid as *const TUID) };
        if *requested != FAKE_COMPONENT_CID {
            return kInvalidArgument;
        }

        let inner = FakePlugin {
            stats: Arc::clone(&self.stats),
            gain: Cell::new(0.5),
        };

        // queryInterface takes the reference that keeps the object alive
        // after the wrapper drops.
        match self.kind {
            FakeKind::Full => {
                let plugin = ComWrapper::new(inner);
                let unknown = plugin.as_com_ref::<FUnknown>().unwrap().as_ptr();
                unsafe { ((*(*unknown).vtbl).queryInterface)(unknown, iid as *const TUID, obj) }
            }
            FakeKind::NoDsp => {
                let plugin = ComWrapper::new(FakeNoDsp { inner });
                let unknown = plugin.as_com_ref::<FUnknown>().unwrap().as_ptr();
                unsafe { ((*(*unknown).vtbl).queryInterface)(unknown, iid as *const TUID, obj) }
            }
            FakeKind::SplitController => {
                let plugin = ComWrapper::new(FakeSplit { inner });
                let unknown = plugin.as_com_ref::<FUnknown>().unwrap().as_ptr();
                unsafe { ((*(*unknown).vtbl).queryInterface)(unknown, iid as *const TUID, obj) }
            }
        }
    }
}

/// Factory with a single audio module class.
pub fn fake_factory() -> (ComPtr<IPluginFactory>, Arc<FakeStats>) {
    fake_factory_with(audio_class_only(), FakeKind::Full)
}

/// Factory whose component does not expose `IAudioProcessor`, driving the
/// host into passthrough processing.
pub fn fake_factory_no_processor() -> (ComPtr<IPluginFactory>, Arc<FakeStats>) {
    fake_factory_with(audio_class_only(), FakeKind::NoDsp)
}

/// Factory whose component names a controller class the factory refuses to
/// create, so loading fails after component initialization.
pub fn fake_factory_split_controller() -> (ComPtr<IPluginFactory>, Arc<FakeStats>) {
    fake_factory_with(audio_class_only(), FakeKind::SplitController)
}

/// Factory advertising a service class before the audio module class, for
/// checking that class indexing skips non-audio entries.
pub fn fake_factory_two_classes() -> (ComPtr<IPluginFactory>, Arc<FakeStats>) {
    fake_factory_with(
        vec![
            FakeClass {
                cid: [0x22; 16],
                category: "Service Class",
                name: "Background Service",
            },
            FakeClass {
                cid: FAKE_COMPONENT_CID,
                category: "Audio Module Class",
                name: "Fake Synth",
            },
        ],
        FakeKind::Full,
    )
}

fn audio_class_only() -> Vec<FakeClass> {
    vec![FakeClass {
        cid: FAKE_COMPONENT_CID,
        category: "Audio Module Class",
        name: "Fake Synth",
    }]
}

fn fake_factory_with(
    classes: Vec<FakeClass>,
    kind: FakeKind,
) -> (ComPtr<IPluginFactory>, Arc<FakeStats>) {
    let stats = Arc::new(FakeStats::default());
    let factory = ComWrapper::new(FakeFactory {
        classes,
        stats: Arc::clone(&stats),
        kind,
    });
    let ptr = factory.to_com_ptr::<IPluginFactory>().unwrap();
    (ptr, stats)
}

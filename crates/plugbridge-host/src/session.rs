//! Plugin session: module loading, the COM interface chain, audio, and
//! parameter access.
//!
//! One `PluginSession` owns everything derived from a loaded module. Field
//! order matters: every COM pointer must drop before the module that provides
//! its vtable, and the module's exit hook runs before the library unloads.

use crate::edits::{EditComponentHandler, ParamEditQueue};
use crate::events::{HostEventList, PendingEvents};
use crate::gui::Editor;
use plugbridge::protocol::{
    InitAudioCmd, MidiEventRec, ParamInfoResp, ParamValue, PluginInfoResp,
    INFO_FLAG_HAS_CONTROLLER, INFO_FLAG_HAS_PROCESSOR,
};
use plugbridge::shared_memory::{AudioChannel, ChannelConfig};
use plugbridge::{BridgeError, LoadStage, Result};
use std::cell::{RefCell, UnsafeCell};
use std::ffi::{c_char, c_void};
use std::io::{Cursor, SeekFrom};
use std::path::{Path, PathBuf};
use vst3::Steinberg::Vst::BusDirections_::{kInput, kOutput};
use vst3::Steinberg::Vst::MediaTypes_::{kAudio, kEvent};
use vst3::Steinberg::Vst::ProcessModes_::kRealtime;
use vst3::Steinberg::Vst::SpeakerArr::{kMono, kStereo};
use vst3::Steinberg::Vst::SymbolicSampleSizes_::kSample32;
use vst3::Steinberg::Vst::{
    AudioBusBuffers, AudioBusBuffers__type0, BusInfo, IAudioProcessor, IAudioProcessorTrait as _,
    IComponent, IComponentHandler, IComponentTrait as _, IConnectionPoint,
    IConnectionPointTrait as _, IEditController, IEditControllerTrait as _, IEventList,
    IHostApplication, IHostApplicationTrait, IParamValueQueue, IParamValueQueueTrait,
    IParameterChanges, IParameterChangesTrait, ParameterInfo as Vst3ParameterInfo, ProcessData,
    ProcessSetup, String128,
};
use vst3::Steinberg::{
    self, FUnknown, IBStream, IBStreamTrait, IPlugView, IPlugViewTrait as _,
    IPluginBaseTrait as _, IPluginFactory, IPluginFactoryTrait as _, PClassInfo, PFactoryInfo,
    kResultOk,
};
use vst3::{Class, ComPtr, ComWrapper, Interface};

/// Factory category of instantiable audio plugins.
const AUDIO_MODULE_CATEGORY: &str = "Audio Module Class";

/// Limits for init-audio, mirroring the fixed shm layout bounds.
pub const MAX_CHANNELS: u32 = 8;
pub const MAX_BLOCK_SIZE: u32 = 4096;

const MAX_PARAM_QUEUES: usize = 128;

// ---------------------------------------------------------------------------
// String helpers
// ---------------------------------------------------------------------------

fn string128_to_string(s: &String128) -> String {
    let end = s.iter().position(|&c| c == 0).unwrap_or(s.len());
    String::from_utf16_lossy(&s[..end])
}

fn char_array_to_string(s: &[c_char]) -> String {
    let end = s.iter().position(|&c| c == 0).unwrap_or(s.len());
    s[..end].iter().map(|&c| c as u8 as char).collect()
}

fn string_to_string128(s: &str) -> String128 {
    let mut buf: String128 = [0u16; 128];
    for (i, ch) in s.encode_utf16().take(127).enumerate() {
        buf[i] = ch;
    }
    buf
}

/// Convert a `Guid` ([u8; 16]) to a TUID ([c_char; 16]) for createInstance.
fn guid_to_tuid(guid: &vst3::com_scrape_types::Guid) -> Steinberg::TUID {
    let mut tuid: Steinberg::TUID = [0; 16];
    for i in 0..16 {
        tuid[i] = guid[i] as c_char;
    }
    tuid
}

fn tuid_to_hex(tuid: &Steinberg::TUID) -> String {
    tuid.iter().map(|&b| format!("{:02X}", b as u8)).collect()
}

// ---------------------------------------------------------------------------
// Module loading
// ---------------------------------------------------------------------------

/// Resolve a `.vst3` bundle directory to its shared library; bare library
/// paths pass through.
fn module_binary_path(path: &Path) -> PathBuf {
    if !path.is_dir() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    #[cfg(target_os = "linux")]
    {
        path.join("Contents")
            .join("x86_64-linux")
            .join(format!("{stem}.so"))
    }
    #[cfg(windows)]
    {
        path.join("Contents")
            .join("x86_64-win")
            .join(format!("{stem}.vst3"))
    }
    #[cfg(not(any(target_os = "linux", windows)))]
    {
        let _ = stem;
        path.to_path_buf()
    }
}

pub struct PluginModule {
    factory: Option<ComPtr<IPluginFactory>>,
    exit_fn: Option<libloading::Symbol<'static, unsafe extern "C" fn() -> bool>>,
    // SAFETY: Library must be dropped after factory and exit_fn.
    // Rust drops fields in declaration order, so this is correct.
    _library: libloading::Library,
}

impl PluginModule {
    pub fn load(path: &Path) -> Result<Self> {
        let fail = |stage: LoadStage, reason: String| BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage,
            reason,
        };

        let binary = module_binary_path(path);
        if !binary.exists() {
            return Err(fail(
                LoadStage::Opening,
                format!("binary not found: {}", binary.display()),
            ));
        }

        // Safety: loading external dynamic libraries is inherently unsafe
        let library = unsafe { libloading::Library::new(&binary) }
            .map_err(|e| fail(LoadStage::Opening, e.to_string()))?;

        #[cfg(target_os = "linux")]
        {
            let entry: libloading::Symbol<unsafe extern "C" fn(*mut c_void) -> bool> =
                unsafe { library.get(b"ModuleEntry") }
                    .map_err(|e| fail(LoadStage::EntryPoint, format!("ModuleEntry: {e}")))?;
            if !unsafe { entry(std::ptr::null_mut()) } {
                return Err(fail(
                    LoadStage::EntryPoint,
                    "ModuleEntry returned false".to_string(),
                ));
            }
        }
        #[cfg(windows)]
        {
            if let Ok(entry) = unsafe { library.get::<unsafe extern "C" fn() -> bool>(b"InitDll") }
            {
                if !unsafe { entry() } {
                    return Err(fail(
                        LoadStage::EntryPoint,
                        "InitDll returned false".to_string(),
                    ));
                }
            }
        }

        // SAFETY: the Symbol's lifetime is transmuted to 'static because
        // _library outlives exit_fn (field drop order).
        #[cfg(target_os = "linux")]
        let exit_fn: Option<libloading::Symbol<'static, unsafe extern "C" fn() -> bool>> = unsafe {
            library
                .get::<unsafe extern "C" fn() -> bool>(b"ModuleExit")
                .ok()
                .map(|s| std::mem::transmute(s))
        };
        #[cfg(windows)]
        let exit_fn: Option<libloading::Symbol<'static, unsafe extern "C" fn() -> bool>> = unsafe {
            library
                .get::<unsafe extern "C" fn() -> bool>(b"ExitDll")
                .ok()
                .map(|s| std::mem::transmute(s))
        };

        let get_factory: libloading::Symbol<unsafe extern "C" fn() -> *mut IPluginFactory> =
            unsafe { library.get(b"GetPluginFactory") }
                .map_err(|e| fail(LoadStage::Factory, format!("GetPluginFactory: {e}")))?;
        let factory_ptr = unsafe { get_factory() };
        let factory = unsafe { ComPtr::from_raw(factory_ptr) }.ok_or_else(|| {
            fail(
                LoadStage::Factory,
                "GetPluginFactory returned null".to_string(),
            )
        })?;

        Ok(Self {
            factory: Some(factory),
            exit_fn,
            _library: library,
        })
    }

    fn factory(&self) -> ComPtr<IPluginFactory> {
        // Set in load(), only taken in Drop.
        self.factory.clone().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PluginModule {
    fn drop(&mut self) {
        // Factory releases first so the exit hook sees no live objects.
        self.factory.take();
        if let Some(ref exit) = self.exit_fn {
            unsafe {
                exit();
            }
        }
        // _library drops last and unloads the shared object.
    }
}

// ---------------------------------------------------------------------------
// Host COM objects
// ---------------------------------------------------------------------------

struct HostApp;

impl Class for HostApp {
    type Interfaces = (IHostApplication,);
}

impl IHostApplicationTrait for HostApp {
    unsafe fn getName(&self, name: *mut String128) -> Steinberg::tresult {
        unsafe { *name = string_to_string128("plugbridge") };
        kResultOk
    }

    unsafe fn createInstance(
        &self,
        _cid: *mut Steinberg::TUID,
        _iid: *mut Steinberg::TUID,
        _obj: *mut *mut c_void,
    ) -> Steinberg::tresult {
        vst3::Steinberg::kNotImplemented
    }
}

/// Growable in-memory `IBStream` backing component state save and restore.
struct MemoryStream {
    cursor: RefCell<Cursor<Vec<u8>>>,
}

impl MemoryStream {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            cursor: RefCell::new(Cursor::new(bytes)),
        }
    }

    fn bytes(&self) -> Vec<u8> {
        self.cursor.borrow().get_ref().clone()
    }
}

impl Class for MemoryStream {
    type Interfaces = (IBStream,);
}

impl IBStreamTrait for MemoryStream {
    unsafe fn read(
        &self,
        buffer: *mut c_void,
        num_bytes: i32,
        num_bytes_read: *mut i32,
    ) -> Steinberg::tresult {
        if buffer.is_null() || num_bytes < 0 {
            return Steinberg::kInvalidArgument;
        }
        let mut cursor = self.cursor.borrow_mut();
        let dest =
            unsafe { std::slice::from_raw_parts_mut(buffer as *mut u8, num_bytes as usize) };
        // Reads from a memory cursor cannot fail; short reads hit the end.
        let n = std::io::Read::read(&mut *cursor, dest).unwrap_or(0);
        if !num_bytes_read.is_null() {
            unsafe { *num_bytes_read = n as i32 };
        }
        kResultOk
    }

    unsafe fn write(
        &self,
        buffer: *mut c_void,
        num_bytes: i32,
        num_bytes_written: *mut i32,
    ) -> Steinberg::tresult {
        if buffer.is_null() || num_bytes < 0 {
            return Steinberg::kInvalidArgument;
        }
        let mut cursor = self.cursor.borrow_mut();
        let src = unsafe { std::slice::from_raw_parts(buffer as *const u8, num_bytes as usize) };
        let n = std::io::Write::write(&mut *cursor, src).unwrap_or(0);
        if !num_bytes_written.is_null() {
            unsafe { *num_bytes_written = n as i32 };
        }
        kResultOk
    }

    unsafe fn seek(&self, pos: i64, mode: i32, result: *mut i64) -> Steinberg::tresult {
        use vst3::Steinberg::IBStream_::IStreamSeekMode_::{kIBSeekCur, kIBSeekEnd, kIBSeekSet};
        let from = match mode {
            m if m == kIBSeekSet as i32 => SeekFrom::Start(pos.max(0) as u64),
            m if m == kIBSeekCur as i32 => SeekFrom::Current(pos),
            m if m == kIBSeekEnd as i32 => SeekFrom::End(pos),
            _ => return Steinberg::kInvalidArgument,
        };
        let mut cursor = self.cursor.borrow_mut();
        match std::io::Seek::seek(&mut *cursor, from) {
            Ok(new_pos) => {
                if !result.is_null() {
                    unsafe { *result = new_pos as i64 };
                }
                kResultOk
            }
            Err(_) => Steinberg::kInvalidArgument,
        }
    }

    unsafe fn tell(&self, pos: *mut i64) -> Steinberg::tresult {
        if pos.is_null() {
            return Steinberg::kInvalidArgument;
        }
        unsafe { *pos = self.cursor.borrow().position() as i64 };
        kResultOk
    }
}

struct HostParamValueQueue {
    param_id: UnsafeCell<u32>,
    value: UnsafeCell<f64>,
}

impl Class for HostParamValueQueue {
    type Interfaces = (IParamValueQueue,);
}

impl IParamValueQueueTrait for HostParamValueQueue {
    unsafe fn getParameterId(&self) -> vst3::Steinberg::Vst::ParamID {
        unsafe { *self.param_id.get() }
    }

    unsafe fn getPointCount(&self) -> Steinberg::int32 {
        1
    }

    unsafe fn getPoint(
        &self,
        index: Steinberg::int32,
        sample_offset: *mut Steinberg::int32,
        value: *mut vst3::Steinberg::Vst::ParamValue,
    ) -> Steinberg::tresult {
        if index == 0 {
            unsafe {
                *sample_offset = 0;
                *value = *self.value.get();
            }
            kResultOk
        } else {
            vst3::Steinberg::kResultFalse
        }
    }

    unsafe fn addPoint(
        &self,
        _sample_offset: Steinberg::int32,
        _value: vst3::Steinberg::Vst::ParamValue,
        _index: *mut Steinberg::int32,
    ) -> Steinberg::tresult {
        vst3::Steinberg::kResultFalse
    }
}

struct HostParameterChanges {
    count: UnsafeCell<i32>,
    queues: Vec<ComWrapper<HostParamValueQueue>>,
}

impl HostParameterChanges {
    fn new() -> Self {
        Self {
            count: UnsafeCell::new(0),
            queues: (0..MAX_PARAM_QUEUES)
                .map(|_| {
                    ComWrapper::new(HostParamValueQueue {
                        param_id: UnsafeCell::new(0),
                        value: UnsafeCell::new(0.0),
                    })
                })
                .collect(),
        }
    }
}

impl Class for HostParameterChanges {
    type Interfaces = (IParameterChanges,);
}

impl IParameterChangesTrait for HostParameterChanges {
    unsafe fn getParameterCount(&self) -> Steinberg::int32 {
        unsafe { *self.count.get() }
    }

    unsafe fn getParameterData(&self, index: Steinberg::int32) -> *mut IParamValueQueue {
        if (index as usize) < (unsafe { *self.count.get() } as usize) {
            self.queues
                .get(index as usize)
                .and_then(|q| q.as_com_ref::<IParamValueQueue>())
                .map(|r| r.as_ptr())
                .unwrap_or(std::ptr::null_mut())
        } else {
            std::ptr::null_mut()
        }
    }

    unsafe fn addParameterData(
        &self,
        id: *const vst3::Steinberg::Vst::ParamID,
        index: *mut Steinberg::int32,
    ) -> *mut IParamValueQueue {
        unsafe {
            let count = *self.count.get();
            if (count as usize) < self.queues.len() {
                *self.queues[count as usize].param_id.get() = *id;
                *self.queues[count as usize].value.get() = 0.0;
                *self.count.get() = count + 1;
                if !index.is_null() {
                    *index = count;
                }
                self.queues[count as usize]
                    .as_com_ref::<IParamValueQueue>()
                    .map(|r| r.as_ptr())
                    .unwrap_or(std::ptr::null_mut())
            } else {
                std::ptr::null_mut()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct AudioState {
    channel: AudioChannel,
    config: ChannelConfig,
}

pub struct PluginSession {
    edits: ParamEditQueue,
    pending_events: PendingEvents,
    pending_param_changes: Vec<(u32, f64)>,
    audio: Option<AudioState>,
    // Editor before the COM chain: its view must release first.
    editor: Option<Editor>,
    event_list: ComWrapper<HostEventList>,
    param_changes: ComWrapper<HostParameterChanges>,
    output_param_changes: ComWrapper<HostParameterChanges>,
    comp_connection: Option<ComPtr<IConnectionPoint>>,
    ctrl_connection: Option<ComPtr<IConnectionPoint>>,
    processor: Option<ComPtr<IAudioProcessor>>,
    controller: Option<ComPtr<IEditController>>,
    component: ComPtr<IComponent>,
    _handler: ComWrapper<EditComponentHandler>,
    _host_app: ComWrapper<HostApp>,
    separate_controller: bool,
    name: String,
    vendor: String,
    category: String,
    uid: String,
    num_inputs: u32,
    num_outputs: u32,
    // SAFETY: _module must be the last field. It unloads the shared library
    // on drop, so all ComPtrs referencing its objects must drop first.
    _module: Option<PluginModule>,
}

impl PluginSession {
    /// Load a module from disk and build the full session around its
    /// `class_index`-th audio module class.
    pub fn load(path: &Path, class_index: u32) -> Result<Self> {
        let module = PluginModule::load(path)?;
        let factory = module.factory();
        Self::from_factory(factory, Some(module), path, class_index)
    }

    /// Build a session from an already-obtained factory. Exposed separately
    /// so tests can inject in-process factories.
    pub fn from_factory(
        factory: ComPtr<IPluginFactory>,
        module: Option<PluginModule>,
        path: &Path,
        class_index: u32,
    ) -> Result<Self> {
        let fail = |stage: LoadStage, reason: String| BridgeError::LoadFailed {
            path: path.to_path_buf(),
            stage,
            reason,
        };

        let vendor = {
            let mut info: PFactoryInfo = unsafe { std::mem::zeroed() };
            if unsafe { factory.getFactoryInfo(&mut info) } == kResultOk {
                char_array_to_string(&info.vendor)
            } else {
                String::new()
            }
        };

        // class_index counts only audio module classes, skipping service
        // classes the factory may list first.
        let class_count = unsafe { factory.countClasses() };
        let mut matched: u32 = 0;
        let mut class_info: Option<PClassInfo> = None;
        for i in 0..class_count {
            let mut info: PClassInfo = unsafe { std::mem::zeroed() };
            if unsafe { factory.getClassInfo(i, &mut info) } != kResultOk {
                continue;
            }
            if char_array_to_string(&info.category) != AUDIO_MODULE_CATEGORY {
                continue;
            }
            if matched == class_index {
                class_info = Some(info);
                break;
            }
            matched += 1;
        }
        let class_info = class_info.ok_or_else(|| {
            BridgeError::InvalidParam(format!("no audio module class at index {class_index}"))
        })?;
        let name = char_array_to_string(&class_info.name);
        let category = char_array_to_string(&class_info.category);
        let uid = tuid_to_hex(&class_info.cid);

        let edits = ParamEditQueue::new();
        let host_app = ComWrapper::new(HostApp);
        let handler = ComWrapper::new(EditComponentHandler::new(edits.clone()));

        let host_unknown: ComPtr<FUnknown> = host_app.to_com_ptr::<FUnknown>().ok_or_else(|| {
            fail(
                LoadStage::Initialization,
                "host context cast failed".to_string(),
            )
        })?;

        // Create and initialize the component.
        let component: ComPtr<IComponent> = {
            let iid = guid_to_tuid(&<IComponent as Interface>::IID);
            let mut obj: *mut c_void = std::ptr::null_mut();
            let result = unsafe {
                factory.createInstance(class_info.cid.as_ptr(), iid.as_ptr(), &mut obj)
            };
            if result != kResultOk || obj.is_null() {
                return Err(fail(
                    LoadStage::Instantiation,
                    format!("createInstance failed (result={result})"),
                ));
            }
            unsafe { ComPtr::from_raw(obj as *mut IComponent) }.ok_or_else(|| {
                fail(
                    LoadStage::Component,
                    "createInstance returned null".to_string(),
                )
            })?
        };

        let result = unsafe { component.initialize(host_unknown.as_ptr()) };
        if result != kResultOk {
            return Err(fail(
                LoadStage::Initialization,
                format!("IComponent::initialize failed (result={result})"),
            ));
        }

        // The component is initialized from here on. Any later failure must
        // terminate it before the ComPtr release, so the plugin sees the full
        // IPluginBase lifecycle even on a half-built session.
        let unwind = |stage: LoadStage, reason: String| {
            unsafe {
                component.terminate();
            }
            fail(stage, reason)
        };

        // Optional facets. A component without IAudioProcessor falls back to
        // passthrough; one without a controller just has no parameters.
        let processor = component.cast::<IAudioProcessor>();
        if processor.is_none() {
            tracing::warn!(plugin = %name, "component has no IAudioProcessor, passthrough only");
        }

        let (controller, separate_controller) = match component.cast::<IEditController>() {
            Some(ec) => {
                tracing::debug!("single-component design");
                (Some(ec), false)
            }
            None => {
                let mut controller_cid: Steinberg::TUID = [0; 16];
                if unsafe { component.getControllerClassId(&mut controller_cid) } != kResultOk {
                    (None, false)
                } else {
                    let iid = guid_to_tuid(&<IEditController as Interface>::IID);
                    let mut obj: *mut c_void = std::ptr::null_mut();
                    let result = unsafe {
                        factory.createInstance(controller_cid.as_ptr(), iid.as_ptr(), &mut obj)
                    };
                    if result != kResultOk || obj.is_null() {
                        return Err(unwind(
                            LoadStage::Controller,
                            format!("controller createInstance failed (result={result})"),
                        ));
                    }
                    let ec = unsafe { ComPtr::from_raw(obj as *mut IEditController) }
                        .ok_or_else(|| {
                            unwind(
                                LoadStage::Controller,
                                "controller createInstance returned null".to_string(),
                            )
                        })?;
                    let result = unsafe { ec.initialize(host_unknown.as_ptr()) };
                    if result != kResultOk {
                        return Err(unwind(
                            LoadStage::Controller,
                            format!("IEditController::initialize failed (result={result})"),
                        ));
                    }
                    tracing::debug!("separate controller design");
                    (Some(ec), true)
                }
            }
        };

        if let Some(ref controller) = controller {
            let handler_ptr = match handler.to_com_ptr::<IComponentHandler>() {
                Some(ptr) => ptr,
                None => {
                    if separate_controller {
                        unsafe {
                            controller.terminate();
                        }
                    }
                    return Err(unwind(
                        LoadStage::Controller,
                        "component handler cast failed".to_string(),
                    ));
                }
            };
            unsafe {
                controller.setComponentHandler(handler_ptr.as_ptr());
            }
        }

        // Connect component and controller when they are distinct objects.
        let (comp_connection, ctrl_connection) = if separate_controller {
            let comp_conn = component.cast::<IConnectionPoint>();
            let ctrl_conn = controller
                .as_ref()
                .and_then(|c| c.cast::<IConnectionPoint>());
            if let (Some(cc), Some(tc)) = (&comp_conn, &ctrl_conn) {
                unsafe {
                    cc.connect(tc.as_ptr());
                    tc.connect(cc.as_ptr());
                }
            }
            (comp_conn, ctrl_conn)
        } else {
            (None, None)
        };

        // Main-bus channel counts for get-info, before audio setup exists.
        let num_inputs = main_bus_channels(&component, kInput as i32);
        let num_outputs = main_bus_channels(&component, kOutput as i32);

        tracing::info!(
            plugin = %name,
            vendor = %vendor,
            inputs = num_inputs,
            outputs = num_outputs,
            has_processor = processor.is_some(),
            has_controller = controller.is_some(),
            "plugin loaded"
        );

        Ok(Self {
            edits,
            pending_events: PendingEvents::default(),
            pending_param_changes: Vec::new(),
            audio: None,
            editor: None,
            event_list: ComWrapper::new(HostEventList::new()),
            param_changes: ComWrapper::new(HostParameterChanges::new()),
            output_param_changes: ComWrapper::new(HostParameterChanges::new()),
            comp_connection,
            ctrl_connection,
            processor,
            controller,
            component,
            _handler: handler,
            _host_app: host_app,
            separate_controller,
            name,
            vendor,
            category,
            uid,
            num_inputs,
            num_outputs,
            _module: module,
        })
    }

    pub fn info(&self) -> PluginInfoResp {
        let mut flags = 0;
        if self.processor.is_some() {
            flags |= INFO_FLAG_HAS_PROCESSOR;
        }
        if self.controller.is_some() {
            flags |= INFO_FLAG_HAS_CONTROLLER;
        }
        PluginInfoResp {
            name: self.name.clone(),
            vendor: self.vendor.clone(),
            category: self.category.clone(),
            uid: self.uid.clone(),
            num_params: self.param_count(),
            num_inputs: self.num_inputs,
            num_outputs: self.num_outputs,
            flags,
        }
    }

    pub fn param_count(&self) -> u32 {
        match &self.controller {
            Some(controller) => unsafe { controller.getParameterCount().max(0) as u32 },
            None => 0,
        }
    }

    pub fn param_info(&self, index: u32) -> Result<ParamInfoResp> {
        let controller = self.controller()?;
        let mut info: Vst3ParameterInfo = unsafe { std::mem::zeroed() };
        let result = unsafe { controller.getParameterInfo(index as i32, &mut info) };
        if result != kResultOk {
            return Err(BridgeError::InvalidParam(format!(
                "no parameter at index {index}"
            )));
        }
        Ok(ParamInfoResp {
            id: info.id,
            name: string128_to_string(&info.title),
            units: string128_to_string(&info.units),
            default_value: info.defaultNormalizedValue,
            min_value: 0.0,
            max_value: 1.0,
            flags: info.flags as u32,
        })
    }

    pub fn get_param(&self, param_id: u32) -> Result<f64> {
        let controller = self.controller()?;
        Ok(unsafe { controller.getParamNormalized(param_id) })
    }

    /// Applies to the controller immediately and queues for the next process
    /// call so the processor hears about it too.
    pub fn set_param(&mut self, param_id: u32, value: f64) -> Result<()> {
        if value.is_nan() {
            return Err(BridgeError::InvalidParam(
                "normalized value is NaN".to_string(),
            ));
        }
        let value = value.clamp(0.0, 1.0);
        let controller = self.controller()?;
        unsafe {
            controller.setParamNormalized(param_id, value);
        }
        if self.pending_param_changes.len() < MAX_PARAM_QUEUES {
            self.pending_param_changes.push((param_id, value));
        }
        Ok(())
    }

    pub fn queue_midi(&mut self, events: &[MidiEventRec]) {
        for event in events {
            self.pending_events.push(event);
        }
    }

    pub fn drain_edits(&self) -> Vec<ParamValue> {
        self.edits.drain()
    }

    fn controller(&self) -> Result<&ComPtr<IEditController>> {
        self.controller
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidParam("plugin has no edit controller".to_string()))
    }

    // -- state ---------------------------------------------------------------

    /// Serializes the component state into an opaque byte blob.
    pub fn get_state(&mut self) -> Result<Vec<u8>> {
        let stream = ComWrapper::new(MemoryStream::new(Vec::new()));
        let ptr = stream
            .to_com_ptr::<IBStream>()
            .ok_or_else(|| BridgeError::StateError("stream wrapper cast failed".to_string()))?;
        let result = unsafe { self.component.getState(ptr.as_ptr()) };
        if result != kResultOk {
            return Err(BridgeError::StateError(format!(
                "IComponent::getState failed (result={result})"
            )));
        }
        Ok(stream.bytes())
    }

    /// Restores a state blob previously produced by [`Self::get_state`].
    pub fn set_state(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = ComWrapper::new(MemoryStream::new(bytes.to_vec()));
        let ptr = stream
            .to_com_ptr::<IBStream>()
            .ok_or_else(|| BridgeError::StateError("stream wrapper cast failed".to_string()))?;
        let result = unsafe { self.component.setState(ptr.as_ptr()) };
        if result != kResultOk {
            return Err(BridgeError::StateError(format!(
                "IComponent::setState failed (result={result})"
            )));
        }
        // A separate controller mirrors the component state so its parameter
        // view matches; a single-component design already saw it.
        if self.separate_controller {
            if let Some(ref controller) = self.controller {
                let mirror = ComWrapper::new(MemoryStream::new(bytes.to_vec()));
                if let Some(ptr) = mirror.to_com_ptr::<IBStream>() {
                    unsafe {
                        controller.setComponentState(ptr.as_ptr());
                    }
                }
            }
        }
        Ok(())
    }

    // -- audio ---------------------------------------------------------------

    pub fn init_audio(&mut self, cmd: &InitAudioCmd) -> Result<()> {
        if cmd.block_size == 0 || cmd.block_size > MAX_BLOCK_SIZE {
            return Err(BridgeError::InvalidParam(format!(
                "block size {} out of range",
                cmd.block_size
            )));
        }
        if cmd.num_inputs > MAX_CHANNELS || cmd.num_outputs > MAX_CHANNELS {
            return Err(BridgeError::InvalidParam(format!(
                "channel counts {}/{} out of range",
                cmd.num_inputs, cmd.num_outputs
            )));
        }

        // Re-init tears down the previous configuration first.
        self.stop_audio();

        let config = ChannelConfig {
            sample_rate: cmd.sample_rate,
            block_size: cmd.block_size,
            num_inputs: cmd.num_inputs,
            num_outputs: cmd.num_outputs,
        };
        let channel = AudioChannel::open(&cmd.shm_name, config)?;

        if let Some(processor) = self.processor.clone() {
            self.setup_processing(&processor, &config).inspect_err(|_| {
                unsafe {
                    self.component.setActive(0);
                }
            })?;
        }

        tracing::info!(
            sample_rate = cmd.sample_rate,
            block_size = cmd.block_size,
            inputs = cmd.num_inputs,
            outputs = cmd.num_outputs,
            shm = %cmd.shm_name,
            "audio initialized"
        );
        self.audio = Some(AudioState { channel, config });
        Ok(())
    }

    fn setup_processing(
        &self,
        processor: &ComPtr<IAudioProcessor>,
        config: &ChannelConfig,
    ) -> Result<()> {
        let stage_err = |stage: LoadStage, code: i32| BridgeError::PluginError { stage, code };

        let mut input_arr: vst3::Steinberg::Vst::SpeakerArrangement = match config.num_inputs {
            1 => kMono,
            _ => kStereo,
        };
        let mut output_arr: vst3::Steinberg::Vst::SpeakerArrangement = match config.num_outputs {
            1 => kMono,
            _ => kStereo,
        };
        unsafe {
            if config.num_inputs > 0 {
                processor.setBusArrangements(&mut input_arr, 1, &mut output_arr, 1);
            } else {
                processor.setBusArrangements(std::ptr::null_mut(), 0, &mut output_arr, 1);
            }

            if self.component.getBusCount(kAudio as i32, kOutput as i32) > 0 {
                self.component.activateBus(kAudio as i32, kOutput as i32, 0, 1);
            }
            if config.num_inputs > 0
                && self.component.getBusCount(kAudio as i32, kInput as i32) > 0
            {
                self.component.activateBus(kAudio as i32, kInput as i32, 0, 1);
            }
            if self.component.getBusCount(kEvent as i32, kInput as i32) > 0 {
                self.component.activateBus(kEvent as i32, kInput as i32, 0, 1);
            }

            let mut setup = ProcessSetup {
                processMode: kRealtime as i32,
                symbolicSampleSize: kSample32 as i32,
                maxSamplesPerBlock: config.block_size as i32,
                sampleRate: config.sample_rate as f64,
            };
            let result = processor.setupProcessing(&mut setup);
            if result != kResultOk {
                return Err(stage_err(LoadStage::AudioSetup, result));
            }

            let result = self.component.setActive(1);
            if result != kResultOk {
                return Err(stage_err(LoadStage::Activation, result));
            }
            let result = processor.setProcessing(1);
            if result != kResultOk {
                self.component.setActive(0);
                return Err(stage_err(LoadStage::Activation, result));
            }
        }
        Ok(())
    }

    fn stop_audio(&mut self) {
        if self.audio.take().is_some() {
            unsafe {
                if let Some(ref processor) = self.processor {
                    processor.setProcessing(0);
                }
                self.component.setActive(0);
            }
        }
    }

    /// Run one block through the plugin. Input has already been written into
    /// the shared channel by the controller; output lands there for it to
    /// read after the response.
    pub fn process(&mut self, num_samples: u32) -> Result<()> {
        let audio = self.audio.as_ref().ok_or(BridgeError::NotInitialized)?;
        if num_samples == 0 || num_samples > audio.config.block_size {
            return Err(BridgeError::InvalidParam(format!(
                "num_samples {num_samples} exceeds block size {}",
                audio.config.block_size
            )));
        }

        let Some(processor) = self.processor.clone() else {
            return self.process_passthrough(num_samples);
        };

        // Queued set-param values become this block's input changes.
        let count = unsafe { &mut *self.param_changes.count.get() };
        *count = 0;
        unsafe { *self.output_param_changes.count.get() = 0 };
        for (i, &(param_id, value)) in self.pending_param_changes.iter().enumerate() {
            unsafe {
                *self.param_changes.queues[i].param_id.get() = param_id;
                *self.param_changes.queues[i].value.get() = value;
            }
            *count = (i + 1) as i32;
        }
        self.pending_param_changes.clear();

        self.pending_events.drain_into(&self.event_list);

        let mut input_ptrs: Vec<*mut f32> = (0..audio.config.num_inputs as usize)
            .map(|ch| audio.channel.input_block(ch).map(|b| b.as_mut_ptr()))
            .collect::<Result<_>>()?;
        let mut output_ptrs: Vec<*mut f32> = (0..audio.config.num_outputs as usize)
            .map(|ch| audio.channel.output_block(ch).map(|b| b.as_mut_ptr()))
            .collect::<Result<_>>()?;

        let mut input_bus = AudioBusBuffers {
            numChannels: audio.config.num_inputs as i32,
            silenceFlags: 0,
            __field0: AudioBusBuffers__type0 {
                channelBuffers32: input_ptrs.as_mut_ptr(),
            },
        };
        let mut output_bus = AudioBusBuffers {
            numChannels: audio.config.num_outputs as i32,
            silenceFlags: 0,
            __field0: AudioBusBuffers__type0 {
                channelBuffers32: output_ptrs.as_mut_ptr(),
            },
        };

        let has_input = audio.config.num_inputs > 0;
        let mut process_data = ProcessData {
            processMode: kRealtime as i32,
            symbolicSampleSize: kSample32 as i32,
            numSamples: num_samples as i32,
            numInputs: if has_input { 1 } else { 0 },
            numOutputs: 1,
            inputs: if has_input {
                &mut input_bus
            } else {
                std::ptr::null_mut()
            },
            outputs: &mut output_bus,
            inputParameterChanges: self
                .param_changes
                .as_com_ref::<IParameterChanges>()
                .map(|r| r.as_ptr())
                .unwrap_or(std::ptr::null_mut()),
            outputParameterChanges: self
                .output_param_changes
                .as_com_ref::<IParameterChanges>()
                .map(|r| r.as_ptr())
                .unwrap_or(std::ptr::null_mut()),
            inputEvents: self
                .event_list
                .as_com_ref::<IEventList>()
                .map(|r| r.as_ptr())
                .unwrap_or(std::ptr::null_mut()),
            outputEvents: std::ptr::null_mut(),
            processContext: std::ptr::null_mut(),
        };

        let result = unsafe { processor.process(&mut process_data) };
        self.event_list.clear();
        if result != kResultOk {
            tracing::warn!(result, "process returned failure");
        }
        Ok(())
    }

    /// No processor: copy input channels straight to output, zero the rest.
    fn process_passthrough(&self, num_samples: u32) -> Result<()> {
        let audio = self.audio.as_ref().ok_or(BridgeError::NotInitialized)?;
        let n = num_samples as usize;
        let shared = audio.config.num_inputs.min(audio.config.num_outputs) as usize;
        for ch in 0..audio.config.num_outputs as usize {
            let output = audio.channel.output_block(ch)?;
            if ch < shared {
                let input = audio.channel.input_block(ch)?;
                output[..n].copy_from_slice(&input[..n]);
            } else {
                output[..n].fill(0.0);
            }
        }
        Ok(())
    }

    pub fn audio_initialized(&self) -> bool {
        self.audio.is_some()
    }

    // -- editor --------------------------------------------------------------

    pub fn open_editor(&mut self) -> Result<plugbridge::protocol::EditorInfoResp> {
        if let Some(ref editor) = self.editor {
            return Ok(editor.info());
        }
        let view = self.create_view()?;
        let editor = Editor::open(view, &self.name)?;
        let info = editor.info();
        self.editor = Some(editor);
        tracing::info!(window_id = info.window_id, width = info.width, height = info.height, "editor opened");
        Ok(info)
    }

    pub fn close_editor(&mut self) {
        if self.editor.take().is_some() {
            tracing::info!("editor closed");
        }
    }

    /// Size of the open editor, or the view's preferred size without
    /// attaching one.
    pub fn editor_size(&mut self) -> Result<plugbridge::protocol::EditorInfoResp> {
        if let Some(ref editor) = self.editor {
            return Ok(editor.info());
        }
        // No editor view is a degradation, not an error: window id 0 tells
        // the controller there is nothing to embed.
        let Ok(view) = self.create_view() else {
            return Ok(plugbridge::protocol::EditorInfoResp::default());
        };
        let mut rect = vst3::Steinberg::ViewRect {
            left: 0,
            top: 0,
            right: 0,
            bottom: 0,
        };
        let (width, height) = if unsafe { view.getSize(&mut rect) } == kResultOk {
            (
                (rect.right - rect.left).max(0) as u32,
                (rect.bottom - rect.top).max(0) as u32,
            )
        } else {
            (0, 0)
        };
        Ok(plugbridge::protocol::EditorInfoResp {
            window_id: 0,
            width,
            height,
        })
    }

    fn create_view(&self) -> Result<ComPtr<IPlugView>> {
        let controller = self
            .controller
            .as_ref()
            .ok_or_else(|| BridgeError::EditorError("plugin has no edit controller".to_string()))?;
        let view_ptr = unsafe { controller.createView(b"editor\0".as_ptr() as *const c_char) };
        unsafe { ComPtr::from_raw(view_ptr) }
            .ok_or_else(|| BridgeError::EditorError("plugin has no editor view".to_string()))
    }

    pub fn pump_editor(&mut self) {
        if let Some(ref mut editor) = self.editor {
            editor.pump();
        }
    }
}

fn main_bus_channels(component: &ComPtr<IComponent>, direction: i32) -> u32 {
    unsafe {
        if component.getBusCount(kAudio as i32, direction) == 0 {
            return 0;
        }
        let mut info: BusInfo = std::mem::zeroed();
        if component.getBusInfo(kAudio as i32, direction, 0, &mut info) == kResultOk {
            info.channelCount.max(0) as u32
        } else {
            0
        }
    }
}

impl Drop for PluginSession {
    fn drop(&mut self) {
        // Symmetric teardown: editor, audio, connections, controller,
        // component. The module field drops after all of it.
        self.editor.take();
        self.stop_audio();
        unsafe {
            if let (Some(cc), Some(tc)) = (&self.comp_connection, &self.ctrl_connection) {
                cc.disconnect(tc.as_ptr());
                tc.disconnect(cc.as_ptr());
            }
            if let Some(ref controller) = self.controller {
                controller.setComponentHandler(std::ptr::null_mut());
                if self.separate_controller {
                    controller.terminate();
                }
            }
            self.component.terminate();
        }
    }
}

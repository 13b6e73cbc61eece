//! Error types shared by the bridge host and its controller-facing library.

use std::path::PathBuf;
use thiserror::Error;

/// Step of the plugin acquisition chain that failed.
///
/// Load is staged: every stage that fails unwinds all prior stages, so the
/// stage name in an error always identifies the first thing that went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Opening,
    EntryPoint,
    Factory,
    ClassLookup,
    Instantiation,
    Component,
    Initialization,
    Controller,
    Connection,
    AudioSetup,
    Activation,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStage::Opening => write!(f, "opening module"),
            LoadStage::EntryPoint => write!(f, "resolving entry points"),
            LoadStage::Factory => write!(f, "getting factory"),
            LoadStage::ClassLookup => write!(f, "looking up class"),
            LoadStage::Instantiation => write!(f, "creating instance"),
            LoadStage::Component => write!(f, "acquiring component"),
            LoadStage::Initialization => write!(f, "initializing"),
            LoadStage::Controller => write!(f, "acquiring controller"),
            LoadStage::Connection => write!(f, "connecting component and controller"),
            LoadStage::AudioSetup => write!(f, "setting up audio"),
            LoadStage::Activation => write!(f, "activating"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Plugin load failed at {stage} stage: {path}\n  Reason: {reason}")]
    LoadFailed {
        path: PathBuf,
        stage: LoadStage,
        reason: String,
    },

    #[error("Plugin error at {stage}: code {code:#x}")]
    PluginError { stage: LoadStage, code: i32 },

    #[error("No plugin loaded")]
    NotLoaded,

    #[error("Audio not initialized")]
    NotInitialized,

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Shared memory error: {0}")]
    SharedMemoryError(String),

    #[error("Plugin editor error: {0}")]
    EditorError(String),

    #[error("Plugin state error: {0}")]
    StateError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_stage_display() {
        assert_eq!(LoadStage::Opening.to_string(), "opening module");
        assert_eq!(LoadStage::EntryPoint.to_string(), "resolving entry points");
        assert_eq!(LoadStage::Factory.to_string(), "getting factory");
        assert_eq!(LoadStage::ClassLookup.to_string(), "looking up class");
        assert_eq!(LoadStage::Instantiation.to_string(), "creating instance");
        assert_eq!(LoadStage::Component.to_string(), "acquiring component");
        assert_eq!(LoadStage::Activation.to_string(), "activating");
    }

    #[test]
    fn test_bridge_error_display() {
        let err = BridgeError::LoadFailed {
            path: PathBuf::from("/tmp/missing.vst3"),
            stage: LoadStage::Opening,
            reason: "no such file".to_string(),
        };
        assert!(err.to_string().contains("opening module"));
        assert!(err.to_string().contains("no such file"));

        let err = BridgeError::PluginError {
            stage: LoadStage::Activation,
            code: 0x8000_4005u32 as i32,
        };
        assert!(err.to_string().contains("activating"));

        let err = BridgeError::NotLoaded;
        assert_eq!(err.to_string(), "No plugin loaded");
    }

    #[test]
    fn test_status_style_errors() {
        let err = BridgeError::InvalidParam("index 42 out of range".into());
        assert!(err.to_string().contains("index 42"));

        let err = BridgeError::SharedMemoryError("size mismatch".into());
        assert!(err.to_string().contains("size mismatch"));

        let err = BridgeError::EditorError("no view".into());
        assert!(err.to_string().contains("editor"));
    }
}

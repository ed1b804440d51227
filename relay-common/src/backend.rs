//! Backend identifiers and adapter state.

use serde::{Deserialize, Serialize};

/// Generation backends known to the relay.
///
/// The set is closed: adding a backend means adding a variant here and an
/// entry to [`BackendId::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    /// Code generation, debugging and programming questions
    Coder,
    /// Document and file processing
    Documents,
    /// Images, photos and video descriptions
    Multimodal,
    /// General purpose conversation
    General,
}

impl BackendId {
    /// All backend variants, in registry order.
    pub const ALL: [BackendId; 4] = [
        BackendId::Coder,
        BackendId::Documents,
        BackendId::Multimodal,
        BackendId::General,
    ];

    /// Position of this backend in [`BackendId::ALL`].
    pub fn index(self) -> usize {
        match self {
            BackendId::Coder => 0,
            BackendId::Documents => 1,
            BackendId::Multimodal => 2,
            BackendId::General => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::Coder => "coder",
            BackendId::Documents => "documents",
            BackendId::Multimodal => "multimodal",
            BackendId::General => "general",
        }
    }

    /// Parse a caller-supplied backend name.
    ///
    /// Accepts the canonical names case-insensitively, plus the model family
    /// names older clients send. Returns `None` for anything else, including
    /// `"auto"`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "coder" | "deepseek" => Some(BackendId::Coder),
            "documents" | "llama" => Some(BackendId::Documents),
            "multimodal" | "vicuna" => Some(BackendId::Multimodal),
            "general" | "gpt4all" => Some(BackendId::General),
            _ => None,
        }
    }

    /// Human-readable name for model listings.
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendId::Coder => "Coder",
            BackendId::Documents => "Documents",
            BackendId::Multimodal => "Multimodal",
            BackendId::General => "General",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BackendId::Coder => "Specialized for coding, debugging, and programming tasks",
            BackendId::Documents => "Optimized for document processing and large files",
            BackendId::Multimodal => "Multimodal model for images, videos, and rich content",
            BackendId::General => "General purpose conversational AI for everyday tasks",
        }
    }

    pub fn use_case(&self) -> &'static str {
        match self {
            BackendId::Coder => "Coding & Development",
            BackendId::Documents => "Files & Documents",
            BackendId::Multimodal => "Images & Videos",
            BackendId::General => "General Chat",
        }
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a backend adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    /// No initialization attempt has completed yet
    Uninitialized,
    /// The underlying resource loaded and is serving requests
    Ready,
    /// The resource is unavailable; requests are answered by the fallback responder
    Degraded,
}

impl AdapterState {
    pub fn is_ready(&self) -> bool {
        matches!(self, AdapterState::Ready)
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterState::Uninitialized => write!(f, "uninitialized"),
            AdapterState::Ready => write!(f, "ready"),
            AdapterState::Degraded => write!(f, "degraded"),
        }
    }
}

//! assistlink-core – Gemeinsame Typen
//!
//! Dieses Crate stellt die Identifikationstypen und die Protokollversion
//! bereit, die von Relay und Server gemeinsam genutzt werden.

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{ConversationId, DeviceId, ProtokollVersion, SessionId};

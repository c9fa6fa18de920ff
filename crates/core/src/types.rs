//! Gemeinsame Identifikationstypen fuer Assistlink
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Geraete-ID wie sie vom Host vergeben wird (z.B. "mock-device-id")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device:{}", self.0)
    }
}

/// Konversations-ID der Sprach-Pipeline (vom Geraet mitgeliefert oder leer)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conversation:{}", self.0)
    }
}

/// Eindeutige Relay-Session-ID (nur fuer Logging und Telemetrie)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Erstellt eine neue zufaellige SessionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Faehigkeitsstufe des Geraets
///
/// V1 sendet nur Mikrofon-Audio, V2 empfaengt zusaetzlich TTS-Audio ueber UDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtokollVersion {
    V1,
    V2,
}

impl ProtokollVersion {
    /// Erstellt die Version aus der numerischen Geraeteangabe (0/1 -> V1, >=2 -> V2)
    pub fn aus_nummer(nummer: u32) -> Self {
        if nummer >= 2 {
            Self::V2
        } else {
            Self::V1
        }
    }

    /// Kann das Geraet synthetisiertes Audio ueber den Socket empfangen?
    pub fn unterstuetzt_audio_ausgabe(&self) -> bool {
        *self >= Self::V2
    }
}

impl Default for ProtokollVersion {
    fn default() -> Self {
        Self::V1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_eindeutig() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b, "Zwei neue SessionIds muessen verschieden sein");
    }

    #[test]
    fn device_id_display() {
        let id = DeviceId::new("mock-device-id");
        assert_eq!(id.to_string(), "device:mock-device-id");
        assert_eq!(id.as_str(), "mock-device-id");
    }

    #[test]
    fn protokoll_version_aus_nummer() {
        assert_eq!(ProtokollVersion::aus_nummer(0), ProtokollVersion::V1);
        assert_eq!(ProtokollVersion::aus_nummer(1), ProtokollVersion::V1);
        assert_eq!(ProtokollVersion::aus_nummer(2), ProtokollVersion::V2);
        assert_eq!(ProtokollVersion::aus_nummer(3), ProtokollVersion::V2);
    }

    #[test]
    fn nur_v2_unterstuetzt_audio_ausgabe() {
        assert!(!ProtokollVersion::V1.unterstuetzt_audio_ausgabe());
        assert!(ProtokollVersion::V2.unterstuetzt_audio_ausgabe());
    }

    #[test]
    fn ids_sind_serde_kompatibel() {
        let id = DeviceId::new("abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc\"");
        let id2: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, id2);

        let v: ProtokollVersion = serde_json::from_str("\"v2\"").unwrap();
        assert_eq!(v, ProtokollVersion::V2);
    }
}

//! In-Memory-Medienspeicher fuer synthetisiertes Audio
//!
//! Die Echo-Pipeline legt ihre Antwort hier ab und meldet nur die
//! Medien-ID im `tts-end`-Event. Der Relay holt das Audio ueber
//! `MedienQuelle::audio_laden` wieder ab. Abgeholte Eintraege werden entfernt.

use anyhow::anyhow;
use assistlink_voice::{MedienAudio, MedienQuelle};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use uuid::Uuid;

/// Thread-sicherer Speicher fuer TTS-Medien (media_id -> Audio)
#[derive(Debug, Default)]
pub struct SpeicherMedien {
    eintraege: DashMap<String, MedienAudio>,
}

impl SpeicherMedien {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Legt Audio ab und gibt die neue Medien-ID zurueck
    pub fn ablegen(&self, format: &str, daten: Bytes) -> String {
        let media_id = Uuid::new_v4().to_string();
        self.eintraege.insert(
            media_id.clone(),
            MedienAudio {
                format: format.to_string(),
                daten,
            },
        );
        tracing::debug!(media_id = %media_id, format, "Medium abgelegt");
        media_id
    }

    pub fn len(&self) -> usize {
        self.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.is_empty()
    }

    /// Verwirft alle nicht abgeholten Medien, gibt die Anzahl zurueck
    pub fn leeren(&self) -> usize {
        let anzahl = self.eintraege.len();
        self.eintraege.clear();
        if anzahl > 0 {
            tracing::debug!(anzahl, "Nicht abgeholte Medien verworfen");
        }
        anzahl
    }
}

#[async_trait]
impl MedienQuelle for SpeicherMedien {
    async fn audio_laden(&self, media_id: &str) -> anyhow::Result<MedienAudio> {
        self.eintraege
            .remove(media_id)
            .map(|(_, audio)| audio)
            .ok_or_else(|| anyhow!("Medium '{media_id}' nicht gefunden"))
    }
}

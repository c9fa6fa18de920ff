//! Pipeline-Anbindung – startet die Sprach-Pipeline fuer eine Session
//!
//! Die Pipeline selbst (Wake-Word, STT, Intent, TTS) ist extern und wird
//! ueber den `PipelineRunner` angebunden. Der Relay liefert ihr das
//! Mikrofon-Audio als Stream und nimmt ihre Events ueber einen Callback
//! entgegen.
//!
//! ## Ablauf
//!
//! ```text
//! PipelineStart (Flags, IDs)
//!     |
//!     v
//! PipelineAnfrage ──> PipelineRunner::ausfuehren(anfrage, eingangs_stream, callback)
//!                              |
//!                              +──> event_verarbeiten() ──> SessionHandler
//!                              |           |
//!                              |           +── tts-end (v2) ──> TTS-Task
//!                              v
//!                     Ok: auf TTS-Abschluss warten (falls gestartet)
//!                     WakeWordAbgebrochen: ignorieren
//!                     WakeWord-Fehler: error-Event an den Handler
//! ```

use crate::events::{event_uebersetzen, AssistEvent, PipelineEvent};
use crate::tts::{ABTASTRATE, KANAELE, SAMPLE_BREITE};
use crate::udp::{EingangsStream, RelaySession};
use assistlink_core::{ConversationId, DeviceId, ProtokollVersion};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Befehls-Flags
// ---------------------------------------------------------------------------

/// Bitflags des Geraets beim Pipeline-Start
pub struct BefehlsFlags;

impl BefehlsFlags {
    /// Sprachaktivitaetserkennung aktivieren
    pub const USE_VAD: u32 = 1;
    /// Pipeline mit Wake-Word-Erkennung beginnen
    pub const USE_WAKE_WORD: u32 = 2;
}

/// Erste Stufe der Pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStufe {
    WakeWord,
    Stt,
}

impl PipelineStufe {
    pub fn aus_flags(flags: u32) -> Self {
        if flags & BefehlsFlags::USE_WAKE_WORD != 0 {
            Self::WakeWord
        } else {
            Self::Stt
        }
    }
}

// ---------------------------------------------------------------------------
// Anfrage
// ---------------------------------------------------------------------------

/// Audio-Vorverarbeitung, vom Geraet vorgegeben
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioEinstellungen {
    pub noise_suppression_level: u32,
    pub auto_gain_dbfs: u32,
    pub volume_multiplier: f32,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            noise_suppression_level: 0,
            auto_gain_dbfs: 0,
            volume_multiplier: 1.0,
        }
    }
}

impl AudioEinstellungen {
    /// Fehlende Einstellungen oder Lautstaerke 0 ergeben die Standardwerte
    pub fn oder_standard(einstellungen: Option<Self>) -> Self {
        match einstellungen {
            Some(e) if e.volume_multiplier != 0.0 => e,
            _ => Self::default(),
        }
    }
}

/// Format des Mikrofon-Audios
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SprachMetadaten {
    pub abtastrate: u32,
    pub bits: u16,
    pub kanaele: u16,
}

impl Default for SprachMetadaten {
    fn default() -> Self {
        Self {
            abtastrate: ABTASTRATE,
            bits: SAMPLE_BREITE * 8,
            kanaele: KANAELE,
        }
    }
}

/// Gewuenschtes Ausgabeformat der Sprachsynthese
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsAusgabeFormat {
    /// Fuer den UDP-Rueckkanal (v2)
    Raw,
    /// Abspiel-URL fuer v1-Geraete
    Mp3,
}

impl TtsAusgabeFormat {
    pub fn fuer_protokoll(protokoll: ProtokollVersion) -> Self {
        if protokoll.unterstuetzt_audio_ausgabe() {
            Self::Raw
        } else {
            Self::Mp3
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Mp3 => "mp3",
        }
    }
}

/// Start-Befehl des Geraets
#[derive(Debug, Clone)]
pub struct PipelineStart {
    pub device_id: DeviceId,
    pub conversation_id: Option<ConversationId>,
    pub flags: u32,
    pub audio_einstellungen: Option<AudioEinstellungen>,
}

/// Vollstaendige Anfrage an die Sprach-Pipeline
#[derive(Debug, Clone)]
pub struct PipelineAnfrage {
    pub device_id: DeviceId,
    pub conversation_id: Option<ConversationId>,
    pub start_stufe: PipelineStufe,
    pub vad_aktiv: bool,
    pub audio_einstellungen: AudioEinstellungen,
    pub metadaten: SprachMetadaten,
    pub tts_format: TtsAusgabeFormat,
}

impl PipelineAnfrage {
    pub fn neu(start: PipelineStart, protokoll: ProtokollVersion) -> Self {
        Self {
            device_id: start.device_id,
            conversation_id: start.conversation_id,
            start_stufe: PipelineStufe::aus_flags(start.flags),
            vad_aktiv: start.flags & BefehlsFlags::USE_VAD != 0,
            audio_einstellungen: AudioEinstellungen::oder_standard(start.audio_einstellungen),
            metadaten: SprachMetadaten::default(),
            tts_format: TtsAusgabeFormat::fuer_protokoll(protokoll),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineRunner
// ---------------------------------------------------------------------------

/// Callback fuer Pipeline-Events
pub type EventCallback = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Fehler der Sprach-Pipeline
#[derive(Debug, Error)]
pub enum PipelineFehler {
    /// Wake-Word-Erkennung ohne Ergebnis beendet (z.B. Audio-Ende)
    #[error("Wake-Word-Erkennung abgebrochen")]
    WakeWordAbgebrochen,

    #[error("Wake-Word-Erkennung fehlgeschlagen ({code}): {message}")]
    WakeWord { code: String, message: String },

    #[error(transparent)]
    Sonstiges(#[from] anyhow::Error),
}

/// Externe Sprach-Pipeline
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn ausfuehren(
        &self,
        anfrage: PipelineAnfrage,
        audio: EingangsStream,
        events: EventCallback,
    ) -> Result<(), PipelineFehler>;
}

// ---------------------------------------------------------------------------
// Orchestrierung
// ---------------------------------------------------------------------------

impl RelaySession {
    /// Fuehrt die Sprach-Pipeline mit dem Mikrofon-Audio dieser Session aus
    ///
    /// Kehrt erst zurueck wenn ein gestarteter TTS-Versand abgeschlossen ist.
    pub async fn pipeline_ausfuehren(
        &self,
        runner: &dyn PipelineRunner,
        start: PipelineStart,
    ) -> Result<(), PipelineFehler> {
        let anfrage = PipelineAnfrage::neu(start, self.protokoll());
        tracing::debug!(
            session = %self.inner.id,
            device = %anfrage.device_id,
            stufe = ?anfrage.start_stufe,
            vad = anfrage.vad_aktiv,
            tts_format = anfrage.tts_format.as_str(),
            "Starte Sprach-Pipeline"
        );

        let session = self.clone();
        let callback: EventCallback = Arc::new(move |event| session.event_verarbeiten(event));

        match runner
            .ausfuehren(anfrage, self.eingangs_stream(), callback)
            .await
        {
            Ok(()) => {
                if self.tts_aktiv() {
                    self.tts_abgeschlossen().await;
                }
                Ok(())
            }
            Err(PipelineFehler::WakeWordAbgebrochen) => {
                tracing::debug!(session = %self.inner.id, "Wake-Word-Erkennung abgebrochen");
                Ok(())
            }
            Err(PipelineFehler::WakeWord { code, message }) => {
                tracing::warn!(session = %self.inner.id, code = %code, "Wake-Word-Fehler: {message}");
                let event = AssistEvent::fehler(code, message);
                self.inner.handler.event_behandeln(event.typ, event.daten);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Leitet ein Pipeline-Event an den Handler weiter und startet ggf. den TTS-Versand
    pub fn event_verarbeiten(&self, event: PipelineEvent) {
        let Some(uebersetzt) = event_uebersetzen(&event) else {
            tracing::warn!(session = %self.inner.id, event = ?event, "Unbekannter Event-Typ empfangen");
            return;
        };

        tracing::trace!(session = %self.inner.id, event = event.name(), "Pipeline-Event");
        self.inner
            .handler
            .event_behandeln(uebersetzt.typ, uebersetzt.daten);

        match &event {
            PipelineEvent::TtsEnd { .. } => {
                let media_id = event
                    .tts_media_id()
                    .filter(|_| self.protokoll().unterstuetzt_audio_ausgabe());
                match media_id {
                    Some(id) => self.tts_starten(id.to_string()),
                    None => self.inner.tts_signal.setzen(),
                }
            }
            PipelineEvent::Error { .. } => self.inner.tts_signal.setzen(),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! assistlink-voice – UDP Audio-Relay fuer Sprachassistenten
//!
//! Pro Session ein UDP-Socket: Mikrofon-Audio vom Geraet geht als Stream in
//! die Sprach-Pipeline, synthetisierte Sprache geht ueber denselben Socket
//! zurueck an das Geraet.
//!
//! ## Module
//! - [`queue`] – Eingangs-Queue mit Ende-Marker
//! - [`udp`] – Socket-Lebenszyklus, Empfangs-Loop, Eingangs-Stream
//! - [`events`] – Pipeline-Events und ihre Uebersetzung
//! - [`tts`] – TTS-Rueckkanal (Medien laden, WAV pruefen, getaktet senden)
//! - [`pipeline`] – Anbindung der externen Sprach-Pipeline
//! - [`wav`] – WAV-Container lesen und schreiben
//! - [`telemetry`] – Zaehler pro Session
//! - [`error`] – Fehlertypen

pub mod error;
pub mod events;
pub mod pipeline;
pub mod queue;
pub mod telemetry;
pub mod tts;
pub mod udp;
pub mod wav;

pub use error::{RelayError, RelayResult};
pub use events::{event_uebersetzen, AssistEvent, AssistEventTyp, EventDaten, PipelineEvent, TtsAusgabe};
pub use pipeline::{
    AudioEinstellungen, BefehlsFlags, EventCallback, PipelineAnfrage, PipelineFehler,
    PipelineRunner, PipelineStart, PipelineStufe, SprachMetadaten, TtsAusgabeFormat,
};
pub use telemetry::{RelaySnapshot, RelayStatistik};
pub use tts::{MedienAudio, MedienQuelle};
pub use udp::{EingangsStream, RelayConfig, RelaySession, SessionHandler};

//! Pipeline-Events und ihre Uebersetzung fuer das Geraet
//!
//! Die Sprach-Pipeline meldet ihren Fortschritt als `PipelineEvent`.
//! Das Geraet kennt nur eine vereinfachte Form (`AssistEvent`): einen
//! Event-Typ plus optionale Schluessel/Wert-Daten.
//!
//! `event_uebersetzen` ist eine reine Funktion; die Weitergabe an den
//! `SessionHandler` und das Ausloesen des TTS-Rueckkanals passiert in
//! `RelaySession::event_verarbeiten`.

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Schluessel/Wert-Daten eines Events fuer das Geraet
pub type EventDaten = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// Ausgabe der Sprachsynthese
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsAusgabe {
    /// Medien-ID fuer den Abruf des synthetisierten Audios
    pub media_id: Option<String>,
    /// Abspiel-URL fuer Geraete ohne Audio-Rueckkanal
    pub url: Option<String>,
}

impl TtsAusgabe {
    /// Gibt true zurueck wenn weder Medien-ID noch URL gesetzt sind
    pub fn ist_leer(&self) -> bool {
        self.media_id.is_none() && self.url.is_none()
    }
}

/// Lebenszyklus-Event der Sprach-Pipeline
///
/// Wire-Form: `{"type": "<kind>", "data": {...}}`. Beim Einlesen wird
/// `data` bei Events ohne Nutzdaten ignoriert, unbekannte Typen landen mit
/// ihrem Namen in `Unknown`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum PipelineEvent {
    RunStart,
    RunEnd,
    WakeWordStart,
    WakeWordEnd,
    SttStart,
    SttEnd {
        text: String,
    },
    SttVadStart,
    SttVadEnd,
    IntentStart,
    IntentEnd {
        conversation_id: Option<String>,
    },
    TtsStart {
        text: String,
    },
    TtsEnd {
        tts_output: Option<TtsAusgabe>,
    },
    Error {
        code: String,
        message: String,
    },
    /// Event-Typ, den der Relay nicht kennt (Roh-Name)
    Unknown(String),
}

/// Event in der Wire-Form vor der Zuordnung zum Typ
#[derive(Deserialize)]
struct RohesEvent {
    #[serde(rename = "type")]
    typ: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct TextDaten {
    text: String,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct IntentDaten {
    conversation_id: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct TtsEndDaten {
    tts_output: Option<TtsAusgabe>,
}

#[derive(Deserialize)]
struct FehlerDaten {
    code: String,
    message: String,
}

/// Liest die Nutzdaten eines Events; fehlendes `data` zaehlt als leeres Objekt
fn nutzdaten<T: DeserializeOwned>(data: serde_json::Value) -> serde_json::Result<T> {
    let data = match data {
        serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
        andere => andere,
    };
    serde_json::from_value(data)
}

impl RohesEvent {
    fn aufloesen(self) -> serde_json::Result<PipelineEvent> {
        use PipelineEvent as E;

        let event = match self.typ.as_str() {
            "run-start" => E::RunStart,
            "run-end" => E::RunEnd,
            "wake-word-start" => E::WakeWordStart,
            "wake-word-end" => E::WakeWordEnd,
            "stt-start" => E::SttStart,
            "stt-vad-start" => E::SttVadStart,
            "stt-vad-end" => E::SttVadEnd,
            "intent-start" => E::IntentStart,
            "stt-end" => {
                let TextDaten { text } = nutzdaten(self.data)?;
                E::SttEnd { text }
            }
            "intent-end" => {
                let IntentDaten { conversation_id } = nutzdaten(self.data)?;
                E::IntentEnd { conversation_id }
            }
            "tts-start" => {
                let TextDaten { text } = nutzdaten(self.data)?;
                E::TtsStart { text }
            }
            "tts-end" => {
                let TtsEndDaten { tts_output } = nutzdaten(self.data)?;
                E::TtsEnd { tts_output }
            }
            "error" => {
                let FehlerDaten { code, message } = nutzdaten(self.data)?;
                E::Error { code, message }
            }
            _ => E::Unknown(self.typ),
        };
        Ok(event)
    }
}

impl<'de> Deserialize<'de> for PipelineEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RohesEvent::deserialize(deserializer)?
            .aufloesen()
            .map_err(de::Error::custom)
    }
}

impl PipelineEvent {
    /// Gibt den Event-Namen als String zurueck (fuer Logging)
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStart => "run-start",
            Self::RunEnd => "run-end",
            Self::WakeWordStart => "wake-word-start",
            Self::WakeWordEnd => "wake-word-end",
            Self::SttStart => "stt-start",
            Self::SttEnd { .. } => "stt-end",
            Self::SttVadStart => "stt-vad-start",
            Self::SttVadEnd => "stt-vad-end",
            Self::IntentStart => "intent-start",
            Self::IntentEnd { .. } => "intent-end",
            Self::TtsStart { .. } => "tts-start",
            Self::TtsEnd { .. } => "tts-end",
            Self::Error { .. } => "error",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Medien-ID eines `tts-end`-Events, falls vorhanden und nicht leer
    pub fn tts_media_id(&self) -> Option<&str> {
        match self {
            Self::TtsEnd {
                tts_output: Some(ausgabe),
            } => ausgabe.media_id.as_deref().filter(|id| !id.is_empty()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// AssistEvent
// ---------------------------------------------------------------------------

/// Event-Typen, die an das Geraet gemeldet werden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistEventTyp {
    Error,
    RunStart,
    RunEnd,
    WakeWordStart,
    WakeWordEnd,
    SttStart,
    SttEnd,
    SttVadStart,
    SttVadEnd,
    IntentStart,
    IntentEnd,
    TtsStart,
    TtsEnd,
    TtsStreamStart,
    TtsStreamEnd,
}

impl AssistEventTyp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::RunStart => "run_start",
            Self::RunEnd => "run_end",
            Self::WakeWordStart => "wake_word_start",
            Self::WakeWordEnd => "wake_word_end",
            Self::SttStart => "stt_start",
            Self::SttEnd => "stt_end",
            Self::SttVadStart => "stt_vad_start",
            Self::SttVadEnd => "stt_vad_end",
            Self::IntentStart => "intent_start",
            Self::IntentEnd => "intent_end",
            Self::TtsStart => "tts_start",
            Self::TtsEnd => "tts_end",
            Self::TtsStreamStart => "tts_stream_start",
            Self::TtsStreamEnd => "tts_stream_end",
        }
    }
}

/// Vereinfachtes Event fuer das Geraet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistEvent {
    pub typ: AssistEventTyp,
    pub daten: Option<EventDaten>,
}

impl AssistEvent {
    fn ohne_daten(typ: AssistEventTyp) -> Self {
        Self { typ, daten: None }
    }

    fn mit_daten<const N: usize>(typ: AssistEventTyp, paare: [(&str, String); N]) -> Self {
        let daten = paare
            .into_iter()
            .map(|(schluessel, wert)| (schluessel.to_string(), wert))
            .collect();
        Self {
            typ,
            daten: Some(daten),
        }
    }

    /// Fehler-Event mit Code und Meldung
    pub fn fehler(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::mit_daten(
            AssistEventTyp::Error,
            [("code", code.into()), ("message", message.into())],
        )
    }
}

/// Uebersetzt ein Pipeline-Event in die Form fuer das Geraet
///
/// Unbekannte Event-Typen ergeben `None`.
pub fn event_uebersetzen(event: &PipelineEvent) -> Option<AssistEvent> {
    use AssistEventTyp as T;

    let uebersetzt = match event {
        PipelineEvent::RunStart => AssistEvent::ohne_daten(T::RunStart),
        PipelineEvent::RunEnd => AssistEvent::ohne_daten(T::RunEnd),
        PipelineEvent::WakeWordStart => AssistEvent::ohne_daten(T::WakeWordStart),
        PipelineEvent::WakeWordEnd => AssistEvent::ohne_daten(T::WakeWordEnd),
        PipelineEvent::SttStart => AssistEvent::ohne_daten(T::SttStart),
        PipelineEvent::SttEnd { text } => AssistEvent::mit_daten(T::SttEnd, [("text", text.clone())]),
        PipelineEvent::SttVadStart => AssistEvent::ohne_daten(T::SttVadStart),
        PipelineEvent::SttVadEnd => AssistEvent::ohne_daten(T::SttVadEnd),
        PipelineEvent::IntentStart => AssistEvent::ohne_daten(T::IntentStart),
        PipelineEvent::IntentEnd { conversation_id } => AssistEvent::mit_daten(
            T::IntentEnd,
            [("conversation_id", conversation_id.clone().unwrap_or_default())],
        ),
        PipelineEvent::TtsStart { text } => {
            AssistEvent::mit_daten(T::TtsStart, [("text", text.clone())])
        }
        PipelineEvent::TtsEnd { tts_output } => match tts_output {
            Some(ausgabe) if !ausgabe.ist_leer() => AssistEvent::mit_daten(
                T::TtsEnd,
                [("url", ausgabe.url.clone().unwrap_or_default())],
            ),
            // Leere TTS-Antwort
            _ => AssistEvent {
                typ: T::TtsEnd,
                daten: Some(EventDaten::new()),
            },
        },
        PipelineEvent::Error { code, message } => AssistEvent::fehler(code.clone(), message.clone()),
        PipelineEvent::Unknown(_) => return None,
    };

    Some(uebersetzt)
}

//! TTS-Rueckkanal – synthetisiertes Audio an das Geraet streamen
//!
//! Nach `tts-end` laedt der Relay das Audio ueber die `MedienQuelle`,
//! prueft den WAV-Container (16 kHz / 16 Bit / Mono) und sendet die PCM-Daten
//! in Datagrammen von hoechstens `paket_groesse` Bytes an die Gegenstelle.
//! Gesendet wird etwas schneller als Echtzeit (`tempo_faktor`), damit der
//! Puffer im Geraet nicht leerlaeuft.
//!
//! Der Versand laeuft als eigener Task. Pro Session ist hoechstens ein
//! Versand aktiv; ein weiteres `tts-end` waehrend eines laufenden Versands
//! wird verworfen.

use crate::error::{RelayError, RelayResult};
use crate::events::{AssistEventTyp, EventDaten};
use crate::udp::RelaySession;
use crate::wav::WavAudio;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Erwartete Abtastrate fuer Ein- und Ausgabe
pub const ABTASTRATE: u32 = 16000;
/// Bytes pro Sample (16 Bit)
pub const SAMPLE_BREITE: u16 = 2;
/// Mono
pub const KANAELE: u16 = 1;

/// Handle des laufenden TTS-Versands
pub(crate) type TtsTask = JoinHandle<RelayResult<()>>;

// ---------------------------------------------------------------------------
// MedienQuelle
// ---------------------------------------------------------------------------

/// Aufgeloestes Medium
#[derive(Debug, Clone)]
pub struct MedienAudio {
    /// Container-Format, z.B. "wav" oder "mp3"
    pub format: String,
    pub daten: Bytes,
}

/// Loest eine TTS-Medien-ID in Audio-Bytes auf
#[async_trait]
pub trait MedienQuelle: Send + Sync {
    async fn audio_laden(&self, media_id: &str) -> anyhow::Result<MedienAudio>;
}

// ---------------------------------------------------------------------------
// AbschlussSignal
// ---------------------------------------------------------------------------

/// Signal "TTS-Versand abgeschlossen", auf das beliebig viele Aufrufer warten koennen
pub(crate) struct AbschlussSignal {
    tx: watch::Sender<bool>,
}

impl AbschlussSignal {
    pub(crate) fn neu() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub(crate) fn zuruecksetzen(&self) {
        self.tx.send_replace(false);
    }

    pub(crate) fn setzen(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) async fn abwarten(&self) {
        let mut rx = self.tx.subscribe();
        // Fehler nur wenn der Sender weg ist, dann gibt es nichts mehr zu warten
        let _ = rx.wait_for(|fertig| *fertig).await;
    }
}

// ---------------------------------------------------------------------------
// Versand
// ---------------------------------------------------------------------------

/// Setzt das Abschluss-Signal beim Verlassen des Versands, auch bei Panic oder Abbruch
struct SignalWaechter<'a>(&'a AbschlussSignal);

impl Drop for SignalWaechter<'_> {
    fn drop(&mut self) {
        self.0.setzen();
    }
}

impl RelaySession {
    /// Laedt das TTS-Audio und streamt es an das Geraet
    ///
    /// Sendet nur solange die Session laeuft. Das Abschluss-Signal wird
    /// bei jedem Aufruf genau einmal gesetzt, auch im Fehlerfall.
    /// Auf `tts_stream_start` folgt immer ein `tts_stream_end`.
    ///
    /// # Fehler
    /// - `FalschesFormat` wenn das Medium kein WAV ist
    /// - `FalschesAudioformat` bei anderer Rate/Breite/Kanalzahl als 16000/2/1
    /// - `Medien` wenn die `MedienQuelle` fehlschlaegt
    pub async fn audio_senden(&self, media_id: &str) -> RelayResult<()> {
        self.inner.tts_signal.zuruecksetzen();
        let _waechter = SignalWaechter(&self.inner.tts_signal);

        let ergebnis = self.audio_senden_intern(media_id).await;

        self.inner.statistik.tts_abgeschlossen(ergebnis.is_ok());
        if let Err(e) = &ergebnis {
            tracing::warn!(
                session = %self.inner.id,
                media_id,
                fehler = %e,
                "TTS-Versand fehlgeschlagen"
            );
        }
        ergebnis
    }

    async fn audio_senden_intern(&self, media_id: &str) -> RelayResult<()> {
        let Some((socket, ziel)) = self.sende_ziel() else {
            tracing::debug!(session = %self.inner.id, "Session laeuft nicht, kein TTS-Versand");
            return Ok(());
        };

        self.inner
            .handler
            .event_behandeln(AssistEventTyp::TtsStreamStart, Some(EventDaten::new()));

        let ergebnis = self.medium_streamen(&socket, ziel, media_id).await;

        self.inner
            .handler
            .event_behandeln(AssistEventTyp::TtsStreamEnd, Some(EventDaten::new()));
        ergebnis
    }

    async fn medium_streamen(
        &self,
        socket: &tokio::net::UdpSocket,
        ziel: std::net::SocketAddr,
        media_id: &str,
    ) -> RelayResult<()> {
        let medium = self.inner.medien.audio_laden(media_id).await?;
        if !medium.format.eq_ignore_ascii_case("wav") {
            return Err(RelayError::FalschesFormat(medium.format));
        }

        let wav = WavAudio::parsen(&medium.daten)?;
        wav.format_pruefen(ABTASTRATE, SAMPLE_BREITE, KANAELE)?;

        tracing::debug!(
            session = %self.inner.id,
            bytes = wav.samples.len(),
            ziel = %ziel,
            "Sende TTS-Audio"
        );
        self.chunks_senden(socket, ziel, &wav.samples).await
    }

    async fn chunks_senden(
        &self,
        socket: &tokio::net::UdpSocket,
        ziel: std::net::SocketAddr,
        samples: &Bytes,
    ) -> RelayResult<()> {
        let bytes_pro_sample = SAMPLE_BREITE as usize;
        // Chunks muessen ganze Samples enthalten
        let chunk_groesse = (self.inner.config.paket_groesse / bytes_pro_sample).max(1) * bytes_pro_sample;
        let tempo = self.inner.config.tempo_faktor;

        for chunk in samples.chunks(chunk_groesse) {
            if !self.laeuft() {
                tracing::debug!(session = %self.inner.id, "Session gestoppt, TTS-Versand abgebrochen");
                break;
            }

            if let Err(e) = socket.send_to(chunk, ziel).await {
                let fehler = std::io::Error::new(e.kind(), e.to_string());
                self.transportfehler(e);
                return Err(fehler.into());
            }
            self.inner.statistik.datagramm_gesendet(chunk.len());

            let samples_im_chunk = chunk.len() / bytes_pro_sample;
            let pause = samples_im_chunk as f64 / ABTASTRATE as f64 * tempo;
            // Negative oder ungueltige Faktoren senden ohne Pause
            tokio::time::sleep(Duration::try_from_secs_f64(pause).unwrap_or(Duration::ZERO)).await;
        }

        Ok(())
    }

    /// Startet den TTS-Versand als eigenen Task (hoechstens einer gleichzeitig)
    pub(crate) fn tts_starten(&self, media_id: String) {
        let mut slot = self.inner.tts_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::warn!(
                session = %self.inner.id,
                media_id = %media_id,
                "TTS-Versand laeuft bereits, neues tts-end verworfen"
            );
            return;
        }

        self.inner.tts_signal.zuruecksetzen();
        let session = self.clone();
        *slot = Some(tokio::spawn(async move {
            session.audio_senden(&media_id).await
        }));
    }

    /// Ist ein TTS-Versand gestartet und noch nicht abgeholt?
    pub fn tts_aktiv(&self) -> bool {
        self.inner.tts_task.lock().is_some()
    }

    /// Wartet bis der aktuelle TTS-Versand abgeschlossen ist
    pub async fn tts_abgeschlossen(&self) {
        self.inner.tts_signal.abwarten().await;
    }

    /// Wartet auf den laufenden TTS-Task und liefert sein Ergebnis
    ///
    /// `None` wenn kein Versand gestartet wurde.
    pub async fn tts_task_abwarten(&self) -> Option<RelayResult<()>> {
        let task = self.inner.tts_task.lock().take()?;
        Some(match task.await {
            Ok(ergebnis) => ergebnis,
            Err(e) => Err(RelayError::Intern(format!("TTS-Task abgebrochen: {e}"))),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

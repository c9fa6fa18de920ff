//! Echo-Pipeline – spielt das aufgenommene Audio als "TTS-Antwort" zurueck
//!
//! Ersetzt Wake-Word, STT, Intent und TTS durch eine Schleife: das
//! Mikrofon-Audio wird bis zur Stille (oder bis zur Maximallaenge)
//! gesammelt, als WAV im `SpeicherMedien` abgelegt und per `tts-end`
//! gemeldet. Der Relay streamt es dann ueber den Rueckkanal zurueck.
//! v1-Geraete haben keinen Rueckkanal und bekommen ein leeres `tts-end`.
//!
//! ## Event-Folge
//!
//! ```text
//! run-start, stt-start, stt-vad-start, stt-vad-end, stt-end,
//! intent-start, intent-end, tts-start, tts-end, run-end
//! ```

use crate::config::EchoEinstellungen;
use crate::medien::SpeicherMedien;
use assistlink_voice::wav::wav_kodieren;
use assistlink_voice::{
    EingangsStream, EventCallback, PipelineAnfrage, PipelineEvent, PipelineFehler,
    PipelineRunner, PipelineStufe, TtsAusgabe, TtsAusgabeFormat,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use std::sync::Arc;

pub struct EchoPipeline {
    einstellungen: EchoEinstellungen,
    medien: Arc<SpeicherMedien>,
}

impl EchoPipeline {
    pub fn neu(einstellungen: EchoEinstellungen, medien: Arc<SpeicherMedien>) -> Self {
        Self {
            einstellungen,
            medien,
        }
    }

    /// Sammelt Audio bis Stream-Ende, Stille oder Maximallaenge
    ///
    /// Auf das erste Datagramm wird ohne Zeitlimit gewartet.
    async fn aufnehmen(&self, audio: &mut EingangsStream, events: &EventCallback) -> BytesMut {
        let max = self.einstellungen.max_aufnahme_bytes();
        let stille = self.einstellungen.stille_timeout();
        let mut aufnahme = BytesMut::new();

        let Some(erstes) = audio.next().await else {
            return aufnahme;
        };
        events(PipelineEvent::SttVadStart);
        aufnahme.extend_from_slice(&erstes);

        while aufnahme.len() < max {
            match tokio::time::timeout(stille, audio.next()).await {
                Ok(Some(daten)) => aufnahme.extend_from_slice(&daten),
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(bytes = aufnahme.len(), "Stille erkannt, Aufnahme beendet");
                    break;
                }
            }
        }
        aufnahme.truncate(max);
        events(PipelineEvent::SttVadEnd);
        aufnahme
    }
}

/// Skaliert 16-Bit-PCM (little-endian) mit dem Lautstaerke-Faktor
fn lautstaerke_anwenden(pcm: &mut [u8], faktor: f32) {
    if (faktor - 1.0).abs() < f32::EPSILON {
        return;
    }
    for sample in pcm.chunks_exact_mut(2) {
        let wert = i16::from_le_bytes([sample[0], sample[1]]) as f32 * faktor;
        let wert = wert.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        sample.copy_from_slice(&wert.to_le_bytes());
    }
}

#[async_trait]
impl PipelineRunner for EchoPipeline {
    async fn ausfuehren(
        &self,
        anfrage: PipelineAnfrage,
        mut audio: EingangsStream,
        events: EventCallback,
    ) -> Result<(), PipelineFehler> {
        if anfrage.start_stufe == PipelineStufe::WakeWord {
            return Err(PipelineFehler::WakeWord {
                code: "wake-engine-missing".into(),
                message: "Echo-Pipeline hat keine Wake-Word-Erkennung".into(),
            });
        }

        events(PipelineEvent::RunStart);
        events(PipelineEvent::SttStart);

        let mut aufnahme = self.aufnehmen(&mut audio, &events).await;
        // Stream freigeben, der Relay braucht ihn nicht mehr
        drop(audio);

        if aufnahme.is_empty() {
            events(PipelineEvent::Error {
                code: "stt-no-text-recognized".into(),
                message: "Kein Audio empfangen".into(),
            });
            events(PipelineEvent::RunEnd);
            return Ok(());
        }

        let dauer_ms = aufnahme.len() as u64 / 32;
        let text = format!("{dauer_ms} ms Audio");
        events(PipelineEvent::SttEnd { text: text.clone() });

        events(PipelineEvent::IntentStart);
        events(PipelineEvent::IntentEnd {
            conversation_id: anfrage.conversation_id.map(|id| id.0),
        });

        events(PipelineEvent::TtsStart { text });

        // Ohne Audio-Rueckkanal holt niemand das Medium ab
        if anfrage.tts_format != TtsAusgabeFormat::Raw {
            tracing::info!(device = %anfrage.device_id, dauer_ms, "Echo ohne Audio-Rueckkanal");
            events(PipelineEvent::TtsEnd { tts_output: None });
            events(PipelineEvent::RunEnd);
            return Ok(());
        }

        lautstaerke_anwenden(&mut aufnahme, anfrage.audio_einstellungen.volume_multiplier);
        let wav: Bytes = wav_kodieren(
            &aufnahme,
            anfrage.metadaten.abtastrate,
            anfrage.metadaten.bits / 8,
            anfrage.metadaten.kanaele,
        );
        let media_id = self.medien.ablegen("wav", wav);
        tracing::info!(
            device = %anfrage.device_id,
            dauer_ms,
            media_id = %media_id,
            "Echo-Antwort erzeugt"
        );
        events(PipelineEvent::TtsEnd {
            tts_output: Some(TtsAusgabe {
                url: Some(format!("media/{media_id}.wav")),
                media_id: Some(media_id),
            }),
        });
        events(PipelineEvent::RunEnd);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assistlink_core::{DeviceId, ProtokollVersion};
    use assistlink_voice::{MedienQuelle, PipelineStart};
    use futures_util::stream;
    use parking_lot::Mutex;

    fn anfrage(flags: u32) -> PipelineAnfrage {
        anfrage_fuer(flags, ProtokollVersion::V2)
    }

    fn anfrage_fuer(flags: u32, protokoll: ProtokollVersion) -> PipelineAnfrage {
        PipelineAnfrage::neu(
            PipelineStart {
                device_id: DeviceId::new("test"),
                conversation_id: None,
                flags,
                audio_einstellungen: None,
            },
            protokoll,
        )
    }

    fn aufzeichner() -> (EventCallback, Arc<Mutex<Vec<PipelineEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let ziel = events.clone();
        (Arc::new(move |e| ziel.lock().push(e)), events)
    }

    fn pipeline(medien: Arc<SpeicherMedien>) -> EchoPipeline {
        EchoPipeline::neu(
            EchoEinstellungen {
                stille_timeout_ms: 50,
                max_aufnahme_ms: 100,
            },
            medien,
        )
    }

    #[tokio::test]
    async fn aufnahme_wird_als_wav_abgelegt() {
        let medien = Arc::new(SpeicherMedien::neu());
        let audio = stream::iter(vec![Bytes::from(vec![1u8; 640]); 3]).boxed();
        let (callback, events) = aufzeichner();

        pipeline(medien.clone())
            .ausfuehren(anfrage(1), audio, callback)
            .await
            .unwrap();

        let events = events.lock().clone();
        assert_eq!(events.first(), Some(&PipelineEvent::RunStart));
        assert_eq!(events.last(), Some(&PipelineEvent::RunEnd));
        assert!(events.contains(&PipelineEvent::SttEnd {
            text: "60 ms Audio".into()
        }));

        let media_id = events
            .iter()
            .find_map(|e| e.tts_media_id().map(str::to_string))
            .expect("tts-end mit Medien-ID");
        let wav = medien.audio_laden(&media_id).await.unwrap();
        let audio = assistlink_voice::wav::WavAudio::parsen(&wav.daten).unwrap();
        assert_eq!(audio.samples.len(), 1920);
        assert!(audio.format_pruefen(16000, 2, 1).is_ok());
    }

    #[tokio::test]
    async fn maximallaenge_begrenzt_aufnahme() {
        let medien = Arc::new(SpeicherMedien::neu());
        // 100 ms = 3200 Bytes, gesendet werden 6400
        let audio = stream::iter(vec![Bytes::from(vec![0u8; 640]); 10]).boxed();
        let (callback, events) = aufzeichner();

        pipeline(medien)
            .ausfuehren(anfrage(0), audio, callback)
            .await
            .unwrap();

        assert!(events.lock().contains(&PipelineEvent::SttEnd {
            text: "100 ms Audio".into()
        }));
    }

    #[tokio::test]
    async fn v1_antwort_wird_nicht_abgelegt() {
        let medien = Arc::new(SpeicherMedien::neu());
        let audio = stream::iter(vec![Bytes::from(vec![1u8; 640]); 3]).boxed();
        let (callback, events) = aufzeichner();

        pipeline(medien.clone())
            .ausfuehren(anfrage_fuer(0, ProtokollVersion::V1), audio, callback)
            .await
            .unwrap();

        let events = events.lock().clone();
        assert!(events.contains(&PipelineEvent::TtsEnd { tts_output: None }));
        assert_eq!(events.last(), Some(&PipelineEvent::RunEnd));
        assert!(medien.is_empty());
    }

    #[tokio::test]
    async fn ohne_audio_fehler_event() {
        let medien = Arc::new(SpeicherMedien::neu());
        let (callback, events) = aufzeichner();

        pipeline(medien.clone())
            .ausfuehren(anfrage(0), stream::empty().boxed(), callback)
            .await
            .unwrap();

        let events = events.lock().clone();
        assert!(matches!(events[2], PipelineEvent::Error { ref code, .. } if code == "stt-no-text-recognized"));
        assert!(medien.is_empty());
    }

    #[tokio::test]
    async fn wake_word_nicht_unterstuetzt() {
        let (callback, events) = aufzeichner();
        let fehler = pipeline(Arc::new(SpeicherMedien::neu()))
            .ausfuehren(anfrage(2), stream::empty().boxed(), callback)
            .await
            .unwrap_err();

        assert!(matches!(fehler, PipelineFehler::WakeWord { .. }));
        assert!(events.lock().is_empty());
    }

    #[test]
    fn lautstaerke_wird_begrenzt() {
        let mut pcm = Vec::new();
        pcm.extend_from_slice(&1000i16.to_le_bytes());
        pcm.extend_from_slice(&30000i16.to_le_bytes());
        lautstaerke_anwenden(&mut pcm, 2.0);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 2000);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), i16::MAX);
    }
}

//! WAV-Container (RIFF) lesen und schreiben
//!
//! Unterstuetzt nur unkomprimiertes PCM. Das reicht fuer den TTS-Rueckkanal,
//! der ohnehin ausschliesslich 16 kHz / 16 Bit / Mono akzeptiert.
//!
//! ## Aufbau
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       4   "RIFF"
//!  4       4   Dateigroesse - 8 (little-endian)
//!  8       4   "WAVE"
//! 12+          Chunks: 4 Byte ID, 4 Byte Laenge (LE), Nutzdaten (auf gerade Laenge gepolstert)
//!              "fmt " muss vor "data" stehen
//! ```

use crate::error::{RelayError, RelayResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// PCM-Formatkennung im fmt-Chunk
const WAVE_FORMAT_PCM: u16 = 1;
/// WAVE_FORMAT_EXTENSIBLE (z.B. von manchen TTS-Engines geschrieben)
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Dekodierter WAV-Inhalt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavAudio {
    pub abtastrate: u32,
    /// Bytes pro Sample
    pub sample_breite: u16,
    pub kanaele: u16,
    /// Rohe PCM-Frames (little-endian)
    pub samples: Bytes,
}

impl WavAudio {
    /// Liest einen WAV-Container
    ///
    /// # Fehler
    /// `UngueltigeWavDaten` bei fehlendem RIFF/WAVE-Header, fehlendem
    /// fmt- oder data-Chunk oder nicht-PCM-Kodierung.
    pub fn parsen(daten: &Bytes) -> RelayResult<Self> {
        let mut buf = daten.clone();

        if buf.remaining() < 12 {
            return Err(ungueltig(format!("zu kurz: {} Bytes", buf.remaining())));
        }
        if &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" {
            return Err(ungueltig("kein RIFF/WAVE-Header"));
        }
        buf.advance(12);

        let mut format: Option<(u32, u16, u16)> = None;

        while buf.remaining() >= 8 {
            let mut id = [0u8; 4];
            buf.copy_to_slice(&mut id);
            let laenge = buf.get_u32_le() as usize;

            match &id {
                b"fmt " => {
                    if laenge < 16 || buf.remaining() < 16 {
                        return Err(ungueltig("fmt-Chunk zu kurz"));
                    }
                    let mut chunk = buf.split_to(laenge.min(buf.remaining()));
                    let kodierung = chunk.get_u16_le();
                    let kanaele = chunk.get_u16_le();
                    let abtastrate = chunk.get_u32_le();
                    let _byte_rate = chunk.get_u32_le();
                    let _block_align = chunk.get_u16_le();
                    let bits = chunk.get_u16_le();

                    if kodierung != WAVE_FORMAT_PCM && kodierung != WAVE_FORMAT_EXTENSIBLE {
                        return Err(ungueltig(format!(
                            "nur PCM unterstuetzt, Kodierung {kodierung:#06x}"
                        )));
                    }
                    format = Some((abtastrate, bits.div_ceil(8), kanaele));
                }
                b"data" => {
                    let Some((abtastrate, sample_breite, kanaele)) = format else {
                        return Err(ungueltig("data-Chunk vor fmt-Chunk"));
                    };
                    // Manche Encoder schreiben beim Streaming eine zu grosse Laenge
                    let samples = buf.split_to(laenge.min(buf.remaining()));
                    return Ok(Self {
                        abtastrate,
                        sample_breite,
                        kanaele,
                        samples,
                    });
                }
                _ => {
                    buf.advance(laenge.min(buf.remaining()));
                }
            }

            if laenge % 2 == 1 && buf.has_remaining() {
                buf.advance(1);
            }
        }

        Err(ungueltig("kein data-Chunk gefunden"))
    }

    /// Prueft das Format gegen die erwarteten Werte
    pub fn format_pruefen(
        &self,
        abtastrate: u32,
        sample_breite: u16,
        kanaele: u16,
    ) -> RelayResult<()> {
        if self.abtastrate != abtastrate
            || self.sample_breite != sample_breite
            || self.kanaele != kanaele
        {
            return Err(RelayError::FalschesAudioformat {
                abtastrate: self.abtastrate,
                sample_breite: self.sample_breite,
                kanaele: self.kanaele,
            });
        }
        Ok(())
    }

    /// Anzahl der Frames (Samples pro Kanal)
    pub fn frame_anzahl(&self) -> usize {
        let frame_groesse = self.sample_breite as usize * self.kanaele as usize;
        if frame_groesse == 0 {
            0
        } else {
            self.samples.len() / frame_groesse
        }
    }
}

/// Schreibt rohe PCM-Daten in einen WAV-Container
pub fn wav_kodieren(samples: &[u8], abtastrate: u32, sample_breite: u16, kanaele: u16) -> Bytes {
    let block_align = sample_breite * kanaele;
    let byte_rate = abtastrate * block_align as u32;
    let daten_laenge = samples.len() as u32;

    let mut buf = BytesMut::with_capacity(44 + samples.len());
    buf.put_slice(b"RIFF");
    buf.put_u32_le(36 + daten_laenge);
    buf.put_slice(b"WAVE");

    buf.put_slice(b"fmt ");
    buf.put_u32_le(16);
    buf.put_u16_le(WAVE_FORMAT_PCM);
    buf.put_u16_le(kanaele);
    buf.put_u32_le(abtastrate);
    buf.put_u32_le(byte_rate);
    buf.put_u16_le(block_align);
    buf.put_u16_le(sample_breite * 8);

    buf.put_slice(b"data");
    buf.put_u32_le(daten_laenge);
    buf.put_slice(samples);
    if samples.len() % 2 == 1 {
        buf.put_u8(0);
    }

    buf.freeze()
}

fn ungueltig(grund: impl Into<String>) -> RelayError {
    RelayError::UngueltigeWavDaten(grund.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Eine Sekunde Stille, 16 kHz / 16 Bit
    const EINE_SEKUNDE: usize = 16000 * 2;

    #[test]
    fn kodierte_stille_wird_gelesen() {
        let wav = wav_kodieren(&vec![0u8; EINE_SEKUNDE], 16000, 2, 1);
        let audio = WavAudio::parsen(&wav).expect("WAV muss lesbar sein");

        assert_eq!(audio.abtastrate, 16000);
        assert_eq!(audio.sample_breite, 2);
        assert_eq!(audio.kanaele, 1);
        assert_eq!(audio.samples.len(), EINE_SEKUNDE);
        assert_eq!(audio.frame_anzahl(), 16000);
        assert!(audio.format_pruefen(16000, 2, 1).is_ok());
    }

    #[test]
    fn falsche_abtastrate_wird_erkannt() {
        let wav = wav_kodieren(&vec![0u8; 1024], 22050, 2, 1);
        let audio = WavAudio::parsen(&wav).unwrap();
        let fehler = audio.format_pruefen(16000, 2, 1).unwrap_err();
        assert!(matches!(
            fehler,
            RelayError::FalschesAudioformat {
                abtastrate: 22050,
                ..
            }
        ));
        assert!(fehler.ist_formatfehler());
    }

    #[test]
    fn stereo_wird_abgelehnt() {
        let wav = wav_kodieren(&vec![0u8; 1024], 16000, 2, 2);
        let audio = WavAudio::parsen(&wav).unwrap();
        assert!(audio.format_pruefen(16000, 2, 1).is_err());
    }

    #[test]
    fn unbekannte_chunks_werden_uebersprungen() {
        let mut wav = BytesMut::new();
        wav.put_slice(b"RIFF");
        wav.put_u32_le(0);
        wav.put_slice(b"WAVE");
        // LIST-Chunk mit ungerader Laenge (gepolstert)
        wav.put_slice(b"LIST");
        wav.put_u32_le(3);
        wav.put_slice(&[1, 2, 3, 0]);
        let rest = wav_kodieren(&[5u8; 8], 16000, 2, 1);
        wav.put_slice(&rest[12..]);

        let audio = WavAudio::parsen(&wav.freeze()).unwrap();
        assert_eq!(audio.samples.as_ref(), &[5u8; 8]);
    }

    #[test]
    fn kein_riff_header() {
        let fehler = WavAudio::parsen(&Bytes::from(vec![0u8; 1024])).unwrap_err();
        assert!(matches!(fehler, RelayError::UngueltigeWavDaten(_)));
    }

    #[test]
    fn zu_kurz() {
        assert!(WavAudio::parsen(&Bytes::from_static(b"RIFF")).is_err());
    }

    #[test]
    fn data_ohne_fmt() {
        let mut wav = BytesMut::new();
        wav.put_slice(b"RIFF");
        wav.put_u32_le(12);
        wav.put_slice(b"WAVE");
        wav.put_slice(b"data");
        wav.put_u32_le(4);
        wav.put_slice(&[0u8; 4]);
        assert!(WavAudio::parsen(&wav.freeze()).is_err());
    }
}

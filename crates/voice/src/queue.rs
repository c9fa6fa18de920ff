//! Eingangs-Queue – FIFO fuer empfangene Audio-Datagramme
//!
//! Wird vom Empfangs-Task befuellt und vom Pipeline-Stream geleert.
//! Ein Ende-Marker beendet den Stream, ohne selbst ausgeliefert zu werden.
//!
//! ## Zustaende
//!
//! ```text
//! offen ──ende_markieren()──> abgeschlossen (genau ein Marker, keine neuen Daten)
//!   │                               │
//!   └──────────schliessen()─────────┴──> geschlossen (Leser endet sofort)
//! ```
//!
//! Warten erfolgt ueber `tokio::sync::Notify`, kein Polling. Es darf nur
//! ein Leser gleichzeitig aktiv sein.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug)]
enum Eintrag {
    Daten(Bytes),
    Ende,
}

/// Unbegrenzte FIFO-Queue fuer eingehendes Mikrofon-Audio
#[derive(Debug, Default)]
pub struct EingangsQueue {
    eintraege: Mutex<VecDeque<Eintrag>>,
    abgeschlossen: AtomicBool,
    geschlossen: AtomicBool,
    signal: Notify,
}

impl EingangsQueue {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Haengt ein Datagramm an. Gibt `false` zurueck wenn die Queue
    /// bereits abgeschlossen ist (Daten werden verworfen).
    pub fn einreihen(&self, daten: Bytes) -> bool {
        {
            let mut eintraege = self.eintraege.lock();
            if self.abgeschlossen.load(Ordering::Acquire) {
                return false;
            }
            eintraege.push_back(Eintrag::Daten(daten));
        }
        self.signal.notify_one();
        true
    }

    /// Haengt den Ende-Marker an (hoechstens einmal)
    pub fn ende_markieren(&self) {
        {
            let mut eintraege = self.eintraege.lock();
            if self.abgeschlossen.swap(true, Ordering::AcqRel) {
                return;
            }
            eintraege.push_back(Eintrag::Ende);
        }
        self.signal.notify_one();
    }

    /// Beendet jeden wartenden und zukuenftigen Leser sofort
    pub fn schliessen(&self) {
        self.abgeschlossen.store(true, Ordering::Release);
        self.geschlossen.store(true, Ordering::Release);
        self.signal.notify_waiters();
        self.signal.notify_one();
    }

    /// Anzahl der Eintraege inklusive eines eventuellen Ende-Markers
    pub fn len(&self) -> usize {
        self.eintraege.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.lock().is_empty()
    }

    pub fn ist_abgeschlossen(&self) -> bool {
        self.abgeschlossen.load(Ordering::Acquire)
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.geschlossen.load(Ordering::Acquire)
    }

    /// Wartet auf das naechste Datagramm
    ///
    /// `None` beim Ende-Marker oder wenn die Queue geschlossen wurde.
    /// Nach dem Schliessen werden gepufferte Daten nicht mehr ausgeliefert.
    pub async fn naechstes(&self) -> Option<Bytes> {
        loop {
            if self.ist_geschlossen() {
                return None;
            }

            let eintrag = self.eintraege.lock().pop_front();
            match eintrag {
                Some(Eintrag::Daten(daten)) => return Some(daten),
                Some(Eintrag::Ende) => return None,
                // Marker bereits von einem frueheren Leser entnommen
                None if self.ist_abgeschlossen() => return None,
                None => {}
            }

            // notify_one() hinterlegt ein Permit, falls zwischen pop_front()
            // und hier eingereiht wurde
            self.signal.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn paket(n: u8) -> Bytes {
        Bytes::from(vec![n; 16])
    }

    #[tokio::test]
    async fn fifo_reihenfolge() {
        let queue = EingangsQueue::neu();
        for i in 0..5 {
            assert!(queue.einreihen(paket(i)));
        }
        queue.ende_markieren();
        assert_eq!(queue.len(), 6);

        let mut erhalten = Vec::new();
        while let Some(daten) = queue.naechstes().await {
            erhalten.push(daten[0]);
        }
        assert_eq!(erhalten, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
        // Auch ein spaeterer Leser blockiert nicht
        assert!(queue.naechstes().await.is_none());
    }

    #[test]
    fn ende_marker_nur_einmal() {
        let queue = EingangsQueue::neu();
        queue.einreihen(paket(1));
        queue.ende_markieren();
        queue.ende_markieren();
        assert_eq!(queue.len(), 2);

        // Nach dem Abschluss werden keine Daten mehr angenommen
        assert!(!queue.einreihen(paket(2)));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn geschlossen_liefert_nichts_mehr() {
        let queue = EingangsQueue::neu();
        queue.einreihen(paket(1));
        queue.schliessen();
        assert!(queue.naechstes().await.is_none());
        assert!(!queue.einreihen(paket(2)));
    }

    #[tokio::test]
    async fn wartender_leser_wird_geweckt() {
        let queue = Arc::new(EingangsQueue::neu());
        let leser = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.naechstes().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.einreihen(paket(7));

        let daten = tokio::time::timeout(Duration::from_secs(1), leser)
            .await
            .expect("Leser muss geweckt werden")
            .unwrap();
        assert_eq!(daten, Some(paket(7)));
    }

    #[tokio::test]
    async fn schliessen_weckt_wartenden_leser() {
        let queue = Arc::new(EingangsQueue::neu());
        let leser = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.naechstes().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.schliessen();

        let daten = tokio::time::timeout(Duration::from_secs(1), leser)
            .await
            .expect("Leser muss nach dem Schliessen enden")
            .unwrap();
        assert!(daten.is_none());
    }
}

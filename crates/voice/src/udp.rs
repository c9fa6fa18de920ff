//! UDP Relay-Session – Socket-Lebenszyklus und Eingangs-Stream
//!
//! Eine `RelaySession` besitzt genau einen UDP-Socket fuer genau ein
//! Geraet. Empfangene Datagramme landen in der `EingangsQueue` und werden
//! als lazy Stream an die Sprach-Pipeline gereicht.
//!
//! ## Architektur
//!
//! ```text
//! UDP Socket (recv_from)                    Pipeline-Runner
//!     |                                          ^
//!     v                                          |
//! datagramm_empfangen() -> EingangsQueue -> eingangs_stream()
//!                                                |
//!                               event_verarbeiten() <- Pipeline-Events
//!                                                |
//!                          tts-end (v2) -> TTS-Task -> UDP send_to (Geraet)
//! ```
//!
//! ## Lebenszyklus
//! - `starten()` genau einmal; erneuter Start oder Start nach `stoppen()`/
//!   `schliessen()` ist ein Zustandsfehler
//! - `stoppen()` nimmt keine Daten mehr an und haengt den Ende-Marker an
//! - `schliessen()` beendet den Empfangs-Task und jeden wartenden Leser

use crate::error::{RelayError, RelayResult};
use crate::events::{AssistEventTyp, EventDaten};
use crate::queue::EingangsQueue;
use crate::telemetry::RelayStatistik;
use crate::tts::{AbschlussSignal, MedienQuelle, TtsTask};
use assistlink_core::{ProtokollVersion, SessionId};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

/// Standard-Port: 0 = OS waehlt einen freien Port
pub const UDP_PORT: u16 = 0;

/// Maximale Datagramm-Groesse fuer den TTS-Rueckkanal
pub const UDP_MAX_PAKETGROESSE: usize = 1024;

/// Empfangspuffer (groesser als jedes erwartete Mikrofon-Datagramm)
const UDP_BUFFER_SIZE: usize = 2048;

/// Lazy Byte-Stream des Mikrofon-Audios
pub type EingangsStream = BoxStream<'static, Bytes>;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration einer Relay-Session
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bind-Adresse (Port wird bei `starten()` uebergeben)
    pub bind_adresse: IpAddr,
    /// Faehigkeitsstufe des Geraets
    pub protokoll: ProtokollVersion,
    /// Maximale Groesse eines ausgehenden Audio-Datagramms (Bytes)
    pub paket_groesse: usize,
    /// Sendetempo relativ zur Echtzeit (0.9 = etwas schneller als Echtzeit)
    pub tempo_faktor: f64,
}

impl RelayConfig {
    /// Erstellt eine Konfiguration mit Standard-Werten
    pub fn neu(protokoll: ProtokollVersion) -> Self {
        Self {
            bind_adresse: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            protokoll,
            paket_groesse: UDP_MAX_PAKETGROESSE,
            tempo_faktor: 0.9,
        }
    }

    /// Bind-Adresse aendern (Builder-Stil)
    pub fn mit_bind_adresse(mut self, bind_adresse: IpAddr) -> Self {
        self.bind_adresse = bind_adresse;
        self
    }
}

// ---------------------------------------------------------------------------
// SessionHandler – Besitzer der Session
// ---------------------------------------------------------------------------

/// Rueckkanal zum Besitzer der Session (z.B. die Geraeteverbindung)
pub trait SessionHandler: Send + Sync {
    /// Vereinfachtes Pipeline-Event fuer das Geraet
    fn event_behandeln(&self, typ: AssistEventTyp, daten: Option<EventDaten>);

    /// Die Session ist durch einen Transportfehler beendet worden
    fn beendet(&self);
}

// ---------------------------------------------------------------------------
// RelaySession
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SessionZustand {
    gestartet: bool,
    gestoppt: bool,
    geschlossen: bool,
    socket: Option<Arc<UdpSocket>>,
    /// Absender des ersten Datagramms, Ziel fuer TTS-Audio
    gegenstelle: Option<SocketAddr>,
    empfangs_shutdown: Option<oneshot::Sender<()>>,
}

pub(crate) struct SessionInner {
    pub(crate) id: SessionId,
    pub(crate) config: RelayConfig,
    pub(crate) handler: Arc<dyn SessionHandler>,
    pub(crate) medien: Arc<dyn MedienQuelle>,
    zustand: Mutex<SessionZustand>,
    pub(crate) queue: EingangsQueue,
    pub(crate) tts_signal: AbschlussSignal,
    pub(crate) tts_task: Mutex<Option<TtsTask>>,
    beendet_gemeldet: AtomicBool,
    pub(crate) statistik: Arc<RelayStatistik>,
}

/// UDP-Endpunkt fuer eine Sprachassistenten-Session
///
/// Clone teilt den inneren Zustand (Arc).
#[derive(Clone)]
pub struct RelaySession {
    pub(crate) inner: Arc<SessionInner>,
}

impl RelaySession {
    /// Erstellt eine neue, noch nicht gestartete Session
    pub fn neu(
        config: RelayConfig,
        handler: Arc<dyn SessionHandler>,
        medien: Arc<dyn MedienQuelle>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId::new(),
                config,
                handler,
                medien,
                zustand: Mutex::new(SessionZustand::default()),
                queue: EingangsQueue::neu(),
                tts_signal: AbschlussSignal::neu(),
                tts_task: Mutex::new(None),
                beendet_gemeldet: AtomicBool::new(false),
                statistik: Arc::new(RelayStatistik::neu()),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn protokoll(&self) -> ProtokollVersion {
        self.inner.config.protokoll
    }

    /// Gestartet und noch nicht gestoppt
    pub fn laeuft(&self) -> bool {
        let z = self.inner.zustand.lock();
        z.gestartet && !z.gestoppt
    }

    pub fn ist_gestartet(&self) -> bool {
        self.inner.zustand.lock().gestartet
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.inner.zustand.lock().geschlossen
    }

    /// Anzahl der Eintraege in der Eingangs-Queue (inklusive Ende-Marker)
    pub fn queue_laenge(&self) -> usize {
        self.inner.queue.len()
    }

    /// Absender des ersten empfangenen Datagramms
    pub fn gegenstelle(&self) -> Option<SocketAddr> {
        self.inner.zustand.lock().gegenstelle
    }

    /// Lokale Adresse des Sockets (nur nach `starten()`)
    pub fn lokale_adresse(&self) -> Option<SocketAddr> {
        let socket = self.inner.zustand.lock().socket.clone()?;
        socket.local_addr().ok()
    }

    /// Geteilte Zaehler dieser Session
    pub fn statistik(&self) -> Arc<RelayStatistik> {
        Arc::clone(&self.inner.statistik)
    }

    // -----------------------------------------------------------------------
    // Lebenszyklus
    // -----------------------------------------------------------------------

    /// Bindet den UDP-Socket und startet den Empfangs-Task
    ///
    /// `port` = 0 laesst das OS einen freien Port waehlen.
    /// Gibt den tatsaechlich gebundenen Port zurueck.
    pub async fn starten(&self, port: u16) -> RelayResult<u16> {
        {
            let mut z = self.inner.zustand.lock();
            if z.gestartet {
                return Err(RelayError::BereitsGestartet);
            }
            if z.gestoppt || z.geschlossen {
                return Err(RelayError::NichtMehrAktiv);
            }
            z.gestartet = true;
        }

        let (socket, lokaler_port) = match self.socket_binden(port).await {
            Ok(gebunden) => gebunden,
            Err(e) => {
                // Ein spaeterer Versuch darf erneut starten
                self.inner.zustand.lock().gestartet = false;
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        {
            let mut z = self.inner.zustand.lock();
            if z.geschlossen {
                // Waehrend des Bindens geschlossen
                return Err(RelayError::NichtMehrAktiv);
            }
            z.socket = Some(Arc::clone(&socket));
            z.empfangs_shutdown = Some(shutdown_tx);
        }

        tokio::spawn(empfangs_loop(
            Arc::downgrade(&self.inner),
            socket,
            shutdown_rx,
        ));

        tracing::info!(
            session = %self.inner.id,
            port = lokaler_port,
            protokoll = ?self.inner.config.protokoll,
            "Relay-Session gestartet"
        );
        Ok(lokaler_port)
    }

    async fn socket_binden(&self, port: u16) -> RelayResult<(Arc<UdpSocket>, u16)> {
        let bind_addr = SocketAddr::new(self.inner.config.bind_adresse, port);
        let socket = UdpSocket::bind(bind_addr).await?;
        let lokaler_port = socket.local_addr()?.port();
        Ok((Arc::new(socket), lokaler_port))
    }

    /// Nimmt keine Daten mehr an und weckt den Stream-Leser mit dem Ende-Marker
    pub fn stoppen(&self) {
        {
            let mut z = self.inner.zustand.lock();
            if z.gestoppt {
                return;
            }
            z.gestoppt = true;
        }
        self.inner.queue.ende_markieren();
        tracing::debug!(session = %self.inner.id, "Relay-Session gestoppt");
    }

    /// Schliesst den Transport
    ///
    /// Ein laufender `eingangs_stream()` endet sofort, ohne weitere Daten zu liefern.
    pub fn schliessen(&self) {
        let (shutdown, socket) = {
            let mut z = self.inner.zustand.lock();
            if z.geschlossen {
                return;
            }
            z.geschlossen = true;
            z.gestoppt = true;
            (z.empfangs_shutdown.take(), z.socket.take())
        };

        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }
        drop(socket);
        self.inner.queue.schliessen();

        tracing::info!(
            session = %self.inner.id,
            statistik = %self.inner.statistik.snapshot().zusammenfassung(),
            "Relay-Session geschlossen"
        );
    }

    // -----------------------------------------------------------------------
    // Transport-Callbacks
    // -----------------------------------------------------------------------

    /// Verarbeitet ein eingehendes Datagramm
    ///
    /// Wird nur angenommen solange die Session laeuft.
    pub fn datagramm_empfangen(&self, daten: Bytes, absender: SocketAddr) {
        {
            let mut z = self.inner.zustand.lock();
            if !(z.gestartet && !z.gestoppt) {
                drop(z);
                self.inner.statistik.datagramm_verworfen();
                tracing::trace!(absender = %absender, "Datagramm nach Stopp verworfen");
                return;
            }
            if z.gegenstelle.is_none() {
                z.gegenstelle = Some(absender);
                tracing::debug!(
                    session = %self.inner.id,
                    gegenstelle = %absender,
                    "Gegenstelle erkannt"
                );
            }
        }

        let laenge = daten.len();
        if self.inner.queue.einreihen(daten) {
            self.inner.statistik.datagramm_empfangen(laenge);
        } else {
            self.inner.statistik.datagramm_verworfen();
        }
    }

    /// Meldet einen Transportfehler an den Besitzer (hoechstens einmal)
    pub fn transportfehler(&self, fehler: io::Error) {
        tracing::error!(
            session = %self.inner.id,
            fehler = %fehler,
            "UDP-Transportfehler"
        );
        if !self.inner.beendet_gemeldet.swap(true, Ordering::AcqRel) {
            self.inner.handler.beendet();
        }
    }

    // -----------------------------------------------------------------------
    // Eingangs-Stream
    // -----------------------------------------------------------------------

    /// Liefert das empfangene Audio als lazy Stream
    ///
    /// Wartet solange die Queue leer ist, endet beim Ende-Marker (ohne ihn
    /// zu liefern) oder sofort nach `schliessen()`. Es darf nur ein
    /// Stream gleichzeitig gelesen werden.
    pub fn eingangs_stream(&self) -> EingangsStream {
        stream::unfold(Arc::clone(&self.inner), |inner| async move {
            let daten = inner.queue.naechstes().await?;
            Some((daten, inner))
        })
        .boxed()
    }

    /// Socket und Ziel fuer ausgehendes Audio, falls die Session laeuft
    pub(crate) fn sende_ziel(&self) -> Option<(Arc<UdpSocket>, SocketAddr)> {
        let z = self.inner.zustand.lock();
        if !(z.gestartet && !z.gestoppt) {
            return None;
        }
        let socket = z.socket.clone()?;
        match z.gegenstelle {
            Some(ziel) => Some((socket, ziel)),
            None => {
                tracing::warn!(session = %self.inner.id, "Keine Gegenstelle bekannt");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Empfangs-Loop
// ---------------------------------------------------------------------------

/// Empfaengt Datagramme bis zum Shutdown-Signal oder Transportfehler
///
/// Haelt nur eine schwache Referenz, damit eine fallengelassene Session
/// den Task nicht am Leben haelt.
async fn empfangs_loop(
    session: Weak<SessionInner>,
    socket: Arc<UdpSocket>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut buf = vec![0u8; UDP_BUFFER_SIZE];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let Some(inner) = session.upgrade() else {
                    break;
                };
                let session = RelaySession { inner };
                match result {
                    Ok((len, absender)) => {
                        session.datagramm_empfangen(Bytes::copy_from_slice(&buf[..len]), absender);
                    }
                    Err(e) => {
                        session.transportfehler(e);
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                break;
            }
        }
    }

    tracing::debug!("Relay-Empfangs-Loop beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Integrationstests: Geraet spricht, Server spielt die Aufnahme zurueck

use assistlink_core::ProtokollVersion;
use assistlink_server::config::ServerConfig;
use assistlink_server::Server;
use assistlink_voice::AssistEventTyp;
use std::time::Duration;
use tokio::net::UdpSocket;

fn test_config(protokoll: ProtokollVersion) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.relay.bind_adresse = "127.0.0.1".into();
    config.relay.port = 0;
    config.relay.protokoll = protokoll;
    config.echo.stille_timeout_ms = 200;
    config.observability.aktiviert = false;
    config
}

/// Sendet 100 ms Audio (10 x 320 Bytes) an den Relay
async fn sprechen(client: &UdpSocket, port: u16) {
    for i in 0..10u8 {
        client
            .send_to(&[i; 320], ("127.0.0.1", port))
            .await
            .expect("Senden fehlgeschlagen");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_echo_ueber_rueckkanal() {
    let server = Server::neu(test_config(ProtokollVersion::V2)).unwrap();
    let laufend = server.session_starten().await.expect("Session-Start fehlgeschlagen");

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sprechen(&client, laufend.port).await;

    let mut empfangen = Vec::new();
    let mut buf = [0u8; 2048];
    while let Ok(Ok((len, _))) =
        tokio::time::timeout(Duration::from_millis(500), client.recv_from(&mut buf)).await
    {
        assert!(len <= 1024, "Datagramm zu gross: {len}");
        empfangen.extend_from_slice(&buf[..len]);
    }

    assert_eq!(empfangen.len(), 3200);
    assert_eq!(&empfangen[..320], &[0u8; 320][..]);
    assert_eq!(&empfangen[2880..], &[9u8; 320][..]);

    let handler = laufend.handler.clone();
    let session = laufend.session.clone();
    laufend.abwarten().await.expect("Pipeline fehlgeschlagen");

    let verlauf = handler.verlauf();
    assert_eq!(verlauf.first(), Some(&AssistEventTyp::RunStart));
    assert!(verlauf.contains(&AssistEventTyp::SttEnd));
    assert!(verlauf.contains(&AssistEventTyp::TtsStreamStart));
    assert!(verlauf.contains(&AssistEventTyp::TtsStreamEnd));
    assert!(verlauf.contains(&AssistEventTyp::RunEnd));

    let snap = session.statistik().snapshot();
    assert_eq!(snap.datagramme_empfangen, 10);
    assert_eq!(snap.bytes_gesendet, 3200);
    assert_eq!(snap.tts_erfolgreich, 1);
    assert!(session.ist_geschlossen());
}

#[tokio::test]
async fn test_v1_geraet_erhaelt_kein_audio() {
    let server = Server::neu(test_config(ProtokollVersion::V1)).unwrap();
    let laufend = server.session_starten().await.unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sprechen(&client, laufend.port).await;

    let handler = laufend.handler.clone();
    laufend.abwarten().await.unwrap();

    let mut buf = [0u8; 2048];
    let antwort =
        tokio::time::timeout(Duration::from_millis(100), client.recv_from(&mut buf)).await;
    assert!(antwort.is_err(), "v1-Geraete bekommen kein Audio zurueck");

    let verlauf = handler.verlauf();
    assert!(verlauf.contains(&AssistEventTyp::TtsEnd));
    assert!(!verlauf.contains(&AssistEventTyp::TtsStreamStart));
}

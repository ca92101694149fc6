//! Shared test utilities for the board driver tests.
//!
//! This module provides:
//! - Device list fixtures in the board's text format
//! - A scripted board that answers the initialisation sequence
//! - Helpers for waiting on the line stream

#![allow(dead_code)]

use buildhat::link::Subscription;
use buildhat::{BuildHat, MockBoard, MockTransport, SerialLink};
use std::time::Duration;

/// Upper bound for any single wait in these tests.
pub const STEP: Duration = Duration::from_secs(2);

/// Medium angular motor, four modes, two combi slots, two PID lines.
pub fn motor_block(port: usize) -> Vec<String> {
    let mut lines = vec![
        format!("P{port}: connected to active ID 4B"),
        "type 4B".to_string(),
        "  nmodes =3".to_string(),
        "  nview  =3".to_string(),
        "  baud   =115200".to_string(),
        "  hwver  =00000004".to_string(),
        "  swver  =10000000".to_string(),
    ];
    let modes = [
        ("POWER", "PCT", "RAW: 00000000 00000064    PCT: 00000000 00000064    SI: 00000000 00000064"),
        ("SPEED", "PCT", "RAW: 00000000 00000064    PCT: 00000000 00000064    SI: 00000000 00000064"),
        ("POS", "DEG", "RAW: 00000000 00000168    PCT: 00000000 00000064    SI: 00000000 00000168"),
        ("APOS", "DEG", "RAW: 00000000 000000B3    PCT: 00000000 000000C8    SI: 00000000 000000B3"),
    ];
    for (i, (name, unit, limits)) in modes.iter().enumerate() {
        lines.push(format!("  M{i} {name} SI = {unit}"));
        lines.push("    format count=1 type=1 chars=4 dp=0".to_string());
        lines.push(format!("    {limits}"));
    }
    lines.extend([
        "     C0: 1 2 3".to_string(),
        "     C1: 1 0".to_string(),
        "     speed PID: 00000000 00000000 00000000 00000000".to_string(),
        "     position PID: 00002EE0 000003E8 00002710 00000000".to_string(),
    ]);
    lines
}

/// Distance sensor with a single mode whose limits are in hex.
pub fn distance_block(port: usize) -> Vec<String> {
    vec![
        format!("P{port}: connected to active ID 3E"),
        "type 3E".to_string(),
        "nmodes =0".to_string(),
        "M0 DISTL SI = CM".to_string(),
        "format count=1 type=1 chars=5 dp=1".to_string(),
        "raw: 0 2710 pct: 0 64 si: 0 fa".to_string(),
    ]
}

/// Force sensor, as it appears in a connect handshake.
pub fn force_block(port: usize) -> Vec<String> {
    vec![
        format!("P{port}: connected to active ID 3F"),
        "type 3F".to_string(),
        "nmodes =1".to_string(),
        "M0 FORCE SI = N".to_string(),
        "format count=1 type=0 chars=4 dp=1".to_string(),
        "RAW: 00000000 000003FF PCT: 00000000 00000064 SI: 00000000 0000000A".to_string(),
        "M1 TOUCHED SI = ".to_string(),
        "format count=1 type=0 chars=1 dp=0".to_string(),
        "RAW: 00000000 00000001 PCT: 00000000 00000064 SI: 00000000 00000001".to_string(),
    ]
}

pub fn no_device(port: usize) -> Vec<String> {
    vec![format!("P{port}: no device detected")]
}

/// Four ports back to back: motor, empty, distance sensor, empty.
pub fn four_ports() -> Vec<String> {
    let mut lines = motor_block(0);
    lines.extend(no_device(1));
    lines.extend(distance_block(2));
    lines.extend(no_device(3));
    lines
}

/// The full `list` response, including the trailing timing line.
pub fn list_response() -> Vec<String> {
    let mut lines = four_ports();
    lines.push("deltat=3487".to_string());
    lines
}

/// A link over an in-memory board.
pub fn mock_link() -> (SerialLink, MockBoard) {
    let (transport, board) = MockTransport::pair("MOCK0");
    (SerialLink::new(transport), board)
}

/// Read the next command, failing the test if none arrives in time.
pub async fn expect_command(board: &mut MockBoard) -> String {
    tokio::time::timeout(STEP, board.next_command())
        .await
        .expect("timed out waiting for a command")
        .expect("host closed the link")
}

/// Read one command and answer it with a bare prompt.
pub async fn answer(board: &mut MockBoard) -> String {
    let cmd = expect_command(board).await;
    board.send_line("").await.unwrap();
    cmd
}

/// Play the board's side of [`BuildHat::ready`], returning the commands seen.
pub async fn serve_init(board: &mut MockBoard) -> Vec<String> {
    let wake = answer(board).await;
    let echo = answer(board).await;
    let list = expect_command(board).await;
    board.send_lines(list_response()).await.unwrap();
    vec![wake, echo, list]
}

/// A board that has completed initialisation.
pub async fn ready_hat() -> (BuildHat, MockBoard) {
    let (link, mut board) = mock_link();
    let hat = BuildHat::new(link);
    let (ready, _) = tokio::join!(hat.ready(), serve_init(&mut board));
    ready.unwrap();
    (hat, board)
}

/// Receive from a subscription, failing the test if nothing arrives in time.
pub async fn recv<T>(sub: &mut Subscription<T>) -> T {
    tokio::time::timeout(STEP, sub.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("channel closed")
}

/// Send `marker` and wait until it comes out of the generic line stream.
///
/// Lines are dispatched in order, so everything the board sent before the
/// marker has been through the watchers once this returns.
pub async fn sync_through(board: &mut MockBoard, lines: &mut Subscription<String>, marker: &str) {
    board.send_line(marker).await.unwrap();
    loop {
        if recv(lines).await == marker {
            return;
        }
    }
}

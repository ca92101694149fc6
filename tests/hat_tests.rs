//! Board-level behaviour: initialisation, the port registry, telemetry and
//! the connect/disconnect lifecycle.

mod common;

use buildhat::{
    BuildHat, Capability, DeviceClass, HatError, ModeSelector, PortStateError, Setpoint,
    Transition,
};
use common::{answer, expect_command, force_block, mock_link, ready_hat, recv, serve_init, sync_through};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc::error::TryRecvError;

#[tokio::test]
async fn test_ready_reads_inventory() {
    let (link, mut board) = mock_link();
    let hat = BuildHat::new(link);
    assert!(!hat.is_ready());

    let (ready, seen) = tokio::join!(hat.ready(), serve_init(&mut board));
    ready.unwrap();
    assert_eq!(seen, vec!["", "echo 0", "list"]);
    assert!(hat.is_ready());

    let devices = hat.devices().await.unwrap();
    assert_eq!(devices[0].as_ref().unwrap().class(), DeviceClass::Motor);
    assert!(devices[1].is_none());
    assert_eq!(devices[2].as_ref().unwrap().type_id(), 0x3e);
    assert!(devices[3].is_none());
}

#[tokio::test]
async fn test_ready_runs_once() {
    let (hat, mut board) = ready_hat().await;
    hat.ready().await.unwrap();
    hat.devices().await.unwrap();

    hat.link().immediate("version").await.unwrap();
    assert_eq!(expect_command(&mut board).await, "version");
}

#[tokio::test]
async fn test_port_checks_capability() {
    let (hat, _board) = ready_hat().await;

    let motor = hat.port(0, Capability::Motor).unwrap();
    assert_eq!(motor.port(), 0);
    assert!(motor.has(Capability::PassiveMotor));
    assert!(std::sync::Arc::ptr_eq(&motor, &hat.device(0).unwrap()));

    let err = hat.port(2, Capability::Motor).unwrap_err();
    assert_eq!(err.to_string(), "Port error: Port 2 is a DistanceSensor not a Motor");
    assert!(hat.port(2, Capability::Sensor).is_ok());

    assert!(matches!(
        hat.port(1, Capability::Device),
        Err(HatError::PortState(PortStateError::NoDevice(1)))
    ));
    assert!(matches!(
        hat.port(7, Capability::Device),
        Err(HatError::PortState(PortStateError::InvalidPort(7)))
    ));
}

#[tokio::test]
async fn test_telemetry_hysteresis() {
    let (hat, mut board) = ready_hat().await;
    let motor = hat.port(0, Capability::Motor).unwrap();
    let mut lines = hat.subscribe_lines();

    let speed = motor.telemetry([5.0]);
    let mut updates = speed.updates();
    speed.start("speed").unwrap();
    assert!(speed.is_streaming());
    assert_eq!(speed.mode(), Some(1));
    assert_eq!(answer(&mut board).await, "port 0; select 1");

    board
        .send_lines(["P0M1: 10", "P0M1: 14", "P0M1: 16", "P0M1: 13"])
        .await
        .unwrap();
    sync_through(&mut board, &mut lines, "mark").await;

    assert_eq!(recv(&mut updates).await, vec![10.0]);
    assert_eq!(recv(&mut updates).await, vec![16.0]);
    assert_eq!(updates.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn test_windowed_select() {
    let (hat, mut board) = ready_hat().await;
    let motor = hat.port(0, Capability::Motor).unwrap();

    let pos = motor.telemetry(0.0);
    pos.start(ModeSelector::new("pos").window(0, buildhat::Format::S4))
        .unwrap();
    assert_eq!(answer(&mut board).await, "port 0; select 2 0 s4");

    assert!(matches!(
        pos.start("torque"),
        Err(HatError::UnknownMode { port: 0, .. })
    ));
}

#[tokio::test]
async fn test_stop_twice_without_start() {
    let (hat, mut board) = ready_hat().await;
    let motor = hat.port(0, Capability::Motor).unwrap();

    let stream = motor.telemetry(0.0);
    stream.stop();
    stream.stop();
    assert!(!stream.is_streaming());

    hat.link().immediate("version").await.unwrap();
    assert_eq!(expect_command(&mut board).await, "version");
}

#[tokio::test]
async fn test_stop_cancels_streaming() {
    let (hat, mut board) = ready_hat().await;
    let motor = hat.port(0, Capability::Motor).unwrap();
    let watchers = hat.link().watcher_count();

    let stream = motor.telemetry(0.0);
    stream.start(1usize).unwrap();
    assert_eq!(answer(&mut board).await, "port 0; select 1");
    assert_eq!(hat.link().watcher_count(), watchers + 1);

    stream.stop();
    stream.stop();
    assert_eq!(answer(&mut board).await, "port 0; select");
    assert_eq!(hat.link().watcher_count(), watchers);
}

#[tokio::test]
async fn test_late_sample_after_stop_is_dropped() {
    let (hat, mut board) = ready_hat().await;
    let motor = hat.port(0, Capability::Motor).unwrap();

    let stream = motor.telemetry(0.0);
    let mut updates = stream.updates();
    stream.start("speed").unwrap();
    assert_eq!(answer(&mut board).await, "port 0; select 1");
    stream.stop();
    assert_eq!(answer(&mut board).await, "port 0; select");

    let mut lines = hat.subscribe_lines();
    board.send_lines(["P0M1: 42", "mark"]).await.unwrap();
    let mut seen = Vec::new();
    loop {
        let line = recv(&mut lines).await;
        if line == "mark" {
            break;
        }
        seen.push(line);
    }
    // Only the cancel's prompt may still be in flight.
    assert!(seen.iter().all(|line| line.is_empty()), "{seen:?}");
    assert_eq!(updates.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn test_new_stream_replaces_old() {
    let (hat, mut board) = ready_hat().await;
    let motor = hat.port(0, Capability::Motor).unwrap();

    let first = motor.telemetry(0.0);
    first.start("speed").unwrap();
    assert_eq!(answer(&mut board).await, "port 0; select 1");

    let second = motor.telemetry(0.0);
    second.start("pos").unwrap();
    assert!(!first.is_streaming());
    assert!(second.is_streaming());
    assert_eq!(answer(&mut board).await, "port 0; select");
    assert_eq!(answer(&mut board).await, "port 0; select 2");
}

#[tokio::test]
async fn test_disconnect_stops_stream() {
    let (hat, mut board) = ready_hat().await;
    let motor = hat.port(0, Capability::Motor).unwrap();
    let mut lines = hat.subscribe_lines();
    let mut disconnects = hat.subscribe_disconnect();

    let stream = motor.telemetry(0.0);
    let mut updates = stream.updates();
    stream.start("speed").unwrap();
    assert_eq!(answer(&mut board).await, "port 0; select 1");

    board
        .send_lines(["P0M1: 1", "P0: disconnected", "P0M1: 2"])
        .await
        .unwrap();
    assert_eq!(recv(&mut disconnects).await, 0);
    sync_through(&mut board, &mut lines, "mark").await;

    assert_eq!(recv(&mut updates).await, vec![1.0]);
    assert_eq!(updates.try_recv(), Err(TryRecvError::Empty));
    assert!(!stream.is_streaming());
    assert!(motor.is_destroyed());
    assert!(hat.descriptors()[0].is_none());
    assert!(matches!(
        hat.port(0, Capability::Motor),
        Err(HatError::PortState(PortStateError::NoDevice(0)))
    ));

    // Destroyed handles are silent.
    motor.send("set 1").await.unwrap();
    hat.link().immediate("version").await.unwrap();
    assert_eq!(expect_command(&mut board).await, "version");
}

#[tokio::test]
async fn test_connect_handshake() {
    let (hat, mut board) = ready_hat().await;
    let mut connects = hat.subscribe_connect();
    let mut lines = hat.subscribe_lines();

    board.send_line("P1: connecting to active device").await.unwrap();
    board.send_lines(force_block(1)).await.unwrap();
    board.send_line("P1: established").await.unwrap();

    assert_eq!(recv(&mut connects).await, 1);
    let sensor = hat.port(1, Capability::Sensor).unwrap();
    assert_eq!(sensor.class(), DeviceClass::ForceSensor);
    assert_eq!(sensor.info().modes[1].name, "touched");

    // The handshake lines were not claimed, only observed.
    assert_eq!(recv(&mut lines).await, "P1: connected to active ID 3F");
}

#[tokio::test]
async fn test_bad_handshake_is_reported() {
    let (hat, mut board) = ready_hat().await;
    let mut errors = hat.subscribe_errors();

    board
        .send_lines([
            "P3: connecting to active device",
            "P3: connected to active ID 3F",
            "type 3F",
            "nmodes =0",
            "M0 FORCE SI = N",
            "P3: established",
        ])
        .await
        .unwrap();

    let err = recv(&mut errors).await;
    assert!(matches!(*err, HatError::Grammar(_)));
    assert!(hat.descriptors()[3].is_none());
}

#[tokio::test]
async fn test_board_error_is_broadcast() {
    let (hat, mut board) = ready_hat().await;
    let mut errors = hat.subscribe_errors();
    let mut lines = hat.subscribe_lines();

    board.send_line("Error: unknown command").await.unwrap();
    sync_through(&mut board, &mut lines, "mark").await;

    match &*recv(&mut errors).await {
        HatError::Board { line } => assert_eq!(line, "Error: unknown command"),
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn test_one_shot_set_waits_for_done() {
    let (hat, mut board) = ready_hat().await;
    let motor = hat.port(0, Capability::Motor).unwrap();

    let ramp = motor.set(Setpoint::OneShot {
        shape: Transition::Ramp,
        start: 0.0,
        end: 1.0,
        duration: 1.0,
    });
    let board_side = async {
        let cmd = answer(&mut board).await;
        board.send_line("P0: ramp done").await.unwrap();
        cmd
    };
    let (done, cmd) = tokio::join!(ramp, board_side);
    done.unwrap();
    assert_eq!(cmd, "port 0; set ramp 0 1 1 0");
}

#[tokio::test]
async fn test_sel_once() {
    let (hat, mut board) = ready_hat().await;
    let motor = hat.port(0, Capability::Motor).unwrap();

    let sample = motor.sel_once("apos");
    let board_side = async {
        let cmd = expect_command(&mut board).await;
        board.send_lines(["P0M3: -90", ""]).await.unwrap();
        cmd
    };
    let (sample, cmd) = tokio::join!(sample, board_side);
    assert_eq!(cmd, "port 0; selonce 3");
    assert_eq!(sample.unwrap(), vec![-90.0]);
}

#[tokio::test]
async fn test_motor_commands() {
    let (hat, mut board) = ready_hat().await;
    let motor = hat.port(0, Capability::Motor).unwrap();

    let sent = async {
        motor.plimit(0.7).await?;
        motor.bias(0.3).await?;
        motor.pwm().await?;
        motor.set(0.25).await
    };
    let board_side = async {
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(answer(&mut board).await);
        }
        seen
    };
    let (sent, seen) = tokio::join!(sent, board_side);
    sent.unwrap();
    assert_eq!(
        seen,
        vec![
            "port 0; plimit 0.7",
            "port 0; bias 0.3",
            "port 0; pwm",
            "port 0; set 0.25"
        ]
    );
}

#[tokio::test]
async fn test_halt_stops_every_port() {
    let (hat, mut board) = ready_hat().await;
    let mut halted = hat.subscribe_halt();

    hat.halt().await.unwrap();
    for port in 0..4 {
        assert_eq!(
            expect_command(&mut board).await,
            format!("port {port}; select; pwm; set 0")
        );
    }
    recv(&mut halted).await;
}

#[tokio::test]
async fn test_close_destroys_devices() {
    let (hat, _board) = ready_hat().await;
    let motor = hat.port(0, Capability::Motor).unwrap();
    let mut connects = hat.subscribe_connect();

    hat.close().await.unwrap();
    assert!(motor.is_destroyed());
    assert_eq!(connects.recv().await, None);
    assert_eq!(hat.link().watcher_count(), 0);
}

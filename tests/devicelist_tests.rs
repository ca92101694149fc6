//! Device list grammar tests over realistic board output.

mod common;

use buildhat::{
    parse_device_list, DeviceClass, DeviceListParser, GrammarRule, Limit, PORT_COUNT,
};
use common::{distance_block, four_ports, list_response, motor_block, no_device};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

#[test]
fn test_list_consumes_exactly_four_ports() {
    let lines = list_response();
    let mut parser = DeviceListParser::new(&lines);
    let list = parser.parse_list().unwrap();

    assert_eq!(parser.position(), four_ports().len());
    assert_eq!(parser.remaining(), &["deltat=3487".to_string()]);

    let motor = list[0].as_ref().unwrap();
    assert_eq!(motor.class(), DeviceClass::Motor);
    assert_eq!(motor.modes.len() as i64, motor.vars["nmodes"] + 1);
    assert_eq!(motor.modes[2].name, "pos");
    assert_eq!(motor.modes[2].unit, "deg");
    assert_eq!(motor.modes[2].limits["raw"], Limit { min: 0, max: 360 });
    assert_eq!(motor.combi, vec!["1 2 3", "1 0"]);
    assert_eq!(motor.pids["position"], [0x2ee0, 0x3e8, 0x2710, 0]);

    assert!(list[1].is_none());
    assert_eq!(list[2].as_ref().unwrap().class(), DeviceClass::DistanceSensor);
    assert!(list[3].is_none());
}

#[test]
fn test_hex_limits() {
    let list = parse_device_list(&list_response()).unwrap();
    let limits = &list[2].as_ref().unwrap().modes[0].limits;
    assert_eq!(limits.len(), 3);
    assert_eq!(limits["raw"], Limit { min: 0, max: 10000 });
    assert_eq!(limits["pct"], Limit { min: 0, max: 100 });
    assert_eq!(limits["si"], Limit { min: 0, max: 250 });
}

#[test]
fn test_parse_is_repeatable() {
    let lines = list_response();
    let first = parse_device_list(&lines).unwrap();
    let second = parse_device_list(&lines).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_descriptor_json_shape() {
    let list = parse_device_list(&list_response()).unwrap();
    let json = list[2].as_ref().unwrap().to_json();
    assert_eq!(json["type"]["id"], 0x3e);
    assert_eq!(json["modes"][0]["name"], "distl");
    assert_eq!(json["modes"][0]["format"]["type"], 1);
    assert_eq!(json["modes"][0]["limits"]["raw"]["max"], 10000);
}

#[test]
fn test_missing_port_is_truncation() {
    let mut lines = four_ports();
    lines.pop();
    let err = parse_device_list(&lines).unwrap_err();
    assert!(err.is_truncated());
    assert_eq!(err.rule, GrammarRule::PortHeader { port: 3 });
}

#[test]
fn test_ports_out_of_order() {
    let mut lines = no_device(1);
    lines.extend(no_device(0));
    let err = parse_device_list(&lines).unwrap_err();
    assert_eq!(err.rule, GrammarRule::PortHeader { port: 0 });
    assert_eq!(err.line.as_deref(), Some("P1: no device detected"));
}

#[test]
fn test_error_names_offending_line() {
    let mut lines = motor_block(0);
    lines[10] = "  M1 SPEED".to_string();
    let err = parse_device_list(&lines).unwrap_err();
    assert_eq!(err.rule, GrammarRule::ModeHeader { index: 1 });
    assert_eq!(err.line.as_deref(), Some("  M1 SPEED"));
    assert!(err.to_string().contains("bad header for mode 1"));
}

#[test]
fn test_bad_pid_line() {
    let mut lines = distance_block(0);
    lines.push("speed PID: 1 2 3".to_string());
    let err = parse_device_list(&lines).unwrap_err();
    assert_eq!(err.rule, GrammarRule::PidLine);
}

/// One generated port block.
fn port_block(port: usize, device: Option<(usize, usize, usize)>) -> Vec<String> {
    let Some((nmodes, combis, pids)) = device else {
        return no_device(port);
    };
    let mut lines = vec![
        format!("P{port}: connected to active ID 30"),
        "type 30".to_string(),
        format!("nmodes ={nmodes}"),
        "nview =0".to_string(),
    ];
    for i in 0..=nmodes {
        lines.push(format!("M{i} MODE {i} SI = U{i}"));
        lines.push("format count=2 type=2 chars=6 dp=2".to_string());
        lines.push(format!("RAW: 0 {:X} PCT: 0 64 SI: 0 {:x}", 100 + i, 10 * i));
    }
    for c in 0..combis {
        lines.push(format!("C{c}: {c} 0"));
    }
    for p in 0..pids {
        lines.push(format!("pid{p} PID: 0 1 A FF"));
    }
    lines
}

fn device_shape() -> impl Strategy<Value = Option<(usize, usize, usize)>> {
    proptest::option::of((0usize..5, 0usize..3, 0usize..3))
}

proptest! {
    #[test]
    fn prop_list_consumes_its_ports(
        shapes in proptest::collection::vec(device_shape(), PORT_COUNT),
        trailer in "[a-z]{1,8}=[0-9]{1,5}",
    ) {
        let mut lines: Vec<String> = Vec::new();
        for (port, shape) in shapes.iter().enumerate() {
            lines.extend(port_block(port, *shape));
        }
        let consumed = lines.len();
        lines.push(trailer);

        let mut parser = DeviceListParser::new(&lines);
        let list = parser.parse_list().unwrap();
        prop_assert_eq!(parser.position(), consumed);

        for (port, shape) in shapes.iter().enumerate() {
            match (shape, &list[port]) {
                (None, None) => {}
                (Some((nmodes, combis, pids)), Some(info)) => {
                    prop_assert_eq!(info.modes.len(), nmodes + 1);
                    prop_assert_eq!(info.combi.len(), *combis);
                    prop_assert_eq!(info.pids.len(), *pids);
                    for (i, mode) in info.modes.iter().enumerate() {
                        prop_assert_eq!(mode.index, i);
                        prop_assert_eq!(mode.limits["si"].max, 10 * i as i64);
                    }
                }
                _ => prop_assert!(false, "port {} parsed to the wrong shape", port),
            }
        }
    }
}

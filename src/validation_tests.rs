//! End-to-end resolution scenarios, from YAML configuration to the resolved
//! record.

use std::collections::BTreeMap;

use indoc::indoc;
use maplit::btreemap;

use vsas_api::{
    config::{ConnectorConfig, ControllerConfig, DiskArrayConfiguration},
    error::{ConfigError, ConflictError, ErrorKind, NotFoundError},
    topology::{AttachmentKind, ResolvedTopology},
};

use crate::{resolve_and_write, resolve_controller, serializer, DiskArray};

/// Two dual-expander shelves; A/exp0 is cabled to B/exp0 on phys 8..12.
const TWO_SHELVES: &str = indoc! {r#"
    name: rack0
    enclosures:
      - name: A
        type: 12-bay
        expanders:
          - name: exp0
            address: 0x5000
            phy_count: 36
            ports:
              - id: 0
                phy: 0
                number: 4
            ses:
              buffer_data_path: /var/lib/vsas/ses_a0.bin
          - name: exp1
            address: 0x6000
            phy_count: 36
            ports:
              - id: 0
                phy: 0
                number: 4
        drives:
          - file_pattern: /var/lib/vsas/a_{}.img
            address_base: 0x10000
            serial_pattern: ZA{}
            repeat: 12
            slot_number: 0
            start_phy_id: 16
      - name: B
        type: 12-bay
        expanders:
          - name: exp0
            address: 0x7000
            phy_count: 24
          - name: exp1
            address: 0x8000
            phy_count: 24
        drives:
          - file_pattern: /var/lib/vsas/b_{}.img
            address_base: 0x20000
            serial_pattern: ZB{}
            repeat: 4
            slot_number: 0
            start_phy_id: 12
    connections:
      - - disk_array: A
          expander: exp0
          phy: 8
          number: 4
        - disk_array: B
          expander: exp0
          phy: 8
          number: 4
"#};

const CONTROLLER: &str = indoc! {r#"
    name: hba0
    connectors:
      - attached_enclosure: A
        attached_expander: exp0
        attached_port: 0
        address: 0x500605b000000001
"#};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn array(yaml: &str) -> DiskArrayConfiguration {
    DiskArrayConfiguration::from_yaml_str(yaml).unwrap()
}

fn controller(yaml: &str) -> ControllerConfig {
    ControllerConfig::from_yaml_str(yaml).unwrap()
}

fn resolve(array_yaml: &str, controller_yaml: &str) -> ResolvedTopology {
    init_logger();
    resolve_controller(&array(array_yaml), &controller(controller_yaml)).unwrap()
}

#[test]
fn test_inter_enclosure_link_is_symmetric() {
    let topology = resolve(TWO_SHELVES, CONTROLLER);

    assert_eq!(topology.controller, "hba0");
    assert_eq!(topology.ports.len(), 1);
    let port = &topology.ports[0];
    assert_eq!(port.attached_expander, "A/exp0");

    let names: Vec<_> = port.expanders.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["A/exp0", "B/exp0"]);

    let a = &port.expanders[0];
    let b = &port.expanders[1];
    let a_link = a.links.iter().find(|link| link.phy == 8).unwrap();
    let b_link = b.links.iter().find(|link| link.phy == 8).unwrap();

    assert_eq!(a_link.kind, AttachmentKind::Expander);
    assert_eq!(a_link.num, 4);
    assert_eq!(a_link.attached_name.as_deref(), Some("B/exp0"));
    assert_eq!(a_link.attached_address, Some(0x7000));
    assert_eq!(a_link.attached_phy, Some(8));

    assert_eq!(b_link.kind, AttachmentKind::Expander);
    assert_eq!(b_link.num, 4);
    assert_eq!(b_link.attached_name.as_deref(), Some("A/exp0"));
    assert_eq!(b_link.attached_address, Some(0x5000));
    assert_eq!(b_link.attached_phy, Some(8));

    // The controller sees the host link on the port phys.
    let host = &a.links[0];
    assert_eq!(
        (host.phy, host.num, host.kind),
        (0, 4, AttachmentKind::HostController)
    );
    assert_eq!(host.attached_address, Some(0x500605b000000001));
}

#[test]
fn test_conflicting_links_on_one_phy() {
    init_logger();
    let array = array(indoc! {r#"
        enclosures:
          - name: A
            expanders:
              - name: exp0
                address: 0x1000
                phy_count: 36
                ports:
                  - id: 0
                    phy: 0
                    number: 1
              - name: exp1
                address: 0x2000
                phy_count: 36
            drives:
              - file_pattern: /var/lib/vsas/a_{}.img
                address_base: 0x10000
                serial_pattern: ZA{}
                repeat: 12
                slot_number: 0
                start_phy_id: 8
          - name: B
            expanders:
              - name: exp0
                address: 0x3000
                phy_count: 8
          - name: C
            expanders:
              - name: exp0
                address: 0x4000
                phy_count: 8
        connections:
          - - disk_array: A
              expander: exp0
              phy: 2
              number: 1
            - disk_array: B
              expander: exp0
              phy: 0
              number: 1
          - - disk_array: A
              expander: exp0
              phy: 2
              number: 1
            - disk_array: C
              expander: exp0
              phy: 0
              number: 1
    "#});
    let controller = controller(indoc! {r#"
        name: hba0
        connectors:
          - attached_enclosure: A
            attached_expander: exp0
            attached_port: 0
            address: 0x500605b000000001
    "#});

    let err = resolve_controller(&array, &controller).unwrap_err();
    match err.kind() {
        ErrorKind::Conflict(ConflictError::PhyOccupied { device, phy, .. }) => {
            assert_eq!(device, "A/exp0");
            assert_eq!(*phy, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_ses_device() {
    let topology = resolve(TWO_SHELVES, CONTROLLER);

    assert_eq!(topology.ses.len(), 1);
    let ses = &topology.ses[0];
    assert_eq!(ses.expander, "A/exp0");
    assert_eq!(ses.address, 0x4FFF);
    assert_eq!(ses.serial, 0x4FFF);
    assert_eq!(ses.physical_port, 0);
    assert_eq!(ses.phy, 36);
    assert_eq!(
        ses.buffer_data_path.as_deref(),
        Some(std::path::Path::new("/var/lib/vsas/ses_a0.bin"))
    );

    let a = &topology.ports[0].expanders[0];
    assert_eq!(a.phy_count, 37);
    assert_eq!(ses.scsi_id, a.start_scsi_id + a.phy_count - 1);

    let ses_link = a.links.last().unwrap();
    assert_eq!((ses_link.phy, ses_link.num), (36, 1));
    assert_eq!(ses_link.kind, AttachmentKind::Ses);
}

#[test]
fn test_cycle_terminates() {
    let topology = resolve(
        indoc! {r#"
            enclosures:
              - name: A
                expanders:
                  - name: exp0
                    address: 0x1000
                    phy_count: 16
                    ports:
                      - id: 0
                        phy: 0
                        number: 4
              - name: B
                expanders:
                  - name: exp0
                    address: 0x2000
                    phy_count: 16
            connections:
              - - disk_array: A
                  expander: exp0
                  phy: 4
                  number: 4
                - disk_array: B
                  expander: exp0
                  phy: 0
                  number: 4
              - - disk_array: B
                  expander: exp0
                  phy: 4
                  number: 4
                - disk_array: A
                  expander: exp0
                  phy: 8
                  number: 4
        "#},
        indoc! {r#"
            name: hba0
            connectors:
              - attached_enclosure: A
                attached_expander: exp0
                attached_port: 0
                address: 0x500605b000000001
        "#},
    );

    let expanders = &topology.ports[0].expanders;
    assert_eq!(expanders.len(), 2);
    assert_eq!(expanders[0].links.len(), 3);
    assert_eq!(expanders[1].links.len(), 2);
}

#[test]
fn test_resolution_is_idempotent() {
    init_logger();
    let array = DiskArray::new(&array(TWO_SHELVES)).unwrap();
    let controller = controller(CONTROLLER);

    let first = serializer::to_yaml(&array.resolve(&controller).unwrap()).unwrap();
    let second = serializer::to_yaml(&array.resolve(&controller).unwrap()).unwrap();
    assert_eq!(first, second);

    // A fresh array built from the same configuration agrees too.
    let third = serializer::to_yaml(&resolve(TWO_SHELVES, CONTROLLER)).unwrap();
    assert_eq!(first, third);
}

#[test]
fn test_scsi_ids_monotonic() {
    let topology = resolve(TWO_SHELVES, CONTROLLER);

    let expanders: Vec<_> = topology
        .ports
        .iter()
        .flat_map(|port| port.expanders.iter())
        .collect();
    assert_eq!(expanders[0].start_scsi_id, 8);
    for pair in expanders.windows(2) {
        assert_eq!(
            pair[1].start_scsi_id,
            pair[0].start_scsi_id + pair[0].phy_count
        );
    }

    for drive in &topology.drives {
        let expander = expanders
            .iter()
            .find(|expander| expander.name == drive.expander)
            .unwrap();
        assert_eq!(drive.scsi_id, expander.start_scsi_id + drive.attached_phy);
    }
}

#[test]
fn test_links_never_overlap() {
    let topology = resolve(TWO_SHELVES, CONTROLLER);

    for expander in topology.ports.iter().flat_map(|port| port.expanders.iter()) {
        for pair in expander.links.windows(2) {
            assert!(
                pair[0].phy + pair[0].num <= pair[1].phy,
                "links on '{}' overlap at phy {}",
                expander.name,
                pair[1].phy
            );
        }
        let last = expander.links.last().unwrap();
        assert!(last.phy + last.num <= expander.phy_count);
    }
}

#[test]
fn test_drive_addresses() {
    let topology = resolve(TWO_SHELVES, CONTROLLER);

    // Only side 0 is reachable from this controller.
    assert_eq!(topology.drives.len(), 12 + 4);
    for drive in &topology.drives {
        assert_eq!(drive.side, 0);
        assert_eq!(drive.port_address, drive.address + 1);
        assert_eq!(drive.target_address, drive.address + 3);
        assert_eq!(drive.address % 4, 0);
    }

    let a11 = topology
        .drives
        .iter()
        .find(|drive| drive.serial == "ZA000B")
        .unwrap();
    assert_eq!(a11.slot, 11);
    assert_eq!(a11.address, 0x10000 + 4 * 11);
    assert_eq!(a11.file, "/var/lib/vsas/a_11.img");
    assert_eq!(a11.attached_phy, 16 + 11);
    assert_eq!(a11.attached_address, 0x5000);

    let b0 = topology
        .drives
        .iter()
        .find(|drive| drive.serial == "ZB0000")
        .unwrap();
    assert_eq!(b0.enclosure, "B");
    assert_eq!(b0.expander, "B/exp0");
    assert_eq!(b0.attached_phy, 12);
}

#[test]
fn test_multiple_ports_share_scsi_counter() {
    let topology = resolve(
        TWO_SHELVES,
        indoc! {r#"
            name: hba0
            scsi_id_base: 0
            drive_options:
              - rotation_rate=7200
            connectors:
              - attached_enclosure: A
                attached_expander: exp0
                attached_port: 0
                address: 0x500605b000000001
              - attached_enclosure: A
                attached_expander: exp1
                attached_port: 0
                phy: 4
                address: 0x500605b000000001
        "#},
    );

    let starts: BTreeMap<_, _> = topology
        .ports
        .iter()
        .flat_map(|port| port.expanders.iter())
        .map(|expander| (expander.name.as_str(), expander.start_scsi_id))
        .collect();
    assert_eq!(
        starts,
        btreemap! {
            "A/exp0" => 0,
            "B/exp0" => 37,
            "A/exp1" => 37 + 24,
        }
    );

    // Every drive of A is reachable from both sides.
    let a0: Vec<_> = topology
        .drives
        .iter()
        .filter(|drive| drive.serial == "ZA0000")
        .map(|drive| (drive.port, drive.side, drive.port_address, drive.scsi_id))
        .collect();
    assert_eq!(
        a0,
        vec![(0, 0, 0x10001, 16), (1, 1, 0x10002, 37 + 24 + 16)]
    );
    assert!(topology
        .drives
        .iter()
        .all(|drive| drive.options == vec!["rotation_rate=7200".to_string()]));
}

#[test]
fn test_external_connector() {
    init_logger();
    let mut array = array(TWO_SHELVES);
    assert!(array.enclosures[1].expanders[0].ports.is_empty());
    array.enclosures[1].expanders[0].ports = serde_yaml::from_str(indoc! {r#"
        - id: peer
          phy: 0
          number: 4
          external: true
    "#})
    .unwrap();

    // Without an override the placeholder is still reported.
    let topology = resolve_controller(&array, &controller(CONTROLLER)).unwrap();
    let b = &topology.ports[0].expanders[1];
    assert_eq!(b.links[0].kind, AttachmentKind::Active);
    assert_eq!(b.links[0].attached_address, None);

    let mut controller = controller(CONTROLLER);
    controller.external_connectors.push(ConnectorConfig {
        attached_enclosure: "B".into(),
        attached_expander: "exp0".into(),
        attached_port: "peer".into(),
        phy: 0,
        address: 0x500605b000000101,
    });
    let overridden = resolve_controller(&array, &controller).unwrap();
    let b = &overridden.ports[0].expanders[1];
    assert_eq!(b.links[0].kind, AttachmentKind::Active);
    assert_eq!(b.links[0].attached_address, Some(0x500605b000000101));
    assert_eq!(
        b.links[0].attached_name.as_deref(),
        Some("external connector 0")
    );

    // External connectors never consume SCSI ids.
    assert_eq!(
        serializer::to_yaml(&ResolvedTopology {
            ports: Vec::new(),
            ..overridden.clone()
        })
        .unwrap(),
        serializer::to_yaml(&ResolvedTopology {
            ports: Vec::new(),
            ..topology
        })
        .unwrap()
    );
}

#[test]
fn test_external_connector_not_reached() {
    init_logger();
    let mut controller = controller(CONTROLLER);
    controller.external_connectors.push(ConnectorConfig {
        attached_enclosure: "B".into(),
        attached_expander: "exp1".into(),
        attached_port: "peer".into(),
        phy: 0,
        address: 0x500605b000000101,
    });

    let err = resolve_controller(&array(TWO_SHELVES), &controller).unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::NotFound(NotFoundError::Expander {
            controller: "hba0".into(),
            referrer: "External connector 0".into(),
            expander: "B/exp1".into(),
        })
    );
}

#[test]
fn test_malformed_pattern() {
    init_logger();
    let mut array = array(TWO_SHELVES);
    array.enclosures[0].drives[0].serial_pattern = "ZA".into();
    let err = DiskArray::new(&array).unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::Config(ConfigError::PatternMissingPlaceholder {
            field: "serial_pattern".into(),
            pattern: "ZA".into(),
        })
    );

    array.enclosures[0].drives[0].serial_pattern = "ZA{}-{}".into();
    let err = DiskArray::new(&array).unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::Config(ConfigError::PatternMultiplePlaceholders {
            field: "serial_pattern".into(),
            pattern: "ZA{}-{}".into(),
            count: 2,
        })
    );
}

#[test]
fn test_overlapping_drive_range() {
    init_logger();
    let mut array = array(TWO_SHELVES);
    // Drives of B now run over the link to A on phys 8..12.
    array.enclosures[1].drives[0].start_phy_id = Some(6);

    let err = resolve_controller(&array, &controller(CONTROLLER)).unwrap_err();
    match err.kind() {
        ErrorKind::Conflict(ConflictError::PhyOccupied {
            device,
            phy,
            existing,
            ..
        }) => {
            assert_eq!(device, "B/exp0");
            assert_eq!(*phy, 8);
            assert_eq!(existing, "A/exp0");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_resolve_and_write() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hba0.yaml");
    let mut controller = controller(CONTROLLER);
    controller.output = Some(path.clone());

    let topology = resolve_and_write(&array(TWO_SHELVES), &controller).unwrap();

    let written: ResolvedTopology =
        serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written, topology);
}

#[test]
fn test_failed_resolution_writes_nothing() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hba0.yaml");
    let mut controller = controller(CONTROLLER);
    controller.output = Some(path.clone());
    controller.connectors[0].attached_port = "9".into();

    resolve_and_write(&array(TWO_SHELVES), &controller).unwrap_err();
    assert!(!path.exists());
}

#[test]
fn test_duplicate_connection() {
    init_logger();
    let mut array = array(TWO_SHELVES);
    array.connections.push(array.connections[0].clone());

    let err = DiskArray::new(&array).unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::Conflict(ConflictError::DuplicateConnection {
            expander: "A/exp0".into(),
            phy: 8,
            peer: "B/exp0".into(),
            connection: 0,
            other: 1,
        })
    );
}

#[test]
fn test_scsi_id_overflow() {
    init_logger();
    let mut controller = controller(CONTROLLER);
    controller.scsi_id_base = u32::MAX - 10;

    let err = resolve_controller(&array(TWO_SHELVES), &controller).unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::Config(ConfigError::ScsiIdOverflow {
            controller: "hba0".into(),
            expander: "A/exp0".into(),
            start_scsi_id: u32::MAX - 10,
            phy_count: 37,
        })
    );
}

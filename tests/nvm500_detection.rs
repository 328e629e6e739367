//! 500-series layout detection tests
//!
//! A 500-series NVM carries no layout identifier, so every known layout is
//! tried. These tests verify that exactly the right one is picked.

use nvmedit_rs::core::nvm500::{find_layout, is_valid, layouts, parse_nvm500, Field};
use nvmedit_rs::{classify_nvm, json_to_nvm500, nvm500_to_json, Library, NvmError, ParsedNvm};

mod common;

const VARIANTS: [(Library, &str); 4] = [
    (Library::Bridge, "6.07"),
    (Library::Static, "6.07"),
    (Library::Bridge, "4.62"),
    (Library::Static, "4.33"),
];

#[test]
fn test_detects_every_layout() {
    for (library, version) in VARIANTS {
        let image = common::image_500(library, version);
        let decoded = nvm500_to_json(&image).unwrap();

        let meta = decoded.meta.clone().unwrap();
        assert_eq!(meta.library, library, "{:?} {}", library, version);
        assert_eq!(decoded.controller.protocol_version, version);
        assert_eq!(decoded.nodes, common::document_500(library, version).nodes);
    }
}

#[test]
fn test_only_one_layout_is_valid() {
    for (library, version) in VARIANTS {
        let image = common::image_500(library, version);
        let expected = find_layout(library, version).unwrap();

        let valid: Vec<&str> = layouts()
            .iter()
            .filter(|layout| {
                parse_nvm500(&image, layout)
                    .map(|values| is_valid(&values, layout))
                    .unwrap_or(false)
            })
            .map(|layout| layout.name)
            .collect();
        assert_eq!(valid, vec![expected.name]);
    }
}

#[test]
fn test_document_roundtrip() {
    let json = common::document_500(Library::Static, "6.07");
    let image = json_to_nvm500(&json, "6.07").unwrap();
    let decoded = nvm500_to_json(&image).unwrap();

    assert_eq!(decoded.controller.own_home_id, json.controller.own_home_id);
    assert_eq!(decoded.controller.rf_config, json.controller.rf_config);
    assert_eq!(decoded.controller.command_classes, json.controller.command_classes);
    assert_eq!(decoded.controller.suc_update_entries, json.controller.suc_update_entries);

    // Re-encoding the decoded document reproduces the image
    assert_eq!(json_to_nvm500(&decoded, "6.07").unwrap(), image);
}

#[test]
fn test_corrupted_magic_bytes() {
    let layout = find_layout(Library::Static, "6.07").unwrap();
    let image = common::image_500(Library::Static, "6.07");
    let values = parse_nvm500(&image, layout).unwrap();
    assert!(is_valid(&values, layout));

    for field in [Field::ConfigurationValid0, Field::ConfigurationValid1] {
        let mut values = values.clone();
        values.set_one(field, nvmedit_rs::core::nvm500::EntryValue::Byte(0));
        assert!(!is_valid(&values, layout), "{:?}", field);
    }
}

#[test]
fn test_classification() {
    let image = common::image_500(Library::Bridge, "6.07");
    assert!(matches!(classify_nvm(&image).unwrap(), ParsedNvm::Nvm500(_)));

    let image = common::image_700("7.18.1");
    assert!(matches!(classify_nvm(&image).unwrap(), ParsedNvm::Nvm3(_)));

    assert!(matches!(
        classify_nvm(&[0x5a; 4096]),
        Err(NvmError::InvalidFormat(_))
    ));
}

#[test]
fn test_unknown_protocol_version() {
    let json = common::document_500(Library::Static, "6.07");
    assert!(matches!(
        json_to_nvm500(&json, "5.00"),
        Err(NvmError::NotSupported { .. })
    ));
}

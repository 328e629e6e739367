use std::collections::{BTreeMap, BTreeSet};

use semver::Version;
use tracing::{debug, info};

use super::{apply_version_defaults, ControllerJson, NvmJson, NvmMeta};
use crate::config::EncodeOptions;
use crate::error::{NvmError, Result};
use crate::files::*;
use crate::nvm3::{encode_nvm, parse_nvm, NvmObject};
use crate::protocol::{format_home_id, parse_home_id, NodeJson, NodeRecord};
use crate::version::{parse_version, protocol_file_format, MAX_PROTOCOL_FILE_FORMAT};

/// Version passed to interpreters before the image version is known
const UNKNOWN_VERSION: Version = Version::new(0, 0, 0);

type ObjectMap = BTreeMap<u32, NvmObject>;

/// Decodes a binary NVM3 image into its structured form
pub fn nvm_to_json(buffer: &[u8]) -> Result<NvmJson> {
    let image = parse_nvm(buffer)?;
    let protocol = &image.protocol_objects;
    let application = &image.application_objects;

    let protocol_file: ProtocolVersionFile = require_file(protocol, PROTOCOL_VERSION_KEY, &UNKNOWN_VERSION)?;
    let format = protocol_file.0.format;
    if format > MAX_PROTOCOL_FILE_FORMAT {
        return Err(NvmError::NotSupported {
            reason: format!(
                "Protocol file format {} is newer than the newest supported format {}",
                format, MAX_PROTOCOL_FILE_FORMAT
            ),
            protocol_file_format: Some(format),
        });
    }
    let protocol_version = protocol_file.0.version();

    let application_file: ApplicationVersionFile =
        require_file(application, APPLICATION_VERSION_KEY, &UNKNOWN_VERSION)?;
    let application_version = application_file.0.version();
    debug!(
        "NVM3 image: protocol {} (file format {}), application {}",
        protocol_version, format, application_version
    );

    let node_list: NodeMaskFile = require_file(protocol, NodeMaskKind::NodeList.key(), &protocol_version)?;
    let node_ids: BTreeSet<u8> = node_list.node_ids.into_iter().collect();
    let app_route_lock = read_mask(protocol, NodeMaskKind::AppRouteLock, &protocol_version)?;
    let route_slave_suc = read_mask(protocol, NodeMaskKind::RouteSlaveSuc, &protocol_version)?;
    let suc_pending_update = read_mask(protocol, NodeMaskKind::SucPendingUpdate, &protocol_version)?;
    let virtual_nodes = read_mask(protocol, NodeMaskKind::VirtualNodes, &protocol_version)?;
    let pending_discovery = read_mask(protocol, NodeMaskKind::PendingDiscovery, &protocol_version)?;
    let route_cache_exists = read_mask(protocol, NodeMaskKind::RouteCacheExists, &protocol_version)?;

    let mut node_infos = read_node_infos(protocol, format, &node_ids, &protocol_version)?;
    let cached: BTreeSet<u8> = route_cache_exists.intersection(&node_ids).copied().collect();
    let mut route_caches = read_route_caches(protocol, format, &cached, &protocol_version)?;

    let mut nodes = BTreeMap::new();
    for &node_id in &node_ids {
        let Some(node_info) = node_infos.remove(&node_id) else {
            // Virtual nodes may be listed without ever getting a node info
            if virtual_nodes.contains(&node_id) {
                nodes.insert(node_id, NodeJson::virtual_marker());
                continue;
            }
            return Err(NvmError::InvalidFormat(format!(
                "Node {} is listed but has no node info",
                node_id
            )));
        };
        let (lwr, nlwr) = route_caches
            .remove(&node_id)
            .map_or((None, None), |cache| (cache.lwr, cache.nlwr));

        let record = NodeRecord {
            is_virtual: virtual_nodes.contains(&node_id),
            info: node_info.info,
            neighbors: node_info.neighbors,
            suc_update_index: node_info.suc_update_index,
            app_route_lock: app_route_lock.contains(&node_id),
            route_slave_suc: route_slave_suc.contains(&node_id),
            suc_pending_update: suc_pending_update.contains(&node_id),
            pending_discovery: pending_discovery.contains(&node_id),
            lwr,
            nlwr,
        };
        nodes.insert(node_id, NodeJson::Full(Box::new(record)));
    }
    for &node_id in &virtual_nodes {
        nodes.entry(node_id).or_insert_with(NodeJson::virtual_marker);
    }

    let controller_info: ControllerInfoFile = require_file(protocol, CONTROLLER_INFO_KEY, &protocol_version)?;
    let suc_update_entries = read_suc_update_entries(protocol, format, &protocol_version)?;
    let preferred_repeaters: Option<PreferredRepeatersFile> =
        read_file(protocol, PREFERRED_REPEATERS_KEY, &protocol_version)?;

    let application_type: Option<ApplicationTypeFile> =
        read_file(application, APPLICATION_TYPE_KEY, &application_version)?;
    let command_classes: Option<ApplicationCcsFile> =
        read_file(application, APPLICATION_CCS_KEY, &application_version)?;
    let rf_config: Option<ApplicationRfConfigFile> =
        read_file(application, APPLICATION_RF_CONFIG_KEY, &application_version)?;
    let application_data: Option<ApplicationDataFile> =
        read_file(application, APPLICATION_DATA_KEY, &application_version)?;

    let controller = ControllerJson {
        protocol_version: protocol_version.to_string(),
        application_version: application_version.to_string(),
        home_id: format_home_id(controller_info.home_id),
        node_id: controller_info.node_id,
        last_node_id: controller_info.last_node_id,
        static_controller_node_id: controller_info.static_controller_node_id,
        suc_last_index: controller_info.suc_last_index,
        controller_configuration: controller_info.controller_configuration,
        suc_update_entries,
        suc_awareness_push_needed: Some(controller_info.suc_awareness_push_needed),
        max_node_id: controller_info.max_node_id,
        reserved_id: controller_info.reserved_id,
        system_state: controller_info.system_state,
        preferred_repeaters: preferred_repeaters.map(|file| file.node_ids),
        is_listening: application_type.map(|file| file.is_listening),
        optional_functionality: application_type.map(|file| file.optional_functionality),
        generic_device_class: application_type.map(|file| file.generic_device_class),
        specific_device_class: application_type.map(|file| file.specific_device_class),
        rf_config: rf_config.map(|file| file.0),
        command_classes: command_classes.map(|file| file.0).unwrap_or_default(),
        application_data: application_data.map(|file| hex::encode(file.data)),
    };

    let application_page_size = image
        .application_pages
        .first()
        .map(|page| page.header.page_size);
    let meta = image.protocol_pages.first().map(|page| NvmMeta {
        page_size: page.header.page_size,
        device_family: page.header.device_family,
        write_size: page.header.write_size,
        memory_mapped: page.header.memory_mapped,
        application_page_size: application_page_size.filter(|&size| size != page.header.page_size),
    });

    info!(
        "Converted NVM3 image to JSON: format {}, {} nodes",
        format,
        nodes.len()
    );

    Ok(NvmJson {
        format,
        meta,
        controller,
        nodes,
    })
}

fn read_mask(protocol: &ObjectMap, kind: NodeMaskKind, version: &Version) -> Result<BTreeSet<u8>> {
    let file: Option<NodeMaskFile> = read_file(protocol, kind.key(), version)?;
    Ok(file.map(|file| file.node_ids.into_iter().collect()).unwrap_or_default())
}

fn read_node_infos(
    protocol: &ObjectMap,
    format: u8,
    node_ids: &BTreeSet<u8>,
    version: &Version,
) -> Result<BTreeMap<u8, NodeInfo>> {
    let mut node_infos = BTreeMap::new();
    if format == 0 {
        for &node_id in node_ids {
            let file: Option<NodeInfoFileV0> = read_file(protocol, node_info_v0_key(node_id), version)?;
            if let Some(file) = file {
                node_infos.insert(node_id, file.node_info);
            }
        }
    } else {
        let keys: BTreeSet<u32> = node_ids.iter().map(|&id| node_info_v1_key(id)).collect();
        for key in keys {
            let file: Option<NodeInfoFileV1> = read_file(protocol, key, version)?;
            if let Some(file) = file {
                node_infos.extend(file.node_infos.into_iter().map(|info| (info.node_id, info)));
            }
        }
    }
    Ok(node_infos)
}

fn read_route_caches(
    protocol: &ObjectMap,
    format: u8,
    node_ids: &BTreeSet<u8>,
    version: &Version,
) -> Result<BTreeMap<u8, RouteCache>> {
    let mut route_caches = BTreeMap::new();
    if format == 0 {
        for &node_id in node_ids {
            let file: Option<RouteCacheFileV0> = read_file(protocol, route_cache_v0_key(node_id), version)?;
            if let Some(file) = file {
                route_caches.insert(node_id, file.route_cache);
            }
        }
    } else {
        let keys: BTreeSet<u32> = node_ids.iter().map(|&id| route_cache_v1_key(id)).collect();
        for key in keys {
            let file: Option<RouteCacheFileV1> = read_file(protocol, key, version)?;
            if let Some(file) = file {
                route_caches.extend(file.route_caches.into_iter().map(|cache| (cache.node_id, cache)));
            }
        }
    }
    Ok(route_caches)
}

fn read_suc_update_entries(
    protocol: &ObjectMap,
    format: u8,
    version: &Version,
) -> Result<Vec<crate::protocol::SucUpdateEntry>> {
    if format < 5 {
        let file: Option<SucUpdateEntriesFileV0> = read_file(protocol, SUC_UPDATE_ENTRIES_V0_KEY, version)?;
        return Ok(file.map(|file| file.entries).unwrap_or_default());
    }

    let mut entries = Vec::new();
    for index in 0..SUC_UPDATE_FILES_V5 as u8 {
        let file: Option<SucUpdateEntriesFileV5> =
            read_file(protocol, suc_update_entries_v5_key(index), version)?;
        if let Some(file) = file {
            entries.extend(file.entries);
        }
    }
    Ok(entries)
}

/// Encodes a structured document into a binary NVM3 image for the given
/// target protocol version
///
/// Page parameters come from the document's `meta`, or the defaults when
/// the document has none.
pub fn json_to_nvm(json: &NvmJson, target_protocol_version: &str) -> Result<Vec<u8>> {
    json_to_nvm_with_options(json, target_protocol_version, &EncodeOptions::default())
}

/// Like [`json_to_nvm`], with the page parameters to use when the document
/// has no `meta`
pub fn json_to_nvm_with_options(
    json: &NvmJson,
    target_protocol_version: &str,
    fallback: &EncodeOptions,
) -> Result<Vec<u8>> {
    let target = parse_version(target_protocol_version)?;
    let format = protocol_file_format(&target)?;
    let controller = apply_version_defaults(&json.controller, &target);
    let application_version = parse_version(&controller.application_version)?;

    let protocol = protocol_objects(json, &controller, &target, format)?;
    let application = application_objects(&controller, &target, &application_version, format)?;

    let options = json
        .meta
        .as_ref()
        .map(EncodeOptions::from)
        .unwrap_or_else(|| fallback.clone());

    info!(
        "Encoding JSON as NVM3 image for protocol {} (file format {})",
        target, format
    );
    encode_nvm(&application, &protocol, &options)
}

fn insert_file(objects: &mut ObjectMap, file: &impl NvmFileCodec, version: &Version) -> Result<()> {
    let object = file.encode(version)?;
    objects.insert(object.key, object);
    Ok(())
}

fn protocol_objects(
    json: &NvmJson,
    controller: &ControllerJson,
    target: &Version,
    format: u8,
) -> Result<ObjectMap> {
    let mut objects = ObjectMap::new();
    insert_file(
        &mut objects,
        &ProtocolVersionFile(VersionFile::new(format, target)?),
        target,
    )?;

    let records: Vec<(u8, &NodeRecord)> = json
        .nodes
        .iter()
        .filter_map(|(&node_id, node)| node.as_record().map(|record| (node_id, record)))
        .collect();
    let ids_where = |predicate: fn(&NodeRecord) -> bool| -> Vec<u8> {
        records
            .iter()
            .filter(|(_, record)| predicate(record))
            .map(|&(node_id, _)| node_id)
            .collect()
    };

    let masks = [
        (NodeMaskKind::NodeList, ids_where(|_| true)),
        (NodeMaskKind::AppRouteLock, ids_where(|r| r.app_route_lock)),
        (NodeMaskKind::RouteSlaveSuc, ids_where(|r| r.route_slave_suc)),
        (NodeMaskKind::SucPendingUpdate, ids_where(|r| r.suc_pending_update)),
        (NodeMaskKind::PendingDiscovery, ids_where(|r| r.pending_discovery)),
        (NodeMaskKind::RouteCacheExists, ids_where(|r| r.lwr.is_some() || r.nlwr.is_some())),
        (
            NodeMaskKind::VirtualNodes,
            json.nodes
                .iter()
                .filter(|(_, node)| node.is_virtual())
                .map(|(&node_id, _)| node_id)
                .collect(),
        ),
    ];
    for (kind, node_ids) in masks {
        insert_file(&mut objects, &NodeMaskFile::new(kind, node_ids), target)?;
    }

    let node_infos = records.iter().map(|&(node_id, record)| NodeInfo {
        node_id,
        info: record.info.clone(),
        neighbors: record.neighbors.clone(),
        suc_update_index: record.suc_update_index,
    });
    let route_caches = records
        .iter()
        .filter(|(_, record)| record.lwr.is_some() || record.nlwr.is_some())
        .map(|&(node_id, record)| RouteCache {
            node_id,
            lwr: record.lwr.clone(),
            nlwr: record.nlwr.clone(),
        });

    if format == 0 {
        for node_info in node_infos {
            insert_file(&mut objects, &NodeInfoFileV0 { node_info }, target)?;
        }
        for route_cache in route_caches {
            insert_file(&mut objects, &RouteCacheFileV0 { route_cache }, target)?;
        }
    } else {
        let mut files: BTreeMap<u32, Vec<NodeInfo>> = BTreeMap::new();
        for node_info in node_infos {
            files.entry(node_info_v1_key(node_info.node_id)).or_default().push(node_info);
        }
        for node_infos in files.into_values() {
            insert_file(&mut objects, &NodeInfoFileV1 { node_infos }, target)?;
        }

        let mut files: BTreeMap<u32, Vec<RouteCache>> = BTreeMap::new();
        for route_cache in route_caches {
            files.entry(route_cache_v1_key(route_cache.node_id)).or_default().push(route_cache);
        }
        for route_caches in files.into_values() {
            insert_file(&mut objects, &RouteCacheFileV1 { route_caches }, target)?;
        }
    }

    if format < 5 {
        let file = SucUpdateEntriesFileV0 {
            entries: controller.suc_update_entries.clone(),
        };
        insert_file(&mut objects, &file, target)?;
    } else {
        let mut files = SucUpdateEntriesFileV5::split(&controller.suc_update_entries)?;
        for index in files.len()..SUC_UPDATE_FILES_V5 {
            files.push(SucUpdateEntriesFileV5 {
                file_index: index as u8,
                entries: Vec::new(),
            });
        }
        for file in &files {
            insert_file(&mut objects, file, target)?;
        }
    }

    let controller_info = ControllerInfoFile {
        home_id: parse_home_id(&controller.home_id)?,
        node_id: controller.node_id,
        last_node_id: controller.last_node_id,
        static_controller_node_id: controller.static_controller_node_id,
        suc_last_index: controller.suc_last_index,
        controller_configuration: controller.controller_configuration,
        suc_awareness_push_needed: controller.suc_awareness_push_needed.unwrap_or_default(),
        max_node_id: controller.max_node_id,
        reserved_id: controller.reserved_id,
        system_state: controller.system_state,
    };
    insert_file(&mut objects, &controller_info, target)?;

    if let Some(node_ids) = &controller.preferred_repeaters {
        let file = PreferredRepeatersFile {
            node_ids: node_ids.clone(),
        };
        insert_file(&mut objects, &file, target)?;
    }

    debug!("Prepared {} protocol objects", objects.len());
    Ok(objects)
}

fn application_objects(
    controller: &ControllerJson,
    target: &Version,
    application_version: &Version,
    format: u8,
) -> Result<ObjectMap> {
    let mut objects = ObjectMap::new();
    insert_file(
        &mut objects,
        &ApplicationVersionFile(VersionFile::new(format, application_version)?),
        target,
    )?;

    let application_type = ApplicationTypeFile {
        is_listening: controller.is_listening.unwrap_or(true),
        optional_functionality: controller.optional_functionality.unwrap_or(false),
        generic_device_class: controller.generic_device_class.unwrap_or(0x02),
        specific_device_class: controller.specific_device_class.unwrap_or(0x07),
    };
    insert_file(&mut objects, &application_type, target)?;
    insert_file(
        &mut objects,
        &ApplicationCcsFile(controller.command_classes.clone()),
        target,
    )?;

    if let Some(rf_config) = &controller.rf_config {
        insert_file(&mut objects, &ApplicationRfConfigFile(rf_config.clone()), target)?;
    }

    if let Some(application_data) = &controller.application_data {
        let data = hex::decode(application_data)
            .map_err(|e| NvmError::InvalidJson(format!("Invalid application data: {}", e)))?;
        insert_file(&mut objects, &ApplicationDataFile { data }, target)?;
    }

    debug!("Prepared {} application objects", objects.len());
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Beam, NodeProtocolInfo, NodeType, Route, SucUpdateEntry};

    fn record(node_id: u8) -> NodeRecord {
        NodeRecord {
            is_virtual: false,
            info: NodeProtocolInfo {
                is_listening: node_id == 1,
                is_frequent_listening: (node_id == 3).then_some(Beam::Ms1000),
                is_routing: true,
                supported_data_rates: vec![9600, 40000, 100000],
                protocol_version: 3,
                optional_functionality: node_id == 1,
                node_type: if node_id == 1 {
                    NodeType::Controller
                } else {
                    NodeType::EndNode
                },
                supports_security: false,
                supports_beaming: true,
                generic_device_class: if node_id == 1 { 0x02 } else { 0x10 },
                specific_device_class: Some(0x01),
            },
            neighbors: (1..=3).filter(|&id| id != node_id).collect(),
            suc_update_index: 0,
            app_route_lock: false,
            route_slave_suc: node_id == 2,
            suc_pending_update: false,
            pending_discovery: node_id == 3,
            lwr: (node_id == 2).then(|| Route {
                beaming: None,
                protocol_rate: 3,
                repeater_node_ids: vec![3],
            }),
            nlwr: None,
        }
    }

    fn document() -> NvmJson {
        let mut nodes: BTreeMap<u8, NodeJson> = (1..=3)
            .map(|id| (id, NodeJson::Full(Box::new(record(id)))))
            .collect();
        nodes.insert(10, NodeJson::virtual_marker());

        NvmJson {
            format: 4,
            meta: Some(NvmMeta {
                page_size: 2048,
                device_family: 2047,
                write_size: crate::nvm3::consts::PageWriteSize::Write16,
                memory_mapped: true,
                application_page_size: None,
            }),
            controller: ControllerJson {
                protocol_version: "7.18.1".to_string(),
                application_version: "7.18.1".to_string(),
                home_id: "0xdeadbeef".to_string(),
                node_id: 1,
                last_node_id: 3,
                static_controller_node_id: 1,
                suc_last_index: 2,
                controller_configuration: 0x28,
                suc_update_entries: vec![SucUpdateEntry {
                    node_id: 3,
                    change_type: 1,
                    supported_ccs: vec![0x20, 0x25],
                    controlled_ccs: Vec::new(),
                }],
                suc_awareness_push_needed: Some(0),
                max_node_id: 3,
                reserved_id: 0,
                system_state: 0,
                preferred_repeaters: Some(vec![2]),
                is_listening: Some(true),
                optional_functionality: Some(false),
                generic_device_class: Some(0x02),
                specific_device_class: Some(0x07),
                rf_config: Some(RfConfig {
                    rf_region: 1,
                    tx_power: 0.0,
                    measured_0dbm: 3.3,
                    enable_pti: Some(0),
                    max_tx_power: Some(14.0),
                    node_id_type: None,
                }),
                command_classes: CommandClasses {
                    included_insecurely: vec![0x5e, 0x86],
                    included_securely_insecure_ccs: Vec::new(),
                    included_securely_secure_ccs: vec![0x9f],
                },
                application_data: Some("0102030000ff".to_string()),
            },
            nodes,
        }
    }

    #[test]
    fn test_document_roundtrip() -> Result<()> {
        let json = document();
        let image = json_to_nvm(&json, "7.18.1")?;
        assert_eq!(nvm_to_json(&image)?, json);
        Ok(())
    }

    #[test]
    fn test_format_zero_layout() -> Result<()> {
        let mut json = document();
        json.format = 0;
        json.controller.protocol_version = "7.0.0".to_string();
        json.controller.application_version = "7.0.0".to_string();
        json.controller.rf_config = json.controller.rf_config.map(|rf| RfConfig {
            enable_pti: None,
            max_tx_power: None,
            ..rf
        });

        let image = json_to_nvm(&json, "7.0.0")?;
        let parsed = parse_nvm(&image)?;
        assert!(parsed.protocol_objects.contains_key(&node_info_v0_key(2)));
        assert!(parsed.protocol_objects.contains_key(&route_cache_v0_key(2)));
        assert!(!parsed.protocol_objects.contains_key(&node_info_v1_key(2)));
        assert_eq!(nvm_to_json(&image)?, json);
        Ok(())
    }

    #[test]
    fn test_format_five_splits_suc_entries() -> Result<()> {
        let json = document();
        let image = json_to_nvm(&json, "7.21.0")?;
        let parsed = parse_nvm(&image)?;
        assert!(parsed.protocol_objects.contains_key(&suc_update_entries_v5_key(7)));
        assert!(!parsed.protocol_objects.contains_key(&SUC_UPDATE_ENTRIES_V0_KEY));

        let decoded = nvm_to_json(&image)?;
        assert_eq!(decoded.format, 5);
        assert_eq!(decoded.controller.protocol_version, "7.21.0");
        assert_eq!(decoded.controller.suc_update_entries, json.controller.suc_update_entries);
        assert_eq!(decoded.controller.rf_config.and_then(|rf| rf.node_id_type), Some(1));
        assert_eq!(decoded.nodes, json.nodes);
        Ok(())
    }

    /// Re-encodes `image` with its node list replaced by `node_ids`
    fn with_node_list(image: &[u8], node_ids: Vec<u8>) -> Result<Vec<u8>> {
        let parsed = parse_nvm(image)?;
        let mut protocol = parsed.protocol_objects;
        let node_list = NodeMaskFile::new(NodeMaskKind::NodeList, node_ids).encode(&Version::new(7, 0, 0))?;
        protocol.insert(node_list.key, node_list);
        encode_nvm(&parsed.application_objects, &protocol, &EncodeOptions::default())
    }

    #[test]
    fn test_listed_virtual_node_without_info() -> Result<()> {
        for target in ["7.0.0", "7.18.1"] {
            let mut json = document();
            json.controller.protocol_version = target.to_string();
            json.controller.application_version = target.to_string();
            let image = with_node_list(&json_to_nvm(&json, target)?, vec![1, 2, 3, 10])?;
            let decoded = nvm_to_json(&image)?;
            assert_eq!(decoded.nodes[&10], NodeJson::virtual_marker());
            assert_eq!(decoded.nodes, document().nodes);
        }
        Ok(())
    }

    #[test]
    fn test_listed_node_without_info() -> Result<()> {
        let image = with_node_list(&json_to_nvm(&document(), "7.18.1")?, vec![1, 2, 3, 4])?;
        assert!(matches!(nvm_to_json(&image), Err(NvmError::InvalidFormat(_))));
        Ok(())
    }

    #[test]
    fn test_missing_optional_files_are_null() -> Result<()> {
        let mut json = document();
        json.controller.rf_config = None;
        json.controller.application_data = None;
        json.controller.preferred_repeaters = None;

        let decoded = nvm_to_json(&json_to_nvm(&json, "7.18.1")?)?;
        assert_eq!(decoded.controller.rf_config, None);
        assert_eq!(decoded.controller.application_data, None);
        assert_eq!(decoded.controller.preferred_repeaters, None);
        Ok(())
    }

    #[test]
    fn test_target_too_old() {
        assert!(matches!(
            json_to_nvm(&document(), "6.81.0"),
            Err(NvmError::NotSupported { .. })
        ));
    }

    #[test]
    fn test_invalid_application_data() {
        let mut json = document();
        json.controller.application_data = Some("xyz".to_string());
        assert!(matches!(
            json_to_nvm(&json, "7.18.1"),
            Err(NvmError::InvalidJson(_))
        ));
    }
}

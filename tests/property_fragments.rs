//! Property-based tests for object fragmentation and compaction
//!
//! Uses proptest to verify that large objects survive being split across
//! pages and that interrupted writes never corrupt other keys.

use std::collections::BTreeMap;

use nvmedit_rs::core::nvm3::consts::NVM3_PAGE_HEADER_SIZE;
use nvmedit_rs::core::nvm3::{
    compress_objects, encode_nvm, fragment_large_object, read_objects, write_object, FragmentType, NvmObject,
};
use nvmedit_rs::{parse_nvm, EncodeOptions};
use proptest::prelude::*;

fn page_size() -> impl Strategy<Value = usize> {
    prop_oneof![Just(512usize), Just(1024usize), Just(2048usize)]
}

proptest! {
    #[test]
    fn prop_fragments_reassemble(
        payload in prop::collection::vec(any::<u8>(), 121..6000),
        page_size in page_size(),
        used in 0usize..400,
    ) {
        let usable = page_size - NVM3_PAGE_HEADER_SIZE;
        let first_page_space = usable - used.min(usable - 16);
        let object = NvmObject::data(0x51200, payload.clone());

        let fragments = fragment_large_object(&object, first_page_space, usable).unwrap();
        for fragment in &fragments {
            prop_assert!(fragment.required_space() <= usable);
        }
        if fragments.len() > 1 {
            prop_assert_eq!(fragments[0].fragment_type, FragmentType::First);
            prop_assert_eq!(fragments[fragments.len() - 1].fragment_type, FragmentType::Last);
        }

        let compacted = compress_objects(&fragments);
        prop_assert_eq!(compacted.len(), 1);
        prop_assert_eq!(compacted[&0x51200].data.as_deref(), Some(payload.as_slice()));
    }

    #[test]
    fn prop_truncated_chain_is_dropped(
        payload in prop::collection::vec(any::<u8>(), 1200..4000),
        other in prop::collection::vec(any::<u8>(), 1..100),
    ) {
        let object = NvmObject::data(0x50003, payload);
        let mut fragments = fragment_large_object(&object, 200, 492).unwrap();
        prop_assume!(fragments.len() >= 3);
        fragments.pop();

        let mut stream = vec![NvmObject::data(0x50004, other.clone())];
        stream.extend(fragments);
        let compacted = compress_objects(&stream);

        prop_assert!(!compacted.contains_key(&0x50003));
        prop_assert_eq!(compacted[&0x50004].data.as_deref(), Some(other.as_slice()));
    }

    #[test]
    fn prop_objects_survive_serialization(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..10),
    ) {
        let objects: Vec<NvmObject> = payloads
            .iter()
            .enumerate()
            .map(|(i, payload)| NvmObject::data(0x100 + i as u32, payload.clone()))
            .collect();

        let mut buffer = Vec::new();
        for object in &objects {
            let mut bytes = write_object(object);
            bytes.resize((bytes.len() + 3) & !3, 0xff);
            buffer.extend(bytes);
        }

        prop_assert_eq!(read_objects(&buffer).unwrap(), objects);
    }

    #[test]
    fn prop_image_roundtrip(
        sizes in prop::collection::vec(1usize..2000, 1..12),
        page_size in page_size(),
    ) {
        let protocol: BTreeMap<u32, NvmObject> = sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                let key = 0x50000 + i as u32;
                (key, NvmObject::data(key, vec![i as u8 ^ 0x5a; size]))
            })
            .collect();

        let options = EncodeOptions::default().with_page_size(page_size);
        let image = encode_nvm(&BTreeMap::new(), &protocol, &options).unwrap();
        let parsed = parse_nvm(&image).unwrap();
        prop_assert_eq!(parsed.protocol_objects, protocol);
    }
}

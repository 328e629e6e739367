use semver::Version;

use super::{payload_of, NvmFileCodec};
use crate::error::{NvmError, Result};
use crate::nvm3::NvmObject;
use crate::protocol::{Route, MAX_NODES, ROUTE_SIZE};

pub const ROUTE_CACHE_V0_BASE_KEY: u32 = 0x50400;
pub const ROUTE_CACHE_V1_BASE_KEY: u32 = 0x51400;
pub const ROUTE_CACHES_PER_FILE_V1: usize = 8;
pub const ROUTE_CACHE_SIZE: usize = 2 * ROUTE_SIZE;

const ROUTE_CACHE_V1_FILES: u32 = MAX_NODES as u32 / ROUTE_CACHES_PER_FILE_V1 as u32;

pub fn route_cache_v0_key(node_id: u8) -> u32 {
    ROUTE_CACHE_V0_BASE_KEY + u32::from(node_id) - 1
}

pub fn route_cache_v1_key(node_id: u8) -> u32 {
    ROUTE_CACHE_V1_BASE_KEY + (u32::from(node_id) - 1) / ROUTE_CACHES_PER_FILE_V1 as u32
}

pub fn is_route_cache_v0_key(key: u32) -> bool {
    (ROUTE_CACHE_V0_BASE_KEY..ROUTE_CACHE_V0_BASE_KEY + u32::from(MAX_NODES)).contains(&key)
}

pub fn is_route_cache_v1_key(key: u32) -> bool {
    (ROUTE_CACHE_V1_BASE_KEY..ROUTE_CACHE_V1_BASE_KEY + ROUTE_CACHE_V1_FILES).contains(&key)
}

/// Last working route and next-to-last working route of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCache {
    pub node_id: u8,
    pub lwr: Option<Route>,
    pub nlwr: Option<Route>,
}

impl RouteCache {
    fn parse(node_id: u8, bytes: &[u8]) -> Self {
        RouteCache {
            node_id,
            lwr: Route::parse(&bytes[..ROUTE_SIZE]),
            nlwr: Route::parse(&bytes[ROUTE_SIZE..ROUTE_CACHE_SIZE]),
        }
    }

    fn encode(&self) -> Result<[u8; ROUTE_CACHE_SIZE]> {
        let mut bytes = [0u8; ROUTE_CACHE_SIZE];
        bytes[..ROUTE_SIZE].copy_from_slice(&Route::encode(self.lwr.as_ref())?);
        bytes[ROUTE_SIZE..].copy_from_slice(&Route::encode(self.nlwr.as_ref())?);
        Ok(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCacheFileV0 {
    pub route_cache: RouteCache,
}

impl NvmFileCodec for RouteCacheFileV0 {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        if !is_route_cache_v0_key(object.key) {
            return Err(NvmError::InvalidFormat(format!(
                "Object {:#07x} is not a route cache file",
                object.key
            )));
        }
        let node_id = (object.key - ROUTE_CACHE_V0_BASE_KEY + 1) as u8;
        let payload = payload_of(object, ROUTE_CACHE_SIZE)?;
        Ok(RouteCacheFileV0 {
            route_cache: RouteCache::parse(node_id, payload),
        })
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        let bytes = self.route_cache.encode()?;
        Ok(NvmObject::data(route_cache_v0_key(self.route_cache.node_id), bytes.to_vec()))
    }
}

/// Route caches of eight consecutive nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCacheFileV1 {
    pub route_caches: Vec<RouteCache>,
}

impl NvmFileCodec for RouteCacheFileV1 {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        if !is_route_cache_v1_key(object.key) {
            return Err(NvmError::InvalidFormat(format!(
                "Object {:#07x} is not a route cache file",
                object.key
            )));
        }
        let first_node_id =
            (object.key - ROUTE_CACHE_V1_BASE_KEY) as usize * ROUTE_CACHES_PER_FILE_V1 + 1;
        let payload = payload_of(object, ROUTE_CACHE_SIZE * ROUTE_CACHES_PER_FILE_V1)?;

        let route_caches = payload
            .chunks_exact(ROUTE_CACHE_SIZE)
            .take(ROUTE_CACHES_PER_FILE_V1)
            .enumerate()
            .filter(|(_, slot)| slot.iter().any(|&b| b != 0))
            .map(|(i, slot)| RouteCache::parse((first_node_id + i) as u8, slot))
            .collect();
        Ok(RouteCacheFileV1 { route_caches })
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        let first = self.route_caches.first().ok_or_else(|| {
            NvmError::InvalidJson("Route cache file without route caches".to_string())
        })?;
        let key = route_cache_v1_key(first.node_id);
        let first_node_id = (key - ROUTE_CACHE_V1_BASE_KEY) as usize * ROUTE_CACHES_PER_FILE_V1 + 1;

        let mut payload = vec![0u8; ROUTE_CACHE_SIZE * ROUTE_CACHES_PER_FILE_V1];
        for route_cache in &self.route_caches {
            if route_cache_v1_key(route_cache.node_id) != key {
                return Err(NvmError::InvalidJson(format!(
                    "Node {} does not belong in route cache file {:#07x}",
                    route_cache.node_id, key
                )));
            }
            let start = (route_cache.node_id as usize - first_node_id) * ROUTE_CACHE_SIZE;
            payload[start..start + ROUTE_CACHE_SIZE].copy_from_slice(&route_cache.encode()?);
        }
        Ok(NvmObject::data(key, payload))
    }
}

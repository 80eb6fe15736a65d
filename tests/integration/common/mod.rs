//! Common fixtures for integration tests

use chrono::{DateTime, TimeZone, Utc};
use oci_append::digest::sha256_digest;
use oci_append::image::{DOCKER_CONFIG_V1, DOCKER_LAYER_GZIP, DOCKER_MANIFEST_V2};
use oci_append::MemoryRegistry;
use serde_json::{json, Value};

pub const BASE_IMAGE: &str = "localhost:5000/my-alpine:latest";
pub const TARGET_IMAGE: &str = "localhost:5000/my-alpine:new-tag-lol";

/// The blobs and documents seeded for a base image.
#[allow(dead_code)]
pub struct SeededImage {
    pub manifest: Value,
    pub manifest_bytes: Vec<u8>,
    pub config: Value,
    pub config_bytes: Vec<u8>,
    pub layer_digest: String,
}

/// Fixed timestamp for the new history record.
pub fn created() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 11, 24, 20, 19, 40).unwrap()
}

/// Seeds `tag` with a one-layer image whose config has one diff_id and an
/// empty history, the shape of a freshly pushed minimal base image.
pub fn seed_base_image(registry: &MemoryRegistry, tag: &str) -> SeededImage {
    seed_image(registry, tag, DOCKER_MANIFEST_V2, DOCKER_CONFIG_V1, DOCKER_LAYER_GZIP)
}

pub fn seed_oci_image(registry: &MemoryRegistry, tag: &str) -> SeededImage {
    seed_image(
        registry,
        tag,
        "application/vnd.oci.image.manifest.v1+json",
        "application/vnd.oci.image.config.v1+json",
        "application/vnd.oci.image.layer.v1.tar+gzip",
    )
}

fn seed_image(
    registry: &MemoryRegistry,
    tag: &str,
    manifest_type: &str,
    config_type: &str,
    layer_type: &str,
) -> SeededImage {
    // Stand-in for the base filesystem; only its digest matters here.
    let base_layer = b"base layer blob".to_vec();
    let layer_digest = registry.insert_blob(&base_layer);

    let config = json!({
        "architecture": "amd64",
        "os": "linux",
        "config": {
            "Env": ["PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"],
            "Cmd": ["/bin/sh"]
        },
        "rootfs": {
            "type": "layers",
            "diff_ids": [sha256_digest(b"base layer tar")]
        },
        "history": []
    });
    let config_bytes = serde_json::to_vec(&config).unwrap();
    let config_digest = registry.insert_blob(&config_bytes);

    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": manifest_type,
        "config": {
            "mediaType": config_type,
            "size": config_bytes.len(),
            "digest": config_digest
        },
        "layers": [{
            "mediaType": layer_type,
            "size": base_layer.len(),
            "digest": layer_digest
        }]
    });
    let manifest_bytes = serde_json::to_vec(&manifest).unwrap();
    registry.insert_manifest(tag, &manifest_bytes);

    SeededImage {
        manifest,
        manifest_bytes,
        config,
        config_bytes,
        layer_digest,
    }
}
